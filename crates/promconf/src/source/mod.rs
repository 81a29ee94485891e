//! Manifest-directory resource source.
//!
//! Stands in for a cluster watch: ConfigMap manifests are read from a
//! directory and every rescan is diffed against the last known state to
//! produce create/update/delete events.

pub mod watcher;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use watcher::SourceWatcher;

use crate::error::SourceError;
use crate::resource::{Resource, ResourceKey};

pub type Result<T> = std::result::Result<T, SourceError>;

/// A change to one resource, as delivered to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Created(Resource),
    Updated { old: Resource, new: Resource },
    Deleted(Resource),
}

impl ResourceEvent {
    pub fn key(&self) -> ResourceKey {
        match self {
            ResourceEvent::Created(r) | ResourceEvent::Deleted(r) => r.key(),
            ResourceEvent::Updated { new, .. } => new.key(),
        }
    }
}

#[derive(Debug)]
pub struct ManifestSource {
    dir: PathBuf,
    known: BTreeMap<ResourceKey, Resource>,
}

impl ManifestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resources as of the last successful rescan, in key order.
    pub fn known(&self) -> impl Iterator<Item = &Resource> {
        self.known.values()
    }

    /// Reads every manifest under the directory.
    ///
    /// Hidden files and directories are skipped, as is anything that is not
    /// `.yaml`/`.yml`. When two manifests share an identity the first one in
    /// path order wins.
    pub fn scan(&self) -> Result<BTreeMap<ResourceKey, Resource>> {
        fs::metadata(&self.dir).map_err(|e| SourceError::ReadDirectory {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut resources = BTreeMap::new();

        for entry in WalkDir::new(&self.dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_manifest_file(&self.dir, path) {
                continue;
            }

            for resource in load_manifests(path)? {
                let key = resource.key();
                if resources.contains_key(&key) {
                    tracing::warn!(
                        resource = %key,
                        path = %path.display(),
                        "Duplicate manifest ignored"
                    );
                    continue;
                }
                resources.insert(key, resource);
            }
        }

        Ok(resources)
    }

    /// Rescans the directory and returns what changed since the last call.
    ///
    /// Events come out deletions first, then creations and updates, each in
    /// key order. On error the known state is left untouched.
    pub fn rescan(&mut self) -> Result<Vec<ResourceEvent>> {
        let current = self.scan()?;
        let mut events = Vec::new();

        for (key, old) in &self.known {
            if !current.contains_key(key) {
                events.push(ResourceEvent::Deleted(old.clone()));
            }
        }

        for (key, new) in &current {
            match self.known.get(key) {
                None => events.push(ResourceEvent::Created(new.clone())),
                Some(old) if old != new => events.push(ResourceEvent::Updated {
                    old: old.clone(),
                    new: new.clone(),
                }),
                Some(_) => {}
            }
        }

        self.known = current;
        Ok(events)
    }

    /// Re-delivers every known resource as an update onto itself.
    pub fn resync(&self) -> Vec<ResourceEvent> {
        self.known
            .values()
            .map(|r| ResourceEvent::Updated {
                old: r.clone(),
                new: r.clone(),
            })
            .collect()
    }
}

/// Loads every ConfigMap document in one file.
///
/// YAML syntax errors fail the whole file. Documents that are not ConfigMaps
/// are logged and skipped.
pub fn load_manifests(path: &Path) -> Result<Vec<Resource>> {
    let content = fs::read_to_string(path).map_err(|e| SourceError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| SourceError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }

        match Resource::from_manifest(value) {
            Ok(resource) => resources.push(resource),
            Err(e) => tracing::warn!(path = %path.display(), err = %e, "Skipping manifest"),
        }
    }

    Ok(resources)
}

/// True for non-hidden `.yaml`/`.yml` files below `root`.
fn is_manifest_file(root: &Path, path: &Path) -> bool {
    if let Ok(relative) = path.strip_prefix(root) {
        let hidden = relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|s| s.starts_with('.'))
                .unwrap_or(false)
        });
        if hidden {
            return false;
        }
    }

    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(name: &str, value: &str) -> String {
        format!(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: monitoring\n  annotations:\n    prometheus.net/id: \"0\"\n    prometheus.net/job: \"true\"\ndata:\n  job.yml: \"{value}\"\n"
        )
    }

    #[test]
    fn test_initial_scan_creates_every_resource() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.yaml"), manifest("b", "x")).unwrap();
        fs::write(dir.path().join("a.yml"), manifest("a", "x")).unwrap();

        let mut source = ManifestSource::new(dir.path());
        let events = source.rescan().unwrap();

        let names: Vec<_> = events.iter().map(|e| e.key().name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(events.iter().all(|e| matches!(e, ResourceEvent::Created(_))));
    }

    #[test]
    fn test_rescan_diffs_against_known_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), manifest("a", "x")).unwrap();
        fs::write(dir.path().join("b.yaml"), manifest("b", "x")).unwrap();

        let mut source = ManifestSource::new(dir.path());
        source.rescan().unwrap();
        assert!(source.rescan().unwrap().is_empty());

        fs::write(dir.path().join("a.yaml"), manifest("a", "y")).unwrap();
        fs::remove_file(dir.path().join("b.yaml")).unwrap();
        fs::write(dir.path().join("c.yaml"), manifest("c", "x")).unwrap();

        let events = source.rescan().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ResourceEvent::Deleted(r) if r.name == "b"));
        assert!(matches!(&events[1], ResourceEvent::Updated { old, new }
            if old.data["job.yml"] == "x" && new.data["job.yml"] == "y"));
        assert!(matches!(&events[2], ResourceEvent::Created(r) if r.name == "c"));
    }

    #[test]
    fn test_multi_document_and_foreign_kinds() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "{}---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: s\n---\n{}",
            manifest("a", "x"),
            manifest("b", "x")
        );
        fs::write(dir.path().join("all.yaml"), content).unwrap();

        let resources = ManifestSource::new(dir.path()).scan().unwrap();
        assert_eq!(resources.len(), 2);
    }

    #[test]
    fn test_hidden_and_duplicate_manifests_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/c.yaml"), manifest("c", "x")).unwrap();
        fs::write(dir.path().join(".hidden.yaml"), manifest("h", "x")).unwrap();
        fs::write(dir.path().join("1.yaml"), manifest("a", "first")).unwrap();
        fs::write(dir.path().join("2.yaml"), manifest("a", "second")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let resources = ManifestSource::new(dir.path()).scan().unwrap();
        assert_eq!(resources.len(), 1);
        let only = resources.values().next().unwrap();
        assert_eq!(only.data["job.yml"], "first");
    }

    #[test]
    fn test_broken_file_keeps_known_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), manifest("a", "x")).unwrap();

        let mut source = ManifestSource::new(dir.path());
        source.rescan().unwrap();

        fs::write(dir.path().join("a.yaml"), "metadata: [unclosed\n").unwrap();
        assert!(matches!(source.rescan(), Err(SourceError::ParseYaml { .. })));
        assert_eq!(source.known().count(), 1);
    }

    #[test]
    fn test_resync_redelivers_known_resources() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), manifest("a", "x")).unwrap();

        let mut source = ManifestSource::new(dir.path());
        source.rescan().unwrap();

        let events = source.resync();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ResourceEvent::Updated { old, new } if old == new));
    }

    #[test]
    fn test_missing_directory() {
        let source = ManifestSource::new("/nonexistent/manifests");
        assert!(matches!(source.scan(), Err(SourceError::ReadDirectory { .. })));
    }
}
