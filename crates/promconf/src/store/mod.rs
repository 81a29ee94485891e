//! Filesystem-backed storage for rule and job fragments and the template.
//!
//! Layout under the config path:
//!
//! ```text
//! {config_path}/rules/{namespace}-{name}-{key}
//! {config_path}/jobs/{namespace}-{name}-{key}
//! {config_path}/prometheus.yml          merged configuration
//! {config_template}                     template, single fixed path
//! ```
//!
//! The directory contents are the source of truth for what is configured;
//! nothing is cached in memory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{ControllerConfig, MERGED_CONFIG_FILE};
use crate::error::StorageError;
use crate::resource::Resource;

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(unix)]
const DIRECTORY_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Category-specific fragment storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Rule,
    Job,
}

impl ArtifactKind {
    pub fn directory(&self) -> &'static str {
        match self {
            ArtifactKind::Rule => "rules",
            ArtifactKind::Job => "jobs",
        }
    }

    /// Rule removals stop at the first failure; job removals carry on.
    pub fn delete_policy(&self) -> DeletePolicy {
        match self {
            ArtifactKind::Rule => DeletePolicy::AbortOnError,
            ArtifactKind::Job => DeletePolicy::ContinueOnError,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Rule => write!(f, "rule"),
            ArtifactKind::Job => write!(f, "job"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    AbortOnError,
    ContinueOnError,
}

/// Outcome of removing every fragment of one resource.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<StorageError>,
    /// True when the batch stopped early under [`DeletePolicy::AbortOnError`].
    pub aborted: bool,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config_path: PathBuf,
    template_path: PathBuf,
}

impl ArtifactStore {
    pub fn new(config_path: impl Into<PathBuf>, template_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            template_path: template_path.into(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(&config.config_path, &config.config_template)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn merged_path(&self) -> PathBuf {
        self.config_path.join(MERGED_CONFIG_FILE)
    }

    pub fn directory(&self, kind: ArtifactKind) -> PathBuf {
        self.config_path.join(kind.directory())
    }

    /// Deterministic path of one fragment: `{dir}/{namespace}-{name}-{key}`.
    pub fn artifact_path(
        &self,
        kind: ArtifactKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<PathBuf> {
        for component in [namespace, name, key] {
            check_component(component)?;
        }
        Ok(self
            .directory(kind)
            .join(format!("{}-{}-{}", namespace, name, key)))
    }

    /// Writes one fragment, creating the category directory on first use.
    /// An existing artifact with the same identity is overwritten.
    pub fn put(
        &self,
        kind: ArtifactKind,
        namespace: &str,
        name: &str,
        key: &str,
        content: &str,
    ) -> Result<PathBuf> {
        let path = self.artifact_path(kind, namespace, name, key)?;
        ensure_directory(&self.directory(kind))?;
        write_file(&path, content)?;
        Ok(path)
    }

    /// Removes one fragment. A missing file is reported as an error.
    pub fn delete(
        &self,
        kind: ArtifactKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<PathBuf> {
        let path = self.artifact_path(kind, namespace, name, key)?;
        fs::remove_file(&path).map_err(|e| StorageError::RemoveFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Removes every fragment of `resource`, following the kind's
    /// [`DeletePolicy`].
    pub fn delete_fragments(&self, kind: ArtifactKind, resource: &Resource) -> DeleteReport {
        let mut report = DeleteReport::default();

        for key in resource.data.keys() {
            match self.delete(kind, &resource.namespace, &resource.name, key) {
                Ok(path) => report.removed.push(path),
                Err(e) => {
                    report.errors.push(e);
                    if kind.delete_policy() == DeletePolicy::AbortOnError {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        report
    }

    pub fn put_template(&self, content: &str) -> Result<PathBuf> {
        if let Some(parent) = self.template_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }
        write_file(&self.template_path, content)?;
        Ok(self.template_path.clone())
    }

    pub fn read_template(&self) -> Result<String> {
        fs::read_to_string(&self.template_path).map_err(|e| StorageError::ReadFile {
            path: self.template_path.clone(),
            source: e,
        })
    }

    /// All job artifacts in filesystem listing order (sorted by file name).
    pub fn list_job_fragments(&self) -> Result<Vec<PathBuf>> {
        let directory = self.directory(ArtifactKind::Job);
        let pattern = format!(
            "{}/*",
            glob::Pattern::escape(&directory.to_string_lossy())
        );

        let paths = glob::glob(&pattern).map_err(|e| StorageError::ListFiles {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;

        let mut fragments = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => fragments.push(path),
                Ok(_) => {}
                Err(e) => tracing::error!(
                    path = %e.path().display(),
                    err = %e.error(),
                    "Failed to read job"
                ),
            }
        }
        Ok(fragments)
    }

    /// Concatenates every job artifact, each followed by a newline.
    /// Unreadable fragments are logged and skipped.
    pub fn read_jobs(&self) -> Result<String> {
        self.read_jobs_excluding(&[])
    }

    /// Like [`read_jobs`](Self::read_jobs), leaving out the given paths.
    /// Used to validate a fragment against everything except the file it
    /// is about to replace.
    pub fn read_jobs_excluding(&self, excluded: &[PathBuf]) -> Result<String> {
        let mut jobs = String::new();
        for path in self.list_job_fragments()? {
            if excluded.contains(&path) {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(job) => {
                    jobs.push_str(&job);
                    jobs.push('\n');
                }
                Err(e) => tracing::error!(
                    job = %path.display(),
                    err = %e,
                    "Failed to read job"
                ),
            }
        }
        Ok(jobs)
    }

    /// Truncates and rewrites the merged configuration in place.
    pub fn write_merged(&self, content: &str) -> Result<PathBuf> {
        let path = self.merged_path();
        ensure_directory(&self.config_path)?;
        write_file(&path, content)?;
        Ok(path)
    }
}

fn check_component(component: &str) -> Result<()> {
    let invalid = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidFragmentKey {
            key: component.to_string(),
        });
    }
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIRECTORY_MODE);
    }

    builder
        .create(path)
        .map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    let to_error = |e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = options.open(path).map_err(to_error)?;
    file.write_all(content.as_bytes()).map_err(to_error)
}
