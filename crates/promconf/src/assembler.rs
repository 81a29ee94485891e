//! Builds the merged configuration from the template and job fragments.

use std::path::PathBuf;

use crate::error::AssemblyError;
use crate::store::ArtifactStore;
use crate::template;

/// A merged configuration that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub document: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConfigAssembler {
    store: ArtifactStore,
}

impl ConfigAssembler {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Renders the template with every stored job and rewrites the merged file.
    ///
    /// Failures are logged here; the caller decides whether to reload. The
    /// file is truncated before it is written, so a reader racing the write
    /// can observe a partial document.
    pub fn rebuild(&self) -> Result<Assembled, AssemblyError> {
        let template = self.store.read_template().map_err(|e| {
            tracing::error!(
                file = %self.store.template_path().display(),
                err = %e,
                "Failed to read template"
            );
            AssemblyError::ReadTemplate(e)
        })?;

        let jobs = self.store.read_jobs().map_err(|e| {
            tracing::error!(err = %e, "Failed to read jobs");
            AssemblyError::ReadJobs(e)
        })?;

        let document = template::render(&template, &jobs).map_err(|e| {
            tracing::error!(err = %e, "Failed to parse template");
            AssemblyError::from(e)
        })?;

        let path = self.store.write_merged(&document).map_err(|e| {
            tracing::error!(err = %e, "Failed to write merged configuration");
            AssemblyError::Write(e)
        })?;

        tracing::debug!(path = %path.display(), bytes = document.len(), "Rebuilt configuration");
        Ok(Assembled { document, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactKind;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), dir.path().join("template.yml"));
        (dir, store)
    }

    #[test]
    fn test_rebuild_in_listing_order() {
        let (_dir, store) = setup();
        store.put_template("scrape_configs:\n{{jobs}}").unwrap();
        store.put(ArtifactKind::Job, "ns", "b", "k", "- job: b").unwrap();
        store.put(ArtifactKind::Job, "ns", "a", "k", "- job: a").unwrap();

        let assembled = ConfigAssembler::new(store.clone()).rebuild().unwrap();

        assert_eq!(assembled.document, "scrape_configs:\n- job: a\n- job: b\n");
        assert_eq!(assembled.path, store.merged_path());
        assert_eq!(
            std::fs::read_to_string(store.merged_path()).unwrap(),
            assembled.document
        );
    }

    #[test]
    fn test_rebuild_truncates_previous_output() {
        let (_dir, store) = setup();
        store.write_merged(&"x".repeat(4096)).unwrap();
        store.put_template("global: {}\n").unwrap();

        ConfigAssembler::new(store.clone()).rebuild().unwrap();
        assert_eq!(
            std::fs::read_to_string(store.merged_path()).unwrap(),
            "global: {}\n"
        );
    }

    #[test]
    fn test_missing_template_is_error_and_writes_nothing() {
        let (_dir, store) = setup();
        let err = ConfigAssembler::new(store.clone()).rebuild().unwrap_err();

        assert!(matches!(err, AssemblyError::ReadTemplate(_)));
        assert!(!store.merged_path().exists());
    }

    #[test]
    fn test_render_error_is_reported() {
        let (_dir, store) = setup();
        store.put_template("scrape_configs:\n{{ .Jobs ").unwrap();

        let err = ConfigAssembler::new(store).rebuild().unwrap_err();
        assert!(matches!(err, AssemblyError::Render(_)));
    }
}
