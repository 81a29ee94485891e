//! Fragment-level steps shared by the event handlers.

use std::fs;
use std::path::PathBuf;

use super::Engine;
use crate::config::ApplyMode;
use crate::error::{ControllerError, Result};
use crate::resource::{Annotations, Resource};
use crate::store::{ArtifactKind, DeleteReport};
use crate::validation::with_group_header;

/// A fragment that passed validation and is ready to be written.
pub(super) struct Prepared<'a> {
    pub key: &'a str,
    pub content: String,
}

/// A file written during one event and what it held before.
struct Written {
    path: PathBuf,
    previous: Option<String>,
}

/// Stored form of a fragment. Rule fragments always carry the group header.
fn stored_content(kind: ArtifactKind, value: &str) -> String {
    match kind {
        ArtifactKind::Rule => with_group_header(value),
        ArtifactKind::Job => value.to_string(),
    }
}

impl Engine {
    /// Validates and stores every fragment of `resource` following the
    /// configured [`ApplyMode`].
    pub(super) fn apply_fragments(&self, kind: ArtifactKind, resource: &Resource) -> Result<()> {
        match self.config.apply_mode {
            ApplyMode::PerFragment => {
                for (key, value) in &resource.data {
                    let content = stored_content(kind, value);
                    let target =
                        self.store
                            .artifact_path(kind, &resource.namespace, &resource.name, key)?;
                    self.check_fragment(kind, resource, key, &content, &[target], "")?;
                    self.put_fragment(kind, resource, key, &content)?;
                }
                Ok(())
            }
            ApplyMode::AllOrNothing => {
                let prepared = self.prepare_all(kind, resource)?;
                self.write_all(kind, resource, prepared)
            }
        }
    }

    /// Validates every fragment before anything is written.
    pub(super) fn prepare_all<'a>(
        &self,
        kind: ArtifactKind,
        resource: &'a Resource,
    ) -> Result<Vec<Prepared<'a>>> {
        self.prepare_replacing(kind, resource, &[])
    }

    /// Validates every fragment of `resource` as if the `replaced` artifacts
    /// were already gone.
    ///
    /// Job fragments are checked against the stored jobs minus `replaced` and
    /// the files this resource is about to overwrite, plus the fragments of
    /// this resource that were already accepted. All diagnostics are
    /// collected.
    pub(super) fn prepare_replacing<'a>(
        &self,
        kind: ArtifactKind,
        resource: &'a Resource,
        replaced: &[PathBuf],
    ) -> Result<Vec<Prepared<'a>>> {
        let mut targets = self.fragment_paths(kind, resource)?;
        targets.extend_from_slice(replaced);

        let mut prepared = Vec::with_capacity(resource.data.len());
        let mut accepted_jobs = String::new();
        let mut diagnostics = Vec::new();

        for (key, value) in &resource.data {
            let content = stored_content(kind, value);
            match self.check_fragment(kind, resource, key, &content, &targets, &accepted_jobs) {
                Ok(()) => {
                    if kind == ArtifactKind::Job {
                        accepted_jobs.push_str(&content);
                        accepted_jobs.push('\n');
                    }
                    prepared.push(Prepared {
                        key: key.as_str(),
                        content,
                    });
                }
                Err(ControllerError::InvalidPayload { diagnostics: found }) => {
                    diagnostics.extend(found)
                }
                Err(e) => return Err(e),
            }
        }

        if diagnostics.is_empty() {
            Ok(prepared)
        } else {
            Err(ControllerError::invalid(diagnostics))
        }
    }

    /// Artifact paths of every fragment of `resource`.
    pub(super) fn fragment_paths(&self, kind: ArtifactKind, resource: &Resource) -> Result<Vec<PathBuf>> {
        resource
            .data
            .keys()
            .map(|key| {
                self.store
                    .artifact_path(kind, &resource.namespace, &resource.name, key)
                    .map_err(ControllerError::from)
            })
            .collect()
    }

    /// Writes prepared fragments, restoring this event's writes if one fails.
    pub(super) fn write_all(
        &self,
        kind: ArtifactKind,
        resource: &Resource,
        prepared: Vec<Prepared<'_>>,
    ) -> Result<()> {
        let mut written: Vec<Written> = Vec::with_capacity(prepared.len());

        for fragment in prepared {
            let path = self.store.artifact_path(
                kind,
                &resource.namespace,
                &resource.name,
                fragment.key,
            )?;
            let previous = fs::read_to_string(&path).ok();

            if let Err(e) = self.put_fragment(kind, resource, fragment.key, &fragment.content) {
                undo(written);
                return Err(e);
            }
            written.push(Written { path, previous });
        }
        Ok(())
    }

    /// Stores every fragment of `resource` without validating it.
    pub(super) fn write_fragments(&self, kind: ArtifactKind, resource: &Resource) -> Result<()> {
        for (key, value) in &resource.data {
            self.put_fragment(kind, resource, key, &stored_content(kind, value))?;
        }
        Ok(())
    }

    /// Removes every fragment of `resource` and logs the result.
    pub(super) fn remove_fragments(&self, kind: ArtifactKind, resource: &Resource) -> DeleteReport {
        let report = self.store.delete_fragments(kind, resource);

        for path in &report.removed {
            tracing::info!(
                namespace = %resource.namespace,
                name = %resource.name,
                path = %path.display(),
                "Deleting {}",
                kind
            );
        }
        for e in &report.errors {
            tracing::error!(
                namespace = %resource.namespace,
                name = %resource.name,
                err = %e,
                "Failed to delete {}s",
                kind
            );
        }
        if report.aborted {
            tracing::warn!(
                namespace = %resource.namespace,
                name = %resource.name,
                "Stopped deleting {}s after the first failure",
                kind
            );
        }

        report
    }

    /// Key check and validation of a config template. Returns the single
    /// data entry on success.
    pub(super) fn check_template<'a>(
        &self,
        resource: &'a Resource,
        annotations: &Annotations,
    ) -> Result<(&'a str, &'a str)> {
        if !self.config.instance.key_matches(annotations.key.as_deref()) {
            return Err(ControllerError::Unauthorized);
        }

        let mut entries = resource.data.iter();
        let (key, text) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(ControllerError::invalid(vec![format!(
                    "config template must contain exactly one data key, found {}",
                    resource.data.len()
                )]))
            }
        };

        let jobs = self.store.read_jobs()?;
        self.validator
            .validate_config_template(text, &jobs)
            .map_err(|diagnostics| {
                log_diagnostics(resource, "Config", key, &diagnostics);
                ControllerError::invalid(prefixed(key, diagnostics))
            })?;

        Ok((key.as_str(), text.as_str()))
    }

    /// Validates and overwrites the template artifact.
    pub(super) fn apply_template(&self, resource: &Resource, annotations: &Annotations) -> Result<()> {
        let (key, text) = self.check_template(resource, annotations)?;

        tracing::info!(
            namespace = %resource.namespace,
            name = %resource.name,
            "Creating config: {}",
            key
        );
        self.store.put_template(text).map_err(|e| {
            tracing::error!(
                namespace = %resource.namespace,
                name = %resource.name,
                err = %e,
                "Failed to create config"
            );
            ControllerError::from(e)
        })?;
        Ok(())
    }

    fn check_fragment(
        &self,
        kind: ArtifactKind,
        resource: &Resource,
        key: &str,
        content: &str,
        excluded: &[PathBuf],
        accepted_jobs: &str,
    ) -> Result<()> {
        let checked = match kind {
            ArtifactKind::Rule => self.validator.validate_rule_text(content),
            ArtifactKind::Job => {
                let mut existing = self.store.read_jobs_excluding(excluded)?;
                existing.push_str(accepted_jobs);
                self.validator.validate_job_text(content, &existing)
            }
        };

        checked.map_err(|diagnostics| {
            let label = match kind {
                ArtifactKind::Rule => "rule",
                ArtifactKind::Job => "job",
            };
            log_diagnostics(resource, label, key, &diagnostics);
            ControllerError::invalid(prefixed(key, diagnostics))
        })
    }

    fn put_fragment(
        &self,
        kind: ArtifactKind,
        resource: &Resource,
        key: &str,
        content: &str,
    ) -> Result<PathBuf> {
        tracing::info!(
            namespace = %resource.namespace,
            name = %resource.name,
            "Creating {}: {}",
            kind,
            key
        );
        self.store
            .put(kind, &resource.namespace, &resource.name, key, content)
            .map_err(|e| {
                tracing::error!(
                    namespace = %resource.namespace,
                    name = %resource.name,
                    err = %e,
                    "Failed to create {}s",
                    kind
                );
                ControllerError::from(e)
            })
    }
}

fn undo(written: Vec<Written>) {
    for entry in written.into_iter().rev() {
        let restored = match &entry.previous {
            Some(content) => fs::write(&entry.path, content),
            None => fs::remove_file(&entry.path),
        };
        if let Err(e) = restored {
            tracing::error!(path = %entry.path.display(), err = %e, "Failed to undo write");
        }
    }
}

fn log_diagnostics(resource: &Resource, label: &str, key: &str, diagnostics: &[String]) {
    for diagnostic in diagnostics {
        tracing::error!(
            namespace = %resource.namespace,
            name = %resource.name,
            err = %diagnostic,
            "Invalid {}: {}",
            label,
            key
        );
    }
}

fn prefixed(key: &str, diagnostics: Vec<String>) -> Vec<String> {
    diagnostics
        .into_iter()
        .map(|diagnostic| format!("{}: {}", key, diagnostic))
        .collect()
}
