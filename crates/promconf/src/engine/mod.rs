//! Reconciliation engine: turns resource events into artifacts on disk, a
//! rebuilt merged configuration and a reload.
//!
//! Every entry point holds the engine lock for its whole duration, reload
//! included, so two events never interleave on the store.

mod fragments;
mod outcome;

use std::sync::Arc;
use tokio::sync::Mutex;

pub use outcome::{EventOutcome, IgnoreReason, Inspection, ReloadStatus};

use crate::assembler::{Assembled, ConfigAssembler};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::reload::{ReloadReport, Reloader};
use crate::resource::{Category, Resource};
use crate::store::{ArtifactKind, ArtifactStore};
use crate::validation::ContentValidator;

/// What the category-specific part of an update changed.
#[derive(Debug, Default)]
struct Effect {
    changed: bool,
    rebuild: bool,
    rolled_back: Option<Vec<String>>,
}

/// Applies resource events for one server instance.
///
/// Callers deliver events for a resource in the order they happened; the
/// engine serializes them but does not reorder them.
pub struct Engine {
    config: ControllerConfig,
    store: ArtifactStore,
    assembler: ConfigAssembler,
    validator: ContentValidator,
    reloader: Arc<dyn Reloader>,
    event_lock: Mutex<()>,
}

impl Engine {
    /// Creates an engine over the store described by `config`, using the
    /// Prometheus format checks.
    pub fn new(config: ControllerConfig, reloader: Arc<dyn Reloader>) -> Self {
        let store = ArtifactStore::from_config(&config);
        Self {
            assembler: ConfigAssembler::new(store.clone()),
            store,
            config,
            validator: ContentValidator::default(),
            reloader,
            event_lock: Mutex::new(()),
        }
    }

    /// Replaces the content validator, mostly for tests.
    pub fn with_validator(mut self, validator: ContentValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Handles a newly observed resource.
    ///
    /// Resources owned by another instance or without a recognized category
    /// are ignored. Otherwise the fragments are validated and stored, the
    /// merged configuration is rebuilt for jobs and templates, and the server
    /// is reloaded. Events for one resource must arrive in order.
    pub async fn on_create(&self, resource: &Resource) -> EventOutcome {
        let _guard = self.event_lock.lock().await;

        let annotations = resource.annotations(&self.config.annotation_prefix);
        if !self.config.instance.owns(&annotations.id) {
            tracing::debug!(
                namespace = %resource.namespace,
                name = %resource.name,
                id = %annotations.id,
                "Skipping configmap: not owned"
            );
            return EventOutcome::Ignored(IgnoreReason::NotOwned);
        }

        let category = annotations.category();
        let applied = match category {
            Category::RuleSet => self
                .apply_fragments(ArtifactKind::Rule, resource)
                .map(|()| false),
            Category::JobSet => self
                .apply_fragments(ArtifactKind::Job, resource)
                .map(|()| true),
            Category::ConfigTemplate => self
                .apply_template(resource, &annotations)
                .map(|()| true),
            Category::Unrecognized => return unknown(resource),
        };

        match applied {
            Ok(rebuild) => self.commit(resource, category, rebuild, None).await,
            Err(e) => reject(resource, e),
        }
    }

    /// Handles a change from `old` to `new`.
    ///
    /// Resync deliveries with identical content are ignored. The new
    /// category's artifacts replace the old ones only after they validate;
    /// an invalid job set keeps the old jobs and yields
    /// [`EventOutcome::RolledBack`]. Artifacts of a category the resource no
    /// longer carries are removed. Events for one resource must arrive in
    /// order.
    pub async fn on_update(&self, old: &Resource, new: &Resource) -> EventOutcome {
        let _guard = self.event_lock.lock().await;

        let prefix = &self.config.annotation_prefix;
        let old_annotations = old.annotations(prefix);
        let new_annotations = new.annotations(prefix);

        if old_annotations.id == new_annotations.id && old.is_semantically_identical(new) {
            tracing::debug!(
                namespace = %new.namespace,
                name = %new.name,
                "Skipping automatically updated configmap"
            );
            return EventOutcome::Ignored(IgnoreReason::Unchanged);
        }

        let old_owned = self.config.instance.owns(&old_annotations.id);
        let new_owned = self.config.instance.owns(&new_annotations.id);
        if !old_owned && !new_owned {
            tracing::debug!(
                namespace = %new.namespace,
                name = %new.name,
                id = %new_annotations.id,
                "Skipping configmap: not owned"
            );
            return EventOutcome::Ignored(IgnoreReason::NotOwned);
        }

        let old_category = old_annotations.category();
        let new_category = new_annotations.category();

        let mut effect = match new_category {
            Category::RuleSet => self.update_rules(
                old,
                new,
                old_owned && old_category == Category::RuleSet,
                new_owned,
            ),
            Category::JobSet => self.update_jobs(
                old,
                new,
                old_owned && old_category == Category::JobSet,
                new_owned,
            ),
            Category::ConfigTemplate if new_owned => self
                .apply_template(new, &new_annotations)
                .map(|()| Effect {
                    changed: true,
                    rebuild: true,
                    rolled_back: None,
                }),
            Category::ConfigTemplate | Category::Unrecognized => Ok(Effect::default()),
        };

        // Category loss: the old artifacts have no counterpart any more.
        if let Ok(effect) = effect.as_mut() {
            if old_owned && old_category != new_category {
                match old_category {
                    Category::RuleSet => {
                        self.remove_fragments(ArtifactKind::Rule, old);
                        effect.changed = true;
                    }
                    Category::JobSet => {
                        self.remove_fragments(ArtifactKind::Job, old);
                        effect.changed = true;
                        effect.rebuild = true;
                    }
                    Category::ConfigTemplate | Category::Unrecognized => {}
                }
            }
        }

        match effect {
            Ok(effect) if !effect.changed => {
                if new_category == Category::Unrecognized {
                    unknown(new)
                } else {
                    EventOutcome::Ignored(IgnoreReason::NotOwned)
                }
            }
            Ok(effect) => {
                self.commit(new, new_category, effect.rebuild, effect.rolled_back)
                    .await
            }
            Err(e) => reject(new, e),
        }
    }

    /// Handles a removed resource by deleting its rule or job artifacts and
    /// reloading. Templates are left in place. Events for one resource must
    /// arrive in order.
    pub async fn on_delete(&self, resource: &Resource) -> EventOutcome {
        let _guard = self.event_lock.lock().await;

        let annotations = resource.annotations(&self.config.annotation_prefix);
        if !self.config.instance.owns(&annotations.id) {
            tracing::debug!(
                namespace = %resource.namespace,
                name = %resource.name,
                id = %annotations.id,
                "Skipping configmap: not owned"
            );
            return EventOutcome::Ignored(IgnoreReason::NotOwned);
        }

        let category = annotations.delete_category();
        match category {
            Category::RuleSet => {
                self.remove_fragments(ArtifactKind::Rule, resource);
                self.commit(resource, category, false, None).await
            }
            Category::JobSet => {
                self.remove_fragments(ArtifactKind::Job, resource);
                self.commit(resource, category, true, None).await
            }
            Category::ConfigTemplate | Category::Unrecognized => unknown(resource),
        }
    }

    /// Reassembles the merged configuration from the store and optionally
    /// reloads the server. Returns the reload report when one was sent.
    pub async fn rebuild(&self, reload: bool) -> Result<(Assembled, Option<ReloadReport>)> {
        let _guard = self.event_lock.lock().await;

        let assembled = self.assembler.rebuild()?;
        if !reload {
            return Ok((assembled, None));
        }

        let report = self.reloader.reload().await?;
        tracing::info!(attempts = report.attempts, "Succeeded: Reloaded Prometheus");
        Ok((assembled, Some(report)))
    }

    /// Classifies and validates `resource` against the current store without
    /// writing anything.
    pub fn inspect(&self, resource: &Resource) -> Inspection {
        let annotations = resource.annotations(&self.config.annotation_prefix);
        let category = annotations.category();
        let owned = self.config.instance.owns(&annotations.id);

        let checked = match category {
            Category::RuleSet => self.prepare_all(ArtifactKind::Rule, resource).map(drop),
            Category::JobSet => self.prepare_all(ArtifactKind::Job, resource).map(drop),
            Category::ConfigTemplate => self.check_template(resource, &annotations).map(drop),
            Category::Unrecognized => Err(ControllerError::UnknownCategory),
        };

        let diagnostics = match checked {
            Ok(()) => Vec::new(),
            Err(ControllerError::InvalidPayload { diagnostics }) => diagnostics,
            Err(e) => vec![e.to_string()],
        };

        Inspection {
            resource: resource.key(),
            category,
            owned,
            valid: diagnostics.is_empty(),
            diagnostics,
        }
    }

    fn update_rules(
        &self,
        old: &Resource,
        new: &Resource,
        remove_old: bool,
        add_new: bool,
    ) -> Result<Effect> {
        if !remove_old && !add_new {
            return Ok(Effect::default());
        }

        // Nothing is removed unless the replacement is valid.
        self.prepare_all(ArtifactKind::Rule, new)?;

        if remove_old {
            self.remove_fragments(ArtifactKind::Rule, old);
        }
        if add_new {
            self.apply_fragments(ArtifactKind::Rule, new)?;
        }

        Ok(Effect {
            changed: true,
            rebuild: false,
            rolled_back: None,
        })
    }

    fn update_jobs(
        &self,
        old: &Resource,
        new: &Resource,
        remove_old: bool,
        add_new: bool,
    ) -> Result<Effect> {
        if !remove_old && !add_new {
            return Ok(Effect::default());
        }

        let mut effect = Effect {
            changed: true,
            rebuild: true,
            rolled_back: None,
        };

        if !add_new {
            self.remove_fragments(ArtifactKind::Job, old);
            return Ok(effect);
        }

        // The new job set is checked as a whole, without the old fragments,
        // before anything on disk changes.
        let replaced = if remove_old {
            self.fragment_paths(ArtifactKind::Job, old)?
        } else {
            Vec::new()
        };
        let prepared = match self.prepare_replacing(ArtifactKind::Job, new, &replaced) {
            Ok(prepared) => prepared,
            Err(ControllerError::InvalidPayload { diagnostics }) => {
                tracing::warn!(
                    namespace = %new.namespace,
                    name = %new.name,
                    "The new job is not valid. Keeping the old one."
                );
                effect.rolled_back = Some(diagnostics);
                return Ok(effect);
            }
            Err(e) => return Err(e),
        };

        if remove_old {
            self.remove_fragments(ArtifactKind::Job, old);
        }
        if let Err(e) = self.write_all(ArtifactKind::Job, new, prepared) {
            if remove_old {
                if let Err(e) = self.write_fragments(ArtifactKind::Job, old) {
                    tracing::error!(
                        namespace = %old.namespace,
                        name = %old.name,
                        err = %e,
                        "Failed to recover the old job"
                    );
                }
            }
            return Err(e);
        }

        Ok(effect)
    }

    /// Rebuilds when required, then reloads.
    async fn commit(
        &self,
        resource: &Resource,
        category: Category,
        rebuild: bool,
        rolled_back: Option<Vec<String>>,
    ) -> EventOutcome {
        if rebuild {
            if let Err(e) = self.assembler.rebuild() {
                return reject(resource, ControllerError::from(e));
            }
        }

        let reload = match self.reloader.reload().await {
            Ok(report) => {
                tracing::info!(
                    namespace = %resource.namespace,
                    name = %resource.name,
                    attempts = report.attempts,
                    "Succeeded: Reloaded Prometheus"
                );
                ReloadStatus::Reloaded(report)
            }
            Err(e) => {
                tracing::error!(
                    namespace = %resource.namespace,
                    name = %resource.name,
                    err = %e,
                    "Failed to reload prometheus.yml"
                );
                ReloadStatus::Failed(e)
            }
        };

        match rolled_back {
            Some(diagnostics) => EventOutcome::RolledBack {
                diagnostics,
                reload,
            },
            None => EventOutcome::Applied { category, reload },
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn unknown(resource: &Resource) -> EventOutcome {
    tracing::debug!(
        namespace = %resource.namespace,
        name = %resource.name,
        "Skipping configmap: unknown config type"
    );
    EventOutcome::Ignored(IgnoreReason::UnknownCategory)
}

fn reject(resource: &Resource, err: ControllerError) -> EventOutcome {
    tracing::error!(
        namespace = %resource.namespace,
        name = %resource.name,
        err = %err,
        "Failed to create"
    );
    EventOutcome::Rejected(err)
}
