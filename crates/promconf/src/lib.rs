pub mod assembler;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod reload;
pub mod resource;
pub mod secrets;
pub mod source;
pub mod store;
pub mod template;
pub mod validation;

pub use assembler::{Assembled, ConfigAssembler};
pub use config::{ApplyMode, ControllerConfig, InstanceIdentity};
pub use controller::{Controller, RunSummary};
pub use engine::{Engine, EventOutcome, IgnoreReason, Inspection, ReloadStatus};
pub use error::{
    AssemblyError, ConfigError, ControllerError, ReloadError, Result, SourceError, StorageError,
};
pub use reload::{ReloadClient, ReloadReport, Reloader};
pub use resource::{Category, Resource, ResourceKey};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use source::{ManifestSource, ResourceEvent, SourceWatcher};
pub use store::{ArtifactKind, ArtifactStore};
pub use validation::{ContentValidator, FormatChecker, PrometheusFormat};
