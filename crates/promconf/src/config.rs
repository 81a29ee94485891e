//! Runtime configuration of one controller instance.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Annotation prefix used by resources that target this controller.
pub const DEFAULT_ANNOTATION_PREFIX: &str = "prometheus.net/";

/// Wait between reload attempts while the server refuses connections.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(8);

/// File name of the merged configuration inside the config path.
pub const MERGED_CONFIG_FILE: &str = "prometheus.yml";

/// How the fragments of a multi-key resource are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Validate and write each fragment in turn. A later invalid fragment
    /// aborts the event but earlier fragments stay on disk.
    #[default]
    PerFragment,
    /// Validate every fragment before the first write and undo this event's
    /// writes if one of them fails.
    AllOrNothing,
}

/// The (id, key) pair identifying the server deployment resources target.
#[derive(Debug, Clone)]
pub struct InstanceIdentity {
    pub id: String,
    pub key: Option<SecretString>,
}

impl InstanceIdentity {
    pub fn new(id: impl Into<String>, key: Option<SecretString>) -> Self {
        Self { id: id.into(), key }
    }

    /// An empty annotation id never matches, even against an empty instance id.
    pub fn owns(&self, id: &str) -> bool {
        !id.is_empty() && id == self.id
    }

    /// Without a configured key no template is ever accepted.
    pub fn key_matches(&self, key: Option<&str>) -> bool {
        match (&self.key, key) {
            (Some(expected), Some(given)) => expected.expose_secret() == given,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base directory holding `rules/`, `jobs/` and the merged configuration.
    pub config_path: PathBuf,
    /// Location of the config template artifact.
    pub config_template: PathBuf,
    pub instance: InstanceIdentity,
    pub reload_url: Url,
    pub retry_interval: Duration,
    pub apply_mode: ApplyMode,
    pub annotation_prefix: String,
}

impl ControllerConfig {
    pub fn new(
        config_path: impl Into<PathBuf>,
        config_template: impl Into<PathBuf>,
        instance: InstanceIdentity,
        reload_url: &str,
    ) -> Result<Self, ConfigError> {
        let reload_url = Url::parse(reload_url).map_err(|e| ConfigError::InvalidValue {
            option: "reload-url",
            reason: format!("'{}': {}", reload_url, e),
        })?;

        let config = Self {
            config_path: config_path.into(),
            config_template: config_template.into(),
            instance,
            reload_url,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            apply_mode: ApplyMode::default(),
            annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_apply_mode(mut self, mode: ApplyMode) -> Self {
        self.apply_mode = mode;
        self
    }

    pub fn with_annotation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.annotation_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("config-path"));
        }
        if self.config_template.as_os_str().is_empty() {
            return Err(ConfigError::Missing("config-template"));
        }
        if self.instance.id.is_empty() {
            return Err(ConfigError::Missing("id"));
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                option: "retry-interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !matches!(self.reload_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                option: "reload-url",
                reason: format!("unsupported scheme '{}'", self.reload_url.scheme()),
            });
        }
        Ok(())
    }

    pub fn merged_config_path(&self) -> PathBuf {
        self.config_path.join(MERGED_CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> InstanceIdentity {
        InstanceIdentity::new("0", Some(SecretString::from("secret".to_string())))
    }

    #[test]
    fn test_new_applies_defaults() {
        let config = ControllerConfig::new(
            "/etc/prometheus",
            "/etc/prometheus/template.yml",
            identity(),
            "http://localhost:9090/-/reload",
        )
        .unwrap();

        assert_eq!(config.retry_interval, Duration::from_secs(8));
        assert_eq!(config.apply_mode, ApplyMode::PerFragment);
        assert_eq!(config.annotation_prefix, "prometheus.net/");
        assert_eq!(
            config.merged_config_path(),
            PathBuf::from("/etc/prometheus/prometheus.yml")
        );
    }

    #[test]
    fn test_rejects_bad_reload_url() {
        let err = ControllerConfig::new("/c", "/c/t.yml", identity(), "localhost:9090").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { option: "reload-url", .. }));

        let err = ControllerConfig::new("/c", "/c/t.yml", identity(), "not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { option: "reload-url", .. }));
    }

    #[test]
    fn test_rejects_empty_id() {
        let err = ControllerConfig::new(
            "/c",
            "/c/t.yml",
            InstanceIdentity::new("", None),
            "http://localhost:9090/-/reload",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("id")));
    }

    #[test]
    fn test_rejects_zero_retry_interval() {
        let config = ControllerConfig::new("/c", "/c/t.yml", identity(), "http://p:9090/-/reload")
            .unwrap()
            .with_retry_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ownership_and_key_matching() {
        let instance = identity();
        assert!(instance.owns("0"));
        assert!(!instance.owns("1"));
        assert!(!instance.owns(""));

        assert!(instance.key_matches(Some("secret")));
        assert!(!instance.key_matches(Some("other")));
        assert!(!instance.key_matches(None));

        let keyless = InstanceIdentity::new("0", None);
        assert!(!keyless.key_matches(Some("")));
        assert!(!keyless.key_matches(None));
    }
}
