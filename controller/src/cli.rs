use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use promconf::config::{ApplyMode, DEFAULT_ANNOTATION_PREFIX};
use promconf::{resolve_secret_optional, ConfigError, ControllerConfig, InstanceIdentity};

#[derive(Parser, Debug)]
#[command(name = "promconf-controller")]
#[command(version, about = "Prometheus Controller", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Log filter, e.g. `info` or `promconf=debug`. `RUST_LOG` takes precedence.
    #[arg(long, env = "PROMCONF_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "PROMCONF_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// The location to save rule and config files to
    #[arg(long, env = "PROMCONF_CONFIG_PATH")]
    pub config_path: PathBuf,

    /// The template of prometheus.yml
    #[arg(long, env = "PROMCONF_CONFIG_TEMPLATE")]
    pub config_template: PathBuf,

    /// The id of Prometheus
    #[arg(long, env = "PROMCONF_ID", default_value = "0")]
    pub id: String,

    /// The unique key for prometheus config
    #[arg(long, env = "PROMCONF_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Read the key from this file instead
    #[arg(long, env = "PROMCONF_KEY_FILE")]
    pub key_file: Option<String>,

    /// Read the key from this environment variable instead
    #[arg(long, env = "PROMCONF_KEY_ENV")]
    pub key_env: Option<String>,

    /// The url to issue requests to reload Prometheus to
    #[arg(long, env = "PROMCONF_RELOAD_URL")]
    pub reload_url: String,

    /// Seconds to wait between reload attempts while Prometheus refuses connections
    #[arg(long, env = "PROMCONF_RETRY_INTERVAL_SECS", default_value_t = 8)]
    pub retry_interval_secs: u64,

    /// Validate every fragment of a resource before writing any of them
    #[arg(long, env = "PROMCONF_ALL_OR_NOTHING")]
    pub all_or_nothing: bool,

    #[arg(long, env = "PROMCONF_ANNOTATION_PREFIX", default_value = DEFAULT_ANNOTATION_PREFIX)]
    pub annotation_prefix: String,
}

impl ConfigArgs {
    pub fn to_config(&self) -> Result<ControllerConfig, ConfigError> {
        let key = resolve_secret_optional(
            self.key.as_deref(),
            self.key_file.as_deref(),
            self.key_env.as_deref(),
        )?;

        let apply_mode = if self.all_or_nothing {
            ApplyMode::AllOrNothing
        } else {
            ApplyMode::PerFragment
        };

        let config = ControllerConfig::new(
            &self.config_path,
            &self.config_template,
            InstanceIdentity::new(self.id.clone(), key),
            &self.reload_url,
        )?
        .with_retry_interval(Duration::from_secs(self.retry_interval_secs))
        .with_apply_mode(apply_mode)
        .with_annotation_prefix(self.annotation_prefix.clone());

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch a manifest directory and reconcile continuously
    Run {
        /// Directory of ConfigMap manifests
        #[arg(long, env = "PROMCONF_MANIFESTS")]
        manifests: PathBuf,

        /// Re-deliver every manifest this often (seconds, 0 disables)
        #[arg(long, env = "PROMCONF_RESYNC_SECS", default_value_t = 0)]
        resync_secs: u64,
    },

    /// Check manifests against the current store without writing anything
    Validate {
        /// Manifest file, may contain several documents
        manifest: PathBuf,
    },

    /// Reassemble prometheus.yml from the stored template and jobs
    Rebuild {
        /// Reload Prometheus afterwards
        #[arg(long)]
        reload: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
