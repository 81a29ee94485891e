//! Content validation for rule sets, job sets and config templates.
//!
//! Parsing of the two underlying document formats sits behind
//! [`FormatChecker`]; [`ContentValidator`] builds the three validation
//! operations the engine needs on top of it.

pub mod duration;
pub mod rules;
pub mod server;

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::template;

static RE_LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

static RE_METRIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap());

/// Header every rule-group document starts with.
pub const RULE_GROUP_HEADER: &str = "groups:";

/// Wrapper a job fragment is rendered into before it is checked.
pub const JOB_WRAPPER_TEMPLATE: &str = "scrape_configs:\n{{ .Jobs }}";

pub fn is_valid_label_name(name: &str) -> bool {
    RE_LABEL_NAME.is_match(name)
}

pub fn is_valid_metric_name(name: &str) -> bool {
    RE_METRIC_NAME.is_match(name)
}

/// Prepends the rule-group header unless the text already starts with it.
pub fn with_group_header(text: &str) -> String {
    if text.starts_with(RULE_GROUP_HEADER) {
        text.to_string()
    } else {
        format!("{}\n{}", RULE_GROUP_HEADER, text)
    }
}

/// Parser for the rule-group and server configuration formats.
///
/// Each method returns every problem found, one message per entry.
pub trait FormatChecker: Send + Sync {
    fn check_rule_groups(&self, document: &str) -> Result<(), Vec<String>>;

    fn check_server_config(&self, document: &str) -> Result<(), Vec<String>>;
}

/// Checks documents against the Prometheus rule and configuration formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusFormat;

impl FormatChecker for PrometheusFormat {
    fn check_rule_groups(&self, document: &str) -> Result<(), Vec<String>> {
        rules::check_rule_groups(document)
    }

    fn check_server_config(&self, document: &str) -> Result<(), Vec<String>> {
        server::check_server_config(document)
    }
}

#[derive(Clone)]
pub struct ContentValidator {
    checker: Arc<dyn FormatChecker>,
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(Arc::new(PrometheusFormat))
    }
}

impl ContentValidator {
    pub fn new(checker: Arc<dyn FormatChecker>) -> Self {
        Self { checker }
    }

    /// Validates one rule fragment, adding the group header if missing.
    pub fn validate_rule_text(&self, text: &str) -> Result<(), Vec<String>> {
        self.checker.check_rule_groups(&with_group_header(text))
    }

    /// Validates a job fragment appended to the jobs already stored.
    pub fn validate_job_text(&self, text: &str, existing_jobs: &str) -> Result<(), Vec<String>> {
        let jobs = format!("{}{}", existing_jobs, text);
        let document = template::render(JOB_WRAPPER_TEMPLATE, &jobs).map_err(|e| vec![e.to_string()])?;
        self.checker.check_server_config(&document)
    }

    /// Validates `text` as the config template, rendered with the stored jobs.
    pub fn validate_config_template(
        &self,
        text: &str,
        existing_jobs: &str,
    ) -> Result<(), Vec<String>> {
        let document = template::render(text, existing_jobs).map_err(|e| vec![e.to_string()])?;
        self.checker.check_server_config(&document)
    }
}

impl std::fmt::Debug for ContentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_group_header() {
        assert_eq!(with_group_header("groups: []"), "groups: []");
        assert_eq!(with_group_header("- name: a"), "groups:\n- name: a");
    }

    #[test]
    fn test_rule_text_without_header() {
        let validator = ContentValidator::default();
        let text = "- name: node\n  rules:\n  - record: up:sum\n    expr: sum(up)\n";
        assert!(validator.validate_rule_text(text).is_ok());
    }

    #[test]
    fn test_malformed_rule_text() {
        let validator = ContentValidator::default();
        assert!(validator.validate_rule_text("- name: [broken\n").is_err());
        assert!(validator.validate_rule_text("- nme: x\n").is_err());
    }

    #[test]
    fn test_job_text_against_existing_jobs() {
        let validator = ContentValidator::default();
        let existing = "- job_name: node\n  static_configs:\n  - targets: ['n:9100']\n";

        assert!(validator
            .validate_job_text("- job_name: api\n", existing)
            .is_ok());

        let errors = validator
            .validate_job_text("- job_name: node\n", existing)
            .unwrap_err();
        assert!(errors[0].contains("multiple scrape configs"));
    }

    #[test]
    fn test_config_template() {
        let validator = ContentValidator::default();
        let jobs = "- job_name: node\n";

        assert!(validator
            .validate_config_template("global:\n  scrape_interval: 15s\nscrape_configs:\n{{ .Jobs }}", jobs)
            .is_ok());

        let errors = validator
            .validate_config_template("scrape_configs:\n{{ .Missing }}", jobs)
            .unwrap_err();
        assert!(errors[0].contains("unknown action"));

        assert!(validator
            .validate_config_template("scrape_configs: {{ .Jobs }}\nbogus: 1\n", "[]")
            .is_err());
    }

    #[test]
    fn test_name_patterns() {
        assert!(is_valid_label_name("severity"));
        assert!(!is_valid_label_name("team:a"));
        assert!(is_valid_metric_name("job:up:sum"));
        assert!(!is_valid_metric_name("9lives"));
    }
}
