//! The annotation contract and category classification.

use serde::Serialize;
use std::collections::BTreeMap;

/// Recognized annotation keys, relative to the configured prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKey {
    Id,
    Rule,
    Job,
    Config,
    Key,
}

impl AnnotationKey {
    pub fn suffix(&self) -> &'static str {
        match self {
            AnnotationKey::Id => "id",
            AnnotationKey::Rule => "rule",
            AnnotationKey::Job => "job",
            AnnotationKey::Config => "config",
            AnnotationKey::Key => "key",
        }
    }

    /// Full annotation name, e.g. `prometheus.net/rule`.
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.suffix())
    }
}

/// Parses a boolean annotation the way Go's `strconv.ParseBool` does.
/// Anything else, including an absent value, is false.
pub fn parse_bool(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "t" | "T" | "TRUE" | "true" | "True"))
}

/// Annotation values read off one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    /// Target instance; empty when absent.
    pub id: String,
    pub rule: bool,
    pub job: bool,
    pub config: bool,
    pub key: Option<String>,
}

impl Annotations {
    pub fn read(annotations: &BTreeMap<String, String>, prefix: &str) -> Self {
        let get = |key: AnnotationKey| {
            annotations
                .get(&key.with_prefix(prefix))
                .map(String::as_str)
        };

        Self {
            id: get(AnnotationKey::Id).unwrap_or_default().to_string(),
            rule: parse_bool(get(AnnotationKey::Rule)),
            job: parse_bool(get(AnnotationKey::Job)),
            config: parse_bool(get(AnnotationKey::Config)),
            key: get(AnnotationKey::Key).map(str::to_string),
        }
    }

    /// Classification for create and update events: rule > job > config.
    pub fn category(&self) -> Category {
        if self.rule {
            Category::RuleSet
        } else if self.job {
            Category::JobSet
        } else if self.config {
            Category::ConfigTemplate
        } else {
            Category::Unrecognized
        }
    }

    /// Classification for delete events. The template is never removed, so
    /// the config flag is not considered.
    pub fn delete_category(&self) -> Category {
        match self.category() {
            Category::ConfigTemplate => Category::Unrecognized,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    RuleSet,
    JobSet,
    ConfigTemplate,
    Unrecognized,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::RuleSet => write!(f, "rule"),
            Category::JobSet => write!(f, "job"),
            Category::ConfigTemplate => write!(f, "config"),
            Category::Unrecognized => write!(f, "unknown"),
        }
    }
}
