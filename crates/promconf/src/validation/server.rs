//! Server configuration document checks.
//!
//! Only the parts of the document the controller assembles are checked in
//! depth: top-level layout, global scrape timing and every scrape config.
//! Service discovery and remote storage blocks are accepted as-is.

use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::time::Duration;

use super::duration::parse_duration;
use super::is_valid_label_name;

const TOP_LEVEL_FIELDS: &[&str] = &[
    "global",
    "runtime",
    "alerting",
    "rule_files",
    "scrape_config_files",
    "scrape_configs",
    "storage",
    "tracing",
    "remote_write",
    "remote_read",
    "otlp",
];

const RELABEL_ACTIONS: &[&str] = &[
    "replace",
    "keep",
    "drop",
    "keepequal",
    "dropequal",
    "hashmod",
    "labelmap",
    "labeldrop",
    "labelkeep",
    "lowercase",
    "uppercase",
];

const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(60);

/// Collects problems while walking one document.
struct Checker {
    errors: Vec<String>,
}

impl Checker {
    fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn duration(&mut self, owner: &str, map: &Mapping, field: &str) -> Option<Duration> {
        match map.get(field)? {
            Value::String(s) => match parse_duration(s) {
                Ok(d) => Some(d),
                Err(reason) => {
                    self.push(format!("{}: field '{}': {}", owner, field, reason));
                    None
                }
            },
            Value::Number(n) if n.as_u64() == Some(0) => Some(Duration::ZERO),
            other => {
                self.push(format!(
                    "{}: field '{}' must be a duration string, got {}",
                    owner,
                    field,
                    describe(other)
                ));
                None
            }
        }
    }

    fn label_names(&mut self, owner: &str, field: &str, value: Option<&Value>) {
        match value {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(labels)) => {
                for (name, label_value) in labels {
                    match name.as_str() {
                        Some(name) if is_valid_label_name(name) => {}
                        _ => self.push(format!(
                            "{}: {}: {:?} is not a valid label name",
                            owner,
                            field,
                            key_text(name)
                        )),
                    }
                    if !matches!(label_value, Value::String(_)) {
                        self.push(format!(
                            "{}: {}: value of {:?} must be a string",
                            owner,
                            field,
                            key_text(name)
                        ));
                    }
                }
            }
            Some(other) => self.push(format!(
                "{}: field '{}' must be a mapping, got {}",
                owner,
                field,
                describe(other)
            )),
        }
    }
}

/// Checks an assembled server configuration document.
pub fn check_server_config(document: &str) -> Result<(), Vec<String>> {
    let value: Value = serde_yaml::from_str(document).map_err(|e| vec![e.to_string()])?;

    let root = match value {
        Value::Null => return Ok(()),
        Value::Mapping(map) => map,
        other => {
            return Err(vec![format!(
                "configuration must be a mapping, got {}",
                describe(&other)
            )])
        }
    };

    let mut checker = Checker { errors: Vec::new() };

    for key in root.keys() {
        match key.as_str() {
            Some(name) if TOP_LEVEL_FIELDS.contains(&name) => {}
            _ => checker.push(format!(
                "field {} not found in type config.plain",
                key_text(key)
            )),
        }
    }

    let global_interval = check_global(&mut checker, root.get("global"));

    check_string_list(&mut checker, &root, "rule_files");
    check_string_list(&mut checker, &root, "scrape_config_files");

    match root.get("scrape_configs") {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(configs)) => {
            let mut job_names = HashSet::new();
            for (index, config) in configs.iter().enumerate() {
                check_scrape_config(
                    &mut checker,
                    index,
                    config,
                    &mut job_names,
                    global_interval,
                );
            }
        }
        Some(other) => checker.push(format!(
            "field 'scrape_configs' must be a list, got {}",
            describe(other)
        )),
    }

    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(checker.errors)
    }
}

fn check_global(checker: &mut Checker, global: Option<&Value>) -> Duration {
    let map = match global {
        None | Some(Value::Null) => return DEFAULT_SCRAPE_INTERVAL,
        Some(Value::Mapping(map)) => map,
        Some(other) => {
            checker.push(format!(
                "field 'global' must be a mapping, got {}",
                describe(other)
            ));
            return DEFAULT_SCRAPE_INTERVAL;
        }
    };

    let interval = checker
        .duration("global", map, "scrape_interval")
        .unwrap_or(DEFAULT_SCRAPE_INTERVAL);
    let explicit_timeout = checker.duration("global", map, "scrape_timeout");
    checker.duration("global", map, "evaluation_interval");
    checker.duration("global", map, "rule_query_offset");
    checker.label_names("global", "external_labels", map.get("external_labels"));

    // Without an explicit timeout the default is clamped to the interval.
    if explicit_timeout.is_some_and(|timeout| timeout > interval) {
        checker.push("global scrape timeout greater than scrape interval");
    }

    interval
}

fn check_string_list(checker: &mut Checker, root: &Mapping, field: &str) {
    match root.get(field) {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(items)) => {
            for item in items {
                if !matches!(item, Value::String(_)) {
                    checker.push(format!(
                        "field '{}' entries must be strings, got {}",
                        field,
                        describe(item)
                    ));
                }
            }
        }
        Some(other) => checker.push(format!(
            "field '{}' must be a list, got {}",
            field,
            describe(other)
        )),
    }
}

fn check_scrape_config(
    checker: &mut Checker,
    index: usize,
    config: &Value,
    job_names: &mut HashSet<String>,
    global_interval: Duration,
) {
    let map = match config {
        Value::Mapping(map) => map,
        other => {
            checker.push(format!(
                "scrape config {} must be a mapping, got {}",
                index + 1,
                describe(other)
            ));
            return;
        }
    };

    let job_name = match map.get("job_name") {
        Some(Value::String(name)) if !name.is_empty() => Some(name.as_str()),
        _ => {
            checker.push(format!("scrape config {}: job_name is empty", index + 1));
            None
        }
    };
    if let Some(name) = job_name {
        if !job_names.insert(name.to_string()) {
            checker.push(format!(
                "found multiple scrape configs with job name \"{}\"",
                name
            ));
        }
    }

    let owner = match job_name {
        Some(name) => format!("scrape config \"{}\"", name),
        None => format!("scrape config {}", index + 1),
    };

    let interval = checker
        .duration(&owner, map, "scrape_interval")
        .unwrap_or(global_interval);
    // An inherited timeout is clamped to the job's interval, so only an
    // explicit one can exceed it.
    if let Some(timeout) = checker.duration(&owner, map, "scrape_timeout") {
        if timeout > interval {
            checker.push(format!("{}: scrape timeout greater than scrape interval", owner));
        }
    }

    match map.get("scheme") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s == "http" || s == "https" => {}
        Some(other) => checker.push(format!(
            "{}: invalid scheme {}",
            owner,
            key_text(other)
        )),
    }

    match map.get("metrics_path") {
        None | Some(Value::Null) => {}
        Some(Value::String(path)) if path.starts_with('/') => {}
        Some(other) => checker.push(format!(
            "{}: metrics_path must start with '/', got {}",
            owner,
            key_text(other)
        )),
    }

    if let Some(honor) = map.get("honor_labels") {
        if !matches!(honor, Value::Bool(_)) {
            checker.push(format!("{}: honor_labels must be a boolean", owner));
        }
    }

    check_static_configs(checker, &owner, map.get("static_configs"));
    check_relabel_configs(checker, &owner, "relabel_configs", map.get("relabel_configs"));
    check_relabel_configs(
        checker,
        &owner,
        "metric_relabel_configs",
        map.get("metric_relabel_configs"),
    );
}

fn check_static_configs(checker: &mut Checker, owner: &str, value: Option<&Value>) {
    let groups = match value {
        None | Some(Value::Null) => return,
        Some(Value::Sequence(groups)) => groups,
        Some(other) => {
            checker.push(format!(
                "{}: static_configs must be a list, got {}",
                owner,
                describe(other)
            ));
            return;
        }
    };

    for group in groups {
        let Value::Mapping(group) = group else {
            checker.push(format!("{}: static_configs entries must be mappings", owner));
            continue;
        };

        match group.get("targets") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(targets)) => {
                for target in targets {
                    match target.as_str() {
                        Some(t) if is_valid_target(t) => {}
                        _ => checker.push(format!(
                            "{}: {:?} is not a valid hostname",
                            owner,
                            key_text(target)
                        )),
                    }
                }
            }
            Some(other) => checker.push(format!(
                "{}: targets must be a list, got {}",
                owner,
                describe(other)
            )),
        }

        checker.label_names(owner, "labels", group.get("labels"));
    }
}

fn is_valid_target(target: &str) -> bool {
    !target.is_empty() && !target.contains('/') && !target.chars().any(char::is_whitespace)
}

fn check_relabel_configs(checker: &mut Checker, owner: &str, field: &str, value: Option<&Value>) {
    let configs = match value {
        None | Some(Value::Null) => return,
        Some(Value::Sequence(configs)) => configs,
        Some(other) => {
            checker.push(format!(
                "{}: {} must be a list, got {}",
                owner,
                field,
                describe(other)
            ));
            return;
        }
    };

    for (index, config) in configs.iter().enumerate() {
        let Value::Mapping(config) = config else {
            checker.push(format!("{}: {} entries must be mappings", owner, field));
            continue;
        };
        let at = format!("{}: {}[{}]", owner, field, index);

        let action = match config.get("action") {
            None | Some(Value::Null) => "replace".to_string(),
            Some(Value::String(a)) => a.to_lowercase(),
            Some(other) => {
                checker.push(format!("{}: action must be a string, got {}", at, describe(other)));
                continue;
            }
        };
        if !RELABEL_ACTIONS.contains(&action.as_str()) {
            checker.push(format!("{}: unknown relabel action {:?}", at, action));
        }

        if let Some(regex) = config.get("regex") {
            match regex.as_str() {
                Some(pattern) => {
                    if let Err(e) = Regex::new(&format!("^(?:{})$", pattern)) {
                        checker.push(format!("{}: invalid regex {:?}: {}", at, pattern, e));
                    }
                }
                None => checker.push(format!("{}: regex must be a string", at)),
            }
        }

        if action == "hashmod" && config.get("modulus").and_then(Value::as_u64).unwrap_or(0) == 0 {
            checker.push(format!("{}: relabel configuration for hashmod requires non-zero modulus", at));
        }

        if let Some(Value::Sequence(sources)) = config.get("source_labels") {
            for source in sources {
                match source.as_str() {
                    Some(name) if is_valid_label_name(name) => {}
                    _ => checker.push(format!(
                        "{}: {:?} is not a valid source label",
                        at,
                        key_text(source)
                    )),
                }
            }
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| describe(other).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_valid() {
        assert!(check_server_config("").is_ok());
        assert!(check_server_config("scrape_configs:\n").is_ok());
    }

    #[test]
    fn test_valid_config() {
        let doc = r#"
global:
  scrape_interval: 30s
  evaluation_interval: 30s
  external_labels:
    cluster: prod
rule_files:
  - /etc/prometheus/rules/*
scrape_configs:
- job_name: node
  scrape_interval: 15s
  scrape_timeout: 10s
  metrics_path: /metrics
  scheme: https
  static_configs:
    - targets: ["node-1:9100", "10.0.0.2:9100"]
      labels:
        env: prod
  relabel_configs:
    - source_labels: [__address__]
      regex: "(.*):9100"
      target_label: instance
      replacement: "$1"
- job_name: kubernetes-pods
  kubernetes_sd_configs:
    - role: pod
"#;
        assert!(check_server_config(doc).is_ok(), "{:?}", check_server_config(doc));
    }

    #[test]
    fn test_unknown_top_level_field() {
        let errors = check_server_config("scrape_config:\n- job_name: a\n").unwrap_err();
        assert_eq!(errors, vec!["field scrape_config not found in type config.plain"]);
    }

    #[test]
    fn test_duplicate_and_missing_job_names() {
        let doc = "scrape_configs:\n- job_name: a\n- job_name: a\n- scrape_interval: 1m\n";
        let errors = check_server_config(doc).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("multiple scrape configs with job name \"a\"")));
        assert!(errors.iter().any(|e| e.contains("scrape config 3: job_name is empty")));
    }

    #[test]
    fn test_names_starting_with_hash_are_checked_for_duplicates() {
        let doc = "scrape_configs:\n- job_name: \"#a\"\n- job_name: \"#a\"\n- {}\n";
        let errors = check_server_config(doc).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "found multiple scrape configs with job name \"#a\"",
                "scrape config 3: job_name is empty",
            ]
        );
    }

    #[test]
    fn test_timeout_above_interval() {
        let doc = "scrape_configs:\n- job_name: a\n  scrape_interval: 5s\n  scrape_timeout: 10s\n";
        let errors = check_server_config(doc).unwrap_err();
        assert!(errors[0].contains("scrape timeout greater than scrape interval"));

        let doc = "global:\n  scrape_interval: 5s\n  scrape_timeout: 6s\n";
        let errors = check_server_config(doc).unwrap_err();
        assert_eq!(errors, vec!["global scrape timeout greater than scrape interval"]);
    }

    #[test]
    fn test_short_global_interval_without_timeout_is_valid() {
        assert!(check_server_config("global:\n  scrape_interval: 5s\n").is_ok());
    }

    #[test]
    fn test_scrape_config_field_checks() {
        let doc = r#"
scrape_configs:
- job_name: a
  scheme: ftp
  metrics_path: metrics
  honor_labels: "yes"
  static_configs:
    - targets: ["http://host:80/path"]
      labels:
        "bad-name": x
  relabel_configs:
    - action: explode
    - regex: "(unclosed"
    - action: hashmod
"#;
        let errors = check_server_config(doc).unwrap_err();
        let joined = errors.join("\n");
        assert!(joined.contains("invalid scheme ftp"));
        assert!(joined.contains("metrics_path must start with '/'"));
        assert!(joined.contains("honor_labels must be a boolean"));
        assert!(joined.contains("is not a valid hostname"));
        assert!(joined.contains("is not a valid label name"));
        assert!(joined.contains("unknown relabel action"));
        assert!(joined.contains("invalid regex"));
        assert!(joined.contains("requires non-zero modulus"));
    }

    #[test]
    fn test_malformed_yaml() {
        let errors = check_server_config("scrape_configs:\n- job_name: [a\n").unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_scalar_document_is_rejected() {
        let errors = check_server_config("just text").unwrap_err();
        assert!(errors[0].contains("must be a mapping"));
    }
}
