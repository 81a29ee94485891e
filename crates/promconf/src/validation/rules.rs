//! Rule-group document checks.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use super::duration::parse_duration;
use super::{is_valid_label_name, is_valid_metric_name};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleGroups {
    #[serde(default)]
    groups: Option<Vec<RuleGroup>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleGroup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    query_offset: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    rules: Option<Vec<RuleNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleNode {
    #[serde(default)]
    record: Option<String>,
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    expr: Option<String>,
    #[serde(default, rename = "for")]
    for_duration: Option<String>,
    #[serde(default)]
    keep_firing_for: Option<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

/// Checks a complete rule-group document, returning one message per problem.
pub fn check_rule_groups(document: &str) -> Result<(), Vec<String>> {
    let parsed: RuleGroups = serde_yaml::from_str(document).map_err(|e| vec![e.to_string()])?;

    let groups = parsed.groups.unwrap_or_default();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, group) in groups.iter().enumerate() {
        if group.name.is_empty() {
            errors.push(format!("group {}: Groupname must not be empty", index + 1));
        } else if !seen.insert(group.name.as_str()) {
            errors.push(format!(
                "groupname: \"{}\" is repeated in the same file",
                group.name
            ));
        }

        let group_id = if group.name.is_empty() {
            format!("group {}", index + 1)
        } else {
            format!("group \"{}\"", group.name)
        };

        check_optional_duration(&mut errors, &group_id, "interval", &group.interval);
        check_optional_duration(&mut errors, &group_id, "query_offset", &group.query_offset);

        if group.limit.is_some_and(|l| l < 0) {
            errors.push(format!("{}: limit must not be negative", group_id));
        }

        if let Some(labels) = &group.labels {
            check_label_names(&mut errors, &group_id, "label", labels);
        }

        for (rule_index, rule) in group.rules.iter().flatten().enumerate() {
            let rule_id = format!("{}, rule {}", group_id, rule_index + 1);
            check_rule(&mut errors, &rule_id, rule);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rule(errors: &mut Vec<String>, rule_id: &str, rule: &RuleNode) {
    let record = rule.record.as_deref().filter(|r| !r.is_empty());
    let alert = rule.alert.as_deref().filter(|a| !a.is_empty());

    match (record, alert) {
        (Some(_), Some(_)) => errors.push(format!(
            "{}: only one of 'record' and 'alert' must be set",
            rule_id
        )),
        (None, None) => errors.push(format!(
            "{}: one of 'record' or 'alert' must be set",
            rule_id
        )),
        _ => {}
    }

    match rule.expr.as_deref().map(str::trim) {
        None | Some("") => errors.push(format!("{}: field 'expr' must be set in rule", rule_id)),
        Some(expr) => {
            if let Err(reason) = check_balanced(expr) {
                errors.push(format!("{}: could not parse expression: {}", rule_id, reason));
            }
        }
    }

    if let Some(name) = record {
        if !is_valid_metric_name(name) {
            errors.push(format!("{}: invalid recording rule name: {}", rule_id, name));
        }
        if rule.annotations.as_ref().is_some_and(|a| !a.is_empty()) {
            errors.push(format!(
                "{}: invalid field 'annotations' in recording rule",
                rule_id
            ));
        }
        if rule.for_duration.is_some() {
            errors.push(format!("{}: invalid field 'for' in recording rule", rule_id));
        }
        if rule.keep_firing_for.is_some() {
            errors.push(format!(
                "{}: invalid field 'keep_firing_for' in recording rule",
                rule_id
            ));
        }
    }

    check_optional_duration(errors, rule_id, "for", &rule.for_duration);
    check_optional_duration(errors, rule_id, "keep_firing_for", &rule.keep_firing_for);

    if let Some(labels) = &rule.labels {
        check_label_names(errors, rule_id, "label", labels);
        if labels.contains_key("__name__") {
            errors.push(format!("{}: invalid label name: __name__", rule_id));
        }
    }
    if let Some(annotations) = &rule.annotations {
        check_label_names(errors, rule_id, "annotation", annotations);
    }
}

fn check_optional_duration(
    errors: &mut Vec<String>,
    owner: &str,
    field: &str,
    value: &Option<String>,
) {
    if let Some(value) = value {
        if let Err(reason) = parse_duration(value) {
            errors.push(format!("{}: field '{}': {}", owner, field, reason));
        }
    }
}

fn check_label_names(
    errors: &mut Vec<String>,
    owner: &str,
    what: &str,
    names: &BTreeMap<String, String>,
) {
    for name in names.keys() {
        if !is_valid_label_name(name) {
            errors.push(format!("{}: invalid {} name: {}", owner, what, name));
        }
    }
}

/// Brackets must nest and string literals must terminate.
fn check_balanced(expr: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut chars = expr.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                let quote = c;
                let mut closed = false;
                while let Some(s) = chars.next() {
                    if s == '\\' && quote != '`' {
                        chars.next();
                    } else if s == quote {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(format!("unterminated quoted string {}", quote));
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return Err(format!("unexpected {}", c));
                }
            }
            _ => {}
        }
    }

    match stack.last() {
        Some(open) => Err(format!("unclosed {}", open)),
        None => Ok(()),
    }
}
