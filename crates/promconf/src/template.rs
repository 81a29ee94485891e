//! Minimal renderer for the config template language.
//!
//! Templates are plain text with `{{ ... }}` actions. The only value an
//! action can produce is the concatenated job fragments, spelled `.Jobs`
//! (or `jobs`). Comments (`{{/* ... */}}`) render as nothing, and `{{- `
//! / ` -}}` trim the whitespace of the adjacent text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {offset}")]
    Unclosed { offset: usize },

    #[error("empty action at byte {offset}")]
    EmptyAction { offset: usize },

    #[error("unknown action '{action}' at byte {offset}")]
    UnknownAction { action: String, offset: usize },
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Renders `template`, substituting `jobs` at every insertion point.
pub fn render(template: &str, jobs: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + jobs.len());
    let mut rest = template;
    let mut consumed = 0;
    let mut trim_next_text = false;

    while let Some(start) = rest.find(OPEN) {
        let offset = consumed + start;
        let mut text = &rest[..start];
        if trim_next_text {
            text = text.trim_start();
        }

        let body_start = start + OPEN.len();
        let end = rest[body_start..]
            .find(CLOSE)
            .ok_or(TemplateError::Unclosed { offset })?;
        let mut inner = &rest[body_start..body_start + end];

        if let Some(stripped) = strip_left_marker(inner) {
            text = text.trim_end();
            inner = stripped;
        }
        trim_next_text = false;
        if let Some(stripped) = strip_right_marker(inner) {
            trim_next_text = true;
            inner = stripped;
        }

        out.push_str(text);
        out.push_str(evaluate(inner.trim(), jobs, offset)?);

        let next = body_start + end + CLOSE.len();
        consumed += next;
        rest = &rest[next..];
    }

    if trim_next_text {
        rest = rest.trim_start();
    }
    out.push_str(rest);
    Ok(out)
}

fn evaluate<'a>(action: &str, jobs: &'a str, offset: usize) -> Result<&'a str, TemplateError> {
    match action {
        "" => Err(TemplateError::EmptyAction { offset }),
        ".Jobs" | "jobs" => Ok(jobs),
        comment if comment.starts_with("/*") && comment.ends_with("*/") && comment.len() >= 4 => {
            Ok("")
        }
        other => Err(TemplateError::UnknownAction {
            action: other.to_string(),
            offset,
        }),
    }
}

/// `{{- x` trims only when the dash is followed by whitespace.
fn strip_left_marker(inner: &str) -> Option<&str> {
    let stripped = inner.strip_prefix('-')?;
    stripped
        .starts_with(|c: char| c.is_ascii_whitespace())
        .then_some(stripped)
}

fn strip_right_marker(inner: &str) -> Option<&str> {
    let stripped = inner.strip_suffix('-')?;
    stripped
        .ends_with(|c: char| c.is_ascii_whitespace())
        .then_some(stripped)
}
