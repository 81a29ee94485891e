use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::SecretError;
use crate::template::TemplateError;

/// Failure taxonomy of a single reconciliation event.
///
/// Connection refusal from the reload endpoint never shows up here; the
/// reload client retries it.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("unknown config type")]
    UnknownCategory,

    #[error("invalid config data: {}", .diagnostics.join("; "))]
    InvalidPayload { diagnostics: Vec<String> },

    #[error("config template key does not match this instance")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),

    #[error("Bad payload: {0}")]
    BadPayload(String),
}

impl ControllerError {
    pub fn invalid(diagnostics: Vec<String>) -> Self {
        ControllerError::InvalidPayload { diagnostics }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list '{pattern}': {message}")]
    ListFiles { pattern: String, message: String },

    #[error("Invalid fragment key '{key}'")]
    InvalidFragmentKey { key: String },
}

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Failed to read template: {0}")]
    ReadTemplate(#[source] StorageError),

    #[error("Failed to read jobs: {0}")]
    ReadJobs(#[source] StorageError),

    #[error("Failed to render template: {0}")]
    Render(#[from] TemplateError),

    #[error("Failed to write merged configuration: {0}")]
    Write(#[source] StorageError),
}

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Reload request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code returned from Prometheus (got: {status}, expected: 200, msg:{body})")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Reload cancelled while waiting for {url} to accept connections")]
    Cancelled { url: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required option: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {option}: {reason}")]
    InvalidValue {
        option: &'static str,
        reason: String,
    },

    #[error("Failed to resolve instance key: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read manifest directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read manifest '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
