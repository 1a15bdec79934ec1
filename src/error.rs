//! Error types for the confgen rendering pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while talking to the metadata endpoint.
///
/// Any fetch failure aborts the current cycle; the scheduler retries on the
/// next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metadata endpoint returned a malformed payload: {0}")]
    Malformed(String),

    #[error("Metadata endpoint did not become ready after {attempts} attempts: {url}")]
    Unavailable { url: String, attempts: usize },
}

/// Errors raised while assembling a context graph from flat records.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Could not resolve self identity: {0}")]
    SelfUnresolved(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Errors raised by query functions for malformed arguments.
///
/// A lookup that simply finds nothing is not an error; it yields an absent
/// value so templates can branch on presence.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid selector '{0}': expected '@key=value' or '.stack-name'")]
    InvalidSelector(String),

    #[error("Malformed label selector '{0}': expected '@key=value'")]
    MalformedLabelSelector(String),

    #[error("Invalid use of multiple stack selectors: '{0}'")]
    MultipleStackSelectors(String),

    #[error("Invalid service identifier '{0}': expected 'name' or 'name.stack'")]
    InvalidIdentifier(String),

    #[error("Invalid label pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Errors raised while rendering a template.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Could not read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Template syntax error in {name}: {detail}")]
    Syntax { name: String, detail: String },

    #[error("Template execution failed in {name}: {detail}")]
    Execution { name: String, detail: String },
}

/// Errors raised while publishing rendered content to a destination.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not create staging file for {dest:?}: {source}")]
    Staging {
        dest: PathBuf,
        source: std::io::Error,
    },

    #[error("Check command '{command}' failed with {status}")]
    CheckFailed { command: String, status: String },

    #[error("Could not run hook command '{command}': {source}")]
    Hook {
        command: String,
        source: std::io::Error,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
