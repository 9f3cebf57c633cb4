//! Error types for branch lifecycle orchestration.

use thiserror::Error;

use crate::github::GitHubError;

/// Errors surfaced while handling a pull request or review event.
///
/// Every variant is fatal to the event being handled; the webhook layer turns
/// them into an HTTP 500.
#[derive(Debug, Error)]
pub enum BrancherError {
    /// A git operation (clone, fetch, ls-remote, push, checkout) failed.
    #[error("git {op} failed: {message}")]
    Git { op: &'static str, message: String },

    /// A commit hash did not decode to the fixed object-id width.
    #[error("malformed commit hash {value:?}: decoded {decoded_len} bytes, expected 20")]
    MalformedHash { value: String, decoded_len: usize },

    /// The policy document exists but cannot be parsed.
    #[error("in file {path:?} at commit {commit}: {source}")]
    BotConfig {
        path: String,
        commit: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An authoritative hosting API call failed.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// Local filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid process configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A credential could not be obtained.
    #[error("credentials error: {0}")]
    Credentials(String),
}

impl BrancherError {
    pub(crate) fn git(op: &'static str, message: impl Into<String>) -> Self {
        Self::Git {
            op,
            message: message.into(),
        }
    }
}

/// Result type for the crate.
pub type Result<T> = std::result::Result<T, BrancherError>;
