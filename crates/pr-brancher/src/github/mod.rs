//! Hosting API collaborator.
//!
//! Two narrow interfaces with deliberately different error behaviour:
//!
//! - [`PullRequestApi`] covers the authoritative calls (labels, reviews,
//!   listing and editing pull requests). Failures propagate and fail the event.
//! - [`Commenter`] posts informational comments. It has no error channel:
//!   implementations log failures and move on, so a comment can never undo
//!   a git-side outcome that already happened.

mod client;

pub use client::{GitHubClient, GITHUB_API_URL};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::events::RepositoryIdentity;

/// Prefix marking comments posted by the bot.
pub const COMMENT_PREFIX: &str = "🤖 ";

/// Errors from authoritative GitHub API calls.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode GitHub response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A pull request review.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Review {
    /// `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`, `DISMISSED`, `PENDING`.
    pub state: String,
}

impl Review {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.state.eq_ignore_ascii_case("approved")
    }
}

/// Base reference of a listed pull request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullBase {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// A pull request as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullSummary {
    pub number: u64,
    pub html_url: String,
    pub base: PullBase,
}

/// Authoritative pull request operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// Add `label` to an issue or pull request.
    async fn add_label(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError>;

    /// All reviews on a pull request, oldest first.
    async fn list_reviews(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
    ) -> Result<Vec<Review>, GitHubError>;

    /// Open pull requests whose base branch is `base`.
    async fn list_pulls_with_base(
        &self,
        repo: &RepositoryIdentity,
        base: &str,
    ) -> Result<Vec<PullSummary>, GitHubError>;

    /// Change the base branch of a pull request.
    async fn edit_base(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        base: &str,
    ) -> Result<(), GitHubError>;
}

/// Best-effort comment posting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Commenter: Send + Sync {
    /// Post `body` on an issue or pull request. Failures are logged, never returned.
    async fn comment(&self, repo: &RepositoryIdentity, number: u64, body: &str);
}
