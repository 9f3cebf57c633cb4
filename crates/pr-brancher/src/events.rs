//! Pull request and review events.
//!
//! Two layers live here: the GitHub webhook payloads as they arrive on the
//! wire (only the fields this service reads), and the domain events the
//! lifecycle state machine and approval tracker consume.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::config::GitTransport;
use crate::error::BrancherError;

/// Repository identity, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryIdentity {
    pub owner: String,
    pub name: String,
}

impl RepositoryIdentity {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryIdentity {
    type Err = BrancherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(BrancherError::Config(format!(
                "invalid repository name {s:?}, expected owner/name"
            ))),
        }
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The pull request actions the lifecycle handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrAction {
    Opened,
    Synchronize,
    Closed,
    Reopened,
}

impl PrAction {
    /// Map a webhook action string. Actions outside the handled set yield `None`.
    #[must_use]
    pub fn from_webhook(action: &str) -> Option<Self> {
        match action {
            "opened" => Some(Self::Opened),
            "synchronize" => Some(Self::Synchronize),
            "closed" => Some(Self::Closed),
            "reopened" => Some(Self::Reopened),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Synchronize => "synchronize",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
        }
    }
}

impl fmt::Display for PrAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side (head or base) of a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrSide {
    /// Transport URL of the side's repository.
    pub repo_url: String,
    /// `owner/name` of the side's repository.
    pub repo_full_name: String,
    /// Branch name.
    pub branch: String,
    /// Commit the branch points at, hex.
    pub sha: String,
    /// Login of the user owning the branch.
    pub user: String,
    /// Whether the pull request was authored by a bot account.
    pub is_bot: bool,
}

/// A pull request event the lifecycle state machine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrEvent {
    pub number: u64,
    pub action: PrAction,
    /// Web URL of the pull request.
    pub html_url: String,
    pub head: PrSide,
    pub base: PrSide,
}

impl PrEvent {
    /// Whether the head branch lives in the base repository itself.
    #[must_use]
    pub fn is_local_branch(&self) -> bool {
        self.head.repo_full_name == self.base.repo_full_name
    }

    /// Identity of the base repository.
    pub fn base_identity(&self) -> Result<RepositoryIdentity, BrancherError> {
        self.base.repo_full_name.parse()
    }
}

/// A review event the approval tracker consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEvent {
    pub pr_number: u64,
    pub repo: RepositoryIdentity,
    /// Base side of the reviewed pull request; the policy is read at its commit.
    pub base: PrSide,
}

// =============================================================================
// GitHub webhook payloads
// =============================================================================

/// GitHub user.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    /// `User`, `Bot` or `Organization`.
    #[serde(rename = "type", default)]
    pub user_type: Option<String>,
}

impl GitHubUser {
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.user_type.as_deref() == Some("Bot")
    }
}

/// GitHub repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: GitHubUser,
    #[serde(default)]
    pub ssh_url: String,
    #[serde(default)]
    pub clone_url: String,
}

/// Git reference on one side of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    pub user: GitHubUser,
    /// Null when the head fork has been deleted.
    #[serde(default)]
    pub repo: Option<Repository>,
}

/// GitHub pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    pub user: GitHubUser,
    pub head: GitRef,
    pub base: GitRef,
    #[serde(default)]
    pub merged: bool,
}

/// `pull_request` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

/// Review attached to a `pull_request_review` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInfo {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub user: Option<GitHubUser>,
}

/// `pull_request_review` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestReviewPayload {
    pub action: String,
    pub review: ReviewInfo,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

fn side(git_ref: &GitRef, transport: GitTransport, author_is_bot: bool) -> PrSide {
    let (repo_url, repo_full_name) = git_ref.repo.as_ref().map_or_else(
        || (String::new(), String::new()),
        |repo| (transport.url_of(repo).to_string(), repo.full_name.clone()),
    );
    PrSide {
        repo_url,
        repo_full_name,
        branch: git_ref.ref_name.clone(),
        sha: git_ref.sha.clone(),
        user: git_ref.user.login.clone(),
        is_bot: author_is_bot || git_ref.user.is_bot(),
    }
}

impl PullRequestPayload {
    /// Domain event for this payload, or `None` for actions the lifecycle ignores.
    #[must_use]
    pub fn to_event(&self, transport: GitTransport) -> Option<PrEvent> {
        let action = PrAction::from_webhook(&self.action)?;
        let pr = &self.pull_request;
        let author_is_bot = pr.user.is_bot();
        Some(PrEvent {
            number: self.number,
            action,
            html_url: pr.html_url.clone(),
            head: side(&pr.head, transport, author_is_bot),
            base: side(&pr.base, transport, author_is_bot),
        })
    }
}

impl PullRequestReviewPayload {
    #[must_use]
    pub fn to_event(&self, transport: GitTransport) -> ReviewEvent {
        let pr = &self.pull_request;
        ReviewEvent {
            pr_number: pr.number,
            repo: RepositoryIdentity::new(&self.repository.owner.login, &self.repository.name),
            base: side(&pr.base, transport, pr.user.is_bot()),
        }
    }
}
