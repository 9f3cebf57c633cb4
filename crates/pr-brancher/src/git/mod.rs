//! Version-control collaborator.
//!
//! The orchestration layer only needs a handful of primitives against a local
//! working copy: clone, remotes, fetch, listing remote branches, writing and
//! deleting a branch ref, pushing refspecs, forced checkout and reading a file
//! from the working tree. [`GitBackend`] is that contract; [`GitCli`] implements it by
//! driving the `git` executable.

mod cli;
mod hash;

pub use cli::{GitAuth, GitCli};
pub use hash::{CommitHash, HASH_LEN};

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Name of the remote that always points at the base repository.
pub const ORIGIN: &str = "origin";

/// Remote name used for the head fork of `user`. Never equal to [`ORIGIN`].
#[must_use]
pub fn head_remote(user: &str) -> String {
    format!("fork-{user}")
}

/// Result of a clone attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    /// A fresh clone was created.
    Cloned,
    /// A repository already exists at the target path and was reused.
    AlreadyExists,
}

/// Contract of the low-level git engine.
///
/// Implementations are shared across sessions and must be safe to call
/// concurrently for different working copies. Callers serialize access to a
/// single working copy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Clone `url` into `dir`. An existing repository at `dir` is not an error.
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<CloneOutcome>;

    /// Create or replace the remote `name` so it points at `url`.
    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()>;

    /// Fetch `remote`. "Already up to date" is success.
    async fn fetch(&self, dir: &Path, remote: &str) -> Result<()>;

    /// List the branch refs advertised by `remote` as `(short name, hash)`.
    async fn list_remote_branches(&self, dir: &Path, remote: &str)
        -> Result<Vec<(String, CommitHash)>>;

    /// Point `refs/heads/<name>` at `hash`, overwriting any existing ref.
    async fn write_branch_ref(&self, dir: &Path, name: &str, hash: CommitHash) -> Result<()>;

    /// Remove `refs/heads/<name>`. A missing ref is not an error.
    async fn delete_branch_ref(&self, dir: &Path, name: &str) -> Result<()>;

    /// Push the given refspecs to `remote` in a single invocation.
    async fn push(&self, dir: &Path, remote: &str, refspecs: &[String]) -> Result<()>;

    /// Force checkout of `hash` into the working tree, discarding local changes.
    async fn checkout(&self, dir: &Path, hash: CommitHash) -> Result<()>;

    /// Read a file relative to the working tree root. `None` if it does not exist.
    async fn read_file(&self, dir: &Path, path: &str) -> Result<Option<Vec<u8>>>;
}
