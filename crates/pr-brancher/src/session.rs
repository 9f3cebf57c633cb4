//! Repository sessions.
//!
//! A [`RepositorySession`] owns the local working copy of one base
//! repository. The working copy sits behind an async mutex and every git
//! operation is a method on the locked [`WorkingCopy`], so a fetch -> inspect
//! -> mutate sequence can only be written while holding the lock. The guard is
//! released on drop, which covers early `?` returns.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{BrancherError, Result};
use crate::events::RepositoryIdentity;
use crate::git::{CloneOutcome, CommitHash, GitBackend, ORIGIN};

/// Branches advertised by a remote at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSet(HashMap<String, CommitHash>);

impl BranchSet {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommitHash> {
        self.0.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, CommitHash)> for BranchSet {
    fn from_iter<I: IntoIterator<Item = (String, CommitHash)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Local working copy of a base repository. Only reachable through
/// [`RepositorySession::lock`].
pub struct WorkingCopy {
    identity: RepositoryIdentity,
    path: PathBuf,
    git: Arc<dyn GitBackend>,
    /// Remote name -> URL as last configured on this working copy.
    remotes: BTreeMap<String, String>,
    ready: bool,
}

impl WorkingCopy {
    #[must_use]
    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remotes configured on this working copy, name -> URL.
    #[must_use]
    pub fn remotes(&self) -> &BTreeMap<String, String> {
        &self.remotes
    }

    /// Whether the clone (or reopen) has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Clone on first use, then make sure `origin` points at `url` and is fetched.
    pub(crate) async fn prepare(&mut self, url: &str) -> Result<()> {
        if !self.ready {
            match self.git.clone_repo(url, &self.path).await? {
                CloneOutcome::Cloned => {
                    info!(repo = %self.identity, dir = %self.path.display(), "Repository cloned");
                }
                CloneOutcome::AlreadyExists => {
                    info!(repo = %self.identity, dir = %self.path.display(), "Repository reused from disk");
                }
            }
            self.ready = true;
        }
        self.set_remote_and_fetch(ORIGIN, url).await
    }

    /// Point `remote` at `url` (replacing any previous URL) and fetch it.
    ///
    /// `origin` is owned by the session and always points at the base
    /// repository, so it cannot be redirected here.
    pub async fn ensure_remote_and_fetch(&mut self, remote: &str, url: &str) -> Result<()> {
        if remote == ORIGIN {
            return Err(BrancherError::git(
                "remote",
                format!("refusing to repoint {ORIGIN} at {url}"),
            ));
        }
        self.set_remote_and_fetch(remote, url).await
    }

    async fn set_remote_and_fetch(&mut self, remote: &str, url: &str) -> Result<()> {
        self.git.set_remote(&self.path, remote, url).await?;
        self.remotes.insert(remote.to_string(), url.to_string());
        self.git.fetch(&self.path, remote).await?;
        debug!(repo = %self.identity, remote, "Remote fetched");
        Ok(())
    }

    /// Branches currently advertised by `remote`.
    pub async fn list_branches(&self, remote: &str) -> Result<BranchSet> {
        let branches: BranchSet = self
            .git
            .list_remote_branches(&self.path, remote)
            .await?
            .into_iter()
            .collect();
        debug!(repo = %self.identity, remote, count = branches.len(), "Listed branches");
        Ok(branches)
    }

    /// Point local branch `name` at `commit`, overwriting any existing ref.
    pub async fn create_or_update_branch(&self, name: &str, commit: &str) -> Result<CommitHash> {
        let hash: CommitHash = commit.parse()?;
        self.git.write_branch_ref(&self.path, name, hash).await?;
        debug!(repo = %self.identity, branch = name, %hash, "Branch ref written");
        Ok(hash)
    }

    /// Force push local `branch` to the same name on `remote`.
    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        self.git.push(&self.path, remote, &[refspec]).await?;
        info!(repo = %self.identity, remote, branch, "Branch pushed");
        Ok(())
    }

    /// Force push local `branch` to `remote`, then drop the local ref.
    ///
    /// The local ref is removed even when the push fails, so a stale
    /// `a/b` never blocks a later `a/b/c` in this working copy.
    pub async fn publish(&self, remote: &str, branch: &str) -> Result<()> {
        let pushed = self.push(remote, branch).await;
        self.delete_local_branches(&[branch.to_string()]).await?;
        pushed
    }

    /// Remove local branch refs. Missing refs are skipped.
    pub async fn delete_local_branches(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.git.delete_branch_ref(&self.path, name).await?;
        }
        Ok(())
    }

    /// Delete every named branch on `remote` in a single push, along with
    /// any local refs of the same names.
    ///
    /// The push is reported as one result; if the transport applies part of
    /// the batch before failing, the applied deletions stay applied.
    pub async fn delete_remote_branches(&self, remote: &str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let refspecs: Vec<String> = names
            .iter()
            .map(|name| format!(":refs/heads/{name}"))
            .collect();
        self.git.push(&self.path, remote, &refspecs).await?;
        info!(repo = %self.identity, remote, branches = ?names, "Remote branches deleted");
        self.delete_local_branches(names).await
    }

    /// Check out `commit` (forced) and read `path` from the working tree.
    pub async fn read_file_at(&self, commit: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let hash: CommitHash = commit.parse()?;
        self.git.checkout(&self.path, hash).await?;
        self.git.read_file(&self.path, path).await
    }
}

/// Session for one base repository.
pub struct RepositorySession {
    identity: RepositoryIdentity,
    copy: Mutex<WorkingCopy>,
}

impl RepositorySession {
    /// Session whose working copy lives at `<work_root>/<owner>/<name>`.
    #[must_use]
    pub fn new(identity: RepositoryIdentity, work_root: &Path, git: Arc<dyn GitBackend>) -> Self {
        let path = work_root.join(&identity.owner).join(&identity.name);
        Self {
            copy: Mutex::new(WorkingCopy {
                identity: identity.clone(),
                path,
                git,
                remotes: BTreeMap::new(),
                ready: false,
            }),
            identity,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    /// Acquire exclusive access to the working copy.
    pub async fn lock(&self) -> MutexGuard<'_, WorkingCopy> {
        self.copy.lock().await
    }
}
