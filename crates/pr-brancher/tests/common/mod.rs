//! Shared fakes for integration tests.
//!
//! `FakeGit` simulates remote repositories keyed by URL and one local working
//! copy per directory. Every operation sleeps for a configurable delay while
//! counted as in flight, so tests can observe overlapping critical sections.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pr_brancher::error::{BrancherError, Result};
use pr_brancher::git::{CloneOutcome, CommitHash, GitBackend};
use pr_brancher::github::{Commenter, GitHubError, PullBase, PullRequestApi, PullSummary, Review};
use pr_brancher::{PrAction, PrEvent, PrSide, RepositoryIdentity, SessionRegistry};

pub const HEAD_SHA: &str = "0123456789abcdef0123456789abcdef01234567";
pub const NEXT_SHA: &str = "fedcba9876543210fedcba9876543210fedcba98";
pub const BASE_SHA: &str = "89abcdef0123456789abcdef0123456789abcdef";

/// Working copy of `org/<repo>` under the harness work root.
pub fn work_dir(repo: &str) -> PathBuf {
    Path::new("/work").join("org").join(repo)
}

#[derive(Default)]
struct WorkingCopyState {
    remotes: HashMap<String, String>,
    local_refs: HashMap<String, CommitHash>,
    checked_out: Option<CommitHash>,
}

#[derive(Default)]
struct FakeState {
    /// Remote URL -> branches.
    servers: HashMap<String, BTreeMap<String, CommitHash>>,
    copies: HashMap<PathBuf, WorkingCopyState>,
    /// Commit -> path -> contents.
    files: HashMap<CommitHash, HashMap<String, Vec<u8>>>,
    failing_urls: HashSet<String>,
    clones: usize,
    fetches: usize,
}

#[derive(Default)]
struct InFlight {
    per_dir: HashMap<PathBuf, usize>,
    max_per_dir: usize,
    total: usize,
    max_total: usize,
}

/// In-memory [`GitBackend`].
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<FakeState>,
    in_flight: Mutex<InFlight>,
    delay: Duration,
    ops: AtomicUsize,
}

fn hash(hex: &str) -> CommitHash {
    hex.parse().unwrap()
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation takes `delay` to complete.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Branches currently on the remote at `url`.
    pub fn remote_branches(&self, url: &str) -> BTreeMap<String, String> {
        let state = self.state.lock().unwrap();
        state
            .servers
            .get(url)
            .map(|branches| {
                branches
                    .iter()
                    .map(|(name, hash)| (name.clone(), hash.to_hex()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn seed_branch(&self, url: &str, name: &str, sha: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .servers
            .entry(url.to_string())
            .or_default()
            .insert(name.to_string(), hash(sha));
    }

    pub fn add_file(&self, sha: &str, path: &str, contents: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .entry(hash(sha))
            .or_default()
            .insert(path.to_string(), contents.as_bytes().to_vec());
    }

    /// Make every network operation against `url` fail.
    pub fn fail_url(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.to_string());
    }

    /// Local branch refs of the working copy at `dir`.
    pub fn local_branches(&self, dir: &Path) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .copies
            .get(dir)
            .map(|copy| copy.local_refs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Local remotes of the working copy at `dir`, name -> URL.
    pub fn remotes_of(&self, dir: &Path) -> BTreeMap<String, String> {
        let state = self.state.lock().unwrap();
        state
            .copies
            .get(dir)
            .map(|copy| copy.remotes.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn clone_count(&self) -> usize {
        self.state.lock().unwrap().clones
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    /// Highest number of operations seen in flight on one working copy.
    pub fn max_concurrent_per_dir(&self) -> usize {
        self.in_flight.lock().unwrap().max_per_dir
    }

    /// Highest number of operations seen in flight across all working copies.
    pub fn max_concurrent_total(&self) -> usize {
        self.in_flight.lock().unwrap().max_total
    }

    async fn enter(&self, dir: &Path) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.per_dir.entry(dir.to_path_buf()).or_default();
            *count += 1;
            let count = *count;
            in_flight.max_per_dir = in_flight.max_per_dir.max(count);
            in_flight.total += 1;
            in_flight.max_total = in_flight.max_total.max(in_flight.total);
        }
        self.ops.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn exit(&self, dir: &Path) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.per_dir.get_mut(dir) {
            *count -= 1;
        }
        in_flight.total -= 1;
    }

    fn remote_url(state: &FakeState, dir: &Path, remote: &str) -> Result<String> {
        let copy = state
            .copies
            .get(dir)
            .ok_or_else(|| BrancherError::Git {
                op: "remote",
                message: format!("{} is not a repository", dir.display()),
            })?;
        let url = copy.remotes.get(remote).ok_or_else(|| BrancherError::Git {
            op: "remote",
            message: format!("no such remote {remote}"),
        })?;
        if state.failing_urls.contains(url) {
            return Err(BrancherError::Git {
                op: "fetch",
                message: format!("could not read from remote repository {url}"),
            });
        }
        Ok(url.clone())
    }

    fn copy_mut<'a>(state: &'a mut FakeState, dir: &Path) -> Result<&'a mut WorkingCopyState> {
        state.copies.get_mut(dir).ok_or_else(|| BrancherError::Git {
            op: "open",
            message: format!("{} is not a repository", dir.display()),
        })
    }
}

#[async_trait]
impl GitBackend for FakeGit {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<CloneOutcome> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.failing_urls.contains(url) {
                Err(BrancherError::Git {
                    op: "clone",
                    message: format!("could not read from remote repository {url}"),
                })
            } else if state.copies.contains_key(dir) {
                Ok(CloneOutcome::AlreadyExists)
            } else {
                state.clones += 1;
                state.servers.entry(url.to_string()).or_default();
                let mut copy = WorkingCopyState::default();
                copy.remotes.insert("origin".to_string(), url.to_string());
                state.copies.insert(dir.to_path_buf(), copy);
                Ok(CloneOutcome::Cloned)
            }
        };
        self.exit(dir);
        result
    }

    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::copy_mut(&mut state, dir).map(|copy| {
                copy.remotes.insert(name.to_string(), url.to_string());
            })
        };
        self.exit(dir);
        result
    }

    async fn fetch(&self, dir: &Path, remote: &str) -> Result<()> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::remote_url(&state, dir, remote).map(|_| state.fetches += 1)
        };
        self.exit(dir);
        result
    }

    async fn list_remote_branches(
        &self,
        dir: &Path,
        remote: &str,
    ) -> Result<Vec<(String, CommitHash)>> {
        self.enter(dir).await;
        let result = {
            let state = self.state.lock().unwrap();
            Self::remote_url(&state, dir, remote).map(|url| {
                state
                    .servers
                    .get(&url)
                    .map(|branches| branches.iter().map(|(n, h)| (n.clone(), *h)).collect())
                    .unwrap_or_default()
            })
        };
        self.exit(dir);
        result
    }

    async fn write_branch_ref(&self, dir: &Path, name: &str, hash: CommitHash) -> Result<()> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::copy_mut(&mut state, dir).and_then(|copy| {
                // git stores refs as paths, so `a/b` and `a/b/c` cannot coexist.
                let clash = copy.local_refs.keys().find(|existing| {
                    existing.as_str() != name
                        && (name.starts_with(&format!("{existing}/"))
                            || existing.starts_with(&format!("{name}/")))
                });
                if let Some(existing) = clash {
                    return Err(BrancherError::Git {
                        op: "update-ref",
                        message: format!(
                            "cannot lock ref 'refs/heads/{name}': 'refs/heads/{existing}' exists"
                        ),
                    });
                }
                copy.local_refs.insert(name.to_string(), hash);
                Ok(())
            })
        };
        self.exit(dir);
        result
    }

    async fn delete_branch_ref(&self, dir: &Path, name: &str) -> Result<()> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::copy_mut(&mut state, dir).map(|copy| {
                copy.local_refs.remove(name);
            })
        };
        self.exit(dir);
        result
    }

    async fn push(&self, dir: &Path, remote: &str, refspecs: &[String]) -> Result<()> {
        self.enter(dir).await;
        let result = (|| -> Result<()> {
            let mut state = self.state.lock().unwrap();
            let url = Self::remote_url(&state, dir, remote)?;
            for refspec in refspecs {
                let refspec = refspec.trim_start_matches('+');
                let (src, dst) = refspec.split_once(':').ok_or_else(|| BrancherError::Git {
                    op: "push",
                    message: format!("invalid refspec {refspec}"),
                })?;
                let dst = dst.trim_start_matches("refs/heads/").to_string();
                if src.is_empty() {
                    state.servers.entry(url.clone()).or_default().remove(&dst);
                } else {
                    let src = src.trim_start_matches("refs/heads/");
                    let hash = *Self::copy_mut(&mut state, dir)?
                        .local_refs
                        .get(src)
                        .ok_or_else(|| BrancherError::Git {
                            op: "push",
                            message: format!("src refspec {src} does not match any"),
                        })?;
                    state.servers.entry(url.clone()).or_default().insert(dst, hash);
                }
            }
            Ok(())
        })();
        self.exit(dir);
        result
    }

    async fn checkout(&self, dir: &Path, hash: CommitHash) -> Result<()> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::copy_mut(&mut state, dir).map(|copy| copy.checked_out = Some(hash))
        };
        self.exit(dir);
        result
    }

    async fn read_file(&self, dir: &Path, path: &str) -> Result<Option<Vec<u8>>> {
        self.enter(dir).await;
        let result = {
            let mut state = self.state.lock().unwrap();
            Self::copy_mut(&mut state, dir)
                .map(|copy| copy.checked_out)
                .map(|commit| {
                    commit.and_then(|c| state.files.get(&c).and_then(|f| f.get(path).cloned()))
                })
        };
        self.exit(dir);
        result
    }
}

/// Records every comment posted.
#[derive(Default)]
pub struct RecordingCommenter {
    comments: Mutex<Vec<(RepositoryIdentity, u64, String)>>,
}

impl RecordingCommenter {
    pub fn comments_on(&self, number: u64) -> Vec<String> {
        self.comments
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n, _)| *n == number)
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.comments.lock().unwrap().len()
    }
}

#[async_trait]
impl Commenter for RecordingCommenter {
    async fn comment(&self, repo: &RepositoryIdentity, number: u64, body: &str) {
        self.comments
            .lock()
            .unwrap()
            .push((repo.clone(), number, body.to_string()));
    }
}

/// In-memory pull request API.
#[derive(Default)]
pub struct FakePullRequestApi {
    labels: Mutex<Vec<(u64, String)>>,
    reviews: Mutex<HashMap<u64, Vec<Review>>>,
    pulls: Mutex<Vec<PullSummary>>,
}

impl FakePullRequestApi {
    pub fn add_open_pull(&self, number: u64, base: &str) {
        self.pulls.lock().unwrap().push(PullSummary {
            number,
            html_url: format!("https://github.com/org/repo/pull/{number}"),
            base: PullBase {
                ref_name: base.to_string(),
            },
        });
    }

    pub fn add_reviews(&self, number: u64, states: &[&str]) {
        self.reviews.lock().unwrap().entry(number).or_default().extend(
            states.iter().map(|s| Review {
                state: (*s).to_string(),
            }),
        );
    }

    pub fn base_of(&self, number: u64) -> Option<String> {
        self.pulls
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.number == number)
            .map(|p| p.base.ref_name.clone())
    }

    pub fn labels(&self) -> Vec<(u64, String)> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestApi for FakePullRequestApi {
    async fn add_label(
        &self,
        _repo: &RepositoryIdentity,
        number: u64,
        label: &str,
    ) -> std::result::Result<(), GitHubError> {
        self.labels.lock().unwrap().push((number, label.to_string()));
        Ok(())
    }

    async fn list_reviews(
        &self,
        _repo: &RepositoryIdentity,
        number: u64,
    ) -> std::result::Result<Vec<Review>, GitHubError> {
        Ok(self
            .reviews
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_pulls_with_base(
        &self,
        _repo: &RepositoryIdentity,
        base: &str,
    ) -> std::result::Result<Vec<PullSummary>, GitHubError> {
        Ok(self
            .pulls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.base.ref_name == base)
            .cloned()
            .collect())
    }

    async fn edit_base(
        &self,
        _repo: &RepositoryIdentity,
        number: u64,
        base: &str,
    ) -> std::result::Result<(), GitHubError> {
        let mut pulls = self.pulls.lock().unwrap();
        let pull = pulls
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| GitHubError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })?;
        pull.base.ref_name = base.to_string();
        Ok(())
    }
}

pub fn base_url(repo: &str) -> String {
    format!("git@github.com:org/{repo}.git")
}

pub fn fork_url(user: &str, repo: &str) -> String {
    format!("git@github.com:{user}/{repo}.git")
}

/// Pull request event for `user:branch` against `org/<repo>`.
pub fn pr_event(repo: &str, number: u64, action: PrAction, user: &str, branch: &str, sha: &str) -> PrEvent {
    PrEvent {
        number,
        action,
        html_url: format!("https://github.com/org/{repo}/pull/{number}"),
        head: PrSide {
            repo_url: fork_url(user, repo),
            repo_full_name: format!("{user}/{repo}"),
            branch: branch.to_string(),
            sha: sha.to_string(),
            user: user.to_string(),
            is_bot: false,
        },
        base: PrSide {
            repo_url: base_url(repo),
            repo_full_name: format!("org/{repo}"),
            branch: "main".to_string(),
            sha: BASE_SHA.to_string(),
            user: "org".to_string(),
            is_bot: false,
        },
    }
}

/// Same as [`pr_event`] but with the head branch living in the base repository.
pub fn local_pr_event(repo: &str, number: u64, action: PrAction, is_bot: bool) -> PrEvent {
    let mut event = pr_event(repo, number, action, "org", "feature-y", HEAD_SHA);
    event.head.repo_url = base_url(repo);
    event.head.repo_full_name = format!("org/{repo}");
    event.head.is_bot = is_bot;
    event
}

pub struct Harness {
    pub git: Arc<FakeGit>,
    pub api: Arc<FakePullRequestApi>,
    pub commenter: Arc<RecordingCommenter>,
    pub registry: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new(git: FakeGit) -> Self {
        let git = Arc::new(git);
        let registry = Arc::new(SessionRegistry::new(
            "/work",
            Arc::clone(&git) as Arc<dyn GitBackend>,
        ));
        Self {
            git,
            api: Arc::new(FakePullRequestApi::default()),
            commenter: Arc::new(RecordingCommenter::default()),
            registry,
        }
    }

    pub fn lifecycle(&self) -> pr_brancher::BranchLifecycle {
        pr_brancher::BranchLifecycle::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.api) as Arc<dyn PullRequestApi>,
            Arc::clone(&self.commenter) as Arc<dyn Commenter>,
        )
    }

    pub fn tracker(&self) -> pr_brancher::ApprovalTracker {
        pr_brancher::ApprovalTracker::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.api) as Arc<dyn PullRequestApi>,
        )
    }
}
