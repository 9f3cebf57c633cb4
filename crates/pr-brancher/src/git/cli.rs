//! Git operations using shell commands.
//!
//! Uses `tokio::process::Command` for async git operations.

use async_trait::async_trait;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CloneOutcome, CommitHash, GitBackend};
use crate::error::{BrancherError, Result};

/// Credential used for every network operation. Immutable once loaded.
#[derive(Clone)]
pub enum GitAuth {
    /// Rely on whatever the environment provides.
    None,
    /// SSH private key file, used for `git@` transport URLs.
    SshKey(PathBuf),
    /// GitHub token, sent as basic auth for https transport URLs.
    Token(String),
}

impl std::fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SshKey(path) => f.debug_tuple("SshKey").field(path).finish(),
            Self::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// [`GitBackend`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    auth: GitAuth,
    program: String,
}

impl GitCli {
    #[must_use]
    pub fn new(auth: GitAuth) -> Self {
        Self {
            auth,
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable instead of the one on `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        match &self.auth {
            GitAuth::None => {}
            GitAuth::SshKey(key) => {
                // Host keys are not pinned, matching how the service has always run.
                cmd.env(
                    "GIT_SSH_COMMAND",
                    format!(
                        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
                        key.display()
                    ),
                );
            }
            GitAuth::Token(token) => {
                let basic = base64::engine::general_purpose::STANDARD
                    .encode(format!("x-access-token:{token}"));
                cmd.arg("-c")
                    .arg(format!("http.extraHeader=Authorization: Basic {basic}"));
            }
        }
        cmd
    }

    /// Strip credentials from git output before it reaches logs or errors.
    fn redact(&self, text: &str) -> String {
        match &self.auth {
            GitAuth::Token(token) if !token.is_empty() => {
                let basic = base64::engine::general_purpose::STANDARD
                    .encode(format!("x-access-token:{token}"));
                text.replace(token.as_str(), "[REDACTED]")
                    .replace(&basic, "[REDACTED]")
            }
            _ => text.to_string(),
        }
    }

    async fn output(&self, op: &'static str, dir: Option<&Path>, args: &[&str]) -> Result<Output> {
        debug!(op, args = ?args, "Running git");
        self.command(dir)
            .args(args)
            .output()
            .await
            .map_err(|e| BrancherError::git(op, format!("failed to execute git: {e}")))
    }

    async fn run(&self, op: &'static str, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let output = self.output(op, dir, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BrancherError::git(op, self.redact(stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(GitAuth::None)
    }
}

/// Parse `git ls-remote --heads` output into `(branch, hash)` pairs.
pub(crate) fn parse_ls_remote(stdout: &str) -> Vec<(String, CommitHash)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (sha, name) = line.split_once('\t')?;
            let branch = name.trim().strip_prefix("refs/heads/")?;
            match sha.parse::<CommitHash>() {
                Ok(hash) => Some((branch.to_string(), hash)),
                Err(e) => {
                    warn!(line, error = %e, "Skipping unparsable ls-remote line");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl GitBackend for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<CloneOutcome> {
        if tokio::fs::try_exists(dir.join(".git")).await? {
            info!(dir = %dir.display(), "Repository opened from disk");
            return Ok(CloneOutcome::AlreadyExists);
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // A non-empty directory that is not a repository fails here.
        let dir_str = dir.to_string_lossy().into_owned();
        self.run("clone", None, &["clone", url, dir_str.as_str()])
            .await?;
        info!(url = %self.redact(url), dir = %dir.display(), "Repository cloned");
        Ok(CloneOutcome::Cloned)
    }

    async fn set_remote(&self, dir: &Path, name: &str, url: &str) -> Result<()> {
        let output = self
            .output("remote remove", Some(dir), &["remote", "remove", name])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.to_lowercase().contains("no such remote") {
                return Err(BrancherError::git("remote remove", self.redact(stderr.trim())));
            }
        }
        self.run("remote add", Some(dir), &["remote", "add", name, url])
            .await?;
        debug!(remote = name, url = %self.redact(url), "Remote ensured");
        Ok(())
    }

    async fn fetch(&self, dir: &Path, remote: &str) -> Result<()> {
        // git exits 0 when there is nothing new, which covers "already up to date".
        self.run("fetch", Some(dir), &["fetch", "--prune", remote])
            .await?;
        debug!(remote, "Remote fetched");
        Ok(())
    }

    async fn list_remote_branches(
        &self,
        dir: &Path,
        remote: &str,
    ) -> Result<Vec<(String, CommitHash)>> {
        let stdout = self
            .run("ls-remote", Some(dir), &["ls-remote", "--heads", remote])
            .await?;
        Ok(parse_ls_remote(&stdout))
    }

    async fn write_branch_ref(&self, dir: &Path, name: &str, hash: CommitHash) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        let hex = hash.to_hex();
        self.run("update-ref", Some(dir), &["update-ref", refname.as_str(), hex.as_str()])
            .await?;
        Ok(())
    }

    async fn delete_branch_ref(&self, dir: &Path, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        let exists = self
            .output(
                "show-ref",
                Some(dir),
                &["show-ref", "--verify", "--quiet", refname.as_str()],
            )
            .await?
            .status
            .success();
        if exists {
            self.run("update-ref", Some(dir), &["update-ref", "-d", refname.as_str()])
                .await?;
            debug!(branch = name, "Local branch ref deleted");
        }
        Ok(())
    }

    async fn push(&self, dir: &Path, remote: &str, refspecs: &[String]) -> Result<()> {
        let mut args = vec!["push", remote];
        args.extend(refspecs.iter().map(String::as_str));
        self.run("push", Some(dir), &args).await?;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, hash: CommitHash) -> Result<()> {
        let hex = hash.to_hex();
        self.run(
            "checkout",
            Some(dir),
            &["checkout", "--force", "--detach", hex.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn read_file(&self, dir: &Path, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(dir.join(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
