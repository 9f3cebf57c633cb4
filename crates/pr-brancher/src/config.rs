//! Process configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::bot_config::DEFAULT_POLICY_FILE;
use crate::error::{BrancherError, Result};
use crate::events::Repository;
use crate::github::GITHUB_API_URL;
use crate::naming::BranchScheme;

/// Default Kubernetes secret holding the service credentials.
pub const DEFAULT_SECRET_NAME: &str = "pr-brancher-secrets";

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Which repository URL from a webhook payload git talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GitTransport {
    #[default]
    Ssh,
    Https,
}

impl GitTransport {
    /// URL of `repo` for this transport.
    #[must_use]
    pub fn url_of(self, repo: &Repository) -> &str {
        match self {
            Self::Ssh => &repo.ssh_url,
            Self::Https => &repo.clone_url,
        }
    }
}

impl FromStr for GitTransport {
    type Err = BrancherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "https" => Ok(Self::Https),
            other => Err(BrancherError::Config(format!(
                "GIT_TRANSPORT must be ssh or https, got {other:?}"
            ))),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Root directory of the per-repository working copies.
    pub work_dir: PathBuf,
    pub git_transport: GitTransport,
    pub branch_scheme: BranchScheme,
    /// Path of the policy document inside each repository.
    pub bot_config_file: String,
    /// GitHub REST API root.
    pub github_api_url: String,
    /// Namespace of the credentials secret, if running in a cluster.
    pub namespace: Option<String>,
    pub secret_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            work_dir: PathBuf::from("/tmp/git"),
            git_transport: GitTransport::default(),
            branch_scheme: BranchScheme::default(),
            bot_config_file: DEFAULT_POLICY_FILE.to_string(),
            github_api_url: GITHUB_API_URL.to_string(),
            namespace: None,
            secret_name: DEFAULT_SECRET_NAME.to_string(),
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(BrancherError::Config(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match non_empty("PORT") {
            Some(v) => v
                .parse()
                .map_err(|e| BrancherError::Config(format!("invalid PORT {v:?}: {e}")))?,
            None => defaults.port,
        };

        let git_transport = match non_empty("GIT_TRANSPORT") {
            Some(v) => v.parse()?,
            None => defaults.git_transport,
        };

        let branch_scheme = match non_empty("BRANCH_HISTORY") {
            Some(v) if parse_flag("BRANCH_HISTORY", &v)? => BranchScheme::Versioned,
            _ => BranchScheme::Canonical,
        };

        let namespace = non_empty("NAMESPACE").or_else(|| {
            std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
                .ok()
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
        });

        Ok(Self {
            port,
            work_dir: non_empty("WORK_DIR").map_or(defaults.work_dir, PathBuf::from),
            git_transport,
            branch_scheme,
            bot_config_file: non_empty("BOT_CONFIG_FILE").unwrap_or(defaults.bot_config_file),
            github_api_url: non_empty("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            namespace,
            secret_name: non_empty("SECRET_NAME").unwrap_or(defaults.secret_name),
        })
    }
}
