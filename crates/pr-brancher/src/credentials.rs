//! Credential acquisition.
//!
//! Each credential is looked up in the environment first and then in the
//! service's Kubernetes secret (`pr-brancher-secrets` by default).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, GitTransport};
use crate::error::{BrancherError, Result};

pub const GITHUB_TOKEN_KEY: &str = "githubToken";
pub const SSH_KEY_KEY: &str = "ssh_pk";
pub const WEBHOOK_SECRET_KEY: &str = "webhookSecret";

const WEBHOOK_SECRET_LEN: usize = 64;

/// Key/value store backing the credentials secret.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Secret name, for messages.
    fn name(&self) -> &str;

    /// Current contents of the secret.
    async fn read(&self) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Set `key` to `value` and write the secret back.
    async fn store(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// [`SecretStore`] backed by a Kubernetes `Secret`.
pub struct KubeSecretStore {
    api: Api<Secret>,
    name: String,
}

impl KubeSecretStore {
    /// Connect using the in-cluster (or kubeconfig) client.
    pub async fn connect(namespace: &str, name: &str) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| BrancherError::Credentials(format!("kubernetes client: {e}")))?;
        Ok(Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        })
    }

    async fn get(&self) -> Result<Secret> {
        self.api.get(&self.name).await.map_err(|e| {
            BrancherError::Credentials(format!("failed to get secret {}: {e}", self.name))
        })
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let secret = self.get().await?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut secret = self.get().await?;
        secret
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), ByteString(value.to_vec()));
        self.api
            .replace(&self.name, &PostParams::default(), &secret)
            .await
            .map_err(|e| {
                BrancherError::Credentials(format!("failed to update secret {}: {e}", self.name))
            })?;
        Ok(())
    }
}

/// Credentials the service runs with.
#[derive(Clone)]
pub struct Credentials {
    pub github_token: String,
    /// Private key file for the ssh transport.
    pub ssh_key: Option<PathBuf>,
    /// Webhook signing secret. `None` disables signature verification.
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"[REDACTED]")
            .field("ssh_key", &self.ssh_key)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn utf8_entry(data: &BTreeMap<String, Vec<u8>>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
        .map(|s| s.trim_end_matches('\n').to_string())
}

/// Random alphanumeric webhook secret.
#[must_use]
pub fn generate_webhook_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WEBHOOK_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Write an SSH private key to `<work_dir>/.ssh/id_pk` with owner-only permissions.
pub async fn write_ssh_key(work_dir: &Path, key: &[u8]) -> Result<PathBuf> {
    let dir = work_dir.join(".ssh");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join("id_pk");
    tokio::fs::write(&path, key).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(path)
}

/// Load every credential the configured transport needs.
pub async fn load(config: &Config, store: Option<&dyn SecretStore>) -> Result<Credentials> {
    let mut secret_data: Option<BTreeMap<String, Vec<u8>>> = None;

    let github_token = if let Some(token) = env_value("GITHUB_TOKEN") {
        info!("GitHub token obtained from GITHUB_TOKEN");
        token
    } else {
        let data = fetch(store, &mut secret_data, "GITHUB_TOKEN").await?;
        let token = utf8_entry(data, GITHUB_TOKEN_KEY)
            .ok_or_else(|| missing_key(store, GITHUB_TOKEN_KEY))?;
        info!("GitHub token obtained from kubernetes secret");
        token
    };

    let ssh_key = match (env_value("SSH_PK"), config.git_transport) {
        (Some(path), _) => {
            let path = PathBuf::from(path);
            if !tokio::fs::try_exists(&path).await? {
                return Err(BrancherError::Credentials(format!(
                    "SSH_PK points at missing file {}",
                    path.display()
                )));
            }
            info!(path = %path.display(), "SSH private key obtained from SSH_PK");
            Some(path)
        }
        (None, GitTransport::Ssh) => {
            let data = fetch(store, &mut secret_data, "SSH_PK").await?;
            let key = data
                .get(SSH_KEY_KEY)
                .ok_or_else(|| missing_key(store, SSH_KEY_KEY))?;
            let path = write_ssh_key(&config.work_dir, key).await?;
            info!(path = %path.display(), "SSH private key obtained from kubernetes secret");
            Some(path)
        }
        (None, GitTransport::Https) => None,
    };

    let webhook_secret = if let Some(secret) = env_value("WEBHOOK_SECRET") {
        info!("Webhook secret obtained from WEBHOOK_SECRET");
        Some(secret)
    } else if let Some(store) = store {
        let data = fetch(Some(store), &mut secret_data, "WEBHOOK_SECRET").await?;
        if let Some(secret) = utf8_entry(data, WEBHOOK_SECRET_KEY) {
            info!("Webhook secret obtained from kubernetes secret");
            Some(secret)
        } else {
            warn!(
                secret = store.name(),
                key = WEBHOOK_SECRET_KEY,
                "Secret has no webhook secret, generating one"
            );
            let generated = generate_webhook_secret();
            store
                .store(WEBHOOK_SECRET_KEY, generated.as_bytes())
                .await?;
            info!(secret = store.name(), "Webhook secret stored");
            Some(generated)
        }
    } else {
        warn!("No webhook secret configured, signatures will not be verified");
        None
    };

    Ok(Credentials {
        github_token,
        ssh_key,
        webhook_secret,
    })
}

/// Read the secret once and reuse it for later lookups.
async fn fetch<'a>(
    store: Option<&dyn SecretStore>,
    cache: &'a mut Option<BTreeMap<String, Vec<u8>>>,
    env_name: &str,
) -> Result<&'a BTreeMap<String, Vec<u8>>> {
    if cache.is_none() {
        let store = store.ok_or_else(|| {
            BrancherError::Credentials(format!(
                "{env_name} is not set and no kubernetes secret is available"
            ))
        })?;
        *cache = Some(store.read().await?);
    }
    cache
        .as_ref()
        .ok_or_else(|| BrancherError::Credentials("secret cache empty".to_string()))
}

fn missing_key(store: Option<&dyn SecretStore>, key: &str) -> BrancherError {
    let name = store.map_or("<none>", |s| s.name());
    BrancherError::Credentials(format!("secret {name} does not contain {key}"))
}
