//! Process-wide session cache.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::events::RepositoryIdentity;
use crate::git::GitBackend;
use crate::session::RepositorySession;

/// Maps each repository identity to its single [`RepositorySession`].
///
/// The map is only held for the insert-if-absent step. Cloning and fetching
/// happen under the session's own lock, so a slow first clone of one
/// repository never blocks events for another.
pub struct SessionRegistry {
    sessions: DashMap<RepositoryIdentity, Arc<RepositorySession>>,
    work_root: PathBuf,
    git: Arc<dyn GitBackend>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(work_root: impl Into<PathBuf>, git: Arc<dyn GitBackend>) -> Self {
        Self {
            sessions: DashMap::new(),
            work_root: work_root.into(),
            git,
        }
    }

    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Number of sessions created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session for `identity`, cloning `url` on first use and fetching origin
    /// on every call.
    pub async fn get_or_create(
        &self,
        identity: &RepositoryIdentity,
        url: &str,
    ) -> Result<Arc<RepositorySession>> {
        let session = self.entry(identity);
        {
            let mut copy = session.lock().await;
            copy.prepare(url).await?;
        }
        Ok(session)
    }

    fn entry(&self, identity: &RepositoryIdentity) -> Arc<RepositorySession> {
        if let Some(existing) = self.sessions.get(identity) {
            return Arc::clone(existing.value());
        }
        let session = self
            .sessions
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(repo = %identity, "Registering repository session");
                Arc::new(RepositorySession::new(
                    identity.clone(),
                    &self.work_root,
                    Arc::clone(&self.git),
                ))
            });
        Arc::clone(session.value())
    }
}
