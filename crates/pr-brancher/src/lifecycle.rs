//! Branch lifecycle state machine.
//!
//! Pull request events are mapped onto one of three transitions by [`plan`]:
//! mirror the head into a versioned branch, ignore a local-branch PR, or
//! close every branch the PR owns. Each transition runs with the base
//! repository's session locked from the first git call to the last comment.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::dependents::{DependentUpdater, Origin, UpdatedDependent};
use crate::error::{BrancherError, Result};
use crate::events::{PrAction, PrEvent};
use crate::git::{head_remote, CommitHash, ORIGIN};
use crate::github::{Commenter, PullRequestApi};
use crate::naming::{self, BranchScheme};
use crate::registry::SessionRegistry;

pub const LOCAL_BRANCH_COMMENT: &str =
    "I see this PR is using the local branch workflow, ignoring it on my side. Have fun!";

/// What an event does to the base repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Create or update the versioned branch at the head commit.
    MirrorHead,
    /// Head branch lives in the base repository; nothing to mirror.
    IgnoreLocalBranch { notify: bool },
    /// Delete the PR's branches and retarget dependent PRs.
    CloseBranches,
}

/// Select the transition for `pr`.
///
/// Local-branch PRs are told once, when opened, unless a bot opened them.
#[must_use]
pub fn plan(pr: &PrEvent) -> Transition {
    match pr.action {
        PrAction::Closed => Transition::CloseBranches,
        PrAction::Opened | PrAction::Synchronize | PrAction::Reopened if pr.is_local_branch() => {
            Transition::IgnoreLocalBranch {
                notify: pr.action == PrAction::Opened && !pr.head.is_bot,
            }
        }
        PrAction::Opened | PrAction::Synchronize | PrAction::Reopened => Transition::MirrorHead,
    }
}

/// Result of handling one pull request event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Mirrored {
        branch: String,
        hash: CommitHash,
        created: bool,
    },
    IgnoredLocalBranch,
    Closed {
        deleted: Vec<String>,
        dependents: Vec<UpdatedDependent>,
    },
}

/// Drives pull request events against the base repositories.
pub struct BranchLifecycle {
    registry: Arc<SessionRegistry>,
    commenter: Arc<dyn Commenter>,
    dependents: DependentUpdater,
    scheme: BranchScheme,
}

impl BranchLifecycle {
    pub fn new(
        registry: Arc<SessionRegistry>,
        api: Arc<dyn PullRequestApi>,
        commenter: Arc<dyn Commenter>,
    ) -> Self {
        Self {
            registry,
            dependents: DependentUpdater::new(api, Arc::clone(&commenter)),
            commenter,
            scheme: BranchScheme::default(),
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: BranchScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Apply `pr` to its base repository.
    #[instrument(
        skip_all,
        fields(repo = %pr.base.repo_full_name, pr = pr.number, action = %pr.action)
    )]
    pub async fn handle(&self, pr: &PrEvent) -> Result<LifecycleOutcome> {
        let transition = plan(pr);
        info!(
            head = %format!("{}:{}", pr.head.user, pr.head.branch),
            base = %pr.base.branch,
            ?transition,
            "Handling pull request"
        );

        match transition {
            Transition::IgnoreLocalBranch { notify } => {
                if notify {
                    let repo = pr.base_identity()?;
                    self.commenter
                        .comment(&repo, pr.number, LOCAL_BRANCH_COMMENT)
                        .await;
                }
                info!("Local branch pull request ignored");
                Ok(LifecycleOutcome::IgnoredLocalBranch)
            }
            Transition::MirrorHead => self.mirror_head(pr).await,
            Transition::CloseBranches => self.close_branches(pr).await,
        }
    }

    async fn mirror_head(&self, pr: &PrEvent) -> Result<LifecycleOutcome> {
        if pr.head.repo_url.is_empty() {
            return Err(BrancherError::git(
                "remote",
                format!("head repository of PR #{} is not available", pr.number),
            ));
        }

        let repo = pr.base_identity()?;
        let session = self.registry.get_or_create(&repo, &pr.base.repo_url).await?;
        let mut copy = session.lock().await;

        copy.ensure_remote_and_fetch(&head_remote(&pr.head.user), &pr.head.repo_url)
            .await?;
        let branches = copy.list_branches(ORIGIN).await?;
        let branch = self.scheme.target_name(pr, &branches);
        let created = !branches.contains(&branch);

        let hash = copy.create_or_update_branch(&branch, &pr.head.sha).await?;
        copy.publish(ORIGIN, &branch).await?;

        let verb = if created { "created a new" } else { "updated the" };
        self.commenter
            .comment(
                &repo,
                pr.number,
                &format!("I have {verb} branch for this PR: {branch} at {hash}"),
            )
            .await;

        info!(branch = %branch, %hash, created, "Head mirrored");
        Ok(LifecycleOutcome::Mirrored {
            branch,
            hash,
            created,
        })
    }

    async fn close_branches(&self, pr: &PrEvent) -> Result<LifecycleOutcome> {
        let repo = pr.base_identity()?;
        let session = self.registry.get_or_create(&repo, &pr.base.repo_url).await?;
        let copy = session.lock().await;

        let branches = copy.list_branches(ORIGIN).await?;
        let deleted = naming::filter_owned(pr, &branches);
        if deleted.is_empty() {
            warn!("Pull request owns no versioned branches");
        }
        copy.delete_remote_branches(ORIGIN, &deleted).await?;

        let origin = Origin {
            repo: &repo,
            number: pr.number,
            html_url: &pr.html_url,
        };
        let dependents = self
            .dependents
            .update(origin, &deleted, &pr.base.branch)
            .await?;

        if !deleted.is_empty() {
            self.commenter
                .comment(&repo, pr.number, &closed_comment(&deleted, &dependents))
                .await;
        }

        info!(deleted = ?deleted, dependents = dependents.len(), "Branches closed");
        Ok(LifecycleOutcome::Closed {
            deleted,
            dependents,
        })
    }
}

fn closed_comment(deleted: &[String], dependents: &[UpdatedDependent]) -> String {
    let mut body = format!("Closed branches: [{}]\n", deleted.join(", "));
    if dependents.is_empty() {
        body.push_str("Updated dependent PRs: none");
    } else {
        body.push_str("Updated dependent PRs:");
        for dependent in dependents {
            body.push_str(&format!("\n- {} (now based on {})", dependent.html_url, dependent.new_base));
        }
    }
    body
}
