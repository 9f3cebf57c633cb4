//! Approval counting and labelling.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::bot_config::BotConfigReader;
use crate::error::Result;
use crate::events::ReviewEvent;
use crate::github::PullRequestApi;
use crate::registry::SessionRegistry;

/// What a review event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// The repository has no `label-approved` policy.
    NoPolicy { approvals: u32 },
    BelowThreshold { approvals: u32, required: u32 },
    Labeled { approvals: u32, label: String },
}

/// Applies the approval label once enough reviewers approved.
pub struct ApprovalTracker {
    registry: Arc<SessionRegistry>,
    api: Arc<dyn PullRequestApi>,
    reader: BotConfigReader,
}

impl ApprovalTracker {
    pub fn new(registry: Arc<SessionRegistry>, api: Arc<dyn PullRequestApi>) -> Self {
        Self {
            registry,
            api,
            reader: BotConfigReader::default(),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, reader: BotConfigReader) -> Self {
        self.reader = reader;
        self
    }

    /// Count approvals on the reviewed pull request and label it when the
    /// policy read at the base commit is satisfied.
    ///
    /// Every review in the `APPROVED` state counts, including repeated
    /// approvals from one reviewer.
    #[instrument(skip_all, fields(repo = %event.repo, pr = event.pr_number))]
    pub async fn handle(&self, event: &ReviewEvent) -> Result<ApprovalOutcome> {
        let reviews = self.api.list_reviews(&event.repo, event.pr_number).await?;
        let approvals = u32::try_from(reviews.iter().filter(|r| r.is_approved()).count())
            .unwrap_or(u32::MAX);
        debug!(reviews = reviews.len(), approvals, "Counted approvals");

        let config = {
            let session = self
                .registry
                .get_or_create(&event.repo, &event.base.repo_url)
                .await?;
            let copy = session.lock().await;
            self.reader.read(&copy, &event.base.sha).await?
        };

        let Some(policy) = config.label_approved() else {
            debug!("No label-approved policy");
            return Ok(ApprovalOutcome::NoPolicy { approvals });
        };

        if approvals < policy.approvals {
            debug!(required = policy.approvals, approvals, "Not enough approvals");
            return Ok(ApprovalOutcome::BelowThreshold {
                approvals,
                required: policy.approvals,
            });
        }

        self.api
            .add_label(&event.repo, event.pr_number, &policy.label)
            .await?;
        info!(label = %policy.label, approvals, "Pull request labeled");
        Ok(ApprovalOutcome::Labeled {
            approvals,
            label: policy.label.clone(),
        })
    }
}
