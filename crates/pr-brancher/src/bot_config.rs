//! Per-repository bot policy.
//!
//! The policy document is read from the repository itself at a specific
//! commit:
//!
//! ```yaml
//! label-approved:
//!   approvals: 2          # default 2
//!   label: ready-to-test  # default "ready-to-test"
//! ```
//!
//! A missing document, an empty one, or one without a `label-approved`
//! section disables labelling on approval.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{BrancherError, Result};
use crate::session::WorkingCopy;

/// Default path of the policy document in the repository.
pub const DEFAULT_POLICY_FILE: &str = ".submarinerbot.yaml";
pub const DEFAULT_APPROVALS: u32 = 2;
pub const DEFAULT_LABEL: &str = "ready-to-test";

/// Label a pull request once it has enough approvals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelApproved {
    pub approvals: u32,
    pub label: String,
}

/// Parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotConfig {
    label_approved: Option<LabelApproved>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBotConfig {
    #[serde(rename = "label-approved", default)]
    label_approved: Option<RawLabelApproved>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLabelApproved {
    approvals: Option<u32>,
    label: Option<String>,
}

impl BotConfig {
    /// Label-on-approval policy, `None` when disabled.
    #[must_use]
    pub fn label_approved(&self) -> Option<&LabelApproved> {
        self.label_approved.as_ref()
    }

    #[must_use]
    pub fn with_label_approved(label_approved: LabelApproved) -> Self {
        Self {
            label_approved: Some(label_approved),
        }
    }

    /// Parse a policy document, applying field defaults.
    pub fn parse(document: &[u8]) -> std::result::Result<Self, serde_yaml::Error> {
        if document.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_slice(document)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        let raw: RawBotConfig = serde_yaml::from_value(value)?;
        Ok(Self {
            label_approved: raw.label_approved.map(|section| LabelApproved {
                approvals: section.approvals.unwrap_or(DEFAULT_APPROVALS),
                label: section.label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            }),
        })
    }
}

/// Reads the policy document from a working copy.
#[derive(Debug, Clone)]
pub struct BotConfigReader {
    path: String,
}

impl Default for BotConfigReader {
    fn default() -> Self {
        Self::new(DEFAULT_POLICY_FILE)
    }
}

impl BotConfigReader {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check out `commit` and parse the policy document found there.
    ///
    /// The checkout rewrites the working tree, so the caller must hold the
    /// session lock for the whole read.
    pub async fn read(&self, copy: &WorkingCopy, commit: &str) -> Result<BotConfig> {
        let Some(document) = copy.read_file_at(commit, &self.path).await? else {
            debug!(repo = %copy.identity(), commit, path = %self.path, "No bot config found");
            return Ok(BotConfig::default());
        };

        let config = BotConfig::parse(&document).map_err(|source| BrancherError::BotConfig {
            path: self.path.clone(),
            commit: commit.to_string(),
            source,
        })?;
        info!(
            repo = %copy.identity(),
            commit,
            label_approved = ?config.label_approved(),
            "Read bot config"
        );
        Ok(config)
    }
}
