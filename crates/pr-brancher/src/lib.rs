//! Pull request branch lifecycle bot.
//!
//! This crate provides:
//! - Versioned branch mirroring of pull request heads (`z_pr/<user>/<branch>`)
//! - Per-repository sessions serializing every git mutation
//! - Dependent pull request retargeting when a versioned branch is closed
//! - Approval counting and labelling driven by an in-repository policy file
//! - HTTP server for GitHub webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Most operations touch git or the network

pub mod bot_config;
pub mod config;
pub mod credentials;
pub mod dependents;
pub mod error;
pub mod events;
pub mod git;
pub mod github;
pub mod lifecycle;
pub mod naming;
pub mod registry;
pub mod review;
pub mod server;
pub mod session;
pub mod webhooks;

pub use bot_config::{BotConfig, BotConfigReader, LabelApproved};
pub use config::{Config, GitTransport};
pub use error::{BrancherError, Result};
pub use events::{PrAction, PrEvent, PrSide, RepositoryIdentity, ReviewEvent};
pub use github::{Commenter, GitHubClient, PullRequestApi};
pub use lifecycle::{BranchLifecycle, LifecycleOutcome};
pub use naming::BranchScheme;
pub use registry::SessionRegistry;
pub use review::{ApprovalOutcome, ApprovalTracker};
pub use session::{BranchSet, RepositorySession, WorkingCopy};
