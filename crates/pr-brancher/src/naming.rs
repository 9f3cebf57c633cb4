//! Versioned branch naming.
//!
//! A pull request from `alice:feature-x` is mirrored into
//! `z_pr/alice/feature-x` on the base repository. The name depends only on
//! the head user and head branch, so every event for the same head resolves to
//! the same branch. Names under `z_pr/alice/feature-x/` are reserved for the
//! incrementing-version scheme and are owned by the same pull request.

use crate::events::PrEvent;
use crate::session::BranchSet;

/// Namespace all versioned branches live under.
pub const BRANCH_PREFIX: &str = "z_pr";

/// How a new versioned branch is allocated on open/synchronize/reopen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchScheme {
    /// One branch per head, force-updated on every push.
    #[default]
    Canonical,
    /// A new `<canonical>/<n>` branch per event, keeping earlier heads around.
    Versioned,
}

/// Canonical versioned branch name for a head user and branch.
#[must_use]
pub fn canonical_name(head_user: &str, head_branch: &str) -> String {
    format!("{BRANCH_PREFIX}/{head_user}/{head_branch}")
}

/// Canonical versioned branch name for a pull request event.
#[must_use]
pub fn canonical_for(pr: &PrEvent) -> String {
    canonical_name(&pr.head.user, &pr.head.branch)
}

/// Whether `branch` belongs to the pull request.
#[must_use]
pub fn belongs_to(pr: &PrEvent, branch: &str) -> bool {
    is_owned_by(&canonical_for(pr), branch)
}

fn is_owned_by(canonical: &str, branch: &str) -> bool {
    branch
        .strip_prefix(canonical)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// All branches in `branches` owned by the pull request, sorted by name.
#[must_use]
pub fn filter_owned(pr: &PrEvent, branches: &BranchSet) -> Vec<String> {
    let canonical = canonical_for(pr);
    let mut owned: Vec<String> = branches
        .names()
        .filter(|name| is_owned_by(&canonical, name))
        .map(str::to_string)
        .collect();
    owned.sort();
    owned
}

/// Smallest unused `<canonical>/<n>` with `n >= 1`.
#[must_use]
pub fn next_versioned_name(pr: &PrEvent, branches: &BranchSet) -> String {
    let canonical = canonical_for(pr);
    let mut version = 1u32;
    loop {
        let name = format!("{canonical}/{version}");
        if !branches.contains(&name) {
            return name;
        }
        version += 1;
    }
}

impl BranchScheme {
    /// Name the next mirror of `pr` should be written to.
    #[must_use]
    pub fn target_name(self, pr: &PrEvent, branches: &BranchSet) -> String {
        match self {
            Self::Canonical => canonical_for(pr),
            Self::Versioned => next_versioned_name(pr, branches),
        }
    }
}
