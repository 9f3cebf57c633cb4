//! Retargeting of pull requests based on deleted versioned branches.

use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::events::RepositoryIdentity;
use crate::github::{Commenter, PullRequestApi};

/// A dependent pull request whose base was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedDependent {
    pub number: u64,
    pub html_url: String,
    /// Deleted branch the pull request was based on.
    pub old_base: String,
    pub new_base: String,
}

/// The closed pull request whose branches were deleted.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub repo: &'a RepositoryIdentity,
    pub number: u64,
    pub html_url: &'a str,
}

/// Moves open pull requests off deleted branches onto a new base.
#[derive(Clone)]
pub struct DependentUpdater {
    api: Arc<dyn PullRequestApi>,
    commenter: Arc<dyn Commenter>,
}

impl DependentUpdater {
    pub fn new(api: Arc<dyn PullRequestApi>, commenter: Arc<dyn Commenter>) -> Self {
        Self { api, commenter }
    }

    /// Rebase every open pull request based on one of `deleted` onto `new_base`.
    ///
    /// The first list or edit failure is commented on the originating pull
    /// request and returned. Dependents already retargeted stay retargeted.
    #[instrument(skip_all, fields(repo = %origin.repo, pr = origin.number, new_base))]
    pub async fn update(
        &self,
        origin: Origin<'_>,
        deleted: &[String],
        new_base: &str,
    ) -> Result<Vec<UpdatedDependent>> {
        let mut updated = Vec::new();

        for branch in deleted {
            let pulls = match self.api.list_pulls_with_base(origin.repo, branch).await {
                Ok(pulls) => pulls,
                Err(e) => {
                    error!(branch = %branch, error = %e, "Error fetching dependent PRs");
                    self.commenter
                        .comment(
                            origin.repo,
                            origin.number,
                            &format!("Error fetching dependent PRs for {branch}: {e}"),
                        )
                        .await;
                    return Err(e.into());
                }
            };

            for dependent in pulls {
                self.commenter
                    .comment(
                        origin.repo,
                        origin.number,
                        &format!("Updating dependent PR: {}", dependent.html_url),
                    )
                    .await;

                if let Err(e) = self
                    .api
                    .edit_base(origin.repo, dependent.number, new_base)
                    .await
                {
                    error!(dependent = %dependent.html_url, error = %e, "Error updating dependent PR");
                    self.commenter
                        .comment(
                            origin.repo,
                            origin.number,
                            &format!("Error updating dependent PR: {} : {e}", dependent.html_url),
                        )
                        .await;
                    return Err(e.into());
                }

                self.commenter
                    .comment(
                        origin.repo,
                        dependent.number,
                        &format!(
                            "The base of this PR has been updated to {new_base}\n\
                             Please rebase this branch and remove {} related commits",
                            origin.html_url
                        ),
                    )
                    .await;

                info!(dependent = dependent.number, old_base = %branch, "Dependent PR retargeted");
                updated.push(UpdatedDependent {
                    number: dependent.number,
                    html_url: dependent.html_url,
                    old_base: branch.clone(),
                    new_base: new_base.to_string(),
                });
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{GitHubError, MockCommenter, MockPullRequestApi, PullBase, PullSummary};
    use mockall::predicate::eq;

    fn repo() -> RepositoryIdentity {
        RepositoryIdentity::new("org", "repo")
    }

    fn pull(number: u64, base: &str) -> PullSummary {
        PullSummary {
            number,
            html_url: format!("https://github.com/org/repo/pull/{number}"),
            base: PullBase {
                ref_name: base.to_string(),
            },
        }
    }

    fn origin(repo: &RepositoryIdentity) -> Origin<'_> {
        Origin {
            repo,
            number: 42,
            html_url: "https://github.com/org/repo/pull/42",
        }
    }

    #[tokio::test]
    async fn test_no_dependents() {
        let mut api = MockPullRequestApi::new();
        api.expect_list_pulls_with_base()
            .times(1)
            .returning(|_, _| Ok(vec![]));
        api.expect_edit_base().never();
        let mut commenter = MockCommenter::new();
        commenter.expect_comment().never();

        let updater = DependentUpdater::new(Arc::new(api), Arc::new(commenter));
        let repo = repo();
        let updated = updater
            .update(origin(&repo), &["z_pr/alice/feature-x".to_string()], "main")
            .await
            .unwrap();
        assert!(updated.is_empty());
    }

    #[tokio::test]
    async fn test_dependent_is_retargeted_and_both_prs_commented() {
        let mut api = MockPullRequestApi::new();
        api.expect_list_pulls_with_base()
            .withf(|_, base| base == "z_pr/alice/feature-x")
            .returning(|_, base| Ok(vec![pull(43, base)]));
        api.expect_edit_base()
            .with(eq(repo()), eq(43), eq("main"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut commenter = MockCommenter::new();
        commenter
            .expect_comment()
            .withf(|_, number, body| {
                *number == 42 && body == "Updating dependent PR: https://github.com/org/repo/pull/43"
            })
            .times(1)
            .return_const(());
        commenter
            .expect_comment()
            .withf(|_, number, body| {
                *number == 43
                    && body.starts_with("The base of this PR has been updated to main\n")
                    && body.contains("https://github.com/org/repo/pull/42")
            })
            .times(1)
            .return_const(());

        let updater = DependentUpdater::new(Arc::new(api), Arc::new(commenter));
        let repo = repo();
        let updated = updater
            .update(origin(&repo), &["z_pr/alice/feature-x".to_string()], "main")
            .await
            .unwrap();
        assert_eq!(
            updated,
            vec![UpdatedDependent {
                number: 43,
                html_url: "https://github.com/org/repo/pull/43".to_string(),
                old_base: "z_pr/alice/feature-x".to_string(),
                new_base: "main".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_edit_failure_aborts_remaining_dependents() {
        let mut api = MockPullRequestApi::new();
        api.expect_list_pulls_with_base()
            .times(1)
            .returning(|_, base| Ok(vec![pull(43, base), pull(44, base)]));
        api.expect_edit_base()
            .with(eq(repo()), eq(43), eq("main"))
            .times(1)
            .returning(|_, _, _| {
                Err(GitHubError::Api {
                    status: 422,
                    message: "Validation Failed".to_string(),
                })
            });

        let mut commenter = MockCommenter::new();
        commenter
            .expect_comment()
            .withf(|_, number, body| *number == 42 && body.starts_with("Updating dependent PR"))
            .times(1)
            .return_const(());
        commenter
            .expect_comment()
            .withf(|_, number, body| {
                *number == 42 && body.starts_with("Error updating dependent PR")
            })
            .times(1)
            .return_const(());

        let updater = DependentUpdater::new(Arc::new(api), Arc::new(commenter));
        let repo = repo();
        let result = updater
            .update(origin(&repo), &["z_pr/alice/feature-x".to_string()], "main")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_failure_is_commented_and_returned() {
        let mut api = MockPullRequestApi::new();
        api.expect_list_pulls_with_base().times(1).returning(|_, _| {
            Err(GitHubError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        });
        let mut commenter = MockCommenter::new();
        commenter
            .expect_comment()
            .withf(|_, number, body| {
                *number == 42 && body.starts_with("Error fetching dependent PRs for z_pr/alice/x")
            })
            .times(1)
            .return_const(());

        let updater = DependentUpdater::new(Arc::new(api), Arc::new(commenter));
        let repo = repo();
        let result = updater
            .update(
                origin(&repo),
                &["z_pr/alice/x".to_string(), "z_pr/alice/x/1".to_string()],
                "main",
            )
            .await;
        assert!(result.is_err());
    }
}
