//! GitHub REST client for labels, reviews, pull requests and comments.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use super::{Commenter, GitHubError, PullRequestApi, PullSummary, Review, COMMENT_PREFIX};
use crate::events::RepositoryIdentity;

/// Public GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// GitHub API client shared by every repository the service handles.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a client for the public GitHub API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("pr-brancher/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: GITHUB_API_URL.to_string(),
            token: token.to_string(),
        })
    }

    /// Point the client at another API root (GitHub Enterprise, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, repo: &RepositoryIdentity, rest: &str) -> String {
        format!("{}/repos/{}/{}/{rest}", self.base_url, repo.owner, repo.name)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GitHubError> {
        let response = request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GitHubError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetch every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        for page in 1.. {
            let page_str = page.to_string();
            let per_page = PER_PAGE.to_string();
            let request = self
                .client
                .get(url)
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())]);
            let batch: Vec<T> = Self::decode(self.send(request).await?).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn add_label(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let url = self.repo_url(repo, &format!("issues/{number}/labels"));
        self.send(self.client.post(&url).json(&json!({ "labels": [label] })))
            .await?;
        info!(pr = number, label, "Label added");
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_reviews(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
    ) -> Result<Vec<Review>, GitHubError> {
        let url = self.repo_url(repo, &format!("pulls/{number}/reviews"));
        let reviews: Vec<Review> = self.get_all(&url, &[]).await?;
        debug!(pr = number, count = reviews.len(), "Listed reviews");
        Ok(reviews)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_pulls_with_base(
        &self,
        repo: &RepositoryIdentity,
        base: &str,
    ) -> Result<Vec<PullSummary>, GitHubError> {
        let url = self.repo_url(repo, "pulls");
        let pulls: Vec<PullSummary> = self
            .get_all(&url, &[("state", "open"), ("base", base)])
            .await
            .inspect_err(|e| {
                error!(
                    base,
                    error = %e,
                    "Failed to find pull requests depending on branch"
                );
            })?;
        debug!(base, count = pulls.len(), "Listed pull requests with base");
        Ok(pulls)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn edit_base(
        &self,
        repo: &RepositoryIdentity,
        number: u64,
        base: &str,
    ) -> Result<(), GitHubError> {
        let url = self.repo_url(repo, &format!("pulls/{number}"));
        self.send(self.client.patch(&url).json(&json!({ "base": base })))
            .await?;
        info!(pr = number, base, "Pull request base updated");
        Ok(())
    }
}

#[async_trait]
impl Commenter for GitHubClient {
    async fn comment(&self, repo: &RepositoryIdentity, number: u64, body: &str) {
        // Pull request conversation comments live on the issues API.
        let url = self.repo_url(repo, &format!("issues/{number}/comments"));
        let body = format!("{COMMENT_PREFIX}{body}");
        match self
            .send(self.client.post(&url).json(&json!({ "body": body })))
            .await
        {
            Ok(_) => debug!(repo = %repo, pr = number, "Comment posted"),
            Err(e) => error!(repo = %repo, pr = number, error = %e, "Error commenting on pull request"),
        }
    }
}
