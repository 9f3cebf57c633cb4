//! HTTP server for GitHub webhooks.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::GitTransport;
use crate::error::BrancherError;
use crate::events::{PullRequestPayload, PullRequestReviewPayload};
use crate::lifecycle::{BranchLifecycle, LifecycleOutcome};
use crate::review::{ApprovalOutcome, ApprovalTracker};
use crate::webhooks::{verify_signature, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<BranchLifecycle>,
    pub tracker: Arc<ApprovalTracker>,
    pub transport: GitTransport,
    /// Webhook signing secret. Signatures are not checked when `None`.
    pub webhook_secret: Option<String>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root).fallback(not_found))
        .route("/webhooks", post(github_webhook))
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    ":-)"
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Nothing here...")
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn ignored(event_type: &str) -> Response {
    Json(json!({ "status": "ignored", "event": event_type })).into_response()
}

fn failed(err: &BrancherError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("An error happened: {err}"),
    )
        .into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Invalid webhook payload");
        (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")).into_response()
    })
}

/// Handle incoming GitHub webhooks.
///
/// Verifies the signature when a secret is configured, then dispatches
/// `pull_request` events to the branch lifecycle and `pull_request_review`
/// events to the approval tracker. Every other event is acknowledged and
/// ignored.
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = header(&headers, DELIVERY_HEADER).unwrap_or("unknown");
    let event_type = header(&headers, EVENT_HEADER).unwrap_or("unknown");

    info!(delivery_id = %delivery_id, event_type = %event_type, "Received GitHub webhook");

    if let Some(secret) = &state.webhook_secret {
        let Some(signature) = header(&headers, SIGNATURE_HEADER) else {
            warn!(delivery_id = %delivery_id, "Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED.into_response();
        };
        if !verify_signature(&body, signature, secret) {
            warn!(delivery_id = %delivery_id, "Invalid webhook signature");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match event_type {
        "pull_request" => {
            let payload: PullRequestPayload = match decode(&body) {
                Ok(p) => p,
                Err(response) => return response,
            };
            let Some(event) = payload.to_event(state.transport) else {
                debug!(action = %payload.action, "Pull request action not handled");
                return ignored(event_type);
            };
            match state.lifecycle.handle(&event).await {
                Ok(outcome) => Json(lifecycle_summary(&outcome)).into_response(),
                Err(e) => {
                    error!(delivery_id = %delivery_id, error = %e, "Pull request event failed");
                    failed(&e)
                }
            }
        }
        "pull_request_review" => {
            let payload: PullRequestReviewPayload = match decode(&body) {
                Ok(p) => p,
                Err(response) => return response,
            };
            let event = payload.to_event(state.transport);
            match state.tracker.handle(&event).await {
                Ok(outcome) => Json(review_summary(&outcome)).into_response(),
                Err(e) => {
                    error!(delivery_id = %delivery_id, error = %e, "Review event failed");
                    failed(&e)
                }
            }
        }
        _ => ignored(event_type),
    }
}

fn lifecycle_summary(outcome: &LifecycleOutcome) -> Value {
    match outcome {
        LifecycleOutcome::Mirrored {
            branch,
            hash,
            created,
        } => json!({
            "status": "processed",
            "branch": branch,
            "sha": hash.to_hex(),
            "created": created,
        }),
        LifecycleOutcome::IgnoredLocalBranch => json!({ "status": "ignored", "reason": "local_branch" }),
        LifecycleOutcome::Closed {
            deleted,
            dependents,
        } => json!({
            "status": "processed",
            "deleted": deleted,
            "dependents": dependents.iter().map(|d| d.number).collect::<Vec<_>>(),
        }),
    }
}

fn review_summary(outcome: &ApprovalOutcome) -> Value {
    match outcome {
        ApprovalOutcome::NoPolicy { approvals } => {
            json!({ "status": "processed", "approvals": approvals, "labeled": false })
        }
        ApprovalOutcome::BelowThreshold {
            approvals,
            required,
        } => json!({
            "status": "processed",
            "approvals": approvals,
            "required": required,
            "labeled": false,
        }),
        ApprovalOutcome::Labeled { approvals, label } => json!({
            "status": "processed",
            "approvals": approvals,
            "label": label,
            "labeled": true,
        }),
    }
}
