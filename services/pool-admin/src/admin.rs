//! Admin API for cache and credential management
//!
//! Served next to `/health` and `/metrics` on the admin listener (default
//! 127.0.0.1:9090). Not meant to be exposed beyond the host or cluster.
//!
//! Endpoints:
//! - GET  /admin/credentials                 list credentials with partition and status
//! - POST /admin/credentials/{index}/healthy return a credential to routing
//! - POST /admin/cache/invalidate            drop entries matching a pattern, or all

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::{info, warn};

use client_pool::{Error, WorkspacePool};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<WorkspacePool>,
}

impl AdminState {
    pub fn new(pool: Arc<WorkspacePool>) -> Self {
        Self { pool }
    }
}

/// Build the admin axum router with all management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/credentials", get(list_credentials))
        .route("/admin/credentials/{index}/healthy", post(mark_healthy))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /admin/credentials: every credential with its partition, status and
/// calls in the current window. Never exposes keys.
async fn list_credentials(State(state): State<AdminState>) -> impl IntoResponse {
    let health = state.pool.health();
    let credentials = health
        .get("credentials")
        .cloned()
        .unwrap_or(serde_json::json!([]));

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "credentials": credentials,
            "partitions": health["partitions"],
        }),
    )
}

/// POST /admin/credentials/{index}/healthy: the external re-check hook.
///
/// `changed` is false when the credential was already healthy.
async fn mark_healthy(State(state): State<AdminState>, Path(index): Path<usize>) -> impl IntoResponse {
    match state.pool.mark_healthy(index) {
        Ok(changed) => json_response(
            StatusCode::OK,
            serde_json::json!({ "index": index, "changed": changed }),
        ),
        Err(Error::NotFound(_)) => {
            warn!(index, "mark-healthy requested for unknown credential");
            json_response(
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": format!("credential {index} not found") }),
            )
        }
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": e.to_string() }),
        ),
    }
}

/// Request body for cache invalidation. A missing pattern clears everything.
#[derive(Debug, Default, Deserialize)]
struct InvalidateRequest {
    #[serde(default)]
    pattern: Option<String>,
}

/// POST /admin/cache/invalidate: `{"pattern": "..."}` drops keys containing
/// the pattern, `{}` drops all. Returns the number of entries removed.
async fn invalidate_cache(State(state): State<AdminState>, body: axum::body::Bytes) -> impl IntoResponse {
    let request: InvalidateRequest = if body.is_empty() {
        InvalidateRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({ "error": format!("invalid request body: {e}") }),
                );
            }
        }
    };

    if request.pattern.as_deref().is_some_and(str::is_empty) {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "pattern must not be empty; omit it to clear the cache" }),
        );
    }

    let removed = state.pool.invalidate_cache(request.pattern.as_deref());
    info!(pattern = request.pattern.as_deref().unwrap_or("*"), removed, "admin cache invalidation");

    json_response(
        StatusCode::OK,
        serde_json::json!({ "removed": removed, "pattern": request.pattern }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use client_pool::{CacheCategory, Outcome, PoolConfig};
    use credentials::{CredentialBundle, PartitionSplit};
    use remote::MemoryBackend;
    use tower::ServiceExt;

    fn test_pool(n: usize) -> Arc<WorkspacePool> {
        let bundles = (0..n)
            .map(|i| CredentialBundle::new(format!("c{i}"), format!("svc{i}@example.iam"), format!("key-{i}")))
            .collect();
        let config = PoolConfig {
            split: PartitionSplit::count(1),
            ..PoolConfig::default()
        };
        Arc::new(WorkspacePool::from_bundles(config, bundles, &MemoryBackend::new()).unwrap())
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn list_credentials_reports_partitions_without_keys() {
        let app = build_admin_router(AdminState::new(test_pool(3)));

        let (status, json) = send(
            app,
            Request::builder()
                .uri("/admin/credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let credentials = json["credentials"].as_array().unwrap();
        assert_eq!(credentials.len(), 3);
        assert_eq!(credentials[0]["partition"], "interactive");
        assert_eq!(credentials[1]["partition"], "background");
        assert_eq!(credentials[2]["status"], "healthy");
        assert_eq!(json["partitions"]["interactive"], 1);
        assert_eq!(json["partitions"]["background"], 2);
        // Keys are never exposed
        assert!(!json.to_string().contains("key-0"));
    }

    #[tokio::test]
    async fn mark_healthy_restores_credential() {
        let pool = test_pool(2);
        pool.store().get(1).unwrap().mark_unhealthy();
        let app = build_admin_router(AdminState::new(pool.clone()));

        let (status, json) = send(app.clone(), post_json("/admin/credentials/1/healthy", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["changed"], true);
        assert!(pool.store().get(1).unwrap().is_healthy());

        let (status, json) = send(app, post_json("/admin/credentials/1/healthy", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["changed"], false, "already healthy");
    }

    #[tokio::test]
    async fn mark_healthy_unknown_index_is_not_found() {
        let app = build_admin_router(AdminState::new(test_pool(2)));
        let (status, json) = send(app, post_json("/admin/credentials/7/healthy", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("7"));
    }

    #[tokio::test]
    async fn invalidate_with_pattern_removes_matching_entries() {
        let pool = test_pool(1);
        pool.cache().set("children:f1", Outcome::Done, CacheCategory::Listing);
        pool.cache().set("meta:f1", Outcome::Done, CacheCategory::Metadata);
        pool.cache().set("meta:f2", Outcome::Done, CacheCategory::Metadata);
        let app = build_admin_router(AdminState::new(pool.clone()));

        let (status, json) = send(app, post_json("/admin/cache/invalidate", r#"{"pattern": "f1"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], 2);
        assert_eq!(json["pattern"], "f1");
        assert!(pool.cache().contains_key("meta:f2"));
    }

    #[tokio::test]
    async fn invalidate_without_pattern_clears_everything() {
        let pool = test_pool(1);
        pool.cache().set("children:f1", Outcome::Done, CacheCategory::Listing);
        pool.cache().set("meta:f2", Outcome::Done, CacheCategory::Metadata);
        let app = build_admin_router(AdminState::new(pool.clone()));

        let (status, json) = send(app.clone(), post_json("/admin/cache/invalidate", "{}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], 2);
        assert!(json["pattern"].is_null());
        assert!(pool.cache().is_empty());

        // An empty body is the same request
        let (status, json) = send(app, post_json("/admin/cache/invalidate", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], 0);
    }

    #[tokio::test]
    async fn invalidate_rejects_malformed_and_empty_patterns() {
        let app = build_admin_router(AdminState::new(test_pool(1)));

        let (status, _) = send(app.clone(), post_json("/admin/cache/invalidate", "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(app, post_json("/admin/cache/invalidate", r#"{"pattern": ""}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("pattern"));
    }
}
