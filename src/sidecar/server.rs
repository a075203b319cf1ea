//! HTTP surface for the update sidecar (C9), ported route-for-route
//! from the reference sidecar's `server.py`: `/health` is always 200
//! and unauthenticated; every other route requires a matching
//! `X-Updater-Secret` header and reports `409` while an update is
//! already in flight.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::sidecar::auth::validate_secret;
use crate::sidecar::models::{DiagnosticsResponse, ErrorBody, HistoryResponse, RollbackRequest, SidecarStatus, UpdateRequest, UpdateResult};
use crate::update::{ExecutorError, UpdateExecutor};

#[derive(Clone)]
pub struct SidecarState {
    pub executor: Arc<UpdateExecutor>,
    pub secret: Arc<String>,
}

pub fn router(state: SidecarState) -> Router {
    let protected = Router::new()
        .route("/status", get(status))
        .route("/update/apply", post(apply))
        .route("/update/rollback", post(rollback))
        .route("/update/history", get(history))
        .route("/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: SidecarState, bind: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind, "updater sidecar listening");
    axum::serve(listener, router(state)).await
}

async fn require_secret(State(state): State<SidecarState>, headers: HeaderMap, request: axum::extract::Request, next: Next) -> Response {
    let provided = headers.get("x-updater-secret").and_then(|v| v.to_str().ok()).unwrap_or("");
    if validate_secret(&state.secret, provided) {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: "invalid or missing X-Updater-Secret".to_string() })).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<SidecarState>) -> impl IntoResponse {
    Json(SidecarStatus {
        state: state.executor.state(),
        current_operation: state.executor.current_operation(),
        last_result: state.executor.last_result().as_ref().map(UpdateResult::from),
        uptime_seconds: state.executor.uptime_seconds(),
    })
}

async fn apply(State(state): State<SidecarState>, Json(req): Json<UpdateRequest>) -> Response {
    match state.executor.apply_update(&req.tag, req.version.as_deref()).await {
        // §4.9: 409 is reserved for a concurrent-operation conflict; a
        // completed attempt is 200 regardless of whether it succeeded,
        // failed, or rolled back — the caller reads `status` for that.
        Ok(record) => (StatusCode::OK, Json(UpdateResult::from(&record))).into_response(),
        Err(ExecutorError::Busy) => {
            (StatusCode::CONFLICT, Json(ErrorBody { error: "an update is already in progress".to_string() })).into_response()
        }
        Err(ExecutorError::Core(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response()
        }
    }
}

async fn rollback(State(state): State<SidecarState>, Json(req): Json<RollbackRequest>) -> Response {
    match state.executor.rollback(&req.previous_sha).await {
        Ok(record) => (StatusCode::OK, Json(UpdateResult::from(&record))).into_response(),
        Err(ExecutorError::Busy) => {
            (StatusCode::CONFLICT, Json(ErrorBody { error: "an update is already in progress".to_string() })).into_response()
        }
        Err(ExecutorError::Core(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response()
        }
    }
}

async fn history(State(state): State<SidecarState>) -> impl IntoResponse {
    let entries = state.executor.history();
    Json(HistoryResponse {
        entries: entries.iter().map(Into::into).collect(),
    })
}

async fn diagnostics(State(state): State<SidecarState>) -> impl IntoResponse {
    Json(DiagnosticsResponse {
        diagnostics: state.executor.diagnostics().await,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::UpdateConfig;
    use crate::events::EventBus;
    use crate::update::HealthCheckConfig;

    fn test_state() -> SidecarState {
        let config = UpdateConfig {
            project_dir: "/tmp".to_string(),
            compose_file: "/tmp/docker-compose.yml".to_string(),
            health_urls: String::new(),
            updater_secret_path: "/tmp/.secret".to_string(),
            services: vec!["skill-runtime".to_string()],
            sidecar_bind: "0.0.0.0:9090".to_string(),
            history_db_path: None,
        };
        let executor = Arc::new(UpdateExecutor::new(
            &config,
            Duration::from_secs(1),
            Duration::from_secs(1),
            HealthCheckConfig {
                retries: 1,
                delay: Duration::from_millis(1),
                timeout: Duration::from_millis(50),
            },
            None,
            Arc::new(EventBus::new(16)),
        ));
        SidecarState {
            executor,
            secret: Arc::new("test-secret".to_string()),
        }
    }

    #[tokio::test]
    async fn health_requires_no_auth() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_without_secret_is_unauthorized() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_with_correct_secret_succeeds() {
        let app = router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .header("x-updater-secret", "test-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
