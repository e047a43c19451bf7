//! `/lsp/*` route handlers
//!
//! Engine work is blocking SQLite access, so every handler moves onto the
//! blocking pool before touching an instance.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::observability::{Event, Logger};

use super::errors::{SyncError, SyncResult};
use super::protocol::{
    GetRequest, NewRequest, PullRequest, PushRequest, QueryRequest, GET_ROUTE, NEW_ROUTE,
    PULL_ROUTE, PUSH_ROUTE, QUERY_ROUTE,
};
use super::server::ServerState;

pub fn lsp_routes(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(NEW_ROUTE, post(new_handler))
        .route(GET_ROUTE, post(get_handler))
        .route(PUSH_ROUTE, post(push_handler))
        .route(PULL_ROUTE, post(pull_handler))
        .route(QUERY_ROUTE, post(query_handler))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instances: usize,
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.lix_ids() {
        Ok(ids) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                instances: ids.len(),
            }),
        )
            .into_response(),
        Err(err) => failed("/health", err),
    }
}

async fn new_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<NewRequest>, JsonRejection>,
) -> Response {
    respond(NEW_ROUTE, state, body, |state, request| state.create(request)).await
}

async fn get_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<GetRequest>, JsonRejection>,
) -> Response {
    respond(GET_ROUTE, state, body, |state, request| state.get(request)).await
}

async fn push_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Response {
    respond(PUSH_ROUTE, state, body, |state, request| state.push(request)).await
}

async fn pull_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<PullRequest>, JsonRejection>,
) -> Response {
    respond(PULL_ROUTE, state, body, |state, request| state.pull(request)).await
}

async fn query_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    respond(QUERY_ROUTE, state, body, |state, request| state.query(request)).await
}

async fn respond<Req, Resp, F>(
    route: &'static str,
    state: Arc<ServerState>,
    body: Result<Json<Req>, JsonRejection>,
    handle: F,
) -> Response
where
    Req: Send + 'static,
    Resp: Serialize + Send + 'static,
    F: FnOnce(&ServerState, Req) -> SyncResult<Resp> + Send + 'static,
{
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return failed(route, SyncError::InvalidRequest(rejection.body_text()));
        }
    };

    let outcome = tokio::task::spawn_blocking(move || handle(&state, request))
        .await
        .unwrap_or_else(|e| Err(SyncError::Internal(format!("handler panicked: {}", e))));

    match outcome {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => failed(route, err),
    }
}

fn failed(route: &str, err: SyncError) -> Response {
    let status = err.status_code();
    let fields = [
        ("code", err.code()),
        ("route", route),
        ("status", status.as_str()),
    ];
    if status.is_server_error() {
        Logger::error(Event::ServerRequestFailed.as_str(), &fields);
    } else {
        Logger::warn(Event::ServerRequestFailed.as_str(), &fields);
    }
    err.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(router: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let router = lsp_routes(Arc::new(ServerState::new()));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.instances, 0);
    }

    #[tokio::test]
    async fn test_unknown_lix_is_404() {
        let router = lsp_routes(Arc::new(ServerState::new()));
        let (status, body) = call(router, "POST", PULL_ROUTE, json!({"lix_id": "nope"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let router = lsp_routes(Arc::new(ServerState::new()));
        let (status, body) = call(router, "POST", QUERY_ROUTE, json!({"sql": 1})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_mutating_query_is_400() {
        let router = lsp_routes(Arc::new(ServerState::new()));
        let (status, body) = call(
            router,
            "POST",
            QUERY_ROUTE,
            json!({"lix_id": "any", "sql": "INSERT INTO key_value (key, value) VALUES ('a', 'b')"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MUTATION_QUERY_NOT_ALLOWED");
    }
}
