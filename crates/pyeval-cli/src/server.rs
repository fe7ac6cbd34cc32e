//! HTTP transport for the MCP service
//!
//! A single `POST /mcp` endpoint. Requests come in as JSON, responses go
//! out as JSON; notifications are acknowledged with 202 and no body.

use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpService, INVALID_REQUEST, PARSE_ERROR};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const MCP_PATH: &str = "/mcp";

/// Bound on reading, handling and answering one request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Never shorter than an evaluation is allowed to run
pub fn request_timeout(evaluation: Duration) -> Duration {
    REQUEST_TIMEOUT.max(evaluation + Duration::from_secs(1))
}

pub fn router(service: Arc<McpService>) -> Router {
    let timeout = request_timeout(service.evaluation_timeout());
    router_with_timeout(service, timeout)
}

/// Slow clients and stalled requests get 408 once `timeout` passes
pub fn router_with_timeout(service: Arc<McpService>, timeout: Duration) -> Router {
    Router::new()
        .route(MCP_PATH, post(handle_mcp))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish
pub async fn serve<F>(listener: TcpListener, service: Arc<McpService>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = MCP_PATH, "HTTP MCP server listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_mcp(State(service): State<Arc<McpService>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "unparseable request body");
            return Json(JsonRpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", e),
            ))
            .into_response();
        }
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("invalid request: {}", e),
            ))
            .into_response();
        }
    };

    match service.handle(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use pyeval_core::{EvalInput, EvalResult, Evaluate};
    use pyeval_sandbox::TimeoutRace;
    use serde_json::json;
    use std::time::Instant;
    use tower::ServiceExt;

    struct Constant;

    impl Evaluate for Constant {
        fn evaluate(&self, _input: &EvalInput, _deadline: Instant) -> EvalResult {
            Ok(json!({"answer": 42}).as_object().cloned().unwrap_or_default())
        }
    }

    fn app() -> Router {
        let race = TimeoutRace::new(Arc::new(Constant), Duration::from_secs(5));
        router(Arc::new(McpService::new(race)))
    }

    fn post_json(body: impl Into<String>) -> Request<Body> {
        let body = body.into();
        Request::builder()
            .method(Method::POST)
            .uri(MCP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_tools_call_over_http() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "py-eval", "arguments": {"code": "result = {'answer': 42}"}}
        });
        let response = app().oneshot(post_json(request.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["id"], json!(7));
        assert_eq!(body["result"]["structuredContent"]["result"], json!({"answer": 42}));
    }

    struct Slow;

    impl Evaluate for Slow {
        fn evaluate(&self, _input: &EvalInput, _deadline: Instant) -> EvalResult {
            std::thread::sleep(Duration::from_millis(500));
            Ok(serde_json::Map::new())
        }
    }

    #[tokio::test]
    async fn test_stalled_request_times_out() {
        let race = TimeoutRace::new(Arc::new(Slow), Duration::from_secs(5));
        let app = router_with_timeout(Arc::new(McpService::new(race)), Duration::from_millis(50));
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "py-eval", "arguments": {"code": "pass"}}
        });

        let response = app.oneshot(post_json(request.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_request_timeout_covers_evaluation() {
        assert_eq!(request_timeout(Duration::from_secs(2)), REQUEST_TIMEOUT);
        assert_eq!(request_timeout(Duration::from_secs(30)), Duration::from_secs(31));
    }

    #[tokio::test]
    async fn test_null_id_answered_not_accepted() {
        let request = json!({"jsonrpc": "2.0", "id": null, "method": "ping"});
        let response = app().oneshot(post_json(request.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_notification_accepted() {
        let request = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = app().oneshot(post_json(request.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let response = app().oneshot(post_json("{\"jsonrpc\": ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_non_request_is_invalid_request() {
        let response = app()
            .oneshot(post_json(json!({"jsonrpc": "2.0", "id": 3}).to_string()))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(body["id"], json!(3));

        let response = app().oneshot(post_json("[1, 2, 3]")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(INVALID_REQUEST));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let code = "x".repeat(MAX_BODY_BYTES + 1);
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "py-eval", "arguments": {"code": code}}
        });
        let response = app().oneshot(post_json(request.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_only_post_is_routed() {
        let request = Request::builder()
            .method(Method::GET)
            .uri(MCP_PATH)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/elsewhere")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let race = TimeoutRace::new(Arc::new(Constant), Duration::from_secs(5));
        let service = Arc::new(McpService::new(race));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, service, async move {
            let _ = stop_rx.await;
        }));

        let _ = stop_tx.send(());
        let finished = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));
    }
}
