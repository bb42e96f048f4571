pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use common::Error;
use supervisor::Supervisor;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

/// Control-operation failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match &self.0 {
            Error::Config(_) => (StatusCode::BAD_REQUEST, json!({ "error": self.0.to_string() })),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, json!({ "error": self.0.to_string() })),
            Error::AlreadyRunning { .. } => {
                (StatusCode::CONFLICT, json!({ "error": self.0.to_string() }))
            }
            Error::ProcessLaunch { bot_id, output } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": format!("Bot {bot_id} exited during launch"),
                    "output": output,
                }),
            ),
            other => {
                error!("Control request failed: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": other.to_string() }),
                )
            }
        };
        (code, Json(body)).into_response()
    }
}

/// The control router with every route mounted.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::bots_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve the control API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Control API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use common::SupervisorConfig;

    use super::*;

    fn state(root: &Path, script: &str) -> AppState {
        let cfg = SupervisorConfig {
            data_dir: root.join("data"),
            sessions_dir: root.join("sessions"),
            models_dir: root.join("models"),
            agent_config_path: root.join("agent.toml"),
            launch_grace: Duration::from_millis(300),
            terminate_timeout: Duration::from_millis(500),
            status_delete_backoff: Duration::from_millis(10),
            worker_bin: Some(PathBuf::from("/bin/sh")),
            worker_args: vec!["-c".into(), script.into(), "sh".into()],
            ..SupervisorConfig::default()
        };
        AppState {
            supervisor: Arc::new(Supervisor::new(cfg).unwrap()),
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn start_stop_and_status_round() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), "exec sleep 30"));

        let (code, body) = call(&app, Method::POST, "/start_bot", Some(json!({ "bot_id": "b1" }))).await;
        assert_eq!(code, StatusCode::OK, "{body}");
        assert_eq!(body["running"], true);

        let (code, _) = call(&app, Method::POST, "/start_bot", Some(json!({ "bot_id": "b1" }))).await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, body) = call(&app, Method::GET, "/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["b1"]["running"], true);
        assert_eq!(body["b1"]["file_status"], "not_yet_created");

        let (code, _) = call(&app, Method::POST, "/stop_bot", Some(json!({ "bot_id": "b1" }))).await;
        assert_eq!(code, StatusCode::OK);

        let (code, _) = call(&app, Method::POST, "/stop_bot", Some(json!({ "bot_id": "b1" }))).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_requests_are_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), "exec sleep 30"));

        let (code, body) = call(&app, Method::POST, "/start_bot", Some(json!({ "symbol": "EURUSD" }))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("bot_id"));

        let (code, _) = call(
            &app,
            Method::POST,
            "/start_bot",
            Some(json!({ "bot_id": "b2", "mode": "paper" })),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = call(&app, Method::POST, "/stop_bot", Some(json!({}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(app_registered(&app).await, 0);
    }

    async fn app_registered(app: &Router) -> u64 {
        let (_, body) = call(app, Method::GET, "/health", None).await;
        body["registered_bots"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn launch_failure_is_500_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), "echo 'no such dataset' >&2; exit 2"));

        let (code, body) = call(&app, Method::POST, "/start_bot", Some(json!({ "bot_id": "b3" }))).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["output"].as_str().unwrap().contains("no such dataset"));
    }

    #[tokio::test]
    async fn datasets_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), "exit 0"));
        std::fs::write(dir.path().join("data/eurusd_1d.csv"), "").unwrap();

        let (code, body) = call(&app, Method::GET, "/list_datasets", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!(["eurusd_1d.csv"]));

        let (code, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
