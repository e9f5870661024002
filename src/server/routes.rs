use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::detection::ColorRange;
use crate::encoding::CONTENT_TYPE;
use crate::error::CloakError;
use crate::session::{SessionState, StartOutcome};

const INDEX_HTML: &str = include_str!("index.html");

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/status", get(status_handler))
        .route("/video_feed", get(video_feed_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(default)]
    ranges: Vec<ColorRange>,
}

#[derive(Debug, Serialize)]
struct StatusResponse<T> {
    status: T,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    state: SessionState,
    frames: u64,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

/// `CloakError` as an HTTP response.
struct ApiError(CloakError);

impl From<CloakError> for ApiError {
    fn from(err: CloakError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            CloakError::DeviceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CloakError::InvalidRange(_) => StatusCode::BAD_REQUEST,
            CloakError::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            status: "error",
            message: self.0.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

// ============================================================================
// Control
// ============================================================================

async fn start_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse<StartOutcome>>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice::<StartRequest>(&body)
            .map_err(|e| CloakError::InvalidRange(format!("bad start request: {e}")))?
    };
    let ranges = if request.ranges.is_empty() {
        state.default_ranges.as_ref().clone()
    } else {
        request.ranges
    };

    // opening a camera blocks
    let session = state.session.clone();
    let outcome = tokio::task::spawn_blocking(move || session.start(ranges))
        .await
        .map_err(|e| CloakError::Unrecoverable(format!("start task failed: {e}")))??;

    Ok(Json(StatusResponse { status: outcome }))
}

async fn stop_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse<&'static str>>, ApiError> {
    let session = state.session.clone();
    let outcome = tokio::task::spawn_blocking(move || session.stop())
        .await
        .map_err(|e| CloakError::Unrecoverable(format!("stop task failed: {e}")))?;
    tracing::debug!("Stop outcome: {:?}", outcome);

    Ok(Json(StatusResponse { status: "stopped" }))
}

async fn status_handler(State(state): State<AppState>) -> Json<SessionStatus> {
    let session = &state.session;
    let (frames, width, height) = session
        .latest_encoded()
        .map_or((0, 0, 0), |f| (f.sequence, f.width, f.height));
    Json(SessionStatus {
        state: session.state(),
        frames,
        width,
        height,
    })
}

// ============================================================================
// Streaming
// ============================================================================

async fn video_feed_handler(State(state): State<AppState>) -> Response {
    let chunks = state.session.frame_stream().map(Ok::<_, Infallible>);
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::ScriptedBackend;
    use crate::config::SessionConfig;
    use crate::session::Session;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(backend: std::sync::Arc<ScriptedBackend>) -> (Router, Session) {
        let mut config = SessionConfig::default();
        config.background.frames = 2;
        config.background.settle = Duration::ZERO;
        config.target_fps = 200;
        config.stats_interval = 0;
        config.stop_timeout = Duration::from_secs(2);
        let session = Session::new(backend, config);
        let state = AppState::new(session.clone(), ColorRange::red().to_vec());
        (create_router(state), session)
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: &'static str,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_and_stop_report_status() {
        let (router, session) = app(ScriptedBackend::solid([0, 0, 200]));

        let (code, body) = call(&router, "POST", "/start", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "started");

        let (_, body) = call(&router, "POST", "/start", "").await;
        assert_eq!(body["status"], "already_running");

        let (_, body) = call(&router, "GET", "/status", "").await;
        assert_eq!(body["state"], "running");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let body = loop {
            let (_, body) = call(&router, "GET", "/status", "").await;
            if body["frames"].as_u64().unwrap_or(0) > 0 {
                break body;
            }
            assert!(tokio::time::Instant::now() < deadline, "no frame published");
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(body["width"], 32);
        assert_eq!(body["height"], 24);

        let (code, body) = call(&router, "POST", "/stop", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "stopped");

        let (_, body) = call(&router, "POST", "/stop", "").await;
        assert_eq!(body["status"], "stopped");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_accepts_explicit_ranges() {
        let (router, session) = app(ScriptedBackend::solid([0, 0, 200]));

        let (code, body) = call(
            &router,
            "POST",
            "/start",
            r#"{"ranges":[{"lower":[50,100,50],"upper":[70,255,255]}]}"#,
        )
        .await;
        assert_eq!(code, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "started");
        session.stop();
    }

    #[tokio::test]
    async fn bad_ranges_are_rejected() {
        let (router, session) = app(ScriptedBackend::solid([0, 0, 200]));

        let (code, body) = call(
            &router,
            "POST",
            "/start",
            r#"{"ranges":[{"lower":[90,0,0],"upper":[10,255,255]}]}"#,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (code, _) = call(&router, "POST", "/start", "{not json").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unavailable_camera_is_reported() {
        let backend = ScriptedBackend::solid([0, 0, 200]);
        backend.fail_opens(1);
        let (router, _session) = app(backend);

        let (code, body) = call(&router, "POST", "/start", "").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn video_feed_streams_multipart_jpeg() {
        let (router, session) = app(ScriptedBackend::solid([0, 0, 200]));
        call(&router, "POST", "/start", "").await;

        let response = router
            .clone()
            .oneshot(Request::get("/video_feed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut data = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), data.next())
            .await
            .expect("chunk in time")
            .expect("stream open")
            .unwrap();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));

        let control = session.clone();
        tokio::task::spawn_blocking(move || control.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn index_page_embeds_the_feed() {
        let (router, _session) = app(ScriptedBackend::solid([0, 0, 0]));
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/video_feed"));
    }
}
