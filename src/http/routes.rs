use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::analysis::FeatureFrame;
use crate::pipeline::HealthSnapshot;
use crate::publish::{Freshness, Subscriber};
use crate::telemetry;

use super::{metrics, sse};

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct DebugHttpState {
    frames: Option<Arc<Mutex<Subscriber>>>,
    started_at: Instant,
}

impl DebugHttpState {
    pub fn new(frames: Option<Subscriber>) -> Self {
        Self {
            frames: frames.map(|subscriber| Arc::new(Mutex::new(subscriber))),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn latest_frame(&self) -> Result<(FeatureFrame, u64, Freshness), HttpServerError> {
        let frames = self
            .frames
            .as_ref()
            .ok_or(HttpServerError::ServiceUnavailable("no frame subscriber attached"))?;
        let mut subscriber = frames
            .lock()
            .map_err(|_| HttpServerError::Internal("frame subscriber lock poisoned".into()))?;
        Ok(subscriber.read_with_freshness())
    }
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum HttpServerError {
    ServiceUnavailable(&'static str),
    Internal(String),
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Health endpoint response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub pipeline: Option<HealthSnapshot>,
}

/// Latest-frame endpoint response payload.
#[derive(Debug, Serialize)]
pub struct QualityResponse {
    pub sequence: u64,
    pub fresh: bool,
    pub frame: FeatureFrame,
}

/// Build the Axum router with all handlers.
pub fn build_router(state: DebugHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus))
        .route("/quality", get(quality))
        .route("/events", get(events))
        .with_state(state)
}

/// Run the HTTP server loop.
pub async fn run_http_server(state: DebugHttpState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding debug HTTP listener")?;
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving debug HTTP router")?;
    Ok(())
}

pub async fn health(State(state): State<DebugHttpState>) -> Json<HealthResponse> {
    let pipeline = telemetry::hub().latest_health();
    Json(HealthResponse {
        status: if pipeline.is_some() { "ok" } else { "starting" },
        uptime_ms: state.uptime_ms(),
        pipeline,
    })
}

pub async fn prometheus(State(state): State<DebugHttpState>) -> impl IntoResponse {
    let hub = telemetry::hub();
    let body = metrics::render_prometheus_metrics(
        &hub.snapshot(),
        hub.latest_health().as_ref(),
        state.uptime_ms(),
    );
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub async fn quality(
    State(state): State<DebugHttpState>,
) -> Result<Json<QualityResponse>, HttpServerError> {
    let (frame, sequence, freshness) = state.latest_frame()?;
    Ok(Json(QualityResponse {
        sequence,
        fresh: freshness == Freshness::Fresh,
        frame,
    }))
}

pub async fn events() -> sse::TelemetryStream {
    sse::telemetry_events(telemetry::hub().collector().subscribe())
}

#[cfg(all(test, feature = "debug_http"))]
mod tests {
    use super::*;
    use crate::publish::channel;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("call");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = serde_json::from_slice::<Value>(&bytes).expect("JSON body");
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_status() {
        let (status, json) = get_json(build_router(DebugHttpState::new(None)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["status"] == "ok" || json["status"] == "starting");
        assert!(json["uptime_ms"].is_u64());
    }

    #[tokio::test]
    async fn quality_without_subscriber_is_unavailable() {
        let (status, json) = get_json(build_router(DebugHttpState::new(None)), "/quality").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"], "no frame subscriber attached");
    }

    #[tokio::test]
    async fn quality_returns_latest_frame_then_stale() {
        let (mut publisher, subscriber) = channel::<FeatureFrame>();
        let mut frame = FeatureFrame::default();
        frame.tempo.bpm = 128.0;
        publisher.publish(&frame);

        let router = build_router(DebugHttpState::new(Some(subscriber)));
        let (status, json) = get_json(router.clone(), "/quality").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sequence"], 1);
        assert_eq!(json["fresh"], true);
        assert_eq!(json["frame"]["tempo"]["bpm"], 128.0);
        assert_eq!(json["frame"]["bins_fast"].as_array().map(Vec::len), Some(64));

        let (_, json) = get_json(router, "/quality").await;
        assert_eq!(json["fresh"], false);
    }

    #[tokio::test]
    async fn metrics_render_prometheus_text() {
        let response = build_router(DebugHttpState::new(None))
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("metrics call");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("metrics body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(text.contains("# TYPE lightwave_events_total counter"));
        assert!(text.contains("lightwave_uptime_ms"));
    }

    #[tokio::test]
    async fn events_open_an_sse_stream() {
        let response = build_router(DebugHttpState::new(None))
            .oneshot(Request::builder().uri("/events").body(Body::empty()).expect("request"))
            .await
            .expect("events call");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/event-stream"), "{content_type}");
    }
}
