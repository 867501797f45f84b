//! HTTP API and WebSocket live push.
//!
//! Thin consumer surface over the pipeline: every response is the
//! `{success, error, data}` envelope, and internal errors never leak in
//! transport-specific detail — a failed read is "Could not read data from
//! sensor.", nothing more.

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::sensor::now_unix;
use crate::state::AppState;

/// Hours of history served when the `range` parameter is absent or
/// malformed.
const DEFAULT_RANGE_HOURS: i64 = 24;

const DEFAULT_PORT: u16 = 65069;

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    error: Option<String>,
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            error: None,
            data: Some(data),
        })
    }

    fn error(status: StatusCode, message: &str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                error: Some(message.to_string()),
                data: None,
            }),
        )
    }
}

/// Longterm history in columnar form, times formatted for display.
#[derive(Serialize)]
struct LongtermData {
    times: Vec<String>,
    temp: Vec<f64>,
    humidity: Vec<f64>,
    pressure: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/data/now", get(api_now))
        .route("/api/data/longterm", get(api_longterm))
        .route("/api/data/outdoor", get(api_outdoor))
        .route("/ws", get(ws_upgrade))
        .fallback(api_not_found)
        .with_state(state)
}

async fn api_now(State(state): State<AppState>) -> Response {
    match state.reader.get_current().await {
        Ok(reading) => ApiResponse::ok(reading).into_response(),
        Err(e) => {
            warn!("current reading failed: {e}");
            ApiResponse::<()>::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not read data from sensor.",
            )
            .into_response()
        }
    }
}

async fn api_longterm(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hours = parse_range_hours(params.get("range"));

    match state.db.query_range(now_unix(), hours).await {
        Ok(samples) => {
            let mut data = LongtermData {
                times: Vec::with_capacity(samples.len()),
                temp: Vec::with_capacity(samples.len()),
                humidity: Vec::with_capacity(samples.len()),
                pressure: Vec::with_capacity(samples.len()),
            };
            for s in samples {
                data.times.push(format_hm(s.time));
                data.temp.push(s.temp);
                data.humidity.push(s.humidity);
                data.pressure.push(s.pressure);
            }
            ApiResponse::ok(data).into_response()
        }
        Err(e) => {
            error!("longterm query failed: {e}");
            ApiResponse::<()>::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to read longterm monitoring data.",
            )
            .into_response()
        }
    }
}

async fn api_outdoor(State(state): State<AppState>) -> Response {
    match state.outdoor.get().await {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => {
            warn!("outdoor data unavailable: {e}");
            ApiResponse::<()>::error(StatusCode::INTERNAL_SERVER_ERROR, "Unable to load data.")
                .into_response()
        }
    }
}

async fn api_not_found() -> Response {
    ApiResponse::<()>::error(StatusCode::NOT_FOUND, "API endpoint not found").into_response()
}

/// Malformed `range` silently falls back to the default; parsed values are
/// clamped to at least one hour.
fn parse_range_hours(raw: Option<&String>) -> i64 {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(h) => h.max(1),
        None => DEFAULT_RANGE_HOURS,
    }
}

/// Wall-clock `H:mm` label for a chart axis.
fn format_hm(ts: i64) -> String {
    let fmt = format_description!("[hour padding:none]:[minute]");
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&fmt).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// WebSocket live push
// ---------------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // One immediate reading so a fresh viewer isn't blank until the next
    // broadcast tick.  Best-effort: a failed read just skips it.
    if let Ok(reading) = state.reader.get_current().await {
        if let Ok(payload) = serde_json::to_string(&reading) {
            if socket.send(Message::Text(payload.into())).await.is_err() {
                return;
            }
        }
    }

    let (id, mut rx) = state.hub.register().await;
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {} // clients only listen; ignore anything else
            },
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.hub.unregister(id).await;
    debug!(subscriber = id, "websocket closed");
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("http api listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutdoorConfig;
    use crate::db::{Db, DEFAULT_RETENTION_SECS};
    use crate::error::ReadError;
    use crate::hub::BroadcastHub;
    use crate::outdoor::OutdoorCache;
    use crate::reader::ReadCoordinator;
    use crate::sensor::{Measurement, Reading, Sensor};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    struct FixedSensor {
        fail: bool,
    }

    #[async_trait]
    impl Sensor for FixedSensor {
        async fn read(&self) -> Result<Measurement, ReadError> {
            if self.fail {
                Err(ReadError::Io("bus error".into()))
            } else {
                Ok(Measurement {
                    temperature_c: 21.5,
                    humidity_pct: 45.0,
                    pressure_hpa: 1013.25,
                })
            }
        }
    }

    async fn test_state(sensor_fails: bool) -> AppState {
        let db = Db::connect("sqlite::memory:", DEFAULT_RETENTION_SECS)
            .await
            .unwrap();
        db.migrate().await.unwrap();

        let outdoor = Arc::new(OutdoorCache::new(OutdoorConfig {
            api_key: "k".into(),
            lat: 48.2,
            lon: 16.37,
            cache_ttl_secs: 300,
            base_url: "http://127.0.0.1:9".into(), // nothing listens here
        }));

        let (_tx, rx) = watch::channel(false);
        AppState::new(
            db,
            ReadCoordinator::new(Arc::new(FixedSensor { fail: sensor_fails })),
            outdoor,
            Arc::new(BroadcastHub::new()),
            rx,
        )
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // -- /api/data/now --------------------------------------------------------

    #[tokio::test]
    async fn now_returns_the_current_reading() {
        let (status, json) = get_json(test_state(false).await, "/api/data/now").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["data"]["temp"], 21.5);
        assert_eq!(json["data"]["humidity"], 45.0);
        assert_eq!(json["data"]["pressure"], 1013.25);
        assert!(json["data"]["time"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn now_read_failure_maps_to_envelope() {
        let (status, json) = get_json(test_state(true).await, "/api/data/now").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Could not read data from sensor.");
        assert_eq!(json["data"], serde_json::Value::Null);
    }

    // -- /api/data/longterm ---------------------------------------------------

    #[tokio::test]
    async fn longterm_returns_columnar_history() {
        let state = test_state(false).await;
        let now = now_unix();
        for (offset, temp) in [(7200, 20.0), (3600, 21.0), (60, 22.0)] {
            state
                .db
                .append(&Reading {
                    time: now - offset,
                    temp,
                    humidity: 45.0,
                    pressure: 1013.0,
                })
                .await
                .unwrap();
        }

        let (status, json) = get_json(state, "/api/data/longterm?range=24").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["temp"], serde_json::json!([20.0, 21.0, 22.0]));
        assert_eq!(json["data"]["times"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn longterm_malformed_range_uses_default() {
        let state = test_state(false).await;
        let now = now_unix();
        state
            .db
            .append(&Reading {
                time: now - 60,
                temp: 21.0,
                humidity: 45.0,
                pressure: 1013.0,
            })
            .await
            .unwrap();

        let (status, json) = get_json(state, "/api/data/longterm?range=soon").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["temp"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn longterm_empty_store_is_success_with_empty_arrays() {
        let (status, json) = get_json(test_state(false).await, "/api/data/longterm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["times"], serde_json::json!([]));
        assert_eq!(json["data"]["temp"], serde_json::json!([]));
    }

    // -- /api/data/outdoor ----------------------------------------------------

    #[tokio::test]
    async fn outdoor_unavailable_maps_to_envelope() {
        let (status, json) = get_json(test_state(false).await, "/api/data/outdoor").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unable to load data.");
    }

    // -- Fallback -------------------------------------------------------------

    #[tokio::test]
    async fn unknown_api_path_is_json_404() {
        let (status, json) = get_json(test_state(false).await, "/api/data/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "API endpoint not found");
        assert_eq!(json["data"], serde_json::Value::Null);
    }

    // -- Helpers --------------------------------------------------------------

    #[test]
    fn range_parsing_defaults_and_clamps() {
        assert_eq!(parse_range_hours(None), 24);
        assert_eq!(parse_range_hours(Some(&"48".to_string())), 48);
        assert_eq!(parse_range_hours(Some(&" 12 ".to_string())), 12);
        assert_eq!(parse_range_hours(Some(&"soon".to_string())), 24);
        assert_eq!(parse_range_hours(Some(&"".to_string())), 24);
        assert_eq!(parse_range_hours(Some(&"-5".to_string())), 1);
        assert_eq!(parse_range_hours(Some(&"0".to_string())), 1);
    }

    #[test]
    fn hm_formatting() {
        // 1700000000 = 2023-11-14 22:13:20 UTC
        assert_eq!(format_hm(1_700_000_000), "22:13");
        // Early-morning hour is unpadded.
        assert_eq!(format_hm(1_700_000_000 - 16 * 3600), "6:13");
    }
}
