//! HTTP adapter
//!
//! Thin handlers over the acquisition engine and the write verifier:
//!
//! - `GET  /status?refresh=<bool>` current reading, refreshed first by default
//! - `POST /reset/{target}`        write the reset value to a named address
//! - `POST /write`                 write-verify an arbitrary register
//! - `GET  /health`                service and snapshot metadata

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fieldlink_modbus::DeviceEndpoint;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::poller::AcquisitionEngine;
use crate::snapshot::DecodedReading;
use crate::verify::{WriteResult, WriteVerifier};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<AcquisitionEngine>,
    pub verifier: WriteVerifier,
}

impl AppState {
    pub fn new(config: Arc<Config>, engine: Arc<AcquisitionEngine>, verifier: WriteVerifier) -> Self {
        Self {
            config,
            engine,
            verifier,
        }
    }

    /// Configured device, with the reset timeouts
    fn write_endpoint(&self) -> DeviceEndpoint {
        let timeout = self.config.reset.timeout();
        self.config
            .device
            .endpoint()
            .with_connect_timeout(timeout)
            .with_request_timeout(timeout)
    }
}

/// API error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

fn default_refresh() -> bool {
    true
}

/// `POST /write` body; endpoint fields default to the configured device
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub address: u16,
    #[serde(default)]
    pub value: u16,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: String,
    version: &'static str,
    status: &'static str,
    sequence: u64,
    updated_at: Option<DateTime<Utc>>,
    cycles_ok: u64,
    cycles_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

/// Build the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/reset/{target}", post(reset_target))
        .route("/write", post(write_register))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<DecodedReading> {
    if query.refresh {
        // A failed refresh still answers with the previous snapshot
        let _ = state.engine.refresh().await;
    }
    Json(state.engine.store().read().reading.clone())
}

async fn reset_target(State(state): State<AppState>, Path(target): Path<String>) -> Response {
    let Some(address) = state.config.reset.targets.get(&target).copied() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown reset target '{}'", target),
            }),
        )
            .into_response();
    };

    info!("Reset {} (register {})", target, address);
    let result = state
        .verifier
        .write_and_verify(&state.write_endpoint(), address, state.config.reset.value)
        .await;
    write_response(&result)
}

async fn write_register(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> Response {
    let mut endpoint = state.write_endpoint();
    if let Some(host) = request.host {
        endpoint.host = host;
    }
    if let Some(port) = request.port {
        endpoint.port = port;
    }
    if let Some(unit_id) = request.unit_id {
        endpoint.unit_id = unit_id;
    }

    let result = state
        .verifier
        .write_and_verify(&endpoint, request.address, request.value)
        .await;
    write_response(&result)
}

fn write_response(result: &WriteResult) -> Response {
    let status = if result.ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(result.to_payload())).into_response()
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.engine.store().read();
    let stats = state.engine.stats();
    Json(HealthResponse {
        service: state.config.service.name.clone(),
        version: crate::SERVICE_VERSION,
        status: "ok",
        sequence: snapshot.sequence,
        updated_at: snapshot.updated_at,
        cycles_ok: stats.cycles_ok,
        cycles_failed: stats.cycles_failed,
        last_error: stats.last_error,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::reader::BlockReader;
    use crate::snapshot::SnapshotStore;
    use crate::test_support::FakeDevice;
    use axum::body::Body;
    use axum::http::Request;
    use fieldlink_modbus::{ModbusError, Negotiator};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(device: &FakeDevice) -> Router {
        let config = Arc::new(Config::default());
        let connector = Arc::new(device.clone());
        let reader = BlockReader::from_config(&config, connector.clone());
        let engine = Arc::new(AcquisitionEngine::new(reader, Arc::new(SnapshotStore::new())));
        let verifier = WriteVerifier::new(connector, Negotiator::default());
        create_router(AppState::new(config, engine, verifier))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_refreshes_by_default() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);

        let (status, body) = send(app(&device), get("/status")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["float1"], json!(20.0));
        // Block 2 reads zeros at both addresses; the fallback result is kept
        assert_eq!(body["raw"].as_array().unwrap().len(), 14);
        assert_eq!(body["values"].as_array().unwrap().len(), 7);
        assert_eq!(body.as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_status_without_refresh_returns_initial_zeros() {
        let device = FakeDevice::new();

        let (status, body) = send(app(&device), get("/status?refresh=false")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"float1": 0.0, "float2": 0.0, "values": [], "raw": []})
        );
        assert_eq!(device.opened(), 0);
    }

    #[tokio::test]
    async fn test_status_with_unreachable_device() {
        let device = FakeDevice::new();
        device.refuse_connections(true);

        let (status, body) = send(app(&device), get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["float1"], json!(0.0));
    }

    #[tokio::test]
    async fn test_reset_known_target() {
        let device = FakeDevice::new();
        device.set_registers(127, &[300]);

        let (status, body) = send(app(&device), post_json("/reset/set", json!({}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "result": {"wrote": 0, "readback": 0}}));
        assert_eq!(device.writes(), vec![(127, 0)]);
    }

    #[tokio::test]
    async fn test_reset_unknown_target() {
        let device = FakeDevice::new();
        let request = Request::builder()
            .method("POST")
            .uri("/reset/boiler")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app(&device), request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("boiler"));
        assert!(device.writes().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_bad_gateway() {
        let device = FakeDevice::new();
        device.fail_write(
            200,
            ModbusError::Device {
                function: 0x06,
                code: 0x03,
            },
        );

        let (status, body) =
            send(app(&device), post_json("/write", json!({"address": 200, "value": 7}))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["ok"], json!(false));
        assert!(body["error"].as_str().unwrap().starts_with("write_error:"));
    }

    #[tokio::test]
    async fn test_write_connect_failed() {
        let device = FakeDevice::new();
        device.refuse_connections(true);

        let (status, body) = send(app(&device), post_json("/write", json!({"address": 1}))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, json!({"ok": false, "error": "connect_failed"}));
    }

    #[tokio::test]
    async fn test_health_reports_sequence() {
        let device = FakeDevice::new();
        device.set_registers(125, &[16800, 0, 16800, 0]);
        let app = app(&device);

        send(app.clone(), get("/status")).await;
        let (status, body) = send(app, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], json!("acqsrv"));
        assert_eq!(body["sequence"], json!(1));
        assert!(body["updated_at"].is_string());
        assert_eq!(body["cycles_ok"], json!(1));
    }
}
