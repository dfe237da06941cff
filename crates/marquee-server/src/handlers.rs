//! HTTP surface consumed by the surrounding CRUD system and operator
//! tooling: subscribe, broadcast trigger, stats, device status, health.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use marquee_core::{
    classify, missed_heartbeats, BroadcastFilter, LinkQuality, PushEvent, Role,
};

use crate::error::ApiError;
use crate::server::AppState;
use crate::stream;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub role: Role,
    pub owner: Option<String>,
}

/// Open a push stream. Authorization runs before the connection is created,
/// so a rejected subscriber never enters the registry.
pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SubscribeQuery>,
) -> Result<Response, ApiError> {
    match query.role {
        Role::Admin => authorize_admin(&state, &headers)?,
        Role::Display => {
            if query.owner.as_deref().map_or(true, str::is_empty) {
                return Err(ApiError::BadRequest(
                    "display subscription requires an owner device key".into(),
                ));
            }
        }
    }

    let (_conn, receiver) = state.manager.create(query.role, query.owner);
    Ok(stream::sse_response(
        Arc::clone(&state.manager),
        receiver,
        state.config.idle_timeout(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub event: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub retry_ms: Option<u64>,
    #[serde(default)]
    pub filter: BroadcastFilter,
}

/// Trigger point for external mutation call sites (display settings changed,
/// slideshow content changed, heartbeat received). The payload is opaque to
/// this subsystem.
pub async fn broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize_admin(&state, &headers)?;
    if req.event.is_empty() {
        return Err(ApiError::BadRequest("event type must not be empty".into()));
    }

    let mut event = PushEvent::new(req.event, req.payload);
    if let Some(ms) = req.retry_ms {
        event = event.with_retry(ms);
    }
    let delivered = state.manager.broadcast(&event, &req.filter);
    Ok(Json(json!({ "delivered": delivered })))
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.manager.stats();
    Json(serde_json::to_value(stats).unwrap_or_else(|_| json!({})))
}

/// The external device registry's view of one device, passed in by the
/// caller: this subsystem does not own device persistence.
#[derive(Debug, Deserialize)]
pub struct DeviceStatusRequest {
    pub name: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub heartbeat_interval_secs: u32,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub quality: LinkQuality,
    pub missed_heartbeats: Option<u64>,
    pub sse_connected: bool,
}

/// Combine the pure recency classifier with the live registry lookup. The
/// two verdicts stay independent: a device can be `offline` on heartbeats
/// while its stream is still open, and vice versa.
pub async fn devices_status(
    State(state): State<AppState>,
    Json(devices): Json<Vec<DeviceStatusRequest>>,
) -> Json<Vec<DeviceStatus>> {
    let now = Utc::now();
    let statuses = devices
        .into_iter()
        .map(|device| {
            let missed = missed_heartbeats(now, device.last_seen, device.heartbeat_interval_secs);
            let sse_connected = state
                .manager
                .is_connected(Role::Display, Some(&device.name));
            DeviceStatus {
                quality: classify(missed),
                missed_heartbeats: missed,
                sse_connected,
                name: device.name,
            }
        })
        .collect();
    Json(statuses)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Bearer-token check for admin-only routes. With no token configured the
/// server runs open (development mode).
fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
