//! Proactive-notification ingress — `POST /webhooks/{source}` (§4.6, §10.11
//! of SPEC_FULL).
//!
//! Each source authenticates independently per its configured `auth_mode`,
//! then the parsed `WebhookNotification` is fanned out to its target
//! device(s) as a `ServerFrame::Notification`, recorded in the
//! `NotificationCenter` ledger so a later `notification_ack` can clear it.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use renfield_core::config::WebhookAuthMode;
use renfield_protocol::frames::ServerFrame;
use renfield_protocol::rest::WebhookNotification;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// `POST /webhooks/{source}`
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let cfg = &state.config.webhooks;

    if !cfg.enabled {
        warn!(source = %source, "webhook received but the subsystem is disabled");
        return Err((StatusCode::NOT_FOUND, Json(json!({"error": "webhook subsystem is disabled"}))));
    }

    let source_cfg = cfg.sources.iter().find(|s| s.name == source).ok_or_else(|| {
        warn!(source = %source, "unknown webhook source");
        (StatusCode::NOT_FOUND, Json(json!({"error": "unknown webhook source"})))
    })?;

    info!(source = %source, bytes = body.len(), "webhook arrived");

    match &source_cfg.auth_mode {
        WebhookAuthMode::HmacSha256 => {
            verify_hmac_sha256(&headers, &body, source_cfg.secret.as_deref()).map_err(|e| auth_error(&e))?;
        }
        WebhookAuthMode::BearerToken => {
            verify_bearer_token(&headers, source_cfg.secret.as_deref()).map_err(|e| auth_error(&e))?;
        }
        WebhookAuthMode::None => {}
    }

    let notification: WebhookNotification = serde_json::from_slice(&body).map_err(|e| {
        warn!(source = %source, error = %e, "invalid webhook body");
        (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid JSON body"})))
    })?;

    let delivered = deliver(&state, &notification);
    info!(source = %source, delivered, "webhook notification fanned out");
    Ok(Json(json!({"ok": true, "delivered": delivered})))
}

/// Fan out to every targeted device (by `target_device_id`, the siblings of
/// `target_room_id`, or — if neither is set — every known device), recording
/// one pending notification per subject and pushing a `ServerFrame` onto any
/// live WS connection (§4.6). Returns the number of connected devices it
/// actually reached.
fn deliver(state: &AppState, notification: &WebhookNotification) -> usize {
    let targets: Vec<String> = if let Some(device_id) = &notification.target_device_id {
        vec![device_id.clone()]
    } else if let Some(room_id) = &notification.target_room_id {
        state
            .devices
            .snapshot()
            .values()
            .filter(|d| &d.room_id == room_id)
            .map(|d| d.device_id.clone())
            .collect()
    } else {
        state.devices.snapshot().keys().cloned().collect()
    };

    let mut delivered = 0;
    for device_id in &targets {
        let subject_id = state
            .device_subjects
            .get(device_id)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| device_id.clone());
        let pending = state.notifications.publish(&subject_id, &notification.title, Some(notification.body.clone()));

        if let Some(sender) = state.ws_clients.get(device_id) {
            let frame = ServerFrame::Notification {
                notification_id: pending.notification_id.clone(),
                title: pending.title.clone(),
                body: Some(notification.body.clone()),
            };
            if sender.try_send(frame).is_ok() {
                delivered += 1;
            }
        }
    }
    delivered
}

fn verify_hmac_sha256(headers: &HeaderMap, body: &Bytes, secret: Option<&str>) -> Result<(), String> {
    let secret = secret.ok_or_else(|| "no HMAC secret configured for this source".to_string())?;

    let sig_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Hub-Signature-256 header".to_string())?;

    let sig_hex = sig_header.strip_prefix("sha256=").ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;

    let expected = hex::decode(sig_hex).map_err(|_| "X-Hub-Signature-256 is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);

    mac.verify_slice(&expected).map_err(|_| "HMAC signature mismatch".to_string())
}

fn verify_bearer_token(headers: &HeaderMap, secret: Option<&str>) -> Result<(), String> {
    let expected = secret.ok_or_else(|| "no bearer token configured for this source".to_string())?;

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

fn auth_error(reason: &str) -> (StatusCode, Json<Value>) {
    warn!(reason = %reason, "webhook authentication failed");
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "authentication failed", "reason": reason})))
}
