//! Webhook HTTP surface: subscription handshake and event intake.

use crate::commands::admin::build_version;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::event::{InboundEvent, WebhookPayload};
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub verify_token: String,
}

/// Query parameters of the subscription handshake
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/webhook", get(handle_verify).post(handle_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind to `port` and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!("🚀 Server is running on port {port}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

async fn handle_root() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": build_version() }))
}

/// GET /webhook - echo the challenge when the verify token matches
async fn handle_verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    match (params.mode.as_deref(), params.verify_token.as_deref()) {
        (Some(mode), Some(token)) => {
            if mode == "subscribe" && token == state.verify_token {
                info!("WEBHOOK_VERIFIED");
                (StatusCode::OK, params.challenge.unwrap_or_default())
            } else {
                warn!("Webhook verification failed (mode: {mode})");
                (StatusCode::FORBIDDEN, String::new())
            }
        }
        _ => (StatusCode::BAD_REQUEST, String::new()),
    }
}

/// POST /webhook - acknowledge immediately, dispatch each message on its own task
async fn handle_event(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if body.get("object").and_then(Value::as_str) != Some("page") {
        return (StatusCode::NOT_FOUND, "");
    }

    let payload: WebhookPayload = match serde_json::from_value(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Invalid webhook payload: {e}");
            return (StatusCode::BAD_REQUEST, "");
        }
    };

    spawn_dispatch(state.dispatcher.clone(), payload);
    (StatusCode::OK, "EVENT_RECEIVED")
}

/// Spawn one dispatch task per message event in the payload
pub fn spawn_dispatch(
    dispatcher: Arc<Dispatcher>,
    payload: WebhookPayload,
) -> Vec<JoinHandle<DispatchOutcome>> {
    let delivery = Uuid::new_v4();
    let mut handles = Vec::new();

    for raw in payload.entry.into_iter().flat_map(|e| e.messaging) {
        if raw.get("postback").is_some() && raw.get("message").is_none() {
            debug!("[{delivery}] Ignoring postback event");
            continue;
        }

        let Some(event) = InboundEvent::from_messaging(raw) else {
            debug!("[{delivery}] Ignoring non-message event");
            continue;
        };

        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let outcome = dispatcher.dispatch(&event).await;
            debug!("[{delivery}] Dispatch outcome: {outcome:?}");
            outcome
        }));
    }

    handles
}
