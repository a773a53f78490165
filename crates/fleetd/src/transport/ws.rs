// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket subscribe endpoints, one per broadcast channel.
//!
//! Clients authenticate with `?token=` (when auth is enabled) and pick their
//! tenant with `?tenant_id=`; the gateway rewrites that parameter from the
//! caller's credentials. Each connection gets a `connected` hello and a
//! `pong` for every `ping` text frame.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::events::ControlEvent;
use crate::hub::{Channel, EventSink};
use crate::repo::model::TenantId;
use crate::state::AppState;
use crate::transport::auth;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub tenant_id: Option<TenantId>,
}

pub async fn device_status(
    state: State<Arc<AppState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    subscribe(state, query, ws, Channel::DeviceStatus)
}

pub async fn device_info(
    state: State<Arc<AppState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    subscribe(state, query, ws, Channel::DeviceInfo)
}

pub async fn enrollment(
    state: State<Arc<AppState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    subscribe(state, query, ws, Channel::Enrollment)
}

pub async fn attendance(
    state: State<Arc<AppState>>,
    query: Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    subscribe(state, query, ws, Channel::AttendanceScans)
}

fn subscribe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
    channel: Channel,
) -> axum::response::Response {
    if let Some(expected) = state.config.auth_token.as_deref() {
        if query.token.as_deref() != Some(expected) {
            return auth::unauthorized();
        }
    }
    let Some(tenant) = query.tenant_id else {
        return (StatusCode::BAD_REQUEST, "missing tenant_id").into_response();
    };
    ws.on_upgrade(move |socket| handle_connection(state, channel, tenant, socket))
        .into_response()
}

async fn handle_connection(
    state: Arc<AppState>,
    channel: Channel,
    tenant: TenantId,
    socket: WebSocket,
) {
    let (tx, mut rx) = socket.split();
    let sink = Arc::new(WsSink {
        tx: tokio::sync::Mutex::new(tx),
    });
    let id = state.hub.subscribe(channel, tenant, sink.clone()).await;

    let hello = ControlEvent::Connected {
        message: format!("Connected to {} updates", channel.as_str()),
        tenant_id: tenant,
    };
    if sink.send_json(&hello).await.is_err() {
        state.hub.unsubscribe(channel, tenant, id).await;
        return;
    }

    // Keep the connection alive; clients only ever send pings.
    while let Some(message) = rx.next().await {
        match message {
            Ok(Message::Text(text)) if text.as_str().trim() == "ping" => {
                let _ = sink.send_json(&ControlEvent::Pong).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.hub.unsubscribe(channel, tenant, id).await;
    debug!(
        channel = channel.as_str(),
        tenant_id = tenant,
        "websocket client disconnected"
    );
}

struct WsSink {
    tx: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    async fn send_json<E: serde::Serialize>(&self, event: &E) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        self.send_text(&text).await
    }
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.tx
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(Into::into)
    }
}
