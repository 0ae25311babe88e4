// src/handlers/monitor.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use utoipa::IntoParams;

use crate::{
    models::proctoring::{ProctoringEntry, RealtimeEvent},
    services::{
        broadcaster::{OBSERVERS_TOPIC, RealtimeBroadcaster, exam_topic},
        proctoring::ProctoringMonitor,
    },
};

/// Optional exam filter shared by the monitor endpoints.
#[derive(Debug, Deserialize, IntoParams)]
pub struct MonitorQuery {
    /// Restrict to one exam; omit to observe every exam.
    pub exam_id: Option<i64>,
}

/// Lists sessions currently being proctored.
/// Admin only.
#[utoipa::path(
    get,
    path = "/api/admin/monitor/sessions",
    params(MonitorQuery),
    responses(
        (status = 200, description = "Active sessions", body = [ProctoringEntry]),
        (status = 403, description = "Admin role required")
    ),
    tag = "monitor"
)]
pub async fn list_active_sessions(
    State(monitor): State<Arc<ProctoringMonitor>>,
    Query(query): Query<MonitorQuery>,
) -> impl IntoResponse {
    Json(monitor.active_sessions(query.exam_id).await)
}

/// Upgrades to a WebSocket that streams lifecycle and anomaly events.
/// Admin only.
pub async fn monitor_ws(
    ws: WebSocketUpgrade,
    State(broadcaster): State<Arc<RealtimeBroadcaster>>,
    Query(query): Query<MonitorQuery>,
) -> Response {
    let topic = query
        .exam_id
        .map(exam_topic)
        .unwrap_or_else(|| OBSERVERS_TOPIC.to_string());

    // Subscribe before the upgrade completes so nothing published after the
    // handshake is missed.
    let rx = broadcaster.subscribe(&topic).await;
    ws.on_upgrade(move |socket| stream_events(socket, rx, topic))
}

async fn stream_events(
    socket: WebSocket,
    mut rx: broadcast::Receiver<RealtimeEvent>,
    topic: String,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(%topic, "Observer connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(%topic, "Failed to serialize realtime event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%topic, skipped, "Observer lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(%topic, "Observer disconnected");
}
