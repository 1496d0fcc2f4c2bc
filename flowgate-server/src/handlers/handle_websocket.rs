use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use flowgate_core::bus::{Connection, ConnectionId, Deliverable};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::infra::{
    app_context::AppContext,
    websocket::{ClientFrame, FrameAck, parse_channels},
};

#[derive(Debug, Default, Deserialize)]
pub struct WebSocketQuery {
    /// Comma-separated channels to join on connect
    pub channels: Option<String>,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(context): State<AppContext>,
    Query(query): Query<WebSocketQuery>,
) -> Response {
    let channels = parse_channels(query.channels.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, context, channels))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, context: AppContext, channels: Vec<String>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut rx) = Connection::channel(context.config().bus.outbound_buffer);
    let connection = Arc::new(connection.with_label("websocket"));
    let bus = Arc::clone(context.bus());

    let conn_id = bus
        .connect(connection.clone() as Arc<dyn Deliverable>, channels.clone())
        .await;
    info!(target: "coord::bus", connection_id = %conn_id, ?channels, "websocket connected");

    // Outgoing: drain the bus-facing queue into the socket
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_frame(&context, conn_id, &connection, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(target: "coord::bus", connection_id = %conn_id, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect
    bus.disconnect(conn_id);
    drop(connection);
    writer.abort();
    info!(target: "coord::bus", connection_id = %conn_id, "websocket disconnected");
}

async fn handle_client_frame(
    context: &AppContext,
    conn_id: ConnectionId,
    connection: &Connection,
    text: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(target: "coord::bus", connection_id = %conn_id, error = %err, "ignoring malformed client frame");
            return;
        }
    };

    let bus = context.bus();
    let (action, channel, ok) = match &frame {
        ClientFrame::Subscribe { channel } => {
            ("subscribe", channel, bus.subscribe(conn_id, channel.clone()))
        }
        ClientFrame::Unsubscribe { channel } => {
            ("unsubscribe", channel, bus.unsubscribe(conn_id, channel))
        }
    };
    debug!(target: "coord::bus", connection_id = %conn_id, action, %channel, ok, "client frame");

    let ack = FrameAck {
        kind: "ack",
        action,
        channel,
        ok,
    };
    match serde_json::to_string(&ack) {
        Ok(text) => {
            if let Err(err) = connection.send_text(&text).await {
                debug!(target: "coord::bus", connection_id = %conn_id, error = %err, "ack not delivered");
            }
        }
        Err(err) => warn!(error = %err, "failed to encode ack"),
    }
}
