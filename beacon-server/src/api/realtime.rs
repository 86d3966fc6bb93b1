//! Realtime Status Socket
//!
//! Clients subscribe to one pipeline run and receive every status change as
//! a JSON envelope. Client messages are ignored; the read loop only detects
//! disconnects.

use async_trait::async_trait;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::realtime::{HubHandle, Subscriber};

/// Write half of a websocket registered with the hub
struct SocketSubscriber(SplitSink<WebSocket, Message>);

#[async_trait]
impl Subscriber for SocketSubscriber {
    async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.0.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

/// GET /gitlab/ws/pipeline-runs/{id}
/// Upgrade to a websocket streaming status changes of one run
pub async fn subscribe_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    state.pipelines.get_run_status(run_id).await?;

    tracing::info!("WebSocket connection requested for run {}", run_id);
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(hub, run_id, socket)))
}

async fn handle_socket(hub: HubHandle, run_id: Uuid, socket: WebSocket) {
    let (sink, mut stream) = socket.split();

    let conn_id = match hub.subscribe(run_id, SocketSubscriber(sink)).await {
        Ok(conn_id) => conn_id,
        Err(e) => {
            tracing::warn!("Rejecting websocket for run {}: {}", run_id, e);
            return;
        }
    };

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket error on connection {}: {}", conn_id, e);
                break;
            }
        }
    }

    hub.unsubscribe(run_id, conn_id).await;
    tracing::info!("WebSocket connection {} for run {} closed", conn_id, run_id);
}
