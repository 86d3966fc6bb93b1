//! Realtime Fan-out Hub
//!
//! A single task owns the subscriber map and performs every outbound write.
//! Producers talk to it through [`HubHandle`], which only sends commands over
//! a channel, so the map is never shared and two writes to one connection
//! never interleave.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::domain::realtime::RealtimeMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of one live connection
pub type ConnectionId = Uuid;

/// Upper bound for one write to a subscriber
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection that can receive serialized messages
#[async_trait]
pub trait Subscriber: Send {
    async fn send_text(&mut self, text: &str) -> anyhow::Result<()>;

    async fn close(&mut self);
}

/// Destination of realtime events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, message: RealtimeMessage);
}

#[derive(Debug, Error)]
#[error("Realtime hub is not running")]
pub struct HubClosed;

enum HubCommand {
    Subscribe {
        entity_id: Uuid,
        conn_id: ConnectionId,
        subscriber: Box<dyn Subscriber>,
    },
    Unsubscribe {
        entity_id: Uuid,
        conn_id: ConnectionId,
    },
    Broadcast(RealtimeMessage),
    SubscriberCount {
        entity_id: Uuid,
        resp: oneshot::Sender<usize>,
    },
}

/// Cloneable handle used to talk to a running [`Hub`]
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a connection under `entity_id`
    pub async fn subscribe(
        &self,
        entity_id: Uuid,
        subscriber: impl Subscriber + 'static,
    ) -> Result<ConnectionId, HubClosed> {
        let conn_id = Uuid::new_v4();
        self.tx
            .send(HubCommand::Subscribe {
                entity_id,
                conn_id,
                subscriber: Box::new(subscriber),
            })
            .await
            .map_err(|_| HubClosed)?;
        Ok(conn_id)
    }

    /// Remove and close a connection; removing an unknown one is a no-op
    pub async fn unsubscribe(&self, entity_id: Uuid, conn_id: ConnectionId) {
        let _ = self
            .tx
            .send(HubCommand::Unsubscribe { entity_id, conn_id })
            .await;
    }

    pub async fn broadcast(&self, message: RealtimeMessage) -> Result<(), HubClosed> {
        self.tx
            .send(HubCommand::Broadcast(message))
            .await
            .map_err(|_| HubClosed)
    }

    pub async fn subscriber_count(&self, entity_id: Uuid) -> Result<usize, HubClosed> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::SubscriberCount { entity_id, resp })
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

#[async_trait]
impl EventSink for HubHandle {
    async fn publish(&self, message: RealtimeMessage) {
        if let Err(e) = self.broadcast(message).await {
            warn!("Dropping realtime message: {}", e);
        }
    }
}

/// Event loop owning every subscriber
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    subscribers: HashMap<Uuid, HashMap<ConnectionId, Box<dyn Subscriber>>>,
}

impl Hub {
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            rx,
            subscribers: HashMap::new(),
        };
        (hub, HubHandle { tx })
    }

    /// Process commands until `shutdown` fires or every handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Realtime hub started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        for (_, mut connections) in self.subscribers.drain() {
            for (_, mut subscriber) in connections.drain() {
                subscriber.close().await;
            }
        }
        info!("Realtime hub stopped");
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Subscribe {
                entity_id,
                conn_id,
                subscriber,
            } => {
                self.subscribers
                    .entry(entity_id)
                    .or_default()
                    .insert(conn_id, subscriber);
                debug!("Connection {} subscribed to {}", conn_id, entity_id);
            }
            HubCommand::Unsubscribe { entity_id, conn_id } => {
                self.remove(entity_id, conn_id).await;
            }
            HubCommand::Broadcast(message) => self.deliver(message).await,
            HubCommand::SubscriberCount { entity_id, resp } => {
                let count = self.subscribers.get(&entity_id).map_or(0, HashMap::len);
                let _ = resp.send(count);
            }
        }
    }

    async fn remove(&mut self, entity_id: Uuid, conn_id: ConnectionId) {
        let Some(connections) = self.subscribers.get_mut(&entity_id) else {
            return;
        };
        if let Some(mut subscriber) = connections.remove(&conn_id) {
            subscriber.close().await;
            debug!("Connection {} unsubscribed from {}", conn_id, entity_id);
        }
        if connections.is_empty() {
            self.subscribers.remove(&entity_id);
        }
    }

    async fn deliver(&mut self, message: RealtimeMessage) {
        let entity_id = message.id;
        let Some(connections) = self.subscribers.get_mut(&entity_id) else {
            debug!("No subscribers for {}, skipping broadcast", entity_id);
            return;
        };

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize realtime message for {}: {}", entity_id, e);
                return;
            }
        };

        let mut failed = Vec::new();
        for (conn_id, subscriber) in connections.iter_mut() {
            let result = tokio::time::timeout(WRITE_TIMEOUT, subscriber.send_text(&text)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Write to connection {} failed: {}", conn_id, e);
                    failed.push(*conn_id);
                }
                Err(_) => {
                    warn!("Write to connection {} timed out", conn_id);
                    failed.push(*conn_id);
                }
            }
        }

        for conn_id in failed {
            self.remove(entity_id, conn_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ChannelSubscriber {
        tx: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Subscriber for ChannelSubscriber {
        async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
            self.tx.send(text.to_string())?;
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct BrokenSubscriber {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Subscriber for BrokenSubscriber {
        async fn send_text(&mut self, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection reset")
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel_subscriber() -> (
        ChannelSubscriber,
        mpsc::UnboundedReceiver<String>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            ChannelSubscriber {
                tx,
                closed: closed.clone(),
            },
            rx,
            closed,
        )
    }

    fn message(id: Uuid, payload: &str) -> RealtimeMessage {
        RealtimeMessage {
            kind: "pipeline_status_change".to_string(),
            id,
            payload: payload.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn start_hub() -> (HubHandle, CancellationToken) {
        let (hub, handle) = Hub::new(16);
        let shutdown = CancellationToken::new();
        tokio::spawn(hub.run(shutdown.clone()));
        (handle, shutdown)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_matching_entity() {
        let (hub, _shutdown) = start_hub();
        let (run_a, run_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (sub_a, mut rx_a, _) = channel_subscriber();
        let (sub_b, mut rx_b, _) = channel_subscriber();
        hub.subscribe(run_a, sub_a).await.unwrap();
        hub.subscribe(run_b, sub_b).await.unwrap();

        hub.broadcast(message(run_a, "{\"n\":1}")).await.unwrap();
        assert_eq!(hub.subscriber_count(run_a).await.unwrap(), 1);

        let received: RealtimeMessage = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        assert_eq!(received.id, run_a);
        assert_eq!(received.payload, "{\"n\":1}");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let (hub, _shutdown) = start_hub();
        hub.broadcast(message(Uuid::new_v4(), "{}")).await.unwrap();
        assert_eq!(hub.subscriber_count(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_drops_only_that_connection() {
        let (hub, _shutdown) = start_hub();
        let run = Uuid::new_v4();
        let (healthy, mut rx, _) = channel_subscriber();
        let broken_closed = Arc::new(AtomicBool::new(false));
        hub.subscribe(run, healthy).await.unwrap();
        hub.subscribe(
            run,
            BrokenSubscriber {
                closed: broken_closed.clone(),
            },
        )
        .await
        .unwrap();

        hub.broadcast(message(run, "first")).await.unwrap();
        hub.broadcast(message(run, "second")).await.unwrap();
        assert_eq!(hub.subscriber_count(run).await.unwrap(), 1);

        let first: RealtimeMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: RealtimeMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.payload, "first");
        assert_eq!(second.payload, "second");
        assert!(broken_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_and_is_idempotent() {
        let (hub, _shutdown) = start_hub();
        let run = Uuid::new_v4();
        let (sub, _rx, closed) = channel_subscriber();
        let conn = hub.subscribe(run, sub).await.unwrap();

        hub.unsubscribe(run, conn).await;
        hub.unsubscribe(run, conn).await;

        assert_eq!(hub.subscriber_count(run).await.unwrap(), 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_rejects_commands() {
        let (hub, shutdown) = start_hub();
        let run = Uuid::new_v4();
        let (sub, _rx, closed) = channel_subscriber();
        hub.subscribe(run, sub).await.unwrap();
        assert_eq!(hub.subscriber_count(run).await.unwrap(), 1);

        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(closed.load(Ordering::SeqCst));
        assert!(hub.subscriber_count(run).await.is_err());
    }
}
