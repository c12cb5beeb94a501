//! The real-time fan-out hub. A single process-wide instance bridges
//! bus events to authenticated WebSocket clients, with per-channel
//! subscriptions, bounded per-client send buffers, a slow-consumer drop
//! policy, heartbeat, and graceful teardown anchored to the server's
//! lifecycle cancellation token.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use hearth_protocol::{HubConfig, WsClientMessage, WsServerMessage};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crypto::unix_now;
use crate::model::TicketIdentity;

pub struct Client {
    pub id: Uuid,
    pub identity: TicketIdentity,
    subscriptions: RwLock<HashSet<String>>,
    /// `None` once the owning hub has unregistered this client. Guarded
    /// by its own mutex so unregister can close the channel exactly
    /// once regardless of how many `Arc<Client>` clones (broadcast
    /// snapshots, the read task) are outstanding.
    tx: StdMutex<Option<mpsc::Sender<Message>>>,
}

impl Client {
    fn enqueue(&self, msg: Message) {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        // A second enqueue after channel closure lands on `None` and is
        // silently absorbed — never a panic, never propagated.
        if let Some(sender) = guard.as_ref() {
            let _ = sender.try_send(msg);
        }
    }
}

pub struct Hub {
    clients: RwLock<HashMap<Uuid, Arc<Client>>>,
    config: HubConfig,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn register(&self, identity: TicketIdentity) -> (Arc<Client>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(self.config.send_buffer);
        let client = Arc::new(Client {
            id: Uuid::new_v4(),
            identity,
            subscriptions: RwLock::new(HashSet::new()),
            tx: StdMutex::new(Some(tx)),
        });
        self.clients.write().await.insert(client.id, client.clone());
        (client, rx)
    }

    /// The only path that closes a client's send channel. Safe to call
    /// more than once for the same id — only the first call finds an
    /// entry to remove.
    async fn unregister(&self, id: Uuid) {
        let removed = self.clients.write().await.remove(&id);
        if let Some(client) = removed {
            client.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        }
    }

    /// Serialises the envelope once, snapshots the client list under the
    /// hub lock, releases it, then attempts a non-blocking enqueue per
    /// subscribed client. A full queue drops the message for that
    /// client only — no head-of-line blocking across clients.
    pub async fn broadcast(&self, channel: &str, payload: Value) {
        let envelope = WsServerMessage::Event {
            event_type: channel.to_string(),
            timestamp: unix_now(),
            payload,
        };
        let Ok(json) = serde_json::to_string(&envelope) else {
            tracing::warn!(channel, "failed to serialise broadcast envelope");
            return;
        };

        let snapshot: Vec<Arc<Client>> = self.clients.read().await.values().cloned().collect();
        for client in snapshot {
            if client.subscriptions.read().await.contains(channel) {
                client.enqueue(Message::Text(json.clone().into()));
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// On hub-level cancellation every client's send channel is closed
    /// exactly once via the normal unregister path; each write task then
    /// exits on the closed channel and each read task exits once the
    /// underlying connection follows.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.clients.read().await.keys().copied().collect();
        for id in ids {
            self.unregister(id).await;
        }
    }
}

/// Drive one upgraded WebSocket connection end to end: register with
/// the hub, run the read and write halves concurrently, unregister on
/// exit. `identity` comes from the single-use ticket the caller already
/// consumed — there is no fallback to header-based auth for the
/// upgrade itself.
pub async fn handle_socket(hub: Arc<Hub>, socket: WebSocket, identity: TicketIdentity, cancel: CancellationToken) {
    let (client, mut rx) = hub.register(identity).await;
    let client_id = client.id;
    tracing::info!(%client_id, "websocket client connected");

    let (mut sink, mut stream) = socket.split();
    let ping_interval = Duration::from_secs(hub.config.ping_interval_secs);
    let pong_timeout = Duration::from_secs(hub.config.pong_timeout_secs);

    let write_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(ping_interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(msg) => {
                                if sink.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            None => break, // channel closed by unregister
                        }
                    }
                }
            }
            let _ = sink.close().await;
        })
    };

    let read_task = {
        let client = client.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            let mut deadline = Instant::now() + ping_interval + pong_timeout;
            loop {
                let timeout = tokio::time::sleep_until(deadline);
                tokio::select! {
                    biased;
                    _ = timeout => {
                        tracing::debug!(client_id = %client.id, "websocket heartbeat timeout");
                        break;
                    }
                    frame = stream.next() => {
                        let Some(frame) = frame else { break };
                        let Ok(frame) = frame else { break };
                        deadline = Instant::now() + ping_interval + pong_timeout;
                        match frame {
                            Message::Text(text) => handle_client_message(&client, &hub, &text).await,
                            Message::Ping(_) | Message::Pong(_) => {}
                            Message::Close(_) => break,
                            Message::Binary(_) => {}
                        }
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = write_task => {}
        _ = read_task => {}
    }
    hub.unregister(client_id).await;
    tracing::info!(%client_id, "websocket client disconnected");
}

async fn handle_client_message(client: &Arc<Client>, hub: &Arc<Hub>, text: &str) {
    let parsed: Result<WsClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(WsClientMessage::Subscribe { id: _, payload }) => {
            let mut subs = client.subscriptions.write().await;
            subs.extend(payload.channels);
        }
        Ok(WsClientMessage::Unsubscribe { id: _, payload }) => {
            let mut subs = client.subscriptions.write().await;
            for channel in &payload.channels {
                subs.remove(channel);
            }
        }
        Ok(WsClientMessage::Ping { id }) => {
            client.enqueue_server_message(&WsServerMessage::Pong { id });
        }
        Err(_) => {
            client.enqueue_server_message(&WsServerMessage::Error {
                id: None,
                message: "unknown message type".to_string(),
            });
        }
    }
    let _ = hub; // reserved for future hub-level bookkeeping on client messages
}

impl Client {
    fn enqueue_server_message(&self, msg: &WsServerMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            self.enqueue(Message::Text(json.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_only_reaches_subscribed_clients() {
        let hub = Hub::new(HubConfig {
            send_buffer: 8,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        });

        let (a, mut a_rx) = hub.register(TicketIdentity::User {
            user_id: Uuid::new_v4(),
            role: hearth_protocol::Role::User,
        }).await;
        let (b, mut b_rx) = hub.register(TicketIdentity::User {
            user_id: Uuid::new_v4(),
            role: hearth_protocol::Role::User,
        }).await;

        a.subscriptions.write().await.insert("device.state_changed".to_string());
        b.subscriptions.write().await.insert("scene.activated".to_string());

        hub.broadcast("device.state_changed", serde_json::json!({"device_id": "d1"})).await;

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_closes_channel_exactly_once() {
        let hub = Hub::new(HubConfig {
            send_buffer: 8,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        });
        let (client, mut rx) = hub.register(TicketIdentity::User {
            user_id: Uuid::new_v4(),
            role: hearth_protocol::Role::User,
        }).await;
        let id = client.id;
        hub.unregister(id).await;
        hub.unregister(id).await; // must not panic
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_message_for_that_client_only() {
        let hub = Hub::new(HubConfig {
            send_buffer: 1,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        });
        let (client, _rx) = hub.register(TicketIdentity::User {
            user_id: Uuid::new_v4(),
            role: hearth_protocol::Role::User,
        }).await;
        client.subscriptions.write().await.insert("c".to_string());
        hub.broadcast("c", serde_json::json!({})).await;
        // second broadcast should be dropped silently, not panic or block
        hub.broadcast("c", serde_json::json!({})).await;
    }
}
