use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client may send over the real-time WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    Subscribe { id: Option<String>, payload: ChannelsPayload },
    Unsubscribe { id: Option<String>, payload: ChannelsPayload },
    Ping { id: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsPayload {
    pub channels: Vec<String>,
}

/// Messages the hub sends to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Event {
        event_type: String,
        timestamp: u64,
        payload: Value,
    },
    Response {
        id: Option<String>,
        payload: Value,
    },
    Pong {
        id: Option<String>,
    },
    Error {
        id: Option<String>,
        message: String,
    },
}
