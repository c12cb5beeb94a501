use serde::{Deserialize, Serialize};
use serde_json::Value;

/// QoS levels of the internal MQTT-like bus. The gateway only ever
/// publishes/subscribes at `AtLeastOnce`, but the type exists so the
/// bus trait's signature matches the broker's actual contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Published to `<prefix>/command/<protocol>/<device_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub device_id: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
    pub source: String,
}

/// Received from `<prefix>/state/+/+`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub device_id: Option<String>,
    #[serde(default)]
    pub state: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
