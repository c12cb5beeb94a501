//! Wire types shared between the gateway and any out-of-process tooling
//! that speaks its HTTP/WebSocket/bus contracts.

mod bus;
mod claims;
pub mod config;
pub mod permissions;
mod ws;

pub use bus::{CommandEnvelope, Qos, StateEnvelope};
pub use claims::Claims;
pub use config::{
    AuditConfig, AuthConfig, BusConfig, DevModeConfig, GatewayConfig, HubConfig, RateLimitConfig,
    ServerConfig,
};
pub use permissions::{Permission, Role};
pub use ws::{WsClientMessage, WsServerMessage};
