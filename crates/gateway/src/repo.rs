//! Narrow repository and bus trait surfaces the core depends on.
//! Ownership of persistence and the message broker is entirely external
//! (§1 of the spec this crate implements) — these traits are the
//! contract, not an implementation. `crate::testsupport` ships in-memory
//! doubles used only by the test suite.

use std::collections::HashSet;

use async_trait::async_trait;
use hearth_protocol::Qos;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Panel, RefreshToken, RoomScope, User, UserRoomAccess};

/// Domain sentinels repositories signal on miss/conflict. Handlers map
/// these to HTTP status codes by equality, once, at the call site —
/// business logic never constructs an HTTP status directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("unavailable")]
    Unavailable,
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_by_username(&self, username: &str) -> RepoResult<User>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<User>;
    async fn create(&self, user: User) -> RepoResult<User>;
    async fn update(&self, user: User) -> RepoResult<User>;
    async fn update_password_and_revoke_sessions(
        &self,
        user_id: Uuid,
        new_password_hash: &str,
    ) -> RepoResult<()>;
    async fn delete(&self, id: Uuid) -> RepoResult<()>;
    async fn list(&self) -> RepoResult<Vec<User>>;
}

#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn create(&self, token: RefreshToken) -> RepoResult<RefreshToken>;
    async fn get_by_token_hash(&self, hash: &str) -> RepoResult<RefreshToken>;
    /// Atomically revoke `old_hash` and insert `new_token` in the same
    /// family. Observers must never see two non-revoked tokens for one
    /// family, even under concurrent rotation attempts.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_token: RefreshToken,
    ) -> RepoResult<RefreshToken>;
    async fn revoke(&self, token_id: Uuid) -> RepoResult<()>;
    async fn revoke_family(&self, family_id: Uuid) -> RepoResult<()>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> RepoResult<()>;
    async fn get_family_created_at(&self, family_id: Uuid) -> RepoResult<u64>;
    async fn list_active_by_user(&self, user_id: Uuid) -> RepoResult<Vec<RefreshToken>>;
}

#[async_trait]
pub trait PanelRepo: Send + Sync {
    async fn get_by_token_hash(&self, hash: &str) -> RepoResult<Panel>;
    async fn get_by_id(&self, id: Uuid) -> RepoResult<Panel>;
    async fn create(&self, panel: Panel) -> RepoResult<Panel>;
    async fn delete(&self, id: Uuid) -> RepoResult<()>;
    async fn update_name(&self, id: Uuid, name: &str) -> RepoResult<()>;
    async fn update_last_seen(&self, id: Uuid, ts: u64) -> RepoResult<()>;
    async fn set_rooms(&self, id: Uuid, room_ids: HashSet<String>) -> RepoResult<()>;
    async fn get_room_ids(&self, id: Uuid) -> RepoResult<HashSet<String>>;
    async fn list(&self) -> RepoResult<Vec<Panel>>;
}

#[async_trait]
pub trait RoomAccessRepo: Send + Sync {
    async fn resolve_room_scope(&self, user_id: Uuid) -> RepoResult<RoomScope>;
    async fn get_room_access(&self, user_id: Uuid) -> RepoResult<Vec<UserRoomAccess>>;
    async fn set_room_access(&self, access: Vec<UserRoomAccess>) -> RepoResult<()>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn create(&self, entry: crate::model::AuditEntry) -> RepoResult<()>;
    async fn list(&self, limit: usize) -> RepoResult<Vec<crate::model::AuditEntry>>;
}

/// `Publish(topic, payload, qos, retained)` / `Subscribe(topic, qos,
/// handler)` — the MQTT-like internal bus, consumed as an interface per
/// spec §1.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos, retained: bool)
        -> RepoResult<()>;
    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: Qos,
        handler: Box<dyn Fn(String, Vec<u8>) + Send + Sync>,
    ) -> RepoResult<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub room_id: String,
    pub protocol: String,
    pub name: String,
    pub state: Value,
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get(&self, id: &str) -> RepoResult<DeviceSummary>;
    async fn list(&self) -> RepoResult<Vec<DeviceSummary>>;
    async fn write_state(&self, id: &str, state: Value) -> RepoResult<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneSummary {
    pub id: String,
    pub room_id: String,
    pub name: String,
}

#[async_trait]
pub trait SceneRegistry: Send + Sync {
    async fn get(&self, id: &str) -> RepoResult<SceneSummary>;
    async fn list(&self) -> RepoResult<Vec<SceneSummary>>;
}

#[async_trait]
pub trait SceneEngine: Send + Sync {
    /// Returns an execution id.
    async fn activate(&self, scene_id: &str) -> RepoResult<String>;
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait LocationRepo: Send + Sync {
    async fn list_rooms(&self) -> RepoResult<Vec<Room>>;
}

#[async_trait]
pub trait Tsdb: Send + Sync {
    async fn append_sample(&self, device_id: &str, field: &str, value: f64, ts: u64) -> RepoResult<()>;
}

#[async_trait]
pub trait StateHistoryRepo: Send + Sync {
    async fn append(&self, device_id: &str, state: Value, ts: u64) -> RepoResult<()>;
}
