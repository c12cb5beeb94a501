//! In-memory implementations of every repository/bus trait, used only
//! by the test suite so the full pipeline — login, refresh, ws-ticket,
//! hub subscribe, command, bus round-trip — is exercisable without a
//! real store or broker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hearth_protocol::Qos;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{AuditEntry, Panel, RefreshToken, RoomScope, User, UserRoomAccess};
use crate::repo::{
    AuditRepo, DeviceRegistry, DeviceSummary, LocationRepo, MessageBus, PanelRepo, RepoError,
    RepoResult, Room, RoomAccessRepo, SceneEngine, SceneRegistry, SceneSummary, StateHistoryRepo,
    Tsdb, TokenRepo, UserRepo,
};

/// Holds a handle to the token store it shares a user with, so
/// `update_password_and_revoke_sessions` can honor its name: a real
/// store performs the password write and the session revocation in one
/// transaction, and this double mirrors that by performing both from
/// inside the single repo call rather than leaving the handler to
/// stitch them together from two separate awaited calls.
pub struct InMemoryUserRepo {
    users: Mutex<HashMap<Uuid, User>>,
    tokens: Arc<InMemoryTokenRepo>,
}

impl InMemoryUserRepo {
    pub fn new(tokens: Arc<InMemoryTokenRepo>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            tokens,
        }
    }

    pub fn seed(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }
}

#[async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn get_by_username(&self, username: &str) -> RepoResult<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn create(&self, user: User) -> RepoResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.username == user.username) {
            return Err(RepoError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> RepoResult<User> {
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(&user.id) {
            return Err(RepoError::NotFound);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password_and_revoke_sessions(
        &self,
        user_id: Uuid,
        new_password_hash: &str,
    ) -> RepoResult<()> {
        {
            let mut users = self.users.lock().unwrap();
            let user = users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
            user.password_hash = new_password_hash.to_string();
        }
        // Both halves of this operation's name happen from inside the
        // one call the handler awaits — no window where a caller can
        // observe the password changed but a pre-change session still
        // valid.
        self.tokens.revoke_all_for_user(user_id).await
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        self.users
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn list(&self) -> RepoResult<Vec<User>> {
        Ok(self.users.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryTokenRepo {
    tokens: Mutex<HashMap<Uuid, RefreshToken>>,
}

#[async_trait]
impl TokenRepo for InMemoryTokenRepo {
    async fn create(&self, token: RefreshToken) -> RepoResult<RefreshToken> {
        self.tokens.lock().unwrap().insert(token.id, token.clone());
        Ok(token)
    }

    async fn get_by_token_hash(&self, hash: &str) -> RepoResult<RefreshToken> {
        self.tokens
            .lock()
            .unwrap()
            .values()
            .find(|t| t.token_hash == hash)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_token: RefreshToken,
    ) -> RepoResult<RefreshToken> {
        let mut tokens = self.tokens.lock().unwrap();
        let old_id = tokens
            .values()
            .find(|t| t.token_hash == old_hash)
            .map(|t| t.id)
            .ok_or(RepoError::NotFound)?;
        // Single critical section: revoke old, insert new. No observer
        // can see both the old token non-revoked and the new one absent.
        if let Some(old) = tokens.get_mut(&old_id) {
            old.revoked = true;
        }
        tokens.insert(new_token.id, new_token.clone());
        Ok(new_token)
    }

    async fn revoke(&self, token_id: Uuid) -> RepoResult<()> {
        let mut tokens = self.tokens.lock().unwrap();
        let token = tokens.get_mut(&token_id).ok_or(RepoError::NotFound)?;
        token.revoked = true;
        Ok(())
    }

    async fn revoke_family(&self, family_id: Uuid) -> RepoResult<()> {
        let mut tokens = self.tokens.lock().unwrap();
        for token in tokens.values_mut().filter(|t| t.family_id == family_id) {
            token.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> RepoResult<()> {
        let mut tokens = self.tokens.lock().unwrap();
        for token in tokens.values_mut().filter(|t| t.user_id == user_id) {
            token.revoked = true;
        }
        Ok(())
    }

    async fn get_family_created_at(&self, family_id: Uuid) -> RepoResult<u64> {
        self.tokens
            .lock()
            .unwrap()
            .values()
            .find(|t| t.family_id == family_id)
            .map(|t| t.family_created_at)
            .ok_or(RepoError::NotFound)
    }

    async fn list_active_by_user(&self, user_id: Uuid) -> RepoResult<Vec<RefreshToken>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.user_id == user_id && !t.revoked)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPanelRepo {
    panels: Mutex<HashMap<Uuid, Panel>>,
    rooms: Mutex<HashMap<Uuid, HashSet<String>>>,
}

impl InMemoryPanelRepo {
    pub fn seed(&self, panel: Panel, room_ids: HashSet<String>) {
        self.rooms.lock().unwrap().insert(panel.id, room_ids);
        self.panels.lock().unwrap().insert(panel.id, panel);
    }
}

#[async_trait]
impl PanelRepo for InMemoryPanelRepo {
    async fn get_by_token_hash(&self, hash: &str) -> RepoResult<Panel> {
        self.panels
            .lock()
            .unwrap()
            .values()
            .find(|p| p.token_hash == hash)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_by_id(&self, id: Uuid) -> RepoResult<Panel> {
        self.panels.lock().unwrap().get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn create(&self, panel: Panel) -> RepoResult<Panel> {
        self.panels.lock().unwrap().insert(panel.id, panel.clone());
        Ok(panel)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        self.panels.lock().unwrap().remove(&id).map(|_| ()).ok_or(RepoError::NotFound)
    }

    async fn update_name(&self, id: Uuid, name: &str) -> RepoResult<()> {
        let mut panels = self.panels.lock().unwrap();
        let panel = panels.get_mut(&id).ok_or(RepoError::NotFound)?;
        panel.name = name.to_string();
        Ok(())
    }

    async fn update_last_seen(&self, id: Uuid, ts: u64) -> RepoResult<()> {
        let mut panels = self.panels.lock().unwrap();
        let panel = panels.get_mut(&id).ok_or(RepoError::NotFound)?;
        panel.last_seen_at = Some(ts);
        Ok(())
    }

    async fn set_rooms(&self, id: Uuid, room_ids: HashSet<String>) -> RepoResult<()> {
        self.rooms.lock().unwrap().insert(id, room_ids);
        Ok(())
    }

    async fn get_room_ids(&self, id: Uuid) -> RepoResult<HashSet<String>> {
        Ok(self.rooms.lock().unwrap().get(&id).cloned().unwrap_or_default())
    }

    async fn list(&self) -> RepoResult<Vec<Panel>> {
        Ok(self.panels.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryRoomAccessRepo {
    access: Mutex<HashMap<Uuid, Vec<UserRoomAccess>>>,
}

impl InMemoryRoomAccessRepo {
    pub fn seed(&self, user_id: Uuid, access: Vec<UserRoomAccess>) {
        self.access.lock().unwrap().insert(user_id, access);
    }
}

#[async_trait]
impl RoomAccessRepo for InMemoryRoomAccessRepo {
    async fn resolve_room_scope(&self, user_id: Uuid) -> RepoResult<RoomScope> {
        let access = self.access.lock().unwrap();
        let entries = access.get(&user_id).cloned().unwrap_or_default();
        Ok(RoomScope {
            room_ids: entries.iter().map(|a| a.room_id.clone()).collect(),
            manage_scenes_rooms: entries
                .iter()
                .filter(|a| a.can_manage_scenes)
                .map(|a| a.room_id.clone())
                .collect(),
        })
    }

    async fn get_room_access(&self, user_id: Uuid) -> RepoResult<Vec<UserRoomAccess>> {
        Ok(self.access.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn set_room_access(&self, access: Vec<UserRoomAccess>) -> RepoResult<()> {
        let mut by_user: HashMap<Uuid, Vec<UserRoomAccess>> = HashMap::new();
        for entry in access {
            by_user.entry(entry.user_id).or_default().push(entry);
        }
        let mut guard = self.access.lock().unwrap();
        for (user_id, entries) in by_user {
            guard.insert(user_id, entries);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepo {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditRepo {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditRepo for InMemoryAuditRepo {
    async fn create(&self, entry: AuditEntry) -> RepoResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn list(&self, limit: usize) -> RepoResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

type BusHandler = Box<dyn Fn(String, Vec<u8>) + Send + Sync>;

/// In-process stand-in for the MQTT-like bus: `publish` fans out
/// synchronously to every `subscribe`r whose filter matches, using the
/// same single-level-wildcard (`+`) semantics as the real broker.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Mutex<Vec<(String, BusHandler)>>,
}

fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();
    if filter_parts.len() != topic_parts.len() {
        return false;
    }
    filter_parts
        .iter()
        .zip(topic_parts.iter())
        .all(|(f, t)| *f == "+" || f == t)
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: Qos, _retained: bool) -> RepoResult<()> {
        let subscribers = self.subscribers.lock().unwrap();
        for (filter, handler) in subscribers.iter() {
            if topic_matches(filter, topic) {
                handler(topic.to_string(), payload.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str, _qos: Qos, handler: BusHandler) -> RepoResult<()> {
        self.subscribers
            .lock()
            .unwrap()
            .push((topic_filter.to_string(), handler));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: Mutex<HashMap<String, DeviceSummary>>,
}

impl InMemoryDeviceRegistry {
    pub fn seed(&self, device: DeviceSummary) {
        self.devices.lock().unwrap().insert(device.id.clone(), device);
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get(&self, id: &str) -> RepoResult<DeviceSummary> {
        self.devices.lock().unwrap().get(id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list(&self) -> RepoResult<Vec<DeviceSummary>> {
        Ok(self.devices.lock().unwrap().values().cloned().collect())
    }

    async fn write_state(&self, id: &str, state: Value) -> RepoResult<()> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices.get_mut(id).ok_or(RepoError::NotFound)?;
        device.state = state;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySceneRegistry {
    scenes: Mutex<HashMap<String, SceneSummary>>,
}

impl InMemorySceneRegistry {
    pub fn seed(&self, scene: SceneSummary) {
        self.scenes.lock().unwrap().insert(scene.id.clone(), scene);
    }
}

#[async_trait]
impl SceneRegistry for InMemorySceneRegistry {
    async fn get(&self, id: &str) -> RepoResult<SceneSummary> {
        self.scenes.lock().unwrap().get(id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list(&self) -> RepoResult<Vec<SceneSummary>> {
        Ok(self.scenes.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemorySceneEngine;

#[async_trait]
impl SceneEngine for InMemorySceneEngine {
    async fn activate(&self, _scene_id: &str) -> RepoResult<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

#[derive(Default)]
pub struct InMemoryLocationRepo {
    rooms: Mutex<Vec<Room>>,
}

#[async_trait]
impl LocationRepo for InMemoryLocationRepo {
    async fn list_rooms(&self) -> RepoResult<Vec<Room>> {
        Ok(self.rooms.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct InMemoryTsdb {
    samples: Mutex<Vec<(String, String, f64, u64)>>,
}

#[async_trait]
impl Tsdb for InMemoryTsdb {
    async fn append_sample(&self, device_id: &str, field: &str, value: f64, ts: u64) -> RepoResult<()> {
        self.samples
            .lock()
            .unwrap()
            .push((device_id.to_string(), field.to_string(), value, ts));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStateHistoryRepo {
    entries: Mutex<Vec<(String, Value, u64)>>,
}

#[async_trait]
impl StateHistoryRepo for InMemoryStateHistoryRepo {
    async fn append(&self, device_id: &str, state: Value, ts: u64) -> RepoResult<()> {
        self.entries
            .lock()
            .unwrap()
            .push((device_id.to_string(), state, ts));
        Ok(())
    }
}
