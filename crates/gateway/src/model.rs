//! Core entities the gateway reasons about. These are in-process shapes,
//! not storage schemas — persistence belongs to the repository
//! implementations the gateway is wired against.

use std::collections::HashSet;

use hearth_protocol::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub issued_at: u64,
    pub expires_at: u64,
    pub revoked: bool,
    /// Anchor for the family's absolute-lifetime cap; identical across
    /// every token ever issued for this family.
    pub family_created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Panel {
    pub id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub is_active: bool,
    pub last_seen_at: Option<u64>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoomAccess {
    pub user_id: Uuid,
    pub room_id: String,
    pub can_manage_scenes: bool,
}

/// Request-bound scope. `None` means unrestricted (admin/owner, or no
/// scope resolution applicable); an entry with an empty set means
/// "no visible data", never "unrestricted".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomScope {
    pub room_ids: HashSet<String>,
    pub manage_scenes_rooms: HashSet<String>,
}

impl RoomScope {
    pub fn can_access(&self, room_id: &str) -> bool {
        self.room_ids.contains(room_id)
    }

    pub fn can_manage_scenes(&self, room_id: &str) -> bool {
        self.manage_scenes_rooms.contains(room_id)
    }
}

/// A single-use short-lived credential bridging an authenticated HTTP
/// call into a WebSocket upgrade.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub identity: TicketIdentity,
    pub expires_at: u64,
}

/// Identity a ticket (and, transitively, a WebSocket connection) carries.
/// Mirrors the request context's dual-identity invariant: a ticket is
/// issued for exactly one of a user or a panel, never both.
#[derive(Debug, Clone)]
pub enum TicketIdentity {
    User { user_id: Uuid, role: Role },
    Panel { panel_id: Uuid, room_ids: HashSet<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub source: String,
    pub details: serde_json::Value,
    pub ts: u64,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            user_id: None,
            source: "api".to_string(),
            details: serde_json::Value::Null,
            ts: crate::crypto::unix_now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Identity variant carried by an admitted request. Dual authentication
/// is modelled as two disjoint variants rather than a superclass —
/// handlers match on it explicitly instead of probing optional fields.
#[derive(Debug, Clone)]
pub enum Identity {
    User(hearth_protocol::Claims),
    Panel(PanelContext),
}

#[derive(Debug, Clone)]
pub struct PanelContext {
    pub panel_id: Uuid,
    pub room_ids: HashSet<String>,
}

impl PanelContext {
    /// A panel's scope is always its fixed room set with no scene-manage
    /// grants — panels don't manage scenes.
    pub fn scope(&self) -> RoomScope {
        RoomScope {
            room_ids: self.room_ids.clone(),
            manage_scenes_rooms: HashSet::new(),
        }
    }
}
