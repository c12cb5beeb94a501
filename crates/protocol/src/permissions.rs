use serde::{Deserialize, Serialize};

/// Human-principal roles. `panel` identities never carry one of these —
/// they are authorised against a fixed panel permission set instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    User,
}

impl Role {
    pub fn is_room_scoped(self) -> bool {
        matches!(self, Role::User)
    }
}

/// Opaque permission identifier, e.g. `device:read`, `system:admin`.
pub type Permission = &'static str;

pub const DEVICE_READ: Permission = "device:read";
pub const DEVICE_CONFIGURE: Permission = "device:configure";
pub const SCENE_MANAGE: Permission = "scene:manage";
pub const LOCATION_MANAGE: Permission = "location:manage";
pub const SYSTEM_ADMIN: Permission = "system:admin";
pub const SYSTEM_DANGEROUS: Permission = "system:dangerous";
pub const USER_MANAGE_ALL: Permission = "user:manage_all";
