//! Role→permission map and room-scope helpers. The map is a process-wide
//! constant, not something any repository owns.

use hearth_protocol::permissions::*;
use hearth_protocol::{Permission, Role};
use serde::Serialize;
use serde_json::json;

use crate::model::RoomScope;

/// Panels carry a fixed minimal permission set, independent of any
/// human role — they can read device state and receive events, nothing
/// more.
const PANEL_PERMISSIONS: &[Permission] = &[DEVICE_READ];

pub fn has_permission(role: Role, permission: Permission) -> bool {
    role_permissions(role).contains(&permission)
}

pub fn has_panel_permission(permission: Permission) -> bool {
    PANEL_PERMISSIONS.contains(&permission)
}

pub fn is_room_scoped(role: Role) -> bool {
    role.is_room_scoped()
}

fn role_permissions(role: Role) -> &'static [Permission] {
    match role {
        Role::Owner => &[
            DEVICE_READ,
            DEVICE_CONFIGURE,
            SCENE_MANAGE,
            LOCATION_MANAGE,
            SYSTEM_ADMIN,
            SYSTEM_DANGEROUS,
            USER_MANAGE_ALL,
        ],
        Role::Admin => &[
            DEVICE_READ,
            DEVICE_CONFIGURE,
            SCENE_MANAGE,
            LOCATION_MANAGE,
            SYSTEM_ADMIN,
            USER_MANAGE_ALL,
        ],
        Role::User => &[DEVICE_READ, DEVICE_CONFIGURE, SCENE_MANAGE],
    }
}

/// Keep only the items whose room id is in scope. Items without a room
/// id are excluded for scoped callers — "no room id" never means
/// "visible everywhere".
pub fn filter_by_rooms<T>(items: Vec<T>, scope: Option<&RoomScope>, room_id_of: impl Fn(&T) -> &str) -> Vec<T> {
    match scope {
        None => items,
        Some(scope) => items
            .into_iter()
            .filter(|item| scope.can_access(room_id_of(item)))
            .collect(),
    }
}

/// Wraps a list endpoint's response so unprivileged users see "no
/// data" rather than a 403/404 that would leak whether the collection
/// is non-empty for someone else.
pub fn scoped_list<T: Serialize>(
    key: &str,
    scope: Option<&RoomScope>,
    items: Vec<T>,
) -> serde_json::Value {
    if let Some(scope) = scope
        && scope.room_ids.is_empty()
    {
        return json!({ key: Vec::<T>::new(), "count": 0 });
    }
    let count = items.len();
    json!({ key: items, "count": count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_has_every_permission_admin_has() {
        for p in role_permissions(Role::Admin) {
            assert!(has_permission(Role::Owner, *p));
        }
    }

    #[test]
    fn user_lacks_system_admin() {
        assert!(!has_permission(Role::User, SYSTEM_ADMIN));
    }

    #[test]
    fn panel_permission_set_is_minimal() {
        assert!(has_panel_permission(DEVICE_READ));
        assert!(!has_panel_permission(DEVICE_CONFIGURE));
        assert!(!has_panel_permission(SYSTEM_ADMIN));
    }

    #[test]
    fn scoped_list_short_circuits_on_empty_scope() {
        let scope = RoomScope::default();
        let value = scoped_list("devices", Some(&scope), vec!["a", "b"]);
        assert_eq!(value["count"], 0);
        assert_eq!(value["devices"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn scoped_list_passes_through_when_unrestricted() {
        let value = scoped_list("devices", None, vec!["a", "b"]);
        assert_eq!(value["count"], 2);
    }
}
