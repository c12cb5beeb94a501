//! Request-scoped context. Axum's `Extensions` is the collision-safe
//! key store the spec calls for — each piece of context is its own
//! type, inserted by middleware and read back by typed extension
//! extraction. Accessors never panic: a missing value is a null
//! sentinel (`None`), not a raised error.

use axum::http::Request;

use crate::model::{Identity, PanelContext, RoomScope};

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn request_id_from<B>(req: &Request<B>) -> Option<String> {
    req.extensions().get::<RequestId>().map(|r| r.0.clone())
}

pub fn identity_from<B>(req: &Request<B>) -> Option<Identity> {
    req.extensions().get::<Identity>().cloned()
}

pub fn claims_from<B>(req: &Request<B>) -> Option<hearth_protocol::Claims> {
    match identity_from(req)? {
        Identity::User(claims) => Some(claims),
        Identity::Panel(_) => None,
    }
}

pub fn panel_from<B>(req: &Request<B>) -> Option<PanelContext> {
    match identity_from(req)? {
        Identity::Panel(ctx) => Some(ctx),
        Identity::User(_) => None,
    }
}

/// Room scope explicitly resolved by the scope-resolution middleware
/// for room-scoped user roles. Not set for admin/owner or panels — a
/// panel's scope is derived from its `PanelContext` instead.
pub fn room_scope_from<B>(req: &Request<B>) -> Option<RoomScope> {
    req.extensions().get::<RoomScope>().cloned()
}

/// `room_scope_from(ctx) OR (panel ctx => {room_ids, manage=false}) OR
/// nil`. Handlers must call this rather than branching on role
/// directly, so scope enforcement stays in one place.
pub fn effective_scope<B>(req: &Request<B>) -> Option<RoomScope> {
    if let Some(scope) = room_scope_from(req) {
        return Some(scope);
    }
    match identity_from(req)? {
        Identity::Panel(ctx) => Some(ctx.scope()),
        Identity::User(_) => None,
    }
}

/// Same precedence as `effective_scope`, for handlers that already hold
/// the identity and an optional `RoomScope` extension rather than the
/// raw request (axum's typed extractors give handlers these directly).
pub fn effective_scope_of(identity: &Identity, room_scope: Option<RoomScope>) -> Option<RoomScope> {
    if let Some(scope) = room_scope {
        return Some(scope);
    }
    match identity {
        Identity::Panel(ctx) => Some(ctx.scope()),
        Identity::User(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn effective_scope_prefers_resolved_scope_over_panel_fallback() {
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(Identity::Panel(PanelContext {
            panel_id: Uuid::new_v4(),
            room_ids: HashSet::from(["room-a".to_string()]),
        }));
        req.extensions_mut().insert(RoomScope {
            room_ids: HashSet::from(["room-b".to_string()]),
            manage_scenes_rooms: HashSet::new(),
        });
        let scope = effective_scope(&req).unwrap();
        assert!(scope.can_access("room-b"));
        assert!(!scope.can_access("room-a"));
    }

    #[test]
    fn effective_scope_falls_back_to_panel_rooms() {
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(Identity::Panel(PanelContext {
            panel_id: Uuid::new_v4(),
            room_ids: HashSet::from(["room-a".to_string()]),
        }));
        let scope = effective_scope(&req).unwrap();
        assert!(scope.can_access("room-a"));
    }

    #[test]
    fn effective_scope_is_nil_for_unscoped_user() {
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(Identity::User(hearth_protocol::Claims {
            sub: Uuid::new_v4().to_string(),
            role: hearth_protocol::Role::Admin,
            iat: 0,
            exp: 0,
        }));
        assert!(effective_scope(&req).is_none());
    }
}
