//! The admission pipeline applied to every HTTP request: request-id,
//! security headers, CORS, rate limiting, dual-path authentication, and
//! room-scope resolution. Recovery, structured logging, and the body
//! cap are layered in `router.rs` straight from `tower_http` — they
//! need no gateway-specific state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hearth_protocol::Permission;

use crate::context::{self, RequestId};
use crate::crypto;
use crate::error::GatewayError;
use crate::model::{AuditEntry, Identity, PanelContext};
use crate::state::AppState;

/// Honours a client-supplied `X-Request-ID` if non-empty; otherwise
/// generates 8 bytes of hex. Always echoed on the response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let incoming = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());
    let id = incoming.unwrap_or_else(|| crypto::generate_random_hex(8));
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

const SECURITY_HEADERS_CSP: &str = "default-src 'self'";

/// `X-Content-Type-Options`, `X-Frame-Options`, `X-XSS-Protection`, a
/// CSP on API paths, and HSTS when TLS is enabled.
pub async fn security_headers(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let tls_enabled = state.config.server.tls_cert.is_some();
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("0"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(SECURITY_HEADERS_CSP),
    );
    if tls_enabled {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}

/// Per-`path|client_ip` fixed-window rate limiting. Client IP comes
/// only from the TCP peer address — forwarded headers are trivially
/// spoofable on a LAN and are deliberately ignored.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = crate::ratelimit::RateLimiter::key(req.uri().path(), &addr.ip().to_string());
    let (allowed, retry_after) = state.rate_limiter.allow(
        &key,
        state.config.rate_limit.limit,
        Duration::from_secs(state.config.rate_limit.window_secs),
    );
    if !allowed {
        return GatewayError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }
        .into_response();
    }
    next.run(req).await
}

/// Dual-path authentication: `X-Panel-Token` takes priority over
/// `Authorization: Bearer`. A request never carries both a panel
/// context and claims — the two are modelled as disjoint `Identity`
/// variants, not optional fields probed independently.
pub async fn authenticate(State(state): State<Arc<AppState>>, mut req: Request<Body>, next: Next) -> Response {
    if let Some(raw) = req
        .headers()
        .get("x-panel-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
    {
        let hash = crypto::hash_token(&raw);
        match state.panel_repo.get_by_token_hash(&hash).await {
            Ok(panel) if panel.is_active => {
                let room_ids = state
                    .panel_repo
                    .get_room_ids(panel.id)
                    .await
                    .unwrap_or_default();
                req.extensions_mut().insert(Identity::Panel(PanelContext {
                    panel_id: panel.id,
                    room_ids,
                }));
                // Fire-and-forget last-seen update — never blocks admission.
                let panel_repo = state.panel_repo.clone();
                let panel_id = panel.id;
                let now = crypto::unix_now();
                tokio::spawn(async move {
                    let _ = panel_repo.update_last_seen(panel_id, now).await;
                });
                return next.run(req).await;
            }
            _ => return GatewayError::AuthFailure("invalid credentials".to_string()).into_response(),
        }
    }

    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = bearer else {
        return GatewayError::AuthFailure("missing credentials".to_string()).into_response();
    };
    match crypto::parse_token(token, &state.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(Identity::User(claims));
            next.run(req).await
        }
        Err(_) => GatewayError::AuthFailure("invalid credentials".to_string()).into_response(),
    }
}

/// For panels: nothing extra — their scope is always their fixed room
/// set (see `PanelContext::scope`). For room-scoped user roles:
/// resolve and inject a `RoomScope`. For admin/owner: leave scope
/// unset, meaning unrestricted.
pub async fn resolve_room_scope(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(claims) = context::claims_from(&req)
        && hearth_protocol::Role::User == claims.role
        && let Ok(user_id) = claims.sub.parse::<uuid::Uuid>()
    {
        match state.room_access_repo.resolve_room_scope(user_id).await {
            Ok(scope) => {
                req.extensions_mut().insert(scope);
            }
            Err(_) => return GatewayError::Internal("failed to resolve room scope".to_string()).into_response(),
        }
    }
    next.run(req).await
}

/// Asserts the caller has the permission attached to the route via an
/// `Extension<Permission>` layer (see `router.rs` for the
/// `.route_layer(Extension(perm))` pairing this expects). Denies with
/// 403 and a `permission_denied` audit entry otherwise.
pub async fn require_permission(
    State(state): State<Arc<AppState>>,
    Extension(permission): Extension<Permission>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identity = context::identity_from(&req);
    let allowed = match &identity {
        Some(Identity::User(claims)) => crate::authz::has_permission(claims.role, permission),
        Some(Identity::Panel(_)) => crate::authz::has_panel_permission(permission),
        None => false,
    };
    if !allowed {
        let user_id = match &identity {
            Some(Identity::User(claims)) => claims.sub.parse().ok(),
            _ => None,
        };
        let mut entry = AuditEntry::new("permission_denied", "request")
            .with_details(serde_json::json!({ "permission": permission, "path": req.uri().path() }));
        if let Some(uid) = user_id {
            entry = entry.with_user(uid);
        }
        state.audit_enqueue(entry);
        return GatewayError::Forbidden(format!("missing permission: {permission}")).into_response();
    }
    next.run(req).await
}

pub fn unauthorized() -> Response {
    GatewayError::AuthFailure("missing credentials".to_string()).into_response()
}
