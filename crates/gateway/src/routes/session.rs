//! Session endpoints (C7): login, refresh (with family theft detection
//! and an absolute-lifetime cap), logout, change-password, and
//! ws-ticket issuance. Every credential-related failure returns the
//! same 401 wording so responses never reveal which case occurred.

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::crypto;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{AuditEntry, Identity, RefreshToken, TicketIdentity};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// `POST /auth/login`.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> GatewayResult<impl IntoResponse> {
    if req.password.len() > crypto::MAX_PASSWORD_BYTES {
        return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()));
    }

    let user = match state.user_repo.get_by_username(&req.username).await {
        Ok(user) => user,
        Err(_) => return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string())),
    };

    // Active-account check follows the password check, never precedes
    // it, so the two failure modes read identically to an attacker.
    match crypto::verify_password(&req.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            state.audit_enqueue(
                AuditEntry::new("login_failed", "user")
                    .with_entity_id(user.id.to_string())
                    .with_details(json!({ "reason": "invalid_password" })),
            );
            return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()));
        }
        Err(_) => return Err(GatewayError::Internal("password verification failed".to_string())),
    }

    if !user.is_active {
        state.audit_enqueue(
            AuditEntry::new("login_failed", "user")
                .with_entity_id(user.id.to_string())
                .with_details(json!({ "reason": "account_inactive" })),
        );
        return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()));
    }

    let pair = issue_token_pair(&state, &user.id, user.role, Uuid::new_v4()).await?;
    state.audit_enqueue(AuditEntry::new("login", "user").with_user(user.id));
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/refresh`.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> GatewayResult<impl IntoResponse> {
    let hash = crypto::hash_token(&req.refresh_token);
    let token = state
        .token_repo
        .get_by_token_hash(&hash)
        .await
        .map_err(|_| GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()))?;

    if token.revoked {
        let _ = state.token_repo.revoke_family(token.family_id).await;
        state.audit_enqueue(
            AuditEntry::new("token_reuse", "refresh_token")
                .with_user(token.user_id)
                .with_entity_id(token.family_id.to_string()),
        );
        return Err(GatewayError::AuthFailure("all sessions revoked".to_string()));
    }

    if crypto::unix_now() > token.expires_at {
        return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()));
    }

    let absolute_max_secs = state.config.auth.absolute_session_days * 86_400;
    if crypto::unix_now().saturating_sub(token.family_created_at) > absolute_max_secs {
        state.audit_enqueue(
            AuditEntry::new("session_expired", "refresh_token")
                .with_user(token.user_id)
                .with_entity_id(token.family_id.to_string())
                .with_details(json!({ "reason": "absolute_lifetime_exceeded" })),
        );
        return Err(GatewayError::AuthFailure("log in again".to_string()));
    }

    let user = state
        .user_repo
        .get_by_id(token.user_id)
        .await
        .map_err(|_| GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()))?;
    if !user.is_active {
        return Err(GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()));
    }

    let new_raw = crypto::generate_refresh_token();
    let new_token = RefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        family_id: token.family_id,
        token_hash: crypto::hash_token(&new_raw),
        device_info: token.device_info.clone(),
        issued_at: crypto::unix_now(),
        expires_at: crypto::unix_now() + state.config.auth.refresh_ttl_hours * 3600,
        revoked: false,
        family_created_at: token.family_created_at,
    };
    // Atomic rotation: revoke old, insert new, in one critical section —
    // no observer can see two non-revoked tokens in this family.
    state
        .token_repo
        .rotate_refresh_token(&hash, new_token)
        .await
        .map_err(|_| GatewayError::AuthFailure(INVALID_CREDENTIALS.to_string()))?;

    let access_token = crypto::generate_access_token(
        &user.id.to_string(),
        user.role,
        &state.jwt_secret,
        state.config.auth.access_ttl_minutes,
    )
    .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token: new_raw,
        token_type: "Bearer",
        expires_in: state.config.auth.access_ttl_minutes * 60,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// `POST /auth/logout` — idempotent; always 200 whether or not a token
/// was supplied or found.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LogoutRequest>,
) -> impl IntoResponse {
    if let Some(raw) = req.refresh_token {
        let hash = crypto::hash_token(&raw);
        if let Ok(token) = state.token_repo.get_by_token_hash(&hash).await {
            let _ = state.token_repo.revoke_family(token.family_id).await;
        }
    }
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// `POST /auth/change-password` (authenticated). Any window in which
/// old sessions survive a successful password change is a defect, so
/// the password update and the session revocation both run here before
/// responding, never one without the other.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ChangePasswordRequest>,
) -> GatewayResult<impl IntoResponse> {
    let Identity::User(claims) = identity else {
        return Err(GatewayError::Forbidden("panels cannot change passwords".to_string()));
    };
    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| GatewayError::Internal("malformed subject claim".to_string()))?;

    let min = state.config.auth.min_password_len;
    let max = state.config.auth.max_password_len;
    if !(min..=max).contains(&req.new_password.len()) {
        return Err(GatewayError::Validation(format!(
            "password must be between {min} and {max} characters"
        )));
    }

    let user = state
        .user_repo
        .get_by_id(user_id)
        .await
        .map_err(|_| GatewayError::Internal("authenticated user vanished".to_string()))?;
    match crypto::verify_password(&req.current_password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(GatewayError::AuthFailure("current password is incorrect".to_string())),
        Err(_) => return Err(GatewayError::Internal("password verification failed".to_string())),
    }

    let new_hash =
        crypto::hash_password(&req.new_password).map_err(|e| GatewayError::Internal(e.to_string()))?;
    // One repo call does both halves atomically: no window in which a
    // pre-change refresh token is still usable.
    state
        .user_repo
        .update_password_and_revoke_sessions(user_id, &new_hash)
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))?;

    state.audit_enqueue(AuditEntry::new("password_changed", "user").with_user(user_id));
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Serialize)]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in: u64,
}

/// `POST /auth/ws-ticket` (authenticated) — bridges the caller's
/// identity into a single-use credential the WebSocket upgrade can
/// validate without relying on (unreliable, proxy-stripped) headers.
pub async fn ws_ticket(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> GatewayResult<impl IntoResponse> {
    let ticket_identity = match identity {
        Identity::User(claims) => TicketIdentity::User {
            user_id: claims
                .sub
                .parse()
                .map_err(|_| GatewayError::Internal("malformed subject claim".to_string()))?,
            role: claims.role,
        },
        Identity::Panel(ctx) => TicketIdentity::Panel {
            panel_id: ctx.panel_id,
            room_ids: ctx.room_ids,
        },
    };
    let ttl = state.config.auth.ws_ticket_ttl_secs;
    let ticket = state.tickets.issue(ticket_identity, ttl);
    Ok(Json(WsTicketResponse { ticket, expires_in: ttl }))
}

async fn issue_token_pair(
    state: &Arc<AppState>,
    user_id: &Uuid,
    role: hearth_protocol::Role,
    family_id: Uuid,
) -> GatewayResult<TokenPairResponse> {
    let access_token = crypto::generate_access_token(
        &user_id.to_string(),
        role,
        &state.jwt_secret,
        state.config.auth.access_ttl_minutes,
    )
    .map_err(|e| GatewayError::Internal(e.to_string()))?;

    let raw_refresh = crypto::generate_refresh_token();
    let now = crypto::unix_now();
    let token = RefreshToken {
        id: Uuid::new_v4(),
        user_id: *user_id,
        family_id,
        token_hash: crypto::hash_token(&raw_refresh),
        device_info: None,
        issued_at: now,
        expires_at: now + state.config.auth.refresh_ttl_hours * 3600,
        revoked: false,
        family_created_at: now,
    };
    state
        .token_repo
        .create(token)
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))?;

    Ok(TokenPairResponse {
        access_token,
        refresh_token: raw_refresh,
        token_type: "Bearer",
        expires_in: state.config.auth.access_ttl_minutes * 60,
    })
}
