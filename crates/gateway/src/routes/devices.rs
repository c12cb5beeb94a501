//! Device, scene, panel, and audit routes. The representative set named
//! in `SPEC_FULL.md` §6 — enough surface to exercise `scoped_list`,
//! per-item scope checks, and the command/activation path end to end.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bridge;
use crate::context;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Identity, RoomScope};
use crate::state::AppState;

/// `GET /devices` — scoped list; unprivileged users with an empty
/// scope see `{devices: [], count: 0}` rather than a 403/404 that would
/// leak whether the collection is non-empty for someone else.
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    room_scope: Option<Extension<RoomScope>>,
) -> GatewayResult<impl IntoResponse> {
    let scope = context::effective_scope_of(&identity, room_scope.map(|e| e.0));
    let devices = state
        .device_registry
        .list()
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))?;
    let filtered = crate::authz::filter_by_rooms(devices, scope.as_ref(), |d| &d.room_id);
    Ok(Json(crate::authz::scoped_list("devices", scope.as_ref(), filtered)))
}

/// `GET /devices/{id}` — scope-checked single read.
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    room_scope: Option<Extension<RoomScope>>,
) -> GatewayResult<impl IntoResponse> {
    let scope = context::effective_scope_of(&identity, room_scope.map(|e| e.0));
    let device = state
        .device_registry
        .get(&id)
        .await
        .map_err(|_| GatewayError::NotFound("device not found".to_string()))?;
    if let Some(scope) = &scope
        && !scope.can_access(&device.room_id)
    {
        return Err(GatewayError::Forbidden("device not in accessible rooms".to_string()));
    }
    Ok(Json(json!({
        "id": device.id,
        "room_id": device.room_id,
        "protocol": device.protocol,
        "name": device.name,
        "state": device.state,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
}

/// `PUT /devices/{id}/state` — the outbound command path (§4.10).
/// Always 202: delivery is asynchronous, and bridges may be offline.
pub async fn put_device_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    room_scope: Option<Extension<RoomScope>>,
    Json(req): Json<CommandRequest>,
) -> GatewayResult<impl IntoResponse> {
    let scope = context::effective_scope_of(&identity, room_scope.map(|e| e.0));
    let command_id = bridge::publish_command(&state, &id, &req.command, req.parameters, scope.as_ref()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "command_id": command_id, "status": "accepted" })),
    ))
}

/// `GET /devices/{id}/state` — current state read, scope-checked the
/// same way as `get_device`.
pub async fn get_device_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    room_scope: Option<Extension<RoomScope>>,
) -> GatewayResult<impl IntoResponse> {
    let scope = context::effective_scope_of(&identity, room_scope.map(|e| e.0));
    let device = state
        .device_registry
        .get(&id)
        .await
        .map_err(|_| GatewayError::NotFound("device not found".to_string()))?;
    if let Some(scope) = &scope
        && !scope.can_access(&device.room_id)
    {
        return Err(GatewayError::Forbidden("device not in accessible rooms".to_string()));
    }
    Ok(Json(json!({ "state": device.state })))
}

/// `POST /scenes/{id}/activate` (§4.10) — verifies access *and*
/// scene-manage grant, each with its own 403 wording, then hands off to
/// the scene engine.
pub async fn activate_scene(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    room_scope: Option<Extension<RoomScope>>,
) -> GatewayResult<impl IntoResponse> {
    let scope = context::effective_scope_of(&identity, room_scope.map(|e| e.0));
    let execution_id = bridge::activate_scene(&state, &id, scope.as_ref()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id, "status": "accepted" })),
    ))
}

/// `GET /panels` — admin/owner only (`system:admin`, enforced by
/// `require_permission` in `router.rs`). Token hashes never leave this
/// handler.
pub async fn list_panels(State(state): State<Arc<AppState>>) -> GatewayResult<impl IntoResponse> {
    let panels = state
        .panel_repo
        .list()
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))?;
    let summaries: Vec<Value> = panels
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "is_active": p.is_active,
                "last_seen_at": p.last_seen_at,
            })
        })
        .collect();
    Ok(Json(json!({ "panels": summaries, "count": summaries.len() })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// `GET /audit` — admin/owner only (`system:admin`).
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> GatewayResult<impl IntoResponse> {
    let Some(audit_repo) = &state.audit_repo else {
        return Ok(Json(json!({ "entries": Vec::<Value>::new(), "count": 0 })));
    };
    let entries = audit_repo
        .list(query.limit)
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))?;
    Ok(Json(json!({ "entries": entries, "count": entries.len() })))
}
