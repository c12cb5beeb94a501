//! The command bridge (C10): the asynchronous device/scene command
//! path. Outbound commands are published on the bus and acknowledged
//! with 202 — confirmation is asynchronous, never part of the request.
//! Inbound state updates fan out to the hub and write through to the
//! registry, time-series, and state-history stores; the four side
//! effects are independent, so one failing never suppresses another.

use std::sync::Arc;
use std::time::Duration;

use hearth_protocol::{CommandEnvelope, Qos};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::unix_now;
use crate::error::{GatewayError, GatewayResult};
use crate::model::RoomScope;
use crate::state::AppState;

fn command_topic(prefix: &str, protocol: &str, device_id: &str) -> String {
    format!("{prefix}/command/{protocol}/{device_id}")
}

fn state_topic_filter(prefix: &str) -> String {
    format!("{prefix}/state/+/+")
}

/// Outbound device command. Accepted-for-delivery semantics: a bus
/// publish failure is logged, not surfaced — bridges may legitimately
/// be offline.
pub async fn publish_command(
    state: &Arc<AppState>,
    device_id: &str,
    command: &str,
    parameters: Value,
    scope: Option<&RoomScope>,
) -> GatewayResult<String> {
    if command.trim().is_empty() {
        return Err(GatewayError::Validation("command must not be empty".to_string()));
    }

    let device = state
        .device_registry
        .get(device_id)
        .await
        .map_err(|_| GatewayError::NotFound("device not found".to_string()))?;

    if let Some(scope) = scope
        && !scope.can_access(&device.room_id)
    {
        return Err(GatewayError::Forbidden("device not in accessible rooms".to_string()));
    }

    let command_id = Uuid::new_v4().to_string();
    let envelope = CommandEnvelope {
        id: command_id.clone(),
        device_id: device_id.to_string(),
        command: command.to_string(),
        parameters: parameters.clone(),
        source: "api".to_string(),
    };
    match serde_json::to_vec(&envelope) {
        Ok(payload) => {
            let topic = command_topic(&state.config.bus.prefix, &device.protocol, device_id);
            if let Err(e) = state.bus.publish(&topic, payload, Qos::AtLeastOnce, false).await {
                tracing::warn!(device_id, error = ?e, "command publish failed, bridge may be offline");
            }
        }
        Err(e) => tracing::warn!(device_id, error = %e, "failed to serialise command envelope"),
    }

    if state.config.dev_mode.simulate_without_bridge {
        spawn_simulation(state.clone(), device_id.to_string(), command.to_string(), parameters);
    }

    Ok(command_id)
}

/// Scene activation: verify access and scene-manage grant, then hand
/// off to the scene engine. Analogous to the device command path but
/// synchronous-ish — the engine itself returns an execution id rather
/// than going through the bus.
pub async fn activate_scene(
    state: &Arc<AppState>,
    scene_id: &str,
    scope: Option<&RoomScope>,
) -> GatewayResult<String> {
    let scene = state
        .scene_registry
        .get(scene_id)
        .await
        .map_err(|_| GatewayError::NotFound("scene not found".to_string()))?;

    if let Some(scope) = scope {
        if !scope.can_access(&scene.room_id) {
            return Err(GatewayError::Forbidden("scene not in accessible rooms".to_string()));
        }
        if !scope.can_manage_scenes(&scene.room_id) {
            return Err(GatewayError::Forbidden("not permitted to manage scenes in this room".to_string()));
        }
    }

    state
        .scene_engine
        .activate(scene_id)
        .await
        .map_err(|e| GatewayError::Internal(format!("{e:?}")))
}

/// Subscribes to `<prefix>/state/+/+` for the lifetime of `state`'s
/// cancellation context. The bus handler is synchronous by contract
/// (narrow trait surface, §6), so it only spawns the async work.
pub async fn spawn_state_subscriber(state: Arc<AppState>) -> GatewayResult<()> {
    let filter = state_topic_filter(&state.config.bus.prefix);
    state
        .bus
        .subscribe(
            &filter,
            Qos::AtLeastOnce,
            Box::new(move |_topic, payload| {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_state_update(&state, &payload).await;
                });
            }),
        )
        .await
        .map_err(|e| GatewayError::Unavailable(format!("bus subscribe failed: {e:?}")))
}

async fn handle_state_update(state: &Arc<AppState>, payload: &[u8]) {
    let Ok(value) = serde_json::from_slice::<Value>(payload) else {
        tracing::warn!("discarding malformed state update payload");
        return;
    };
    let device_id = value.get("device_id").and_then(Value::as_str).map(str::to_string);
    let device_state = value.get("state").cloned();

    state.hub.broadcast("device.state_changed", value.clone()).await;

    let Some(device_id) = device_id else { return };
    let Some(device_state) = device_state else { return };

    if let Err(e) = state.device_registry.write_state(&device_id, device_state.clone()).await {
        tracing::warn!(device_id = %device_id, error = ?e, "device registry write-through failed");
    }

    if let Value::Object(fields) = &device_state {
        let ts = unix_now();
        for (field, field_value) in fields {
            let Some(numeric) = as_numeric(field_value) else { continue };
            if let Err(e) = state.tsdb.append_sample(&device_id, field, numeric, ts).await {
                tracing::debug!(device_id = %device_id, field, error = ?e, "tsdb append failed");
            }
        }
    }

    if let Err(e) = state
        .state_history_repo
        .append(&device_id, device_state, unix_now())
        .await
    {
        tracing::debug!(device_id = %device_id, error = ?e, "state history append failed");
    }
}

fn as_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

const SIMULATION_DELAY: Duration = Duration::from_millis(400);

fn spawn_simulation(state: Arc<AppState>, device_id: String, command: String, parameters: Value) {
    tokio::spawn(async move {
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(SIMULATION_DELAY) => false,
            _ = state.cancel.cancelled() => true,
        };
        if cancelled {
            return;
        }

        let Ok(device) = state.device_registry.get(&device_id).await else {
            return;
        };
        let next_state = simulate_next_state(&device.state, &command, &parameters);

        let payload = serde_json::json!({ "device_id": device_id, "state": next_state });
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                let topic = format!("{}/state/{}/{}", state.config.bus.prefix, device.protocol, device_id);
                if let Err(e) = state.bus.publish(&topic, bytes, Qos::AtLeastOnce, false).await {
                    tracing::debug!(device_id, error = ?e, "simulated state publish failed");
                }
            }
            Err(e) => tracing::debug!(device_id, error = %e, "failed to serialise simulated state"),
        }
    });
}

/// Deterministic command→state mapping used only when no real bridge
/// is configured. Unknown commands fall back to a param merge — see
/// `DESIGN.md` for the open question this carries forward from the
/// source material.
fn simulate_next_state(current: &Value, command: &str, parameters: &Value) -> Value {
    let mut next = current.clone();
    if !next.is_object() {
        next = serde_json::json!({});
    }
    let obj = next.as_object_mut().expect("coerced to object above");

    match command {
        "on" => {
            obj.insert("on".to_string(), Value::Bool(true));
        }
        "off" => {
            obj.insert("on".to_string(), Value::Bool(false));
        }
        "toggle" => {
            let was_on = obj.get("on").and_then(Value::as_bool).unwrap_or(false);
            obj.insert("on".to_string(), Value::Bool(!was_on));
        }
        "dim" | "set_level" => {
            if let Some(level) = parameters.get("level") {
                obj.insert("level".to_string(), level.clone());
            }
        }
        "set_position" => {
            if let Some(position) = parameters.get("position") {
                obj.insert("position".to_string(), position.clone());
            }
        }
        "set_tilt" => {
            if let Some(tilt) = parameters.get("tilt") {
                obj.insert("tilt".to_string(), tilt.clone());
            }
        }
        "set_setpoint" => {
            if let Some(setpoint) = parameters.get("setpoint") {
                obj.insert("setpoint".to_string(), setpoint.clone());
            }
        }
        "set_mode" => {
            if let Some(mode) = parameters.get("mode") {
                obj.insert("mode".to_string(), mode.clone());
            }
        }
        _ => {
            if let Some(params) = parameters.as_object() {
                for (k, v) in params {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_toggle() {
        let state = serde_json::json!({ "on": false });
        assert_eq!(simulate_next_state(&state, "on", &Value::Null)["on"], true);
        assert_eq!(simulate_next_state(&state, "off", &Value::Null)["on"], false);
        assert_eq!(simulate_next_state(&state, "toggle", &Value::Null)["on"], true);
    }

    #[test]
    fn dim_sets_level_from_parameters() {
        let state = serde_json::json!({});
        let params = serde_json::json!({ "level": 42 });
        assert_eq!(simulate_next_state(&state, "dim", &params)["level"], 42);
    }

    #[test]
    fn unknown_command_merges_parameters() {
        let state = serde_json::json!({ "existing": 1 });
        let params = serde_json::json!({ "custom_field": "value" });
        let next = simulate_next_state(&state, "unknown_thing", &params);
        assert_eq!(next["existing"], 1);
        assert_eq!(next["custom_field"], "value");
    }
}
