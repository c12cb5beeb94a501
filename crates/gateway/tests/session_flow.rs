//! End-to-end scenarios against the real router, wired with in-memory
//! repository doubles. Each test below corresponds to one of the
//! end-to-end scenarios this gateway is expected to satisfy: login then
//! refresh then reuse-detection, the absolute session cap, room-scope
//! denial and list filtering, and the device command round trip.
//!
//! `axum-test`'s default mock transport doesn't populate
//! `ConnectInfo<SocketAddr>`, which the global rate-limit layer extracts
//! on every request, so every server here is built with a real-socket
//! transport.

use std::sync::Arc;

use axum_test::{TestServer, TestServerConfig, Transport};
use hearth_gateway::crypto;
use hearth_gateway::model::{User, UserRoomAccess};
use hearth_gateway::repo::{DeviceSummary, TokenRepo};
use hearth_gateway::router::build_router;
use hearth_gateway::state::{AppState, AppStateDeps};
use hearth_gateway::testsupport::{
    InMemoryAuditRepo, InMemoryBus, InMemoryDeviceRegistry, InMemoryLocationRepo,
    InMemoryPanelRepo, InMemoryRoomAccessRepo, InMemorySceneEngine, InMemorySceneRegistry,
    InMemoryStateHistoryRepo, InMemoryTokenRepo, InMemoryTsdb, InMemoryUserRepo,
};
use hearth_protocol::{GatewayConfig, Role};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    server: TestServer,
    user_repo: Arc<InMemoryUserRepo>,
    token_repo: Arc<InMemoryTokenRepo>,
    room_access_repo: Arc<InMemoryRoomAccessRepo>,
    device_registry: Arc<InMemoryDeviceRegistry>,
    audit_repo: Arc<InMemoryAuditRepo>,
}

fn test_server_config() -> TestServerConfig {
    // Real-socket transport: the global `rate_limit` middleware extracts
    // `ConnectInfo<SocketAddr>`, which the default mock transport never
    // populates.
    TestServerConfig {
        transport: Some(Transport::HttpRandomPort),
        ..Default::default()
    }
}

fn build_harness(owner_password: &str) -> (Harness, Uuid) {
    let token_repo = Arc::new(InMemoryTokenRepo::default());
    let user_repo = Arc::new(InMemoryUserRepo::new(token_repo.clone()));
    let room_access_repo = Arc::new(InMemoryRoomAccessRepo::default());
    let device_registry = Arc::new(InMemoryDeviceRegistry::default());
    let audit_repo = Arc::new(InMemoryAuditRepo::default());

    let owner_id = Uuid::new_v4();
    user_repo.seed(User {
        id: owner_id,
        username: "owner".to_string(),
        display_name: "Owner".to_string(),
        email: None,
        password_hash: crypto::hash_password(owner_password).unwrap(),
        role: Role::Owner,
        is_active: true,
    });

    let mut config = GatewayConfig::default();
    config.server.jwt_secret = Some("test-secret-test-secret-test-secret".to_string());
    config.auth.absolute_session_days = 90;

    let deps = AppStateDeps {
        config,
        user_repo: user_repo.clone(),
        token_repo: token_repo.clone(),
        panel_repo: Arc::new(InMemoryPanelRepo::default()),
        room_access_repo: room_access_repo.clone(),
        device_registry: device_registry.clone(),
        scene_registry: Arc::new(InMemorySceneRegistry::default()),
        scene_engine: Arc::new(InMemorySceneEngine),
        location_repo: Arc::new(InMemoryLocationRepo::default()),
        tsdb: Arc::new(InMemoryTsdb::default()),
        state_history_repo: Arc::new(InMemoryStateHistoryRepo::default()),
        bus: Arc::new(InMemoryBus::default()),
        audit_repo: Some(audit_repo.clone() as Arc<dyn hearth_gateway::repo::AuditRepo>),
    };

    let state = AppState::new(deps, CancellationToken::new());
    let router = build_router(state);
    let server = TestServer::new_with_config(router, test_server_config())
        .expect("failed to build test server");

    (
        Harness {
            server,
            user_repo,
            token_repo,
            room_access_repo,
            device_registry,
            audit_repo,
        },
        owner_id,
    )
}

fn seed_user(repo: &InMemoryUserRepo, username: &str, password: &str, role: Role) -> Uuid {
    let id = Uuid::new_v4();
    repo.seed(User {
        id,
        username: username.to_string(),
        display_name: username.to_string(),
        email: None,
        password_hash: crypto::hash_password(password).unwrap(),
        role,
        is_active: true,
    });
    id
}

/// S1: login, refresh once (rotation succeeds), then replay the
/// already-rotated refresh token — the whole family is revoked and a
/// `token_reuse` audit entry is recorded.
#[tokio::test]
async fn login_then_refresh_then_reuse_revokes_family() {
    let (harness, _owner_id) = build_harness("owner-password-123");

    let login_resp = harness
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "owner", "password": "owner-password-123" }))
        .await;
    login_resp.assert_status_ok();
    let pair: Value = login_resp.json();
    let first_refresh = pair["refresh_token"].as_str().unwrap().to_string();

    let refresh_resp = harness
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "refresh_token": first_refresh }))
        .await;
    refresh_resp.assert_status_ok();
    let rotated: Value = refresh_resp.json();
    let second_refresh = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first_refresh, second_refresh);

    // Replaying the now-revoked first token is theft detection: the
    // whole family (including the freshly rotated token) is revoked.
    let reuse_resp = harness
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "refresh_token": first_refresh }))
        .await;
    reuse_resp.assert_status_unauthorized();

    let second_attempt_resp = harness
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "refresh_token": second_refresh }))
        .await;
    second_attempt_resp.assert_status_unauthorized();

    let entries = harness.audit_repo.entries();
    assert!(entries.iter().any(|e| e.action == "token_reuse"));
}

/// S2: a refresh token whose family predates the absolute session cap
/// is rejected even though the token itself hasn't expired yet.
#[tokio::test]
async fn refresh_past_absolute_session_cap_is_rejected() {
    let (harness, owner_id) = build_harness("owner-password-123");

    let far_past = crypto::unix_now().saturating_sub(200 * 86_400);
    let raw_refresh = crypto::generate_refresh_token();
    let token = hearth_gateway::model::RefreshToken {
        id: Uuid::new_v4(),
        user_id: owner_id,
        family_id: Uuid::new_v4(),
        token_hash: crypto::hash_token(&raw_refresh),
        device_info: None,
        issued_at: far_past,
        expires_at: crypto::unix_now() + 3600,
        revoked: false,
        family_created_at: far_past,
    };
    // Injected directly into the harness's own token repo: this family
    // is older than any login flow in this process could produce, which
    // is the point — it simulates a session that has simply aged past
    // the absolute cap while its individual token is still unexpired.
    harness.token_repo.create(token).await.unwrap();

    let resp = harness
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({ "refresh_token": raw_refresh }))
        .await;
    resp.assert_status_unauthorized();

    let entries = harness.audit_repo.entries();
    assert!(entries.iter().any(|e| e.action == "session_expired"));
}

/// S4: a room-scoped user can read devices in their own room, is denied
/// a device in a room they don't have access to, and sees a scoped list
/// rather than the full device collection.
#[tokio::test]
async fn room_scope_denies_cross_room_reads_and_filters_lists() {
    let (harness, _owner_id) = build_harness("owner-password-123");
    let user_id = seed_user(&harness.user_repo, "resident", "resident-pw-123", Role::User);

    harness.room_access_repo.seed(
        user_id,
        vec![UserRoomAccess {
            user_id,
            room_id: "living-room".to_string(),
            can_manage_scenes: false,
        }],
    );

    harness.device_registry.seed(DeviceSummary {
        id: "lamp-1".to_string(),
        room_id: "living-room".to_string(),
        protocol: "zigbee".to_string(),
        name: "Lamp".to_string(),
        state: json!({ "on": false }),
    });
    harness.device_registry.seed(DeviceSummary {
        id: "thermostat-1".to_string(),
        room_id: "bedroom".to_string(),
        protocol: "zwave".to_string(),
        name: "Thermostat".to_string(),
        state: json!({ "on": true }),
    });

    let login_resp = harness
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "resident", "password": "resident-pw-123" }))
        .await;
    login_resp.assert_status_ok();
    let pair: Value = login_resp.json();
    let access_token = pair["access_token"].as_str().unwrap().to_string();

    let list_resp = harness
        .server
        .get("/api/v1/devices")
        .authorization_bearer(&access_token)
        .await;
    list_resp.assert_status_ok();
    let listed: Value = list_resp.json();
    let devices = listed["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["id"], "lamp-1");
    assert_eq!(listed["count"], 1);

    let allowed_resp = harness
        .server
        .get("/api/v1/devices/lamp-1")
        .authorization_bearer(&access_token)
        .await;
    allowed_resp.assert_status_ok();

    let denied_resp = harness
        .server
        .get("/api/v1/devices/thermostat-1")
        .authorization_bearer(&access_token)
        .await;
    denied_resp.assert_status_forbidden();
}

/// S6: an authorised command to a device in the caller's own room
/// resolves to a 202 accepted response carrying a command id, without
/// blocking on any downstream bridge/state roundtrip; the same command
/// against a device outside the caller's rooms is denied first.
#[tokio::test]
async fn device_command_round_trip_returns_accepted() {
    let (harness, _owner_id) = build_harness("owner-password-123");
    let user_id = seed_user(&harness.user_repo, "resident", "resident-pw-123", Role::User);

    harness.room_access_repo.seed(
        user_id,
        vec![UserRoomAccess {
            user_id,
            room_id: "living-room".to_string(),
            can_manage_scenes: false,
        }],
    );
    harness.device_registry.seed(DeviceSummary {
        id: "lamp-1".to_string(),
        room_id: "living-room".to_string(),
        protocol: "zigbee".to_string(),
        name: "Lamp".to_string(),
        state: json!({ "on": false }),
    });
    harness.device_registry.seed(DeviceSummary {
        id: "thermostat-1".to_string(),
        room_id: "bedroom".to_string(),
        protocol: "zwave".to_string(),
        name: "Thermostat".to_string(),
        state: json!({ "on": true }),
    });

    let login_resp = harness
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "resident", "password": "resident-pw-123" }))
        .await;
    login_resp.assert_status_ok();
    let pair: Value = login_resp.json();
    let access_token = pair["access_token"].as_str().unwrap().to_string();

    // A room-scoped user holds `device:configure`, but the scope check
    // inside the command bridge still denies a device outside their
    // rooms.
    let denied_resp = harness
        .server
        .put("/api/v1/devices/thermostat-1/state")
        .authorization_bearer(&access_token)
        .json(&json!({ "command": "on", "parameters": {} }))
        .await;
    denied_resp.assert_status_forbidden();

    let command_resp = harness
        .server
        .put("/api/v1/devices/lamp-1/state")
        .authorization_bearer(&access_token)
        .json(&json!({ "command": "on", "parameters": {} }))
        .await;
    command_resp.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = command_resp.json();
    assert_eq!(body["status"], "accepted");
    assert!(body["command_id"].as_str().is_some());
}

/// Login with an unknown username and login with the wrong password for
/// a known username resolve to the identical 401 body, by design — the
/// failure modes must never be distinguishable from a response alone.
#[tokio::test]
async fn login_failure_wording_is_uniform_across_failure_modes() {
    let (harness, _owner_id) = build_harness("owner-password-123");

    let unknown_user_resp = harness
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "nobody", "password": "whatever123" }))
        .await;
    unknown_user_resp.assert_status_unauthorized();
    let unknown_body: Value = unknown_user_resp.json();

    let wrong_password_resp = harness
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "owner", "password": "not-the-password" }))
        .await;
    wrong_password_resp.assert_status_unauthorized();
    let wrong_password_body: Value = wrong_password_resp.json();

    assert_eq!(unknown_body["message"], wrong_password_body["message"]);
}
