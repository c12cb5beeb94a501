//! Route-tree assembly (C6): wires every handler behind the admission
//! pipeline in the order `SPEC_FULL.md` §4.6 specifies. Global layers
//! (request-id, structured logging, panic recovery, CORS, body cap,
//! security headers, rate limit) apply to every request; the
//! authenticate → scope-resolution → permission-check stack is built
//! per route group via `route_layer`, paired with an `Extension<Permission>`
//! for groups that need one.
//!
//! Layer ordering note: the *last* `.layer()`/`.route_layer()` call
//! added becomes the *outermost* wrapper — it runs first on the way in
//! and last on the way out. Each route group below lists its
//! `route_layer` calls innermost-first so the resulting request order
//! reads top-to-bottom as authenticate, then scope, then permission.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Extension, Query, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use hearth_protocol::permissions::{DEVICE_CONFIGURE, DEVICE_READ, SCENE_MANAGE, SYSTEM_ADMIN};
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::{hub, middleware, routes};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/auth/login", post(routes::session::login))
        .route("/api/v1/auth/refresh", post(routes::session::refresh))
        .route("/api/v1/auth/logout", post(routes::session::logout))
        .route("/api/v1/ws", get(ws_upgrade));

    let authenticated = Router::new()
        .route("/api/v1/auth/change-password", post(routes::session::change_password))
        .route("/api/v1/auth/ws-ticket", post(routes::session::ws_ticket))
        .route_layer(from_fn_with_state(state.clone(), middleware::resolve_room_scope))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let device_read = Router::new()
        .route("/api/v1/devices", get(routes::devices::list_devices))
        .route("/api/v1/devices/{id}", get(routes::devices::get_device))
        .route("/api/v1/devices/{id}/state", get(routes::devices::get_device_state))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_permission))
        .route_layer(Extension(DEVICE_READ))
        .route_layer(from_fn_with_state(state.clone(), middleware::resolve_room_scope))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let device_configure = Router::new()
        .route("/api/v1/devices/{id}/state", put(routes::devices::put_device_state))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_permission))
        .route_layer(Extension(DEVICE_CONFIGURE))
        .route_layer(from_fn_with_state(state.clone(), middleware::resolve_room_scope))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let scene_manage = Router::new()
        .route("/api/v1/scenes/{id}/activate", post(routes::devices::activate_scene))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_permission))
        .route_layer(Extension(SCENE_MANAGE))
        .route_layer(from_fn_with_state(state.clone(), middleware::resolve_room_scope))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let admin_only = Router::new()
        .route("/api/v1/panels", get(routes::devices::list_panels))
        .route("/api/v1/audit", get(routes::devices::list_audit))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_permission))
        .route_layer(Extension(SYSTEM_ADMIN))
        .route_layer(from_fn_with_state(state.clone(), middleware::resolve_room_scope))
        .route_layer(from_fn_with_state(state.clone(), middleware::authenticate));

    let cors = build_cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.server.body_limit_bytes;

    public
        .merge(authenticated)
        .merge(device_read)
        .merge(device_configure)
        .merge(scene_manage)
        .merge(admin_only)
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::security_headers))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .extensions()
                        .get::<crate::context::RequestId>()
                        .map(|r| r.0.clone())
                        .unwrap_or_else(|| "-".to_string());
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                        tracing::event!(
                            Level::INFO,
                            status = %response.status().as_u16(),
                            duration_ms = %latency.as_millis(),
                            "completed"
                        );
                    },
                ),
        )
        .layer(from_fn(middleware::request_id))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    ticket: String,
}

/// `GET /api/v1/ws?ticket=...` — the ticket carries the identity; there
/// is no fallback to header-based auth for the upgrade itself, since
/// WebSocket headers are unreliable through proxies. A missing or
/// expired ticket fails with 401 *without* performing the upgrade.
async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = state.tickets.consume(&query.ticket) else {
        return middleware::unauthorized();
    };
    let hub_handle = state.hub.clone();
    let cancel = state.cancel.clone();
    ws.on_upgrade(move |socket| async move {
        hub::handle_socket(hub_handle, socket, ticket.identity, cancel).await;
    })
    .into_response()
}

/// Exposed so `lifecycle.rs` can inject per-connection peer-address
/// extensions the same way `axum::serve`'s `into_make_service_with_connect_info`
/// would — needed because TLS termination here is hand-rolled (manual
/// `rustls`/`hyper_util` accept loop) rather than routed through
/// `axum::serve`.
pub fn connect_info_extension(addr: std::net::SocketAddr) -> Extension<ConnectInfo<std::net::SocketAddr>> {
    Extension(ConnectInfo(addr))
}
