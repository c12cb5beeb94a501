//! Server lifecycle (C11): dependency wiring, start/stop, graceful
//! shutdown, and a health probe. `Server` is the one place that owns
//! every piece of otherwise-global mutable state — the ticket store,
//! the hub, and the rate-limit map all live on `AppState`, itself owned
//! here — so nothing in this crate is a module-level singleton and
//! nothing leaks across two `Server`s built in the same process (e.g.
//! two instances in a test binary).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge;
use crate::router::build_router;
use crate::state::{AppState, AppStateDeps};
use crate::tls;

/// Bound on the graceful-shutdown wait for the HTTP listener, per
/// `SPEC_FULL.md` §4.11.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wraps an `AppState` with the background tasks and listener handle
/// that make up a running gateway instance.
pub struct Server {
    state: Arc<AppState>,
    cancel: CancellationToken,
    listener_addr: AsyncMutex<Option<SocketAddr>>,
    http_task: AsyncMutex<Option<JoinHandle<()>>>,
    background_tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Wire dependencies into an `AppState` and start every long-lived
    /// task anchored to an internal cancellation token derived from
    /// `parent_cancel` — audit drainer (if an audit repo was supplied),
    /// ticket sweeper, rate-limit sweeper, and the bus state-topic
    /// subscription. Does not yet bind a listener; call `start` for
    /// that. Required dependencies (the device registry) are asserted
    /// here; everything else (audit, MQTT-style bus handlers beyond the
    /// one subscription below) is optional by construction.
    pub async fn build(deps: AppStateDeps, parent_cancel: CancellationToken) -> Result<Arc<Self>> {
        let cancel = parent_cancel.child_token();
        let state = AppState::new(deps, cancel.clone());

        let mut background = Vec::new();
        background.push(spawn_ticket_sweeper(state.clone(), cancel.clone()));
        background.push(spawn_rate_limit_sweeper(state.clone(), cancel.clone()));

        if let Err(e) = bridge::spawn_state_subscriber(state.clone()).await {
            // The bus may legitimately be offline at startup (dev mode,
            // or a bridge that hasn't come up yet); this never blocks
            // the rest of startup.
            tracing::warn!(error = ?e, "failed to subscribe to bus state topics at startup");
        }

        Ok(Arc::new(Self {
            state,
            cancel,
            listener_addr: AsyncMutex::new(None),
            http_task: AsyncMutex::new(None),
            background_tasks: AsyncMutex::new(background),
        }))
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router, bind the configured address, and launch the
    /// HTTP(S) listener in a background task. Uses TLS when both
    /// `server.tls_cert` and `server.tls_key` are configured, else plain
    /// HTTP; either way the listener is anchored to this server's
    /// cancellation token so `close` unwinds it.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let cfg = &self.state.config.server;
        let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", cfg.bind, cfg.port))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().unwrap_or(addr);

        let router = build_router(self.state.clone());
        let tls_config = tls::build_tls_config(cfg.tls_cert.as_deref(), cfg.tls_key.as_deref())?;

        let task = match tls_config {
            Some(tls_config) => {
                tracing::info!("gateway listening on https://{local_addr}");
                spawn_tls_accept_loop(listener, tls::make_acceptor(tls_config), router, self.cancel.clone())
            }
            None => {
                tracing::info!("gateway listening on http://{local_addr}");
                spawn_plain_server(listener, router, self.cancel.clone())
            }
        };

        *self.listener_addr.lock().await = Some(local_addr);
        *self.http_task.lock().await = Some(task);
        Ok(())
    }

    /// Cancel the internal context — every sweeper, the audit drainer,
    /// and the hub's registered clients all exit on this signal — then
    /// wait for the HTTP listener to stop accepting connections, bounded
    /// by a 10s grace period. Returns an error if the grace period
    /// elapses first; callers decide whether that's fatal.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.state.hub.shutdown().await;

        if let Some(task) = self.http_task.lock().await.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err()
        {
            bail!("http listener did not stop within the shutdown grace period");
        }

        for task in self.background_tasks.lock().await.drain(..) {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }

        *self.listener_addr.lock().await = None;
        Ok(())
    }

    /// `Ok(())` only if the listener exists and `external` has not
    /// already been cancelled — mirrors `HealthCheck(ctx)` accepting the
    /// caller's own cancellation context rather than only this server's.
    pub async fn health_check(&self, external: &CancellationToken) -> Result<()> {
        if external.is_cancelled() {
            bail!("health check context already cancelled");
        }
        if self.listener_addr.lock().await.is_none() {
            bail!("listener is not running");
        }
        Ok(())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.listener_addr.lock().await
    }
}

fn spawn_ticket_sweeper(state: Arc<AppState>, cancel: CancellationToken) -> JoinHandle<()> {
    let ttl = Duration::from_secs(state.config.auth.ws_ticket_ttl_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => state.tickets.sweep(),
            }
        }
    })
}

fn spawn_rate_limit_sweeper(state: Arc<AppState>, cancel: CancellationToken) -> JoinHandle<()> {
    let window = Duration::from_secs(state.config.rate_limit.window_secs.max(1));
    let interval = Duration::from_secs(
        state
            .config
            .rate_limit
            .cleanup_interval_secs
            .max(state.config.rate_limit.window_secs)
            .max(1),
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => state.rate_limiter.sweep(window),
            }
        }
    })
}

/// Plain-HTTP listener via `axum::serve`, with the client's socket
/// address injected as `ConnectInfo` so `middleware::rate_limit` can key
/// on the real peer IP. Graceful shutdown is driven by the same
/// cancellation token every other long-lived task watches.
fn spawn_plain_server(listener: TcpListener, router: axum::Router, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, make_service)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "http server error");
        }
    })
}

/// TLS listener. `axum::serve` only speaks to a bare `TcpListener`, so
/// TLS termination is hand-rolled: accept the raw TCP connection,
/// perform the TLS handshake (bounded by a 10s timeout), then hand the
/// encrypted stream to the same tower `Router` via `hyper_util`'s
/// auto-detecting connection builder. `ConnectInfo` is injected per
/// connection through `router::connect_info_extension` since there's no
/// `axum::serve` here to do it automatically.
fn spawn_tls_accept_loop(
    listener: TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    router: axum::Router,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept tcp connection");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let router = router
                        .clone()
                        .layer(crate::router::connect_info_extension(peer_addr));
                    tokio::spawn(async move {
                        let tls_stream = match tokio::time::timeout(
                            Duration::from_secs(10),
                            acceptor.accept(stream),
                        )
                        .await
                        {
                            Ok(Ok(s)) => s,
                            Ok(Err(e)) => {
                                tracing::debug!(%peer_addr, error = %e, "tls handshake failed");
                                return;
                            }
                            Err(_) => {
                                tracing::debug!(%peer_addr, "tls handshake timed out");
                                return;
                            }
                        };
                        let io = hyper_util::rt::TokioIo::new(tls_stream);
                        let hyper_service = hyper_util::service::TowerToHyperService::new(router);
                        let builder =
                            hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new());
                        if let Err(e) = builder.serve_connection_with_upgrades(io, hyper_service).await {
                            tracing::debug!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::*;
    use std::sync::Arc as StdArc;

    fn deps() -> AppStateDeps {
        let token_repo = StdArc::new(InMemoryTokenRepo::default());
        AppStateDeps {
            config: hearth_protocol::GatewayConfig::default(),
            user_repo: StdArc::new(InMemoryUserRepo::new(token_repo.clone())),
            token_repo,
            panel_repo: StdArc::new(InMemoryPanelRepo::default()),
            room_access_repo: StdArc::new(InMemoryRoomAccessRepo::default()),
            device_registry: StdArc::new(InMemoryDeviceRegistry::default()),
            scene_registry: StdArc::new(InMemorySceneRegistry::default()),
            scene_engine: StdArc::new(InMemorySceneEngine),
            location_repo: StdArc::new(InMemoryLocationRepo::default()),
            tsdb: StdArc::new(InMemoryTsdb::default()),
            state_history_repo: StdArc::new(InMemoryStateHistoryRepo::default()),
            bus: StdArc::new(InMemoryBus::default()),
            audit_repo: Some(StdArc::new(InMemoryAuditRepo::default())),
        }
    }

    #[tokio::test]
    async fn health_check_fails_before_start_and_succeeds_after() {
        let mut cfg = hearth_protocol::GatewayConfig::default();
        cfg.server.port = 0; // ask the OS for an ephemeral port
        cfg.server.bind = "127.0.0.1".to_string();
        let mut d = deps();
        d.config = cfg;

        let cancel = CancellationToken::new();
        let server = Server::build(d, cancel.clone()).await.unwrap();
        let caller_ctx = CancellationToken::new();

        assert!(server.health_check(&caller_ctx).await.is_err());
        server.start().await.unwrap();
        assert!(server.health_check(&caller_ctx).await.is_ok());

        caller_ctx.cancel();
        assert!(server.health_check(&caller_ctx).await.is_err());

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_on_state_and_stops_listener() {
        let mut cfg = hearth_protocol::GatewayConfig::default();
        cfg.server.port = 0;
        cfg.server.bind = "127.0.0.1".to_string();
        let mut d = deps();
        d.config = cfg;

        let server = Server::build(d, CancellationToken::new()).await.unwrap();
        server.start().await.unwrap();
        assert!(server.local_addr().await.is_some());
        server.close().await.unwrap();
        assert!(server.local_addr().await.is_none());
    }
}
