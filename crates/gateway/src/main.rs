//! Reference entry point for `hearth-gateway`.
//!
//! Persistence and the message bus are external collaborators per
//! `spec.md` §1 — this binary wires the crate's in-memory repository and
//! bus doubles (`testsupport`, on by default via the `test-util`
//! feature) rather than a production store, so it runs standalone for
//! local development and demos. An embedder with real stores builds
//! against `hearth-gateway` as a library (`--no-default-features`) and
//! writes its own entry point wiring `AppStateDeps` to its own
//! repositories instead of this one.

#[cfg(not(feature = "test-util"))]
fn main() {
    eprintln!(
        "hearth-gateway's bundled main requires the `test-util` feature \
         (in-memory reference repositories). Build with default features \
         for a runnable demo server, or embed `hearth-gateway` as a \
         library with your own repository implementations."
    );
    std::process::exit(1);
}

#[cfg(feature = "test-util")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run().await
}

#[cfg(feature = "test-util")]
async fn run() -> anyhow::Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use hearth_gateway::lifecycle::Server;
    use hearth_gateway::model::User;
    use hearth_gateway::state::AppStateDeps;
    use hearth_gateway::testsupport::{
        InMemoryAuditRepo, InMemoryBus, InMemoryDeviceRegistry, InMemoryLocationRepo,
        InMemoryPanelRepo, InMemoryRoomAccessRepo, InMemorySceneEngine, InMemorySceneRegistry,
        InMemoryStateHistoryRepo, InMemoryTokenRepo, InMemoryTsdb, InMemoryUserRepo,
    };
    use hearth_gateway::{config as gateway_config, crypto};
    use hearth_protocol::Role;
    use tokio_util::sync::CancellationToken;
    use tracing_subscriber::EnvFilter;
    use uuid::Uuid;

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config_path, port_override, config_was_explicit) = parse_args();
    let mut config = gateway_config::load_config(&config_path)?;
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if !config_was_explicit && !config_path.exists() {
        // Demo convenience only: with no config file and no real bridge,
        // turn on the command simulator so the device command/state loop
        // is observable end to end out of the box.
        config.dev_mode.simulate_without_bridge = true;
    }

    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{issue}");
            } else {
                tracing::warn!("{issue}");
            }
        }
        if has_errors {
            anyhow::bail!("configuration has {} issue(s), fix the ERROR(s) above and restart", issues.len());
        }
    }

    let token_repo = Arc::new(InMemoryTokenRepo::default());
    let user_repo = Arc::new(InMemoryUserRepo::new(token_repo.clone()));
    seed_admin(&user_repo)?;

    let deps = AppStateDeps {
        config,
        user_repo,
        token_repo,
        panel_repo: Arc::new(InMemoryPanelRepo::default()),
        room_access_repo: Arc::new(InMemoryRoomAccessRepo::default()),
        device_registry: Arc::new(InMemoryDeviceRegistry::default()),
        scene_registry: Arc::new(InMemorySceneRegistry::default()),
        scene_engine: Arc::new(InMemorySceneEngine),
        location_repo: Arc::new(InMemoryLocationRepo::default()),
        tsdb: Arc::new(InMemoryTsdb::default()),
        state_history_repo: Arc::new(InMemoryStateHistoryRepo::default()),
        bus: Arc::new(InMemoryBus::default()),
        audit_repo: Some(Arc::new(InMemoryAuditRepo::default())),
    };

    let cancel = CancellationToken::new();
    let server = Server::build(deps, cancel.clone()).await?;
    server.start().await?;

    tracing::info!("hearth gateway ready (reference in-memory stores, admin/admin seeded)");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, closing gateway");

    server.close().await?;
    tracing::info!("hearth gateway shut down cleanly");

    fn seed_admin(repo: &InMemoryUserRepo) -> anyhow::Result<()> {
        let password_hash = crypto::hash_password("admin")?;
        repo.seed(User {
            id: Uuid::new_v4(),
            username: "admin".to_string(),
            display_name: "Administrator".to_string(),
            email: None,
            password_hash,
            role: Role::Owner,
            is_active: true,
        });
        Ok(())
    }

    fn parse_args() -> (PathBuf, Option<u16>, bool) {
        let args: Vec<String> = std::env::args().collect();
        let mut config_path = PathBuf::from("./config/gateway.toml");
        let mut port_override = None;
        let mut explicit = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    if i + 1 < args.len() {
                        config_path = PathBuf::from(&args[i + 1]);
                        explicit = true;
                        i += 1;
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        port_override = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        (config_path, port_override, explicit)
    }

    async fn wait_for_shutdown_signal() {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }

    Ok(())
}
