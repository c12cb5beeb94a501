use std::path::Path;

use anyhow::{Context, Result};
pub use hearth_protocol::config::{
    AuditConfig, AuthConfig, BusConfig, DevModeConfig, HubConfig, RateLimitConfig, ServerConfig,
};
pub use hearth_protocol::GatewayConfig;

/// Load configuration from a TOML file. A missing file is not a hard
/// failure — it falls back to defaults with a warning, the way an
/// operator's first run against this gateway should behave.
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    if !path.exists() {
        tracing::warn!(
            "config file not found at {}, using defaults",
            path.display()
        );
        return Ok(GatewayConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: GatewayConfig =
        toml::from_str(&contents).with_context(|| "failed to parse config TOML")?;
    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}
