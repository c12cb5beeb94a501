use serde::{Deserialize, Serialize};

/// Top-level gateway configuration, loaded from TOML with every field
/// defaulted so a missing/partial config file is never a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub dev_mode: DevModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to TLS certificate PEM. Both this and `tls_key` must be set
    /// to serve HTTPS; otherwise the gateway serves plain HTTP.
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// HMAC secret for signing access JWTs. Generated at startup and
    /// logged once if absent — see `hearth_gateway::crypto::generate_secret`.
    pub jwt_secret: Option<String>,
    #[serde(default = "default_web_root")]
    pub web_root: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_read_header_timeout_secs")]
    pub read_header_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            tls_cert: None,
            tls_key: None,
            jwt_secret: None,
            web_root: default_web_root(),
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit_bytes(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            read_header_timeout_secs: default_read_header_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_access_ttl_minutes")]
    pub access_ttl_minutes: u64,
    #[serde(default = "default_refresh_ttl_hours")]
    pub refresh_ttl_hours: u64,
    #[serde(default = "default_absolute_session_days")]
    pub absolute_session_days: u64,
    #[serde(default = "default_ws_ticket_ttl_secs")]
    pub ws_ticket_ttl_secs: u64,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
    #[serde(default = "default_max_password_len")]
    pub max_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_minutes: default_access_ttl_minutes(),
            refresh_ttl_hours: default_refresh_ttl_hours(),
            absolute_session_days: default_absolute_session_days(),
            ws_ticket_ttl_secs: default_ws_ticket_ttl_secs(),
            min_password_len: default_min_password_len(),
            max_password_len: default_max_password_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_prefix")]
    pub prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            prefix: default_bus_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_audit_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_buffer: default_send_buffer(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DevModeConfig {
    #[serde(default)]
    pub simulate_without_bridge: bool,
}

impl GatewayConfig {
    /// Fatal ("ERROR:") and advisory ("WARNING:") config problems, in the
    /// same convention as the rest of the issue list: callers decide what
    /// to do with each prefix (abort vs. log and continue).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(_), None) | (None, Some(_)) => {
                issues.push(
                    "ERROR: tls_cert and tls_key must both be set or both be absent".to_string(),
                );
            }
            _ => {}
        }
        if self.server.port == 0 {
            issues.push("ERROR: server.port must be non-zero".to_string());
        }
        if self.auth.access_ttl_minutes == 0 {
            issues.push("ERROR: auth.access_ttl_minutes must be > 0".to_string());
        }
        if self.auth.refresh_ttl_hours == 0 {
            issues.push("ERROR: auth.refresh_ttl_hours must be > 0".to_string());
        }
        if self.auth.absolute_session_days == 0 {
            issues.push("ERROR: auth.absolute_session_days must be >= 1".to_string());
        }
        if self.rate_limit.limit == 0 {
            issues.push("ERROR: rate_limit.limit must be > 0".to_string());
        }
        if self.rate_limit.window_secs == 0 {
            issues.push("ERROR: rate_limit.window_secs must be >= 1".to_string());
        }
        if self.server.jwt_secret.is_none() {
            issues.push(
                "WARNING: server.jwt_secret not set, a random secret will be generated at startup \
                 (tokens won't survive a restart)"
                    .to_string(),
            );
        }
        if self.server.cors_origins.is_empty() {
            issues.push("WARNING: server.cors_origins is empty, CORS allows any origin".to_string());
        }

        if issues.iter().any(|i| i.starts_with("ERROR:")) {
            Err(issues)
        } else if issues.is_empty() {
            Ok(())
        } else {
            // Advisory-only issues still surface to the caller for logging,
            // but don't block startup.
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8443
}
fn default_web_root() -> String {
    "web/dist".to_string()
}
fn default_body_limit_bytes() -> usize {
    1024 * 1024
}
fn default_read_timeout_secs() -> u64 {
    15
}
fn default_write_timeout_secs() -> u64 {
    15
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_read_header_timeout_secs() -> u64 {
    5
}
fn default_access_ttl_minutes() -> u64 {
    15
}
fn default_refresh_ttl_hours() -> u64 {
    24
}
fn default_absolute_session_days() -> u64 {
    90
}
fn default_ws_ticket_ttl_secs() -> u64 {
    120
}
fn default_min_password_len() -> usize {
    8
}
fn default_max_password_len() -> usize {
    128
}
fn default_rate_limit() -> u32 {
    60
}
fn default_window_secs() -> u64 {
    60
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_bus_prefix() -> String {
    "hearth".to_string()
}
fn default_audit_queue_capacity() -> usize {
    256
}
fn default_send_buffer() -> usize {
    256
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_pong_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_with_only_warnings() {
        let config = GatewayConfig::default();
        match config.validate() {
            Ok(()) => {}
            Err(issues) => assert!(issues.iter().all(|i| i.starts_with("WARNING:"))),
        }
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("port")));
    }

    #[test]
    fn mismatched_tls_pair_is_an_error() {
        let mut config = GatewayConfig::default();
        config.server.tls_cert = Some("cert.pem".to_string());
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("tls_cert and tls_key")));
    }
}
