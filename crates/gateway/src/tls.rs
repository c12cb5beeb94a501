//! TLS configuration (C12). Certificate acquisition, rotation, and ACME
//! are explicitly out of scope (§1 Non-goals) — this module only loads
//! an already-issued cert/key pair from configured paths. The teacher's
//! self-signed-generation fallback (`rcgen`) is dropped entirely rather
//! than carried as dead weight; see `DESIGN.md`.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

/// `None` means the gateway serves plain HTTP — valid when neither
/// `tls_cert` nor `tls_key` is configured. `GatewayConfig::validate`
/// already rejects the case where only one of the pair is set.
pub fn build_tls_config(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Option<ServerConfig>> {
    let (Some(cert), Some(key)) = (cert_path, key_path) else {
        return Ok(None);
    };
    let (certs, priv_key) = load_certs_from_files(cert, key)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, priv_key)
        .context("failed to build TLS server config")?;
    Ok(Some(config))
}

fn load_certs_from_files(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_pem = std::fs::read(cert_path).with_context(|| format!("failed to read TLS cert: {cert_path}"))?;
    let key_pem = std::fs::read(key_path).with_context(|| format!("failed to read TLS key: {key_path}"))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse TLS certificate PEM")?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("failed to parse TLS private key PEM")?
        .context("no private key found in PEM file")?;

    tracing::info!("loaded TLS cert from {cert_path}");
    Ok((certs, key))
}

pub fn make_acceptor(config: ServerConfig) -> tokio_rustls::TlsAcceptor {
    tokio_rustls::TlsAcceptor::from(Arc::new(config))
}
