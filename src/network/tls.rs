//! TLS acceptor construction.

use anyhow::{bail, Context as _};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::io::Cursor;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from PEM certificate and key files.
///
/// Called once at startup; any failure here is fatal.
pub async fn load_acceptor(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let cert_data = tokio::fs::read(cert_path)
        .await
        .with_context(|| format!("reading certificate file {cert_path}"))?;
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut Cursor::new(&cert_data))
        .filter_map(|r| r.ok())
        .collect();
    if cert_chain.is_empty() {
        bail!("no certificates found in {cert_path}");
    }

    let key_data = tokio::fs::read(key_path)
        .await
        .with_context(|| format!("reading key file {key_path}"))?;
    let key = pkcs8_private_keys(&mut Cursor::new(&key_data))
        .filter_map(|r| r.ok())
        .map(PrivateKeyDer::Pkcs8)
        .next()
        .with_context(|| format!("no private key found in {key_path}"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("building TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
