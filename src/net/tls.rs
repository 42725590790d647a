//! TLS identities for secured connections using rustls
//!
//! Certificates and keys are handed in as in-memory PEM strings by the
//! embedding application. There is no implicit filesystem trust store.

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Default upper bound for the handshake wait on both sides.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("no certificates found in PEM input")]
    NoCertificates,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("failed to parse PEM input: {0}")]
    Pem(#[from] std::io::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Parse every certificate in a PEM string.
pub fn load_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }

    Ok(certs)
}

/// Parse the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM string.
pub fn load_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())?.ok_or(TlsError::NoPrivateKey)
}

/// Server-side identity: certificate chain plus private key.
///
/// Set once when the listener is created; every accepted secured
/// connection gets a fresh session bound to it.
#[derive(Clone)]
pub struct ServerIdentity {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl ServerIdentity {
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, TlsError> {
        let certs = load_certs(cert_pem)?;
        let key = load_private_key(key_pem)?;

        let mut config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

/// Client-side trust: the root CA used to verify servers.
#[derive(Clone)]
pub struct ClientTls {
    connector: TlsConnector,
    handshake_timeout: Duration,
}

impl ClientTls {
    pub fn from_root_ca_pem(pem: &str) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(pem)? {
            roots.add(cert)?;
        }

        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub(crate) fn connector(&self) -> &TlsConnector {
        &self.connector
    }
}

/// Hostname used for certificate identity verification.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pem_has_no_certificates() {
        assert!(matches!(load_certs(""), Err(TlsError::NoCertificates)));
    }

    #[test]
    fn empty_pem_has_no_key() {
        assert!(matches!(load_private_key(""), Err(TlsError::NoPrivateKey)));
    }

    #[test]
    fn server_name_accepts_dns_and_ip() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
