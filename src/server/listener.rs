use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::net::connection::{Connection, ConnectionError};
use crate::net::tls::ServerIdentity;

/// A bound listening socket, optionally terminating TLS.
///
/// The server identity is fixed when the listener is created; every
/// accepted secured connection gets a fresh session from it.
pub struct Listener {
    inner: TcpListener,
    identity: Option<ServerIdentity>,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs, identity: Option<ServerIdentity>) -> std::io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        info!(
            addr = %inner.local_addr()?,
            secured = identity.is_some(),
            "listening"
        );
        Ok(Self { inner, identity })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn is_secured(&self) -> bool {
        self.identity.is_some()
    }

    /// Wait up to `wait` for the next connection.
    ///
    /// Returns `Ok(None)` on timeout so the caller's loop gets a chance to
    /// run housekeeping. A failed TLS handshake is an error for that
    /// connection only.
    pub async fn accept(&self, wait: Duration) -> Result<Option<Connection>, ConnectionError> {
        let (stream, peer) = match timeout(wait, self.inner.accept()).await {
            Err(_) => return Ok(None),
            Ok(accepted) => accepted?,
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        debug!(peer = %peer, "accepted connection");

        let Some(identity) = &self.identity else {
            return Ok(Some(Connection::plain(stream, peer)));
        };

        let limit = identity.handshake_timeout();
        match timeout(limit, identity.acceptor().accept(stream)).await {
            Ok(Ok(tls)) => {
                debug!(peer = %peer, "tls handshake complete");
                Ok(Some(Connection::secured(tls.into(), peer)))
            }
            Ok(Err(e)) => Err(ConnectionError::Handshake(e)),
            Err(_) => Err(ConnectionError::HandshakeTimeout(limit)),
        }
    }
}
