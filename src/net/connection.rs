//! Byte-stream connection over a plain socket or a TLS session
//!
//! Both transports expose the same `send` / `receive` / `close` surface so the
//! HTTP layer never needs to know whether the peer is secured.

use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsStream;
use tracing::{debug, trace, warn};

use crate::net::tls::{server_name, ClientTls, TlsError};

/// Bytes written per transport call before yielding to other tasks.
pub const DEFAULT_SEND_CHUNK_SIZE: usize = 1460;

/// Capacity of the single pending network buffer held by secured connections.
const NET_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("DNS resolution failed for {0}")]
    Resolve(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Secured,
}

enum Transport {
    Plain(TcpStream),
    Secured(Box<TlsStream<TcpStream>>),
}

/// One network buffer that arrived but has not been fully consumed yet.
///
/// Dropping it releases the memory, whichever path the connection takes.
struct PendingBuffer {
    data: Bytes,
    offset: usize,
}

impl PendingBuffer {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn is_drained(&self) -> bool {
        self.offset >= self.data.len()
    }
}

pub struct Connection {
    transport: Option<Transport>,
    peer: Option<SocketAddr>,
    hostname: Option<String>,
    pending: Option<PendingBuffer>,
    send_chunk_size: usize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("mode", &self.mode())
            .field("peer", &self.peer)
            .field("hostname", &self.hostname)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    pub(crate) fn plain(stream: TcpStream, peer: SocketAddr) -> Self {
        Self::with_transport(Transport::Plain(stream), Some(peer), None)
    }

    pub(crate) fn secured(stream: TlsStream<TcpStream>, peer: SocketAddr) -> Self {
        Self::with_transport(Transport::Secured(Box::new(stream)), Some(peer), None)
    }

    fn with_transport(transport: Transport, peer: Option<SocketAddr>, hostname: Option<String>) -> Self {
        Self {
            transport: Some(transport),
            peer,
            hostname,
            pending: None,
            send_chunk_size: DEFAULT_SEND_CHUNK_SIZE,
        }
    }

    /// Open an outbound connection, secured when `tls` is given.
    ///
    /// The hostname is kept for certificate identity verification. The
    /// handshake is awaited once, bounded by the trust config's timeout.
    pub async fn connect(host: &str, port: u16, tls: Option<&ClientTls>) -> Result<Self, ConnectionError> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| ConnectionError::Resolve(host.to_string()))?
            .next()
            .ok_or_else(|| ConnectionError::Resolve(host.to_string()))?;

        let stream = TcpStream::connect(addr).await.map_err(|source| ConnectionError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;

        let Some(tls) = tls else {
            debug!(%addr, "connected (plain)");
            return Ok(Self::with_transport(Transport::Plain(stream), Some(addr), Some(host.to_string())));
        };

        let name = server_name(host)?;
        let wait = tls.handshake_timeout();
        let session = timeout(wait, tls.connector().connect(name, stream))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout(wait))?
            .map_err(ConnectionError::Handshake)?;

        debug!(%addr, host, "connected (secured)");
        Ok(Self::with_transport(
            Transport::Secured(Box::new(TlsStream::Client(session))),
            Some(addr),
            Some(host.to_string()),
        ))
    }

    pub fn with_send_chunk_size(mut self, size: usize) -> Self {
        self.send_chunk_size = size.max(1);
        self
    }

    pub fn mode(&self) -> Option<TransportMode> {
        match self.transport {
            Some(Transport::Plain(_)) => Some(TransportMode::Plain),
            Some(Transport::Secured(_)) => Some(TransportMode::Secured),
            None => None,
        }
    }

    pub fn is_secured(&self) -> bool {
        self.mode() == Some(TransportMode::Secured)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Write all of `data`, in bounded chunks, yielding between chunks.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        let chunk_size = self.send_chunk_size;
        let transport = self.transport.as_mut().ok_or(ConnectionError::Closed)?;

        let mut sent = 0;
        for chunk in data.chunks(chunk_size) {
            match transport {
                Transport::Plain(stream) => stream.write_all(chunk).await?,
                Transport::Secured(stream) => {
                    stream.write_all(chunk).await?;
                    stream.flush().await?;
                }
            }
            sent += chunk.len();

            if sent < data.len() {
                tokio::task::yield_now().await;
            }
        }

        trace!(bytes = sent, "sent");
        Ok(sent)
    }

    /// Read up to `buf.len()` bytes, waiting at most `wait` for data.
    ///
    /// Returns `Ok(0)` once the peer has closed, `Err(Timeout)` when nothing
    /// arrived in time.
    pub async fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, ConnectionError> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(pending) = self.pending.as_mut() {
            let copied = pending_copy(pending, buf);
            return Ok(Self::drain_pending(&mut self.pending, copied));
        }

        let transport = self.transport.as_mut().ok_or(ConnectionError::Closed)?;

        match transport {
            Transport::Plain(stream) => match timeout(wait, stream.read(buf)).await {
                Err(_) => Err(ConnectionError::Timeout(wait)),
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) if is_peer_reset(&e) => Ok(0),
                Ok(Err(e)) => Err(e.into()),
            },
            Transport::Secured(stream) => {
                // At most one network buffer is held; the next one is only
                // pulled from the session once this one is drained.
                let mut chunk = BytesMut::with_capacity(NET_BUFFER_SIZE);
                let n = match timeout(wait, stream.read_buf(&mut chunk)).await {
                    Err(_) => return Err(ConnectionError::Timeout(wait)),
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) if is_peer_reset(&e) => 0,
                    Ok(Err(e)) => return Err(e.into()),
                };

                if n == 0 {
                    return Ok(0);
                }

                let mut pending = PendingBuffer {
                    data: chunk.freeze(),
                    offset: 0,
                };
                let copied = pending_copy(&mut pending, buf);
                self.pending = Some(pending);
                Ok(Self::drain_pending(&mut self.pending, copied))
            }
        }
    }

    fn drain_pending(pending: &mut Option<PendingBuffer>, copied: usize) -> usize {
        if pending.as_ref().is_some_and(PendingBuffer::is_drained) {
            *pending = None;
        }
        copied
    }

    /// Shut the transport down and release any buffered data.
    pub async fn close(&mut self) {
        self.pending = None;

        let Some(transport) = self.transport.take() else {
            return;
        };

        let result = match transport {
            Transport::Plain(mut stream) => stream.shutdown().await,
            Transport::Secured(mut stream) => stream.shutdown().await,
        };

        if let Err(e) = result {
            if !is_peer_reset(&e) {
                warn!(peer = ?self.peer, error = %e, "error while closing connection");
            }
        }
    }
}

fn pending_copy(pending: &mut PendingBuffer, buf: &mut [u8]) -> usize {
    let available = pending.remaining();
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    pending.offset += n;
    n
}

fn is_peer_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Connection::plain(server, peer), client)
    }

    #[tokio::test]
    async fn receive_times_out_without_data() {
        let (mut conn, _client) = pair().await;
        let mut buf = [0u8; 16];
        let result = conn.receive(&mut buf, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }

    #[tokio::test]
    async fn receive_reports_peer_close_as_zero() {
        let (mut conn, client) = pair().await;
        drop(client);
        let mut buf = [0u8; 16];
        let n = conn.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn send_in_small_chunks_delivers_everything() {
        let (conn, mut client) = pair().await;
        let mut conn = conn.with_send_chunk_size(3);
        let sent = conn.send(b"hello world").await.unwrap();
        assert_eq!(sent, 11);

        let mut out = vec![0u8; 11];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn closed_connection_rejects_io() {
        let (mut conn, _client) = pair().await;
        conn.close().await;
        assert!(!conn.is_connected());
        assert!(matches!(conn.send(b"x").await, Err(ConnectionError::Closed)));
        let mut buf = [0u8; 4];
        assert!(matches!(
            conn.receive(&mut buf, Duration::from_millis(10)).await,
            Err(ConnectionError::Closed)
        ));
    }
}
