use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::http::headers::canonical_name;
use crate::http::response::{Body, Response};
use crate::net::connection::{Connection, ConnectionError};
use crate::storage::{Storage, StorageError};

const HTTP_VERSION: &str = "HTTP/1.1";

/// File chunks buffered between the blocking reader and the socket.
const FILE_CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("response headers were already sent")]
    HeadersAlreadySent,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("file body needs a storage backend")]
    NoStorage,

    #[error("file {path} streamed {written} bytes, Content-Length was {expected}")]
    LengthMismatch { path: String, expected: u64, written: u64 },
}

/// Status line, headers and the blank line.
pub fn serialize_head(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in resp.headers.iter() {
        if k == "content-length" {
            continue;
        }
        buf.extend_from_slice(canonical_name(k).as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    for cookie in resp.cookies() {
        buf.extend_from_slice(b"Set-Cookie: ");
        buf.extend_from_slice(cookie.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    if !resp.status.is_bodyless() {
        let length = format!("Content-Length: {}\r\n", resp.body.len());
        buf.extend_from_slice(length.as_bytes());
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Writes one response to a connection.
///
/// Creating the writer marks the response's headers as sent, so a response
/// can only ever be written once.
pub struct ResponseWriter {
    head: Vec<u8>,
    body: Body,
}

impl ResponseWriter {
    /// `head_only` suppresses the body, as for `HEAD` requests.
    pub fn new(response: &mut Response, head_only: bool) -> Result<Self, WriteError> {
        if response.headers_sent() {
            return Err(WriteError::HeadersAlreadySent);
        }

        let head = serialize_head(response);
        response.mark_headers_sent();

        let body = if head_only || response.status.is_bodyless() {
            Body::Empty
        } else {
            std::mem::take(&mut response.body)
        };

        Ok(Self { head, body })
    }

    /// Returns the number of bytes written.
    pub async fn write_to(
        self,
        conn: &mut Connection,
        storage: Option<&Arc<dyn Storage>>,
    ) -> Result<u64, WriteError> {
        match self.body {
            Body::Empty => Ok(conn.send(&self.head).await? as u64),
            Body::Bytes(bytes) => {
                let mut out = self.head;
                out.extend_from_slice(&bytes);
                Ok(conn.send(&out).await? as u64)
            }
            Body::File { path, len } => {
                let storage = storage.ok_or(WriteError::NoStorage)?;
                let mut written = conn.send(&self.head).await? as u64;
                written += stream_file(conn, Arc::clone(storage), path, len).await?;
                Ok(written)
            }
        }
    }
}

/// Read the file on a blocking thread and forward chunks to the socket.
async fn stream_file(
    conn: &mut Connection,
    storage: Arc<dyn Storage>,
    path: String,
    len: u64,
) -> Result<u64, WriteError> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(FILE_CHANNEL_DEPTH);

    let reader_path = path.clone();
    let reader = tokio::task::spawn_blocking(move || {
        storage.stream_file(&reader_path, &mut |chunk| tx.blocking_send(chunk.to_vec()).is_ok())
    });

    let mut written = 0u64;
    let mut send_error = None;
    let mut overrun = false;

    while let Some(chunk) = rx.recv().await {
        let room = (len - written) as usize;
        if chunk.len() > room {
            overrun = true;
        }
        let chunk = &chunk[..chunk.len().min(room)];
        if !chunk.is_empty() {
            match conn.send(chunk).await {
                Ok(n) => written += n as u64,
                Err(e) => {
                    send_error = Some(e);
                    break;
                }
            }
        }
        if overrun {
            break;
        }
    }
    drop(rx);

    match reader.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) => warn!(path = %path, error = %e, "file reader task failed"),
    }

    if let Some(e) = send_error {
        return Err(e.into());
    }

    if overrun || written != len {
        warn!(path = %path, expected = len, written, "file size changed while streaming");
        return Err(WriteError::LengthMismatch { path, expected: len, written });
    }
    trace!(path = %path, bytes = written, "file streamed");
    Ok(written)
}
