//! Streaming `multipart/form-data` upload parser
//!
//! Exactly one file part is accepted per request. Body bytes are pushed in
//! whatever pieces the connection yields and written through to storage as
//! soon as they are known not to belong to a boundary, so the file never has
//! to fit in memory.
//!
//! ```text
//! SearchingForBoundary --"--boundary"--> FoundBoundary --part headers--> StreamingData --"--boundary--"--> Complete
//! ```

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::http::parser::Limits;
use crate::http::request::boundary_param;
use crate::http::response::StatusCode;
use crate::net::connection::{Connection, ConnectionError};
use crate::storage::{Storage, StorageError};

/// Receive size used while streaming an upload off the connection.
const UPLOAD_CHUNK: usize = 1460;

/// Part headers larger than this are rejected.
const MAX_PART_HEADER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartState {
    SearchingForBoundary,
    FoundBoundary,
    StreamingData,
    Complete,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing multipart boundary")]
    MissingBoundary,

    #[error("upload part has no filename")]
    MissingFilename,

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("multiple file upload not supported")]
    MultipleParts,

    #[error("failed to create upload directory: {0}")]
    CreateDirectory(#[source] StorageError),

    #[error("failed to write upload: {0}")]
    Storage(#[source] StorageError),

    #[error("upload incomplete")]
    Incomplete,

    #[error("connection failed during upload: {0}")]
    Connection(#[from] ConnectionError),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::FileExists(_) => StatusCode::Conflict,
            UploadError::CreateDirectory(_) | UploadError::Storage(_) => StatusCode::InternalServerError,
            _ => StatusCode::BadRequest,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            UploadError::MissingBoundary => "MISSING_BOUNDARY",
            UploadError::MissingFilename => "MISSING_FILENAME",
            UploadError::FileExists(_) => "FILE_EXISTS",
            UploadError::MultipleParts => "MULTIPLE_PARTS",
            UploadError::CreateDirectory(_) => "UPLOAD_DIR_FAILED",
            UploadError::Storage(_) => "STORAGE_ERROR",
            UploadError::Incomplete | UploadError::Connection(_) => "UPLOAD_INCOMPLETE",
        }
    }
}

/// A file stored by a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Name as sent by the client, reduced to its last path component
    pub filename: String,
    /// Storage path the file was written to
    pub path: String,
    pub size: u64,
}

pub struct MultipartParser {
    delimiter: Vec<u8>,
    /// `CRLF` + delimiter, as it appears after part data
    data_delimiter: Vec<u8>,
    storage: Arc<dyn Storage>,
    upload_dir: String,
    state: MultipartState,
    buffer: Vec<u8>,
    filename: Option<String>,
    target: Option<String>,
    written: u64,
}

impl MultipartParser {
    pub fn new(boundary: &str, storage: Arc<dyn Storage>, upload_dir: &str) -> Result<Self, UploadError> {
        let boundary = boundary.trim();
        if boundary.is_empty() {
            return Err(UploadError::MissingBoundary);
        }

        let delimiter = format!("--{boundary}").into_bytes();
        let mut data_delimiter = b"\r\n".to_vec();
        data_delimiter.extend_from_slice(&delimiter);

        Ok(Self {
            delimiter,
            data_delimiter,
            storage,
            upload_dir: format!("/{}", upload_dir.trim_matches('/')),
            state: MultipartState::SearchingForBoundary,
            buffer: Vec::new(),
            filename: None,
            target: None,
            written: 0,
        })
    }

    /// Build a parser from a `Content-Type` header value.
    pub fn from_content_type(
        content_type: Option<&str>,
        storage: Arc<dyn Storage>,
        upload_dir: &str,
    ) -> Result<Self, UploadError> {
        let boundary = content_type.and_then(boundary_param).ok_or(UploadError::MissingBoundary)?;
        Self::new(boundary, storage, upload_dir)
    }

    pub fn state(&self) -> MultipartState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == MultipartState::Complete
    }

    /// Storage path of the file being written, once known.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// The stored file, once the final boundary has been seen.
    pub fn uploaded(&self) -> Option<UploadedFile> {
        if !self.is_complete() {
            return None;
        }
        Some(UploadedFile {
            filename: self.filename.clone()?,
            path: self.target.clone()?,
            size: self.written,
        })
    }

    /// Push the next piece of the body through the state machine.
    ///
    /// Runs until the piece is exhausted or the upload completes. Bytes
    /// after completion are ignored.
    pub fn handle_chunk(&mut self, chunk: &[u8]) -> Result<MultipartState, UploadError> {
        if self.is_complete() {
            return Ok(self.state);
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            let progressed = match self.state {
                MultipartState::SearchingForBoundary => self.search_boundary()?,
                MultipartState::FoundBoundary => self.read_part_headers()?,
                MultipartState::StreamingData => self.stream_data()?,
                MultipartState::Complete => false,
            };

            if !progressed || self.is_complete() {
                return Ok(self.state);
            }
        }
    }

    fn search_boundary(&mut self) -> Result<bool, UploadError> {
        let Some(pos) = find(&self.buffer, &self.delimiter) else {
            // Keep just enough to recognize a delimiter split across pieces.
            let keep = self.delimiter.len() - 1;
            if self.buffer.len() > keep {
                self.buffer.drain(..self.buffer.len() - keep);
            }
            return Ok(false);
        };

        let after = pos + self.delimiter.len();
        if self.buffer.len() < after + 2 {
            return Ok(false);
        }

        let skip = match [self.buffer[after], self.buffer[after + 1]] {
            [b'-', b'-'] => return Err(UploadError::MissingFilename),
            [b'\r', b'\n'] => after + 2,
            _ => after,
        };
        self.buffer.drain(..skip);

        trace!("initial boundary found");
        self.state = MultipartState::FoundBoundary;
        Ok(true)
    }

    fn read_part_headers(&mut self) -> Result<bool, UploadError> {
        let Some(end) = find(&self.buffer, b"\r\n\r\n") else {
            if self.buffer.len() > MAX_PART_HEADER {
                return Err(UploadError::MissingFilename);
            }
            return Ok(false);
        };

        let headers = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        let filename = headers
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))
            .and_then(|(_, value)| disposition_filename(value))
            .ok_or(UploadError::MissingFilename)?;

        self.prepare_target(&filename)?;
        self.buffer.drain(..end + 4);
        self.filename = Some(filename);
        self.state = MultipartState::StreamingData;
        Ok(true)
    }

    /// Mount storage, create the upload directory and refuse existing files.
    fn prepare_target(&mut self, filename: &str) -> Result<(), UploadError> {
        self.storage.ensure_mounted().map_err(UploadError::Storage)?;

        if !self.storage.exists(&self.upload_dir) {
            debug!(dir = %self.upload_dir, "creating upload directory");
            self.storage
                .create_directory(&self.upload_dir)
                .map_err(UploadError::CreateDirectory)?;
        }

        let target = format!("{}/{}", self.upload_dir.trim_end_matches('/'), filename);
        if self.storage.exists(&target) {
            return Err(UploadError::FileExists(target));
        }

        debug!(path = %target, "upload target accepted");
        self.target = Some(target);
        Ok(())
    }

    fn stream_data(&mut self) -> Result<bool, UploadError> {
        let Some(pos) = find(&self.buffer, &self.data_delimiter) else {
            let safe = self.buffer.len().saturating_sub(self.data_delimiter.len() - 1);
            self.flush(safe)?;
            return Ok(false);
        };

        // Everything before the delimiter is file data either way.
        self.flush(pos)?;

        let after = self.data_delimiter.len();
        if self.buffer.len() < after + 2 {
            return Ok(false);
        }

        if self.buffer[after..after + 2] != *b"--" {
            return Err(UploadError::MultipleParts);
        }

        self.buffer.clear();
        self.state = MultipartState::Complete;
        info!(
            path = self.target.as_deref().unwrap_or_default(),
            bytes = self.written,
            "upload complete"
        );
        Ok(true)
    }

    /// Append the first `len` buffered bytes to the target file.
    fn flush(&mut self, len: usize) -> Result<(), UploadError> {
        if len == 0 {
            return Ok(());
        }
        let Some(target) = self.target.as_deref() else {
            return Err(UploadError::MissingFilename);
        };

        self.storage
            .append_to_file(target, &self.buffer[..len])
            .map_err(UploadError::Storage)?;
        self.written += len as u64;
        self.buffer.drain(..len);
        Ok(())
    }

    /// Feed `initial` (body bytes that arrived with the headers) and then
    /// the rest of the body from `conn` until the upload completes.
    pub async fn receive(
        &mut self,
        conn: &mut Connection,
        initial: &[u8],
        content_length: Option<usize>,
        limits: &Limits,
    ) -> Result<UploadedFile, UploadError> {
        let mut consumed = initial.len();
        if !initial.is_empty() {
            self.handle_chunk(initial)?;
        }

        let mut chunk = [0u8; UPLOAD_CHUNK];
        let mut idle = 0;

        while !self.is_complete() {
            if content_length.is_some_and(|len| consumed >= len) {
                return Err(UploadError::Incomplete);
            }

            match conn.receive(&mut chunk, limits.receive_timeout).await {
                Ok(0) => return Err(UploadError::Incomplete),
                Ok(n) => {
                    consumed += n;
                    idle = 0;
                    self.handle_chunk(&chunk[..n])?;
                    tokio::task::yield_now().await;
                }
                Err(ConnectionError::Timeout(_)) => {
                    idle += 1;
                    if idle >= limits.retry_budget {
                        return Err(UploadError::Incomplete);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.uploaded().ok_or(UploadError::Incomplete)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `form-data; name="file"; filename="a.txt"` -> `a.txt`
fn disposition_filename(value: &str) -> Option<String> {
    let raw = value.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| value.trim().trim_matches('"'))
    })?;

    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_reduced_to_basename() {
        assert_eq!(
            disposition_filename(r#" form-data; name="file"; filename="C:\dir\a.txt""#),
            Some("a.txt".to_string())
        );
        assert_eq!(disposition_filename(r#"form-data; filename="../x.bin""#), Some("x.bin".to_string()));
        assert_eq!(disposition_filename(r#"form-data; name="file""#), None);
        assert_eq!(disposition_filename(r#"form-data; filename="""#), None);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(UploadError::FileExists("/uploads/a".into()).status(), StatusCode::Conflict);
        assert_eq!(UploadError::MultipleParts.status(), StatusCode::BadRequest);
        assert_eq!(UploadError::Incomplete.code(), "UPLOAD_INCOMPLETE");
    }
}
