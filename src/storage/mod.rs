//! Storage boundary used by uploads, static files and persisted models.
//!
//! Paths are storage-relative and `/`-separated (`/uploads/a.txt`). The
//! backing filesystem lives behind the [`Storage`] trait; [`LocalStorage`]
//! maps it onto a directory of the host filesystem.

mod local;

pub use local::LocalStorage;

use serde::Serialize;
use std::io;
use thiserror::Error;

/// Bytes handed to a `stream_file` callback per call.
pub const STREAM_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is not mounted")]
    NotMounted,

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    #[serde(rename = "isDir")]
    pub is_directory: bool,
}

pub trait Storage: Send + Sync {
    fn mount(&self) -> Result<(), StorageError>;

    fn unmount(&self);

    fn is_mounted(&self) -> bool;

    fn exists(&self, path: &str) -> bool;

    fn is_directory(&self, path: &str) -> bool;

    fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace a file.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Append to a file, creating it when missing.
    fn append_to_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Feed the file to `on_chunk` in pieces; returning `false` stops early.
    fn stream_file(&self, path: &str, on_chunk: &mut dyn FnMut(&[u8]) -> bool) -> Result<(), StorageError>;

    fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>, StorageError>;

    fn create_directory(&self, path: &str) -> Result<(), StorageError>;

    fn file_size(&self, path: &str) -> Result<u64, StorageError>;

    fn remove(&self, path: &str) -> Result<(), StorageError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Mount unless already mounted.
    fn ensure_mounted(&self) -> Result<(), StorageError> {
        if self.is_mounted() {
            return Ok(());
        }
        self.mount()
    }
}
