use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::mime::content_type_for;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::router::route::{RouteMatch, CATCH_ALL};
use crate::router::Handler;
use crate::storage::{Storage, StorageError};

fn join(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        format!("{root}/")
    } else {
        format!("{root}/{relative}")
    }
}

fn storage_unavailable(res: &mut Response, e: &StorageError) {
    warn!(error = %e, "storage unavailable");
    res.send_error(StatusCode::InternalServerError, "STORAGE_UNAVAILABLE", &e.to_string());
}

/// Serves files from storage for catch-all routes.
///
/// The file path comes from the route's catch-all capture, or the request
/// path when the route has none. Directories resolve to their index file.
pub struct StaticFiles {
    storage: Arc<dyn Storage>,
    root: String,
    index: String,
}

impl StaticFiles {
    pub fn new(storage: Arc<dyn Storage>, root: impl Into<String>) -> Self {
        Self {
            storage,
            root: root.into(),
            index: "index.html".to_string(),
        }
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, req: &Request, res: &mut Response, params: &RouteMatch) {
        if let Err(e) = self.storage.ensure_mounted() {
            storage_unavailable(res, &e);
            return;
        }

        let relative = params.get(CATCH_ALL).unwrap_or(req.path.as_str());
        let mut path = join(&self.root, relative);
        if path.ends_with('/') || self.storage.is_directory(&path) {
            path = join(&path, &self.index);
        }

        match self.storage.file_size(&path) {
            Ok(len) => {
                debug!(path = %path, len, "serving static file");
                res.send_file(path.as_str(), len, content_type_for(&path));
            }
            Err(_) => {
                res.send_error(StatusCode::NotFound, "NOT_FOUND", &format!("file: {}", req.path));
            }
        }
    }
}

/// Lists a storage directory as JSON `[{name,size,isDir}]`.
///
/// The directory is the route's first capture, relative to `root`.
pub struct DirectoryListing {
    storage: Arc<dyn Storage>,
    root: String,
}

impl DirectoryListing {
    pub fn new(storage: Arc<dyn Storage>, root: impl Into<String>) -> Self {
        Self {
            storage,
            root: root.into(),
        }
    }
}

#[async_trait]
impl Handler for DirectoryListing {
    async fn handle(&self, _req: &Request, res: &mut Response, params: &RouteMatch) {
        if let Err(e) = self.storage.ensure_mounted() {
            storage_unavailable(res, &e);
            return;
        }

        let dir = join(&self.root, params.at(0).unwrap_or_default());
        match self.storage.list_directory(&dir) {
            Ok(entries) => {
                res.json(&entries);
            }
            Err(StorageError::NotFound(_)) | Err(StorageError::InvalidPath(_)) => {
                res.send_error(StatusCode::NotFound, "NOT_FOUND", &format!("directory: {dir}"));
            }
            Err(e) => {
                res.send_error(StatusCode::InternalServerError, "LIST_FAILED", &e.to_string());
            }
        }
    }
}
