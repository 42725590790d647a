use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::{FileInfo, Storage, StorageError, STREAM_CHUNK_SIZE};

/// [`Storage`] backed by a directory on the host filesystem.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    mounted: AtomicBool,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounted: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path onto the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        if !self.is_mounted() {
            return Err(StorageError::NotMounted);
        }

        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }

        Ok(resolved)
    }
}

fn io_error(path: &str, source: io::Error) -> StorageError {
    if source.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl Storage for LocalStorage {
    fn mount(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root.display().to_string(), e))?;
        self.mounted.store(true, Ordering::Release);
        info!(root = %self.root.display(), "storage mounted");
        Ok(())
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.exists())
    }

    fn is_directory(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.is_dir())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        fs::read(full).map_err(|e| io_error(path, e))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        fs::write(full, data).map_err(|e| io_error(path, e))
    }

    fn append_to_file(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(full)
            .map_err(|e| io_error(path, e))?;
        file.write_all(data).map_err(|e| io_error(path, e))
    }

    fn stream_file(&self, path: &str, on_chunk: &mut dyn FnMut(&[u8]) -> bool) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        let mut file = fs::File::open(full).map_err(|e| io_error(path, e))?;
        let mut buf = [0u8; STREAM_CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).map_err(|e| io_error(path, e))?;
            if n == 0 || !on_chunk(&buf[..n]) {
                return Ok(());
            }
        }
    }

    fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();

        for entry in fs::read_dir(full).map_err(|e| io_error(path, e))? {
            let entry = entry.map_err(|e| io_error(path, e))?;
            let meta = entry.metadata().map_err(|e| io_error(path, e))?;
            entries.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_directory: meta.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        fs::create_dir_all(full).map_err(|e| io_error(path, e))?;
        debug!(path, "directory created");
        Ok(())
    }

    fn file_size(&self, path: &str) -> Result<u64, StorageError> {
        let full = self.resolve(path)?;
        fs::metadata(full).map(|m| m.len()).map_err(|e| io_error(path, e))
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| io_error(path, e))?;
        if meta.is_dir() {
            fs::remove_dir(full).map_err(|e| io_error(path, e))
        } else {
            fs::remove_file(full).map_err(|e| io_error(path, e))
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::rename(src, dst).map_err(|e| io_error(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.mount().unwrap();
        (dir, storage)
    }

    #[test]
    fn unmounted_storage_rejects_access() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(storage.read_file("/a"), Err(StorageError::NotMounted)));
        assert!(!storage.exists("/"));
    }

    #[test]
    fn parent_components_are_rejected() {
        let (_dir, storage) = mounted();
        assert!(matches!(storage.read_file("/../etc/passwd"), Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn append_creates_then_extends() {
        let (_dir, storage) = mounted();
        storage.append_to_file("/log.txt", b"ab").unwrap();
        storage.append_to_file("/log.txt", b"cd").unwrap();
        assert_eq!(storage.read_file("/log.txt").unwrap(), b"abcd");
        assert_eq!(storage.file_size("/log.txt").unwrap(), 4);
    }

    #[test]
    fn stream_stops_when_callback_declines() {
        let (_dir, storage) = mounted();
        storage.write_file("/big.bin", &vec![7u8; STREAM_CHUNK_SIZE * 3]).unwrap();

        let mut calls = 0;
        storage
            .stream_file("/big.bin", &mut |_| {
                calls += 1;
                false
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn listing_reports_directories() {
        let (_dir, storage) = mounted();
        storage.create_directory("/uploads").unwrap();
        storage.write_file("/a.txt", b"hello").unwrap();

        let entries = storage.list_directory("/").unwrap();
        assert_eq!(
            entries,
            vec![
                FileInfo { name: "a.txt".into(), size: 5, is_directory: false },
                FileInfo { name: "uploads".into(), size: 0, is_directory: true },
            ]
        );
    }
}
