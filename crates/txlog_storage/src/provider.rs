//! Named backend providers.
//!
//! A log is made of several physical files. Providers map file names to
//! shared [`StorageBackend`] handles so the writer and every reader of the
//! same name observe the same bytes.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Creates, opens, lists and deletes named backends.
pub trait StorageProvider: Send + Sync {
    /// Opens an existing backend, or returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend exists but cannot be opened.
    fn open(&self, name: &str) -> StorageResult<Option<Arc<dyn StorageBackend>>>;

    /// Creates a new empty backend, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be created.
    fn create(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>>;

    /// Returns whether a backend with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Deletes a backend. Deleting a missing backend is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be removed.
    fn delete(&self, name: &str) -> StorageResult<()>;

    /// Lists the names of all backends, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self) -> StorageResult<Vec<String>>;
}

/// Provider storing each backend as a file in one directory.
///
/// Open handles are shared: opening a name that is already open returns the
/// same [`FileBackend`], so its cached size stays coherent with the writer.
#[derive(Debug)]
pub struct DirectoryProvider {
    root: PathBuf,
    open: Mutex<HashMap<String, Weak<FileBackend>>>,
}

impl DirectoryProvider {
    /// Creates a provider rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the directory this provider manages.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `name` to a file directly inside the root.
    fn path_of(&self, name: &str) -> StorageResult<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !plain {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }
}

impl StorageProvider for DirectoryProvider {
    fn open(&self, name: &str) -> StorageResult<Option<Arc<dyn StorageBackend>>> {
        let mut open = self.open.lock();
        if let Some(backend) = open.get(name).and_then(Weak::upgrade) {
            return Ok(Some(backend as Arc<dyn StorageBackend>));
        }

        let path = self.path_of(name)?;
        if !path.is_file() {
            return Ok(None);
        }

        let backend = Arc::new(FileBackend::open(&path)?);
        open.insert(name.to_string(), Arc::downgrade(&backend));
        Ok(Some(backend as Arc<dyn StorageBackend>))
    }

    fn create(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        let mut open = self.open.lock();
        if let Some(existing) = open.get(name).and_then(Weak::upgrade) {
            existing.truncate(0)?;
            return Ok(existing as Arc<dyn StorageBackend>);
        }

        let backend = Arc::new(FileBackend::create(&self.path_of(name)?)?);
        open.insert(name.to_string(), Arc::downgrade(&backend));
        Ok(backend as Arc<dyn StorageBackend>)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.path_of(name)?.is_file())
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.path_of(name)?;
        self.open.lock().remove(name);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Provider keeping every backend in memory.
///
/// Backends outlive the handles returned from it, so dropping and reopening
/// a log against the same provider behaves like a process restart.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    backends: Mutex<BTreeMap<String, Arc<InMemoryBackend>>>,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete backend for `name`, for byte-level inspection.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<Arc<InMemoryBackend>> {
        self.backends.lock().get(name).cloned()
    }

    /// Installs a backend holding `data` under `name`.
    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.backends
            .lock()
            .insert(name.to_string(), Arc::new(InMemoryBackend::with_data(data)));
    }
}

impl StorageProvider for InMemoryProvider {
    fn open(&self, name: &str) -> StorageResult<Option<Arc<dyn StorageBackend>>> {
        Ok(self
            .backends
            .lock()
            .get(name)
            .map(|backend| Arc::clone(backend) as Arc<dyn StorageBackend>))
    }

    fn create(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        let backend = Arc::new(InMemoryBackend::new());
        self.backends
            .lock()
            .insert(name.to_string(), Arc::clone(&backend));
        Ok(backend as Arc<dyn StorageBackend>)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.backends.lock().contains_key(name))
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.backends.lock().remove(name);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.backends.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_open_missing_returns_none() {
        let dir = tempdir().unwrap();
        let provider = DirectoryProvider::new(dir.path()).unwrap();
        assert!(provider.open("transaction.log.0").unwrap().is_none());
        assert!(!provider.exists("transaction.log.0").unwrap());
    }

    #[test]
    fn directory_open_shares_handle_with_writer() {
        let dir = tempdir().unwrap();
        let provider = DirectoryProvider::new(dir.path()).unwrap();

        let writer = provider.create("log.0").unwrap();
        let reader = provider.open("log.0").unwrap().unwrap();
        writer.append(b"abc").unwrap();

        assert_eq!(reader.size().unwrap(), 3);
        assert_eq!(reader.read_at(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn directory_rejects_names_outside_root() {
        let dir = tempdir().unwrap();
        let provider = DirectoryProvider::new(&dir.path().join("logs")).unwrap();
        for name in ["", "..", "../log.0", "sub/log.0"] {
            assert!(
                matches!(provider.create(name), Err(StorageError::InvalidName { .. })),
                "{name:?}"
            );
        }
        assert!(provider.list().unwrap().is_empty());
    }

    #[test]
    fn directory_list_and_delete() {
        let dir = tempdir().unwrap();
        let provider = DirectoryProvider::new(dir.path()).unwrap();
        provider.create("log.1").unwrap();
        provider.create("log.0").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(provider.list().unwrap(), vec!["log.0", "log.1"]);

        provider.delete("log.0").unwrap();
        provider.delete("log.0").unwrap();
        assert_eq!(provider.list().unwrap(), vec!["log.1"]);
    }

    #[test]
    fn memory_provider_survives_handle_drop() {
        let provider = InMemoryProvider::new();
        {
            let backend = provider.create("log.0").unwrap();
            backend.append(b"durable").unwrap();
        }
        let reopened = provider.open("log.0").unwrap().unwrap();
        assert_eq!(reopened.read_at(0, 7).unwrap(), b"durable");
        assert_eq!(provider.list().unwrap(), vec!["log.0"]);
    }

    #[test]
    fn memory_provider_create_replaces() {
        let provider = InMemoryProvider::new();
        provider.insert("log.0", b"old".to_vec());
        let fresh = provider.create("log.0").unwrap();
        assert_eq!(fresh.size().unwrap(), 0);
        assert!(provider.backend("log.0").unwrap().data().is_empty());
    }
}
