//! Fault injection for crash and durability tests.
//!
//! [`CrashableProvider`] wraps any provider. Every backend it hands out
//! shares one [`Faults`] switchboard, so a test can make the next sync fail
//! or cut writes off after a byte budget regardless of which log file is
//! being written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txlog_testkit::faults::CrashableProvider;
//!
//! let provider = CrashableProvider::memory();
//! provider.faults().crash_after(1000);
//! // ... appends past 1000 bytes fail with a partial write
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use txlog_storage::{
    InMemoryProvider, StorageBackend, StorageError, StorageProvider, StorageResult,
};

/// Shared fault switches.
#[derive(Debug)]
pub struct Faults {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
    syncs: AtomicUsize,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
            syncs: AtomicUsize::new(0),
        }
    }
}

impl Faults {
    /// Crashes once `bytes` more bytes have been appended, counting from now.
    /// The write crossing the limit is applied partially.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Whether a simulated crash or failed sync has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Number of successful syncs.
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    fn fail(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

/// A backend that fails according to shared [`Faults`].
pub struct CrashableBackend {
    inner: Arc<dyn StorageBackend>,
    faults: Arc<Faults>,
}

impl CrashableBackend {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn StorageBackend>, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        let current = self
            .faults
            .bytes_written
            .fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.faults.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.faults.fail("write"));
        }
        if current + bytes.len() > threshold {
            let partial = threshold - current;
            if partial > 0 {
                let _ = self.inner.append(&bytes[..partial]);
            }
            return Err(self.faults.fail("partial write"));
        }
        self.inner.append(bytes)
    }

    fn flush(&self) -> StorageResult<()> {
        if self.faults.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.faults.fail("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&self) -> StorageResult<()> {
        if self.faults.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.faults.fail("sync"));
        }
        self.inner.sync()?;
        self.faults.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// A provider whose backends fail on demand.
pub struct CrashableProvider {
    inner: Arc<dyn StorageProvider>,
    faults: Arc<Faults>,
}

impl CrashableProvider {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn StorageProvider>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Wraps a fresh in-memory provider, also returned for inspection and
    /// for reopening the log "after the crash" without faults.
    pub fn memory() -> (Self, Arc<InMemoryProvider>) {
        let inner = Arc::new(InMemoryProvider::new());
        (Self::new(inner.clone()), inner)
    }

    /// The shared fault switches.
    pub fn faults(&self) -> &Arc<Faults> {
        &self.faults
    }

    fn wrap(&self, backend: Arc<dyn StorageBackend>) -> Arc<dyn StorageBackend> {
        Arc::new(CrashableBackend::new(backend, Arc::clone(&self.faults)))
    }
}

impl StorageProvider for CrashableProvider {
    fn open(&self, name: &str) -> StorageResult<Option<Arc<dyn StorageBackend>>> {
        Ok(self.inner.open(name)?.map(|backend| self.wrap(backend)))
    }

    fn create(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        Ok(self.wrap(self.inner.create(name)?))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.inner.exists(name)
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.inner.delete(name)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        self.inner.list()
    }
}
