//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend holding one physical log file.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, and forcing data. The log owns all format
/// interpretation - backends do not understand envelopes or headers.
///
/// All operations take `&self`: a single backend is shared between the
/// writer and concurrent readers, so implementations synchronize internally.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` ensures all appended data is durable
/// - Size only shrinks through `truncate`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads at most `max_len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes (possibly none) when the storage ends first.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_up_to(&self, offset: u64, max_len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        if offset >= size {
            return Ok(Vec::new());
        }
        let available = usize::try_from(size - offset).unwrap_or(usize::MAX);
        self.read_at(offset, max_len.min(available))
    }

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces all data and metadata to durable storage.
    ///
    /// After this returns successfully, all previously appended data
    /// survives process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// Used to cut an incomplete tail off the newest log file during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&self, new_size: u64) -> StorageResult<()>;
}
