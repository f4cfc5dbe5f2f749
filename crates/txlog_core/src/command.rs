//! Opaque storage commands.
//!
//! The log never interprets command bytes. The storage engine supplies a
//! [`CommandSerialization`] to turn its own command type into bytes and back.

use crate::error::CoreResult;
use bytes::Bytes;

/// One serialized storage command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageCommand(Bytes);

impl StorageCommand {
    /// Wraps serialized command bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The serialized bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the command holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the command, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for StorageCommand {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for StorageCommand {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

/// Converts a storage engine's commands to and from log bytes.
pub trait CommandSerialization: Send + Sync {
    /// The engine's command type.
    type Command;

    /// Serializes a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be encoded.
    fn serialize(&self, command: &Self::Command) -> CoreResult<StorageCommand>;

    /// Deserializes a command.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` if the bytes do not decode.
    fn deserialize(&self, command: &StorageCommand) -> CoreResult<Self::Command>;
}
