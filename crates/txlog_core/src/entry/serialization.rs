//! Entry serializer tables, one per kernel version.

use super::{LogEntry, CHUNK_END, CHUNK_START, COMMAND, TX_COMMIT, TX_ROLLBACK, TX_START};
use crate::command::StorageCommand;
use crate::envelope::{EnvelopeReadChannel, EnvelopeWriteChannel};
use crate::error::{CoreError, CoreResult};
use crate::types::KernelVersion;
use bytes::Bytes;

type ReadFn = fn(KernelVersion, &mut EnvelopeReadChannel) -> CoreResult<LogEntry>;
type WriteFn = fn(&LogEntry, &mut EnvelopeWriteChannel) -> CoreResult<()>;

#[derive(Clone, Copy)]
struct EntrySerializer {
    read: ReadFn,
    write: WriteFn,
}

const TABLE_SIZE: usize = TX_ROLLBACK as usize + 1;

/// Serializers for every entry type of one kernel version.
pub struct SerializationSet {
    version: KernelVersion,
    serializers: [Option<EntrySerializer>; TABLE_SIZE],
}

static V1: SerializationSet = SerializationSet {
    version: KernelVersion::V1,
    serializers: table(EntrySerializer {
        read: read_start_v1,
        write: write_start_v1,
    }),
};

static V2: SerializationSet = SerializationSet {
    version: KernelVersion::V2,
    serializers: table(EntrySerializer {
        read: read_start_v2,
        write: write_start_v2,
    }),
};

/// Builds a table sharing every serializer but the start entry.
const fn table(start: EntrySerializer) -> [Option<EntrySerializer>; TABLE_SIZE] {
    let mut serializers = [None; TABLE_SIZE];
    serializers[TX_START as usize] = Some(start);
    serializers[COMMAND as usize] = Some(EntrySerializer {
        read: read_command,
        write: write_command,
    });
    serializers[TX_COMMIT as usize] = Some(EntrySerializer {
        read: read_commit,
        write: write_commit,
    });
    serializers[CHUNK_START as usize] = Some(EntrySerializer {
        read: read_chunk_start,
        write: write_chunk_start,
    });
    serializers[CHUNK_END as usize] = Some(EntrySerializer {
        read: read_chunk_end,
        write: write_chunk_end,
    });
    serializers[TX_ROLLBACK as usize] = Some(EntrySerializer {
        read: read_rollback,
        write: write_rollback,
    });
    serializers
}

/// Returns the serializer table for `version`.
#[must_use]
pub fn serialization_set(version: KernelVersion) -> &'static SerializationSet {
    match version {
        KernelVersion::V1 => &V1,
        KernelVersion::V2 => &V2,
    }
}

impl SerializationSet {
    /// Kernel version of this table.
    #[must_use]
    pub const fn version(&self) -> KernelVersion {
        self.version
    }

    /// Reads the body of an entry whose type byte was `code`.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for an unknown code, or any channel error.
    pub fn read(&self, code: u8, channel: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
        let serializer = self.lookup(code).ok_or_else(|| {
            CoreError::log_corruption(format!(
                "unknown entry type {code} for kernel version {} at {}",
                self.version,
                channel.position()
            ))
        })?;
        (serializer.read)(self.version, channel)
    }

    /// Writes an entry, type byte included.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the entry cannot be expressed in this
    /// version, or any channel error.
    pub fn write(&self, entry: &LogEntry, channel: &mut EnvelopeWriteChannel) -> CoreResult<()> {
        let code = entry.type_code();
        let serializer = self.lookup(code).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "entry type {code} is not supported by kernel version {}",
                self.version
            ))
        })?;
        channel.put_u8(code)?;
        (serializer.write)(entry, channel)
    }

    fn lookup(&self, code: u8) -> Option<EntrySerializer> {
        self.serializers.get(code as usize).copied().flatten()
    }
}

fn mismatch(expected: &str, entry: &LogEntry) -> CoreError {
    CoreError::invalid_operation(format!("{expected} serializer given {entry:?}"))
}

fn read_start_v1(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::Start {
        kernel_version,
        time_written: ch.get_u64()?,
        last_committed_tx_when_started: ch.get_u64()?,
        consensus_index: 0,
        append_index: ch.get_u64()?,
    })
}

fn write_start_v1(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::Start {
        time_written,
        last_committed_tx_when_started,
        consensus_index,
        append_index,
        ..
    } = entry
    else {
        return Err(mismatch("start", entry));
    };
    if *consensus_index != 0 {
        return Err(CoreError::invalid_operation(
            "kernel version V1 cannot record a consensus index",
        ));
    }
    ch.put_u64(*time_written)?;
    ch.put_u64(*last_committed_tx_when_started)?;
    ch.put_u64(*append_index)
}

fn read_start_v2(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::Start {
        kernel_version,
        time_written: ch.get_u64()?,
        last_committed_tx_when_started: ch.get_u64()?,
        consensus_index: ch.get_u64()?,
        append_index: ch.get_u64()?,
    })
}

fn write_start_v2(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::Start {
        time_written,
        last_committed_tx_when_started,
        consensus_index,
        append_index,
        ..
    } = entry
    else {
        return Err(mismatch("start", entry));
    };
    ch.put_u64(*time_written)?;
    ch.put_u64(*last_committed_tx_when_started)?;
    ch.put_u64(*consensus_index)?;
    ch.put_u64(*append_index)
}

fn read_command(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    let len = ch.get_u32()? as usize;
    let bytes = ch.get_vec(len)?;
    Ok(LogEntry::Command {
        kernel_version,
        command: StorageCommand::new(Bytes::from(bytes)),
    })
}

fn write_command(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::Command { command, .. } = entry else {
        return Err(mismatch("command", entry));
    };
    let len = u32::try_from(command.len()).map_err(|_| {
        CoreError::invalid_operation(format!("command of {} bytes is too large", command.len()))
    })?;
    ch.put_u32(len)?;
    ch.put_bytes(command.as_bytes())
}

fn read_commit(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::Commit {
        kernel_version,
        tx_id: ch.get_u64()?,
        time_written: ch.get_u64()?,
        checksum: 0,
    })
}

fn write_commit(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::Commit {
        tx_id, time_written, ..
    } = entry
    else {
        return Err(mismatch("commit", entry));
    };
    ch.put_u64(*tx_id)?;
    ch.put_u64(*time_written)
}

fn read_chunk_start(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::ChunkStart {
        kernel_version,
        time_written: ch.get_u64()?,
        chunk_id: ch.get_u64()?,
        append_index: ch.get_u64()?,
    })
}

fn write_chunk_start(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::ChunkStart {
        time_written,
        chunk_id,
        append_index,
        ..
    } = entry
    else {
        return Err(mismatch("chunk start", entry));
    };
    ch.put_u64(*time_written)?;
    ch.put_u64(*chunk_id)?;
    ch.put_u64(*append_index)
}

fn read_chunk_end(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::ChunkEnd {
        kernel_version,
        tx_id: ch.get_u64()?,
        chunk_id: ch.get_u64()?,
        checksum: 0,
    })
}

fn write_chunk_end(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::ChunkEnd {
        tx_id, chunk_id, ..
    } = entry
    else {
        return Err(mismatch("chunk end", entry));
    };
    ch.put_u64(*tx_id)?;
    ch.put_u64(*chunk_id)
}

fn read_rollback(kernel_version: KernelVersion, ch: &mut EnvelopeReadChannel) -> CoreResult<LogEntry> {
    Ok(LogEntry::Rollback {
        kernel_version,
        tx_id: ch.get_u64()?,
        append_index: ch.get_u64()?,
        time_written: ch.get_u64()?,
        checksum: 0,
    })
}

fn write_rollback(entry: &LogEntry, ch: &mut EnvelopeWriteChannel) -> CoreResult<()> {
    let LogEntry::Rollback {
        tx_id,
        append_index,
        time_written,
        ..
    } = entry
    else {
        return Err(mismatch("rollback", entry));
    };
    ch.put_u64(*tx_id)?;
    ch.put_u64(*append_index)?;
    ch.put_u64(*time_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LogVersionedChannel;
    use crate::entry::LogEntryReader;
    use crate::envelope::{NoRotation, BASE_TX_CHECKSUM};
    use crate::files::{LogHeader, NoMoreFiles};
    use crate::types::StoreId;
    use std::sync::Arc;
    use txlog_storage::InMemoryBackend;

    const SEGMENT: usize = 128;

    fn log() -> LogVersionedChannel {
        let header = LogHeader::new(
            0,
            KernelVersion::V1,
            SEGMENT as u32,
            1,
            1,
            StoreId::new(1, 1),
            BASE_TX_CHECKSUM,
        );
        let mut data = header.encode().to_vec();
        data.resize(SEGMENT, 0);
        LogVersionedChannel::new(0, Arc::new(InMemoryBackend::with_data(data)))
    }

    fn write_chain(channel: &LogVersionedChannel, version: KernelVersion, entries: &[LogEntry]) -> u32 {
        let mut writer = EnvelopeWriteChannel::new(
            channel.clone(),
            channel.size().unwrap(),
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        writer.begin_entry(version.as_byte()).unwrap();
        for entry in entries {
            serialization_set(version).write(entry, &mut writer).unwrap();
        }
        let checksum = writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();
        checksum
    }

    fn read_all(channel: &LogVersionedChannel) -> Vec<LogEntry> {
        let mut reader =
            EnvelopeReadChannel::new(channel.clone(), SEGMENT, Arc::new(NoMoreFiles), false).unwrap();
        let mut entries = LogEntryReader::new(KernelVersion::LATEST);
        let mut out = Vec::new();
        while let Some(entry) = entries.read_entry(&mut reader).unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn v1_start_has_no_consensus_index() {
        let channel = log();
        let start = LogEntry::Start {
            kernel_version: KernelVersion::V1,
            time_written: 10,
            last_committed_tx_when_started: 4,
            consensus_index: 0,
            append_index: 5,
        };
        let commit = LogEntry::Commit {
            kernel_version: KernelVersion::V1,
            tx_id: 5,
            time_written: 11,
            checksum: 0,
        };
        let checksum = write_chain(&channel, KernelVersion::V1, &[start.clone(), commit]);
        // type + 3 * u64, type + 2 * u64
        assert_eq!(channel.size().unwrap() as usize, SEGMENT + 14 + 25 + 17);

        let entries = read_all(&channel);
        assert_eq!(entries[0], start);
        assert_eq!(
            entries[1],
            LogEntry::Commit {
                kernel_version: KernelVersion::V1,
                tx_id: 5,
                time_written: 11,
                checksum,
            }
        );
    }

    #[test]
    fn v1_rejects_consensus_index() {
        let channel = log();
        let mut writer = EnvelopeWriteChannel::new(
            channel.clone(),
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        writer.begin_entry(1).unwrap();
        let start = LogEntry::Start {
            kernel_version: KernelVersion::V1,
            time_written: 1,
            last_committed_tx_when_started: 1,
            consensus_index: 9,
            append_index: 2,
        };
        assert!(serialization_set(KernelVersion::V1)
            .write(&start, &mut writer)
            .is_err());
    }

    #[test]
    fn chunk_entries_and_commands_across_segments() {
        let channel = log();
        let entries = vec![
            LogEntry::ChunkStart {
                kernel_version: KernelVersion::V2,
                time_written: 3,
                chunk_id: 1,
                append_index: 7,
            },
            LogEntry::Command {
                kernel_version: KernelVersion::V2,
                command: StorageCommand::new(Bytes::from(vec![0xC0; 300])),
            },
            LogEntry::ChunkEnd {
                kernel_version: KernelVersion::V2,
                tx_id: 9,
                chunk_id: 1,
                checksum: 0,
            },
        ];
        let checksum = write_chain(&channel, KernelVersion::V2, &entries);

        let read = read_all(&channel);
        assert_eq!(read.len(), 3);
        assert_eq!(read[0], entries[0]);
        assert_eq!(read[1], entries[1]);
        assert!(matches!(read[2], LogEntry::ChunkEnd { tx_id: 9, chunk_id: 1, checksum: c, .. } if c == checksum));
    }

    #[test]
    fn unknown_type_code_is_corruption() {
        let channel = log();
        let mut writer = EnvelopeWriteChannel::new(
            channel.clone(),
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        writer.begin_entry(2).unwrap();
        writer.put_u8(2).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let mut reader =
            EnvelopeReadChannel::new(channel, SEGMENT, Arc::new(NoMoreFiles), false).unwrap();
        let err = LogEntryReader::new(KernelVersion::LATEST)
            .read_entry(&mut reader)
            .unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn damaged_command_length_hits_end_of_log() {
        let channel = log();
        let mut writer = EnvelopeWriteChannel::new(
            channel.clone(),
            SEGMENT as u64,
            BASE_TX_CHECKSUM,
            SEGMENT,
            Box::new(NoRotation),
        )
        .unwrap();
        writer.begin_entry(KernelVersion::LATEST.as_byte()).unwrap();
        writer.put_u8(crate::entry::COMMAND).unwrap();
        writer.put_u32(u32::MAX).unwrap();
        writer.put_bytes(&[5; 10]).unwrap();
        writer.put_checksum().unwrap();
        writer.prepare_for_flush().unwrap();

        let mut reader =
            EnvelopeReadChannel::new(channel, SEGMENT, Arc::new(NoMoreFiles), false).unwrap();
        let err = LogEntryReader::new(KernelVersion::LATEST)
            .read_entry(&mut reader)
            .unwrap_err();
        assert!(err.is_end_of_stream());
    }
}
