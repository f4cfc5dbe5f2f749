//! Dump command implementation.

use super::LogSource;
use serde::Serialize;
use std::path::Path;
use txlog_core::{BatchKind, CommandBatchCursor, CommittedCommandBatch};

/// One batch as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct BatchInfo {
    /// Transaction id.
    pub tx_id: u64,
    /// Append index.
    pub append_index: u64,
    /// Role within the transaction.
    pub kind: &'static str,
    /// Chunk number.
    pub chunk_id: u64,
    /// Kernel version byte.
    pub kernel_version: u8,
    /// Consensus index.
    pub consensus_index: u64,
    /// Start time in milliseconds.
    pub time_started: u64,
    /// Commit time in milliseconds.
    pub time_committed: u64,
    /// Checksum of the batch's last envelope.
    pub checksum: u32,
    /// File version the batch starts in.
    pub log_version: u64,
    /// Offset the batch starts at.
    pub offset: u64,
    /// Size of each command in bytes.
    pub command_sizes: Vec<usize>,
}

impl From<&CommittedCommandBatch> for BatchInfo {
    fn from(batch: &CommittedCommandBatch) -> Self {
        Self {
            tx_id: batch.transaction_id,
            append_index: batch.append_index,
            kind: kind_name(batch.kind),
            chunk_id: batch.chunk_id,
            kernel_version: batch.kernel_version.as_byte(),
            consensus_index: batch.consensus_index,
            time_started: batch.time_started,
            time_committed: batch.time_committed,
            checksum: batch.checksum,
            log_version: batch.start_position.version,
            offset: batch.start_position.offset,
            command_sizes: batch.commands.iter().map(|c| c.len()).collect(),
        }
    }
}

fn kind_name(kind: BatchKind) -> &'static str {
    match kind {
        BatchKind::Complete => "complete",
        BatchKind::FirstChunk => "first-chunk",
        BatchKind::MiddleChunk => "middle-chunk",
        BatchKind::LastChunk => "last-chunk",
        BatchKind::Rollback => "rollback",
    }
}

/// Reads up to `limit` batches of transactions from `from_tx` on.
pub fn collect(
    source: &LogSource,
    limit: Option<usize>,
    from_tx: u64,
) -> Result<Vec<BatchInfo>, Box<dyn std::error::Error>> {
    let mut cursor = source.cursor()?;
    let mut batches = Vec::new();
    while limit.map_or(true, |l| batches.len() < l) && cursor.next()? {
        let Some(batch) = cursor.get() else { break };
        if batch.transaction_id >= from_tx {
            batches.push(BatchInfo::from(batch));
        }
    }
    Ok(batches)
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    base_name: &str,
    limit: Option<usize>,
    from_tx: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = LogSource::open(path, base_name)?;
    let batches = collect(&source, limit, from_tx)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&batches)?);
        }
        _ => {
            println!("Transaction log at {:?}", path);
            println!(
                "Files: {:?}, segment size {}",
                source.versions, source.header.segment_size
            );
            println!();
            for batch in &batches {
                print_batch(batch);
            }
            println!();
            println!("{} batches", batches.len());
        }
    }

    Ok(())
}

fn print_batch(batch: &BatchInfo) {
    let chunk = if batch.chunk_id > 0 {
        format!(" #{}", batch.chunk_id)
    } else {
        String::new()
    };
    println!(
        "tx {:>6}  append {:>6}  {}{}  V{}  @{}:{}  checksum {:#010x}",
        batch.tx_id,
        batch.append_index,
        batch.kind,
        chunk,
        batch.kernel_version,
        batch.log_version,
        batch.offset,
        batch.checksum
    );
    if batch.consensus_index > 0 {
        println!("    consensus index {}", batch.consensus_index);
    }
    println!(
        "    {} commands {:?}, committed at {}",
        batch.command_sizes.len(),
        batch.command_sizes,
        batch.time_committed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_log;
    use tempfile::TempDir;

    #[test]
    fn dumps_batches_in_log_order() {
        let dir = TempDir::new().unwrap();
        let _logs = write_log(dir.path(), 6);
        let source = LogSource::open(dir.path(), "transaction.log").unwrap();

        let batches = collect(&source, None, 0).unwrap();
        let ids: Vec<u64> = batches.iter().map(|b| b.tx_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7]);
        assert!(batches.iter().all(|b| b.kind == "complete"));
        assert!(batches.iter().all(|b| b.command_sizes == vec![60]));
    }

    #[test]
    fn limit_and_from_tx_narrow_the_dump() {
        let dir = TempDir::new().unwrap();
        let _logs = write_log(dir.path(), 10);
        let source = LogSource::open(dir.path(), "transaction.log").unwrap();

        let batches = collect(&source, Some(3), 5).unwrap();
        let ids: Vec<u64> = batches.iter().map(|b| b.tx_id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn json_output_names_every_field() {
        let dir = TempDir::new().unwrap();
        let _logs = write_log(dir.path(), 1);
        let source = LogSource::open(dir.path(), "transaction.log").unwrap();

        let batches = collect(&source, None, 0).unwrap();
        let json: serde_json::Value = serde_json::to_value(&batches).unwrap();
        assert_eq!(json[0]["tx_id"], 2);
        assert_eq!(json[0]["append_index"], 2);
        assert_eq!(json[0]["kind"], "complete");
        assert_eq!(json[0]["offset"], 256);
    }
}
