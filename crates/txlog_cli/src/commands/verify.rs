//! Verify command implementation.

use super::LogSource;
use std::collections::HashMap;
use std::path::Path;
use txlog_core::{BatchKind, CommandBatchCursor, CommittedCommandBatch};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of batches read.
    pub batches_checked: usize,
    /// Number of transactions committed.
    pub transactions_committed: usize,
    /// Chunked transactions still open at the end of the log.
    pub open_transactions: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Tracks identifiers across batches.
#[derive(Default)]
struct Sequence {
    last_append_index: Option<u64>,
    last_new_tx: Option<u64>,
    open_chunks: HashMap<u64, u64>,
}

impl Sequence {
    fn check(&mut self, batch: &CommittedCommandBatch) -> Result<(), String> {
        let tx = batch.transaction_id;
        if let Some(last) = self.last_append_index {
            if batch.append_index != last + 1 {
                return Err(format!(
                    "append index {} follows {} at {}",
                    batch.append_index, last, batch.start_position
                ));
            }
        }
        self.last_append_index = Some(batch.append_index);

        if batch.kind.is_first() {
            if let Some(last) = self.last_new_tx {
                if tx != last + 1 {
                    return Err(format!("transaction {tx} started after transaction {last}"));
                }
            }
            self.last_new_tx = Some(tx);
        }

        match batch.kind {
            BatchKind::Complete => Ok(()),
            BatchKind::FirstChunk => {
                self.open_chunks.insert(tx, batch.chunk_id);
                Ok(())
            }
            BatchKind::MiddleChunk | BatchKind::LastChunk => {
                let previous = self.open_chunks.get(&tx).copied();
                match previous {
                    // The first chunk may lie before the oldest kept file.
                    None if self.started_before_log(tx) => {}
                    None => {
                        return Err(format!(
                            "chunk {} of transaction {tx} was never started",
                            batch.chunk_id
                        ));
                    }
                    Some(chunk) if batch.chunk_id != chunk + 1 => {
                        return Err(format!(
                            "chunk {} of transaction {tx} follows chunk {chunk}",
                            batch.chunk_id
                        ));
                    }
                    Some(_) => {}
                }
                if batch.kind == BatchKind::LastChunk {
                    self.open_chunks.remove(&tx);
                } else {
                    self.open_chunks.insert(tx, batch.chunk_id);
                }
                Ok(())
            }
            BatchKind::Rollback => {
                if self.open_chunks.remove(&tx).is_none() && !self.started_before_log(tx) {
                    return Err(format!("rollback of transaction {tx} which is not open"));
                }
                Ok(())
            }
        }
    }

    fn started_before_log(&self, tx: u64) -> bool {
        self.last_new_tx.map_or(true, |first| tx < first)
    }
}

/// Checks headers and every batch of the log.
pub fn verify(source: &LogSource) -> VerifyResult {
    let mut result = VerifyResult::default();
    check_headers(source, &mut result);

    let mut cursor = match source.cursor() {
        Ok(cursor) => cursor,
        Err(e) => {
            result.errors.push(format!("cannot open reader: {e}"));
            return result;
        }
    };

    let mut sequence = Sequence::default();
    loop {
        match cursor.next() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                result
                    .errors
                    .push(format!("after {} batches: {e}", result.batches_checked));
                break;
            }
        }
        let Some(batch) = cursor.get() else { break };
        result.batches_checked += 1;
        if batch.commits() {
            result.transactions_committed += 1;
        }
        if let Err(e) = sequence.check(batch) {
            result.errors.push(e);
        }
    }
    result.open_transactions = sequence.open_chunks.len();
    result
}

fn check_headers(source: &LogSource, result: &mut VerifyResult) {
    let files = &source.files;
    let mut previous_base: Option<u64> = None;
    for (i, &version) in source.versions.iter().enumerate() {
        result.files_checked += 1;
        if i > 0 && version != source.versions[i - 1] + 1 {
            result.errors.push(format!(
                "log version {} is missing",
                source.versions[i - 1] + 1
            ));
        }
        let header = match files.read_header(version) {
            Ok(Some(header)) => header,
            Ok(None) => {
                if i + 1 != source.versions.len() {
                    result
                        .errors
                        .push(format!("{} has no header", files.file_name(version)));
                }
                continue;
            }
            Err(e) => {
                result
                    .errors
                    .push(format!("{}: {e}", files.file_name(version)));
                continue;
            }
        };
        if header.log_version != version {
            result.errors.push(format!(
                "{} claims log version {}",
                files.file_name(version),
                header.log_version
            ));
        }
        if header.store_id != source.header.store_id {
            result.errors.push(format!(
                "{} belongs to {}, not {}",
                files.file_name(version),
                header.store_id,
                source.header.store_id
            ));
        }
        if header.segment_size != source.header.segment_size {
            result.errors.push(format!(
                "{} has segment size {}",
                files.file_name(version),
                header.segment_size
            ));
        }
        if let Some(base) = previous_base {
            if header.base_tx_id < base {
                result.errors.push(format!(
                    "{} base transaction {} is below {base}",
                    files.file_name(version),
                    header.base_tx_id
                ));
            }
        }
        previous_base = Some(header.base_tx_id);
    }
}

/// Runs the verify command.
pub fn run(path: &Path, base_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying transaction log at {:?}", path);
    println!();

    let source = LogSource::open(path, base_name)?;
    let result = verify(&source);
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    println!("  Files checked: {}", result.files_checked);
    println!("  Batches checked: {}", result.batches_checked);
    println!("  Transactions committed: {}", result.transactions_committed);
    if result.open_transactions > 0 {
        println!("  Open chunked transactions: {}", result.open_transactions);
    }

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
