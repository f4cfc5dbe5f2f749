//! Transaction id allocation and commit visibility.

use crate::types::{LogPosition, TransactionId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of transaction ids for committing transactions.
pub trait TransactionIdGenerator: Send + Sync {
    /// Id the next committing transaction will get, without taking it.
    fn peek_committing_transaction_id(&self) -> u64;

    /// Takes the next transaction id.
    fn next_committing_transaction_id(&self) -> u64;
}

/// Source of append indexes.
pub trait AppendIndexProvider: Send + Sync {
    /// Append index of the last appended batch.
    fn last_append_index(&self) -> u64;

    /// Takes the next append index.
    fn next_append_index(&self) -> u64;
}

/// Notified once appended batches are durable.
pub trait CommitListener: Send + Sync {
    /// Transaction `tx` committed; its last batch ends at `position`.
    fn transaction_committed(&self, tx: TransactionId, position: LogPosition);

    /// A chunked transaction was rolled back. Its id is closed without a commit.
    fn transaction_rolled_back(&self, _tx_id: u64, _position: LogPosition) {}
}

/// Tracks the highest value below which every number has been offered.
///
/// Numbers may be offered in any order; the gapless high mark only moves
/// once every number up to it is present.
#[derive(Debug, Clone)]
pub struct OutOfOrderSequence {
    highest_gapless: u64,
    meta: LogPosition,
    pending: BTreeMap<u64, LogPosition>,
}

impl OutOfOrderSequence {
    /// Creates a sequence where everything up to `start` is closed.
    #[must_use]
    pub fn new(start: u64, meta: LogPosition) -> Self {
        Self {
            highest_gapless: start,
            meta,
            pending: BTreeMap::new(),
        }
    }

    /// Offers `number`. Returns whether the gapless high mark moved.
    pub fn offer(&mut self, number: u64, meta: LogPosition) -> bool {
        if number <= self.highest_gapless {
            return false;
        }
        if number != self.highest_gapless + 1 {
            self.pending.insert(number, meta);
            return false;
        }
        self.highest_gapless = number;
        self.meta = meta;
        while let Some(meta) = self.pending.remove(&(self.highest_gapless + 1)) {
            self.highest_gapless += 1;
            self.meta = meta;
        }
        true
    }

    /// Highest gapless number and the metadata offered with it.
    #[must_use]
    pub fn get(&self) -> (u64, LogPosition) {
        (self.highest_gapless, self.meta)
    }

    /// Numbers offered ahead of a gap.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// In-memory store of the transaction counters.
///
/// Implements [`TransactionIdGenerator`], [`AppendIndexProvider`] and
/// [`CommitListener`]. Last-closed advances through an
/// [`OutOfOrderSequence`], so it never passes an id whose batches are still
/// in flight.
pub struct TransactionIdStore {
    committing: AtomicU64,
    append_index: AtomicU64,
    last_committed: Mutex<TransactionId>,
    closed: Mutex<OutOfOrderSequence>,
}

impl TransactionIdStore {
    /// Creates a store resuming after recovery.
    ///
    /// `highest_started` is the largest id any batch was written with; it
    /// is at least `last_committed.id` and exceeds it while a chunked
    /// transaction is still open. Such a transaction can never finish after
    /// a restart, so its id counts as closed.
    #[must_use]
    pub fn new(
        last_committed: TransactionId,
        highest_started: u64,
        last_append_index: u64,
        closed_position: LogPosition,
    ) -> Self {
        let highest = highest_started.max(last_committed.id);
        Self {
            committing: AtomicU64::new(highest),
            append_index: AtomicU64::new(last_append_index),
            last_committed: Mutex::new(last_committed),
            closed: Mutex::new(OutOfOrderSequence::new(highest, closed_position)),
        }
    }

    /// Id most recently handed out.
    #[must_use]
    pub fn committing_transaction_id(&self) -> u64 {
        self.committing.load(Ordering::Acquire)
    }

    /// Committed transaction with the highest id.
    #[must_use]
    pub fn last_committed_transaction(&self) -> TransactionId {
        *self.last_committed.lock()
    }

    /// Highest id such that it and every lower id are closed.
    #[must_use]
    pub fn last_closed_transaction_id(&self) -> u64 {
        self.closed.lock().get().0
    }

    /// Last closed id together with the position its batch ends at.
    #[must_use]
    pub fn last_closed_transaction(&self) -> (u64, LogPosition) {
        self.closed.lock().get()
    }

    fn close(&self, tx_id: u64, position: LogPosition) {
        self.closed.lock().offer(tx_id, position);
    }
}

impl TransactionIdGenerator for TransactionIdStore {
    fn peek_committing_transaction_id(&self) -> u64 {
        self.committing.load(Ordering::Acquire) + 1
    }

    fn next_committing_transaction_id(&self) -> u64 {
        self.committing.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl AppendIndexProvider for TransactionIdStore {
    fn last_append_index(&self) -> u64 {
        self.append_index.load(Ordering::Acquire)
    }

    fn next_append_index(&self) -> u64 {
        self.append_index.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl CommitListener for TransactionIdStore {
    fn transaction_committed(&self, tx: TransactionId, position: LogPosition) {
        {
            let mut last = self.last_committed.lock();
            if tx.id > last.id {
                *last = tx;
            }
        }
        self.close(tx.id, position);
    }

    fn transaction_rolled_back(&self, tx_id: u64, position: LogPosition) {
        self.close(tx_id, position);
    }
}

impl fmt::Debug for TransactionIdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionIdStore")
            .field("committing", &self.committing_transaction_id())
            .field("last_closed", &self.last_closed_transaction_id())
            .finish_non_exhaustive()
    }
}
