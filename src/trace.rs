//! Bounded record of recent device transactions, kept for postmortems.

use core::time::Duration;

use heapless::Deque;
use tracing::error;

/// One completed (or abandoned) exchange with the instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub elapsed: Duration,
    pub command: String,
    /// `None` for write-only commands and for exchanges that got no reply.
    pub response: Option<String>,
}

/// Ring of the last `N` transactions. The oldest record is dropped when full.
#[derive(Debug, Default)]
pub struct TransactionLog<const N: usize = 32> {
    records: Deque<TransactionRecord, N>,
}

impl<const N: usize> TransactionLog<N> {
    pub fn new() -> Self {
        Self {
            records: Deque::new(),
        }
    }

    pub fn push(&mut self, record: TransactionRecord) {
        if self.records.is_full() {
            self.records.pop_front();
        }
        // Cannot fail, room was made above.
        let _ = self.records.push_back(record);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&TransactionRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Write every record to the log at error level.
    pub fn dump(&self) {
        for (idx, record) in self.records.iter().enumerate() {
            error!(
                idx,
                elapsed = ?record.elapsed,
                command = %record.command,
                response = ?record.response,
                "transaction"
            );
        }
    }
}
