//! The per-transaction state object.

use crate::common::{RecordId, TableId};
use crate::error::{DbError, Result};
use crate::transaction::sets::{Predicate, ReadSetItem, ScanSetItem, WriteSetItem};
use crate::transaction::timestamp::Timestamp;

/// Supported isolation levels. The engine runs serializable only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// A live transaction: its begin timestamp plus the read, write, and
/// scan sets accumulated by the operations it performed.
pub struct Transaction {
    begin_ts: Timestamp,
    isolation: IsolationLevel,
    state: TransactionState,
    read_set: Vec<ReadSetItem>,
    write_set: Vec<WriteSetItem>,
    scan_set: Vec<ScanSetItem>,
}

impl Transaction {
    pub(crate) fn new(begin_ts: Timestamp, isolation: IsolationLevel) -> Self {
        Self {
            begin_ts,
            isolation,
            state: TransactionState::Active,
            read_set: Vec::new(),
            write_set: Vec::new(),
            scan_set: Vec::new(),
        }
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    /// The transaction's id: the counter bits of its begin timestamp.
    pub fn id(&self) -> u64 {
        self.begin_ts.time()
    }

    /// The uncommitted stamp this transaction's writes carry until
    /// commit promotes them.
    pub fn write_stamp(&self) -> Timestamp {
        Timestamp::uncommitted(self.id())
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Fail with [`DbError::TransactionDisabled`] unless the transaction
    /// is live.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DbError::TransactionDisabled)
        }
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn record_read(&mut self, in_place: RecordId, read: RecordId) {
        self.read_set.push(ReadSetItem::new(in_place, read));
    }

    pub fn record_write(&mut self, item: WriteSetItem) {
        self.write_set.push(item);
    }

    pub fn record_scan(&mut self, table_id: Option<TableId>, predicate: Option<Predicate>) {
        self.scan_set.push(ScanSetItem::new(table_id, predicate));
    }

    pub fn read_set(&self) -> &[ReadSetItem] {
        &self.read_set
    }

    pub fn write_set(&self) -> &[WriteSetItem] {
        &self.write_set
    }

    pub fn scan_set(&self) -> &[ScanSetItem] {
        &self.scan_set
    }
}
