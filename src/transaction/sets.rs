//! Read, write, and scan sets tracked per transaction and replayed by
//! commit-time validation.

use crate::common::{RecordId, TableId};
use crate::record::tuple::Tuple;
use std::fmt;
use std::sync::Arc;

/// What a write-set entry did to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Inserted,
    Updated,
    Deleted,
}

/// One row read: the row's in-place record id plus the record id of the
/// version actually read (the same id when the current version was
/// visible, a time-travel id otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSetItem {
    in_place: RecordId,
    read: RecordId,
}

impl ReadSetItem {
    pub fn new(in_place: RecordId, read: RecordId) -> Self {
        Self { in_place, read }
    }

    /// The row's in-place record id; validation matches write sets
    /// against this one.
    pub fn in_place_rid(&self) -> RecordId {
        self.in_place
    }

    /// The version actually read.
    pub fn read_rid(&self) -> RecordId {
        self.read
    }
}

/// One row written by a transaction.
#[derive(Debug, Clone, Copy)]
pub struct WriteSetItem {
    pub table_id: TableId,
    pub in_place_rid: RecordId,
    /// Time-travel copy of the previous version; [`RecordId::NONE`] for
    /// inserts.
    pub old_version_rid: RecordId,
    pub kind: WriteKind,
    pub written_size: usize,
}

/// Row predicate evaluated by scans and re-evaluated by validation.
pub type Predicate = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

/// One scan performed by a transaction, replayed at commit time against
/// concurrently committed writes.
#[derive(Clone)]
pub struct ScanSetItem {
    pub table_id: Option<TableId>,
    pub predicate: Option<Predicate>,
}

impl ScanSetItem {
    pub fn new(table_id: Option<TableId>, predicate: Option<Predicate>) -> Self {
        Self {
            table_id,
            predicate,
        }
    }

    /// Evaluate the predicate against a row image; a scan without a
    /// predicate matches everything.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(tuple),
            None => true,
        }
    }
}

impl fmt::Debug for ScanSetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSetItem")
            .field("table_id", &self.table_id)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
