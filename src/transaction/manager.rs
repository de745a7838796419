//! Transaction manager: timestamp issue, MVCC visibility, and optimistic
//! serializable commit.
//!
//! Commit follows the classic optimistic protocol: writes happen in
//! place under uncommitted stamps, validation replays the transaction's
//! read and scan sets against every transaction that committed inside
//! the `(begin, commit)` window, and success promotes the uncommitted
//! stamps to the commit timestamp. Failure rolls the write set back and
//! surfaces [`DbError::TransactionAborted`].

use crate::buffer::manager::BufferManager;
use crate::common::METADATA_PAGE_ID;
use crate::error::{DbError, Result};
use crate::record::heap::HeapStorage;
use crate::record::table::Catalog;
use crate::storage::page;
use crate::transaction::sets::{WriteKind, WriteSetItem};
use crate::transaction::timestamp::Timestamp;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// First timestamp ever issued.
const INITIAL_TIMESTAMP: u64 = 2;

/// What validation needs to know about a committed transaction.
pub struct CommittedTransaction {
    pub commit_time: u64,
    pub begin_time: u64,
    pub write_set: Vec<WriteSetItem>,
}

/// Counters snapshot for observability and tests.
#[derive(Debug, Clone, Default)]
pub struct TransactionStats {
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub validation_failures: u64,
}

/// Issues begin timestamps, coordinates commit and abort, and enforces
/// serializable visibility.
pub struct TransactionManager {
    next_timestamp: AtomicU64,
    commit_history: RwLock<BTreeMap<u64, Arc<CommittedTransaction>>>,
    catalog: Arc<Catalog>,
    heap: HeapStorage,
    buffer: Arc<BufferManager>,
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    validation_failures: AtomicU64,
}

impl TransactionManager {
    /// Build a manager, seeding the timestamp counter from the metadata
    /// page when the data file already has one.
    pub fn new(buffer: Arc<BufferManager>, catalog: Arc<Catalog>) -> Result<Self> {
        let stored = if buffer.storage().page_count() > 0 {
            let metadata = buffer.pin(METADATA_PAGE_ID)?;
            let value = page::next_transaction_timestamp(&metadata.read());
            buffer.unpin(METADATA_PAGE_ID, false)?;
            value
        } else {
            0
        };

        Ok(Self {
            next_timestamp: AtomicU64::new(stored.max(INITIAL_TIMESTAMP)),
            commit_history: RwLock::new(BTreeMap::new()),
            catalog,
            heap: HeapStorage::new(buffer.clone()),
            buffer,
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
        })
    }

    /// Start a transaction with a fresh begin timestamp.
    pub fn new_transaction(&self, isolation: IsolationLevel) -> Transaction {
        let time = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::Relaxed);
        trace!(time, "transaction begins");
        Transaction::new(Timestamp::committed(time), isolation)
    }

    pub fn begin(&self) -> Transaction {
        self.new_transaction(IsolationLevel::Serializable)
    }

    /// Whether the version bracketed by `(begin, end)` is visible to
    /// `txn`. A transaction also sees its own uncommitted writes.
    pub fn is_visible(txn: &Transaction, begin: Timestamp, end: Timestamp) -> bool {
        let me = txn.begin_ts().time();

        if !begin.is_committed() {
            // Pending versions are visible to their writer only, unless
            // the writer also closed them (own delete).
            if begin.time() != me {
                return false;
            }
            return end.is_committed() || end.time() != me;
        }

        if begin.time() > me {
            return false;
        }
        if end.is_infinity() {
            return true;
        }
        if !end.is_committed() {
            // A pending delete by us hides the row from us; a pending
            // delete by anyone else does not hide it from them.
            return end.time() != me;
        }
        end.time() > me
    }

    /// Validate and commit. On validation failure the write set is
    /// rolled back and [`DbError::TransactionAborted`] returned.
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        txn.ensure_active()?;
        let commit_time = self.next_timestamp.fetch_add(1, Ordering::SeqCst);

        if !self.validate(txn, commit_time)? {
            debug!(txn = txn.id(), "validation failed, aborting");
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
            self.aborted.fetch_add(1, Ordering::Relaxed);
            self.rollback(txn)?;
            txn.set_state(TransactionState::Aborted);
            return Err(DbError::TransactionAborted);
        }

        self.promote(txn, commit_time)?;
        if !txn.write_set().is_empty() {
            let entry = Arc::new(CommittedTransaction {
                commit_time,
                begin_time: txn.id(),
                write_set: txn.write_set().to_vec(),
            });
            self.commit_history.write().insert(commit_time, entry);
        }
        txn.set_state(TransactionState::Committed);
        self.committed.fetch_add(1, Ordering::Relaxed);
        debug!(txn = txn.id(), commit_time, "committed");
        Ok(())
    }

    /// Undo the transaction's writes and release it. Safe to call more
    /// than once.
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        if !txn.is_active() {
            return Ok(());
        }
        self.rollback(txn)?;
        txn.set_state(TransactionState::Aborted);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        debug!(txn = txn.id(), "aborted");
        Ok(())
    }

    /// Snapshot of the transaction counters.
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }

    /// Write the timestamp counter through to the metadata page.
    pub fn persist_timestamp(&self) -> Result<()> {
        let metadata = self.buffer.pin(METADATA_PAGE_ID)?;
        {
            let mut data = metadata.write();
            page::set_next_transaction_timestamp(
                &mut data,
                self.next_timestamp.load(Ordering::SeqCst),
            );
        }
        self.buffer.unpin(METADATA_PAGE_ID, true)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Backward validation against the transactions that committed in
    /// the exclusive window `(txn.begin, commit_time)`.
    fn validate(&self, txn: &Transaction, commit_time: u64) -> Result<bool> {
        let history = self.commit_history.read();
        for committed in history.range(txn.id() + 1..commit_time).map(|(_, c)| c) {
            // Write-skew: a concurrent commit updated or deleted a row
            // this transaction read.
            for write in &committed.write_set {
                if !matches!(write.kind, WriteKind::Updated | WriteKind::Deleted) {
                    continue;
                }
                if txn
                    .read_set()
                    .iter()
                    .any(|read| read.in_place_rid() == write.in_place_rid)
                {
                    debug!(
                        txn = txn.id(),
                        conflicting_commit = committed.commit_time,
                        rid = ?write.in_place_rid,
                        "read-set conflict"
                    );
                    return Ok(false);
                }
            }

            // Scan-set: a concurrent commit changed which rows one of
            // this transaction's scans matches.
            for scan in txn.scan_set() {
                for write in &committed.write_set {
                    if scan.table_id.is_some_and(|table_id| table_id != write.table_id) {
                        continue;
                    }
                    let table = self.catalog.table(write.table_id)?;
                    let matched_before = match write.kind {
                        WriteKind::Inserted => false,
                        WriteKind::Updated | WriteKind::Deleted => {
                            scan.matches(&self.heap.tuple_at(&table, write.old_version_rid)?)
                        }
                    };
                    let matches_now = match write.kind {
                        WriteKind::Deleted => false,
                        WriteKind::Inserted | WriteKind::Updated => {
                            scan.matches(&self.heap.tuple_at(&table, write.in_place_rid)?)
                        }
                    };
                    if matched_before != matches_now {
                        debug!(
                            txn = txn.id(),
                            conflicting_commit = committed.commit_time,
                            rid = ?write.in_place_rid,
                            "scan-set conflict"
                        );
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Commit promotion and abort rollback
    // ------------------------------------------------------------------

    /// Swap every stamp this transaction wrote from its uncommitted form
    /// to the commit timestamp. Each swap is attempted with the
    /// uncommitted stamp as the expected value; a record already
    /// promoted through an earlier write-set entry (insert-then-update
    /// chains) is simply skipped.
    fn promote(&self, txn: &Transaction, commit_time: u64) -> Result<()> {
        let stamp = txn.write_stamp();
        let committed = Timestamp::committed(commit_time);
        for write in txn.write_set() {
            match write.kind {
                WriteKind::Inserted => {
                    self.heap.cas_begin(write.in_place_rid, stamp, committed)?;
                }
                WriteKind::Updated => {
                    self.heap.cas_begin(write.in_place_rid, stamp, committed)?;
                    if !self.heap.cas_end(write.old_version_rid, stamp, committed)? {
                        warn!(rid = ?write.old_version_rid, "retired version lost its end stamp");
                    }
                    // Same-transaction update chains retire versions the
                    // transaction itself wrote.
                    self.heap.cas_begin(write.old_version_rid, stamp, committed)?;
                }
                WriteKind::Deleted => {
                    if !self.heap.cas_end(write.in_place_rid, stamp, committed)? {
                        warn!(rid = ?write.in_place_rid, "deleted record lost its end stamp");
                    }
                    self.heap.cas_end(write.old_version_rid, stamp, committed)?;
                    self.heap.cas_begin(write.old_version_rid, stamp, committed)?;
                }
            }
        }
        Ok(())
    }

    /// Undo the write set, newest entry first.
    fn rollback(&self, txn: &Transaction) -> Result<()> {
        for write in txn.write_set().iter().rev() {
            let table = self.catalog.table(write.table_id)?;
            match write.kind {
                WriteKind::Inserted => {
                    self.heap.remove_row(&table, write.in_place_rid)?;
                }
                WriteKind::Updated => {
                    self.heap
                        .restore_record(write.in_place_rid, write.old_version_rid)?;
                }
                WriteKind::Deleted => {
                    self.heap.set_end(write.in_place_rid, Timestamp::INFINITY)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacement::ReplacementPolicy;
    use crate::storage::disk::StorageManager;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, TransactionManager) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(StorageManager::open(dir.path().join("data.bee")).unwrap());
        let buffer = Arc::new(
            BufferManager::builder()
                .frame_count(16)
                .replacement_policy(ReplacementPolicy::Lru)
                .build(storage),
        );
        let tm = TransactionManager::new(buffer, Arc::new(Catalog::new())).unwrap();
        (dir, tm)
    }

    #[test]
    fn begin_timestamps_are_monotonic() {
        let (_dir, tm) = manager();
        let a = tm.begin();
        let b = tm.begin();
        assert!(b.begin_ts().time() > a.begin_ts().time());
        assert!(a.begin_ts().time() >= INITIAL_TIMESTAMP);
    }

    #[test]
    fn visibility_brackets_begin_timestamp() {
        let (_dir, tm) = manager();
        let reader = {
            // Advance the counter so the reader begins at time 4.
            tm.begin();
            tm.begin();
            tm.begin()
        };
        let me = reader.begin_ts().time();
        assert_eq!(me, 4);

        // Committed before us, still alive: visible.
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::committed(2),
            Timestamp::INFINITY
        ));
        // Committed before us, ended before us: not visible.
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::committed(2),
            Timestamp::committed(3)
        ));
        // Committed before us, ended after us: visible.
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::committed(2),
            Timestamp::committed(9)
        ));
        // Committed after us: not visible.
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::committed(7),
            Timestamp::INFINITY
        ));
        // Another transaction's pending write: not visible.
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::uncommitted(9),
            Timestamp::INFINITY
        ));
        // Another transaction's pending delete: still visible to us.
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::committed(2),
            Timestamp::uncommitted(9)
        ));
    }

    #[test]
    fn own_pending_writes_are_visible() {
        let (_dir, tm) = manager();
        let txn = tm.begin();
        let stamp = txn.write_stamp();

        assert!(TransactionManager::is_visible(
            &txn,
            stamp,
            Timestamp::INFINITY
        ));
        // Own pending delete hides the row.
        assert!(!TransactionManager::is_visible(
            &txn,
            Timestamp::committed(1),
            stamp
        ));
        assert!(!TransactionManager::is_visible(&txn, stamp, stamp));
    }

    #[test]
    fn commit_of_read_only_transaction_succeeds() {
        let (_dir, tm) = manager();
        let mut txn = tm.begin();
        tm.commit(&mut txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);

        // Terminated transactions refuse further operations.
        assert!(matches!(
            tm.commit(&mut txn),
            Err(DbError::TransactionDisabled)
        ));
    }

    #[test]
    fn abort_is_idempotent() {
        let (_dir, tm) = manager();
        let mut txn = tm.begin();
        tm.abort(&mut txn).unwrap();
        tm.abort(&mut txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn timestamp_counter_survives_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bee");
        let storage = Arc::new(StorageManager::open(&path).unwrap());
        storage.allocate(crate::storage::page::PageKind::Metadata).unwrap();
        let buffer = Arc::new(BufferManager::builder().frame_count(4).build(storage));
        let tm = TransactionManager::new(buffer, Arc::new(Catalog::new())).unwrap();

        let last = {
            tm.begin();
            tm.begin().begin_ts().time()
        };
        tm.persist_timestamp().unwrap();
        drop(tm);

        let storage = Arc::new(StorageManager::open(&path).unwrap());
        let buffer = Arc::new(BufferManager::builder().frame_count(4).build(storage));
        let tm = TransactionManager::new(buffer, Arc::new(Catalog::new())).unwrap();
        assert!(tm.begin().begin_ts().time() > last);
    }
}
