//! The table disk manager: maps between slotted-page bytes and logical
//! tuples, maintains per-row version chains, and honors transaction
//! visibility on reads.
//!
//! Writes always stamp fresh records with the owning transaction's
//! uncommitted timestamp; commit promotes those stamps in place (see
//! [`crate::transaction::manager::TransactionManager`]).

use crate::buffer::manager::{BufferManager, PageRef};
use crate::common::{PageId, RecordId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{DbError, Result};
use crate::record::schema::Value;
use crate::record::table::{Chain, Table};
use crate::record::tuple::{RecordMeta, Tuple, TupleHandle};
use crate::storage::page::{self, PageKind};
use crate::storage::slotted;
use crate::transaction::manager::TransactionManager;
use crate::transaction::sets::{Predicate, WriteKind, WriteSetItem};
use crate::transaction::timestamp::Timestamp;
use crate::transaction::transaction::Transaction;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Largest record (metadata plus payload) that fits on a fresh page.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - slotted::HEADER_SIZE - slotted::SLOT_SIZE;

/// Row storage over the buffer pool.
pub struct HeapStorage {
    buffer: Arc<BufferManager>,
}

impl HeapStorage {
    pub fn new(buffer: Arc<BufferManager>) -> Self {
        Self { buffer }
    }

    /// All rows on a pinned in-place page that are visible to `txn`,
    /// resolving each row's version chain as needed. Version-chain pages
    /// pinned along the way are returned so the caller can unpin them
    /// once it has copied the tuples out.
    pub fn read_rows(
        &self,
        txn: &Transaction,
        table: &Table,
        page: &PageRef,
    ) -> Result<(Vec<Tuple>, Vec<PageId>)> {
        let schema = table.schema();
        let mut tuples = Vec::new();
        let mut extra: HashMap<PageId, PageRef> = HashMap::new();

        let data = page.read();
        for slot_index in 0..slotted::slot_count(&data) {
            let Some(record) = slotted::record(&data, slot_index) else {
                continue;
            };
            let meta = RecordMeta::decode(record)?;
            let in_place = RecordId::new(page.page_id(), slot_index);

            if TransactionManager::is_visible(txn, meta.begin, meta.end) {
                let values = schema.decode_row(&record[RecordMeta::ENCODED_LEN..])?;
                tuples.push(Tuple::new(in_place, meta, values));
                continue;
            }

            // Chase the version chain for one this transaction can see.
            let mut next = meta.next_version;
            while !next.is_none() {
                let (version_meta, payload) = {
                    if !extra.contains_key(&next.page_id()) {
                        extra.insert(next.page_id(), self.buffer.pin(next.page_id())?);
                    }
                    let version_page = &extra[&next.page_id()];
                    let version_data = version_page.read();
                    match slotted::record(&version_data, next.slot()) {
                        Some(rec) => (
                            RecordMeta::decode(rec)?,
                            rec[RecordMeta::ENCODED_LEN..].to_vec(),
                        ),
                        None => break,
                    }
                };
                if TransactionManager::is_visible(txn, version_meta.begin, version_meta.end) {
                    tuples.push(Tuple::new(next, version_meta, schema.decode_row(&payload)?));
                    break;
                }
                next = version_meta.next_version;
            }
        }

        Ok((tuples, extra.into_keys().collect()))
    }

    /// Walk the table's in-place chain and return the visible rows that
    /// satisfy `predicate`. Matching rows enter the transaction's read
    /// set; the scan itself is recorded for commit-time validation.
    pub fn scan(
        &self,
        txn: &mut Transaction,
        table: &Table,
        predicate: Option<Predicate>,
    ) -> Result<Vec<Tuple>> {
        txn.ensure_active()?;
        let mut out = Vec::new();
        let mut page_id = table.first_page_id();
        while page_id != INVALID_PAGE_ID {
            let page = self.buffer.pin(page_id)?;
            let next = page::next_page_id(&page.read());
            let scan_result = self.read_rows(txn, table, &page);
            self.buffer.unpin(page_id, false)?;
            let (tuples, extra) = scan_result?;
            for extra_page in extra {
                self.buffer.unpin(extra_page, false)?;
            }
            for tuple in tuples {
                if predicate.as_ref().is_none_or(|p| p(&tuple)) {
                    txn.record_read(tuple.in_place_rid(), tuple.rid());
                    out.push(tuple);
                }
            }
            page_id = next;
        }
        txn.record_scan(Some(table.id()), predicate);
        Ok(out)
    }

    /// Insert a row and return its record id.
    pub fn add_row(
        &self,
        txn: &mut Transaction,
        table: &Table,
        values: &[Value],
    ) -> Result<RecordId> {
        let handle = self.add_row_and_get(txn, table, values)?;
        let rid = handle.rid();
        drop(handle);
        self.buffer.unpin(rid.page_id(), true)?;
        Ok(rid)
    }

    /// Insert a row and return a handle whose page stays pinned; the
    /// caller unpins (dirty) when done with it.
    pub fn add_row_and_get(
        &self,
        txn: &mut Transaction,
        table: &Table,
        values: &[Value],
    ) -> Result<TupleHandle> {
        txn.ensure_active()?;
        let payload = table.schema().encode_row(values)?;

        let mut record = vec![0u8; RecordMeta::ENCODED_LEN + payload.len()];
        RecordMeta::fresh(RecordId::NONE, txn.write_stamp()).encode_into(&mut record);
        record[RecordMeta::ENCODED_LEN..].copy_from_slice(&payload);

        let (page, rid) = self.append_record(table, Chain::InPlace, &record)?;
        {
            // Now that the slot is known, point the record at itself.
            let mut data = page.write();
            let stored = slotted::record_mut(&mut data, rid.slot())
                .ok_or_else(|| DbError::Corrupted(format!("no record at {rid:?}")))?;
            stored[RecordMeta::ORIGINAL_OFFSET..RecordMeta::BEGIN_OFFSET]
                .copy_from_slice(&rid.raw().to_le_bytes());
        }

        txn.record_write(WriteSetItem {
            table_id: table.id(),
            in_place_rid: rid,
            old_version_rid: RecordId::NONE,
            kind: WriteKind::Inserted,
            written_size: record.len(),
        });
        trace!(table = table.id(), ?rid, "inserted row");
        Ok(TupleHandle::new(page, rid))
    }

    /// Replace a row's payload, retiring the current version to the
    /// time-travel chain. Fails with [`DbError::TransactionAborted`]
    /// when another transaction already updated or deleted the row.
    pub fn update_row(
        &self,
        txn: &mut Transaction,
        table: &Table,
        rid: RecordId,
        values: &[Value],
    ) -> Result<()> {
        txn.ensure_active()?;
        let payload = table.schema().encode_row(values)?;
        let stamp = txn.write_stamp();

        // Claim the current version first; a failed swap is a
        // write-write conflict.
        if !self.cas_end(rid, Timestamp::INFINITY, stamp)? {
            return Err(DbError::TransactionAborted);
        }
        let old_version = self.copy_row_to_time_travel(txn, table, rid)?;

        let page = self.buffer.pin(rid.page_id())?;
        let rewrite: Result<()> = (|| {
            let mut data = page.write();
            let record = slotted::record_mut(&mut data, rid.slot())
                .ok_or_else(|| DbError::Corrupted(format!("no record at {rid:?}")))?;
            RecordMeta {
                original: rid,
                begin: stamp,
                end: Timestamp::INFINITY,
                next_version: old_version,
            }
            .encode_into(record);
            record[RecordMeta::ENCODED_LEN..].copy_from_slice(&payload);
            Ok(())
        })();
        self.buffer.unpin(rid.page_id(), rewrite.is_ok())?;
        rewrite?;

        txn.record_write(WriteSetItem {
            table_id: table.id(),
            in_place_rid: rid,
            old_version_rid: old_version,
            kind: WriteKind::Updated,
            written_size: RecordMeta::ENCODED_LEN + payload.len(),
        });
        trace!(table = table.id(), ?rid, ?old_version, "updated row");
        Ok(())
    }

    /// Delete a row by closing its current version. The payload stays in
    /// place for concurrent readers; commit promotes the end stamp.
    pub fn delete_row(&self, txn: &mut Transaction, table: &Table, rid: RecordId) -> Result<()> {
        txn.ensure_active()?;
        let stamp = txn.write_stamp();
        if !self.cas_end(rid, Timestamp::INFINITY, stamp)? {
            return Err(DbError::TransactionAborted);
        }
        let old_version = self.copy_row_to_time_travel(txn, table, rid)?;
        let written_size = self.record_bytes(rid)?.len();

        txn.record_write(WriteSetItem {
            table_id: table.id(),
            in_place_rid: rid,
            old_version_rid: old_version,
            kind: WriteKind::Deleted,
            written_size,
        });
        trace!(table = table.id(), ?rid, "deleted row");
        Ok(())
    }

    /// Append a verbatim copy of the record at `rid` to the table's
    /// time-travel chain and return the copy's record id.
    pub fn copy_row_to_time_travel(
        &self,
        txn: &Transaction,
        table: &Table,
        rid: RecordId,
    ) -> Result<RecordId> {
        txn.ensure_active()?;
        let bytes = self.record_bytes(rid)?;
        let (page, copy_rid) = self.append_record(table, Chain::TimeTravel, &bytes)?;
        self.buffer.unpin(page.page_id(), true)?;
        trace!(table = table.id(), ?rid, ?copy_rid, "copied row to time travel");
        Ok(copy_rid)
    }

    /// Hard-remove a record by freeing its slot. Only used to roll back
    /// inserts; version chains are left untouched.
    pub fn remove_row(&self, table: &Table, rid: RecordId) -> Result<()> {
        let page = self.buffer.pin(rid.page_id())?;
        let freed = (|| {
            let mut data = page.write();
            slotted::free_slot(&mut data, rid.slot())
        })();
        self.buffer.unpin(rid.page_id(), freed.is_ok())?;
        trace!(table = table.id(), ?rid, "removed row");
        freed
    }

    // ------------------------------------------------------------------
    // Record-level primitives used by the transaction manager
    // ------------------------------------------------------------------

    /// Decode the record at `rid` regardless of visibility. Used for the
    /// pre- and post-images validation evaluates predicates against.
    pub(crate) fn tuple_at(&self, table: &Table, rid: RecordId) -> Result<Tuple> {
        let bytes = self.record_bytes(rid)?;
        let meta = RecordMeta::decode(&bytes)?;
        let values = table.schema().decode_row(&bytes[RecordMeta::ENCODED_LEN..])?;
        Ok(Tuple::new(rid, meta, values))
    }

    /// Compare-and-set the begin timestamp of the record at `rid`.
    pub(crate) fn cas_begin(
        &self,
        rid: RecordId,
        expected: Timestamp,
        new: Timestamp,
    ) -> Result<bool> {
        self.swap_meta_word(rid, RecordMeta::BEGIN_OFFSET, Some(expected.raw()), new.raw())
    }

    /// Compare-and-set the end timestamp of the record at `rid`.
    pub(crate) fn cas_end(
        &self,
        rid: RecordId,
        expected: Timestamp,
        new: Timestamp,
    ) -> Result<bool> {
        self.swap_meta_word(rid, RecordMeta::END_OFFSET, Some(expected.raw()), new.raw())
    }

    /// Unconditionally reset the end timestamp (abort path).
    pub(crate) fn set_end(&self, rid: RecordId, ts: Timestamp) -> Result<()> {
        self.swap_meta_word(rid, RecordMeta::END_OFFSET, None, ts.raw())
            .map(|_| ())
    }

    /// Copy the record bytes at `old_version` back over the in-place
    /// record and reopen it (abort path for updates).
    pub(crate) fn restore_record(&self, in_place: RecordId, old_version: RecordId) -> Result<()> {
        let bytes = self.record_bytes(old_version)?;
        let page = self.buffer.pin(in_place.page_id())?;
        let restored = (|| {
            let mut data = page.write();
            let record = slotted::record_mut(&mut data, in_place.slot())
                .ok_or_else(|| DbError::Corrupted(format!("no record at {in_place:?}")))?;
            if record.len() != bytes.len() {
                return Err(DbError::Corrupted(format!(
                    "version at {old_version:?} is {} bytes, in-place record is {}",
                    bytes.len(),
                    record.len()
                )));
            }
            record.copy_from_slice(&bytes);
            // The copy still carries the aborting transaction's end
            // stamp from the claim step.
            record[RecordMeta::END_OFFSET..RecordMeta::NEXT_OFFSET]
                .copy_from_slice(&Timestamp::INFINITY.raw().to_le_bytes());
            Ok(())
        })();
        self.buffer.unpin(in_place.page_id(), restored.is_ok())?;
        restored
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn record_bytes(&self, rid: RecordId) -> Result<Vec<u8>> {
        let page = self.buffer.pin(rid.page_id())?;
        let bytes = {
            let data = page.read();
            slotted::record(&data, rid.slot()).map(<[u8]>::to_vec)
        };
        self.buffer.unpin(rid.page_id(), false)?;
        bytes.ok_or_else(|| DbError::Corrupted(format!("no record at {rid:?}")))
    }

    /// Store `bytes` on the chain's last page, extending the chain with
    /// a fresh page when it is full. Returns the page still pinned.
    fn append_record(
        &self,
        table: &Table,
        chain: Chain,
        bytes: &[u8],
    ) -> Result<(PageRef, RecordId)> {
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "record of {} bytes exceeds page capacity of {MAX_RECORD_SIZE}",
                bytes.len()
            )));
        }

        let mut page_id = table.chain_last(chain);
        let mut page = self.buffer.pin(page_id)?;
        loop {
            let full = {
                let data = page.read();
                !slotted::fits(&data, bytes.len())
            };
            if !full {
                break;
            }

            let new_page = self.buffer.allocate(PageKind::Record)?;
            let new_id = new_page.page_id();
            {
                let mut data = page.write();
                page::set_next_page_id(&mut data, new_id);
            }
            self.buffer.unpin(page_id, true)?;
            table.set_chain_last(chain, new_id);
            trace!(table = table.id(), ?chain, page_id = new_id, "extended page chain");
            page = new_page;
            page_id = new_id;
        }

        let slot = {
            let mut data = page.write();
            slotted::insert(&mut data, bytes)?
        };
        Ok((page, RecordId::new(page_id, slot)))
    }

    fn swap_meta_word(
        &self,
        rid: RecordId,
        offset: usize,
        expected: Option<u64>,
        new: u64,
    ) -> Result<bool> {
        let page = self.buffer.pin(rid.page_id())?;
        let result = (|| {
            let mut data = page.write();
            let record = slotted::record_mut(&mut data, rid.slot())
                .ok_or_else(|| DbError::Corrupted(format!("no record at {rid:?}")))?;
            let mut word = [0u8; 8];
            word.copy_from_slice(&record[offset..offset + 8]);
            let current = u64::from_le_bytes(word);
            if expected.is_some_and(|e| e != current) {
                return Ok(false);
            }
            record[offset..offset + 8].copy_from_slice(&new.to_le_bytes());
            Ok(true)
        })();
        let dirty = matches!(result, Ok(true));
        self.buffer.unpin(rid.page_id(), dirty)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacement::ReplacementPolicy;
    use crate::record::schema::{Column, ColumnType, Schema};
    use crate::record::table::Catalog;
    use crate::storage::disk::StorageManager;
    use crate::transaction::transaction::IsolationLevel;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        buffer: Arc<BufferManager>,
        catalog: Catalog,
        heap: HeapStorage,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Arc::new(StorageManager::open(dir.path().join("data.bee")).unwrap());
        let buffer = Arc::new(
            BufferManager::builder()
                .frame_count(64)
                .replacement_policy(ReplacementPolicy::Lru)
                .build(storage),
        );
        Fixture {
            _dir: dir,
            heap: HeapStorage::new(buffer.clone()),
            catalog: Catalog::new(),
            buffer,
        }
    }

    fn numbers_table(fx: &Fixture) -> Arc<Table> {
        let schema = Schema::new(vec![
            Column::new("key", ColumnType::BigInt),
            Column::new("value", ColumnType::BigInt),
        ]);
        fx.catalog.create_table("numbers", schema, &fx.buffer).unwrap()
    }

    fn txn(id: u64) -> Transaction {
        Transaction::new(Timestamp::committed(id), IsolationLevel::Serializable)
    }

    #[test]
    fn insert_is_visible_to_writer() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        let rid = fx
            .heap
            .add_row(&mut t, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();

        let rows = fx.heap.scan(&mut t, &table, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rid(), rid);
        assert_eq!(rows[0].value(1), &Value::BigInt(10));
        assert_eq!(t.write_set().len(), 1);
        assert_eq!(t.write_set()[0].kind, WriteKind::Inserted);
    }

    #[test]
    fn fresh_record_metadata_is_self_referential() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        let handle = fx
            .heap
            .add_row_and_get(&mut t, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();
        let meta = handle.meta().unwrap();
        assert_eq!(meta.original, handle.rid());
        assert_eq!(meta.begin, t.write_stamp());
        assert!(meta.end.is_infinity());
        assert!(meta.next_version.is_none());

        let rid = handle.rid();
        drop(handle);
        fx.buffer.unpin(rid.page_id(), true).unwrap();
    }

    #[test]
    fn update_retires_old_version_to_time_travel() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        let rid = fx
            .heap
            .add_row(&mut t, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();
        fx.heap
            .update_row(&mut t, &table, rid, &[Value::BigInt(1), Value::BigInt(20)])
            .unwrap();

        let current = fx.heap.tuple_at(&table, rid).unwrap();
        assert_eq!(current.value(1), &Value::BigInt(20));
        assert!(!current.meta().next_version.is_none());

        let old = fx
            .heap
            .tuple_at(&table, current.meta().next_version)
            .unwrap();
        assert_eq!(old.value(1), &Value::BigInt(10));
        assert_eq!(old.meta().end, t.write_stamp());
        assert_eq!(
            old.rid().page_id(),
            table.first_time_travel_page_id()
        );
    }

    #[test]
    fn remove_row_frees_the_slot() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        let rid = fx
            .heap
            .add_row(&mut t, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();
        fx.heap.remove_row(&table, rid).unwrap();

        assert!(fx.heap.tuple_at(&table, rid).is_err());
        assert!(fx.heap.scan(&mut t, &table, None).unwrap().is_empty());
    }

    #[test]
    fn inserts_extend_the_page_chain() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        // Each record is 32 + 16 bytes plus its slot; a page holds
        // roughly 78 of them.
        for key in 0..200 {
            fx.heap
                .add_row(&mut t, &table, &[Value::BigInt(key), Value::BigInt(0)])
                .unwrap();
        }
        assert_ne!(table.first_page_id(), table.last_page_id());

        let rows = fx.heap.scan(&mut t, &table, None).unwrap();
        assert_eq!(rows.len(), 200);
    }

    #[test]
    fn concurrent_claim_conflict_fails_update() {
        let fx = fixture();
        let table = numbers_table(&fx);

        let mut t1 = txn(5);
        let rid = fx
            .heap
            .add_row(&mut t1, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();
        // Simulate t1 committed by promoting its stamps directly.
        fx.heap
            .cas_begin(rid, t1.write_stamp(), Timestamp::committed(6))
            .unwrap();

        let mut t2 = txn(7);
        let mut t3 = txn(8);
        fx.heap
            .update_row(&mut t2, &table, rid, &[Value::BigInt(1), Value::BigInt(20)])
            .unwrap();

        let err = fx
            .heap
            .update_row(&mut t3, &table, rid, &[Value::BigInt(1), Value::BigInt(30)])
            .unwrap_err();
        assert!(matches!(err, DbError::TransactionAborted));
    }

    #[test]
    fn pins_are_balanced_after_heap_operations() {
        let fx = fixture();
        let table = numbers_table(&fx);
        let mut t = txn(5);

        let rid = fx
            .heap
            .add_row(&mut t, &table, &[Value::BigInt(1), Value::BigInt(10)])
            .unwrap();
        fx.heap
            .update_row(&mut t, &table, rid, &[Value::BigInt(1), Value::BigInt(20)])
            .unwrap();
        fx.heap.scan(&mut t, &table, None).unwrap();

        assert_eq!(fx.buffer.pin_count(rid.page_id()), 0);
        assert_eq!(fx.buffer.pin_count(table.first_time_travel_page_id()), 0);
    }
}
