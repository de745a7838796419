//! Records as stored on pages and tuples as handed to operators.
//!
//! On-page record layout: a 32-byte concurrency metadata header followed
//! by the fixed-width row payload.

use crate::buffer::manager::PageRef;
use crate::common::RecordId;
use crate::error::{DbError, Result};
use crate::record::schema::{Schema, Value};
use crate::storage::slotted;
use crate::transaction::timestamp::Timestamp;

/// Per-record MVCC metadata, prepended to every record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// In-place record id of the logical row this version belongs to.
    pub original: RecordId,
    pub begin: Timestamp,
    pub end: Timestamp,
    /// Next (older) version in the time-travel chain.
    pub next_version: RecordId,
}

impl RecordMeta {
    pub const ENCODED_LEN: usize = 32;

    pub(crate) const ORIGINAL_OFFSET: usize = 0;
    pub(crate) const BEGIN_OFFSET: usize = 8;
    pub(crate) const END_OFFSET: usize = 16;
    pub(crate) const NEXT_OFFSET: usize = 24;

    /// Metadata for a freshly inserted record.
    pub fn fresh(rid: RecordId, write_stamp: Timestamp) -> Self {
        Self {
            original: rid,
            begin: write_stamp,
            end: Timestamp::INFINITY,
            next_version: RecordId::NONE,
        }
    }

    pub fn encode_into(&self, buffer: &mut [u8]) {
        buffer[Self::ORIGINAL_OFFSET..Self::BEGIN_OFFSET]
            .copy_from_slice(&self.original.raw().to_le_bytes());
        buffer[Self::BEGIN_OFFSET..Self::END_OFFSET]
            .copy_from_slice(&self.begin.raw().to_le_bytes());
        buffer[Self::END_OFFSET..Self::NEXT_OFFSET]
            .copy_from_slice(&self.end.raw().to_le_bytes());
        buffer[Self::NEXT_OFFSET..Self::ENCODED_LEN]
            .copy_from_slice(&self.next_version.raw().to_le_bytes());
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < Self::ENCODED_LEN {
            return Err(DbError::Corrupted(format!(
                "record of {} bytes is smaller than its metadata header",
                record.len()
            )));
        }
        let word = |offset: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&record[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        };
        Ok(Self {
            original: RecordId::from_raw(word(Self::ORIGINAL_OFFSET)),
            begin: Timestamp::from_raw(word(Self::BEGIN_OFFSET)),
            end: Timestamp::from_raw(word(Self::END_OFFSET)),
            next_version: RecordId::from_raw(word(Self::NEXT_OFFSET)),
        })
    }
}

/// An owned row copied out of the buffer pool: safe to keep after the
/// page it came from is unpinned.
#[derive(Debug, Clone)]
pub struct Tuple {
    rid: RecordId,
    meta: RecordMeta,
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(rid: RecordId, meta: RecordMeta, values: Vec<Value>) -> Self {
        Self { rid, meta, values }
    }

    /// Record id of the version this tuple was decoded from.
    pub fn rid(&self) -> RecordId {
        self.rid
    }

    /// In-place record id of the logical row.
    pub fn in_place_rid(&self) -> RecordId {
        self.meta.original
    }

    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// View of a just-written record whose page is still pinned. The caller
/// owns the pin and must discharge it through the buffer manager once
/// done with the handle.
pub struct TupleHandle {
    page: PageRef,
    rid: RecordId,
}

impl TupleHandle {
    pub(crate) fn new(page: PageRef, rid: RecordId) -> Self {
        Self { page, rid }
    }

    pub fn rid(&self) -> RecordId {
        self.rid
    }

    pub fn meta(&self) -> Result<RecordMeta> {
        let data = self.page.read();
        let record = slotted::record(&data, self.rid.slot()).ok_or_else(|| {
            DbError::Corrupted(format!("record {:?} vanished under its handle", self.rid))
        })?;
        RecordMeta::decode(record)
    }

    /// Copy of the raw payload bytes (without the metadata header).
    pub fn payload(&self) -> Result<Vec<u8>> {
        let data = self.page.read();
        let record = slotted::record(&data, self.rid.slot()).ok_or_else(|| {
            DbError::Corrupted(format!("record {:?} vanished under its handle", self.rid))
        })?;
        Ok(record[RecordMeta::ENCODED_LEN..].to_vec())
    }

    /// Decode the payload into an owned tuple.
    pub fn tuple(&self, schema: &Schema) -> Result<Tuple> {
        let data = self.page.read();
        let record = slotted::record(&data, self.rid.slot()).ok_or_else(|| {
            DbError::Corrupted(format!("record {:?} vanished under its handle", self.rid))
        })?;
        let meta = RecordMeta::decode(record)?;
        let values = schema.decode_row(&record[RecordMeta::ENCODED_LEN..])?;
        Ok(Tuple::new(self.rid, meta, values))
    }

    pub fn page(&self) -> &PageRef {
        &self.page
    }
}
