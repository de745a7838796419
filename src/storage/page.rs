//! Raw page layout helpers.
//!
//! Every page starts with a 4-byte little-endian `next_page_id` link that
//! forms a per-table singly-linked chain. What follows depends on the
//! page kind: record pages carry a slotted directory (see
//! [`crate::storage::slotted`]), the metadata page carries the
//! persisted transaction timestamp counter.

use crate::common::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::slotted;
use serde::{Deserialize, Serialize};

/// Offset of the `next_page_id` link, shared by every page kind.
pub const NEXT_PAGE_ID_OFFSET: usize = 0;

/// Offset of the persisted `next_transaction_timestamp` on the metadata
/// page.
pub const NEXT_TIMESTAMP_OFFSET: usize = 4;

/// What a page holds, which decides its default-initialized image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    /// Page 0: engine-wide metadata.
    Metadata,
    /// Slotted page holding records.
    Record,
}

/// Write the default-initialized image of `kind` into `page`.
pub fn init_page(page: &mut [u8], kind: PageKind) {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    page.fill(0);
    set_next_page_id(page, INVALID_PAGE_ID);
    match kind {
        PageKind::Metadata => {
            // next_transaction_timestamp starts empty; the transaction
            // manager seeds its counter when the stored value is zero.
        }
        PageKind::Record => slotted::init(page),
    }
}

pub fn next_page_id(page: &[u8]) -> PageId {
    read_u32(page, NEXT_PAGE_ID_OFFSET)
}

pub fn set_next_page_id(page: &mut [u8], next: PageId) {
    write_u32(page, NEXT_PAGE_ID_OFFSET, next);
}

/// Metadata page only: the persisted transaction timestamp counter.
pub fn next_transaction_timestamp(page: &[u8]) -> u64 {
    read_u64(page, NEXT_TIMESTAMP_OFFSET)
}

pub fn set_next_transaction_timestamp(page: &mut [u8], ts: u64) {
    write_u64(page, NEXT_TIMESTAMP_OFFSET, ts);
}

// ============================================================================
// Little-endian field codec
// ============================================================================

pub(crate) fn read_u16(page: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([page[offset], page[offset + 1]])
}

pub(crate) fn write_u16(page: &mut [u8], offset: usize, value: u16) {
    page[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32(page: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&page[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn write_u32(page: &mut [u8], offset: usize, value: u32) {
    page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u64(page: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&page[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_u64(page: &mut [u8], offset: usize, value: u64) {
    page[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
