//! Populating an index from an existing table.
//!
//! The builder scans the rows visible to the driving transaction and
//! keys the index on one integer column; values are the page ids the
//! matching rows live on. The scan is recorded in the transaction's
//! scan set like any other full-table read, so a commit racing with the
//! build is caught by validation.

use crate::error::{DbError, Result};
use crate::index::btree::{BPlusTree, BPlusTreeMulti};
use crate::record::heap::HeapStorage;
use crate::record::schema::{ColumnType, Value};
use crate::record::table::Table;
use crate::record::tuple::Tuple;
use crate::transaction::transaction::Transaction;
use tracing::debug;

fn key_column(table: &Table, column: usize) -> Result<()> {
    let columns = table.schema().columns();
    let Some(spec) = columns.get(column) else {
        return Err(DbError::InvalidArgument(format!(
            "table '{}' has no column {column}",
            table.name()
        )));
    };
    match spec.ty {
        ColumnType::BigInt | ColumnType::Int => Ok(()),
        other => Err(DbError::InvalidArgument(format!(
            "column '{}' of type {other:?} cannot key an index",
            spec.name
        ))),
    }
}

fn key_of(tuple: &Tuple, column: usize) -> Result<i64> {
    match tuple.value(column) {
        Value::BigInt(v) => Ok(*v),
        Value::Int(v) => Ok(*v as i64),
        other => Err(DbError::Corrupted(format!(
            "index key column holds non-integer value {other:?}"
        ))),
    }
}

/// Build a unique index over `column`. Rows sharing a key keep the last
/// page id seen, matching unique-put overwrite semantics.
pub fn build_unique(
    heap: &HeapStorage,
    txn: &mut Transaction,
    table: &Table,
    column: usize,
) -> Result<BPlusTree> {
    key_column(table, column)?;
    let mut index = BPlusTree::new();
    for tuple in heap.scan(txn, table, None)? {
        index.put(key_of(&tuple, column)?, tuple.in_place_rid().page_id());
    }
    debug!(
        table = table.id(),
        column,
        keys = index.key_count(),
        "built unique index"
    );
    Ok(index)
}

/// Build a non-unique index over `column`.
pub fn build_non_unique(
    heap: &HeapStorage,
    txn: &mut Transaction,
    table: &Table,
    column: usize,
) -> Result<BPlusTreeMulti> {
    key_column(table, column)?;
    let mut index = BPlusTreeMulti::new();
    for tuple in heap.scan(txn, table, None)? {
        index.put(key_of(&tuple, column)?, tuple.in_place_rid().page_id());
    }
    debug!(
        table = table.id(),
        column,
        keys = index.key_count(),
        "built non-unique index"
    );
    Ok(index)
}
