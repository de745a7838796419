//! Heap-owned row buffers.
//!
//! Tuples handed out by the heap are only as durable as the caller
//! makes them: the page a tuple was decoded from may be unpinned and
//! evicted right after the read. Operators that need rows to outlive
//! the pin collect them into a [`RowSet`], which owns its tuples
//! outright and needs no buffer-pool cooperation.

use crate::common::RecordId;
use crate::record::schema::{Schema, Value};
use crate::record::tuple::Tuple;

/// An in-memory table: a schema plus owned rows, detached from the
/// buffer pool.
#[derive(Debug, Clone)]
pub struct RowSet {
    schema: Schema,
    rows: Vec<Tuple>,
}

impl RowSet {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(schema: Schema, rows: Vec<Tuple>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn push(&mut self, tuple: Tuple) {
        self.rows.push(tuple);
    }

    pub fn rows(&self) -> &[Tuple] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tuple> {
        self.rows.iter()
    }

    /// Find a row by the in-place record id of its logical row.
    pub fn find(&self, rid: RecordId) -> Option<&Tuple> {
        self.rows.iter().find(|tuple| tuple.in_place_rid() == rid)
    }

    /// All values of one column, in row order.
    pub fn column(&self, index: usize) -> Vec<&Value> {
        self.rows.iter().map(|tuple| tuple.value(index)).collect()
    }

    /// Sort rows by an integer column, ascending. Non-integer columns
    /// keep the current order.
    pub fn sort_by_big_int(&mut self, index: usize) {
        self.rows
            .sort_by_key(|tuple| tuple.value(index).as_big_int());
    }
}

impl IntoIterator for RowSet {
    type Item = Tuple;
    type IntoIter = std::vec::IntoIter<Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::schema::{Column, ColumnType};
    use crate::record::tuple::RecordMeta;
    use crate::transaction::timestamp::Timestamp;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("name", ColumnType::Char(8)),
        ])
    }

    fn tuple(id: i64, name: &str) -> Tuple {
        let rid = RecordId::new(10, id as u16);
        Tuple::new(
            rid,
            RecordMeta::fresh(rid, Timestamp::committed(2)),
            vec![Value::BigInt(id), Value::Char(name.to_string())],
        )
    }

    #[test]
    fn rows_survive_detached_from_any_page() {
        let mut set = RowSet::new(schema());
        set.push(tuple(2, "b"));
        set.push(tuple(1, "a"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.column(1), vec![
            &Value::Char("b".to_string()),
            &Value::Char("a".to_string())
        ]);

        set.sort_by_big_int(0);
        assert_eq!(set.rows()[0].value(0), &Value::BigInt(1));
    }

    #[test]
    fn find_locates_rows_by_in_place_rid() {
        let set = RowSet::from_rows(schema(), vec![tuple(1, "a"), tuple(2, "b")]);
        let rid = RecordId::new(10, 2);
        assert_eq!(set.find(rid).unwrap().value(1), &Value::Char("b".to_string()));
        assert!(set.find(RecordId::new(10, 9)).is_none());
    }
}
