//! Table schemas and the fixed-width row codec.
//!
//! Rows are encoded as fixed-width columns in schema order; `CHAR(n)`
//! values are NUL-padded to their declared length. Every row of a table
//! therefore occupies the same number of bytes, which keeps slotted-page
//! bookkeeping and abort rollback byte-stable.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    BigInt,
    Int,
    Double,
    Bool,
    /// Fixed-length character column, NUL-padded on disk.
    Char(u16),
}

impl ColumnType {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            ColumnType::BigInt => 8,
            ColumnType::Int => 4,
            ColumnType::Double => 8,
            ColumnType::Bool => 1,
            ColumnType::Char(len) => *len as usize,
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    BigInt(i64),
    Int(i32),
    Double(f64),
    Bool(bool),
    Char(String),
}

impl Value {
    pub fn as_big_int(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<&str> {
        match self {
            Value::Char(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// An ordered set of fixed-width columns with precomputed value offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    offsets: Vec<usize>,
    row_size: usize,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut row_size = 0;
        for column in &columns {
            offsets.push(row_size);
            row_size += column.ty.width();
        }
        Self {
            columns,
            offsets,
            row_size,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Bytes one encoded row occupies.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Byte offset of column `index` within an encoded row.
    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Encode `values` into a fresh row buffer.
    pub fn encode_row(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(DbError::InvalidArgument(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut row = vec![0u8; self.row_size];
        for (index, (column, value)) in self.columns.iter().zip(values).enumerate() {
            let start = self.offsets[index];
            let slot = &mut row[start..start + column.ty.width()];
            match (column.ty, value) {
                (ColumnType::BigInt, Value::BigInt(v)) => {
                    slot.copy_from_slice(&v.to_le_bytes());
                }
                (ColumnType::Int, Value::Int(v)) => {
                    slot.copy_from_slice(&v.to_le_bytes());
                }
                (ColumnType::Double, Value::Double(v)) => {
                    slot.copy_from_slice(&v.to_le_bytes());
                }
                (ColumnType::Bool, Value::Bool(v)) => {
                    slot[0] = *v as u8;
                }
                (ColumnType::Char(len), Value::Char(v)) => {
                    let bytes = v.as_bytes();
                    if bytes.len() > len as usize {
                        return Err(DbError::InvalidArgument(format!(
                            "value of {} bytes exceeds CHAR({len}) column '{}'",
                            bytes.len(),
                            column.name
                        )));
                    }
                    slot[..bytes.len()].copy_from_slice(bytes);
                }
                (ty, value) => {
                    return Err(DbError::InvalidArgument(format!(
                        "value {value:?} does not match column '{}' of type {ty:?}",
                        column.name
                    )));
                }
            }
        }
        Ok(row)
    }

    /// Decode a row buffer into owned values.
    pub fn decode_row(&self, row: &[u8]) -> Result<Vec<Value>> {
        if row.len() != self.row_size {
            return Err(DbError::Corrupted(format!(
                "row of {} bytes does not match schema row size {}",
                row.len(),
                self.row_size
            )));
        }

        let mut values = Vec::with_capacity(self.columns.len());
        for (index, column) in self.columns.iter().enumerate() {
            let start = self.offsets[index];
            let slot = &row[start..start + column.ty.width()];
            let value = match column.ty {
                ColumnType::BigInt => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(slot);
                    Value::BigInt(i64::from_le_bytes(bytes))
                }
                ColumnType::Int => {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(slot);
                    Value::Int(i32::from_le_bytes(bytes))
                }
                ColumnType::Double => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(slot);
                    Value::Double(f64::from_le_bytes(bytes))
                }
                ColumnType::Bool => Value::Bool(slot[0] != 0),
                ColumnType::Char(_) => {
                    let end = slot.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    let text = std::str::from_utf8(&slot[..end]).map_err(|e| {
                        DbError::Corrupted(format!(
                            "CHAR column '{}' holds invalid UTF-8: {e}",
                            column.name
                        ))
                    })?;
                    Value::Char(text.to_string())
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("name", ColumnType::Char(12)),
            Column::new("age", ColumnType::Int),
            Column::new("active", ColumnType::Bool),
        ])
    }

    #[test]
    fn row_size_sums_column_widths() {
        let schema = people_schema();
        assert_eq!(schema.row_size(), 8 + 12 + 4 + 1);
        assert_eq!(schema.offset(2), 20);
    }

    #[test]
    fn row_round_trip() {
        let schema = people_schema();
        let values = vec![
            Value::BigInt(7),
            Value::Char("bee".to_string()),
            Value::Int(34),
            Value::Bool(true),
        ];
        let row = schema.encode_row(&values).unwrap();
        assert_eq!(row.len(), schema.row_size());
        assert_eq!(schema.decode_row(&row).unwrap(), values);
    }

    #[test]
    fn char_is_nul_padded() {
        let schema = Schema::new(vec![Column::new("tag", ColumnType::Char(8))]);
        let row = schema
            .encode_row(&[Value::Char("ab".to_string())])
            .unwrap();
        assert_eq!(&row[..2], b"ab");
        assert!(row[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_char_is_rejected() {
        let schema = Schema::new(vec![Column::new("tag", ColumnType::Char(2))]);
        let err = schema
            .encode_row(&[Value::Char("toolong".to_string())])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let schema = Schema::new(vec![Column::new("id", ColumnType::BigInt)]);
        let err = schema.encode_row(&[Value::Bool(true)]).unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }
}
