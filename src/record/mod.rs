pub mod heap;
pub mod rowset;
pub mod schema;
pub mod table;
pub mod tuple;

pub use heap::HeapStorage;
pub use rowset::RowSet;
pub use schema::{Column, ColumnType, Schema, Value};
pub use table::{Catalog, Table};
pub use tuple::{RecordMeta, Tuple, TupleHandle};
