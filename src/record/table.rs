//! Table metadata and the catalog registry.
//!
//! Each table owns two singly-linked page chains: the in-place chain
//! holding current record versions and the time-travel chain holding
//! versions retired by updates and deletes.

use crate::buffer::manager::BufferManager;
use crate::common::{PageId, TableId};
use crate::error::{DbError, Result};
use crate::record::schema::Schema;
use crate::storage::page::PageKind;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Which of a table's two page chains an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    InPlace,
    TimeTravel,
}

#[derive(Debug, Clone, Copy)]
struct ChainEnds {
    first: PageId,
    last: PageId,
}

/// Logical table metadata. The chain tails move as pages fill up, so
/// they sit behind a small mutex; the id, name, and schema are fixed at
/// creation.
pub struct Table {
    id: TableId,
    name: String,
    schema: Schema,
    in_place: Mutex<ChainEnds>,
    time_travel: Mutex<ChainEnds>,
}

impl Table {
    fn new(
        id: TableId,
        name: String,
        schema: Schema,
        first_page_id: PageId,
        first_time_travel_page_id: PageId,
    ) -> Self {
        Self {
            id,
            name,
            schema,
            in_place: Mutex::new(ChainEnds {
                first: first_page_id,
                last: first_page_id,
            }),
            time_travel: Mutex::new(ChainEnds {
                first: first_time_travel_page_id,
                last: first_time_travel_page_id,
            }),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn first_page_id(&self) -> PageId {
        self.in_place.lock().first
    }

    pub fn last_page_id(&self) -> PageId {
        self.in_place.lock().last
    }

    pub fn first_time_travel_page_id(&self) -> PageId {
        self.time_travel.lock().first
    }

    pub fn last_time_travel_page_id(&self) -> PageId {
        self.time_travel.lock().last
    }

    pub(crate) fn chain_last(&self, chain: Chain) -> PageId {
        match chain {
            Chain::InPlace => self.last_page_id(),
            Chain::TimeTravel => self.last_time_travel_page_id(),
        }
    }

    pub(crate) fn set_chain_last(&self, chain: Chain, page_id: PageId) {
        match chain {
            Chain::InPlace => self.in_place.lock().last = page_id,
            Chain::TimeTravel => self.time_travel.lock().last = page_id,
        }
    }
}

/// Registry of live tables.
pub struct Catalog {
    tables: DashMap<TableId, Arc<Table>>,
    next_table_id: AtomicU32,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            next_table_id: AtomicU32::new(1),
        }
    }

    /// Create a table, allocating the first page of each of its chains.
    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
        buffer: &BufferManager,
    ) -> Result<Arc<Table>> {
        let name = name.into();
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);

        let first = buffer.allocate(PageKind::Record)?;
        let first_id = first.page_id();
        buffer.unpin(first_id, false)?;

        let time_travel = buffer.allocate(PageKind::Record)?;
        let time_travel_id = time_travel.page_id();
        buffer.unpin(time_travel_id, false)?;

        debug!(table = %name, id, first_id, time_travel_id, "created table");
        let table = Arc::new(Table::new(id, name, schema, first_id, time_travel_id));
        self.tables.insert(id, table.clone());
        Ok(table)
    }

    pub fn table(&self, id: TableId) -> Result<Arc<Table>> {
        self.tables
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DbError::Catalog(format!("no table with id {id}")))
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<Table>> {
        self.tables
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| entry.value().clone())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
