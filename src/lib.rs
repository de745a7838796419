// BeeDB - educational relational database storage and transaction core.

pub mod buffer;
pub mod common;
pub mod error;
pub mod index;
pub mod record;
pub mod storage;
pub mod transaction;

pub use error::{DbError, Result};

use crate::buffer::manager::BufferManager;
use crate::buffer::replacement::ReplacementPolicy;
use crate::common::RESERVED_PAGE_COUNT;
use crate::record::heap::HeapStorage;
use crate::record::schema::Schema;
use crate::record::table::{Catalog, Table};
use crate::storage::disk::StorageManager;
use crate::storage::page::PageKind;
use crate::transaction::manager::TransactionManager;
use crate::transaction::transaction::{IsolationLevel, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Engine configuration, passed explicitly at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_path: PathBuf,
    pub buffer_frames: usize,
    pub replacement_policy: ReplacementPolicy,
    /// `k` for the LRU-K replacement policy.
    pub lru_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./beedb.data"),
            buffer_frames: 1024,
            replacement_policy: ReplacementPolicy::Lru,
            lru_k: 2,
        }
    }
}

/// The assembled storage engine: storage manager, buffer pool, catalog,
/// heap, and transaction manager wired together.
pub struct Database {
    storage: Arc<StorageManager>,
    buffer: Arc<BufferManager>,
    catalog: Arc<Catalog>,
    heap: HeapStorage,
    transactions: TransactionManager,
}

impl Database {
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Arc::new(StorageManager::open(&config.data_path)?);
        let buffer = Arc::new(
            BufferManager::builder()
                .frame_count(config.buffer_frames)
                .replacement_policy(config.replacement_policy)
                .lru_k(config.lru_k)
                .build(storage.clone()),
        );

        // A fresh file gets its system pages: metadata at page 0, the
        // four catalog pages behind it.
        if storage.page_count() == 0 {
            storage.allocate(PageKind::Metadata)?;
            for _ in 1..RESERVED_PAGE_COUNT {
                storage.allocate(PageKind::Record)?;
            }
        }

        let catalog = Arc::new(Catalog::new());
        let transactions = TransactionManager::new(buffer.clone(), catalog.clone())?;
        let heap = HeapStorage::new(buffer.clone());

        Ok(Self {
            storage,
            buffer,
            catalog,
            heap,
            transactions,
        })
    }

    pub fn begin(&self) -> Transaction {
        self.transactions.begin()
    }

    pub fn new_transaction(&self, isolation: IsolationLevel) -> Transaction {
        self.transactions.new_transaction(isolation)
    }

    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        self.transactions.commit(txn)
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.transactions.abort(txn)
    }

    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<Table>> {
        self.catalog.create_table(name, schema, &self.buffer)
    }

    pub fn heap(&self) -> &HeapStorage {
        &self.heap
    }

    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Persist the timestamp counter and write back every dirty,
    /// unpinned page.
    pub fn flush(&self) -> Result<()> {
        self.transactions.persist_timestamp()?;
        self.buffer.flush()
    }
}
