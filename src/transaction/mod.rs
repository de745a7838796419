pub mod manager;
pub mod sets;
pub mod timestamp;
#[allow(clippy::module_inception)]
pub mod transaction;

pub use manager::{CommittedTransaction, TransactionManager, TransactionStats};
pub use sets::{Predicate, ReadSetItem, ScanSetItem, WriteKind, WriteSetItem};
pub use timestamp::Timestamp;
pub use transaction::{IsolationLevel, Transaction, TransactionState};
