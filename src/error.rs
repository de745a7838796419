use crate::common::PageId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk IO error: {0}")]
    DiskIo(String),

    #[error("eviction candidate for page {0} is still pinned")]
    EvictedPagePinned(PageId),

    #[error("no unpinned frame available for eviction")]
    NoFreeFrame,

    #[error("page {0} was not pinned")]
    PageNotPinned(PageId),

    #[error("transaction aborted by validation")]
    TransactionAborted,

    #[error("no live transaction for this operation")]
    TransactionDisabled,

    #[error("corrupted page: {0}")]
    Corrupted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
