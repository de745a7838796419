//! Storage manager: raw paged access to the single data file.
//!
//! Page `i` occupies bytes `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)`. The
//! file length is always a multiple of [`PAGE_SIZE`]. Allocation appends
//! a default-initialized page at the end; pages are never deallocated.

use crate::common::{PageId, PAGE_SIZE};
use crate::error::{DbError, Result};
use crate::storage::page::{self, PageKind};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Raw paged file access. Thread-safe: the file handle is guarded by a
/// mutex, the page count is read lock-free.
pub struct StorageManager {
    path: PathBuf,
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl StorageManager {
    /// Open (or create) the data file at `path` and derive the page count
    /// from the file size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Corrupted(format!(
                "data file {} has length {} which is not a page multiple",
                path.display(),
                len
            )));
        }

        let page_count = (len / PAGE_SIZE as u64) as u32;
        debug!(path = %path.display(), page_count, "opened data file");

        Ok(Self {
            path,
            file: Mutex::new(file),
            page_count: AtomicU32::new(page_count),
        })
    }

    /// Read one page into `buffer` (which must be exactly one page long).
    pub fn read_page(&self, page_id: PageId, buffer: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);
        if page_id >= self.page_count() {
            return Err(DbError::DiskIo(format!(
                "read of page {page_id} beyond end of file ({} pages)",
                self.page_count()
            )));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .and_then(|_| file.read_exact(buffer))
            .map_err(|e| DbError::DiskIo(format!("read of page {page_id} failed: {e}")))
    }

    /// Write one page's bytes.
    pub fn write_page(&self, page_id: PageId, buffer: &[u8]) -> Result<()> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .and_then(|_| file.write_all(buffer))
            .map_err(|e| DbError::DiskIo(format!("write of page {page_id} failed: {e}")))
    }

    /// Append a default-initialized page of the given kind and return its
    /// id. Safe under concurrent allocation: the whole step runs under
    /// the file lock.
    pub fn allocate(&self, kind: PageKind) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_id = self.page_count.load(Ordering::Acquire);

        let mut image = vec![0u8; PAGE_SIZE];
        page::init_page(&mut image, kind);

        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))
            .and_then(|_| file.write_all(&image))
            .map_err(|e| DbError::DiskIo(format!("allocation of page {page_id} failed: {e}")))?;

        self.page_count.store(page_id + 1, Ordering::Release);
        debug!(page_id, ?kind, "allocated page");
        Ok(page_id)
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
