//! Page-structured heap files and their side structures.
//!
//! A relation is a sequence of fixed-size pages in a single file. Each
//! page carries an owner byte, the shared magic string, a little-endian
//! 64-bit slot-map, and a packed array of fixed-width record slots.
//! Record liveness is determined solely by the slot-map; slot bytes are
//! never scrubbed on delete.

mod freemap;
mod page;

pub use freemap::Freemap;
pub use page::PageBuf;

use common::{DbError, DbResult, PAGE_SIZE};
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A relation's backing file, addressed page by page.
#[derive(Debug)]
pub struct RelFile {
    file: File,
}

impl RelFile {
    /// Create an empty relation file. Fails if the file already exists.
    pub fn create(path: &Path) -> DbResult<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(())
    }

    /// Open an existing relation file read-write.
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DbError::FileNotFound(path.to_path_buf())
                } else {
                    DbError::Io(e)
                }
            })?;
        Ok(Self { file })
    }

    /// Read page `pid` into `out`.
    pub fn read_page(&mut self, pid: i16, out: &mut PageBuf) -> DbResult<()> {
        trace!("read page {pid}");
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
        self.file.read_exact(out.as_mut_bytes())?;
        Ok(())
    }

    /// Write `page` at index `pid`, extending the file when `pid` is the
    /// next page.
    pub fn write_page(&mut self, pid: i16, page: &PageBuf) -> DbResult<()> {
        trace!("write page {pid}");
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// File length in whole pages.
    pub fn page_count(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len() / PAGE_SIZE as u64)
    }

    /// Discard every page. Used by load rollback.
    pub fn truncate(&mut self) -> DbResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}
