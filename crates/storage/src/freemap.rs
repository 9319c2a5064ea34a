//! Freemap side-files.
//!
//! A freemap is a fixed-size bitmap named `<rel>.fmap` next to the
//! relation file; bit `i` set means page `i` has at least one free slot.
//! A missing file means "unknown" and callers fall back to a linear page
//! scan, so every mutation here is best-effort bookkeeping, never a
//! correctness requirement.

use common::{DbError, DbResult, FREEMAP_BYTES, MAX_REL_PAGES};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Handle to one relation's freemap file.
#[derive(Debug, Clone)]
pub struct Freemap {
    path: PathBuf,
}

impl Freemap {
    pub fn for_relation(dir: &Path, rel_name: &str) -> Self {
        Self {
            path: dir.join(format!("{rel_name}.fmap")),
        }
    }

    /// Create (or reset) the bitmap with every bit clear.
    pub fn create(&self) -> DbResult<()> {
        fs::write(&self.path, [0u8; FREEMAP_BYTES])?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Delete the bitmap. Missing files are fine.
    pub fn remove(&self) -> DbResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::Io(e)),
        }
    }

    /// Mark page `pid` as having a free slot.
    pub fn mark_free(&self, pid: i16) -> DbResult<()> {
        self.set_bit(pid, true)
    }

    /// Mark page `pid` as full.
    pub fn mark_full(&self, pid: i16) -> DbResult<()> {
        self.set_bit(pid, false)
    }

    fn set_bit(&self, pid: i16, value: bool) -> DbResult<()> {
        if pid < 0 || pid as usize >= MAX_REL_PAGES {
            return Err(DbError::PageOutOfBounds { pid, slotnum: 0 });
        }
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.create()?;
                OpenOptions::new().read(true).write(true).open(&self.path)?
            }
            Err(e) => return Err(DbError::Io(e)),
        };

        let byte_index = pid as u64 / 8;
        let bit_index = pid as u32 % 8;
        file.seek(SeekFrom::Start(byte_index))?;
        let mut byte = [0u8; 1];
        // Short files read as zero.
        let _ = file.read(&mut byte)?;
        if value {
            byte[0] |= 1 << bit_index;
        } else {
            byte[0] &= !(1 << bit_index);
        }
        file.seek(SeekFrom::Start(byte_index))?;
        file.write_all(&byte)?;
        debug!("freemap {:?}: page {pid} -> {}", self.path, value);
        Ok(())
    }

    /// Any page currently known to have a free slot, or `None` when the
    /// bitmap is absent or exhausted.
    pub fn first_free(&self) -> DbResult<Option<i16>> {
        let buf = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DbError::Io(e)),
        };
        for (byte_index, &byte) in buf.iter().enumerate() {
            if byte == 0 {
                continue;
            }
            let bit = byte.trailing_zeros();
            let pid = byte_index * 8 + bit as usize;
            if pid < MAX_REL_PAGES {
                return Ok(Some(pid as i16));
            }
        }
        Ok(None)
    }
}
