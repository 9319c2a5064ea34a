//! Tuple primitives over the buffered page of an open relation.
//!
//! These are the only routines that modify slot-maps. Relcat rows are
//! persisted eagerly: every successful `insert_rec`/`delete_rec` writes
//! the updated row through `write_rec` before returning, so catalog
//! counts survive a close at any point.

use crate::{Predicate, RelCache};
use common::{
    DbError, DbResult, Rid, ATTRCAT_SLOT, MAX_REL_PAGES, OWNER_ATTRCAT, OWNER_RELCAT, OWNER_USER,
    PAGE_SIZE, RELCAT_SLOT,
};
use log::debug;
use storage::{Freemap, PageBuf};

fn owner_byte(rel_num: usize) -> u8 {
    match rel_num {
        RELCAT_SLOT => OWNER_RELCAT,
        ATTRCAT_SLOT => OWNER_ATTRCAT,
        _ => OWNER_USER,
    }
}

impl RelCache {
    /// Persist the cached relcat row of `rel_num` through `write_rec`.
    fn persist_rel_row(&mut self, rel_num: usize) -> DbResult<()> {
        let slot = self.slot(rel_num)?;
        let raw = slot.rel.encode();
        let rid = slot.relcat_rid;
        self.write_rec(RELCAT_SLOT, &raw, rid)
    }

    /// Try to place `rec` in an existing free slot of page `pid`.
    /// Returns the RID used, or `None` when the page is full.
    fn insert_into_page(
        &mut self,
        rel_num: usize,
        pid: i16,
        rec: &[u8],
    ) -> DbResult<Option<Rid>> {
        self.read_page(rel_num, pid)?;
        let rel = &self.slot(rel_num)?.rel;
        let (recs_per_page, rec_length, rel_name) =
            (rel.recs_per_page, rel.rec_length as usize, rel.rel_name.clone());

        if !self.pages[rel_num].page.has_magic() {
            return Err(DbError::PageMagic { rel: rel_name, pid });
        }
        let Some(slotnum) = self.pages[rel_num].page.first_free_slot(recs_per_page) else {
            return Ok(None);
        };

        let page = &mut self.pages[rel_num].page;
        page.write_record(slotnum, rec_length, rec);
        page.set_slot(slotnum, true);
        let now_full = page.first_free_slot(recs_per_page).is_none();
        self.pages[rel_num].dirty = true;

        self.slot_mut(rel_num)?.rel.num_recs += 1;
        self.slot_mut(rel_num)?.dirty = true;
        self.persist_rel_row(rel_num)?;

        let fmap = Freemap::for_relation(self.db_dir(), &rel_name);
        if fmap.exists() {
            if now_full {
                fmap.mark_full(pid)?;
            } else {
                fmap.mark_free(pid)?;
            }
        }
        Ok(Some(Rid::new(pid, slotnum)))
    }

    /// Insert a record into the first free slot, allocating a new page
    /// when every existing page is full. Returns the RID used.
    pub fn insert_rec(&mut self, rel_num: usize, rec: &[u8]) -> DbResult<Rid> {
        let rel = self.slot(rel_num)?.rel.clone();
        debug_assert_eq!(rec.len(), rel.rec_length as usize);

        // Freemap fast path; a stale bit falls through to the scan.
        let fmap = Freemap::for_relation(self.db_dir(), &rel.rel_name);
        if let Some(pid) = fmap.first_free()? {
            if (pid as i32) < rel.num_pages {
                if let Some(rid) = self.insert_into_page(rel_num, pid, rec)? {
                    return Ok(rid);
                }
                fmap.mark_full(pid)?;
            }
        }

        for pid in 0..rel.num_pages {
            if let Some(rid) = self.insert_into_page(rel_num, pid as i16, rec)? {
                return Ok(rid);
            }
        }

        // Every page is full: allocate a new one.
        if rel.num_pages as usize >= MAX_REL_PAGES {
            return Err(DbError::RelPageLimit(rel.rel_name));
        }
        self.flush_page(rel_num)?;
        let pid = rel.num_pages as i16;
        let mut page = PageBuf::formatted(owner_byte(rel_num));
        page.write_record(0, rel.rec_length as usize, rec);
        page.set_slot(0, true);
        self.pages[rel_num].page = page;
        self.pages[rel_num].pid = pid;
        self.pages[rel_num].dirty = true;

        {
            let slot = self.slot_mut(rel_num)?;
            slot.rel.num_recs += 1;
            slot.rel.num_pages += 1;
            slot.dirty = true;
        }
        self.persist_rel_row(rel_num)?;

        if fmap.exists() && rel.recs_per_page > 1 {
            fmap.mark_free(pid)?;
        }
        debug!("allocated page {pid} of '{}'", rel.rel_name);
        Ok(Rid::new(pid, 0))
    }

    /// Clear the slot bit of `rid`, update counts, and maintain the
    /// freemap on a full-to-free transition. Record bytes stay in place.
    pub fn delete_rec(&mut self, rel_num: usize, rid: Rid) -> DbResult<()> {
        let rel = self.slot(rel_num)?.rel.clone();
        if !rid.is_valid()
            || rid.pid as i32 >= rel.num_pages
            || rid.slotnum as i32 >= rel.recs_per_page
        {
            return Err(DbError::PageOutOfBounds {
                pid: rid.pid,
                slotnum: rid.slotnum,
            });
        }

        self.read_page(rel_num, rid.pid)?;
        let full_mask = PageBuf::full_mask(rel.recs_per_page);
        let page = &mut self.pages[rel_num].page;
        let before = page.slotmap();
        if before & (1u64 << rid.slotnum) == 0 {
            return Err(DbError::PageOutOfBounds {
                pid: rid.pid,
                slotnum: rid.slotnum,
            });
        }
        let was_full = before & full_mask == full_mask;
        page.set_slot(rid.slotnum, false);
        let has_free_after = page.slotmap() & full_mask != full_mask;
        self.pages[rel_num].dirty = true;

        self.slot_mut(rel_num)?.rel.num_recs -= 1;
        self.slot_mut(rel_num)?.dirty = true;
        self.persist_rel_row(rel_num)?;

        let fmap = Freemap::for_relation(self.db_dir(), &rel.rel_name);
        if fmap.exists() && was_full && has_free_after {
            fmap.mark_free(rid.pid)?;
        }
        Ok(())
    }

    /// Overwrite the record at `rid` in place. Leaves the slot-map and
    /// relcat untouched.
    pub fn write_rec(&mut self, rel_num: usize, rec: &[u8], rid: Rid) -> DbResult<()> {
        let rel = self.slot(rel_num)?.rel.clone();
        if !rid.is_valid()
            || rid.pid as i32 >= rel.num_pages
            || rid.slotnum as i32 >= rel.recs_per_page
        {
            return Err(DbError::PageOutOfBounds {
                pid: rid.pid,
                slotnum: rid.slotnum,
            });
        }
        self.read_page(rel_num, rid.pid)?;
        self.pages[rel_num]
            .page
            .write_record(rid.slotnum, rel.rec_length as usize, rec);
        self.pages[rel_num].dirty = true;
        Ok(())
    }

    /// The next live record after `start` in RID order, or `None` at end
    /// of scan.
    pub fn get_next_rec(
        &mut self,
        rel_num: usize,
        start: Rid,
    ) -> DbResult<Option<(Rid, Vec<u8>)>> {
        self.scan_from(rel_num, start, None)
    }

    /// The next record after `start` whose field satisfies `pred`.
    pub fn find_rec(
        &mut self,
        rel_num: usize,
        start: Rid,
        pred: &Predicate,
    ) -> DbResult<Option<(Rid, Vec<u8>)>> {
        self.scan_from(rel_num, start, Some(pred))
    }

    fn scan_from(
        &mut self,
        rel_num: usize,
        start: Rid,
        pred: Option<&Predicate>,
    ) -> DbResult<Option<(Rid, Vec<u8>)>> {
        let rel = self.slot(rel_num)?.rel.clone();
        let mut rid = start.next(rel.recs_per_page);
        while (rid.pid as i32) < rel.num_pages {
            self.read_page(rel_num, rid.pid)?;
            let page = &self.pages[rel_num].page;
            if page.slot_used(rid.slotnum) {
                let rec = page.record(rid.slotnum, rel.rec_length as usize);
                if pred.map_or(true, |p| p.matches(rec)) {
                    return Ok(Some((rid, rec.to_vec())));
                }
            }
            rid = rid.next(rel.recs_per_page);
        }
        Ok(None)
    }

    /// Append one externally produced page image, growing the page and
    /// record counts. The caller validates the image first.
    pub fn append_page(&mut self, rel_num: usize, raw: &[u8; PAGE_SIZE]) -> DbResult<()> {
        let rel = self.slot(rel_num)?.rel.clone();
        if rel.num_pages as usize >= MAX_REL_PAGES {
            return Err(DbError::RelPageLimit(rel.rel_name));
        }
        let mut page = PageBuf::zeroed();
        page.as_mut_bytes().copy_from_slice(raw);
        let live = page.live_records(rel.recs_per_page) as i32;

        let slot = self.slot_mut(rel_num)?;
        let pid = slot.rel.num_pages as i16;
        slot.file
            .as_mut()
            .ok_or(DbError::RelNotOpen(rel_num))?
            .write_page(pid, &page)?;
        slot.rel.num_pages += 1;
        slot.rel.num_recs += live;
        slot.dirty = true;
        Ok(())
    }

    /// Drop every page of the relation and zero its counts. Used by load
    /// rollback.
    pub fn truncate_rel(&mut self, rel_num: usize) -> DbResult<()> {
        let slot = self.slot_mut(rel_num)?;
        slot.file
            .as_mut()
            .ok_or(DbError::RelNotOpen(rel_num))?
            .truncate()?;
        slot.rel.num_pages = 0;
        slot.rel.num_recs = 0;
        slot.dirty = true;
        self.pages[rel_num].pid = -1;
        self.pages[rel_num].dirty = false;
        Ok(())
    }
}
