//! The open-relation cache and its one-page buffers.
//!
//! Every open relation occupies one cache slot holding its relcat row,
//! its ordered attribute list, its file handle, and a single buffered
//! page with write-back semantics. Slots 0 and 1 permanently hold the
//! two system catalogs; user relations share slots `2..max_open` under a
//! first-free-then-least-recently-used policy driven by a monotonic
//! counter.
//!
//! The tuple primitives (`insert_rec`, `delete_rec`, `write_rec`,
//! `get_next_rec`, `find_rec`) live in [`primitives`] and are the only
//! code that touches page slot-maps.

mod primitives;


use catalog::{
    attrcat_schema, catalog_attr_rid, relcat_schema, AttrCatRec, RelCatRec, RELCAT_NUM_ATTRS,
    RELCAT_REC_LEN,
};
use common::{DbError, DbResult, Rid, ATTRCAT_NAME, ATTRCAT_SLOT, RELCAT_NAME, RELCAT_SLOT};
use log::debug;
use std::path::{Path, PathBuf};
use storage::{PageBuf, RelFile};
use types::{CompareOp, FieldValue};

/// A typed predicate over one fixed-width field of a record.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub value: FieldValue,
    pub offset: usize,
    pub size: usize,
    pub op: CompareOp,
}

impl Predicate {
    /// Does the predicate hold for this record?
    pub fn matches(&self, rec: &[u8]) -> bool {
        self.value
            .matches(&rec[self.offset..self.offset + self.size], self.op)
    }
}

/// One attribute of an open relation, with the RID of its attrcat row.
#[derive(Clone, Debug)]
pub struct AttrEntry {
    pub rec: AttrCatRec,
    pub rid: Rid,
}

#[derive(Debug)]
struct Slot {
    valid: bool,
    pinned: bool,
    /// The cached relcat row differs from disk.
    dirty: bool,
    rel: RelCatRec,
    relcat_rid: Rid,
    file: Option<RelFile>,
    attrs: Vec<AttrEntry>,
    stamp: u64,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            valid: false,
            pinned: false,
            dirty: false,
            rel: RelCatRec {
                rel_name: String::new(),
                rec_length: 0,
                recs_per_page: 0,
                num_attrs: 0,
                num_recs: 0,
                num_pages: 0,
            },
            relcat_rid: Rid::INVALID,
            file: None,
            attrs: Vec::new(),
            stamp: 0,
        }
    }
}

struct PageSlot {
    pid: i16,
    page: PageBuf,
    dirty: bool,
}

impl PageSlot {
    fn empty() -> Self {
        PageSlot {
            pid: -1,
            page: PageBuf::zeroed(),
            dirty: false,
        }
    }
}

/// The open-relation cache: `max_open` slots plus their page buffers.
pub struct RelCache {
    db_dir: PathBuf,
    slots: Vec<Slot>,
    pages: Vec<PageSlot>,
    clock: u64,
}

impl RelCache {
    /// Open the system catalogs of the database rooted at `db_dir` and
    /// build a cache with `max_open` slots (at least 3: the two catalogs
    /// plus one user slot).
    pub fn open_cats(db_dir: &Path, max_open: usize) -> DbResult<Self> {
        let max_open = max_open.max(3);
        let mut relcat_file =
            RelFile::open(&db_dir.join(RELCAT_NAME)).map_err(|_| DbError::CatOpen)?;
        let attrcat_file =
            RelFile::open(&db_dir.join(ATTRCAT_NAME)).map_err(|_| DbError::CatOpen)?;

        // The catalog geometry lives in slots 0 and 1 of relcat page 0.
        let mut page0 = PageBuf::zeroed();
        relcat_file
            .read_page(0, &mut page0)
            .map_err(|_| DbError::CatOpen)?;
        if !page0.has_magic() {
            return Err(DbError::CatOpen);
        }
        let relcat_rec = RelCatRec::decode(page0.record(0, RELCAT_REC_LEN));
        let attrcat_rec = RelCatRec::decode(page0.record(1, RELCAT_REC_LEN));
        if relcat_rec.rel_name != RELCAT_NAME || attrcat_rec.rel_name != ATTRCAT_NAME {
            return Err(DbError::CatOpen);
        }

        let mut slots: Vec<Slot> = (0..max_open).map(|_| Slot::empty()).collect();
        let pages = (0..max_open).map(|_| PageSlot::empty()).collect();

        slots[RELCAT_SLOT] = Slot {
            valid: true,
            pinned: true,
            dirty: false,
            rel: relcat_rec,
            relcat_rid: Rid::new(0, 0),
            file: Some(relcat_file),
            attrs: relcat_schema()
                .into_iter()
                .enumerate()
                .map(|(i, rec)| AttrEntry {
                    rec,
                    rid: catalog_attr_rid(i),
                })
                .collect(),
            stamp: 0,
        };
        slots[ATTRCAT_SLOT] = Slot {
            valid: true,
            pinned: true,
            dirty: false,
            rel: attrcat_rec,
            relcat_rid: Rid::new(0, 1),
            file: Some(attrcat_file),
            attrs: attrcat_schema()
                .into_iter()
                .enumerate()
                .map(|(i, rec)| AttrEntry {
                    rec,
                    rid: catalog_attr_rid(RELCAT_NUM_ATTRS as usize + i),
                })
                .collect(),
            stamp: 0,
        };

        Ok(RelCache {
            db_dir: db_dir.to_path_buf(),
            slots,
            pages,
            clock: 0,
        })
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn max_open(&self) -> usize {
        self.slots.len()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn slot(&self, rel_num: usize) -> DbResult<&Slot> {
        let slot = self
            .slots
            .get(rel_num)
            .ok_or(DbError::InvalidRelNum(rel_num))?;
        if !slot.valid {
            return Err(DbError::InvalidRelNum(rel_num));
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, rel_num: usize) -> DbResult<&mut Slot> {
        let slot = self
            .slots
            .get_mut(rel_num)
            .ok_or(DbError::InvalidRelNum(rel_num))?;
        if !slot.valid {
            return Err(DbError::InvalidRelNum(rel_num));
        }
        Ok(slot)
    }

    /// The cached relcat row of an open relation.
    pub fn rel(&self, rel_num: usize) -> DbResult<&RelCatRec> {
        Ok(&self.slot(rel_num)?.rel)
    }

    /// The ordered attribute list of an open relation.
    pub fn attrs(&self, rel_num: usize) -> DbResult<&[AttrEntry]> {
        Ok(&self.slot(rel_num)?.attrs)
    }

    /// Look up an attribute of an open relation by name.
    pub fn find_attr(&self, rel_num: usize, attr_name: &str) -> DbResult<Option<&AttrEntry>> {
        Ok(self
            .slot(rel_num)?
            .attrs
            .iter()
            .find(|a| a.rec.attr_name == attr_name))
    }

    /// Replace one cached attribute row, persisting it to attrcat first.
    pub fn update_attr(&mut self, rel_num: usize, idx: usize, rec: AttrCatRec) -> DbResult<()> {
        let rid = self
            .slot(rel_num)?
            .attrs
            .get(idx)
            .ok_or(DbError::InvalidRelNum(rel_num))?
            .rid;
        self.write_rec(ATTRCAT_SLOT, &rec.encode(), rid)?;
        self.slot_mut(rel_num)?.attrs[idx].rec = rec;
        Ok(())
    }

    /// Cache slot of an already-open relation, if any.
    pub fn find_rel_num(&self, rel_name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.valid && s.rel.rel_name == rel_name)
    }

    /// Open a relation, returning its cache slot.
    pub fn open_rel(&mut self, rel_name: &str) -> DbResult<usize> {
        if let Some(rel_num) = self.find_rel_num(rel_name) {
            let stamp = self.tick();
            self.slots[rel_num].stamp = stamp;
            return Ok(rel_num);
        }

        // First invalid user slot wins; otherwise evict the stalest.
        let victim = match (2..self.slots.len()).find(|&i| !self.slots[i].valid) {
            Some(free) => free,
            None => (2..self.slots.len())
                .min_by_key(|&i| self.slots[i].stamp)
                .ok_or(DbError::CacheFull)?,
        };

        let (relcat_rid, raw) = self
            .find_rec(
                RELCAT_SLOT,
                Rid::INVALID,
                &rel_name_predicate(rel_name, catalog::RELCAT_NAME_OFFSET as usize),
            )?
            .ok_or_else(|| DbError::RelNotFound(rel_name.to_string()))?;
        let rel = RelCatRec::decode(&raw);

        debug_assert!(!self.slots[victim].pinned);
        if self.slots[victim].valid {
            debug!("evicting '{}' from slot {victim}", self.slots[victim].rel.rel_name);
            self.close_rel(victim)?;
        }

        let file = RelFile::open(&self.db_dir.join(&rel.rel_name))?;

        let mut attrs = Vec::with_capacity(rel.num_attrs as usize);
        let pred = rel_name_predicate(rel_name, catalog::ATTRCAT_RELNAME_OFFSET as usize);
        let mut cursor = Rid::INVALID;
        while let Some((rid, raw)) = self.find_rec(ATTRCAT_SLOT, cursor, &pred)? {
            attrs.push(AttrEntry {
                rec: AttrCatRec::decode(&raw),
                rid,
            });
            cursor = rid;
        }

        let stamp = self.tick();
        self.slots[victim] = Slot {
            valid: true,
            pinned: false,
            dirty: false,
            rel,
            relcat_rid,
            file: Some(file),
            attrs,
            stamp,
        };
        self.pages[victim] = PageSlot::empty();
        debug!("opened '{rel_name}' in slot {victim}");
        Ok(victim)
    }

    /// Close one slot: write back the relcat row if dirty, flush the
    /// buffered page if dirty, drop the attribute list and file handle.
    pub fn close_rel(&mut self, rel_num: usize) -> DbResult<()> {
        let slot = self.slot(rel_num)?;
        if slot.dirty {
            let raw = slot.rel.encode();
            let rid = slot.relcat_rid;
            self.write_rec(RELCAT_SLOT, &raw, rid)?;
        }
        if self.pages[rel_num].dirty {
            self.flush_page(rel_num)?;
        }
        let slot = &mut self.slots[rel_num];
        slot.valid = false;
        slot.dirty = false;
        slot.file = None;
        slot.attrs.clear();
        self.pages[rel_num] = PageSlot::empty();
        Ok(())
    }

    /// Close every open relation, then attrcat, then relcat. Ordering
    /// matters: closing a user slot may write through relcat.
    pub fn close_cats(mut self) -> DbResult<()> {
        if !self.slots[RELCAT_SLOT].valid || !self.slots[ATTRCAT_SLOT].valid {
            return Err(DbError::CatOpen);
        }
        for i in 2..self.slots.len() {
            if self.slots[i].valid {
                self.close_rel(i)?;
            }
        }
        self.close_rel(ATTRCAT_SLOT)?;
        self.close_rel(RELCAT_SLOT)?;
        Ok(())
    }

    /// Ensure the buffer of `rel_num` holds page `pid`, flushing any
    /// dirty occupant first.
    pub fn read_page(&mut self, rel_num: usize, pid: i16) -> DbResult<()> {
        let slot = self.slot(rel_num)?;
        if slot.file.is_none() {
            return Err(DbError::RelNotOpen(rel_num));
        }
        if pid < 0 || pid as i32 >= slot.rel.num_pages {
            return Err(DbError::PageOutOfBounds { pid, slotnum: 0 });
        }
        if self.pages[rel_num].pid == pid {
            return Ok(());
        }
        if self.pages[rel_num].dirty {
            self.flush_page(rel_num)?;
        }
        let file = self.slots[rel_num].file.as_mut().unwrap();
        file.read_page(pid, &mut self.pages[rel_num].page)?;
        self.pages[rel_num].pid = pid;
        self.pages[rel_num].dirty = false;
        Ok(())
    }

    /// Write the buffered page back iff dirty.
    pub fn flush_page(&mut self, rel_num: usize) -> DbResult<()> {
        let slot = self
            .slots
            .get_mut(rel_num)
            .ok_or(DbError::InvalidRelNum(rel_num))?;
        let page = &mut self.pages[rel_num];
        if !page.dirty {
            return Ok(());
        }
        let file = slot.file.as_mut().ok_or(DbError::RelNotOpen(rel_num))?;
        file.write_page(page.pid, &page.page)?;
        page.dirty = false;
        Ok(())
    }
}

/// Equality predicate on a fixed-width name field.
pub fn rel_name_predicate(name: &str, offset: usize) -> Predicate {
    Predicate {
        value: FieldValue::Bytes(catalog::packed_rel_name(name)),
        offset,
        size: common::REL_NAME_LEN,
        op: CompareOp::Eq,
    }
}
