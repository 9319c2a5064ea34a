//! Schema operations: create, destroy, load, and index maintenance.

use crate::{forbid_catalogs, Engine};
use buffer::rel_name_predicate;
use catalog::{AttrCatRec, RelCatRec, ATTRCAT_RELNAME_OFFSET, RELCAT_NAME_OFFSET};
use common::{
    recs_per_page, DbError, DbResult, Rid, ATTRCAT_SLOT, ATTR_NAME_LEN, GEN_MAGIC, MAGIC_SIZE,
    MAX_RECORD, PAGE_SIZE, RELCAT_SLOT, REL_NAME_LEN,
};
use log::info;
use std::fs;
use storage::{Freemap, RelFile};
use types::{parse_format, render_format, AttrType, FormatError};

impl Engine {
    /// Create a relation from `(attribute, format)` pairs. Offsets are
    /// assigned in the order given.
    pub fn create(&mut self, rel_name: &str, attrs: &[(String, String)]) -> DbResult<()> {
        if attrs.is_empty() {
            return Err(DbError::MissingArgs("create".to_string()));
        }
        if rel_name.len() >= REL_NAME_LEN {
            return Err(DbError::RelNameTooLong(rel_name.to_string()));
        }
        for (name, _) in attrs {
            if name.len() >= ATTR_NAME_LEN {
                return Err(DbError::AttrNameTooLong(name.clone()));
            }
        }
        for (i, (name, _)) in attrs.iter().enumerate() {
            if attrs[i + 1..].iter().any(|(other, _)| other == name) {
                return Err(DbError::DupAttr(name.clone()));
            }
        }

        let mut parsed: Vec<(String, AttrType, usize)> = Vec::with_capacity(attrs.len());
        let mut rec_length = 0usize;
        for (name, format) in attrs {
            let (ty, width) = parse_format(format).map_err(|e| match e {
                FormatError::Syntax => DbError::InvalidFormat(format.clone()),
                FormatError::StrLen => DbError::StrLenInvalid(format.clone()),
            })?;
            rec_length += width;
            parsed.push((name.clone(), ty, width));
        }

        let cache = self.cache_mut()?;
        let pred = rel_name_predicate(rel_name, RELCAT_NAME_OFFSET as usize);
        if cache.find_rec(RELCAT_SLOT, Rid::INVALID, &pred)?.is_some() {
            return Err(DbError::RelExists(rel_name.to_string()));
        }
        if rec_length > MAX_RECORD {
            return Err(DbError::RecTooLong { len: rec_length });
        }

        RelFile::create(&cache.db_dir().join(rel_name))?;
        Freemap::for_relation(cache.db_dir(), rel_name).create()?;

        let rel = RelCatRec {
            rel_name: rel_name.to_string(),
            rec_length: rec_length as i32,
            recs_per_page: recs_per_page(rec_length),
            num_attrs: attrs.len() as i32,
            num_recs: 0,
            num_pages: 0,
        };
        cache.insert_rec(RELCAT_SLOT, &rel.encode())?;

        let mut offset = 0i32;
        for (name, ty, width) in parsed {
            let attr = AttrCatRec {
                offset,
                length: width as i32,
                ty,
                attr_name: name,
                rel_name: rel_name.to_string(),
                has_index: false,
                index_pages: 0,
                index_keys: 0,
            };
            cache.insert_rec(ATTRCAT_SLOT, &attr.encode())?;
            offset += width as i32;
        }
        info!("created relation {rel_name} ({} attrs)", attrs.len());
        Ok(())
    }

    /// Create a relation whose schema is an ordered attribute list.
    /// Offsets are recomputed from the lengths, so the new relation is
    /// packed in list order regardless of the sources' layouts.
    pub fn create_from_attr_list(&mut self, rel_name: &str, list: &[AttrCatRec]) -> DbResult<()> {
        let attrs: Vec<(String, String)> = list
            .iter()
            .map(|a| {
                (
                    a.attr_name.clone(),
                    render_format(a.ty, a.length as usize),
                )
            })
            .collect();
        self.create(rel_name, &attrs)
    }

    /// Destroy a relation: its data file, freemap, index files, and
    /// catalog rows.
    pub fn destroy(&mut self, rel_name: &str) -> DbResult<()> {
        forbid_catalogs(rel_name)?;
        let cache = self.cache_mut()?;

        let pred = rel_name_predicate(rel_name, RELCAT_NAME_OFFSET as usize);
        let Some((relcat_rid, _)) = cache.find_rec(RELCAT_SLOT, Rid::INVALID, &pred)? else {
            return Err(DbError::RelNotFound(rel_name.to_string()));
        };

        if let Some(rel_num) = cache.find_rel_num(rel_name) {
            cache.close_rel(rel_num)?;
        }

        fs::remove_file(cache.db_dir().join(rel_name))?;
        Freemap::for_relation(cache.db_dir(), rel_name).remove()?;

        cache.delete_rec(RELCAT_SLOT, relcat_rid)?;

        // Walk attrcat deleting every attribute row, dropping any index
        // file along the way.
        let db_dir = cache.db_dir().to_path_buf();
        let pred = rel_name_predicate(rel_name, ATTRCAT_RELNAME_OFFSET as usize);
        let mut cursor = Rid::INVALID;
        while let Some((rid, raw)) = cache.find_rec(ATTRCAT_SLOT, cursor, &pred)? {
            let attr = AttrCatRec::decode(&raw);
            if attr.has_index {
                btree::destroy_index(&db_dir, rel_name, &attr.attr_name)?;
            }
            cache.delete_rec(ATTRCAT_SLOT, rid)?;
            cursor = rid;
        }
        info!("destroyed relation {rel_name}");
        Ok(())
    }

    /// Load an externally produced page-formatted file into an empty
    /// relation. Any failure truncates the target back to empty.
    pub fn load(&mut self, rel_name: &str, file_path: &str) -> DbResult<()> {
        let src_path = self.resolve_data_path(file_path)?;
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;

        if !src_path.is_file() {
            return Err(DbError::FileNotFound(src_path));
        }
        if cache.rel(rel_num)?.num_pages != 0 {
            return Err(DbError::LoadNonEmpty(rel_name.to_string()));
        }
        let data = fs::read(&src_path)?;
        if data.is_empty() || data.len() % PAGE_SIZE != 0 {
            return Err(DbError::InvalidFileSize(data.len() as u64));
        }

        let mut magic = [0u8; MAGIC_SIZE - 1];
        magic[..GEN_MAGIC.len()].copy_from_slice(GEN_MAGIC);
        for (i, chunk) in data.chunks_exact(PAGE_SIZE).enumerate() {
            if chunk[1..MAGIC_SIZE] != magic {
                cache.truncate_rel(rel_num)?;
                return Err(DbError::PageMagic {
                    rel: rel_name.to_string(),
                    pid: i as i16,
                });
            }
            let page: &[u8; PAGE_SIZE] = chunk.try_into().expect("exact page chunk");
            if let Err(e) = cache.append_page(rel_num, page) {
                cache.truncate_rel(rel_num)?;
                return Err(e);
            }
        }
        let rel = cache.rel(rel_num)?;
        info!(
            "loaded {} pages / {} records into {rel_name}",
            rel.num_pages, rel.num_recs
        );
        Ok(())
    }

    /// Build a B+ tree index on one attribute of an empty relation.
    pub fn build_index(&mut self, rel_name: &str, attr_name: &str) -> DbResult<()> {
        forbid_catalogs(rel_name)?;
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;

        let (idx, attr) = cache
            .attrs(rel_num)?
            .iter()
            .enumerate()
            .find(|(_, a)| a.rec.attr_name == attr_name)
            .map(|(i, a)| (i, a.rec.clone()))
            .ok_or_else(|| DbError::AttrNotFound {
                rel: rel_name.to_string(),
                attr: attr_name.to_string(),
            })?;

        let rel = cache.rel(rel_num)?;
        if rel.num_recs != 0 || rel.num_pages != 0 {
            return Err(DbError::IndexNonEmpty(rel_name.to_string()));
        }
        if attr.has_index {
            return Err(DbError::IndexExists {
                rel: rel_name.to_string(),
                attr: attr_name.to_string(),
            });
        }

        let db_dir = cache.db_dir().to_path_buf();
        let tree = btree::BpTree::create(
            &db_dir,
            rel_name,
            attr_name,
            attr.ty,
            attr.length as usize,
        )?;

        let mut updated = attr;
        updated.has_index = true;
        updated.index_pages = tree.num_pages();
        updated.index_keys = 0;
        cache.update_attr(rel_num, idx, updated)?;
        info!("built index on {rel_name}.{attr_name}");
        Ok(())
    }

    /// Drop one index, or every index of the relation when no attribute
    /// is named.
    pub fn drop_index(&mut self, rel_name: &str, attr_name: Option<&str>) -> DbResult<()> {
        forbid_catalogs(rel_name)?;
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;
        let db_dir = cache.db_dir().to_path_buf();

        let targets: Vec<(usize, AttrCatRec)> = match attr_name {
            Some(name) => {
                let (idx, attr) = cache
                    .attrs(rel_num)?
                    .iter()
                    .enumerate()
                    .find(|(_, a)| a.rec.attr_name == name)
                    .map(|(i, a)| (i, a.rec.clone()))
                    .ok_or_else(|| DbError::AttrNotFound {
                        rel: rel_name.to_string(),
                        attr: name.to_string(),
                    })?;
                if !attr.has_index {
                    return Err(DbError::IndexNotFound {
                        rel: rel_name.to_string(),
                        attr: name.to_string(),
                    });
                }
                vec![(idx, attr)]
            }
            None => cache
                .attrs(rel_num)?
                .iter()
                .enumerate()
                .filter(|(_, a)| a.rec.has_index)
                .map(|(i, a)| (i, a.rec.clone()))
                .collect(),
        };

        for (idx, attr) in targets {
            btree::destroy_index(&db_dir, rel_name, &attr.attr_name)?;
            let mut updated = attr;
            updated.has_index = false;
            updated.index_pages = 0;
            updated.index_keys = 0;
            cache.update_attr(rel_num, idx, updated)?;
        }
        Ok(())
    }
}
