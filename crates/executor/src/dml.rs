//! Tuple-level commands: insert with duplicate detection, and predicate
//! delete.

use crate::{forbid_catalogs, Engine};
use buffer::{AttrEntry, Predicate, RelCache};
use catalog::AttrCatRec;
use common::{DbError, DbResult, Rid};
use types::{float_cmp, AttrType, CompareOp, FieldValue};

/// Field-by-field record equality under the engine's comparison rules:
/// signed ints, tolerance floats (NaN never equal), bytewise strings.
pub(crate) fn records_equal(attrs: &[AttrEntry], a: &[u8], b: &[u8]) -> bool {
    attrs.iter().all(|entry| {
        let lo = entry.rec.offset as usize;
        let hi = lo + entry.rec.length as usize;
        let (fa, fb) = (&a[lo..hi], &b[lo..hi]);
        match entry.rec.ty {
            AttrType::Int | AttrType::Str => fa == fb,
            AttrType::Float => {
                let x = f32::from_le_bytes(fa.try_into().unwrap_or([0; 4]));
                let y = f32::from_le_bytes(fb.try_into().unwrap_or([0; 4]));
                float_cmp(x as f64, y as f64) == Some(std::cmp::Ordering::Equal)
            }
        }
    })
}

/// Does the relation already contain a tuple equal to `rec`?
pub(crate) fn tuple_exists(cache: &mut RelCache, rel_num: usize, rec: &[u8]) -> DbResult<bool> {
    let attrs = cache.attrs(rel_num)?.to_vec();
    let mut cursor = Rid::INVALID;
    while let Some((rid, existing)) = cache.get_next_rec(rel_num, cursor)? {
        if records_equal(&attrs, &existing, rec) {
            return Ok(true);
        }
        cursor = rid;
    }
    Ok(false)
}

/// Indexed attributes of an open relation, with their list positions.
fn indexed_attrs(cache: &RelCache, rel_num: usize) -> DbResult<Vec<(usize, AttrCatRec)>> {
    Ok(cache
        .attrs(rel_num)?
        .iter()
        .enumerate()
        .filter(|(_, a)| a.rec.has_index)
        .map(|(i, a)| (i, a.rec.clone()))
        .collect())
}

/// Add `rec`'s key to every index of the relation and persist the
/// per-attribute counters.
pub(crate) fn add_to_indexes(
    cache: &mut RelCache,
    rel_num: usize,
    rec: &[u8],
    rid: Rid,
) -> DbResult<()> {
    let rel_name = cache.rel(rel_num)?.rel_name.clone();
    let db_dir = cache.db_dir().to_path_buf();
    for (idx, attr) in indexed_attrs(cache, rel_num)? {
        let mut tree = btree::BpTree::open(&db_dir, &rel_name, &attr.attr_name)?;
        let lo = attr.offset as usize;
        tree.insert(&rec[lo..lo + attr.length as usize], rid)?;
        tree.flush()?;
        let mut updated = attr;
        updated.index_keys += 1;
        updated.index_pages = tree.num_pages();
        cache.update_attr(rel_num, idx, updated)?;
    }
    Ok(())
}

/// Remove `rec`'s key from every index of the relation.
fn remove_from_indexes(
    cache: &mut RelCache,
    rel_num: usize,
    rec: &[u8],
    rid: Rid,
) -> DbResult<()> {
    let rel_name = cache.rel(rel_num)?.rel_name.clone();
    let db_dir = cache.db_dir().to_path_buf();
    for (idx, attr) in indexed_attrs(cache, rel_num)? {
        let mut tree = btree::BpTree::open(&db_dir, &rel_name, &attr.attr_name)?;
        let lo = attr.offset as usize;
        let removed = tree.delete(&rec[lo..lo + attr.length as usize], rid)?;
        tree.flush()?;
        if removed {
            let mut updated = attr;
            updated.index_keys -= 1;
            updated.index_pages = tree.num_pages();
            cache.update_attr(rel_num, idx, updated)?;
        }
    }
    Ok(())
}

impl Engine {
    /// Insert one tuple given `(attribute, literal)` pairs. Unmentioned
    /// attributes are zero bytes; an exact duplicate of an existing
    /// tuple is rejected.
    pub fn insert(&mut self, rel_name: &str, values: &[(String, String)]) -> DbResult<()> {
        forbid_catalogs(rel_name)?;
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;
        let rec_length = cache.rel(rel_num)?.rec_length as usize;

        let mut rec = vec![0u8; rec_length];
        for (attr_name, literal) in values {
            let entry = cache
                .find_attr(rel_num, attr_name)?
                .ok_or_else(|| DbError::AttrNotFound {
                    rel: rel_name.to_string(),
                    attr: attr_name.clone(),
                })?;
            let (ty, offset, width) = (
                entry.rec.ty,
                entry.rec.offset as usize,
                entry.rec.length as usize,
            );
            let value =
                FieldValue::parse(ty, width, literal).ok_or_else(|| DbError::InvalidValue {
                    literal: literal.clone(),
                    ty,
                })?;
            rec[offset..offset + width].copy_from_slice(&value.to_bytes());
        }

        for (i, (name, _)) in values.iter().enumerate() {
            if values[i + 1..].iter().any(|(other, _)| other == name) {
                return Err(DbError::DupAttrInsert(name.clone()));
            }
        }

        if tuple_exists(cache, rel_num, &rec)? {
            return Err(DbError::DupRow);
        }

        let rid = cache.insert_rec(rel_num, &rec)?;
        add_to_indexes(cache, rel_num, &rec, rid)
    }

    /// Delete every tuple satisfying `attr <op> literal`; returns the
    /// number removed.
    pub fn delete(
        &mut self,
        rel_name: &str,
        attr_name: &str,
        op: CompareOp,
        literal: &str,
    ) -> DbResult<usize> {
        forbid_catalogs(rel_name)?;
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;

        let entry = cache
            .find_attr(rel_num, attr_name)?
            .ok_or_else(|| DbError::AttrNotFound {
                rel: rel_name.to_string(),
                attr: attr_name.to_string(),
            })?;
        let (ty, offset, width) = (
            entry.rec.ty,
            entry.rec.offset as usize,
            entry.rec.length as usize,
        );
        let value = FieldValue::parse(ty, width, literal).ok_or_else(|| DbError::InvalidValue {
            literal: literal.to_string(),
            ty,
        })?;
        let pred = Predicate {
            value,
            offset,
            size: width,
            op,
        };

        // The deleted RID doubles as the next scan start: the increment
        // steps past it, and the cleared bit keeps re-reads safe.
        let mut deleted = 0usize;
        let mut cursor = Rid::INVALID;
        while let Some((rid, rec)) = cache.find_rec(rel_num, cursor, &pred)? {
            remove_from_indexes(cache, rel_num, &rec, rid)?;
            cache.delete_rec(rel_num, rid)?;
            deleted += 1;
            cursor = rid;
        }
        Ok(deleted)
    }
}
