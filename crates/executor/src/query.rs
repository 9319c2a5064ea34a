//! Materialising operators: select, project, and join, plus row
//! decoding for the shell's `print`.

use crate::dml::tuple_exists;
use crate::Engine;
use buffer::{rel_name_predicate, Predicate};
use catalog::{AttrCatRec, RelCatRec, ATTRCAT_RELNAME_OFFSET, RELCAT_NAME_OFFSET};
use common::{DbError, DbResult, Rid, ATTRCAT_SLOT, ATTR_NAME_LEN, RELCAT_SLOT};
use log::info;
use types::{decode_field, CompareOp, FieldValue, Value};

/// Decoded rows of one relation, ready for rendering.
#[derive(Clone, Debug)]
pub struct RelationRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Copy the listed fields of `src_rec` into a freshly packed record laid
/// out in list order.
fn pack_projection(list: &[AttrCatRec], src_rec: &[u8]) -> Vec<u8> {
    let rec_length: usize = list.iter().map(|a| a.length as usize).sum();
    let mut rec = vec![0u8; rec_length];
    let mut at = 0usize;
    for attr in list {
        let lo = attr.offset as usize;
        let width = attr.length as usize;
        rec[at..at + width].copy_from_slice(&src_rec[lo..lo + width]);
        at += width;
    }
    rec
}

/// Result schema of a join: every attribute of the first source, then
/// the second source's attributes minus the join attribute, renaming
/// collisions to `<name>_<src2>` within the name-length limit.
pub(crate) fn join_schema(
    src1_attrs: &[AttrCatRec],
    src2_attrs: &[AttrCatRec],
    attr2: &str,
    src2_name: &str,
) -> Vec<AttrCatRec> {
    let mut result: Vec<AttrCatRec> = src1_attrs.to_vec();
    for attr in src2_attrs {
        if attr.attr_name == attr2 {
            continue;
        }
        let mut out = attr.clone();
        if result.iter().any(|r| r.attr_name == out.attr_name) {
            let mut renamed = format!("{}_{}", out.attr_name, src2_name);
            renamed.truncate(ATTR_NAME_LEN - 1);
            out.attr_name = renamed;
        }
        result.push(out);
    }
    result
}

impl Engine {
    /// Materialise every source tuple satisfying `attr <op> literal`
    /// into a new relation with an identical schema.
    pub fn select(
        &mut self,
        dst: &str,
        src: &str,
        attr_name: &str,
        op: CompareOp,
        literal: &str,
    ) -> DbResult<()> {
        {
            let cache = self.cache_mut()?;
            let pred = rel_name_predicate(dst, RELCAT_NAME_OFFSET as usize);
            if cache.find_rec(RELCAT_SLOT, Rid::INVALID, &pred)?.is_some() {
                return Err(DbError::RelExists(dst.to_string()));
            }
        }

        let cache = self.cache_mut()?;
        let src_num = cache.open_rel(src)?;
        let entry = cache
            .find_attr(src_num, attr_name)?
            .ok_or_else(|| DbError::AttrNotFound {
                rel: src.to_string(),
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
        let schema: Vec<AttrCatRec> = cache
            .attrs(src_num)?
            .iter()
            .map(|a| a.rec.clone())
            .collect();

        self.create_from_attr_list(dst, &schema)?;

        let cache = self.cache_mut()?;
        let src_num = cache.open_rel(src)?;
        let dst_num = cache.open_rel(dst)?;
        let pred = Predicate {
            value,
            offset,
            size: width,
            op,
        };
        let mut cursor = Rid::INVALID;
        let mut copied = 0usize;
        while let Some((rid, rec)) = cache.find_rec(src_num, cursor, &pred)? {
            cache.insert_rec(dst_num, &rec)?;
            copied += 1;
            cursor = rid;
        }
        info!("select materialised {copied} tuples into {dst}");
        Ok(())
    }

    /// Materialise the listed attributes of every source tuple into a
    /// new relation packed in the requested order. Exact duplicates
    /// collapse, matching the insert path's duplicate rule.
    pub fn project(&mut self, dst: &str, src: &str, attr_names: &[String]) -> DbResult<()> {
        if attr_names.is_empty() {
            return Err(DbError::MissingArgs("project".to_string()));
        }
        let cache = self.cache_mut()?;
        let src_num = cache.open_rel(src)?;

        let mut list: Vec<AttrCatRec> = Vec::with_capacity(attr_names.len());
        for name in attr_names {
            let entry =
                cache
                    .find_attr(src_num, name)?
                    .ok_or_else(|| DbError::AttrNotFound {
                        rel: src.to_string(),
                        attr: name.clone(),
                    })?;
            list.push(entry.rec.clone());
        }
        let pred = rel_name_predicate(dst, RELCAT_NAME_OFFSET as usize);
        if cache.find_rec(RELCAT_SLOT, Rid::INVALID, &pred)?.is_some() {
            return Err(DbError::RelExists(dst.to_string()));
        }

        self.create_from_attr_list(dst, &list)?;

        let cache = self.cache_mut()?;
        let src_num = cache.open_rel(src)?;
        let dst_num = cache.open_rel(dst)?;
        let mut cursor = Rid::INVALID;
        while let Some((rid, src_rec)) = cache.get_next_rec(src_num, cursor)? {
            let rec = pack_projection(&list, &src_rec);
            if !tuple_exists(cache, dst_num, &rec)? {
                cache.insert_rec(dst_num, &rec)?;
            }
            cursor = rid;
        }
        info!("projected {src} into {dst}");
        Ok(())
    }

    /// Equi-join two relations into a new one by nested-loop scan. The
    /// join attribute of the second source is dropped from the result.
    pub fn join(
        &mut self,
        dst: &str,
        src1: &str,
        attr1: &str,
        src2: &str,
        attr2: &str,
    ) -> DbResult<()> {
        let cache = self.cache_mut()?;
        let s1 = cache.open_rel(src1)?;
        let s2 = cache.open_rel(src2)?;

        let pred = rel_name_predicate(dst, RELCAT_NAME_OFFSET as usize);
        if cache.find_rec(RELCAT_SLOT, Rid::INVALID, &pred)?.is_some() {
            return Err(DbError::RelExists(dst.to_string()));
        }

        let a1 = cache
            .find_attr(s1, attr1)?
            .ok_or_else(|| DbError::AttrNotFound {
                rel: src1.to_string(),
                attr: attr1.to_string(),
            })?
            .rec
            .clone();
        let a2 = cache
            .find_attr(s2, attr2)?
            .ok_or_else(|| DbError::AttrNotFound {
                rel: src2.to_string(),
                attr: attr2.to_string(),
            })?
            .rec
            .clone();
        if a1.ty != a2.ty {
            return Err(DbError::IncompatibleTypes);
        }

        let attrs1: Vec<AttrCatRec> = cache.attrs(s1)?.iter().map(|a| a.rec.clone()).collect();
        let attrs2: Vec<AttrCatRec> = cache.attrs(s2)?.iter().map(|a| a.rec.clone()).collect();
        let schema = join_schema(&attrs1, &attrs2, attr2, src2);

        self.create_from_attr_list(dst, &schema)?;

        // Nested loop: one emitted record per matching pair. Only whole
        // records cross the per-relation page buffers.
        let cache = self.cache_mut()?;
        let s1 = cache.open_rel(src1)?;
        let s2 = cache.open_rel(src2)?;
        let dst_num = cache.open_rel(dst)?;

        let src2_kept: Vec<AttrCatRec> = attrs2
            .iter()
            .filter(|a| a.attr_name != attr2)
            .cloned()
            .collect();
        let mut emitted = 0usize;
        let mut outer = Rid::INVALID;
        while let Some((orid, rec1)) = cache.get_next_rec(s1, outer)? {
            let join_field = &rec1[a1.offset as usize..(a1.offset + a1.length) as usize];
            let join_value = match a1.ty {
                types::AttrType::Int => {
                    FieldValue::Int(i32::from_le_bytes(join_field.try_into().unwrap_or([0; 4])))
                }
                types::AttrType::Float => {
                    FieldValue::Float(f32::from_le_bytes(join_field.try_into().unwrap_or([0; 4])))
                }
                types::AttrType::Str => FieldValue::Bytes(join_field.to_vec()),
            };
            let pred = Predicate {
                value: join_value,
                offset: a2.offset as usize,
                size: a2.length as usize,
                op: CompareOp::Eq,
            };
            let mut inner = Rid::INVALID;
            while let Some((irid, rec2)) = cache.find_rec(s2, inner, &pred)? {
                let mut rec = pack_projection(&attrs1, &rec1);
                rec.extend(pack_projection(&src2_kept, &rec2));
                cache.insert_rec(dst_num, &rec)?;
                emitted += 1;
                inner = irid;
            }
            outer = orid;
        }
        info!("joined {src1} and {src2} into {dst}: {emitted} tuples");
        Ok(())
    }

    /// Decode every live tuple of a relation in RID order.
    pub fn scan_rows(&mut self, rel_name: &str) -> DbResult<RelationRows> {
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;
        let attrs: Vec<AttrCatRec> = cache.attrs(rel_num)?.iter().map(|a| a.rec.clone()).collect();
        let columns = attrs.iter().map(|a| a.attr_name.clone()).collect();

        let mut rows = Vec::new();
        let mut cursor = Rid::INVALID;
        while let Some((rid, rec)) = cache.get_next_rec(rel_num, cursor)? {
            let row = attrs
                .iter()
                .map(|a| {
                    let lo = a.offset as usize;
                    decode_field(a.ty, &rec[lo..lo + a.length as usize])
                })
                .collect();
            rows.push(row);
            cursor = rid;
        }
        Ok(RelationRows { columns, rows })
    }

    /// The cached relcat row of a relation, opening it if needed. The
    /// cache is authoritative: stats updated by a pending `load` appear
    /// here before they reach the catalog file.
    pub fn relation_info(&mut self, rel_name: &str) -> DbResult<RelCatRec> {
        let cache = self.cache_mut()?;
        let rel_num = cache.open_rel(rel_name)?;
        Ok(cache.rel(rel_num)?.clone())
    }

    /// Names of every relation in the database, in relcat scan order.
    /// Feed for the shell's close-name suggestions.
    pub fn relation_names(&mut self) -> DbResult<Vec<String>> {
        let cache = self.cache_mut()?;
        let mut names = Vec::new();
        let mut cursor = Rid::INVALID;
        while let Some((rid, raw)) = cache.get_next_rec(RELCAT_SLOT, cursor)? {
            names.push(RelCatRec::decode(&raw).rel_name);
            cursor = rid;
        }
        Ok(names)
    }

    /// Attribute names of one relation, in schema order.
    pub fn attribute_names(&mut self, rel_name: &str) -> DbResult<Vec<String>> {
        let cache = self.cache_mut()?;
        let pred = rel_name_predicate(rel_name, ATTRCAT_RELNAME_OFFSET as usize);
        let mut names = Vec::new();
        let mut cursor = Rid::INVALID;
        while let Some((rid, raw)) = cache.find_rec(ATTRCAT_SLOT, cursor, &pred)? {
            names.push(AttrCatRec::decode(&raw).attr_name);
            cursor = rid;
        }
        Ok(names)
    }

    /// Render the B+ tree of an indexed attribute.
    pub fn dump_index(&mut self, rel_name: &str, attr_name: &str) -> DbResult<String> {
        let cache = self.cache_mut()?;
        let db_dir = cache.db_dir().to_path_buf();
        let mut tree = btree::BpTree::open(&db_dir, rel_name, attr_name)?;
        tree.dump()
    }
}
