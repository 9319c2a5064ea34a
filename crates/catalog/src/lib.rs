//! The self-describing system catalogs.
//!
//! Two bootstrapped relations describe every relation in a database:
//! `relcat` holds one row per relation, `attrcat` one row per attribute.
//! Both use the ordinary page format, so the tuple primitives that serve
//! user relations serve the catalogs too. This crate owns the packed
//! on-disk record layouts and the initial images written at database
//! creation.

mod records;

pub use records::{AttrCatRec, RelCatRec, ATTRCAT_REC_LEN, RELCAT_REC_LEN};

use common::{
    pack_name, recs_per_page, DbError, DbResult, Rid, ATTRCAT_NAME, OWNER_ATTRCAT, OWNER_RELCAT,
    RELCAT_NAME, REL_NAME_LEN,
};
use std::fs;
use std::path::Path;
use storage::PageBuf;
use types::AttrType;

/// Number of attributes of `relcat`.
pub const RELCAT_NUM_ATTRS: i32 = 6;
/// Number of attributes of `attrcat`.
pub const ATTRCAT_NUM_ATTRS: i32 = 8;
/// Rows bootstrapped into `relcat` (one per catalog).
pub const NUM_CATS: i32 = 2;

/// Byte offset of `rel_name` inside a packed `RelCatRec`.
pub const RELCAT_NAME_OFFSET: i32 = 0;
/// Byte offset of `attr_name` inside a packed `AttrCatRec`.
pub const ATTRCAT_ATTRNAME_OFFSET: i32 = 9;
/// Byte offset of `rel_name` inside a packed `AttrCatRec`.
pub const ATTRCAT_RELNAME_OFFSET: i32 = 29;

/// The relcat row describing `relcat` itself.
pub fn relcat_self_rec() -> RelCatRec {
    RelCatRec {
        rel_name: RELCAT_NAME.to_string(),
        rec_length: RELCAT_REC_LEN as i32,
        recs_per_page: recs_per_page(RELCAT_REC_LEN),
        num_attrs: RELCAT_NUM_ATTRS,
        num_recs: NUM_CATS,
        num_pages: 1,
    }
}

/// The relcat row describing `attrcat`.
pub fn attrcat_self_rec() -> RelCatRec {
    let num_recs = RELCAT_NUM_ATTRS + ATTRCAT_NUM_ATTRS;
    let rpp = recs_per_page(ATTRCAT_REC_LEN);
    RelCatRec {
        rel_name: ATTRCAT_NAME.to_string(),
        rec_length: ATTRCAT_REC_LEN as i32,
        recs_per_page: rpp,
        num_attrs: ATTRCAT_NUM_ATTRS,
        num_recs,
        num_pages: (num_recs + rpp - 1) / rpp,
    }
}

fn attr(rel: &str, name: &str, ty: AttrType, offset: i32, length: i32) -> AttrCatRec {
    AttrCatRec {
        offset,
        length,
        ty,
        attr_name: name.to_string(),
        rel_name: rel.to_string(),
        has_index: false,
        index_pages: 0,
        index_keys: 0,
    }
}

/// The attribute rows of `relcat`, in canonical schema order.
pub fn relcat_schema() -> Vec<AttrCatRec> {
    vec![
        attr(RELCAT_NAME, "relName", AttrType::Str, 0, REL_NAME_LEN as i32),
        attr(RELCAT_NAME, "recLength", AttrType::Int, 20, 4),
        attr(RELCAT_NAME, "recsPerPg", AttrType::Int, 24, 4),
        attr(RELCAT_NAME, "numAttrs", AttrType::Int, 28, 4),
        attr(RELCAT_NAME, "numRecs", AttrType::Int, 32, 4),
        attr(RELCAT_NAME, "numPgs", AttrType::Int, 36, 4),
    ]
}

/// The attribute rows of `attrcat`, in canonical schema order.
pub fn attrcat_schema() -> Vec<AttrCatRec> {
    vec![
        attr(ATTRCAT_NAME, "offset", AttrType::Int, 0, 4),
        attr(ATTRCAT_NAME, "length", AttrType::Int, 4, 4),
        attr(ATTRCAT_NAME, "type", AttrType::Str, 8, 1),
        attr(ATTRCAT_NAME, "attrName", AttrType::Str, 9, 20),
        attr(ATTRCAT_NAME, "relName", AttrType::Str, 29, 20),
        attr(ATTRCAT_NAME, "hasIndex", AttrType::Int, 49, 1),
        attr(ATTRCAT_NAME, "nPages", AttrType::Int, 50, 4),
        attr(ATTRCAT_NAME, "nKeys", AttrType::Int, 54, 4),
    ]
}

/// RID of the `row`-th bootstrapped attrcat row. The bootstrap packs rows
/// densely, so positions are deterministic.
pub fn catalog_attr_rid(row: usize) -> Rid {
    let rpp = recs_per_page(ATTRCAT_REC_LEN) as usize;
    Rid::new((row / rpp) as i16, (row % rpp) as i16)
}

/// Pack fixed-width records densely into formatted pages and write them
/// as a relation file.
pub fn write_record_pages(
    path: &Path,
    owner: u8,
    rec_length: usize,
    recs: &[Vec<u8>],
) -> DbResult<()> {
    let rpp = recs_per_page(rec_length) as usize;
    let mut image = Vec::new();
    for chunk in recs.chunks(rpp) {
        let mut page = PageBuf::formatted(owner);
        for (slot, rec) in chunk.iter().enumerate() {
            page.write_record(slot as i16, rec_length, rec);
            page.set_slot(slot as i16, true);
        }
        image.extend_from_slice(page.as_bytes());
    }
    fs::write(path, image).map_err(|_| DbError::CatCreate)
}

/// Write the initial, self-describing catalog images into a fresh
/// database directory.
pub fn bootstrap(db_dir: &Path) -> DbResult<()> {
    let relcat_rows: Vec<Vec<u8>> = [relcat_self_rec(), attrcat_self_rec()]
        .iter()
        .map(|r| r.encode().to_vec())
        .collect();
    write_record_pages(
        &db_dir.join(RELCAT_NAME),
        OWNER_RELCAT,
        RELCAT_REC_LEN,
        &relcat_rows,
    )?;

    let mut attr_rows = relcat_schema();
    attr_rows.extend(attrcat_schema());
    let encoded: Vec<Vec<u8>> = attr_rows.iter().map(|a| a.encode().to_vec()).collect();
    write_record_pages(
        &db_dir.join(ATTRCAT_NAME),
        OWNER_ATTRCAT,
        ATTRCAT_REC_LEN,
        &encoded,
    )
}

/// The packed bytes a name-equality predicate compares against.
pub fn packed_rel_name(name: &str) -> Vec<u8> {
    pack_name::<REL_NAME_LEN>(name).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PAGE_SIZE;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn catalog_geometry_matches_the_record_layouts() {
        let rc = relcat_self_rec();
        assert_eq!(rc.rec_length, 40);
        assert_eq!(rc.recs_per_page, 12);
        assert_eq!(rc.num_recs, 2);
        assert_eq!(rc.num_pages, 1);

        let ac = attrcat_self_rec();
        assert_eq!(ac.rec_length, 58);
        assert_eq!(ac.recs_per_page, 8);
        assert_eq!(ac.num_recs, 14);
        assert_eq!(ac.num_pages, 2);
    }

    #[test]
    fn schemas_are_packed_and_ordered() {
        let schema = relcat_schema();
        let mut offset = 0;
        for a in &schema {
            assert_eq!(a.offset, offset);
            offset += a.length;
        }
        assert_eq!(offset as usize, RELCAT_REC_LEN);

        let schema = attrcat_schema();
        let mut offset = 0;
        for a in &schema {
            assert_eq!(a.offset, offset);
            offset += a.length;
        }
        assert_eq!(offset as usize, ATTRCAT_REC_LEN);
    }

    #[test]
    fn bootstrap_writes_bit_exact_images() {
        let dir = tempdir().unwrap();
        bootstrap(dir.path()).unwrap();

        let relcat = std::fs::read(dir.path().join("relcat")).unwrap();
        assert_eq!(relcat.len(), PAGE_SIZE);
        assert_eq!(relcat[0], OWNER_RELCAT);

        let mut page = PageBuf::zeroed();
        page.as_mut_bytes().copy_from_slice(&relcat);
        assert!(page.has_magic());
        assert_eq!(page.slotmap(), 0b11);
        assert_eq!(
            RelCatRec::decode(page.record(0, RELCAT_REC_LEN)),
            relcat_self_rec()
        );
        assert_eq!(
            RelCatRec::decode(page.record(1, RELCAT_REC_LEN)),
            attrcat_self_rec()
        );

        let attrcat = std::fs::read(dir.path().join("attrcat")).unwrap();
        assert_eq!(attrcat.len(), 2 * PAGE_SIZE);
        assert_eq!(attrcat[0], OWNER_ATTRCAT);
        assert_eq!(attrcat[PAGE_SIZE], OWNER_ATTRCAT);

        let mut page0 = PageBuf::zeroed();
        page0.as_mut_bytes().copy_from_slice(&attrcat[..PAGE_SIZE]);
        let mut page1 = PageBuf::zeroed();
        page1.as_mut_bytes().copy_from_slice(&attrcat[PAGE_SIZE..]);
        assert_eq!(page0.slotmap(), 0xFF);
        assert_eq!(page1.slotmap(), 0b0011_1111);

        // Row 8 (first on page 1) is attrcat's "type" attribute.
        let row8 = AttrCatRec::decode(page1.record(0, ATTRCAT_REC_LEN));
        assert_eq!(row8.attr_name, "type");
        assert_eq!(row8.rel_name, ATTRCAT_NAME);
    }

    #[test]
    fn every_catalog_attribute_is_described() {
        let mut rows = relcat_schema();
        rows.extend(attrcat_schema());
        assert_eq!(
            rows.iter().filter(|a| a.rel_name == RELCAT_NAME).count() as i32,
            RELCAT_NUM_ATTRS
        );
        assert_eq!(
            rows.iter().filter(|a| a.rel_name == ATTRCAT_NAME).count() as i32,
            ATTRCAT_NUM_ATTRS
        );
    }

    #[test]
    fn bootstrap_rids_are_dense() {
        assert_eq!(catalog_attr_rid(0), Rid::new(0, 0));
        assert_eq!(catalog_attr_rid(7), Rid::new(0, 7));
        assert_eq!(catalog_attr_rid(8), Rid::new(1, 0));
        assert_eq!(catalog_attr_rid(13), Rid::new(1, 5));
    }
}
