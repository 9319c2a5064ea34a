//! Packed catalog record codecs.
//!
//! Both catalogs store fixed layouts so the files stay readable across
//! hosts: names are NUL-padded fixed fields, integers are little-endian
//! `i32`, and the attribute type tag is its single ASCII byte.

use common::{pack_name, unpack_name, ATTR_NAME_LEN, REL_NAME_LEN};
use types::AttrType;

/// Packed size of a relcat row.
pub const RELCAT_REC_LEN: usize = 40;
/// Packed size of an attrcat row.
pub const ATTRCAT_REC_LEN: usize = 58;

/// One row of `relcat`: the geometry and population of a relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelCatRec {
    pub rel_name: String,
    pub rec_length: i32,
    pub recs_per_page: i32,
    pub num_attrs: i32,
    pub num_recs: i32,
    pub num_pages: i32,
}

impl RelCatRec {
    pub fn encode(&self) -> [u8; RELCAT_REC_LEN] {
        let mut buf = [0u8; RELCAT_REC_LEN];
        buf[..REL_NAME_LEN].copy_from_slice(&pack_name::<REL_NAME_LEN>(&self.rel_name));
        buf[20..24].copy_from_slice(&self.rec_length.to_le_bytes());
        buf[24..28].copy_from_slice(&self.recs_per_page.to_le_bytes());
        buf[28..32].copy_from_slice(&self.num_attrs.to_le_bytes());
        buf[32..36].copy_from_slice(&self.num_recs.to_le_bytes());
        buf[36..40].copy_from_slice(&self.num_pages.to_le_bytes());
        buf
    }

    pub fn decode(raw: &[u8]) -> Self {
        let int = |lo: usize| i32::from_le_bytes(raw[lo..lo + 4].try_into().unwrap());
        Self {
            rel_name: unpack_name(&raw[..REL_NAME_LEN]),
            rec_length: int(20),
            recs_per_page: int(24),
            num_attrs: int(28),
            num_recs: int(32),
            num_pages: int(36),
        }
    }
}

/// One row of `attrcat`: where an attribute lives inside its relation's
/// records, plus its index bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrCatRec {
    pub offset: i32,
    pub length: i32,
    pub ty: AttrType,
    pub attr_name: String,
    pub rel_name: String,
    pub has_index: bool,
    pub index_pages: i32,
    pub index_keys: i32,
}

impl AttrCatRec {
    pub fn encode(&self) -> [u8; ATTRCAT_REC_LEN] {
        let mut buf = [0u8; ATTRCAT_REC_LEN];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8] = self.ty.code();
        buf[9..29].copy_from_slice(&pack_name::<ATTR_NAME_LEN>(&self.attr_name));
        buf[29..49].copy_from_slice(&pack_name::<REL_NAME_LEN>(&self.rel_name));
        buf[49] = self.has_index as u8;
        buf[50..54].copy_from_slice(&self.index_pages.to_le_bytes());
        buf[54..58].copy_from_slice(&self.index_keys.to_le_bytes());
        buf
    }

    pub fn decode(raw: &[u8]) -> Self {
        let int = |lo: usize| i32::from_le_bytes(raw[lo..lo + 4].try_into().unwrap());
        Self {
            offset: int(0),
            length: int(4),
            ty: AttrType::from_code(raw[8]).unwrap_or(AttrType::Str),
            attr_name: unpack_name(&raw[9..29]),
            rel_name: unpack_name(&raw[29..49]),
            has_index: raw[49] != 0,
            index_pages: int(50),
            index_keys: int(54),
        }
    }
}
