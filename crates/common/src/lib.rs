//! Shared identifiers, constants, and the central error type.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use types::AttrType;

/// Number of bytes in a page.
pub const PAGE_SIZE: usize = 512;
/// Owner byte plus the NUL-padded magic string.
pub const MAGIC_SIZE: usize = 8;
/// Width of the slot-map in bytes (a little-endian `u64`).
pub const SLOTMAP_SIZE: usize = 8;
/// Page header: magic block followed by the slot-map.
pub const HEADER_SIZE: usize = MAGIC_SIZE + SLOTMAP_SIZE;
/// Largest record that fits in a page.
pub const MAX_RECORD: usize = PAGE_SIZE - HEADER_SIZE;
/// Magic string present at byte 1 of every page, NUL-padded to
/// `MAGIC_SIZE - 1` bytes.
pub const GEN_MAGIC: &[u8] = b"RELPAG";

/// Owner byte of relation-catalog pages.
pub const OWNER_RELCAT: u8 = b'$';
/// Owner byte of attribute-catalog pages.
pub const OWNER_ATTRCAT: u8 = b'!';
/// Owner byte of user-relation pages.
pub const OWNER_USER: u8 = b'_';

/// Maximum length of a relation name.
pub const REL_NAME_LEN: usize = 20;
/// Maximum length of an attribute name.
pub const ATTR_NAME_LEN: usize = 20;
/// Open-relation cache capacity.
pub const MAX_OPEN: usize = 20;
/// Cache slot permanently holding the relation catalog.
pub const RELCAT_SLOT: usize = 0;
/// Cache slot permanently holding the attribute catalog.
pub const ATTRCAT_SLOT: usize = 1;

/// Page limit per relation; also the freemap capacity in bits.
pub const MAX_REL_PAGES: usize = 32768;
/// Size of a freemap side-file.
pub const FREEMAP_BYTES: usize = MAX_REL_PAGES / 8;

/// Name of the relation catalog.
pub const RELCAT_NAME: &str = "relcat";
/// Name of the attribute catalog.
pub const ATTRCAT_NAME: &str = "attrcat";

/// Records per page for a given record length: bounded by the page body
/// and by the number of slot-map bits.
pub fn recs_per_page(rec_length: usize) -> i32 {
    (MAX_RECORD / rec_length).min(8 * SLOTMAP_SIZE) as i32
}

/// Copy a name into a fixed-width, NUL-padded on-disk field.
pub fn pack_name<const N: usize>(name: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = name.as_bytes();
    let n = bytes.len().min(N);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Read a NUL-padded on-disk name field back into a string.
pub fn unpack_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Identifies one record as a page index plus a slot within the page.
///
/// The sentinel `Rid::INVALID` (`(-1, -1)`) means "no record" and doubles
/// as the start cursor for sequential scans. RIDs order lexicographically
/// by `(pid, slotnum)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub pid: i16,
    pub slotnum: i16,
}

impl Rid {
    pub const INVALID: Rid = Rid { pid: -1, slotnum: -1 };

    pub fn new(pid: i16, slotnum: i16) -> Self {
        Rid { pid, slotnum }
    }

    pub fn is_valid(self) -> bool {
        self.pid >= 0 && self.slotnum >= 0
    }

    /// The next slot position in scan order. Incrementing the invalid
    /// sentinel yields `(0, 0)`.
    pub fn next(self, recs_per_page: i32) -> Rid {
        if !self.is_valid() {
            return Rid::new(0, 0);
        }
        let slot = (self.slotnum as i32 + 1) % recs_per_page;
        if slot == 0 {
            Rid::new(self.pid + 1, 0)
        } else {
            Rid::new(self.pid, slot as i16)
        }
    }
}

/// Central error type for every subsystem. Each variant carries the
/// argument the message formatter needs; `code()` is the stable numeric
/// code reported as the process exit status.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("relation '{0}' does not exist")]
    RelNotFound(String),
    #[error("relation '{0}' already exists")]
    RelExists(String),
    #[error("relation name '{0}' is too long (max {REL_NAME_LEN} chars)")]
    RelNameTooLong(String),

    #[error("attribute '{attr}' does not exist in relation '{rel}'")]
    AttrNotFound { rel: String, attr: String },
    #[error("attribute name '{0}' is too long (max {ATTR_NAME_LEN} chars)")]
    AttrNameTooLong(String),
    #[error("duplicate attribute '{0}' in schema")]
    DupAttr(String),
    #[error("attribute '{0}' assigned more than once")]
    DupAttrInsert(String),

    #[error("could not create catalog files")]
    CatCreate,
    #[error("could not open catalogs; is this a database directory?")]
    CatOpen,

    #[error("record of {len} bytes does not fit in a page (max {MAX_RECORD})")]
    RecTooLong { len: usize },
    #[error("duplicate tuple rejected")]
    DupRow,
    #[error("'{literal}' is not a valid {ty:?} literal")]
    InvalidValue { literal: String, ty: AttrType },
    #[error("join attributes have incompatible types")]
    IncompatibleTypes,
    #[error("cannot load into non-empty relation '{0}'")]
    LoadNonEmpty(String),
    #[error("file size {0} is not a positive multiple of the page size")]
    InvalidFileSize(u64),
    #[error("bad page magic in page {pid} of '{rel}'")]
    PageMagic { rel: String, pid: i16 },
    #[error("page reference {pid}:{slotnum} is out of bounds")]
    PageOutOfBounds { pid: i16, slotnum: i16 },
    #[error("cache slot {0} does not hold an open relation")]
    InvalidRelNum(usize),
    #[error("relation '{0}' reached the {MAX_REL_PAGES}-page limit")]
    RelPageLimit(String),
    #[error("attribute format '{0}' is not one of i, f, sN")]
    InvalidFormat(String),
    #[error("string width in '{0}' must be between 1 and {max}", max = types::MAX_STR_LEN)]
    StrLenInvalid(String),
    #[error("file '{0}' does not exist")]
    FileNotFound(PathBuf),

    #[error("database '{0}' does not exist")]
    DbNotFound(String),
    #[error("database '{0}' already exists")]
    DbExists(String),
    #[error("close the current database first")]
    DbNotClosed,
    #[error("no database is open")]
    DbNotOpen,
    #[error("'{0}' is not a valid database path")]
    DbPathInvalid(String),

    #[error("missing arguments for '{0}'")]
    MissingArgs(String),
    #[error("catalog relation '{0}' cannot be modified directly")]
    CatalogImmutable(String),
    #[error("too many arguments for '{0}'")]
    ExtraArgs(String),
    #[error("unknown comparison operator '{0}'")]
    UnknownOperator(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("no index on attribute '{attr}' of relation '{rel}'")]
    IndexNotFound { rel: String, attr: String },
    #[error("index already exists on attribute '{attr}' of relation '{rel}'")]
    IndexExists { rel: String, attr: String },
    #[error("cannot build an index on non-empty relation '{0}'")]
    IndexNonEmpty(String),

    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("relation file for cache slot {0} is not open")]
    RelNotOpen(usize),
    #[error("open-relation cache is full")]
    CacheFull,
}

impl DbError {
    /// Stable numeric code, also used as the process exit status.
    pub fn code(&self) -> i32 {
        match self {
            DbError::RelNotFound(_) => 101,
            DbError::RelExists(_) => 102,
            DbError::RelNameTooLong(_) => 103,
            DbError::AttrNotFound { .. } => 201,
            DbError::AttrNameTooLong(_) => 203,
            DbError::DupAttr(_) => 204,
            DbError::DupAttrInsert(_) => 205,
            DbError::CatCreate => 301,
            DbError::CatOpen => 302,
            DbError::RecTooLong { .. } => 401,
            DbError::DupRow => 402,
            DbError::InvalidValue { .. } => 403,
            DbError::IncompatibleTypes => 404,
            DbError::LoadNonEmpty(_) => 405,
            DbError::InvalidFileSize(_) => 406,
            DbError::PageMagic { .. } => 407,
            DbError::PageOutOfBounds { .. } => 408,
            DbError::InvalidRelNum(_) => 409,
            DbError::RelPageLimit(_) => 410,
            DbError::InvalidFormat(_) => 411,
            DbError::StrLenInvalid(_) => 412,
            DbError::FileNotFound(_) => 413,
            DbError::DbNotFound(_) => 501,
            DbError::DbExists(_) => 502,
            DbError::DbNotClosed => 504,
            DbError::DbNotOpen => 505,
            DbError::DbPathInvalid(_) => 506,
            DbError::MissingArgs(_) => 601,
            DbError::CatalogImmutable(_) => 602,
            DbError::ExtraArgs(_) => 603,
            DbError::UnknownOperator(_) => 604,
            DbError::UnknownCommand(_) => 605,
            DbError::IndexNotFound { .. } => 701,
            DbError::IndexExists { .. } => 702,
            DbError::IndexNonEmpty(_) => 703,
            DbError::Io(_) => 801,
            DbError::RelNotOpen(_) => 802,
            DbError::CacheFull => 803,
        }
    }
}

/// Result alias carrying a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the engine.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_root(PathBuf::from("/tmp"))
///     .max_open(8)
///     .build();
/// assert_eq!(config.max_open, 8);
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct Config {
    /// Directory against which database paths are resolved.
    #[builder(default = PathBuf::from("."))]
    pub data_root: PathBuf,
    /// Number of open-relation cache slots.
    #[builder(default = MAX_OPEN)]
    pub max_open: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            max_open: MAX_OPEN,
        }
    }
}
