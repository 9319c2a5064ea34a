//! Shared test fixtures: scratch databases, canned schemas, and
//! builders for externally page-formatted files.

use common::{Config, OWNER_USER};
use executor::Engine;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use types::fixed_str_bytes;

pub const DB_NAME: &str = "testdb";

/// An engine with a freshly created and opened database in a temp
/// directory. The directory lives as long as the fixture.
pub struct ScratchDb {
    pub engine: Engine,
    root: TempDir,
}

impl ScratchDb {
    pub fn new() -> Self {
        let root = TempDir::new().expect("scratch dir");
        let config = Config::builder()
            .data_root(root.path().to_path_buf())
            .build();
        let mut engine = Engine::new(config);
        engine.create_db(DB_NAME).expect("create scratch db");
        engine.open_db(DB_NAME).expect("open scratch db");
        ScratchDb { engine, root }
    }

    /// The database directory on disk.
    pub fn db_dir(&self) -> PathBuf {
        self.root.path().join(DB_NAME)
    }

    /// The data root the engine resolves database paths against.
    pub fn data_root(&self) -> &Path {
        self.root.path()
    }
}

impl Default for ScratchDb {
    fn default() -> Self {
        Self::new()
    }
}

/// `(name s20, id i)`: the 24-byte schema used by the sizing
/// scenarios.
pub fn name_id_schema() -> Vec<(String, String)> {
    vec![
        ("name".to_string(), "s20".to_string()),
        ("id".to_string(), "i".to_string()),
    ]
}

/// Encode one `(name s20, id i)` record the way the engine packs it.
pub fn name_id_record(name: &str, id: i32) -> Vec<u8> {
    let mut rec = fixed_str_bytes(name, 20);
    rec.extend(id.to_le_bytes());
    rec
}

/// Write records as a page-formatted file suitable for `load`.
pub fn write_page_file(path: &Path, rec_length: usize, recs: &[Vec<u8>]) {
    catalog::write_record_pages(path, OWNER_USER, rec_length, recs).expect("page file");
}
