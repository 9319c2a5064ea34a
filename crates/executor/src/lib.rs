//! The engine: database lifecycle, schema operations, and the
//! materialising relational operators, all layered on the open-relation
//! cache.
//!
//! Every operator materialises its result: `select`, `project`, and
//! `join` create a destination relation and populate it through the
//! tuple primitives, scanning sources in RID order.

mod dml;
mod query;
mod schema;

pub use query::RelationRows;

use buffer::RelCache;
use common::{Config, DbError, DbResult};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

struct OpenDb {
    name: String,
    dir: PathBuf,
    cache: RelCache,
}

/// A single-threaded engine driving one database at a time.
pub struct Engine {
    config: Config,
    open: Option<OpenDb>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config, open: None }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Name of the currently open database, if any.
    pub fn db_name(&self) -> Option<&str> {
        self.open.as_ref().map(|db| db.name.as_str())
    }

    fn cache_mut(&mut self) -> DbResult<&mut RelCache> {
        self.open
            .as_mut()
            .map(|db| &mut db.cache)
            .ok_or(DbError::DbNotOpen)
    }

    fn resolve_db_path(&self, path: &str) -> DbResult<PathBuf> {
        if !is_valid_db_path(path) {
            return Err(DbError::DbPathInvalid(path.to_string()));
        }
        Ok(self.config.data_root.join(path))
    }

    /// Resolve a user-supplied data-file path: absolute paths as given,
    /// relative paths inside the open database directory.
    fn resolve_data_path(&self, path: &str) -> DbResult<PathBuf> {
        let db = self.open.as_ref().ok_or(DbError::DbNotOpen)?;
        let p = Path::new(path);
        if p.is_absolute() {
            Ok(p.to_path_buf())
        } else {
            Ok(db.dir.join(p))
        }
    }

    /// Create a database directory and bootstrap its catalogs.
    pub fn create_db(&mut self, path: &str) -> DbResult<()> {
        let dir = self.resolve_db_path(path)?;
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DbError::DbExists(path.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DbError::DbPathInvalid(path.to_string()))
            }
            Err(e) => return Err(DbError::Io(e)),
        }
        catalog::bootstrap(&dir)?;
        info!("created database {path}");
        Ok(())
    }

    /// Open a database: load its catalogs into cache slots 0 and 1.
    pub fn open_db(&mut self, path: &str) -> DbResult<()> {
        if self.open.is_some() {
            return Err(DbError::DbNotClosed);
        }
        let dir = self.resolve_db_path(path)?;
        if !dir.is_dir() {
            return Err(DbError::DbNotFound(path.to_string()));
        }
        let cache = RelCache::open_cats(&dir, self.config.max_open)?;
        self.open = Some(OpenDb {
            name: path.to_string(),
            dir,
            cache,
        });
        info!("opened database {path}");
        Ok(())
    }

    /// Close the open database, flushing every cache slot and buffer.
    pub fn close_db(&mut self) -> DbResult<()> {
        let db = self.open.take().ok_or(DbError::DbNotOpen)?;
        db.cache.close_cats()?;
        info!("closed database {}", db.name);
        Ok(())
    }

    /// Remove a database directory. Closes it first when it is the one
    /// currently open.
    pub fn destroy_db(&mut self, path: &str) -> DbResult<()> {
        let dir = self.resolve_db_path(path)?;
        if self.open.as_ref().is_some_and(|db| db.dir == dir) {
            self.close_db()?;
        }
        if !dir.is_dir() {
            return Err(DbError::DbNotFound(path.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        info!("destroyed database {path}");
        Ok(())
    }
}

/// Database paths mirror the shell's rule: slash-separated components,
/// each starting with a letter and continuing alphanumeric.
fn is_valid_db_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let mut saw_component = false;
    for component in path.split('/') {
        if component.is_empty() {
            continue;
        }
        saw_component = true;
        let mut chars = component.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        if !chars.all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
    }
    saw_component
}

/// Guard against direct modification of the system catalogs.
fn forbid_catalogs(rel_name: &str) -> DbResult<()> {
    if rel_name == common::RELCAT_NAME || rel_name == common::ATTRCAT_NAME {
        return Err(DbError::CatalogImmutable(rel_name.to_string()));
    }
    Ok(())
}
