//! B+ tree index files.
//!
//! Each indexed attribute owns a side-file `<rel>.<attr>.bpidx`. Page 0
//! is a meta page naming the root and the key shape; every other page is
//! a node page (see [`node`]). Leaves hold sorted `(key, rid)` entries
//! and chain left-to-right through `next_leaf`; internal nodes route by
//! separator keys, where a search value greater than or equal to a
//! separator moves to its right child.
//!
//! Reads and writes go through a one-page write-back buffer, mirroring
//! the single-slot discipline of the data-page buffer. Pages orphaned by
//! merges are never reclaimed.

mod node;

pub use node::{
    compare_keys, internal_capacity, leaf_capacity, Node, StoredNode, NODE_HDR_SIZE, NO_LEAF,
    NO_PARENT,
};

use common::{DbError, DbResult, Rid, PAGE_SIZE};
use log::debug;
use node::{decode_node, encode_node};
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use types::{decode_field, AttrType, CompareOp, FieldValue};

const META_MAGIC: &[u8] = b"BPTREE";

/// Path of the index file for `(rel, attr)`.
pub fn index_path(dir: &Path, rel_name: &str, attr_name: &str) -> PathBuf {
    dir.join(format!("{rel_name}.{attr_name}.bpidx"))
}

/// Does an index file exist for `(rel, attr)`?
pub fn index_exists(dir: &Path, rel_name: &str, attr_name: &str) -> bool {
    index_path(dir, rel_name, attr_name).exists()
}

/// Remove the index file for `(rel, attr)`. Missing files are fine.
pub fn destroy_index(dir: &Path, rel_name: &str, attr_name: &str) -> DbResult<()> {
    match std::fs::remove_file(index_path(dir, rel_name, attr_name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DbError::Io(e)),
    }
}

struct IdxBuf {
    pid: i16,
    bytes: [u8; PAGE_SIZE],
    dirty: bool,
}

/// An open B+ tree index file.
pub struct BpTree {
    file: File,
    key_ty: AttrType,
    key_len: usize,
    root_pid: i16,
    num_pages: i16,
    buf: IdxBuf,
}

impl BpTree {
    /// Create a fresh index: a meta page plus an empty leaf root at
    /// page 1. Fails if the file already exists.
    pub fn create(
        dir: &Path,
        rel_name: &str,
        attr_name: &str,
        key_ty: AttrType,
        key_len: usize,
    ) -> DbResult<Self> {
        let path = index_path(dir, rel_name, attr_name);
        if path.exists() {
            return Err(DbError::IndexExists {
                rel: rel_name.to_string(),
                attr: attr_name.to_string(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let mut tree = BpTree {
            file,
            key_ty,
            key_len,
            root_pid: 1,
            num_pages: 2,
            buf: IdxBuf {
                pid: -1,
                bytes: [0; PAGE_SIZE],
                dirty: false,
            },
        };
        tree.write_meta()?;
        tree.write_node(
            1,
            &StoredNode {
                parent: NO_PARENT,
                node: Node::empty_leaf(),
            },
        )?;
        Ok(tree)
    }

    /// Open an existing index, validating the meta page.
    pub fn open(dir: &Path, rel_name: &str, attr_name: &str) -> DbResult<Self> {
        let path = index_path(dir, rel_name, attr_name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DbError::IndexNotFound {
                        rel: rel_name.to_string(),
                        attr: attr_name.to_string(),
                    }
                } else {
                    DbError::Io(e)
                }
            })?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as i16;
        let mut meta = [0u8; PAGE_SIZE];
        file.read_exact(&mut meta)?;
        if &meta[..META_MAGIC.len()] != META_MAGIC {
            return Err(DbError::PageMagic {
                rel: rel_name.to_string(),
                pid: 0,
            });
        }
        let root_pid = i16::from_le_bytes(meta[8..10].try_into().unwrap());
        let key_len = i16::from_le_bytes(meta[10..12].try_into().unwrap()) as usize;
        let key_ty = AttrType::from_code(meta[12]).ok_or(DbError::PageMagic {
            rel: rel_name.to_string(),
            pid: 0,
        })?;
        Ok(BpTree {
            file,
            key_ty,
            key_len,
            root_pid,
            num_pages,
            buf: IdxBuf {
                pid: -1,
                bytes: [0; PAGE_SIZE],
                dirty: false,
            },
        })
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn key_type(&self) -> AttrType {
        self.key_ty
    }

    /// Pages in the file, including the meta page.
    pub fn num_pages(&self) -> i32 {
        self.num_pages as i32
    }

    /// Write back any buffered dirty page.
    pub fn flush(&mut self) -> DbResult<()> {
        if self.buf.dirty {
            let pid = self.buf.pid;
            self.file
                .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
            self.file.write_all(&self.buf.bytes)?;
            self.buf.dirty = false;
        }
        Ok(())
    }

    fn write_meta(&mut self) -> DbResult<()> {
        let mut meta = [0u8; PAGE_SIZE];
        meta[..META_MAGIC.len()].copy_from_slice(META_MAGIC);
        meta[8..10].copy_from_slice(&self.root_pid.to_le_bytes());
        meta[10..12].copy_from_slice(&(self.key_len as i16).to_le_bytes());
        meta[12] = self.key_ty.code();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&meta)?;
        Ok(())
    }

    /// Load page `pid` into the buffer, flushing any dirty occupant.
    fn load(&mut self, pid: i16) -> DbResult<()> {
        if self.buf.pid == pid {
            return Ok(());
        }
        self.flush()?;
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut self.buf.bytes)?;
        self.buf.pid = pid;
        self.buf.dirty = false;
        Ok(())
    }

    fn read_node(&mut self, pid: i16) -> DbResult<StoredNode> {
        self.load(pid)?;
        decode_node(&self.buf.bytes, self.key_len)
    }

    fn write_node(&mut self, pid: i16, stored: &StoredNode) -> DbResult<()> {
        let bytes = encode_node(stored, self.key_len);
        if self.buf.pid == pid {
            self.buf.bytes = bytes;
            self.buf.dirty = true;
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    fn allocate_page(&mut self) -> DbResult<i16> {
        let pid = self.num_pages;
        self.num_pages += 1;
        self.file
            .seek(SeekFrom::Start(pid as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;
        Ok(pid)
    }

    fn set_parent(&mut self, pid: i16, parent: i16) -> DbResult<()> {
        let mut stored = self.read_node(pid)?;
        stored.parent = parent;
        self.write_node(pid, &stored)
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_keys(self.key_ty, a, b)
    }

    // ---- insert ----

    /// Insert `(key, rid)`, splitting on the way back up as needed.
    pub fn insert(&mut self, key: &[u8], rid: Rid) -> DbResult<()> {
        debug_assert_eq!(key.len(), self.key_len);
        if let Some((sep, right_pid)) = self.insert_at(self.root_pid, key, rid)? {
            let old_root = self.root_pid;
            let new_root = self.allocate_page()?;
            self.set_parent(old_root, new_root)?;
            self.set_parent(right_pid, new_root)?;
            self.write_node(
                new_root,
                &StoredNode {
                    parent: NO_PARENT,
                    node: Node::Internal {
                        keys: vec![sep],
                        children: vec![old_root, right_pid],
                    },
                },
            )?;
            self.root_pid = new_root;
            self.write_meta()?;
            debug!("root split; new root {new_root}");
        }
        Ok(())
    }

    /// Recursive insert. A `Some((separator, right_pid))` return means
    /// the node at `pid` split and the caller must absorb the separator.
    fn insert_at(
        &mut self,
        pid: i16,
        key: &[u8],
        rid: Rid,
    ) -> DbResult<Option<(Vec<u8>, i16)>> {
        let stored = self.read_node(pid)?;
        match stored.node {
            Node::Leaf {
                mut entries,
                next_leaf,
            } => {
                let pos = entries.partition_point(|(k, _)| self.cmp(k, key) != Ordering::Greater);
                entries.insert(pos, (key.to_vec(), rid));
                if entries.len() <= leaf_capacity(self.key_len) {
                    self.write_node(
                        pid,
                        &StoredNode {
                            parent: stored.parent,
                            node: Node::Leaf { entries, next_leaf },
                        },
                    )?;
                    return Ok(None);
                }
                // Midpoint split; the separator is the right sibling's
                // first key.
                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let sep = right_entries[0].0.clone();
                let right_pid = self.allocate_page()?;
                self.write_node(
                    right_pid,
                    &StoredNode {
                        parent: stored.parent,
                        node: Node::Leaf {
                            entries: right_entries,
                            next_leaf,
                        },
                    },
                )?;
                self.write_node(
                    pid,
                    &StoredNode {
                        parent: stored.parent,
                        node: Node::Leaf {
                            entries,
                            next_leaf: right_pid,
                        },
                    },
                )?;
                Ok(Some((sep, right_pid)))
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let idx = keys.partition_point(|k| self.cmp(k, key) != Ordering::Greater);
                let child = children[idx];
                let Some((sep, new_child)) = self.insert_at(child, key, rid)? else {
                    return Ok(None);
                };
                keys.insert(idx, sep);
                children.insert(idx + 1, new_child);
                if keys.len() <= internal_capacity(self.key_len) {
                    self.write_node(
                        pid,
                        &StoredNode {
                            parent: stored.parent,
                            node: Node::Internal { keys, children },
                        },
                    )?;
                    return Ok(None);
                }
                // Median split: the middle key moves up.
                let mid = keys.len() / 2;
                let sep_up = keys[mid].clone();
                let right_keys = keys.split_off(mid + 1);
                keys.pop();
                let right_children = children.split_off(mid + 1);
                let right_pid = self.allocate_page()?;
                for &c in &right_children {
                    self.set_parent(c, right_pid)?;
                }
                self.write_node(
                    right_pid,
                    &StoredNode {
                        parent: stored.parent,
                        node: Node::Internal {
                            keys: right_keys,
                            children: right_children,
                        },
                    },
                )?;
                self.write_node(
                    pid,
                    &StoredNode {
                        parent: stored.parent,
                        node: Node::Internal { keys, children },
                    },
                )?;
                Ok(Some((sep_up, right_pid)))
            }
        }
    }

    // ---- search ----

    /// Leaf that may hold the leftmost occurrence of `key`.
    fn find_leaf_lower(&mut self, key: &[u8]) -> DbResult<i16> {
        let mut pid = self.root_pid;
        loop {
            let stored = self.read_node(pid)?;
            match stored.node {
                Node::Leaf { .. } => return Ok(pid),
                Node::Internal { keys, children } => {
                    // Strictly-less separators only: equal keys may still
                    // live in the left subtree after a split.
                    let idx = keys.partition_point(|k| self.cmp(k, key) == Ordering::Less);
                    pid = children[idx];
                }
            }
        }
    }

    fn leftmost_leaf(&mut self) -> DbResult<i16> {
        let mut pid = self.root_pid;
        loop {
            let stored = self.read_node(pid)?;
            match stored.node {
                Node::Leaf { .. } => return Ok(pid),
                Node::Internal { children, .. } => pid = children[0],
            }
        }
    }

    /// RID of the first entry (in key order) satisfying `field <op>
    /// value`, or `None`.
    pub fn search_first(&mut self, op: CompareOp, value: &FieldValue) -> DbResult<Option<Rid>> {
        let mut pid = match op {
            CompareOp::Lt | CompareOp::Le | CompareOp::Ne => self.leftmost_leaf()?,
            _ => {
                let key = value.to_bytes();
                self.find_leaf_lower(&key)?
            }
        };
        loop {
            let stored = self.read_node(pid)?;
            let Node::Leaf { entries, next_leaf } = stored.node else {
                return Err(DbError::PageMagic {
                    rel: "bpidx".to_string(),
                    pid,
                });
            };
            for (key, rid) in &entries {
                let ord = value.compare_field(key);
                if op.holds(ord) {
                    return Ok(Some(*rid));
                }
                // Keys only grow from here.
                if ord == Some(Ordering::Greater)
                    && matches!(op, CompareOp::Eq | CompareOp::Lt | CompareOp::Le)
                {
                    return Ok(None);
                }
            }
            if next_leaf == NO_LEAF {
                return Ok(None);
            }
            pid = next_leaf;
        }
    }

    /// Every entry in key order. Diagnostic helper.
    pub fn scan_all(&mut self) -> DbResult<Vec<(Vec<u8>, Rid)>> {
        let mut pid = self.leftmost_leaf()?;
        let mut out = Vec::new();
        loop {
            let stored = self.read_node(pid)?;
            let Node::Leaf { entries, next_leaf } = stored.node else {
                break;
            };
            out.extend(entries);
            if next_leaf == NO_LEAF {
                break;
            }
            pid = next_leaf;
        }
        Ok(out)
    }

    // ---- delete ----

    /// Remove the entry `(key, rid)`. Returns whether it was found.
    pub fn delete(&mut self, key: &[u8], rid: Rid) -> DbResult<bool> {
        let mut pid = self.find_leaf_lower(key)?;
        loop {
            let stored = self.read_node(pid)?;
            let Node::Leaf { mut entries, next_leaf } = stored.node else {
                return Err(DbError::PageMagic {
                    rel: "bpidx".to_string(),
                    pid,
                });
            };
            let mut passed = false;
            let mut found = None;
            for (i, (k, r)) in entries.iter().enumerate() {
                match self.cmp(k, key) {
                    Ordering::Less => {}
                    Ordering::Equal => {
                        if *r == rid {
                            found = Some(i);
                            break;
                        }
                    }
                    Ordering::Greater => {
                        passed = true;
                        break;
                    }
                }
            }
            if let Some(i) = found {
                entries.remove(i);
                self.write_node(
                    pid,
                    &StoredNode {
                        parent: stored.parent,
                        node: Node::Leaf { entries, next_leaf },
                    },
                )?;
                self.rebalance(pid)?;
                return Ok(true);
            }
            if passed || next_leaf == NO_LEAF {
                return Ok(false);
            }
            pid = next_leaf;
        }
    }

    fn min_keys(&self, node: &Node) -> usize {
        match node {
            Node::Leaf { .. } => leaf_capacity(self.key_len) / 2,
            Node::Internal { .. } => internal_capacity(self.key_len) / 2,
        }
    }

    /// Restore minimum occupancy at `pid`: borrow from a sibling when
    /// one can spare a key, merge otherwise, and let underflow propagate
    /// up through the parent. An empty internal root is replaced by its
    /// sole child.
    fn rebalance(&mut self, pid: i16) -> DbResult<()> {
        let stored = self.read_node(pid)?;
        if stored.parent == NO_PARENT {
            if let Node::Internal { keys, children } = &stored.node {
                if keys.is_empty() {
                    let child = children[0];
                    self.set_parent(child, NO_PARENT)?;
                    self.root_pid = child;
                    self.write_meta()?;
                    debug!("root collapsed into {child}");
                }
            }
            return Ok(());
        }
        if stored.node.num_keys() >= self.min_keys(&stored.node) {
            return Ok(());
        }

        let parent_pid = stored.parent;
        let parent = self.read_node(parent_pid)?;
        let Node::Internal {
            keys: mut pkeys,
            children: mut pchildren,
        } = parent.node
        else {
            return Err(DbError::PageMagic {
                rel: "bpidx".to_string(),
                pid: parent_pid,
            });
        };
        let idx = pchildren
            .iter()
            .position(|&c| c == pid)
            .ok_or(DbError::PageMagic {
                rel: "bpidx".to_string(),
                pid: parent_pid,
            })?;

        // Borrow from the left sibling when it can spare a key.
        if idx > 0 {
            let left_pid = pchildren[idx - 1];
            let left = self.read_node(left_pid)?;
            if left.node.num_keys() > self.min_keys(&left.node) {
                let sep = self.borrow_from_left(pid, left_pid, &pkeys[idx - 1])?;
                pkeys[idx - 1] = sep;
                return self.write_node(
                    parent_pid,
                    &StoredNode {
                        parent: parent.parent,
                        node: Node::Internal {
                            keys: pkeys,
                            children: pchildren,
                        },
                    },
                );
            }
        }
        // Then the right sibling.
        if idx + 1 < pchildren.len() {
            let right_pid = pchildren[idx + 1];
            let right = self.read_node(right_pid)?;
            if right.node.num_keys() > self.min_keys(&right.node) {
                let sep = self.borrow_from_right(pid, right_pid, &pkeys[idx])?;
                pkeys[idx] = sep;
                return self.write_node(
                    parent_pid,
                    &StoredNode {
                        parent: parent.parent,
                        node: Node::Internal {
                            keys: pkeys,
                            children: pchildren,
                        },
                    },
                );
            }
        }

        // No spare keys anywhere: merge with a sibling and drop the
        // separator from the parent.
        let (survivor, absorbed, sep_idx) = if idx > 0 {
            (pchildren[idx - 1], pid, idx - 1)
        } else {
            (pid, pchildren[idx + 1], idx)
        };
        self.merge(survivor, absorbed, &pkeys[sep_idx])?;
        pkeys.remove(sep_idx);
        pchildren.remove(sep_idx + 1);
        self.write_node(
            parent_pid,
            &StoredNode {
                parent: parent.parent,
                node: Node::Internal {
                    keys: pkeys,
                    children: pchildren,
                },
            },
        )?;
        self.rebalance(parent_pid)
    }

    /// Move one key from the left sibling into `pid`; returns the new
    /// separator.
    fn borrow_from_left(&mut self, pid: i16, left_pid: i16, sep: &[u8]) -> DbResult<Vec<u8>> {
        let mut left = self.read_node(left_pid)?;
        let mut cur = self.read_node(pid)?;
        let new_sep = match (&mut left.node, &mut cur.node) {
            (Node::Leaf { entries: le, .. }, Node::Leaf { entries: ce, .. }) => {
                let moved = le.pop().expect("left sibling has spare entries");
                let sep = moved.0.clone();
                ce.insert(0, moved);
                sep
            }
            (
                Node::Internal {
                    keys: lk,
                    children: lc,
                },
                Node::Internal {
                    keys: ck,
                    children: cc,
                },
            ) => {
                // Rotate through the parent separator.
                let moved_child = lc.pop().expect("left sibling has spare children");
                let new_sep = lk.pop().expect("left sibling has spare keys");
                ck.insert(0, sep.to_vec());
                cc.insert(0, moved_child);
                self.set_parent(moved_child, pid)?;
                new_sep
            }
            _ => unreachable!("siblings share a level"),
        };
        self.write_node(left_pid, &left)?;
        self.write_node(pid, &cur)?;
        Ok(new_sep)
    }

    /// Move one key from the right sibling into `pid`; returns the new
    /// separator.
    fn borrow_from_right(&mut self, pid: i16, right_pid: i16, sep: &[u8]) -> DbResult<Vec<u8>> {
        let mut right = self.read_node(right_pid)?;
        let mut cur = self.read_node(pid)?;
        let new_sep = match (&mut right.node, &mut cur.node) {
            (Node::Leaf { entries: re, .. }, Node::Leaf { entries: ce, .. }) => {
                let moved = re.remove(0);
                ce.push(moved);
                re[0].0.clone()
            }
            (
                Node::Internal {
                    keys: rk,
                    children: rc,
                },
                Node::Internal {
                    keys: ck,
                    children: cc,
                },
            ) => {
                let moved_child = rc.remove(0);
                let new_sep = rk.remove(0);
                ck.push(sep.to_vec());
                cc.push(moved_child);
                self.set_parent(moved_child, pid)?;
                new_sep
            }
            _ => unreachable!("siblings share a level"),
        };
        self.write_node(right_pid, &right)?;
        self.write_node(pid, &cur)?;
        Ok(new_sep)
    }

    /// Fold `absorbed` into `survivor`. The absorbed page is orphaned.
    fn merge(&mut self, survivor: i16, absorbed: i16, sep: &[u8]) -> DbResult<()> {
        let mut left = self.read_node(survivor)?;
        let right = self.read_node(absorbed)?;
        match (&mut left.node, right.node) {
            (
                Node::Leaf {
                    entries: le,
                    next_leaf: ln,
                },
                Node::Leaf {
                    entries: re,
                    next_leaf: rn,
                },
            ) => {
                le.extend(re);
                *ln = rn;
            }
            (
                Node::Internal {
                    keys: lk,
                    children: lc,
                },
                Node::Internal {
                    keys: rk,
                    children: rc,
                },
            ) => {
                lk.push(sep.to_vec());
                lk.extend(rk);
                for &c in &rc {
                    self.set_parent(c, survivor)?;
                }
                lc.extend(rc);
            }
            _ => unreachable!("siblings share a level"),
        }
        self.write_node(survivor, &left)
    }

    // ---- diagnostics ----

    /// Human-readable rendering of the whole tree.
    pub fn dump(&mut self) -> DbResult<String> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "root={} key_len={} key_type={}",
            self.root_pid,
            self.key_len,
            self.key_ty.code() as char
        );
        self.dump_node(self.root_pid, 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&mut self, pid: i16, depth: usize, out: &mut String) -> DbResult<()> {
        let indent = "  ".repeat(depth);
        let stored = self.read_node(pid)?;
        match stored.node {
            Node::Leaf { entries, next_leaf } => {
                let _ = writeln!(
                    out,
                    "{indent}leaf {pid} (parent {}, next {next_leaf}):",
                    stored.parent
                );
                for (key, rid) in entries {
                    let _ = writeln!(
                        out,
                        "{indent}  {} -> ({}, {})",
                        decode_field(self.key_ty, &key),
                        rid.pid,
                        rid.slotnum
                    );
                }
            }
            Node::Internal { keys, children } => {
                let rendered: Vec<String> = keys
                    .iter()
                    .map(|k| decode_field(self.key_ty, k).to_string())
                    .collect();
                let _ = writeln!(
                    out,
                    "{indent}internal {pid} (parent {}): [{}]",
                    stored.parent,
                    rendered.join(", ")
                );
                for child in children {
                    self.dump_node(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for BpTree {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
