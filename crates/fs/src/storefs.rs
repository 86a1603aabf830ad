//! `StoreFs`: turns any [`vfscore_store::Store`] into a full hierarchical
//! file system — path lookup, directory blobs, inode allocation, link
//! counts, truncate/grow, atomic multi-step operations.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use slog::{debug, o, trace};
use vfscore_errno::{Result, VfsError};
use vfscore_path as path;
use vfscore_store::{Inode, Store, Transaction, ROOT_INO, S_IFDIR, S_IFMT, S_IFREG};

/// Highest inode/data id StoreFs will allocate (spec's stated 2^48 upper
/// bound for the random-id rejection-sampling scheme).
const MAX_ID: u64 = 1 << 48;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Tells `StoreFs::unlink` whether an inode still has an open handle
/// elsewhere (in the VFS's descriptor table), so it can defer freeing a
/// zero-link inode until the last handle closes. `NoOpenHandles` is the
/// default for a bare `StoreFs` used without the VFS handle layer.
pub trait HandleTracker: Send + Sync {
    fn is_open(&self, ino: u64) -> bool;
}

pub struct NoOpenHandles;

impl HandleTracker for NoOpenHandles {
    fn is_open(&self, _ino: u64) -> bool {
        false
    }
}

/// Options for creating a new file-system node.
#[derive(Debug, Clone, Copy)]
pub struct CreateOpts {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Selected metadata fields for `touch`/`utimes`-style updates. `None`
/// leaves the field untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchOpts {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime_ms: Option<u64>,
    pub mtime_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirRecord {
    name: String,
    ino: u64,
}

fn encode_dir(entries: &[DirRecord]) -> Vec<u8> {
    serde_json::to_vec(entries).expect("serializing a directory listing to JSON cannot fail")
}

fn decode_dir(bytes: &[u8]) -> Result<Vec<DirRecord>> {
    serde_json::from_slice(bytes)
        .map_err(|e| VfsError::io("storefs.decode_dir", "<dir>").with_message(e.to_string()))
}

/// A full file system layered on a [`Store`].
pub struct StoreFs<S: Store> {
    store: S,
    handles: Box<dyn HandleTracker>,
    log: slog::Logger,
}

impl<S: Store> StoreFs<S> {
    pub fn new(store: S) -> Result<Self> {
        let mut fs = StoreFs {
            store,
            handles: Box::new(NoOpenHandles),
            log: slog_scope::logger().new(o!("layer" => "storefs")),
        };
        fs.check_root()?;
        Ok(fs)
    }

    pub fn with_handle_tracker(store: S, handles: Box<dyn HandleTracker>) -> Result<Self> {
        let mut fs = StoreFs {
            store,
            handles,
            log: slog_scope::logger().new(o!("layer" => "storefs")),
        };
        fs.check_root()?;
        Ok(fs)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Create the root directory if the store has no inode at [`ROOT_INO`].
    fn check_root(&mut self) -> Result<()> {
        let mut txn = self.store.begin()?;
        let exists = self.store.get(&mut txn, ROOT_INO)?.is_some();
        if exists {
            self.store.abort(txn)?;
            return Ok(());
        }
        let now = now_ms();
        let data_id = self.alloc_id(&mut txn, &[ROOT_INO])?;
        let root = Inode::new_directory(ROOT_INO, data_id, 0o755, 0, 0, now);
        let dir_bytes = encode_dir(&[]);
        self.store.set(&mut txn, ROOT_INO, root.to_bytes(), true)?;
        self.store.set(&mut txn, data_id, dir_bytes, false)?;
        self.store.commit(txn)?;
        debug!(self.log, "created root directory"; "data_id" => data_id);
        Ok(())
    }

    fn alloc_id(&mut self, txn: &mut Transaction, avoid: &[u64]) -> Result<u64> {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let candidate: u64 = rng.gen_range(1..MAX_ID);
            if avoid.contains(&candidate) {
                continue;
            }
            if self.store.get(txn, candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(VfsError::no_space("storefs.alloc_id", "<inode>"))
    }

    fn load_inode(&self, txn: &mut Transaction, ino: u64, syscall: &'static str) -> Result<Inode> {
        let bytes = self
            .store
            .get(txn, ino)?
            .ok_or_else(|| VfsError::not_found(syscall, format!("ino:{ino}")))?;
        Inode::from_bytes(&bytes)
            .ok_or_else(|| VfsError::io(syscall, format!("ino:{ino}")).with_message("corrupt inode record"))
    }

    fn load_dir(&self, txn: &mut Transaction, dir: &Inode, syscall: &'static str) -> Result<Vec<DirRecord>> {
        let bytes = self
            .store
            .get(txn, dir.data)?
            .ok_or_else(|| VfsError::io(syscall, format!("ino:{}", dir.ino)).with_message("missing directory blob"))?;
        decode_dir(&bytes)
    }

    fn write_dir(&mut self, txn: &mut Transaction, dir: &mut Inode, entries: &[DirRecord]) -> Result<()> {
        let bytes = encode_dir(entries);
        dir.size = bytes.len() as u64;
        self.store.set(txn, dir.data, bytes, false)?;
        self.store.set(txn, dir.ino, dir.to_bytes(), true)?;
        Ok(())
    }

    /// Resolve a normalized absolute path to `(parent_inode, child_name)`.
    /// `child_name` is empty for the root itself.
    fn resolve_parent(
        &self,
        txn: &mut Transaction,
        normalized: &str,
        syscall: &'static str,
    ) -> Result<(Inode, String)> {
        let (dirname, basename) = path::split(normalized);
        let parent = self.resolve_inode(txn, dirname, syscall)?;
        if !parent.is_dir() {
            return Err(VfsError::not_dir(syscall, dirname));
        }
        Ok((parent, basename.to_string()))
    }

    /// Resolve a normalized absolute path to its inode, without following a
    /// trailing symlink (symlink chasing is the VFS layer's job).
    fn resolve_inode(&self, txn: &mut Transaction, normalized: &str, syscall: &'static str) -> Result<Inode> {
        let mut current = self.load_inode(txn, ROOT_INO, syscall)?;
        let components = path::components(normalized);
        for component in components {
            if !current.is_dir() {
                return Err(VfsError::not_dir(syscall, normalized));
            }
            let entries = self.load_dir(txn, &current, syscall)?;
            let found = entries.iter().find(|e| e.name == component);
            match found {
                Some(entry) => current = self.load_inode(txn, entry.ino, syscall)?,
                None => return Err(VfsError::not_found(syscall, normalized)),
            }
        }
        Ok(current)
    }

    pub fn stat(&mut self, p: &str) -> Result<Inode> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = self.resolve_inode(&mut txn, &normalized, "stat");
        self.store.abort(txn)?;
        result
    }

    pub fn create_file(&mut self, p: &str, opts: CreateOpts) -> Result<Inode> {
        self.create_node(p, S_IFREG, opts, "createFile")
    }

    pub fn mkdir(&mut self, p: &str, opts: CreateOpts) -> Result<Inode> {
        self.create_node(p, S_IFDIR, opts, "mkdir")
    }

    /// Create every missing ancestor directory of `p` with `opts.mode`,
    /// then `p` itself. Idempotent: a directory that already exists is left
    /// with its original mode, even if `opts.mode` differs. Returns the
    /// path of the topmost directory actually created, or `None` if `p`
    /// and all of its ancestors already existed.
    pub fn mkdir_recursive(&mut self, p: &str, opts: CreateOpts) -> Result<Option<String>> {
        let normalized = path::normalize(p);
        let mut first_created: Option<String> = None;
        let mut built = String::new();
        for component in path::components(&normalized) {
            built.push('/');
            built.push_str(component);
            match self.mkdir(&built, opts) {
                Ok(_) => {
                    if first_created.is_none() {
                        first_created = Some(built.clone());
                    }
                }
                Err(e) if e.code == vfscore_errno::ErrorCode::Exists => {}
                Err(e) => return Err(e),
            }
        }
        Ok(first_created)
    }

    /// Create a symlink whose data blob holds the raw target bytes.
    pub fn symlink(&mut self, p: &str, target: &str, opts: CreateOpts) -> Result<Inode> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let (mut parent, name) = match self.resolve_parent(&mut txn, &normalized, "symlink") {
            Ok(v) => v,
            Err(e) => {
                self.store.abort(txn)?;
                return Err(e);
            }
        };
        let result = (|| -> Result<Inode> {
            let existing = self.load_dir(&mut txn, &parent, "symlink")?;
            if existing.iter().any(|e| e.name == name) {
                return Err(VfsError::exists("symlink", &normalized));
            }
            let now = now_ms();
            let ino = self.alloc_id(&mut txn, &[])?;
            let data_id = self.alloc_id(&mut txn, &[ino])?;
            let mut inode = Inode::new_symlink(ino, data_id, opts.uid, opts.gid, now);
            let target_bytes = target.as_bytes().to_vec();
            inode.size = target_bytes.len() as u64;
            self.store.set(&mut txn, data_id, target_bytes, false)?;
            self.store.set(&mut txn, ino, inode.to_bytes(), true)?;

            let mut entries = existing;
            entries.push(DirRecord { name: name.clone(), ino });
            parent.mtime_ms = now;
            parent.ctime_ms = now;
            self.write_dir(&mut txn, &mut parent, &entries)?;
            Ok(inode)
        })();
        match result {
            Ok(inode) => {
                self.store.commit(txn)?;
                Ok(inode)
            }
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    /// Create a file, directory, or symlink node. A new subdirectory bumps
    /// its parent's `nlink` (POSIX keeps a directory's link count at
    /// `2 + subdir_count`, mirrored by `rmdir`'s decrement in `remove`).
    fn create_node(&mut self, p: &str, type_bit: u32, opts: CreateOpts, syscall: &'static str) -> Result<Inode> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let (mut parent, name) = match self.resolve_parent(&mut txn, &normalized, syscall) {
            Ok(v) => v,
            Err(e) => {
                self.store.abort(txn)?;
                return Err(e);
            }
        };
        let result = (|| -> Result<Inode> {
            let existing = self.load_dir(&mut txn, &parent, syscall)?;
            if existing.iter().any(|e| e.name == name) {
                return Err(VfsError::exists(syscall, &normalized));
            }
            let now = now_ms();
            let ino = self.alloc_id(&mut txn, &[])?;
            let data_id = self.alloc_id(&mut txn, &[ino])?;
            let mode = type_bit | (opts.mode & !S_IFMT);
            let mut inode = Inode::new(ino, data_id, mode, opts.uid, opts.gid, now);
            if type_bit == S_IFDIR {
                inode.nlink = 2;
            }
            let initial_bytes = if type_bit == S_IFDIR { encode_dir(&[]) } else { Vec::new() };
            inode.size = initial_bytes.len() as u64;
            self.store.set(&mut txn, data_id, initial_bytes, false)?;
            self.store.set(&mut txn, ino, inode.to_bytes(), true)?;

            let mut entries = existing;
            entries.push(DirRecord { name: name.clone(), ino });
            parent.mtime_ms = now;
            parent.ctime_ms = now;
            if type_bit == S_IFDIR {
                parent.nlink += 1;
            }
            self.write_dir(&mut txn, &mut parent, &entries)?;
            Ok(inode)
        })();
        match result {
            Ok(inode) => {
                self.store.commit(txn)?;
                trace!(self.log, "created node"; "path" => normalized, "ino" => inode.ino);
                Ok(inode)
            }
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn unlink(&mut self, p: &str) -> Result<()> {
        self.remove(p, false)
    }

    pub fn rmdir(&mut self, p: &str) -> Result<()> {
        self.remove(p, true)
    }

    fn remove(&mut self, p: &str, expect_dir: bool) -> Result<()> {
        let normalized = path::normalize(p);
        let syscall = if expect_dir { "rmdir" } else { "unlink" };
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<()> {
            let (mut parent, name) = self.resolve_parent(&mut txn, &normalized, syscall)?;
            let mut entries = self.load_dir(&mut txn, &parent, syscall)?;
            let idx = entries
                .iter()
                .position(|e| e.name == name)
                .ok_or_else(|| VfsError::not_found(syscall, &normalized))?;
            let target = self.load_inode(&mut txn, entries[idx].ino, syscall)?;
            if expect_dir && !target.is_dir() {
                return Err(VfsError::not_dir(syscall, &normalized));
            }
            if !expect_dir && target.is_dir() {
                return Err(VfsError::is_dir(syscall, &normalized));
            }
            if expect_dir {
                let children = self.load_dir(&mut txn, &target, syscall)?;
                if !children.is_empty() {
                    return Err(VfsError::not_empty(syscall, &normalized));
                }
            }

            entries.remove(idx);
            let now = now_ms();
            parent.mtime_ms = now;
            parent.ctime_ms = now;
            if expect_dir {
                parent.nlink = parent.nlink.saturating_sub(1);
            }
            self.write_dir(&mut txn, &mut parent, &entries)?;

            let mut target = target;
            target.nlink = target.nlink.saturating_sub(1);
            if target.nlink == 0 && !self.handles.is_open(target.ino) {
                self.store.delete(&mut txn, target.ino)?;
                self.store.delete(&mut txn, target.data)?;
            } else {
                self.store.set(&mut txn, target.ino, target.to_bytes(), true)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => self.store.commit(txn),
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let old_norm = path::normalize(old);
        let new_norm = path::normalize(new);
        if new_norm == old_norm {
            return Ok(());
        }
        if new_norm.starts_with(&old_norm) {
            let rest = &new_norm[old_norm.len()..];
            if old_norm == "/" || rest.starts_with('/') {
                return Err(VfsError::busy("rename", &old_norm).with_dest(&new_norm));
            }
        }

        let mut txn = self.store.begin()?;
        let result = (|| -> Result<()> {
            let (old_parent, old_name) = self.resolve_parent(&mut txn, &old_norm, "rename")?;
            let mut old_entries = self.load_dir(&mut txn, &old_parent, "rename")?;
            let old_idx = old_entries
                .iter()
                .position(|e| e.name == old_name)
                .ok_or_else(|| VfsError::not_found("rename", &old_norm))?;
            let moved_ino = old_entries[old_idx].ino;
            let moved = self.load_inode(&mut txn, moved_ino, "rename")?;

            let (new_parent, new_name) = self.resolve_parent(&mut txn, &new_norm, "rename")?;
            let mut new_entries = if new_parent.ino == old_parent.ino {
                old_entries.clone()
            } else {
                self.load_dir(&mut txn, &new_parent, "rename")?
            };
            let mut replaced: Option<Inode> = None;
            if let Some(existing) = new_entries.iter().find(|e| e.name == new_name) {
                let existing_inode = self.load_inode(&mut txn, existing.ino, "rename")?;
                if existing_inode.is_dir() != moved.is_dir() {
                    return Err(if moved.is_dir() {
                        VfsError::not_dir("rename", &new_norm)
                    } else {
                        VfsError::is_dir("rename", &new_norm)
                    });
                }
                if existing_inode.is_dir() {
                    let children = self.load_dir(&mut txn, &existing_inode, "rename")?;
                    if !children.is_empty() {
                        return Err(VfsError::not_empty("rename", &new_norm));
                    }
                }
                replaced = Some(existing_inode);
            }

            let now = now_ms();
            let mut new_parent = new_parent;
            new_entries.retain(|e| e.name != new_name);
            new_entries.push(DirRecord { name: new_name, ino: moved_ino });
            new_parent.mtime_ms = now;
            new_parent.ctime_ms = now;
            self.write_dir(&mut txn, &mut new_parent, &new_entries)?;

            if new_parent.ino != old_parent.ino {
                let mut old_parent = old_parent;
                old_entries.remove(old_idx);
                old_parent.mtime_ms = now;
                old_parent.ctime_ms = now;
                self.write_dir(&mut txn, &mut old_parent, &old_entries)?;
            }

            if let Some(mut replaced) = replaced {
                replaced.nlink = replaced.nlink.saturating_sub(1);
                if replaced.nlink == 0 && !self.handles.is_open(replaced.ino) {
                    self.store.delete(&mut txn, replaced.ino)?;
                    self.store.delete(&mut txn, replaced.data)?;
                } else {
                    self.store.set(&mut txn, replaced.ino, replaced.to_bytes(), true)?;
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => self.store.commit(txn),
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_norm = path::normalize(src);
        let dst_norm = path::normalize(dst);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<()> {
            let src_inode = self.resolve_inode(&mut txn, &src_norm, "link")?;
            if src_inode.is_dir() {
                return Err(VfsError::is_dir("link", &src_norm));
            }
            let (mut dst_parent, dst_name) = self.resolve_parent(&mut txn, &dst_norm, "link")?;
            let mut entries = self.load_dir(&mut txn, &dst_parent, "link")?;
            if entries.iter().any(|e| e.name == dst_name) {
                return Err(VfsError::exists("link", &dst_norm));
            }
            entries.push(DirRecord {
                name: dst_name,
                ino: src_inode.ino,
            });
            let now = now_ms();
            dst_parent.mtime_ms = now;
            dst_parent.ctime_ms = now;
            self.write_dir(&mut txn, &mut dst_parent, &entries)?;

            let mut src_inode = src_inode;
            src_inode.nlink += 1;
            src_inode.ctime_ms = now;
            self.store.set(&mut txn, src_inode.ino, src_inode.to_bytes(), true)?;
            Ok(())
        })();
        match result {
            Ok(()) => self.store.commit(txn),
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn read(&mut self, p: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<Vec<u8>> {
            let mut inode = self.resolve_inode(&mut txn, &normalized, "read")?;
            let bytes = self
                .store
                .get(&mut txn, inode.data)?
                .ok_or_else(|| VfsError::io("read", &normalized).with_message("missing data blob"))?;
            let start = (offset as usize).min(bytes.len());
            let end = start.saturating_add(length as usize).min(bytes.len());
            inode.atime_ms = now_ms();
            self.store.set(&mut txn, inode.ino, inode.to_bytes(), true)?;
            Ok(bytes[start..end].to_vec())
        })();
        match result {
            Ok(v) => {
                self.store.commit(txn)?;
                Ok(v)
            }
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn write(&mut self, p: &str, offset: u64, buf: &[u8]) -> Result<u64> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<u64> {
            let mut inode = self.resolve_inode(&mut txn, &normalized, "write")?;
            let mut bytes = self.store.get(&mut txn, inode.data)?.unwrap_or_default();
            let offset = offset as usize;
            if offset + buf.len() > bytes.len() {
                bytes.resize(offset + buf.len(), 0);
            }
            bytes[offset..offset + buf.len()].copy_from_slice(buf);
            inode.size = bytes.len() as u64;
            let now = now_ms();
            inode.mtime_ms = now;
            inode.ctime_ms = now;
            self.store.set(&mut txn, inode.data, bytes, false)?;
            self.store.set(&mut txn, inode.ino, inode.to_bytes(), true)?;
            Ok(buf.len() as u64)
        })();
        match result {
            Ok(n) => {
                self.store.commit(txn)?;
                Ok(n)
            }
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn truncate(&mut self, p: &str, len: u64) -> Result<()> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<()> {
            let mut inode = self.resolve_inode(&mut txn, &normalized, "truncate")?;
            let mut bytes = self.store.get(&mut txn, inode.data)?.unwrap_or_default();
            bytes.resize(len as usize, 0);
            inode.size = len;
            let now = now_ms();
            inode.mtime_ms = now;
            inode.ctime_ms = now;
            self.store.set(&mut txn, inode.data, bytes, false)?;
            self.store.set(&mut txn, inode.ino, inode.to_bytes(), true)?;
            Ok(())
        })();
        match result {
            Ok(()) => self.store.commit(txn),
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    /// Commit provided bytes and metadata for an open handle in one
    /// transaction (used by `Handle::sync`).
    pub fn sync_handle(&mut self, ino: u64, data: Option<Vec<u8>>, touch: TouchOpts) -> Result<()> {
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<()> {
            let mut inode = self.load_inode(&mut txn, ino, "sync")?;
            if let Some(bytes) = data {
                inode.size = bytes.len() as u64;
                self.store.set(&mut txn, inode.data, bytes, false)?;
            }
            apply_touch(&mut inode, touch);
            self.store.set(&mut txn, inode.ino, inode.to_bytes(), true)?;
            Ok(())
        })();
        match result {
            Ok(()) => self.store.commit(txn),
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    pub fn touch(&mut self, p: &str, touch: TouchOpts) -> Result<Inode> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<Inode> {
            let mut inode = self.resolve_inode(&mut txn, &normalized, "touch")?;
            apply_touch(&mut inode, touch);
            self.store.set(&mut txn, inode.ino, inode.to_bytes(), true)?;
            Ok(inode)
        })();
        match result {
            Ok(inode) => {
                self.store.commit(txn)?;
                Ok(inode)
            }
            Err(e) => {
                self.store.abort(txn)?;
                Err(e)
            }
        }
    }

    /// Names of a directory's entries, insertion order preserved.
    pub fn readdir(&mut self, p: &str) -> Result<Vec<String>> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<Vec<String>> {
            let dir = self.resolve_inode(&mut txn, &normalized, "readdir")?;
            if !dir.is_dir() {
                return Err(VfsError::not_dir("readdir", &normalized));
            }
            let entries = self.load_dir(&mut txn, &dir, "readdir")?;
            Ok(entries.into_iter().map(|e| e.name).collect())
        })();
        self.store.abort(txn)?;
        result
    }

    pub fn usage(&self) -> Result<vfscore_store::Usage> {
        self.store.usage()
    }

    /// Raw target bytes of a symlink, without following it.
    pub fn readlink(&mut self, p: &str) -> Result<Vec<u8>> {
        let normalized = path::normalize(p);
        let mut txn = self.store.begin()?;
        let result = (|| -> Result<Vec<u8>> {
            let inode = self.resolve_inode(&mut txn, &normalized, "readlink")?;
            if !inode.is_symlink() {
                return Err(VfsError::invalid("readlink", &normalized));
            }
            self.store
                .get(&mut txn, inode.data)?
                .ok_or_else(|| VfsError::io("readlink", &normalized).with_message("missing symlink target"))
        })();
        self.store.abort(txn)?;
        result
    }
}

fn apply_touch(inode: &mut Inode, touch: TouchOpts) {
    if let Some(mode) = touch.mode {
        inode.mode = (inode.mode & S_IFMT) | (mode & !S_IFMT);
    }
    if let Some(uid) = touch.uid {
        inode.uid = uid;
    }
    if let Some(gid) = touch.gid {
        inode.gid = gid;
    }
    if let Some(atime) = touch.atime_ms {
        inode.atime_ms = atime;
    }
    if let Some(mtime) = touch.mtime_ms {
        inode.mtime_ms = mtime;
    }
    inode.ctime_ms = now_ms();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use vfscore_store::{InMemoryStore, SingleBufferStore};

    fn opts() -> CreateOpts {
        CreateOpts { mode: 0o644, uid: 1000, gid: 1000 }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.create_file("/x.txt", opts()).unwrap();
        fs.write("/x.txt", 0, b"xyz\n").unwrap();
        let stat = fs.stat("/x.txt").unwrap();
        assert_eq!(stat.size, 4);
        assert_eq!(fs.read("/x.txt", 0, 4).unwrap(), b"xyz\n");
    }

    #[test]
    fn recursive_mkdir_like_creation_sets_directory_mode() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.mkdir("/a", CreateOpts { mode: 0o755, uid: 0, gid: 0 }).unwrap();
        fs.mkdir("/a/b", CreateOpts { mode: 0o755, uid: 0, gid: 0 }).unwrap();
        let stat = fs.stat("/a/b").unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.permission_bits(), 0o755);
    }

    /// `mkdir_recursive` creates every missing intermediate directory,
    /// reports the topmost one it created, and a second call with a
    /// different mode is idempotent (no mode changes, no creation).
    #[test]
    fn recursive_mkdir_creates_intermediates_and_is_idempotent() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        let created = fs
            .mkdir_recursive("/a/b/c/d", CreateOpts { mode: 0o755, uid: 0, gid: 0 })
            .unwrap();
        assert_eq!(created.as_deref(), Some("/a"));
        for dir in ["/a", "/a/b", "/a/b/c", "/a/b/c/d"] {
            let stat = fs.stat(dir).unwrap();
            assert!(stat.is_dir());
            assert_eq!(stat.permission_bits(), 0o755);
        }

        let created_again = fs
            .mkdir_recursive("/a/b/c/d", CreateOpts { mode: 0o700, uid: 0, gid: 0 })
            .unwrap();
        assert_eq!(created_again, None);
        assert_eq!(fs.stat("/a").unwrap().permission_bits(), 0o755);
        assert_eq!(fs.stat("/a/b/c/d").unwrap().permission_bits(), 0o755);
    }

    #[test]
    fn unlink_refcount_frees_inode_once_nlink_hits_zero() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.create_file("/f", opts()).unwrap();
        fs.unlink("/f").unwrap();
        assert!(fs.readdir("/").unwrap().is_empty());
        let err = fs.stat("/f").unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::NotFound);
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.mkdir("/a", CreateOpts { mode: 0o755, uid: 0, gid: 0 }).unwrap();
        fs.create_file("/a/f", opts()).unwrap();
        let err = fs.rmdir("/a").unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::NotEmpty);
    }

    #[test]
    fn rename_fails_ebusy_when_destination_is_inside_source() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.mkdir("/a", CreateOpts { mode: 0o755, uid: 0, gid: 0 }).unwrap();
        let err = fs.rename("/a", "/a/b").unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Busy);
    }

    #[test]
    fn link_increments_nlink_and_shares_content() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.create_file("/f", opts()).unwrap();
        fs.write("/f", 0, b"hi").unwrap();
        fs.link("/f", "/g").unwrap();
        assert_eq!(fs.read("/g", 0, 2).unwrap(), b"hi");
        assert_eq!(fs.stat("/f").unwrap().nlink, 2);
    }

    #[test]
    fn readdir_preserves_insertion_order() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.create_file("/z", opts()).unwrap();
        fs.create_file("/a", opts()).unwrap();
        fs.create_file("/m", opts()).unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec!["z", "a", "m"]);
    }

    #[test]
    fn non_ascii_names_survive_a_round_trip() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        fs.create_file("/файл.txt", opts()).unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec!["файл.txt"]);
    }

    /// A large file with non-ASCII leading bytes round-trips byte-for-byte,
    /// with no text-mode mangling anywhere in the path.
    #[test]
    fn a_large_binary_file_round_trips_byte_for_byte() {
        let mut fs = StoreFs::new(InMemoryStore::new()).unwrap();
        let mut content = vec![0u8; 30_000];
        content[0] = 0xE2;
        content[1] = 0x80;
        for (i, byte) in content.iter_mut().enumerate().skip(2) {
            *byte = (i % 256) as u8;
        }
        fs.create_file("/bin.dat", opts()).unwrap();
        fs.write("/bin.dat", 0, &content).unwrap();

        let stat = fs.stat("/bin.dat").unwrap();
        assert_eq!(stat.size, 30_000);

        let read_back = fs.read("/bin.dat", 0, 30_000).unwrap();
        assert_eq!(read_back.len(), 30_000);
        assert_eq!((read_back[1] as u16) << 8 | read_back[0] as u16, 32994);
        assert_eq!(read_back, content);
    }

    /// Two `StoreFs` instances layered over the same shared
    /// `SingleBufferStore` buffer agree on stat metadata for a file written
    /// through one and observed through the other.
    #[test]
    fn two_storefs_instances_over_one_single_buffer_see_the_same_stat() {
        let buffer = Arc::new(Mutex::new(vec![0u8; 1 << 20]));

        let mut fs1 = StoreFs::new(SingleBufferStore::open(buffer.clone()).unwrap()).unwrap();
        fs1.create_file("/example", opts()).unwrap();
        fs1.write("/example", 0, &[b'x'; 26]).unwrap();
        let stat1 = fs1.stat("/example").unwrap();

        let mut fs2 = StoreFs::new(SingleBufferStore::open(buffer).unwrap()).unwrap();
        let stat2 = fs2.stat("/example").unwrap();

        assert_eq!(stat1.size, stat2.size);
        assert_eq!(stat1.mode, stat2.mode);
        assert_eq!(stat1.uid, stat2.uid);
        assert_eq!(stat1.gid, stat2.gid);
        assert_eq!(stat1.mtime_ms, stat2.mtime_ms);
        assert_eq!(stat1.ino, stat2.ino);
    }
}
