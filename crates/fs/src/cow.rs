//! CopyOnWrite overlay: a writable backend layered over a read-only one,
//! with a durable deletion log recording paths removed from the readable
//! side.

use std::collections::BTreeSet;

use slog::{debug, o};
use vfscore_errno::{Result, VfsError};
use vfscore_path as path;
use vfscore_store::{Inode, Store};

use crate::storefs::{CreateOpts, StoreFs};

/// Well-known path, inside the writable backend, holding the deletion log:
/// one absolute path per line, UTF-8, `\n`-delimited.
pub const DELETION_LOG_PATH: &str = "/.vfscore-deleted";

/// Layers `writable` over `readable`. Any mutation promotes the touched
/// path (and its ancestors, with their modes) into `writable` first.
pub struct CopyOnWriteFs<RS: Store, WS: Store> {
    readable: StoreFs<RS>,
    writable: StoreFs<WS>,
    deleted: BTreeSet<String>,
    log: slog::Logger,
}

impl<RS: Store, WS: Store> CopyOnWriteFs<RS, WS> {
    pub fn new(readable: StoreFs<RS>, mut writable: StoreFs<WS>) -> Result<Self> {
        let deleted = load_deletion_log(&mut writable)?;
        Ok(CopyOnWriteFs {
            readable,
            writable,
            deleted,
            log: slog_scope::logger().new(o!("layer" => "copy_on_write")),
        })
    }

    fn is_deleted(&self, p: &str) -> bool {
        self.deleted.contains(p)
    }

    fn exists_in_writable(&mut self, p: &str) -> bool {
        self.writable.stat(p).is_ok()
    }

    fn exists_in_readable(&mut self, p: &str) -> bool {
        self.readable.stat(p).is_ok()
    }

    pub fn stat(&mut self, p: &str) -> Result<Inode> {
        let normalized = path::normalize(p);
        if let Ok(inode) = self.writable.stat(&normalized) {
            return Ok(inode);
        }
        if self.is_deleted(&normalized) {
            return Err(VfsError::not_found("stat", &normalized));
        }
        self.readable.stat(&normalized)
    }

    pub fn read(&mut self, p: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let normalized = path::normalize(p);
        if self.exists_in_writable(&normalized) {
            return self.writable.read(&normalized, offset, length);
        }
        if self.is_deleted(&normalized) {
            return Err(VfsError::not_found("read", &normalized));
        }
        self.readable.read(&normalized, offset, length)
    }

    /// Copy `p` (and any missing ancestor directories, with their modes)
    /// from `readable` into `writable`, if it is not already there.
    fn promote(&mut self, p: &str) -> Result<()> {
        let normalized = path::normalize(p);
        if self.exists_in_writable(&normalized) || normalized == "/" {
            return Ok(());
        }
        if let Some(parent) = path::dirname(&normalized) {
            self.promote(parent)?;
        }
        if !self.exists_in_readable(&normalized) {
            return Ok(()); // nothing to promote; caller is about to create it fresh
        }
        let inode = self.readable.stat(&normalized)?;
        let opts = CreateOpts {
            mode: inode.permission_bits(),
            uid: inode.uid,
            gid: inode.gid,
        };
        if inode.is_dir() {
            if self.writable.mkdir(&normalized, opts).is_err() {
                // Already promoted by a concurrent ancestor promotion.
            }
        } else if inode.is_symlink() {
            let target = self.readable.readlink(&normalized)?;
            let target = String::from_utf8_lossy(&target).into_owned();
            self.writable.symlink(&normalized, &target, opts)?;
        } else {
            self.writable.create_file(&normalized, opts)?;
            let bytes = self.readable.read(&normalized, 0, inode.size)?;
            self.writable.write(&normalized, 0, &bytes)?;
        }
        self.deleted.remove(&normalized);
        debug!(self.log, "promoted path into writable"; "path" => normalized);
        Ok(())
    }

    pub fn create_file(&mut self, p: &str, opts: CreateOpts) -> Result<Inode> {
        let normalized = path::normalize(p);
        if let Some(parent) = path::dirname(&normalized) {
            self.promote(parent)?;
        }
        let result = self.writable.create_file(&normalized, opts);
        if result.is_ok() {
            self.deleted.remove(&normalized);
        }
        result
    }

    pub fn mkdir(&mut self, p: &str, opts: CreateOpts) -> Result<Inode> {
        let normalized = path::normalize(p);
        if let Some(parent) = path::dirname(&normalized) {
            self.promote(parent)?;
        }
        let result = self.writable.mkdir(&normalized, opts);
        if result.is_ok() {
            self.deleted.remove(&normalized);
        }
        result
    }

    /// Create every missing ancestor of `p` (promoting readable-only ones
    /// into writable) and then `p` itself. Idempotent, like the underlying
    /// backend's `mkdir_recursive`.
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

    pub fn write(&mut self, p: &str, offset: u64, buf: &[u8]) -> Result<u64> {
        let normalized = path::normalize(p);
        self.promote(&normalized)?;
        self.writable.write(&normalized, offset, buf)
    }

    pub fn truncate(&mut self, p: &str, len: u64) -> Result<()> {
        let normalized = path::normalize(p);
        self.promote(&normalized)?;
        self.writable.truncate(&normalized, len)
    }

    pub fn symlink(&mut self, p: &str, target: &str, opts: CreateOpts) -> Result<Inode> {
        let normalized = path::normalize(p);
        if let Some(parent) = path::dirname(&normalized) {
            self.promote(parent)?;
        }
        let result = self.writable.symlink(&normalized, target, opts);
        if result.is_ok() {
            self.deleted.remove(&normalized);
        }
        result
    }

    pub fn readlink(&mut self, p: &str) -> Result<Vec<u8>> {
        let normalized = path::normalize(p);
        if self.exists_in_writable(&normalized) {
            return self.writable.readlink(&normalized);
        }
        if self.is_deleted(&normalized) {
            return Err(VfsError::not_found("readlink", &normalized));
        }
        self.readable.readlink(&normalized)
    }

    pub fn unlink(&mut self, p: &str) -> Result<()> {
        let normalized = path::normalize(p);
        if self.exists_in_writable(&normalized) {
            self.writable.unlink(&normalized)?;
        }
        self.record_deletion(&normalized)
    }

    pub fn rmdir(&mut self, p: &str) -> Result<()> {
        let normalized = path::normalize(p);
        if self.exists_in_writable(&normalized) {
            self.writable.rmdir(&normalized)?;
        }
        self.record_deletion(&normalized)
    }

    fn record_deletion(&mut self, normalized: &str) -> Result<()> {
        self.deleted.insert(normalized.to_string());
        self.persist_deletion_log()
    }

    /// A rename that crosses the overlay boundary copies the source into
    /// writable under the new name and records the source as deleted.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let old_norm = path::normalize(old);
        let new_norm = path::normalize(new);
        if self.exists_in_writable(&old_norm) {
            if let Some(parent) = path::dirname(&new_norm) {
                self.promote(parent)?;
            }
            self.writable.rename(&old_norm, &new_norm)?;
            return Ok(());
        }
        // Source lives only in readable: copy across the boundary.
        self.promote(&old_norm)?;
        if let Some(parent) = path::dirname(&new_norm) {
            self.promote(parent)?;
        }
        self.writable.rename(&old_norm, &new_norm)?;
        self.record_deletion(&old_norm)
    }

    pub fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_norm = path::normalize(src);
        let dst_norm = path::normalize(dst);
        self.promote(&src_norm)?;
        if let Some(parent) = path::dirname(&dst_norm) {
            self.promote(parent)?;
        }
        self.writable.link(&src_norm, &dst_norm)
    }

    /// Union of writable and readable entries, deleted paths filtered out,
    /// deduplicated by name (writable wins).
    pub fn readdir(&mut self, p: &str) -> Result<Vec<String>> {
        let normalized = path::normalize(p);
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();

        if self.exists_in_writable(&normalized) {
            for name in self.writable.readdir(&normalized)? {
                if seen.insert(name.clone()) {
                    out.push(name);
                }
            }
        }
        if !self.is_deleted(&normalized) {
            if let Ok(names) = self.readable.readdir(&normalized) {
                for name in names {
                    let child_path = path::join(&normalized, &[&name]);
                    if self.is_deleted(&child_path) {
                        continue;
                    }
                    if seen.insert(name.clone()) {
                        out.push(name);
                    }
                }
            }
        }
        Ok(out)
    }

    fn persist_deletion_log(&mut self) -> Result<()> {
        let body = self
            .deleted
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let bytes = body.into_bytes();
        if self.writable.stat(DELETION_LOG_PATH).is_err() {
            self.writable.create_file(
                DELETION_LOG_PATH,
                CreateOpts { mode: 0o600, uid: 0, gid: 0 },
            )?;
        }
        self.writable.truncate(DELETION_LOG_PATH, 0)?;
        self.writable.write(DELETION_LOG_PATH, 0, &bytes)?;
        Ok(())
    }
}

fn load_deletion_log<WS: Store>(writable: &mut StoreFs<WS>) -> Result<BTreeSet<String>> {
    match writable.stat(DELETION_LOG_PATH) {
        Ok(inode) => {
            let bytes = writable.read(DELETION_LOG_PATH, 0, inode.size)?;
            let text = String::from_utf8_lossy(&bytes);
            Ok(text.lines().filter(|l| !l.is_empty()).map(String::from).collect())
        }
        Err(_) => Ok(BTreeSet::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfscore_store::InMemoryStore;

    fn opts() -> CreateOpts {
        CreateOpts { mode: 0o644, uid: 0, gid: 0 }
    }

    fn overlay() -> CopyOnWriteFs<InMemoryStore, InMemoryStore> {
        let mut readable = StoreFs::new(InMemoryStore::new()).unwrap();
        readable.create_file("/ro/file", opts()).unwrap();
        readable.write("/ro/file", 0, b"original").unwrap();
        let writable = StoreFs::new(InMemoryStore::new()).unwrap();
        CopyOnWriteFs::new(readable, writable).unwrap()
    }

    #[test]
    fn read_falls_through_to_readable_when_absent_from_writable() {
        let mut fs = overlay();
        assert_eq!(fs.read("/ro/file", 0, 8).unwrap(), b"original");
    }

    #[test]
    fn write_promotes_into_writable_and_shadows_readable() {
        let mut fs = overlay();
        fs.write("/ro/file", 0, b"modified").unwrap();
        assert_eq!(fs.read("/ro/file", 0, 8).unwrap(), b"modified");
    }

    #[test]
    fn rename_across_the_overlay_boundary_records_a_deletion() {
        let mut fs = overlay();
        fs.rename("/ro/file", "/ro/file2").unwrap();
        assert_eq!(fs.read("/ro/file2", 0, 8).unwrap(), b"original");
        assert!(fs.stat("/ro/file").is_err());
        assert!(fs.deleted.contains("/ro/file"));
    }

    #[test]
    fn unlink_hides_a_readable_only_path_via_the_deletion_log() {
        let mut fs = overlay();
        fs.unlink("/ro/file").unwrap();
        assert!(fs.stat("/ro/file").is_err());
        assert!(!fs.readdir("/ro").unwrap().contains(&"file".to_string()));
    }

    #[test]
    fn readdir_merges_and_dedupes_writable_over_readable() {
        let mut fs = overlay();
        fs.create_file("/ro/extra", opts()).unwrap();
        let mut names = fs.readdir("/ro").unwrap();
        names.sort();
        assert_eq!(names, vec!["extra".to_string(), "file".to_string()]);
    }

    #[test]
    fn mkdir_recursive_promotes_readable_ancestors_into_writable() {
        let mut fs = overlay();
        let created = fs.mkdir_recursive("/ro/a/b", opts()).unwrap();
        assert_eq!(created.as_deref(), Some("/ro/a"));
        assert!(fs.stat("/ro/a/b").unwrap().is_dir());
        assert_eq!(fs.mkdir_recursive("/ro/a/b", opts()).unwrap(), None);
    }
}
