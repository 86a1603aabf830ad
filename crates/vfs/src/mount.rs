//! Mount table: binds an absolute path prefix to a backend. Resolution
//! picks the longest matching prefix; each mount point is registered only
//! once.

use vfscore_errno::{Result, VfsError};
use vfscore_path::normalize;
use vfscore_store::Inode;

use vfscore_fs::{CopyOnWriteFs, CreateOpts, StoreFs};
use vfscore_store::Store;

/// Cap on the number of simultaneous mounts, matching the host corpus's
/// fixed-capacity mount table.
pub const MAX_MOUNTS: usize = 64;

/// A backend `Vfs` can mount: either form exposes the same operation set,
/// dispatched dynamically through this trait rather than a generic
/// parameter, so heterogeneous backends can share one mount table.
pub trait Backend: Send {
    fn stat(&mut self, path: &str) -> Result<Inode>;
    fn create_file(&mut self, path: &str, opts: CreateOpts) -> Result<Inode>;
    fn mkdir(&mut self, path: &str, opts: CreateOpts) -> Result<Inode>;
    fn mkdir_recursive(&mut self, path: &str, opts: CreateOpts) -> Result<Option<String>>;
    fn symlink(&mut self, path: &str, target: &str, opts: CreateOpts) -> Result<Inode>;
    fn unlink(&mut self, path: &str) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, old: &str, new: &str) -> Result<()>;
    fn link(&mut self, src: &str, dst: &str) -> Result<()>;
    fn read(&mut self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>>;
    fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<u64>;
    fn truncate(&mut self, path: &str, len: u64) -> Result<()>;
    fn readdir(&mut self, path: &str) -> Result<Vec<String>>;
    fn readlink(&mut self, path: &str) -> Result<Vec<u8>>;
}

impl<S: Store + Send> Backend for StoreFs<S> {
    fn stat(&mut self, path: &str) -> Result<Inode> {
        StoreFs::stat(self, path)
    }
    fn create_file(&mut self, path: &str, opts: CreateOpts) -> Result<Inode> {
        StoreFs::create_file(self, path, opts)
    }
    fn mkdir(&mut self, path: &str, opts: CreateOpts) -> Result<Inode> {
        StoreFs::mkdir(self, path, opts)
    }
    fn mkdir_recursive(&mut self, path: &str, opts: CreateOpts) -> Result<Option<String>> {
        StoreFs::mkdir_recursive(self, path, opts)
    }
    fn symlink(&mut self, path: &str, target: &str, opts: CreateOpts) -> Result<Inode> {
        StoreFs::symlink(self, path, target, opts)
    }
    fn unlink(&mut self, path: &str) -> Result<()> {
        StoreFs::unlink(self, path)
    }
    fn rmdir(&mut self, path: &str) -> Result<()> {
        StoreFs::rmdir(self, path)
    }
    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        StoreFs::rename(self, old, new)
    }
    fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        StoreFs::link(self, src, dst)
    }
    fn read(&mut self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        StoreFs::read(self, path, offset, length)
    }
    fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<u64> {
        StoreFs::write(self, path, offset, buf)
    }
    fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        StoreFs::truncate(self, path, len)
    }
    fn readdir(&mut self, path: &str) -> Result<Vec<String>> {
        StoreFs::readdir(self, path)
    }
    fn readlink(&mut self, path: &str) -> Result<Vec<u8>> {
        StoreFs::readlink(self, path)
    }
}

impl<RS: Store + Send, WS: Store + Send> Backend for CopyOnWriteFs<RS, WS> {
    fn stat(&mut self, path: &str) -> Result<Inode> {
        CopyOnWriteFs::stat(self, path)
    }
    fn create_file(&mut self, path: &str, opts: CreateOpts) -> Result<Inode> {
        CopyOnWriteFs::create_file(self, path, opts)
    }
    fn mkdir(&mut self, path: &str, opts: CreateOpts) -> Result<Inode> {
        CopyOnWriteFs::mkdir(self, path, opts)
    }
    fn mkdir_recursive(&mut self, path: &str, opts: CreateOpts) -> Result<Option<String>> {
        CopyOnWriteFs::mkdir_recursive(self, path, opts)
    }
    fn symlink(&mut self, path: &str, target: &str, opts: CreateOpts) -> Result<Inode> {
        CopyOnWriteFs::symlink(self, path, target, opts)
    }
    fn unlink(&mut self, path: &str) -> Result<()> {
        CopyOnWriteFs::unlink(self, path)
    }
    fn rmdir(&mut self, path: &str) -> Result<()> {
        CopyOnWriteFs::rmdir(self, path)
    }
    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        CopyOnWriteFs::rename(self, old, new)
    }
    fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        CopyOnWriteFs::link(self, src, dst)
    }
    fn read(&mut self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        CopyOnWriteFs::read(self, path, offset, length)
    }
    fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<u64> {
        CopyOnWriteFs::write(self, path, offset, buf)
    }
    fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        CopyOnWriteFs::truncate(self, path, len)
    }
    fn readdir(&mut self, path: &str) -> Result<Vec<String>> {
        CopyOnWriteFs::readdir(self, path)
    }
    fn readlink(&mut self, path: &str) -> Result<Vec<u8>> {
        CopyOnWriteFs::readlink(self, path)
    }
}

/// A mount point: a normalized path bound to a backend.
pub struct MountPoint {
    pub path: String,
    pub backend: Box<dyn Backend>,
}

impl MountPoint {
    pub fn new(path: &str, backend: Box<dyn Backend>) -> Self {
        MountPoint {
            path: normalize(path),
            backend,
        }
    }
}

/// Ordered set of mounts, kept sorted by path length descending so
/// resolution always finds the longest matching prefix first.
#[derive(Default)]
pub struct MountTable {
    mounts: Vec<MountPoint>,
}

impl MountTable {
    pub fn new() -> Self {
        MountTable { mounts: Vec::new() }
    }

    pub fn mount(&mut self, path: &str, backend: Box<dyn Backend>) -> Result<()> {
        let normalized = normalize(path);
        if self.mounts.iter().any(|m| m.path == normalized) {
            return Err(VfsError::exists("mount", normalized));
        }
        if self.mounts.len() >= MAX_MOUNTS {
            return Err(VfsError::invalid("mount", normalized).with_message("too many mounts"));
        }
        self.mounts.push(MountPoint::new(&normalized, backend));
        self.mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(())
    }

    pub fn unmount(&mut self, path: &str) -> Result<()> {
        let normalized = normalize(path);
        let pos = self
            .mounts
            .iter()
            .position(|m| m.path == normalized)
            .ok_or_else(|| VfsError::not_found("unmount", normalized.clone()))?;
        self.mounts.remove(pos);
        Ok(())
    }

    /// Find the mount whose path is the longest proper prefix (or exact
    /// match) of `normalized`, returning the backend and the path relative
    /// to that mount's root.
    pub fn resolve(&mut self, normalized: &str) -> Result<(&mut dyn Backend, String)> {
        for mount in &mut self.mounts {
            if normalized == mount.path {
                return Ok((mount.backend.as_mut(), "/".to_string()));
            }
            if let Some(after) = normalized.strip_prefix(mount.path.as_str()) {
                if mount.path == "/" || after.starts_with('/') {
                    let rel = if mount.path == "/" {
                        normalized.to_string()
                    } else {
                        after.to_string()
                    };
                    return Ok((mount.backend.as_mut(), rel));
                }
            }
        }
        Err(VfsError::not_found("resolve", normalized.to_string()))
    }

    /// The path of the mount that owns `normalized`, without borrowing its
    /// backend — used to compare two paths for same-mount membership.
    pub fn owning_mount(&self, normalized: &str) -> Result<&str> {
        for mount in &self.mounts {
            if normalized == mount.path || {
                let prefix = if mount.path == "/" { "/".to_string() } else { format!("{}/", mount.path) };
                normalized.starts_with(&prefix)
            } {
                return Ok(mount.path.as_str());
            }
        }
        Err(VfsError::not_found("resolve", normalized.to_string()))
    }

    pub fn is_mount_point(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.mounts.iter().any(|m| m.path == normalized)
    }

    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|m| m.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfscore_store::InMemoryStore;

    fn backend() -> Box<dyn Backend> {
        Box::new(StoreFs::new(InMemoryStore::new()).unwrap())
    }

    #[test]
    fn mounting_the_same_path_twice_fails() {
        let mut table = MountTable::new();
        table.mount("/m1", backend()).unwrap();
        assert!(table.mount("/m1", backend()).is_err());
    }

    #[test]
    fn resolve_picks_the_longest_matching_prefix() {
        let mut table = MountTable::new();
        table.mount("/", backend()).unwrap();
        table.mount("/mnt/data", backend()).unwrap();

        let (_, rel) = table.resolve("/mnt/data/file.txt").unwrap();
        assert_eq!(rel, "/file.txt");

        let (_, rel) = table.resolve("/mnt/other").unwrap();
        assert_eq!(rel, "/mnt/other");
    }

    #[test]
    fn unmount_removes_the_entry() {
        let mut table = MountTable::new();
        table.mount("/m1", backend()).unwrap();
        table.unmount("/m1").unwrap();
        assert!(!table.is_mount_point("/m1"));
    }
}
