//! Open file handles: position, flags, and the read/write/truncate/stat/
//! close operations exposed on an open descriptor.

use vfscore_errno::{Result, VfsError};
use vfscore_store::Inode;

use crate::constants::{O_APPEND, O_CREAT, O_DIRECTORY, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};

/// Decoded view of an open-flags bitmask, mirroring the host corpus's
/// named `FileMode` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub exclusive: bool,
    pub directory_only: bool,
}

impl FileMode {
    pub fn from_flags(flags: u32) -> Self {
        let access = flags & 0b11;
        FileMode {
            read: access == O_RDONLY || access == O_RDWR,
            write: access == O_WRONLY || access == O_RDWR,
            append: flags & O_APPEND != 0,
            create: flags & O_CREAT != 0,
            truncate: flags & O_TRUNC != 0,
            exclusive: flags & O_EXCL != 0,
            directory_only: flags & O_DIRECTORY != 0,
        }
    }
}

/// Integer descriptor identifying an open handle within a context.
pub type Fd = i32;

/// Open-file state: referenced inode's path, the flags it was opened
/// with, the current read/write position, and a snapshot of its stat
/// taken at open time (refreshed on `sync`).
#[derive(Debug, Clone)]
pub struct Handle {
    pub path: String,
    pub resolved_path: String,
    pub flags: u32,
    pub position: u64,
    pub stats_snapshot: Inode,
}

impl Handle {
    pub fn new(path: String, resolved_path: String, flags: u32, stats_snapshot: Inode) -> Self {
        let position = if flags & O_APPEND != 0 { stats_snapshot.size } else { 0 };
        Handle {
            path,
            resolved_path,
            flags,
            position,
            stats_snapshot,
        }
    }

    pub fn mode(&self) -> FileMode {
        FileMode::from_flags(self.flags)
    }

    /// Resolve the (offset, length) pair a `read`/`write` call should use,
    /// honoring an explicit position override or falling back to (and
    /// advancing) the handle's own cursor.
    pub fn seek_for(&mut self, explicit: Option<u64>, advance_by: u64) -> u64 {
        let at = explicit.unwrap_or(self.position);
        if explicit.is_none() {
            self.position = self.position.saturating_add(advance_by);
        }
        at
    }

    pub fn require_write(&self, syscall: &'static str) -> Result<()> {
        if self.mode().write {
            Ok(())
        } else {
            Err(VfsError::access(syscall, self.path.clone()))
        }
    }

    pub fn require_read(&self, syscall: &'static str) -> Result<()> {
        if self.mode().read {
            Ok(())
        } else {
            Err(VfsError::access(syscall, self.path.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfscore_store::Inode;

    fn inode_of_size(size: u64) -> Inode {
        let mut i = Inode::new(1, 2, 0o644, 0, 0, 0);
        i.size = size;
        i
    }

    #[test]
    fn append_mode_seeds_position_at_end_of_file() {
        let h = Handle::new("/f".into(), "/f".into(), O_WRONLY | O_APPEND, inode_of_size(10));
        assert_eq!(h.position, 10);
    }

    #[test]
    fn create_mode_seeds_position_at_zero() {
        let h = Handle::new("/f".into(), "/f".into(), O_WRONLY | O_CREAT, inode_of_size(10));
        assert_eq!(h.position, 0);
    }

    #[test]
    fn seek_for_advances_the_cursor_unless_an_explicit_position_is_given() {
        let mut h = Handle::new("/f".into(), "/f".into(), O_RDWR, inode_of_size(0));
        assert_eq!(h.seek_for(None, 4), 0);
        assert_eq!(h.position, 4);
        assert_eq!(h.seek_for(Some(100), 4), 100);
        assert_eq!(h.position, 4);
    }

    #[test]
    fn write_only_handle_rejects_a_read() {
        let h = Handle::new("/f".into(), "/f".into(), O_WRONLY, inode_of_size(0));
        assert!(h.require_read("read").is_err());
        assert!(h.require_write("write").is_ok());
    }
}
