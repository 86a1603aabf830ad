//! Inode metadata record.
//!
//! An inode is a fixed-width metadata record plus a variable-length,
//! ordered extended-attribute section. Its `ino` is the key under which the
//! *record itself* is stored in a [`crate::Store`]; its `data` field names a
//! distinct key holding the raw content bytes (or, for a directory, the
//! serialized child-name -> ino mapping).

use std::collections::BTreeMap;

/// Regular file.
pub const S_IFREG: u32 = 0x8000;
/// Directory.
pub const S_IFDIR: u32 = 0x4000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0xA000;
/// Block device.
pub const S_IFBLK: u32 = 0x6000;
/// Character device.
pub const S_IFCHR: u32 = 0x2000;
/// FIFO / named pipe.
pub const S_IFIFO: u32 = 0x1000;
/// Unix domain socket.
pub const S_IFSOCK: u32 = 0xC000;
/// Mask isolating the file-type bits from `mode`.
pub const S_IFMT: u32 = 0xF000;

pub const S_IRWXU: u32 = 0o700;
pub const S_IRWXG: u32 = 0o070;
pub const S_IRWXO: u32 = 0o007;
pub const S_ISUID: u32 = 0o4000;
pub const S_ISGID: u32 = 0o2000;
pub const S_ISVTX: u32 = 0o1000;

/// Reserved extended-attribute namespace prefix.
pub const SYSTEM_NAMESPACE: &str = "system.";
/// Name under which a serialized POSIX ACL is stored, when present.
pub const XATTR_ACL_ACCESS: &str = "system.posix_acl_access";

/// `ino` of the root directory once persisted.
pub const ROOT_INO: u64 = 0;

/// Inode metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub ino: u64,
    pub data: u64,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime_ms: u64,
    pub mtime_ms: u64,
    pub ctime_ms: u64,
    pub birthtime_ms: u64,
    /// Extended attributes, insertion order preserved.
    pub attributes: BTreeMap<String, Vec<u8>>,
    pub flags: u32,
}

impl Inode {
    pub fn new(ino: u64, data: u64, mode: u32, uid: u32, gid: u32, now_ms: u64) -> Self {
        Inode {
            ino,
            data,
            size: 0,
            mode,
            uid,
            gid,
            nlink: 1,
            atime_ms: now_ms,
            mtime_ms: now_ms,
            ctime_ms: now_ms,
            birthtime_ms: now_ms,
            attributes: BTreeMap::new(),
            flags: 0,
        }
    }

    pub fn new_directory(ino: u64, data: u64, mode: u32, uid: u32, gid: u32, now_ms: u64) -> Self {
        let mut inode = Self::new(ino, data, S_IFDIR | (mode & !S_IFMT), uid, gid, now_ms);
        inode.nlink = 2;
        inode
    }

    pub fn new_file(ino: u64, data: u64, mode: u32, uid: u32, gid: u32, now_ms: u64) -> Self {
        Self::new(ino, data, S_IFREG | (mode & !S_IFMT), uid, gid, now_ms)
    }

    pub fn new_symlink(ino: u64, data: u64, uid: u32, gid: u32, now_ms: u64) -> Self {
        Self::new(ino, data, S_IFLNK | 0o777, uid, gid, now_ms)
    }

    pub fn file_type_bits(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_file(&self) -> bool {
        self.file_type_bits() == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == S_IFLNK
    }

    pub fn permission_bits(&self) -> u32 {
        self.mode & !S_IFMT
    }

    pub fn acl(&self) -> Option<&[u8]> {
        self.attributes.get(XATTR_ACL_ACCESS).map(|v| v.as_slice())
    }

    /// Serialize to bytes: a fixed header followed by a count-prefixed,
    /// length-prefixed sequence of `(name, value)` attribute pairs. All
    /// integers little-endian, matching the SingleBuffer format's
    /// endianness convention.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.attributes.len() * 32);
        out.extend_from_slice(&self.ino.to_le_bytes());
        out.extend_from_slice(&self.data.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out.extend_from_slice(&self.nlink.to_le_bytes());
        out.extend_from_slice(&self.atime_ms.to_le_bytes());
        out.extend_from_slice(&self.mtime_ms.to_le_bytes());
        out.extend_from_slice(&self.ctime_ms.to_le_bytes());
        out.extend_from_slice(&self.birthtime_ms.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        for (name, value) in &self.attributes {
            let name_bytes = name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    /// Deserialize from bytes written by [`Inode::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut cur = Cursor { buf: bytes, pos: 0 };
        let ino = cur.read_u64()?;
        let data = cur.read_u64()?;
        let size = cur.read_u64()?;
        let mode = cur.read_u32()?;
        let uid = cur.read_u32()?;
        let gid = cur.read_u32()?;
        let nlink = cur.read_u32()?;
        let atime_ms = cur.read_u64()?;
        let mtime_ms = cur.read_u64()?;
        let ctime_ms = cur.read_u64()?;
        let birthtime_ms = cur.read_u64()?;
        let flags = cur.read_u32()?;
        let attr_count = cur.read_u32()?;
        let mut attributes = BTreeMap::new();
        for _ in 0..attr_count {
            let name_len = cur.read_u32()? as usize;
            let name = cur.read_bytes(name_len)?;
            let name = String::from_utf8(name.to_vec()).ok()?;
            let value_len = cur.read_u32()? as usize;
            let value = cur.read_bytes(value_len)?.to_vec();
            attributes.insert(name, value);
        }
        Some(Inode {
            ino,
            data,
            size,
            mode,
            uid,
            gid,
            nlink,
            atime_ms,
            mtime_ms,
            ctime_ms,
            birthtime_ms,
            attributes,
            flags,
        })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn read_u32(&mut self) -> Option<u32> {
        let slice = self.read_bytes(4)?;
        Some(u32::from_le_bytes(slice.try_into().ok()?))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let slice = self.read_bytes(8)?;
        Some(u64::from_le_bytes(slice.try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut inode = Inode::new_file(7, 8, 0o644, 1000, 1000, 42);
        inode
            .attributes
            .insert(XATTR_ACL_ACCESS.to_string(), vec![1, 2, 3]);
        let bytes = inode.to_bytes();
        let back = Inode::from_bytes(&bytes).expect("valid encoding");
        assert_eq!(inode, back);
    }

    #[test]
    fn file_type_and_permission_bits_coexist() {
        let inode = Inode::new_directory(1, 2, 0o755, 0, 0, 0);
        assert!(inode.is_dir());
        assert_eq!(inode.permission_bits(), 0o755);
        assert_eq!(inode.nlink, 2);
    }
}
