//! Key-value byte-blob store abstraction used by the rest of the vfscore
//! crates: the [`Store`] trait, its [`Transaction`] overlay, the [`Inode`]
//! metadata record, an [`InMemoryStore`] for tests and embedded use, and
//! [`SingleBufferStore`], a checksummed on-buffer format suitable for a
//! single `Vec<u8>` or a memory-mapped file.

pub mod in_memory;
pub mod inode;
pub mod single_buffer;
pub mod store;
pub mod transaction;

pub use in_memory::InMemoryStore;
pub use inode::{
    Inode, ROOT_INO, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
    S_IRWXG, S_IRWXO, S_IRWXU, S_ISGID, S_ISUID, S_ISVTX, SYSTEM_NAMESPACE, XATTR_ACL_ACCESS,
};
pub use single_buffer::SingleBufferStore;
pub use store::{Store, Usage};
pub use transaction::{PendingOp, Transaction, TransactionState};
