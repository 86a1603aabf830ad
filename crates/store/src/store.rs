//! The [`Store`] contract: a key-value byte-blob store with transactional
//! begin/commit/abort. Keys are numeric IDs shared between inode records and
//! data blobs. Implemented by [`crate::InMemoryStore`] and
//! [`crate::SingleBufferStore`].

use vfscore_errno::Result;

use crate::Transaction;

/// Space accounting for a store, in bytes and in entry slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub total_nodes: u64,
    pub free_nodes: u64,
    pub block_size: u32,
}

/// A synchronous key-value byte-blob store with transactional semantics.
///
/// Exactly one live transaction is permitted at a time; a backend that
/// needs concurrent logical operations must serialize them above this
/// layer (the Mutexed mixin, in `vfscore-fs`).
pub trait Store {
    /// Begin a new transaction. Fails `EBUSY` if one is already active.
    fn begin(&mut self) -> Result<Transaction>;

    /// Read a value, as committed plus whatever this transaction has
    /// staged for `id`.
    fn get(&self, txn: &mut Transaction, id: u64) -> Result<Option<Vec<u8>>>;

    /// Stage a write for `id`, visible to `get` within the same
    /// transaction but not to the committed store until `commit`.
    fn set(&mut self, txn: &mut Transaction, id: u64, bytes: Vec<u8>, is_metadata: bool)
        -> Result<()>;

    /// Stage a delete for `id`.
    fn delete(&mut self, txn: &mut Transaction, id: u64) -> Result<()>;

    /// All committed keys, plus any this transaction has newly written,
    /// minus any it has deleted.
    fn keys(&self, txn: &mut Transaction) -> Result<Vec<u64>>;

    /// Make `txn`'s staged writes/deletes visible atomically. On `EIO` the
    /// store is left exactly as it was (no partial visibility).
    fn commit(&mut self, txn: Transaction) -> Result<()>;

    /// Discard `txn`'s staged writes/deletes, restoring nothing (the
    /// committed store was never touched — only the overlay is dropped).
    fn abort(&mut self, txn: Transaction) -> Result<()>;

    /// Flush any buffered state to the backing medium. A no-op for
    /// [`crate::InMemoryStore`].
    fn sync(&mut self) -> Result<()>;

    /// Space accounting.
    fn usage(&self) -> Result<Usage>;
}
