//! Transaction overlay.
//!
//! A transaction buffers pending writes/deletes over a [`crate::Store`] and
//! stashes the pre-transaction value of any key it touches, so `abort` can
//! restore exactly what was there before. `commit` hands the pending map to
//! the store, which is responsible for making it visible atomically.

use std::collections::BTreeMap;

use vfscore_errno::{Result, VfsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
pub enum PendingOp {
    Write { bytes: Vec<u8>, is_metadata: bool },
    Delete,
}

/// A single-use overlay of pending writes/deletes against a store.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: u64,
    state: TransactionState,
    pending: BTreeMap<u64, PendingOp>,
    /// Value observed the first time each key was read or written, for
    /// rollback on abort. `None` means the key did not exist.
    stashed: BTreeMap<u64, Option<Vec<u8>>>,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Transaction {
            id,
            state: TransactionState::Active,
            pending: BTreeMap::new(),
            stashed: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn require_active(&self, syscall: &'static str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(VfsError::busy(syscall, format!("txn:{}", self.id))
                .with_message("transaction already committed or aborted"))
        }
    }

    /// Record a pending write, stashing the prior value on first touch.
    pub fn stage_write(
        &mut self,
        id: u64,
        bytes: Vec<u8>,
        is_metadata: bool,
        original: impl FnOnce() -> Option<Vec<u8>>,
    ) -> Result<()> {
        self.require_active("store.set")?;
        self.stashed.entry(id).or_insert_with(original);
        self.pending.insert(id, PendingOp::Write { bytes, is_metadata });
        Ok(())
    }

    /// Record a pending delete, stashing the prior value on first touch.
    pub fn stage_delete(
        &mut self,
        id: u64,
        original: impl FnOnce() -> Option<Vec<u8>>,
    ) -> Result<()> {
        self.require_active("store.delete")?;
        self.stashed.entry(id).or_insert_with(original);
        self.pending.insert(id, PendingOp::Delete);
        Ok(())
    }

    /// Observe (but not modify) a key, stashing its current value so a
    /// later modification-then-abort within this transaction can restore it.
    pub fn note_read(&mut self, id: u64, original: impl FnOnce() -> Option<Vec<u8>>) {
        self.stashed.entry(id).or_insert_with(original);
    }

    /// The pending (uncommitted) value for `id`, if this transaction has
    /// written or deleted it.
    pub fn pending_get(&self, id: u64) -> Option<&PendingOp> {
        self.pending.get(&id)
    }

    pub fn pending(&self) -> &BTreeMap<u64, PendingOp> {
        &self.pending
    }

    pub fn stashed(&self) -> &BTreeMap<u64, Option<Vec<u8>>> {
        &self.stashed
    }

    pub fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stashes_only_on_first_touch() {
        let mut txn = Transaction::new(1);
        txn.stage_write(5, vec![1], false, || Some(vec![0])).unwrap();
        txn.stage_write(5, vec![2], false, || Some(vec![99])).unwrap();
        assert_eq!(txn.stashed().get(&5), Some(&Some(vec![0])));
    }

    #[test]
    fn rejects_operations_after_commit() {
        let mut txn = Transaction::new(1);
        txn.mark_committed();
        let err = txn.stage_write(1, vec![], false, || None).unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Busy);
    }
}
