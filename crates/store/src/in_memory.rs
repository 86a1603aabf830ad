//! Map-backed [`Store`]. No persistence; `sync` is a no-op.

use std::collections::HashMap;

use slog::{debug, o};
use vfscore_errno::{Result, VfsError};

use crate::store::{Store, Usage};
use crate::transaction::{PendingOp, Transaction};

/// Virtual capacity reported by [`InMemoryStore::usage`] — large enough
/// that callers never hit `ENOSPC` against an in-memory backend in practice.
const VIRTUAL_TOTAL_BYTES: u64 = 1 << 40;

pub struct InMemoryStore {
    data: HashMap<u64, Vec<u8>>,
    next_txn_id: u64,
    txn_active: bool,
    log: slog::Logger,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            data: HashMap::new(),
            next_txn_id: 1,
            txn_active: false,
            log: slog_scope::logger().new(o!("backend" => "in_memory")),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    fn begin(&mut self) -> Result<Transaction> {
        if self.txn_active {
            return Err(VfsError::busy("store.begin", "in_memory"));
        }
        self.txn_active = true;
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        debug!(self.log, "begin"; "txn" => id);
        Ok(Transaction::new(id))
    }

    fn get(&self, txn: &mut Transaction, id: u64) -> Result<Option<Vec<u8>>> {
        if let Some(op) = txn.pending_get(id) {
            return Ok(match op {
                PendingOp::Write { bytes, .. } => Some(bytes.clone()),
                PendingOp::Delete => None,
            });
        }
        let committed = self.data.get(&id).cloned();
        txn.note_read(id, || committed.clone());
        Ok(committed)
    }

    fn set(
        &mut self,
        txn: &mut Transaction,
        id: u64,
        bytes: Vec<u8>,
        is_metadata: bool,
    ) -> Result<()> {
        let committed = self.data.get(&id).cloned();
        txn.stage_write(id, bytes, is_metadata, || committed)
    }

    fn delete(&mut self, txn: &mut Transaction, id: u64) -> Result<()> {
        let committed = self.data.get(&id).cloned();
        txn.stage_delete(id, || committed)
    }

    fn keys(&self, txn: &mut Transaction) -> Result<Vec<u64>> {
        let mut keys: std::collections::BTreeSet<u64> = self.data.keys().copied().collect();
        for (id, op) in txn.pending() {
            match op {
                PendingOp::Write { .. } => {
                    keys.insert(*id);
                }
                PendingOp::Delete => {
                    keys.remove(id);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn commit(&mut self, mut txn: Transaction) -> Result<()> {
        for (id, op) in txn.pending().clone() {
            match op {
                PendingOp::Write { bytes, .. } => {
                    self.data.insert(id, bytes);
                }
                PendingOp::Delete => {
                    self.data.remove(&id);
                }
            }
        }
        txn.mark_committed();
        self.txn_active = false;
        debug!(self.log, "commit"; "txn" => txn.id);
        Ok(())
    }

    fn abort(&mut self, mut txn: Transaction) -> Result<()> {
        txn.mark_aborted();
        self.txn_active = false;
        debug!(self.log, "abort"; "txn" => txn.id);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn usage(&self) -> Result<Usage> {
        let used: u64 = self.data.values().map(|v| v.len() as u64).sum();
        Ok(Usage {
            total_bytes: VIRTUAL_TOTAL_BYTES,
            free_bytes: VIRTUAL_TOTAL_BYTES.saturating_sub(used),
            total_nodes: u64::MAX,
            free_nodes: u64::MAX - self.data.len() as u64,
            block_size: 4096,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_commit() {
        let mut store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        store.set(&mut txn, 1, vec![1, 2, 3], false).unwrap();
        assert_eq!(store.get(&mut txn, 1).unwrap(), Some(vec![1, 2, 3]));
        store.commit(txn).unwrap();

        let mut txn2 = store.begin().unwrap();
        assert_eq!(store.get(&mut txn2, 1).unwrap(), Some(vec![1, 2, 3]));
        store.abort(txn2).unwrap();
    }

    #[test]
    fn abort_never_makes_writes_visible() {
        let mut store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        store.set(&mut txn, 1, vec![9], false).unwrap();
        store.abort(txn).unwrap();

        let mut txn2 = store.begin().unwrap();
        assert_eq!(store.get(&mut txn2, 1).unwrap(), None);
        store.abort(txn2).unwrap();
    }

    #[test]
    fn only_one_live_transaction() {
        let mut store = InMemoryStore::new();
        let _txn = store.begin().unwrap();
        let err = store.begin().unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Busy);
    }

    #[test]
    fn delete_removes_committed_key() {
        let mut store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        store.set(&mut txn, 1, vec![1], false).unwrap();
        store.commit(txn).unwrap();

        let mut txn = store.begin().unwrap();
        store.delete(&mut txn, 1).unwrap();
        store.commit(txn).unwrap();

        let mut txn = store.begin().unwrap();
        assert_eq!(store.get(&mut txn, 1).unwrap(), None);
        store.abort(txn).unwrap();
    }
}
