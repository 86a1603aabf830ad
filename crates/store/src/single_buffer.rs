//! SingleBuffer store: a self-describing, checksummed [`crate::Store`] inside
//! one contiguous byte buffer.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [0]      SuperBlock          (512 B)
//! [512]    MetadataBlock A     (4096 B)  -- initial primary
//! [4608]   MetadataBlock B     (4096 B)  -- initial backup
//! [8704..] data arena: file bytes and, as the store evolves, further
//!          chained MetadataBlocks (one per commit), bump-allocated
//! ```
//!
//! Checksums are CRC32C (Castagnoli) over the block body, excluding the
//! leading 4-byte checksum word itself — the same exclusion discipline a
//! node checksum in a Copy-on-Write tree format uses, just applied to a
//! flatter, non-tree metadata block.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use slog::{debug, o, warn};
use vfscore_errno::{Result, VfsError};

use crate::store::{Store, Usage};
use crate::transaction::{PendingOp, Transaction};

pub const SB_MAGIC: u32 = 0x7a2e_7362;
pub const SUPERBLOCK_SIZE: usize = 512;
pub const METADATA_BLOCK_SIZE: usize = 4096;
pub const METADATA_HEADER_SIZE: usize = 32;
pub const METADATA_ENTRY_SIZE: usize = 16;
pub const METADATA_ENTRY_COUNT: usize = (METADATA_BLOCK_SIZE - METADATA_HEADER_SIZE) / METADATA_ENTRY_SIZE;

const _: () = assert!(METADATA_ENTRY_COUNT == 254);
const _: () = assert!(
    METADATA_HEADER_SIZE + METADATA_ENTRY_COUNT * METADATA_ENTRY_SIZE == METADATA_BLOCK_SIZE
);

const DATA_START: u64 = (SUPERBLOCK_SIZE + 2 * METADATA_BLOCK_SIZE) as u64;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn crc32c_of(body: &[u8]) -> u32 {
    crc32c::crc32c(body)
}

#[derive(Debug, Clone)]
struct SuperBlock {
    magic: u32,
    format_version: u16,
    inode_version: u16,
    generation: u32,
    flags: u32,
    used_bytes: u64,
    total_bytes: u64,
    fs_id: u128,
    metadata_block_size: u32,
    metadata_offset: u32,
    backup_metadata_offset: u32,
    label: [u8; 64],
}

impl SuperBlock {
    fn fresh(total_bytes: u64, metadata_offset: u32, backup_metadata_offset: u32) -> Self {
        let mut fs_id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut fs_id_bytes);
        SuperBlock {
            magic: SB_MAGIC,
            format_version: 1,
            inode_version: 1,
            generation: 0,
            flags: 0,
            used_bytes: 0,
            total_bytes,
            fs_id: u128::from_le_bytes(fs_id_bytes),
            metadata_block_size: METADATA_BLOCK_SIZE as u32,
            metadata_offset,
            backup_metadata_offset,
            label: [0u8; 64],
        }
    }

    fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0u8; SUPERBLOCK_SIZE];
        // out[0..4] is the checksum, filled in by `with_checksum`.
        out[4..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..10].copy_from_slice(&self.format_version.to_le_bytes());
        out[10..12].copy_from_slice(&self.inode_version.to_le_bytes());
        out[12..16].copy_from_slice(&self.generation.to_le_bytes());
        out[16..20].copy_from_slice(&self.flags.to_le_bytes());
        out[20..28].copy_from_slice(&self.used_bytes.to_le_bytes());
        out[28..36].copy_from_slice(&self.total_bytes.to_le_bytes());
        out[36..52].copy_from_slice(&self.fs_id.to_le_bytes());
        out[52..56].copy_from_slice(&self.metadata_block_size.to_le_bytes());
        out[56..60].copy_from_slice(&self.metadata_offset.to_le_bytes());
        out[60..64].copy_from_slice(&0u32.to_le_bytes());
        out[64..68].copy_from_slice(&self.backup_metadata_offset.to_le_bytes());
        out[68..72].copy_from_slice(&0u32.to_le_bytes());
        out[72..136].copy_from_slice(&self.label);
        out
    }

    fn checksum(&self) -> u32 {
        crc32c_of(&self.to_bytes()[4..])
    }

    fn with_checksum(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut bytes = self.to_bytes();
        let checksum = crc32c_of(&bytes[4..]);
        bytes[0..4].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<(Self, u32)> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return None;
        }
        let stored_checksum = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let magic = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let format_version = u16::from_le_bytes(bytes[8..10].try_into().ok()?);
        let inode_version = u16::from_le_bytes(bytes[10..12].try_into().ok()?);
        let generation = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        let flags = u32::from_le_bytes(bytes[16..20].try_into().ok()?);
        let used_bytes = u64::from_le_bytes(bytes[20..28].try_into().ok()?);
        let total_bytes = u64::from_le_bytes(bytes[28..36].try_into().ok()?);
        let fs_id = u128::from_le_bytes(bytes[36..52].try_into().ok()?);
        let metadata_block_size = u32::from_le_bytes(bytes[52..56].try_into().ok()?);
        let metadata_offset = u32::from_le_bytes(bytes[56..60].try_into().ok()?);
        let backup_metadata_offset = u32::from_le_bytes(bytes[64..68].try_into().ok()?);
        let mut label = [0u8; 64];
        label.copy_from_slice(&bytes[72..136]);
        let sb = SuperBlock {
            magic,
            format_version,
            inode_version,
            generation,
            flags,
            used_bytes,
            total_bytes,
            fs_id,
            metadata_block_size,
            metadata_offset,
            backup_metadata_offset,
            label,
        };
        Some((sb, stored_checksum))
    }

    fn is_valid(bytes: &[u8]) -> bool {
        match SuperBlock::from_bytes(bytes) {
            Some((sb, stored)) => sb.magic == SB_MAGIC && sb.checksum() == stored,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MetadataEntry {
    id: u32,
    offset: u32,
    size: u32,
}

impl MetadataEntry {
    const SIZE: usize = METADATA_ENTRY_SIZE;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&0u32.to_le_bytes()); // reserved_offset
        out[8..12].copy_from_slice(&self.offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        MetadataEntry {
            id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            offset: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        }
    }

    fn is_tombstone(self) -> bool {
        self.offset == 0 && self.size == 0
    }
}

struct MetadataBlock {
    generation: u32,
    timestamp_ms: u64,
    previous_offset: u32,
    entries: Vec<MetadataEntry>,
}

impl MetadataBlock {
    fn to_bytes(&self) -> [u8; METADATA_BLOCK_SIZE] {
        let mut out = [0u8; METADATA_BLOCK_SIZE];
        out[4..8].copy_from_slice(&self.generation.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out[16..20].copy_from_slice(&self.previous_offset.to_le_bytes());
        out[20..24].copy_from_slice(&0u32.to_le_bytes()); // previous_offset reserved
        out[24..28].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        // out[28..32] padding
        for (i, entry) in self.entries.iter().enumerate() {
            let start = METADATA_HEADER_SIZE + i * MetadataEntry::SIZE;
            out[start..start + MetadataEntry::SIZE].copy_from_slice(&entry.to_bytes());
        }
        let checksum = crc32c_of(&out[4..]);
        out[0..4].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < METADATA_BLOCK_SIZE {
            return None;
        }
        let stored_checksum = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let checksum = crc32c_of(&bytes[4..]);
        if checksum != stored_checksum {
            return None;
        }
        let generation = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let timestamp_ms = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let previous_offset = u32::from_le_bytes(bytes[16..20].try_into().ok()?);
        let entry_count = u32::from_le_bytes(bytes[24..28].try_into().ok()?) as usize;
        let entry_count = entry_count.min(METADATA_ENTRY_COUNT);
        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let start = METADATA_HEADER_SIZE + i * MetadataEntry::SIZE;
            entries.push(MetadataEntry::from_bytes(&bytes[start..start + MetadataEntry::SIZE]));
        }
        Some(MetadataBlock {
            generation,
            timestamp_ms,
            previous_offset,
            entries,
        })
    }
}

/// A [`Store`] backed by one fixed-size, shareable byte buffer.
///
/// Clone the `Arc<Mutex<Vec<u8>>>` to mount a second instance over the same
/// bytes (e.g. across threads); each instance reloads its index from the
/// buffer's superblock at the start of every transaction, so commits made by
/// one instance become visible to another after its next `begin()`.
pub struct SingleBufferStore {
    buffer: Arc<Mutex<Vec<u8>>>,
    index: HashMap<u32, (u32, u32)>,
    generation: u32,
    metadata_offset: u32,
    backup_metadata_offset: u32,
    next_free_offset: u64,
    total_bytes: u64,
    txn_active: bool,
    next_txn_id: u64,
    log: slog::Logger,
}

impl SingleBufferStore {
    /// Open (formatting if necessary) a store over a shared buffer.
    pub fn open(buffer: Arc<Mutex<Vec<u8>>>) -> Result<Self> {
        let total_bytes = {
            let guard = buffer.lock().expect("buffer mutex poisoned");
            guard.len() as u64
        };
        if total_bytes < (SUPERBLOCK_SIZE + METADATA_BLOCK_SIZE) as u64 {
            return Err(VfsError::invalid("single_buffer.open", "<buffer>")
                .with_message("buffer smaller than superblock + one metadata block"));
        }

        let mut store = SingleBufferStore {
            buffer,
            index: HashMap::new(),
            generation: 0,
            metadata_offset: SUPERBLOCK_SIZE as u32,
            backup_metadata_offset: (SUPERBLOCK_SIZE + METADATA_BLOCK_SIZE) as u32,
            next_free_offset: DATA_START,
            total_bytes,
            txn_active: false,
            next_txn_id: 1,
            log: slog_scope::logger().new(o!("backend" => "single_buffer")),
        };

        let needs_format = {
            let guard = store.buffer.lock().expect("buffer mutex poisoned");
            !SuperBlock::is_valid(&guard[0..SUPERBLOCK_SIZE])
        };
        if needs_format {
            store.format()?;
        } else {
            store.reload()?;
        }
        Ok(store)
    }

    fn format(&mut self) -> Result<()> {
        let metadata_offset = SUPERBLOCK_SIZE as u32;
        let backup_metadata_offset = (SUPERBLOCK_SIZE + METADATA_BLOCK_SIZE) as u32;
        let empty = MetadataBlock {
            generation: 0,
            timestamp_ms: now_ms(),
            previous_offset: 0,
            entries: Vec::new(),
        };
        let block_bytes = empty.to_bytes();
        let sb = SuperBlock::fresh(self.total_bytes, metadata_offset, backup_metadata_offset);
        let sb_bytes = sb.with_checksum();

        let mut guard = self.buffer.lock().expect("buffer mutex poisoned");
        guard[metadata_offset as usize..metadata_offset as usize + METADATA_BLOCK_SIZE]
            .copy_from_slice(&block_bytes);
        guard[backup_metadata_offset as usize..backup_metadata_offset as usize + METADATA_BLOCK_SIZE]
            .copy_from_slice(&block_bytes);
        guard[0..SUPERBLOCK_SIZE].copy_from_slice(&sb_bytes);
        drop(guard);

        self.generation = 0;
        self.metadata_offset = metadata_offset;
        self.backup_metadata_offset = backup_metadata_offset;
        self.next_free_offset = DATA_START;
        self.index.clear();
        debug!(self.log, "formatted fresh buffer"; "total_bytes" => self.total_bytes);
        Ok(())
    }

    /// Re-read the superblock and metadata chain from the shared buffer,
    /// so commits made by another instance sharing this buffer become
    /// visible.
    fn reload(&mut self) -> Result<()> {
        let guard = self.buffer.lock().expect("buffer mutex poisoned");
        let (sb, stored_checksum) = SuperBlock::from_bytes(&guard[0..SUPERBLOCK_SIZE])
            .ok_or_else(|| VfsError::io("single_buffer.reload", "<buffer>"))?;
        if sb.magic != SB_MAGIC || sb.checksum() != stored_checksum {
            return Err(VfsError::io("single_buffer.reload", "<buffer>")
                .with_message("superblock checksum mismatch"));
        }

        let primary = MetadataBlock::from_bytes(
            &guard[sb.metadata_offset as usize..sb.metadata_offset as usize + METADATA_BLOCK_SIZE],
        );
        let (head, head_offset) = match primary {
            Some(block) => (block, sb.metadata_offset),
            None => {
                warn!(self.log, "primary metadata checksum failed, falling back to backup");
                let backup = MetadataBlock::from_bytes(
                    &guard[sb.backup_metadata_offset as usize
                        ..sb.backup_metadata_offset as usize + METADATA_BLOCK_SIZE],
                )
                .ok_or_else(|| {
                    VfsError::io("single_buffer.reload", "<buffer>")
                        .with_message("both primary and backup metadata checksums failed")
                })?;
                (backup, sb.backup_metadata_offset)
            }
        };

        let mut index = HashMap::new();
        let mut resolved: HashSet<u32> = HashSet::new();
        let mut block = head;
        let mut block_offset = head_offset;
        loop {
            for entry in &block.entries {
                if resolved.contains(&entry.id) {
                    continue;
                }
                resolved.insert(entry.id);
                if !entry.is_tombstone() {
                    index.insert(entry.id, (entry.offset, entry.size));
                }
            }
            if block.previous_offset == 0 {
                break;
            }
            block_offset = block.previous_offset;
            block = MetadataBlock::from_bytes(
                &guard[block_offset as usize..block_offset as usize + METADATA_BLOCK_SIZE],
            )
            .ok_or_else(|| {
                VfsError::io("single_buffer.reload", "<buffer>")
                    .with_message("metadata chain checksum failed")
            })?;
        }
        let _ = block_offset;

        // `sb.used_bytes` already accounts for the metadata block each
        // commit bump-allocates above the data it writes; deriving the
        // bump pointer from data-slot extents alone would miss that block
        // and let the next commit overwrite it.
        let next_free_offset = index
            .values()
            .map(|(offset, size)| *offset as u64 + *size as u64)
            .chain(std::iter::once(DATA_START))
            .chain(std::iter::once(sb.used_bytes))
            .max()
            .unwrap_or(DATA_START);

        drop(guard);

        self.generation = sb.generation;
        self.metadata_offset = sb.metadata_offset;
        self.backup_metadata_offset = sb.backup_metadata_offset;
        self.total_bytes = sb.total_bytes;
        self.index = index;
        self.next_free_offset = next_free_offset.max(self.next_free_offset);
        Ok(())
    }

    fn read_slot(&self, id: u32) -> Option<Vec<u8>> {
        let (offset, size) = *self.index.get(&id)?;
        let guard = self.buffer.lock().expect("buffer mutex poisoned");
        Some(guard[offset as usize..offset as usize + size as usize].to_vec())
    }

    fn to_u32_id(id: u64, syscall: &'static str) -> Result<u32> {
        u32::try_from(id).map_err(|_| {
            VfsError::invalid(syscall, format!("id:{id}"))
                .with_message("SingleBuffer ids must fit in 32 bits")
        })
    }
}

impl Store for SingleBufferStore {
    fn begin(&mut self) -> Result<Transaction> {
        if self.txn_active {
            return Err(VfsError::busy("store.begin", "single_buffer"));
        }
        self.reload()?;
        self.txn_active = true;
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        Ok(Transaction::new(id))
    }

    fn get(&self, txn: &mut Transaction, id: u64) -> Result<Option<Vec<u8>>> {
        let id32 = Self::to_u32_id(id, "store.get")?;
        if let Some(op) = txn.pending_get(id32 as u64) {
            return Ok(match op {
                PendingOp::Write { bytes, .. } => Some(bytes.clone()),
                PendingOp::Delete => None,
            });
        }
        let committed = self.read_slot(id32);
        txn.note_read(id32 as u64, || committed.clone());
        Ok(committed)
    }

    fn set(
        &mut self,
        txn: &mut Transaction,
        id: u64,
        bytes: Vec<u8>,
        is_metadata: bool,
    ) -> Result<()> {
        let id32 = Self::to_u32_id(id, "store.set")?;
        let committed = self.read_slot(id32);
        txn.stage_write(id32 as u64, bytes, is_metadata, || committed)
    }

    fn delete(&mut self, txn: &mut Transaction, id: u64) -> Result<()> {
        let id32 = Self::to_u32_id(id, "store.delete")?;
        let committed = self.read_slot(id32);
        txn.stage_delete(id32 as u64, || committed)
    }

    fn keys(&self, txn: &mut Transaction) -> Result<Vec<u64>> {
        let mut keys: std::collections::BTreeSet<u64> =
            self.index.keys().map(|id| *id as u64).collect();
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
        let pending = txn.pending().clone();
        if pending.len() > METADATA_ENTRY_COUNT {
            return Err(VfsError::invalid("store.commit", "single_buffer")
                .with_message("transaction touches more ids than one metadata block holds"));
        }
        if pending.is_empty() {
            txn.mark_committed();
            self.txn_active = false;
            return Ok(());
        }

        let mut new_index = self.index.clone();
        let mut entries = Vec::with_capacity(pending.len());
        let mut bump = self.next_free_offset;
        let mut writes: Vec<(u64, Vec<u8>)> = Vec::new();

        for (id, op) in &pending {
            let id32 = *id as u32;
            match op {
                PendingOp::Write { bytes, .. } => {
                    let len = bytes.len() as u64;
                    let offset = match new_index.get(&id32) {
                        Some((existing_offset, existing_size))
                            if *existing_size as u64 >= len =>
                        {
                            *existing_offset as u64
                        }
                        _ => {
                            let offset = bump;
                            bump += len;
                            offset
                        }
                    };
                    if offset + len > self.total_bytes {
                        return Err(VfsError::no_space("store.commit", "single_buffer"));
                    }
                    entries.push(MetadataEntry {
                        id: id32,
                        offset: offset as u32,
                        size: len as u32,
                    });
                    new_index.insert(id32, (offset as u32, len as u32));
                    writes.push((offset, bytes.clone()));
                }
                PendingOp::Delete => {
                    entries.push(MetadataEntry {
                        id: id32,
                        offset: 0,
                        size: 0,
                    });
                    new_index.remove(&id32);
                }
            }
        }

        let metadata_block = MetadataBlock {
            generation: self.generation + 1,
            timestamp_ms: now_ms(),
            previous_offset: self.metadata_offset,
            entries,
        };
        let metadata_bytes = metadata_block.to_bytes();
        let new_metadata_offset = bump as u32;
        bump += METADATA_BLOCK_SIZE as u64;
        if bump > self.total_bytes {
            return Err(VfsError::no_space("store.commit", "single_buffer"));
        }

        let used_bytes = bump;
        let new_backup_offset = self.metadata_offset;
        let new_generation = self.generation + 1;
        let sb = SuperBlock {
            magic: SB_MAGIC,
            format_version: 1,
            inode_version: 1,
            generation: new_generation,
            flags: 0,
            used_bytes,
            total_bytes: self.total_bytes,
            fs_id: 0, // overwritten below by preserving the existing fs_id
            metadata_block_size: METADATA_BLOCK_SIZE as u32,
            metadata_offset: new_metadata_offset,
            backup_metadata_offset: new_backup_offset,
            label: [0u8; 64],
        };

        {
            let mut guard = self.buffer.lock().expect("buffer mutex poisoned");
            // Preserve fs_id/label across the rewrite.
            let (existing_sb, _) = SuperBlock::from_bytes(&guard[0..SUPERBLOCK_SIZE])
                .ok_or_else(|| VfsError::io("store.commit", "single_buffer"))?;
            let mut sb = sb;
            sb.fs_id = existing_sb.fs_id;
            sb.label = existing_sb.label;

            for (offset, bytes) in &writes {
                let start = *offset as usize;
                guard[start..start + bytes.len()].copy_from_slice(bytes);
            }
            guard[new_metadata_offset as usize..new_metadata_offset as usize + METADATA_BLOCK_SIZE]
                .copy_from_slice(&metadata_bytes);
            guard[0..SUPERBLOCK_SIZE].copy_from_slice(&sb.with_checksum());
        }

        self.index = new_index;
        self.generation = new_generation;
        self.backup_metadata_offset = new_backup_offset;
        self.metadata_offset = new_metadata_offset;
        self.next_free_offset = bump;
        txn.mark_committed();
        self.txn_active = false;
        debug!(self.log, "commit"; "generation" => self.generation, "dirty" => pending.len());
        Ok(())
    }

    fn abort(&mut self, mut txn: Transaction) -> Result<()> {
        txn.mark_aborted();
        self.txn_active = false;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn usage(&self) -> Result<Usage> {
        let free_bytes = self.total_bytes.saturating_sub(self.next_free_offset);
        Ok(Usage {
            total_bytes: self.total_bytes,
            free_bytes,
            total_nodes: METADATA_ENTRY_COUNT as u64,
            free_nodes: METADATA_ENTRY_COUNT.saturating_sub(self.index.len()) as u64,
            block_size: METADATA_BLOCK_SIZE as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(size: usize) -> Arc<Mutex<Vec<u8>>> {
        Arc::new(Mutex::new(vec![0u8; size]))
    }

    #[test]
    fn formats_a_fresh_buffer_and_round_trips() {
        let buf = scratch(1 << 20);
        let mut store = SingleBufferStore::open(buf).unwrap();
        let mut txn = store.begin().unwrap();
        store.set(&mut txn, 1, b"hello".to_vec(), false).unwrap();
        store.commit(txn).unwrap();

        let mut txn = store.begin().unwrap();
        assert_eq!(store.get(&mut txn, 1).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn two_instances_over_the_same_buffer_agree_after_sync() {
        let buf = scratch(1 << 20);
        let mut store_a = SingleBufferStore::open(buf.clone()).unwrap();
        let mut txn = store_a.begin().unwrap();
        store_a
            .set(&mut txn, 42, b"example-bytes-0123456789".to_vec(), false)
            .unwrap();
        store_a.commit(txn).unwrap();

        let mut store_b = SingleBufferStore::open(buf).unwrap();
        let mut txn_b = store_b.begin().unwrap();
        assert_eq!(
            store_b.get(&mut txn_b, 42).unwrap(),
            Some(b"example-bytes-0123456789".to_vec())
        );
    }

    #[test]
    fn delete_removes_id_from_a_fresh_reload() {
        let buf = scratch(1 << 20);
        let mut store = SingleBufferStore::open(buf.clone()).unwrap();
        let mut txn = store.begin().unwrap();
        store.set(&mut txn, 1, vec![1, 2, 3], false).unwrap();
        store.commit(txn).unwrap();

        let mut txn = store.begin().unwrap();
        store.delete(&mut txn, 1).unwrap();
        store.commit(txn).unwrap();

        let mut reopened = SingleBufferStore::open(buf).unwrap();
        let mut txn = reopened.begin().unwrap();
        assert_eq!(reopened.get(&mut txn, 1).unwrap(), None);
    }

    #[test]
    fn rejects_a_buffer_too_small_to_hold_one_metadata_block() {
        let buf = scratch(128);
        let err = SingleBufferStore::open(buf).unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Invalid);
    }

    #[test]
    fn single_byte_corruption_of_the_superblock_is_rejected() {
        let buf = scratch(1 << 20);
        {
            let mut store = SingleBufferStore::open(buf.clone()).unwrap();
            let mut txn = store.begin().unwrap();
            store.set(&mut txn, 1, vec![1, 2, 3], false).unwrap();
            store.commit(txn).unwrap();
        }
        {
            let mut guard = buf.lock().unwrap();
            guard[40] ^= 0xFF; // inside the superblock body, after the checksum word
        }
        let err = SingleBufferStore::open(buf).unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Io);
    }
}
