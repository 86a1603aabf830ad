//! Root aggregator crate: re-exports the path, error, store, fs, and vfs
//! layers, plus the logging setup and layered configuration that tie a
//! standalone embedding of this crate together.

pub mod config;
pub mod logging;

pub use vfscore_errno::{ErrorCode, Frame, Result, ResultExt, VfsError};
pub use vfscore_fs::{AsyncMixin, CopyOnWriteFs, CreateOpts, Mutexed, StoreFs, SyncMixin, TouchOpts};
pub use vfscore_path as path;
pub use vfscore_store::{InMemoryStore, Inode, SingleBufferStore, Store, Transaction};
pub use vfscore_vfs::{Context, ContextArena, ContextId, Credentials, Fd, Handle, MountTable, Vfs};

pub use config::{StoreConfig, VfsConfig};
