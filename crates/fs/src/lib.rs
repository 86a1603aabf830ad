//! File-system layer: [`storefs::StoreFs`] turns any
//! [`vfscore_store::Store`] into a hierarchical file system, [`mixins`]
//! bridges sync/async backends and serializes multi-step operations per
//! path, and [`cow::CopyOnWriteFs`] layers a writable store over a
//! read-only one.

pub mod cow;
pub mod mixins;
pub mod storefs;

pub use cow::{CopyOnWriteFs, DELETION_LOG_PATH};
pub use mixins::{AsyncMixin, Mutexed, PathGuard, Ready, SyncMixin};
pub use storefs::{CreateOpts, HandleTracker, NoOpenHandles, StoreFs, TouchOpts};
