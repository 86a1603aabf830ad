//! The VFS layer: mount table, context tree, symlink resolution,
//! permissions/ACL, open handles, watchers, and the [`Vfs`] orchestrator
//! that ties them together above the [`vfscore_fs`] backends.

pub mod constants;
pub mod context;
pub mod handle;
pub mod mount;
pub mod permissions;
pub mod symlink;
pub mod vfs;
pub mod watcher;

pub use context::{Context, ContextArena, ContextId};
pub use handle::{FileMode, Handle, Fd};
pub use mount::{Backend, MountPoint, MountTable, MAX_MOUNTS};
pub use permissions::{AccessMode, AclEntry, Credentials};
pub use symlink::{ResolveOptions, ResolvedPath, SymlinkResolver, SymlinkTarget, MAX_SYMLINK_DEPTH};
pub use vfs::Vfs;
pub use watcher::{EventType, PathWatchers, StatWatchers};
