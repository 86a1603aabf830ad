//! The top-level orchestrator: ties the mount table, context tree, symlink
//! resolution, permission checks, and handle lifecycle into the single
//! `open`/`read`/`write`/... surface a caller uses.

use vfscore_path as path;
use vfscore_store::Inode;

use crate::constants::{O_CREAT, O_DIRECTORY, O_EXCL, O_TRUNC};
use crate::context::{Context, ContextArena, ContextId};
use crate::handle::{Fd, Handle};
use crate::mount::{Backend, MountTable};
use crate::permissions::{check_permission, AccessMode, Credentials};
use crate::symlink::{ResolveOptions, ResolvedPath, SymlinkResolver, SymlinkTarget};
use crate::watcher::{EventType, PathWatchers, StatWatchers};
use vfscore_errno::{Result, VfsError};
use vfscore_fs::CreateOpts;

/// Ties mounts, contexts, and watchers together behind one call surface.
/// Access checks are globally toggleable, matching the host corpus's test
/// harnesses that disable permission enforcement.
pub struct Vfs {
    mounts: MountTable,
    contexts: ContextArena,
    root_context: ContextId,
    path_watchers: PathWatchers,
    stat_watchers: StatWatchers,
    access_checks_enabled: bool,
}

impl Vfs {
    pub fn new() -> Self {
        let mut contexts = ContextArena::new();
        let root_context = contexts.create_root(Credentials::root());
        Vfs {
            mounts: MountTable::new(),
            contexts,
            root_context,
            path_watchers: PathWatchers::new(),
            stat_watchers: StatWatchers::new(),
            access_checks_enabled: true,
        }
    }

    pub fn root_context(&self) -> ContextId {
        self.root_context
    }

    pub fn set_access_checks_enabled(&mut self, enabled: bool) {
        self.access_checks_enabled = enabled;
    }

    pub fn fork_context(&mut self, parent: ContextId) -> Result<ContextId> {
        self.contexts.create_child(parent)
    }

    pub fn context(&self, ctx: ContextId) -> Result<&Context> {
        self.contexts.get(ctx)
    }

    pub fn mount(&mut self, path: &str, backend: Box<dyn Backend>) -> Result<()> {
        self.mounts.mount(path, backend)
    }

    pub fn unmount(&mut self, path: &str) -> Result<()> {
        self.mounts.unmount(path)
    }

    pub fn chroot(&mut self, ctx: ContextId, new_root: &str) -> Result<()> {
        let resolved = self.resolve_for_read(ctx, new_root, ResolveOptions::default())?;
        self.contexts.get_mut(ctx)?.chroot(&resolved.path);
        Ok(())
    }

    pub fn watch(&mut self, watch_path: &str, recursive: bool) -> u64 {
        self.path_watchers.install(watch_path, recursive)
    }

    pub fn unwatch(&mut self, id: u64) {
        self.path_watchers.remove(id);
    }

    pub fn watch_stat(&mut self, watch_path: &str, interval_ms: u64) -> u64 {
        self.stat_watchers.install(watch_path, interval_ms)
    }

    pub fn unwatch_stat(&mut self, id: u64) {
        self.stat_watchers.remove(id);
    }

    /// Normalize `raw` against a context's view, then clamp it into the
    /// context's (possibly `chroot`ed) root.
    fn view(&self, ctx: ContextId, raw: &str) -> Result<String> {
        let context = self.contexts.get(ctx)?;
        let stripped = path::strip_file_url(raw);
        let absolute = if path::is_absolute(stripped) {
            stripped.to_string()
        } else {
            path::join(&context.pwd, &[stripped])
        };
        Ok(context.clamp(&path::normalize(&absolute)))
    }

    /// Resolve a context-relative path to its final, symlink-free absolute
    /// form, descending component by component so an intermediate symlink
    /// (e.g. `/link` in `/link/file`) is itself resolved before its
    /// remaining path components are walked against its target, rather than
    /// being handed whole to a backend that expects a real directory.
    /// Intermediate components are followed per `opts.follow_symlinks`; the
    /// final component per `opts.follow_final`.
    fn resolve_for_read(&mut self, ctx: ContextId, raw: &str, opts: ResolveOptions) -> Result<ResolvedPath> {
        let initial = self.view(ctx, raw)?;
        let mut resolver = SymlinkResolver::new();
        let mut remaining: Vec<String> = path::components(&initial).into_iter().map(String::from).collect();
        let mut resolved = String::from("/");

        loop {
            if remaining.is_empty() {
                return Ok(ResolvedPath {
                    path: resolved,
                    symlinks_followed: resolver.depth(),
                });
            }
            let component = remaining.remove(0);
            let candidate = path::join(&resolved, &[component.as_str()]);
            let is_final_component = remaining.is_empty();
            let should_follow = if is_final_component { opts.follow_final } else { opts.follow_symlinks };

            let (backend, rel) = self.mounts.resolve(&candidate)?;
            let inode = backend.stat(&rel)?;
            if !inode.is_symlink() || !should_follow {
                resolved = candidate;
                continue;
            }

            resolver.enter("resolve", &candidate)?;
            let target = backend.readlink(&rel)?;
            let target = String::from_utf8_lossy(&target).into_owned();
            let dir = path::dirname(&candidate).unwrap_or("/");
            let target_path = SymlinkTarget::new(&target).resolve(dir);

            let mut target_components: Vec<String> =
                path::components(&target_path).into_iter().map(String::from).collect();
            target_components.append(&mut remaining);
            remaining = target_components;
            resolved = String::from("/");
        }
    }

    fn check_access(&mut self, ctx: ContextId, resolved: &str, mode: AccessMode) -> Result<Inode> {
        let (backend, rel) = self.mounts.resolve(resolved)?;
        let inode = backend.stat(&rel)?;
        if self.access_checks_enabled {
            let creds = self.contexts.get(ctx)?.credentials;
            check_permission(&creds, &inode, mode)?;
        }
        Ok(inode)
    }

    fn notify(&self, syscall: &'static str, resolved_path: &str) {
        if let Some(event) = EventType::for_operation(syscall) {
            let mut p = resolved_path.to_string();
            loop {
                self.path_watchers.notify(&p, event);
                match path::dirname(&p) {
                    Some(parent) if parent != p => p = parent.to_string(),
                    _ => break,
                }
            }
        }
    }

    pub fn stat(&mut self, ctx: ContextId, raw: &str) -> Result<Inode> {
        let resolved = self.resolve_for_read(ctx, raw, ResolveOptions::default())?;
        let inode = self.check_access(ctx, &resolved.path, AccessMode::Exists)?;
        Ok(inode)
    }

    pub fn lstat(&mut self, ctx: ContextId, raw: &str) -> Result<Inode> {
        let resolved = self.resolve_for_read(ctx, raw, ResolveOptions::no_follow_final())?;
        self.check_access(ctx, &resolved.path, AccessMode::Exists)
    }

    pub fn readlink(&mut self, ctx: ContextId, raw: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve_for_read(ctx, raw, ResolveOptions::no_follow_final())?;
        let (backend, rel) = self.mounts.resolve(&resolved.path)?;
        backend.readlink(&rel)
    }

    pub fn mkdir(&mut self, ctx: ContextId, raw: &str, mode: u32) -> Result<Inode> {
        let target = self.view(ctx, raw)?;
        self.mkdir_at(ctx, &target, mode)
    }

    /// `mkdir` against an already-clamped absolute path, skipping
    /// `view()`'s re-resolution — used by [`Vfs::mkdir_recursive`] to create
    /// each ancestor in turn without nesting them under the context root a
    /// second time.
    fn mkdir_at(&mut self, ctx: ContextId, target: &str, mode: u32) -> Result<Inode> {
        let creds = self.contexts.get(ctx)?.credentials;
        if let Some(parent) = path::dirname(target) {
            self.check_access(ctx, parent, AccessMode::Write)?;
        }
        let (backend, rel) = self.mounts.resolve(target)?;
        let inode = backend.mkdir(
            &rel,
            CreateOpts {
                mode,
                uid: creds.euid,
                gid: creds.egid,
            },
        )?;
        self.notify("mkdir", target);
        Ok(inode)
    }

    /// Create every missing ancestor of `raw` with `mode`, then `raw`
    /// itself, each as its own `mkdir` call (so access checks and watcher
    /// notifications fire per directory, same as a manual recursive mkdir).
    /// Idempotent: returns the resolved absolute path of the topmost
    /// directory actually created, or `None` if everything already existed.
    pub fn mkdir_recursive(&mut self, ctx: ContextId, raw: &str, mode: u32) -> Result<Option<String>> {
        let target = self.view(ctx, raw)?;
        let mut first_created: Option<String> = None;
        let mut built = String::new();
        for component in path::components(&target) {
            built.push('/');
            built.push_str(component);
            match self.mkdir_at(ctx, &built, mode) {
                Ok(_) => {
                    if first_created.is_none() {
                        first_created = Some(built.clone());
                    }
                }
                Err(e) if e.code == vfscore_errno::ErrorCode::Exists => {}
                Err(e) => return Err(e),
            }
        }
        Ok(first_created)
    }

    pub fn create_file(&mut self, ctx: ContextId, raw: &str, mode: u32) -> Result<Inode> {
        let target = self.view(ctx, raw)?;
        let creds = self.contexts.get(ctx)?.credentials;
        if let Some(parent) = path::dirname(&target) {
            self.check_access(ctx, parent, AccessMode::Write)?;
        }
        let (backend, rel) = self.mounts.resolve(&target)?;
        let inode = backend.create_file(
            &rel,
            CreateOpts {
                mode,
                uid: creds.euid,
                gid: creds.egid,
            },
        )?;
        self.notify("createFile", &target);
        Ok(inode)
    }

    pub fn unlink(&mut self, ctx: ContextId, raw: &str) -> Result<()> {
        let target = self.view(ctx, raw)?;
        if let Some(parent) = path::dirname(&target) {
            self.check_access(ctx, parent, AccessMode::Write)?;
        }
        let (backend, rel) = self.mounts.resolve(&target)?;
        backend.unlink(&rel)?;
        self.notify("unlink", &target);
        Ok(())
    }

    pub fn rmdir(&mut self, ctx: ContextId, raw: &str) -> Result<()> {
        let target = self.view(ctx, raw)?;
        let (backend, rel) = self.mounts.resolve(&target)?;
        backend.rmdir(&rel)?;
        self.notify("rmdir", &target);
        Ok(())
    }

    pub fn rename(&mut self, ctx: ContextId, old: &str, new: &str) -> Result<()> {
        let old_target = self.view(ctx, old)?;
        let new_target = self.view(ctx, new)?;
        if self.mounts.owning_mount(&old_target)? != self.mounts.owning_mount(&new_target)? {
            return Err(VfsError::cross_device("rename", old_target).with_dest(new_target));
        }
        let (_, new_rel) = self.mounts.resolve(&new_target)?;
        let (backend, old_rel) = self.mounts.resolve(&old_target)?;
        backend.rename(&old_rel, &new_rel)?;
        self.notify("rename", &old_target);
        self.notify("rename", &new_target);
        Ok(())
    }

    pub fn link(&mut self, ctx: ContextId, src: &str, dst: &str) -> Result<()> {
        let src_target = self.view(ctx, src)?;
        let dst_target = self.view(ctx, dst)?;
        let (backend, src_rel) = self.mounts.resolve(&src_target)?;
        let (_, dst_rel) = self.mounts.resolve(&dst_target)?;
        backend.link(&src_rel, &dst_rel)?;
        self.notify("rename", &dst_target);
        Ok(())
    }

    pub fn symlink(&mut self, ctx: ContextId, raw: &str, target: &str) -> Result<Inode> {
        let at = self.view(ctx, raw)?;
        let creds = self.contexts.get(ctx)?.credentials;
        let (backend, rel) = self.mounts.resolve(&at)?;
        let inode = backend.symlink(
            &rel,
            target,
            CreateOpts {
                mode: 0o777,
                uid: creds.euid,
                gid: creds.egid,
            },
        )?;
        self.notify("createFile", &at);
        Ok(inode)
    }

    pub fn readdir(&mut self, ctx: ContextId, raw: &str) -> Result<Vec<String>> {
        let resolved = self.resolve_for_read(ctx, raw, ResolveOptions::default())?;
        self.check_access(ctx, &resolved.path, AccessMode::Read)?;
        let (backend, rel) = self.mounts.resolve(&resolved.path)?;
        backend.readdir(&rel)
    }

    /// Opens a path, returning an allocated `Fd` bound into `ctx`'s
    /// descriptor table.
    pub fn open(&mut self, ctx: ContextId, raw: &str, flags: u32, mode: u32) -> Result<Fd> {
        let resolved = self.resolve_for_read(ctx, raw, ResolveOptions::default());
        let (resolved_path, existed) = match resolved {
            Ok(r) => (r.path, true),
            Err(e) if e.code == vfscore_errno::ErrorCode::NotFound && flags & O_CREAT != 0 => {
                (self.view(ctx, raw)?, false)
            }
            Err(e) => return Err(e),
        };

        if existed && flags & O_EXCL != 0 && flags & O_CREAT != 0 {
            return Err(VfsError::exists("open", resolved_path));
        }

        let inode = if existed {
            let access = if flags & 0b11 == crate::constants::O_WRONLY {
                AccessMode::Write
            } else if flags & 0b11 == crate::constants::O_RDWR {
                AccessMode::ReadWrite
            } else {
                AccessMode::Read
            };
            let inode = self.check_access(ctx, &resolved_path, access)?;
            if flags & O_DIRECTORY != 0 && !inode.is_dir() {
                return Err(VfsError::not_dir("open", resolved_path));
            }
            inode
        } else {
            self.create_file(ctx, &resolved_path, mode)?
        };

        if flags & O_TRUNC != 0 && existed && inode.is_file() {
            let (backend, rel) = self.mounts.resolve(&resolved_path)?;
            backend.truncate(&rel, 0)?;
            self.notify("write", &resolved_path);
        }

        let stats_snapshot = {
            let (backend, rel) = self.mounts.resolve(&resolved_path)?;
            backend.stat(&rel)?
        };
        let handle = Handle::new(raw.to_string(), resolved_path, flags, stats_snapshot);
        let context = self.contexts.get_mut(ctx)?;
        let fd = context.alloc_fd();
        context.descriptors.insert(fd, handle);
        Ok(fd)
    }

    fn handle(&self, ctx: ContextId, fd: Fd) -> Result<&Handle> {
        self.contexts
            .get(ctx)?
            .descriptors
            .get(&fd)
            .ok_or_else(|| VfsError::bad_fd("fd", fd.to_string()))
    }

    pub fn read(&mut self, ctx: ContextId, fd: Fd, length: u64, pos: Option<u64>) -> Result<Vec<u8>> {
        let resolved_path;
        let at;
        {
            let handle = self.contexts.get_mut(ctx)?.descriptors.get_mut(&fd).ok_or_else(|| VfsError::bad_fd("read", fd.to_string()))?;
            handle.require_read("read")?;
            at = handle.seek_for(pos, 0);
            resolved_path = handle.resolved_path.clone();
        }
        let (backend, rel) = self.mounts.resolve(&resolved_path)?;
        let bytes = backend.read(&rel, at, length)?;
        if pos.is_none() {
            if let Some(handle) = self.contexts.get_mut(ctx)?.descriptors.get_mut(&fd) {
                handle.position = at + bytes.len() as u64;
            }
        }
        Ok(bytes)
    }

    pub fn write(&mut self, ctx: ContextId, fd: Fd, buf: &[u8], pos: Option<u64>) -> Result<u64> {
        let resolved_path;
        let at;
        {
            let handle = self.contexts.get_mut(ctx)?.descriptors.get_mut(&fd).ok_or_else(|| VfsError::bad_fd("write", fd.to_string()))?;
            handle.require_write("write")?;
            let append = handle.mode().append;
            at = if append {
                None // forces the backend write below to target end-of-file each time
            } else {
                Some(handle.seek_for(pos, buf.len() as u64))
            };
            resolved_path = handle.resolved_path.clone();
        }
        let (backend, rel) = self.mounts.resolve(&resolved_path)?;
        let offset = match at {
            Some(o) => o,
            None => backend.stat(&rel)?.size,
        };
        let written = backend.write(&rel, offset, buf)?;
        if let Some(handle) = self.contexts.get_mut(ctx)?.descriptors.get_mut(&fd) {
            if handle.mode().append || pos.is_none() {
                handle.position = offset + written;
            }
        }
        self.notify("write", &resolved_path);
        Ok(written)
    }

    pub fn truncate_fd(&mut self, ctx: ContextId, fd: Fd, len: u64) -> Result<()> {
        let resolved_path = self.handle(ctx, fd)?.resolved_path.clone();
        let (backend, rel) = self.mounts.resolve(&resolved_path)?;
        backend.truncate(&rel, len)?;
        self.notify("write", &resolved_path);
        Ok(())
    }

    pub fn close(&mut self, ctx: ContextId, fd: Fd) -> Result<()> {
        self.contexts
            .get_mut(ctx)?
            .descriptors
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| VfsError::bad_fd("close", fd.to_string()))
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{O_CREAT, O_RDONLY, O_RDWR, O_WRONLY};
    use vfscore_fs::StoreFs;
    use vfscore_store::InMemoryStore;

    fn new_vfs() -> (Vfs, ContextId) {
        let mut vfs = Vfs::new();
        let backend: Box<dyn Backend> = Box::new(StoreFs::new(InMemoryStore::new()).unwrap());
        vfs.mount("/", backend).unwrap();
        let ctx = vfs.root_context();
        (vfs, ctx)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut vfs, ctx) = new_vfs();
        let fd = vfs.open(ctx, "/x.txt", O_CREAT | O_WRONLY, 0o644).unwrap();
        vfs.write(ctx, fd, b"xyz\n", None).unwrap();
        vfs.close(ctx, fd).unwrap();

        let fd = vfs.open(ctx, "/x.txt", O_RDONLY, 0).unwrap();
        let bytes = vfs.read(ctx, fd, 4, None).unwrap();
        assert_eq!(bytes, b"xyz\n");
        assert_eq!(vfs.stat(ctx, "/x.txt").unwrap().size, 4);
    }

    #[test]
    fn open_o_excl_o_creat_fails_on_existing_path() {
        let (mut vfs, ctx) = new_vfs();
        vfs.create_file(ctx, "/f", 0o644).unwrap();
        let err = vfs
            .open(ctx, "/f", O_CREAT | crate::constants::O_EXCL | O_WRONLY, 0o644)
            .unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Exists);
    }

    #[test]
    fn reading_past_eof_returns_zero_bytes() {
        let (mut vfs, ctx) = new_vfs();
        vfs.create_file(ctx, "/f", 0o644).unwrap();
        let fd = vfs.open(ctx, "/f", O_RDONLY, 0).unwrap();
        let bytes = vfs.read(ctx, fd, 10, Some(1000)).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn chroot_clamps_reads_outside_the_new_root() {
        let (mut vfs, ctx) = new_vfs();
        vfs.mkdir(ctx, "/ctx", 0o755).unwrap();
        vfs.create_file(ctx, "/ctx/inside", 0o644).unwrap();
        vfs.create_file(ctx, "/outside", 0o644).unwrap();

        let child = vfs.fork_context(ctx).unwrap();
        vfs.chroot(child, "/ctx").unwrap();

        let names = vfs.readdir(child, "/../../../").unwrap();
        assert_eq!(names, vec!["inside".to_string()]);
    }

    #[test]
    fn append_mode_always_writes_past_current_end() {
        let (mut vfs, ctx) = new_vfs();
        let fd = vfs.open(ctx, "/log", O_CREAT | O_RDWR, 0o644).unwrap();
        vfs.write(ctx, fd, b"a", None).unwrap();
        vfs.close(ctx, fd).unwrap();

        let fd = vfs
            .open(ctx, "/log", crate::constants::O_APPEND | O_WRONLY, 0)
            .unwrap();
        vfs.write(ctx, fd, b"b", None).unwrap();
        vfs.close(ctx, fd).unwrap();

        let fd = vfs.open(ctx, "/log", O_RDONLY, 0).unwrap();
        assert_eq!(vfs.read(ctx, fd, 2, None).unwrap(), b"ab");
    }

    #[test]
    fn an_intermediate_symlink_component_resolves_through_to_its_target() {
        let (mut vfs, ctx) = new_vfs();
        vfs.mkdir(ctx, "/dir", 0o755).unwrap();
        vfs.create_file(ctx, "/dir/file", 0o644).unwrap();
        vfs.symlink(ctx, "/link", "/dir").unwrap();

        let inode = vfs.stat(ctx, "/link/file").unwrap();
        assert!(inode.is_file());
    }

    #[test]
    fn mkdir_recursive_creates_intermediates_under_a_chrooted_context() {
        let (mut vfs, ctx) = new_vfs();
        vfs.mkdir(ctx, "/ctx", 0o755).unwrap();
        let child = vfs.fork_context(ctx).unwrap();
        vfs.chroot(child, "/ctx").unwrap();

        let created = vfs.mkdir_recursive(child, "/a/b/c", 0o755).unwrap();
        assert_eq!(created.as_deref(), Some("/ctx/a"));
        assert!(vfs.stat(child, "/a/b/c").unwrap().is_dir());
        assert_eq!(vfs.mkdir_recursive(child, "/a/b/c", 0o700).unwrap(), None);
        assert_eq!(vfs.stat(child, "/a").unwrap().permission_bits(), 0o755);
    }
}
