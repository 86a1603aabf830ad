//! Context tree: an arena of contexts with parent/child back-edges
//! represented as stable indices rather than owning references, so the
//! tree can't form a reference cycle.

use std::collections::HashMap;

use vfscore_errno::{Result, VfsError};
use vfscore_path as path;

use crate::handle::{Fd, Handle};
use crate::permissions::Credentials;

/// Stable index into a [`ContextArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

/// An isolated view: its own root, pwd, credentials, and open descriptors.
/// Mounts are shared across the whole arena (owned by the enclosing
/// `Vfs`), matching "contexts inherit ... mounts unless overridden" for
/// the common case; a context may still be `chroot`ed independently.
pub struct Context {
    pub root: String,
    pub pwd: String,
    pub credentials: Credentials,
    pub descriptors: HashMap<Fd, Handle>,
    next_fd: Fd,
    parent: Option<ContextId>,
    children: Vec<ContextId>,
}

impl Context {
    fn new(root: String, pwd: String, credentials: Credentials, parent: Option<ContextId>) -> Self {
        Context {
            root,
            pwd,
            credentials,
            descriptors: HashMap::new(),
            next_fd: 3, // 0/1/2 reserved for stdin/stdout/stderr
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn alloc_fd(&mut self) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    /// Rebind this context's root to `new_root` (already resolved against
    /// the old root). Paths observed through this context are clamped
    /// into the new subtree; break-out via `..` stays impossible because
    /// path normalization clamps at `/` before the root rebind is applied.
    pub fn chroot(&mut self, new_root: &str) {
        self.root = path::normalize(new_root);
        self.pwd = "/".to_string();
    }

    /// Clamp an absolute, already-normalized path (as seen from outside)
    /// into this context's root-relative view: treat it as relative to
    /// the context root and join+normalize, so `..` above the context
    /// root cannot escape it.
    pub fn clamp(&self, absolute_path: &str) -> String {
        let relative = absolute_path.trim_start_matches('/');
        path::normalize(&path::join(&self.root, &[relative]))
    }
}

#[derive(Default)]
pub struct ContextArena {
    nodes: Vec<Context>,
}

impl ContextArena {
    pub fn new() -> Self {
        ContextArena { nodes: Vec::new() }
    }

    /// Create the root context of the arena (no parent).
    pub fn create_root(&mut self, credentials: Credentials) -> ContextId {
        self.nodes.push(Context::new("/".to_string(), "/".to_string(), credentials, None));
        ContextId(self.nodes.len() - 1)
    }

    /// Create a child context inheriting `parent`'s root/credentials.
    pub fn create_child(&mut self, parent: ContextId) -> Result<ContextId> {
        let parent_node = self.get(parent)?;
        let root = parent_node.root.clone();
        let pwd = parent_node.pwd.clone();
        let credentials = parent_node.credentials;
        self.nodes.push(Context::new(root, pwd, credentials, Some(parent)));
        let id = ContextId(self.nodes.len() - 1);
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn get(&self, id: ContextId) -> Result<&Context> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| VfsError::invalid("context", "<context>").with_message("unknown context id"))
    }

    pub fn get_mut(&mut self, id: ContextId) -> Result<&mut Context> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| VfsError::invalid("context", "<context>").with_message("unknown context id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_root_and_credentials() {
        let mut arena = ContextArena::new();
        let root = arena.create_root(Credentials::new(1000, 1000));
        arena.get_mut(root).unwrap().chroot("/srv");
        let child = arena.create_child(root).unwrap();
        assert_eq!(arena.get(child).unwrap().root, "/srv");
        assert_eq!(arena.get(child).unwrap().credentials.uid, 1000);
        assert_eq!(arena.get(root).unwrap().children(), &[child]);
    }

    #[test]
    fn chroot_clamps_dotdot_break_out_attempts() {
        let mut arena = ContextArena::new();
        let ctx = arena.create_root(Credentials::root());
        arena.get_mut(ctx).unwrap().chroot("/ctx");
        // A caller normalizes the externally-observed path against the
        // global root first (clamping `..` at `/`) before handing it to
        // `clamp`, which then re-roots it under the context.
        let normalized = path::normalize("/../../../");
        let clamped = arena.get(ctx).unwrap().clamp(&normalized);
        assert_eq!(clamped, "/ctx");
    }
}
