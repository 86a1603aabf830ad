//! Symlink target parsing and loop-safe resolution.

use vfscore_errno::{Result, VfsError};
use vfscore_path as path;

/// Suggested hop limit before resolution fails `ELOOP`.
pub const MAX_SYMLINK_DEPTH: usize = 40;

/// A symlink's raw target, with relative/absolute classification.
#[derive(Debug, Clone)]
pub struct SymlinkTarget {
    pub raw: String,
}

impl SymlinkTarget {
    pub fn new(target: &str) -> Self {
        SymlinkTarget { raw: target.to_string() }
    }

    pub fn is_absolute(&self) -> bool {
        path::is_absolute(&self.raw)
    }

    pub fn is_relative(&self) -> bool {
        !self.is_absolute()
    }

    /// Resolve this target against the directory containing the symlink.
    /// Absolute targets are used as-is; relative targets are joined to
    /// `symlink_dir` and normalized.
    pub fn resolve(&self, symlink_dir: &str) -> String {
        if self.is_absolute() {
            path::normalize(&self.raw)
        } else {
            path::normalize(&path::join(symlink_dir, &[self.raw.as_str()]))
        }
    }
}

/// Tracks symlink-hop depth during a single path resolution so `ELOOP` can
/// be raised deterministically instead of recursing unboundedly.
#[derive(Default)]
pub struct SymlinkResolver {
    depth: usize,
}

impl SymlinkResolver {
    pub fn new() -> Self {
        SymlinkResolver { depth: 0 }
    }

    /// Begin following one more symlink hop.
    pub fn enter(&mut self, syscall: &'static str, path: &str) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_SYMLINK_DEPTH {
            Err(VfsError::symlink_loop(syscall, path.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Outcome of resolving a path that may pass through symlinks.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub path: String,
    pub symlinks_followed: usize,
}

impl ResolvedPath {
    pub fn no_symlinks(path: String) -> Self {
        ResolvedPath { path, symlinks_followed: 0 }
    }

    pub fn has_symlinks(&self) -> bool {
        self.symlinks_followed > 0
    }
}

/// Controls whether, and how much of, a path's symlinks get followed.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub follow_symlinks: bool,
    pub follow_final: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            follow_symlinks: true,
            follow_final: true,
        }
    }
}

impl ResolveOptions {
    /// Neither intermediate nor final components are followed — used for
    /// operating on the symlink itself (e.g. `unlink`).
    pub fn no_follow() -> Self {
        ResolveOptions {
            follow_symlinks: false,
            follow_final: false,
        }
    }

    /// Intermediate components are followed; the final one is not —
    /// `lstat`-style.
    pub fn no_follow_final() -> Self {
        ResolveOptions {
            follow_symlinks: true,
            follow_final: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_target_resolves_against_the_symlink_directory() {
        let target = SymlinkTarget::new("../other/file");
        assert_eq!(target.resolve("/a/b"), "/a/other/file");
    }

    #[test]
    fn absolute_target_ignores_the_symlink_directory() {
        let target = SymlinkTarget::new("/elsewhere");
        assert_eq!(target.resolve("/a/b"), "/elsewhere");
    }

    #[test]
    fn resolver_raises_symlink_loop_past_the_depth_limit() {
        let mut resolver = SymlinkResolver::new();
        for _ in 0..MAX_SYMLINK_DEPTH {
            resolver.enter("open", "/x").unwrap();
        }
        let err = resolver.enter("open", "/x").unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::SymlinkLoop);
    }
}
