//! POSIX-style error taxonomy shared by the store, fs, and vfs layers.
//!
//! Every error carries a `code` (one of the POSIX subset below), a
//! human-readable `message`, the `syscall` that raised it, the `path` (and,
//! for link/rename-like operations, a `dest`) it concerns, and a `stack`
//! trail of `(syscall, path)` frames attached as the error unwinds through
//! nested calls. Nothing in this crate retries internally; that choice is
//! always left to the caller.

use std::fmt;

/// POSIX error code subset this crate surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `ENOENT` — path missing.
    NotFound,
    /// `EEXIST` — path already exists.
    Exists,
    /// `ENOTDIR` — expected a directory.
    NotDir,
    /// `EISDIR` — expected a non-directory.
    IsDir,
    /// `ENOTEMPTY` — directory not empty.
    NotEmpty,
    /// `EACCES` — permission denied.
    Access,
    /// `EPERM` — operation not permitted.
    NotPermitted,
    /// `EBADF` — invalid descriptor or transaction.
    BadFd,
    /// `EBUSY` — synchronous call on a locked path.
    Busy,
    /// `EDEADLK` — lock held past the watchdog.
    Deadlock,
    /// `EINVAL` — bad argument.
    Invalid,
    /// `EIO` — backend failure or checksum mismatch.
    Io,
    /// `ENOSPC` — store allocation failure.
    NoSpace,
    /// `ENOSYS` — function not implemented.
    NotImplemented,
    /// `ENOTSUP` — operation not supported.
    NotSupported,
    /// `EROFS` — read-only file system.
    ReadOnlyFs,
    /// `EXDEV` — cross-device link/rename.
    CrossDevice,
    /// `ELOOP` — too many levels of symbolic links.
    SymlinkLoop,
    /// `EAGAIN` — resource temporarily unavailable.
    WouldBlock,
}

impl ErrorCode {
    /// The `libc` errno constant this code maps to.
    pub fn to_errno(self) -> i32 {
        match self {
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::Exists => libc::EEXIST,
            ErrorCode::NotDir => libc::ENOTDIR,
            ErrorCode::IsDir => libc::EISDIR,
            ErrorCode::NotEmpty => libc::ENOTEMPTY,
            ErrorCode::Access => libc::EACCES,
            ErrorCode::NotPermitted => libc::EPERM,
            ErrorCode::BadFd => libc::EBADF,
            ErrorCode::Busy => libc::EBUSY,
            ErrorCode::Deadlock => libc::EDEADLK,
            ErrorCode::Invalid => libc::EINVAL,
            ErrorCode::Io => libc::EIO,
            ErrorCode::NoSpace => libc::ENOSPC,
            ErrorCode::NotImplemented => libc::ENOSYS,
            ErrorCode::NotSupported => libc::ENOTSUP,
            ErrorCode::ReadOnlyFs => libc::EROFS,
            ErrorCode::CrossDevice => libc::EXDEV,
            ErrorCode::SymlinkLoop => libc::ELOOP,
            ErrorCode::WouldBlock => libc::EAGAIN,
        }
    }

    /// Short POSIX name, e.g. `"ENOENT"`, for log lines and test assertions.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "ENOENT",
            ErrorCode::Exists => "EEXIST",
            ErrorCode::NotDir => "ENOTDIR",
            ErrorCode::IsDir => "EISDIR",
            ErrorCode::NotEmpty => "ENOTEMPTY",
            ErrorCode::Access => "EACCES",
            ErrorCode::NotPermitted => "EPERM",
            ErrorCode::BadFd => "EBADF",
            ErrorCode::Busy => "EBUSY",
            ErrorCode::Deadlock => "EDEADLK",
            ErrorCode::Invalid => "EINVAL",
            ErrorCode::Io => "EIO",
            ErrorCode::NoSpace => "ENOSPC",
            ErrorCode::NotImplemented => "ENOSYS",
            ErrorCode::NotSupported => "ENOTSUP",
            ErrorCode::ReadOnlyFs => "EROFS",
            ErrorCode::CrossDevice => "EXDEV",
            ErrorCode::SymlinkLoop => "ELOOP",
            ErrorCode::WouldBlock => "EAGAIN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of the error's call-site trail: the syscall name and the path
/// it was operating on when the error passed through that layer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub syscall: &'static str,
    pub path: String,
}

/// A POSIX-flavored VFS error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{syscall}: {message} ({code}) at {path}")]
pub struct VfsError {
    pub code: ErrorCode,
    pub message: String,
    pub syscall: &'static str,
    pub path: String,
    pub dest: Option<String>,
    pub stack: Vec<Frame>,
}

impl VfsError {
    /// Construct a new error at the point it is first raised.
    pub fn new(code: ErrorCode, syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        VfsError {
            message: format!("{}: {}", syscall, code.as_str()),
            code,
            syscall,
            path,
            dest: None,
            stack: Vec::new(),
        }
    }

    /// Attach an explicit message, replacing the default one.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach a `dest` path, for link/rename-shaped operations.
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Attach a calling frame as the error propagates up through a nested
    /// call; the original `syscall`/`path` of the error are preserved, the
    /// new frame is appended to the trail.
    pub fn context(mut self, syscall: &'static str, path: impl Into<String>) -> Self {
        self.stack.push(Frame {
            syscall,
            path: path.into(),
        });
        self
    }

    /// Raw errno integer for this error's code.
    pub fn to_errno(&self) -> i32 {
        self.code.to_errno()
    }

    pub fn not_found(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, syscall, path)
    }

    pub fn exists(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Exists, syscall, path)
    }

    pub fn not_dir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotDir, syscall, path)
    }

    pub fn is_dir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::IsDir, syscall, path)
    }

    pub fn not_empty(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotEmpty, syscall, path)
    }

    pub fn access(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Access, syscall, path)
    }

    pub fn not_permitted(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotPermitted, syscall, path)
    }

    pub fn bad_fd(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadFd, syscall, path)
    }

    pub fn busy(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Busy, syscall, path)
    }

    pub fn deadlock(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Deadlock, syscall, path)
    }

    pub fn invalid(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, syscall, path)
    }

    pub fn io(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, syscall, path)
    }

    pub fn no_space(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoSpace, syscall, path)
    }

    pub fn not_implemented(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, syscall, path)
    }

    pub fn not_supported(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, syscall, path)
    }

    pub fn read_only_fs(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReadOnlyFs, syscall, path)
    }

    pub fn cross_device(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::CrossDevice, syscall, path)
    }

    pub fn symlink_loop(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::SymlinkLoop, syscall, path)
    }

    pub fn would_block(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrorCode::WouldBlock, syscall, path)
    }
}

/// Result alias used throughout the vfscore crates.
pub type Result<T> = core::result::Result<T, VfsError>;

/// Extension trait for attaching call-site context to a `Result` as it
/// propagates up through nested calls, without replacing the original error.
pub trait ResultExt<T> {
    fn context(self, syscall: &'static str, path: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, syscall: &'static str, path: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(syscall, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_posix() {
        assert_eq!(ErrorCode::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(ErrorCode::Deadlock.to_errno(), libc::EDEADLK);
        assert_eq!(ErrorCode::SymlinkLoop.to_errno(), libc::ELOOP);
    }

    #[test]
    fn context_appends_a_frame_without_losing_the_original_code() {
        let err = VfsError::not_found("stat", "/a/b").context("readdir", "/a");
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.path, "/a/b");
        assert_eq!(err.stack.len(), 1);
        assert_eq!(err.stack[0].syscall, "readdir");
    }

    #[test]
    fn dest_is_attached_for_rename_like_operations() {
        let err = VfsError::cross_device("rename", "/a").with_dest("/b");
        assert_eq!(err.dest.as_deref(), Some("/b"));
    }
}
