//! Layered configuration: plain, embedding-constructed structs for the
//! store and VFS tunables. No loader lives here — reading from environment
//! or disk is a named external collaborator.

use std::time::Duration;

/// Tunables for the [`vfscore_store::SingleBufferStore`] format.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Metadata block size in bytes.
    pub metadata_block_size: u32,
    /// Number of `{id, offset, size}` entries per metadata block.
    pub metadata_entry_capacity: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            metadata_block_size: 4096,
            metadata_entry_capacity: 254,
        }
    }
}

/// Tunables for the VFS layer: locking, remote-backend deadlines, watcher
/// polling, and whether permission checks run at all.
#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// Mutexed-mixin per-path lock-wait watchdog timeout before `EDEADLK`.
    pub lock_watchdog_timeout: Duration,
    /// Deadline for a request against an asynchronous remote backend.
    pub remote_request_deadline: Duration,
    /// Default poll interval for a newly-installed stat watcher.
    pub stat_watcher_interval: Duration,
    /// Global toggle for ACL/permission enforcement, for test harnesses
    /// that want to exercise the FS layer without credential friction.
    pub access_checks_enabled: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            lock_watchdog_timeout: Duration::from_secs(5),
            remote_request_deadline: Duration::from_secs(1),
            stat_watcher_interval: Duration::from_millis(500),
            access_checks_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let store = StoreConfig::default();
        assert_eq!(store.metadata_block_size, 4096);
        assert_eq!(store.metadata_entry_capacity, 254);

        let vfs = VfsConfig::default();
        assert_eq!(vfs.lock_watchdog_timeout, Duration::from_secs(5));
        assert_eq!(vfs.remote_request_deadline, Duration::from_secs(1));
        assert!(vfs.access_checks_enabled);
    }
}
