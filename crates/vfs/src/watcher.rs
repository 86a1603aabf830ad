//! Path and stat watchers: subscriptions that receive change notifications
//! as operations are applied along a path, kept in flat `Vec`s the same
//! way [`crate::mount::MountTable`] keeps its mount points.

use vfscore_path as path;
use vfscore_store::Inode;

/// What kind of change a path watcher reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Rename,
    Change,
}

impl EventType {
    /// The event a given operation name emits, per the documented mapping.
    pub fn for_operation(op: &str) -> Option<Self> {
        match op {
            "mkdir" | "createFile" | "unlink" | "rmdir" | "rename" => Some(EventType::Rename),
            "write" | "utimes" | "chmod" | "chown" => Some(EventType::Change),
            _ => None,
        }
    }
}

/// One path-watcher subscription.
pub struct PathWatcher {
    pub id: u64,
    pub path: String,
    pub recursive: bool,
}

/// Dispatches path-change events to subscribed watchers, propagating each
/// event up the ancestor chain of the path it occurred on.
#[derive(Default)]
pub struct PathWatchers {
    watchers: Vec<PathWatcher>,
    next_id: u64,
}

impl PathWatchers {
    pub fn new() -> Self {
        PathWatchers { watchers: Vec::new(), next_id: 1 }
    }

    pub fn install(&mut self, watch_path: &str, recursive: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.watchers.push(PathWatcher {
            id,
            path: path::normalize(watch_path),
            recursive,
        });
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.watchers.retain(|w| w.id != id);
    }

    /// Notify every watcher whose path is `changed_path` itself, a
    /// recursive ancestor of it, or a non-recursive direct parent of it.
    /// Returns `(watcher_id, event_type, relative_filename)` pairs.
    pub fn notify(&self, changed_path: &str, event: EventType) -> Vec<(u64, EventType, String)> {
        let mut out = Vec::new();
        for watcher in &self.watchers {
            if let Some(filename) = relative_filename(&watcher.path, changed_path, watcher.recursive) {
                out.push((watcher.id, event, filename));
            }
        }
        out
    }
}

/// If `changed_path` lies under `watch_path` (exactly, as its direct
/// child, or — when `recursive` — any descendant), returns the filename
/// to report: the basename for a direct child, the path relative to
/// `watch_path` for a recursive descendant match.
fn relative_filename(watch_path: &str, changed_path: &str, recursive: bool) -> Option<String> {
    if changed_path == watch_path {
        return Some(".".to_string());
    }
    let prefix = if watch_path == "/" { "/".to_string() } else { format!("{}/", watch_path) };
    let rest = changed_path.strip_prefix(&prefix)?;
    if recursive {
        Some(rest.to_string())
    } else if rest.contains('/') {
        None // descendant, but this watcher is non-recursive
    } else {
        Some(rest.to_string())
    }
}

/// A single stat-watcher subscription: polls `stat` at `interval_ms` and
/// remembers the last observed snapshot to diff against.
pub struct StatWatcher {
    pub id: u64,
    pub path: String,
    pub interval_ms: u64,
    last: Option<Inode>,
}

#[derive(Default)]
pub struct StatWatchers {
    watchers: Vec<StatWatcher>,
    next_id: u64,
}

/// Fields compared to decide whether a stat watcher should fire.
fn stat_changed(a: &Inode, b: &Inode) -> bool {
    a.size != b.size
        || a.mode != b.mode
        || a.atime_ms != b.atime_ms
        || a.mtime_ms != b.mtime_ms
        || a.ctime_ms != b.ctime_ms
}

impl StatWatchers {
    pub fn new() -> Self {
        StatWatchers { watchers: Vec::new(), next_id: 1 }
    }

    pub fn install(&mut self, watch_path: &str, interval_ms: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.watchers.push(StatWatcher {
            id,
            path: path::normalize(watch_path),
            interval_ms,
            last: None,
        });
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.watchers.retain(|w| w.id != id);
    }

    /// Feed a freshly-polled stat for `watch_path` to every watcher
    /// installed on it, returning `(current, previous)` for watchers whose
    /// comparable fields changed since the last poll.
    pub fn poll(&mut self, watch_path: &str, current: Inode) -> Vec<(u64, Inode, Inode)> {
        let normalized = path::normalize(watch_path);
        let mut out = Vec::new();
        for watcher in &mut self.watchers {
            if watcher.path != normalized {
                continue;
            }
            if let Some(previous) = &watcher.last {
                if stat_changed(previous, &current) {
                    out.push((watcher.id, current.clone(), previous.clone()));
                }
            }
            watcher.last = Some(current.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_recursive_watcher_only_sees_direct_children() {
        let mut watchers = PathWatchers::new();
        let id = watchers.install("/a", false);
        assert_eq!(
            watchers.notify("/a/b", EventType::Rename),
            vec![(id, EventType::Rename, "b".to_string())]
        );
        assert!(watchers.notify("/a/b/c", EventType::Rename).is_empty());
    }

    #[test]
    fn recursive_watcher_sees_descendants_relativized() {
        let mut watchers = PathWatchers::new();
        let id = watchers.install("/a", true);
        assert_eq!(
            watchers.notify("/a/b/c", EventType::Change),
            vec![(id, EventType::Change, "b/c".to_string())]
        );
    }

    #[test]
    fn operation_to_event_mapping_matches_the_documented_table() {
        assert_eq!(EventType::for_operation("mkdir"), Some(EventType::Rename));
        assert_eq!(EventType::for_operation("write"), Some(EventType::Change));
        assert_eq!(EventType::for_operation("readdir"), None);
    }

    #[test]
    fn stat_watcher_fires_only_when_a_comparable_field_changes() {
        let mut watchers = StatWatchers::new();
        let id = watchers.install("/f", 1000);
        let mut inode = Inode::new(1, 2, 0o644, 0, 0, 0);
        assert!(watchers.poll("/f", inode.clone()).is_empty()); // first poll seeds baseline
        assert!(watchers.poll("/f", inode.clone()).is_empty()); // unchanged
        inode.size = 42;
        let changes = watchers.poll("/f", inode.clone());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, id);
    }
}
