//! Backend capability mixins: `Sync`/`Async` bridging and the `Mutexed`
//! per-path serialization wrapper.
//!
//! Rather than a class-hierarchy of wrapper types, each mixin is a
//! constructor that returns a new value with an augmented capability — the
//! "structural typing of backends" a capability-trait model calls for.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use slog::{o, warn};
use vfscore_errno::{Result, VfsError};

/// Resolved value of a synthesized future: the `Sync` mixin never actually
/// suspends, so its async methods just wrap an already-computed result.
pub struct Ready<T>(pub T);

impl<T> Ready<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Wraps a fully-synchronous backend and synthesizes the async half as
/// already-resolved futures. No suspension occurs.
pub struct SyncMixin<B> {
    inner: B,
}

impl<B> SyncMixin<B> {
    pub fn new(inner: B) -> Self {
        SyncMixin { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    /// Run a synchronous operation and hand back a resolved `Ready<T>`,
    /// matching the shape an async caller expects without ever suspending.
    pub fn call_async<T>(&mut self, f: impl FnOnce(&mut B) -> Result<T>) -> Result<Ready<T>> {
        f(&mut self.inner).map(Ready)
    }
}

/// One entry in an `AsyncMixin`'s write-through queue.
struct QueuedWrite {
    key: u64,
    bytes: Option<Vec<u8>>, // None means delete
}

/// Capability an [`AsyncMixin`]'s wrapped backend must provide: a point
/// read by key, used to fill the cache on a miss.
pub trait AsyncRead {
    fn read_key(&mut self, key: u64) -> Result<Option<Vec<u8>>>;
}

/// Wraps an async-only (remote/buffered) backend with a local read cache
/// and a write-through queue. Reads check the cache first and fall through
/// to the wrapped backend on a miss, populating the cache; writes update
/// the cache immediately and enqueue persistence. `synced()` drains the
/// queue by calling the supplied persist function for every pending entry.
pub struct AsyncMixin<B> {
    inner: B,
    cache: HashMap<u64, Vec<u8>>,
    queue: VecDeque<QueuedWrite>,
    log: slog::Logger,
}

impl<B> AsyncMixin<B> {
    pub fn new(inner: B) -> Self {
        AsyncMixin {
            inner,
            cache: HashMap::new(),
            queue: VecDeque::new(),
            log: slog_scope::logger().new(o!("mixin" => "async")),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn set(&mut self, key: u64, bytes: Vec<u8>) {
        self.cache.insert(key, bytes.clone());
        self.queue.push_back(QueuedWrite { key, bytes: Some(bytes) });
    }

    pub fn delete(&mut self, key: u64) {
        self.cache.remove(&key);
        self.queue.push_back(QueuedWrite { key, bytes: None });
    }

    /// Await queue drain: apply every queued write/delete via `persist`.
    pub fn synced(&mut self, mut persist: impl FnMut(u64, Option<Vec<u8>>) -> Result<()>) -> Result<()> {
        while let Some(entry) = self.queue.pop_front() {
            if let Err(e) = persist(entry.key, entry.bytes.clone()) {
                warn!(self.log, "write-through persist failed"; "key" => entry.key);
                self.queue.push_front(entry);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }
}

impl<B: AsyncRead> AsyncMixin<B> {
    /// Serve from cache; on a miss, read through the wrapped backend and
    /// populate the cache so the next lookup hits.
    pub fn get_cached(&mut self, key: u64) -> Result<Option<&Vec<u8>>> {
        if !self.cache.contains_key(&key) {
            if let Some(bytes) = self.inner.read_key(key)? {
                self.cache.insert(key, bytes);
            }
        }
        Ok(self.cache.get(&key))
    }
}

struct PathLock {
    /// FIFO queue of waiter tokens; the head holds the lock.
    queue: VecDeque<u64>,
    held_since: Option<Instant>,
}

/// Serializes all path-affecting operations on a backend whose operations
/// are multi-step. Acquires a per-path lock (FIFO per path — a later
/// waiter can never jump a prior one) before the wrapped operation and
/// releases it on completion. A waiter blocked past `watchdog` fails
/// `EDEADLK`; a synchronous caller that finds the path already locked
/// fails `EBUSY` immediately instead of waiting.
pub struct Mutexed<B> {
    inner: Mutex<B>,
    locks: Mutex<HashMap<String, PathLock>>,
    cv: Condvar,
    next_token: Mutex<u64>,
    watchdog: Duration,
}

impl<B> Mutexed<B> {
    pub fn new(inner: B, watchdog: Duration) -> Self {
        Mutexed {
            inner: Mutex::new(inner),
            locks: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            next_token: Mutex::new(0),
            watchdog,
        }
    }

    fn take_token(&self) -> u64 {
        let mut next = self.next_token.lock().expect("token mutex poisoned");
        let token = *next;
        *next += 1;
        token
    }

    /// Try to acquire `path` without waiting; fails `EBUSY` if held.
    pub fn try_lock_path(&self, path: &str, syscall: &'static str) -> Result<PathGuard<'_, B>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        if locks.contains_key(path) {
            return Err(VfsError::busy(syscall, path));
        }
        let token = self.take_token();
        locks.insert(
            path.to_string(),
            PathLock {
                queue: VecDeque::from([token]),
                held_since: Some(Instant::now()),
            },
        );
        Ok(PathGuard { owner: self, path: path.to_string() })
    }

    /// Wait (FIFO) for `path`, failing `EDEADLK` with no further progress
    /// after `watchdog` has elapsed since the current holder acquired it.
    pub fn lock_path(&self, path: &str, syscall: &'static str) -> Result<PathGuard<'_, B>> {
        let token = self.take_token();
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let entry = locks.entry(path.to_string()).or_insert_with(|| PathLock {
            queue: VecDeque::new(),
            held_since: None,
        });
        entry.queue.push_back(token);
        if entry.held_since.is_none() {
            entry.held_since = Some(Instant::now());
        }

        loop {
            let is_head = locks.get(path).map(|l| l.queue.front() == Some(&token)).unwrap_or(false);
            if is_head {
                break;
            }
            let (guard, timeout) = self
                .cv
                .wait_timeout(locks, self.watchdog)
                .expect("lock table poisoned");
            locks = guard;
            if timeout.timed_out() {
                if let Some(lock) = locks.get(path) {
                    if let Some(since) = lock.held_since {
                        if since.elapsed() >= self.watchdog {
                            locks.get_mut(path).unwrap().queue.retain(|t| *t != token);
                            return Err(VfsError::deadlock(syscall, path)
                                .with_message("lock held past watchdog"));
                        }
                    }
                }
            }
        }
        locks.get_mut(path).unwrap().held_since = Some(Instant::now());
        drop(locks);
        Ok(PathGuard { owner: self, path: path.to_string() })
    }

    pub fn with_inner<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        let mut inner = self.inner.lock().expect("inner mutex poisoned");
        f(&mut inner)
    }
}

/// RAII guard releasing a path lock and waking the next FIFO waiter.
pub struct PathGuard<'a, B> {
    owner: &'a Mutexed<B>,
    path: String,
}

impl<'a, B> Drop for PathGuard<'a, B> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock().expect("lock table poisoned");
        if let Some(lock) = locks.get_mut(&self.path) {
            lock.queue.pop_front();
            if lock.queue.is_empty() {
                locks.remove(&self.path);
            } else {
                lock.held_since = Some(Instant::now());
            }
        }
        drop(locks);
        self.owner.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_mixin_never_suspends() {
        let mut mixin = SyncMixin::new(42u32);
        let ready = mixin.call_async(|inner| Ok(*inner + 1)).unwrap();
        assert_eq!(ready.into_inner(), 43);
    }

    impl AsyncRead for () {
        fn read_key(&mut self, _key: u64) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[test]
    fn async_mixin_serves_reads_from_cache_after_a_write() {
        let mut mixin = AsyncMixin::new(());
        mixin.set(1, vec![1, 2, 3]);
        assert_eq!(mixin.get_cached(1).unwrap(), Some(&vec![1, 2, 3]));
        assert_eq!(mixin.pending_writes(), 1);
    }

    #[test]
    fn async_mixin_reads_through_the_backend_on_a_cache_miss() {
        struct Backend(HashMap<u64, Vec<u8>>);
        impl AsyncRead for Backend {
            fn read_key(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
                Ok(self.0.get(&key).cloned())
            }
        }

        let mut backend = HashMap::new();
        backend.insert(7, vec![9, 9]);
        let mut mixin = AsyncMixin::new(Backend(backend));
        assert_eq!(mixin.get_cached(7).unwrap(), Some(&vec![9, 9]));
        assert_eq!(mixin.get_cached(42).unwrap(), None);
    }

    #[test]
    fn synced_drains_the_write_through_queue() {
        let mut mixin = AsyncMixin::new(());
        mixin.set(1, vec![1]);
        mixin.set(2, vec![2]);
        let mut persisted = Vec::new();
        mixin
            .synced(|k, v| {
                persisted.push((k, v));
                Ok(())
            })
            .unwrap();
        assert_eq!(mixin.pending_writes(), 0);
        assert_eq!(persisted.len(), 2);
    }

    #[test]
    fn a_locked_path_rejects_a_synchronous_caller_with_ebusy() {
        let mutexed = Mutexed::new((), Duration::from_secs(5));
        let _guard = mutexed.try_lock_path("/p", "write").unwrap();
        let err = mutexed.try_lock_path("/p", "write").unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Busy);
    }

    #[test]
    fn releasing_a_guard_lets_the_next_synchronous_caller_in() {
        let mutexed = Mutexed::new((), Duration::from_secs(5));
        {
            let _guard = mutexed.try_lock_path("/p", "write").unwrap();
        }
        assert!(mutexed.try_lock_path("/p", "write").is_ok());
    }

    /// A lock held past the watchdog fails a waiter `EDEADLK`; a
    /// synchronous caller finding the path already locked fails `EBUSY`
    /// immediately rather than waiting at all.
    #[test]
    fn a_lock_held_past_the_watchdog_fails_a_waiter_with_edeadlk() {
        use std::sync::Arc;
        use std::thread;

        let mutexed = Arc::new(Mutexed::new((), Duration::from_millis(20)));
        let _holder = mutexed.try_lock_path("/p", "write").unwrap();

        let busy_err = mutexed.try_lock_path("/p", "write").unwrap_err();
        assert_eq!(busy_err.code, vfscore_errno::ErrorCode::Busy);

        let waiter = {
            let mutexed = Arc::clone(&mutexed);
            thread::spawn(move || mutexed.lock_path("/p", "read"))
        };
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.code, vfscore_errno::ErrorCode::Deadlock);
    }
}
