//! Concurrent per-identifier state storage.
//!
//! The map is a sharded [`DashMap`]: fetching an existing identifier takes only a shard
//! read lock, and inserting a new identifier is atomic per shard, so two callers racing
//! on the same new identifier always end up sharing one entry. Each entry carries its own
//! mutex; the check-then-act of a decision happens under that mutex alone, so unrelated
//! identifiers never contend.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Algorithm state plus access bookkeeping for one identifier.
#[derive(Debug)]
pub struct Entry<T> {
    /// Strategy-specific state.
    pub state: T,
    last_access_millis: u64,
}

impl<T> Entry<T> {
    fn new(state: T, now_millis: u64) -> Self {
        Self {
            state,
            last_access_millis: now_millis,
        }
    }

    /// Last time a caller touched this entry.
    pub fn last_access_millis(&self) -> u64 {
        self.last_access_millis
    }

    /// Record an access; never moves the timestamp backwards.
    pub fn touch(&mut self, now_millis: u64) {
        self.last_access_millis = self.last_access_millis.max(now_millis);
    }
}

/// Shared handle to one identifier's entry.
pub type EntryHandle<T> = Arc<Mutex<Entry<T>>>;

/// Lock an entry, recovering from poisoning. Entry state is plain data that every
/// mutation leaves valid, so a panic elsewhere cannot leave it half-written.
pub fn lock_entry<T>(handle: &EntryHandle<T>) -> MutexGuard<'_, Entry<T>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent map from identifier to lock-protected state.
#[derive(Debug)]
pub struct StateStore<K, T>
where
    K: Eq + Hash,
{
    entries: DashMap<K, EntryHandle<T>>,
}

impl<K, T> Default for StateStore<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> StateStore<K, T>
where
    K: Eq + Hash,
{
    /// Empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the entry for `key`, creating it with `init` if absent.
    ///
    /// `init` runs at most once per live entry even under concurrent callers; the
    /// returned handle must be locked before reading or mutating the state.
    pub fn get_or_create<Q, F>(&self, key: &Q, now_millis: u64, init: F) -> EntryHandle<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::new(init(), now_millis))));
        Arc::clone(entry.value())
    }

    /// Return the entry for `key` if one exists.
    pub fn get<Q>(&self, key: &Q) -> Option<EntryHandle<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Whether `key` currently has state.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Drop `key`'s state; the next access starts fresh. Returns whether it existed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// Remove entries idle for strictly longer than `ttl` as of `now_millis`.
    ///
    /// Entries currently held by a caller (handle cloned out of the map, or locked) are
    /// skipped; they are by definition not idle. Returns the number removed.
    pub fn evict_idle(&self, now_millis: u64, ttl: Duration) -> usize {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_millis.saturating_sub(ttl_millis);
        if cutoff == 0 {
            return 0;
        }
        let mut removed = 0;
        self.entries.retain(|_, handle| {
            // The retain closure runs under the shard write lock, so no new clone of
            // this handle can appear while we look at it.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let keep = match handle.try_lock() {
                Ok(entry) => entry.last_access_millis >= cutoff,
                Err(TryLockError::Poisoned(poisoned)) => {
                    poisoned.into_inner().last_access_millis >= cutoff
                }
                Err(TryLockError::WouldBlock) => true,
            };
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of identifiers with live state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identifier has state.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn get_or_create_initializes_once() {
        let store: StateStore<String, u32> = StateStore::new();
        let first = store.get_or_create("a", 0, || 7);
        lock_entry(&first).state = 9;

        let second = store.get_or_create("a", 5, || panic!("must not re-initialize"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock_entry(&second).state, 9);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_creation_yields_one_entry() {
        let store: Arc<StateStore<String, u32>> = Arc::new(StateStore::new());
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let handle = store.get_or_create("shared", 0, || 0);
                    lock_entry(&handle).state += 1;
                    handle
                })
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.len(), 1);
        assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(lock_entry(&entries[0]).state, 16, "no lost updates");
    }

    #[test]
    fn evicts_only_idle_entries() {
        let store: StateStore<String, ()> = StateStore::new();
        let _ = store.get_or_create("old", 0, || ());
        let _ = store.get_or_create("fresh", 0, || ());
        lock_entry(&store.get("fresh").unwrap()).touch(9_500);

        let removed = store.evict_idle(10_001, Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert!(!store.contains("old"));
        assert!(store.contains("fresh"));
    }

    #[test]
    fn idle_exactly_ttl_is_kept() {
        let store: StateStore<u64, ()> = StateStore::new();
        let _ = store.get_or_create(&1u64, 0, || ());
        assert_eq!(store.evict_idle(10_000, Duration::from_secs(10)), 0);
        assert_eq!(store.evict_idle(10_001, Duration::from_secs(10)), 1);
    }

    #[test]
    fn held_entries_survive_eviction() {
        let store: StateStore<u64, ()> = StateStore::new();
        let held = store.get_or_create(&1u64, 0, || ());
        assert_eq!(store.evict_idle(1_000_000, Duration::from_secs(1)), 0);
        drop(held);
        assert_eq!(store.evict_idle(1_000_000, Duration::from_secs(1)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let store: StateStore<String, u8> = StateStore::new();
        let _ = store.get_or_create("a", 0, || 1);
        let _ = store.get_or_create("b", 0, || 2);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn touch_is_monotonic() {
        let mut entry = Entry::new((), 100);
        entry.touch(50);
        assert_eq!(entry.last_access_millis(), 100);
        entry.touch(150);
        assert_eq!(entry.last_access_millis(), 150);
    }
}
