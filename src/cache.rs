//! Recent-history caches for round, period and order reads
//!
//! - `BoundedHistory`: fixed window of the latest settled rounds/periods
//! - `UserOrderCache`: per-user recent orders behind an LRU of user keys with TTL
//!
//! Buffers are stored oldest-first. Pages are numbered from 1 and returned
//! most-recent-first. A read that the cache cannot fully answer returns
//! `None` so the caller falls back to storage.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::time::{Duration, Instant};

pub const HISTORY_CAPACITY: usize = 15;
pub const HISTORY_EVICT_BATCH: usize = 5;
pub const USER_ORDER_CAPACITY: usize = 20;
pub const USER_KEY_CAPACITY: usize = 300;
pub const USER_ORDER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Oldest-first buffer range holding page `page` of `size`, or `None` if the
/// buffer is not deep enough
pub fn page_window(len: usize, page: usize, size: usize) -> Option<Range<usize>> {
    if page == 0 || size == 0 {
        return None;
    }
    let start = (page - 1) * size;
    let end = page * size;
    if end > len {
        return None;
    }
    Some(len - end..len - start)
}

fn read_page<T: Clone>(buffer: &VecDeque<T>, page: usize, size: usize) -> Option<Vec<T>> {
    let range = page_window(buffer.len(), page, size)?;
    Some(buffer.range(range).rev().cloned().collect())
}

/// Latest settled rounds or periods, capped with batch eviction
pub struct BoundedHistory<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    evict_batch: usize,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY, HISTORY_EVICT_BATCH)
    }

    pub fn with_capacity(capacity: usize, evict_batch: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evict_batch: evict_batch.max(1),
        }
    }

    /// Append the newest entry
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        items.push_back(item);
        if items.len() > self.capacity {
            let drop = self.evict_batch.min(items.len());
            items.drain(..drop);
        }
    }

    /// Replace the buffer with entries loaded oldest-first from storage
    pub fn reload(&self, oldest_first: Vec<T>) {
        let mut items = self.items.lock();
        items.clear();
        let skip = oldest_first.len().saturating_sub(self.capacity);
        items.extend(oldest_first.into_iter().skip(skip));
    }

    pub fn page(&self, page: usize, size: usize) -> Option<Vec<T>> {
        read_page(&self.items.lock(), page, size)
    }

    pub fn latest(&self) -> Option<T> {
        self.items.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Clone> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct UserEntry<T> {
    orders: VecDeque<T>,
    refreshed_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub users: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Per-user recent orders, LRU over users with a time-to-live
pub struct UserOrderCache<T> {
    inner: Mutex<UserCacheInner<T>>,
    per_user: usize,
    ttl: Duration,
}

struct UserCacheInner<T> {
    users: LruCache<String, UserEntry<T>>,
    hits: u64,
    misses: u64,
}

impl<T: Clone> UserOrderCache<T> {
    pub fn new() -> Self {
        Self::with_limits(USER_KEY_CAPACITY, USER_ORDER_CAPACITY, USER_ORDER_TTL)
    }

    pub fn with_limits(users: usize, per_user: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(users).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(UserCacheInner {
                users: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            per_user: per_user.max(1),
            ttl,
        }
    }

    /// Record a new order for a user already tracked by the cache
    ///
    /// Users without an entry are left alone so that a later read still goes
    /// to storage and loads the full history.
    pub fn push(&self, uid: &str, order: T) {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let expired = match inner.users.get_mut(uid) {
            Some(entry) if entry.refreshed_at.elapsed() <= ttl => {
                entry.orders.push_back(order);
                while entry.orders.len() > self.per_user {
                    entry.orders.pop_front();
                }
                false
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.users.pop(uid);
        }
    }

    /// Replace the first cached order matching `is_same`
    pub fn update<F: Fn(&T) -> bool>(&self, uid: &str, is_same: F, order: T) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.users.peek_mut(uid) {
            if let Some(slot) = entry.orders.iter_mut().rev().find(|o| is_same(o)) {
                *slot = order;
            }
        }
    }

    /// Drop the cached orders matching `is_same`
    pub fn remove<F: Fn(&T) -> bool>(&self, uid: &str, is_same: F) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.users.peek_mut(uid) {
            entry.orders.retain(|o| !is_same(o));
        }
    }

    /// Install a user's history loaded oldest-first from storage
    pub fn seed(&self, uid: &str, oldest_first: Vec<T>) {
        let skip = oldest_first.len().saturating_sub(self.per_user);
        let orders: VecDeque<T> = oldest_first.into_iter().skip(skip).collect();
        self.inner.lock().users.put(
            uid.to_string(),
            UserEntry {
                orders,
                refreshed_at: Instant::now(),
            },
        );
    }

    pub fn page(&self, uid: &str, page: usize, size: usize) -> Option<Vec<T>> {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let lookup = inner
            .users
            .get(uid)
            .map(|entry| (entry.refreshed_at.elapsed() <= ttl, read_page(&entry.orders, page, size)));
        let result = match lookup {
            Some((true, found)) => found,
            Some((false, _)) => {
                inner.users.pop(uid);
                None
            }
            None => None,
        };
        if result.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        result
    }

    pub fn invalidate(&self, uid: &str) {
        self.inner.lock().users.pop(uid);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            users: inner.users.len(),
            capacity: inner.users.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl<T: Clone> Default for UserOrderCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(10, 1, 1), Some(9..10));
        assert_eq!(page_window(10, 2, 3), Some(4..7));
        assert_eq!(page_window(10, 4, 3), None);
        assert_eq!(page_window(10, 0, 3), None);
    }

    #[test]
    fn test_history_evicts_oldest_batch() {
        let history = BoundedHistory::new();
        for i in 0..16 {
            history.push(i);
        }
        assert_eq!(history.len(), 11);
        assert_eq!(history.page(1, 1), Some(vec![15]));
        assert_eq!(history.page(1, 3), Some(vec![15, 14, 13]));
        assert_eq!(history.page(4, 3), None);
        assert_eq!(history.page(1, 11).unwrap().last(), Some(&5));
    }

    #[test]
    fn test_history_reload_keeps_newest() {
        let history = BoundedHistory::new();
        history.reload((0..40).collect());
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.latest(), Some(39));
    }

    #[test]
    fn test_user_cache_requires_seed() {
        let cache = UserOrderCache::new();
        cache.push("u1", 1);
        assert_eq!(cache.page("u1", 1, 1), None);

        cache.seed("u1", vec![1, 2, 3]);
        cache.push("u1", 4);
        assert_eq!(cache.page("u1", 1, 2), Some(vec![4, 3]));
        assert_eq!(cache.page("u1", 3, 2), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_user_cache_caps_per_user_and_users() {
        let cache = UserOrderCache::with_limits(2, 3, USER_ORDER_TTL);
        cache.seed("a", (0..10).collect());
        assert_eq!(cache.page("a", 1, 3), Some(vec![9, 8, 7]));
        assert_eq!(cache.page("a", 2, 3), None);

        cache.seed("b", vec![1]);
        cache.seed("c", vec![1]);
        assert_eq!(cache.stats().users, 2);
        // "a" was the least recently used key
        assert_eq!(cache.page("a", 1, 1), None);
    }

    #[test]
    fn test_user_cache_ttl() {
        let cache = UserOrderCache::with_limits(10, 5, Duration::from_millis(0));
        cache.seed("u", vec![1, 2]);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.page("u", 1, 1), None);
        assert_eq!(cache.stats().users, 0);
    }

    #[test]
    fn test_user_cache_update() {
        let cache = UserOrderCache::new();
        cache.seed("u", vec![(1, "bet"), (2, "bet")]);
        cache.update("u", |o| o.0 == 1, (1, "settled"));
        assert_eq!(cache.page("u", 1, 2), Some(vec![(2, "bet"), (1, "settled")]));

        cache.remove("u", |o| o.0 == 2);
        assert_eq!(cache.page("u", 1, 1), Some(vec![(1, "settled")]));
    }
}
