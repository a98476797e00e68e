//! Query memoization and bounded artifact caches.
//!
//! [`QueryCache`] stamps every memoized result with the tree version it was
//! computed from. A lookup that finds a stamp different from the tree's
//! current version discards the entry and recomputes, so cached reads are
//! coherent with every mutation without explicit invalidation calls.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

use crate::tree::{Bookmark, Scope, Tree};
use markvault_common::{Error, IndexPath, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListKey {
    scope: Scope,
    query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CountKind {
    Bookmarks,
    Folders,
}

#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    version: u64,
}

/// Hit/miss counters of a [`QueryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// One page of a bookmark listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Bookmark>,
    /// Zero-based page index.
    pub page: usize,
    pub per_page: usize,
    /// Matching bookmarks across all pages.
    pub total: usize,
    pub has_more: bool,
}

/// Version-stamped memoization of listing and counting queries.
#[derive(Debug, Default)]
pub struct QueryCache {
    lists: HashMap<ListKey, Stamped<Arc<Vec<Bookmark>>>>,
    counts: HashMap<(CountKind, Scope), Stamped<usize>>,
    stats: CacheStats,
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bookmarks in `scope` matching `query` (blank lists everything).
    pub fn bookmarks(&mut self, tree: &Tree, scope: &Scope, query: &str) -> Result<Arc<Vec<Bookmark>>> {
        let key = ListKey {
            scope: scope.clone(),
            query: normalize_query(query),
        };
        let version = tree.version();

        if let Some(entry) = self.lists.get(&key) {
            if entry.version == version {
                self.stats.hits += 1;
                return Ok(Arc::clone(&entry.value));
            }
        }

        self.stats.misses += 1;
        debug!(scope = %scope, version, "Listing cache miss");

        let value = Arc::new(tree.search(&key.query, scope)?);
        self.lists.retain(|_, entry| entry.version == version);
        self.lists.insert(
            key,
            Stamped {
                value: Arc::clone(&value),
                version,
            },
        );
        Ok(value)
    }

    /// Cached [`Tree::count_bookmarks`].
    pub fn count_bookmarks(&mut self, tree: &Tree, scope: &Scope) -> Result<usize> {
        self.count(tree, CountKind::Bookmarks, scope.clone())
    }

    /// Cached [`Tree::count_folders`].
    pub fn count_folders(&mut self, tree: &Tree, path: &IndexPath) -> Result<usize> {
        self.count(tree, CountKind::Folders, Scope::from(path.clone()))
    }

    fn count(&mut self, tree: &Tree, kind: CountKind, scope: Scope) -> Result<usize> {
        let version = tree.version();
        let key = (kind, scope);

        if let Some(entry) = self.counts.get(&key) {
            if entry.version == version {
                self.stats.hits += 1;
                return Ok(entry.value);
            }
        }

        self.stats.misses += 1;
        debug!(scope = %key.1, version, "Count cache miss");

        let value = match (&key.0, &key.1) {
            (CountKind::Bookmarks, scope) => tree.count_bookmarks(scope)?,
            (CountKind::Folders, Scope::All) => tree.count_folders(&IndexPath::root())?,
            (CountKind::Folders, Scope::Folder(path)) => tree.count_folders(path)?,
        };
        self.counts.retain(|_, entry| entry.version == version);
        self.counts.insert(key, Stamped { value, version });
        Ok(value)
    }

    /// Page `page` (zero-based) of the listing for `scope` and `query`.
    ///
    /// # Errors
    /// - `InvalidInput` if `per_page` is zero
    /// - Scope errors from the tree
    pub fn page(
        &mut self,
        tree: &Tree,
        scope: &Scope,
        query: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Page> {
        if per_page == 0 {
            return Err(Error::InvalidInput("Page size must be positive".to_string()));
        }

        let all = self.bookmarks(tree, scope, query)?;
        let start = page.saturating_mul(per_page);
        let items: Vec<Bookmark> = all.iter().skip(start).take(per_page).cloned().collect();
        let has_more = start.saturating_add(items.len()) < all.len();

        Ok(Page {
            items,
            page,
            per_page,
            total: all.len(),
            has_more,
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of memoized entries, stale ones included.
    pub fn len(&self) -> usize {
        self.lists.len() + self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and reset statistics.
    pub fn clear(&mut self) {
        self.lists.clear();
        self.counts.clear();
        self.stats = CacheStats::default();
    }
}

/// Which entry a full [`BoundedCache`] gives up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest insertion goes first; reads do not reorder (FIFO).
    #[default]
    InsertionOrder,
    /// Least recently read or written goes first (LRU).
    Recency,
}

/// Capacity-bounded map with a configurable eviction order.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    policy: EvictionPolicy,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn promote<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if let Some(pos) = self.order.iter().position(|k| k.borrow() == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    /// Insert or update an entry.
    ///
    /// Updating an existing key never evicts.
    ///
    /// # Returns
    /// The evicted entry, if the insert overflowed the capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            if self.policy == EvictionPolicy::Recency {
                self.promote(&key);
            }
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.order
                .pop_front()
                .and_then(|old| self.entries.remove(&old).map(|v| (old, v)))
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Look up an entry, promoting it under [`EvictionPolicy::Recency`].
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if !self.entries.contains_key(key) {
            return None;
        }
        if self.policy == EvictionPolicy::Recency {
            self.promote(key);
        }
        self.entries.get(key)
    }

    /// Look up an entry without touching the eviction order.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k.borrow() != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// A fetched site icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Site icons keyed by host.
pub type IconCache = BoundedCache<String, Icon>;
