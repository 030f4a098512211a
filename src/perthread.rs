//! Per-thread state: the tile microcache, statistics, and the error queue.
//!
//! Every engine operation starts by fetching the calling thread's
//! [`PerThreadInfo`]. The two-slot microcache in it serves repeated tile
//! lookups with no locking at all; the engine keeps only the `Send` halves
//! (purge flag, atomic stats) in a registry so a global invalidation can
//! reach into every thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::tile::{TileID, TileRecord};

// =============================================================================
// Thread Statistics
// =============================================================================

/// Statistics counters owned by one thread, written with relaxed atomics by
/// that thread only and summed by [`crate::ImageCache::statistics`].
#[derive(Default)]
pub(crate) struct ThreadStats {
    pub find_tile_calls: AtomicU64,
    pub find_tile_microcache_misses: AtomicU64,
    pub find_tile_cache_misses: AtomicU64,
    pub files_totalsize: AtomicU64,
    pub bytes_read: AtomicU64,
    pub unique_files: AtomicU64,
    pub fileio_time_us: AtomicU64,
    pub fileopen_time_us: AtomicU64,
}

/// The shareable parts of a thread's state, held by the engine registry.
pub(crate) struct ThreadHandles {
    pub purge: Arc<AtomicBool>,
    pub stats: Arc<ThreadStats>,
}

// =============================================================================
// PerThreadInfo
// =============================================================================

struct MicroCache {
    /// Tile returned by the most recent lookup.
    tile: Option<Arc<TileRecord>>,
    /// The one before that.
    lasttile: Option<Arc<TileRecord>>,
}

/// One thread's view of one cache instance.
///
/// Interior mutability throughout, with borrows confined to single calls:
/// the unmipped read path re-enters the engine recursively on the same
/// thread, so no borrow may be held across an engine call.
pub(crate) struct PerThreadInfo {
    microcache: RefCell<MicroCache>,
    error: RefCell<String>,
    pub stats: Arc<ThreadStats>,
    purge: Arc<AtomicBool>,
}

impl PerThreadInfo {
    pub(crate) fn new() -> Self {
        Self {
            microcache: RefCell::new(MicroCache {
                tile: None,
                lasttile: None,
            }),
            error: RefCell::new(String::new()),
            stats: Arc::new(ThreadStats::default()),
            purge: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The engine-side handles to register.
    pub(crate) fn handles(&self) -> ThreadHandles {
        ThreadHandles {
            purge: Arc::clone(&self.purge),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Clear the microcache if a global invalidation requested it. Called at
    /// entry to every engine operation; this is the only reconciliation
    /// between thread-local caches and `invalidate`.
    pub(crate) fn check_purge(&self) {
        if self.purge.swap(false, Ordering::AcqRel) {
            let mut cache = self.microcache.borrow_mut();
            cache.tile = None;
            cache.lasttile = None;
        }
    }

    /// The lock-free fast path: current slot, then previous slot (swapping
    /// on a previous-hit so repeated alternation stays hot).
    pub(crate) fn microcache_lookup(&self, id: &TileID) -> Option<Arc<TileRecord>> {
        let mut cache = self.microcache.borrow_mut();
        if let Some(tile) = &cache.tile {
            if tile.id() == id {
                tile.touch();
                return Some(Arc::clone(tile));
            }
        }
        let hit = if let Some(tile) = &cache.lasttile {
            if tile.id() == id {
                tile.touch();
                true
            } else {
                false
            }
        } else {
            false
        };
        if hit {
            let cache = &mut *cache;
            std::mem::swap(&mut cache.tile, &mut cache.lasttile);
            return cache.tile.clone();
        }
        None
    }

    /// Install a tile fetched from the global table as the current slot.
    pub(crate) fn remember_tile(&self, tile: Arc<TileRecord>) {
        let mut cache = self.microcache.borrow_mut();
        cache.lasttile = cache.tile.replace(tile);
    }

    /// Run `f` with the current microcache tile, without cloning.
    pub(crate) fn with_current_tile<R>(&self, f: impl FnOnce(Option<&TileRecord>) -> R) -> R {
        let cache = self.microcache.borrow();
        f(cache.tile.as_deref())
    }

    /// Clone the current microcache tile.
    pub(crate) fn current_tile(&self) -> Option<Arc<TileRecord>> {
        self.microcache.borrow().tile.clone()
    }

    /// Append to this thread's error queue.
    pub(crate) fn append_error(&self, message: &str) {
        let mut error = self.error.borrow_mut();
        if !error.is_empty() {
            error.push('\n');
        }
        error.push_str(message);
    }

    /// Consume and clear the error queue.
    pub(crate) fn take_error(&self) -> String {
        std::mem::take(&mut *self.error.borrow_mut())
    }
}

// =============================================================================
// Thread-local Registry
// =============================================================================

thread_local! {
    /// Per-thread info per cache instance, keyed by cache id. Entries live
    /// until the thread exits.
    static PER_THREAD: RefCell<HashMap<u64, Rc<PerThreadInfo>>> =
        RefCell::new(HashMap::new());
}

/// This thread's info for the given cache, creating (and registering, via
/// `register`) on first use.
pub(crate) fn thread_info_for(
    cache_id: u64,
    register: impl FnOnce() -> Rc<PerThreadInfo>,
) -> Rc<PerThreadInfo> {
    PER_THREAD.with(|map| {
        let mut map = map.borrow_mut();
        Rc::clone(map.entry(cache_id).or_insert_with(register))
    })
}
