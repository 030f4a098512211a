//! The global tile table.
//!
//! Maps [`TileID`]s to resident [`TileRecord`]s under one reader-writer
//! lock, tracks total resident bytes in an atomic counter, and evicts with a
//! two-chance clock sweep whose cursor survives across insertions.
//!
//! Tile reads happen *outside* this table's lock (serialized per file by the
//! reader mutex); the table lock only covers map lookups and mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::file::FileRecord;

use super::id::TileID;
use super::record::TileRecord;

pub(crate) struct TileTable {
    inner: RwLock<TileMap>,
    /// Total bytes of all resident tile pixels.
    mem_used: AtomicUsize,
    peak_mem: AtomicUsize,
    created: AtomicU64,
    peak_count: AtomicUsize,
}

struct TileMap {
    tiles: HashMap<TileID, Arc<TileRecord>>,
    /// Clock-sweep cursor: a key snapshot plus position, refreshed whenever
    /// the snapshot is exhausted. Stale keys are skipped.
    sweep_keys: Vec<TileID>,
    sweep_pos: usize,
}

impl TileTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(TileMap {
                tiles: HashMap::new(),
                sweep_keys: Vec::new(),
                sweep_pos: 0,
            }),
            mem_used: AtomicUsize::new(0),
            peak_mem: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            peak_count: AtomicUsize::new(0),
        }
    }

    /// Look up a resident tile, marking it used.
    pub(crate) fn lookup(&self, id: &TileID) -> Option<Arc<TileRecord>> {
        let inner = self.inner.read();
        let tile = inner.tiles.get(id)?;
        tile.touch();
        Some(Arc::clone(tile))
    }

    /// Whether a tile is resident, without touching it.
    pub(crate) fn contains(&self, id: &TileID) -> bool {
        self.inner.read().tiles.contains_key(id)
    }

    /// Insert a freshly read tile, evicting first if over budget.
    ///
    /// On collision the earlier entry wins and the newcomer is discarded;
    /// the survivor is returned either way.
    pub(crate) fn insert(&self, tile: Arc<TileRecord>, max_bytes: usize) -> Arc<TileRecord> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.tiles.get(tile.id()) {
            existing.touch();
            return Arc::clone(existing);
        }
        let size = tile.memsize();
        self.created.fetch_add(1, Ordering::Relaxed);
        let mem = self.mem_used.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_mem.fetch_max(mem, Ordering::Relaxed);
        self.enforce_memory_limit(&mut inner, max_bytes);
        inner.tiles.insert(tile.id().clone(), Arc::clone(&tile));
        self.peak_count
            .fetch_max(inner.tiles.len(), Ordering::Relaxed);
        tile
    }

    /// Two-chance clock sweep: advance the cursor cyclically, clearing used
    /// flags on the first visit and erasing on the second, until resident
    /// bytes drop below the budget. Terminates when the table is empty.
    fn enforce_memory_limit(&self, inner: &mut TileMap, max_bytes: usize) {
        while self.mem_used.load(Ordering::Relaxed) >= max_bytes {
            if inner.tiles.is_empty() {
                break;
            }
            if inner.sweep_pos >= inner.sweep_keys.len() {
                inner.sweep_keys = inner.tiles.keys().cloned().collect();
                inner.sweep_pos = 0;
            }
            let id = inner.sweep_keys[inner.sweep_pos].clone();
            inner.sweep_pos += 1;
            let evict = match inner.tiles.get(&id) {
                Some(tile) => !tile.release(),
                None => continue,
            };
            if evict {
                if let Some(tile) = inner.tiles.remove(&id) {
                    self.mem_used.fetch_sub(tile.memsize(), Ordering::Relaxed);
                    debug!(
                        subimage = id.subimage(),
                        x = id.x(),
                        y = id.y(),
                        bytes = tile.memsize(),
                        "evicted tile"
                    );
                }
            }
        }
    }

    /// Drop every tile belonging to `file` (invalidation).
    pub(crate) fn remove_file(&self, file: &Arc<FileRecord>) {
        let mut inner = self.inner.write();
        inner.tiles.retain(|id, tile| {
            if Arc::ptr_eq(id.file(), file) {
                self.mem_used.fetch_sub(tile.memsize(), Ordering::Relaxed);
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn mem_used(&self) -> usize {
        self.mem_used.load(Ordering::Relaxed)
    }

    pub(crate) fn peak_mem(&self) -> usize {
        self.peak_mem.load(Ordering::Relaxed)
    }

    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn count(&self) -> usize {
        self.inner.read().tiles.len()
    }

    pub(crate) fn peak_count(&self) -> usize {
        self.peak_count.load(Ordering::Relaxed)
    }
}
