//! The file table: filename -> FileRecord, plus fingerprint deduplication.
//!
//! Both maps live under one reader-writer lock. The expensive disk open in
//! `find_or_create` happens with *no* table lock held; the race between two
//! threads opening the same new file is resolved by re-checking under the
//! write lock, where the loser's record is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::ImageCache;
use crate::perthread::PerThreadInfo;

use super::record::FileRecord;

pub(crate) struct FileTable {
    inner: RwLock<FileMap>,
}

struct FileMap {
    by_name: HashMap<Arc<str>, Arc<FileRecord>>,
    /// Content fingerprint -> canonical record. Mutated only under the
    /// write lock.
    by_fingerprint: HashMap<String, Arc<FileRecord>>,
    /// Clock-sweep cursor for open-file eviction: key snapshot + position,
    /// refreshed when exhausted.
    sweep_keys: Vec<Arc<str>>,
    sweep_pos: usize,
}

impl FileTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(FileMap {
                by_name: HashMap::new(),
                by_fingerprint: HashMap::new(),
                sweep_keys: Vec::new(),
                sweep_pos: 0,
            }),
        }
    }

    /// Look up or open a file, returning its canonical record.
    ///
    /// 1. Read lock: if present, follow the duplicate link and return.
    /// 2. Unlocked: open the file (slow).
    /// 3. Write lock: re-check (another thread may have won), fingerprint
    ///    dedup, enforce the open-file budget, insert.
    pub(crate) fn find_or_create(
        &self,
        cache: &ImageCache,
        thread: &PerThreadInfo,
        filename: &str,
    ) -> Arc<FileRecord> {
        {
            let inner = self.inner.read();
            if let Some(record) = inner.by_name.get(filename) {
                let record = canonical(record);
                record.mark_used();
                return record;
            }
        }

        let start = Instant::now();
        let newcomer = Arc::new(FileRecord::open_new(cache, thread, filename));
        let open_us = start.elapsed().as_micros() as u64;
        thread
            .stats
            .fileio_time_us
            .fetch_add(open_us, std::sync::atomic::Ordering::Relaxed);
        thread
            .stats
            .fileopen_time_us
            .fetch_add(open_us, std::sync::atomic::Ordering::Relaxed);
        newcomer.add_io_time_us(open_us);

        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_name.get(filename) {
            // Another thread opened it while we were unlocked; ours is
            // discarded (Drop closes its reader).
            let existing = canonical(existing);
            existing.mark_used();
            return existing;
        }

        // Same pixels opened under a different name? The fingerprint says
        // so, but wrap modes, datatype, cube layout, and orientation must
        // also agree before the records can share tiles.
        if let Some(fingerprint) = newcomer.fingerprint() {
            match inner.by_fingerprint.get(&fingerprint) {
                None => {
                    inner
                        .by_fingerprint
                        .insert(fingerprint, Arc::clone(&newcomer));
                }
                Some(canonical_record) => {
                    if newcomer.dedup_matches(canonical_record) {
                        debug!(
                            file = %newcomer.filename(),
                            duplicates = %canonical_record.filename(),
                            "fingerprint match"
                        );
                        newcomer.set_duplicate(Arc::clone(canonical_record));
                        newcomer.close();
                    }
                }
            }
        }

        self.enforce_open_file_limit(&mut inner, cache);
        inner
            .by_name
            .insert(Arc::from(filename), Arc::clone(&newcomer));

        match newcomer.duplicate() {
            Some(canonical_record) => {
                canonical_record.mark_used();
                canonical_record
            }
            None => {
                thread
                    .stats
                    .unique_files
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                newcomer.mark_used();
                newcomer
            }
        }
    }

    /// Two-chance clock sweep over the records: release() clears the used
    /// flag on the first visit and closes the reader on the second, until
    /// the open count is below the budget.
    fn enforce_open_file_limit(&self, inner: &mut FileMap, cache: &ImageCache) {
        let max = cache.max_open_files();
        let open_files = cache.open_files_handle();
        while open_files.current() >= max {
            if open_files.current() == 0 || inner.by_name.is_empty() {
                break;
            }
            if inner.sweep_pos >= inner.sweep_keys.len() {
                inner.sweep_keys = inner.by_name.keys().cloned().collect();
                inner.sweep_pos = 0;
            }
            let key = Arc::clone(&inner.sweep_keys[inner.sweep_pos]);
            inner.sweep_pos += 1;
            if let Some(record) = inner.by_name.get(&key) {
                record.release();
            }
        }
    }

    /// Look up an existing record by the name it was requested under.
    pub(crate) fn get(&self, filename: &str) -> Option<Arc<FileRecord>> {
        self.inner.read().by_name.get(filename).cloned()
    }

    /// Snapshot of (table key, record) pairs.
    pub(crate) fn entries(&self) -> Vec<(Arc<str>, Arc<FileRecord>)> {
        self.inner
            .read()
            .by_name
            .iter()
            .map(|(name, record)| (Arc::clone(name), Arc::clone(record)))
            .collect()
    }

    /// Run `f` on a record while holding the table write lock, so no other
    /// thread can resolve the file mid-invalidation.
    pub(crate) fn with_record_locked(&self, record: &Arc<FileRecord>, f: impl FnOnce(&FileRecord)) {
        let _guard = self.inner.write();
        f(record);
    }

    /// Drop the whole fingerprint index (full invalidation).
    pub(crate) fn clear_fingerprints(&self) {
        self.inner.write().by_fingerprint.clear();
    }
}

/// Follow a duplicate link to the canonical record (at most one hop).
fn canonical(record: &Arc<FileRecord>) -> Arc<FileRecord> {
    match record.duplicate() {
        Some(canonical_record) => canonical_record,
        None => Arc::clone(record),
    }
}
