//! The cache engine.
//!
//! [`ImageCache`] owns the file table and the tile table, orchestrates the
//! per-thread microcaches, enforces the two resource budgets, and exposes
//! the public query surface. One process-wide shared instance is available
//! through [`ImageCache::create`]; independent instances through
//! [`ImageCache::with_factory`].

use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::file::{FileRecord, FileTable, OpenFiles};
use crate::perthread::{self, PerThreadInfo, ThreadHandles};
use crate::pixel::{convert_pixel, PixelFormat};
use crate::reader::{self, ReaderFactory};
use crate::spec::{AttrType, AttrValue, ImageSpec};
use crate::stats::{memformat, onefile_stat_line, timeformat, Statistics, FILE_TABLE_HEADER};
use crate::tile::{TileID, TileRecord, TileTable};

static SHARED_CACHE: OnceCell<Arc<ImageCache>> = OnceCell::new();
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Tile Handle
// =============================================================================

/// An opaque handle to a cached tile.
///
/// Holding a `Tile` keeps a reference on the underlying record, so the tile
/// cannot be reclaimed while a caller is inspecting its pixels. Give it back
/// with [`ImageCache::release_tile`] (or just drop it).
pub struct Tile {
    record: Arc<TileRecord>,
}

impl Tile {
    /// Whether the underlying read succeeded.
    pub fn valid(&self) -> bool {
        self.record.valid()
    }
}

// =============================================================================
// ImageCache
// =============================================================================

pub struct ImageCache {
    id: u64,
    config: RwLock<CacheConfig>,
    files: FileTable,
    tiles: TileTable,
    open_files: Arc<OpenFiles>,
    factory: Arc<dyn ReaderFactory>,
    /// Purge flags and stats of every thread that ever touched this cache.
    threads: Mutex<Vec<ThreadHandles>>,
}

impl ImageCache {
    /// Get a cache instance.
    ///
    /// With `shared` the process-wide instance is returned, constructed on
    /// first call with the registered reader factory
    /// ([`crate::reader::register_reader_factory`]) and never destroyed
    /// before process exit. Otherwise a fresh independent instance is
    /// returned.
    pub fn create(shared: bool) -> Arc<ImageCache> {
        if shared {
            Arc::clone(
                SHARED_CACHE.get_or_init(|| ImageCache::with_factory(reader::registered_factory())),
            )
        } else {
            ImageCache::with_factory(reader::registered_factory())
        }
    }

    /// Create an independent instance opening files through `factory`.
    pub fn with_factory(factory: Arc<dyn ReaderFactory>) -> Arc<ImageCache> {
        Arc::new(ImageCache {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            config: RwLock::new(CacheConfig::default()),
            files: FileTable::new(),
            tiles: TileTable::new(),
            open_files: Arc::new(OpenFiles::new()),
            factory,
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Release a handle obtained from [`ImageCache::create`].
    ///
    /// For the shared instance this only drops the handle; the underlying
    /// cache lives until process exit so other holders are unaffected.
    pub fn destroy(cache: Arc<ImageCache>) {
        drop(cache);
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set a configuration attribute. Unknown names, read-only attributes,
    /// and type mismatches return false and change nothing.
    pub fn attribute(&self, name: &str, value: AttrValue) -> bool {
        self.config.write().set_attribute(name, &value)
    }

    /// Query a configuration attribute.
    pub fn getattribute(&self, name: &str) -> Option<AttrValue> {
        self.config.read().get_attribute(name)
    }

    /// Resolve a filename against the search path: the first existing match
    /// wins, otherwise the name is returned unchanged.
    pub fn resolve_filename(&self, filename: &str) -> String {
        if Path::new(filename).exists() {
            return filename.to_string();
        }
        let config = self.config.read();
        for dir in &config.searchdirs {
            let candidate = dir.join(filename);
            if candidate.exists() {
                return candidate.to_string_lossy().into_owned();
            }
        }
        filename.to_string()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of the spec of one subimage, opening the file lazily.
    pub fn get_imagespec(
        &self,
        filename: &str,
        subimage: usize,
    ) -> Result<ImageSpec, CacheError> {
        let thread = self.thread_info();
        let file = self.find_file(&thread, filename);
        if file.broken() {
            return Err(self.file_error(&thread, filename, &file));
        }
        match file.spec(subimage) {
            Some(spec) => Ok(spec),
            None => Err(self.fail(
                &thread,
                CacheError::BadSubimage {
                    filename: filename.to_string(),
                    subimage,
                    count: file.subimages(),
                },
            )),
        }
    }

    /// Typed metadata query: the well-known names (`resolution`,
    /// `texturetype`, `textureformat`, `fileformat`, `channels`, `format`,
    /// `cachedformat`), falling through to any attribute in the spec, with
    /// an int-to-float coercion when the caller asks for float.
    pub fn get_image_info(
        &self,
        filename: &str,
        name: &str,
        want: AttrType,
    ) -> Result<AttrValue, CacheError> {
        let thread = self.thread_info();
        let file = self.find_file(&thread, filename);
        if file.broken() {
            return Err(self.file_error(&thread, filename, &file));
        }
        let Some(spec) = file.spec(0) else {
            return Err(self.file_error(&thread, filename, &file));
        };
        match (name, want) {
            ("resolution", AttrType::IntList) => {
                Ok(AttrValue::IntList(vec![spec.width, spec.height]))
            }
            ("texturetype", AttrType::String) => Ok(AttrValue::String(
                file.tex_format().texture_type().to_string(),
            )),
            ("textureformat", AttrType::String) => {
                Ok(AttrValue::String(file.tex_format().name().to_string()))
            }
            ("fileformat", AttrType::String) => Ok(AttrValue::String(file.format_name())),
            ("channels", AttrType::Int) => Ok(AttrValue::Int(spec.nchannels)),
            ("channels", AttrType::Float) => Ok(AttrValue::Float(spec.nchannels as f32)),
            ("format", AttrType::Int) => Ok(AttrValue::Int(spec.format.code())),
            ("cachedformat" | "cachedpixeltype", AttrType::Int) => {
                Ok(AttrValue::Int(file.datatype().code()))
            }
            _ => match spec.find_attribute(name) {
                Some(value) if value.attr_type() == want => Ok(value.clone()),
                Some(AttrValue::Int(i)) if want == AttrType::Float => {
                    Ok(AttrValue::Float(*i as f32))
                }
                Some(AttrValue::IntList(v)) if want == AttrType::FloatList => Ok(
                    AttrValue::FloatList(v.iter().map(|i| *i as f32).collect()),
                ),
                Some(value) => Err(self.fail(
                    &thread,
                    CacheError::TypeMismatch {
                        name: name.to_string(),
                        requested: want,
                        found: value.attr_type(),
                    },
                )),
                None => Err(self.fail(
                    &thread,
                    CacheError::UnknownAttribute {
                        name: name.to_string(),
                        filename: filename.to_string(),
                    },
                )),
            },
        }
    }

    /// Copy a rectangular (or box) region of pixels into `out`, converting
    /// to `format`. Pixels whose tile is missing or failed to read are
    /// zero-filled; if any were, the call returns `ReadFailed` after
    /// filling everything else.
    #[allow(clippy::too_many_arguments)]
    pub fn get_pixels(
        &self,
        filename: &str,
        subimage: usize,
        xbegin: i32,
        xend: i32,
        ybegin: i32,
        yend: i32,
        zbegin: i32,
        zend: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<(), CacheError> {
        let thread = self.thread_info();
        let file = self.find_file(&thread, filename);
        if file.broken() {
            return Err(self.file_error(&thread, filename, &file));
        }
        let Some(spec) = file.spec(subimage) else {
            return Err(self.fail(
                &thread,
                CacheError::BadSubimage {
                    filename: filename.to_string(),
                    subimage,
                    count: file.subimages(),
                },
            ));
        };
        let npixels = (xend - xbegin).max(0) as usize
            * (yend - ybegin).max(0) as usize
            * (zend - zbegin).max(0) as usize;
        let needed = npixels * spec.nchannels as usize * format.bytes();
        if out.len() < needed {
            return Err(self.fail(
                &thread,
                CacheError::ReadFailed(format!(
                    "output buffer holds {} bytes but the region needs {}",
                    out.len(),
                    needed
                )),
            ));
        }
        if self.fetch_pixels(
            &file, &thread, subimage, xbegin, xend, ybegin, yend, zbegin, zend, format, out,
        ) {
            Ok(())
        } else {
            Err(self.fail(
                &thread,
                CacheError::ReadFailed(format!(
                    "one or more tiles of \"{filename}\" could not be read"
                )),
            ))
        }
    }

    /// Fetch a tile for inspection, snapping (x, y, z) to the containing
    /// tile origin. `None` if the file is broken, the subimage is out of
    /// range, or the read failed.
    pub fn get_tile(
        &self,
        filename: &str,
        subimage: usize,
        x: i32,
        y: i32,
        z: i32,
    ) -> Option<Tile> {
        let thread = self.thread_info();
        let file = self.find_file(&thread, filename);
        if file.broken() {
            self.file_error(&thread, filename, &file);
            return None;
        }
        let spec = match file.spec(subimage) {
            Some(spec) => spec,
            None => {
                self.fail(
                    &thread,
                    CacheError::BadSubimage {
                        filename: filename.to_string(),
                        subimage,
                        count: file.subimages(),
                    },
                );
                return None;
            }
        };
        let tile_depth = spec.tile_depth.max(1);
        let x = spec.x + ((x - spec.x) / spec.tile_width) * spec.tile_width;
        let y = spec.y + ((y - spec.y) / spec.tile_height) * spec.tile_height;
        let z = spec.z + ((z - spec.z) / tile_depth) * tile_depth;
        let id = TileID::new(file, subimage, x, y, z);
        if self.find_tile(&id, &thread) {
            let record = thread.current_tile()?;
            record.touch();
            Some(Tile { record })
        } else {
            None
        }
    }

    /// Give back a tile handle obtained from [`ImageCache::get_tile`].
    pub fn release_tile(&self, tile: Tile) {
        tile.record.touch();
    }

    /// The raw pixels of a held tile, plus the in-cache channel format.
    pub fn tile_pixels<'a>(&self, tile: &'a Tile) -> (&'a [u8], PixelFormat) {
        (tile.record.pixels(), tile.record.format())
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Forget everything cached about one file: drop its tiles, reset and
    /// reopen its record, and purge every thread's microcache.
    pub fn invalidate(&self, filename: &str) {
        let thread = self.thread_info();
        let Some(file) = self.files.get(filename) else {
            return;
        };
        self.tiles.remove_file(&file);
        self.files
            .with_record_locked(&file, |record| record.invalidate(self, &thread));
        self.purge_all_threads();
    }

    /// Invalidate every file whose on-disk mod-time changed (every file,
    /// with `force`), and drop the fingerprint index. Broken files are
    /// always invalidated so a repaired file comes back without `force`.
    pub fn invalidate_all(&self, force: bool) {
        let mut stale: Vec<Arc<str>> = Vec::new();
        for (name, record) in self.files.entries() {
            if force || record.broken() {
                stale.push(name);
                continue;
            }
            let on_disk = std::fs::metadata(record.filename())
                .ok()
                .and_then(|m| m.modified().ok());
            if on_disk != record.mod_time() {
                stale.push(name);
            }
        }
        for name in stale {
            self.invalidate(&name);
        }
        self.files.clear_fingerprints();
        self.purge_all_threads();
    }

    // =========================================================================
    // Errors & Statistics
    // =========================================================================

    /// Consume and return this thread's accumulated error messages,
    /// newline-separated. Empty if nothing failed since the last call.
    pub fn geterror(&self) -> String {
        self.thread_info().take_error()
    }

    /// A merged snapshot of all per-thread counters and engine gauges.
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for handles in self.threads.lock().iter() {
            let s = &handles.stats;
            stats.find_tile_calls += s.find_tile_calls.load(Ordering::Relaxed);
            stats.find_tile_microcache_misses +=
                s.find_tile_microcache_misses.load(Ordering::Relaxed);
            stats.find_tile_cache_misses += s.find_tile_cache_misses.load(Ordering::Relaxed);
            stats.files_totalsize += s.files_totalsize.load(Ordering::Relaxed);
            stats.bytes_read += s.bytes_read.load(Ordering::Relaxed);
            stats.unique_files += s.unique_files.load(Ordering::Relaxed);
            stats.fileio_time += s.fileio_time_us.load(Ordering::Relaxed) as f64 / 1e6;
            stats.fileopen_time += s.fileopen_time_us.load(Ordering::Relaxed) as f64 / 1e6;
        }
        stats.open_files_created = self.open_files.created();
        stats.open_files_current = self.open_files.current();
        stats.open_files_peak = self.open_files.peak();
        stats.tiles_created = self.tiles.created();
        stats.tiles_current = self.tiles.count();
        stats.tiles_peak = self.tiles.peak_count();
        stats.cache_memory_used = self.tiles.mem_used();
        stats.cache_memory_peak = self.tiles.peak_mem();
        stats
    }

    /// Human-readable statistics report. Level 0 is empty, level 1 a
    /// summary, level 2 adds the per-file table.
    pub fn getstats(&self, level: i32) -> String {
        let stats = self.statistics();
        let automip = self.automip();
        let mut out = String::new();

        if level > 0 {
            out.push_str("tilecache ImageCache statistics\n");
            if stats.unique_files > 0 {
                out.push_str(&format!("  Images : {} unique\n", stats.unique_files));
                out.push_str(&format!(
                    "    Readers : {} created, {} current, {} peak\n",
                    stats.open_files_created, stats.open_files_current, stats.open_files_peak
                ));
                out.push_str(&format!(
                    "    Total size of all images referenced : {}\n",
                    memformat(stats.files_totalsize as f64)
                ));
                out.push_str(&format!(
                    "    Read from disk : {}\n",
                    memformat(stats.bytes_read as f64)
                ));
            } else {
                out.push_str("  No images opened\n");
            }
            if stats.fileio_time > 0.001 {
                out.push_str(&format!(
                    "    File I/O time : {}\n",
                    timeformat(stats.fileio_time)
                ));
                out.push_str(&format!(
                    "    File open time only : {}\n",
                    timeformat(stats.fileopen_time)
                ));
            }
            if stats.tiles_created > 0 {
                out.push_str(&format!(
                    "  Tiles: {} created, {} current, {} peak\n",
                    stats.tiles_created, stats.tiles_current, stats.tiles_peak
                ));
                out.push_str(&format!(
                    "    total tile requests : {}\n",
                    stats.find_tile_calls
                ));
                out.push_str(&format!(
                    "    micro-cache misses : {} ({:.1}%)\n",
                    stats.find_tile_microcache_misses,
                    percentage(stats.find_tile_microcache_misses, stats.find_tile_calls)
                ));
                out.push_str(&format!(
                    "    main cache misses : {} ({:.1}%)\n",
                    stats.find_tile_cache_misses,
                    percentage(stats.find_tile_cache_misses, stats.find_tile_calls)
                ));
            }
            out.push_str(&format!(
                "    Peak cache memory : {}\n",
                memformat(stats.cache_memory_peak as f64)
            ));
        }

        let mut files: Vec<Arc<FileRecord>> = self
            .files
            .entries()
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        files.sort_by(|a, b| a.filename().cmp(b.filename()));

        let mut total_opens = 0u64;
        let mut total_tiles = 0u64;
        let mut total_bytes = 0u64;
        let mut total_iotime = 0.0f64;
        let mut total_duplicates = 0usize;
        let mut total_untiled = 0usize;
        let mut total_unmipped = 0usize;
        for file in &files {
            total_opens += file.times_opened();
            total_tiles += file.tiles_read();
            total_bytes += file.bytes_read();
            total_iotime += file.io_time();
            if file.duplicate().is_some() {
                total_duplicates += 1;
                continue;
            }
            if file.untiled() {
                total_untiled += 1;
            }
            if file.unmipped() && automip {
                total_unmipped += 1;
            }
        }

        if level >= 2 && !files.is_empty() {
            out.push_str("  Image file statistics:\n");
            out.push_str(FILE_TABLE_HEADER);
            out.push('\n');
            for (i, file) in files.iter().enumerate() {
                if file.broken() {
                    out.push_str(&format!("BROKEN    {}\n", file.filename()));
                    continue;
                }
                out.push_str(&onefile_stat_line(Some(i + 1), file, true, automip));
                out.push('\n');
            }
            out.push_str(&format!(
                "\n  Tot:  {:4} {:7} {:8.1} {:>9}\n",
                total_opens,
                total_tiles,
                total_bytes as f64 / (1024.0 * 1024.0),
                timeformat(total_iotime)
            ));
        }

        if level > 0 {
            if total_duplicates > 0 {
                out.push_str(&format!(
                    "  {total_duplicates} were exact duplicates of other images\n"
                ));
            }
            if total_untiled > 0 || total_unmipped > 0 {
                out.push_str(&format!(
                    "  {total_untiled} not tiled, {total_unmipped} not MIP-mapped\n"
                ));
            }
            if files.len() >= 50 {
                self.append_hotspots(&mut out, &mut files, total_bytes, total_iotime, automip);
            }
        }

        out
    }

    /// The "top files by ..." lists for big runs.
    fn append_hotspots(
        &self,
        out: &mut String,
        files: &mut [Arc<FileRecord>],
        total_bytes: u64,
        total_iotime: f64,
        automip: bool,
    ) {
        const TOP_N: usize = 3;
        files.sort_by(|a, b| b.bytes_read().cmp(&a.bytes_read()));
        out.push_str("  Top files by bytes read:\n");
        for (i, file) in files.iter().filter(|f| !f.broken()).take(TOP_N).enumerate() {
            out.push_str(&format!(
                "    {}   {:6.1} MB ({:4.1}%)  {}\n",
                i + 1,
                file.bytes_read() as f64 / (1024.0 * 1024.0),
                percentage(file.bytes_read(), total_bytes),
                onefile_stat_line(None, file, false, automip)
            ));
        }
        files.sort_by(|a, b| b.io_time().partial_cmp(&a.io_time()).unwrap_or(std::cmp::Ordering::Equal));
        out.push_str("  Top files by I/O time:\n");
        for (i, file) in files.iter().filter(|f| !f.broken()).take(TOP_N).enumerate() {
            out.push_str(&format!(
                "    {}   {:>9} ({:4.1}%)   {}\n",
                i + 1,
                timeformat(file.io_time()),
                if total_iotime > 0.0 {
                    100.0 * file.io_time() / total_iotime
                } else {
                    0.0
                },
                onefile_stat_line(None, file, false, automip)
            ));
        }
        out.push_str("  Files with slowest I/O rates:\n");
        let mut slowest: Vec<&Arc<FileRecord>> = files
            .iter()
            .filter(|f| !f.broken() && f.io_time() >= 0.25)
            .collect();
        slowest.sort_by(|a, b| {
            let ra = a.bytes_read() as f64 / a.io_time().max(1e-9);
            let rb = b.bytes_read() as f64 / b.io_time().max(1e-9);
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
        });
        if slowest.is_empty() {
            out.push_str("    (nothing took more than 0.25s)\n");
        } else {
            for (i, file) in slowest.iter().take(TOP_N).enumerate() {
                let mb = file.bytes_read() as f64 / (1024.0 * 1024.0);
                out.push_str(&format!(
                    "    {}   {:6.2} MB/s ({:.2}MB/{:.2}s)   {}\n",
                    i + 1,
                    mb / file.io_time().max(1e-9),
                    mb,
                    file.io_time(),
                    onefile_stat_line(None, file, false, automip)
                ));
            }
        }
    }

    // =========================================================================
    // Internal plumbing
    // =========================================================================

    /// This thread's per-thread info, registering it on first touch and
    /// honoring any pending purge request.
    fn thread_info(&self) -> Rc<PerThreadInfo> {
        let info = perthread::thread_info_for(self.id, || {
            let info = Rc::new(PerThreadInfo::new());
            self.threads.lock().push(info.handles());
            info
        });
        info.check_purge();
        info
    }

    fn purge_all_threads(&self) {
        for handles in self.threads.lock().iter() {
            handles.purge.store(true, Ordering::Release);
        }
    }

    /// Append to the calling thread's error queue.
    pub(crate) fn record_error(&self, thread: &PerThreadInfo, message: String) {
        thread.append_error(&message);
    }

    fn fail(&self, thread: &PerThreadInfo, err: CacheError) -> CacheError {
        thread.append_error(&err.to_string());
        err
    }

    /// Map a broken record onto the public error kind.
    fn file_error(
        &self,
        thread: &PerThreadInfo,
        filename: &str,
        file: &FileRecord,
    ) -> CacheError {
        let err = if file.not_found() {
            CacheError::NotFound {
                filename: filename.to_string(),
            }
        } else if file.unsupported() {
            CacheError::UnsupportedConfig(format!(
                "\"{filename}\" cannot be served with the current configuration"
            ))
        } else {
            CacheError::Broken {
                filename: filename.to_string(),
            }
        };
        thread.append_error(&err.to_string());
        err
    }

    fn find_file(&self, thread: &PerThreadInfo, filename: &str) -> Arc<FileRecord> {
        self.files.find_or_create(self, thread, filename)
    }

    /// The tile fast path: microcache first, then the main table. On return
    /// the thread's current-tile slot holds the tile (even an invalid one).
    pub(crate) fn find_tile(&self, id: &TileID, thread: &PerThreadInfo) -> bool {
        thread
            .stats
            .find_tile_calls
            .fetch_add(1, Ordering::Relaxed);
        if let Some(tile) = thread.microcache_lookup(id) {
            return tile.valid();
        }
        self.find_tile_main_cache(id, thread)
    }

    /// Microcache miss: consult the shared table, reading (outside every
    /// table lock) on a miss there too.
    fn find_tile_main_cache(&self, id: &TileID, thread: &PerThreadInfo) -> bool {
        thread
            .stats
            .find_tile_microcache_misses
            .fetch_add(1, Ordering::Relaxed);
        if let Some(tile) = self.tiles.lookup(id) {
            let valid = tile.valid();
            thread.remember_tile(tile);
            return valid;
        }
        thread
            .stats
            .find_tile_cache_misses
            .fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let tile = Arc::new(TileRecord::new_read(id.clone(), self, thread));
        let micros = start.elapsed().as_micros() as u64;
        thread
            .stats
            .fileio_time_us
            .fetch_add(micros, Ordering::Relaxed);
        id.file().add_io_time_us(micros);
        let live = self.add_tile_to_cache(tile, thread);
        let valid = live.valid();
        thread.remember_tile(live);
        valid
    }

    /// Insert a tile, enforcing the memory budget first. Returns the
    /// surviving record (the earlier one on a collision).
    pub(crate) fn add_tile_to_cache(
        &self,
        tile: Arc<TileRecord>,
        _thread: &PerThreadInfo,
    ) -> Arc<TileRecord> {
        let max_bytes = self.max_memory_bytes();
        self.tiles.insert(tile, max_bytes)
    }

    pub(crate) fn tile_in_cache(&self, id: &TileID) -> bool {
        self.tiles.contains(id)
    }

    /// Pixel-by-pixel region copy through the microcache. Missing or
    /// invalid tiles zero-fill their pixels; the return is the AND of all
    /// tile fetches.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fetch_pixels(
        &self,
        file: &Arc<FileRecord>,
        thread: &PerThreadInfo,
        subimage: usize,
        xbegin: i32,
        xend: i32,
        ybegin: i32,
        yend: i32,
        zbegin: i32,
        zend: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> bool {
        let Some(spec) = file.spec(subimage) else {
            return false;
        };
        let nchannels = spec.nchannels as usize;
        let pixel_bytes = nchannels * format.bytes();
        let datatype = file.datatype();
        let tile_depth = spec.tile_depth.max(1);
        let mut ok = true;
        let mut offset = 0usize;
        for z in zbegin..zend {
            let tz = z - (z % tile_depth);
            for y in ybegin..yend {
                let ty = y - (y % spec.tile_height);
                for x in xbegin..xend {
                    let tx = x - (x % spec.tile_width);
                    let id = TileID::new(Arc::clone(file), subimage, tx, ty, tz);
                    ok &= self.find_tile(&id, thread);
                    let dst = &mut out[offset..offset + pixel_bytes];
                    let filled = thread.with_current_tile(|tile| {
                        match tile.and_then(|t| if t.valid() { t.data(x, y, z) } else { None }) {
                            Some(src) => {
                                convert_pixel(src, datatype, dst, format, nchannels);
                                true
                            }
                            None => false,
                        }
                    });
                    if !filled {
                        dst.fill(0);
                    }
                    offset += pixel_bytes;
                }
            }
        }
        ok
    }

    // Config snapshots used by FileRecord and the tables.

    pub(crate) fn reader_factory(&self) -> Arc<dyn ReaderFactory> {
        Arc::clone(&self.factory)
    }

    pub(crate) fn open_files_handle(&self) -> Arc<OpenFiles> {
        Arc::clone(&self.open_files)
    }

    pub(crate) fn autotile(&self) -> i32 {
        self.config.read().autotile
    }

    pub(crate) fn automip(&self) -> bool {
        self.config.read().automip
    }

    pub(crate) fn forcefloat(&self) -> bool {
        self.config.read().forcefloat
    }

    pub(crate) fn accept_untiled(&self) -> bool {
        self.config.read().accept_untiled
    }

    pub(crate) fn max_open_files(&self) -> usize {
        self.config.read().max_open_files
    }

    pub(crate) fn max_memory_bytes(&self) -> usize {
        self.config.read().max_memory_bytes
    }
}

impl Drop for ImageCache {
    fn drop(&mut self) {
        let level = self.config.read().statslevel;
        if level > 0 {
            info!("{}", self.getstats(level));
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}
