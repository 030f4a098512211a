//! One opened (or openable) image file.
//!
//! A [`FileRecord`] is created the first time a filename is requested and
//! lives for the lifetime of the cache. Its reader handle comes and goes:
//! opened lazily on first use, closed by the open-file clock sweep, reopened
//! on the next read. The subimage specs and parsed texture metadata survive
//! a close, so reopening is cheap.
//!
//! State machine: unopened -> open attempt -> {open | broken}. From open,
//! `release` (second chance exhausted) returns to closed-with-known-specs,
//! which re-enters open on the next access. `invalidate` returns all the way
//! to unopened and immediately re-opens to refresh the specs.

use std::cell::RefCell;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::error::ReaderError;
use crate::perthread::PerThreadInfo;
use crate::pixel::{bilerp, bytes_to_f32_slice, convert_image, f32_to_sample, PixelFormat};
use crate::reader::ImageReader;
use crate::spec::{
    parse_wrapmodes, pow2_roundup, AttrValue, CubeLayout, ImageSpec, TexFormat, WrapMode,
};
use crate::tile::{TileID, TileRecord};

// =============================================================================
// Open-file Accounting
// =============================================================================

/// Process-wide (per cache) count of simultaneously open reader handles.
///
/// Shared by `Arc` between the cache and every record so a record can close
/// its reader without reaching back into the engine.
pub(crate) struct OpenFiles {
    current: AtomicUsize,
    created: AtomicU64,
    peak: AtomicUsize,
}

impl OpenFiles {
    pub(crate) fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn incr(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        let now = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    fn decr(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

// =============================================================================
// File Record
// =============================================================================

/// The reader handle. Lives behind the per-file *recursive* reader mutex:
/// the unmipped synthesis path re-enters the engine (and therefore this
/// lock) on the same thread while generating a tile. Mutable access goes
/// through the RefCell with borrows scoped to single reader calls so the
/// re-entrant path never observes an outstanding borrow.
struct ReaderState {
    reader: Option<Box<dyn ImageReader>>,
}

/// Parsed metadata, retained across reader closes. Written only while the
/// reader mutex is held (first open, invalidate); read freely.
struct FileMeta {
    specs: Vec<ImageSpec>,
    format_name: String,
    tex_format: TexFormat,
    swrap: WrapMode,
    twrap: WrapMode,
    cube_layout: CubeLayout,
    y_up: bool,
    fingerprint: Option<String>,
    datatype: PixelFormat,
    untiled: bool,
    unmipped: bool,
    mod_time: Option<SystemTime>,
}

impl FileMeta {
    fn empty() -> Self {
        Self {
            specs: Vec::new(),
            format_name: String::new(),
            tex_format: TexFormat::Texture,
            swrap: WrapMode::Black,
            twrap: WrapMode::Black,
            cube_layout: CubeLayout::Unknown,
            y_up: false,
            fingerprint: None,
            datatype: PixelFormat::F32,
            untiled: false,
            unmipped: false,
            mod_time: None,
        }
    }
}

pub struct FileRecord {
    /// Search-path-resolved filename.
    filename: Arc<str>,
    reader: ReentrantMutex<RefCell<ReaderState>>,
    meta: RwLock<FileMeta>,
    /// The canonical record this one duplicates, if fingerprint dedup
    /// matched. A duplicate keeps no reader of its own.
    duplicate: Mutex<Option<Arc<FileRecord>>>,
    used: AtomicBool,
    broken: AtomicBool,
    not_found: AtomicBool,
    unsupported: AtomicBool,
    mip_used: AtomicBool,
    times_opened: AtomicU64,
    tiles_read: AtomicU64,
    bytes_read: AtomicU64,
    io_time_us: AtomicU64,
    open_files: Arc<OpenFiles>,
}

impl FileRecord {
    /// Create a record for `filename` and attempt the first open.
    ///
    /// Runs *outside* any table lock; the expensive disk open must not stall
    /// other threads. Failure leaves the record broken rather than erroring,
    /// so the failure is cached too.
    pub(crate) fn open_new(
        cache: &ImageCache,
        thread: &PerThreadInfo,
        filename: &str,
    ) -> FileRecord {
        let resolved = cache.resolve_filename(filename);
        let record = FileRecord {
            filename: Arc::from(resolved.as_str()),
            reader: ReentrantMutex::new(RefCell::new(ReaderState { reader: None })),
            meta: RwLock::new(FileMeta::empty()),
            duplicate: Mutex::new(None),
            used: AtomicBool::new(true),
            broken: AtomicBool::new(false),
            not_found: AtomicBool::new(false),
            unsupported: AtomicBool::new(false),
            mip_used: AtomicBool::new(false),
            times_opened: AtomicU64::new(0),
            tiles_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            io_time_us: AtomicU64::new(0),
            open_files: cache.open_files_handle(),
        };
        record.open(cache, thread);
        if !record.broken() {
            record.meta.write().mod_time = disk_mod_time(&record.filename);
        }
        record
    }

    /// Open the reader if it isn't already. Idempotent; a record that has
    /// failed an open stays broken until invalidated.
    pub(crate) fn open(&self, cache: &ImageCache, thread: &PerThreadInfo) -> bool {
        let guard = self.reader.lock();
        if guard.borrow().reader.is_some() {
            return !self.broken();
        }
        if self.broken() {
            return false;
        }

        let mut reader = match cache.reader_factory().open(&self.filename) {
            Ok(reader) => reader,
            Err(err) => {
                if matches!(err, ReaderError::NotFound(_)) {
                    self.not_found.store(true, Ordering::Relaxed);
                }
                warn!(file = %self.filename, error = %err, "open failed");
                cache.record_error(thread, err.to_string());
                self.broken.store(true, Ordering::Relaxed);
                return false;
            }
        };
        let format_name = reader.format_name().to_string();
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        self.open_files.incr();
        self.mark_used();

        // Reopening after a sweep close: the specs were kept, nothing more
        // to learn.
        if !self.meta.read().specs.is_empty() {
            guard.borrow_mut().reader = Some(reader);
            return true;
        }

        let autotile = cache.autotile();
        let automip = cache.automip();

        // First open: enumerate every subimage and record its spec,
        // synthesizing tile extents for scanline sources.
        let mut specs: Vec<ImageSpec> = Vec::new();
        let mut untiled = false;
        let mut tempspec = reader.spec().clone();
        loop {
            if !specs.is_empty() && tempspec.nchannels != specs[0].nchannels {
                // A subimage with a different channel count than the rest is
                // not something the tile model can represent.
                cache.record_error(
                    thread,
                    format!(
                        "\"{}\" has subimages with differing channel counts",
                        self.filename
                    ),
                );
                self.broken.store(true, Ordering::Relaxed);
                self.open_files.decr();
                return false;
            }
            if tempspec.tile_width == 0 || tempspec.tile_height == 0 {
                untiled = true;
                if autotile > 0 {
                    tempspec.tile_width = autotile;
                    tempspec.tile_height = autotile;
                } else {
                    // No auto-tile: one tile as big as the whole image.
                    tempspec.tile_width = pow2_roundup(tempspec.width);
                    tempspec.tile_height = pow2_roundup(tempspec.height);
                }
                tempspec.tile_depth = 1;
            }
            thread
                .stats
                .files_totalsize
                .fetch_add(tempspec.image_bytes() as u64, Ordering::Relaxed);
            specs.push(tempspec);
            match reader.seek_subimage(specs.len()) {
                Some(next) => tempspec = next,
                None => break,
            }
        }

        if untiled && specs[0].depth > 1 {
            cache.record_error(
                thread,
                format!("\"{}\" is an untiled volume, which is unsupported", self.filename),
            );
            self.unsupported.store(true, Ordering::Relaxed);
            self.broken.store(true, Ordering::Relaxed);
            self.open_files.decr();
            return false;
        }

        let unmipped = specs.len() == 1;

        // A single-subimage file without an explicit textureformat tag gets
        // a synthesized pyramid when automip is on; the tag means somebody
        // built it as a texture and wants it exactly as authored.
        if unmipped && automip && specs[0].find_attribute("textureformat").is_none() {
            let mut w = specs[0].full_width;
            let mut h = specs[0].full_height;
            while w > 1 || h > 1 {
                // Ceiling halving, so a 100-wide level shrinks 50, 25, 13...
                w = ((w + 1) / 2).max(1);
                h = ((h + 1) / 2).max(1);
                let mut level = specs[0].clone();
                level.width = w;
                level.height = h;
                level.full_width = w;
                level.full_height = h;
                if autotile > 0 {
                    level.tile_width = autotile.min(w);
                    level.tile_height = autotile.min(h);
                } else {
                    level.tile_width = w;
                    level.tile_height = h;
                }
                level.tile_width = pow2_roundup(level.tile_width);
                level.tile_height = pow2_roundup(level.tile_height);
                specs.push(level);
            }
        }

        if untiled && !cache.accept_untiled() {
            cache.record_error(thread, format!("\"{}\" was untiled, rejecting", self.filename));
            self.unsupported.store(true, Ordering::Relaxed);
            self.broken.store(true, Ordering::Relaxed);
            self.open_files.decr();
            return false;
        }

        let mut tex_format = TexFormat::Texture;
        if let Some(AttrValue::String(tag)) = specs[0].find_attribute("textureformat") {
            if let Some(parsed) = TexFormat::from_name(tag) {
                tex_format = parsed;
            }
            if tex_format == TexFormat::Texture {
                // Plain textures sometimes carry nonsensical display
                // windows; clamp them to the data window.
                for spec in &mut specs {
                    spec.full_width = spec.full_width.min(spec.width);
                    spec.full_height = spec.full_height.min(spec.height);
                }
            }
        }

        let (swrap, twrap) = match specs[0].get_string_attribute("wrapmodes") {
            Some(modes) => parse_wrapmodes(modes),
            None => (WrapMode::Black, WrapMode::Black),
        };

        let mut y_up = false;
        let mut cube_layout = CubeLayout::Unknown;
        if tex_format == TexFormat::CubeFaceEnv {
            y_up = format_name == "openexr";
            let spec = &specs[0];
            let w = spec.full_width.max(spec.tile_width);
            let h = spec.full_height.max(spec.tile_height);
            if spec.width == 3 * w && spec.height == 2 * h {
                cube_layout = CubeLayout::ThreeByTwo;
            } else if spec.width == w && spec.height == 6 * h {
                cube_layout = CubeLayout::OneBySix;
            }
        }

        let fingerprint = specs[0]
            .get_string_attribute("ImageDescription")
            .and_then(parse_fingerprint);

        // In-cache channel type: float, unless the source is 8-bit and we
        // aren't forcing float.
        let datatype = if !cache.forcefloat() && specs[0].format == PixelFormat::U8 {
            PixelFormat::U8
        } else {
            PixelFormat::F32
        };

        debug!(
            file = %self.filename,
            format = %format_name,
            subimages = specs.len(),
            untiled,
            unmipped,
            "opened"
        );

        {
            let mut meta = self.meta.write();
            meta.specs = specs;
            meta.format_name = format_name;
            meta.tex_format = tex_format;
            meta.swrap = swrap;
            meta.twrap = twrap;
            meta.cube_layout = cube_layout;
            meta.y_up = y_up;
            meta.fingerprint = fingerprint;
            meta.datatype = datatype;
            meta.untiled = untiled;
            meta.unmipped = unmipped;
        }
        guard.borrow_mut().reader = Some(reader);
        true
    }

    /// Read one tile into `out`, opening lazily. Serialized on the per-file
    /// reader mutex. Dispatches to the unmipped-synthesis or untiled path
    /// when the tile doesn't physically exist in the file.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn read_tile(
        self: &Arc<Self>,
        cache: &ImageCache,
        thread: &PerThreadInfo,
        subimage: usize,
        x: i32,
        y: i32,
        z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> bool {
        let guard = self.reader.lock();
        if !self.open(cache, thread) {
            return false;
        }
        if subimage > 0 {
            self.mip_used.store(true, Ordering::Relaxed);
        }
        let (unmipped, untiled) = {
            let meta = self.meta.read();
            (meta.unmipped, meta.untiled)
        };
        if unmipped && subimage != 0 {
            return self.read_unmipped(cache, thread, subimage, x, y, z, format, out);
        }
        if untiled {
            return self.read_untiled(cache, thread, subimage, x, y, z, format, out);
        }

        let ok = {
            let mut state = guard.borrow_mut();
            match state.reader.as_mut() {
                Some(reader) => {
                    let mut ok = true;
                    if reader.current_subimage() != subimage {
                        ok = reader.seek_subimage(subimage).is_some();
                    }
                    if ok {
                        if let Err(err) = reader.read_tile(x, y, z, format, out) {
                            cache.record_error(thread, err.to_string());
                            ok = false;
                        }
                    }
                    ok
                }
                None => false,
            }
        };
        if ok {
            self.count_read(thread, out.len() as u64);
        }
        ok
    }

    /// Synthesize a tile of a pyramid level that doesn't physically exist by
    /// bilinearly sampling the next-finer level through the engine. The
    /// recursive `get_pixels` call re-enters this file's reader mutex on the
    /// same thread, which is why the mutex is recursive.
    #[allow(clippy::too_many_arguments)]
    fn read_unmipped(
        self: &Arc<Self>,
        cache: &ImageCache,
        thread: &PerThreadInfo,
        subimage: usize,
        x: i32,
        y: i32,
        _z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> bool {
        let (spec, upspec) = {
            let meta = self.meta.read();
            match (meta.specs.get(subimage), meta.specs.get(subimage - 1)) {
                (Some(spec), Some(upspec)) => (spec.clone(), upspec.clone()),
                _ => return false,
            }
        };
        let tw = spec.tile_width;
        let th = spec.tile_height;
        let nchannels = spec.nchannels as usize;

        let x = x - spec.x;
        let y = y - spec.y;
        let x0 = x - (x % tw);
        let x1 = (x0 + tw - 1).min(spec.full_width - 1);
        let y0 = y - (y % th);
        let y1 = (y0 + th - 1).min(spec.full_height - 1);

        // Generate in float, texel by texel, from bilinear lookups in the
        // finer level; convert to the requested format at the end. Texels
        // outside the full image stay zero.
        let mut lores = vec![0f32; tw as usize * th as usize * nchannels];
        let mut corner_bytes = vec![0u8; 4 * nchannels * PixelFormat::F32.bytes()];
        let mut corners = vec![0f32; 4 * nchannels];
        let mut result = vec![0f32; nchannels];
        let mut ok = true;
        for j in y0..=y1 {
            let yf = (j as f32 + 0.5) / spec.full_height as f32;
            let vy = yf * upspec.full_height as f32 - 0.5;
            let ylow = vy.floor() as i32;
            let yfrac = vy - vy.floor();
            for i in x0..=x1 {
                let xf = (i as f32 + 0.5) / spec.full_width as f32;
                let vx = xf * upspec.full_width as f32 - 0.5;
                let xlow = vx.floor() as i32;
                let xfrac = vx - vx.floor();
                ok &= cache.fetch_pixels(
                    self,
                    thread,
                    subimage - 1,
                    xlow,
                    xlow + 2,
                    ylow,
                    ylow + 2,
                    0,
                    1,
                    PixelFormat::F32,
                    &mut corner_bytes,
                );
                bytes_to_f32_slice(&corner_bytes, &mut corners);
                bilerp(
                    &corners[0..nchannels],
                    &corners[nchannels..2 * nchannels],
                    &corners[2 * nchannels..3 * nchannels],
                    &corners[3 * nchannels..4 * nchannels],
                    xfrac,
                    yfrac,
                    &mut result,
                );
                let base = ((j - y0) as usize * tw as usize + (i - x0) as usize) * nchannels;
                lores[base..base + nchannels].copy_from_slice(&result);
            }
        }

        let sample_bytes = format.bytes();
        for (k, value) in lores.iter().enumerate() {
            f32_to_sample(format, *value, &mut out[k * sample_bytes..]);
        }
        ok
    }

    /// Read a "tile" of a scanline-oriented file. With auto-tile on, the
    /// whole tile-row of scanlines must be decoded anyway, so every other
    /// tile in the row is pre-populated into the global cache. With
    /// auto-tile off, the single tile covers the whole image.
    #[allow(clippy::too_many_arguments)]
    fn read_untiled(
        self: &Arc<Self>,
        cache: &ImageCache,
        thread: &PerThreadInfo,
        subimage: usize,
        x: i32,
        y: i32,
        z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> bool {
        let guard = self.reader.lock();
        {
            let mut state = guard.borrow_mut();
            let Some(reader) = state.reader.as_mut() else {
                return false;
            };
            if reader.current_subimage() != subimage
                && reader.seek_subimage(subimage).is_none()
            {
                return false;
            }
        }
        let (spec, datatype) = {
            let meta = self.meta.read();
            match meta.specs.get(subimage) {
                Some(spec) => (spec.clone(), meta.datatype),
                None => return false,
            }
        };

        let mut ok = true;
        if cache.autotile() > 0 {
            let tw = spec.tile_width as usize;
            let th = spec.tile_height as usize;
            let nchannels = spec.nchannels as usize;
            let pixel_bytes = nchannels * format.bytes();
            let width = spec.width as usize;
            // Row buffer rounded up to a whole number of tiles so the
            // per-tile copies below never run past the end.
            let tiles_x = width.div_ceil(tw);
            let row_bytes = tw * tiles_x * pixel_bytes;
            let mut buf = vec![0u8; row_bytes * th];

            let yy = y - spec.y;
            let y0 = yy - (yy % spec.tile_height);
            let y1 = (y0 + spec.tile_height - 1).min(spec.height - 1);
            {
                let mut state = guard.borrow_mut();
                let Some(reader) = state.reader.as_mut() else {
                    return false;
                };
                for (row, scanline) in (y0..=y1).enumerate() {
                    let dst = &mut buf[row_bytes * row..row_bytes * row + width * pixel_bytes];
                    if let Err(err) = reader.read_scanline(scanline + spec.y, z, format, dst) {
                        cache.record_error(thread, err.to_string());
                        ok = false;
                        break;
                    }
                }
            }
            self.count_read(thread, ((y1 - y0 + 1) as usize * width * pixel_bytes) as u64);

            // Split the row: the requested tile goes to the caller, every
            // other tile in the row enters the cache if not already there.
            let xx = x - spec.x;
            let x0 = xx - (xx % spec.tile_width);
            let mut i = 0i32;
            while i < spec.width {
                let src = &buf[i as usize * pixel_bytes..];
                if i == x0 {
                    ok &= convert_image(
                        nchannels,
                        tw,
                        th,
                        1,
                        src,
                        format,
                        pixel_bytes,
                        row_bytes,
                        row_bytes * th,
                        out,
                        format,
                        pixel_bytes,
                        tw * pixel_bytes,
                        tw * th * pixel_bytes,
                    )
                    .is_ok();
                } else {
                    let id = TileID::new(Arc::clone(self), subimage, i + spec.x, y0 + spec.y, z);
                    if !cache.tile_in_cache(&id) {
                        let tile = TileRecord::new_from_memory(
                            id,
                            &spec,
                            datatype,
                            src,
                            format,
                            pixel_bytes,
                            row_bytes,
                            row_bytes * th,
                        );
                        ok &= tile.valid();
                        cache.add_tile_to_cache(Arc::new(tile), thread);
                    }
                }
                i += spec.tile_width;
            }
        } else {
            // The tile is the whole image; write with tile strides since
            // the tile extents were rounded up to powers of two.
            let pixel_bytes = spec.nchannels as usize * format.bytes();
            let row_bytes = spec.tile_width as usize * pixel_bytes;
            let read = {
                let mut state = guard.borrow_mut();
                let Some(reader) = state.reader.as_mut() else {
                    return false;
                };
                reader.read_image(
                    format,
                    out,
                    pixel_bytes,
                    row_bytes,
                    row_bytes * spec.tile_height as usize,
                )
            };
            match read {
                Ok(()) => self.count_read(thread, out.len() as u64),
                Err(err) => {
                    cache.record_error(thread, err.to_string());
                    ok = false;
                }
            }
        }
        ok
    }

    fn count_read(&self, thread: &PerThreadInfo, bytes: u64) {
        thread.stats.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.tiles_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Cooperative eviction, the two-chance clock: a record that was used
    /// since the last sweep is spared once; the next visit closes its
    /// reader. Specs are retained, so a later access just reopens.
    pub(crate) fn release(&self) {
        let guard = self.reader.lock();
        if self.used.swap(false, Ordering::AcqRel) {
            return;
        }
        self.close_locked(&guard);
    }

    /// Close the reader handle, keeping specs and counters.
    pub(crate) fn close(&self) {
        let guard = self.reader.lock();
        self.close_locked(&guard);
    }

    fn close_locked(&self, guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<ReaderState>>) {
        if guard.borrow_mut().reader.take().is_some() {
            self.open_files.decr();
            debug!(file = %self.filename, "closed reader");
        }
    }

    /// Forget everything learned about the file and re-open to refresh.
    /// Clears the broken flag, the fingerprint, and any duplicate link.
    pub(crate) fn invalidate(&self, cache: &ImageCache, thread: &PerThreadInfo) {
        let guard = self.reader.lock();
        self.close_locked(&guard);
        {
            let mut meta = self.meta.write();
            meta.specs.clear();
            meta.fingerprint = None;
        }
        self.broken.store(false, Ordering::Relaxed);
        self.not_found.store(false, Ordering::Relaxed);
        self.unsupported.store(false, Ordering::Relaxed);
        *self.duplicate.lock() = None;
        self.open(cache, thread);
        self.meta.write().mod_time = disk_mod_time(&self.filename);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    pub(crate) fn not_found(&self) -> bool {
        self.not_found.load(Ordering::Relaxed)
    }

    pub(crate) fn unsupported(&self) -> bool {
        self.unsupported.load(Ordering::Relaxed)
    }

    pub fn subimages(&self) -> usize {
        self.meta.read().specs.len()
    }

    pub fn spec(&self, subimage: usize) -> Option<ImageSpec> {
        self.meta.read().specs.get(subimage).cloned()
    }

    pub fn datatype(&self) -> PixelFormat {
        self.meta.read().datatype
    }

    pub fn untiled(&self) -> bool {
        self.meta.read().untiled
    }

    pub fn unmipped(&self) -> bool {
        self.meta.read().unmipped
    }

    pub(crate) fn mip_used(&self) -> bool {
        self.mip_used.load(Ordering::Relaxed)
    }

    pub(crate) fn tex_format(&self) -> TexFormat {
        self.meta.read().tex_format
    }

    pub(crate) fn format_name(&self) -> String {
        self.meta.read().format_name.clone()
    }

    pub(crate) fn fingerprint(&self) -> Option<String> {
        self.meta.read().fingerprint.clone()
    }

    pub(crate) fn mod_time(&self) -> Option<SystemTime> {
        self.meta.read().mod_time
    }

    pub fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::Relaxed)
    }

    pub fn tiles_read(&self) -> u64 {
        self.tiles_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn io_time(&self) -> f64 {
        self.io_time_us.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub(crate) fn add_io_time_us(&self, micros: u64) {
        self.io_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn duplicate(&self) -> Option<Arc<FileRecord>> {
        self.duplicate.lock().clone()
    }

    pub(crate) fn set_duplicate(&self, canonical: Arc<FileRecord>) {
        *self.duplicate.lock() = Some(canonical);
    }

    pub(crate) fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    /// Whether fingerprint-equal files are true duplicates: everything that
    /// affects sampling must match too, since the fingerprint only covers
    /// source pixels.
    pub(crate) fn dedup_matches(&self, other: &FileRecord) -> bool {
        let a = self.meta.read();
        let b = other.meta.read();
        a.swrap == b.swrap
            && a.twrap == b.twrap
            && a.datatype == b.datatype
            && a.cube_layout == b.cube_layout
            && a.y_up == b.y_up
    }
}

impl Drop for FileRecord {
    fn drop(&mut self) {
        // A record discarded after losing an open race still holds an open
        // reader; keep the open-file count honest.
        self.close();
    }
}

/// Extract a "SHA-1=<40 hex chars>" fingerprint from an image description.
fn parse_fingerprint(description: &str) -> Option<String> {
    const PREFIX: &str = "SHA-1=";
    let at = description.rfind(PREFIX)?;
    let hash = &description[at + PREFIX.len()..];
    if hash.len() >= 40 {
        Some(hash[..40].to_string())
    } else {
        None
    }
}

fn disk_mod_time(filename: &str) -> Option<SystemTime> {
    fs::metadata(filename).ok().and_then(|m| m.modified().ok())
}
