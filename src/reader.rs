//! Format-agnostic reader contract.
//!
//! The cache does not decode image files itself. It consumes any
//! implementation of [`ImageReader`], created through a [`ReaderFactory`].
//! Format detection, decoding, and search-path probing are the factory's
//! business; the cache's only promises are that it holds the per-file reader
//! lock across every reader call and never assumes a reader is thread-safe.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::ReaderError;
use crate::pixel::PixelFormat;
use crate::spec::ImageSpec;

// =============================================================================
// ImageReader Trait
// =============================================================================

/// One open image file, positioned at a current subimage.
///
/// A freshly created reader is positioned at subimage 0 with its spec
/// available. Readers are never shared between threads without external
/// locking, which the cache provides.
///
/// Scanline-oriented sources report `tile_width == 0` in their specs and may
/// return [`ReaderError::Unsupported`] from [`ImageReader::read_tile`]; the
/// cache never calls `read_tile` on them.
pub trait ImageReader: Send {
    /// Short name of the file format (e.g. "tiff", "openexr").
    fn format_name(&self) -> &'static str;

    /// Spec of the current subimage.
    fn spec(&self) -> &ImageSpec;

    /// Position the reader at a subimage, returning its spec, or `None` if
    /// the index is out of range (the reader position is then unspecified).
    fn seek_subimage(&mut self, subimage: usize) -> Option<ImageSpec>;

    /// Index of the current subimage.
    fn current_subimage(&self) -> usize;

    /// Read the tile whose origin is (x, y, z) in the current subimage,
    /// converting into `format`. `out` must hold exactly one tile.
    fn read_tile(
        &mut self,
        x: i32,
        y: i32,
        z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<(), ReaderError>;

    /// Read one scanline of the current subimage, converting into `format`.
    fn read_scanline(
        &mut self,
        y: i32,
        z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<(), ReaderError>;

    /// Read the entire current subimage, converting into `format` and
    /// writing with the given byte strides (the destination may be wider
    /// than the image, e.g. a power-of-two tile).
    fn read_image(
        &mut self,
        format: PixelFormat,
        out: &mut [u8],
        xstride: usize,
        ystride: usize,
        zstride: usize,
    ) -> Result<(), ReaderError>;
}

// =============================================================================
// ReaderFactory Trait
// =============================================================================

/// Creates readers for filenames.
///
/// The factory receives the filename after search-path resolution. Returning
/// [`ReaderError::NotFound`] means no reader exists for the name; any other
/// error means the file exists but could not be opened, which marks its cache
/// record broken.
pub trait ReaderFactory: Send + Sync {
    fn open(&self, filename: &str) -> Result<Box<dyn ImageReader>, ReaderError>;
}

// =============================================================================
// Process-wide Factory Registration
// =============================================================================

static REGISTERED_FACTORY: OnceCell<Arc<dyn ReaderFactory>> = OnceCell::new();

/// Register the reader factory used by [`crate::ImageCache::create`].
///
/// Returns false if a factory was already registered (the first registration
/// wins, mirroring the shared cache's one-shot construction).
pub fn register_reader_factory(factory: Arc<dyn ReaderFactory>) -> bool {
    REGISTERED_FACTORY.set(factory).is_ok()
}

/// The registered factory, or one that fails every open with `NotFound`.
pub(crate) fn registered_factory() -> Arc<dyn ReaderFactory> {
    REGISTERED_FACTORY
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(NullReaderFactory))
}

/// Placeholder factory when none was registered: every filename is missing.
struct NullReaderFactory;

impl ReaderFactory for NullReaderFactory {
    fn open(&self, filename: &str) -> Result<Box<dyn ImageReader>, ReaderError> {
        Err(ReaderError::NotFound(filename.to_string()))
    }
}
