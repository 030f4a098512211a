//! Shared fixtures: an in-memory image format and a reader factory with
//! open counters, so tests can observe exactly when the cache goes back to
//! the "disk".

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tilecache::pixel::convert_pixel;
use tilecache::{
    AttrValue, ImageCache, ImageReader, ImageSpec, PixelFormat, ReaderError, ReaderFactory,
};

// =============================================================================
// Test Images
// =============================================================================

/// One subimage of an in-memory test image: its spec plus contiguous pixels
/// in the spec's native format.
pub struct TestSubimage {
    pub spec: ImageSpec,
    pub pixels: Vec<u8>,
}

/// An in-memory image the mock factory serves.
pub struct TestImage {
    pub subimages: Vec<TestSubimage>,
    pub format_name: &'static str,
    /// Fail the open itself (corrupt header).
    pub fail_open: bool,
    /// Open fine but fail every pixel read.
    pub fail_reads: bool,
}

impl TestImage {
    /// Attach a "SHA-1=<hash>" fingerprint to the image description.
    pub fn with_fingerprint(mut self, sha1: &str) -> TestImage {
        self.subimages[0].spec.set_attribute(
            "ImageDescription",
            AttrValue::String(format!("test image SHA-1={sha1}")),
        );
        self
    }

    /// Set an attribute on subimage 0.
    pub fn with_attribute(mut self, name: &str, value: AttrValue) -> TestImage {
        self.subimages[0].spec.set_attribute(name, value);
        self
    }
}

/// Build one subimage, filling pixels from `f(x, y, channel)`.
pub fn subimage_from_fn(
    width: i32,
    height: i32,
    tile: i32,
    nchannels: i32,
    format: PixelFormat,
    f: &dyn Fn(i32, i32, i32) -> f32,
) -> TestSubimage {
    let mut spec = ImageSpec::new(width, height, nchannels, format);
    spec.tile_width = tile;
    spec.tile_height = tile;
    let sample = format.bytes();
    let mut pixels = vec![0u8; width as usize * height as usize * nchannels as usize * sample];
    for y in 0..height {
        for x in 0..width {
            for c in 0..nchannels {
                let offset =
                    ((y * width + x) * nchannels + c) as usize * sample;
                let mut one = [0u8; 4];
                tilecache::pixel::f32_to_sample(format, f(x, y, c), &mut one);
                pixels[offset..offset + sample].copy_from_slice(&one[..sample]);
            }
        }
    }
    TestSubimage { spec, pixels }
}

/// A tiled single-subimage image with pixels from `f(x, y, channel)`.
/// `tile` of 0 makes it scanline-oriented.
pub fn image_from_fn(
    width: i32,
    height: i32,
    tile: i32,
    nchannels: i32,
    format: PixelFormat,
    f: &dyn Fn(i32, i32, i32) -> f32,
) -> TestImage {
    TestImage {
        subimages: vec![subimage_from_fn(width, height, tile, nchannels, format, f)],
        format_name: "mock",
        fail_open: false,
        fail_reads: false,
    }
}

/// A tiled image where every pixel of every channel has the same value.
pub fn constant_image(
    width: i32,
    height: i32,
    tile: i32,
    nchannels: i32,
    format: PixelFormat,
    value: f32,
) -> TestImage {
    image_from_fn(width, height, tile, nchannels, format, &move |_, _, _| value)
}

/// A deterministic per-pixel pattern, exactly representable in u8.
pub fn gradient_u8(x: i32, y: i32, c: i32) -> f32 {
    ((x * 7 + y * 13 + c * 29) % 256) as f32 / 255.0
}

// =============================================================================
// Mock Reader
// =============================================================================

pub struct MockReader {
    image: Arc<TestImage>,
    current: usize,
}

impl MockReader {
    fn subimage(&self) -> &TestSubimage {
        &self.image.subimages[self.current]
    }
}

impl ImageReader for MockReader {
    fn format_name(&self) -> &'static str {
        self.image.format_name
    }

    fn spec(&self) -> &ImageSpec {
        &self.subimage().spec
    }

    fn seek_subimage(&mut self, subimage: usize) -> Option<ImageSpec> {
        if subimage < self.image.subimages.len() {
            self.current = subimage;
            Some(self.image.subimages[subimage].spec.clone())
        } else {
            None
        }
    }

    fn current_subimage(&self) -> usize {
        self.current
    }

    fn read_tile(
        &mut self,
        x: i32,
        y: i32,
        _z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<(), ReaderError> {
        if self.image.fail_reads {
            return Err(ReaderError::Read("forced tile read failure".to_string()));
        }
        let sub = self.subimage();
        let spec = &sub.spec;
        if spec.tile_width == 0 {
            return Err(ReaderError::Unsupported(
                "scanline file has no tiles".to_string(),
            ));
        }
        if x % spec.tile_width != 0 || y % spec.tile_height != 0 {
            return Err(ReaderError::Read(format!(
                "tile origin ({x}, {y}) is not tile-aligned"
            )));
        }
        let nchannels = spec.nchannels as usize;
        let native = spec.format;
        out.fill(0);
        for ty in 0..spec.tile_height {
            let sy = y + ty;
            if sy < 0 || sy >= spec.height {
                continue;
            }
            for tx in 0..spec.tile_width {
                let sx = x + tx;
                if sx < 0 || sx >= spec.width {
                    continue;
                }
                let src = ((sy * spec.width + sx) * spec.nchannels) as usize * native.bytes();
                let dst =
                    ((ty * spec.tile_width + tx) * spec.nchannels) as usize * format.bytes();
                convert_pixel(
                    &sub.pixels[src..],
                    native,
                    &mut out[dst..],
                    format,
                    nchannels,
                );
            }
        }
        Ok(())
    }

    fn read_scanline(
        &mut self,
        y: i32,
        _z: i32,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<(), ReaderError> {
        if self.image.fail_reads {
            return Err(ReaderError::Read("forced scanline read failure".to_string()));
        }
        let sub = self.subimage();
        let spec = &sub.spec;
        if y < 0 || y >= spec.height {
            return Err(ReaderError::Read(format!("scanline {y} out of range")));
        }
        let nchannels = spec.nchannels as usize;
        let native = spec.format;
        for x in 0..spec.width {
            let src = ((y * spec.width + x) * spec.nchannels) as usize * native.bytes();
            let dst = (x * spec.nchannels) as usize * format.bytes();
            convert_pixel(
                &sub.pixels[src..],
                native,
                &mut out[dst..],
                format,
                nchannels,
            );
        }
        Ok(())
    }

    fn read_image(
        &mut self,
        format: PixelFormat,
        out: &mut [u8],
        xstride: usize,
        ystride: usize,
        zstride: usize,
    ) -> Result<(), ReaderError> {
        if self.image.fail_reads {
            return Err(ReaderError::Read("forced image read failure".to_string()));
        }
        let sub = self.subimage();
        let spec = &sub.spec;
        let nchannels = spec.nchannels as usize;
        let native = spec.format;
        for z in 0..spec.depth.max(1) {
            for y in 0..spec.height {
                for x in 0..spec.width {
                    let src = (((z * spec.height + y) * spec.width + x) * spec.nchannels)
                        as usize
                        * native.bytes();
                    let dst =
                        z as usize * zstride + y as usize * ystride + x as usize * xstride;
                    convert_pixel(&sub.pixels[src..], native, &mut out[dst..], format, nchannels);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Mock Factory
// =============================================================================

/// Serves [`TestImage`]s by name and counts successful opens, so tests can
/// assert exactly when the cache reopened a file.
pub struct MockFactory {
    images: Mutex<HashMap<String, Arc<TestImage>>>,
    opens: AtomicUsize,
    opens_by_name: Mutex<HashMap<String, usize>>,
}

impl MockFactory {
    pub fn new() -> Arc<MockFactory> {
        Arc::new(MockFactory {
            images: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
            opens_by_name: Mutex::new(HashMap::new()),
        })
    }

    /// Add (or replace) an image under a name.
    pub fn add(&self, name: &str, image: TestImage) {
        self.images
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(image));
    }

    /// Total successful opens across all names.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Successful opens of one name.
    pub fn opens_of(&self, name: &str) -> usize {
        *self.opens_by_name.lock().unwrap().get(name).unwrap_or(&0)
    }
}

impl ReaderFactory for MockFactory {
    fn open(&self, filename: &str) -> Result<Box<dyn ImageReader>, ReaderError> {
        let image = match self.images.lock().unwrap().get(filename) {
            Some(image) => Arc::clone(image),
            None => return Err(ReaderError::NotFound(filename.to_string())),
        };
        if image.fail_open {
            return Err(ReaderError::Open(format!("corrupt header in {filename}")));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self
            .opens_by_name
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_insert(0) += 1;
        Ok(Box::new(MockReader { image, current: 0 }))
    }
}

/// A fresh independent cache over the given factory.
pub fn cache_with(factory: &Arc<MockFactory>) -> Arc<ImageCache> {
    ImageCache::with_factory(Arc::clone(factory) as Arc<dyn ReaderFactory>)
}
