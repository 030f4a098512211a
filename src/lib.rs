//! tilecache - a process-wide tiled image cache.
//!
//! This library gives rendering and texture-sampling clients fast,
//! bounded-memory access to pixel tiles drawn from many large, possibly
//! MIP-mapped image files, through pluggable format readers. Files are
//! opened lazily, tiles are read on demand, and two independent budgets
//! (open reader handles, resident tile bytes) are enforced with two-chance
//! clock sweeps. Identical images opened under different names are
//! deduplicated by their content fingerprint, and each thread gets a
//! lock-free two-slot microcache in front of the shared tile table.

pub mod cache;
pub mod config;
pub mod error;
pub mod pixel;
pub mod reader;
pub mod spec;
pub mod stats;

mod file;
mod perthread;
mod tile;

// Re-export commonly used types
pub use cache::{ImageCache, Tile};
pub use config::{CacheConfig, DEFAULT_MAX_MEMORY_MB, DEFAULT_MAX_OPEN_FILES, MIN_AUTOTILE};
pub use error::{CacheError, ReaderError};
pub use pixel::PixelFormat;
pub use reader::{register_reader_factory, ImageReader, ReaderFactory};
pub use spec::{
    parse_wrapmodes, pow2_roundup, AttrType, AttrValue, CubeLayout, ImageSpec, TexFormat, WrapMode,
};
pub use stats::Statistics;
