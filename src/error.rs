use thiserror::Error;

use crate::spec::AttrType;

/// Errors surfaced by the public cache operations.
///
/// Every error returned from a cache operation is also appended to the
/// calling thread's error queue, retrievable (and cleared) with
/// [`crate::ImageCache::geterror`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    /// No reader could be created for the filename.
    #[error("image file \"{filename}\" not found")]
    NotFound { filename: String },

    /// The file opened but is malformed, or a previous open attempt failed.
    /// Only invalidation clears this state.
    #[error("invalid image file \"{filename}\"")]
    Broken { filename: String },

    /// Subimage index out of range.
    #[error("unknown subimage {subimage} (out of {count}) of \"{filename}\"")]
    BadSubimage {
        filename: String,
        subimage: usize,
        count: usize,
    },

    /// A configuration the cache refuses to serve (e.g. untiled input when
    /// untiled files are rejected).
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// A tile or scanline read failed; affected pixels are zero-filled.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// An attribute query asked for a type that disagrees with the stored one.
    #[error("type mismatch for \"{name}\": requested {requested}, found {found}")]
    TypeMismatch {
        name: String,
        requested: AttrType,
        found: AttrType,
    },

    /// The named metadata attribute does not exist in the image.
    #[error("no attribute \"{name}\" in \"{filename}\"")]
    UnknownAttribute { name: String, filename: String },
}

/// Errors produced by [`crate::reader::ImageReader`] implementations.
///
/// The cache maps these into [`CacheError`]: a factory-level `NotFound`
/// becomes [`CacheError::NotFound`], everything else marks the file broken
/// or degrades the affected tile.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReaderError {
    /// No reader is able to open this filename.
    #[error("no reader able to open \"{0}\"")]
    NotFound(String),

    /// The reader recognized the file but failed to open it.
    #[error("open failed: {0}")]
    Open(String),

    /// A tile, scanline, or whole-image read failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The reader cannot serve the request (e.g. tile reads on a scanline
    /// file).
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}
