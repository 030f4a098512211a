//! One cached tile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::ImageCache;
use crate::perthread::PerThreadInfo;
use crate::pixel::{convert_image, PixelFormat};
use crate::spec::ImageSpec;

use super::id::TileID;

/// A tile's pixels plus its cache bookkeeping.
///
/// Pixels are immutable once the record is constructed; only the used flag
/// (the clock-sweep second chance) ever mutates. A failed read still keeps
/// its full-size zeroed buffer so `memsize` stays stable for eviction
/// accounting, but starts with the used flag clear so it is the first
/// eviction candidate.
pub struct TileRecord {
    id: TileID,
    pixels: Bytes,
    tile_width: i32,
    tile_height: i32,
    tile_depth: i32,
    nchannels: usize,
    format: PixelFormat,
    valid: bool,
    used: AtomicBool,
}

impl TileRecord {
    /// Read a tile from its file.
    ///
    /// Failure is reported through [`TileRecord::valid`], never as an error:
    /// the record is cached either way so repeated requests for a bad tile
    /// do not retry the read.
    pub(crate) fn new_read(id: TileID, cache: &ImageCache, thread: &PerThreadInfo) -> TileRecord {
        let file = Arc::clone(id.file());
        let (spec, datatype) = match file.spec(id.subimage()) {
            Some(spec) => {
                let datatype = file.datatype();
                (spec, datatype)
            }
            None => {
                return TileRecord {
                    id,
                    pixels: Bytes::new(),
                    tile_width: 0,
                    tile_height: 0,
                    tile_depth: 1,
                    nchannels: 0,
                    format: PixelFormat::F32,
                    valid: false,
                    used: AtomicBool::new(false),
                };
            }
        };
        let mut buffer = vec![0u8; spec.tile_bytes(datatype)];
        let valid = file.read_tile(
            cache,
            thread,
            id.subimage(),
            id.x(),
            id.y(),
            id.z(),
            datatype,
            &mut buffer,
        );
        TileRecord {
            tile_width: spec.tile_width,
            tile_height: spec.tile_height,
            tile_depth: spec.tile_depth.max(1),
            nchannels: spec.nchannels as usize,
            format: datatype,
            id,
            pixels: Bytes::from(buffer),
            valid,
            used: AtomicBool::new(valid),
        }
    }

    /// Build a tile from pixels already in memory, converting from a strided
    /// foreign-format source. Used by the untiled read path, which decodes a
    /// whole row of tiles at once and pre-populates the neighbors.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_from_memory(
        id: TileID,
        spec: &ImageSpec,
        datatype: PixelFormat,
        src: &[u8],
        src_format: PixelFormat,
        src_xstride: usize,
        src_ystride: usize,
        src_zstride: usize,
    ) -> TileRecord {
        let tw = spec.tile_width as usize;
        let th = spec.tile_height as usize;
        let td = spec.tile_depth.max(1) as usize;
        let nchannels = spec.nchannels as usize;
        let pixel_bytes = nchannels * datatype.bytes();
        let mut buffer = vec![0u8; spec.tile_bytes(datatype)];
        let valid = convert_image(
            nchannels,
            tw,
            th,
            td,
            src,
            src_format,
            src_xstride,
            src_ystride,
            src_zstride,
            &mut buffer,
            datatype,
            pixel_bytes,
            pixel_bytes * tw,
            pixel_bytes * tw * th,
        )
        .is_ok();
        TileRecord {
            id,
            pixels: Bytes::from(buffer),
            tile_width: spec.tile_width,
            tile_height: spec.tile_height,
            tile_depth: spec.tile_depth.max(1),
            nchannels,
            format: datatype,
            valid,
            used: AtomicBool::new(valid),
        }
    }

    pub(crate) fn id(&self) -> &TileID {
        &self.id
    }

    /// The pixel at absolute coordinates (x, y, z), or `None` if the
    /// coordinates fall outside this tile.
    pub(crate) fn data(&self, x: i32, y: i32, z: i32) -> Option<&[u8]> {
        let x = x - self.id.x();
        let y = y - self.id.y();
        let z = z - self.id.z();
        if x < 0
            || x >= self.tile_width
            || y < 0
            || y >= self.tile_height
            || z < 0
            || z >= self.tile_depth
        {
            return None;
        }
        let pixel_bytes = self.nchannels * self.format.bytes();
        let offset = ((z as usize * self.tile_height as usize + y as usize)
            * self.tile_width as usize
            + x as usize)
            * pixel_bytes;
        self.pixels.get(offset..offset + pixel_bytes)
    }

    /// The whole pixel buffer, in the in-cache channel format.
    pub(crate) fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// In-cache channel format.
    pub(crate) fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether the underlying read succeeded. An invalid tile is never
    /// handed back as a hit; its pixels read as zero.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Mark recently used (the clock-sweep second chance).
    pub(crate) fn touch(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    /// One step of the two-chance clock: clears the used flag and reports
    /// whether the tile was used since the last sweep (true = spare it).
    pub(crate) fn release(&self) -> bool {
        self.used.swap(false, Ordering::AcqRel)
    }

    /// Fixed memory footprint of this tile's pixels.
    pub(crate) fn memsize(&self) -> usize {
        self.pixels.len()
    }
}
