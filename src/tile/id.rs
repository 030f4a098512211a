//! Tile cache key.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::file::FileRecord;

/// Uniquely identifies one cached tile: the canonical file record (by
/// pointer identity), the subimage, and the tile origin in that subimage's
/// coordinate system. Origins are always multiples of the subimage's tile
/// extents.
#[derive(Clone)]
pub struct TileID {
    file: Arc<FileRecord>,
    subimage: usize,
    x: i32,
    y: i32,
    z: i32,
}

impl TileID {
    pub fn new(file: Arc<FileRecord>, subimage: usize, x: i32, y: i32, z: i32) -> Self {
        Self {
            file,
            subimage,
            x,
            y,
            z,
        }
    }

    pub fn file(&self) -> &Arc<FileRecord> {
        &self.file
    }

    pub fn subimage(&self) -> usize {
        self.subimage
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn z(&self) -> i32 {
        self.z
    }
}

impl PartialEq for TileID {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file)
            && self.subimage == other.subimage
            && self.x == other.x
            && self.y == other.y
            && self.z == other.z
    }
}

impl Eq for TileID {}

impl Hash for TileID {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.file) as usize).hash(state);
        self.subimage.hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.z.hash(state);
    }
}

impl fmt::Debug for TileID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileID")
            .field("file", &self.file.filename())
            .field("subimage", &self.subimage)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("z", &self.z)
            .finish()
    }
}
