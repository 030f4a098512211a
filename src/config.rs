//! Cache configuration and the typed attribute surface.
//!
//! All tunables are set and queried through `attribute`/`getattribute` on
//! the cache with [`AttrValue`]s; unknown names or mismatched types fail
//! softly (false / `None`) without changing anything.

use std::path::PathBuf;

use crate::spec::{pow2_roundup, AttrValue};

// =============================================================================
// Defaults
// =============================================================================

/// Default ceiling for simultaneously open reader handles.
pub const DEFAULT_MAX_OPEN_FILES: usize = 100;

/// Default ceiling for resident tile memory, in MB.
pub const DEFAULT_MAX_MEMORY_MB: f32 = 50.0;

/// Nonzero autotile sizes below this are clamped up, to protect callers who
/// mistake the attribute for a boolean.
pub const MIN_AUTOTILE: i32 = 8;

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

// =============================================================================
// CacheConfig
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Target ceiling for open reader handles.
    pub max_open_files: usize,
    /// Target ceiling for resident tile bytes, expressed in MB.
    pub max_memory_mb: f32,
    /// Derived from `max_memory_mb`.
    pub max_memory_bytes: usize,
    /// Colon/semicolon-separated directories for filename resolution.
    pub searchpath: String,
    /// Parsed `searchpath`.
    pub searchdirs: Vec<PathBuf>,
    /// 0 = silent; >=1 summary at shutdown; >=2 per-file listing.
    pub statslevel: i32,
    /// 0 = off; otherwise the synthesized tile extent for scanline files
    /// (power of two, at least [`MIN_AUTOTILE`]).
    pub autotile: i32,
    /// Synthesize a MIP pyramid for single-subimage files.
    pub automip: bool,
    /// Store all tiles as float regardless of source type.
    pub forcefloat: bool,
    /// If false, scanline files are rejected as broken.
    pub accept_untiled: bool,
    /// Camera-space transform (read-only through the attribute surface).
    pub world_to_common: [f32; 16],
    /// Its inverse (read-only).
    pub common_to_world: [f32; 16],
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_memory_bytes: (DEFAULT_MAX_MEMORY_MB * 1024.0 * 1024.0) as usize,
            searchpath: String::new(),
            searchdirs: Vec::new(),
            statslevel: 0,
            autotile: 0,
            automip: false,
            forcefloat: false,
            accept_untiled: true,
            world_to_common: IDENTITY,
            common_to_world: IDENTITY,
        }
    }
}

impl CacheConfig {
    /// Apply one attribute. Returns false (changing nothing) for unknown
    /// names, read-only attributes, or type mismatches.
    pub fn set_attribute(&mut self, name: &str, value: &AttrValue) -> bool {
        match (name, value) {
            ("max_open_files", AttrValue::Int(n)) if *n > 0 => {
                self.max_open_files = *n as usize;
                true
            }
            ("max_memory_MB", AttrValue::Float(mb)) => {
                self.set_max_memory(*mb);
                true
            }
            ("max_memory_MB", AttrValue::Int(mb)) => {
                self.set_max_memory(*mb as f32);
                true
            }
            ("searchpath", AttrValue::String(path)) => {
                self.searchpath = path.clone();
                self.searchdirs = split_searchpath(path);
                true
            }
            ("statistics:level", AttrValue::Int(level)) => {
                self.statslevel = *level;
                true
            }
            ("autotile", AttrValue::Int(size)) => {
                // Guarantee a power of two; clamp tiny nonzero sizes.
                let mut tile = pow2_roundup(*size);
                if *size <= 0 {
                    tile = 0;
                }
                if tile > 0 && tile < MIN_AUTOTILE {
                    tile = MIN_AUTOTILE;
                }
                self.autotile = tile;
                true
            }
            ("automip", AttrValue::Int(flag)) => {
                self.automip = *flag != 0;
                true
            }
            ("forcefloat", AttrValue::Int(flag)) => {
                self.forcefloat = *flag != 0;
                true
            }
            ("accept_untiled", AttrValue::Int(flag)) => {
                self.accept_untiled = *flag != 0;
                true
            }
            _ => false,
        }
    }

    /// Query one attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<AttrValue> {
        match name {
            "max_open_files" => Some(AttrValue::Int(self.max_open_files as i32)),
            "max_memory_MB" => Some(AttrValue::Float(self.max_memory_mb)),
            "searchpath" => Some(AttrValue::String(self.searchpath.clone())),
            "statistics:level" => Some(AttrValue::Int(self.statslevel)),
            "autotile" => Some(AttrValue::Int(self.autotile)),
            "automip" => Some(AttrValue::Int(self.automip as i32)),
            "forcefloat" => Some(AttrValue::Int(self.forcefloat as i32)),
            "accept_untiled" => Some(AttrValue::Int(self.accept_untiled as i32)),
            "worldtocommon" => Some(AttrValue::FloatList(self.world_to_common.to_vec())),
            "commontoworld" => Some(AttrValue::FloatList(self.common_to_world.to_vec())),
            _ => None,
        }
    }

    fn set_max_memory(&mut self, mb: f32) {
        self.max_memory_mb = mb;
        self.max_memory_bytes = (mb as f64 * 1024.0 * 1024.0) as usize;
    }
}

/// Split a colon- or semicolon-separated search path into directories.
fn split_searchpath(path: &str) -> Vec<PathBuf> {
    path.split([':', ';'])
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
