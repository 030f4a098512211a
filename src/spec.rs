//! Image geometry and metadata.
//!
//! [`ImageSpec`] describes one subimage: its data window, full (display)
//! window, tile extents, channel count and format, plus arbitrary named
//! metadata attributes carried as [`AttrValue`]s. Texture-specific tags
//! parsed out of the metadata (texture format, wrap modes, cube layout) also
//! live here.

use std::fmt;

use crate::pixel::PixelFormat;

// =============================================================================
// Attribute Values
// =============================================================================

/// A typed metadata or configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i32),
    Float(f32),
    String(String),
    IntList(Vec<i32>),
    FloatList(Vec<f32>),
}

/// The type of an [`AttrValue`], for typed queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Float,
    String,
    IntList,
    FloatList,
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::String(_) => AttrType::String,
            AttrValue::IntList(_) => AttrType::IntList,
            AttrValue::FloatList(_) => AttrType::FloatList,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::String => "string",
            AttrType::IntList => "int[]",
            AttrType::FloatList => "float[]",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Texture Tags
// =============================================================================

/// Wrap behavior outside the image, parsed from the "wrapmodes" attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Black,
    Clamp,
    Periodic,
    Mirror,
}

impl WrapMode {
    pub fn parse(name: &str) -> Option<WrapMode> {
        match name.trim() {
            "black" => Some(WrapMode::Black),
            "clamp" => Some(WrapMode::Clamp),
            "periodic" => Some(WrapMode::Periodic),
            "mirror" => Some(WrapMode::Mirror),
            _ => None,
        }
    }
}

/// Parse a "wrapmodes" attribute value: either one mode for both axes or
/// "s,t". Unrecognized names fall back to black.
pub fn parse_wrapmodes(value: &str) -> (WrapMode, WrapMode) {
    match value.split_once(',') {
        Some((s, t)) => (
            WrapMode::parse(s).unwrap_or_default(),
            WrapMode::parse(t).unwrap_or_default(),
        ),
        None => {
            let m = WrapMode::parse(value).unwrap_or_default();
            (m, m)
        }
    }
}

/// The role a texture file was authored for, from its "textureformat" tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexFormat {
    #[default]
    Texture,
    Texture3d,
    Shadow,
    CubeFaceShadow,
    VolumeShadow,
    LatLongEnv,
    CubeFaceEnv,
}

impl TexFormat {
    /// The canonical tag string written by texture makers.
    pub fn name(self) -> &'static str {
        match self {
            TexFormat::Texture => "Plain Texture",
            TexFormat::Texture3d => "Volume Texture",
            TexFormat::Shadow => "Shadow",
            TexFormat::CubeFaceShadow => "CubeFace Shadow",
            TexFormat::VolumeShadow => "Volume Shadow",
            TexFormat::LatLongEnv => "LatLong Environment",
            TexFormat::CubeFaceEnv => "CubeFace Environment",
        }
    }

    /// The broad query category ("texturetype" info queries).
    pub fn texture_type(self) -> &'static str {
        match self {
            TexFormat::Texture | TexFormat::Texture3d => "Texture",
            TexFormat::Shadow | TexFormat::CubeFaceShadow | TexFormat::VolumeShadow => "Shadow",
            TexFormat::LatLongEnv | TexFormat::CubeFaceEnv => "Environment",
        }
    }

    pub fn from_name(name: &str) -> Option<TexFormat> {
        [
            TexFormat::Texture,
            TexFormat::Texture3d,
            TexFormat::Shadow,
            TexFormat::CubeFaceShadow,
            TexFormat::VolumeShadow,
            TexFormat::LatLongEnv,
            TexFormat::CubeFaceEnv,
        ]
        .into_iter()
        .find(|f| f.name() == name)
    }
}

/// How cube-map faces are packed into one image, inferred from aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CubeLayout {
    #[default]
    Unknown,
    ThreeByTwo,
    OneBySix,
}

// =============================================================================
// Image Spec
// =============================================================================

/// Geometry and metadata of one subimage.
///
/// `width`/`height`/`depth` describe the data window, the `full_*` fields the
/// display window. Tile extents of zero mean the source is scanline-oriented;
/// the cache synthesizes tile extents for such files at open time, so specs
/// handed out by the cache always carry positive power-of-two tile extents.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSpec {
    /// Origin of the data window.
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Data window size in pixels.
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    /// Full (display) window size.
    pub full_width: i32,
    pub full_height: i32,
    pub full_depth: i32,
    /// Tile extents; 0 width/height marks a scanline source.
    pub tile_width: i32,
    pub tile_height: i32,
    pub tile_depth: i32,
    /// Number of channels per pixel.
    pub nchannels: i32,
    /// Native channel format of the source.
    pub format: PixelFormat,
    /// Arbitrary named metadata.
    pub attributes: Vec<(String, AttrValue)>,
}

impl ImageSpec {
    /// Create a 2-D spec with the data and full windows coincident and no
    /// tiling.
    pub fn new(width: i32, height: i32, nchannels: i32, format: PixelFormat) -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width,
            height,
            depth: 1,
            full_width: width,
            full_height: height,
            full_depth: 1,
            tile_width: 0,
            tile_height: 0,
            tile_depth: 1,
            nchannels,
            format,
            attributes: Vec::new(),
        }
    }

    /// Number of pixels in one tile.
    pub fn tile_pixels(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize * self.tile_depth.max(1) as usize
    }

    /// Bytes of one tile in the given channel format.
    pub fn tile_bytes(&self, format: PixelFormat) -> usize {
        self.tile_pixels() * self.nchannels as usize * format.bytes()
    }

    /// Bytes of one scanline in the given channel format.
    pub fn scanline_bytes(&self, format: PixelFormat) -> usize {
        self.width as usize * self.nchannels as usize * format.bytes()
    }

    /// Bytes of the whole data window in the native format.
    pub fn image_bytes(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.depth.max(1) as usize
            * self.nchannels as usize
            * self.format.bytes()
    }

    /// Set or replace a named attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    /// Look up a named attribute.
    pub fn find_attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Look up a string attribute.
    pub fn get_string_attribute(&self, name: &str) -> Option<&str> {
        match self.find_attribute(name) {
            Some(AttrValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Round up to the next power of two (minimum 1).
pub fn pow2_roundup(x: i32) -> i32 {
    if x <= 1 {
        1
    } else {
        (x as u32).next_power_of_two() as i32
    }
}

// =============================================================================
// Tests
// =============================================================================
