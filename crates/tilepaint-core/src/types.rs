//! Core types for tilepaint
//!
//! Defines the value types shared by every stage of a painting session:
//! - Colors and the normalized palette
//! - Tile addresses and the session anchor
//! - Pending, drawn and drifted pixels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Remote palette color identifier
pub type ColorId = u16;

/// Id reserved by the remote surface for "transparent"
pub const TRANSPARENT_ID: ColorId = 0;

/// Opaque RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Packed `0xRRGGBB` key
    #[inline]
    #[must_use]
    pub const fn packed(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// All three channels at or above `threshold`
    #[inline]
    #[must_use]
    pub const fn is_whitish(self, threshold: u8) -> bool {
        self.r >= threshold && self.g >= threshold && self.b >= threshold
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rgb({},{},{})", self.r, self.g, self.b)
    }
}

/// RGB with alpha, as sampled from images and remote tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    #[must_use]
    pub const fn opaque(rgb: Rgb) -> Self {
        Self::new(rgb.r, rgb.g, rgb.b, 255)
    }

    #[inline]
    #[must_use]
    pub const fn rgb(self) -> Rgb {
        Rgb::new(self.r, self.g, self.b)
    }
}

/// A color the remote surface accepts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaletteColor {
    pub id: ColorId,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub name: String,
}

impl PaletteColor {
    /// Create a palette entry
    #[inline]
    #[must_use]
    pub fn new(id: ColorId, r: u8, g: u8, b: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            r,
            g,
            b,
            name: name.into(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn rgb(&self) -> Rgb {
        Rgb::new(self.r, self.g, self.b)
    }
}

/// Normalized set of available colors
///
/// Built once per availability snapshot. Entries are unique by id (first
/// wins) and never contain the transparent id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PaletteColor>", into = "Vec<PaletteColor>")]
pub struct Palette {
    colors: Vec<PaletteColor>,
    #[serde(skip)]
    by_id: HashMap<ColorId, usize>,
}

impl Palette {
    /// Normalize raw probe output
    #[must_use]
    pub fn from_colors(colors: impl IntoIterator<Item = PaletteColor>) -> Self {
        let mut palette = Self::default();
        for color in colors {
            if color.id == TRANSPARENT_ID || palette.by_id.contains_key(&color.id) {
                continue;
            }
            palette.by_id.insert(color.id, palette.colors.len());
            palette.colors.push(color);
        }
        palette
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ColorId) -> Option<&PaletteColor> {
        self.by_id.get(&id).map(|&idx| &self.colors[idx])
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: ColorId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Exact RGB lookup
    #[must_use]
    pub fn find_rgb(&self, rgb: Rgb) -> Option<&PaletteColor> {
        self.colors.iter().find(|c| c.rgb() == rgb)
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[PaletteColor] {
        &self.colors
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PaletteColor> {
        self.colors.iter()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl From<Vec<PaletteColor>> for Palette {
    fn from(colors: Vec<PaletteColor>) -> Self {
        Self::from_colors(colors)
    }
}

impl From<Palette> for Vec<PaletteColor> {
    fn from(palette: Palette) -> Self {
        palette.colors
    }
}

/// Tile coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i64,
    pub y: i64,
}

impl TileKey {
    #[inline]
    #[must_use]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Canonical location on the tiled grid
///
/// `0 <= local_x, local_y < tile_size` always holds for addresses produced by
/// [`crate::coords`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub tile_x: i64,
    pub tile_y: i64,
    pub local_x: u32,
    pub local_y: u32,
}

impl Address {
    #[inline]
    #[must_use]
    pub const fn new(tile_x: i64, tile_y: i64, local_x: u32, local_y: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            local_x,
            local_y,
        }
    }

    #[inline]
    #[must_use]
    pub const fn tile(&self) -> TileKey {
        TileKey::new(self.tile_x, self.tile_y)
    }

    /// Point on the unbounded grid
    #[inline]
    #[must_use]
    pub fn global(&self, tile_size: u32) -> (i64, i64) {
        let size = i64::from(tile_size);
        (
            self.tile_x * size + i64::from(self.local_x),
            self.tile_y * size + i64::from(self.local_y),
        )
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tile({},{}) local({},{})",
            self.tile_x, self.tile_y, self.local_x, self.local_y
        )
    }
}

/// Global origin of image pixel (0,0) for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    pub tile_x: i64,
    pub tile_y: i64,
    pub local_x: u32,
    pub local_y: u32,
}

impl Anchor {
    #[inline]
    #[must_use]
    pub const fn new(tile_x: i64, tile_y: i64, local_x: u32, local_y: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            local_x,
            local_y,
        }
    }
}

/// Position inside the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImagePos {
    pub x: u32,
    pub y: u32,
}

impl ImagePos {
    #[inline]
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Row-major index for an image `width` pixels wide
    #[inline]
    #[must_use]
    pub fn row_major_index(&self, width: u32) -> u64 {
        u64::from(self.y) * u64::from(width) + u64::from(self.x)
    }
}

/// One unit of planned work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingPixel {
    pub image_x: u32,
    pub image_y: u32,
    pub address: Address,
    pub color: PaletteColor,
}

impl PendingPixel {
    #[inline]
    #[must_use]
    pub const fn image_pos(&self) -> ImagePos {
        ImagePos::new(self.image_x, self.image_y)
    }
}

/// Evidence that a pixel was confirmedly written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawnRecord {
    pub address: Address,
    pub color: PaletteColor,
    pub painted_at: DateTime<Utc>,
}

/// Expected versus observed color at a drawn address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftRecord {
    pub address: Address,
    pub expected_color: PaletteColor,
    pub observed_color: Rgba,
}
