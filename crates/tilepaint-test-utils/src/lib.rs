//! Testing utilities for the tilepaint workspace
//!
//! Shared palettes, images, anchors and records used by unit and
//! integration tests.

#![allow(missing_docs)]

use chrono::{DateTime, TimeDelta, Utc};
use tilepaint_core::{
    Address, Anchor, DrawnRecord, ImagePos, Palette, PaletteColor, PendingPixel, QuantizedPixel,
    Rgba, SourceImage,
};

pub const RED_ID: u16 = 7;
pub const BLUE_ID: u16 = 12;
pub const WHITE_ID: u16 = 5;

pub fn red() -> PaletteColor {
    PaletteColor::new(RED_ID, 237, 28, 36, "Red")
}

pub fn blue() -> PaletteColor {
    PaletteColor::new(BLUE_ID, 40, 80, 158, "Blue")
}

pub fn white() -> PaletteColor {
    PaletteColor::new(WHITE_ID, 255, 255, 255, "White")
}

/// A small palette mirroring the shape of a real availability probe
pub fn test_palette() -> Palette {
    Palette::from_colors(vec![
        PaletteColor::new(1, 0, 0, 0, "Black"),
        PaletteColor::new(2, 60, 60, 60, "Dark Gray"),
        PaletteColor::new(4, 210, 210, 210, "Light Gray"),
        white(),
        red(),
        PaletteColor::new(8, 255, 127, 39, "Orange"),
        PaletteColor::new(10, 14, 185, 104, "Green"),
        blue(),
    ])
}

/// Fixed session start used across tests
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at_ms(ms: i64) -> DateTime<Utc> {
    t0() + TimeDelta::milliseconds(ms)
}

/// Anchor whose 2x2 footprint crosses a tile row boundary at tile size 1000
pub fn corner_anchor() -> Anchor {
    Anchor::new(0, 0, 998, 999)
}

/// Anchor whose 2x2 footprint touches four tiles at tile size 1000
pub fn four_tile_anchor() -> Anchor {
    Anchor::new(0, 0, 999, 999)
}

pub fn origin_anchor() -> Anchor {
    Anchor::new(0, 0, 0, 0)
}

/// Opaque image of one color
pub fn solid_image(width: u32, height: u32, color: &PaletteColor) -> SourceImage {
    SourceImage::filled(width, height, Rgba::new(color.r, color.g, color.b, 255))
}

/// Quantized pixels all mapped to `color`, row-major
pub fn quantized_block(width: u32, height: u32, color: &PaletteColor) -> Vec<QuantizedPixel> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(image_x, image_y)| QuantizedPixel {
            image_x,
            image_y,
            alpha: 255,
            color: Some(color.clone()),
        })
        .collect()
}

/// Pending pixel at tile (0,0) with local == image position
pub fn pending_at(x: u32, y: u32, color: &PaletteColor) -> PendingPixel {
    PendingPixel {
        image_x: x,
        image_y: y,
        address: Address::new(0, 0, x, y),
        color: color.clone(),
    }
}

/// Row-major grid of pending pixels
pub fn pending_grid(width: u32, height: u32, color: &PaletteColor) -> Vec<PendingPixel> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| pending_at(x, y, color))
        .collect()
}

pub fn drawn_at(address: Address, color: &PaletteColor) -> DrawnRecord {
    DrawnRecord {
        address,
        color: color.clone(),
        painted_at: t0(),
    }
}

/// Row-major positions of a plan
pub fn positions(plan: &[PendingPixel]) -> Vec<ImagePos> {
    plan.iter().map(PendingPixel::image_pos).collect()
}
