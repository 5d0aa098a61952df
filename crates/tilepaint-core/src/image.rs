//! Source image quantization
//!
//! Decoding is left to the caller; this module works on an already-decoded
//! RGBA buffer and maps every pixel onto the active palette.

use crate::error::ValidationError;
use crate::palette::Quantizer;
use crate::plan::QuantizedPixel;
use crate::types::{Palette, Rgba};

/// Decoded RGBA image in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
}

impl SourceImage {
    /// Wrap a pixel buffer
    ///
    /// # Errors
    /// Returns `ValidationError::ImageSize` when `pixels.len() != width * height`.
    pub fn new(width: u32, height: u32, pixels: Vec<Rgba>) -> Result<Self, ValidationError> {
        let expected = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(usize::MAX);
        if pixels.len() != expected {
            return Err(ValidationError::ImageSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build from raw interleaved RGBA bytes
    ///
    /// # Errors
    /// Returns `ValidationError::ImageSize` when the byte count does not match.
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.len() % 4 != 0 {
            return Err(ValidationError::ImageSize {
                width,
                height,
                expected: usize::try_from(u64::from(width) * u64::from(height) * 4)
                    .unwrap_or(usize::MAX),
                actual: bytes.len(),
            });
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|px| Rgba::new(px[0], px[1], px[2], px[3]))
            .collect();
        Self::new(width, height, pixels)
    }

    /// Image filled with one color
    #[must_use]
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let len = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(0);
        Self {
            width,
            height,
            pixels: vec![color; len],
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at `(x, y)`, `None` outside the image
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = usize::try_from(u64::from(y) * u64::from(self.width) + u64::from(x)).ok()?;
        self.pixels.get(idx).copied()
    }

    /// Overwrite the pixel at `(x, y)`; out-of-range writes are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        if let Ok(idx) = usize::try_from(u64::from(y) * u64::from(self.width) + u64::from(x)) {
            if let Some(slot) = self.pixels.get_mut(idx) {
                *slot = color;
            }
        }
    }
}

/// Map every pixel onto `palette`, in row-major order
///
/// Colors are `None` when the palette is empty; alpha is carried through so
/// the plan builder can apply its transparency threshold.
#[must_use]
pub fn quantize_image(
    image: &SourceImage,
    quantizer: &Quantizer,
    palette: &Palette,
) -> Vec<QuantizedPixel> {
    let width = image.width.max(1);
    image
        .pixels
        .iter()
        .zip(0u64..)
        .map(|(rgba, idx)| {
            #[allow(clippy::cast_possible_truncation)]
            let (image_x, image_y) = ((idx % u64::from(width)) as u32, (idx / u64::from(width)) as u32);
            QuantizedPixel {
                image_x,
                image_y,
                alpha: rgba.a,
                color: quantizer.quantize(rgba.rgb(), palette.as_slice()).cloned(),
            }
        })
        .collect()
}
