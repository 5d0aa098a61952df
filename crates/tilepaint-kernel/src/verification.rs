//! Smart-verification prefilter
//!
//! Before charges are spent on a batch, the tiles it touches are read once
//! each and pixels that already show their target color are split off. The
//! prefilter never writes.

use crate::api::{CanvasReader, TileImage};
use indexmap::IndexSet;
use std::collections::HashMap;
use tilepaint_core::{Address, ColorMatcher, PendingPixel, TileKey};

/// Candidates split by current remote state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefilterResult {
    pub to_submit: Vec<PendingPixel>,
    pub already_correct: Vec<PendingPixel>,
}

/// Distinct tiles of `addresses` in first-appearance order
pub fn distinct_tiles<'a>(addresses: impl IntoIterator<Item = &'a Address>) -> IndexSet<TileKey> {
    addresses.into_iter().map(Address::tile).collect()
}

/// Read each tile of `tiles` once; unreadable tiles are left out
///
/// A failed read is not retried within the same pass.
pub async fn read_tiles(
    reader: &dyn CanvasReader,
    tiles: IndexSet<TileKey>,
) -> HashMap<TileKey, TileImage> {
    let mut images = HashMap::with_capacity(tiles.len());
    for tile in tiles {
        match reader.read_tile(tile).await {
            Ok(image) => {
                images.insert(tile, image);
            }
            Err(err) => {
                tracing::warn!(tile_x = tile.x, tile_y = tile.y, error = %err, "tile read failed");
            }
        }
    }
    images
}

/// Split `candidates` into pixels to write and pixels already correct
///
/// Pixels on tiles that could not be read are always submitted. Relative
/// order is preserved in both outputs.
pub async fn prefilter(
    reader: &dyn CanvasReader,
    matcher: &ColorMatcher<'_>,
    candidates: Vec<PendingPixel>,
) -> PrefilterResult {
    let tiles = distinct_tiles(candidates.iter().map(|p| &p.address));
    let images = read_tiles(reader, tiles).await;

    let mut result = PrefilterResult::default();
    for pixel in candidates {
        let correct = images.get(&pixel.address.tile()).is_some_and(|image| {
            let observed = image.sample(pixel.address.local_x, pixel.address.local_y);
            matcher.matches(observed, &pixel.color)
        });
        if correct {
            result.already_correct.push(pixel);
        } else {
            result.to_submit.push(pixel);
        }
    }

    tracing::debug!(
        to_submit = result.to_submit.len(),
        already_correct = result.already_correct.len(),
        "prefilter done"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockCanvasReader;
    use crate::error::TransportError;
    use tilepaint_core::{Address, ColorFallback, Palette, PaletteColor, Quantizer, Rgba};

    fn red() -> PaletteColor {
        PaletteColor::new(7, 237, 28, 36, "Red")
    }

    fn pixel(tile_x: i64, local_x: u32) -> PendingPixel {
        PendingPixel {
            image_x: local_x,
            image_y: 0,
            address: Address::new(tile_x, 0, local_x, 0),
            color: red(),
        }
    }

    #[tokio::test]
    async fn splits_matching_pixels_and_reads_each_tile_once() {
        let mut reader = MockCanvasReader::new();
        reader
            .expect_read_tile()
            .withf(|tile| *tile == TileKey::new(0, 0))
            .times(1)
            .returning(|_| {
                let mut image = TileImage::blank(8);
                image.set(1, 0, Rgba::new(237, 28, 36, 255));
                Ok(image)
            });
        reader
            .expect_read_tile()
            .withf(|tile| *tile == TileKey::new(1, 0))
            .times(1)
            .returning(|_| Err(TransportError::Timeout));

        let quantizer = Quantizer::default();
        let palette = Palette::from_colors(vec![red()]);
        let matcher = ColorMatcher::new(&quantizer, &palette, ColorFallback::ExactThenNearest);

        let result = prefilter(
            &reader,
            &matcher,
            vec![pixel(0, 0), pixel(0, 1), pixel(1, 1), pixel(0, 2)],
        )
        .await;

        let correct: Vec<_> = result.already_correct.iter().map(|p| p.address).collect();
        assert_eq!(correct, vec![Address::new(0, 0, 1, 0)]);
        // unreadable tile falls through to submission
        assert_eq!(result.to_submit.len(), 3);
        assert_eq!(result.to_submit[1].address.tile_x, 1);
    }

    #[tokio::test]
    async fn failed_tile_is_not_read_again_in_the_same_pass() {
        let mut reader = MockCanvasReader::new();
        reader
            .expect_read_tile()
            .times(1)
            .returning(|_| Err(TransportError::Network("unreachable".to_string())));

        let tiles = distinct_tiles(&[Address::new(0, 0, 1, 0); 5]);
        assert_eq!(tiles.len(), 1);
        let images = read_tiles(&reader, tiles).await;
        assert!(images.is_empty());
    }

    #[test]
    fn distinct_tiles_keep_first_appearance_order() {
        let addresses = [
            Address::new(1, 0, 0, 0),
            Address::new(0, 0, 5, 5),
            Address::new(1, 0, 9, 9),
        ];
        let tiles: Vec<_> = distinct_tiles(&addresses).into_iter().collect();
        assert_eq!(tiles, vec![TileKey::new(1, 0), TileKey::new(0, 0)]);
    }
}
