//! Tile coordinate mapping
//!
//! The canvas is an unbounded integer grid cut into square tiles. An image
//! pixel lands at `anchor + offset`; the result is re-split into a tile and a
//! local offset with floor division so negative offsets wrap into the
//! preceding tile instead of producing negative locals.

use crate::error::ValidationError;
use crate::types::{Address, Anchor};

/// Map an image-local offset to a canonical address
///
/// A zero `tile_size` is treated as 1; configuration validation rejects it
/// before any plan is built.
#[must_use]
pub fn to_address(anchor: &Anchor, image_x: i64, image_y: i64, tile_size: u32) -> Address {
    let size = i64::from(tile_size.max(1));
    let global_x = anchor.tile_x * size + i64::from(anchor.local_x) + image_x;
    let global_y = anchor.tile_y * size + i64::from(anchor.local_y) + image_y;
    from_global(global_x, global_y, tile_size)
}

/// Split a global point into tile and local offset
#[must_use]
pub fn from_global(global_x: i64, global_y: i64, tile_size: u32) -> Address {
    let size = i64::from(tile_size.max(1));
    Address {
        tile_x: global_x.div_euclid(size),
        tile_y: global_y.div_euclid(size),
        local_x: local_part(global_x, size),
        local_y: local_part(global_y, size),
    }
}

#[inline]
fn local_part(global: i64, size: i64) -> u32 {
    // rem_euclid is in [0, size) and size fits u32
    u32::try_from(global.rem_euclid(size)).unwrap_or(0)
}

/// Reject anchors whose local offset does not fit inside one tile
///
/// # Errors
/// - `ValidationError::ZeroTileSize` for a zero tile size
/// - `ValidationError::LocalOutOfRange` when a local offset is `>= tile_size`
pub fn validate_anchor(anchor: &Anchor, tile_size: u32) -> Result<(), ValidationError> {
    if tile_size == 0 {
        return Err(ValidationError::ZeroTileSize);
    }
    if anchor.local_x >= tile_size || anchor.local_y >= tile_size {
        return Err(ValidationError::LocalOutOfRange {
            local_x: i64::from(anchor.local_x),
            local_y: i64::from(anchor.local_y),
            tile_size,
        });
    }
    Ok(())
}

/// Reject addresses that a writer would refuse
///
/// # Errors
/// Returns `ValidationError::LocalOutOfRange` when a local offset is outside the tile.
pub fn validate_address(address: &Address, tile_size: u32) -> Result<(), ValidationError> {
    if tile_size == 0 {
        return Err(ValidationError::ZeroTileSize);
    }
    if address.local_x >= tile_size || address.local_y >= tile_size {
        return Err(ValidationError::LocalOutOfRange {
            local_x: i64::from(address.local_x),
            local_y: i64::from(address.local_y),
            tile_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crosses_positive_x_edge() {
        let anchor = Anchor::new(2, 2, 998, 5);
        let addr = to_address(&anchor, 5, 0, 1000);
        assert_eq!(addr, Address::new(3, 2, 3, 5));
    }

    #[test]
    fn crosses_negative_x_edge() {
        let anchor = Anchor::new(4, 0, 2, 0);
        let addr = to_address(&anchor, -5, 0, 1000);
        assert_eq!(addr.tile_x, 3);
        assert_eq!(addr.local_x, 997);
    }

    #[test]
    fn crosses_several_tiles_both_ways() {
        let anchor = Anchor::new(0, 0, 10, 990);
        let addr = to_address(&anchor, 2_500, 1_020, 1000);
        assert_eq!(addr, Address::new(2, 2, 510, 10));

        let addr = to_address(&anchor, -2_011, -1_991, 1000);
        assert_eq!(addr, Address::new(-3, -2, 999, 999));
    }

    #[test]
    fn larger_tile_size() {
        let anchor = Anchor::new(1, 1, 2_999, 0);
        let addr = to_address(&anchor, 1, 0, 3000);
        assert_eq!(addr, Address::new(2, 1, 0, 0));
    }

    #[test]
    fn anchor_validation() {
        assert!(validate_anchor(&Anchor::new(0, 0, 999, 999), 1000).is_ok());
        assert!(matches!(
            validate_anchor(&Anchor::new(0, 0, 1000, 0), 1000),
            Err(ValidationError::LocalOutOfRange { .. })
        ));
        assert_eq!(
            validate_anchor(&Anchor::new(0, 0, 0, 0), 0),
            Err(ValidationError::ZeroTileSize)
        );
    }
}
