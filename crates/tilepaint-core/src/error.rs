//! Error types for tilepaint core
//!
//! Provides error handling for:
//! - Local validation (addresses, palettes, configuration)
//! - Charge ledger debits
//! - Session snapshot persistence

use crate::types::ColorId;

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Rejected locally before any remote call
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Ledger refused a debit
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Snapshot could not be read or written
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Check if the error is a local validation failure
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Local validation failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No colors to map against
    #[error("palette is empty")]
    EmptyPalette,

    /// Local offset outside the tile
    #[error("local offset ({local_x}, {local_y}) outside tile of size {tile_size}")]
    LocalOutOfRange {
        local_x: i64,
        local_y: i64,
        tile_size: u32,
    },

    /// Color id not present in the active palette
    #[error("color {0} is not available")]
    UnavailableColor(ColorId),

    /// Tile size of zero
    #[error("tile size must be positive")]
    ZeroTileSize,

    /// Pixel buffer does not match the declared dimensions
    #[error("image {width}x{height} needs {expected} pixels, got {actual}")]
    ImageSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Ledger errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// Predicted balance below the requested debit
    #[error("insufficient charges: requested {requested}, available {available:.2}")]
    Insufficient { requested: u32, available: f64 },
}

/// Snapshot persistence errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Malformed JSON or schema mismatch
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Version this build does not understand
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// File system failure
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
}
