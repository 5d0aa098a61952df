//! tilepaint core - the pure side of a rate-limited tile painter
//!
//! Everything here is synchronous and free of I/O beyond snapshot files:
//! - Palette quantization in CIE L*a*b*
//! - Image offsets to tile addresses with floor wraparound
//! - Paint plan construction, ordering strategies and the plan queue
//! - The predictive, regenerating charge ledger
//! - Session configuration and versioned session snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use tilepaint_core::prelude::*;
//!
//! let palette = Palette::from_colors(vec![PaletteColor::new(7, 237, 28, 36, "Red")]);
//! let image = SourceImage::filled(2, 2, Rgba::new(230, 30, 40, 255));
//! let quantized = quantize_image(&image, &Quantizer::default(), &palette);
//!
//! let anchor = Anchor::new(0, 0, 998, 999);
//! let plan = PlanBuilder::new(1000, 100).build(&quantized, &anchor);
//! let plan = order(plan, OrderStrategy::Spiral, 2, 2);
//! assert_eq!(plan.len(), 4);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod coords;
pub mod error;
pub mod image;
pub mod ledger;
pub mod palette;
pub mod plan;
pub mod snapshot;
pub mod types;

// Re-exports for convenience
pub use config::PaintConfig;
pub use coords::{from_global, to_address, validate_address, validate_anchor};
pub use error::{CoreError, LedgerError, SnapshotError, ValidationError};
pub use image::{quantize_image, SourceImage};
pub use ledger::{Ledger, LedgerSnapshot};
pub use palette::{rgb_to_lab, ColorFallback, ColorMatcher, Lab, Quantizer};
pub use plan::{
    order, order_seeded, resume_after, spiral_visit_order, OrderStrategy, PlanBuilder,
    PlanPreview, PlanQueue, PreviewEntry, QuantizedPixel,
};
pub use snapshot::{SessionCounters, SessionSnapshot, SNAPSHOT_VERSION};
pub use types::{
    Address, Anchor, ColorId, DrawnRecord, DriftRecord, ImagePos, Palette, PaletteColor,
    PendingPixel, Rgb, Rgba, TileKey, TRANSPARENT_ID,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with tilepaint core
    pub use crate::{
        order, quantize_image, to_address, Address, Anchor, ColorMatcher, DrawnRecord, Ledger,
        OrderStrategy, PaintConfig, Palette, PaletteColor, PendingPixel, PlanBuilder, PlanQueue,
        Quantizer, Rgb, Rgba, SourceImage,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
