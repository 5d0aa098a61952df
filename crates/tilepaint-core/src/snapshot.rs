//! Session persistence
//!
//! A [`SessionSnapshot`] carries everything needed to resume a painting
//! session with the same forward behavior. The on-disk format is versioned;
//! the legacy version-1 shape is migrated once at load time and never seen
//! by the rest of the crate.

use crate::error::SnapshotError;
use crate::ledger::LedgerSnapshot;
use crate::plan::OrderStrategy;
use crate::types::{
    Address, Anchor, ColorId, DrawnRecord, ImagePos, Palette, PaletteColor, PendingPixel, Rgb,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 2;

/// Counters carried across restarts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Pixels written by this session
    pub painted: u64,
    /// Pixels found already correct by the prefilter
    pub verified: u64,
    /// Drift repairs performed
    pub repaired: u64,
    /// Total pixels in the original plan
    pub total: u64,
}

/// Persisted painting session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub anchor: Anchor,
    pub image_width: u32,
    pub image_height: u32,
    pub palette: Palette,
    pub plan: Vec<PendingPixel>,
    pub drawn: Vec<DrawnRecord>,
    pub ledger: LedgerSnapshot,
    pub strategy: OrderStrategy,
    pub batch_size: u32,
    pub last_position: Option<ImagePos>,
    #[serde(default)]
    pub counters: SessionCounters,
}

impl SessionSnapshot {
    /// Parse any supported version, migrating legacy documents
    ///
    /// # Errors
    /// - `SnapshotError::Malformed` for invalid JSON or a shape mismatch
    /// - `SnapshotError::UnsupportedVersion` for versions newer than this build
    pub fn from_json(input: &str) -> Result<Self, SnapshotError> {
        let raw: serde_json::Value = serde_json::from_str(input)?;
        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1);

        match version {
            1 => {
                let legacy: legacy::SessionV1 = serde_json::from_value(raw)?;
                tracing::info!(
                    pending = legacy.plan.len(),
                    drawn = legacy.drawn.len(),
                    "migrating version 1 session snapshot"
                );
                Ok(legacy.migrate())
            }
            2 => Ok(serde_json::from_value(raw)?),
            other => Err(SnapshotError::UnsupportedVersion(
                u32::try_from(other).unwrap_or(u32::MAX),
            )),
        }
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    /// Returns `SnapshotError::Malformed` if serialization fails.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to `path`, replacing any previous file
    ///
    /// The document is written beside the target and renamed into place so a
    /// crash never leaves a truncated snapshot.
    ///
    /// # Errors
    /// Returns `SnapshotError::Io` on filesystem failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let staging = path.with_extension("json.partial");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, path)?;
        tracing::debug!(path = %path.display(), pending = self.plan.len(), "session saved");
        Ok(())
    }

    /// Read from `path`
    ///
    /// # Errors
    /// Returns `SnapshotError::Io` or any error of [`Self::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

mod legacy {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub(super) struct RgbV1 {
        r: u8,
        g: u8,
        b: u8,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ColorV1 {
        id: ColorId,
        #[serde(default)]
        name: Option<String>,
        rgb: RgbV1,
    }

    impl ColorV1 {
        fn normalize(self) -> PaletteColor {
            let name = self.name.unwrap_or_else(|| {
                Rgb::new(self.rgb.r, self.rgb.g, self.rgb.b).to_string()
            });
            PaletteColor::new(self.id, self.rgb.r, self.rgb.g, self.rgb.b, name)
        }
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct PendingV1 {
        x: u32,
        y: u32,
        tile_x: i64,
        tile_y: i64,
        local_x: u32,
        local_y: u32,
        color: ColorV1,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct DrawnV1 {
        tile_x: i64,
        tile_y: i64,
        local_x: u32,
        local_y: u32,
        color: ColorV1,
        timestamp: i64,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ChargesV1 {
        count: f64,
        max: u32,
        #[serde(default = "default_cooldown")]
        cooldown_ms: u64,
    }

    fn default_cooldown() -> u64 {
        30_000
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct PositionV1 {
        x: u32,
        y: u32,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct SessionV1 {
        #[serde(default)]
        session_id: Option<String>,
        timestamp: i64,
        anchor: Anchor,
        width: u32,
        height: u32,
        #[serde(default)]
        palette: Vec<ColorV1>,
        pub(super) plan: Vec<PendingV1>,
        #[serde(default)]
        pub(super) drawn: Vec<DrawnV1>,
        charges: ChargesV1,
        #[serde(default)]
        strategy: Option<String>,
        batch_size: u32,
        #[serde(default)]
        last_position: Option<PositionV1>,
        #[serde(default)]
        painted: u64,
        #[serde(default)]
        total: u64,
    }

    impl SessionV1 {
        pub(super) fn migrate(self) -> SessionSnapshot {
            let saved_at = DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default();
            let strategy = self
                .strategy
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();

            let plan = self
                .plan
                .into_iter()
                .map(|p| PendingPixel {
                    image_x: p.x,
                    image_y: p.y,
                    address: Address::new(p.tile_x, p.tile_y, p.local_x, p.local_y),
                    color: p.color.normalize(),
                })
                .collect();

            let drawn = self
                .drawn
                .into_iter()
                .map(|d| DrawnRecord {
                    address: Address::new(d.tile_x, d.tile_y, d.local_x, d.local_y),
                    color: d.color.normalize(),
                    painted_at: DateTime::from_timestamp_millis(d.timestamp).unwrap_or(saved_at),
                })
                .collect();

            let cap = self.charges.max;
            SessionSnapshot {
                version: SNAPSHOT_VERSION,
                session_id: self.session_id.unwrap_or_default(),
                saved_at,
                anchor: self.anchor,
                image_width: self.width,
                image_height: self.height,
                palette: Palette::from_colors(self.palette.into_iter().map(ColorV1::normalize)),
                plan,
                drawn,
                ledger: LedgerSnapshot {
                    balance: self.charges.count.clamp(0.0, f64::from(cap)),
                    cap,
                    regen_ms: self.charges.cooldown_ms.max(1),
                    last_synced_at: saved_at,
                    accrued_at: saved_at,
                },
                strategy,
                batch_size: self.batch_size,
                last_position: self.last_position.map(|p| ImagePos::new(p.x, p.y)),
                counters: SessionCounters {
                    painted: self.painted,
                    total: self.total,
                    ..SessionCounters::default()
                },
            }
        }
    }
}
