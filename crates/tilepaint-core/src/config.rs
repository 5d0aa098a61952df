//! Paint session configuration
//!
//! Every knob of a painting session lives in [`PaintConfig`]. Missing TOML
//! fields take their defaults, so a config file only needs the values it
//! overrides.

use crate::error::CoreError;
use crate::palette::{ColorFallback, DEFAULT_WHITE_THRESHOLD};
use crate::plan::OrderStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Paint session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaintConfig {
    /// Tile edge in pixels
    pub tile_size: u32,
    /// Pixels per batch
    pub batch_size: u32,
    /// First batch spends the whole predicted balance
    pub use_all_charges_first: bool,
    /// Source alpha below this is skipped
    pub transparency_threshold: u8,
    /// Whiteness guard for quantization
    pub white_threshold: u8,
    /// Weight of the chroma difference added to Lab distance
    pub chroma_penalty: f64,
    /// Quantize by plain sRGB distance
    pub use_legacy_rgb: bool,
    /// How observed remote colors resolve to palette ids
    pub color_fallback: ColorFallback,
    /// Milliseconds per regenerated charge
    pub charge_regen_ms: u64,
    /// Plan ordering
    pub strategy: OrderStrategy,
    /// Repair drift before each batch
    pub protection_enabled: bool,
    /// Skip pixels that already show their target color
    pub smart_verification: bool,
    /// Prefilter refill rounds per batch
    pub verification_rounds: u32,
    /// Attempts per submission
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub retry_base_delay_ms: u64,
    /// Pause after every batch
    pub inter_batch_pause_ms: u64,
    /// Extra pause after a batch exhausts its retries
    pub failed_batch_pause_ms: u64,
    /// Margin added to charge waits
    pub charge_wait_margin_ms: u64,
    /// Cadence of waiting events
    pub progress_interval_ms: u64,
    /// Upper bound on charges waited for before repairing
    pub max_repair_wait_charges: u32,
    /// Anchor selection ceiling
    pub position_timeout_ms: u64,
    /// Credential cache lifetime
    pub credential_ttl_ms: u64,
}

impl PaintConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With tile size
    #[inline]
    #[must_use]
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With ordering strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: OrderStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// With first-batch policy
    #[inline]
    #[must_use]
    pub fn with_use_all_charges_first(mut self, enabled: bool) -> Self {
        self.use_all_charges_first = enabled;
        self
    }

    /// With drift protection toggled
    #[inline]
    #[must_use]
    pub fn with_protection(mut self, enabled: bool) -> Self {
        self.protection_enabled = enabled;
        self
    }

    /// With verification prefilter toggled
    #[inline]
    #[must_use]
    pub fn with_smart_verification(mut self, enabled: bool) -> Self {
        self.smart_verification = enabled;
        self
    }

    /// With observed-color fallback
    #[inline]
    #[must_use]
    pub fn with_color_fallback(mut self, fallback: ColorFallback) -> Self {
        self.color_fallback = fallback;
        self
    }

    /// With quantization distance options
    #[inline]
    #[must_use]
    pub fn with_color_distance(mut self, chroma_penalty: f64, use_legacy_rgb: bool) -> Self {
        self.chroma_penalty = chroma_penalty;
        self.use_legacy_rgb = use_legacy_rgb;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// With charge regeneration period
    #[inline]
    #[must_use]
    pub fn with_charge_regen_ms(mut self, regen_ms: u64) -> Self {
        self.charge_regen_ms = regen_ms;
        self
    }

    #[inline]
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }

    #[inline]
    #[must_use]
    pub fn failed_batch_pause(&self) -> Duration {
        Duration::from_millis(self.failed_batch_pause_ms)
    }

    #[inline]
    #[must_use]
    pub fn charge_wait_margin(&self) -> Duration {
        Duration::from_millis(self.charge_wait_margin_ms)
    }

    #[inline]
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    #[inline]
    #[must_use]
    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_millis(self.credential_ttl_ms)
    }

    /// Reject values the scheduler cannot run with
    ///
    /// # Errors
    /// Returns `CoreError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        let zero_checks: [(&str, bool); 5] = [
            ("tile_size", self.tile_size == 0),
            ("batch_size", self.batch_size == 0),
            ("max_attempts", self.max_attempts == 0),
            ("verification_rounds", self.verification_rounds == 0),
            ("charge_regen_ms", self.charge_regen_ms == 0),
        ];
        if let Some((field, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(CoreError::Config(format!("{field} must be positive")));
        }
        if !self.chroma_penalty.is_finite() || self.chroma_penalty < 0.0 {
            return Err(CoreError::Config(
                "chroma_penalty must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns `CoreError::Config` on parse or validation failure.
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns `CoreError::Config` when the file is unreadable or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `CoreError::Config` if serialization fails.
    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }
}

impl Default for PaintConfig {
    fn default() -> Self {
        Self {
            tile_size: 1000,
            batch_size: 20,
            use_all_charges_first: true,
            transparency_threshold: 100,
            white_threshold: DEFAULT_WHITE_THRESHOLD,
            chroma_penalty: 0.0,
            use_legacy_rgb: false,
            color_fallback: ColorFallback::ExactThenNearest,
            charge_regen_ms: 30_000,
            strategy: OrderStrategy::RowMajorForward,
            protection_enabled: true,
            smart_verification: true,
            verification_rounds: 3,
            max_attempts: 5,
            retry_base_delay_ms: 3_000,
            inter_batch_pause_ms: 500,
            failed_batch_pause_ms: 5_000,
            charge_wait_margin_ms: 5_000,
            progress_interval_ms: 5_000,
            max_repair_wait_charges: 20,
            position_timeout_ms: 120_000,
            credential_ttl_ms: 90_000,
        }
    }
}
