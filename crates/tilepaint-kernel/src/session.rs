//! Scheduler session
//!
//! [`SchedulerSession`] is the single owner of everything a painting run
//! mutates: the ledger, the plan queue and the drawn records. Components
//! borrow it for reads and go through its methods for every mutation; there
//! is no module-level state.

use crate::api::ChargeSnapshot;
use crate::error::PaintError;
use crate::events::Counters;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tilepaint_core::{
    order, quantize_image, validate_address, validate_anchor, Address, Anchor, ColorMatcher,
    DrawnRecord, DriftRecord, ImagePos, Ledger, PaintConfig, Palette, PaletteColor, PendingPixel,
    PlanBuilder, PlanPreview, PlanQueue, Quantizer, SessionCounters, SessionSnapshot,
    SourceImage, ValidationError, SNAPSHOT_VERSION,
};
use tokio::time::Instant;
use ulid::Ulid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall clock anchored to the tokio clock
///
/// Reading time through tokio keeps charge predictions consistent with the
/// scheduler's sleeps, including under paused test time.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    #[must_use]
    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            origin: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::MAX);
        self.wall_origin
            .checked_add_signed(elapsed)
            .unwrap_or(self.wall_origin)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of re-mapping the plan onto a changed palette
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationReport {
    pub remapped: usize,
    pub dropped: usize,
}

/// All mutable state of one painting session
#[derive(Debug)]
pub struct SchedulerSession {
    id: SessionId,
    config: PaintConfig,
    anchor: Anchor,
    width: u32,
    height: u32,
    palette: Palette,
    quantizer: Quantizer,
    ledger: Ledger,
    plan: PlanQueue,
    drawn: IndexMap<Address, DrawnRecord>,
    last_position: Option<ImagePos>,
    counters: SessionCounters,
    skipped: u64,
    first_batch: bool,
    clock: SessionClock,
}

impl SchedulerSession {
    /// Quantize `image`, build and order the plan
    ///
    /// # Errors
    /// - `CoreError::Config` when the configuration is invalid
    /// - `ValidationError` for an empty palette or an out-of-range anchor
    pub fn plan_image(
        config: PaintConfig,
        palette: Palette,
        anchor: Anchor,
        image: &SourceImage,
        ledger: Ledger,
        clock: SessionClock,
    ) -> Result<Self, PaintError> {
        config.validate()?;
        if palette.is_empty() {
            return Err(ValidationError::EmptyPalette.into());
        }
        validate_anchor(&anchor, config.tile_size)?;

        let quantizer = Quantizer::from_config(&config);
        let quantized = quantize_image(image, &quantizer, &palette);
        let plan = PlanBuilder::new(config.tile_size, config.transparency_threshold)
            .build(&quantized, &anchor);
        let plan = order(plan, config.strategy, image.width(), image.height());

        tracing::info!(
            pending = plan.len(),
            width = image.width(),
            height = image.height(),
            strategy = %config.strategy,
            "session planned"
        );
        Ok(Self::from_parts(
            config,
            palette,
            quantizer,
            anchor,
            (image.width(), image.height()),
            plan,
            ledger,
            clock,
        ))
    }

    /// Start from an already built plan
    ///
    /// # Errors
    /// Same as [`Self::plan_image`].
    pub fn from_plan(
        config: PaintConfig,
        palette: Palette,
        anchor: Anchor,
        dimensions: (u32, u32),
        plan: Vec<PendingPixel>,
        ledger: Ledger,
        clock: SessionClock,
    ) -> Result<Self, PaintError> {
        config.validate()?;
        if palette.is_empty() {
            return Err(ValidationError::EmptyPalette.into());
        }
        validate_anchor(&anchor, config.tile_size)?;
        let quantizer = Quantizer::from_config(&config);
        Ok(Self::from_parts(
            config, palette, quantizer, anchor, dimensions, plan, ledger, clock,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        config: PaintConfig,
        palette: Palette,
        quantizer: Quantizer,
        anchor: Anchor,
        (width, height): (u32, u32),
        plan: Vec<PendingPixel>,
        ledger: Ledger,
        clock: SessionClock,
    ) -> Self {
        let total = plan.len() as u64;
        Self {
            id: SessionId::new(),
            config,
            anchor,
            width,
            height,
            palette,
            quantizer,
            ledger,
            plan: PlanQueue::new(plan),
            drawn: IndexMap::new(),
            last_position: None,
            counters: SessionCounters {
                total,
                ..SessionCounters::default()
            },
            skipped: 0,
            first_batch: true,
            clock,
        }
    }

    /// Resume from a persisted snapshot
    ///
    /// The snapshot's batch size and strategy win over `config`.
    ///
    /// # Errors
    /// Same as [`Self::plan_image`].
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        config: PaintConfig,
        clock: SessionClock,
    ) -> Result<Self, PaintError> {
        let config = config
            .with_batch_size(snapshot.batch_size)
            .with_strategy(snapshot.strategy);
        config.validate()?;
        validate_anchor(&snapshot.anchor, config.tile_size)?;

        let id = snapshot
            .session_id
            .parse::<Ulid>()
            .map(SessionId)
            .unwrap_or_default();
        let drawn = snapshot
            .drawn
            .into_iter()
            .map(|record| (record.address, record))
            .collect();

        tracing::info!(
            session = %id,
            pending = snapshot.plan.len(),
            "session resumed"
        );
        Ok(Self {
            id,
            quantizer: Quantizer::from_config(&config),
            config,
            anchor: snapshot.anchor,
            width: snapshot.image_width,
            height: snapshot.image_height,
            palette: snapshot.palette,
            ledger: Ledger::from_snapshot(snapshot.ledger),
            plan: PlanQueue::new(snapshot.plan),
            drawn,
            last_position: snapshot.last_position,
            counters: snapshot.counters,
            skipped: 0,
            first_batch: true,
            clock,
        })
    }

    /// Persistable view of the session
    #[must_use]
    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.id.to_string(),
            saved_at: self.now(),
            anchor: self.anchor,
            image_width: self.width,
            image_height: self.height,
            palette: self.palette.clone(),
            plan: self.plan.to_vec(),
            drawn: self.drawn.values().cloned().collect(),
            ledger: self.ledger.snapshot(),
            strategy: self.config.strategy,
            batch_size: self.config.batch_size,
            last_position: self.last_position,
            counters: self.counters,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PaintConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[inline]
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Identity rule shared by reconciliation and verification
    #[must_use]
    pub fn matcher(&self) -> ColorMatcher<'_> {
        ColorMatcher::new(&self.quantizer, &self.palette, self.config.color_fallback)
    }

    #[inline]
    #[must_use]
    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }

    #[inline]
    #[must_use]
    pub fn is_plan_empty(&self) -> bool {
        self.plan.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn has_drawn(&self) -> bool {
        !self.drawn.is_empty()
    }

    pub fn drawn_records(&self) -> impl Iterator<Item = &DrawnRecord> {
        self.drawn.values()
    }

    #[inline]
    #[must_use]
    pub fn last_position(&self) -> Option<ImagePos> {
        self.last_position
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> SessionCounters {
        self.counters
    }

    /// Pixels dropped by local validation
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Event counters; `painted` includes verified pixels and never decreases
    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters {
            painted: self.counters.painted + self.counters.verified,
            total: self.counters.total,
        }
    }

    /// Size of the next forward batch at `now`
    ///
    /// The first batch may spend the whole predicted balance; later batches
    /// use the configured size. Never above the remaining plan or the ledger
    /// cap, and at least 1 while work remains.
    #[must_use]
    pub fn desired_batch_size(&self, now: DateTime<Utc>) -> usize {
        let remaining = self.plan.len();
        if remaining == 0 {
            return 0;
        }
        let available = self.ledger.available(now);
        let size = if self.first_batch && self.config.use_all_charges_first && available >= 1 {
            available
        } else {
            self.config.batch_size
        };
        let cap = self.ledger.cap().max(1);
        usize::try_from(size.min(cap).max(1))
            .unwrap_or(usize::MAX)
            .min(remaining)
    }

    /// Overlay snapshot of the pending plan and the next batch size
    #[must_use]
    pub fn plan_preview(&self) -> PlanPreview {
        self.plan.preview(self.desired_batch_size(self.now()))
    }

    /// Rough time to finish the remaining plan
    #[must_use]
    pub fn estimated_remaining(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.plan.len() as f64;
        if remaining == 0.0 {
            return Duration::ZERO;
        }
        let shortfall = (remaining - self.ledger.predict(now)).max(0.0);
        let regen_ms = shortfall * self.ledger.regen_ms() as f64;
        let batches = (remaining / f64::from(self.config.batch_size.max(1))).ceil();
        let pause_ms = batches * self.config.inter_batch_pause_ms as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((regen_ms + pause_ms) as u64)
    }

    /// Remove up to `n` pixels from the front of the plan
    pub fn take_batch(&mut self, n: usize) -> Vec<PendingPixel> {
        self.plan.take_front(n)
    }

    /// Return unconfirmed pixels to the front of the plan
    pub fn restore_front(&mut self, pixels: Vec<PendingPixel>) {
        if !pixels.is_empty() {
            tracing::debug!(count = pixels.len(), "requeued unconfirmed pixels");
            self.plan.restore_front(pixels);
        }
    }

    /// Drop pixels a writer would refuse, logging why
    pub fn drop_invalid(&mut self, batch: Vec<PendingPixel>) -> Vec<PendingPixel> {
        let tile_size = self.config.tile_size;
        let (valid, invalid): (Vec<_>, Vec<_>) = batch.into_iter().partition(|pixel| {
            validate_address(&pixel.address, tile_size).is_ok()
                && self.palette.contains(pixel.color.id)
        });
        for pixel in &invalid {
            let reason = validate_address(&pixel.address, tile_size)
                .err()
                .unwrap_or(ValidationError::UnavailableColor(pixel.color.id));
            tracing::warn!(address = %pixel.address, %reason, "dropping pixel");
        }
        self.skipped += invalid.len() as u64;
        valid
    }

    fn record(&mut self, address: Address, color: PaletteColor, now: DateTime<Utc>) {
        self.drawn.insert(
            address,
            DrawnRecord {
                address,
                color,
                painted_at: now,
            },
        );
    }

    /// A write for `pixel` was confirmed by the remote
    pub fn record_painted(&mut self, pixel: PendingPixel, now: DateTime<Utc>) {
        self.ledger.spend_confirmed(1, now);
        self.counters.painted += 1;
        self.last_position = Some(pixel.image_pos());
        self.record(pixel.address, pixel.color, now);
    }

    /// `pixel` already showed its target color; no charge spent
    pub fn record_verified(&mut self, pixel: PendingPixel, now: DateTime<Utc>) {
        self.counters.verified += 1;
        self.last_position = Some(pixel.image_pos());
        self.record(pixel.address, pixel.color, now);
    }

    /// A corrective write for `drift` was confirmed
    pub fn record_repair(&mut self, drift: DriftRecord, now: DateTime<Utc>) {
        self.ledger.spend_confirmed(1, now);
        self.counters.repaired += 1;
        self.record(drift.address, drift.expected_color, now);
    }

    /// Install authoritative remote counters
    pub fn sync_ledger(&mut self, charges: ChargeSnapshot, now: DateTime<Utc>) {
        self.ledger.sync(charges.count, charges.max, now);
    }

    /// The first forward batch has been submitted
    pub fn finish_first_batch(&mut self) {
        self.first_batch = false;
    }

    /// Re-map pending pixels whose color is no longer available
    ///
    /// Affected pixels take the nearest available color to their original
    /// target; pixels with no mapping are dropped.
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyPalette` and leaves the session untouched
    /// when `palette` is empty.
    pub fn revalidate_palette(&mut self, palette: Palette) -> Result<RevalidationReport, PaintError> {
        if palette.is_empty() {
            return Err(ValidationError::EmptyPalette.into());
        }
        let mut report = RevalidationReport::default();
        for pixel in self.plan.iter_mut() {
            if palette.contains(pixel.color.id) {
                continue;
            }
            if let Some(nearest) = self.quantizer.quantize(pixel.color.rgb(), palette.as_slice()) {
                pixel.color = nearest.clone();
                report.remapped += 1;
            }
        }
        let before = self.plan.len();
        self.plan.retain(|pixel| {
            let keep = palette.contains(pixel.color.id);
            if !keep {
                tracing::warn!(
                    address = %pixel.address,
                    reason = %ValidationError::UnavailableColor(pixel.color.id),
                    "dropping pixel"
                );
            }
            keep
        });
        report.dropped = before - self.plan.len();

        tracing::info!(
            remapped = report.remapped,
            dropped = report.dropped,
            colors = palette.len(),
            "palette revalidated"
        );
        self.palette = palette;
        Ok(report)
    }

    /// Clear drawn records, e.g. after completion or an explicit reset
    pub fn reset_drawn(&mut self) {
        self.drawn.clear();
    }
}
