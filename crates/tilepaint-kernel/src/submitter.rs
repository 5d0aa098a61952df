//! Per-tile write submission
//!
//! A batch is split into one write per tile (first-appearance order). Each
//! write runs under the [`RetryPolicy`]: failures back off exponentially,
//! an authorization rejection forces one credential refresh that does not
//! count against the budget, and a short `painted` count confirms only the
//! front of the group. Exhausted groups come back as unconfirmed instead of
//! failing the batch.

use crate::api::{ChargeSnapshot, CanvasWriter, CredentialProvider, WriteRequest};
use crate::cancellation::StopToken;
use crate::error::SubmitFailure;
use crate::events::{Counters, EventBus, PaintEvent};
use crate::retry::RetryPolicy;
use indexmap::IndexMap;
use std::sync::Arc;
use tilepaint_core::{Address, DriftRecord, PaletteColor, PendingPixel, TileKey};

/// Anything that can be written to one address
pub trait Paintable: Clone + Send + Sync {
    fn address(&self) -> &Address;
    fn target(&self) -> &PaletteColor;
}

impl Paintable for PendingPixel {
    fn address(&self) -> &Address {
        &self.address
    }

    fn target(&self) -> &PaletteColor {
        &self.color
    }
}

impl Paintable for DriftRecord {
    fn address(&self) -> &Address {
        &self.address
    }

    fn target(&self) -> &PaletteColor {
        &self.expected_color
    }
}

/// Result of submitting one batch
#[derive(Debug, Clone)]
pub struct SubmitReport<T> {
    /// Confirmed painted, in submission order
    pub confirmed: Vec<T>,
    /// Not confirmed; caller decides whether to requeue
    pub unconfirmed: Vec<T>,
    /// Latest charge counters reported by the remote
    pub charges: Option<ChargeSnapshot>,
    /// Write calls made, including the free refresh attempt
    pub calls: u32,
    /// Last failure seen, if any group ended unconfirmed
    pub last_failure: Option<SubmitFailure>,
    /// Stop observed while submitting
    pub stopped: bool,
}

impl<T> SubmitReport<T> {
    fn empty() -> Self {
        Self {
            confirmed: Vec::new(),
            unconfirmed: Vec::new(),
            charges: None,
            calls: 0,
            last_failure: None,
            stopped: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unconfirmed.is_empty()
    }
}

/// Group items by tile, keeping first-appearance order of tiles and items
#[must_use]
pub fn group_by_tile<T: Paintable>(items: Vec<T>) -> IndexMap<TileKey, Vec<T>> {
    let mut groups: IndexMap<TileKey, Vec<T>> = IndexMap::new();
    for item in items {
        groups.entry(item.address().tile()).or_default().push(item);
    }
    groups
}

/// Writes batches through the remote writer with retry and credential renewal
#[derive(Clone)]
pub struct Submitter {
    writer: Arc<dyn CanvasWriter>,
    credentials: Arc<dyn CredentialProvider>,
    policy: RetryPolicy,
    events: EventBus,
    stop: StopToken,
}

impl Submitter {
    #[must_use]
    pub fn new(
        writer: Arc<dyn CanvasWriter>,
        credentials: Arc<dyn CredentialProvider>,
        policy: RetryPolicy,
        events: EventBus,
        stop: StopToken,
    ) -> Self {
        Self {
            writer,
            credentials,
            policy,
            events,
            stop,
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Submit `items`, one write per tile
    ///
    /// Never fails: anything not confirmed is returned in `unconfirmed`.
    pub async fn submit<T: Paintable>(&self, items: Vec<T>, counters: Counters) -> SubmitReport<T> {
        let mut report = SubmitReport::empty();
        for (tile, group) in group_by_tile(items) {
            if report.stopped || self.stop.is_stopped() {
                report.stopped = true;
                report.unconfirmed.extend(group);
                continue;
            }
            self.submit_group(tile, group, counters, &mut report).await;
        }
        report
    }

    async fn submit_group<T: Paintable>(
        &self,
        tile: TileKey,
        mut remaining: Vec<T>,
        counters: Counters,
        report: &mut SubmitReport<T>,
    ) {
        let mut attempt = 0u32;
        let mut refresh_used = false;
        let mut force_refresh = false;

        while attempt < self.policy.max_attempts() {
            attempt += 1;

            let failure = match self.attempt(tile, &mut remaining, force_refresh, report).await {
                Ok(()) => return,
                Err(failure) => failure,
            };
            force_refresh = failure.is_authorization();

            if failure.is_authorization() && !refresh_used {
                // one immediate retry with a fresh credential, outside the budget
                refresh_used = true;
                attempt -= 1;
                tracing::info!(tile_x = tile.x, tile_y = tile.y, "credential rejected, refreshing");
                continue;
            }

            tracing::warn!(
                tile_x = tile.x,
                tile_y = tile.y,
                attempt,
                cause = failure.cause(),
                error = %failure,
                "write attempt failed"
            );
            report.last_failure = Some(failure.clone());

            if !failure.is_retryable() || !self.policy.has_next(attempt) {
                break;
            }
            let delay = self.policy.delay_before(attempt + 1);
            self.events.emit(PaintEvent::Retrying {
                counters,
                attempt: attempt + 1,
                max_attempts: self.policy.max_attempts(),
                cause: failure.cause(),
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                message: format!(
                    "{} on tile {tile}, retrying in {}s ({}/{})",
                    failure,
                    delay.as_secs(),
                    attempt + 1,
                    self.policy.max_attempts()
                ),
            });
            if self.stop.sleep(delay).await.is_err() {
                report.stopped = true;
                break;
            }
        }

        if !remaining.is_empty() {
            tracing::warn!(
                tile_x = tile.x,
                tile_y = tile.y,
                unconfirmed = remaining.len(),
                "write group not confirmed"
            );
            report.unconfirmed.extend(remaining);
        }
    }

    /// One write call; confirmed items move from `remaining` into the report
    async fn attempt<T: Paintable>(
        &self,
        tile: TileKey,
        remaining: &mut Vec<T>,
        force_refresh: bool,
        report: &mut SubmitReport<T>,
    ) -> Result<(), SubmitFailure> {
        let credential = self
            .credentials
            .obtain(force_refresh)
            .await
            .ok_or(SubmitFailure::CredentialUnavailable)?;

        let request = WriteRequest::new(
            tile,
            remaining.iter().map(|item| (item.address(), item.target().id)),
        );
        report.calls += 1;
        let outcome = self.writer.write_pixels(&request, &credential).await?;

        if let Some(failure) = SubmitFailure::from_status(outcome.status) {
            return Err(failure);
        }

        if outcome.charges.is_some() {
            report.charges = outcome.charges;
        }
        let requested = remaining.len();
        let painted = outcome.painted.min(requested);
        report.confirmed.extend(remaining.drain(..painted));
        tracing::debug!(tile_x = tile.x, tile_y = tile.y, painted, requested, "write confirmed");

        if remaining.is_empty() {
            Ok(())
        } else {
            Err(SubmitFailure::Partial { painted, requested })
        }
    }
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
