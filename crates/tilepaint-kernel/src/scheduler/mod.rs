//! Batch scheduler
//!
//! One cooperative loop per session drives the plan to completion:
//!
//! 1. reconcile drift when anything has been drawn (waiting for charges if a
//!    repair cannot be afforded)
//! 2. size the batch against the predicted balance, waiting on a shortfall
//! 3. take the batch from the plan and run the verification prefilter
//! 4. submit per tile with retries, record confirmed pixels, sync the ledger
//! 5. requeue anything unconfirmed and pause before the next cycle
//!
//! The loop is the only writer of the session. Every wait goes through the
//! stop token, and a batch leaves the plan only once its outcome is known,
//! so stopping at any suspension point leaves the session resumable.

use crate::api::{AccountProbe, CanvasReader, Collaborators};
use crate::cancellation::StopToken;
use crate::error::{PaintError, Stopped};
use crate::events::{EventBus, PaintEvent, WaitReason};
use crate::reconcile::reconcile;
use crate::retry::RetryPolicy;
use crate::session::SchedulerSession;
use crate::submitter::Submitter;
use crate::verification::prefilter;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tilepaint_core::PendingPixel;
use tokio::time::Instant;

/// Final accounting of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Pixels written by this run's session
    pub painted: u64,
    /// Pixels found already correct
    pub verified: u64,
    pub repaired: u64,
    pub total: u64,
    /// Pixels still in the plan
    pub remaining: usize,
    /// `true` when the plan emptied, `false` when stopped
    pub clean: bool,
}

/// Drives one session's plan to completion
pub struct BatchScheduler {
    session: SchedulerSession,
    reader: Arc<dyn CanvasReader>,
    account: Arc<dyn AccountProbe>,
    submitter: Submitter,
    events: EventBus,
    stop: StopToken,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(
        session: SchedulerSession,
        collaborators: Collaborators,
        events: EventBus,
        stop: StopToken,
    ) -> Self {
        let submitter = Submitter::new(
            collaborators.writer,
            collaborators.credentials,
            RetryPolicy::from_config(session.config()),
            events.clone(),
            stop.clone(),
        );
        Self {
            session,
            reader: collaborators.reader,
            account: collaborators.account,
            submitter,
            events,
            stop,
        }
    }

    #[inline]
    #[must_use]
    pub fn session(&self) -> &SchedulerSession {
        &self.session
    }

    #[inline]
    #[must_use]
    pub fn into_session(self) -> SchedulerSession {
        self.session
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run until the plan is empty or the stop signal fires
    ///
    /// A panic inside the loop is caught here and reported as a `Failed`
    /// event; the session keeps whatever state it had reached.
    ///
    /// # Errors
    /// Returns `PaintError` for invalid configuration or a panicked loop.
    /// Stopping is not an error: the report carries `clean == false`.
    pub async fn run(&mut self) -> Result<RunReport, PaintError> {
        let outcome = AssertUnwindSafe(self.run_loop()).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(PaintError::Panicked(message))
            }
        };

        if let Err(err) = &result {
            tracing::error!(error = %err, session = %self.session.id(), "session failed");
            self.events.emit(PaintEvent::Failed {
                counters: self.session.counters(),
                message: err.to_string(),
            });
        }
        result
    }

    async fn run_loop(&mut self) -> Result<RunReport, PaintError> {
        self.session.config().validate()?;
        tracing::info!(
            session = %self.session.id(),
            pending = self.session.plan_len(),
            "session started"
        );
        self.refresh_ledger().await;
        self.emit_progress("started");

        loop {
            if self.stop.is_stopped() {
                return Ok(self.finish(false));
            }
            if self.session.is_plan_empty() {
                return Ok(self.finish(true));
            }

            if self.session.config().protection_enabled && self.session.has_drawn() {
                let outcome = reconcile(
                    &mut self.session,
                    self.reader.as_ref(),
                    &self.submitter,
                    &self.events,
                )
                .await;
                if let Some(charges) = outcome.charges {
                    let now = self.session.now();
                    self.session.sync_ledger(charges, now);
                }
                if !outcome.can_continue {
                    let cap = self.session.config().max_repair_wait_charges.max(1);
                    let needed = u32::try_from(outcome.outstanding).unwrap_or(u32::MAX).min(cap);
                    // stop is observed at the top of the loop
                    let _ = self.wait_for_charges(needed, WaitReason::Repair).await;
                    continue;
                }
            }

            let Some(desired) = self.await_batch_budget().await else {
                continue;
            };

            let candidates = self.session.take_batch(desired);
            let candidates = self.session.drop_invalid(candidates);
            let to_submit = if self.session.config().smart_verification {
                self.verify(candidates, desired).await
            } else {
                candidates
            };
            if to_submit.is_empty() {
                self.emit_progress("nothing to submit this cycle");
            } else {
                self.submit_batch(to_submit).await;
            }
            let _ = self.stop.sleep(self.session.config().inter_batch_pause()).await;
        }
    }

    /// Wait until the ledger covers the next batch; `None` if stopped
    async fn await_batch_budget(&mut self) -> Option<usize> {
        loop {
            let now = self.session.now();
            let desired = self.session.desired_batch_size(now);
            #[allow(clippy::cast_precision_loss)]
            if self.session.ledger().predict(now) >= desired as f64 {
                return Some(desired);
            }
            let needed = u32::try_from(desired).unwrap_or(u32::MAX);
            if self.wait_for_charges(needed, WaitReason::Charges).await.is_err() {
                return None;
            }
        }
    }

    /// Verification rounds: refill from the plan while everything matched
    async fn verify(&mut self, mut candidates: Vec<PendingPixel>, desired: usize) -> Vec<PendingPixel> {
        let rounds = self.session.config().verification_rounds.max(1);
        for round in 1..=rounds {
            let result = {
                let matcher = self.session.matcher();
                prefilter(self.reader.as_ref(), &matcher, candidates).await
            };
            let now = self.session.now();
            let verified = result.already_correct.len();
            for pixel in result.already_correct {
                self.session.record_verified(pixel, now);
            }
            if verified > 0 {
                tracing::debug!(round, verified, "pixels already correct");
            }

            if !result.to_submit.is_empty() || self.session.is_plan_empty() || round == rounds {
                return result.to_submit;
            }
            let refill = self.session.take_batch(desired);
            candidates = self.session.drop_invalid(refill);
        }
        Vec::new()
    }

    async fn submit_batch(&mut self, batch: Vec<PendingPixel>) {
        self.session.finish_first_batch();
        let size = batch.len();
        let report = self.submitter.submit(batch, self.session.counters()).await;

        let now = self.session.now();
        let confirmed = report.confirmed.len();
        for pixel in report.confirmed {
            self.session.record_painted(pixel, now);
        }
        if confirmed > 0 {
            match report.charges {
                Some(charges) => self.session.sync_ledger(charges, now),
                None => self.refresh_ledger().await,
            }
        }

        let unconfirmed = report.unconfirmed.len();
        self.session.restore_front(report.unconfirmed);
        tracing::info!(size, confirmed, unconfirmed, "batch finished");

        if report.stopped {
            self.emit_progress(&format!("stopped, {unconfirmed} pixels requeued"));
        } else if unconfirmed > 0 {
            let cause = report
                .last_failure
                .map_or_else(|| "unknown".to_string(), |f| f.to_string());
            self.emit_progress(&format!(
                "{unconfirmed} pixels not confirmed ({cause}), requeued"
            ));
            let _ = self.stop.sleep(self.session.config().failed_batch_pause()).await;
        } else {
            self.emit_progress(&format!("painted {confirmed} pixels"));
        }
    }

    /// Sleep until the ledger predicts `needed` charges (plus margin)
    ///
    /// Emits a `Waiting` event at the start and on every progress tick, then
    /// refreshes the ledger from the remote.
    async fn wait_for_charges(&mut self, needed: u32, reason: WaitReason) -> Result<(), Stopped> {
        let config = self.session.config();
        let wait = self.session.ledger().time_until(needed, self.session.now())
            + config.charge_wait_margin();
        let tick = config.progress_interval().max(Duration::from_millis(1));
        let deadline = Instant::now() + wait;
        tracing::info!(
            needed,
            ?reason,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "waiting for charges"
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let label = match reason {
                WaitReason::Charges => "charges",
                WaitReason::Repair => "charges to repair drift",
            };
            self.events.emit(PaintEvent::Waiting {
                counters: self.session.counters(),
                reason,
                remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                message: format!("waiting {}s for {needed} {label}", remaining.as_secs()),
            });
            self.stop.sleep(remaining.min(tick)).await?;
        }

        self.refresh_ledger().await;
        Ok(())
    }

    /// Pull authoritative counters; on failure keep predicting locally
    async fn refresh_ledger(&mut self) {
        match self.account.fetch_charges().await {
            Ok(charges) => {
                let now = self.session.now();
                self.session.sync_ledger(charges, now);
            }
            Err(err) => {
                tracing::warn!(error = %err, "charge refresh failed, using prediction");
            }
        }
    }

    fn emit_progress(&self, status: &str) {
        let now = self.session.now();
        let eta = self.session.estimated_remaining(now);
        self.events.emit(PaintEvent::Progress {
            counters: self.session.counters(),
            eta_ms: Some(u64::try_from(eta.as_millis()).unwrap_or(u64::MAX)),
            message: status.to_string(),
        });
    }

    fn finish(&mut self, clean: bool) -> RunReport {
        let stats = self.session.stats();
        let report = RunReport {
            painted: stats.painted,
            verified: stats.verified,
            repaired: stats.repaired,
            total: stats.total,
            remaining: self.session.plan_len(),
            clean,
        };
        let message = if clean {
            format!("completed: {} painted, {} already correct", report.painted, report.verified)
        } else {
            format!("stopped with {} pixels remaining", report.remaining)
        };
        tracing::info!(
            session = %self.session.id(),
            painted = report.painted,
            verified = report.verified,
            repaired = report.repaired,
            clean,
            "session finished"
        );
        self.events.emit(PaintEvent::Completed {
            counters: self.session.counters(),
            verified: report.verified,
            clean,
            message,
        });
        report
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("session", &self.session.id())
            .field("pending", &self.session.plan_len())
            .finish_non_exhaustive()
    }
}
