//! Drift reconciliation
//!
//! Before new work, the addresses this session already painted are read
//! back. Mismatches are repaired through the normal submission path, as far
//! as the predicted balance allows. With nothing to spend the caller is told
//! to wait, so repairs always come before new pixels.

use crate::api::{CanvasReader, ChargeSnapshot};
use crate::events::{EventBus, PaintEvent};
use crate::session::SchedulerSession;
use crate::submitter::Submitter;
use crate::verification::{distinct_tiles, read_tiles};
use std::fmt;
use tilepaint_core::{ColorMatcher, DrawnRecord, DriftRecord};

/// Why reconciliation blocked forward progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    InsufficientResource,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResource => f.write_str("insufficient_resource"),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOutcome {
    pub can_continue: bool,
    pub repaired: usize,
    pub outstanding: usize,
    pub reason: Option<ReconcileReason>,
    /// Latest remote counters seen by repair writes; the scheduler syncs them
    pub charges: Option<ChargeSnapshot>,
}

impl ReconcileOutcome {
    fn clean() -> Self {
        Self {
            can_continue: true,
            repaired: 0,
            outstanding: 0,
            reason: None,
            charges: None,
        }
    }
}

/// Compare drawn records with freshly read tiles
///
/// Tiles that cannot be read contribute no drift this pass.
pub async fn detect_drift(
    reader: &dyn CanvasReader,
    matcher: &ColorMatcher<'_>,
    drawn: &[&DrawnRecord],
) -> Vec<DriftRecord> {
    let tiles = distinct_tiles(drawn.iter().map(|r| &r.address));
    let images = read_tiles(reader, tiles).await;

    drawn
        .iter()
        .filter_map(|record| {
            let image = images.get(&record.address.tile())?;
            let observed = image.sample(record.address.local_x, record.address.local_y);
            (!matcher.matches(observed, &record.color)).then(|| DriftRecord {
                address: record.address,
                expected_color: record.color.clone(),
                observed_color: observed,
            })
        })
        .collect()
}

/// Detect drift and repair what the balance allows
pub async fn reconcile(
    session: &mut SchedulerSession,
    reader: &dyn CanvasReader,
    submitter: &Submitter,
    events: &EventBus,
) -> ReconcileOutcome {
    let drift = {
        let matcher = session.matcher();
        let drawn: Vec<&DrawnRecord> = session.drawn_records().collect();
        detect_drift(reader, &matcher, &drawn).await
    };
    if drift.is_empty() {
        return ReconcileOutcome::clean();
    }

    let available = usize::try_from(session.ledger().available(session.now())).unwrap_or(0);
    if available == 0 {
        tracing::info!(drift = drift.len(), "drift found, no charges to repair");
        return ReconcileOutcome {
            can_continue: false,
            repaired: 0,
            outstanding: drift.len(),
            reason: Some(ReconcileReason::InsufficientResource),
            charges: None,
        };
    }

    let mut to_repair = drift;
    let deferred = to_repair.split_off(to_repair.len().min(available));
    tracing::info!(
        repairing = to_repair.len(),
        deferred = deferred.len(),
        "repairing drift"
    );

    let report = submitter.submit(to_repair, session.counters()).await;
    let now = session.now();
    let repaired = report.confirmed.len();
    for record in report.confirmed {
        session.record_repair(record, now);
    }
    let outstanding = deferred.len() + report.unconfirmed.len();
    if outstanding > 0 {
        tracing::warn!(outstanding, "drift left for the next pass");
    }
    events.emit(PaintEvent::Repaired {
        counters: session.counters(),
        repaired: repaired as u64,
        outstanding: outstanding as u64,
        message: format!("repaired {repaired} drifted pixels, {outstanding} outstanding"),
    });

    ReconcileOutcome {
        can_continue: true,
        repaired,
        outstanding,
        reason: None,
        charges: report.charges,
    }
}
