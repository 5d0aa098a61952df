use pretty_assertions::assert_eq;
use std::time::Duration;
use tilepaint_core::{Address, DrawnRecord, Ledger, PaintConfig, Rgba};
use tilepaint_kernel::{
    detect_drift, reconcile, EventBus, PaintEvent, ReconcileReason, RetryPolicy, SchedulerSession,
    SessionClock, SimulatedCanvas, StopToken, Submitter,
};
use tilepaint_test_utils::{blue, origin_anchor, pending_grid, red, t0, test_palette};

/// Session whose first `width` pixels are already recorded as drawn
fn painted_session(width: u32, balance: f64) -> SchedulerSession {
    let mut session = SchedulerSession::from_plan(
        PaintConfig::new(),
        test_palette(),
        origin_anchor(),
        (width, 1),
        pending_grid(width, 1, &red()),
        // recording spends one charge per pixel
        Ledger::new(balance + f64::from(width), 10, 30_000, t0()),
        SessionClock::starting_at(t0()),
    )
    .unwrap();
    let now = session.now();
    for pixel in session.take_batch(width as usize) {
        session.record_painted(pixel, now);
    }
    session
}

fn submitter(canvas: &SimulatedCanvas, events: &EventBus) -> Submitter {
    let collaborators = canvas.collaborators(Duration::from_secs(90));
    Submitter::new(
        collaborators.writer,
        collaborators.credentials,
        RetryPolicy::new(5, Duration::from_secs(3)),
        events.clone(),
        StopToken::never(),
    )
}

fn paint_red(canvas: &SimulatedCanvas, width: u32) {
    for x in 0..width {
        canvas.vandalize(&Address::new(0, 0, x, 0), Rgba::opaque(red().rgb()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_clean_canvas_needs_no_repair() {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    paint_red(&canvas, 2);
    let mut session = painted_session(2, 5.0);
    let events = EventBus::new();

    let outcome = reconcile(&mut session, &canvas, &submitter(&canvas, &events), &events).await;

    assert!(outcome.can_continue);
    assert_eq!(outcome.repaired, 0);
    assert_eq!(canvas.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drift_without_charges_blocks_without_writing() {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    paint_red(&canvas, 1);
    canvas.vandalize(&Address::new(0, 0, 0, 0), Rgba::opaque(blue().rgb()));
    let mut session = painted_session(1, 0.0);
    let events = EventBus::new();

    let outcome = reconcile(&mut session, &canvas, &submitter(&canvas, &events), &events).await;

    assert!(!outcome.can_continue);
    assert_eq!(outcome.reason, Some(ReconcileReason::InsufficientResource));
    assert_eq!(outcome.reason.unwrap().to_string(), "insufficient_resource");
    assert_eq!(outcome.outstanding, 1);
    assert!(outcome.charges.is_none());
    assert_eq!(canvas.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_charge_repairs_one_pixel() {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    paint_red(&canvas, 1);
    canvas.vandalize(&Address::new(0, 0, 0, 0), Rgba::opaque(blue().rgb()));
    let mut session = painted_session(1, 1.0);
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let outcome = reconcile(&mut session, &canvas, &submitter(&canvas, &events), &events).await;

    assert!(outcome.can_continue);
    assert_eq!(outcome.repaired, 1);
    assert_eq!(canvas.write_count(), 1);
    assert_eq!(canvas.pixel(&Address::new(0, 0, 0, 0)), Rgba::opaque(red().rgb()));
    assert_eq!(session.stats().repaired, 1);

    // remote counters come back to the caller; the session ledger only spent
    let charges = outcome.charges.unwrap();
    assert!((charges.count - 9.0).abs() < 1e-6);
    assert!(session.ledger().predict(session.now()) < 0.5);

    let event = rx.try_recv().unwrap();
    assert!(matches!(event, PaintEvent::Repaired { repaired: 1, outstanding: 0, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_repairs_limited_to_available_balance() {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    for x in 0..3 {
        canvas.vandalize(&Address::new(0, 0, x, 0), Rgba::opaque(blue().rgb()));
    }
    let mut session = painted_session(3, 2.0);
    let events = EventBus::new();

    let outcome = reconcile(&mut session, &canvas, &submitter(&canvas, &events), &events).await;

    assert!(outcome.can_continue);
    assert_eq!(outcome.repaired, 2);
    assert_eq!(outcome.outstanding, 1);
    assert_eq!(canvas.writes()[0].requested, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_tiles_report_no_drift() {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    let session = painted_session(2, 5.0);
    canvas.fail_reads(1);

    let drift = {
        let matcher = session.matcher();
        let drawn: Vec<&DrawnRecord> = session.drawn_records().collect();
        detect_drift(&canvas, &matcher, &drawn).await
    };
    assert!(drift.is_empty());

    // next pass reads the blank tile and sees both pixels missing
    let drift = {
        let matcher = session.matcher();
        let drawn: Vec<&DrawnRecord> = session.drawn_records().collect();
        detect_drift(&canvas, &matcher, &drawn).await
    };
    assert_eq!(drift.len(), 2);
    assert_eq!(drift[0].observed_color, Rgba::new(0, 0, 0, 0));
}
