use proptest::prelude::*;
use std::time::Duration;
use tilepaint_core::{Ledger, PaintConfig};
use tilepaint_kernel::{
    BatchScheduler, EventBus, PaintEvent, RetryPolicy, SchedulerSession, ScriptedWrite,
    SessionClock, SimulatedCanvas, StopToken, TransportError,
};
use tilepaint_test_utils::{origin_anchor, pending_grid, red, t0, test_palette};

fn single_pixel_run(script: Vec<ScriptedWrite>) -> (SimulatedCanvas, BatchScheduler, EventBus) {
    let canvas = SimulatedCanvas::new(1000, test_palette(), 10.0, 10, 30_000);
    canvas.script_writes(script);
    let session = SchedulerSession::from_plan(
        PaintConfig::new(),
        test_palette(),
        origin_anchor(),
        (1, 1),
        pending_grid(1, 1, &red()),
        Ledger::new(0.0, 10, 30_000, t0()),
        SessionClock::starting_at(t0()),
    )
    .unwrap();
    let events = EventBus::new();
    let ttl = session.config().credential_ttl();
    let scheduler = BatchScheduler::new(
        session,
        canvas.collaborators(ttl),
        events.clone(),
        StopToken::never(),
    );
    (canvas, scheduler, events)
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_back_off_exponentially() {
    let (canvas, mut scheduler, events) =
        single_pixel_run(vec![ScriptedWrite::Status(503); 5]);
    let mut rx = events.subscribe();

    let report = scheduler.run().await.unwrap();

    // exhausted batch is requeued and the next cycle succeeds
    assert!(report.clean);
    assert_eq!(report.painted, 1);

    let writes = canvas.writes();
    assert_eq!(writes.len(), 6);
    let offsets: Vec<u64> = writes
        .iter()
        .map(|w| w.at.duration_since(writes[0].at).as_secs())
        .collect();
    assert_eq!(&offsets[..5], &[0, 3, 9, 21, 45]);

    let mut retries = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PaintEvent::Retrying {
            attempt,
            max_attempts,
            delay_ms,
            cause,
            ..
        } = event
        {
            assert_eq!(max_attempts, 5);
            assert_eq!(cause, "server");
            retries.push((attempt, delay_ms));
        }
    }
    assert_eq!(
        retries,
        vec![(2, 3_000), (3, 6_000), (4, 12_000), (5, 24_000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_are_retried() {
    let (canvas, mut scheduler, _events) = single_pixel_run(vec![
        ScriptedWrite::Transport(TransportError::Timeout),
        ScriptedWrite::Transport(TransportError::Network("reset".to_string())),
    ]);

    let report = scheduler.run().await.unwrap();

    assert_eq!(report.painted, 1);
    let statuses: Vec<_> = canvas.writes().iter().map(|w| w.status).collect();
    assert_eq!(statuses, vec![None, None, Some(200)]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_not_fatal() {
    let (canvas, mut scheduler, _events) =
        single_pixel_run(vec![ScriptedWrite::Status(429), ScriptedWrite::Status(429)]);

    let report = scheduler.run().await.unwrap();

    assert!(report.clean);
    assert_eq!(canvas.write_count(), 3);
}

#[test]
fn test_policy_from_default_config() {
    let policy = RetryPolicy::from_config(&PaintConfig::new());
    assert_eq!(policy.max_attempts(), 5);
    assert_eq!(policy.delay_before(1), Duration::ZERO);
    assert_eq!(policy.delay_before(5), Duration::from_secs(24));
}

proptest! {
    #[test]
    fn prop_delays_double(base_ms in 1u64..10_000, k in 2u32..12) {
        let policy = RetryPolicy::new(16, Duration::from_millis(base_ms));
        prop_assert_eq!(policy.delay_before(k + 1), policy.delay_before(k) * 2);
    }

    #[test]
    fn prop_attempts_bounded(max in 1u32..10) {
        let policy = RetryPolicy::new(max, Duration::from_millis(100));
        let attempts = (1..).take_while(|&a| a == 1 || policy.has_next(a - 1)).count();
        prop_assert_eq!(attempts as u32, max);
    }
}
