//! Anchor selection with a deadline

use crate::api::PositionSource;
use crate::cancellation::StopToken;
use crate::error::PaintError;
use std::time::Duration;
use tilepaint_core::{validate_anchor, Anchor};

/// Wait for the user to confirm a position
///
/// # Errors
/// - `PaintError::PositionTimeout` after `timeout`
/// - `PaintError::Stopped` if the stop signal fires first
/// - `PaintError::Internal` if the source gives up without a position
/// - a validation error for an anchor outside the tile
pub async fn select_anchor(
    source: &dyn PositionSource,
    tile_size: u32,
    timeout: Duration,
    stop: &StopToken,
) -> Result<Anchor, PaintError> {
    let selected = tokio::select! {
        biased;
        () = stop.stopped() => return Err(PaintError::Stopped),
        selected = tokio::time::timeout(timeout, source.next_position()) => selected,
    };

    let anchor = selected
        .map_err(|_| PaintError::PositionTimeout(timeout))?
        .ok_or_else(|| PaintError::Internal("position selection abandoned".to_string()))?;
    validate_anchor(&anchor, tile_size)?;
    tracing::info!(
        tile_x = anchor.tile_x,
        tile_y = anchor.tile_y,
        local_x = anchor.local_x,
        local_y = anchor.local_y,
        "anchor selected"
    );
    Ok(anchor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockPositionSource;
    use crate::cancellation::StopSource;

    #[tokio::test]
    async fn abandoned_selection_is_an_error() {
        let mut source = MockPositionSource::new();
        source.expect_next_position().returning(|| None);
        let err = select_anchor(&source, 1000, Duration::from_secs(120), &StopToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PaintError::Internal(_)));
    }

    struct NeverSelects;

    #[async_trait::async_trait]
    impl PositionSource for NeverSelects {
        async fn next_position(&self) -> Option<Anchor> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_source_hits_timeout() {
        let start = tokio::time::Instant::now();
        let err = select_anchor(&NeverSelects, 1000, Duration::from_secs(120), &StopToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PaintError::PositionTimeout(d) if d == Duration::from_secs(120)));
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn stop_wins() {
        let source = StopSource::new();
        source.stop();
        let err = select_anchor(&NeverSelects, 1000, Duration::from_secs(120), &source.token())
            .await
            .unwrap_err();
        assert!(matches!(err, PaintError::Stopped));
    }

    #[tokio::test]
    async fn rejects_out_of_tile_anchor() {
        let mut source = MockPositionSource::new();
        source
            .expect_next_position()
            .returning(|| Some(Anchor::new(0, 0, 1000, 0)));
        let err = select_anchor(&source, 1000, Duration::from_secs(1), &StopToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, PaintError::Core(_)));
    }
}
