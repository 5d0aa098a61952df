//! Typed progress stream
//!
//! Every state transition of a session is published as a [`PaintEvent`] on a
//! broadcast channel. Consumers subscribe; the scheduler never blocks on them
//! and lagging receivers simply miss older events.

use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Painted/total counters carried by every event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Pixels done: written, or found already showing their color
    pub painted: u64,
    pub total: u64,
}

/// What a `Waiting` event is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// Charges for the next forward batch
    Charges,
    /// Charges to repair drift before new work
    Repair,
}

/// Session state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaintEvent {
    Progress {
        counters: Counters,
        eta_ms: Option<u64>,
        message: String,
    },
    Waiting {
        counters: Counters,
        reason: WaitReason,
        remaining_ms: u64,
        message: String,
    },
    Retrying {
        counters: Counters,
        attempt: u32,
        max_attempts: u32,
        cause: &'static str,
        delay_ms: u64,
        message: String,
    },
    Repaired {
        counters: Counters,
        repaired: u64,
        outstanding: u64,
        message: String,
    },
    Completed {
        counters: Counters,
        verified: u64,
        /// `false` when the session was stopped before the plan emptied
        clean: bool,
        message: String,
    },
    Failed {
        counters: Counters,
        message: String,
    },
}

impl PaintEvent {
    #[must_use]
    pub fn counters(&self) -> Counters {
        match self {
            Self::Progress { counters, .. }
            | Self::Waiting { counters, .. }
            | Self::Retrying { counters, .. }
            | Self::Repaired { counters, .. }
            | Self::Completed { counters, .. }
            | Self::Failed { counters, .. } => *counters,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Progress { message, .. }
            | Self::Waiting { message, .. }
            | Self::Retrying { message, .. }
            | Self::Repaired { message, .. }
            | Self::Completed { message, .. }
            | Self::Failed { message, .. } => message,
        }
    }

    /// Terminal events end the stream for a session
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Publisher side of the event stream
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PaintEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PaintEvent> {
        self.sender.subscribe()
    }

    /// Publish; having no subscribers is not an error
    pub fn emit(&self, event: PaintEvent) {
        tracing::trace!(event = event.message(), "event emitted");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let counters = Counters {
            painted: 1,
            total: 4,
        };
        bus.emit(PaintEvent::Progress {
            counters,
            eta_ms: None,
            message: "one".into(),
        });
        bus.emit(PaintEvent::Completed {
            counters,
            verified: 0,
            clean: true,
            message: "done".into(),
        });

        assert_eq!(rx.recv().await.unwrap().message(), "one");
        let last = rx.recv().await.unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.counters().total, 4);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new().emit(PaintEvent::Failed {
            counters: Counters::default(),
            message: "nobody listening".into(),
        });
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = PaintEvent::Waiting {
            counters: Counters::default(),
            reason: WaitReason::Repair,
            remaining_ms: 1500,
            message: "waiting".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "waiting");
        assert_eq!(json["reason"], "repair");
    }
}
