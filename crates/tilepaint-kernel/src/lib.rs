//! tilepaint kernel - rate-limited reconciling paint scheduler
//!
//! Drives a paint plan from `tilepaint-core` against a remote tile canvas:
//! 1. **Budget**: batches are sized by the predictive charge ledger
//! 2. **Verify**: pixels already showing their target color are skipped
//! 3. **Submit**: one write per tile, with retry and credential renewal
//! 4. **Reconcile**: drift in already-drawn pixels is repaired before new work
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tilepaint_kernel::prelude::*;
//!
//! let canvas = SimulatedCanvas::new(1000, palette.clone(), 10.0, 10, 30_000);
//! let session = SchedulerSession::plan_image(
//!     PaintConfig::new(), palette, anchor, &image,
//!     Ledger::new(0.0, 10, 30_000, Utc::now()), SessionClock::new(),
//! )?;
//!
//! let stop = StopSource::new();
//! let mut scheduler = BatchScheduler::new(
//!     session, canvas.collaborators(Duration::from_secs(600)), EventBus::new(), stop.token(),
//! );
//! let report = scheduler.run().await?;
//! ```

pub mod anchor;
pub mod api;
pub mod cancellation;
pub mod credentials;
pub mod error;
pub mod events;
pub mod logging;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod submitter;
pub mod verification;

// Re-exports
pub use anchor::select_anchor;
pub use api::{
    AccountProbe, CanvasReader, CanvasWriter, ChargeSnapshot, Collaborators, ColorProbe,
    Credential, CredentialProvider, PositionSource, TileImage, TokenSource, WriteOutcome,
    WriteRequest,
};
pub use cancellation::{StopSource, StopToken};
pub use credentials::CachedCredentials;
pub use error::{PaintError, Stopped, SubmitFailure, TransportError};
pub use events::{Counters, EventBus, PaintEvent, WaitReason};
pub use reconcile::{detect_drift, reconcile, ReconcileOutcome, ReconcileReason};
pub use retry::RetryPolicy;
pub use scheduler::{BatchScheduler, RunReport};
pub use session::{RevalidationReport, SchedulerSession, SessionClock, SessionId};
pub use sim::{ScriptedWrite, SimulatedCanvas, WriteLogEntry};
pub use submitter::{group_by_tile, Paintable, SubmitReport, Submitter};
pub use verification::{distinct_tiles, prefilter, read_tiles, PrefilterResult};

/// Common imports for driving a session
pub mod prelude {
    pub use crate::{
        BatchScheduler, Collaborators, EventBus, PaintError, PaintEvent, RunReport,
        SchedulerSession, SessionClock, SimulatedCanvas, StopSource, StopToken,
    };
    pub use tilepaint_core::prelude::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
