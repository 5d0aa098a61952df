//! Cooperative stop signal
//!
//! [`StopSource`] is held by whoever controls the session; every suspension
//! point in the scheduler receives a [`StopToken`]. Waits go through
//! [`StopToken::sleep`], which returns early once the source fires.
//!
//! Dropping the source does not stop the session.

use crate::error::Stopped;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Control handle that raises the stop signal
#[derive(Debug, Clone, Default)]
pub struct StopSource {
    inner: Arc<StopInner>,
}

impl StopSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloneable observer of this source
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Raise the signal and wake every pending wait
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
        tracing::debug!("stop requested");
    }

    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

/// Observer side of a [`StopSource`]
#[derive(Debug, Clone)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

impl StopToken {
    /// Token whose source is dropped immediately, so it never fires
    #[must_use]
    pub fn never() -> Self {
        StopSource::new().token()
    }

    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Resolve once the signal is raised
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent stop is not missed
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration` unless stopped first
    ///
    /// # Errors
    /// Returns `Stopped` if the signal was raised before or during the wait.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Stopped> {
        if self.is_stopped() {
            return Err(Stopped);
        }
        tokio::select! {
            biased;
            () = self.stopped() => Err(Stopped),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
