//! Error types for the tilepaint kernel
//!
//! Provides error handling for:
//! - Collaborator transport failures
//! - Classification of a single remote write attempt
//! - Fatal scheduler errors

use std::time::Duration;
use tilepaint_core::{CoreError, ValidationError};

/// Failure reported by a collaborator before any remote status is known
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response
    #[error("network unavailable: {0}")]
    Network(String),

    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Response could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Why one remote write attempt did not confirm every pixel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitFailure {
    /// Credential rejected (401/403)
    #[error("authorization rejected (status {0})")]
    Authorization(u16),

    /// Remote backpressure (429)
    #[error("rate limited")]
    RateLimited,

    /// No response or status 0
    #[error("network error: {0}")]
    Network(String),

    /// Deadline exceeded (408 or local timeout)
    #[error("timed out")]
    Timeout,

    /// 5xx
    #[error("server error (status {0})")]
    Server(u16),

    /// Any other non-success status
    #[error("rejected (status {0})")]
    Rejected(u16),

    /// Success status but only part of the group was painted
    #[error("partial write: {painted} of {requested} painted")]
    Partial { painted: usize, requested: usize },

    /// Provider returned no credential
    #[error("no credential available")]
    CredentialUnavailable,

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SubmitFailure {
    /// Classify a remote status; `None` means success
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200 => None,
            0 => Some(Self::Network("no response".to_string())),
            401 | 403 => Some(Self::Authorization(status)),
            408 => Some(Self::Timeout),
            429 => Some(Self::RateLimited),
            500..=599 => Some(Self::Server(status)),
            other => Some(Self::Rejected(other)),
        }
    }

    /// Every classified failure is retried within the attempt budget
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Whether the next attempt should force a credential refresh
    #[inline]
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    /// Short cause label used in retry events
    #[must_use]
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Authorization(_) | Self::CredentialUnavailable => "authorization",
            Self::RateLimited => "rate_limited",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Server(_) | Self::Malformed(_) => "server",
            Self::Rejected(_) => "rejected",
            Self::Partial { .. } => "partial",
        }
    }
}

impl From<TransportError> for SubmitFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => Self::Network(msg),
            TransportError::Timeout => Self::Timeout,
            TransportError::Malformed(msg) => Self::Malformed(msg),
        }
    }
}

/// A cancellable wait observed the stop signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stopped")]
pub struct Stopped;

/// Main kernel error type
#[derive(Debug, thiserror::Error)]
pub enum PaintError {
    /// Core-level failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Anchor selection did not finish in time
    #[error("no position selected within {0:?}")]
    PositionTimeout(Duration),

    /// Stop signal observed
    #[error("stopped")]
    Stopped,

    /// Collaborator failed outside the retry path
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Unexpected state
    #[error("internal error: {0}")]
    Internal(String),

    /// The scheduler loop panicked
    #[error("scheduler panicked: {0}")]
    Panicked(String),
}

impl PaintError {
    /// Check if a new session could recover from this error
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Core(CoreError::Config(_)) | Self::Panicked(_))
    }
}

impl From<ValidationError> for PaintError {
    fn from(err: ValidationError) -> Self {
        Self::Core(CoreError::Validation(err))
    }
}

impl From<Stopped> for PaintError {
    fn from(_: Stopped) -> Self {
        Self::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(SubmitFailure::from_status(200), None);
        assert_eq!(SubmitFailure::from_status(403), Some(SubmitFailure::Authorization(403)));
        assert_eq!(SubmitFailure::from_status(401), Some(SubmitFailure::Authorization(401)));
        assert_eq!(SubmitFailure::from_status(429), Some(SubmitFailure::RateLimited));
        assert_eq!(SubmitFailure::from_status(408), Some(SubmitFailure::Timeout));
        assert_eq!(SubmitFailure::from_status(503), Some(SubmitFailure::Server(503)));
        assert_eq!(SubmitFailure::from_status(418), Some(SubmitFailure::Rejected(418)));
        assert!(matches!(SubmitFailure::from_status(0), Some(SubmitFailure::Network(_))));
    }

    #[test]
    fn cause_labels_distinguish_classes() {
        assert_eq!(SubmitFailure::from(TransportError::Timeout).cause(), "timeout");
        assert_eq!(SubmitFailure::Server(500).cause(), "server");
        assert_eq!(SubmitFailure::Network("down".into()).cause(), "network");
        assert!(SubmitFailure::Authorization(401).is_authorization());
    }

    #[test]
    fn paint_error_conversions() {
        let err = PaintError::from(ValidationError::EmptyPalette);
        assert!(err.to_string().contains("palette is empty"));
        assert!(matches!(PaintError::from(Stopped), PaintError::Stopped));
        assert!(!PaintError::Panicked("boom".into()).is_recoverable());
    }
}
