//! Credential cache
//!
//! Wraps a [`TokenSource`] and hands out the last token until it expires or
//! a caller forces a refresh after an authorization rejection.

use crate::api::{Credential, CredentialProvider, TokenSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct CachedToken {
    credential: Credential,
    fetched_at: Instant,
}

/// Time-bounded credential cache
#[derive(Debug)]
pub struct CachedCredentials<S> {
    source: S,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl<S: TokenSource> CachedCredentials<S> {
    #[must_use]
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: Mutex::new(None),
        }
    }

    fn fresh(&self) -> Option<Credential> {
        let guard = self.cached.lock();
        guard
            .as_ref()
            .filter(|token| token.fetched_at.elapsed() < self.ttl)
            .map(|token| token.credential.clone())
    }

    /// Forget the cached token
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[async_trait]
impl<S: TokenSource> CredentialProvider for CachedCredentials<S> {
    async fn obtain(&self, force_refresh: bool) -> Option<Credential> {
        if !force_refresh {
            if let Some(credential) = self.fresh() {
                return Some(credential);
            }
        }

        let fetched = self.source.fetch_token().await;
        let mut guard = self.cached.lock();
        match &fetched {
            Some(credential) => {
                tracing::debug!(force_refresh, "credential refreshed");
                *guard = Some(CachedToken {
                    credential: credential.clone(),
                    fetched_at: Instant::now(),
                });
            }
            None => {
                tracing::warn!("credential source returned nothing");
                *guard = None;
            }
        }
        fetched
    }
}
