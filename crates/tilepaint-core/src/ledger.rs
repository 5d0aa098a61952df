//! Charge ledger
//!
//! Tracks the fractional, capped, regenerating charge balance that every
//! remote write consumes. `predict` is a cheap local estimate; `sync` installs
//! the authoritative remote count. The ledger has a single owner (the
//! scheduler session) so it carries no interior locking.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serializable ledger state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub balance: f64,
    pub cap: u32,
    pub regen_ms: u64,
    pub last_synced_at: DateTime<Utc>,
    pub accrued_at: DateTime<Utc>,
}

/// Predictive charge balance
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    balance: f64,
    cap: u32,
    regen_ms: u64,
    last_synced_at: DateTime<Utc>,
    // start of the current regeneration window; moves on sync and on debit
    accrued_at: DateTime<Utc>,
}

impl Ledger {
    /// Create a ledger from a known remote state
    #[must_use]
    pub fn new(balance: f64, cap: u32, regen_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            balance: balance.clamp(0.0, f64::from(cap)),
            cap,
            regen_ms: regen_ms.max(1),
            last_synced_at: now,
            accrued_at: now,
        }
    }

    /// Balance expected at `now`, capped and never negative
    #[must_use]
    pub fn predict(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_ms = (now - self.accrued_at).num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let regenerated = elapsed_ms as f64 / self.regen_ms as f64;
        (self.balance + regenerated).min(f64::from(self.cap))
    }

    /// Whole charges available at `now`
    #[must_use]
    pub fn available(&self, now: DateTime<Utc>) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = self.predict(now).floor() as u32;
        whole
    }

    /// Install the authoritative remote state
    pub fn sync(&mut self, remote_balance: f64, remote_cap: u32, now: DateTime<Utc>) {
        self.cap = remote_cap;
        self.balance = remote_balance.clamp(0.0, f64::from(remote_cap));
        self.last_synced_at = now;
        self.accrued_at = now;
        tracing::debug!(balance = self.balance, cap = self.cap, "ledger synced");
    }

    /// Local debit of `n` charges
    ///
    /// Regeneration accrued so far is folded into the balance before the
    /// debit so consumption stays visible while the prediction is capped.
    /// `last_synced_at` is not touched.
    ///
    /// # Errors
    /// Returns `LedgerError::Insufficient` when `predict(now) < n`.
    pub fn spend(&mut self, n: u32, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let available = self.predict(now);
        if available < f64::from(n) {
            return Err(LedgerError::Insufficient {
                requested: n,
                available,
            });
        }
        self.balance = available - f64::from(n);
        self.accrued_at = now.max(self.accrued_at);
        Ok(())
    }

    /// Debit `n` charges the remote already consumed, flooring at zero
    pub fn spend_confirmed(&mut self, n: u32, now: DateTime<Utc>) {
        if self.spend(n, now).is_err() {
            self.balance = 0.0;
            self.accrued_at = now.max(self.accrued_at);
        }
    }

    /// Wait until `predict` reaches `n` (or the cap, if `n` exceeds it)
    #[must_use]
    pub fn time_until(&self, n: u32, now: DateTime<Utc>) -> Duration {
        let target = f64::from(n.min(self.cap));
        let shortfall = target - self.predict(now);
        if shortfall <= 0.0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let ms = (shortfall * self.regen_ms as f64).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(ms as u64)
    }

    #[inline]
    #[must_use]
    pub fn cap(&self) -> u32 {
        self.cap
    }

    #[inline]
    #[must_use]
    pub fn regen_ms(&self) -> u64 {
        self.regen_ms
    }

    #[inline]
    #[must_use]
    pub fn last_synced_at(&self) -> DateTime<Utc> {
        self.last_synced_at
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            balance: self.balance,
            cap: self.cap,
            regen_ms: self.regen_ms,
            last_synced_at: self.last_synced_at,
            accrued_at: self.accrued_at,
        }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            balance: snapshot.balance.clamp(0.0, f64::from(snapshot.cap)),
            cap: snapshot.cap,
            regen_ms: snapshot.regen_ms.max(1),
            last_synced_at: snapshot.last_synced_at,
            accrued_at: snapshot.accrued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn predicts_fractional_regeneration() {
        let ledger = Ledger::new(0.0, 10, 30_000, t0());
        assert!((ledger.predict(at(150_000)) - 5.0).abs() < 1e-9);
        assert!((ledger.predict(at(45_000)) - 1.5).abs() < 1e-9);
        assert_eq!(ledger.available(at(45_000)), 1);
    }

    #[test]
    fn prediction_never_exceeds_cap() {
        let ledger = Ledger::new(0.0, 10, 30_000, t0());
        let mut last = 0.0;
        for step in 0..40 {
            let p = ledger.predict(at(step * 15_000));
            assert!(p >= last);
            assert!(p <= 10.0);
            last = p;
        }
        assert!((ledger.predict(at(10_000_000)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn predict_before_sync_point_does_not_go_backwards() {
        let ledger = Ledger::new(3.0, 10, 30_000, at(60_000));
        assert!((ledger.predict(t0()) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn spend_debits_locally() {
        let mut ledger = Ledger::new(4.0, 10, 30_000, t0());
        ledger.spend(3, t0()).unwrap();
        assert!((ledger.predict(t0()) - 1.0).abs() < 1e-9);
        assert_eq!(ledger.last_synced_at(), t0());

        let err = ledger.spend(2, t0()).unwrap_err();
        assert!(matches!(err, LedgerError::Insufficient { requested: 2, .. }));
        assert!((ledger.predict(t0()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spend_is_visible_at_cap() {
        let mut ledger = Ledger::new(10.0, 10, 30_000, t0());
        ledger.spend(1, at(600_000)).unwrap();
        assert!((ledger.predict(at(600_000)) - 9.0).abs() < 1e-9);
        assert_eq!(ledger.last_synced_at(), t0());
    }

    #[test]
    fn spend_confirmed_floors_at_zero() {
        let mut ledger = Ledger::new(1.0, 10, 30_000, t0());
        ledger.spend_confirmed(3, t0());
        assert!(ledger.predict(t0()).abs() < 1e-9);
    }

    #[test]
    fn sync_overwrites_state() {
        let mut ledger = Ledger::new(1.0, 10, 30_000, t0());
        ledger.sync(7.5, 20, at(5_000));
        assert!((ledger.predict(at(5_000)) - 7.5).abs() < 1e-9);
        assert_eq!(ledger.cap(), 20);
        assert_eq!(ledger.last_synced_at(), at(5_000));
    }

    #[test]
    fn time_until_target() {
        let ledger = Ledger::new(1.5, 10, 30_000, t0());
        assert_eq!(ledger.time_until(1, t0()), Duration::ZERO);
        assert_eq!(ledger.time_until(3, t0()), Duration::from_millis(45_000));
        // beyond the cap waits for the cap
        assert_eq!(ledger.time_until(50, t0()), Duration::from_millis(255_000));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut ledger = Ledger::new(2.0, 10, 30_000, t0());
        ledger.spend(1, at(1_000)).unwrap();
        let restored = Ledger::from_snapshot(ledger.snapshot());
        assert_eq!(restored, ledger);
    }
}
