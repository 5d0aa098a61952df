//! In-memory canvas
//!
//! [`SimulatedCanvas`] plays every remote role at once: tile store, writer,
//! token issuer, charge account, color list and position picker. Charges
//! regenerate on the tokio clock, so paused-time tests see the same
//! regeneration the scheduler predicts.
//!
//! Write outcomes can be scripted per call, which is how tests inject
//! rate limiting, server errors, partial writes and transport failures.

use crate::api::{
    AccountProbe, CanvasReader, CanvasWriter, ChargeSnapshot, ColorProbe, Collaborators,
    Credential, PositionSource, TileImage, TokenSource, WriteOutcome, WriteRequest,
};
use crate::credentials::CachedCredentials;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tilepaint_core::{Address, Anchor, Palette, PaletteColor, Rgba, TileKey};
use tokio::time::Instant;

/// Scripted result for the next write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedWrite {
    /// Reply with this status and paint nothing
    Status(u16),
    /// Succeed but paint only the first `n` pixels
    Partial(usize),
    /// Fail before any status is known
    Transport(TransportError),
}

/// One write call as seen by the canvas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLogEntry {
    pub at: Instant,
    pub tile: TileKey,
    pub requested: usize,
    pub painted: usize,
    /// `None` for transport failures
    pub status: Option<u16>,
}

#[derive(Debug)]
struct SimState {
    tiles: HashMap<TileKey, TileImage>,
    palette: Palette,
    charges: f64,
    max_charges: u32,
    regen_ms: u64,
    accrued_at: Instant,
    script: VecDeque<ScriptedWrite>,
    read_failures: usize,
    issued_tokens: u64,
    valid_token: Option<String>,
    writes: Vec<WriteLogEntry>,
    position: Option<Anchor>,
}

impl SimState {
    fn accrue(&mut self) {
        let now = Instant::now();
        #[allow(clippy::cast_precision_loss)]
        let gained = now.duration_since(self.accrued_at).as_millis() as f64 / self.regen_ms as f64;
        self.charges = (self.charges + gained).min(f64::from(self.max_charges));
        self.accrued_at = now;
    }

    fn charge_snapshot(&self) -> ChargeSnapshot {
        ChargeSnapshot {
            count: self.charges,
            max: self.max_charges,
        }
    }

    fn tile_mut(&mut self, tile: TileKey, size: u32) -> &mut TileImage {
        self.tiles.entry(tile).or_insert_with(|| TileImage::blank(size))
    }
}

/// Shared in-memory canvas; clones see the same state
#[derive(Debug, Clone)]
pub struct SimulatedCanvas {
    tile_size: u32,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCanvas {
    /// Empty canvas with `charges` of `max_charges` available
    #[must_use]
    pub fn new(tile_size: u32, palette: Palette, charges: f64, max_charges: u32, regen_ms: u64) -> Self {
        Self {
            tile_size,
            state: Arc::new(Mutex::new(SimState {
                tiles: HashMap::new(),
                palette,
                charges: charges.clamp(0.0, f64::from(max_charges)),
                max_charges,
                regen_ms: regen_ms.max(1),
                accrued_at: Instant::now(),
                script: VecDeque::new(),
                read_failures: 0,
                issued_tokens: 0,
                valid_token: None,
                writes: Vec::new(),
                position: None,
            })),
        }
    }

    #[inline]
    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Collaborator set backed by this canvas with a cached token
    #[must_use]
    pub fn collaborators(&self, credential_ttl: Duration) -> Collaborators {
        Collaborators {
            reader: Arc::new(self.clone()),
            writer: Arc::new(self.clone()),
            credentials: Arc::new(CachedCredentials::new(self.clone(), credential_ttl)),
            account: Arc::new(self.clone()),
        }
    }

    /// Queue outcomes for the next write calls, in order
    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = ScriptedWrite>) {
        self.state.lock().script.extend(outcomes);
    }

    /// Make the next `n` tile reads fail
    pub fn fail_reads(&self, n: usize) {
        self.state.lock().read_failures = n;
    }

    /// Revoke the current token; writes answer 401 until a new one is issued
    pub fn expire_credentials(&self) {
        self.state.lock().valid_token = None;
    }

    /// Overwrite a pixel as a third party would
    pub fn vandalize(&self, address: &Address, color: Rgba) {
        let mut state = self.state.lock();
        state
            .tile_mut(address.tile(), self.tile_size)
            .set(address.local_x, address.local_y, color);
    }

    /// Current color at `address`
    #[must_use]
    pub fn pixel(&self, address: &Address) -> Rgba {
        self.state
            .lock()
            .tiles
            .get(&address.tile())
            .map_or(Rgba::new(0, 0, 0, 0), |tile| {
                tile.sample(address.local_x, address.local_y)
            })
    }

    /// Set the balance, e.g. to simulate spending elsewhere
    pub fn set_charges(&self, charges: f64) {
        let mut state = self.state.lock();
        state.accrue();
        state.charges = charges.clamp(0.0, f64::from(state.max_charges));
    }

    #[must_use]
    pub fn charges(&self) -> f64 {
        let mut state = self.state.lock();
        state.accrue();
        state.charges
    }

    /// Replace the list of accepted colors
    pub fn set_palette(&self, palette: Palette) {
        self.state.lock().palette = palette;
    }

    /// Position the next `next_position` call resolves to
    pub fn set_position(&self, anchor: Anchor) {
        self.state.lock().position = Some(anchor);
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteLogEntry> {
        self.state.lock().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    #[must_use]
    pub fn tokens_issued(&self) -> u64 {
        self.state.lock().issued_tokens
    }
}

#[async_trait]
impl CanvasReader for SimulatedCanvas {
    async fn read_tile(&self, tile: TileKey) -> Result<TileImage, TransportError> {
        let mut state = self.state.lock();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(TransportError::Network("simulated read failure".to_string()));
        }
        Ok(state
            .tiles
            .get(&tile)
            .cloned()
            .unwrap_or_else(|| TileImage::blank(self.tile_size)))
    }
}

#[async_trait]
impl CanvasWriter for SimulatedCanvas {
    async fn write_pixels(
        &self,
        request: &WriteRequest,
        credential: &Credential,
    ) -> Result<WriteOutcome, TransportError> {
        let mut state = self.state.lock();
        state.accrue();
        let requested = request.len();
        let mut log = WriteLogEntry {
            at: Instant::now(),
            tile: request.tile,
            requested,
            painted: 0,
            status: None,
        };

        let mut limit = requested;
        match state.script.pop_front() {
            Some(ScriptedWrite::Transport(err)) => {
                state.writes.push(log);
                return Err(err);
            }
            Some(ScriptedWrite::Status(status)) => {
                log.status = Some(status);
                state.writes.push(log);
                return Ok(WriteOutcome {
                    status,
                    painted: 0,
                    charges: None,
                });
            }
            Some(ScriptedWrite::Partial(n)) => limit = n.min(requested),
            None => {}
        }

        if state.valid_token.as_deref() != Some(credential.expose()) {
            log.status = Some(401);
            state.writes.push(log);
            return Ok(WriteOutcome {
                status: 401,
                painted: 0,
                charges: None,
            });
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let affordable = state.charges.floor() as usize;
        if affordable == 0 {
            log.status = Some(429);
            state.writes.push(log);
            return Ok(WriteOutcome {
                status: 429,
                painted: 0,
                charges: Some(state.charge_snapshot()),
            });
        }

        let painted = limit.min(affordable);
        let palette = state.palette.clone();
        for (&(x, y), &color_id) in request.coords.iter().zip(&request.colors).take(painted) {
            let color = palette
                .get(color_id)
                .map_or(Rgba::new(0, 0, 0, 0), |c: &PaletteColor| Rgba::opaque(c.rgb()));
            state.tile_mut(request.tile, self.tile_size).set(x, y, color);
        }
        #[allow(clippy::cast_precision_loss)]
        {
            state.charges = (state.charges - painted as f64).max(0.0);
        }

        log.status = Some(200);
        log.painted = painted;
        state.writes.push(log);
        Ok(WriteOutcome {
            status: 200,
            painted,
            charges: Some(state.charge_snapshot()),
        })
    }
}

#[async_trait]
impl TokenSource for SimulatedCanvas {
    async fn fetch_token(&self) -> Option<Credential> {
        let mut state = self.state.lock();
        state.issued_tokens += 1;
        let token = format!("sim-token-{}", state.issued_tokens);
        state.valid_token = Some(token.clone());
        Some(Credential::new(token))
    }
}

#[async_trait]
impl AccountProbe for SimulatedCanvas {
    async fn fetch_charges(&self) -> Result<ChargeSnapshot, TransportError> {
        let mut state = self.state.lock();
        state.accrue();
        Ok(state.charge_snapshot())
    }
}

#[async_trait]
impl ColorProbe for SimulatedCanvas {
    async fn list_available_colors(&self) -> Result<Vec<PaletteColor>, TransportError> {
        Ok(self.state.lock().palette.iter().cloned().collect())
    }
}

#[async_trait]
impl PositionSource for SimulatedCanvas {
    async fn next_position(&self) -> Option<Anchor> {
        let position = self.state.lock().position;
        match position {
            Some(anchor) => Some(anchor),
            // nothing configured: never resolves, like a user who never clicks
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CredentialProvider;

    fn palette() -> Palette {
        Palette::from_colors(vec![PaletteColor::new(7, 237, 28, 36, "Red")])
    }

    fn request(n: u32) -> WriteRequest {
        let addresses: Vec<Address> = (0..n).map(|x| Address::new(0, 0, x, 0)).collect();
        WriteRequest::new(TileKey::new(0, 0), addresses.iter().map(|a| (a, 7)))
    }

    #[tokio::test(start_paused = true)]
    async fn writes_spend_and_regenerate() {
        let canvas = SimulatedCanvas::new(1000, palette(), 3.0, 10, 30_000);
        let token = canvas.fetch_token().await.unwrap();

        let outcome = canvas.write_pixels(&request(2), &token).await.unwrap();
        assert_eq!((outcome.status, outcome.painted), (200, 2));
        assert!((canvas.charges() - 1.0).abs() < 1e-9);
        assert_eq!(canvas.pixel(&Address::new(0, 0, 1, 0)), Rgba::new(237, 28, 36, 255));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((canvas.charges() - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn painting_is_limited_by_balance() {
        let canvas = SimulatedCanvas::new(1000, palette(), 1.5, 10, 30_000);
        let token = canvas.fetch_token().await.unwrap();
        let outcome = canvas.write_pixels(&request(3), &token).await.unwrap();
        assert_eq!(outcome.painted, 1);

        canvas.set_charges(0.0);
        let outcome = canvas.write_pixels(&request(1), &token).await.unwrap();
        assert_eq!(outcome.status, 429);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_rejected_until_refresh() {
        let canvas = SimulatedCanvas::new(1000, palette(), 5.0, 10, 30_000);
        let provider = CachedCredentials::new(canvas.clone(), Duration::from_secs(600));
        let cached = provider.obtain(false).await.unwrap();
        canvas.expire_credentials();

        let outcome = canvas.write_pixels(&request(1), &cached).await.unwrap();
        assert_eq!(outcome.status, 401);

        let fresh = provider.obtain(true).await.unwrap();
        let outcome = canvas.write_pixels(&request(1), &fresh).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(canvas.tokens_issued(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_outcomes_come_first() {
        let canvas = SimulatedCanvas::new(1000, palette(), 5.0, 10, 30_000);
        let token = canvas.fetch_token().await.unwrap();
        canvas.script_writes([
            ScriptedWrite::Status(503),
            ScriptedWrite::Transport(TransportError::Timeout),
            ScriptedWrite::Partial(1),
        ]);

        assert_eq!(canvas.write_pixels(&request(2), &token).await.unwrap().status, 503);
        assert!(canvas.write_pixels(&request(2), &token).await.is_err());
        assert_eq!(canvas.write_pixels(&request(2), &token).await.unwrap().painted, 1);
        assert_eq!(canvas.write_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn vandalism_and_read_failures() {
        let canvas = SimulatedCanvas::new(1000, palette(), 5.0, 10, 30_000);
        let address = Address::new(2, -1, 4, 4);
        canvas.vandalize(&address, Rgba::new(1, 2, 3, 255));
        let tile = canvas.read_tile(address.tile()).await.unwrap();
        assert_eq!(tile.sample(4, 4), Rgba::new(1, 2, 3, 255));

        canvas.fail_reads(1);
        assert!(canvas.read_tile(address.tile()).await.is_err());
        assert!(canvas.read_tile(address.tile()).await.is_ok());
    }
}
