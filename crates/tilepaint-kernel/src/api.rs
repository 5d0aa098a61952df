//! External collaborator contracts
//!
//! The scheduler never talks to a network directly. Everything remote goes
//! through these traits so a real HTTP client, the in-memory simulator and
//! test mocks are interchangeable.

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tilepaint_core::{Address, Anchor, ColorId, PaletteColor, Rgba, TileKey};

/// Opaque write credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Remote charge counters returned with writes or by the account probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeSnapshot {
    pub count: f64,
    pub max: u32,
}

/// Decoded pixel grid of one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    size: u32,
    pixels: Vec<Rgba>,
}

impl TileImage {
    /// Fully transparent tile
    #[must_use]
    pub fn blank(size: u32) -> Self {
        let len = usize::try_from(u64::from(size) * u64::from(size)).unwrap_or(0);
        Self {
            size,
            pixels: vec![Rgba::new(0, 0, 0, 0); len],
        }
    }

    /// Wrap a row-major pixel buffer, `None` when its length is not `size * size`
    #[must_use]
    pub fn from_pixels(size: u32, pixels: Vec<Rgba>) -> Option<Self> {
        let expected = usize::try_from(u64::from(size) * u64::from(size)).ok()?;
        (pixels.len() == expected).then_some(Self { size, pixels })
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Sample at a local offset; outside the tile reads as transparent
    #[must_use]
    pub fn sample(&self, local_x: u32, local_y: u32) -> Rgba {
        if local_x >= self.size || local_y >= self.size {
            return Rgba::new(0, 0, 0, 0);
        }
        usize::try_from(u64::from(local_y) * u64::from(self.size) + u64::from(local_x))
            .ok()
            .and_then(|idx| self.pixels.get(idx).copied())
            .unwrap_or(Rgba::new(0, 0, 0, 0))
    }

    pub fn set(&mut self, local_x: u32, local_y: u32, color: Rgba) {
        if local_x >= self.size || local_y >= self.size {
            return;
        }
        if let Ok(idx) =
            usize::try_from(u64::from(local_y) * u64::from(self.size) + u64::from(local_x))
        {
            if let Some(slot) = self.pixels.get_mut(idx) {
                *slot = color;
            }
        }
    }
}

/// One per-tile write: parallel local coordinates and color ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteRequest {
    pub tile: TileKey,
    pub coords: Vec<(u32, u32)>,
    pub colors: Vec<ColorId>,
}

impl WriteRequest {
    /// Build from addresses that all belong to `tile`
    #[must_use]
    pub fn new<'a>(tile: TileKey, items: impl IntoIterator<Item = (&'a Address, ColorId)>) -> Self {
        let (coords, colors) = items
            .into_iter()
            .map(|(addr, color)| ((addr.local_x, addr.local_y), color))
            .unzip();
        Self {
            tile,
            coords,
            colors,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Remote answer to a write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOutcome {
    pub status: u16,
    /// Pixels painted, counted from the front of the request
    pub painted: usize,
    /// Charges after the write, when the remote reports them
    pub charges: Option<ChargeSnapshot>,
}

/// Reads current tile contents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CanvasReader: Send + Sync {
    async fn read_tile(&self, tile: TileKey) -> Result<TileImage, TransportError>;
}

/// Submits per-tile writes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CanvasWriter: Send + Sync {
    async fn write_pixels(
        &self,
        request: &WriteRequest,
        credential: &Credential,
    ) -> Result<WriteOutcome, TransportError>;
}

/// Supplies write credentials, possibly cached
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn obtain(&self, force_refresh: bool) -> Option<Credential>;
}

/// Uncached credential origin wrapped by [`crate::credentials::CachedCredentials`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Option<Credential>;
}

/// Authoritative charge counters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountProbe: Send + Sync {
    async fn fetch_charges(&self) -> Result<ChargeSnapshot, TransportError>;
}

/// Colors the remote currently accepts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ColorProbe: Send + Sync {
    async fn list_available_colors(&self) -> Result<Vec<PaletteColor>, TransportError>;
}

/// User-confirmed anchor selection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Resolves once a position is chosen; `None` if selection was abandoned
    async fn next_position(&self) -> Option<Anchor>;
}

/// Remote collaborators the scheduler loop needs
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn CanvasReader>,
    pub writer: Arc<dyn CanvasWriter>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub account: Arc<dyn AccountProbe>,
}

impl Collaborators {
    /// Use one object for every role
    #[must_use]
    pub fn from_shared<T>(shared: &Arc<T>) -> Self
    where
        T: CanvasReader + CanvasWriter + CredentialProvider + AccountProbe + 'static,
    {
        Self {
            reader: shared.clone(),
            writer: shared.clone(),
            credentials: shared.clone(),
            account: shared.clone(),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
