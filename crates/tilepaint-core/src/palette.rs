//! Palette quantization
//!
//! Maps arbitrary colors onto the set of colors the remote surface accepts,
//! using Euclidean distance in CIE L*a*b*. Conversions are cached by packed
//! RGB so repeated planning over the same image stays cheap.
//!
//! - an optional chroma penalty adds `|ΔC*| * penalty` to the Lab distance
//! - legacy mode compares raw sRGB triples instead

use crate::config::PaintConfig;
use crate::types::{Palette, PaletteColor, Rgb, Rgba};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

// sRGB (D65) to XYZ
const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.4124, 0.3576, 0.1805],
    [0.2126, 0.7152, 0.0722],
    [0.0193, 0.1192, 0.9505],
];

// D65 white point
const X_N: f64 = 0.95047;
const Y_N: f64 = 1.0;
const Z_N: f64 = 1.08883;

// (6/29)^3
const EPSILON: f64 = 0.008856;
const KAPPA_INV: f64 = 7.787;

/// Default whiteness guard threshold
pub const DEFAULT_WHITE_THRESHOLD: u8 = 240;

/// Color in CIE L*a*b*
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    /// Squared CIE76 distance
    #[inline]
    #[must_use]
    pub fn distance_sq(&self, other: &Lab) -> f64 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        dl * dl + da * da + db * db
    }

    /// CIE76 distance
    #[inline]
    #[must_use]
    pub fn distance(&self, other: &Lab) -> f64 {
        self.distance_sq(other).sqrt()
    }

    /// Chroma `C* = sqrt(a*^2 + b*^2)`
    #[inline]
    #[must_use]
    pub fn chroma(&self) -> f64 {
        self.a.hypot(self.b)
    }
}

/// Euclidean distance between raw sRGB triples
#[inline]
#[must_use]
pub fn rgb_distance(x: Rgb, y: Rgb) -> f64 {
    let dr = f64::from(x.r) - f64::from(y.r);
    let dg = f64::from(x.g) - f64::from(y.g);
    let db = f64::from(x.b) - f64::from(y.b);
    (dr * dr + dg * dg + db * db).sqrt()
}

#[inline]
fn srgb_to_linear(channel: u8) -> f64 {
    let v = f64::from(channel) / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn lab_f(t: f64) -> f64 {
    if t > EPSILON {
        t.cbrt()
    } else {
        KAPPA_INV * t + 16.0 / 116.0
    }
}

/// Convert an sRGB triple to L*a*b* (uncached)
#[must_use]
pub fn rgb_to_lab(rgb: Rgb) -> Lab {
    let lin = [
        srgb_to_linear(rgb.r),
        srgb_to_linear(rgb.g),
        srgb_to_linear(rgb.b),
    ];
    let xyz: [f64; 3] = std::array::from_fn(|row| {
        RGB_TO_XYZ[row][0] * lin[0] + RGB_TO_XYZ[row][1] * lin[1] + RGB_TO_XYZ[row][2] * lin[2]
    });

    let fx = lab_f(xyz[0] / X_N);
    let fy = lab_f(xyz[1] / Y_N);
    let fz = lab_f(xyz[2] / Z_N);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// How an observed remote color is resolved to a palette id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFallback {
    /// Exact RGB lookup first, then nearest palette color
    #[default]
    ExactThenNearest,
    /// Exact RGB lookup only
    ExactOnly,
}

/// Nearest-color quantizer with a shared L*a*b* cache
#[derive(Debug)]
pub struct Quantizer {
    white_threshold: u8,
    chroma_penalty: f64,
    legacy_rgb: bool,
    cache: DashMap<u32, Lab>,
}

impl Quantizer {
    /// Create a quantizer with the given whiteness guard
    #[inline]
    #[must_use]
    pub fn new(white_threshold: u8) -> Self {
        Self {
            white_threshold,
            chroma_penalty: 0.0,
            legacy_rgb: false,
            cache: DashMap::new(),
        }
    }

    /// Quantizer carrying the color options of `config`
    #[must_use]
    pub fn from_config(config: &PaintConfig) -> Self {
        Self::new(config.white_threshold)
            .with_chroma_penalty(config.chroma_penalty)
            .with_legacy_rgb(config.use_legacy_rgb)
    }

    /// With chroma penalty; 0 disables it
    #[inline]
    #[must_use]
    pub fn with_chroma_penalty(mut self, penalty: f64) -> Self {
        self.chroma_penalty = penalty;
        self
    }

    /// With plain sRGB distance instead of L*a*b*
    #[inline]
    #[must_use]
    pub fn with_legacy_rgb(mut self, enabled: bool) -> Self {
        self.legacy_rgb = enabled;
        self
    }

    /// Cached L*a*b* for `rgb`
    pub fn lab(&self, rgb: Rgb) -> Lab {
        *self
            .cache
            .entry(rgb.packed())
            .or_insert_with(|| rgb_to_lab(rgb))
    }

    /// Map `rgb` to the closest entry of `allowed`
    ///
    /// Returns `None` only when `allowed` is empty. Exact matches win
    /// immediately; near-white inputs prefer a near-white entry even when
    /// another entry is numerically closer.
    pub fn quantize<'a>(&self, rgb: Rgb, allowed: &'a [PaletteColor]) -> Option<&'a PaletteColor> {
        if allowed.is_empty() {
            return None;
        }

        if let Some(exact) = allowed.iter().find(|c| c.rgb() == rgb) {
            return Some(exact);
        }

        if rgb.is_whitish(self.white_threshold) {
            if let Some(white) = allowed
                .iter()
                .find(|c| c.rgb().is_whitish(self.white_threshold))
            {
                return Some(white);
            }
        }

        let target = (!self.legacy_rgb).then(|| self.lab(rgb));
        let mut best: Option<(&PaletteColor, f64)> = None;
        for color in allowed {
            let distance = match &target {
                Some(target) => self.lab_score(target, color.rgb()),
                None => rgb_distance(rgb, color.rgb()),
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((color, distance));
            }
        }
        best.map(|(color, _)| color)
    }

    fn lab_score(&self, target: &Lab, candidate: Rgb) -> f64 {
        let lab = self.lab(candidate);
        let distance = target.distance(&lab);
        if self.chroma_penalty > 0.0 {
            distance + (target.chroma() - lab.chroma()).abs() * self.chroma_penalty
        } else {
            distance
        }
    }

    /// Number of cached conversions
    #[inline]
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop all cached conversions
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new(DEFAULT_WHITE_THRESHOLD)
    }
}

/// Identity rule for comparing observed remote pixels with targets
///
/// Shared by reconciliation and the verification prefilter so both agree on
/// what "already correct" means.
#[derive(Debug, Clone, Copy)]
pub struct ColorMatcher<'a> {
    quantizer: &'a Quantizer,
    palette: &'a Palette,
    fallback: ColorFallback,
}

impl<'a> ColorMatcher<'a> {
    #[inline]
    #[must_use]
    pub fn new(quantizer: &'a Quantizer, palette: &'a Palette, fallback: ColorFallback) -> Self {
        Self {
            quantizer,
            palette,
            fallback,
        }
    }

    /// Palette entry an observed sample stands for, if any
    #[must_use]
    pub fn resolve(&self, observed: Rgba) -> Option<&'a PaletteColor> {
        if observed.a == 0 {
            return None;
        }
        let rgb = observed.rgb();
        if let Some(exact) = self.palette.find_rgb(rgb) {
            return Some(exact);
        }
        match self.fallback {
            ColorFallback::ExactThenNearest => self.quantizer.quantize(rgb, self.palette.as_slice()),
            ColorFallback::ExactOnly => None,
        }
    }

    /// Whether `observed` already shows `target`
    #[must_use]
    pub fn matches(&self, observed: Rgba, target: &PaletteColor) -> bool {
        if observed.a == 0 {
            return false;
        }
        match self.resolve(observed) {
            Some(resolved) => resolved.id == target.id,
            None => observed.rgb() == target.rgb(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> Vec<PaletteColor> {
        vec![
            PaletteColor::new(1, 0, 0, 0, "Black"),
            PaletteColor::new(2, 60, 60, 60, "Dark Gray"),
            PaletteColor::new(4, 210, 210, 210, "Light Gray"),
            PaletteColor::new(5, 255, 255, 255, "White"),
            PaletteColor::new(7, 237, 28, 36, "Red"),
            PaletteColor::new(12, 40, 80, 158, "Blue"),
        ]
    }

    #[test]
    fn empty_palette_maps_to_nothing() {
        let q = Quantizer::default();
        assert!(q.quantize(Rgb::new(1, 2, 3), &[]).is_none());
    }

    #[test]
    fn exact_match_wins() {
        let q = Quantizer::default();
        let allowed = palette();
        let hit = q.quantize(Rgb::new(237, 28, 36), &allowed).unwrap();
        assert_eq!(hit.id, 7);
        // exact matches never touch the cache
        assert_eq!(q.cache_len(), 0);
    }

    #[test]
    fn nearest_by_lab_distance() {
        let q = Quantizer::default();
        let allowed = palette();
        assert_eq!(q.quantize(Rgb::new(220, 40, 50), &allowed).unwrap().id, 7);
        assert_eq!(q.quantize(Rgb::new(30, 70, 170), &allowed).unwrap().id, 12);
        assert_eq!(q.quantize(Rgb::new(10, 10, 10), &allowed).unwrap().id, 1);
    }

    #[test]
    fn quantize_is_deterministic_with_cache() {
        let q = Quantizer::default();
        let allowed = palette();
        let first = q.quantize(Rgb::new(10, 10, 10), &allowed).unwrap().id;
        assert!(q.cache_len() > 0);
        let second = q.quantize(Rgb::new(10, 10, 10), &allowed).unwrap().id;
        assert_eq!(first, second);

        q.clear_cache();
        assert_eq!(q.quantize(Rgb::new(10, 10, 10), &allowed).unwrap().id, first);
    }

    #[test]
    fn chroma_penalty_favors_similar_saturation() {
        let allowed = vec![
            PaletteColor::new(1, 0, 0, 0, "Black"),
            PaletteColor::new(6, 96, 0, 24, "Deep Red"),
        ];
        let muted = Rgb::new(90, 50, 60);
        assert_eq!(Quantizer::default().quantize(muted, &allowed).unwrap().id, 6);

        let penalized = Quantizer::default().with_chroma_penalty(3.0);
        assert_eq!(penalized.quantize(muted, &allowed).unwrap().id, 1);
    }

    #[test]
    fn legacy_rgb_uses_channel_distance() {
        let allowed = vec![
            PaletteColor::new(6, 96, 0, 24, "Deep Red"),
            PaletteColor::new(7, 237, 28, 36, "Red"),
        ];
        let rgb = Rgb::new(160, 60, 60);
        assert_eq!(Quantizer::default().quantize(rgb, &allowed).unwrap().id, 6);

        let legacy = Quantizer::default().with_legacy_rgb(true);
        assert_eq!(legacy.quantize(rgb, &allowed).unwrap().id, 7);
        assert_eq!(legacy.cache_len(), 0);
    }

    #[test]
    fn from_config_carries_color_options() {
        let config = PaintConfig {
            use_legacy_rgb: true,
            ..PaintConfig::default()
        };
        let allowed = vec![
            PaletteColor::new(6, 96, 0, 24, "Deep Red"),
            PaletteColor::new(7, 237, 28, 36, "Red"),
        ];
        let q = Quantizer::from_config(&config);
        assert_eq!(q.quantize(Rgb::new(160, 60, 60), &allowed).unwrap().id, 7);
    }

    #[test]
    fn whitish_input_prefers_whitish_entry() {
        let q = Quantizer::default();
        // only off-white candidate sits behind a closer light gray
        let allowed = vec![
            PaletteColor::new(4, 236, 236, 236, "Light Gray"),
            PaletteColor::new(9, 241, 250, 244, "Mint White"),
        ];
        let hit = q.quantize(Rgb::new(245, 245, 245), &allowed).unwrap();
        assert_eq!(hit.id, 9);
    }

    #[test]
    fn lab_of_white_and_black() {
        let white = rgb_to_lab(Rgb::new(255, 255, 255));
        assert!((white.l - 100.0).abs() < 0.1);
        assert!(white.a.abs() < 0.5 && white.b.abs() < 0.5);
        let black = rgb_to_lab(Rgb::new(0, 0, 0));
        assert!(black.l.abs() < 1e-9);
    }

    #[test]
    fn matcher_prefers_palette_id() {
        let q = Quantizer::default();
        let palette = Palette::from_colors(palette());
        let red = palette.get(7).unwrap().clone();
        let matcher = ColorMatcher::new(&q, &palette, ColorFallback::ExactThenNearest);

        assert!(matcher.matches(Rgba::new(237, 28, 36, 255), &red));
        // near-red resolves to the red id
        assert!(matcher.matches(Rgba::new(230, 30, 40, 255), &red));
        assert!(!matcher.matches(Rgba::new(40, 80, 158, 255), &red));
        // unpainted never matches
        assert!(!matcher.matches(Rgba::new(237, 28, 36, 0), &red));
    }

    #[test]
    fn matcher_exact_only_falls_back_to_rgb() {
        let q = Quantizer::default();
        let palette = Palette::from_colors(palette());
        let red = palette.get(7).unwrap().clone();
        let matcher = ColorMatcher::new(&q, &palette, ColorFallback::ExactOnly);

        assert!(matcher.resolve(Rgba::new(230, 30, 40, 255)).is_none());
        assert!(!matcher.matches(Rgba::new(230, 30, 40, 255), &red));
        assert!(matcher.matches(Rgba::new(237, 28, 36, 255), &red));
    }
}
