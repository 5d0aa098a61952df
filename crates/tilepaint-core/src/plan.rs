//! Paint plan construction and ordering
//!
//! Turns quantized image pixels into fully addressed pending writes and
//! arranges them according to an [`OrderStrategy`]. Every strategy is a pure
//! permutation: pixels are first put in row-major order and then stably sorted
//! by the strategy key, so ties always fall back to row-major order.

use crate::coords::to_address;
use crate::types::{Address, Anchor, ColorId, ImagePos, PaletteColor, PendingPixel, Rgb};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;

/// Order in which pending pixels are painted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    /// Top-left to bottom-right
    #[default]
    RowMajorForward,
    /// Bottom-right to top-left
    RowMajorReverse,
    /// Uniform random permutation
    Shuffle,
    /// Ascending distance from the image center
    CenterOut,
    /// Ascending distance from the nearest image corner
    CornersFirst,
    /// Clockwise rings from the border inwards
    Spiral,
}

impl OrderStrategy {
    /// All strategies, in declaration order
    pub const ALL: [OrderStrategy; 6] = [
        OrderStrategy::RowMajorForward,
        OrderStrategy::RowMajorReverse,
        OrderStrategy::Shuffle,
        OrderStrategy::CenterOut,
        OrderStrategy::CornersFirst,
        OrderStrategy::Spiral,
    ];

    /// Stable name used in configuration files and the CLI
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStrategy::RowMajorForward => "row_major_forward",
            OrderStrategy::RowMajorReverse => "row_major_reverse",
            OrderStrategy::Shuffle => "shuffle",
            OrderStrategy::CenterOut => "center_out",
            OrderStrategy::CornersFirst => "corners_first",
            OrderStrategy::Spiral => "spiral",
        }
    }
}

impl std::fmt::Display for OrderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| format!("unknown order strategy: {s}"))
    }
}

/// A source pixel after quantization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedPixel {
    pub image_x: u32,
    pub image_y: u32,
    pub alpha: u8,
    /// `None` when no palette color could be assigned
    pub color: Option<PaletteColor>,
}

/// Builds addressed plans from quantized pixels
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder {
    tile_size: u32,
    transparency_threshold: u8,
}

impl PlanBuilder {
    #[inline]
    #[must_use]
    pub fn new(tile_size: u32, transparency_threshold: u8) -> Self {
        Self {
            tile_size,
            transparency_threshold,
        }
    }

    /// Address every paintable pixel relative to `anchor`
    ///
    /// Pixels below the transparency threshold or without a palette color
    /// are skipped. Output preserves input order.
    #[must_use]
    pub fn build(&self, pixels: &[QuantizedPixel], anchor: &Anchor) -> Vec<PendingPixel> {
        let mut skipped = 0usize;
        let plan: Vec<PendingPixel> = pixels
            .iter()
            .filter_map(|pixel| {
                let color = match &pixel.color {
                    Some(color) if pixel.alpha >= self.transparency_threshold => color.clone(),
                    _ => {
                        skipped += 1;
                        return None;
                    }
                };
                Some(PendingPixel {
                    image_x: pixel.image_x,
                    image_y: pixel.image_y,
                    address: to_address(
                        anchor,
                        i64::from(pixel.image_x),
                        i64::from(pixel.image_y),
                        self.tile_size,
                    ),
                    color,
                })
            })
            .collect();

        tracing::debug!(queued = plan.len(), skipped, "built paint plan");
        plan
    }
}

/// Drop pixels that precede `last` in row-major order
///
/// Used when a session resumes from a remembered position rather than from a
/// persisted plan remainder.
#[must_use]
pub fn resume_after(plan: Vec<PendingPixel>, last: ImagePos, width: u32) -> Vec<PendingPixel> {
    let last_index = last.row_major_index(width);
    plan.into_iter()
        .filter(|p| p.image_pos().row_major_index(width) >= last_index)
        .collect()
}

/// Reorder `plan` with `strategy`
///
/// `Shuffle` draws from OS entropy; use [`order_seeded`] for reproducible runs.
#[must_use]
pub fn order(
    plan: Vec<PendingPixel>,
    strategy: OrderStrategy,
    width: u32,
    height: u32,
) -> Vec<PendingPixel> {
    order_seeded(plan, strategy, width, height, None)
}

/// Reorder `plan` with `strategy`, seeding `Shuffle` when `seed` is set
#[must_use]
pub fn order_seeded(
    mut plan: Vec<PendingPixel>,
    strategy: OrderStrategy,
    width: u32,
    height: u32,
    seed: Option<u64>,
) -> Vec<PendingPixel> {
    plan.sort_by_key(|p| p.image_pos().row_major_index(width));

    match strategy {
        OrderStrategy::RowMajorForward => {}
        OrderStrategy::RowMajorReverse => plan.reverse(),
        OrderStrategy::Shuffle => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            plan.shuffle(&mut rng);
        }
        OrderStrategy::CenterOut => {
            // doubled coordinates keep the center on the integer grid
            let cx = i64::from(width) - 1;
            let cy = i64::from(height) - 1;
            plan.sort_by_key(|p| {
                let dx = 2 * i64::from(p.image_x) - cx;
                let dy = 2 * i64::from(p.image_y) - cy;
                dx * dx + dy * dy
            });
        }
        OrderStrategy::CornersFirst => {
            let max_x = i64::from(width.saturating_sub(1));
            let max_y = i64::from(height.saturating_sub(1));
            plan.sort_by_key(|p| {
                let x = i64::from(p.image_x);
                let y = i64::from(p.image_y);
                let dx = x.min(max_x - x).abs();
                let dy = y.min(max_y - y).abs();
                dx * dx + dy * dy
            });
        }
        OrderStrategy::Spiral => {
            let visit = spiral_visit_order(width, height);
            plan.sort_by_key(|p| {
                if p.image_x < width && p.image_y < height {
                    visit[(p.image_y as usize) * (width as usize) + p.image_x as usize]
                } else {
                    u64::MAX
                }
            });
        }
    }

    plan
}

/// Visit index of every cell for a clockwise outside-in ring traversal
///
/// Indexed by `y * width + x`.
#[must_use]
pub fn spiral_visit_order(width: u32, height: u32) -> Vec<u64> {
    let (w, h) = (width as usize, height as usize);
    let mut visit = vec![0u64; w * h];
    if w == 0 || h == 0 {
        return visit;
    }

    let (mut left, mut top) = (0usize, 0usize);
    let (mut right, mut bottom) = (w - 1, h - 1);
    let mut next = 0u64;
    let mut mark = |x: usize, y: usize| {
        visit[y * w + x] = next;
        next += 1;
    };

    loop {
        for x in left..=right {
            mark(x, top);
        }
        if top == bottom {
            break;
        }
        for y in top + 1..=bottom {
            mark(right, y);
        }
        if left == right {
            break;
        }
        for x in (left..right).rev() {
            mark(x, bottom);
        }
        for y in (top + 1..bottom).rev() {
            mark(left, y);
        }
        if right - left < 2 || bottom - top < 2 {
            break;
        }
        left += 1;
        top += 1;
        right -= 1;
        bottom -= 1;
    }

    visit
}

/// One upcoming write as shown by an overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewEntry {
    pub address: Address,
    pub color_id: ColorId,
    pub rgb: Rgb,
}

/// Read-only snapshot of the pending plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPreview {
    pub pending: Vec<PreviewEntry>,
    pub next_batch: usize,
}

/// FIFO of pending writes owned by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanQueue {
    items: VecDeque<PendingPixel>,
}

impl PlanQueue {
    #[inline]
    #[must_use]
    pub fn new(plan: Vec<PendingPixel>) -> Self {
        Self { items: plan.into() }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove up to `n` items from the front
    pub fn take_front(&mut self, n: usize) -> Vec<PendingPixel> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Put items back at the front, keeping their relative order
    pub fn restore_front(&mut self, pixels: Vec<PendingPixel>) {
        for pixel in pixels.into_iter().rev() {
            self.items.push_front(pixel);
        }
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PendingPixel> {
        self.items.iter()
    }

    /// Keep only items matching `f`
    pub fn retain(&mut self, f: impl FnMut(&PendingPixel) -> bool) {
        self.items.retain(f);
    }

    /// Mutable access for in-place remapping
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingPixel> {
        self.items.iter_mut()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Overlay snapshot of the remaining plan
    #[must_use]
    pub fn preview(&self, next_batch: usize) -> PlanPreview {
        PlanPreview {
            pending: self
                .items
                .iter()
                .map(|p| PreviewEntry {
                    address: p.address,
                    color_id: p.color.id,
                    rgb: p.color.rgb(),
                })
                .collect(),
            next_batch: next_batch.min(self.items.len()),
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<PendingPixel> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn red() -> PaletteColor {
        PaletteColor::new(7, 237, 28, 36, "Red")
    }

    fn grid(width: u32, height: u32) -> Vec<PendingPixel> {
        let mut plan = Vec::new();
        for y in 0..height {
            for x in 0..width {
                plan.push(PendingPixel {
                    image_x: x,
                    image_y: y,
                    address: Address::new(0, 0, x, y),
                    color: red(),
                });
            }
        }
        plan
    }

    fn positions(plan: &[PendingPixel]) -> Vec<(u32, u32)> {
        plan.iter().map(|p| (p.image_x, p.image_y)).collect()
    }

    #[test]
    fn builder_skips_transparent_and_unmapped() {
        let pixels = vec![
            QuantizedPixel { image_x: 0, image_y: 0, alpha: 255, color: Some(red()) },
            QuantizedPixel { image_x: 1, image_y: 0, alpha: 10, color: Some(red()) },
            QuantizedPixel { image_x: 2, image_y: 0, alpha: 255, color: None },
        ];
        let plan = PlanBuilder::new(1000, 100).build(&pixels, &Anchor::new(0, 0, 999, 0));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].address, Address::new(0, 0, 999, 0));
    }

    #[test]
    fn reverse_then_forward_restores_row_major() {
        let original = grid(4, 3);
        let reversed = order(original.clone(), OrderStrategy::RowMajorReverse, 4, 3);
        assert_eq!(positions(&reversed)[0], (3, 2));
        let restored = order(reversed, OrderStrategy::RowMajorForward, 4, 3);
        assert_eq!(restored, original);
    }

    #[test]
    fn center_out_starts_in_the_middle() {
        let ordered = order(grid(3, 3), OrderStrategy::CenterOut, 3, 3);
        assert_eq!(positions(&ordered)[0], (1, 1));
        // four edge midpoints tie; row-major breaks the tie
        assert_eq!(&positions(&ordered)[1..5], &[(1, 0), (0, 1), (2, 1), (1, 2)]);
    }

    #[test]
    fn corners_first_visits_all_corners_first() {
        let ordered = order(grid(4, 4), OrderStrategy::CornersFirst, 4, 4);
        assert_eq!(&positions(&ordered)[..4], &[(0, 0), (3, 0), (0, 3), (3, 3)]);
    }

    #[test]
    fn spiral_walks_rings_clockwise() {
        let ordered = order(grid(3, 3), OrderStrategy::Spiral, 3, 3);
        assert_eq!(
            positions(&ordered),
            vec![(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (1, 2), (0, 2), (0, 1), (1, 1)]
        );
    }

    #[test]
    fn spiral_visit_order_is_a_permutation() {
        for (w, h) in [(1, 1), (1, 5), (5, 1), (2, 2), (4, 3), (6, 7)] {
            let mut visit = spiral_visit_order(w, h);
            visit.sort_unstable();
            let expected: Vec<u64> = (0..u64::from(w * h)).collect();
            assert_eq!(visit, expected, "{w}x{h}");
        }
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let a = order_seeded(grid(5, 5), OrderStrategy::Shuffle, 5, 5, Some(9));
        let b = order_seeded(grid(5, 5), OrderStrategy::Shuffle, 5, 5, Some(9));
        assert_eq!(a, b);
        assert_eq!(a.len(), 25);
    }

    #[test]
    fn resume_skips_pixels_before_last_position() {
        let plan = resume_after(grid(3, 2), ImagePos::new(1, 1), 3);
        assert_eq!(positions(&plan), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn queue_take_and_restore_keep_order() {
        let mut queue = PlanQueue::new(grid(3, 1));
        let batch = queue.take_front(2);
        assert_eq!(positions(&batch), vec![(0, 0), (1, 0)]);
        assert_eq!(queue.len(), 1);
        queue.restore_front(batch);
        assert_eq!(positions(&queue.to_vec()), vec![(0, 0), (1, 0), (2, 0)]);

        let preview = queue.preview(10);
        assert_eq!(preview.next_batch, 3);
        assert_eq!(preview.pending[2].address, Address::new(0, 0, 2, 0));
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in OrderStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<OrderStrategy>(), Ok(strategy));
        }
        assert!("diagonal".parse::<OrderStrategy>().is_err());
    }
}
