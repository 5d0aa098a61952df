use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tilepaint_core::{
    order, order_seeded, resume_after, ImagePos, OrderStrategy, PendingPixel, PlanBuilder,
    PlanQueue,
};
use tilepaint_test_utils::{corner_anchor, pending_grid, positions, quantized_block, red};

fn sorted(plan: &[PendingPixel], width: u32) -> Vec<u64> {
    let mut idx: Vec<u64> = plan
        .iter()
        .map(|p| p.image_pos().row_major_index(width))
        .collect();
    idx.sort_unstable();
    idx
}

proptest! {
    #[test]
    fn prop_every_strategy_is_a_permutation(
        width in 1u32..12,
        height in 1u32..12,
        strategy in prop::sample::select(OrderStrategy::ALL.to_vec()),
        seed in any::<u64>(),
    ) {
        let plan = pending_grid(width, height, &red());
        let ordered = order_seeded(plan.clone(), strategy, width, height, Some(seed));
        prop_assert_eq!(ordered.len(), plan.len());
        prop_assert_eq!(sorted(&ordered, width), sorted(&plan, width));
    }

    #[test]
    fn prop_reverse_then_forward_restores_row_major(width in 1u32..15, height in 1u32..15) {
        let plan = pending_grid(width, height, &red());
        let reversed = order(plan.clone(), OrderStrategy::RowMajorReverse, width, height);
        let restored = order(reversed, OrderStrategy::RowMajorForward, width, height);
        prop_assert_eq!(positions(&restored), positions(&plan));
    }

    #[test]
    fn prop_ordering_is_deterministic(
        width in 1u32..10,
        height in 1u32..10,
        strategy in prop::sample::select(vec![
            OrderStrategy::RowMajorForward,
            OrderStrategy::RowMajorReverse,
            OrderStrategy::CenterOut,
            OrderStrategy::CornersFirst,
            OrderStrategy::Spiral,
        ]),
    ) {
        let plan = pending_grid(width, height, &red());
        let a = order(plan.clone(), strategy, width, height);
        let b = order(plan, strategy, width, height);
        prop_assert_eq!(positions(&a), positions(&b));
    }
}

#[test]
fn test_end_to_end_plan_shape() {
    let pixels = quantized_block(2, 2, &red());
    let plan = PlanBuilder::new(1000, 100).build(&pixels, &corner_anchor());
    assert_eq!(plan.len(), 4);
    assert!(plan.iter().all(|p| p.color.id == 7));
    assert_eq!(plan[2].address.tile_y, 1);
    assert_eq!(plan[2].address.local_y, 0);
}

#[test]
fn test_resume_then_queue() {
    let plan = pending_grid(4, 2, &red());
    let resumed = resume_after(plan, ImagePos::new(3, 0), 4);
    assert_eq!(resumed.first().map(PendingPixel::image_pos), Some(ImagePos::new(3, 0)));

    let mut queue = PlanQueue::new(resumed);
    let batch = queue.take_front(2);
    assert_eq!(queue.len(), 3);
    queue.restore_front(batch);
    assert_eq!(queue.preview(10).next_batch, 5);
    assert_eq!(
        queue.iter().next().map(PendingPixel::image_pos),
        Some(ImagePos::new(3, 0))
    );
}
