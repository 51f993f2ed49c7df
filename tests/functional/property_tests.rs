//! Property-based tests for the quorum arithmetic and the work queue.

use std::time::Duration;

use futures::executor::block_on;
use proptest::prelude::*;

use controlplane_operator::dispatch::ObjectKey;
use controlplane_operator::dispatch::queue::WorkQueue;
use controlplane_operator::webhooks::quorum::{EtcdQuorumPolicy, QuorumPolicy, quorum};

/// Strategy for plausible current member counts (odd, as admitted).
fn current_members() -> impl Strategy<Value = i32> {
    (0..=24i32).prop_map(|n| 2 * n + 1)
}

proptest! {
    /// Even or non-positive targets are never admitted, from any state.
    #[test]
    fn prop_even_or_nonpositive_targets_denied(
        current in proptest::option::of(current_members()),
        desired in -10..=100i32,
    ) {
        if desired < 1 || desired % 2 == 0 {
            let verdict = block_on(EtcdQuorumPolicy.validate_scale(current, desired));
            prop_assert!(verdict.is_err());
        }
    }

    /// An admitted scale-down removes one step at most and never drops
    /// below the current quorum.
    #[test]
    fn prop_admitted_scale_down_preserves_quorum(
        current in current_members(),
        desired in 1..=99i32,
    ) {
        if block_on(EtcdQuorumPolicy.validate_scale(Some(current), desired)).is_ok()
            && desired < current
        {
            prop_assert!(desired >= quorum(current));
            prop_assert!(current - desired <= 2);
        }
    }

    /// Growing (or keeping) an odd membership is always admitted.
    #[test]
    fn prop_odd_growth_always_admitted(
        current in current_members(),
        step in 0..=20i32,
    ) {
        let desired = current + 2 * step;
        let verdict = block_on(EtcdQuorumPolicy.validate_scale(Some(current), desired));
        prop_assert!(verdict.is_ok());
    }

    /// However enqueues interleave, an identity has at most one
    /// queued-or-in-flight entry.
    #[test]
    fn prop_queue_keeps_one_entry_per_identity(
        ops in proptest::collection::vec((0..4usize, 0..50u64), 1..60),
    ) {
        let queue = WorkQueue::new();
        let names = ["a", "b", "c", "d"];
        for (which, delay_ms) in &ops {
            let key = ObjectKey::namespaced("default", names[*which]);
            queue.enqueue(key, Some(Duration::from_millis(*delay_ms)));
        }
        for name in names {
            prop_assert!(queue.entries_for(&ObjectKey::namespaced("default", name)) <= 1);
        }
        prop_assert!(queue.pending_len() <= names.len());
    }
}
