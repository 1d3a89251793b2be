use proptest::prelude::*;
use salsarec::{
    rank, rank_cancellable, rank_run, sample_walk, AdjacencyTable, BipartiteGraph, CancelReason,
    CancelToken, Cancellation, Error, GraphIndex, Hit, IndexBuilder, LoadPlan, MemorySource,
    ModuloPartitioner, NodeId, Partition, SalsaConfig, Side, TableKey,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};

fn index(left: Vec<(NodeId, Vec<NodeId>)>, right: Vec<(NodeId, Vec<NodeId>)>) -> GraphIndex {
    GraphIndex::from_partitions(
        "test",
        vec![Partition::new(0, AdjacencyTable::from_lists(left), AdjacencyTable::from_lists(right))],
    )
}

/// LEFT {1: [10, 11]}, RIGHT {10: [1, 2], 11: [1]}.
fn two_item_graph() -> GraphIndex {
    index(vec![(1, vec![10, 11])], vec![(10, vec![1, 2]), (11, vec![1])])
}

fn cfg(walks: usize, walk_length: usize, reset_probability: f64) -> SalsaConfig {
    SalsaConfig { limit: 5, walks, walk_length, reset_probability, seed: 7 }
}

fn assert_ranking_sane(hits: &[Hit], origin: NodeId, limit: usize) {
    assert!(hits.len() <= limit, "ranking longer than limit");
    assert!(hits.iter().all(|h| h.node != origin), "origin leaked into ranking");
    assert!(hits.iter().all(|h| h.count > 0), "zero-count entry in ranking");
    for w in hits.windows(2) {
        assert!(w[0].count >= w[1].count, "ranking not sorted: {hits:?}");
    }
}

#[test]
fn only_co_reachable_node_is_ranked() {
    let g = two_item_graph();
    let hits = rank(&g, 1, Side::Left, &cfg(1000, 4, 0.0)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node, 2);
    assert!(hits[0].count > 0);
}

#[test]
fn zero_walks_is_a_validation_error() {
    let g = two_item_graph();
    let err = rank(&g, 1, Side::Left, &cfg(0, 4, 0.0)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "{err}");
    assert!(!err.is_retryable());
}

#[test]
fn invalid_reset_probability_is_rejected_before_walking() {
    let g = two_item_graph();
    assert!(matches!(
        rank(&g, 1, Side::Left, &cfg(10, 4, 1.0)),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn isolated_right_origin_is_cold_start() {
    let g = index(vec![(1, vec![10])], vec![(10, vec![1]), (12, vec![])]);
    let run = rank_run(&g, 12, Side::Right, &SalsaConfig::default()).unwrap();
    assert!(run.hits.is_empty());
    assert_eq!(run.total_hits, 0);
    assert!(run.is_cold_start());
}

#[test]
fn unknown_origin_is_cold_start_on_both_sides() {
    let g = two_item_graph();
    for side in Side::BOTH {
        let hits = rank(&g, 12345, side, &SalsaConfig::default()).unwrap();
        assert!(hits.is_empty());
    }
}

#[test]
fn right_side_origin_ranks_items() {
    // Item 10 and item 11 share actor 1; item 12 shares actor 2 with 10 only.
    let g = index(
        vec![(1, vec![10, 11]), (2, vec![10, 12])],
        vec![(10, vec![1, 2]), (11, vec![1]), (12, vec![2])],
    );
    let hits = rank(&g, 10, Side::Right, &cfg(2000, 6, 0.1)).unwrap();
    let nodes: HashSet<NodeId> = hits.iter().map(|h| h.node).collect();
    assert_eq!(nodes, HashSet::from([11, 12]));
    assert_ranking_sane(&hits, 10, 5);
}

#[test]
fn neighbor_choice_is_uniform() {
    let g = index(vec![(1, vec![10])], vec![(10, vec![2, 3])]);
    let hits = rank(&g, 1, Side::Left, &cfg(4000, 2, 0.0)).unwrap();
    let total: u64 = hits.iter().map(|h| h.count).sum();
    assert_eq!(total, 4000);
    for h in &hits {
        assert!((1800..=2200).contains(&h.count), "biased choice: {hits:?}");
    }
}

#[test]
fn duplicate_edges_weight_the_walk() {
    let g = index(vec![(1, vec![10])], vec![(10, vec![2, 2, 2, 3])]);
    let hits = rank(&g, 1, Side::Left, &cfg(8000, 2, 0.0)).unwrap();
    assert_eq!(hits[0].node, 2);
    let ratio = hits[0].count as f64 / hits[1].count as f64;
    assert!((2.5..3.5).contains(&ratio), "ratio={ratio}");
}

#[test]
fn limit_truncates() {
    let right_adj: Vec<NodeId> = (2..20).collect();
    let g = index(vec![(1, vec![10])], vec![(10, right_adj)]);
    let config = SalsaConfig { limit: 3, ..cfg(500, 2, 0.0) };
    let run = rank_run(&g, 1, Side::Left, &config).unwrap();
    assert_eq!(run.hits.len(), 3);
    assert_eq!(run.distinct, 18);
    assert_ranking_sane(&run.hits, 1, 3);
}

#[test]
fn reproducible_given_seed() {
    let g = index(
        vec![(1, vec![10, 11, 12]), (2, vec![10]), (3, vec![11, 12]), (4, vec![12])],
        vec![(10, vec![1, 2]), (11, vec![1, 3]), (12, vec![1, 3, 4])],
    );
    let c = SalsaConfig { walks: 300, walk_length: 12, reset_probability: 0.2, ..Default::default() };
    let a = rank(&g, 1, Side::Left, &c).unwrap();
    let b = rank(&g, 1, Side::Left, &c).unwrap();
    assert_eq!(a, b, "same seed should yield identical rankings");

    let other = rank(&g, 1, Side::Left, &SalsaConfig { seed: c.seed + 1, ..c }).unwrap();
    let nodes = |h: &[Hit]| h.iter().map(|x| x.node).collect::<HashSet<_>>();
    assert_eq!(nodes(&a), nodes(&other));
}

#[test]
fn already_cancelled_call_reports_cancellation() {
    let g = two_item_graph();
    let token = CancelToken::new();
    token.cancel();
    let cancel = Cancellation::none().with_token(token);
    let err = rank_cancellable(&g, 1, Side::Left, &cfg(100, 4, 0.0), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelReason::Token)));
    assert!(err.is_retryable());
}

#[test]
fn expired_deadline_reports_cancellation() {
    let g = two_item_graph();
    let cancel = Cancellation::none().with_deadline(Instant::now());
    let err = rank_cancellable(&g, 1, Side::Left, &cfg(100, 4, 0.0), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelReason::DeadlineExceeded)));
}

#[test]
fn deadline_expiring_mid_run_reports_cancellation() {
    let g = two_item_graph();
    let cancel = Cancellation::none().with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = rank_cancellable(&g, 1, Side::Left, &cfg(50_000_000, 4, 0.0), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled(CancelReason::DeadlineExceeded)), "{err}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(30), "cancellation not observed between trials");
}

#[test]
fn token_fired_during_long_walk_reports_cancellation() {
    // Two-node cycle: the single trial never dead-ends, so only the in-walk poll can stop it.
    let g = index(vec![(1, vec![10])], vec![(10, vec![1])]);
    let token = CancelToken::new();
    let cancel = Cancellation::none().with_token(token.clone());
    let config = SalsaConfig { limit: 5, walks: 1, walk_length: usize::MAX, reset_probability: 0.0, seed: 7 };

    let firing = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let err = rank_cancellable(&g, 1, Side::Left, &config, &cancel).unwrap_err();
    firing.join().unwrap();
    assert!(matches!(err, Error::Cancelled(CancelReason::Token)), "{err}");
}

#[test]
fn validation_wins_over_cancellation() {
    let g = two_item_graph();
    let token = CancelToken::new();
    token.cancel();
    let cancel = Cancellation::none().with_token(token);
    let err = rank_cancellable(&g, 1, Side::Left, &cfg(0, 4, 0.0), &cancel).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));
}

#[test]
fn sharded_index_ranks_like_its_parts_compose() {
    let modulo = ModuloPartitioner::new(3).unwrap();
    let mut b = IndexBuilder::new(&modulo);
    b.extend_edges([(1, 10), (1, 11), (1, 12), (2, 10), (3, 11), (4, 12)]);
    let src: MemorySource = b.to_source().unwrap();
    let g = GraphIndex::load(&src, &LoadPlan::all_of(&modulo)).unwrap();
    assert_eq!(g.partitions().len(), 3);
    assert_eq!(g.neighbors(1, Side::Left).len(), 3);

    let hits = rank(&g, 1, Side::Left, &cfg(2000, 4, 0.0)).unwrap();
    let nodes: HashSet<NodeId> = hits.iter().map(|h| h.node).collect();
    assert_eq!(nodes, HashSet::from([2, 3, 4]));

    // Partition 1 holds item 10 only, so actor 1 can reach actor 2 and nobody else.
    let p1 = GraphIndex::load(&src, &LoadPlan::single("modulo", 1)).unwrap();
    let only = rank(&p1, 1, Side::Left, &cfg(500, 4, 0.0)).unwrap();
    assert_eq!(only.iter().map(|h| h.node).collect::<Vec<_>>(), vec![2]);
    assert!(TableKey::new("modulo", 1).to_string().ends_with("partition_1"));
}

#[cfg(feature = "parallel")]
#[test]
fn parallel_is_thread_count_invariant() {
    let g = index(
        vec![(1, vec![10, 11, 12]), (2, vec![10]), (3, vec![11, 12]), (4, vec![12])],
        vec![(10, vec![1, 2]), (11, vec![1, 3]), (12, vec![1, 3, 4])],
    );
    let c = SalsaConfig { limit: 10, walks: 777, walk_length: 15, reset_probability: 0.15, seed: 999 };

    let pool1 = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let pool4 = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

    let r1 = pool1.install(|| rank_run(&g, 1, Side::Left, &c)).unwrap();
    let r4 = pool4.install(|| rank_run(&g, 1, Side::Left, &c)).unwrap();
    assert_eq!(r1.hits, r4.hits, "ranking must be thread-count invariant");
    assert_eq!(r1.stats, r4.stats);
    assert_eq!(r1.total_hits, r4.total_hits);
}

/// Build a small bipartite graph whose LEFT and RIGHT ids overlap, so a side mix-up
/// would show up as a bogus hit.
fn arbitrary_graph(left: Vec<Vec<NodeId>>, right: Vec<Vec<NodeId>>) -> GraphIndex {
    let l = left.into_iter().enumerate().map(|(i, adj)| (i as NodeId, adj)).collect::<Vec<_>>();
    let r = right.into_iter().enumerate().map(|(i, adj)| (i as NodeId, adj)).collect::<Vec<_>>();
    index(l, r)
}

proptest! {
    // Every hop crosses sides along a real edge; hits land only on the origin side and
    // never on the origin; restarts resume from the origin.
    #[test]
    fn prop_walks_alternate_sides_and_follow_edges(
        left in prop::collection::vec(prop::collection::vec(0u64..6, 0..5), 1..6),
        right in prop::collection::vec(prop::collection::vec(0u64..6, 0..5), 1..6),
        origin in 0u64..6,
        origin_left in any::<bool>(),
        reset in 0.0f64..0.9,
        seed in any::<u64>(),
        trial in 0u64..50,
    ) {
        let g = arbitrary_graph(left, right);
        let side = if origin_left { Side::Left } else { Side::Right };
        let c = SalsaConfig { limit: 5, walks: 1, walk_length: 12, reset_probability: reset, seed };
        let path = sample_walk(&g, origin, side, &c, trial).unwrap();

        prop_assert!(path.len() <= c.walk_length);
        let mut at = (origin, side);
        for step in &path {
            prop_assert_eq!((step.from, step.from_side), at);
            prop_assert_eq!(step.to_side, step.from_side.opposite());
            prop_assert!(g.neighbors(step.from, step.from_side).iter().any(|n| n == step.to));
            prop_assert_eq!(step.hit, step.to_side == side && step.to != origin);
            at = if step.reset { (origin, side) } else { (step.to, step.to_side) };
        }
        if path.len() < c.walk_length {
            // Stopped early: only a dead end does that.
            prop_assert!(g.neighbors(at.0, at.1).is_empty());
        }
    }

    #[test]
    fn prop_rankings_are_bounded_sorted_and_exclude_origin(
        left in prop::collection::vec(prop::collection::vec(0u64..8, 0..6), 1..8),
        right in prop::collection::vec(prop::collection::vec(0u64..8, 0..6), 1..8),
        origin in 0u64..8,
        origin_left in any::<bool>(),
        limit in 1usize..6,
        seed in any::<u64>(),
    ) {
        let g = arbitrary_graph(left, right);
        let side = if origin_left { Side::Left } else { Side::Right };
        let c = SalsaConfig { limit, walks: 40, walk_length: 8, reset_probability: 0.1, seed };
        let hits = rank(&g, origin, side, &c).unwrap();
        assert_ranking_sane(&hits, origin, limit);

        // Only nodes some opposite-side row points at can be reached.
        let reachable: HashSet<NodeId> = (0..8)
            .flat_map(|n| g.neighbors(n, side.opposite()).to_vec())
            .collect();
        for h in &hits {
            prop_assert!(reachable.contains(&h.node));
        }

        prop_assert_eq!(&hits, &rank(&g, origin, side, &c).unwrap());
    }
}
