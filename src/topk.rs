//! Hit counting and ranking.

use crate::graph::NodeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// One ranked result: a node and how often walks landed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hit {
    pub node: NodeId,
    pub count: u64,
}

/// When a node was first hit: `(trial index, step index)`.
///
/// Independent of scheduling, so it gives a reproducible tie-break. No two nodes share
/// a key because each step records at most one hit.
pub type VisitKey = (u64, u64);

#[derive(Debug, Clone, Copy)]
struct Tally {
    count: u64,
    first: VisitKey,
}

/// Visitation counts for one ranking call.
#[derive(Debug, Clone, Default)]
pub struct HitCounter {
    tallies: HashMap<NodeId, Tally>,
    total: u64,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, node: NodeId, at: VisitKey) {
        self.total += 1;
        self.tallies
            .entry(node)
            .and_modify(|t| {
                t.count += 1;
                if at < t.first {
                    t.first = at;
                }
            })
            .or_insert(Tally { count: 1, first: at });
    }

    /// Sum counts and keep the earliest first-visit key. Commutative and associative.
    pub fn merge(mut self, other: HitCounter) -> HitCounter {
        let (mut big, small) = if self.tallies.len() >= other.tallies.len() {
            (std::mem::take(&mut self), other)
        } else {
            (other, self)
        };
        big.total += small.total;
        for (node, t) in small.tallies {
            big.tallies
                .entry(node)
                .and_modify(|b| {
                    b.count += t.count;
                    b.first = b.first.min(t.first);
                })
                .or_insert(t);
        }
        big
    }

    pub fn count(&self, node: NodeId) -> u64 {
        self.tallies.get(&node).map_or(0, |t| t.count)
    }

    pub fn first_visit(&self, node: NodeId) -> Option<VisitKey> {
        self.tallies.get(&node).map(|t| t.first)
    }

    /// Distinct nodes hit.
    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    /// Total hits recorded.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The `limit` most-hit nodes, count descending, earlier first visit winning ties.
    pub fn top(&self, limit: usize) -> Vec<Hit> {
        if limit == 0 || self.tallies.is_empty() {
            return Vec::new();
        }
        // Larger key ranks higher.
        let key = |t: &Tally| (t.count, Reverse(t.first));
        let mut heap = BinaryHeap::with_capacity(limit.min(self.tallies.len()) + 1);
        for (&node, t) in &self.tallies {
            let k = key(t);
            if heap.len() < limit {
                heap.push(Reverse((k, node)));
            } else if let Some(Reverse((min_key, _))) = heap.peek() {
                if k > *min_key {
                    heap.pop();
                    heap.push(Reverse((k, node)));
                }
            }
        }
        let mut ranked: Vec<((u64, Reverse<VisitKey>), NodeId)> =
            heap.into_iter().map(|Reverse(e)| e).collect();
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|((count, _), node)| Hit { node, count }).collect()
    }
}
