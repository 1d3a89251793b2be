//! Bipartite graph adapter types.
//!
//! The two sides are structurally identical but never mixed: a neighbor lookup on
//! [`Side::Left`] always yields ids that live on [`Side::Right`], and vice versa.

use smallvec::SmallVec;

/// Node identifier, unique within its side (and partition).
pub type NodeId = u64;

/// Partition identifier in `[0, partition_count)`.
pub type PartitionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Side {
    /// Actors (e.g. users).
    Left,
    /// Items (e.g. content).
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A borrowed view over a node's adjacency, possibly spread across partitions.
///
/// Lookups stay allocation-free for up to four partitions. Order is partition order,
/// then insertion order within each partition; duplicates are kept (edge multiplicity).
#[derive(Debug, Clone, Default)]
pub struct Neighbors<'a> {
    parts: SmallVec<[&'a [NodeId]; 4]>,
    len: usize,
}

impl<'a> Neighbors<'a> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_slice(slice: &'a [NodeId]) -> Self {
        let mut n = Self::default();
        n.push(slice);
        n
    }

    pub(crate) fn push(&mut self, slice: &'a [NodeId]) {
        if !slice.is_empty() {
            self.len += slice.len();
            self.parts.push(slice);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positional access over the concatenated view.
    pub fn get(&self, mut i: usize) -> Option<NodeId> {
        for part in &self.parts {
            if i < part.len() {
                return Some(part[i]);
            }
            i -= part.len();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parts.iter().flat_map(|p| p.iter().copied())
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.iter().collect()
    }
}

/// Read-only bipartite adjacency.
///
/// Unknown nodes are a normal condition: `neighbors` returns an empty view, never an error.
pub trait BipartiteGraph {
    fn neighbors(&self, node: NodeId, side: Side) -> Neighbors<'_>;

    /// Number of nodes with an adjacency row on `side`.
    fn node_count(&self, side: Side) -> usize;

    fn degree(&self, node: NodeId, side: Side) -> usize {
        self.neighbors(node, side).len()
    }
}

impl<G: BipartiteGraph + ?Sized> BipartiteGraph for &G {
    fn neighbors(&self, node: NodeId, side: Side) -> Neighbors<'_> {
        (**self).neighbors(node, side)
    }

    fn node_count(&self, side: Side) -> usize {
        (**self).node_count(side)
    }
}

impl<G: BipartiteGraph + ?Sized> BipartiteGraph for std::sync::Arc<G> {
    fn neighbors(&self, node: NodeId, side: Side) -> Neighbors<'_> {
        (**self).neighbors(node, side)
    }

    fn node_count(&self, side: Side) -> usize {
        (**self).node_count(side)
    }
}
