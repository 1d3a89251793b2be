//! Partitioned bipartite graph index.
//!
//! Each partition owns one LEFT and one RIGHT [`AdjacencyTable`]. Tables are built once
//! (by [`GraphIndex::load`] or [`IndexBuilder`]) and are immutable afterwards, so a
//! published [`GraphIndex`] can be shared across threads without locking.
//!
//! Lookup contract: a node with no row yields an empty [`Neighbors`] view. Cold-start
//! nodes are expected input, not faults.

use crate::graph::{BipartiteGraph, Neighbors, NodeId, PartitionId, Side};
use crate::partition::Partitioner;
use crate::Error;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::info;

pub const DEFAULT_PARTITION_METHOD: &str = "single_partition";

/// Failures while materializing partition tables. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("missing {side} table for {table}")]
    MissingTable { table: TableKey, side: Side },
    #[error("malformed adjacency for node {node} in {side} table of {table}: {reason}")]
    Malformed {
        table: TableKey,
        side: Side,
        node: NodeId,
        reason: String,
    },
    #[error("node {node} appears twice in {side} table of {table}")]
    DuplicateNode {
        table: TableKey,
        side: Side,
        node: NodeId,
    },
    #[error("load plan for method {0:?} names no partitions")]
    EmptyPlan(String),
}

/// Address of one partition's pair of side tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub method: String,
    pub partition: PartitionId,
}

impl TableKey {
    pub fn new(method: impl Into<String>, partition: PartitionId) -> Self {
        Self { method: method.into(), partition }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/partition_{}", self.method, self.partition)
    }
}

/// One stored row: a node id and its serialized adjacency list, e.g. `"[10, 11, 10]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacencyRow {
    pub node: NodeId,
    pub adjacency: String,
}

impl AdjacencyRow {
    pub fn new(node: NodeId, adjacency: impl Into<String>) -> Self {
        Self { node, adjacency: adjacency.into() }
    }

    /// Encode an already-decoded list in the stored list-literal form.
    pub fn encode(node: NodeId, adjacency: &[NodeId]) -> Self {
        let body: Vec<String> = adjacency.iter().map(|n| n.to_string()).collect();
        Self::new(node, format!("[{}]", body.join(", ")))
    }

    fn decode(&self) -> Result<Vec<NodeId>, String> {
        serde_json::from_str::<Vec<NodeId>>(self.adjacency.trim()).map_err(|e| e.to_string())
    }
}

/// Data-loading collaborator: hands over deserialized side tables.
pub trait AdjacencySource: Sync {
    /// Rows of `side` for `table`, or [`LoadError::MissingTable`].
    fn rows(&self, table: &TableKey, side: Side) -> Result<Vec<AdjacencyRow>, LoadError>;
}

/// In-memory [`AdjacencySource`], keyed by `(method, partition, side)`.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<(TableKey, Side), Vec<AdjacencyRow>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: TableKey, side: Side, rows: Vec<AdjacencyRow>) {
        self.tables.insert((table, side), rows);
    }

    /// Convenience for tests and fixtures: rows given as decoded lists.
    pub fn insert_lists<I>(&mut self, table: TableKey, side: Side, rows: I)
    where
        I: IntoIterator<Item = (NodeId, Vec<NodeId>)>,
    {
        let rows = rows
            .into_iter()
            .map(|(node, adj)| AdjacencyRow::encode(node, &adj))
            .collect();
        self.insert(table, side, rows);
    }
}

impl AdjacencySource for MemorySource {
    fn rows(&self, table: &TableKey, side: Side) -> Result<Vec<AdjacencyRow>, LoadError> {
        self.tables
            .get(&(table.clone(), side))
            .cloned()
            .ok_or_else(|| LoadError::MissingTable { table: table.clone(), side })
    }
}

/// Flat adjacency storage: every row is a contiguous range into one target buffer.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyTable {
    rows: HashMap<NodeId, (usize, usize)>,
    targets: Vec<NodeId>,
}

impl AdjacencyTable {
    /// Build from decoded rows. A node listed twice is rejected by the caller, not here;
    /// this constructor keeps the last row.
    pub fn from_lists<I>(lists: I) -> Self
    where
        I: IntoIterator<Item = (NodeId, Vec<NodeId>)>,
    {
        let mut table = Self::default();
        for (node, adj) in lists {
            let start = table.targets.len();
            table.targets.extend_from_slice(&adj);
            table.rows.insert(node, (start, adj.len()));
        }
        table
    }

    pub fn get(&self, node: NodeId) -> &[NodeId] {
        match self.rows.get(&node) {
            Some(&(start, len)) => &self.targets[start..start + len],
            None => &[],
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.rows.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.rows.keys().copied()
    }
}

/// One shard of the graph: a LEFT and a RIGHT table.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    id: PartitionId,
    left: AdjacencyTable,
    right: AdjacencyTable,
}

impl Partition {
    pub fn new(id: PartitionId, left: AdjacencyTable, right: AdjacencyTable) -> Self {
        Self { id, left, right }
    }

    /// Load both side tables of `table` from `source`.
    pub fn load<S: AdjacencySource + ?Sized>(source: &S, table: &TableKey) -> Result<Self, LoadError> {
        let left = load_side(source, table, Side::Left)?;
        let right = load_side(source, table, Side::Right)?;
        Ok(Self::new(table.partition, left, right))
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn table(&self, side: Side) -> &AdjacencyTable {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

fn load_side<S: AdjacencySource + ?Sized>(
    source: &S,
    table: &TableKey,
    side: Side,
) -> Result<AdjacencyTable, LoadError> {
    let rows = source.rows(table, side)?;
    let mut seen: HashSet<NodeId> = HashSet::with_capacity(rows.len());
    let mut lists = Vec::with_capacity(rows.len());
    for row in &rows {
        if !seen.insert(row.node) {
            return Err(LoadError::DuplicateNode { table: table.clone(), side, node: row.node });
        }
        let adj = row.decode().map_err(|reason| LoadError::Malformed {
            table: table.clone(),
            side,
            node: row.node,
            reason,
        })?;
        lists.push((row.node, adj));
    }
    let built = AdjacencyTable::from_lists(lists);
    info!(
        table = %table,
        side = %side,
        rows = built.len(),
        edges = built.edge_count(),
        "loaded side table"
    );
    Ok(built)
}

impl BipartiteGraph for Partition {
    fn neighbors(&self, node: NodeId, side: Side) -> Neighbors<'_> {
        Neighbors::from_slice(self.table(side).get(node))
    }

    fn node_count(&self, side: Side) -> usize {
        self.table(side).len()
    }
}

/// Which partitions of which partition method make up an index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoadPlan {
    pub method: String,
    pub partitions: Vec<PartitionId>,
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self { method: DEFAULT_PARTITION_METHOD.to_string(), partitions: vec![0] }
    }
}

impl LoadPlan {
    pub fn single(method: impl Into<String>, partition: PartitionId) -> Self {
        Self { method: method.into(), partitions: vec![partition] }
    }

    /// Every partition the strategy can produce.
    pub fn all_of(partitioner: &dyn Partitioner) -> Self {
        Self {
            method: partitioner.name().to_string(),
            partitions: (0..partitioner.partition_count()).collect(),
        }
    }
}

/// Immutable composition of one or more partitions.
///
/// `neighbors` concatenates a node's rows across partitions in partition order, so a
/// node whose edges were sharded by item still sees its full adjacency.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    method: String,
    partitions: Vec<Partition>,
}

impl GraphIndex {
    pub fn from_partitions(method: impl Into<String>, mut partitions: Vec<Partition>) -> Self {
        partitions.sort_by_key(|p| p.id);
        Self { method: method.into(), partitions }
    }

    /// Load every partition in `plan`. Either all partitions load or nothing is returned.
    pub fn load<S: AdjacencySource + ?Sized>(source: &S, plan: &LoadPlan) -> crate::Result<Self> {
        if plan.partitions.is_empty() {
            return Err(LoadError::EmptyPlan(plan.method.clone()).into());
        }
        let keys: Vec<TableKey> =
            plan.partitions.iter().map(|&p| TableKey::new(plan.method.clone(), p)).collect();

        #[cfg(feature = "parallel")]
        let loaded: Result<Vec<Partition>, LoadError> = {
            use rayon::prelude::*;
            keys.par_iter().map(|k| Partition::load(source, k)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let loaded: Result<Vec<Partition>, LoadError> =
            keys.iter().map(|k| Partition::load(source, k)).collect();

        let index = Self::from_partitions(plan.method.clone(), loaded?);
        info!(
            method = %index.method,
            partitions = index.partitions.len(),
            left_nodes = index.node_count(Side::Left),
            right_nodes = index.node_count(Side::Right),
            "published graph index"
        );
        Ok(index)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    /// Total adjacency entries on `side` across all partitions.
    ///
    /// Left and right counts agree for symmetric data, which [`IndexBuilder`] always produces.
    pub fn edge_count(&self, side: Side) -> usize {
        self.partitions.iter().map(|p| p.table(side).edge_count()).sum()
    }
}

impl BipartiteGraph for GraphIndex {
    fn neighbors(&self, node: NodeId, side: Side) -> Neighbors<'_> {
        let mut out = Neighbors::empty();
        for p in &self.partitions {
            out.push(p.table(side).get(node));
        }
        out
    }

    /// Counts rows, so a node present in several partitions is counted once per partition.
    fn node_count(&self, side: Side) -> usize {
        self.partitions.iter().map(|p| p.table(side).len()).sum()
    }
}

/// Shard a raw `(left, right)` edge list into partitions.
///
/// Each edge goes to the partition of its RIGHT endpoint (the item). Items with a
/// registered key (e.g. their text) are assigned by key, the rest by node id.
pub struct IndexBuilder<'p> {
    partitioner: &'p dyn Partitioner,
    edges: Vec<(NodeId, NodeId)>,
    item_keys: HashMap<NodeId, String>,
}

impl<'p> IndexBuilder<'p> {
    pub fn new(partitioner: &'p dyn Partitioner) -> Self {
        Self { partitioner, edges: Vec::new(), item_keys: HashMap::new() }
    }

    pub fn add_edge(&mut self, left: NodeId, right: NodeId) -> &mut Self {
        self.edges.push((left, right));
        self
    }

    pub fn extend_edges<I: IntoIterator<Item = (NodeId, NodeId)>>(&mut self, edges: I) -> &mut Self {
        self.edges.extend(edges);
        self
    }

    pub fn item_key(&mut self, item: NodeId, key: impl Into<String>) -> &mut Self {
        self.item_keys.insert(item, key.into());
        self
    }

    fn route(&self, item: NodeId) -> PartitionId {
        match self.item_keys.get(&item) {
            Some(key) => self.partitioner.assign(key),
            None => self.partitioner.assign_node(item),
        }
    }

    /// Fails with [`Error::Configuration`] if the partitioner assigns an id outside
    /// `0..partition_count`.
    pub fn build(&self) -> crate::Result<GraphIndex> {
        let count = self.partitioner.partition_count().max(1) as usize;
        let mut left: Vec<HashMap<NodeId, Vec<NodeId>>> = vec![HashMap::new(); count];
        let mut right: Vec<HashMap<NodeId, Vec<NodeId>>> = vec![HashMap::new(); count];
        for &(l, r) in &self.edges {
            let p = self.route(r) as usize;
            if p >= count {
                return Err(Error::Configuration(format!(
                    "partitioner {} assigned item {r} to partition {p} of {count}",
                    self.partitioner.name()
                )));
            }
            left[p].entry(l).or_default().push(r);
            right[p].entry(r).or_default().push(l);
        }
        let partitions = left
            .into_iter()
            .zip(right)
            .enumerate()
            .map(|(i, (l, r))| {
                Partition::new(
                    i as PartitionId,
                    AdjacencyTable::from_lists(l),
                    AdjacencyTable::from_lists(r),
                )
            })
            .collect();
        Ok(GraphIndex::from_partitions(self.partitioner.name(), partitions))
    }

    /// Export the sharded tables in stored form, ready for [`GraphIndex::load`].
    pub fn to_source(&self) -> crate::Result<MemorySource> {
        let index = self.build()?;
        let mut source = MemorySource::new();
        for p in index.partitions() {
            for side in Side::BOTH {
                let t = p.table(side);
                let rows = t.nodes().map(|n| AdjacencyRow::encode(n, t.get(n))).collect();
                source.insert(TableKey::new(index.method(), p.id()), side, rows);
            }
        }
        Ok(source)
    }
}
