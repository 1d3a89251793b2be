//! `salsarec`: SALSA-style recommendations over a partitioned bipartite graph.
//!
//! Given a seed node on either side of an actor–item graph, many random walks with
//! restart estimate which same-side nodes are most strongly co-reachable from it.
//!
//! Public invariants (must not drift):
//! - **Immutability**: a [`GraphIndex`] is never mutated after it is built; reads are lock-free.
//! - **Cold start is not an error**: unknown or isolated seeds produce an empty ranking.
//! - **Determinism**: fixed `(config, seed)` gives the same ranking for any thread count.
//! - **Side discipline**: walks alternate sides; only origin-side nodes are ranked, and the
//!   origin itself never is.
//!
//! Swappable (allowed to change without breaking the contract):
//! - worker-pool strategy (serial vs parallel)
//! - partition assignment strategy (any [`Partitioner`])
//! - adjacency storage layout

pub mod cancel;
pub mod graph;
pub mod index;
pub mod partition;
pub mod recommend;
pub mod salsa;
pub mod topk;

pub use cancel::{CancelReason, CancelToken, Cancellation};
pub use graph::{BipartiteGraph, Neighbors, NodeId, PartitionId, Side};
pub use index::{
    AdjacencyRow, AdjacencySource, AdjacencyTable, GraphIndex, IndexBuilder, LoadError, LoadPlan,
    MemorySource, Partition, TableKey, DEFAULT_PARTITION_METHOD,
};
pub use partition::{
    normalize_text, random_projection, Embedder, EmbeddingPartitioner, ModuloPartitioner,
    Partitioner, PartitionerConfig, SinglePartition,
};
pub use recommend::{
    ContentLookup, IdentifierLookup, LookupError, NoContent, RecommendOptions, Recommendation,
    Recommender,
};
pub use salsa::{
    rank, rank_cancellable, rank_run, sample_walk, SalsaConfig, SalsaRun, WalkStats, WalkStep,
};
pub use topk::{Hit, HitCounter};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Startup-time misconfiguration; nothing should be served until it is fixed.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("ranking cancelled: {0}")]
    Cancelled(CancelReason),
}

impl Error {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
