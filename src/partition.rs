//! Partition assignment strategies.
//!
//! A [`Partitioner`] maps an item identifier (or the item's text) to a partition id.
//! Every implementation is deterministic and side-effect free. Misconfiguration is
//! reported by the constructor; `assign` itself never fails.
//!
//! Strategies:
//! - [`SinglePartition`]: everything lives in partition 0.
//! - [`ModuloPartitioner`]: numeric ids modulo `partition_count`, other keys hashed first.
//! - [`EmbeddingPartitioner`]: sign bits of a projected document vector (random hyperplanes),
//!   read most-significant-first. Requires `partition_count = 2^b`.

use crate::graph::{NodeId, PartitionId};
use crate::{Error, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use xxhash_rust::xxh64::xxh64;

/// Seed for hashing non-numeric item keys in [`ModuloPartitioner`].
const KEY_HASH_SEED: u64 = 0;

pub trait Partitioner: Send + Sync {
    /// Partition method name, used to address on-disk layouts.
    fn name(&self) -> &str;

    fn partition_count(&self) -> u32;

    fn assign(&self, item: &str) -> PartitionId;

    /// Route a bare node id. Strategies that key on content see the decimal id as text.
    fn assign_node(&self, node: NodeId) -> PartitionId {
        self.assign(&node.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartition;

impl Partitioner for SinglePartition {
    fn name(&self) -> &str {
        "single_partition"
    }

    fn partition_count(&self) -> u32 {
        1
    }

    fn assign(&self, _item: &str) -> PartitionId {
        0
    }

    fn assign_node(&self, _node: NodeId) -> PartitionId {
        0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModuloPartitioner {
    partition_count: u32,
}

impl ModuloPartitioner {
    pub fn new(partition_count: u32) -> Result<Self> {
        if partition_count == 0 {
            return Err(Error::Configuration(
                "modulo partitioner needs partition_count >= 1".to_string(),
            ));
        }
        Ok(Self { partition_count })
    }
}

impl Partitioner for ModuloPartitioner {
    fn name(&self) -> &str {
        "modulo"
    }

    fn partition_count(&self) -> u32 {
        self.partition_count
    }

    fn assign(&self, item: &str) -> PartitionId {
        match item.trim().parse::<NodeId>() {
            Ok(node) => self.assign_node(node),
            Err(_) => {
                // Seeded xxh64: the on-disk layout depends on this staying fixed.
                (xxh64(item.as_bytes(), KEY_HASH_SEED) % u64::from(self.partition_count))
                    as PartitionId
            }
        }
    }

    fn assign_node(&self, node: NodeId) -> PartitionId {
        (node % u64::from(self.partition_count)) as PartitionId
    }
}

/// External document-embedding model.
///
/// Its scoring logic is opaque to this crate; only the vector shape matters.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Content-aware partitioning via random-hyperplane sign bits.
///
/// `projection` has one row per embedding dimension and at least `log2(partition_count)`
/// columns. Bit `j` is `embed(text) · projection[.., j] > 0`; the first `b` bits form the
/// partition id, bit 0 being the most significant.
pub struct EmbeddingPartitioner<E> {
    embedder: E,
    projection: Vec<Vec<f32>>,
    partition_count: u32,
    bits: u32,
    normalize: bool,
}

impl<E: Embedder> EmbeddingPartitioner<E> {
    pub fn new(
        embedder: E,
        projection: Vec<Vec<f32>>,
        partition_count: u32,
        normalize: bool,
    ) -> Result<Self> {
        if partition_count == 0 || !partition_count.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "embedding partitioner needs a power-of-two partition_count (got {partition_count})"
            )));
        }
        let bits = partition_count.trailing_zeros();
        let dim = embedder.dimension();
        if projection.len() != dim {
            return Err(Error::Configuration(format!(
                "projection has {} rows but embedder dimension is {dim}",
                projection.len()
            )));
        }
        if let Some(row) = projection.iter().find(|r| r.len() < bits as usize) {
            return Err(Error::Configuration(format!(
                "projection rows need at least {bits} columns (found {})",
                row.len()
            )));
        }
        if projection.iter().flatten().any(|x| !x.is_finite()) {
            return Err(Error::Configuration(
                "projection entries must be finite".to_string(),
            ));
        }
        Ok(Self { embedder, projection, partition_count, bits, normalize })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn sign_bits(&self, vector: &[f32]) -> PartitionId {
        let mut id: PartitionId = 0;
        for j in 0..self.bits as usize {
            let dot: f32 = vector
                .iter()
                .zip(self.projection.iter())
                .map(|(&v, row)| v * row[j])
                .sum();
            id = (id << 1) | PartitionId::from(dot > 0.0);
        }
        id
    }
}

impl<E: Embedder> Partitioner for EmbeddingPartitioner<E> {
    fn name(&self) -> &str {
        "embedding"
    }

    fn partition_count(&self) -> u32 {
        self.partition_count
    }

    fn assign(&self, item: &str) -> PartitionId {
        if self.bits == 0 {
            return 0;
        }
        let vector = if self.normalize {
            self.embedder.embed(&normalize_text(item))
        } else {
            self.embedder.embed(item)
        };
        self.sign_bits(&vector)
    }
}

/// Case-fold words and flatten purely numeric words to `0`.
///
/// Keeps embedding input stable across ids, prices and casing noise.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            if word.chars().all(|c| c.is_numeric()) {
                "0".to_string()
            } else {
                word.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Random hyperplanes for [`EmbeddingPartitioner`]: `dimension` rows of `bits` entries
/// drawn uniformly from `[-1, 1)`.
pub fn random_projection(dimension: usize, bits: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..dimension)
        .map(|_| (0..bits).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect()
}

/// Configuration-time strategy selection for the dependency-free partitioners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "method", rename_all = "snake_case"))]
pub enum PartitionerConfig {
    #[default]
    Single,
    Modulo { partition_count: u32 },
}

impl PartitionerConfig {
    pub fn build(self) -> Result<Box<dyn Partitioner>> {
        match self {
            PartitionerConfig::Single => Ok(Box::new(SinglePartition)),
            PartitionerConfig::Modulo { partition_count } => {
                Ok(Box::new(ModuloPartitioner::new(partition_count)?))
            }
        }
    }
}
