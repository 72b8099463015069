//! Bipartite graph and weight generation.
//!
//! Every transaction is assigned `repetition` distinct buckets and one
//! non-zero weight per assignment. Detector and recipient must derive the
//! exact same tables, so generation is a pure function of
//! `(num_transactions, num_buckets, repetition, seed)`: a ChaCha20 stream
//! seeded from the configured seed, drawn in a fixed order.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::math::modular::T;
use crate::params::RetrievalConfig;

/// Bucket assignments and weights for every transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BipartiteGraph {
    /// `buckets[i]` holds the `repetition` distinct buckets of transaction i.
    pub buckets: Vec<Vec<usize>>,
    /// `weights[i][j]` is the weight of transaction i in bucket
    /// `buckets[i][j]`, always in `[1, t)`.
    pub weights: Vec<Vec<u64>>,
}

impl BipartiteGraph {
    /// Generates the tables for a retrieval configuration.
    ///
    /// Buckets are drawn uniformly with rejection until distinct (the
    /// configuration guarantees `repetition <= num_buckets`), weights
    /// uniformly in `[1, t)`. Draw order is per transaction, bucket before
    /// weight, so the stream is reproducible on both sides.
    pub fn generate(config: &RetrievalConfig) -> Self {
        debug_assert!(config.repetition <= config.num_buckets);
        let mut rng = ChaCha20Rng::seed_from_u64(config.graph_seed);

        let mut buckets = Vec::with_capacity(config.num_transactions);
        let mut weights = Vec::with_capacity(config.num_transactions);
        for _ in 0..config.num_transactions {
            let mut row = Vec::with_capacity(config.repetition);
            let mut row_weights = Vec::with_capacity(config.repetition);
            for _ in 0..config.repetition {
                let mut bucket = rng.gen_range(0..config.num_buckets);
                while row.contains(&bucket) {
                    bucket = rng.gen_range(0..config.num_buckets);
                }
                row.push(bucket);
                row_weights.push(rng.gen_range(1..T));
            }
            buckets.push(row);
            weights.push(row_weights);
        }
        Self { buckets, weights }
    }
}
