//! Parameter sets for oblivious message retrieval.
//!
//! This module fixes the cryptographic parameters of the detector pipeline:
//! the BFV degree and modulus-switch ladder, the PVW clue parameters, and the
//! positions in the ladder where each pipeline phase runs. It also defines
//! [`RetrievalConfig`], the per-run configuration shared by detector and
//! recipient (message count, bucket system, graph seed).
//!
//! # Overview
//!
//! All plaintext arithmetic happens over GF(t) with `t = 65537`. A single BFV
//! ciphertext packs `degree` plaintext slots; the detector consumes clues in
//! batches of `degree` messages. The ladder is consumed front-to-back: the
//! homomorphic range check burns most of it, slot expansion and digest
//! accumulation run near the bottom, and the serialized digest is switched to
//! the very last rung to minimize its size.
//!
//! # Example
//!
//! ```no_run
//! use omr::params::{OmrParams, RetrievalConfig};
//!
//! let params = OmrParams::recommended().unwrap();
//! let config = RetrievalConfig::recommended(65536);
//! config.validate(&params).unwrap();
//! ```

use std::sync::Arc;

use fhe::bfv::{BfvParameters, BfvParametersBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{OmrError, Result};
use crate::pvw::PvwParameters;

/// Plaintext modulus t. Prime, and t − 1 = 2^16, so SIMD batching works for
/// any power-of-two degree up to 32768.
pub const PLAINTEXT_MODULUS: u64 = 65537;

/// Bits carried by one plaintext slot when bit-packing indicators.
pub const SLOT_BITS: usize = 16;

/// Coefficient-modulus ladder, in bits, front-to-back. Fifteen rungs; the
/// final digest lives on the first (28-bit) rung alone.
pub const MODULUS_LADDER_BITS: [usize; 15] =
    [28, 39, 60, 60, 60, 60, 60, 60, 60, 60, 60, 60, 32, 30, 60];

/// Cryptographic parameters shared by every run.
///
/// Construct via [`OmrParams::recommended`] (degree 32768) or
/// [`OmrParams::with_degree`] for reduced test sizes.
///
/// # Fields
///
/// * `degree` - BFV polynomial degree D, a power of two
/// * `bfv` - Shared BFV parameter set built from the fixed ladder
/// * `pvw` - PVW clue parameters
/// * `range_bound` - Half-width r of the decryption interval
/// * `level_sic` / `level_expand` / `level_accumulate` - Ladder positions of
///   the pipeline phases
///
/// # Example
///
/// ```
/// use omr::params::OmrParams;
///
/// let params = OmrParams::with_degree(2048).unwrap();
/// assert!(params.validate().is_ok());
/// assert_eq!(params.range_bound, 850);
/// ```
#[derive(Clone)]
pub struct OmrParams {
    /// BFV polynomial degree D (power of two). One detector batch covers
    /// `degree` messages.
    pub degree: usize,
    /// Shared BFV parameter set (degree, ladder, plaintext modulus t).
    pub bfv: Arc<BfvParameters>,
    /// PVW clue parameters.
    pub pvw: PvwParameters,
    /// Half-width r of the symmetric decryption interval [−r, r).
    pub range_bound: u64,
    /// Ladder level at which the range check leaves the selection-indicator
    /// ciphertext.
    pub level_sic: usize,
    /// Ladder level for slot expansion (masking and source rotation).
    pub level_expand: usize,
    /// Ladder level at which index packers and the payload compressor
    /// accumulate.
    pub level_accumulate: usize,
}

impl OmrParams {
    /// Creates the production parameter set: degree 32768 with the full
    /// 15-rung ladder.
    ///
    /// # Returns
    ///
    /// A validated `OmrParams` with:
    /// - `degree`: 32768
    /// - `pvw`: the default PVW set (n=450, ell=4, σ=1.3, 16000 samples)
    /// - `range_bound`: 850
    /// - ladder levels 8 / 10 / 12 for range check, expansion, accumulation
    ///
    /// # Example
    ///
    /// ```no_run
    /// use omr::params::OmrParams;
    ///
    /// let params = OmrParams::recommended().unwrap();
    /// assert_eq!(params.degree, 32768);
    /// ```
    pub fn recommended() -> Result<Self> {
        Self::with_degree(32768)
    }

    /// Creates the same ladder at a smaller degree.
    ///
    /// Intended for tests; the PVW secret-key tiling requires
    /// `pvw.n.next_power_of_two()` to divide `degree/2`, so 1024 is the
    /// smallest usable degree with the default PVW set.
    ///
    /// # Arguments
    ///
    /// * `degree` - BFV polynomial degree, a power of two
    ///
    /// # Returns
    ///
    /// A validated `OmrParams` at the requested degree.
    ///
    /// # Errors
    ///
    /// [`OmrError::ParameterMismatch`] when the degree violates a structural
    /// constraint (see [`validate`](Self::validate)) or the BFV parameter
    /// build fails.
    ///
    /// # Example
    ///
    /// ```
    /// use omr::params::OmrParams;
    ///
    /// let params = OmrParams::with_degree(2048).unwrap();
    /// assert_eq!(params.degree, 2048);
    /// ```
    pub fn with_degree(degree: usize) -> Result<Self> {
        let bfv = BfvParametersBuilder::new()
            .set_degree(degree)
            .set_plaintext_modulus(PLAINTEXT_MODULUS)
            .set_moduli_sizes(&MODULUS_LADDER_BITS)
            .build()
            .map_err(|e| OmrError::ParameterMismatch(e.to_string()))?;

        let params = Self {
            degree,
            bfv: Arc::new(bfv),
            pvw: PvwParameters::default(),
            range_bound: 850,
            level_sic: 8,
            level_expand: 10,
            level_accumulate: 12,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the structural constraints the pipeline relies on.
    ///
    /// Verifies that:
    /// - `degree` is a power of two small enough for SIMD batching modulo t
    /// - the PVW tile width divides half the degree
    /// - the ladder levels descend through the pipeline and leave room for
    ///   the final switch
    ///
    /// # Returns
    ///
    /// `Ok(())` if all constraints are satisfied.
    ///
    /// # Errors
    ///
    /// [`OmrError::ParameterMismatch`] naming the violated constraint.
    ///
    /// # Example
    ///
    /// ```
    /// use omr::params::OmrParams;
    ///
    /// let params = OmrParams::with_degree(2048).unwrap();
    /// assert!(params.validate().is_ok());
    ///
    /// // a degree that breaks the PVW tiling fails validation
    /// let invalid = OmrParams { degree: 256, ..params };
    /// assert!(invalid.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !self.degree.is_power_of_two() {
            return Err(OmrError::ParameterMismatch(
                "degree must be a power of two".into(),
            ));
        }
        if (PLAINTEXT_MODULUS - 1) % (2 * self.degree as u64) != 0 {
            return Err(OmrError::ParameterMismatch(
                "degree too large for SIMD batching modulo t".into(),
            ));
        }
        let tile = self.pvw.n.next_power_of_two();
        if self.degree / 2 % tile != 0 {
            return Err(OmrError::ParameterMismatch(format!(
                "PVW tile width {tile} must divide half the degree {}",
                self.degree / 2
            )));
        }
        if self.level_sic >= self.level_expand || self.level_expand >= self.level_accumulate {
            return Err(OmrError::ParameterMismatch(
                "ladder levels must descend through the pipeline".into(),
            ));
        }
        if self.level_accumulate >= MODULUS_LADDER_BITS.len() - 1 {
            return Err(OmrError::ParameterMismatch(
                "accumulation level must leave room for the final switch".into(),
            ));
        }
        Ok(())
    }
}

/// Per-run retrieval configuration.
///
/// The same value must reach detector and recipient: the bipartite graph and
/// weight table are derived from it deterministically, and the bit-packing
/// conventions depend on `num_transactions`.
///
/// # Fields
///
/// * `num_transactions` - Total messages N on the bulletin board
/// * `pertinent_bound` - Design-time bound on the pertinent count K
/// * `payload_slots` - Payload width L in plaintext slots
/// * `num_buckets` - Buckets M in the payload linear system
/// * `repetition` - Distinct buckets per transaction
/// * `graph_seed` - Seed of the bipartite graph and weights
/// * `layers` - Repetition layers C of the randomized packer
/// * `expansion_step` - Messages per slot-expansion round
///
/// # Example
///
/// ```
/// use omr::params::RetrievalConfig;
///
/// let config = RetrievalConfig::recommended(65536);
/// assert_eq!(config.payload_slots, 306);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Total number of transactions N on the bulletin board.
    pub num_transactions: usize,
    /// Design-time bound on the pertinent-message count K. The bucket system
    /// admits a solvable linear system with overwhelming probability while
    /// K stays at or below this.
    pub pertinent_bound: usize,
    /// Payload width L in plaintext slots (two bytes per slot).
    pub payload_slots: usize,
    /// Number of buckets M in the payload linear system.
    pub num_buckets: usize,
    /// Distinct buckets assigned to each transaction.
    pub repetition: usize,
    /// Seed of the bipartite graph and weight table.
    pub graph_seed: u64,
    /// Repetition layers C of the randomized index packer.
    pub layers: usize,
    /// Messages handled per slot-expansion round.
    pub expansion_step: usize,
}

impl RetrievalConfig {
    /// Creates the default retrieval configuration for N transactions.
    ///
    /// # Arguments
    ///
    /// * `num_transactions` - Total messages N on the bulletin board
    ///
    /// # Returns
    ///
    /// A new `RetrievalConfig` with:
    /// - `payload_slots`: 306 (612-byte payloads)
    /// - `num_buckets`: 100, `repetition`: 5, `pertinent_bound`: 50
    /// - `graph_seed`: 3, `layers`: 5, `expansion_step`: 32
    ///
    /// # Example
    ///
    /// ```
    /// use omr::params::RetrievalConfig;
    ///
    /// let config = RetrievalConfig::recommended(65536);
    /// assert_eq!(config.num_transactions, 65536);
    /// assert_eq!(config.num_buckets, 100);
    /// ```
    pub fn recommended(num_transactions: usize) -> Self {
        Self {
            num_transactions,
            pertinent_bound: 50,
            payload_slots: 306,
            num_buckets: 100,
            repetition: 5,
            graph_seed: 3,
            layers: 5,
            expansion_step: 32,
        }
    }

    /// Checks this configuration against a parameter set.
    ///
    /// Verifies that:
    /// - `repetition` does not exceed the bucket count
    /// - the bucket system fits in one ciphertext's slots
    /// - the run is a whole number of `degree`-slot batches
    /// - the expansion step divides the degree
    /// - at least one randomized layer is configured
    ///
    /// # Arguments
    ///
    /// * `params` - The cryptographic parameters the run will use
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration fits the parameter set.
    ///
    /// # Errors
    ///
    /// [`OmrError::ParameterMismatch`] naming the violated constraint.
    ///
    /// # Example
    ///
    /// ```
    /// use omr::params::{OmrParams, RetrievalConfig};
    ///
    /// let params = OmrParams::with_degree(2048).unwrap();
    ///
    /// // the full-size bucket system does not fit in 2048 slots
    /// let config = RetrievalConfig::recommended(4096);
    /// assert!(config.validate(&params).is_err());
    ///
    /// let mut scaled = config;
    /// scaled.num_buckets = 6;
    /// assert!(scaled.validate(&params).is_ok());
    /// ```
    pub fn validate(&self, params: &OmrParams) -> Result<()> {
        if self.repetition > self.num_buckets {
            return Err(OmrError::ParameterMismatch(format!(
                "repetition {} exceeds bucket count {}",
                self.repetition, self.num_buckets
            )));
        }
        if self.num_buckets * self.payload_slots > params.degree {
            return Err(OmrError::ParameterMismatch(format!(
                "bucket system {}x{} does not fit in {} slots",
                self.num_buckets, self.payload_slots, params.degree
            )));
        }
        if self.num_transactions % params.degree != 0 {
            return Err(OmrError::ParameterMismatch(format!(
                "transaction count {} is not a whole number of {}-slot batches",
                self.num_transactions, params.degree
            )));
        }
        if self.expansion_step == 0 || params.degree % self.expansion_step != 0 {
            return Err(OmrError::ParameterMismatch(format!(
                "expansion step {} must divide the degree {}",
                self.expansion_step, params.degree
            )));
        }
        if self.layers == 0 {
            return Err(OmrError::ParameterMismatch(
                "randomized packer needs at least one layer".into(),
            ));
        }
        Ok(())
    }

    /// Computes the number of `degree`-slot batches covering the run.
    ///
    /// # Arguments
    ///
    /// * `params` - The cryptographic parameters the run will use
    ///
    /// # Returns
    ///
    /// `num_transactions / degree`.
    ///
    /// # Example
    ///
    /// ```
    /// use omr::params::{OmrParams, RetrievalConfig};
    ///
    /// let params = OmrParams::with_degree(2048).unwrap();
    /// let config = RetrievalConfig::recommended(4096);
    /// assert_eq!(config.num_batches(&params), 2);
    /// ```
    pub fn num_batches(&self, params: &OmrParams) -> usize {
        self.num_transactions / params.degree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_params_valid() {
        let params = OmrParams::with_degree(2048).unwrap();
        assert_eq!(params.degree, 2048);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_config_fits() {
        let params = OmrParams::with_degree(2048).unwrap();
        let config = RetrievalConfig::recommended(4096);
        // 100 buckets x 306 slots does not fit in 2048 slots
        assert!(config.validate(&params).is_err());

        let mut small = config;
        small.num_buckets = 6;
        assert!(small.validate(&params).is_ok());
        assert_eq!(small.num_batches(&params), 2);
    }

    #[test]
    fn test_ragged_batch_rejected() {
        let params = OmrParams::with_degree(2048).unwrap();
        let mut config = RetrievalConfig::recommended(2048 + 17);
        config.num_buckets = 6;
        assert!(config.validate(&params).is_err());
    }
}
