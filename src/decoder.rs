//! Recipient-side decoding.
//!
//! The recipient decrypts the digest, recovers the set of pertinent indices,
//! rebuilds the sparse coefficient matrix from the shared bipartite graph,
//! and solves for the payloads over GF(t).
//!
//! Index recovery is a walk over decrypted slot values with an explicit
//! (slot, bit) cursor; each recovered index is assigned the next column of
//! the linear system in discovery order. Results are returned sorted by
//! transaction index.

use std::collections::BTreeMap;

use fhe::bfv::{Ciphertext, Encoding, SecretKey};
use fhe_traits::{FheDecoder, FheDecrypter};
use rand::{CryptoRng, RngCore};

use crate::digest::{DigestOmr2, DigestOmr3, OmdDigest};
use crate::error::{OmrError, Result};
use crate::graph::BipartiteGraph;
use crate::keys::DetectionKey;
use crate::math::modular::T;
use crate::math::solver;
use crate::params::{OmrParams, RetrievalConfig, SLOT_BITS};
use crate::pvw::{PvwPublicKey, PvwSecretKey};

/// One recovered message: its bulletin-board index and payload slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMessage {
    pub index: u64,
    pub payload: Vec<u64>,
}

/// The recipient: owns both secret keys and decodes digests.
pub struct Recipient {
    params: OmrParams,
    config: RetrievalConfig,
    graph: BipartiteGraph,
    bfv_sk: SecretKey,
    pvw_sk: PvwSecretKey,
}

impl Recipient {
    /// Generates fresh BFV and PVW secret keys for a run configuration.
    pub fn generate<R: RngCore + CryptoRng>(
        params: OmrParams,
        config: RetrievalConfig,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate(&params)?;
        let bfv_sk = SecretKey::random(&params.bfv, rng);
        let pvw_sk = PvwSecretKey::random(&params.pvw, rng);
        let graph = BipartiteGraph::generate(&config);
        Ok(Self { params, config, graph, bfv_sk, pvw_sk })
    }

    pub fn params(&self) -> &OmrParams {
        &self.params
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The PVW public key senders address clues to.
    pub fn pvw_public_key<R: RngCore>(&self, rng: &mut R) -> PvwPublicKey {
        self.pvw_sk.public_key(rng)
    }

    /// Derives the public detection key handed to the detector.
    pub fn detection_key<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<DetectionKey> {
        DetectionKey::generate(&self.params, &self.bfv_sk, &self.pvw_sk, rng)
    }

    fn decode_slots(&self, ct: &Ciphertext) -> Result<Vec<u64>> {
        let pt = self.bfv_sk.try_decrypt(ct)?;
        Ok(Vec::<u64>::try_decode(&pt, Encoding::simd())?)
    }

    /// Decodes a detection-only digest into the sorted pertinent indices.
    pub fn decode_omd(&self, digest: &OmdDigest) -> Result<Vec<u64>> {
        let slots = self.decode_slots(&digest.indicators)?;
        Ok(unpack_batch_indices(&slots, self.params.degree, self.config.num_transactions))
    }

    /// Decodes a deterministic-packing digest into recovered messages.
    pub fn decode_omr2(&self, digest: &DigestOmr2) -> Result<Vec<RecoveredMessage>> {
        let lhs_slots = self.decode_slots(&digest.lhs)?;
        let pertinent = unpack_bit_indices(&lhs_slots, self.config.num_transactions);
        let rhs_slots = self.decode_slots(&digest.rhs)?;
        self.recover_payloads(&pertinent, &rhs_slots)
    }

    /// Decodes a randomized-packing digest into recovered messages.
    pub fn decode_omr3(&self, digest: &DigestOmr3) -> Result<Vec<RecoveredMessage>> {
        let mut layers = Vec::with_capacity(digest.layers.len());
        for layer in &digest.layers {
            layers.push((
                self.decode_slots(&layer.hi)?,
                self.decode_slots(&layer.lo)?,
                self.decode_slots(&layer.counter)?,
            ));
        }
        let pertinent = recover_randomized_indices(&layers, self.config.num_transactions)?;
        let rhs_slots = self.decode_slots(&digest.rhs)?;
        self.recover_payloads(&pertinent, &rhs_slots)
    }

    /// Builds and solves the bucket system for a recovered index set.
    fn recover_payloads(
        &self,
        pertinent: &BTreeMap<u64, usize>,
        rhs_slots: &[u64],
    ) -> Result<Vec<RecoveredMessage>> {
        let width = self.config.payload_slots;
        let buckets = self.config.num_buckets;

        let rhs: Vec<Vec<u64>> = (0..buckets)
            .map(|b| rhs_slots[b * width..(b + 1) * width].to_vec())
            .collect();

        let mut lhs = vec![vec![0u64; pertinent.len()]; buckets];
        for (&index, &column) in pertinent {
            let index = index as usize;
            for (bucket, &weight) in self.graph.buckets[index]
                .iter()
                .zip(&self.graph.weights[index])
            {
                lhs[*bucket][column] = weight;
            }
        }

        let solution = solver::solve(lhs, rhs, width)?;
        Ok(pertinent
            .iter()
            .map(|(&index, &column)| RecoveredMessage {
                index,
                payload: solution[column].clone(),
            })
            .collect())
    }
}

/// Walks the OMD bit packing: slot s of the digest carries, in bit position
/// b, the indicator of message `b·degree + s`. Returns sorted indices.
pub(crate) fn unpack_batch_indices(slots: &[u64], degree: usize, num_transactions: usize) -> Vec<u64> {
    let mut indices = Vec::new();
    for (slot, &value) in slots.iter().enumerate() {
        let mut value = value;
        let mut bit = 0u64;
        while value != 0 {
            if value & 1 == 1 {
                let index = bit * degree as u64 + slot as u64;
                if index < num_transactions as u64 {
                    indices.push(index);
                }
            }
            value >>= 1;
            bit += 1;
        }
    }
    indices.sort_unstable();
    indices
}

/// Walks the deterministic run-positional packing: slot `i / 16`, bit
/// `i mod 16`, least-significant bit first. Columns are assigned in walk
/// order, which is ascending index order.
pub(crate) fn unpack_bit_indices(slots: &[u64], num_transactions: usize) -> BTreeMap<u64, usize> {
    let mut pertinent = BTreeMap::new();
    let mut column = 0usize;
    let occupied = num_transactions.div_ceil(SLOT_BITS);
    for (slot, &value) in slots.iter().enumerate().take(occupied) {
        for bit in 0..SLOT_BITS {
            let index = slot * SLOT_BITS + bit;
            if index >= num_transactions {
                break;
            }
            if value >> bit & 1 == 1 {
                pertinent.insert(index as u64, column);
                column += 1;
            }
        }
    }
    pertinent
}

/// Recovers indices from the randomized layers: layer 0's counters give the
/// total pertinent count K; every slot whose counter is exactly 1 reveals
/// one index as `hi·t + lo`. Scanning stops once K distinct indices are
/// seen.
///
/// # Errors
///
/// [`OmrError::Overflow`] when all layers are exhausted first.
pub(crate) fn recover_randomized_indices(
    layers: &[(Vec<u64>, Vec<u64>, Vec<u64>)],
    num_transactions: usize,
) -> Result<BTreeMap<u64, usize>> {
    let expected: u64 = layers
        .first()
        .map(|(_, _, counter)| counter.iter().sum())
        .unwrap_or(0);
    let expected = expected as usize;

    let mut pertinent = BTreeMap::new();
    let mut column = 0usize;
    'layers: for (hi, lo, counter) in layers {
        for slot in 0..counter.len() {
            if counter[slot] != 1 {
                continue;
            }
            let index = hi[slot] * T + lo[slot];
            if index >= num_transactions as u64 {
                continue;
            }
            if let std::collections::btree_map::Entry::Vacant(entry) = pertinent.entry(index) {
                entry.insert(column);
                column += 1;
                if column == expected {
                    break 'layers;
                }
            }
        }
    }

    if column != expected {
        return Err(OmrError::Overflow { expected, found: column });
    }
    Ok(pertinent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_bit_indices_roundtrip() {
        // pack a known indicator vector the way the detector does, then walk
        let n = 200;
        let pertinent = [0usize, 15, 16, 17, 100, 199];
        let mut slots = vec![0u64; 32];
        for &i in &pertinent {
            slots[i / SLOT_BITS] += 1 << (i % SLOT_BITS);
        }

        let decoded = unpack_bit_indices(&slots, n);
        let indices: Vec<u64> = decoded.keys().copied().collect();
        assert_eq!(indices, vec![0, 15, 16, 17, 100, 199]);
        // columns follow discovery order
        let columns: Vec<usize> = decoded.values().copied().collect();
        assert_eq!(columns, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_unpack_bit_indices_ignores_tail() {
        // bits past num_transactions never yield indices
        let slots = vec![u64::from(u16::MAX); 4];
        let decoded = unpack_bit_indices(&slots, 20);
        assert_eq!(decoded.len(), 20);
    }

    #[test]
    fn test_unpack_batch_indices() {
        let degree = 8;
        // slot 3 holds bits 0 and 2 -> indices 3 and 2*8+3; slot 5 bit 1 -> 8+5
        let mut slots = vec![0u64; degree];
        slots[3] = 0b101;
        slots[5] = 0b010;
        let decoded = unpack_batch_indices(&slots, degree, 3 * degree);
        assert_eq!(decoded, vec![3, 13, 19]);
    }

    #[test]
    fn test_randomized_recovery_single_layer() {
        let degree = 16;
        let indices = [5u64, 70000, 131075];
        let mut hi = vec![0u64; degree];
        let mut lo = vec![0u64; degree];
        let mut counter = vec![0u64; degree];
        for (slot, &index) in [2usize, 7, 11].iter().zip(&indices) {
            hi[*slot] = index / T;
            lo[*slot] = index % T;
            counter[*slot] = 1;
        }

        let recovered = recover_randomized_indices(&[(hi, lo, counter)], 1 << 18).unwrap();
        let keys: Vec<u64> = recovered.keys().copied().collect();
        assert_eq!(keys, vec![5, 70000, 131075]);
    }

    #[test]
    fn test_randomized_recovery_uses_later_layers() {
        let degree = 8;
        // layer 0: indices 1 and 2 collide in slot 0; index 3 clean in slot 4
        let hi0 = vec![0u64; degree];
        let mut lo0 = vec![0u64; degree];
        let mut counter0 = vec![0u64; degree];
        lo0[0] = 1 + 2;
        counter0[0] = 2;
        lo0[4] = 3;
        counter0[4] = 1;
        // K from layer 0 counters = 3

        // layer 1: all three land in distinct slots
        let hi1 = vec![0u64; degree];
        let mut lo1 = vec![0u64; degree];
        let mut counter1 = vec![0u64; degree];
        for (slot, index) in [(1usize, 1u64), (3, 2), (6, 3)] {
            lo1[slot] = index % T;
            counter1[slot] = 1;
        }

        let layers = vec![(hi0, lo0, counter0), (hi1, lo1, counter1)];
        let recovered = recover_randomized_indices(&layers, 100).unwrap();
        let keys: Vec<u64> = recovered.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_randomized_recovery_overflow() {
        let degree = 8;
        // two colliding indices, never resolved
        let hi = vec![0u64; degree];
        let mut lo = vec![0u64; degree];
        let mut counter = vec![0u64; degree];
        lo[0] = 5;
        counter[0] = 2;
        let err = recover_randomized_indices(&[(hi, lo, counter)], 100).unwrap_err();
        assert!(matches!(err, OmrError::Overflow { expected: 2, found: 0 }));
    }

    #[test]
    fn test_randomized_recovery_empty() {
        let layers = vec![(vec![0u64; 8], vec![0u64; 8], vec![0u64; 8])];
        assert!(recover_randomized_indices(&layers, 100).unwrap().is_empty());
    }
}
