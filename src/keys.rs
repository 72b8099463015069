//! Detection-key generation.
//!
//! The recipient hands the detector a detection key: the BFV public key, the
//! PVW secret key packed into `ell` BFV ciphertexts, relinearization keys for
//! every level the range check touches, and three rotation-key sets pinned to
//! the ladder levels that use them. Everything here is public material; the
//! BFV and PVW secret keys never leave the recipient.

use std::collections::HashMap;

use fhe::bfv::{Ciphertext, Encoding, GaloisKey, Plaintext, PublicKey, RelinearizationKey, SecretKey};
use fhe_traits::{FheEncoder, FheEncrypter, Serialize as FheSerialize};
use rand::{CryptoRng, RngCore};

use crate::error::Result;
use crate::params::OmrParams;
use crate::pvw::PvwSecretKey;

/// Galois element for a rotate-by-`steps` rows operation.
pub(crate) fn rotation_exponent(steps: u64, degree: usize) -> usize {
    let m = 2 * degree as u64;
    let mut acc = 1u64;
    let mut base = 3u64 % m;
    let mut k = steps;
    while k > 0 {
        if k & 1 == 1 {
            acc = acc * base % m;
        }
        base = base * base % m;
        k >>= 1;
    }
    acc as usize
}

/// Galois element for the column-swap (half-rotation) operation.
pub(crate) fn column_swap_exponent(degree: usize) -> usize {
    2 * degree - 1
}

/// Rotation keys for the slot-expansion replication tree, pinned to the
/// accumulation level.
pub struct ExpansionKeys {
    /// Rotate-by-`step` keys for every power-of-two step below `degree / 2`.
    pub rotations: HashMap<usize, GaloisKey>,
    /// Column-swap key covering the second batching row.
    pub column_swap: GaloisKey,
}

/// Everything the detector needs; all public material.
pub struct DetectionKey {
    /// BFV public key (used by the randomized packer to refresh
    /// accumulators).
    pub public_key: PublicKey,
    /// The PVW secret key packed into `ell` BFV ciphertexts, one per key
    /// row, tiled with period `n.next_power_of_two()` across the slots.
    pub pvw_sk_cts: Vec<Ciphertext>,
    /// Rotate-by-one at the top of the ladder, for walking clue columns
    /// during homomorphic PVW decryption.
    pub rot_one_top: GaloisKey,
    /// Rotate-by-one at the expansion level, for walking the packed
    /// indicator slots.
    pub rot_one_expand: GaloisKey,
    /// Column swap at the expansion level.
    pub col_swap_expand: GaloisKey,
    /// Replication-tree keys at the accumulation level.
    pub expansion: ExpansionKeys,
    /// Relinearization keys for every level the range check multiplies at.
    pub relin: HashMap<usize, RelinearizationKey>,
}

impl DetectionKey {
    /// Generates the full detection key for `params`.
    pub fn generate<R: RngCore + CryptoRng>(
        params: &OmrParams,
        bfv_sk: &SecretKey,
        pvw_sk: &PvwSecretKey,
        rng: &mut R,
    ) -> Result<Self> {
        let degree = params.degree;
        let public_key = PublicKey::new(bfv_sk, rng);

        let pvw_sk_cts = pack_pvw_secret_key(params, bfv_sk, pvw_sk, rng)?;

        let rot_one_top = GaloisKey::new(bfv_sk, rotation_exponent(1, degree), 0, 0, rng)?;
        let rot_one_expand = GaloisKey::new(
            bfv_sk,
            rotation_exponent(1, degree),
            params.level_expand,
            params.level_expand,
            rng,
        )?;
        let col_swap_expand = GaloisKey::new(
            bfv_sk,
            column_swap_exponent(degree),
            params.level_expand,
            params.level_expand,
            rng,
        )?;

        let mut rotations = HashMap::new();
        let mut step = 1;
        while step < degree / 2 {
            let key = GaloisKey::new(
                bfv_sk,
                rotation_exponent(step as u64, degree),
                params.level_accumulate,
                params.level_accumulate,
                rng,
            )?;
            rotations.insert(step, key);
            step *= 2;
        }
        let column_swap = GaloisKey::new(
            bfv_sk,
            column_swap_exponent(degree),
            params.level_accumulate,
            params.level_accumulate,
            rng,
        )?;

        let mut relin = HashMap::new();
        for level in 0..=params.level_sic {
            relin.insert(level, RelinearizationKey::new_leveled(bfv_sk, level, level, rng)?);
        }

        Ok(Self {
            public_key,
            pvw_sk_cts,
            rot_one_top,
            rot_one_expand,
            col_swap_expand,
            expansion: ExpansionKeys { rotations, column_swap },
            relin,
        })
    }

    /// Serialized byte size of the detection-only key material (OMD): public
    /// key, relinearization keys, the top rotate-by-one, and the packed PVW
    /// secret key. No expansion keys are needed when nothing is unpacked.
    pub fn detection_only_size(&self) -> usize {
        let mut size = self.public_key.to_bytes().len();
        size += self.rot_one_top.to_bytes().len();
        size += self.relin.values().map(|k| k.to_bytes().len()).sum::<usize>();
        size += self.pvw_sk_cts.iter().map(|c| c.to_bytes().len()).sum::<usize>();
        size
    }

    /// Serialized byte size of the full retrieval key material (OMR): the
    /// detection-only set plus the level-specific rotation keys.
    pub fn full_size(&self) -> usize {
        let mut size = self.detection_only_size();
        size += self.rot_one_expand.to_bytes().len();
        size += self.col_swap_expand.to_bytes().len();
        size += self.expansion.rotations.values().map(|k| k.to_bytes().len()).sum::<usize>();
        size += self.expansion.column_swap.to_bytes().len();
        size
    }
}

/// Encrypts the PVW secret key into `ell` BFV ciphertexts. Row `l` is tiled
/// across the slots with period `n.next_power_of_two()` (zero-padded past
/// `n`), so that rotating by one and masking walks the key columns in step
/// with the clue columns.
fn pack_pvw_secret_key<R: RngCore + CryptoRng>(
    params: &OmrParams,
    bfv_sk: &SecretKey,
    pvw_sk: &PvwSecretKey,
    rng: &mut R,
) -> Result<Vec<Ciphertext>> {
    let tile = params.pvw.n.next_power_of_two();
    let mut cts = Vec::with_capacity(params.pvw.ell);
    for l in 0..params.pvw.ell {
        let row = pvw_sk.row(l);
        let slots: Vec<u64> = (0..params.degree)
            .map(|s| if s % tile < params.pvw.n { row[s % tile] } else { 0 })
            .collect();
        let pt = Plaintext::try_encode(&slots, Encoding::simd(), &params.bfv)?;
        cts.push(bfv_sk.try_encrypt(&pt, rng)?);
    }
    Ok(cts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_exponents() {
        // 3^k mod 2D, the usual generator walk
        assert_eq!(rotation_exponent(0, 2048), 1);
        assert_eq!(rotation_exponent(1, 2048), 3);
        assert_eq!(rotation_exponent(2, 2048), 9);
        assert_eq!(rotation_exponent(11, 2048), 3u64.pow(11) as usize % 4096);
        assert_eq!(column_swap_exponent(2048), 4095);
    }
}
