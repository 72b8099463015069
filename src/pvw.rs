//! PVW-style LWE encryption over Z_t.
//!
//! Clues on the bulletin board are PVW ciphertexts: a pair `(a, b)` with
//! `a ∈ Z_t^n` and `b ∈ Z_t^ell`. A clue addressed to a recipient is built
//! from that recipient's public key, so `b − a·sk` lands in a narrow
//! symmetric interval around zero; clues addressed to anyone else decrypt to
//! uniformly random values under the recipient's key.
//!
//! The detector never runs this decryption directly; it evaluates it under
//! BFV (see `detector::range`). The plaintext implementation here is used by
//! the recipient to generate keys and by the transaction-preparation harness
//! to synthesize clues.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::math::modular::{ModT, T};
use crate::math::GaussianSampler;

/// PVW parameters. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PvwParameters {
    /// LWE dimension n.
    pub n: usize,
    /// Components per clue (secret-key rows).
    pub ell: usize,
    /// Number of public-key samples Q.
    pub samples: usize,
    /// Noise standard deviation σ.
    pub sigma: f64,
    /// Modulus; fixed to the plaintext field of the BFV layer.
    pub q: u64,
}

impl Default for PvwParameters {
    fn default() -> Self {
        Self {
            n: 450,
            ell: 4,
            samples: 16000,
            sigma: 1.3,
            q: T,
        }
    }
}

/// PVW secret key: an `ell × n` matrix over Z_t. Owned by the recipient and
/// never published; the detector only ever sees its BFV encryption.
#[derive(Clone)]
pub struct PvwSecretKey {
    pub params: PvwParameters,
    key: Vec<Vec<u64>>,
}

/// PVW public key: `Q` sample pairs `(a_i, b_i)` with `b_i = sk·a_i + e_i`.
#[derive(Clone)]
pub struct PvwPublicKey {
    pub params: PvwParameters,
    a: Vec<Vec<u64>>,
    b: Vec<Vec<u64>>,
}

/// One clue: `a ∈ Z_t^n`, `b ∈ Z_t^ell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvwCiphertext {
    pub a: Vec<u64>,
    pub b: Vec<u64>,
}

impl PvwSecretKey {
    /// Samples a fresh secret key, uniform over Z_t.
    pub fn random<R: RngCore>(params: &PvwParameters, rng: &mut R) -> Self {
        let key = (0..params.ell)
            .map(|_| (0..params.n).map(|_| rng.gen_range(0..params.q)).collect())
            .collect();
        Self { params: params.clone(), key }
    }

    /// Row `row` of the key matrix.
    pub fn row(&self, row: usize) -> &[u64] {
        &self.key[row]
    }

    /// Derives the public key: `Q` samples `b = sk·a + e`.
    pub fn public_key<R: RngCore>(&self, rng: &mut R) -> PvwPublicKey {
        let sampler = GaussianSampler::new(self.params.sigma);
        let mut a = Vec::with_capacity(self.params.samples);
        let mut b = Vec::with_capacity(self.params.samples);
        for _ in 0..self.params.samples {
            let a_i: Vec<u64> = (0..self.params.n).map(|_| rng.gen_range(0..self.params.q)).collect();
            let e_i = sampler.sample_vec_centered(self.params.ell, rng);
            let b_i: Vec<u64> = (0..self.params.ell)
                .map(|l| ModT::add(dot(&self.key[l], &a_i), e_i[l]))
                .collect();
            a.push(a_i);
            b.push(b_i);
        }
        PvwPublicKey { params: self.params.clone(), a, b }
    }

    /// Encrypts the zero vector directly under this secret key. Used to
    /// synthesize clues addressed to nobody in particular: under any other
    /// key they decrypt to uniform garbage.
    pub fn encrypt_zero<R: RngCore>(&self, rng: &mut R) -> PvwCiphertext {
        let sampler = GaussianSampler::new(self.params.sigma);
        let a: Vec<u64> = (0..self.params.n).map(|_| rng.gen_range(0..self.params.q)).collect();
        let e = sampler.sample_vec_centered(self.params.ell, rng);
        let b = (0..self.params.ell)
            .map(|l| ModT::add(dot(&self.key[l], &a), e[l]))
            .collect();
        PvwCiphertext { a, b }
    }

    /// Computes `b − a·sk` and tests every component against the symmetric
    /// interval `[−bound, bound)`.
    pub fn decrypts_within(&self, ct: &PvwCiphertext, bound: u64) -> bool {
        (0..self.params.ell).all(|l| {
            let d = ModT::sub(ct.b[l], dot(&self.key[l], &ct.a));
            let d = ModT::to_signed(d);
            -(bound as i64) <= d && d < bound as i64
        })
    }
}

impl PvwPublicKey {
    /// Encrypts the zero vector: a random subset-sum of the published
    /// samples. The resulting clue decrypts, under the matching secret key,
    /// to the accumulated noise of the chosen samples.
    pub fn encrypt_zero<R: RngCore>(&self, rng: &mut R) -> PvwCiphertext {
        let mut a = vec![0u64; self.params.n];
        let mut b = vec![0u64; self.params.ell];
        for i in 0..self.params.samples {
            if rng.gen_range(0..2u8) == 1 {
                for (acc, &v) in a.iter_mut().zip(&self.a[i]) {
                    *acc = ModT::add(*acc, v);
                }
                for (acc, &v) in b.iter_mut().zip(&self.b[i]) {
                    *acc = ModT::add(*acc, v);
                }
            }
        }
        PvwCiphertext { a, b }
    }
}

#[inline]
fn dot(u: &[u64], v: &[u64]) -> u64 {
    debug_assert_eq!(u.len(), v.len());
    let mut acc = 0u64;
    for (&x, &y) in u.iter().zip(v) {
        acc = ModT::add(acc, ModT::mul(x, y));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn small_params() -> PvwParameters {
        // full-size n and ell, fewer public-key samples to keep tests quick
        PvwParameters { samples: 2000, ..PvwParameters::default() }
    }

    #[test]
    fn test_pertinent_clue_in_range() {
        let params = small_params();
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let sk = PvwSecretKey::random(&params, &mut rng);
        let pk = sk.public_key(&mut rng);

        for _ in 0..8 {
            let clue = pk.encrypt_zero(&mut rng);
            assert!(sk.decrypts_within(&clue, 850));
        }
    }

    #[test]
    fn test_foreign_clue_out_of_range() {
        let params = small_params();
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let sk = PvwSecretKey::random(&params, &mut rng);

        for _ in 0..8 {
            let other = PvwSecretKey::random(&params, &mut rng);
            let clue = other.encrypt_zero(&mut rng);
            // false positive probability is (1700/65537)^4, negligible
            assert!(!sk.decrypts_within(&clue, 850));
        }
    }

    #[test]
    fn test_sk_encryption_in_range_under_own_key() {
        let params = small_params();
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        let sk = PvwSecretKey::random(&params, &mut rng);
        let clue = sk.encrypt_zero(&mut rng);
        assert!(sk.decrypts_within(&clue, 850));
    }
}
