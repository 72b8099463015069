//! Index-retrieval packers.
//!
//! Compress the per-message indicator ciphertexts back into a handful of
//! digest ciphertexts encoding the set of pertinent indices.
//!
//! The deterministic packer bit-packs indicators run-positionally: message i
//! contributes `2^(i mod 16)` to slot `i / 16`. At most 16 indicators share
//! a slot and each is 0 or 1, so slot values stay below 2^16 with no modular
//! wraparound.
//!
//! The randomized packer spreads each message over `C` repetition layers at
//! uniformly random slots. Per layer it maintains three accumulators: the
//! index split as `i = hi·t + lo` and a collision counter. Slots whose
//! counter decrypts to exactly 1 reveal their index; the layers give the
//! recipient several chances to see every index collision-free.

use fhe::bfv::{Ciphertext, Encoding, Plaintext, PublicKey};
use fhe_traits::{FheEncoder, FheEncrypter};
use rand::Rng;
use rand_chacha::ChaCha20Rng;

use crate::error::{OmrError, Result};
use crate::math::modular::T;
use crate::params::{OmrParams, SLOT_BITS};

/// Adds `indicators` (messages `start ..`) into the running deterministic
/// digest `lhs`, which must sit at `params.level_accumulate`.
///
/// # Errors
///
/// [`OmrError::OutOfRange`] when the run would overflow the 16-bit-per-slot
/// capacity of a single ciphertext.
pub fn pack_deterministic(
    params: &OmrParams,
    indicators: &[Ciphertext],
    start: usize,
    lhs: &mut Ciphertext,
) -> Result<()> {
    let capacity = SLOT_BITS * params.degree;
    if start + indicators.len() > capacity {
        return Err(OmrError::OutOfRange { start, count: indicators.len(), capacity });
    }

    let mut mask = vec![0u64; params.degree];
    for (i, indicator) in indicators.iter().enumerate() {
        let position = start + i;
        let slot = position / SLOT_BITS;
        let bit = position % SLOT_BITS;
        mask[slot] = 1 << bit;
        let pt = Plaintext::try_encode(
            &mask,
            Encoding::simd_at_level(params.level_accumulate),
            &params.bfv,
        )?;
        mask[slot] = 0;

        *lhs = &*lhs + &(indicator * &pt);
    }
    Ok(())
}

/// One repetition layer of the randomized digest.
pub struct RandomizedLayer {
    /// Accumulates `indicator · ⌊i / t⌋` at the drawn slot.
    pub hi: Ciphertext,
    /// Accumulates `indicator · (i mod t)` at the drawn slot.
    pub lo: Ciphertext,
    /// Accumulates `indicator · 1` at the drawn slot.
    pub counter: Ciphertext,
}

/// Running state of the randomized packer: `C` layers of accumulators.
pub struct RandomizedAccumulator {
    pub layers: Vec<RandomizedLayer>,
}

impl RandomizedAccumulator {
    /// Fresh accumulators: public-key encryptions of zero switched down to
    /// the accumulation level, so the serialized digest never exposes a
    /// transparent ciphertext.
    pub fn new(
        params: &OmrParams,
        public_key: &PublicKey,
        layers: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<Self> {
        let mut out = Vec::with_capacity(layers);
        for _ in 0..layers {
            out.push(RandomizedLayer {
                hi: encrypted_zero(params, public_key, rng)?,
                lo: encrypted_zero(params, public_key, rng)?,
                counter: encrypted_zero(params, public_key, rng)?,
            });
        }
        Ok(Self { layers: out })
    }

    /// Absorbs `indicators` for messages `start ..`. The slot draws come
    /// from the detector-local PRNG handed in by the orchestrator, seeded
    /// once per run; the recipient never needs to reproduce them.
    pub fn absorb(
        &mut self,
        params: &OmrParams,
        indicators: &[Ciphertext],
        start: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<()> {
        let level = params.level_accumulate;
        for (k, indicator) in indicators.iter().enumerate() {
            let index = (start + k) as u64;
            for layer in self.layers.iter_mut() {
                let slot = rng.gen_range(0..params.degree);

                if index / T != 0 {
                    layer.hi = &layer.hi + &(indicator * &slot_mask(params, slot, index / T, level)?);
                }
                if index % T != 0 {
                    layer.lo = &layer.lo + &(indicator * &slot_mask(params, slot, index % T, level)?);
                }
                layer.counter = &layer.counter + &(indicator * &slot_mask(params, slot, 1, level)?);
            }
        }
        Ok(())
    }

    /// Folds another accumulator into this one (used when combining
    /// per-core partial digests, in core order).
    pub fn merge(&mut self, other: &RandomizedAccumulator) {
        debug_assert_eq!(self.layers.len(), other.layers.len());
        for (mine, theirs) in self.layers.iter_mut().zip(&other.layers) {
            mine.hi = &mine.hi + &theirs.hi;
            mine.lo = &mine.lo + &theirs.lo;
            mine.counter = &mine.counter + &theirs.counter;
        }
    }
}

fn slot_mask(params: &OmrParams, slot: usize, value: u64, level: usize) -> Result<Plaintext> {
    let mut mask = vec![0u64; params.degree];
    mask[slot] = value;
    Ok(Plaintext::try_encode(&mask, Encoding::simd_at_level(level), &params.bfv)?)
}

fn encrypted_zero(
    params: &OmrParams,
    public_key: &PublicKey,
    rng: &mut ChaCha20Rng,
) -> Result<Ciphertext> {
    let pt = Plaintext::try_encode(&vec![0u64; params.degree], Encoding::simd(), &params.bfv)?;
    let mut ct = public_key.try_encrypt(&pt, rng)?;
    for _ in 0..params.level_accumulate {
        ct.switch_down()?;
    }
    Ok(ct)
}
