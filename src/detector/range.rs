//! Homomorphic PVW decryption and range check.
//!
//! Turns a batch of up to `degree` clues into one selection-indicator
//! ciphertext: slot j holds 1 when clue j decrypts, under the recipient's
//! PVW key, into the symmetric interval `[−r, r)`, and 0 otherwise.
//!
//! Two stages:
//!
//! 1. `b − a·sk` under BFV. The packed secret-key ciphertexts are rotated by
//!    one and masked once per tile column, accumulating the inner product
//!    for all clues of the batch simultaneously.
//! 2. The range indicator as a polynomial over GF(t). The indicator of
//!    `[−r, r)` is the unique polynomial of degree t−1 interpolating it; the
//!    detector evaluates it with a 256×256 baby-step/giant-step power
//!    ladder, relinearizing at each level and descending the modulus ladder
//!    as products deepen.

use std::collections::HashMap;

use fhe::bfv::{Ciphertext, Encoding, Plaintext, RelinearizationKey};
use fhe_traits::FheEncoder;

use crate::error::{OmrError, Result};
use crate::keys::DetectionKey;
use crate::math::modular::{ModT, T};
use crate::params::OmrParams;
use crate::pvw::PvwCiphertext;

/// Baby and giant step counts of the power ladder; their product covers the
/// full degree t − 1 = 65536 of the indicator polynomial.
const LADDER_STEPS: usize = 256;

/// The interpolated range-indicator polynomial.
///
/// Building one is a few hundred million field multiplications; construct it
/// once per process and share it across batches and cores.
pub struct RangeCheck {
    /// Coefficients c[0..=t−1] of the indicator of `[−r, r)`.
    coeffs: Vec<u64>,
}

impl RangeCheck {
    /// Interpolates the indicator of the symmetric interval `[−bound, bound)`.
    ///
    /// Over GF(t) with prime t, `C(t−1, k) ≡ (−1)^k (mod t)`, which collapses
    /// the interpolation to power sums over the interval members:
    /// `c_0 = 1`, `c_k = −Σ_{a∈S∖{0}} a^{t−1−k}`, `c_{t−1} = −|S|`.
    pub fn new(bound: u64) -> Self {
        debug_assert!(bound > 0 && bound < T / 2);
        let size = T as usize;
        let mut coeffs = vec![0u64; size];

        let members = (1..bound).chain(T - bound..T);
        for a in members {
            let mut power = 1u64;
            for exp in 1..T - 1 {
                power = power * a % T;
                let k = (T - 1 - exp) as usize;
                coeffs[k] = (coeffs[k] + power) % T;
            }
        }
        for c in coeffs.iter_mut() {
            *c = ModT::neg(*c);
        }
        coeffs[0] = 1;
        coeffs[size - 1] = ModT::neg(2 * bound);
        Self { coeffs }
    }

    /// Plaintext evaluation, for validation.
    pub fn evaluate_plain(&self, x: u64) -> u64 {
        self.coeffs
            .iter()
            .rev()
            .fold(0u64, |acc, &c| ModT::add(ModT::mul(acc, x), c))
    }

    /// Homomorphically maps every slot of `input` (at the top of the ladder)
    /// to its range indicator. Output sits at `params.level_sic`.
    pub fn indicator(
        &self,
        params: &OmrParams,
        input: &Ciphertext,
        relin: &HashMap<usize, RelinearizationKey>,
    ) -> Result<Ciphertext> {
        let mut baby = powers_of_x(params, input, LADDER_STEPS, relin, 0)?;
        let giant_base = baby[LADDER_STEPS - 1].clone();
        let giant = powers_of_x(params, &giant_base, LADDER_STEPS, relin, 4)?;

        // bring the baby powers down to the giant powers' level
        for p in baby.iter_mut() {
            for _ in 0..4 {
                p.switch_down()?;
            }
        }
        let level = params.level_sic;

        let mut total: Option<Ciphertext> = None;
        for i in 0..LADDER_STEPS {
            let mut inner: Option<Ciphertext> = None;
            for j in 1..=LADDER_STEPS {
                let c = self.coeffs[i * LADDER_STEPS + j];
                if c == 0 {
                    continue;
                }
                let pt = Plaintext::try_encode(
                    &vec![c; params.degree],
                    Encoding::simd_at_level(level),
                    &params.bfv,
                )?;
                let product = &baby[j - 1] * &pt;
                inner = Some(match inner {
                    Some(mut acc) => {
                        acc += &product;
                        acc
                    }
                    None => product,
                });
            }
            let Some(inner) = inner else { continue };

            let contribution = if i == 0 {
                inner
            } else {
                let mut product = &giant[i - 1] * &inner;
                relin_at(relin, level)?.relinearizes(&mut product)?;
                product
            };
            total = Some(match total {
                Some(mut acc) => {
                    acc += &contribution;
                    acc
                }
                None => contribution,
            });
        }

        let mut total = total.ok_or_else(|| {
            OmrError::ParameterMismatch("range polynomial has no non-zero coefficients".into())
        })?;
        // constant term
        let constant = Plaintext::try_encode(
            &vec![self.coeffs[0]; params.degree],
            Encoding::simd_at_level(level),
            &params.bfv,
        )?;
        total = &total + &constant;
        Ok(total)
    }
}

/// Homomorphically computes `b − a·sk` for a batch of clues: one output
/// ciphertext per secret-key row, slot j carrying clue j's component.
pub fn homomorphic_decrypt_clues(
    params: &OmrParams,
    key: &DetectionKey,
    clues: &[PvwCiphertext],
) -> Result<Vec<Ciphertext>> {
    let ell = params.pvw.ell;
    let n = params.pvw.n;
    let tile = n.next_power_of_two();
    if clues.len() > params.degree {
        return Err(OmrError::ParameterMismatch(format!(
            "batch of {} clues exceeds {} slots",
            clues.len(),
            params.degree
        )));
    }

    let mut sk_cts = key.pvw_sk_cts.clone();
    let mut sk_a = vec![Ciphertext::zero(&params.bfv); ell];
    for i in 0..tile {
        let values: Vec<u64> = clues
            .iter()
            .enumerate()
            .map(|(j, clue)| {
                let index = (i + j) % tile;
                if index < n {
                    clue.a[index]
                } else {
                    0
                }
            })
            .collect();
        let pt = Plaintext::try_encode(&values, Encoding::simd(), &params.bfv)?;

        for l in 0..ell {
            let product = &sk_cts[l] * &pt;
            sk_a[l] = &sk_a[l] + &product;
            sk_cts[l] = key.rot_one_top.relinearize(&sk_cts[l])?;
        }
    }

    let mut decrypted = Vec::with_capacity(ell);
    for (l, sk_a_l) in sk_a.iter().enumerate() {
        let b_column: Vec<u64> = clues.iter().map(|clue| clue.b[l]).collect();
        let pt = Plaintext::try_encode(&b_column, Encoding::simd(), &params.bfv)?;
        decrypted.push(&(-sk_a_l) + &pt);
    }
    Ok(decrypted)
}

/// Full selection-indicator computation for one batch: decrypt, range-check
/// every key row, and AND the per-row indicators together.
pub fn compute_sic(
    params: &OmrParams,
    key: &DetectionKey,
    range: &RangeCheck,
    clues: &[PvwCiphertext],
) -> Result<Ciphertext> {
    let decrypted = homomorphic_decrypt_clues(params, key, clues)?;

    let mut sic: Option<Ciphertext> = None;
    for component in &decrypted {
        let indicator = range.indicator(params, component, &key.relin)?;
        sic = Some(match sic {
            Some(acc) => {
                let mut product = &acc * &indicator;
                relin_at(&key.relin, params.level_sic)?.relinearizes(&mut product)?;
                product
            }
            None => indicator,
        });
    }
    sic.ok_or_else(|| OmrError::ParameterMismatch("PVW parameters have ell = 0".into()))
}

fn relin_at(relin: &HashMap<usize, RelinearizationKey>, level: usize) -> Result<&RelinearizationKey> {
    relin
        .get(&level)
        .ok_or_else(|| OmrError::ParameterMismatch(format!("missing relinearization key for level {level}")))
}

/// Computes ciphertexts of x^1 … x^count from `input` by repeated squaring,
/// memoizing every intermediate power. Entries descend the modulus ladder as
/// their multiplicative depth grows; all outputs are aligned to the deepest
/// level before returning. `level_offset` shifts the relinearization-key
/// schedule when the input itself already sits below the top of the ladder.
fn powers_of_x(
    params: &OmrParams,
    input: &Ciphertext,
    count: usize,
    relin: &HashMap<usize, RelinearizationKey>,
    level_offset: usize,
) -> Result<Vec<Ciphertext>> {
    let mut outputs = vec![Ciphertext::zero(&params.bfv); count];
    let mut ready = vec![false; count];
    let mut switches = vec![0usize; count];

    let target_level = |deg: usize| ((deg as f32).log2() / 2f32).ceil() as usize;

    for start in (0..=count).rev() {
        let mut remaining = start;
        let mut base = input.clone();
        let mut result = Ciphertext::zero(&params.bfv);
        let mut base_deg = 1;
        let mut result_deg = 0;

        while remaining > 0 {
            if remaining & 1 == 1 {
                remaining -= 1;
                let prev_result_deg = result_deg;
                result_deg += base_deg;

                if ready[result_deg - 1] {
                    result = outputs[result_deg - 1].clone();
                } else {
                    if result_deg == base_deg {
                        result = base.clone();
                    } else {
                        switches[result_deg - 1] = switches[prev_result_deg - 1];
                        while switches[result_deg - 1] < switches[base_deg - 1] {
                            result.switch_down()?;
                            switches[result_deg - 1] += 1;
                        }
                        result = &result * &base;
                        relin_at(relin, switches[base_deg - 1] + level_offset)?
                            .relinearizes(&mut result)?;
                        while switches[result_deg - 1] < target_level(result_deg) {
                            result.switch_down()?;
                            switches[result_deg - 1] += 1;
                        }
                    }
                    outputs[result_deg - 1] = result.clone();
                    ready[result_deg - 1] = true;
                }
            } else {
                remaining /= 2;
                base_deg *= 2;

                if ready[base_deg - 1] {
                    base = outputs[base_deg - 1].clone();
                } else {
                    switches[base_deg - 1] = switches[base_deg / 2 - 1];
                    base = &base * &base;
                    relin_at(relin, switches[base_deg - 1] + level_offset)?
                        .relinearizes(&mut base)?;
                    while switches[base_deg - 1] < target_level(base_deg) {
                        base.switch_down()?;
                        switches[base_deg - 1] += 1;
                    }
                    outputs[base_deg - 1] = base.clone();
                    ready[base_deg - 1] = true;
                }
            }
        }
    }

    let depth = switches[count - 1];
    for i in 0..count - 1 {
        while switches[i] < depth {
            outputs[i].switch_down()?;
            switches[i] += 1;
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Interpolating the full polynomial takes a while without optimizations,
    // so the coefficient checks run on demand.
    #[test]
    #[ignore = "builds the degree-65536 interpolation; slow in debug builds"]
    fn test_indicator_polynomial_matches_interval() {
        let range = RangeCheck::new(850);
        assert_eq!(range.evaluate_plain(0), 1);
        assert_eq!(range.evaluate_plain(849), 1);
        assert_eq!(range.evaluate_plain(850), 0);
        assert_eq!(range.evaluate_plain(T - 850), 1); // -850
        assert_eq!(range.evaluate_plain(T - 851), 0); // -851
        assert_eq!(range.evaluate_plain(32768), 0);
        assert_eq!(range.evaluate_plain(T - 1), 1); // -1
    }
}
