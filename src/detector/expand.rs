//! Slot expansion.
//!
//! Turns a packed selection-indicator ciphertext into per-message indicator
//! ciphertexts: the k-th output carries the value that sat in slot
//! `offset + k`, replicated across all slots. The source ciphertext is
//! rotated by one per step so the wanted slot always sits at position zero,
//! where a single-slot mask isolates it; a power-of-two rotation tree then
//! sums the masked ciphertext into every slot.
//!
//! The caller walks a whole batch by calling this repeatedly with
//! `offset = 0, step, 2·step, …`, reusing the progressively rotated source.

use fhe::bfv::{Ciphertext, Encoding, Plaintext};
use fhe_traits::FheEncoder;

use crate::error::{OmrError, Result};
use crate::keys::DetectionKey;
use crate::params::OmrParams;

/// Expands `step` consecutive slots starting at `offset` into `step`
/// replicated indicator ciphertexts.
///
/// `sic` must sit at `params.level_expand` and must be the same ciphertext
/// handed to the previous call for `offset − step`; outputs sit at
/// `params.level_accumulate`.
///
/// # Errors
///
/// [`OmrError::ParameterMismatch`] when the window runs past the batch or a
/// rotation key is missing.
pub fn expand_indicators(
    params: &OmrParams,
    key: &DetectionKey,
    sic: &mut Ciphertext,
    offset: usize,
    step: usize,
) -> Result<Vec<Ciphertext>> {
    let degree = params.degree;
    if offset + step > degree {
        return Err(OmrError::ParameterMismatch(format!(
            "expansion window {offset}+{step} exceeds batch of {degree} slots"
        )));
    }

    let mut mask = vec![0u64; degree];
    mask[0] = 1;
    let mask_pt =
        Plaintext::try_encode(&mask, Encoding::simd_at_level(params.level_expand), &params.bfv)?;

    let mut expanded = Vec::with_capacity(step);
    for slot in offset..offset + step {
        if slot != 0 {
            if slot == degree / 2 {
                // crossing into the second batching row
                *sic = key.col_swap_expand.relinearize(sic)?;
            }
            *sic = key.rot_one_expand.relinearize(sic)?;
        }

        let mut isolated = &*sic * &mask_pt;
        for _ in params.level_expand..params.level_accumulate {
            isolated.switch_down()?;
        }
        expanded.push(replicate_slot_zero(params, key, isolated)?);
    }
    Ok(expanded)
}

/// Sums a ciphertext that is zero everywhere except slot zero into all
/// slots: rotate-and-add over every power of two below half the degree, then
/// fold in the swapped column.
fn replicate_slot_zero(
    params: &OmrParams,
    key: &DetectionKey,
    mut ct: Ciphertext,
) -> Result<Ciphertext> {
    let mut step = 1;
    while step < params.degree / 2 {
        let rotation = key.expansion.rotations.get(&step).ok_or_else(|| {
            OmrError::ParameterMismatch(format!("missing expansion rotation key for step {step}"))
        })?;
        let rotated = rotation.relinearize(&ct)?;
        ct = &ct + &rotated;
        step *= 2;
    }
    let swapped = key.expansion.column_swap.relinearize(&ct)?;
    Ok(&ct + &swapped)
}
