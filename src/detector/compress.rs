//! Payload compression.
//!
//! For every message, its payload is scaled by the per-assignment weights
//! and laid out at the slots of its assigned buckets, all in one plaintext.
//! Multiplying that plaintext by the message's indicator ciphertext and
//! accumulating yields, per bucket, the weighted sum of the pertinent
//! payloads mapped there: the right-hand side of the recipient's linear
//! system.

use fhe::bfv::{Ciphertext, Encoding, Plaintext};
use fhe_traits::FheEncoder;

use crate::error::{OmrError, Result};
use crate::graph::BipartiteGraph;
use crate::math::modular::ModT;
use crate::params::{OmrParams, RetrievalConfig};

/// Adds the payload contributions of messages `start ..` into the running
/// `rhs` ciphertext at `params.level_accumulate`. `payloads[k]` is the
/// payload of the message behind `indicators[k]`.
pub fn compress_payloads(
    params: &OmrParams,
    config: &RetrievalConfig,
    graph: &BipartiteGraph,
    indicators: &[Ciphertext],
    payloads: &[Vec<u64>],
    start: usize,
    rhs: &mut Ciphertext,
) -> Result<()> {
    debug_assert_eq!(indicators.len(), payloads.len());
    let width = config.payload_slots;

    for (k, (indicator, payload)) in indicators.iter().zip(payloads).enumerate() {
        let index = start + k;
        if payload.len() > width {
            return Err(OmrError::Corruption(format!(
                "payload {index} has {} slots, expected at most {width}",
                payload.len()
            )));
        }

        let mut padded = vec![0u64; params.degree];
        for (bucket, &weight) in graph.buckets[index].iter().zip(&graph.weights[index]) {
            let base = bucket * width;
            for (j, &value) in payload.iter().enumerate() {
                padded[base + j] = ModT::add(padded[base + j], ModT::mul(value, weight));
            }
        }
        let pt = Plaintext::try_encode(
            &padded,
            Encoding::simd_at_level(params.level_accumulate),
            &params.bfv,
        )?;
        *rhs = &*rhs + &(indicator * &pt);
    }
    Ok(())
}
