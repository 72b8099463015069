//! The detector pipeline.
//!
//! The detector owns nothing secret: it consumes the public detection key,
//! the clue store, and the payload store, and produces an encrypted digest
//! only the recipient can open.
//!
//! # Pipeline
//!
//! 1. **Phase 1** (top of the ladder): per batch of `degree` clues, run the
//!    homomorphic PVW decryption and range check, yielding one packed
//!    selection-indicator ciphertext per batch.
//! 2. **Phase 2** (bottom of the ladder): mod-switch each indicator batch
//!    down, expand it `expansion_step` slots at a time, and feed the
//!    expanded indicators to the index packer and the payload compressor.
//! 3. **Phase 3**: combine the per-core partial digests in core order,
//!    switch to the last ladder rung, and serialize.
//!
//! Cores partition the transaction range into equal contiguous sub-ranges
//! and never share mutable state; partial digests are summed core-index
//! ascending so the modular sums are reproducible run to run.
//!
//! OMD1p stops after phase 1: each batch's indicator ciphertext is scaled by
//! `2^batch` and the batches are summed into a single ciphertext.

pub mod compress;
pub mod expand;
pub mod pack;
pub mod range;

use fhe::bfv::{Ciphertext, Encoding, Plaintext};
use fhe_traits::FheEncoder;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::digest::{DigestLayer, DigestOmr2, DigestOmr3, OmdDigest};
use crate::error::{OmrError, Result};
use crate::graph::BipartiteGraph;
use crate::keys::DetectionKey;
use crate::params::{OmrParams, RetrievalConfig, SLOT_BITS};
use crate::store::TransactionStore;

use self::pack::RandomizedAccumulator;
use self::range::RangeCheck;

/// A configured detector instance.
///
/// Construction interpolates the range-check polynomial and derives the
/// bipartite graph, both of which are shared read-only by all cores.
pub struct Detector {
    params: OmrParams,
    config: RetrievalConfig,
    key: DetectionKey,
    graph: BipartiteGraph,
    range: RangeCheck,
}

impl Detector {
    pub fn new(params: OmrParams, config: RetrievalConfig, key: DetectionKey) -> Result<Self> {
        params.validate()?;
        config.validate(&params)?;
        info!(bound = params.range_bound, "interpolating range-check polynomial");
        let range = RangeCheck::new(params.range_bound);
        let graph = BipartiteGraph::generate(&config);
        Ok(Self { params, config, key, graph, range })
    }

    pub fn params(&self) -> &OmrParams {
        &self.params
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Splits the run into `cores` equal contiguous ranges of whole batches.
    fn core_ranges(&self, cores: usize) -> Result<Vec<(usize, usize)>> {
        let n = self.config.num_transactions;
        if cores == 0 || n % (cores * self.params.degree) != 0 {
            return Err(OmrError::ParameterMismatch(format!(
                "{n} transactions cannot be split into {cores} cores of whole {}-slot batches",
                self.params.degree
            )));
        }
        let span = n / cores;
        Ok((0..cores).map(|c| (c * span, (c + 1) * span)).collect())
    }

    /// Phase 1 over one contiguous range: one selection-indicator ciphertext
    /// per batch of `degree` clues.
    fn phase1_range(
        &self,
        store: &TransactionStore,
        core: usize,
        start: usize,
        end: usize,
    ) -> Result<Vec<Ciphertext>> {
        let degree = self.params.degree;
        (start..end)
            .step_by(degree)
            .enumerate()
            .map(|(batch, batch_start)| {
                debug!(core, batch, "phase 1");
                let clues = store.load_clues(batch_start, batch_start + degree)?;
                range::compute_sic(&self.params, &self.key, &self.range, &clues)
            })
            .collect()
    }

    /// Runs detection only: no expansion, no payload path. The whole run
    /// must fit the 16 bit positions of one ciphertext, i.e.
    /// `N ≤ 16·degree`.
    pub fn run_omd(&self, store: &TransactionStore, cores: usize) -> Result<OmdDigest> {
        let ranges = self.core_ranges(cores)?;
        let batches = self.config.num_batches(&self.params);
        if batches > SLOT_BITS {
            return Err(OmrError::OutOfRange {
                start: 0,
                count: batches,
                capacity: SLOT_BITS,
            });
        }

        let per_core: Vec<Vec<Ciphertext>> = ranges
            .par_iter()
            .enumerate()
            .map(|(core, &(start, end))| self.phase1_range(store, core, start, end))
            .collect::<Result<_>>()?;

        let mut acc: Option<Ciphertext> = None;
        for (batch, sic) in per_core.iter().flatten().enumerate() {
            let pt = Plaintext::try_encode(
                &vec![1u64 << batch; self.params.degree],
                Encoding::simd_at_level(self.params.level_sic),
                &self.params.bfv,
            )?;
            let scaled = sic * &pt;
            acc = Some(match acc {
                Some(mut total) => {
                    total += &scaled;
                    total
                }
                None => scaled,
            });
        }
        let mut indicators = acc.ok_or_else(|| {
            OmrError::ParameterMismatch("run contains no batches".into())
        })?;
        indicators.switch_to_level(indicators.max_switchable_level())?;
        Ok(OmdDigest { indicators })
    }

    /// Runs full retrieval with deterministic index packing.
    pub fn run_omr2(&self, store: &TransactionStore, cores: usize) -> Result<DigestOmr2> {
        let ranges = self.core_ranges(cores)?;

        let sics: Vec<Vec<Ciphertext>> = ranges
            .par_iter()
            .enumerate()
            .map(|(core, &(start, end))| self.phase1_range(store, core, start, end))
            .collect::<Result<_>>()?;

        let partials: Vec<(Ciphertext, Ciphertext)> = ranges
            .par_iter()
            .enumerate()
            .zip(sics)
            .map(|((core, &(start, _)), core_sics)| {
                let mut lhs = Ciphertext::zero(&self.params.bfv);
                let mut rhs = Ciphertext::zero(&self.params.bfv);
                for (batch, sic) in core_sics.into_iter().enumerate() {
                    debug!(core, batch, "phase 2");
                    let batch_start = start + batch * self.params.degree;
                    self.consume_batch(store, sic, batch_start, &mut |indicators, global| {
                        pack::pack_deterministic(&self.params, indicators, global, &mut lhs)
                    }, &mut rhs)?;
                }
                Ok((lhs, rhs))
            })
            .collect::<Result<_>>()?;

        let (mut lhs, mut rhs) = combine_pairs(partials)?;
        lhs.switch_to_level(lhs.max_switchable_level())?;
        rhs.switch_to_level(rhs.max_switchable_level())?;
        Ok(DigestOmr2 { lhs, rhs })
    }

    /// Runs full retrieval with randomized index packing. `run_seed` drives
    /// the detector-local slot draws; it is not shared with the recipient.
    pub fn run_omr3(
        &self,
        store: &TransactionStore,
        cores: usize,
        run_seed: u64,
    ) -> Result<DigestOmr3> {
        let ranges = self.core_ranges(cores)?;

        let sics: Vec<Vec<Ciphertext>> = ranges
            .par_iter()
            .enumerate()
            .map(|(core, &(start, end))| self.phase1_range(store, core, start, end))
            .collect::<Result<_>>()?;

        let partials: Vec<(RandomizedAccumulator, Ciphertext)> = ranges
            .par_iter()
            .enumerate()
            .zip(sics)
            .map(|((core, &(start, _)), core_sics)| {
                // one independent draw stream per core, fixed at run start
                let mut rng = ChaCha20Rng::seed_from_u64(run_seed.wrapping_add(core as u64));
                let mut acc = RandomizedAccumulator::new(
                    &self.params,
                    &self.key.public_key,
                    self.config.layers,
                    &mut rng,
                )?;
                let mut rhs = Ciphertext::zero(&self.params.bfv);
                for (batch, sic) in core_sics.into_iter().enumerate() {
                    debug!(core, batch, "phase 2");
                    let batch_start = start + batch * self.params.degree;
                    self.consume_batch(store, sic, batch_start, &mut |indicators, global| {
                        acc.absorb(&self.params, indicators, global, &mut rng)
                    }, &mut rhs)?;
                }
                Ok((acc, rhs))
            })
            .collect::<Result<_>>()?;

        let mut iter = partials.into_iter();
        let (mut acc, mut rhs) = iter
            .next()
            .ok_or_else(|| OmrError::ParameterMismatch("run contains no cores".into()))?;
        for (other_acc, other_rhs) in iter {
            acc.merge(&other_acc);
            rhs = &rhs + &other_rhs;
        }

        let mut layers = Vec::with_capacity(acc.layers.len());
        for layer in acc.layers {
            let (mut hi, mut lo, mut counter) = (layer.hi, layer.lo, layer.counter);
            hi.switch_to_level(hi.max_switchable_level())?;
            lo.switch_to_level(lo.max_switchable_level())?;
            counter.switch_to_level(counter.max_switchable_level())?;
            layers.push(DigestLayer { hi, lo, counter });
        }
        rhs.switch_to_level(rhs.max_switchable_level())?;
        Ok(DigestOmr3 { layers, rhs })
    }

    /// Phase-2 body shared by both retrieval variants: switch the batch's
    /// indicator ciphertext down, expand it step by step, and feed every
    /// window to the index packer (via `pack`) and the payload compressor.
    fn consume_batch(
        &self,
        store: &TransactionStore,
        mut sic: Ciphertext,
        batch_start: usize,
        pack: &mut dyn FnMut(&[Ciphertext], usize) -> Result<()>,
        rhs: &mut Ciphertext,
    ) -> Result<()> {
        let degree = self.params.degree;
        let step = self.config.expansion_step;

        for _ in self.params.level_sic..self.params.level_expand {
            sic.switch_down()?;
        }
        let payloads = store.load_payloads(batch_start, batch_start + degree)?;

        for offset in (0..degree).step_by(step) {
            let indicators =
                expand::expand_indicators(&self.params, &self.key, &mut sic, offset, step)?;
            let global = batch_start + offset;
            pack(&indicators, global)?;
            compress::compress_payloads(
                &self.params,
                &self.config,
                &self.graph,
                &indicators,
                &payloads[offset..offset + step],
                global,
                rhs,
            )?;
        }
        Ok(())
    }
}

/// Sums per-core `(lhs, rhs)` partials in core order.
fn combine_pairs(partials: Vec<(Ciphertext, Ciphertext)>) -> Result<(Ciphertext, Ciphertext)> {
    let mut iter = partials.into_iter();
    let (mut lhs, mut rhs) = iter
        .next()
        .ok_or_else(|| OmrError::ParameterMismatch("run contains no cores".into()))?;
    for (other_lhs, other_rhs) in iter {
        lhs = &lhs + &other_lhs;
        rhs = &rhs + &other_rhs;
    }
    Ok((lhs, rhs))
}
