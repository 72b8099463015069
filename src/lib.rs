//! Oblivious message retrieval: encrypted clue detection and payload
//! recovery.
//!
//! A recipient wants to learn which of N encrypted clues on a public
//! bulletin board are addressed to them, and to recover the attached
//! payloads, without the detector that does the heavy lifting learning
//! anything.
//! The detector evaluates PVW decryption and a range check under BFV,
//! compresses the per-message indicators and weighted payload sums into a
//! small encrypted digest, and only the recipient's secret key opens it.
//!
//! Key components:
//! - Detector pipeline: homomorphic PVW decrypt + range check, slot
//!   expansion, deterministic/randomized index packing, payload compression
//! - Recipient decoder: index recovery and a sparse linear solve over GF(t)
//! - Three variants: detection only (OMD1p), retrieval with deterministic
//!   packing (OMR2p), retrieval with randomized packing (OMR3p)

pub mod decoder;
pub mod detector;
pub mod digest;
pub mod error;
pub mod graph;
pub mod keys;
pub mod math;
pub mod params;
pub mod pvw;
pub mod store;

pub use decoder::{Recipient, RecoveredMessage};
pub use detector::Detector;
pub use digest::{DigestOmr2, DigestOmr3, OmdDigest};
pub use error::{OmrError, Result};
pub use graph::BipartiteGraph;
pub use keys::DetectionKey;
pub use params::{OmrParams, RetrievalConfig};
pub use store::TransactionStore;
