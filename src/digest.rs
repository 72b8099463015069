//! Digest types and wire serialization.
//!
//! The digest is the compact encrypted result the detector hands the
//! recipient. The wire format is the concatenation of the homomorphic
//! library's standard ciphertext serialization, with no extra framing; the
//! reported byte size is the contract, the internal stream order is fixed
//! but otherwise implementation-defined.

use fhe::bfv::Ciphertext;
use fhe_traits::Serialize as FheSerialize;

/// Detection-only digest (OMD1p): one ciphertext whose slot j packs, in
/// bit position b, the indicator of message `b·D + j`.
pub struct OmdDigest {
    pub indicators: Ciphertext,
}

/// Deterministic-packing digest (OMR2p).
pub struct DigestOmr2 {
    /// Bit-packed index map.
    pub lhs: Ciphertext,
    /// Weighted payload sums per bucket.
    pub rhs: Ciphertext,
}

/// One repetition layer of the randomized digest.
pub struct DigestLayer {
    pub hi: Ciphertext,
    pub lo: Ciphertext,
    pub counter: Ciphertext,
}

/// Randomized-packing digest (OMR3p).
pub struct DigestOmr3 {
    pub layers: Vec<DigestLayer>,
    pub rhs: Ciphertext,
}

impl OmdDigest {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.indicators.to_bytes()
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }
}

impl DigestOmr2 {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.lhs.to_bytes();
        out.extend(self.rhs.to_bytes());
        out
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }
}

impl DigestOmr3 {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for layer in &self.layers {
            out.extend(layer.hi.to_bytes());
            out.extend(layer.lo.to_bytes());
            out.extend(layer.counter.to_bytes());
        }
        out.extend(self.rhs.to_bytes());
        out
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }
}
