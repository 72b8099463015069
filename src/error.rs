//! Error handling for the retrieval pipeline.
//!
//! Every fallible operation in the crate surfaces one of the kinds below;
//! there is no retry loop and no partial-success mode. The demo binary wraps
//! these in `eyre` for top-level reporting.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OmrError>;

/// Failure kinds of the detector/recipient pipeline.
#[derive(Debug)]
pub enum OmrError {
    /// A ciphertext sat at the wrong ladder level, a rotation key was
    /// missing, or the homomorphic library rejected an operation.
    /// Programmer error; fatal for the run.
    ParameterMismatch(String),
    /// The deterministic index packer was asked to place an indicator past
    /// the 16-bits-per-slot capacity of one ciphertext.
    OutOfRange { start: usize, count: usize, capacity: usize },
    /// Gaussian elimination found a column with no usable pivot.
    NoSolution,
    /// Randomized index recovery exhausted all repetition layers before
    /// reaching the expected number of distinct indices.
    Overflow { expected: usize, found: usize },
    /// A clue or payload file could not be read or parsed.
    Corruption(String),
}

impl fmt::Display for OmrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmrError::ParameterMismatch(msg) => write!(f, "parameter mismatch: {msg}"),
            OmrError::OutOfRange { start, count, capacity } => write!(
                f,
                "index packer out of range: start {start} + count {count} exceeds capacity {capacity}"
            ),
            OmrError::NoSolution => write!(f, "no solution: elimination found no pivot"),
            OmrError::Overflow { expected, found } => write!(
                f,
                "overflow: recovered {found} of {expected} indices before exhausting all layers"
            ),
            OmrError::Corruption(msg) => write!(f, "corrupt store entry: {msg}"),
        }
    }
}

impl std::error::Error for OmrError {}

impl From<fhe::Error> for OmrError {
    fn from(err: fhe::Error) -> Self {
        OmrError::ParameterMismatch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = OmrError::OutOfRange { start: 524288, count: 32, capacity: 524288 };
        assert!(err.to_string().contains("524288"));
        assert!(OmrError::NoSolution.to_string().contains("no pivot"));
    }
}
