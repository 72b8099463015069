//! On-disk clue and payload store.
//!
//! One text file per transaction under `<root>/clues/` and
//! `<root>/payloads/`, one integer per line, all in `[0, t)`. A clue file
//! holds the `n` entries of `a` followed by the `ell` entries of `b`; a
//! payload file holds `payload_slots` 16-bit values (two bytes per slot).
//! Unreadable or malformed files surface as [`OmrError::Corruption`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{OmrError, Result};
use crate::math::modular::T;
use crate::pvw::{PvwCiphertext, PvwParameters};

/// File-backed transaction repository.
pub struct TransactionStore {
    root: PathBuf,
    pvw: PvwParameters,
    payload_slots: usize,
}

impl TransactionStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, pvw: PvwParameters, payload_slots: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["clues", "payloads"] {
            fs::create_dir_all(root.join(sub))
                .map_err(|e| OmrError::Corruption(format!("creating {sub} directory: {e}")))?;
        }
        Ok(Self { root, pvw, payload_slots })
    }

    fn clue_path(&self, index: usize) -> PathBuf {
        self.root.join("clues").join(format!("{index}.txt"))
    }

    fn payload_path(&self, index: usize) -> PathBuf {
        self.root.join("payloads").join(format!("{index}.txt"))
    }

    /// Writes demo payloads for transactions `0..count`: slot j of
    /// transaction i is `(t − (i mod t) + j) mod t`.
    pub fn generate_database(&self, count: usize) -> Result<()> {
        for i in 0..count {
            let offset = (i as u64) % T;
            let mut out = String::with_capacity(self.payload_slots * 6);
            for j in 0..self.payload_slots as u64 {
                out.push_str(&format!("{}\n", (T - offset + j) % T));
            }
            self.write_file(&self.payload_path(i), &out)?;
        }
        Ok(())
    }

    /// Saves the clue of transaction `index`.
    pub fn save_clue(&self, index: usize, clue: &PvwCiphertext) -> Result<()> {
        let mut out = String::with_capacity((clue.a.len() + clue.b.len()) * 6);
        for v in clue.a.iter().chain(clue.b.iter()) {
            out.push_str(&format!("{v}\n"));
        }
        self.write_file(&self.clue_path(index), &out)
    }

    /// Loads the clues of transactions `start..end`.
    pub fn load_clues(&self, start: usize, end: usize) -> Result<Vec<PvwCiphertext>> {
        (start..end).map(|i| self.load_clue(i)).collect()
    }

    /// Loads one clue.
    pub fn load_clue(&self, index: usize) -> Result<PvwCiphertext> {
        let path = self.clue_path(index);
        let values = self.read_values(&path, self.pvw.n + self.pvw.ell)?;
        let (a, b) = values.split_at(self.pvw.n);
        Ok(PvwCiphertext { a: a.to_vec(), b: b.to_vec() })
    }

    /// Loads the payloads of transactions `start..end`.
    pub fn load_payloads(&self, start: usize, end: usize) -> Result<Vec<Vec<u64>>> {
        (start..end).map(|i| self.load_payload(i)).collect()
    }

    /// Loads one payload.
    pub fn load_payload(&self, index: usize) -> Result<Vec<u64>> {
        self.read_values(&self.payload_path(index), self.payload_slots)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        let mut file = fs::File::create(path)
            .map_err(|e| OmrError::Corruption(format!("{}: {e}", path.display())))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| OmrError::Corruption(format!("{}: {e}", path.display())))
    }

    fn read_values(&self, path: &Path, expected: usize) -> Result<Vec<u64>> {
        let text = fs::read_to_string(path)
            .map_err(|e| OmrError::Corruption(format!("{}: {e}", path.display())))?;
        let values: Vec<u64> = text
            .lines()
            .map(|line| {
                line.trim().parse::<u64>().ok().filter(|&v| v < T).ok_or_else(|| {
                    OmrError::Corruption(format!("{}: bad value {line:?}", path.display()))
                })
            })
            .collect::<Result<_>>()?;
        if values.len() != expected {
            return Err(OmrError::Corruption(format!(
                "{}: expected {expected} values, found {}",
                path.display(),
                values.len()
            )));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(dir: &tempfile::TempDir) -> TransactionStore {
        let pvw = PvwParameters { n: 8, ell: 2, ..PvwParameters::default() };
        TransactionStore::open(dir.path(), pvw, 306).unwrap()
    }

    #[test]
    fn test_payload_formula_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store.generate_database(4).unwrap();

        let payload = store.load_payload(3).unwrap();
        assert_eq!(payload.len(), 306);
        for (j, &v) in payload.iter().enumerate() {
            assert_eq!(v, (T - 3 + j as u64) % T);
        }
    }

    #[test]
    fn test_clue_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let clue = PvwCiphertext { a: (0..8).collect(), b: vec![9, T - 1] };
        store.save_clue(7, &clue).unwrap();
        assert_eq!(store.load_clue(7).unwrap(), clue);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        fs::write(dir.path().join("payloads").join("0.txt"), "12\nnot-a-number\n").unwrap();
        assert!(matches!(store.load_payload(0), Err(OmrError::Corruption(_))));
        assert!(matches!(store.load_payload(1), Err(OmrError::Corruption(_))));
    }

    #[test]
    fn test_out_of_field_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let lines = vec!["70000"; 306].join("\n");
        fs::write(dir.path().join("payloads").join("0.txt"), lines).unwrap();
        assert!(matches!(store.load_payload(0), Err(OmrError::Corruption(_))));
    }
}
