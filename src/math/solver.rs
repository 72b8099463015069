//! Gaussian elimination over GF(t).
//!
//! Solves the sparse bucket system produced by payload compression: an
//! augmented pair `(A ∈ Z_t^{M×K}, B ∈ Z_t^{M×L})` with `M ≥ K`, yielding
//! `X ∈ Z_t^{K×L}` with `A·X ≡ B (mod t)`. Column `c` of the unknowns is the
//! payload of the transaction assigned column `c` during index recovery.

use crate::error::{OmrError, Result};
use crate::math::modular::ModT;

/// Solves `A·X ≡ B (mod t)` by forward elimination and per-column division.
///
/// `width` limits how many columns of `B` participate in the elimination
/// updates and in the returned solution rows (the payload width L).
///
/// Pivot selection: for each unknown column, the lowest-indexed row with a
/// non-zero coefficient that is not already a pivot wins; rows marked as
/// pivots are never re-selected. Rows whose coefficient equals the pivot
/// value are skipped during elimination; the bucket system is sparse enough
/// that those entries are eliminated by the time they could matter, and the
/// verification of recovered payloads catches any violation.
///
/// # Errors
///
/// [`OmrError::NoSolution`] if some column has no usable pivot.
pub fn solve(mut a: Vec<Vec<u64>>, mut b: Vec<Vec<u64>>, width: usize) -> Result<Vec<Vec<u64>>> {
    let num_rows = a.len();
    let num_cols = if num_rows == 0 { 0 } else { a[0].len() };
    if num_cols == 0 {
        return Ok(Vec::new());
    }
    debug_assert!(num_rows >= num_cols, "system must have at least as many rows as unknowns");
    debug_assert_eq!(num_rows, b.len());

    let mut pivot_rows: Vec<Option<usize>> = vec![None; num_cols];

    for col in 0..num_cols {
        let pivot = (0..num_rows)
            .find(|&r| a[r][col] != 0 && !pivot_rows.contains(&Some(r)))
            .ok_or(OmrError::NoSolution)?;
        pivot_rows[col] = Some(pivot);
        let pivot_val = a[pivot][col];

        for row in 0..num_rows {
            if row == pivot || a[row][col] == 0 || a[row][col] == pivot_val {
                continue;
            }
            let ratio = ModT::div(a[row][col], pivot_val);

            let scaled = ModT::scalar_vec_mul(&a[pivot], ratio);
            let limit = a[row].len();
            ModT::sub_vec_inplace(&mut a[row], &scaled, limit);

            let scaled = ModT::scalar_vec_mul(&b[pivot], ratio);
            ModT::sub_vec_inplace(&mut b[row], &scaled, width);
        }
    }

    let mut solution = Vec::with_capacity(num_cols);
    for col in 0..num_cols {
        let row = pivot_rows[col].expect("every column recorded a pivot");
        let inv = ModT::inv(a[row][col]);
        solution.push(b[row][..width].iter().map(|&v| ModT::mul(v, inv)).collect());
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::modular::T;

    #[test]
    fn test_two_by_two() {
        let a = vec![vec![1, 2], vec![3, 4]];
        let b = vec![vec![5, 6], vec![7, 8]];
        let x = solve(a, b, 2).unwrap();
        assert_eq!(x, vec![vec![T - 3, T - 4], vec![4, 5]]);
    }

    #[test]
    fn test_empty_system() {
        assert!(solve(Vec::new(), Vec::new(), 4).unwrap().is_empty());
    }

    #[test]
    fn test_singular_column() {
        // second column is all zeros: no pivot
        let a = vec![vec![1, 0], vec![2, 0], vec![3, 0]];
        let b = vec![vec![1], vec![2], vec![3]];
        assert!(matches!(solve(a, b, 1), Err(OmrError::NoSolution)));
    }

    #[test]
    fn test_random_system_verifies() {
        // Build A and X from a fixed LCG stream, derive B = A·X, solve, and
        // check A·X' == B.
        let mut state = 1u64;
        let mut draw = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) % T
        };
        let (rows, cols, width) = (12, 7, 5);

        let a: Vec<Vec<u64>> = (0..rows)
            .map(|_| (0..cols).map(|_| draw()).collect())
            .collect();
        let x: Vec<Vec<u64>> = (0..cols)
            .map(|_| (0..width).map(|_| draw()).collect())
            .collect();
        let b: Vec<Vec<u64>> = (0..rows)
            .map(|r| {
                (0..width)
                    .map(|w| {
                        (0..cols).fold(0u64, |acc, c| {
                            ModT::add(acc, ModT::mul(a[r][c], x[c][w]))
                        })
                    })
                    .collect()
            })
            .collect();

        let solved = solve(a.clone(), b.clone(), width).unwrap();
        for r in 0..rows {
            for w in 0..width {
                let got = (0..cols).fold(0u64, |acc, c| {
                    ModT::add(acc, ModT::mul(a[r][c], solved[c][w]))
                });
                assert_eq!(got, b[r][w], "residual at row {r}, column {w}");
            }
        }
    }
}
