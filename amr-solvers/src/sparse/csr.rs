//! Compressed Sparse Row (CSR) matrix format
//!
//! CSR format stores:
//! - `values`: Non-zero entries in row-major order
//! - `col_indices`: Column index for each value
//! - `row_ptrs`: Index into values/col_indices where each row starts

use crate::traits::{LinearOperator, Scalar};
use ndarray::{Array1, Array2};
use std::ops::Range;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Rows at which the matrix-vector product switches to rayon
#[cfg(feature = "rayon")]
const PARALLEL_ROW_THRESHOLD: usize = 256;

/// Compressed Sparse Row (CSR) matrix format
///
/// The column space may be wider than the row space: a process-local block
/// of a distributed matrix stores its owned rows against global columns.
#[derive(Debug, Clone)]
pub struct CsrMatrix<T: Scalar> {
    /// Number of rows
    pub num_rows: usize,
    /// Number of columns
    pub num_cols: usize,
    /// Non-zero values in row-major order
    pub values: Vec<T>,
    /// Column indices for each value
    pub col_indices: Vec<usize>,
    /// Row pointers: row_ptrs[i] is the start index in values/col_indices for row i
    pub row_ptrs: Vec<usize>,
}

impl<T: Scalar> CsrMatrix<T> {
    /// Create a new empty CSR matrix
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptrs: vec![0; num_rows + 1],
        }
    }

    /// Create a CSR matrix from a dense matrix, keeping entries with |a_ij| > threshold
    pub fn from_dense(dense: &Array2<T>, threshold: T) -> Self {
        let triplets = dense
            .indexed_iter()
            .filter(|(_, v)| v.abs() > threshold)
            .map(|((i, j), &v)| (i, j, v))
            .collect();
        Self::from_triplets(dense.nrows(), dense.ncols(), triplets)
    }

    /// Create a CSR matrix from COO (Coordinate) format triplets
    ///
    /// Triplets are (row, col, value). Duplicate entries are summed.
    /// Explicit zeros are kept so that a row's sparsity pattern survives
    /// even when a coefficient happens to vanish.
    pub fn from_triplets(
        num_rows: usize,
        num_cols: usize,
        mut triplets: Vec<(usize, usize, T)>,
    ) -> Self {
        triplets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut values: Vec<T> = Vec::with_capacity(triplets.len());
        let mut col_indices: Vec<usize> = Vec::with_capacity(triplets.len());
        let mut row_counts = vec![0usize; num_rows];
        let mut last: Option<(usize, usize)> = None;

        for (row, col, val) in triplets {
            assert!(row < num_rows && col < num_cols, "triplet out of range");
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += val;
                }
                continue;
            }
            values.push(val);
            col_indices.push(col);
            row_counts[row] += 1;
            last = Some((row, col));
        }

        let mut row_ptrs = Vec::with_capacity(num_rows + 1);
        row_ptrs.push(0);
        for count in row_counts {
            let next = row_ptrs[row_ptrs.len() - 1] + count;
            row_ptrs.push(next);
        }

        Self {
            num_rows,
            num_cols,
            values,
            col_indices,
            row_ptrs,
        }
    }

    /// Identity matrix in CSR format
    pub fn identity(n: usize) -> Self {
        Self {
            num_rows: n,
            num_cols: n,
            values: vec![T::one(); n],
            col_indices: (0..n).collect(),
            row_ptrs: (0..=n).collect(),
        }
    }

    /// Number of non-zero entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Get the range of indices in values/col_indices for a given row
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.row_ptrs[row]..self.row_ptrs[row + 1]
    }

    /// Get the (col, value) pairs for a row
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_range(row);
        self.col_indices[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Get element at (i, j), returns 0 if not stored
    pub fn get(&self, i: usize, j: usize) -> T {
        self.row_entries(i)
            .find(|&(col, _)| col == j)
            .map_or_else(T::zero, |(_, v)| v)
    }

    /// Extract the entries a(i, i + col_offset) for every row i
    ///
    /// With `col_offset = 0` this is the ordinary diagonal; a row block of a
    /// distributed matrix passes its first global row.
    pub fn diagonal_with_offset(&self, col_offset: usize) -> Array1<T> {
        Array1::from_iter((0..self.num_rows).map(|i| self.get(i, i + col_offset)))
    }

    /// Extract diagonal elements
    pub fn diagonal(&self) -> Array1<T> {
        self.diagonal_with_offset(0)
    }

    /// Matrix-vector product: y = A * x
    pub fn matvec(&self, x: &Array1<T>) -> Array1<T> {
        assert_eq!(x.len(), self.num_cols, "Input vector size mismatch");

        #[cfg(feature = "rayon")]
        {
            if self.num_rows >= PARALLEL_ROW_THRESHOLD {
                return Array1::from_vec(
                    (0..self.num_rows)
                        .into_par_iter()
                        .map(|i| self.row_dot(i, x))
                        .collect(),
                );
            }
        }

        Array1::from_iter((0..self.num_rows).map(|i| self.row_dot(i, x)))
    }

    #[inline]
    fn row_dot(&self, row: usize, x: &Array1<T>) -> T {
        self.row_entries(row).map(|(j, a)| a * x[j]).sum()
    }
}

impl<T: Scalar> LinearOperator<T> for CsrMatrix<T> {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn apply(&self, x: &Array1<T>) -> Array1<T> {
        self.matvec(x)
    }
}
