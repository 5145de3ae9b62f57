//! Diagonal (Jacobi) preconditioner
//!
//! Scales by the inverse diagonal of A. It only involves element-wise
//! operations, so it needs no communication when the rows of A are spread
//! over several processes.

use crate::sparse::{CsrMatrix, DistCsrMatrix};
use crate::traits::{Preconditioner, Scalar};
use ndarray::Array1;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Vectors shorter than this are scaled sequentially
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Diagonal (Jacobi) preconditioner
///
/// M = diag(A)^(-1); rows with a vanishing diagonal are left unscaled.
#[derive(Debug, Clone)]
pub struct DiagonalPreconditioner<T: Scalar> {
    inv_diag: Array1<T>,
}

impl<T: Scalar> DiagonalPreconditioner<T> {
    /// Create from a diagonal vector
    pub fn from_diagonal(diag: &Array1<T>) -> Self {
        let tiny = T::from_f64_lossy(1e-300);
        let inv_diag = diag.mapv(|d| if d.abs() > tiny { d.recip() } else { T::one() });
        Self { inv_diag }
    }

    /// Create a diagonal preconditioner from a CSR matrix
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Self {
        Self::from_diagonal(&matrix.diagonal())
    }

    /// Inverse diagonal entries
    pub fn inverse_diagonal(&self) -> &Array1<T> {
        &self.inv_diag
    }
}

impl DiagonalPreconditioner<f64> {
    /// Create from the owned rows of a distributed matrix
    pub fn from_distributed(matrix: &DistCsrMatrix) -> Self {
        Self::from_diagonal(&matrix.diagonal())
    }
}

impl<T: Scalar> Preconditioner<T> for DiagonalPreconditioner<T> {
    fn apply(&self, r: &Array1<T>) -> Array1<T> {
        assert_eq!(r.len(), self.inv_diag.len(), "Vector size mismatch");

        #[cfg(feature = "rayon")]
        {
            if let (true, Some(rs), Some(ds)) = (
                r.len() >= PARALLEL_THRESHOLD,
                r.as_slice(),
                self.inv_diag.as_slice(),
            ) {
                return rs
                    .par_iter()
                    .zip(ds.par_iter())
                    .map(|(&ri, &di)| ri * di)
                    .collect::<Vec<T>>()
                    .into();
            }
        }

        r * &self.inv_diag
    }
}
