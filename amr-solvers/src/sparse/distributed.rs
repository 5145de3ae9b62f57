//! Row-distributed CSR matrix
//!
//! Each process stores the contiguous block of rows it owns, with columns in
//! the global numbering. Because row blocks are contiguous and ordered by
//! rank, concatenating the owned segments of a vector in rank order yields
//! the global vector, which is all a matrix-vector product needs.

use super::csr::CsrMatrix;
use crate::comm::Communicator;
use crate::traits::LinearOperator;
use ndarray::Array1;

/// Contiguous block `[start, start + len)` of global rows owned by one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowRange {
    /// First owned global row
    pub start: usize,
    /// Number of owned rows
    pub len: usize,
}

impl RowRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last owned row
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Whether `row` is owned
    pub fn contains(&self, row: usize) -> bool {
        row >= self.start && row < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The rows of a global sparse matrix owned by the calling process
#[derive(Debug, Clone)]
pub struct DistCsrMatrix {
    range: RowRange,
    global_size: usize,
    local: CsrMatrix<f64>,
}

impl DistCsrMatrix {
    /// Build the owned block from `(global_row, global_col, value)` triplets
    ///
    /// Duplicate entries are summed.
    ///
    /// # Panics
    ///
    /// Panics if a row is outside `range` or a column is not below `global_size`.
    pub fn from_global_triplets(
        range: RowRange,
        global_size: usize,
        triplets: Vec<(usize, usize, f64)>,
    ) -> Self {
        assert!(
            range.end() <= global_size,
            "row range {:?} exceeds global size {}",
            range,
            global_size
        );
        let local_triplets = triplets
            .into_iter()
            .map(|(row, col, v)| {
                assert!(range.contains(row), "row {row} is not owned by {range:?}");
                (row - range.start, col, v)
            })
            .collect();
        Self {
            range,
            global_size,
            local: CsrMatrix::from_triplets(range.len, global_size, local_triplets),
        }
    }

    /// Owned row block
    pub fn range(&self) -> RowRange {
        self.range
    }

    /// Number of rows (and columns) of the global matrix
    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// Local CSR storage: owned rows against global columns
    pub fn local(&self) -> &CsrMatrix<f64> {
        &self.local
    }

    /// Entry at a global (row, col); the row must be owned
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(self.range.contains(row), "row {row} is not owned");
        self.local.get(row - self.range.start, col)
    }

    /// Diagonal entries of the owned rows
    pub fn diagonal(&self) -> Array1<f64> {
        self.local.diagonal_with_offset(self.range.start)
    }

    /// Distributed product y = A * x on owned segments
    ///
    /// Collective: every rank must call it.
    pub fn matvec<C: Communicator + ?Sized>(&self, comm: &C, x: &Array1<f64>) -> Array1<f64> {
        assert_eq!(x.len(), self.range.len, "owned segment size mismatch");
        let full = comm.all_gather_concat(&x.to_vec());
        assert_eq!(
            full.len(),
            self.global_size,
            "row ranges of the communicator group do not tile the global system"
        );
        self.local.matvec(&Array1::from_vec(full))
    }

    /// Bind the matrix to a communicator so it can drive the Krylov solvers
    pub fn with_comm<'a, C: Communicator + ?Sized>(
        &'a self,
        comm: &'a C,
    ) -> DistributedOperator<'a, C> {
        DistributedOperator { matrix: self, comm }
    }
}

/// A [`DistCsrMatrix`] together with the communicator of its process group
///
/// Vectors are owned segments; inner products are reduced over all ranks.
pub struct DistributedOperator<'a, C: Communicator + ?Sized> {
    matrix: &'a DistCsrMatrix,
    comm: &'a C,
}

impl<C: Communicator + ?Sized> LinearOperator<f64> for DistributedOperator<'_, C> {
    fn num_rows(&self) -> usize {
        self.matrix.range.len
    }

    fn num_cols(&self) -> usize {
        self.matrix.global_size
    }

    fn apply(&self, x: &Array1<f64>) -> Array1<f64> {
        self.matrix.matvec(self.comm, x)
    }

    fn inner_product(&self, x: &Array1<f64>, y: &Array1<f64>) -> f64 {
        assert_eq!(x.len(), y.len(), "Vector lengths must match");
        let local: f64 = x.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
        self.comm.all_reduce_sum(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalComm, SerialComm};
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::thread;

    /// 1-D Laplacian rows [-1 2 -1] on `n` unknowns, restricted to `range`
    fn laplacian_block(range: RowRange, n: usize) -> DistCsrMatrix {
        let mut triplets = Vec::new();
        for row in range.start..range.end() {
            triplets.push((row, row, 2.0));
            if row > 0 {
                triplets.push((row, row - 1, -1.0));
            }
            if row + 1 < n {
                triplets.push((row, row + 1, -1.0));
            }
        }
        DistCsrMatrix::from_global_triplets(range, n, triplets)
    }

    #[test]
    fn test_serial_block_matches_local_matvec() {
        let a = laplacian_block(RowRange::new(0, 3), 3);
        let y = a.matvec(&SerialComm, &array![1.0, 2.0, 3.0]);
        assert_relative_eq!(y[0], 0.0);
        assert_relative_eq!(y[1], 0.0);
        assert_relative_eq!(y[2], 4.0);
        assert_relative_eq!(a.diagonal()[1], 2.0);
    }

    #[test]
    fn test_two_rank_matvec_and_dot() {
        let comms = LocalComm::group(2);
        let ranges = [RowRange::new(0, 2), RowRange::new(2, 2)];
        let x_full = [1.0, 4.0, 9.0, 16.0];

        let outputs: Vec<(Vec<f64>, f64)> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .zip(ranges)
                .map(|(comm, range)| {
                    s.spawn(move || {
                        let a = laplacian_block(range, 4);
                        let x = Array1::from_vec(x_full[range.start..range.end()].to_vec());
                        let op = a.with_comm(comm);
                        let y = op.apply(&x);
                        (y.to_vec(), op.inner_product(&x, &x))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        });

        let y: Vec<f64> = outputs.iter().flat_map(|(y, _)| y.clone()).collect();
        assert_eq!(y, vec![-2.0, -2.0, -2.0, 23.0]);
        for (_, dot) in &outputs {
            assert_relative_eq!(*dot, 1.0 + 16.0 + 81.0 + 256.0);
        }
    }

    #[test]
    #[should_panic(expected = "is not owned")]
    fn test_rejects_foreign_row() {
        let _ = DistCsrMatrix::from_global_triplets(RowRange::new(2, 2), 4, vec![(0, 0, 1.0)]);
    }
}
