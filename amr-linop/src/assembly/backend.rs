//! Sparse solver backends
//!
//! [`SparseBackend`] is what the assembler talks to: a row range per rank,
//! row-wise matrix input, vector transfer and a solve. [`KrylovBackend`]
//! implements it on top of the row-distributed CSR matrix and Krylov
//! solvers of `amr-solvers`.

use super::{NodeIndex, RowBatch};
use crate::config::{BackendConfig, BackendMethod};
use crate::error::BackendError;
use amr_solvers::{
    Communicator, DiagonalPreconditioner, DistCsrMatrix, KrylovConfig, RowRange, bicgstab, cg,
};
use ndarray::Array1;

/// Which backend vector a transfer addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Rhs,
    Solution,
}

/// Outcome of a converged solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
}

/// External sparse solver
pub trait SparseBackend<I: NodeIndex> {
    /// Declare the owned rows `ilower..=iupper` (empty when `iupper < ilower`)
    ///
    /// Collective: every rank must call it.
    fn define_range(&mut self, ilower: i64, iupper: i64) -> Result<(), BackendError>;

    /// Add matrix rows; rows must be owned
    fn set_matrix_rows(&mut self, batch: &RowBatch<I>) -> Result<(), BackendError>;

    /// Finish matrix input
    fn assemble_matrix(&mut self) -> Result<(), BackendError>;

    /// Set entries of a vector at owned rows
    fn set_vector(&mut self, which: VectorKind, rows: &[I], values: &[f64]) -> Result<(), BackendError>;

    /// Read entries of a vector at owned rows into `values`
    fn get_vector(&self, which: VectorKind, rows: &[I], values: &mut [f64]) -> Result<(), BackendError>;

    /// Solve with the current right-hand side, starting from the current solution
    ///
    /// Collective: every rank must call it.
    fn solve(&mut self, rel_tol: f64, abs_tol: f64, max_iter: usize) -> Result<SolveStats, BackendError>;

    /// Whether row 0 of a singular system should be pinned
    fn adjust_singular_matrix(&self) -> bool;
}

/// [`SparseBackend`] over [`DistCsrMatrix`] with CG, BiCGSTAB or the identity
pub struct KrylovBackend<'c> {
    comm: &'c dyn Communicator,
    config: BackendConfig,
    range: Option<RowRange>,
    global_size: usize,
    triplets: Vec<(usize, usize, f64)>,
    matrix: Option<DistCsrMatrix>,
    rhs: Array1<f64>,
    x: Array1<f64>,
}

impl<'c> KrylovBackend<'c> {
    pub fn new(comm: &'c dyn Communicator, config: BackendConfig) -> Self {
        Self {
            comm,
            config,
            range: None,
            global_size: 0,
            triplets: Vec::new(),
            matrix: None,
            rhs: Array1::zeros(0),
            x: Array1::zeros(0),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Assembled matrix, once [`SparseBackend::assemble_matrix`] has run
    pub fn matrix(&self) -> Option<&DistCsrMatrix> {
        self.matrix.as_ref()
    }

    fn owned_range(&self) -> Result<RowRange, BackendError> {
        self.range.ok_or(BackendError::NotReady("define_range"))
    }

    fn local_row<I: NodeIndex>(&self, range: RowRange, row: I) -> Result<usize, BackendError> {
        let r = row.to_i64();
        if r < range.start as i64 || r >= range.end() as i64 {
            return Err(BackendError::RowOutOfRange {
                row: r,
                lower: range.start as i64,
                upper: range.end() as i64 - 1,
            });
        }
        Ok(r as usize - range.start)
    }

    fn vector(&self, which: VectorKind) -> &Array1<f64> {
        match which {
            VectorKind::Rhs => &self.rhs,
            VectorKind::Solution => &self.x,
        }
    }

    fn krylov_config(&self, rel_tol: f64, abs_tol: f64, max_iter: usize) -> KrylovConfig<f64> {
        KrylovConfig {
            max_iterations: max_iter,
            tolerance: rel_tol,
            absolute_tolerance: abs_tol,
            print_interval: self.config.print_interval,
        }
    }
}

impl<I: NodeIndex> SparseBackend<I> for KrylovBackend<'_> {
    fn define_range(&mut self, ilower: i64, iupper: i64) -> Result<(), BackendError> {
        if ilower < 0 || iupper < ilower - 1 {
            return Err(BackendError::BadRange(format!("[{ilower}, {iupper}]")));
        }
        let len = iupper - ilower + 1;
        let counts = self.comm.all_gather_count(len);
        let lowers = self.comm.all_gather_count(ilower);
        let rank = self.comm.rank();
        let expected: i64 = counts[..rank].iter().sum();
        if lowers[rank] != expected {
            return Err(BackendError::BadRange(format!(
                "rank {rank} starts at {ilower}, expected {expected}"
            )));
        }
        self.global_size = counts.iter().sum::<i64>() as usize;
        self.range = Some(RowRange::new(ilower as usize, len as usize));
        self.triplets.clear();
        self.matrix = None;
        self.rhs = Array1::zeros(len as usize);
        self.x = Array1::zeros(len as usize);
        Ok(())
    }

    fn set_matrix_rows(&mut self, batch: &RowBatch<I>) -> Result<(), BackendError> {
        let range = self.owned_range()?;
        let mut offset = 0;
        for (&row, &n) in batch.rows.iter().zip(&batch.ncols) {
            let r = self.local_row(range, row)? + range.start;
            for k in offset..offset + n {
                let col = batch.cols[k].to_i64();
                if col < 0 || col as usize >= self.global_size {
                    return Err(BackendError::BadRange(format!(
                        "column {col} of row {r} outside [0, {})",
                        self.global_size
                    )));
                }
                self.triplets.push((r, col as usize, batch.values[k]));
            }
            offset += n;
        }
        Ok(())
    }

    fn assemble_matrix(&mut self) -> Result<(), BackendError> {
        let range = self.owned_range()?;
        let triplets = std::mem::take(&mut self.triplets);
        self.matrix = Some(DistCsrMatrix::from_global_triplets(range, self.global_size, triplets));
        Ok(())
    }

    fn set_vector(&mut self, which: VectorKind, rows: &[I], values: &[f64]) -> Result<(), BackendError> {
        let range = self.owned_range()?;
        for (&row, &v) in rows.iter().zip(values) {
            let k = self.local_row(range, row)?;
            match which {
                VectorKind::Rhs => self.rhs[k] = v,
                VectorKind::Solution => self.x[k] = v,
            }
        }
        Ok(())
    }

    fn get_vector(&self, which: VectorKind, rows: &[I], values: &mut [f64]) -> Result<(), BackendError> {
        let range = self.owned_range()?;
        let vec = self.vector(which);
        for (&row, v) in rows.iter().zip(values.iter_mut()) {
            *v = vec[self.local_row(range, row)?];
        }
        Ok(())
    }

    fn solve(&mut self, rel_tol: f64, abs_tol: f64, max_iter: usize) -> Result<SolveStats, BackendError> {
        let matrix = self.matrix.as_ref().ok_or(BackendError::NotReady("assemble_matrix"))?;
        let config = self.krylov_config(rel_tol, abs_tol, max_iter);
        let (x, iterations, residual, converged) = match self.config.method {
            BackendMethod::Identity => (self.rhs.clone(), 0, 0.0, true),
            BackendMethod::Cg => {
                let op = matrix.with_comm(self.comm);
                let precond = DiagonalPreconditioner::from_distributed(matrix);
                let sol = cg(&op, &precond, &self.rhs, Some(&self.x), &config);
                (sol.x, sol.iterations, sol.residual, sol.converged)
            }
            BackendMethod::BiCgStab => {
                let op = matrix.with_comm(self.comm);
                let precond = DiagonalPreconditioner::from_distributed(matrix);
                let sol = bicgstab(&op, &precond, &self.rhs, Some(&self.x), &config);
                (sol.x, sol.iterations, sol.residual, sol.converged)
            }
        };
        if self.config.verbose > 0 {
            log::info!(
                "{:?} solve of {} rows: {} iterations, residual {:.3e}",
                self.config.method,
                self.global_size,
                iterations,
                residual
            );
        }
        if !converged {
            return Err(BackendError::NotConverged { iterations, residual });
        }
        self.x = x;
        Ok(SolveStats { iterations, residual })
    }

    fn adjust_singular_matrix(&self) -> bool {
        self.config.adjust_singular_matrix
    }
}
