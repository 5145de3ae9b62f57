//! Iterative solvers for linear systems
//!
//! Krylov subspace methods for large sparse systems:
//! - [`cg`]: Conjugate Gradient - for symmetric positive definite systems
//! - [`bicgstab`]: BiCGSTAB - for general non-symmetric systems
//!
//! Both take their inner products from the operator, so the same code runs
//! on a process-local [`crate::CsrMatrix`] and on a
//! [`crate::DistributedOperator`] spread over several ranks.

mod bicgstab;
mod cg;

pub use bicgstab::{BiCgstabSolution, bicgstab};
pub use cg::{CgSolution, cg};

use crate::traits::Scalar;

/// Stopping criteria shared by the Krylov solvers
///
/// Iteration stops once `||r|| <= max(tolerance * ||b||, absolute_tolerance)`.
#[derive(Debug, Clone)]
pub struct KrylovConfig<R> {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative tolerance for convergence
    pub tolerance: R,
    /// Absolute tolerance on the residual norm
    pub absolute_tolerance: R,
    /// Log progress every N iterations (0 = no output)
    pub print_interval: usize,
}

impl Default for KrylovConfig<f64> {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-10,
            absolute_tolerance: 0.0,
            print_interval: 0,
        }
    }
}

impl<R: Scalar> KrylovConfig<R> {
    /// Residual norm below which the iteration is converged
    pub(crate) fn threshold(&self, b_norm: R) -> R {
        (self.tolerance * b_norm).max(self.absolute_tolerance)
    }

    pub(crate) fn should_log(&self, iteration: usize) -> bool {
        self.print_interval > 0 && iteration % self.print_interval == 0
    }
}

/// Below this magnitude a Krylov scalar is treated as a breakdown
pub(crate) fn breakdown<R: Scalar>(value: R) -> bool {
    value.abs() < R::from_f64_lossy(1e-300)
}
