//! Core traits for linear algebra operations
//!
//! This module defines the abstractions shared by the solvers:
//! - [`Scalar`]: real floating point types the solvers work with
//! - [`LinearOperator`]: matrix-like objects that perform matrix-vector products
//! - [`Preconditioner`]: approximate inverses applied inside Krylov iterations

use ndarray::Array1;
use num_traits::{Float, FromPrimitive, NumAssign, ToPrimitive};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait for scalar types that can be used in the solvers.
///
/// Implemented automatically for `f64` and `f32`. The discretized
/// `alpha*A*u - beta*div(B*grad u)` operators are real valued, so there is
/// no complex counterpart here.
pub trait Scalar:
    Float + NumAssign + FromPrimitive + ToPrimitive + Sum + Send + Sync + Debug + 'static
{
    /// Convert from an `f64` constant, saturating to the nearest value.
    #[inline]
    fn from_f64_lossy(v: f64) -> Self {
        Self::from_f64(v).unwrap_or_else(Self::max_value)
    }
}

impl<T> Scalar for T where
    T: Float + NumAssign + FromPrimitive + ToPrimitive + Sum + Send + Sync + Debug + 'static
{
}

/// Trait for linear operators (matrices or matrix-free operators)
///
/// The vectors passed to an operator are the rows it owns. For an operator
/// whose rows are spread over several processes, `inner_product` must return
/// the global value; the default is the local sum.
pub trait LinearOperator<T: Scalar>: Send + Sync {
    /// Number of rows held by this operator
    fn num_rows(&self) -> usize;

    /// Number of columns in the operator
    fn num_cols(&self) -> usize;

    /// Apply the operator: y = A * x
    fn apply(&self, x: &Array1<T>) -> Array1<T>;

    /// Inner product (x, y) over the rows of this operator
    fn inner_product(&self, x: &Array1<T>, y: &Array1<T>) -> T {
        assert_eq!(x.len(), y.len(), "Vector lengths must match");
        x.iter().zip(y.iter()).map(|(&a, &b)| a * b).sum()
    }

    /// 2-norm consistent with [`LinearOperator::inner_product`]
    fn norm(&self, x: &Array1<T>) -> T {
        self.inner_product(x, x).sqrt()
    }

    /// Check if the operator is square
    fn is_square(&self) -> bool {
        self.num_rows() == self.num_cols()
    }
}

/// Trait for preconditioners used in iterative solvers.
///
/// A preconditioner M approximates A^(-1). Preconditioners act row-locally,
/// so they need no communication on distributed systems.
pub trait Preconditioner<T: Scalar>: Send + Sync {
    /// Apply the preconditioner: y = M * r
    fn apply(&self, r: &Array1<T>) -> Array1<T>;
}

/// Preconditioner that does nothing (M = I)
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl<T: Scalar> Preconditioner<T> for IdentityPreconditioner {
    fn apply(&self, r: &Array1<T>) -> Array1<T> {
        r.clone()
    }
}
