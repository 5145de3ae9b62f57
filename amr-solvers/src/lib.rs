//! Linear solvers for block-structured AMR operators
//!
//! This crate provides the sparse storage and Krylov solvers behind the
//! solver backend of `amr-linop`:
//!
//! - **Sparse matrices**: CSR format with parallel matrix-vector products
//! - **Distributed systems**: row blocks of a global matrix owned by each
//!   process, with products and inner products over a [`Communicator`]
//! - **Iterative solvers**: preconditioned CG and BiCGSTAB
//! - **Preconditioners**: Jacobi
//!
//! # Example
//!
//! ```
//! use amr_solvers::{CsrMatrix, DiagonalPreconditioner, KrylovConfig, cg};
//! use ndarray::array;
//!
//! let a = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]);
//! let b = array![1.0, 2.0];
//! let m = DiagonalPreconditioner::from_csr(&a);
//! let solution = cg(&a, &m, &b, None, &KrylovConfig::default());
//! assert!(solution.converged);
//! ```

pub mod comm;
pub mod iterative;
pub mod preconditioners;
pub mod sparse;
pub mod traits;

pub use comm::{Communicator, LocalComm, SerialComm};
pub use iterative::{BiCgstabSolution, CgSolution, KrylovConfig, bicgstab, cg};
pub use preconditioners::{DiagonalPreconditioner, IdentityPreconditioner};
pub use sparse::{CsrMatrix, DistCsrMatrix, DistributedOperator, RowRange};
pub use traits::{LinearOperator, Preconditioner, Scalar};
