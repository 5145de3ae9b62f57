//! Preconditioners for iterative solvers
//!
//! - **DiagonalPreconditioner** (Jacobi): diagonal scaling, fully parallel and
//!   communication free on distributed systems
//! - **IdentityPreconditioner**: no preconditioning

mod diagonal;

pub use diagonal::DiagonalPreconditioner;

pub use crate::traits::IdentityPreconditioner;
