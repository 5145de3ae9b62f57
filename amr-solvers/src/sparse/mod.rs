//! Sparse matrix structures (CSR format)
//!
//! [`CsrMatrix`] is the process-local storage; [`DistCsrMatrix`] is a block
//! of rows of a matrix whose rows are spread over several processes.

mod csr;
mod distributed;

pub use csr::CsrMatrix;
pub use distributed::{DistCsrMatrix, DistributedOperator, RowRange};
