//! Multilevel `alpha*A*u - beta*div(B grad u)` operator on block-structured meshes
//!
//! This crate provides the variable-coefficient operator used inside
//! multigrid solvers on adaptively refined, patch-based meshes, together
//! with an assembler that turns one level into a distributed sparse system
//! for an external solver.
//!
//! # Features
//!
//! - **Level hierarchy**: AMR levels, each with relaxation levels derived by
//!   uniform or semi-coarsening
//! - **Coefficients**: cell `A`, face `B`, restricted by volume and face-area
//!   averaging under an explicit stale/refreshed cycle
//! - **Boundary conditions**: Dirichlet, Neumann, periodic, Robin (folded
//!   into `A`), overset masks
//! - **Kernels**: apply, normalize, residual, face fluxes and red-black
//!   Gauss-Seidel (point, overset, line)
//! - **Assembly**: global numbering over ranks, `i16`/`i32`/`i64` row ids,
//!   singular-system pinning and a Krylov backend
//!
//! # Example
//!
//! ```
//! use amr_linop::{AbecLaplacian, BcType, BoundaryConditions, BoxLayout, Geometry, LinOpConfig, MeshHierarchy, MultiFab};
//! use amr_solvers::SerialComm;
//!
//! let geom = Geometry::uniform(2, 16).unwrap();
//! let layout = BoxLayout::single_rank(BoxLayout::chop(geom.domain(), 8, 2)).unwrap();
//! let config = LinOpConfig::default();
//! let hierarchy = MeshHierarchy::single_level(geom, layout.clone(), &config).unwrap();
//! let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
//!
//! let mut op = AbecLaplacian::define(&SerialComm, hierarchy, bc, 1, config).unwrap();
//! op.set_scalars(1.0, 1.0);
//! op.set_a_coeffs_scalar(0, 1.0).unwrap();
//! op.update().unwrap();
//!
//! let mut x = MultiFab::cell(&layout, 2, 0, 1, 1);
//! x.set_val(1.0);
//! op.fill_ghosts(0, 0, &mut x).unwrap();
//! let mut y = MultiFab::cell(&layout, 2, 0, 1, 0);
//! op.apply(0, 0, &mut y, &x).unwrap();
//! ```

pub mod assembly;
pub mod boundary;
pub mod coeffs;
pub mod config;
pub mod error;
pub mod kernels;
pub mod mesh;
pub mod operator;
pub mod singular;

pub use assembly::{
    AssemblerMasks, AssemblerState, DistributedAssembler, KrylovBackend, LevelStencil, NodeIndex,
    PatchIds, RowBatch, SolveStats, SparseBackend, StencilProvider, VectorKind,
};
pub use boundary::{
    BcType, BoundaryConditions, BoundaryTerms, Orientation, Side, robin_alpha_correction,
    robin_ghost_extrapolation, robin_rhs_correction,
};
pub use coeffs::{CoeffState, CoefficientStore};
pub use config::{BackendConfig, BackendMethod, LinOpConfig};
pub use error::{AssemblerError, BackendError, ConfigError, ConfigLoadError, LinOpError};
pub use kernels::{LevelView, SmoothStrategy};
pub use mesh::{
    BoxLayout, Fab, FabArray, Geometry, IFab, IMultiFab, IndexBox, IndexType, IntVect,
    MeshHierarchy, MultiFab,
};
pub use operator::AbecLaplacian;

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
