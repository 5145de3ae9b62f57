//! Block-structured mesh data model
//!
//! - [`IndexBox`]: inclusive integer boxes, 1-D to 3-D
//! - [`Geometry`]: domain, cell size, periodicity
//! - [`BoxLayout`]: patches and their owning ranks
//! - [`FabArray`]: per-patch field storage with ghost exchange
//! - [`MeshHierarchy`]: AMR levels and their relaxation levels

mod fab;
mod geometry;
mod hierarchy;
mod index_box;
mod layout;

pub use fab::{BaseFab, Fab, FabArray, FieldValue, IFab, IMultiFab, MultiFab};
pub use geometry::Geometry;
pub use hierarchy::{LevelEntry, MeshHierarchy};
pub use index_box::{IndexBox, IndexType, IntVect, Points, unit};
pub use layout::BoxLayout;

pub(crate) use hierarchy::ratio_vect;
