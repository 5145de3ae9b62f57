//! Detection of operators with a null space
//!
//! Without Dirichlet faces, covering the whole domain and with no pinned
//! overset cells, `-div(B grad u)` annihilates constants. The operator then
//! stays singular unless the `alpha*A` term contributes.

use crate::boundary::BoundaryConditions;
use crate::coeffs::CoefficientStore;
use crate::mesh::{IMultiFab, MeshHierarchy};
use amr_solvers::Communicator;

/// `sum(A)` at or below this fraction of `max|A|` counts as no contribution
const SINGULAR_A_TOLERANCE: f64 = 1e-12;

/// Singularity of every AMR level
///
/// Collective: every rank must call it.
pub fn detect_singular_levels<C: Communicator + ?Sized>(
    hierarchy: &MeshHierarchy,
    bc: &BoundaryConditions,
    store: &CoefficientStore,
    overset: &[Vec<Option<IMultiFab>>],
    comm: &C,
) -> Vec<bool> {
    (0..hierarchy.num_amr_levels())
        .map(|amrlev| {
            let has_overset = overset
                .get(amrlev)
                .and_then(|lev| lev.first())
                .is_some_and(Option::is_some);
            let covered = hierarchy
                .layout(amrlev, 0)
                .covers(hierarchy.geom(amrlev, 0).domain());
            if bc.has_dirichlet() || !covered || has_overset {
                return false;
            }
            if store.a_scalar() == 0.0 {
                return true;
            }
            let last = hierarchy.num_mg_levels(amrlev) - 1;
            let a = store.a(amrlev, last);
            let sum = a.sum(0, comm);
            let max = a.norm_inf(0, comm);
            sum <= max * SINGULAR_A_TOLERANCE
        })
        .collect()
}
