//! Ghost-cell correction terms at patch edges
//!
//! For every local patch and every face orientation, a [`FaceTerms`] holds
//! on the layer of ghost cells just outside the valid box:
//!
//! - `mask`: [`COVERED`] where the ghost lies in another patch of the same
//!   level, [`NOT_COVERED`] at a coarse/fine boundary and
//!   [`OUTSIDE_DOMAIN`] beyond a non-periodic domain face
//! - `coef`: the factor `f` in `u_ghost = f * u_valid` for the homogeneous
//!   problem, per component

use super::{BcType, BoundaryConditions, Orientation, Side};
use crate::mesh::{BoxLayout, Fab, Geometry, IFab, IndexBox, MultiFab, unit};

/// Ghost lies inside another patch of the same level
pub const COVERED: i32 = 0;
/// Ghost lies in the domain but in no patch of the level
pub const NOT_COVERED: i32 = 1;
/// Ghost lies beyond a non-periodic domain face
pub const OUTSIDE_DOMAIN: i32 = 2;

/// Correction terms of one orientation of one patch
#[derive(Debug, Clone)]
pub struct FaceTerms {
    pub coef: Fab,
    pub mask: IFab,
}

/// Correction terms of all local patches of one level entry
#[derive(Debug, Clone)]
pub struct BoundaryTerms {
    dim: usize,
    faces: Vec<Vec<FaceTerms>>,
}

impl BoundaryTerms {
    /// Terms for the locally held patches of `layout`
    ///
    /// Physical faces use `f = -1` for Dirichlet and `f = 1` otherwise
    /// (Robin faces are folded into the diagonal and behave as Neumann).
    /// Coarse/fine boundaries use `f = -1`.
    pub fn new(geom: &Geometry, layout: &BoxLayout, rank: usize, bc: &BoundaryConditions) -> Self {
        let dim = geom.dim();
        let ncomp = bc.ncomp();
        let domain = geom.domain();

        let faces = layout
            .local_patches(rank)
            .into_iter()
            .map(|patch| {
                let valid = *layout.box_at(patch);
                Orientation::all(dim)
                    .map(|face| {
                        let ghosts = match face.side {
                            Side::Low => valid.adj_cell_lo(face.dir),
                            Side::High => valid.adj_cell_hi(face.dir),
                        };
                        let mut coef = Fab::new(ghosts, ncomp);
                        let mut mask = IFab::new(ghosts, 1);
                        for g in ghosts.points() {
                            let status = ghost_status(g, face.dir, geom, domain, layout);
                            mask.set(g, 0, status);
                            for comp in 0..ncomp {
                                let f = match status {
                                    COVERED => 0.0,
                                    NOT_COVERED => -1.0,
                                    _ => match bc.at(comp, face) {
                                        BcType::Dirichlet => -1.0,
                                        _ => 1.0,
                                    },
                                };
                                coef.set(g, comp, f);
                            }
                        }
                        FaceTerms { coef, mask }
                    })
                    .collect()
            })
            .collect();

        Self { dim, faces }
    }

    /// Homogeneous Neumann (`f = 1`) on every non-periodic domain face
    pub fn homogeneous_neumann(geom: &Geometry, layout: &BoxLayout, rank: usize, ncomp: usize) -> Self {
        Self::new(geom, layout, rank, &conditions_for(geom, ncomp, BcType::Neumann))
    }

    /// Homogeneous Dirichlet (`f = -1`) on every non-periodic domain face
    pub fn homogeneous_dirichlet(
        geom: &Geometry,
        layout: &BoxLayout,
        rank: usize,
        ncomp: usize,
    ) -> Self {
        Self::new(geom, layout, rank, &conditions_for(geom, ncomp, BcType::Dirichlet))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_local(&self) -> usize {
        self.faces.len()
    }

    /// Terms of local patch `li` in orientation `face`
    pub fn face(&self, li: usize, face: Orientation) -> &FaceTerms {
        &self.faces[li][face.index()]
    }

    /// Correction factor and whether the ghost is a boundary ghost
    #[inline]
    pub(crate) fn lookup(&self, li: usize, face: Orientation, ghost: [i64; 3], comp: usize) -> Option<f64> {
        let terms = &self.faces[li][face.index()];
        (terms.mask.get(ghost, 0) > COVERED).then(|| terms.coef.get(ghost, comp))
    }

    /// Set every masked ghost cell of `field` to `f * u_valid`
    ///
    /// Ghosts covered by other patches are left alone; exchange them with
    /// [`MultiFab::fill_boundary`] first.
    pub fn fill_ghosts(&self, field: &mut MultiFab) {
        assert_eq!(field.num_local(), self.faces.len(), "terms built for another layout");
        let ncomp = field.ncomp();
        for li in 0..field.num_local() {
            let fab = field.fab_mut(li);
            for face in Orientation::all(self.dim) {
                let terms = &self.faces[li][face.index()];
                let inward = match face.side {
                    Side::Low => 1,
                    Side::High => -1,
                };
                let e = unit(face.dir);
                for g in terms.mask.bx().points() {
                    if terms.mask.get(g, 0) == COVERED {
                        continue;
                    }
                    let v = [g[0] + inward * e[0], g[1] + inward * e[1], g[2] + inward * e[2]];
                    for comp in 0..ncomp {
                        let value = terms.coef.get(g, comp.min(terms.coef.ncomp() - 1)) * fab.get(v, comp);
                        fab.set(g, comp, value);
                    }
                }
            }
        }
    }
}

fn ghost_status(
    g: [i64; 3],
    dir: usize,
    geom: &Geometry,
    domain: &IndexBox,
    layout: &BoxLayout,
) -> i32 {
    if !geom.is_periodic(dir) && !(g[dir] >= domain.lo()[dir] && g[dir] <= domain.hi()[dir]) {
        return OUTSIDE_DOMAIN;
    }
    let p = geom.wrap(g);
    if layout.boxes().iter().any(|b| b.contains(p)) {
        COVERED
    } else {
        NOT_COVERED
    }
}

fn conditions_for(geom: &Geometry, ncomp: usize, kind: BcType) -> BoundaryConditions {
    let types: Vec<BcType> = (0..geom.dim())
        .map(|d| if geom.is_periodic(d) { BcType::Periodic } else { kind })
        .collect();
    BoundaryConditions::uniform(ncomp, &types, &types)
}
