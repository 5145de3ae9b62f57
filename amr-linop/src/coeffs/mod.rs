//! Coefficient storage and re-derivation
//!
//! The caller sets `A` and `B` on relaxation level 0 of each AMR level. These
//! "base" fields are kept apart from the derived ones, so that a refresh
//! rebuilds every level entry from scratch:
//!
//! 1. copy the base coefficients into relaxation level 0
//! 2. fold Robin faces into `A`
//! 3. restrict down the relaxation levels and onto coarser AMR levels
//! 4. rescale faces next to pinned overset cells
//!
//! Any setter marks the store [`CoeffState::Dirty`]; kernels refuse to run
//! until the next refresh.

mod overset;
mod restrict;

pub use restrict::{average_down_cells, average_down_faces};

use crate::boundary::{BcType, BoundaryConditions, robin_a_increment};
use crate::error::ConfigError;
use crate::mesh::{IMultiFab, IndexType, MeshHierarchy, MultiFab, ratio_vect, unit};
use amr_solvers::Communicator;
pub(crate) use overset::coarsen_overset_mask;
use restrict::{restrict_cells, restrict_faces, restrict_onto_coarse};

/// Whether the derived coefficients reflect the latest setter calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoeffState {
    Dirty,
    Clean,
}

/// Everything a refresh reads besides the coefficients
pub(crate) struct RefreshInputs<'a> {
    pub hierarchy: &'a MeshHierarchy,
    pub bc: &'a BoundaryConditions,
    pub robin: &'a [Option<MultiFab>],
    pub overset: &'a [Vec<Option<IMultiFab>>],
    pub comm: &'a dyn Communicator,
}

/// `A` and `B` for every level entry, plus the scalars
#[derive(Debug, Clone)]
pub struct CoefficientStore {
    ncomp: usize,
    dim: usize,
    /// Scalars as set by the caller
    a_scalar_set: f64,
    b_scalar: f64,
    /// `a` scalar in effect after the last refresh
    a_scalar: f64,
    base_a: Vec<MultiFab>,
    base_b: Vec<Vec<MultiFab>>,
    a: Vec<Vec<MultiFab>>,
    b: Vec<Vec<Vec<MultiFab>>>,
    state: CoeffState,
}

impl CoefficientStore {
    /// Allocate coefficients for every level entry held by `rank`
    ///
    /// `A` starts at 0 and `B` at 1, with `a_scalar = 0`, `b_scalar = 1`.
    pub fn new(hierarchy: &MeshHierarchy, ncomp: usize, rank: usize) -> Self {
        let dim = hierarchy.dim();
        let mut a = Vec::with_capacity(hierarchy.num_amr_levels());
        let mut b = Vec::with_capacity(hierarchy.num_amr_levels());
        for amrlev in 0..hierarchy.num_amr_levels() {
            let mut a_lev = Vec::new();
            let mut b_lev = Vec::new();
            for mglev in 0..hierarchy.num_mg_levels(amrlev) {
                let layout = hierarchy.layout(amrlev, mglev);
                a_lev.push(MultiFab::cell(layout, dim, rank, 1, 0));
                let faces: Vec<MultiFab> = (0..dim)
                    .map(|d| {
                        let mut f = MultiFab::new(layout, dim, rank, IndexType::Face(d), ncomp, 0);
                        f.set_val(1.0);
                        f
                    })
                    .collect();
                b_lev.push(faces);
            }
            a.push(a_lev);
            b.push(b_lev);
        }
        let base_a = a.iter().map(|lev| lev[0].clone()).collect();
        let base_b = b.iter().map(|lev| lev[0].clone()).collect();

        Self {
            ncomp,
            dim,
            a_scalar_set: 0.0,
            b_scalar: 1.0,
            a_scalar: 0.0,
            base_a,
            base_b,
            a,
            b,
            state: CoeffState::Dirty,
        }
    }

    pub fn state(&self) -> CoeffState {
        self.state
    }

    pub fn is_clean(&self) -> bool {
        self.state == CoeffState::Clean
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    /// `a` scalar used by the kernels (promoted to 1 when Robin faces need it)
    pub fn a_scalar(&self) -> f64 {
        self.a_scalar
    }

    pub fn b_scalar(&self) -> f64 {
        self.b_scalar
    }

    pub fn num_amr_levels(&self) -> usize {
        self.a.len()
    }

    /// Derived `A` of a level entry
    pub fn a(&self, amrlev: usize, mglev: usize) -> &MultiFab {
        &self.a[amrlev][mglev]
    }

    /// Derived `B` normal to `dir` of a level entry
    pub fn b(&self, amrlev: usize, mglev: usize, dir: usize) -> &MultiFab {
        &self.b[amrlev][mglev][dir]
    }

    /// Derived `B` of a level entry, one field per direction
    pub fn b_faces(&self, amrlev: usize, mglev: usize) -> &[MultiFab] {
        &self.b[amrlev][mglev]
    }

    /// Mark the derived coefficients stale after a change outside the store
    pub(crate) fn invalidate(&mut self) {
        self.state = CoeffState::Dirty;
    }

    fn check_level(&self, amrlev: usize) -> Result<(), ConfigError> {
        if amrlev >= self.a.len() {
            return Err(ConfigError::LevelOutOfRange {
                level: amrlev,
                num_levels: self.a.len(),
            });
        }
        Ok(())
    }

    /// Set the scalars; `a == 0` zero-fills the base `A` of every AMR level
    pub fn set_scalars(&mut self, a: f64, b: f64) {
        self.a_scalar_set = a;
        self.a_scalar = a;
        self.b_scalar = b;
        if a == 0.0 {
            for base in &mut self.base_a {
                base.set_val(0.0);
            }
        }
        self.state = CoeffState::Dirty;
    }

    pub fn set_a_coeffs(&mut self, amrlev: usize, alpha: &MultiFab) -> Result<(), ConfigError> {
        self.check_level(amrlev)?;
        if alpha.ncomp() != 1 {
            return Err(ConfigError::ComponentMismatch {
                what: "A coefficient",
                expected: 1,
                actual: alpha.ncomp(),
            });
        }
        if !alpha.same_distribution(&self.base_a[amrlev]) {
            return Err(ConfigError::LayoutMismatch(format!(
                "A coefficient of AMR level {amrlev} is not defined on the level's patches"
            )));
        }
        self.base_a[amrlev].copy_from(alpha, 0, 0, 1);
        self.state = CoeffState::Dirty;
        Ok(())
    }

    pub fn set_a_coeffs_scalar(&mut self, amrlev: usize, alpha: f64) -> Result<(), ConfigError> {
        self.check_level(amrlev)?;
        self.base_a[amrlev].set_val(alpha);
        self.state = CoeffState::Dirty;
        Ok(())
    }

    /// Set `B` from one face field per direction with 1 (broadcast) or `ncomp` components
    pub fn set_b_coeffs(&mut self, amrlev: usize, beta: &[MultiFab]) -> Result<(), ConfigError> {
        self.check_level(amrlev)?;
        if beta.len() != self.dim {
            return Err(ConfigError::Invalid(format!(
                "B coefficient needs {} face fields, got {}",
                self.dim,
                beta.len()
            )));
        }
        let nc = beta[0].ncomp();
        if nc != 1 && nc != self.ncomp {
            return Err(ConfigError::ComponentMismatch {
                what: "B coefficient",
                expected: self.ncomp,
                actual: nc,
            });
        }
        for (d, field) in beta.iter().enumerate() {
            if field.ncomp() != nc || !field.same_distribution(&self.base_b[amrlev][d]) {
                return Err(ConfigError::LayoutMismatch(format!(
                    "B coefficient normal to direction {d} of AMR level {amrlev} does not match the level's faces"
                )));
            }
        }
        for (d, field) in beta.iter().enumerate() {
            for icomp in 0..self.ncomp {
                let src = if nc == self.ncomp { icomp } else { 0 };
                self.base_b[amrlev][d].copy_from(field, src, icomp, 1);
            }
        }
        self.state = CoeffState::Dirty;
        Ok(())
    }

    pub fn set_b_coeffs_scalar(&mut self, amrlev: usize, beta: f64) -> Result<(), ConfigError> {
        self.check_level(amrlev)?;
        for field in &mut self.base_b[amrlev] {
            field.set_val(beta);
        }
        self.state = CoeffState::Dirty;
        Ok(())
    }

    /// Constant `B` with one value per component
    pub fn set_b_coeffs_per_component(&mut self, amrlev: usize, beta: &[f64]) -> Result<(), ConfigError> {
        self.check_level(amrlev)?;
        if beta.len() != self.ncomp {
            return Err(ConfigError::ComponentMismatch {
                what: "B coefficient values",
                expected: self.ncomp,
                actual: beta.len(),
            });
        }
        for field in &mut self.base_b[amrlev] {
            for li in 0..field.num_local() {
                let fab = field.fab_mut(li);
                let region = *fab.bx();
                for (icomp, &v) in beta.iter().enumerate() {
                    fab.fill_region(&region, icomp, v);
                }
            }
        }
        self.state = CoeffState::Dirty;
        Ok(())
    }

    /// Re-derive every level entry from the base coefficients
    ///
    /// Idempotent: refreshing twice yields identical coefficients.
    pub(crate) fn refresh(&mut self, inputs: &RefreshInputs<'_>) -> Result<(), ConfigError> {
        let has_robin = inputs.bc.has_robin();
        self.a_scalar = self.a_scalar_set;
        if has_robin && self.a_scalar == 0.0 {
            log::debug!("Robin boundary present with a = 0: using a = 1 with A = 0 away from Robin faces");
            self.a_scalar = 1.0;
        }

        for amrlev in 0..self.a.len() {
            self.a[amrlev][0].copy_from(&self.base_a[amrlev], 0, 0, 1);
            for d in 0..self.dim {
                self.b[amrlev][0][d].copy_from(&self.base_b[amrlev][d], 0, 0, self.ncomp);
            }
        }

        if has_robin {
            self.fold_robin(inputs)?;
        }
        self.average_down(inputs);
        self.state = CoeffState::Clean;
        Ok(())
    }

    fn fold_robin(&mut self, inputs: &RefreshInputs<'_>) -> Result<(), ConfigError> {
        let b_over_a = self.b_scalar / self.a_scalar;
        let bc = inputs.bc;

        for amrlev in 0..self.a.len() {
            let rbc = inputs
                .robin
                .get(amrlev)
                .and_then(Option::as_ref)
                .ok_or(ConfigError::MissingMask("Robin boundary values"))?;
            let geom = inputs.hierarchy.geom(amrlev, 0);
            let domain = *geom.domain();
            let afield = &mut self.a[amrlev][0];
            let bfaces = &self.b[amrlev][0];

            for li in 0..afield.num_local() {
                let vbx = afield.valid_box(li);
                let rfab = rbc.fab(li);
                for d in 0..self.dim {
                    let dxi = geom.inv_cell_size(d);
                    let e = unit(d);
                    let blo = vbx.adj_cell_lo(d);
                    let bhi = vbx.adj_cell_hi(d);
                    let outside_lo = !domain.contains_box(&blo);
                    let outside_hi = !domain.contains_box(&bhi);
                    if !outside_lo && !outside_hi {
                        continue;
                    }
                    let bfab = bfaces[d].fab(li);
                    let afab = afield.fab_mut(li);
                    for icomp in 0..self.ncomp {
                        let (ia, ib) = (3 * icomp, 3 * icomp + 1);
                        if bc.lo(icomp, d) == BcType::Robin && outside_lo {
                            for g in blo.points() {
                                let v = [g[0] + e[0], g[1] + e[1], g[2] + e[2]];
                                afab[(v, 0)] += robin_a_increment(
                                    b_over_a,
                                    dxi,
                                    bfab.get(v, icomp),
                                    rfab.get(g, ia),
                                    rfab.get(g, ib),
                                );
                            }
                        }
                        if bc.hi(icomp, d) == BcType::Robin && outside_hi {
                            for g in bhi.points() {
                                let v = [g[0] - e[0], g[1] - e[1], g[2] - e[2]];
                                afab[(v, 0)] += robin_a_increment(
                                    b_over_a,
                                    dxi,
                                    bfab.get(g, icomp),
                                    rfab.get(g, ia),
                                    rfab.get(g, ib),
                                );
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn average_down(&mut self, inputs: &RefreshInputs<'_>) {
        for amrlev in (1..self.a.len()).rev() {
            self.average_down_same_amr_level(amrlev, inputs);
            self.average_down_to_coarse_amr_level(amrlev, inputs);
        }
        self.average_down_same_amr_level(0, inputs);
    }

    fn average_down_same_amr_level(&mut self, amrlev: usize, inputs: &RefreshInputs<'_>) {
        let a_scalar = self.a_scalar;
        let nmg = self.a[amrlev].len();
        for mglev in 1..nmg {
            let ratio = inputs.hierarchy.mg_ratio(amrlev, mglev);

            let (fine, crse) = self.a[amrlev].split_at_mut(mglev);
            if a_scalar == 0.0 {
                crse[0].set_val(0.0);
            } else {
                restrict_cells(&fine[mglev - 1], &mut crse[0], ratio);
            }

            let (fine, crse) = self.b[amrlev].split_at_mut(mglev);
            restrict_faces(&fine[mglev - 1], &mut crse[0], ratio);
        }

        for mglev in 1..nmg {
            let mask = inputs
                .overset
                .get(amrlev)
                .and_then(|lev| lev.get(mglev))
                .and_then(Option::as_ref);
            if let Some(mask) = mask {
                overset_rescale(&mut self.b[amrlev][mglev], mask, mglev);
            }
        }
    }

    fn average_down_to_coarse_amr_level(&mut self, flev: usize, inputs: &RefreshInputs<'_>) {
        let ratio = ratio_vect(self.dim, inputs.hierarchy.mg_coarsen_ratio());
        let comm = inputs.comm;
        let crse_geom = inputs.hierarchy.geom(flev - 1, 0);

        // from the last relaxation level of flev to the first of flev - 1
        if self.a_scalar != 0.0 {
            let (coarse, fine) = self.a.split_at_mut(flev);
            let last = fine[0].len() - 1;
            restrict_onto_coarse(
                &fine[0][last],
                &mut coarse[flev - 1][0],
                crse_geom,
                ratio,
                comm,
            );
        }
        let (coarse, fine) = self.b.split_at_mut(flev);
        let last = fine[0].len() - 1;
        for d in 0..self.dim {
            restrict_onto_coarse(
                &fine[0][last][d],
                &mut coarse[flev - 1][0][d],
                crse_geom,
                ratio,
                comm,
            );
        }
    }
}

/// Scale faces between a pinned and an unpinned cell on relaxation level `mglev`
fn overset_rescale(b: &mut [MultiFab], mask: &IMultiFab, mglev: usize) {
    let fac = (1_u64 << mglev) as f64;
    let osfac = 2.0 * fac / (fac + 1.0);
    for (d, field) in b.iter_mut().enumerate() {
        let e = unit(d);
        let ncomp = field.ncomp();
        for li in 0..field.num_local() {
            let faces = field.valid_box(li);
            let m = mask.fab(li);
            let fab = field.fab_mut(li);
            for f in faces.points() {
                let lower = [f[0] - e[0], f[1] - e[1], f[2] - e[2]];
                if m.get(lower, 0) + m.get(f, 0) == 1 {
                    for n in 0..ncomp {
                        fab[(f, n)] *= osfac;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinOpConfig;
    use crate::mesh::{BoxLayout, Geometry, IndexBox};
    use amr_solvers::SerialComm;
    use approx::assert_relative_eq;

    fn single_level(n: i64, dim: usize) -> MeshHierarchy {
        let geom = Geometry::uniform(dim, n).unwrap();
        let layout = BoxLayout::single_rank(vec![*geom.domain()]).unwrap();
        MeshHierarchy::single_level(geom, layout, &LinOpConfig::default()).unwrap()
    }

    fn refresh(store: &mut CoefficientStore, h: &MeshHierarchy, bc: &BoundaryConditions) {
        let robin = vec![None; h.num_amr_levels()];
        let overset = vec![Vec::new(); h.num_amr_levels()];
        let inputs = RefreshInputs {
            hierarchy: h,
            bc,
            robin: &robin,
            overset: &overset,
            comm: &SerialComm,
        };
        store.refresh(&inputs).unwrap();
    }

    #[test]
    fn test_setters_mark_dirty() {
        let h = single_level(8, 2);
        let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
        let mut store = CoefficientStore::new(&h, 1, 0);
        assert_eq!(store.state(), CoeffState::Dirty);
        refresh(&mut store, &h, &bc);
        assert!(store.is_clean());

        store.set_b_coeffs_scalar(0, 2.0).unwrap();
        assert_eq!(store.state(), CoeffState::Dirty);
        refresh(&mut store, &h, &bc);
        store.set_scalars(1.0, 1.0);
        assert_eq!(store.state(), CoeffState::Dirty);
    }

    #[test]
    fn test_a_coeffs_must_be_single_component() {
        let h = single_level(4, 1);
        let mut store = CoefficientStore::new(&h, 1, 0);
        let two = MultiFab::cell(h.layout(0, 0), 1, 0, 2, 0);
        assert!(matches!(
            store.set_a_coeffs(0, &two),
            Err(ConfigError::ComponentMismatch { expected: 1, actual: 2, .. })
        ));
        assert!(matches!(
            store.set_a_coeffs_scalar(3, 1.0),
            Err(ConfigError::LevelOutOfRange { level: 3, .. })
        ));
    }

    #[test]
    fn test_b_broadcast_and_per_component() {
        let h = single_level(4, 2);
        let bc = BoundaryConditions::all(2, 2, BcType::Dirichlet);
        let mut store = CoefficientStore::new(&h, 2, 0);
        let layout = h.layout(0, 0);
        let beta: Vec<MultiFab> = (0..2)
            .map(|d| {
                let mut f = MultiFab::new(layout, 2, 0, IndexType::Face(d), 1, 0);
                f.set_val(3.0);
                f
            })
            .collect();
        store.set_b_coeffs(0, &beta).unwrap();
        refresh(&mut store, &h, &bc);
        assert_relative_eq!(store.b(0, 0, 1).fab(0).get([1, 1, 0], 1), 3.0);

        store.set_b_coeffs_per_component(0, &[1.0, 5.0]).unwrap();
        refresh(&mut store, &h, &bc);
        assert_relative_eq!(store.b(0, 0, 0).fab(0).get([2, 1, 0], 0), 1.0);
        assert_relative_eq!(store.b(0, 1, 0).fab(0).get([1, 1, 0], 1), 5.0);

        let three = MultiFab::new(layout, 2, 0, IndexType::Face(0), 3, 0);
        assert!(store.set_b_coeffs(0, &[three.clone(), three]).is_err());
    }

    #[test]
    fn test_zero_a_scalar_zero_fills() {
        let h = single_level(8, 1);
        let bc = BoundaryConditions::all(1, 1, BcType::Neumann);
        let mut store = CoefficientStore::new(&h, 1, 0);
        store.set_a_coeffs_scalar(0, 4.0).unwrap();
        store.set_scalars(1.0, 1.0);
        refresh(&mut store, &h, &bc);
        assert_relative_eq!(store.a(0, 1).sum(0, &SerialComm), 16.0);

        store.set_scalars(0.0, 1.0);
        refresh(&mut store, &h, &bc);
        for mglev in 0..h.num_mg_levels(0) {
            assert_eq!(store.a(0, mglev).norm_inf(0, &SerialComm), 0.0);
        }
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let h = single_level(8, 2);
        let bc = BoundaryConditions::all(1, 2, BcType::Dirichlet);
        let mut store = CoefficientStore::new(&h, 1, 0);
        let mut alpha = MultiFab::cell(h.layout(0, 0), 2, 0, 1, 0);
        for p in IndexBox::from_size(&[8, 8]).points() {
            alpha.fab_mut(0).set(p, 0, (p[0] * p[1]) as f64);
        }
        store.set_scalars(2.0, 1.0);
        store.set_a_coeffs(0, &alpha).unwrap();
        refresh(&mut store, &h, &bc);
        let first = store.a(0, 2).clone();
        refresh(&mut store, &h, &bc);
        assert_eq!(store.a(0, 2).fab(0), first.fab(0));
        // children (0,0) (1,0) (0,1) (1,1) hold 0 0 0 1
        assert_relative_eq!(store.a(0, 1).fab(0).get([0, 0, 0], 0), 0.25);
    }

    #[test]
    fn test_overset_rescale_factor() {
        let h = single_level(4, 1);
        let layout = h.layout(0, 1).clone();
        let mut b = vec![MultiFab::new(&layout, 1, 0, IndexType::Face(0), 1, 0)];
        b[0].set_val(1.0);
        let mut mask = IMultiFab::cell(&layout, 1, 0, 1, 1);
        mask.set_val(1);
        mask.fab_mut(0).set([0, 0, 0], 0, 0);
        overset_rescale(&mut b, &mask, 1);
        assert_relative_eq!(b[0].fab(0).get([1, 0, 0], 0), 4.0 / 3.0);
        assert_relative_eq!(b[0].fab(0).get([2, 0, 0], 0), 1.0);
    }
}
