//! The multilevel operator `alpha*A*u - beta*div(B grad u)`
//!
//! [`AbecLaplacian`] ties the coefficient store, the boundary terms and the
//! kernels to a [`MeshHierarchy`]. Coefficients go through an explicit
//! invalidate/refresh cycle: setters leave the operator stale and
//! [`AbecLaplacian::update`] re-derives every level entry.

use crate::assembly::LevelStencil;
use crate::boundary::{BoundaryConditions, BoundaryTerms};
use crate::coeffs::{CoeffState, CoefficientStore, RefreshInputs, coarsen_overset_mask};
use crate::config::LinOpConfig;
use crate::error::{ConfigError, LinOpError};
use crate::kernels::{self, LevelView, SmoothStrategy};
use crate::mesh::{Fab, IMultiFab, MeshHierarchy, MultiFab};
use crate::singular::detect_singular_levels;
use amr_solvers::Communicator;

/// Variable-coefficient Helmholtz-type operator on a level hierarchy
pub struct AbecLaplacian<'c> {
    comm: &'c dyn Communicator,
    hierarchy: MeshHierarchy,
    config: LinOpConfig,
    bc: BoundaryConditions,
    ncomp: usize,
    store: CoefficientStore,
    robin: Vec<Option<MultiFab>>,
    overset: Vec<Vec<Option<IMultiFab>>>,
    terms: Vec<Vec<BoundaryTerms>>,
    singular: Vec<bool>,
}

impl<'c> AbecLaplacian<'c> {
    /// Define the operator without overset masks
    pub fn define(
        comm: &'c dyn Communicator,
        hierarchy: MeshHierarchy,
        bc: BoundaryConditions,
        ncomp: usize,
        config: LinOpConfig,
    ) -> Result<Self, ConfigError> {
        let levels = hierarchy.num_amr_levels();
        Self::define_with_overset(comm, hierarchy, bc, ncomp, config, vec![None; levels])
    }

    /// Define the operator with an optional overset mask per AMR level
    ///
    /// Masks live on relaxation level 0 of their AMR level: 1 for cells that
    /// take part in the solve, 0 for pinned cells.
    pub fn define_with_overset(
        comm: &'c dyn Communicator,
        mut hierarchy: MeshHierarchy,
        bc: BoundaryConditions,
        ncomp: usize,
        config: LinOpConfig,
        overset: Vec<Option<IMultiFab>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if ncomp == 0 {
            return Err(ConfigError::Invalid("at least one component is required".to_string()));
        }
        bc.validate(ncomp, hierarchy.geom(0, 0))?;
        if bc.has_robin() && ncomp != 1 {
            return Err(ConfigError::ComponentMismatch {
                what: "Robin boundary conditions",
                expected: 1,
                actual: ncomp,
            });
        }
        if overset.len() != hierarchy.num_amr_levels() {
            return Err(ConfigError::Invalid(format!(
                "{} overset masks for {} AMR levels",
                overset.len(),
                hierarchy.num_amr_levels()
            )));
        }

        let rank = comm.rank();
        let overset = build_overset_masks(comm, &mut hierarchy, &config, overset, rank)?;
        let store = CoefficientStore::new(&hierarchy, ncomp, rank);

        let terms = (0..hierarchy.num_amr_levels())
            .map(|amrlev| {
                (0..hierarchy.num_mg_levels(amrlev))
                    .map(|mglev| {
                        let e = hierarchy.entry(amrlev, mglev);
                        BoundaryTerms::new(&e.geom, &e.layout, rank, &bc)
                    })
                    .collect()
            })
            .collect();

        let levels = hierarchy.num_amr_levels();
        Ok(Self {
            comm,
            hierarchy,
            config,
            bc,
            ncomp,
            store,
            robin: vec![None; levels],
            overset,
            terms,
            singular: vec![false; levels],
        })
    }

    pub fn comm(&self) -> &'c dyn Communicator {
        self.comm
    }

    pub fn hierarchy(&self) -> &MeshHierarchy {
        &self.hierarchy
    }

    pub fn config(&self) -> &LinOpConfig {
        &self.config
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.bc
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn coefficients(&self) -> &CoefficientStore {
        &self.store
    }

    pub fn state(&self) -> CoeffState {
        self.store.state()
    }

    pub fn num_amr_levels(&self) -> usize {
        self.hierarchy.num_amr_levels()
    }

    pub fn num_mg_levels(&self, amrlev: usize) -> usize {
        self.hierarchy.num_mg_levels(amrlev)
    }

    /// Boundary terms of a level entry
    pub fn boundary_terms(&self, amrlev: usize, mglev: usize) -> Result<&BoundaryTerms, LinOpError> {
        self.check_entry(amrlev, mglev)?;
        Ok(&self.terms[amrlev][mglev])
    }

    /// Overset mask of a level entry, if any
    pub fn overset_mask(&self, amrlev: usize, mglev: usize) -> Option<&IMultiFab> {
        self.overset
            .get(amrlev)
            .and_then(|lev| lev.get(mglev))
            .and_then(Option::as_ref)
    }

    pub fn set_scalars(&mut self, a: f64, b: f64) {
        self.store.set_scalars(a, b);
    }

    pub fn set_a_coeffs(&mut self, amrlev: usize, alpha: &MultiFab) -> Result<(), ConfigError> {
        self.store.set_a_coeffs(amrlev, alpha)
    }

    pub fn set_a_coeffs_scalar(&mut self, amrlev: usize, alpha: f64) -> Result<(), ConfigError> {
        self.store.set_a_coeffs_scalar(amrlev, alpha)
    }

    pub fn set_b_coeffs(&mut self, amrlev: usize, beta: &[MultiFab]) -> Result<(), ConfigError> {
        self.store.set_b_coeffs(amrlev, beta)
    }

    pub fn set_b_coeffs_scalar(&mut self, amrlev: usize, beta: f64) -> Result<(), ConfigError> {
        self.store.set_b_coeffs_scalar(amrlev, beta)
    }

    pub fn set_b_coeffs_per_component(&mut self, amrlev: usize, beta: &[f64]) -> Result<(), ConfigError> {
        self.store.set_b_coeffs_per_component(amrlev, beta)
    }

    /// Robin values of an AMR level
    ///
    /// `values` is cell-centred with `3*ncomp` components and at least one
    /// ghost layer; at the ghost cells beyond a Robin face, components
    /// `3*n` and `3*n + 1` hold `a` and `b` of `a*u + b*du/dn = f` and
    /// `3*n + 2` holds `f`.
    pub fn set_robin_bc_values(&mut self, amrlev: usize, values: &MultiFab) -> Result<(), ConfigError> {
        if amrlev >= self.num_amr_levels() {
            return Err(ConfigError::LevelOutOfRange {
                level: amrlev,
                num_levels: self.num_amr_levels(),
            });
        }
        if values.ncomp() != 3 * self.ncomp {
            return Err(ConfigError::ComponentMismatch {
                what: "Robin boundary values",
                expected: 3 * self.ncomp,
                actual: values.ncomp(),
            });
        }
        if values.nghost() < 1 || !values.same_distribution(self.store.a(amrlev, 0)) {
            return Err(ConfigError::LayoutMismatch(format!(
                "Robin values of AMR level {amrlev} need one ghost layer on the level's cells"
            )));
        }
        self.robin[amrlev] = Some(values.clone());
        self.store.invalidate();
        Ok(())
    }

    /// Re-derive the coefficients of every level entry and the singularity flags
    ///
    /// Does nothing while the coefficients are current. Collective: every
    /// rank must call it.
    pub fn update(&mut self) -> Result<(), LinOpError> {
        if self.store.is_clean() {
            return Ok(());
        }
        self.average_down_coeffs()
    }

    /// Restrict the coefficients onto every coarser level entry, from the
    /// finest AMR level down, whatever the current state
    ///
    /// Robin faces are folded into relaxation level 0 first. Collective.
    pub fn average_down_coeffs(&mut self) -> Result<(), LinOpError> {
        let inputs = RefreshInputs {
            hierarchy: &self.hierarchy,
            bc: &self.bc,
            robin: &self.robin,
            overset: &self.overset,
            comm: self.comm,
        };
        self.store.refresh(&inputs)?;
        self.singular =
            detect_singular_levels(&self.hierarchy, &self.bc, &self.store, &self.overset, self.comm);
        if self.config.verbose > 0 {
            log::info!(
                "coefficients refreshed: a = {}, b = {}, singular levels {:?}",
                self.store.a_scalar(),
                self.store.b_scalar(),
                self.singular
            );
        }
        Ok(())
    }

    /// Whether AMR level `amrlev` has a null space (as of the last update)
    pub fn is_singular(&self, amrlev: usize) -> bool {
        self.singular.get(amrlev).copied().unwrap_or(false)
    }

    pub fn is_bottom_singular(&self) -> bool {
        self.is_singular(0)
    }

    fn check_entry(&self, amrlev: usize, mglev: usize) -> Result<(), LinOpError> {
        if amrlev >= self.num_amr_levels() || mglev >= self.num_mg_levels(amrlev) {
            return Err(LinOpError::NoSuchLevel { amrlev, mglev });
        }
        Ok(())
    }

    /// Coefficients of a level entry; fails while the coefficients are stale
    pub fn level_view(&self, amrlev: usize, mglev: usize) -> Result<LevelView<'_>, LinOpError> {
        self.check_entry(amrlev, mglev)?;
        if !self.store.is_clean() {
            return Err(LinOpError::StaleCoefficients);
        }
        Ok(LevelView {
            a_scalar: self.store.a_scalar(),
            b_scalar: self.store.b_scalar(),
            a: self.store.a(amrlev, mglev),
            b: self.store.b_faces(amrlev, mglev),
            geom: self.hierarchy.geom(amrlev, mglev),
            overset: self.overset_mask(amrlev, mglev),
        })
    }

    /// Exchange ghost cells between patches, then apply boundary terms
    ///
    /// Collective: every rank must call it.
    pub fn fill_ghosts(&self, amrlev: usize, mglev: usize, field: &mut MultiFab) -> Result<(), LinOpError> {
        self.check_entry(amrlev, mglev)?;
        field.fill_boundary(self.hierarchy.geom(amrlev, mglev), self.comm);
        self.terms[amrlev][mglev].fill_ghosts(field);
        Ok(())
    }

    /// `out = alpha*A*x - beta*div(B grad x)`; `x` must have filled ghost cells
    pub fn apply(&self, amrlev: usize, mglev: usize, out: &mut MultiFab, x: &MultiFab) -> Result<(), LinOpError> {
        let view = self.level_view(amrlev, mglev)?;
        kernels::apply(&view, out, x);
        Ok(())
    }

    /// Divide by the stencil diagonal
    pub fn normalize(&self, amrlev: usize, mglev: usize, field: &mut MultiFab) -> Result<(), LinOpError> {
        let view = self.level_view(amrlev, mglev)?;
        kernels::normalize(&view, field);
        Ok(())
    }

    /// `resid = rhs - apply(sol)`; `sol` must have filled ghost cells
    pub fn residual(
        &self,
        amrlev: usize,
        mglev: usize,
        resid: &mut MultiFab,
        sol: &MultiFab,
        rhs: &MultiFab,
    ) -> Result<(), LinOpError> {
        let view = self.level_view(amrlev, mglev)?;
        kernels::residual(&view, resid, sol, rhs);
        Ok(())
    }

    /// Smoother used on a level entry
    pub fn smooth_strategy(&self, amrlev: usize, mglev: usize) -> SmoothStrategy {
        SmoothStrategy::select(
            self.overset_mask(amrlev, mglev).is_some(),
            self.hierarchy.is_regular_coarsening(amrlev, mglev),
        )
    }

    /// One red-black half sweep of `color`
    ///
    /// Ghost cells of `sol` are refreshed first. Collective: every rank must
    /// call it.
    pub fn smooth(
        &self,
        amrlev: usize,
        mglev: usize,
        sol: &mut MultiFab,
        rhs: &MultiFab,
        color: usize,
    ) -> Result<(), LinOpError> {
        self.fill_ghosts(amrlev, mglev, sol)?;
        let view = self.level_view(amrlev, mglev)?;
        let strategy = self.smooth_strategy(amrlev, mglev);
        kernels::smooth(&view, &self.terms[amrlev][mglev], strategy, sol, rhs, color % 2);
        Ok(())
    }

    /// Face fluxes of local patch `li` on relaxation level 0; `sol` must have filled ghost cells
    pub fn flux(
        &self,
        amrlev: usize,
        li: usize,
        flux: &mut [Fab],
        sol: &Fab,
        face_only: bool,
    ) -> Result<(), LinOpError> {
        let view = self.level_view(amrlev, 0)?;
        kernels::flux(&view, li, flux, sol, face_only);
        Ok(())
    }

    /// Matrix rows of a level entry for the distributed assembler
    pub fn level_stencil(&self, amrlev: usize, mglev: usize) -> Result<LevelStencil<'_>, LinOpError> {
        let view = self.level_view(amrlev, mglev)?;
        let stencil = LevelStencil::new(
            view,
            &self.terms[amrlev][mglev],
            self.ncomp,
            amrlev == 0 && self.is_bottom_singular(),
        )?;
        Ok(stencil)
    }
}

/// Copy the caller's masks and derive the coarser relaxation levels
///
/// A coarse cell with both pinned and unpinned children ends the hierarchy
/// of AMR level 0 (when allowed) and is an error elsewhere.
fn build_overset_masks(
    comm: &dyn Communicator,
    hierarchy: &mut MeshHierarchy,
    config: &LinOpConfig,
    masks: Vec<Option<IMultiFab>>,
    rank: usize,
) -> Result<Vec<Vec<Option<IMultiFab>>>, ConfigError> {
    let mut out = Vec::with_capacity(masks.len());
    for (amrlev, mask) in masks.into_iter().enumerate() {
        let Some(mask) = mask else {
            out.push(vec![None; hierarchy.num_mg_levels(amrlev)]);
            continue;
        };
        let layout = hierarchy.layout(amrlev, 0);
        let mut finest = IMultiFab::cell(layout, hierarchy.dim(), rank, 1, 1);
        if !mask.same_distribution(&finest) || mask.ncomp() != 1 {
            return Err(ConfigError::LayoutMismatch(format!(
                "overset mask of AMR level {amrlev} is not a single-component field on the level's cells"
            )));
        }
        finest.set_val(1);
        finest.copy_from(&mask, 0, 0, 1);
        finest.fill_boundary(hierarchy.geom(amrlev, 0), comm);

        let mut levels = vec![Some(finest)];
        let mut mglev = 1;
        while mglev < hierarchy.num_mg_levels(amrlev) {
            let ratio = hierarchy.mg_ratio(amrlev, mglev);
            let Some(fine) = levels[mglev - 1].as_ref() else {
                break;
            };
            let (mut crse, mixed) = coarsen_overset_mask(fine, hierarchy.layout(amrlev, mglev), ratio);
            let mixed = comm.all_reduce_max(if mixed { 1.0 } else { 0.0 }) > 0.0;
            if mixed {
                if amrlev == 0 && config.truncate_on_mixed_overset {
                    log::warn!(
                        "overset mask cannot be coarsened below relaxation level {}; truncating the hierarchy",
                        mglev - 1
                    );
                    hierarchy.truncate_bottom(mglev);
                    break;
                }
                return Err(ConfigError::Invalid(format!(
                    "overset mask of AMR level {amrlev} has mixed cells on relaxation level {mglev}"
                )));
            }
            crse.fill_boundary(hierarchy.geom(amrlev, mglev), comm);
            levels.push(Some(crse));
            mglev += 1;
        }
        out.push(levels);
    }
    Ok(out)
}
