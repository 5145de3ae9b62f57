//! Patch kernels of `alpha*A*u - beta*div(B grad u)`
//!
//! Every kernel works on one level entry through a [`LevelView`]: the
//! derived coefficients, the scalars and the geometry. Inputs must carry
//! at least one layer of valid ghost cells. Patches are processed in
//! parallel.

mod smooth;

pub use smooth::{SmoothKernel, SmoothStrategy, gsrb_line, gsrb_overset, gsrb_plain, smooth};

use crate::mesh::{Fab, Geometry, IFab, IMultiFab, IntVect, MultiFab, unit};
use rayon::prelude::*;

/// Read-only view of one level entry's coefficients
#[derive(Debug, Clone, Copy)]
pub struct LevelView<'a> {
    pub a_scalar: f64,
    pub b_scalar: f64,
    pub a: &'a MultiFab,
    /// Face coefficients, one field per direction
    pub b: &'a [MultiFab],
    pub geom: &'a Geometry,
    /// 1 where the cell takes part in the solve, 0 where it is pinned
    pub overset: Option<&'a IMultiFab>,
}

impl LevelView<'_> {
    pub fn dim(&self) -> usize {
        self.geom.dim()
    }

    /// `b_scalar / h_d^2` per direction
    pub(crate) fn dh(&self) -> [f64; 3] {
        let mut dh = [0.0; 3];
        for (d, v) in dh.iter_mut().enumerate().take(self.dim()) {
            let dxi = self.geom.inv_cell_size(d);
            *v = self.b_scalar * dxi * dxi;
        }
        dh
    }

    pub(crate) fn overset_fab(&self, li: usize) -> Option<&IFab> {
        self.overset.map(|m| m.fab(li))
    }

    /// Whether cell `p` of local patch `li` is pinned by the overset mask
    pub(crate) fn is_pinned(&self, li: usize, p: IntVect) -> bool {
        self.overset_fab(li).is_some_and(|m| m.get(p, 0) == 0)
    }
}

#[inline]
pub(crate) fn shift(p: IntVect, d: usize, s: i64) -> IntVect {
    let e = unit(d);
    [p[0] + s * e[0], p[1] + s * e[1], p[2] + s * e[2]]
}

/// Stencil of patch `li` applied to `x` at cell `p`, component `n`
#[inline]
fn stencil(view: &LevelView<'_>, li: usize, dh: &[f64; 3], x: &Fab, p: IntVect, n: usize) -> f64 {
    let mask = view.overset_fab(li);
    let value = |q: IntVect| match mask {
        Some(m) if m.get(q, 0) == 0 => 0.0,
        _ => x.get(q, n),
    };
    let xc = x.get(p, n);
    let mut y = view.a_scalar * view.a.fab(li).get(p, 0) * xc;
    for d in 0..view.dim() {
        let bfab = view.b[d].fab(li);
        let hi = shift(p, d, 1);
        let b_lo = bfab.get(p, n);
        let b_hi = bfab.get(hi, n);
        y -= dh[d] * (b_hi * (value(hi) - xc) - b_lo * (xc - value(shift(p, d, -1))));
    }
    y
}

/// Stencil diagonal at cell `p`, component `n`
#[inline]
pub(crate) fn diagonal(view: &LevelView<'_>, li: usize, dh: &[f64; 3], p: IntVect, n: usize) -> f64 {
    let mut diag = view.a_scalar * view.a.fab(li).get(p, 0);
    for d in 0..view.dim() {
        let bfab = view.b[d].fab(li);
        diag += dh[d] * (bfab.get(p, n) + bfab.get(shift(p, d, 1), n));
    }
    diag
}

/// `out = alpha*A*x - beta*div(B grad x)` on the valid cells
///
/// With an overset mask, pinned cells get 0 and pinned neighbours count as 0.
pub fn apply(view: &LevelView<'_>, out: &mut MultiFab, x: &MultiFab) {
    let dh = view.dh();
    let ncomp = out.ncomp().min(x.ncomp());
    let valids = out.valid_boxes();
    out.fabs_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(li, y)| {
            let xf = x.fab(li);
            let mask = view.overset_fab(li);
            for p in valids[li].points() {
                let pinned = mask.is_some_and(|m| m.get(p, 0) == 0);
                for n in 0..ncomp {
                    let v = if pinned { 0.0 } else { stencil(view, li, &dh, xf, p, n) };
                    y.set(p, n, v);
                }
            }
        });
}

/// Divide `field` by the stencil diagonal
pub fn normalize(view: &LevelView<'_>, field: &mut MultiFab) {
    let dh = view.dh();
    let ncomp = field.ncomp();
    let valids = field.valid_boxes();
    field
        .fabs_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(li, fab)| {
            for p in valids[li].points() {
                for n in 0..ncomp {
                    let diag = diagonal(view, li, &dh, p, n);
                    fab[(p, n)] /= diag;
                }
            }
        });
}

/// `resid = rhs - apply(sol)`
pub fn residual(view: &LevelView<'_>, resid: &mut MultiFab, sol: &MultiFab, rhs: &MultiFab) {
    apply(view, resid, sol);
    let ncomp = resid.ncomp();
    let valids = resid.valid_boxes();
    resid
        .fabs_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(li, r)| {
            let b = rhs.fab(li);
            for p in valids[li].points() {
                for n in 0..ncomp {
                    r.set(p, n, b.get(p, n) - r.get(p, n));
                }
            }
        });
}

/// Face fluxes `F_d = -beta*B_d*(u_i - u_{i-1})/h_d` of local patch `li`
///
/// `flux[d]` must cover the faces normal to `d` of the patch. With
/// `face_only` only the first and last face along `d` are written.
pub fn flux(view: &LevelView<'_>, li: usize, flux: &mut [Fab], sol: &Fab, face_only: bool) {
    let cells = view.a.valid_box(li);
    let ncomp = sol.ncomp();
    for (d, fd) in flux.iter_mut().enumerate().take(view.dim()) {
        let fac = view.b_scalar * view.geom.inv_cell_size(d);
        let bfab = view.b[d].fab(li);
        let faces = cells.surrounding_faces(d);
        let mut compute = |f: IntVect| {
            let lower = shift(f, d, -1);
            for n in 0..ncomp {
                let v = -fac * bfab.get(f, n) * (sol.get(f, n) - sol.get(lower, n));
                fd.set(f, n, v);
            }
        };
        if face_only {
            let (lo, hi) = (faces.lo()[d], faces.hi()[d]);
            for side in [lo, hi] {
                let mut first = faces.lo();
                let mut last = faces.hi();
                first[d] = side;
                last[d] = side;
                for f in crate::mesh::IndexBox::new(first, last).points() {
                    compute(f);
                }
            }
        } else {
            for f in faces.points() {
                compute(f);
            }
        }
    }
}
