//! Red-black Gauss-Seidel half sweeps
//!
//! Boundary ghosts of `sol` hold `f*u_valid` plus any inhomogeneous part.
//! The `f*u_valid` dependence is moved to the left-hand side so the update
//! is implicit in the boundary cell:
//!
//! `phi = (rhs + rho - phi*delta)/(gamma - delta)`

use super::{LevelView, shift};
use crate::boundary::{BoundaryTerms, Orientation, Side};
use crate::mesh::{Fab, IndexBox, MultiFab};
use rayon::prelude::*;

/// One half sweep on local patch `li`: `(view, terms, li, sol, rhs, color)`
pub type SmoothKernel = fn(&LevelView<'_>, &BoundaryTerms, usize, &mut Fab, &Fab, usize);

/// Smoother variant for a level entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothStrategy {
    /// Point red-black Gauss-Seidel
    Plain,
    /// Point red-black with pinned cells held at 0
    Overset,
    /// Red-black lines along the direction of smallest cell size
    LineSolve,
}

impl SmoothStrategy {
    /// Overset masks take priority; semi-coarsened levels need line relaxation
    pub fn select(has_overset: bool, regular_coarsening: bool) -> Self {
        if has_overset {
            SmoothStrategy::Overset
        } else if regular_coarsening {
            SmoothStrategy::Plain
        } else {
            SmoothStrategy::LineSolve
        }
    }

    pub fn kernel(self) -> SmoothKernel {
        match self {
            SmoothStrategy::Plain => gsrb_plain,
            SmoothStrategy::Overset => gsrb_overset,
            SmoothStrategy::LineSolve => gsrb_line,
        }
    }
}

/// Half sweep of `color` over all local patches
pub fn smooth(
    view: &LevelView<'_>,
    terms: &BoundaryTerms,
    strategy: SmoothStrategy,
    sol: &mut MultiFab,
    rhs: &MultiFab,
    color: usize,
) {
    let kernel = strategy.kernel();
    sol.fabs_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(li, s)| kernel(view, terms, li, s, rhs.fab(li), color));
}

/// Correction factor of the ghost next to `p` on `side` of direction `d`, if `p`
/// is at the edge of `valid` and that ghost is a boundary ghost
#[inline]
fn boundary_factor(
    terms: &BoundaryTerms,
    li: usize,
    valid: &IndexBox,
    p: [i64; 3],
    d: usize,
    side: Side,
    n: usize,
) -> Option<f64> {
    let (edge, s) = match side {
        Side::Low => (valid.lo()[d], -1),
        Side::High => (valid.hi()[d], 1),
    };
    if p[d] != edge {
        return None;
    }
    terms.lookup(li, Orientation::new(d, side), shift(p, d, s), n)
}

fn point_sweep(
    view: &LevelView<'_>,
    terms: &BoundaryTerms,
    li: usize,
    sol: &mut Fab,
    rhs: &Fab,
    color: usize,
    pinned: impl Fn([i64; 3]) -> bool,
) {
    let dh = view.dh();
    let valid = view.a.valid_box(li);
    let afab = view.a.fab(li);
    let ncomp = sol.ncomp().min(rhs.ncomp());

    for p in valid.points() {
        if (p[0] + p[1] + p[2] + color as i64).rem_euclid(2) != 0 {
            continue;
        }
        if pinned(p) {
            for n in 0..ncomp {
                sol.set(p, n, 0.0);
            }
            continue;
        }
        for n in 0..ncomp {
            let neighbour = |q: [i64; 3]| if pinned(q) { 0.0 } else { sol.get(q, n) };
            let mut gamma = view.a_scalar * afab.get(p, 0);
            let mut rho = 0.0;
            let mut delta = 0.0;
            for d in 0..view.dim() {
                let bfab = view.b[d].fab(li);
                let (lo, hi) = (shift(p, d, -1), shift(p, d, 1));
                let b_lo = bfab.get(p, n);
                let b_hi = bfab.get(hi, n);
                gamma += dh[d] * (b_lo + b_hi);
                rho += dh[d] * (b_lo * neighbour(lo) + b_hi * neighbour(hi));
                if let Some(f) = boundary_factor(terms, li, &valid, p, d, Side::Low, n) {
                    delta += dh[d] * b_lo * f;
                }
                if let Some(f) = boundary_factor(terms, li, &valid, p, d, Side::High, n) {
                    delta += dh[d] * b_hi * f;
                }
            }
            let phi = sol.get(p, n);
            sol.set(p, n, (rhs.get(p, n) + rho - phi * delta) / (gamma - delta));
        }
    }
}

/// Point red-black half sweep
pub fn gsrb_plain(
    view: &LevelView<'_>,
    terms: &BoundaryTerms,
    li: usize,
    sol: &mut Fab,
    rhs: &Fab,
    color: usize,
) {
    point_sweep(view, terms, li, sol, rhs, color, |_| false);
}

/// Point red-black half sweep that keeps pinned cells at 0
///
/// Falls back to [`gsrb_plain`] when the view carries no overset mask.
pub fn gsrb_overset(
    view: &LevelView<'_>,
    terms: &BoundaryTerms,
    li: usize,
    sol: &mut Fab,
    rhs: &Fab,
    color: usize,
) {
    match view.overset {
        Some(mask) => {
            let m = mask.fab(li);
            point_sweep(view, terms, li, sol, rhs, color, |q| m.get(q, 0) == 0);
        }
        None => gsrb_plain(view, terms, li, sol, rhs, color),
    }
}

/// Red-black line half sweep
///
/// Lines run along the direction of smallest cell size and are coloured by
/// the sum of their remaining indices. Every line is solved exactly with
/// the Thomas algorithm. In 1-D the patch is a single line, solved on
/// color 0; color 1 does nothing.
pub fn gsrb_line(
    view: &LevelView<'_>,
    terms: &BoundaryTerms,
    li: usize,
    sol: &mut Fab,
    rhs: &Fab,
    color: usize,
) {
    let dim = view.dim();
    if dim == 1 && color % 2 == 1 {
        return;
    }
    let ldir = (0..dim)
        .min_by(|&a, &b| view.geom.cell_size(a).total_cmp(&view.geom.cell_size(b)))
        .unwrap_or(0);
    let dh = view.dh();
    let valid = view.a.valid_box(li);
    let afab = view.a.fab(li);
    let ncomp = sol.ncomp().min(rhs.ncomp());

    let mut section_hi = valid.hi();
    section_hi[ldir] = valid.lo()[ldir];
    let section = IndexBox::new(valid.lo(), section_hi);
    let len = valid.length(ldir) as usize;
    let mut sub = vec![0.0; len];
    let mut diag = vec![0.0; len];
    let mut sup = vec![0.0; len];
    let mut r = vec![0.0; len];
    let mut x = vec![0.0; len];

    for start in section.points() {
        let parity: i64 = (0..3).filter(|&d| d != ldir).map(|d| start[d]).sum();
        if (parity + color as i64).rem_euclid(2) != 0 {
            continue;
        }
        for n in 0..ncomp {
            for k in 0..len {
                let p = shift(start, ldir, k as i64);
                let phi = sol.get(p, n);
                let mut gamma = view.a_scalar * afab.get(p, 0);
                let mut rk = rhs.get(p, n);
                sub[k] = 0.0;
                sup[k] = 0.0;
                for d in 0..dim {
                    let bfab = view.b[d].fab(li);
                    let b_lo = bfab.get(p, n);
                    let b_hi = bfab.get(shift(p, d, 1), n);
                    gamma += dh[d] * (b_lo + b_hi);
                    for (side, s, b) in [(Side::Low, -1, b_lo), (Side::High, 1, b_hi)] {
                        let c = dh[d] * b;
                        let q = shift(p, d, s);
                        if let Some(f) = boundary_factor(terms, li, &valid, p, d, side, n) {
                            rk += c * (sol.get(q, n) - f * phi);
                            gamma -= c * f;
                        } else if d == ldir && valid.contains(q) {
                            match side {
                                Side::Low => sub[k] = -c,
                                Side::High => sup[k] = -c,
                            }
                        } else {
                            rk += c * sol.get(q, n);
                        }
                    }
                }
                diag[k] = gamma;
                r[k] = rk;
            }
            tridiagonal_solve(&sub, &diag, &sup, &r, &mut x);
            for (k, &xk) in x.iter().enumerate() {
                sol.set(shift(start, ldir, k as i64), n, xk);
            }
        }
    }
}

/// Thomas algorithm for `sub[i]*x[i-1] + diag[i]*x[i] + sup[i]*x[i+1] = r[i]`
fn tridiagonal_solve(sub: &[f64], diag: &[f64], sup: &[f64], r: &[f64], x: &mut [f64]) {
    let n = diag.len();
    if n == 0 {
        return;
    }
    let mut cp = vec![0.0; n];
    let mut dp = vec![0.0; n];
    cp[0] = sup[0] / diag[0];
    dp[0] = r[0] / diag[0];
    for i in 1..n {
        let m = diag[i] - sub[i] * cp[i - 1];
        cp[i] = sup[i] / m;
        dp[i] = (r[i] - sub[i] * dp[i - 1]) / m;
    }
    x[n - 1] = dp[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = dp[i] - cp[i] * x[i + 1];
    }
}
