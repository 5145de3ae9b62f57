//! Restriction of cell and face coefficients to coarser levels
//!
//! Cell data is volume averaged over the `r_x * r_y * r_z` children of a
//! coarse cell. Face data normal to `d` is area averaged over the children
//! lying on the coarse face: the fine faces at index `r_d * c_d` in
//! direction `d`, spanning `r_e` faces in every other direction `e`.

use crate::mesh::{Fab, Geometry, IndexBox, IndexType, IntVect, MultiFab};
use amr_solvers::Communicator;
use rayon::prelude::*;

/// Volume average of `fine` onto the cells of `region`
pub fn average_down_cells(fine: &Fab, crse: &mut Fab, region: &IndexBox, ratio: IntVect) {
    let ncomp = crse.ncomp().min(fine.ncomp());
    let volume = (ratio[0] * ratio[1] * ratio[2]) as f64;
    for c in region.points() {
        let children = IndexBox::new(c, c).refine(ratio);
        for n in 0..ncomp {
            let sum: f64 = children.points().map(|p| fine.get(p, n)).sum();
            crse.set(c, n, sum / volume);
        }
    }
}

/// Area average of faces normal to `dir` onto the faces of `region`
pub fn average_down_faces(fine: &Fab, crse: &mut Fab, region: &IndexBox, dir: usize, ratio: IntVect) {
    let ncomp = crse.ncomp().min(fine.ncomp());
    let mut tangential = ratio;
    tangential[dir] = 1;
    let area = (tangential[0] * tangential[1] * tangential[2]) as f64;
    for c in region.points() {
        let lo = [c[0] * ratio[0], c[1] * ratio[1], c[2] * ratio[2]];
        let hi = [
            lo[0] + tangential[0] - 1,
            lo[1] + tangential[1] - 1,
            lo[2] + tangential[2] - 1,
        ];
        let children = IndexBox::new(lo, hi);
        for n in 0..ncomp {
            let sum: f64 = children.points().map(|p| fine.get(p, n)).sum();
            crse.set(c, n, sum / area);
        }
    }
}

/// Restrict between two relaxation levels of the same AMR level
///
/// The coarse layout is the fine layout coarsened by `ratio`, so every
/// patch restricts on its own.
pub(crate) fn restrict_cells(fine: &MultiFab, crse: &mut MultiFab, ratio: IntVect) {
    let valids = crse.valid_boxes();
    crse.fabs_mut()
        .par_iter_mut()
        .zip(fine.fabs().par_iter())
        .zip(valids.par_iter())
        .for_each(|((c, f), vb)| average_down_cells(f, c, vb, ratio));
}

/// Face counterpart of [`restrict_cells`], one field per direction
pub(crate) fn restrict_faces(fine: &[MultiFab], crse: &mut [MultiFab], ratio: IntVect) {
    for (dir, (f, c)) in fine.iter().zip(crse.iter_mut()).enumerate() {
        let valids = c.valid_boxes();
        c.fabs_mut()
            .par_iter_mut()
            .zip(f.fabs().par_iter())
            .zip(valids.par_iter())
            .for_each(|((cf, ff), vb)| average_down_faces(ff, cf, vb, dir, ratio));
    }
}

/// Restrict onto a coarser AMR level with a different layout
///
/// Only the coarse data covered by the fine patches, or by their periodic
/// images in `crse_geom`, is overwritten. Collective: every rank must call
/// it, and the exchange all-gathers the averaged fine field.
pub(crate) fn restrict_onto_coarse<C: Communicator + ?Sized>(
    fine: &MultiFab,
    crse: &mut MultiFab,
    crse_geom: &Geometry,
    ratio: IntVect,
    comm: &C,
) {
    let ixtype = fine.ixtype();
    let mut tmp = MultiFab::new(
        &fine.layout().coarsen(ratio),
        fine.dim(),
        fine.rank(),
        ixtype,
        fine.ncomp(),
        0,
    );
    let valids = tmp.valid_boxes();
    tmp.fabs_mut()
        .par_iter_mut()
        .zip(fine.fabs().par_iter())
        .zip(valids.par_iter())
        .for_each(|((c, f), vb)| match ixtype {
            IndexType::Face(dir) => average_down_faces(f, c, vb, dir, ratio),
            _ => average_down_cells(f, c, vb, ratio),
        });

    crse.copy_valid_from(&tmp, crse_geom, comm);
}
