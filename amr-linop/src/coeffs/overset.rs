//! Overset masks on coarser relaxation levels
//!
//! 1 marks a cell that takes part in the solve, 0 a pinned cell.

use crate::mesh::{BoxLayout, IMultiFab, IndexBox, IntVect};

/// Coarsen `fine` onto `crse_layout` (the fine layout coarsened by `ratio`)
///
/// A coarse cell is 1 when all children are 1 and 0 when all are 0. The
/// second value reports whether any local coarse cell has mixed children;
/// such cells are stored as 0. Ghost cells of the result are 1.
pub(crate) fn coarsen_overset_mask(
    fine: &IMultiFab,
    crse_layout: &BoxLayout,
    ratio: IntVect,
) -> (IMultiFab, bool) {
    let mut crse = IMultiFab::cell(crse_layout, fine.dim(), fine.rank(), 1, 1);
    crse.set_val(1);
    let mut mixed = false;
    for li in 0..crse.num_local() {
        let valid = crse.valid_box(li);
        let f = fine.fab(li);
        let c = crse.fab_mut(li);
        for p in valid.points() {
            let children = IndexBox::new(p, p).refine(ratio);
            let pinned = children.points().filter(|&q| f.get(q, 0) == 0).count() as i64;
            if pinned == 0 {
                continue;
            }
            if pinned != children.num_points() {
                mixed = true;
            }
            c.set(p, 0, 0);
        }
    }
    (crse, mixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_children() {
        let layout = BoxLayout::single_rank(vec![IndexBox::from_size(&[4, 4])]).unwrap();
        let mut fine = IMultiFab::cell(&layout, 2, 0, 1, 1);
        fine.set_val(1);
        for p in IndexBox::new([0, 0, 0], [1, 1, 0]).points() {
            fine.fab_mut(0).set(p, 0, 0);
        }
        let ratio = [2, 2, 1];
        let (crse, mixed) = coarsen_overset_mask(&fine, &layout.coarsen(ratio), ratio);
        assert!(!mixed);
        assert_eq!(crse.fab(0).get([0, 0, 0], 0), 0);
        assert_eq!(crse.fab(0).get([1, 0, 0], 0), 1);
        assert_eq!(crse.fab(0).get([-1, 0, 0], 0), 1);
    }

    #[test]
    fn test_mixed_children() {
        let layout = BoxLayout::single_rank(vec![IndexBox::from_size(&[4])]).unwrap();
        let mut fine = IMultiFab::cell(&layout, 1, 0, 1, 1);
        fine.set_val(1);
        fine.fab_mut(0).set([1, 0, 0], 0, 0);
        let ratio = [2, 1, 1];
        let (_, mixed) = coarsen_overset_mask(&fine, &layout.coarsen(ratio), ratio);
        assert!(mixed);
    }
}
