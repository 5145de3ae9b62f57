//! Matrix rows of the cell-centred operator on one level entry

use super::{NodeIndex, PatchIds, RowBatch, StencilProvider};
use crate::boundary::{BoundaryTerms, Orientation, Side};
use crate::error::{AssemblerError, ConfigError};
use crate::kernels::{LevelView, diagonal, shift};
use crate::mesh::IntVect;

/// Borrowed view of a level entry that emits `2*dim + 1` point stencils
///
/// Per neighbour `q` of cell `p` in direction `d`, with `c = beta*B/h_d^2`:
///
/// - `q` has an id: column `id(q)` with value `-c`
/// - `q` is a boundary ghost with factor `f`: `-c*f` added to the diagonal
///   (Dirichlet faces double the coupling, Neumann and folded Robin faces cancel it)
/// - otherwise the column is dropped, leaving the coupling on the diagonal
///
/// With an overset mask a pinned cell gets an identity row and pinned
/// neighbours drop their column, matching [`crate::kernels::apply`].
#[derive(Debug, Clone, Copy)]
pub struct LevelStencil<'a> {
    view: LevelView<'a>,
    terms: &'a BoundaryTerms,
    singular: bool,
}

impl<'a> LevelStencil<'a> {
    pub fn new(
        view: LevelView<'a>,
        terms: &'a BoundaryTerms,
        ncomp: usize,
        singular: bool,
    ) -> Result<Self, ConfigError> {
        if ncomp != 1 {
            return Err(ConfigError::ComponentMismatch {
                what: "assembled operator",
                expected: 1,
                actual: ncomp,
            });
        }
        Ok(Self { view, terms, singular })
    }
}

impl<I: NodeIndex> StencilProvider<I> for LevelStencil<'_> {
    fn is_bottom_singular(&self) -> bool {
        self.singular
    }

    fn is_pinned(&self, li: usize, p: IntVect) -> bool {
        self.view.is_pinned(li, p)
    }

    fn fill_rows(&self, li: usize, ids: &PatchIds<'_, I>, batch: &mut RowBatch<I>) -> Result<(), AssemblerError> {
        let view = &self.view;
        let dh = view.dh();
        let valid = *ids.valid();
        let mut entries: Vec<(I, f64)> = Vec::with_capacity(2 * view.dim() + 1);

        for (p, row) in ids.rows() {
            entries.clear();
            if view.is_pinned(li, p) {
                batch.push_row(row, &[(row, 1.0)]);
                continue;
            }
            let mut diag = diagonal(view, li, &dh, p, 0);
            for d in 0..view.dim() {
                let bfab = view.b[d].fab(li);
                for (side, s, face) in [(Side::Low, -1, p), (Side::High, 1, shift(p, d, 1))] {
                    let c = dh[d] * bfab.get(face, 0);
                    let q = shift(p, d, s);
                    if view.is_pinned(li, q) {
                        continue;
                    }
                    if valid.contains(q) {
                        if let Some(col) = ids.id(q) {
                            entries.push((col, -c));
                        }
                        continue;
                    }
                    match self.terms.lookup(li, Orientation::new(d, side), q, 0) {
                        Some(f) => diag -= c * f,
                        None => {
                            if let Some(col) = ids.id(q) {
                                entries.push((col, -c));
                            }
                        }
                    }
                }
            }
            entries.push((row, diag));
            batch.push_row(row, &entries);
        }
        Ok(())
    }
}
