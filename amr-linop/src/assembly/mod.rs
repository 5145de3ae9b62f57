//! Distributed assembly of a level into a global sparse system
//!
//! Numbering gives every retained point of a level a global row id: each
//! rank owns a contiguous block of rows, ordered by rank, and inside a rank
//! rows follow the local patches and, in a patch, the points with x
//! running fastest. Points that are dropped (not owned, Dirichlet or fully
//! covered) carry the sentinel `-1`.
//!
//! - [`DistributedAssembler`]: numbering, matrix and vector transfer, solve
//! - [`StencilProvider`]: supplies matrix rows patch by patch
//! - [`SparseBackend`]: the external solver side

mod assembler;
mod backend;
mod stencil;

pub use assembler::{AssemblerMasks, AssemblerState, DistributedAssembler};
pub use backend::{KrylovBackend, SolveStats, SparseBackend, VectorKind};
pub use stencil::LevelStencil;

use crate::error::AssemblerError;
use crate::mesh::{BaseFab, FieldValue, IFab, IndexBox, IntVect};
use std::fmt::Debug;

/// Integer type of global row ids
pub trait NodeIndex: FieldValue + Ord + Debug {
    /// Name used in overflow errors
    const NAME: &'static str;
    /// Id of a dropped point
    const SENTINEL: Self;

    /// Convert, or `None` if `v` does not fit
    fn from_i64(v: i64) -> Option<Self>;

    fn to_i64(self) -> i64;

    fn is_sentinel(self) -> bool {
        self.to_i64() < 0
    }
}

macro_rules! impl_node_index {
    ($($t:ty),*) => {$(
        impl NodeIndex for $t {
            const NAME: &'static str = stringify!($t);
            const SENTINEL: Self = -1;

            fn from_i64(v: i64) -> Option<Self> {
                <$t>::try_from(v).ok()
            }

            fn to_i64(self) -> i64 {
                i64::from(self)
            }
        }
    )*};
}

impl_node_index!(i16, i32, i64);

/// Matrix rows in the layout expected by the backend
///
/// Row `k` has `ncols[k]` entries, stored consecutively in `cols`/`values`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch<I> {
    pub rows: Vec<I>,
    pub ncols: Vec<usize>,
    pub cols: Vec<I>,
    pub values: Vec<f64>,
}

impl<I: NodeIndex> RowBatch<I> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            ncols: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.ncols.clear();
        self.cols.clear();
        self.values.clear();
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Append one row
    pub fn push_row(&mut self, row: I, entries: &[(I, f64)]) {
        self.rows.push(row);
        self.ncols.push(entries.len());
        for &(c, v) in entries {
            self.cols.push(c);
            self.values.push(v);
        }
    }

    /// Entries of row `k` as `(column, value)`
    pub fn row_entries(&self, k: usize) -> impl Iterator<Item = (I, f64)> + '_ {
        let start: usize = self.ncols[..k].iter().sum();
        let end = start + self.ncols[k];
        self.cols[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// Zero every off-diagonal entry of row `k`
    pub fn zero_off_diagonals(&mut self, k: usize) {
        let start: usize = self.ncols[..k].iter().sum();
        let end = start + self.ncols[k];
        let row = self.rows[k];
        for (c, v) in self.cols[start..end].iter().zip(&mut self.values[start..end]) {
            if *c != row {
                *v = 0.0;
            }
        }
    }
}

/// Node ids of one local patch, as seen by a [`StencilProvider`]
#[derive(Debug, Clone, Copy)]
pub struct PatchIds<'a, I> {
    valid: IndexBox,
    ids: &'a BaseFab<I>,
    owner: &'a IFab,
}

impl<'a, I: NodeIndex> PatchIds<'a, I> {
    pub(crate) fn new(valid: IndexBox, ids: &'a BaseFab<I>, owner: &'a IFab) -> Self {
        Self { valid, ids, owner }
    }

    pub fn valid(&self) -> &IndexBox {
        &self.valid
    }

    /// Global id at `p` (valid or ghost), `None` for the sentinel
    pub fn id(&self, p: IntVect) -> Option<I> {
        let id = self.ids.get(p, 0);
        (!id.is_sentinel()).then_some(id)
    }

    /// The rows of this patch, in numbering order
    pub fn rows(&self) -> impl Iterator<Item = (IntVect, I)> + '_ {
        self.valid
            .points()
            .filter(|&p| self.owner.get(p, 0) != 0)
            .filter_map(|p| self.id(p).map(|id| (p, id)))
    }
}

/// Source of the matrix rows of a level
pub trait StencilProvider<I: NodeIndex> {
    /// Whether the level has a null space that row 0 should pin
    fn is_bottom_singular(&self) -> bool;

    /// Whether the row at cell `p` of local patch `li` is an identity row
    /// whose right-hand side is forced to 0
    fn is_pinned(&self, _li: usize, _p: IntVect) -> bool {
        false
    }

    /// Append the rows of local patch `li`, in the order of [`PatchIds::rows`]
    fn fill_rows(&self, li: usize, ids: &PatchIds<'_, I>, batch: &mut RowBatch<I>) -> Result<(), AssemblerError>;
}
