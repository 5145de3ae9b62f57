//! Global numbering and the solve life cycle
//!
//! The assembler borrows the level's geometry, layout and masks, numbers
//! the retained points once and then runs any number of solves against the
//! same matrix:
//!
//! `Uninitialized -> NodesNumbered -> MatrixAssembled -> VectorsLoaded -> Solved -> SolutionScattered`
//!
//! After `SolutionScattered` the next load starts over from the assembled
//! matrix.

use super::backend::{SolveStats, SparseBackend, VectorKind};
use super::{NodeIndex, PatchIds, RowBatch, StencilProvider};
use crate::error::{AssemblerError, ConfigError};
use crate::mesh::{BoxLayout, FabArray, Geometry, IMultiFab, IndexType, IntVect, MultiFab};
use amr_solvers::Communicator;

/// Progress of a [`DistributedAssembler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Uninitialized,
    NodesNumbered,
    MatrixAssembled,
    VectorsLoaded,
    Solved,
    SolutionScattered,
}

/// Optional masks of the assembled level
///
/// `owner` and `dirichlet` live on the assembled index type, nonzero marks
/// owned and Dirichlet points. `covered` is cell-centred (nonzero marks a
/// cut-cell covered cell) and needs a ghost layer for nodal assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerMasks<'a> {
    pub owner: Option<&'a IMultiFab>,
    pub dirichlet: Option<&'a IMultiFab>,
    pub covered: Option<&'a IMultiFab>,
}

/// Numbers the points of a level and drives a [`SparseBackend`]
pub struct DistributedAssembler<'a, I: NodeIndex, B: SparseBackend<I>> {
    comm: &'a dyn Communicator,
    geom: &'a Geometry,
    layout: &'a BoxLayout,
    ixtype: IndexType,
    dirichlet: Option<&'a IMultiFab>,
    covered: Option<&'a IMultiFab>,
    owner: IMultiFab,
    ids: FabArray<I>,
    counts: Vec<i64>,
    proc_begin: i64,
    proc_end: i64,
    rows: Vec<Vec<(IntVect, I)>>,
    /// Per patch, whether each row of `rows` is an identity row
    pinned: Vec<Vec<bool>>,
    pin_row0: bool,
    backend: B,
    state: AssemblerState,
}

impl<'a, I: NodeIndex, B: SparseBackend<I>> DistributedAssembler<'a, I, B> {
    pub fn new(
        comm: &'a dyn Communicator,
        geom: &'a Geometry,
        layout: &'a BoxLayout,
        ixtype: IndexType,
        masks: AssemblerMasks<'a>,
        backend: B,
    ) -> Result<Self, AssemblerError> {
        let dim = geom.dim();
        let rank = comm.rank();
        let ids = FabArray::new(layout, dim, rank, ixtype, 1, 1);

        for (name, mask) in [("owner", masks.owner), ("dirichlet", masks.dirichlet)] {
            if mask.is_some_and(|m| !m.same_distribution(&ids)) {
                return Err(ConfigError::LayoutMismatch(format!(
                    "{name} mask is not defined on the assembled points"
                ))
                .into());
            }
        }
        if let Some(covered) = masks.covered {
            let cells = IMultiFab::cell(layout, dim, rank, 1, 0);
            let ghosts_needed = if ixtype == IndexType::Cell { 0 } else { 1 };
            if !covered.same_distribution(&cells) || covered.nghost() < ghosts_needed {
                return Err(ConfigError::LayoutMismatch(
                    "covered flags must be cell-centred on the level's patches".to_string(),
                )
                .into());
            }
        }

        let owner = match masks.owner {
            Some(m) => m.clone(),
            None => default_owner(geom, layout, ixtype, rank),
        };

        Ok(Self {
            comm,
            geom,
            layout,
            ixtype,
            dirichlet: masks.dirichlet,
            covered: masks.covered,
            owner,
            ids,
            counts: Vec::new(),
            proc_begin: 0,
            proc_end: 0,
            rows: Vec::new(),
            pinned: Vec::new(),
            pin_row0: false,
            backend,
            state: AssemblerState::Uninitialized,
        })
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Global ids, including the ghost layer; `-1` marks dropped points
    pub fn node_ids(&self) -> &FabArray<I> {
        &self.ids
    }

    /// Owned rows `(ilower, iupper)`; empty when `iupper < ilower`
    pub fn range(&self) -> (i64, i64) {
        (self.proc_begin, self.proc_end - 1)
    }

    /// Retained points per rank
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn global_size(&self) -> i64 {
        self.counts.iter().sum()
    }

    fn expect_state(&self, operation: &'static str, allowed: &[AssemblerState]) -> Result<(), AssemblerError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AssemblerError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn retained(&self, li: usize, p: IntVect) -> bool {
        if self.owner.fab(li).get(p, 0) == 0 {
            return false;
        }
        if self.dirichlet.is_some_and(|m| m.fab(li).get(p, 0) != 0) {
            return false;
        }
        match self.covered {
            Some(flags) => !self.all_covered(flags, li, p),
            None => true,
        }
    }

    /// Cells have their own flag; other points are dropped when every cell around them is covered
    fn all_covered(&self, flags: &IMultiFab, li: usize, p: IntVect) -> bool {
        let fab = flags.fab(li);
        if self.ixtype == IndexType::Cell {
            return fab.get(p, 0) != 0;
        }
        let dim = self.geom.dim();
        (0..1_usize << dim).all(|corner| {
            let mut q = p;
            for (d, x) in q.iter_mut().enumerate().take(dim) {
                *x -= ((corner >> d) & 1) as i64;
            }
            fab.get(q, 0) != 0
        })
    }

    /// Give every retained owned point a global id and agree on shared ids
    ///
    /// Collective: every rank must call it.
    pub fn number_nodes(&mut self) -> Result<(), AssemblerError> {
        self.expect_state("number_nodes", &[AssemblerState::Uninitialized])?;

        let valids = self.ids.valid_boxes();
        let patch_counts: Vec<i64> = valids
            .iter()
            .enumerate()
            .map(|(li, vb)| vb.points().filter(|&p| self.retained(li, p)).count() as i64)
            .collect();
        let local: i64 = patch_counts.iter().sum();
        self.counts = self.comm.all_gather_count(local);
        let total = self.global_size();
        if total > 0 && I::from_i64(total - 1).is_none() {
            return Err(ConfigError::IndexOverflow {
                count: total,
                index_type: I::NAME,
            }
            .into());
        }
        let rank = self.comm.rank();
        self.proc_begin = self.counts[..rank].iter().sum();
        self.proc_end = self.proc_begin + local;

        self.ids.set_val(I::SENTINEL);
        let mut offset = self.proc_begin;
        for (li, vb) in valids.iter().enumerate() {
            let mut next = offset;
            for p in vb.points() {
                if self.retained(li, p) {
                    let id = I::from_i64(next).ok_or(ConfigError::IndexOverflow {
                        count: total,
                        index_type: I::NAME,
                    })?;
                    self.ids.fab_mut(li).set(p, 0, id);
                    next += 1;
                }
            }
            offset += patch_counts[li];
        }

        self.sync_ids();
        self.rows = valids
            .iter()
            .enumerate()
            .map(|(li, vb)| PatchIds::new(*vb, self.ids.fab(li), self.owner.fab(li)).rows().collect())
            .collect();

        log::debug!(
            "rank {}: rows [{}, {}) of {}",
            rank,
            self.proc_begin,
            self.proc_end,
            total
        );
        self.state = AssemblerState::NodesNumbered;
        Ok(())
    }

    /// Owner values win at shared points, then ghosts take their neighbours' ids
    ///
    /// Every copy of a point other than the owner's holds the sentinel, so
    /// taking the maximum over all images (periodic ones included) does both.
    fn sync_ids(&mut self) {
        let sources = self.ids.gather_valid(self.comm);
        let shifts = self.geom.periodic_shifts();
        let valids = self.ids.valid_boxes();
        let (nghost, dim) = (self.ids.nghost(), self.geom.dim());
        for (li, fab) in self.ids.fabs_mut().iter_mut().enumerate() {
            let grown = valids[li].grow(nghost, dim);
            for src in sources.iter().flatten() {
                for s in &shifts {
                    let Some(region) = grown.intersect(&src.bx().shifted(*s)) else {
                        continue;
                    };
                    for p in region.points() {
                        let v = src.get([p[0] - s[0], p[1] - s[1], p[2] - s[2]], 0);
                        if v > fab.get(p, 0) {
                            fab.set(p, 0, v);
                        }
                    }
                }
            }
        }
    }

    /// Hand the matrix rows of every local patch to the backend
    ///
    /// Collective: every rank must call it.
    pub fn assemble_matrix<P: StencilProvider<I> + ?Sized>(&mut self, provider: &P) -> Result<(), AssemblerError> {
        self.expect_state("assemble_matrix", &[AssemblerState::NodesNumbered])?;
        self.backend.define_range(self.proc_begin, self.proc_end - 1)?;

        let pin = self.backend.adjust_singular_matrix() && provider.is_bottom_singular();
        self.pin_row0 = false;
        self.pinned = vec![Vec::new(); self.rows.len()];
        let mut batch = RowBatch::new();
        for li in 0..self.ids.num_local() {
            if self.rows[li].is_empty() {
                continue;
            }
            batch.clear();
            self.pinned[li] = self.rows[li]
                .iter()
                .map(|&(p, _)| provider.is_pinned(li, p))
                .collect();
            let ids = PatchIds::new(self.ids.valid_box(li), self.ids.fab(li), self.owner.fab(li));
            provider.fill_rows(li, &ids, &mut batch)?;
            if pin && batch.rows.first().is_some_and(|r| r.to_i64() == 0) {
                batch.zero_off_diagonals(0);
                self.pin_row0 = true;
            }
            self.backend.set_matrix_rows(&batch)?;
        }
        self.backend.assemble_matrix()?;
        if self.pin_row0 {
            log::debug!("singular system: row 0 pinned");
        }
        self.state = AssemblerState::MatrixAssembled;
        Ok(())
    }

    /// Number the points and assemble the matrix
    pub fn setup<P: StencilProvider<I> + ?Sized>(&mut self, provider: &P) -> Result<(), AssemblerError> {
        self.number_nodes()?;
        self.assemble_matrix(provider)
    }

    fn check_field(&self, what: &str, field: &MultiFab) -> Result<(), AssemblerError> {
        if !field.same_distribution(&self.owner) {
            return Err(ConfigError::LayoutMismatch(format!(
                "{what} is not defined on the assembled points"
            ))
            .into());
        }
        Ok(())
    }

    /// Zero `soln` and pass `rhs` at the owned rows to the backend
    pub fn load_vectors(&mut self, soln: &mut MultiFab, rhs: &MultiFab) -> Result<(), AssemblerError> {
        self.expect_state(
            "load_vectors",
            &[AssemblerState::MatrixAssembled, AssemblerState::SolutionScattered],
        )?;
        self.check_field("solution", soln)?;
        self.check_field("right-hand side", rhs)?;

        soln.set_val(0.0);
        for (li, patch_rows) in self.rows.iter().enumerate() {
            if patch_rows.is_empty() {
                continue;
            }
            let rows: Vec<I> = patch_rows.iter().map(|&(_, id)| id).collect();
            let mut values: Vec<f64> = patch_rows.iter().map(|&(p, _)| rhs.fab(li).get(p, 0)).collect();
            if self.pin_row0 && rows[0].to_i64() == 0 {
                values[0] = 0.0;
            }
            for (v, &pinned) in values.iter_mut().zip(&self.pinned[li]) {
                if pinned {
                    *v = 0.0;
                }
            }
            self.backend.set_vector(VectorKind::Rhs, &rows, &values)?;
            self.backend.set_vector(VectorKind::Solution, &rows, &vec![0.0; rows.len()])?;
        }
        self.state = AssemblerState::VectorsLoaded;
        Ok(())
    }

    /// Run the backend solve
    ///
    /// On failure the loaded vectors are discarded and the assembler is back
    /// at `MatrixAssembled`. Collective: every rank must call it.
    pub fn solve_system(&mut self, rel_tol: f64, abs_tol: f64, max_iter: usize) -> Result<SolveStats, AssemblerError> {
        self.expect_state("solve_system", &[AssemblerState::VectorsLoaded])?;
        match self.backend.solve(rel_tol, abs_tol, max_iter) {
            Ok(stats) => {
                self.state = AssemblerState::Solved;
                Ok(stats)
            }
            Err(e) => {
                self.state = AssemblerState::MatrixAssembled;
                Err(e.into())
            }
        }
    }

    /// Add the backend solution into `soln`, every shared point receiving the owner's value
    ///
    /// Collective: every rank must call it.
    pub fn get_solution(&mut self, soln: &mut MultiFab) -> Result<(), AssemblerError> {
        self.expect_state("get_solution", &[AssemblerState::Solved])?;
        self.check_field("solution", soln)?;

        let mut scratch = MultiFab::new(
            self.layout,
            self.geom.dim(),
            self.comm.rank(),
            self.ixtype,
            soln.ncomp(),
            0,
        );
        for (li, patch_rows) in self.rows.iter().enumerate() {
            if patch_rows.is_empty() {
                continue;
            }
            let rows: Vec<I> = patch_rows.iter().map(|&(_, id)| id).collect();
            let mut values = vec![0.0; rows.len()];
            self.backend.get_vector(VectorKind::Solution, &rows, &mut values)?;
            let fab = scratch.fab_mut(li);
            for (&(p, _), &v) in patch_rows.iter().zip(&values) {
                fab.set(p, 0, v);
            }
        }
        soln.parallel_add_from(&scratch, self.geom, self.comm);
        self.state = AssemblerState::SolutionScattered;
        Ok(())
    }

    /// Load, solve and scatter
    pub fn solve(
        &mut self,
        soln: &mut MultiFab,
        rhs: &MultiFab,
        rel_tol: f64,
        abs_tol: f64,
        max_iter: usize,
    ) -> Result<SolveStats, AssemblerError> {
        self.load_vectors(soln, rhs)?;
        let stats = self.solve_system(rel_tol, abs_tol, max_iter)?;
        self.get_solution(soln)?;
        Ok(stats)
    }
}

/// Ownership when the caller gives none
///
/// A point shared by several patches belongs to the lowest-numbered one;
/// along periodic directions only the image inside the domain is owned.
fn default_owner(geom: &Geometry, layout: &BoxLayout, ixtype: IndexType, rank: usize) -> IMultiFab {
    let dim = geom.dim();
    let mut owner = IMultiFab::new(layout, dim, rank, ixtype, 1, 0);
    owner.set_val(1);
    if ixtype == IndexType::Cell {
        return owner;
    }
    let boxes: Vec<_> = layout
        .boxes()
        .iter()
        .map(|b| ixtype.convert(b, dim))
        .collect();
    for li in 0..owner.num_local() {
        let patch = owner.patch(li);
        let valid = owner.valid_box(li);
        let fab = owner.fab_mut(li);
        for p in valid.points() {
            let canonical = geom.wrap(p) == p;
            if !canonical || boxes[..patch].iter().any(|b| b.contains(p)) {
                fab.set(p, 0, 0);
            }
        }
    }
    owner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::KrylovBackend;
    use crate::config::{BackendConfig, BackendMethod};
    use crate::mesh::IndexBox;
    use amr_solvers::{LocalComm, SerialComm};
    use std::thread;

    fn identity() -> BackendConfig {
        BackendConfig {
            method: BackendMethod::Identity,
            ..BackendConfig::default()
        }
    }

    /// Diagonal rows with value 1
    struct UnitRows;

    impl<I: NodeIndex> StencilProvider<I> for UnitRows {
        fn is_bottom_singular(&self) -> bool {
            false
        }

        fn fill_rows(&self, _li: usize, ids: &PatchIds<'_, I>, batch: &mut RowBatch<I>) -> Result<(), AssemblerError> {
            for (_, row) in ids.rows() {
                batch.push_row(row, &[(row, 1.0)]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_single_patch_numbering_is_row_major() {
        let geom = Geometry::uniform(2, 4).unwrap();
        let layout = BoxLayout::single_rank(vec![*geom.domain()]).unwrap();
        let backend = KrylovBackend::new(&SerialComm, identity());
        let mut asm = DistributedAssembler::<i32, _>::new(
            &SerialComm,
            &geom,
            &layout,
            IndexType::Cell,
            AssemblerMasks::default(),
            backend,
        )
        .unwrap();
        asm.number_nodes().unwrap();
        assert_eq!(asm.range(), (0, 15));
        let ids = asm.node_ids().fab(0);
        for p in IndexBox::from_size(&[4, 4]).points() {
            assert_eq!(i64::from(ids.get(p, 0)), p[0] + 4 * p[1]);
        }
        assert_eq!(ids.get([-1, 0, 0], 0), -1);
    }

    #[test]
    fn test_out_of_order_operations() {
        let geom = Geometry::uniform(1, 4).unwrap();
        let layout = BoxLayout::single_rank(vec![*geom.domain()]).unwrap();
        let backend = KrylovBackend::new(&SerialComm, identity());
        let mut asm =
            DistributedAssembler::<i32, _>::new(&SerialComm, &geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
                .unwrap();
        let mut soln = MultiFab::cell(&layout, 1, 0, 1, 0);
        let rhs = MultiFab::cell(&layout, 1, 0, 1, 0);
        assert_eq!(
            asm.load_vectors(&mut soln, &rhs),
            Err(AssemblerError::InvalidState {
                operation: "load_vectors",
                state: AssemblerState::Uninitialized
            })
        );
        asm.setup(&UnitRows).unwrap();
        assert!(matches!(asm.number_nodes(), Err(AssemblerError::InvalidState { .. })));
        assert!(matches!(asm.get_solution(&mut soln), Err(AssemblerError::InvalidState { .. })));
        asm.solve(&mut soln, &rhs, 1e-10, 0.0, 10).unwrap();
        assert_eq!(asm.state(), AssemblerState::SolutionScattered);
        asm.solve(&mut soln, &rhs, 1e-10, 0.0, 10).unwrap();
    }

    #[test]
    fn test_dirichlet_points_are_dropped() {
        let geom = Geometry::uniform(1, 4).unwrap();
        let layout = BoxLayout::single_rank(vec![*geom.domain()]).unwrap();
        let mut dirichlet = IMultiFab::cell(&layout, 1, 0, 1, 0);
        dirichlet.fab_mut(0).set([0, 0, 0], 0, 1);
        let masks = AssemblerMasks {
            dirichlet: Some(&dirichlet),
            ..AssemblerMasks::default()
        };
        let backend = KrylovBackend::new(&SerialComm, identity());
        let mut asm = DistributedAssembler::<i32, _>::new(&SerialComm, &geom, &layout, IndexType::Cell, masks, backend).unwrap();
        asm.setup(&UnitRows).unwrap();
        assert_eq!(asm.global_size(), 3);

        let mut rhs = MultiFab::cell(&layout, 1, 0, 1, 0);
        for i in 0..4 {
            rhs.fab_mut(0).set([i, 0, 0], 0, 10.0 + i as f64);
        }
        let mut soln = MultiFab::cell(&layout, 1, 0, 1, 0);
        soln.set_val(7.0);
        asm.solve(&mut soln, &rhs, 1e-10, 0.0, 1).unwrap();
        assert_eq!(soln.fab(0).get([0, 0, 0], 0), 0.0);
        for i in 1..4 {
            assert_eq!(soln.fab(0).get([i, 0, 0], 0), 10.0 + i as f64);
        }
    }

    #[test]
    fn test_i16_overflow() {
        let geom = Geometry::uniform(2, 200).unwrap();
        let layout = BoxLayout::single_rank(vec![*geom.domain()]).unwrap();
        let backend = KrylovBackend::new(&SerialComm, identity());
        let mut asm =
            DistributedAssembler::<i16, _>::new(&SerialComm, &geom, &layout, IndexType::Cell, AssemblerMasks::default(), backend)
                .unwrap();
        assert_eq!(
            asm.number_nodes(),
            Err(AssemblerError::Config(ConfigError::IndexOverflow {
                count: 40000,
                index_type: "i16"
            }))
        );
    }

    #[test]
    fn test_periodic_nodes_share_ids() {
        let domain = IndexBox::from_size(&[4]);
        let geom = Geometry::new(1, domain, &[0.25], &[true]).unwrap();
        let layout = BoxLayout::contiguous(vec![IndexBox::new([0, 0, 0], [1, 0, 0]), IndexBox::new([2, 0, 0], [3, 0, 0])], 2)
            .unwrap();
        let comms = LocalComm::group(2);
        thread::scope(|s| {
            for comm in &comms {
                let (geom, layout) = (&geom, &layout);
                s.spawn(move || {
                    let backend = KrylovBackend::new(comm, identity());
                    let mut asm = DistributedAssembler::<i64, _>::new(
                        comm,
                        geom,
                        layout,
                        IndexType::Node,
                        AssemblerMasks::default(),
                        backend,
                    )
                    .unwrap();
                    asm.setup(&UnitRows).unwrap();
                    assert_eq!(asm.counts(), &[3, 1]);
                    let ids = asm.node_ids().fab(0);
                    if comm.rank() == 1 {
                        // nodes 2, 3, 4 with 4 the periodic image of 0
                        assert_eq!(ids.get([2, 0, 0], 0), 2);
                        assert_eq!(ids.get([3, 0, 0], 0), 3);
                        assert_eq!(ids.get([4, 0, 0], 0), 0);
                    }

                    let mut rhs = MultiFab::new(layout, 1, comm.rank(), IndexType::Node, 1, 0);
                    let vb = rhs.valid_box(0);
                    for p in vb.points() {
                        rhs.fab_mut(0).set(p, 0, geom.wrap(p)[0] as f64 + 1.0);
                    }
                    let mut soln = MultiFab::like(&rhs, 1, 0);
                    asm.solve(&mut soln, &rhs, 1e-10, 0.0, 1).unwrap();
                    for p in vb.points() {
                        assert_eq!(soln.fab(0).get(p, 0), geom.wrap(p)[0] as f64 + 1.0);
                    }
                });
            }
        });
    }
}
