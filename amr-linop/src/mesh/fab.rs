//! Patch-based field storage
//!
//! A [`BaseFab`] holds the data of one patch (grown by its ghost layers) in
//! an `ndarray::Array4` indexed `[comp, k, j, i]`, so x is the fastest
//! running index. A [`FabArray`] holds the patches of a layout that live on
//! the calling process.
//!
//! The exchanges ([`FabArray::fill_boundary`], [`FabArray::copy_valid_from`]
//! and [`FabArray::parallel_add_from`]) all go through
//! [`FabArray::gather_valid`], which all-gathers the whole field. Each rank
//! therefore receives O(global) data per exchange, not just its halo.

use super::geometry::Geometry;
use super::index_box::{IndexBox, IndexType, IntVect};
use super::layout::BoxLayout;
use amr_solvers::Communicator;
use ndarray::Array4;
use rayon::prelude::*;
use std::fmt::Debug;
use std::ops::{AddAssign, Index, IndexMut};

/// Values that can be stored in a field and exchanged between ranks
pub trait FieldValue: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Gather one buffer from every rank, indexed by rank
    fn all_gather<C: Communicator + ?Sized>(comm: &C, local: &[Self]) -> Vec<Vec<Self>>;
}

impl FieldValue for f64 {
    fn all_gather<C: Communicator + ?Sized>(comm: &C, local: &[Self]) -> Vec<Vec<Self>> {
        comm.all_gather_f64(local)
    }
}

macro_rules! impl_int_field_value {
    ($($t:ty),*) => {$(
        impl FieldValue for $t {
            fn all_gather<C: Communicator + ?Sized>(comm: &C, local: &[Self]) -> Vec<Vec<Self>> {
                let wide: Vec<i64> = local.iter().map(|&v| i64::from(v)).collect();
                comm.all_gather_i64(&wide)
                    .into_iter()
                    .map(|v| v.into_iter().map(|x| x as $t).collect())
                    .collect()
            }
        }
    )*};
}

impl_int_field_value!(i16, i32, i64);

/// Data of one patch
#[derive(Debug, Clone, PartialEq)]
pub struct BaseFab<T> {
    bx: IndexBox,
    data: Array4<T>,
}

/// Real-valued patch data
pub type Fab = BaseFab<f64>;
/// Integer patch data (masks, flags)
pub type IFab = BaseFab<i32>;

impl<T: FieldValue> BaseFab<T> {
    pub fn new(bx: IndexBox, ncomp: usize) -> Self {
        Self::filled(bx, ncomp, T::default())
    }

    pub fn filled(bx: IndexBox, ncomp: usize, value: T) -> Self {
        let shape = (
            ncomp,
            bx.length(2) as usize,
            bx.length(1) as usize,
            bx.length(0) as usize,
        );
        Self {
            bx,
            data: Array4::from_elem(shape, value),
        }
    }

    /// Allocated box (valid box plus ghost layers)
    pub fn bx(&self) -> &IndexBox {
        &self.bx
    }

    pub fn ncomp(&self) -> usize {
        self.data.shape()[0]
    }

    #[inline]
    fn idx(&self, p: IntVect, n: usize) -> [usize; 4] {
        debug_assert!(self.bx.contains(p), "{p:?} outside {:?}", self.bx);
        let lo = self.bx.lo();
        [
            n,
            (p[2] - lo[2]) as usize,
            (p[1] - lo[1]) as usize,
            (p[0] - lo[0]) as usize,
        ]
    }

    #[inline]
    pub fn get(&self, p: IntVect, n: usize) -> T {
        self.data[self.idx(p, n)]
    }

    #[inline]
    pub fn set(&mut self, p: IntVect, n: usize, value: T) {
        let i = self.idx(p, n);
        self.data[i] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Set component `comp` to `value` on the part of `region` inside this patch
    pub fn fill_region(&mut self, region: &IndexBox, comp: usize, value: T) {
        if let Some(r) = self.bx.intersect(region) {
            for p in r.points() {
                self.set(p, comp, value);
            }
        }
    }

    /// Copy `ncomp` components of `src` on `region` (same index space)
    pub fn copy_region(
        &mut self,
        src: &BaseFab<T>,
        region: &IndexBox,
        src_comp: usize,
        dst_comp: usize,
        ncomp: usize,
    ) {
        let Some(r) = self
            .bx
            .intersect(region)
            .and_then(|r| r.intersect(src.bx()))
        else {
            return;
        };
        for n in 0..ncomp {
            for p in r.points() {
                self.set(p, dst_comp + n, src.get(p, src_comp + n));
            }
        }
    }

    pub fn data(&self) -> &Array4<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array4<T> {
        &mut self.data
    }
}

impl Fab {
    /// Sum of component `comp` over `region`
    pub fn sum(&self, region: &IndexBox, comp: usize) -> f64 {
        self.bx
            .intersect(region)
            .map(|r| r.points().map(|p| self.get(p, comp)).sum::<f64>())
            .unwrap_or(0.0)
    }

    /// Largest magnitude of component `comp` over `region`
    pub fn max_abs(&self, region: &IndexBox, comp: usize) -> f64 {
        self.bx
            .intersect(region)
            .map(|r| r.points().map(|p| self.get(p, comp).abs()).fold(0.0, f64::max))
            .unwrap_or(0.0)
    }
}

impl<T: FieldValue> Index<(IntVect, usize)> for BaseFab<T> {
    type Output = T;

    fn index(&self, (p, n): (IntVect, usize)) -> &T {
        &self.data[self.idx(p, n)]
    }
}

impl<T: FieldValue> IndexMut<(IntVect, usize)> for BaseFab<T> {
    fn index_mut(&mut self, (p, n): (IntVect, usize)) -> &mut T {
        let i = self.idx(p, n);
        &mut self.data[i]
    }
}

/// The locally held patches of a field defined on a [`BoxLayout`]
#[derive(Debug, Clone)]
pub struct FabArray<T> {
    layout: BoxLayout,
    ixtype: IndexType,
    dim: usize,
    ncomp: usize,
    nghost: i64,
    rank: usize,
    patches: Vec<usize>,
    fabs: Vec<BaseFab<T>>,
}

/// Real-valued field
pub type MultiFab = FabArray<f64>;
/// Integer field
pub type IMultiFab = FabArray<i32>;

impl<T: FieldValue> FabArray<T> {
    /// Allocate the patches of `layout` owned by `rank`, default-initialized
    pub fn new(
        layout: &BoxLayout,
        dim: usize,
        rank: usize,
        ixtype: IndexType,
        ncomp: usize,
        nghost: i64,
    ) -> Self {
        let patches = layout.local_patches(rank);
        let fabs = patches
            .iter()
            .map(|&i| {
                let valid = ixtype.convert(layout.box_at(i), dim);
                BaseFab::new(valid.grow(nghost, dim), ncomp)
            })
            .collect();
        Self {
            layout: layout.clone(),
            ixtype,
            dim,
            ncomp,
            nghost,
            rank,
            patches,
            fabs,
        }
    }

    /// Cell-centred field
    pub fn cell(layout: &BoxLayout, dim: usize, rank: usize, ncomp: usize, nghost: i64) -> Self {
        Self::new(layout, dim, rank, IndexType::Cell, ncomp, nghost)
    }

    /// A field on the same patches as `other`
    pub fn like<U: FieldValue>(other: &FabArray<U>, ncomp: usize, nghost: i64) -> Self {
        Self::new(
            &other.layout,
            other.dim,
            other.rank,
            other.ixtype,
            ncomp,
            nghost,
        )
    }

    pub fn layout(&self) -> &BoxLayout {
        &self.layout
    }

    pub fn ixtype(&self) -> IndexType {
        self.ixtype
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn nghost(&self) -> i64 {
        self.nghost
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of locally held patches
    pub fn num_local(&self) -> usize {
        self.fabs.len()
    }

    /// Global patch index of local patch `li`
    pub fn patch(&self, li: usize) -> usize {
        self.patches[li]
    }

    /// Local position of global patch `patch`, if held here
    pub fn local_index(&self, patch: usize) -> Option<usize> {
        self.patches.binary_search(&patch).ok()
    }

    pub fn valid_box(&self, li: usize) -> IndexBox {
        self.ixtype
            .convert(self.layout.box_at(self.patches[li]), self.dim)
    }

    pub fn fab(&self, li: usize) -> &BaseFab<T> {
        &self.fabs[li]
    }

    pub fn fab_mut(&mut self, li: usize) -> &mut BaseFab<T> {
        &mut self.fabs[li]
    }

    pub fn fabs(&self) -> &[BaseFab<T>] {
        &self.fabs
    }

    pub fn fabs_mut(&mut self) -> &mut [BaseFab<T>] {
        &mut self.fabs
    }

    /// Valid boxes of the local patches
    pub fn valid_boxes(&self) -> Vec<IndexBox> {
        (0..self.num_local()).map(|li| self.valid_box(li)).collect()
    }

    pub fn set_val(&mut self, value: T) {
        self.fabs.par_iter_mut().for_each(|f| f.fill(value));
    }

    /// Whether both fields live on the same patches of the same process
    pub fn same_distribution<U>(&self, other: &FabArray<U>) -> bool {
        self.rank == other.rank
            && self.ixtype == other.ixtype
            && self.dim == other.dim
            && self.layout == other.layout
    }

    /// Copy components on the valid region of every local patch
    ///
    /// # Panics
    ///
    /// Panics if the two fields are not distributed alike.
    pub fn copy_from(&mut self, src: &FabArray<T>, src_comp: usize, dst_comp: usize, ncomp: usize) {
        assert!(self.same_distribution(src), "copy between different layouts");
        let valids = self.valid_boxes();
        self.fabs
            .par_iter_mut()
            .zip(src.fabs.par_iter())
            .zip(valids.par_iter())
            .for_each(|((dst, s), vb)| dst.copy_region(s, vb, src_comp, dst_comp, ncomp));
    }

    /// Valid data of every patch of the layout, indexed by global patch
    ///
    /// Collective: every rank must call it.
    pub fn gather_valid<C: Communicator + ?Sized>(&self, comm: &C) -> Vec<Option<BaseFab<T>>> {
        let mut buf = Vec::new();
        for (li, fab) in self.fabs.iter().enumerate() {
            let vb = self.valid_box(li);
            for n in 0..self.ncomp {
                buf.extend(vb.points().map(|p| fab.get(p, n)));
            }
        }

        let gathered = T::all_gather(comm, &buf);
        let mut out: Vec<Option<BaseFab<T>>> = vec![None; self.layout.len()];
        for (rank, data) in gathered.iter().enumerate() {
            let mut values = data.iter();
            for patch in self.layout.local_patches(rank) {
                let vb = self.ixtype.convert(self.layout.box_at(patch), self.dim);
                let mut fab = BaseFab::new(vb, self.ncomp);
                for n in 0..self.ncomp {
                    for p in vb.points() {
                        if let Some(&v) = values.next() {
                            fab.set(p, n, v);
                        }
                    }
                }
                out[patch] = Some(fab);
            }
        }
        out
    }

    /// Fill ghost layers from the valid data of neighbouring patches,
    /// including periodic images
    ///
    /// Ghost points not covered by any patch are left untouched.
    /// Collective: every rank must call it.
    pub fn fill_boundary<C: Communicator + ?Sized>(&mut self, geom: &Geometry, comm: &C) {
        let sources = self.gather_valid(comm);
        let shifts = geom.periodic_shifts();
        let valids = self.valid_boxes();
        let (nghost, dim, ncomp) = (self.nghost, self.dim, self.ncomp);

        self.fabs
            .par_iter_mut()
            .zip(valids.par_iter())
            .for_each(|(fab, valid)| {
                let grown = valid.grow(nghost, dim);
                for src in sources.iter().flatten() {
                    for s in &shifts {
                        let Some(region) = grown.intersect(&src.bx().shifted(*s)) else {
                            continue;
                        };
                        for p in region.points().filter(|p| !valid.contains(*p)) {
                            let q = [p[0] - s[0], p[1] - s[1], p[2] - s[2]];
                            for n in 0..ncomp {
                                fab.set(p, n, src.get(q, n));
                            }
                        }
                    }
                }
            });
    }
}

impl<T: FieldValue> FabArray<T> {
    /// Overwrite the valid points of this field covered by the valid data
    /// of `src`, including its periodic images
    ///
    /// `src` may have any layout with the same index type. Points covered
    /// by no source patch keep their value. Collective: every rank must
    /// call it.
    pub fn copy_valid_from<C: Communicator + ?Sized>(
        &mut self,
        src: &FabArray<T>,
        geom: &Geometry,
        comm: &C,
    ) {
        assert_eq!(self.ixtype, src.ixtype, "copy between different index types");
        let sources = src.gather_valid(comm);
        let shifts = geom.periodic_shifts();
        let valids = self.valid_boxes();
        let ncomp = self.ncomp.min(src.ncomp);

        self.fabs
            .par_iter_mut()
            .zip(valids.par_iter())
            .for_each(|(fab, valid)| {
                for sfab in sources.iter().flatten() {
                    for s in &shifts {
                        let Some(region) = valid.intersect(&sfab.bx().shifted(*s)) else {
                            continue;
                        };
                        for p in region.points() {
                            let q = [p[0] - s[0], p[1] - s[1], p[2] - s[2]];
                            for n in 0..ncomp {
                                fab.set(p, n, sfab.get(q, n));
                            }
                        }
                    }
                }
            });
    }
}

impl<T: FieldValue + AddAssign> FabArray<T> {
    /// Add the valid data of `src` into the valid region of this field
    ///
    /// Every point receives the sum over all patches (and periodic images)
    /// of `src` covering it. Collective: every rank must call it.
    pub fn parallel_add_from<C: Communicator + ?Sized>(
        &mut self,
        src: &FabArray<T>,
        geom: &Geometry,
        comm: &C,
    ) {
        assert!(self.same_distribution(src), "parallel add between different layouts");
        let sources = src.gather_valid(comm);
        let shifts = geom.periodic_shifts();
        let valids = self.valid_boxes();
        let ncomp = self.ncomp.min(src.ncomp);

        self.fabs
            .par_iter_mut()
            .zip(valids.par_iter())
            .for_each(|(fab, valid)| {
                for sfab in sources.iter().flatten() {
                    for s in &shifts {
                        let Some(region) = valid.intersect(&sfab.bx().shifted(*s)) else {
                            continue;
                        };
                        for p in region.points() {
                            let q = [p[0] - s[0], p[1] - s[1], p[2] - s[2]];
                            for n in 0..ncomp {
                                fab[(p, n)] += sfab.get(q, n);
                            }
                        }
                    }
                }
            });
    }
}

impl MultiFab {
    /// Sum of component `comp` over the valid region of all patches on all ranks
    pub fn sum<C: Communicator + ?Sized>(&self, comp: usize, comm: &C) -> f64 {
        let local: f64 = (0..self.num_local())
            .map(|li| self.fabs[li].sum(&self.valid_box(li), comp))
            .sum();
        comm.all_reduce_sum(local)
    }

    /// Max norm of component `comp` over the valid region on all ranks
    pub fn norm_inf<C: Communicator + ?Sized>(&self, comp: usize, comm: &C) -> f64 {
        let local = (0..self.num_local())
            .map(|li| self.fabs[li].max_abs(&self.valid_box(li), comp))
            .fold(0.0, f64::max);
        comm.all_reduce_max(local)
    }
}
