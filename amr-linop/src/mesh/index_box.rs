//! Integer boxes in a 3-D index space
//!
//! Every box carries three directions; in 1-D and 2-D problems the unused
//! directions are degenerate (`lo == hi == 0`) and are never grown,
//! coarsened or refined.

/// A point of the index space
pub type IntVect = [i64; 3];

/// Unit vector in direction `d`
pub fn unit(d: usize) -> IntVect {
    let mut e = [0; 3];
    e[d] = 1;
    e
}

/// Where data sits relative to a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// Cell centres
    Cell,
    /// Centres of the faces normal to a direction
    Face(usize),
    /// Cell corners
    Node,
}

impl IndexType {
    /// Box of data points associated with a cell box
    pub fn convert(self, cells: &IndexBox, dim: usize) -> IndexBox {
        match self {
            IndexType::Cell => *cells,
            IndexType::Face(d) => cells.surrounding_faces(d),
            IndexType::Node => (0..dim).fold(*cells, |b, d| b.surrounding_faces(d)),
        }
    }
}

/// Inclusive box `[lo, hi]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBox {
    lo: IntVect,
    hi: IntVect,
}

impl IndexBox {
    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        Self { lo, hi }
    }

    /// Cell box `[0, n_d - 1]` for the given per-direction sizes
    ///
    /// # Panics
    ///
    /// Panics if more than three sizes are given.
    pub fn from_size(ncells: &[i64]) -> Self {
        assert!(ncells.len() <= 3, "at most three directions");
        let mut hi = [0; 3];
        for (d, &n) in ncells.iter().enumerate() {
            hi[d] = n - 1;
        }
        Self { lo: [0; 3], hi }
    }

    pub fn lo(&self) -> IntVect {
        self.lo
    }

    pub fn hi(&self) -> IntVect {
        self.hi
    }

    /// Number of points in direction `d`
    pub fn length(&self, d: usize) -> i64 {
        (self.hi[d] - self.lo[d] + 1).max(0)
    }

    pub fn num_points(&self) -> i64 {
        (0..3).map(|d| self.length(d)).product()
    }

    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }

    pub fn contains(&self, p: IntVect) -> bool {
        (0..3).all(|d| p[d] >= self.lo[d] && p[d] <= self.hi[d])
    }

    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    /// Common part of two boxes, if any
    pub fn intersect(&self, other: &IndexBox) -> Option<IndexBox> {
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for d in 0..3 {
            lo[d] = self.lo[d].max(other.lo[d]);
            hi[d] = self.hi[d].min(other.hi[d]);
            if lo[d] > hi[d] {
                return None;
            }
        }
        Some(IndexBox { lo, hi })
    }

    pub fn shifted(&self, s: IntVect) -> IndexBox {
        IndexBox {
            lo: [self.lo[0] + s[0], self.lo[1] + s[1], self.lo[2] + s[2]],
            hi: [self.hi[0] + s[0], self.hi[1] + s[1], self.hi[2] + s[2]],
        }
    }

    /// Grow by `n` in the first `dim` directions
    pub fn grow(&self, n: i64, dim: usize) -> IndexBox {
        (0..dim).fold(*self, |b, d| b.grow_dir(d, n))
    }

    pub fn grow_dir(&self, d: usize, n: i64) -> IndexBox {
        let mut b = *self;
        b.lo[d] -= n;
        b.hi[d] += n;
        b
    }

    /// Coarse cells covering this box (floor division)
    pub fn coarsen(&self, ratio: IntVect) -> IndexBox {
        let mut b = *self;
        for d in 0..3 {
            b.lo[d] = self.lo[d].div_euclid(ratio[d]);
            b.hi[d] = self.hi[d].div_euclid(ratio[d]);
        }
        b
    }

    /// Fine cells covered by this box
    pub fn refine(&self, ratio: IntVect) -> IndexBox {
        let mut b = *self;
        for d in 0..3 {
            b.lo[d] = self.lo[d] * ratio[d];
            b.hi[d] = (self.hi[d] + 1) * ratio[d] - 1;
        }
        b
    }

    /// Whether coarsening by `ratio` is exact and leaves at least
    /// `min_width` cells in each of the first `dim` directions
    pub fn coarsenable(&self, ratio: IntVect, min_width: i64, dim: usize) -> bool {
        (0..dim).all(|d| {
            let r = ratio[d];
            self.lo[d].rem_euclid(r) == 0
                && (self.hi[d] + 1).rem_euclid(r) == 0
                && self.length(d) / r >= min_width
        })
    }

    /// Faces normal to `d` of the cells of this box
    pub fn surrounding_faces(&self, d: usize) -> IndexBox {
        let mut b = *self;
        b.hi[d] += 1;
        b
    }

    /// The layer of cells just outside the low side in direction `d`
    pub fn adj_cell_lo(&self, d: usize) -> IndexBox {
        let mut b = *self;
        b.lo[d] = self.lo[d] - 1;
        b.hi[d] = self.lo[d] - 1;
        b
    }

    /// The layer of cells just outside the high side in direction `d`
    pub fn adj_cell_hi(&self, d: usize) -> IndexBox {
        let mut b = *self;
        b.lo[d] = self.hi[d] + 1;
        b.hi[d] = self.hi[d] + 1;
        b
    }

    /// The cell layer of this box touching its low side in direction `d`
    pub fn bdry_cells_lo(&self, d: usize) -> IndexBox {
        let mut b = *self;
        b.hi[d] = self.lo[d];
        b
    }

    /// The cell layer of this box touching its high side in direction `d`
    pub fn bdry_cells_hi(&self, d: usize) -> IndexBox {
        let mut b = *self;
        b.lo[d] = self.hi[d];
        b
    }

    /// Row-major position of `p`, x fastest
    pub fn offset(&self, p: IntVect) -> usize {
        debug_assert!(self.contains(p), "{p:?} outside {self:?}");
        let nx = self.length(0);
        let ny = self.length(1);
        let i = p[0] - self.lo[0];
        let j = p[1] - self.lo[1];
        let k = p[2] - self.lo[2];
        ((k * ny + j) * nx + i) as usize
    }

    /// Points of the box, x fastest, then y, then z
    pub fn points(&self) -> Points {
        Points {
            bx: *self,
            next: if self.is_empty() { None } else { Some(self.lo) },
        }
    }
}

/// Iterator over the points of an [`IndexBox`]
#[derive(Debug, Clone)]
pub struct Points {
    bx: IndexBox,
    next: Option<IntVect>,
}

impl Iterator for Points {
    type Item = IntVect;

    fn next(&mut self) -> Option<IntVect> {
        let current = self.next?;
        let mut p = current;
        let mut d = 0;
        self.next = loop {
            if d == 3 {
                break None;
            }
            if p[d] < self.bx.hi[d] {
                p[d] += 1;
                break Some(p);
            }
            p[d] = self.bx.lo[d];
            d += 1;
        };
        Some(current)
    }
}
