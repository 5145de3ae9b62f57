//! Problem domain, cell size and periodicity of one level

use super::index_box::{IndexBox, IntVect};
use crate::error::ConfigError;

/// Domain description of one level entry
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    dim: usize,
    domain: IndexBox,
    cell_size: [f64; 3],
    periodic: [bool; 3],
}

impl Geometry {
    /// Create a geometry
    ///
    /// `cell_size` and `periodic` hold one entry per active direction.
    pub fn new(
        dim: usize,
        domain: IndexBox,
        cell_size: &[f64],
        periodic: &[bool],
    ) -> Result<Self, ConfigError> {
        if !(1..=3).contains(&dim) {
            return Err(ConfigError::UnsupportedDimension(dim));
        }
        if cell_size.len() != dim || periodic.len() != dim {
            return Err(ConfigError::Invalid(format!(
                "geometry of dimension {dim} needs {dim} cell sizes and periodicity flags"
            )));
        }
        if cell_size.iter().any(|&h| h <= 0.0 || !h.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "cell sizes must be positive, got {cell_size:?}"
            )));
        }
        if (dim..3).any(|d| domain.lo()[d] != 0 || domain.hi()[d] != 0) || domain.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "domain {domain:?} is not a valid {dim}-D box"
            )));
        }
        let mut h = [1.0; 3];
        let mut p = [false; 3];
        h[..dim].copy_from_slice(cell_size);
        p[..dim].copy_from_slice(periodic);
        Ok(Self {
            dim,
            domain,
            cell_size: h,
            periodic: p,
        })
    }

    /// Unit-cube style helper: `n` cells of size `1/n` in every direction, no periodicity
    pub fn uniform(dim: usize, n: i64) -> Result<Self, ConfigError> {
        let h = 1.0 / n as f64;
        Self::new(
            dim,
            IndexBox::from_size(&vec![n; dim.min(3)]),
            &vec![h; dim],
            &vec![false; dim],
        )
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn domain(&self) -> &IndexBox {
        &self.domain
    }

    pub fn cell_size(&self, d: usize) -> f64 {
        self.cell_size[d]
    }

    pub fn inv_cell_size(&self, d: usize) -> f64 {
        1.0 / self.cell_size[d]
    }

    pub fn is_periodic(&self, d: usize) -> bool {
        self.periodic[d]
    }

    pub fn is_any_periodic(&self) -> bool {
        self.periodic.iter().any(|&p| p)
    }

    /// Period (in cells) of direction `d`
    pub fn period(&self, d: usize) -> i64 {
        self.domain.length(d)
    }

    pub fn coarsen(&self, ratio: IntVect) -> Geometry {
        let mut g = self.clone();
        g.domain = self.domain.coarsen(ratio);
        for d in 0..self.dim {
            g.cell_size[d] *= ratio[d] as f64;
        }
        g
    }

    pub fn refine(&self, ratio: IntVect) -> Geometry {
        let mut g = self.clone();
        g.domain = self.domain.refine(ratio);
        for d in 0..self.dim {
            g.cell_size[d] /= ratio[d] as f64;
        }
        g
    }

    /// All periodic image shifts, the zero shift first
    pub fn periodic_shifts(&self) -> Vec<IntVect> {
        let mut shifts = vec![[0; 3]];
        for d in 0..self.dim {
            if !self.periodic[d] {
                continue;
            }
            let period = self.period(d);
            let mut more = Vec::with_capacity(2 * shifts.len());
            for s in &shifts {
                for sign in [-1, 1] {
                    let mut t = *s;
                    t[d] += sign * period;
                    more.push(t);
                }
            }
            shifts.extend(more);
        }
        shifts
    }

    /// Map a point into the domain along periodic directions
    pub fn wrap(&self, mut p: IntVect) -> IntVect {
        for d in 0..self.dim {
            if self.periodic[d] {
                let lo = self.domain.lo()[d];
                p[d] = lo + (p[d] - lo).rem_euclid(self.period(d));
            }
        }
        p
    }
}
