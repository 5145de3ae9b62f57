//! Domain boundary conditions of the operator
//!
//! Provides:
//! - [`BoundaryConditions`]: the condition type of every domain face, per component
//! - [`BoundaryTerms`]: ghost-cell correction coefficients and masks used by
//!   the relaxation kernels at patch edges
//! - Robin linearization helpers

mod robin;
mod terms;

pub use robin::*;
pub use terms::{BoundaryTerms, COVERED, FaceTerms, NOT_COVERED, OUTSIDE_DOMAIN};

use crate::error::ConfigError;
use crate::mesh::Geometry;
use serde::{Deserialize, Serialize};

/// Condition on one domain face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BcType {
    /// u = g on the face
    Dirichlet,
    /// du/dn = g on the face
    Neumann,
    /// a*u + b*du/dn = f on the face
    Robin,
    /// Periodic direction
    Periodic,
}

/// Low or high side of a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Low,
    High,
}

/// A face direction together with its side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Orientation {
    pub dir: usize,
    pub side: Side,
}

impl Orientation {
    pub fn new(dir: usize, side: Side) -> Self {
        Self { dir, side }
    }

    /// Position in `0..2*dim`: low x, high x, low y, ...
    pub fn index(&self) -> usize {
        2 * self.dir
            + match self.side {
                Side::Low => 0,
                Side::High => 1,
            }
    }

    /// All orientations of a `dim`-dimensional box
    pub fn all(dim: usize) -> impl Iterator<Item = Orientation> {
        (0..dim).flat_map(|d| [Orientation::new(d, Side::Low), Orientation::new(d, Side::High)])
    }
}

/// Domain boundary condition types, per component and direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConditions {
    lo: Vec<Vec<BcType>>,
    hi: Vec<Vec<BcType>>,
}

impl BoundaryConditions {
    /// Same conditions for every component
    ///
    /// `lo` and `hi` hold one entry per active direction.
    pub fn uniform(ncomp: usize, lo: &[BcType], hi: &[BcType]) -> Self {
        Self {
            lo: vec![lo.to_vec(); ncomp],
            hi: vec![hi.to_vec(); ncomp],
        }
    }

    /// Per-component conditions: `lo[comp][dir]`, `hi[comp][dir]`
    pub fn per_component(lo: Vec<Vec<BcType>>, hi: Vec<Vec<BcType>>) -> Self {
        Self { lo, hi }
    }

    /// Same condition on every face of every component
    pub fn all(ncomp: usize, dim: usize, bc: BcType) -> Self {
        Self::uniform(ncomp, &vec![bc; dim], &vec![bc; dim])
    }

    pub fn ncomp(&self) -> usize {
        self.lo.len()
    }

    pub fn lo(&self, comp: usize, dir: usize) -> BcType {
        self.lo[comp][dir]
    }

    pub fn hi(&self, comp: usize, dir: usize) -> BcType {
        self.hi[comp][dir]
    }

    pub fn at(&self, comp: usize, face: Orientation) -> BcType {
        match face.side {
            Side::Low => self.lo(comp, face.dir),
            Side::High => self.hi(comp, face.dir),
        }
    }

    /// Whether any face of any component is Dirichlet
    pub fn has_dirichlet(&self) -> bool {
        self.lo
            .iter()
            .chain(self.hi.iter())
            .flatten()
            .any(|&bc| bc == BcType::Dirichlet)
    }

    pub fn has_robin(&self) -> bool {
        self.lo
            .iter()
            .chain(self.hi.iter())
            .flatten()
            .any(|&bc| bc == BcType::Robin)
    }

    /// Check against the component count and the geometry's periodicity
    pub fn validate(&self, ncomp: usize, geom: &Geometry) -> Result<(), ConfigError> {
        let dim = geom.dim();
        if self.lo.len() != ncomp || self.hi.len() != ncomp {
            return Err(ConfigError::ComponentMismatch {
                what: "boundary conditions",
                expected: ncomp,
                actual: self.lo.len().min(self.hi.len()),
            });
        }
        for comp in 0..ncomp {
            if self.lo[comp].len() != dim || self.hi[comp].len() != dim {
                return Err(ConfigError::Invalid(format!(
                    "component {comp} needs boundary conditions for {dim} directions"
                )));
            }
            for d in 0..dim {
                let periodic = geom.is_periodic(d);
                let lo_p = self.lo[comp][d] == BcType::Periodic;
                let hi_p = self.hi[comp][d] == BcType::Periodic;
                if periodic != lo_p || periodic != hi_p {
                    return Err(ConfigError::Invalid(format!(
                        "direction {d} of component {comp}: periodic boundary types must match the geometry"
                    )));
                }
            }
        }
        Ok(())
    }
}
