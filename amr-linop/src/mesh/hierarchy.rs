//! Level hierarchy: AMR levels and their relaxation (multigrid) levels
//!
//! Level entry `(amrlev, 0)` is the mesh supplied by the caller. Coarser
//! relaxation levels are derived by coarsening. On AMR level 0 the hierarchy
//! goes as deep as the patches allow, possibly coarsening only some
//! directions; on finer AMR levels it stops one coarsening step above the
//! next coarser AMR level.

use super::geometry::Geometry;
use super::index_box::IntVect;
use super::layout::BoxLayout;
use crate::config::LinOpConfig;
use crate::error::ConfigError;

/// Geometry and patch layout of one `(amrlev, mglev)` entry
#[derive(Debug, Clone, PartialEq)]
pub struct LevelEntry {
    pub geom: Geometry,
    pub layout: BoxLayout,
}

/// All level entries of an operator
#[derive(Debug, Clone)]
pub struct MeshHierarchy {
    dim: usize,
    mg_coarsen_ratio: i64,
    levels: Vec<Vec<LevelEntry>>,
    /// `mg_ratios[amrlev][mglev - 1]`: ratio from relaxation level `mglev - 1` to `mglev`
    mg_ratios: Vec<Vec<IntVect>>,
    /// `amr_ratios[amrlev - 1]`: refinement ratio from AMR level `amrlev - 1` to `amrlev`
    amr_ratios: Vec<i64>,
}

impl MeshHierarchy {
    /// Build the hierarchy from the finest relaxation level of every AMR level
    ///
    /// `amr_ratios[l]` is the refinement ratio between AMR levels `l` and `l + 1`.
    pub fn build(
        geoms: Vec<Geometry>,
        layouts: Vec<BoxLayout>,
        amr_ratios: &[i64],
        config: &LinOpConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if geoms.is_empty() || geoms.len() != layouts.len() {
            return Err(ConfigError::LayoutMismatch(format!(
                "{} geometries for {} layouts",
                geoms.len(),
                layouts.len()
            )));
        }
        if amr_ratios.len() + 1 != geoms.len() {
            return Err(ConfigError::Invalid(format!(
                "{} AMR levels need {} refinement ratios, got {}",
                geoms.len(),
                geoms.len() - 1,
                amr_ratios.len()
            )));
        }
        let dim = geoms[0].dim();
        if geoms.iter().any(|g| g.dim() != dim) {
            return Err(ConfigError::Invalid(
                "all AMR levels must have the same dimensionality".to_string(),
            ));
        }

        let mgr = config.mg_coarsen_ratio;
        let mut levels = Vec::with_capacity(geoms.len());
        let mut mg_ratios = Vec::with_capacity(geoms.len());

        for (amrlev, (geom, layout)) in geoms.into_iter().zip(layouts).enumerate() {
            for (i, bx) in layout.boxes().iter().enumerate() {
                if !geom.domain().contains_box(bx) {
                    return Err(ConfigError::LayoutMismatch(format!(
                        "patch {i} of AMR level {amrlev} lies outside the domain"
                    )));
                }
            }
            let (entries, ratios) = if amrlev == 0 {
                coarsen_bottom(geom, layout, config)
            } else {
                let rr = amr_ratios[amrlev - 1];
                coarsen_amr_level(amrlev, geom, layout, rr, mgr)?
            };
            levels.push(entries);
            mg_ratios.push(ratios);
        }

        for amrlev in 1..levels.len() {
            let rr = ratio_vect(dim, amr_ratios[amrlev - 1]);
            let expected = levels[amrlev - 1][0].geom.domain().refine(rr);
            if *levels[amrlev][0].geom.domain() != expected {
                return Err(ConfigError::LayoutMismatch(format!(
                    "domain of AMR level {amrlev} is not the refined domain of level {}",
                    amrlev - 1
                )));
            }
        }

        let hierarchy = Self {
            dim,
            mg_coarsen_ratio: mgr,
            levels,
            mg_ratios,
            amr_ratios: amr_ratios.to_vec(),
        };
        if config.verbose > 0 {
            for amrlev in 0..hierarchy.num_amr_levels() {
                log::info!(
                    "AMR level {}: {} relaxation levels",
                    amrlev,
                    hierarchy.num_mg_levels(amrlev)
                );
            }
        }
        Ok(hierarchy)
    }

    /// Single AMR level
    pub fn single_level(
        geom: Geometry,
        layout: BoxLayout,
        config: &LinOpConfig,
    ) -> Result<Self, ConfigError> {
        Self::build(vec![geom], vec![layout], &[], config)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn mg_coarsen_ratio(&self) -> i64 {
        self.mg_coarsen_ratio
    }

    pub fn num_amr_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn num_mg_levels(&self, amrlev: usize) -> usize {
        self.levels[amrlev].len()
    }

    pub fn entry(&self, amrlev: usize, mglev: usize) -> &LevelEntry {
        &self.levels[amrlev][mglev]
    }

    pub fn geom(&self, amrlev: usize, mglev: usize) -> &Geometry {
        &self.levels[amrlev][mglev].geom
    }

    pub fn layout(&self, amrlev: usize, mglev: usize) -> &BoxLayout {
        &self.levels[amrlev][mglev].layout
    }

    /// Coarsening ratio that produced relaxation level `mglev >= 1`
    pub fn mg_ratio(&self, amrlev: usize, mglev: usize) -> IntVect {
        self.mg_ratios[amrlev][mglev - 1]
    }

    /// Refinement ratio from AMR level `amrlev - 1` to `amrlev`
    pub fn amr_ratio(&self, amrlev: usize) -> i64 {
        self.amr_ratios[amrlev - 1]
    }

    /// Uniform coarsening ratio vector for this dimensionality
    pub fn uniform_ratio(&self) -> IntVect {
        ratio_vect(self.dim, self.mg_coarsen_ratio)
    }

    /// Whether relaxation level `mglev` was produced by uniform coarsening
    pub fn is_regular_coarsening(&self, amrlev: usize, mglev: usize) -> bool {
        amrlev > 0 || mglev == 0 || self.mg_ratio(amrlev, mglev) == self.uniform_ratio()
    }

    /// Drop relaxation levels `num_mg..` of AMR level 0
    pub(crate) fn truncate_bottom(&mut self, num_mg: usize) {
        let n = num_mg.max(1);
        self.levels[0].truncate(n);
        self.mg_ratios[0].truncate(n - 1);
    }
}

pub(crate) fn ratio_vect(dim: usize, r: i64) -> IntVect {
    let mut v = [1; 3];
    for x in v.iter_mut().take(dim) {
        *x = r;
    }
    v
}

/// Ratio of the next coarsening step on AMR level 0
fn next_bottom_ratio(geom: &Geometry, config: &LinOpConfig) -> IntVect {
    let dim = geom.dim();
    let uniform = ratio_vect(dim, config.mg_coarsen_ratio);
    if !config.enable_semicoarsening {
        return uniform;
    }
    let hmin = (0..dim)
        .map(|d| geom.cell_size(d))
        .fold(f64::INFINITY, f64::min);
    let mut ratio = [1; 3];
    for (d, r) in ratio.iter_mut().enumerate().take(dim) {
        if geom.cell_size(d) <= hmin * (1.0 + 1e-10) {
            *r = config.mg_coarsen_ratio;
        }
    }
    ratio
}

fn coarsen_bottom(
    geom: Geometry,
    layout: BoxLayout,
    config: &LinOpConfig,
) -> (Vec<LevelEntry>, Vec<IntVect>) {
    let dim = geom.dim();
    let mut entries = vec![LevelEntry { geom, layout }];
    let mut ratios = Vec::new();
    while entries.len() < config.max_mg_levels {
        let Some(last) = entries.last() else { break };
        let ratio = next_bottom_ratio(&last.geom, config);
        let min_width = config.min_coarse_width;
        if !last.layout.coarsenable(ratio, min_width, dim)
            || !last.geom.domain().coarsenable(ratio, min_width, dim)
        {
            break;
        }
        let next = LevelEntry {
            geom: last.geom.coarsen(ratio),
            layout: last.layout.coarsen(ratio),
        };
        entries.push(next);
        ratios.push(ratio);
    }
    (entries, ratios)
}

fn coarsen_amr_level(
    amrlev: usize,
    geom: Geometry,
    layout: BoxLayout,
    amr_ratio: i64,
    mgr: i64,
) -> Result<(Vec<LevelEntry>, Vec<IntVect>), ConfigError> {
    let dim = geom.dim();
    let ratio = ratio_vect(dim, mgr);

    let mut rr = amr_ratio;
    let mut num_mg = 1;
    while rr > mgr && rr % mgr == 0 {
        rr /= mgr;
        num_mg += 1;
    }
    if rr != mgr {
        return Err(ConfigError::Invalid(format!(
            "refinement ratio {amr_ratio} of AMR level {amrlev} is not a power of the coarsening ratio {mgr}"
        )));
    }

    let mut entries = vec![LevelEntry { geom, layout }];
    let mut ratios = Vec::new();
    // one more step than relaxation levels: the last one lands on the coarser AMR level
    for step in 0..num_mg {
        let Some(last) = entries.last() else { break };
        if !last.layout.coarsenable(ratio, 1, dim) {
            return Err(ConfigError::LayoutMismatch(format!(
                "patches of AMR level {amrlev} cannot be coarsened by {mgr} (step {step})"
            )));
        }
        if step + 1 < num_mg {
            let next = LevelEntry {
                geom: last.geom.coarsen(ratio),
                layout: last.layout.coarsen(ratio),
            };
            entries.push(next);
            ratios.push(ratio);
        }
    }
    Ok((entries, ratios))
}
