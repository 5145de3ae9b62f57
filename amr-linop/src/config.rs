//! JSON configuration for the operator and the solver backend

use crate::error::{ConfigError, ConfigLoadError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Operator setup: how the relaxation hierarchy is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinOpConfig {
    /// Coarsening ratio between relaxation levels
    #[serde(default = "default_coarsen_ratio")]
    pub mg_coarsen_ratio: i64,
    /// Maximum number of relaxation levels on AMR level 0
    #[serde(default = "default_max_mg_levels")]
    pub max_mg_levels: usize,
    /// Coarsen only the finest directions of anisotropic cells on AMR level 0
    #[serde(default)]
    pub enable_semicoarsening: bool,
    /// Smallest patch width (in cells) a coarsened patch may have
    #[serde(default = "default_min_width")]
    pub min_coarse_width: i64,
    /// Stop coarsening at a mixed pinned/unpinned coarse cell instead of failing
    #[serde(default = "default_true")]
    pub truncate_on_mixed_overset: bool,
    /// Verbosity (0 = quiet, 1 = summary, 2+ = detailed)
    #[serde(default)]
    pub verbose: usize,
}

impl Default for LinOpConfig {
    fn default() -> Self {
        Self {
            mg_coarsen_ratio: default_coarsen_ratio(),
            max_mg_levels: default_max_mg_levels(),
            enable_semicoarsening: false,
            min_coarse_width: default_min_width(),
            truncate_on_mixed_overset: true,
            verbose: 0,
        }
    }
}

fn default_coarsen_ratio() -> i64 {
    2
}

fn default_max_mg_levels() -> usize {
    30
}

fn default_min_width() -> i64 {
    2
}

fn default_true() -> bool {
    true
}

impl LinOpConfig {
    /// Parse from a JSON string and validate
    pub fn from_json_str(json: &str) -> Result<Self, ConfigLoadError> {
        let config: LinOpConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mg_coarsen_ratio < 2 {
            return Err(ConfigError::Invalid(format!(
                "mg_coarsen_ratio must be at least 2, got {}",
                self.mg_coarsen_ratio
            )));
        }
        if self.max_mg_levels == 0 {
            return Err(ConfigError::Invalid(
                "max_mg_levels must be at least 1".to_string(),
            ));
        }
        if self.min_coarse_width < 1 {
            return Err(ConfigError::Invalid(format!(
                "min_coarse_width must be positive, got {}",
                self.min_coarse_width
            )));
        }
        Ok(())
    }
}

/// Solution method of the reference backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMethod {
    /// Jacobi-preconditioned conjugate gradient
    Cg,
    /// Jacobi-preconditioned BiCGSTAB
    BiCgStab,
    /// x = b, for checking the data path
    Identity,
}

/// Solver backend setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_method")]
    pub method: BackendMethod,
    /// Pin row 0 of a singular system
    #[serde(default = "default_true")]
    pub adjust_singular_matrix: bool,
    /// Verbosity (0 = quiet, 1 = summary, 2+ = detailed)
    #[serde(default)]
    pub verbose: usize,
    /// Log Krylov progress every N iterations (0 = never)
    #[serde(default)]
    pub print_interval: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            adjust_singular_matrix: true,
            verbose: 0,
            print_interval: 0,
        }
    }
}

fn default_method() -> BackendMethod {
    BackendMethod::BiCgStab
}

impl BackendConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_json::from_str(json)?)
    }
}
