//! Run configuration
//!
//! Options for the lead field build and the preprocessing driver,
//! loadable from a TOML file; CLI flags override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::forward::ForwardPreset;
use crate::markers::{BadEpochsSpec, EpochsSpec, GfpPeaksSpec};
use crate::preprocess::{EnvelopeKind, RegularizationChoice, RoiMethod, ZScoreKind};
use crate::tissues::SpatialFilterKind;

/// Options for one lead field computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadFieldOptions {
    pub preset: ForwardPreset,

    /// Subject age in years, clipped to [0, 100].
    #[serde(default = "default_age")]
    pub age: f64,

    /// Expected mean skull thickness in mm; 0 derives it from age.
    #[serde(default)]
    pub target_skull_thickness: f64,

    /// Rescale skull thicknesses toward the target.
    #[serde(default = "default_true")]
    pub adjust_radius: bool,

    /// Spatial smoothing of the radius maps over the electrode graph.
    #[serde(default)]
    pub smoothing: SpatialFilterKind,

    /// Derive a spongy layer with a caller-provided compact thickness
    /// instead of the ratio rule.
    #[serde(default)]
    pub compact_thickness: Option<f64>,
}

impl Default for LeadFieldOptions {
    fn default() -> Self {
        Self {
            preset: ForwardPreset::Ary3ShellApprox,
            age: default_age(),
            target_skull_thickness: 0.0,
            adjust_radius: true,
            smoothing: SpatialFilterKind::default(),
            compact_thickness: None,
        }
    }
}

/// Background standardization source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundNormalization {
    #[default]
    None,
    ComputeZScore,
    LoadZScoreFile,
}

/// Declarative description of one preprocessing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessOptions {
    #[serde(default)]
    pub spatial_filter: SpatialFilterKind,

    /// Electrode coordinates, required by the spatial filter.
    #[serde(default)]
    pub xyz_file: Option<PathBuf>,

    /// Source operator bank; enables the ESI step.
    #[serde(default)]
    pub operator_file: Option<PathBuf>,

    #[serde(default)]
    pub regularization: RegularizationChoice,

    /// Consecutive file pairs are real/imaginary parts of one band.
    #[serde(default)]
    pub merge_complex: bool,

    #[serde(default)]
    pub gfp_normalize: bool,

    #[serde(default)]
    pub standardization: BackgroundNormalization,

    #[serde(default)]
    pub zscore: Option<ZScoreKind>,

    #[serde(default)]
    pub zscore_file: Option<PathBuf>,

    #[serde(default)]
    pub save_zscore: bool,

    #[serde(default)]
    pub ranking: bool,

    /// Clamp magnitudes below this value to 0.
    #[serde(default)]
    pub threshold: Option<f64>,

    #[serde(default)]
    pub envelope: EnvelopeKind,

    #[serde(default = "default_envelope_ms")]
    pub envelope_window_ms: f64,

    #[serde(default)]
    pub rois_file: Option<PathBuf>,

    #[serde(default)]
    pub roi_method: RoiMethod,

    #[serde(default)]
    pub epochs: EpochsSpec,

    #[serde(default)]
    pub gfp_peaks: GfpPeaksSpec,

    #[serde(default)]
    pub bad_epochs: BadEpochsSpec,

    pub output_dir: PathBuf,

    #[serde(default)]
    pub file_prefix: String,
}

impl PreprocessOptions {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file: {}", path.display()))?;
        let options: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse options file: {}", path.display()))?;
        Ok(options)
    }
}

fn default_age() -> f64 {
    35.0
}

fn default_envelope_ms() -> f64 {
    20.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_options_parse_minimal() {
        let options: PreprocessOptions = toml::from_str("output_dir = \"/tmp/out\"").unwrap();
        assert!(!options.gfp_normalize);
        assert!(options.threshold.is_none());
        assert_eq!(options.envelope_window_ms, 20.0);
    }

    #[test]
    fn lead_field_options_default_age() {
        let options = LeadFieldOptions::default();
        assert_eq!(options.age, 35.0);
        assert!(options.adjust_radius);
    }
}
