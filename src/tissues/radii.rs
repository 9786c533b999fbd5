//! Per-electrode tissue radii.
//!
//! For every electrode and tissue, the inner/outer limits and thickness
//! of the layer along the electrode's radius, both absolute (voxel
//! units) and relative to the outer scalp.

use nalgebra::Vector3;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tissues::conductivity::{TissueClass, NUM_TISSUES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum TissueLimit {
    InnerAbs = 0,
    OuterAbs = 1,
    ThickAbs = 2,
    InnerRel = 3,
    OuterRel = 4,
    ThickRel = 5,
}

pub const NUM_LIMITS: usize = 6;

// Minimum layer thicknesses, in mm equivalents of the working voxels
pub const MIN_CSF_THICKNESS: f64 = 0.1;
pub const MAX_CSF_THICKNESS: f64 = 4.0;
pub const MIN_SPONGY_SKULL_THICKNESS: f64 = 0.1;
pub const MIN_SKULL_THICKNESS: f64 = 0.1;
pub const MIN_SCALP_THICKNESS: f64 = 1.0;

// Spongy skull: frontal 45%, parietal 66% of the skull thickness
pub const SKULL_SPONGY_PERCENTAGE: f64 = 0.55;
pub const SKULL_COMPACT_TO_SPONGY_RATIO: f64 = 3.6;
pub const SKULL_COMPACT_THICKNESS: f64 = 1.7;
pub const SKULL_COMPACT_MIN_THICKNESS: f64 = 1.0;
pub const SKULL_COMPACT_MAX_THICKNESS: f64 = 2.4;

/// (numElectrodes × NumTissues × 6 limits) of f32.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TissueRadii {
    pub data: Array3<f32>,
    /// Electrodes whose estimation fell back to default radii.
    pub flagged: Vec<bool>,
}

impl TissueRadii {
    pub fn new(num_electrodes: usize) -> Self {
        Self {
            data: Array3::zeros((num_electrodes, NUM_TISSUES, NUM_LIMITS)),
            flagged: vec![false; num_electrodes],
        }
    }

    pub fn num_electrodes(&self) -> usize {
        self.data.dim().0
    }

    pub fn get(&self, electrode: usize, tissue: TissueClass, limit: TissueLimit) -> f32 {
        self.data[(electrode, tissue.index(), limit as usize)]
    }

    pub fn set(&mut self, electrode: usize, tissue: TissueClass, limit: TissueLimit, value: f32) {
        self.data[(electrode, tissue.index(), limit as usize)] = value;
    }

    /// Recompute ThickAbs from the two absolute limits.
    pub fn update_thickness(&mut self, electrode: usize, tissue: TissueClass) {
        let thick = self.get(electrode, tissue, TissueLimit::OuterAbs)
            - self.get(electrode, tissue, TissueLimit::InnerAbs);
        self.set(electrode, tissue, TissueLimit::ThickAbs, thick);
    }
}

//----------------------------------------------------------------------------
// Age to skull thickness

pub const SKULL_ROCHE_MIN_AGE: f64 = -0.5;
pub const SKULL_ROCHE_MAX_AGE: f64 = 20.0;
pub const SKULL_LILLIE_MIN_AGE: f64 = 20.0;
pub const SKULL_LILLIE_MAX_AGE: f64 = 100.0;

/// Roche growth regressions at the three measured sites, 0 to 20 y.
fn age_to_skull_thicknesses_roche(age: f64) -> (f64, f64, f64) {
    let age = age.clamp(SKULL_ROCHE_MIN_AGE, SKULL_ROCHE_MAX_AGE);

    let vertex = 0.000009446242636601540 * age.powi(5)
        - 0.000620319286298091 * age.powi(4)
        + 0.0156238702574324 * age.powi(3)
        - 0.193411281780735 * age.powi(2)
        + 1.30479784896483 * age
        + 0.801749159837984;

    let lambda = -0.000000874303233450169 * age.powi(6)
        + 0.0000668067379378107 * age.powi(5)
        - 0.00204664899368126 * age.powi(4)
        + 0.0322588294778569 * age.powi(3)
        - 0.287182885923529 * age.powi(2)
        + 1.59920122738993 * age
        + 0.84134546086354;

    let nasion_bregma = -0.00000143602849400626 * age.powi(6)
        + 0.000102422066281027 * age.powi(5)
        - 0.0028856608447644 * age.powi(4)
        + 0.040738161856106 * age.powi(3)
        - 0.306182846374295 * age.powi(2)
        + 1.31104939932351 * age
        + 1.24842821082324;

    (vertex, lambda, nasion_bregma)
}

fn age_to_skull_thickness_roche(age: f64) -> f64 {
    let (vertex, lambda, nasion_bregma) = age_to_skull_thicknesses_roche(age);
    ((vertex + lambda + nasion_bregma) / 3.0).max(0.0)
}

/// Lillie & Stitzel: about +10% over the 20 to 100 y range.
fn age_to_skull_thickness_lillie(age: f64) -> f64 {
    let age = age.clamp(SKULL_LILLIE_MIN_AGE, SKULL_LILLIE_MAX_AGE);
    5.00 + (age - SKULL_LILLIE_MIN_AGE) / (SKULL_LILLIE_MAX_AGE - SKULL_LILLIE_MIN_AGE)
        * (5.50 - 5.00)
}

/// Mean skull thickness in mm from age in years. Roche below 20 y,
/// Lillie above, scaled so the composite is continuous at the joint.
pub fn age_to_skull_thickness(age: f64) -> f64 {
    if age <= SKULL_ROCHE_MAX_AGE {
        age_to_skull_thickness_roche(age)
    } else {
        let to_roche = age_to_skull_thickness_roche(SKULL_ROCHE_MAX_AGE);
        let from_lillie = age_to_skull_thickness_lillie(SKULL_ROCHE_MAX_AGE);
        age_to_skull_thickness_lillie(age) * (to_roche / from_lillie)
    }
}

//----------------------------------------------------------------------------

/// Spongy layer thickness from the whole skull thickness: a fixed
/// spongy fraction, with the remaining compact tables clipped to their
/// anatomical range and the clipping propagated back. Can return 0.
pub fn skull_thickness_to_spongy(
    skull_thickness: f64,
    spongy_percentage: f64,
    compact_min_thickness: f64,
    compact_max_thickness: f64,
) -> f64 {
    let spongy = spongy_percentage * skull_thickness;
    let compact =
        ((skull_thickness - spongy) / 2.0).clamp(compact_min_thickness, compact_max_thickness);
    (skull_thickness - 2.0 * compact).max(0.0)
}

/// Rescale skull thicknesses toward an expected mean, estimated on the
/// upper head (z > 0). Shrinking pushes only the inner surfaces outward
/// (the outer scalp is the most reliable); expansion moves only the
/// outer surfaces. CSF follows the inner skull.
pub fn adjust_skull_thickness(
    points: &[Vector3<f64>],
    voxel_size: &Vector3<f64>,
    radii: &mut TissueRadii,
    target_skull_thickness: f64,
) {
    if target_skull_thickness <= 0.0 {
        return;
    }

    let mut upper: Vec<f64> = (0..radii.num_electrodes())
        .filter(|&e| {
            points[e].z > 0.0 && radii.get(e, TissueClass::Skull, TissueLimit::ThickAbs) > 0.0
        })
        .map(|e| radii.get(e, TissueClass::Skull, TissueLimit::ThickAbs) as f64)
        .collect();
    if upper.is_empty() {
        return;
    }
    upper.sort_by(|a, b| a.total_cmp(b));
    let mean_voxel = (voxel_size.x + voxel_size.y + voxel_size.z) / 3.0;
    let observed_mm = upper[upper.len() / 2] * mean_voxel;
    let rescale = target_skull_thickness / observed_mm;

    debug!(observed_mm, target_skull_thickness, rescale, "skull thickness adjustment");

    for e in 0..radii.num_electrodes() {
        let skull_thick = radii.get(e, TissueClass::Skull, TissueLimit::ThickAbs);
        if skull_thick == 0.0 {
            continue;
        }
        // positive for shrinkage, negative for expansion
        let delta_skull = skull_thick * (1.0 - rescale as f32);
        let delta_spongy =
            radii.get(e, TissueClass::SkullSpongy, TissueLimit::ThickAbs) * (1.0 - rescale as f32);

        if rescale <= 1.0 {
            let inner = radii.get(e, TissueClass::Skull, TissueLimit::InnerAbs) + delta_skull;
            radii.set(e, TissueClass::Skull, TissueLimit::InnerAbs, inner);
            let spongy_inner =
                radii.get(e, TissueClass::SkullSpongy, TissueLimit::InnerAbs) + delta_spongy;
            radii.set(e, TissueClass::SkullSpongy, TissueLimit::InnerAbs, spongy_inner);

            radii.set(e, TissueClass::Csf, TissueLimit::OuterAbs, inner);
            let csf_thick = (inner - radii.get(e, TissueClass::Csf, TissueLimit::InnerAbs))
                .max(MIN_CSF_THICKNESS as f32);
            radii.set(e, TissueClass::Csf, TissueLimit::ThickAbs, csf_thick);
            radii.set(e, TissueClass::Csf, TissueLimit::InnerAbs, inner - csf_thick);
        } else {
            let outer = radii.get(e, TissueClass::Skull, TissueLimit::OuterAbs) - delta_skull;
            radii.set(e, TissueClass::Skull, TissueLimit::OuterAbs, outer);
            let spongy_outer =
                radii.get(e, TissueClass::SkullSpongy, TissueLimit::OuterAbs) - delta_spongy;
            radii.set(e, TissueClass::SkullSpongy, TissueLimit::OuterAbs, spongy_outer);
        }

        radii.update_thickness(e, TissueClass::Skull);
        radii.update_thickness(e, TissueClass::SkullSpongy);
    }
}

/// Fill in the scalp fields and convert every absolute radius to a
/// relative one (divided by the outer scalp radius). Returns false when
/// any thickness came out negative, which callers treat as a radius
/// estimation failure.
pub fn radius_abs_to_rel(points: &[Vector3<f64>], radii: &mut TissueRadii) -> bool {
    let mut ok = true;

    for e in 0..radii.num_electrodes() {
        let outer_scalp = points[e].norm() as f32;
        radii.set(e, TissueClass::Scalp, TissueLimit::OuterAbs, outer_scalp);
        let skull_outer = radii.get(e, TissueClass::Skull, TissueLimit::OuterAbs);
        radii.set(e, TissueClass::Scalp, TissueLimit::InnerAbs, skull_outer);
        radii.update_thickness(e, TissueClass::Scalp);

        if radii.get(e, TissueClass::Scalp, TissueLimit::ThickAbs) <= MIN_SCALP_THICKNESS as f32 {
            radii.set(
                e,
                TissueClass::Scalp,
                TissueLimit::ThickAbs,
                MIN_SCALP_THICKNESS as f32,
            );
            let scalp_inner = outer_scalp - MIN_SCALP_THICKNESS as f32;
            radii.set(e, TissueClass::Scalp, TissueLimit::InnerAbs, scalp_inner);
            radii.set(e, TissueClass::Skull, TissueLimit::OuterAbs, scalp_inner);
            radii.update_thickness(e, TissueClass::Skull);
        }

        let max_radius = radii.get(e, TissueClass::Scalp, TissueLimit::OuterAbs);
        for tissue in TissueClass::ALL.into_iter().skip(1) {
            for (abs, rel) in [
                (TissueLimit::InnerAbs, TissueLimit::InnerRel),
                (TissueLimit::OuterAbs, TissueLimit::OuterRel),
                (TissueLimit::ThickAbs, TissueLimit::ThickRel),
            ] {
                let value = (radii.get(e, tissue, abs) / max_radius).min(1.0);
                radii.set(e, tissue, rel, value);
            }
        }
        radii.set(e, TissueClass::Scalp, TissueLimit::OuterRel, 1.0);

        for tissue in [
            TissueClass::Csf,
            TissueClass::Skull,
            TissueClass::SkullSpongy,
            TissueClass::Scalp,
        ] {
            if radii.get(e, tissue, TissueLimit::ThickAbs) < 0.0 {
                ok = false;
            }
        }
    }

    ok
}
