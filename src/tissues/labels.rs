//! Tissue radii from a labelled tissues volume.
//!
//! The ray from each electrode toward the inverse center is scanned at
//! sub-voxel resolution for the first and last voxels labelled inside
//! the skull range; the CSF limit lands on a smoothed brain surface.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{NeurofieldError, Result};
use crate::geometry::PointSet;
use crate::tissues::conductivity::{BRAIN_MAX, BRAIN_MIN, SKULL_MAX, SKULL_MIN};
use crate::tissues::radii::{
    adjust_skull_thickness, radius_abs_to_rel, TissueLimit, TissueRadii, MIN_CSF_THICKNESS,
};
use crate::tissues::spatial_filter::{ElectrodeGraph, SpatialFilterKind};
use crate::tissues::t1::set_spongy_layer;
use crate::tissues::TissueClass;
use crate::volume::{Interpolator, MorphOp, Volume};

const SUB_VOXEL: f64 = 0.1;

fn in_range(label: f64, min_index: u8, max_index: u8) -> bool {
    let code = label as i64;
    code >= min_index as i64 && code <= max_index as i64
}

/// Scan the segment `p_inside` -> `p_surface` (both relative to the
/// volume position `center`) for the inner and outer limits of the
/// given label range. Interpolating between label values is wrong, so
/// samples are nearest neighbour. Returns (r_min, r_max) as distances
/// from `p_inside` along the segment.
pub fn scan_tissues_max_interval(
    tissues: &Volume,
    center: Vector3<f64>,
    p_inside: Vector3<f64>,
    p_surface: Vector3<f64>,
    radius_min: f64,
    radius_max: f64,
    min_index: u8,
    max_index: u8,
) -> Option<(f64, f64)> {
    let mut top = p_surface - p_inside;
    let n = top.norm();
    if n == 0.0 {
        return None;
    }
    top /= n;

    let base = center + p_inside + Vector3::repeat(0.5);
    let sample = |r: f64| {
        let q = base + top * r;
        tissues.sample(q.x, q.y, q.z, Interpolator::Nearest)
    };

    // center toward surface
    let mut r_min = radius_min;
    let mut found = false;
    while r_min <= radius_max {
        if in_range(sample(r_min), min_index, max_index) {
            // backtrack for sub-voxel accuracy
            while in_range(sample(r_min), min_index, max_index) {
                r_min -= SUB_VOXEL;
            }
            r_min += 0.5 * SUB_VOXEL;
            found = true;
            break;
        }
        r_min += 1.0;
    }
    if !found {
        return None;
    }

    // surface toward center
    let mut r_max = radius_max;
    found = false;
    while r_max >= radius_min {
        if in_range(sample(r_max), min_index, max_index) {
            while in_range(sample(r_max), min_index, max_index) {
                r_max += SUB_VOXEL;
            }
            r_max -= 0.5 * SUB_VOXEL;
            found = true;
            break;
        }
        r_max -= 1.0;
    }
    if !found {
        return None;
    }

    Some((r_min, r_max))
}

/// Smoothed brain surface extracted from the labelled volume: brain
/// labels thresholded, gaps closed, shape relaxed.
fn smoothed_brain_limit(tissues: &Volume) -> Result<Volume> {
    let mut brain = tissues.clone();
    brain.threshold_binarize(BRAIN_MIN as f32, BRAIN_MAX as f32, 1.0);
    brain.morphology(MorphOp::Dilate, 6.0, 1)?;
    brain.morphology(MorphOp::Relax, 6.0, 1)?;
    brain.morphology(MorphOp::Erode, 6.0, 1)?;
    brain.background = 0.5;
    Ok(brain)
}

/// Per-electrode tissue radii from a labelled tissues volume.
#[allow(clippy::too_many_arguments)]
pub fn estimate_tissues_radii_segmentation(
    points: &PointSet,
    smoothing: SpatialFilterKind,
    tissues: &Volume,
    tissues_origin: Vector3<f64>,
    mri_center: Vector3<f64>,
    voxel_size: &Vector3<f64>,
    inverse_center: Vector3<f64>,
    adjust_radius: bool,
    target_skull_thickness: f64,
    compact_thickness: Option<f64>,
) -> Result<TissueRadii> {
    if points.is_empty() {
        return Err(NeurofieldError::InvalidInput("empty electrode set".into()));
    }

    let num_el = points.len();
    let mut radii = TissueRadii::new(num_el);

    // tissue volumes resampled from another template can carry their
    // own origin; follow the shift rather than scanning off-center
    let mut inverse_center = inverse_center;
    if tissues_origin != mri_center {
        let delta = tissues_origin - mri_center;
        inverse_center += delta;
        warn!(
            delta = ?delta.as_slice(),
            "tissues volume and head MRI have different origins, shifting the scan center"
        );
    }

    let brain_limit = smoothed_brain_limit(tissues)?;

    struct ElectrodeRadii {
        skull: Option<(f64, f64)>,
        csf_inner: f64,
    }

    let per_electrode: Vec<ElectrodeRadii> = points
        .points
        .par_iter()
        .map(|&p| {
            let skull = scan_tissues_max_interval(
                tissues,
                inverse_center,
                Vector3::zeros(),
                p,
                1.0,
                p.norm(),
                SKULL_MIN,
                SKULL_MAX,
            );
            // land the CSF limit on the smoothed brain surface, never
            // deep inside a sulcus
            let brain_surface = brain_limit.surface_project(p, inverse_center, 0.5);
            ElectrodeRadii {
                skull,
                csf_inner: brain_surface.norm(),
            }
        })
        .collect();

    let mut missing = 0usize;
    for (e, est) in per_electrode.iter().enumerate() {
        let Some((skull_in, skull_out)) = est.skull else {
            radii.flagged[e] = true;
            missing += 1;
            continue;
        };

        radii.set(e, TissueClass::Skull, TissueLimit::InnerAbs, skull_in as f32);
        radii.set(e, TissueClass::Skull, TissueLimit::OuterAbs, skull_out as f32);
        radii.update_thickness(e, TissueClass::Skull);

        set_spongy_layer(&mut radii, e, compact_thickness);

        radii.set(
            e,
            TissueClass::Csf,
            TissueLimit::InnerAbs,
            est.csf_inner as f32,
        );
        radii.set(e, TissueClass::Csf, TissueLimit::OuterAbs, skull_in as f32);
        radii.update_thickness(e, TissueClass::Csf);
        if radii.get(e, TissueClass::Csf, TissueLimit::ThickAbs) < MIN_CSF_THICKNESS as f32 {
            radii.set(
                e,
                TissueClass::Csf,
                TissueLimit::ThickAbs,
                MIN_CSF_THICKNESS as f32,
            );
            radii.set(
                e,
                TissueClass::Csf,
                TissueLimit::InnerAbs,
                skull_in as f32 - MIN_CSF_THICKNESS as f32,
            );
        }
    }

    if missing == num_el {
        return Err(NeurofieldError::RadiusEstimation(
            "no skull interval found under any electrode".into(),
        ));
    }
    if missing > 0 {
        warn!(missing, "electrodes without a skull interval");
    }

    // only the CSF thickness is filtered; the skull scans are reliable
    if smoothing != SpatialFilterKind::None {
        let graph = ElectrodeGraph::build(points);
        let mut thickness: Vec<f64> = (0..num_el)
            .map(|e| radii.get(e, TissueClass::Csf, TissueLimit::ThickAbs) as f64)
            .collect();
        graph.filter(smoothing, &mut thickness);
        for e in 0..num_el {
            let outer = radii.get(e, TissueClass::Csf, TissueLimit::OuterAbs);
            radii.set(e, TissueClass::Csf, TissueLimit::ThickAbs, thickness[e] as f32);
            radii.set(
                e,
                TissueClass::Csf,
                TissueLimit::InnerAbs,
                outer - thickness[e] as f32,
            );
        }
    }

    if adjust_radius && target_skull_thickness > 0.0 {
        adjust_skull_thickness(&points.points, voxel_size, &mut radii, target_skull_thickness);
    }

    debug!(num_el, missing, "tissue radii estimated from segmentation");

    if !radius_abs_to_rel(&points.points, &mut radii) {
        return Err(NeurofieldError::RadiusEstimation(
            "negative tissue thickness after normalization".into(),
        ));
    }

    Ok(radii)
}
