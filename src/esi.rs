//! End-to-end lead field drivers.
//!
//! From raw inputs (head MRI, brain mask or tissue labels, electrodes,
//! solution points) to the centered lead field matrix and its tissue
//! radii: inverse center, guillotine plane, spherization model,
//! conductivities, limit volumes, radius estimation, forward sweep.

use nalgebra::Vector3;
use std::sync::atomic::AtomicBool;
use tracing::info;

use crate::config::LeadFieldOptions;
use crate::error::{NeurofieldError, Result};
use crate::geometry::{
    guillotine_plane, optimal_inverse_translation, PointSet, SphereFitModel,
};
use crate::leadfield::{
    check_null_lead_field, compute_lead_field, LeadField, LeadFieldPreset, RejectedSet,
};
use crate::tissues::{
    age_to_skull_conductivity, age_to_skull_thickness, estimate_tissues_radii_segmentation,
    estimate_tissues_radii_t1, radii::SKULL_SPONGY_PERCENTAGE,
    radii::SKULL_COMPACT_TO_SPONGY_RATIO, split_skull_conductivity, TissueRadii,
};
use crate::volume::{skull_strip, MorphOp, SkullStripMethod, Volume};

/// Surface points kept for the spherization fit.
const HEAD_MODEL_NUM_POINTS: usize = 1000;

/// Everything a lead field build produces.
#[derive(Debug)]
pub struct LeadFieldResult {
    pub k: LeadField,
    /// Electrodes and solution points, translated to the inverse
    /// center.
    pub electrodes: PointSet,
    pub solution_points: PointSet,
    pub mri_center_to_inverse_center: Vector3<f64>,
    pub tissues_radii: TissueRadii,
    pub rejected: RejectedSet,
    pub surface_model: SphereFitModel,
}

struct CommonGeometry {
    electrodes: PointSet,
    solution_points: PointSet,
    translation: Vector3<f64>,
    inverse_center: Vector3<f64>,
    surface_model: SphereFitModel,
}

/// Shared head geometry: surface extraction, inverse center,
/// guillotine, top-point spherization fit, point translation.
fn prepare_geometry(
    head: &Volume,
    mut electrodes: PointSet,
    mut solution_points: PointSet,
) -> Result<CommonGeometry> {
    if electrodes.is_empty() || solution_points.is_empty() {
        return Err(NeurofieldError::InvalidInput(
            "empty electrode or solution point set".into(),
        ));
    }

    let mri_center = head.origin;
    let surface = head.surface_points(mri_center);
    if surface.is_empty() {
        return Err(NeurofieldError::Geometry("head surface not found".into()));
    }

    let translation = optimal_inverse_translation(&surface, &solution_points, &electrodes);

    let to_guillotine = guillotine_plane(head)?;

    let mut top = surface;
    top.keep_top_head_points(&to_guillotine);
    top.downsample(HEAD_MODEL_NUM_POINTS);
    if top.is_empty() {
        return Err(NeurofieldError::Geometry(
            "no head-top surface points above the guillotine plane".into(),
        ));
    }

    // every point now lives relative to the inverse center
    electrodes.translate(translation);
    solution_points.translate(translation);
    top.translate(translation);
    let inverse_center = mri_center - translation;

    let surface_model = SphereFitModel::fit(&top)?;

    Ok(CommonGeometry {
        electrodes,
        solution_points,
        translation,
        inverse_center,
        surface_model,
    })
}

fn layer_conductivities(options: &LeadFieldOptions) -> Vec<f64> {
    let skull_cond = age_to_skull_conductivity(options.age);
    let (compact_cond, spongy_cond) = split_skull_conductivity(
        skull_cond,
        SKULL_COMPACT_TO_SPONGY_RATIO,
        SKULL_SPONGY_PERCENTAGE,
    );
    options
        .preset
        .layer_conductivities(skull_cond, compact_cond, spongy_cond)
}

fn effective_skull_thickness(options: &LeadFieldOptions) -> f64 {
    if options.target_skull_thickness > 0.0 {
        options.target_skull_thickness
    } else {
        age_to_skull_thickness(options.age)
    }
}

/// Lead field from individual T1 volumes (head plus brain mask).
pub fn compute_lead_field_from_t1(
    head: &Volume,
    brain: &Volume,
    electrodes: PointSet,
    solution_points: PointSet,
    options: &LeadFieldOptions,
    seed: u64,
    cancel: Option<&AtomicBool>,
) -> Result<LeadFieldResult> {
    let geometry = prepare_geometry(head, electrodes, solution_points)?;

    info!(
        translation = ?geometry.translation.as_slice(),
        "geometry prepared, estimating tissue radii from T1"
    );

    // safe limit for the brain surface
    let mut brain_limit = brain.clone();
    brain_limit.binarize(brain.background, 1.0);
    brain_limit.morphology(MorphOp::Close, 1.0, 1)?;

    // some brains come without the cerebellum; a local skull stripping
    // patches the rear-bottom octant, leaving the cortex untouched
    let local_brain = skull_strip(
        head,
        SkullStripMethod::Iterative1B,
        1.5 * head.mean_voxel_size(),
        false,
    )?;
    let (d1, d2, d3) = brain_limit.dims();
    for x in 0..d1 {
        for y in 0..d2 / 2 {
            for z in 0..d3 / 2 {
                if local_brain.data[(x, y, z)] > 0.0 {
                    brain_limit.data[(x, y, z)] = 1.0;
                }
            }
        }
    }
    brain_limit.background = 0.5;

    // safe limit for the skull radius search
    let mut skull_limit = brain_limit.clone();
    skull_limit.morphology(MorphOp::Dilate, 8.0, 1)?;
    skull_limit.morphology(MorphOp::Erode, 9.0, 1)?;
    skull_limit.morphology(MorphOp::Relax, 6.0, 1)?;
    skull_limit.background = 0.5;

    let tissues_radii = estimate_tissues_radii_t1(
        &geometry.electrodes,
        options.smoothing,
        head,
        &skull_limit,
        &brain_limit,
        geometry.inverse_center,
        &head.voxel_size,
        options.adjust_radius,
        effective_skull_thickness(options),
        options.compact_thickness,
        seed,
    )?;

    finish_build(geometry, tissues_radii, options, cancel)
}

/// Lead field from a precomputed tissue segmentation.
pub fn compute_lead_field_from_segmentation(
    head: &Volume,
    tissues: &Volume,
    electrodes: PointSet,
    solution_points: PointSet,
    options: &LeadFieldOptions,
    cancel: Option<&AtomicBool>,
) -> Result<LeadFieldResult> {
    let geometry = prepare_geometry(head, electrodes, solution_points)?;

    info!(
        translation = ?geometry.translation.as_slice(),
        "geometry prepared, scanning tissue labels"
    );

    let tissues_radii = estimate_tissues_radii_segmentation(
        &geometry.electrodes,
        options.smoothing,
        tissues,
        tissues.origin,
        head.origin,
        &head.voxel_size,
        geometry.inverse_center,
        options.adjust_radius,
        effective_skull_thickness(options),
        options.compact_thickness,
    )?;

    finish_build(geometry, tissues_radii, options, cancel)
}

fn finish_build(
    geometry: CommonGeometry,
    tissues_radii: TissueRadii,
    options: &LeadFieldOptions,
    cancel: Option<&AtomicBool>,
) -> Result<LeadFieldResult> {
    let sigma = layer_conductivities(options);
    let preset = LeadFieldPreset::per_electrode(options.preset);

    let k = compute_lead_field(
        &preset,
        &geometry.electrodes,
        &geometry.solution_points,
        &geometry.surface_model,
        &sigma,
        &tissues_radii,
        cancel,
    )?;

    let mut rejected = RejectedSet::new(geometry.solution_points.len());
    check_null_lead_field(&k, &mut rejected);
    if rejected.count() == rejected.len() {
        return Err(NeurofieldError::Numerical(
            "all lead field columns were rejected".into(),
        ));
    }

    Ok(LeadFieldResult {
        k,
        electrodes: geometry.electrodes,
        solution_points: geometry.solution_points,
        mri_center_to_inverse_center: geometry.translation,
        tissues_radii,
        rejected,
        surface_model: geometry.surface_model,
    })
}
