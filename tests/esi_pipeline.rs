//! End-to-end lead field construction on a synthetic head phantom.

use nalgebra::Vector3;
use neurofield::config::LeadFieldOptions;
use neurofield::esi::{compute_lead_field_from_segmentation, compute_lead_field_from_t1};
use neurofield::forward::ForwardPreset;
use neurofield::geometry::PointSet;
use neurofield::leadfield::{check_null_lead_field, reject_points, RejectedSet};
use neurofield::tissues::{SpatialFilterKind, TissueClass, TissueLimit};
use neurofield::volume::Volume;

const DIM: usize = 64;
const CENTER: f64 = 32.0;
const HEAD_Z: f64 = 38.0;
const BRAIN_RADIUS: f64 = 14.0;
const SKULL_INNER: f64 = 16.0;
const SKULL_OUTER: f64 = 19.0;
const SCALP_RADIUS: f64 = 23.0;

fn head_center() -> Vector3<f64> {
    Vector3::new(CENTER, CENTER, HEAD_Z)
}

/// Bright scalp and brain around a dark skull shell, plus a neck.
fn phantom_head() -> Volume {
    let mut v = Volume::zeros(DIM, DIM, DIM);
    v.origin = head_center();
    for x in 0..DIM {
        for y in 0..DIM {
            for z in 0..DIM {
                let p = Vector3::new(x as f64, y as f64, z as f64) - head_center();
                let r = p.norm();
                let value = if r <= BRAIN_RADIUS {
                    120.0 - (BRAIN_RADIUS - r) * 0.3
                } else if r <= SKULL_OUTER {
                    15.0
                } else if r <= SCALP_RADIUS {
                    100.0 - (r - 21.0).abs() * 3.0
                } else if (z as f64) < HEAD_Z - 10.0
                    && z > 2
                    && (p.x * p.x + p.y * p.y).sqrt() < 7.0
                {
                    90.0 // neck
                } else {
                    0.0
                };
                v.set(x, y, z, value as f32);
            }
        }
    }
    v.background = 20.0;
    v
}

fn phantom_brain() -> Volume {
    let mut v = Volume::zeros(DIM, DIM, DIM);
    v.origin = head_center();
    for x in 0..DIM {
        for y in 0..DIM {
            for z in 0..DIM {
                let r = (Vector3::new(x as f64, y as f64, z as f64) - head_center()).norm();
                if r <= BRAIN_RADIUS {
                    v.set(x, y, z, 1.0);
                }
            }
        }
    }
    v.background = 0.5;
    v
}

fn phantom_tissues() -> Volume {
    let mut v = Volume::zeros(DIM, DIM, DIM);
    v.origin = head_center();
    for x in 0..DIM {
        for y in 0..DIM {
            for z in 0..DIM {
                let r = (Vector3::new(x as f64, y as f64, z as f64) - head_center()).norm();
                let label = if r <= BRAIN_RADIUS {
                    TissueClass::Brain as u8 as f32
                } else if r <= SKULL_INNER {
                    TissueClass::Csf as u8 as f32
                } else if r <= SKULL_OUTER {
                    TissueClass::Skull as u8 as f32
                } else if r <= SCALP_RADIUS {
                    TissueClass::Scalp as u8 as f32
                } else {
                    0.0
                };
                v.set(x, y, z, label);
            }
        }
    }
    v
}

/// Electrodes over the upper hemisphere of the scalp.
fn electrodes(n: usize) -> PointSet {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    PointSet::new(
        (0..n)
            .map(|i| {
                let z = 0.25 + 0.7 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let a = golden * i as f64;
                Vector3::new(r * a.cos(), r * a.sin(), z) * SCALP_RADIUS
            })
            .collect(),
    )
}

/// Regular grid of solution points inside the brain.
fn solution_points() -> PointSet {
    let mut points = Vec::new();
    let step = 4.0;
    for x in -3..=3 {
        for y in -3..=3 {
            for z in -3..=3 {
                let p = Vector3::new(x as f64, y as f64, z as f64) * step;
                if p.norm() < BRAIN_RADIUS - 2.0 {
                    points.push(p);
                }
            }
        }
    }
    PointSet::new(points)
}

fn options(preset: ForwardPreset) -> LeadFieldOptions {
    LeadFieldOptions {
        preset,
        age: 35.0,
        target_skull_thickness: 0.0,
        adjust_radius: true,
        smoothing: SpatialFilterKind::None,
        compact_thickness: None,
    }
}

#[test]
fn t1_pipeline_builds_a_centered_lead_field() {
    let head = phantom_head();
    let brain = phantom_brain();

    let result = compute_lead_field_from_t1(
        &head,
        &brain,
        electrodes(12),
        solution_points(),
        &options(ForwardPreset::Ary3ShellApprox),
        42,
        None,
    )
    .unwrap();

    let k = &result.k;
    assert_eq!(k.num_electrodes(), 12);
    assert_eq!(k.num_solution_points(), result.solution_points.len());

    // every column is average-referenced
    for j in 0..k.matrix.ncols() {
        let col = k.matrix.column(j);
        let sum: f64 = col.iter().sum();
        let max = col.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(sum.abs() <= 1e-9 * max.max(1e-30), "column {j}");
    }

    // surviving columns are finite
    for sp in 0..k.num_solution_points() {
        if result.rejected.is_set(sp) {
            continue;
        }
        for ei in 0..k.num_electrodes() {
            for c in 0..3 {
                assert!(k.matrix[(ei, 3 * sp + c)].is_finite());
            }
        }
    }

    // tissue radii satisfy the stacking invariants
    let radii = &result.tissues_radii;
    for e in 0..12 {
        let csf = radii.get(e, TissueClass::Csf, TissueLimit::InnerRel);
        let skull_in = radii.get(e, TissueClass::Skull, TissueLimit::InnerRel);
        let skull_out = radii.get(e, TissueClass::Skull, TissueLimit::OuterRel);
        assert!(csf <= skull_in && skull_in <= skull_out && skull_out <= 1.0);
        assert_eq!(radii.get(e, TissueClass::Scalp, TissueLimit::OuterRel), 1.0);
    }
}

#[test]
fn t1_pipeline_is_deterministic() {
    let head = phantom_head();
    let brain = phantom_brain();
    let run = || {
        compute_lead_field_from_t1(
            &head,
            &brain,
            electrodes(8),
            solution_points(),
            &options(ForwardPreset::Ary3ShellApprox),
            7,
            None,
        )
        .unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.k.matrix, b.k.matrix);
}

#[test]
fn segmentation_pipeline_supports_all_presets() {
    let head = phantom_head();
    let tissues = phantom_tissues();

    for preset in [
        ForwardPreset::Exact3Shell,
        ForwardPreset::Exact4Shell,
        ForwardPreset::Exact6Shell,
    ] {
        let result = compute_lead_field_from_segmentation(
            &head,
            &tissues,
            electrodes(8),
            solution_points(),
            &options(preset),
            None,
        )
        .unwrap();

        assert!(result.k.matrix.iter().all(|v| v.is_finite()), "{preset:?}");
        assert!(
            result.rejected.count() < result.solution_points.len(),
            "{preset:?}: everything rejected"
        );
    }
}

#[test]
fn rejection_compacts_the_final_matrix() {
    let head = phantom_head();
    let tissues = phantom_tissues();

    let mut result = compute_lead_field_from_segmentation(
        &head,
        &tissues,
        electrodes(8),
        solution_points(),
        &options(ForwardPreset::Exact3Shell),
        None,
    )
    .unwrap();

    let num_sp = result.k.num_solution_points();
    // force a few rejections on top of whatever the checks found
    let mut rejected = RejectedSet::new(num_sp);
    check_null_lead_field(&result.k, &mut rejected);
    for sp in [0, 3] {
        rejected.set(sp);
    }
    let expected = num_sp - rejected.count();

    reject_points(&mut result.k, &rejected);
    assert_eq!(result.k.num_solution_points(), expected);
}
