//! Per-electrode lead field evaluation.
//!
//! Every electrode row is independent: shell radii are derived for the
//! electrode, each solution point is spherized through the surface
//! model, and the preset's forward model fills the 3-column block. The
//! sweep is parallel over electrodes; the final average-reference
//! centering is a single reduction.

use nalgebra::Vector3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::error::{NeurofieldError, Result};
use crate::forward::{
    potential_3shell_ary, potential_n_shell, Dipole, EvalMode, ForwardPreset, SkullRadiusMode,
    N_SHELL_CONVERGENCE, N_SHELL_MAX_TERMS,
};
use crate::geometry::{PointSet, SphereFitModel};
use crate::leadfield::LeadField;
use crate::tissues::{TissueClass, TissueLimit, TissueRadii};

/// A forward preset plus its skull radius handling.
#[derive(Debug, Clone, Copy)]
pub struct LeadFieldPreset {
    pub preset: ForwardPreset,
    pub skull_radius_mode: SkullRadiusMode,
}

impl LeadFieldPreset {
    pub fn per_electrode(preset: ForwardPreset) -> Self {
        Self {
            preset,
            skull_radius_mode: SkullRadiusMode::PerElectrode,
        }
    }
}

/// Shell radii for one electrode, innermost first, outer radius 1.
fn shell_radii(
    lf: &LeadFieldPreset,
    electrode: &Vector3<f64>,
    el_radius: f64,
    surface_model: &SphereFitModel,
    radii: &TissueRadii,
    ei: usize,
) -> Vec<f64> {
    let (inner_skull, outer_skull) = match lf.skull_radius_mode {
        SkullRadiusMode::FixedRatio { inner, outer } => (inner, outer),
        SkullRadiusMode::ModulatedRatio { inner, outer } => {
            // what is beyond the model scalp counts as more scalp,
            // proportionally shrinking the skull radii
            let to_model = surface_model.unspherize(*electrode, false);
            let correction = el_radius / to_model.norm();
            (inner / correction, outer / correction)
        }
        SkullRadiusMode::PerElectrode => (
            radii.get(ei, TissueClass::Skull, TissueLimit::InnerRel) as f64,
            radii.get(ei, TissueClass::Skull, TissueLimit::OuterRel) as f64,
        ),
    };

    match lf.preset.num_layers() {
        3 => vec![inner_skull, outer_skull, 1.0],
        4 => vec![
            radii.get(ei, TissueClass::Csf, TissueLimit::InnerRel) as f64,
            inner_skull,
            outer_skull,
            1.0,
        ],
        _ => vec![
            radii.get(ei, TissueClass::Csf, TissueLimit::InnerRel) as f64,
            inner_skull,
            radii.get(ei, TissueClass::SkullSpongy, TissueLimit::InnerRel) as f64,
            radii.get(ei, TissueClass::SkullSpongy, TissueLimit::OuterRel) as f64,
            outer_skull,
            1.0,
        ],
    }
}

/// Compute K for all (electrode, solution point) pairs. All points are
/// assumed to be centered on the inverse center already.
pub fn compute_lead_field(
    lf: &LeadFieldPreset,
    electrodes: &PointSet,
    solution_points: &PointSet,
    surface_model: &SphereFitModel,
    sigma: &[f64],
    radii: &TissueRadii,
    cancel: Option<&AtomicBool>,
) -> Result<LeadField> {
    if electrodes.is_empty() || solution_points.is_empty() {
        return Err(NeurofieldError::InvalidInput(
            "empty electrode or solution point set".into(),
        ));
    }
    if sigma.len() != lf.preset.num_layers() {
        return Err(NeurofieldError::DimensionMismatch {
            expected: lf.preset.num_layers(),
            got: sigma.len(),
        });
    }

    let num_el = electrodes.len();
    let num_sp = solution_points.len();

    info!(
        preset = lf.preset.name(),
        num_el, num_sp, "computing lead field"
    );

    // spherization radius of every solution point, shared by all rows
    let sp_surf_radius: Vec<f64> = solution_points
        .iter()
        .map(|&sp| surface_model.to_model(sp).norm())
        .collect();

    let rows: Vec<Vec<f64>> = (0..num_el)
        .into_par_iter()
        .map(|ei| -> Result<Vec<f64>> {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(NeurofieldError::Cancelled);
                }
            }

            let electrode = electrodes.points[ei];
            // the real electrode radius; coregistration can leave it
            // slightly off the head model
            let el_radius = electrode.norm();
            let electrode_unit = electrode / el_radius;

            let shells = shell_radii(lf, &electrode, el_radius, surface_model, radii, ei);

            let mut row = vec![0.0f64; 3 * num_sp];

            for (si, &sp) in solution_points.iter().enumerate() {
                if let Some(flag) = cancel {
                    if flag.load(Ordering::Relaxed) {
                        return Err(NeurofieldError::Cancelled);
                    }
                }
                // normalizing by the point's own surface radius
                // spherizes the whole distribution; the point can
                // hardly end up above the skull this way
                let spradius = sp_surf_radius[si];
                let mut dipole = Dipole::new(sp / spradius, Vector3::zeros());

                if lf.preset.is_ary() {
                    potential_3shell_ary(
                        &mut dipole,
                        EvalMode::LeadField,
                        &electrode_unit,
                        &shells[..2],
                        sigma,
                    );
                } else {
                    potential_n_shell(
                        &mut dipole,
                        EvalMode::LeadField,
                        &electrode_unit,
                        &shells,
                        sigma,
                        N_SHELL_MAX_TERMS,
                        N_SHELL_CONVERGENCE,
                    );
                }

                // rescale the normalized-sphere value to the physical
                // sphere radius, in meters
                dipole.direction /= 1000.0 * (spradius / 1000.0).powi(2);

                row[3 * si] = dipole.direction.x;
                row[3 * si + 1] = dipole.direction.y;
                row[3 * si + 2] = dipole.direction.z;
            }

            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut k = LeadField::zeros(num_el, num_sp);
    for (ei, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            k.matrix[(ei, j)] = v;
        }
    }

    k.average_reference();

    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_sphere_model() -> SphereFitModel {
        SphereFitModel {
            center: Vector3::zeros(),
            semi_axes: Vector3::repeat(100.0),
        }
    }

    fn cap_electrodes(n: usize) -> PointSet {
        let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
        PointSet::new(
            (0..n)
                .map(|i| {
                    // upper-hemisphere spiral
                    let z = 0.15 + 0.85 * (i as f64 + 0.5) / n as f64;
                    let r = (1.0 - z * z).sqrt();
                    let a = golden * i as f64;
                    Vector3::new(r * a.cos(), r * a.sin(), z) * 100.0
                })
                .collect(),
        )
    }

    fn inner_grid(n_side: usize) -> PointSet {
        let mut points = Vec::new();
        let step = 20.0;
        for x in 0..n_side {
            for y in 0..n_side {
                for z in 0..n_side {
                    let p = Vector3::new(
                        x as f64 - (n_side - 1) as f64 / 2.0,
                        y as f64 - (n_side - 1) as f64 / 2.0,
                        z as f64 - (n_side - 1) as f64 / 2.0,
                    ) * step;
                    if p.norm() < 60.0 {
                        points.push(p);
                    }
                }
            }
        }
        PointSet::new(points)
    }

    fn fixed_preset(preset: ForwardPreset) -> LeadFieldPreset {
        LeadFieldPreset {
            preset,
            skull_radius_mode: SkullRadiusMode::FixedRatio {
                inner: ForwardPreset::DEFAULT_INNER_SKULL_RADIUS,
                outer: ForwardPreset::DEFAULT_OUTER_SKULL_RADIUS,
            },
        }
    }

    #[test]
    fn columns_are_average_referenced() {
        let electrodes = cap_electrodes(32);
        let sps = inner_grid(5);
        let lf = fixed_preset(ForwardPreset::Ary3ShellApprox);
        let sigma = ForwardPreset::Ary3ShellApprox.layer_conductivities(0.0105, 0.0, 0.0);
        let radii = TissueRadii::new(electrodes.len());

        let k = compute_lead_field(
            &lf,
            &electrodes,
            &sps,
            &unit_sphere_model(),
            &sigma,
            &radii,
            None,
        )
        .unwrap();

        for j in 0..k.matrix.ncols() {
            let col = k.matrix.column(j);
            let sum: f64 = col.iter().sum();
            let max = col.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            assert!(sum.abs() <= 1e-9 * max.max(1e-30), "column {j} not centered");
        }
    }

    #[test]
    fn deterministic_rebuild_is_bit_identical() {
        let electrodes = cap_electrodes(16);
        let sps = inner_grid(4);
        let lf = fixed_preset(ForwardPreset::Ary3ShellApprox);
        let sigma = ForwardPreset::Ary3ShellApprox.layer_conductivities(0.0105, 0.0, 0.0);
        let radii = TissueRadii::new(electrodes.len());
        let model = unit_sphere_model();

        let a = compute_lead_field(&lf, &electrodes, &sps, &model, &sigma, &radii, None).unwrap();
        let b = compute_lead_field(&lf, &electrodes, &sps, &model, &sigma, &radii, None).unwrap();
        assert_eq!(a.matrix, b.matrix);
    }

    #[test]
    fn exact_three_shell_produces_finite_columns() {
        let electrodes = cap_electrodes(12);
        let sps = inner_grid(3);
        let lf = fixed_preset(ForwardPreset::Exact3Shell);
        let sigma = ForwardPreset::Exact3Shell.layer_conductivities(0.0105, 0.0, 0.0);
        let radii = TissueRadii::new(electrodes.len());

        let k = compute_lead_field(
            &lf,
            &electrodes,
            &sps,
            &unit_sphere_model(),
            &sigma,
            &radii,
            None,
        )
        .unwrap();
        assert!(k.matrix.iter().all(|v| v.is_finite()));
        assert!(k.matrix.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn cancellation_discards_the_build() {
        let electrodes = cap_electrodes(8);
        let sps = inner_grid(3);
        let lf = fixed_preset(ForwardPreset::Ary3ShellApprox);
        let sigma = ForwardPreset::Ary3ShellApprox.layer_conductivities(0.0105, 0.0, 0.0);
        let radii = TissueRadii::new(electrodes.len());
        let cancel = AtomicBool::new(true);

        let result = compute_lead_field(
            &lf,
            &electrodes,
            &sps,
            &unit_sphere_model(),
            &sigma,
            &radii,
            Some(&cancel),
        );
        assert!(matches!(result, Err(NeurofieldError::Cancelled)));
    }
}
