//! Exact N-shell Legendre series.
//!
//! N concentric isotropic layers (Zhang eq. 1I/2I; Nunez & Srinivasan).
//! Radii are relative to the outer shell, R[N-1] = 1; sigma and R are
//! indexed [0, N), one less than the article's convention. The article
//! writes + cos β in the tangential term, but tabulated tangential
//! potentials want − cos β; the article's textual definition of β is
//! the culprit.

use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::forward::dipole::{Dipole, EvalMode};
use crate::forward::legendre::LegendreRecurrence;
use crate::forward::{DipoleAngles, SINGLE_EPSILON};

const FOUR_PI: f64 = 4.0 * PI;

/// 150 was enough for 4 shells; 300 is for the 6-shell models.
pub const N_SHELL_MAX_TERMS: usize = 300;
pub const N_SHELL_CONVERGENCE: f64 = 1e-6;

/// Potential at `electrode_pos` on the unit sphere. Position and
/// electrode are already normalized; in lead field mode the direction
/// is set toward the electrode and scaled by the result.
pub fn potential_n_shell(
    dipole: &mut Dipole,
    mode: EvalMode,
    electrode_pos: &Vector3<f64>,
    radii: &[f64],
    sigma: &[f64],
    max_terms: usize,
    convergence: f64,
) -> f64 {
    if electrode_pos.norm() == 0.0 {
        return f64::INFINITY;
    }
    if dipole.direction.norm() == 0.0 && mode != EvalMode::LeadField {
        return 0.0;
    }

    let num_layers = radii.len();

    // not allowing the solution point above the innermost sphere
    let mut spradius = dipole.position.norm().min(radii[0]);
    if spradius < SINGLE_EPSILON {
        dipole.position = electrode_pos * (SINGLE_EPSILON / electrode_pos.norm());
        spradius = dipole.position.norm();
    }

    if mode == EvalMode::LeadField {
        dipole.set_direction_toward(*electrode_pos);
    }

    let angles = DipoleAngles::compute(dipole, electrode_pos, mode == EvalMode::LeadField);

    let mut legendre = LegendreRecurrence::new(angles.cos_gamma);
    let mut u = 0.0f64;
    let mut error = 0.0f64;

    for n in 1..=max_terms {
        let nf = n as f64;

        // Ro/Re is the solution point radius itself: both points
        // already live in the normalized sphere
        let ro_re = (2.0 * nf + 1.0) / nf * spradius.powi(n as i32 - 1);

        // 2x2 transfer matrix across the shells (eq. 4I); only the
        // conductivity ratio of successive layers and the relative
        // radii enter
        let mut m11 = 1.0f64;
        let mut m12 = 0.0f64;
        let mut m21 = 0.0f64;
        let mut m22 = 1.0f64;
        for k in 0..num_layers.saturating_sub(1) {
            let sksk1 = sigma[k] / sigma[k + 1];
            let rk_pow = radii[k].powi(2 * n as i32 + 1);
            let p11 = nf + (nf + 1.0) * sksk1;
            let p12 = (nf + 1.0) * (sksk1 - 1.0) / rk_pow;
            let p21 = nf * (sksk1 - 1.0) * rk_pow;
            let p22 = (nf + 1.0) + nf * sksk1;

            let (t11, t12, t21, t22) = (m11, m12, m21, m22);
            m11 = t11 * p11 + t12 * p21;
            m12 = t11 * p12 + t12 * p22;
            m21 = t21 * p11 + t22 * p21;
            m22 = t21 * p12 + t22 * p22;
        }
        let m_den = (2.0 * nf + 1.0).powi(num_layers as i32 - 1);
        m21 /= m_den;
        m22 /= m_den;

        // isotropic layers: fn = gn (eq. 2I, 3I)
        let f_n = nf / (nf * m22 + (1.0 + nf) * m21);

        let (p_n, p1_n) = legendre.next();

        let delta = ro_re
            * f_n
            * (nf * angles.cos_alpha * p_n - angles.cos_beta * angles.sin_alpha * p1_n);

        // can happen with cos γ right on 0
        if !delta.is_finite() {
            break;
        }

        u += delta;

        // the deltas alternate signs; a naive |δ| stop terminates far
        // too early, so track a smoothed relative delta instead
        let rel = (delta / if u == 0.0 { 1.0 } else { u }).abs();
        error = rel.max((error + rel) / 2.0);

        if error < convergence {
            break;
        }
    }

    u /= FOUR_PI * sigma[num_layers - 1];

    if mode == EvalMode::LeadField {
        dipole.direction *= u;
    }

    u
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::one_shell::{potential_1shell_vector, VECTOR_NSHELL_ALIGNMENT};
    use approx::assert_relative_eq;

    fn n_shell(dipole: &mut Dipole, electrode: &Vector3<f64>, radii: &[f64], sigma: &[f64]) -> f64 {
        potential_n_shell(
            dipole,
            EvalMode::Potentials,
            electrode,
            radii,
            sigma,
            N_SHELL_MAX_TERMS,
            N_SHELL_CONVERGENCE,
        )
    }

    #[test]
    fn single_layer_matches_the_vectorial_closed_form() {
        let sigma = 0.33;
        // sweep cos γ well away from ±1
        for (px, pz, dx, dz) in [
            (0.1, 0.45, 0.0, 1.0),
            (0.3, 0.3, 1.0, 0.0),
            (0.25, -0.3, 0.3, 0.7),
            (0.0, 0.5, 0.5, 0.5),
        ] {
            let electrode = Vector3::new(0.6, 0.0, 0.8);
            let mut dipole = Dipole::new(
                Vector3::new(px, 0.0, pz),
                Vector3::new(dx, 0.0, dz).normalize(),
            );
            let series = n_shell(&mut dipole, &electrode, &[1.0], &[sigma]);
            let vector =
                potential_1shell_vector(&dipole, &electrode, sigma) * VECTOR_NSHELL_ALIGNMENT;
            assert_relative_eq!(series, vector, max_relative = 1e-4);
        }
    }

    #[test]
    fn centered_dipole_in_uniform_sphere_is_silent() {
        // a dipole right at the center: the epsilon shift keeps the
        // series finite and the potential negligible
        let mut dipole = Dipole::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let u = n_shell(
            &mut dipole,
            &Vector3::new(0.0, 0.0, 1.0),
            &[1.0],
            &[0.33],
        );
        assert!(u.is_finite());
        assert!(u.abs() < 1e-4);
    }

    #[test]
    fn three_shell_attenuates_through_the_skull() {
        let radii = [0.87, 0.92, 1.0];
        let sigma = [0.33, 0.0105, 0.33];
        let electrode = Vector3::new(0.0, 0.0, 1.0);

        let mut dipole = Dipole::new(Vector3::new(0.0, 0.3, 0.4), Vector3::new(0.0, 0.0, 1.0));
        let shielded = n_shell(&mut dipole, &electrode, &radii, &sigma);

        let mut dipole1 = Dipole::new(Vector3::new(0.0, 0.3, 0.4), Vector3::new(0.0, 0.0, 1.0));
        let bare = n_shell(&mut dipole1, &electrode, &[1.0], &[0.33]);

        assert!(shielded.is_finite() && bare.is_finite());
        assert!(shielded.abs() < bare.abs());
    }

    #[test]
    fn lead_field_mode_scales_the_direction() {
        let radii = [0.87, 0.92, 1.0];
        let sigma = [0.33, 0.0105, 0.33];
        let electrode = Vector3::new(0.0, 0.0, 1.0);
        let mut dipole = Dipole::new(Vector3::new(0.1, 0.0, 0.4), Vector3::zeros());
        let u = potential_n_shell(
            &mut dipole,
            EvalMode::LeadField,
            &electrode,
            &radii,
            &sigma,
            N_SHELL_MAX_TERMS,
            N_SHELL_CONVERGENCE,
        );
        assert!(u.is_finite());
        assert_relative_eq!(dipole.direction.norm(), u.abs(), epsilon = 1e-12);
    }

    #[test]
    fn edge_dipole_converges_within_the_term_budget() {
        let radii = [0.87, 0.92, 1.0];
        let sigma = [0.33, 0.0105, 0.33];
        // dipole on the innermost shell surface, electrode at an angle
        let mut dipole = Dipole::new(
            Vector3::new(0.6, 0.0, 0.63).normalize() * 0.87,
            Vector3::new(0.0, 0.0, 1.0),
        );
        let u = n_shell(&mut dipole, &Vector3::new(0.0, 0.0, 1.0), &radii, &sigma);
        assert!(u.is_finite());
        assert!(u.abs() > 0.0);
    }
}
