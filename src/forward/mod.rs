//! Analytical forward models
//!
//! Scalp potential of a current dipole inside concentric isotropic
//! spherical shells: 1-shell closed forms, the 3-shell Ary
//! approximation and the exact N-shell Legendre series.

pub mod ary;
pub mod dipole;
pub mod legendre;
pub mod n_shell;
pub mod one_shell;
pub mod preset;

pub use ary::potential_3shell_ary;
pub use dipole::{Dipole, EvalMode};
pub use n_shell::{potential_n_shell, N_SHELL_CONVERGENCE, N_SHELL_MAX_TERMS};
pub use one_shell::{
    potential_1shell_approx_vector, potential_1shell_legendre, potential_1shell_vector,
};
pub use preset::{ForwardPreset, SkullRadiusMode};

use nalgebra::Vector3;

pub(crate) const SINGLE_EPSILON: f64 = f32::EPSILON as f64;
pub(crate) const DOUBLE_EPSILON: f64 = f64::EPSILON;

pub(crate) fn relative_difference(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE)
}

fn cosine(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let n = a.norm() * b.norm();
    if n == 0.0 {
        1.0
    } else {
        (a.dot(b) / n).clamp(-1.0, 1.0)
    }
}

fn is_aligned(a: &Vector3<f64>, b: &Vector3<f64>, epsilon: f64) -> bool {
    cosine(a, b).abs() >= 1.0 - epsilon
}

/// The three angles every spherical-shell formula runs on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DipoleAngles {
    /// Dipole position vs direction: how radial the dipole is.
    pub cos_alpha: f64,
    pub sin_alpha: f64,
    /// Orientation of the tangential plane; 1 in lead field mode.
    pub cos_beta: f64,
    /// Dipole position vs electrode direction.
    pub cos_gamma: f64,
    pub sin_gamma: f64,
}

impl DipoleAngles {
    /// `lead_field` skips the β computation: the direction is toward
    /// the electrode, inside the position-electrode plane.
    pub fn compute(dipole: &Dipole, electrode: &Vector3<f64>, lead_field: bool) -> Self {
        // β: how perpendicular the dipole is to the
        // electrode-center-position plane
        let cos_beta = if lead_field
            || dipole.position.norm() == 0.0
            || is_aligned(&dipole.direction, &dipole.position, SINGLE_EPSILON)
            || is_aligned(electrode, &dipole.position, SINGLE_EPSILON)
        {
            1.0
        } else {
            // sequence matters to get the correct angle
            let p1 = dipole.direction.cross(&dipole.position);
            let p2 = electrode.cross(&dipole.position);
            cosine(&p1, &p2)
        };

        // α in [0, π], so sin α is the positive root
        let (mut cos_alpha, mut sin_alpha) = if dipole.position.norm() == 0.0 {
            (1.0, 0.0)
        } else {
            let c = cosine(&dipole.position, &dipole.direction);
            (c, (1.0 - c * c).sqrt())
        };

        // γ in [0, π]; a centered dipole picks cos γ = 0, which
        // simplifies the Legendre terms
        let mut cos_gamma = if dipole.position.norm() == 0.0 {
            0.0
        } else {
            cosine(&dipole.position, electrode)
        };

        // electrodes perfectly aligned with the dipole position make
        // the Legendre recurrences return NaN; one epsilon off is
        // enough. No correct formula exists for the exact degenerate
        // case, so the nudge is the behavior.
        if relative_difference(cos_gamma.abs(), 1.0) < SINGLE_EPSILON {
            cos_gamma = cos_gamma.signum() * (1.0 - DOUBLE_EPSILON);
        }
        if relative_difference(cos_alpha.abs(), 1.0) < SINGLE_EPSILON {
            cos_alpha = cos_alpha.signum() * (1.0 - DOUBLE_EPSILON);
            sin_alpha = (1.0 - cos_alpha * cos_alpha).sqrt();
        }

        let sin_gamma = (1.0 - cos_gamma * cos_gamma).sqrt();

        Self {
            cos_alpha,
            sin_alpha,
            cos_beta,
            cos_gamma,
            sin_gamma,
        }
    }
}
