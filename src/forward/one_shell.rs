//! 1-shell closed forms.

use nalgebra::Vector3;
use std::f64::consts::PI;

use crate::forward::dipole::Dipole;
use crate::forward::{DipoleAngles, SINGLE_EPSILON};

const FOUR_PI: f64 = 4.0 * PI;

/// Rescaling aligning the vectorial form with the N-shell series
/// implementation; not part of the textbook formula.
pub const VECTOR_NSHELL_ALIGNMENT: f64 = 2.46;

/// Electric field of a dipole at a relative position, real coordinates.
pub fn dipole_electric_field(
    dipole_dir: &Vector3<f64>,
    rel_pos: &Vector3<f64>,
    sigma: f64,
) -> Vector3<f64> {
    let r_norm = rel_pos.norm();
    let r_hat = rel_pos / r_norm;
    (r_hat * (3.0 * dipole_dir.dot(&r_hat)) - dipole_dir)
        / (FOUR_PI * sigma * r_norm * r_norm * r_norm)
}

/// Vectorial direct computation (Fender). Matches the N-shell series
/// for a single layer, up to the alignment constant.
pub fn potential_1shell_vector(
    dipole: &Dipole,
    electrode_pos: &Vector3<f64>,
    sigma: f64,
) -> f64 {
    let r_norm = electrode_pos.norm();
    let r_hat = electrode_pos / r_norm;

    let d = electrode_pos - dipole.position;
    let d_norm = d.norm();
    let d_hat = d / d_norm;

    // angle is in [0, π/2), the denominator never vanishes
    let rd = (r_hat + d_hat) / (r_norm * d_norm * (1.0 + r_hat.dot(&d_hat)))
        + d_hat * (2.0 / (d_norm * d_norm));

    dipole.direction.dot(&rd) / (FOUR_PI * sigma) / VECTOR_NSHELL_ALIGNMENT
}

/// Simpler approximate form, valid for any real geometry.
pub fn potential_1shell_approx_vector(
    dipole: &Dipole,
    electrode_pos: &Vector3<f64>,
    sigma: f64,
) -> f64 {
    let kev = electrode_pos - dipole.position;
    let n = kev.norm();
    dipole.direction.dot(&kev) / (FOUR_PI * sigma * n * n * n)
}

/// 1-shell Legendre closed form (Zhang eq. 1H'), normalized sphere.
pub fn potential_1shell_legendre(
    dipole: &mut Dipole,
    electrode_pos: &Vector3<f64>,
    sigma: f64,
) -> f64 {
    if electrode_pos.norm() == 0.0 {
        return f64::INFINITY;
    }
    if dipole.direction.norm() == 0.0 {
        return 0.0;
    }

    let r = 1.0f64;

    // the solution point cannot live above the sphere
    let mut spradius = dipole.position.norm().min(r);
    if spradius < SINGLE_EPSILON {
        dipole.position = electrode_pos * (100.0 * SINGLE_EPSILON / electrode_pos.norm());
        spradius = dipole.position.norm();
    }

    let angles = DipoleAngles::compute(dipole, electrode_pos, false);

    // radial and tangential dipole components
    let d_norm = dipole.direction.norm();
    let dr = d_norm * angles.cos_alpha;
    let dt = d_norm * angles.sin_alpha;

    let l = (electrode_pos - dipole.position).norm();
    let l3 = l * l * l;

    let ur = dr
        * (2.0 * (r * angles.cos_gamma - spradius) / l3
            + (1.0 / (spradius * l) - 1.0 / (spradius * r)));

    let ut = dt
        * angles.cos_beta
        * angles.sin_gamma
        * (2.0 * r / l3 + (l + r) / (l * r * (r - spradius * angles.cos_gamma + l)));

    (ur + ut) / (FOUR_PI * sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn radial_dipole_closed_forms_agree() {
        let mut dipole = Dipole::new(Vector3::new(0.0, 0.0, 0.5), Vector3::new(0.0, 0.0, 1.0));
        let electrode = Vector3::new(0.0, 0.0, 1.0);
        let sigma = 0.33;

        // Zhang radial term: 2(Rcosγ - r)/L³ + 1/(rL) - 1/(rR) = 10
        let legendre = potential_1shell_legendre(&mut dipole, &electrode, sigma);
        assert_relative_eq!(legendre, 10.0 / (4.0 * PI * sigma), epsilon = 1e-6);

        // Fender agrees once the alignment constant is removed
        let vector = potential_1shell_vector(&dipole, &electrode, sigma);
        assert_relative_eq!(vector * VECTOR_NSHELL_ALIGNMENT, legendre, epsilon = 1e-6);
    }

    #[test]
    fn potential_decays_with_distance() {
        let sigma = 0.33;
        let dipole = Dipole::new(Vector3::new(0.0, 0.0, 0.3), Vector3::new(0.0, 0.0, 1.0));
        let near = potential_1shell_approx_vector(&dipole, &Vector3::new(0.0, 0.0, 1.0), sigma);
        let far = potential_1shell_approx_vector(&dipole, &Vector3::new(0.0, 1.0, 0.0), sigma);
        assert!(near > far.abs());
    }

    #[test]
    fn null_direction_yields_null_potential() {
        let mut dipole = Dipole::new(Vector3::new(0.0, 0.0, 0.5), Vector3::zeros());
        assert_eq!(
            potential_1shell_legendre(&mut dipole, &Vector3::new(0.0, 0.0, 1.0), 0.33),
            0.0
        );
    }

    #[test]
    fn centered_dipole_is_shifted_to_a_finite_value() {
        let mut dipole = Dipole::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 1.0));
        let u = potential_1shell_legendre(&mut dipole, &Vector3::new(0.0, 0.0, 1.0), 0.33);
        assert!(u.is_finite());
        assert!(dipole.position.norm() > 0.0);
    }
}
