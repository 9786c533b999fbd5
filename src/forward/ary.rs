//! 3-shell Ary approximation.
//!
//! Replaces a dipole inside a 3-shell sphere by an equivalent 1-shell
//! dipole: the position is pulled inward and the moment corrected,
//! separately for the radial and tangential components, then both are
//! mixed by how radial the dipole actually is.

use nalgebra::Vector3;

use crate::forward::dipole::{Dipole, EvalMode};
use crate::forward::one_shell::potential_1shell_vector;
use crate::forward::{relative_difference, DOUBLE_EPSILON, SINGLE_EPSILON};

// More Legendre terms are needed as the dipole approaches the skull
pub const ARY_LEGENDRE_TERMS_MIN: usize = 20;
pub const ARY_LEGENDRE_TERMS_MAX: usize = 100;

// Two-phase Rho minimization: coarse linear descent, then dichotomy
pub const SHELL3TO1_STEP_INIT: f64 = 0.05;
pub const SHELL3TO1_CONVERGENCE: f64 = 1e-6;
// below this radius the formula destabilizes; extrapolate linearly
pub const SHELL3TO1_LOWEST_RADIUS3: f64 = 0.05;

/// Simplified Legendre term, most factors cancel out (Ary eq. 3a).
fn ary_fn(n: f64, xi: f64, inner_skull_radius: f64, outer_skull_radius: f64) -> f64 {
    let dn = ((n + 1.0) * xi + n)
        * ((n * xi / (n + 1.0) + 1.0)
            + (1.0 - xi)
                * (inner_skull_radius.powf(2.0 * n + 1.0)
                    - outer_skull_radius.powf(2.0 * n + 1.0)))
        - n * (1.0 - xi) * (1.0 - xi)
            * (inner_skull_radius / outer_skull_radius).powf(2.0 * n + 1.0);

    xi * (2.0 * n + 1.0) * (2.0 * n + 1.0) / (dn * (n + 1.0))
}

fn num_legendre_terms(radius3: f64, inner_skull_radius: f64) -> usize {
    ARY_LEGENDRE_TERMS_MIN
        + ((radius3 / inner_skull_radius).clamp(0.0, 1.0)
            * (ARY_LEGENDRE_TERMS_MAX - ARY_LEGENDRE_TERMS_MIN) as f64) as usize
}

/// Fit error between the 3-shell dipole and its 1-shell equivalent.
/// The constant muFF term is dropped, it does not move the minimum.
fn rho(
    tangential: bool,
    radius1: f64,
    radius3: f64,
    xi: f64,
    inner_skull_radius: f64,
    outer_skull_radius: f64,
) -> f64 {
    if radius1 == 0.0 || radius3 == 0.0 {
        return 0.0;
    }
    if radius3 < SHELL3TO1_LOWEST_RADIUS3 {
        return rho(
            tangential,
            radius1 * SHELL3TO1_LOWEST_RADIUS3 / radius3,
            SHELL3TO1_LOWEST_RADIUS3,
            xi,
            inner_skull_radius,
            outer_skull_radius,
        );
    }

    let mut mu_bb = 0.0f64;
    let mut mu_bf = 0.0f64;
    for i in 1..=num_legendre_terms(radius3, inner_skull_radius) {
        let n = i as f64;
        let factor = if tangential {
            (2.0 * n + 1.0) * (n + 1.0) / n
        } else {
            2.0 * n + 1.0
        };
        mu_bb += factor * radius1.powf(2.0 * n - 2.0);
        mu_bf += factor
            * radius1.powf(n - 1.0)
            * radius3.powf(n - 1.0)
            * ary_fn(n, xi, inner_skull_radius, outer_skull_radius);
    }

    -(mu_bf * mu_bf) / mu_bb
}

/// Equivalent 1-shell radius minimizing Rho. No analytic solution:
/// coarse descent from radius3, then dichotomic refinement.
fn r3_to_r1(
    tangential: bool,
    radius3: f64,
    xi: f64,
    inner_skull_radius: f64,
    outer_skull_radius: f64,
) -> f64 {
    if radius3 == 0.0 {
        return 0.0;
    }

    let mut radius1 = radius3;
    let mut step = radius3 * SHELL3TO1_STEP_INIT;

    let mut last = rho(tangential, radius1, radius3, xi, inner_skull_radius, outer_skull_radius);
    loop {
        radius1 -= step;
        let current =
            rho(tangential, radius1, radius3, xi, inner_skull_radius, outer_skull_radius);
        if current >= last || radius1 < 0.0 {
            break;
        }
        last = current;
    }
    // center back onto the closest minimum
    radius1 = (radius1 + step).clamp(0.0, radius3);

    step /= 2.0;
    while step > SHELL3TO1_CONVERGENCE {
        let left = rho(
            tangential,
            radius1 - step,
            radius3,
            xi,
            inner_skull_radius,
            outer_skull_radius,
        );
        let right = rho(
            tangential,
            radius1 + step,
            radius3,
            xi,
            inner_skull_radius,
            outer_skull_radius,
        );
        if left < right {
            radius1 -= step;
        } else {
            radius1 += step;
        }
        step /= 2.0;
    }

    radius1
}

/// Moment correction for the equivalent dipole (Ary eq. 8 / 15).
fn m3_to_m1(
    tangential: bool,
    radius1: f64,
    radius3: f64,
    xi: f64,
    inner_skull_radius: f64,
    outer_skull_radius: f64,
) -> f64 {
    let (radius1, radius3) = if radius3 == 0.0 {
        (1e-10, 1e-10)
    } else {
        (radius1, radius3)
    };

    let mut mu_bb = 0.0f64;
    let mut mu_bf = 0.0f64;
    for i in 1..=num_legendre_terms(radius3, inner_skull_radius) {
        let n = i as f64;
        let factor = if tangential {
            (2.0 * n + 1.0) * (n + 1.0) / n
        } else {
            2.0 * n + 1.0
        };
        mu_bb += factor * radius1.powf(2.0 * n - 2.0);
        mu_bf += factor
            * radius1.powf(n - 1.0)
            * radius3.powf(n - 1.0)
            * ary_fn(n, xi, inner_skull_radius, outer_skull_radius);
    }

    mu_bf / mu_bb
}

/// Potential on the unit sphere, weighting the radial and tangential
/// corrections by the dipole's own orientation. `radii` holds the
/// inner and outer skull radii; `sigma` is (brain/scalp, skull, scalp).
/// The dipole is updated in place: deep-shifted position, and in lead
/// field mode a direction scaled by the potential.
pub fn potential_3shell_ary(
    dipole: &mut Dipole,
    mode: EvalMode,
    electrode_pos: &Vector3<f64>,
    radii: &[f64],
    sigma: &[f64],
) -> f64 {
    // conductivity ratio skull vs brain/scalp, identical in this model
    let xi = sigma[1] / sigma[0];
    let inner_skull_radius = radii[0];
    let outer_skull_radius = radii[1];

    if mode == EvalMode::LeadField {
        dipole.set_direction_toward(*electrode_pos);
    }

    let mut radius3 = dipole.position.norm();
    if radius3 < SINGLE_EPSILON {
        dipole.position = electrode_pos * (SINGLE_EPSILON / electrode_pos.norm());
        radius3 = dipole.position.norm();
    }

    let radial_radius1 = r3_to_r1(false, radius3, xi, inner_skull_radius, outer_skull_radius);
    let tangential_radius1 = r3_to_r1(true, radius3, xi, inner_skull_radius, outer_skull_radius);

    let radial_moment1 = m3_to_m1(
        false,
        radial_radius1,
        radius3,
        xi,
        inner_skull_radius,
        outer_skull_radius,
    );
    let tangential_moment1 = m3_to_m1(
        true,
        tangential_radius1,
        radius3,
        xi,
        inner_skull_radius,
        outer_skull_radius,
    );

    // how radial the dipole is, relative to its own position
    let cos = {
        let n = dipole.position.norm() * dipole.direction.norm();
        if n == 0.0 {
            1.0
        } else {
            dipole.position.dot(&dipole.direction) / n
        }
    };
    let mut radial_w = cos * cos;
    // perfectly aligned electrode and position breaks the weighting;
    // an epsilon off is enough
    if relative_difference(radial_w.abs(), 1.0) < SINGLE_EPSILON {
        radial_w = 1.0 - DOUBLE_EPSILON;
    }
    let tangential_w = 1.0 - radial_w;

    let radius3_to_radius1 = if radius3 > 0.0 {
        (radial_w * radial_radius1 + tangential_w * tangential_radius1) / radius3
    } else {
        0.0
    };
    let moment3_to_moment1 = radial_w * radial_moment1 + tangential_w * tangential_moment1;

    // equivalent 1-shell dipole: deep-shifted position
    dipole.position *= radius3_to_radius1;

    let ui = if mode == EvalMode::LeadField {
        // new position, re-point toward the electrode before evaluating
        dipole.set_direction_toward(*electrode_pos);
        let ui = potential_1shell_vector(dipole, electrode_pos, sigma[0]) * moment3_to_moment1;
        dipole.direction *= ui;
        ui
    } else {
        potential_1shell_vector(dipole, electrode_pos, sigma[0]) * moment3_to_moment1
    };

    ui
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RADII: [f64; 2] = [0.87, 0.92];
    const SIGMA: [f64; 2] = [0.33, 0.0105];

    #[test]
    fn equivalent_radius_is_pulled_inward() {
        let r1 = r3_to_r1(false, 0.6, SIGMA[1] / SIGMA[0], RADII[0], RADII[1]);
        assert!(r1 > 0.0 && r1 < 0.6, "radial r1 = {r1}");
        let r1t = r3_to_r1(true, 0.6, SIGMA[1] / SIGMA[0], RADII[0], RADII[1]);
        assert!(r1t > 0.0 && r1t < 0.6, "tangential r1 = {r1t}");
    }

    #[test]
    fn low_radius_extrapolation_stays_proportional() {
        let xi = SIGMA[1] / SIGMA[0];
        let shallow = rho(false, 0.04, 0.04, xi, RADII[0], RADII[1]);
        let floor = rho(
            false,
            SHELL3TO1_LOWEST_RADIUS3,
            SHELL3TO1_LOWEST_RADIUS3,
            xi,
            RADII[0],
            RADII[1],
        );
        assert_relative_eq!(shallow, floor, epsilon = 1e-12);
    }

    #[test]
    fn symmetric_electrodes_see_the_same_potential() {
        let sigma = [0.33, 0.0105, 0.33];
        let radii = [0.87, 0.92, 1.0];
        let theta: f64 = 30f64.to_radians();
        let left = Vector3::new(-theta.sin(), 0.0, theta.cos());
        let right = Vector3::new(theta.sin(), 0.0, theta.cos());

        let eval = |electrode: &Vector3<f64>| {
            let mut dipole =
                Dipole::new(Vector3::new(0.0, 0.0, 0.5), Vector3::new(0.0, 0.0, 1.0));
            potential_3shell_ary(
                &mut dipole,
                EvalMode::Potentials,
                electrode,
                &radii[..2],
                &sigma,
            )
        };

        let ul = eval(&left);
        let ur = eval(&right);
        assert!(ul.is_finite());
        assert!((ul - ur).abs() < 1e-9, "asymmetry: {ul} vs {ur}");
    }

    #[test]
    fn skull_shield_attenuates_the_potential() {
        let electrode = Vector3::new(0.0, 0.0, 1.0);
        let mut dipole = Dipole::new(Vector3::new(0.0, 0.2, 0.4), Vector3::new(0.0, 0.0, 1.0));
        let shielded = potential_3shell_ary(
            &mut dipole,
            EvalMode::Potentials,
            &electrode,
            &RADII,
            &[0.33, 0.0105],
        );

        let bare_dipole = Dipole::new(Vector3::new(0.0, 0.2, 0.4), Vector3::new(0.0, 0.0, 1.0));
        let bare = potential_1shell_vector(&bare_dipole, &electrode, 0.33);

        assert!(shielded.is_finite());
        assert!(shielded.abs() < bare.abs());
    }

    #[test]
    fn centered_dipole_is_shifted_and_finite() {
        let electrode = Vector3::new(0.0, 0.0, 1.0);
        let mut dipole = Dipole::new(Vector3::zeros(), Vector3::zeros());
        let u = potential_3shell_ary(
            &mut dipole,
            EvalMode::LeadField,
            &electrode,
            &RADII,
            &[0.33, 0.0105],
        );
        assert!(u.is_finite());
    }
}
