//! Optimal inverse center.
//!
//! The lead field geometry wants every point cloud expressed relative
//! to a center that makes electrode and solution point radii as uniform
//! as possible with respect to the head surface.

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use crate::geometry::PointSet;

/// Least-squares sphere-fit center: the point minimizing the spread of
/// |p - c| over the set. Linear form 2p·c + k = |p|².
fn sphere_center(points: &PointSet) -> Option<Vector3<f64>> {
    if points.len() < 4 {
        return None;
    }
    let n = points.len();
    let mut a = DMatrix::<f64>::zeros(n, 4);
    let mut b = DVector::<f64>::zeros(n);
    for (i, p) in points.iter().enumerate() {
        a[(i, 0)] = 2.0 * p.x;
        a[(i, 1)] = 2.0 * p.y;
        a[(i, 2)] = 2.0 * p.z;
        a[(i, 3)] = 1.0;
        b[i] = p.norm_squared();
    }
    let sol = a.svd(true, true).solve(&b, 1e-12).ok()?;
    Some(Vector3::new(sol[0], sol[1], sol[2]))
}

/// Translation from the MRI origin to the inverse center. Adding the
/// returned vector to every point expresses it relative to the inverse
/// center; the center itself is origin − translation.
pub fn optimal_inverse_translation(
    surface: &PointSet,
    solution_points: &PointSet,
    electrodes: &PointSet,
) -> Vector3<f64> {
    let c_surface = sphere_center(surface).unwrap_or_else(|| surface.centroid());
    let c_sp = solution_points.centroid();
    let c_el = sphere_center(electrodes).unwrap_or_else(|| electrodes.centroid());

    // the scalp surface dominates; both clouds pull the center so that
    // neither ends up off-center relative to the sphere model
    let center = c_surface * 0.5 + c_sp * 0.25 + c_el * 0.25;

    debug!(
        surface = ?c_surface.as_slice(),
        solution_points = ?c_sp.as_slice(),
        electrodes = ?c_el.as_slice(),
        "inverse center estimated"
    );

    -center
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sphere_points(radius: f64, center: Vector3<f64>) -> PointSet {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 1..10 {
                let theta = i as f64 * std::f64::consts::TAU / 10.0;
                let phi = j as f64 * std::f64::consts::PI / 10.0;
                points.push(
                    center
                        + Vector3::new(
                            radius * phi.sin() * theta.cos(),
                            radius * phi.sin() * theta.sin(),
                            radius * phi.cos(),
                        ),
                );
            }
        }
        PointSet::new(points)
    }

    #[test]
    fn concentric_clouds_yield_their_common_center() {
        let center = Vector3::new(4.0, -2.0, 7.0);
        let surface = sphere_points(90.0, center);
        let electrodes = sphere_points(92.0, center);
        let sps = sphere_points(60.0, center);

        let translation = optimal_inverse_translation(&surface, &sps, &electrodes);
        assert_relative_eq!(translation.x, -4.0, epsilon = 1e-6);
        assert_relative_eq!(translation.y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(translation.z, -7.0, epsilon = 1e-6);
    }

    #[test]
    fn translation_centers_the_points() {
        let center = Vector3::new(10.0, 0.0, 0.0);
        let surface = sphere_points(90.0, center);
        let electrodes = sphere_points(92.0, center);
        let mut sps = sphere_points(60.0, center);

        let translation = optimal_inverse_translation(&surface, &sps, &electrodes);
        sps.translate(translation);
        assert!(sps.centroid().norm() < 1e-6);
    }
}
