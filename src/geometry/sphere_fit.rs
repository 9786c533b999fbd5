//! Ellipsoidal spherization model.
//!
//! Fits an axis-aligned ellipsoid to the smooth top part of the head
//! surface. The model carries points between the real head and the unit
//! sphere: the surface radius along any direction is the spherization
//! radius used by the lead field build.

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NeurofieldError, Result};
use crate::geometry::PointSet;

/// Fitted spherization model: ellipsoid center and semi-axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SphereFitModel {
    pub center: Vector3<f64>,
    pub semi_axes: Vector3<f64>,
}

impl SphereFitModel {
    /// Least-squares fit of ax² + by² + cz² + dx + ey + fz = 1 on the
    /// given surface points, then completion of the square.
    pub fn fit(points: &PointSet) -> Result<Self> {
        if points.len() < 6 {
            return Err(NeurofieldError::Geometry(format!(
                "spherization needs at least 6 surface points, got {}",
                points.len()
            )));
        }

        let n = points.len();
        let mut a = DMatrix::<f64>::zeros(n, 6);
        let b = DVector::<f64>::repeat(n, 1.0);

        for (i, p) in points.iter().enumerate() {
            a[(i, 0)] = p.x * p.x;
            a[(i, 1)] = p.y * p.y;
            a[(i, 2)] = p.z * p.z;
            a[(i, 3)] = p.x;
            a[(i, 4)] = p.y;
            a[(i, 5)] = p.z;
        }

        let svd = a.svd(true, true);
        let sol = svd
            .solve(&b, 1e-12)
            .map_err(|e| NeurofieldError::Geometry(format!("spherization solve failed: {e}")))?;

        let quad = Vector3::new(sol[0], sol[1], sol[2]);
        if quad.iter().any(|&q| q <= 0.0) {
            return Err(NeurofieldError::Geometry(
                "spherization did not converge to an ellipsoid".into(),
            ));
        }

        let center = Vector3::new(
            -sol[3] / (2.0 * quad.x),
            -sol[4] / (2.0 * quad.y),
            -sol[5] / (2.0 * quad.z),
        );
        // constant after recentering: 1 + a·cx² + b·cy² + c·cz²
        let s = 1.0 + quad.x * center.x * center.x
            + quad.y * center.y * center.y
            + quad.z * center.z * center.z;
        if s <= 0.0 {
            return Err(NeurofieldError::Geometry(
                "spherization did not converge to an ellipsoid".into(),
            ));
        }

        let semi_axes = Vector3::new(
            (s / quad.x).sqrt(),
            (s / quad.y).sqrt(),
            (s / quad.z).sqrt(),
        );

        debug!(
            center = ?center.as_slice(),
            semi_axes = ?semi_axes.as_slice(),
            "spherization model fitted"
        );

        Ok(Self { center, semi_axes })
    }

    /// Distance from the model center to the ellipsoid surface along
    /// `dir` (need not be normalized).
    pub fn surface_radius(&self, dir: Vector3<f64>) -> f64 {
        let n = dir.norm();
        if n == 0.0 {
            return self.semi_axes.min();
        }
        let u = dir / n;
        let q = (u.x / self.semi_axes.x).powi(2)
            + (u.y / self.semi_axes.y).powi(2)
            + (u.z / self.semi_axes.z).powi(2);
        1.0 / q.sqrt()
    }

    /// Carry `p` to the model surface along its own direction; the norm
    /// of the result is the spherization radius of `p`.
    pub fn to_model(&self, p: Vector3<f64>) -> Vector3<f64> {
        let rel = p - self.center;
        let n = rel.norm();
        if n == 0.0 {
            return Vector3::new(0.0, 0.0, self.semi_axes.min());
        }
        rel * (self.surface_radius(rel) / n)
    }

    /// Map a spherized direction back onto the real head surface,
    /// optionally translating into model (MRI) space.
    pub fn unspherize(&self, p: Vector3<f64>, translate: bool) -> Vector3<f64> {
        let n = p.norm();
        let surface = if n == 0.0 {
            Vector3::zeros()
        } else {
            (p / n) * self.surface_radius(p)
        };
        if translate {
            surface + self.center
        } else {
            surface
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ellipsoid_points(a: f64, b: f64, c: f64, center: Vector3<f64>) -> PointSet {
        let mut points = Vec::new();
        for i in 0..12 {
            for j in 1..12 {
                let theta = i as f64 * std::f64::consts::TAU / 12.0;
                let phi = j as f64 * std::f64::consts::PI / 12.0;
                points.push(
                    center
                        + Vector3::new(
                            a * phi.sin() * theta.cos(),
                            b * phi.sin() * theta.sin(),
                            c * phi.cos(),
                        ),
                );
            }
        }
        PointSet::new(points)
    }

    #[test]
    fn fit_recovers_sphere() {
        let set = ellipsoid_points(90.0, 90.0, 90.0, Vector3::zeros());
        let model = SphereFitModel::fit(&set).unwrap();
        assert_relative_eq!(model.semi_axes.x, 90.0, epsilon = 1e-6);
        assert_relative_eq!(model.semi_axes.z, 90.0, epsilon = 1e-6);
        assert!(model.center.norm() < 1e-6);
    }

    #[test]
    fn fit_recovers_shifted_ellipsoid() {
        let center = Vector3::new(3.0, -5.0, 10.0);
        let set = ellipsoid_points(80.0, 95.0, 70.0, center);
        let model = SphereFitModel::fit(&set).unwrap();
        assert_relative_eq!(model.semi_axes.x, 80.0, epsilon = 1e-6);
        assert_relative_eq!(model.semi_axes.y, 95.0, epsilon = 1e-6);
        assert_relative_eq!(model.semi_axes.z, 70.0, epsilon = 1e-6);
        assert_relative_eq!(model.center.x, center.x, epsilon = 1e-6);
    }

    #[test]
    fn surface_radius_matches_axes() {
        let set = ellipsoid_points(80.0, 95.0, 70.0, Vector3::zeros());
        let model = SphereFitModel::fit(&set).unwrap();
        assert_relative_eq!(
            model.surface_radius(Vector3::new(1.0, 0.0, 0.0)),
            80.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            model.surface_radius(Vector3::new(0.0, 0.0, 2.0)),
            70.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn to_model_norm_is_spherization_radius() {
        let set = ellipsoid_points(80.0, 95.0, 70.0, Vector3::zeros());
        let model = SphereFitModel::fit(&set).unwrap();
        let p = Vector3::new(0.0, 0.0, 35.0);
        assert_relative_eq!(model.to_model(p).norm(), 70.0, epsilon = 1e-6);
        // relative depth of the point is |p| / surface radius
        assert_relative_eq!(p.norm() / model.to_model(p).norm(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_fit_is_rejected() {
        // coplanar points cannot define an ellipsoid
        let set = PointSet::new(
            (0..20)
                .map(|i| Vector3::new(i as f64, (i * 7 % 13) as f64, 0.0))
                .collect(),
        );
        assert!(SphereFitModel::fit(&set).is_err());
    }
}
