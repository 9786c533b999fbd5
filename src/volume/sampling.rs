//! Continuous volume sampling and surface projection.

use nalgebra::Vector3;

use crate::volume::Volume;

/// Continuous sampling mode. Label volumes must use nearest neighbour;
/// intensities use the cubic Hermite spline, whose overshoot is clamped
/// to the local voxel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolator {
    Nearest,
    CubicHermite,
}

/// Catmull-Rom weights for the 4 taps at offsets -1..=2.
fn hermite_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

impl Volume {
    /// Continuous sample at sub-voxel coordinates (absolute voxel
    /// frame). Out-of-bounds taps read 0.
    pub fn sample(&self, x: f64, y: f64, z: f64, interpolator: Interpolator) -> f64 {
        match interpolator {
            Interpolator::Nearest => {
                self.get(x.round() as i64, y.round() as i64, z.round() as i64) as f64
            }
            Interpolator::CubicHermite => self.sample_hermite(x, y, z),
        }
    }

    fn sample_hermite(&self, x: f64, y: f64, z: f64) -> f64 {
        let (x0, y0, z0) = (x.floor(), y.floor(), z.floor());
        let wx = hermite_weights(x - x0);
        let wy = hermite_weights(y - y0);
        let wz = hermite_weights(z - z0);
        let (xi, yi, zi) = (x0 as i64, y0 as i64, z0 as i64);

        let mut acc = 0.0;
        for (k, wk) in wz.iter().enumerate() {
            for (j, wj) in wy.iter().enumerate() {
                let wjk = wj * wk;
                for (i, wi) in wx.iter().enumerate() {
                    acc += wi * wjk
                        * self.get(xi + i as i64 - 1, yi + j as i64 - 1, zi + k as i64 - 1) as f64;
                }
            }
        }

        // clamp overshoot to the enclosing voxel range
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    let v = self.get(xi + i, yi + j, zi + k) as f64;
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
        }
        acc.clamp(lo, hi)
    }

    /// Move `p` (relative to `center`, absolute voxel coordinates) onto
    /// the above-background surface along the ray center -> p. Returns
    /// the projected point, still center-relative.
    pub fn surface_project(
        &self,
        p: Vector3<f64>,
        center: Vector3<f64>,
        background: f32,
    ) -> Vector3<f64> {
        let n = p.norm();
        if n == 0.0 {
            return p;
        }
        let dir = p / n;

        let (d1, d2, d3) = self.dims();
        let t_max = (d1 * d1 + d2 * d2 + d3 * d3) as f64;
        let t_max = t_max.sqrt();

        // coarse inward walk from outside the volume
        let mut t = t_max;
        let mut found = None;
        while t >= 0.0 {
            let q = center + dir * t;
            if self.get(q.x.round() as i64, q.y.round() as i64, q.z.round() as i64) > background {
                found = Some(t);
                break;
            }
            t -= 0.5;
        }

        let Some(coarse) = found else { return p };

        // refine outward at sub-voxel resolution
        let mut t = coarse;
        loop {
            let next = t + 0.1;
            if next > t_max {
                break;
            }
            let q = center + dir * next;
            if self.get(q.x.round() as i64, q.y.round() as i64, q.z.round() as i64) <= background {
                break;
            }
            t = next;
        }

        dir * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hermite_interpolates_linearly_between_equal_gradients() {
        let mut v = Volume::zeros(8, 8, 8);
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    v.set(x, y, z, x as f32);
                }
            }
        }
        assert_relative_eq!(v.sample(3.5, 4.0, 4.0, Interpolator::CubicHermite), 3.5, epsilon = 1e-9);
        assert_relative_eq!(v.sample(3.0, 4.0, 4.0, Interpolator::CubicHermite), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn hermite_overshoot_is_clamped_on_labels() {
        let mut v = Volume::zeros(8, 8, 8);
        for x in 4..8 {
            for y in 0..8 {
                for z in 0..8 {
                    v.set(x, y, z, 9.0);
                }
            }
        }
        // near a hard label edge the spline would overshoot past 9
        let s = v.sample(4.2, 4.0, 4.0, Interpolator::CubicHermite);
        assert!(s <= 9.0 && s >= 0.0);
    }

    #[test]
    fn nearest_returns_exact_labels() {
        let mut v = Volume::zeros(4, 4, 4);
        v.set(1, 2, 3, 7.0);
        assert_eq!(v.sample(1.4, 1.6, 3.2, Interpolator::Nearest), 7.0);
    }

    #[test]
    fn surface_project_lands_on_ball_shell() {
        let mut v = Volume::zeros(40, 40, 40);
        let c = Vector3::new(20.0, 20.0, 20.0);
        for x in 0..40i32 {
            for y in 0..40i32 {
                for z in 0..40i32 {
                    let d = Vector3::new(x as f64, y as f64, z as f64) - c;
                    if d.norm() <= 12.0 {
                        v.set(x as usize, y as usize, z as usize, 1.0);
                    }
                }
            }
        }
        let p = v.surface_project(Vector3::new(5.0, 0.0, 0.0), c, 0.5);
        assert_relative_eq!(p.norm(), 12.0, epsilon = 0.6);
        assert!(p.x > 0.0);
    }
}
