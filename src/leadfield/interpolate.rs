//! Lead field interpolation and rejection.
//!
//! Projects a lead field computed on a regular grid of solution points
//! onto an arbitrary target grid, tri-linearly per electrode; flags
//! points without full 8-corner support; compacts rejected columns.

use nalgebra::Vector3;
use ndarray::Array3;
use tracing::{debug, info};

use crate::error::{NeurofieldError, Result};
use crate::geometry::PointSet;
use crate::leadfield::{LeadField, RejectedSet};

/// Linear interpolation from v1 (t=0) to v2 (t=1), each component
/// independently.
fn interpolate_two_vectors(v1: Vector3<f64>, v2: Vector3<f64>, t: f64) -> Vector3<f64> {
    v1 * (1.0 - t) + v2 * t
}

/// Tri-linear interpolation between 8 corners as a chain of two-vector
/// interpolations over the 3 axes.
#[allow(clippy::too_many_arguments)]
fn interpolate_eight_vectors(
    v000: Vector3<f64>,
    v001: Vector3<f64>,
    v010: Vector3<f64>,
    v011: Vector3<f64>,
    v100: Vector3<f64>,
    v101: Vector3<f64>,
    v110: Vector3<f64>,
    v111: Vector3<f64>,
    t: f64,
    u: f64,
    v: f64,
) -> Vector3<f64> {
    let v00 = interpolate_two_vectors(v000, v001, t);
    let v01 = interpolate_two_vectors(v010, v011, t);
    let v10 = interpolate_two_vectors(v100, v101, t);
    let v11 = interpolate_two_vectors(v110, v111, t);

    let v0 = interpolate_two_vectors(v00, v01, u);
    let v1 = interpolate_two_vectors(v10, v11, u);

    interpolate_two_vectors(v0, v1, v)
}

/// Replace K by its interpolation onto `output_grid`. `input_grid` must
/// be grid-aligned; its median spacing is the cell size. Output points
/// lacking any of their 8 corners are added to `rejected` and left at
/// zero.
pub fn interpolate_lead_field(
    k: &mut LeadField,
    input_grid: &PointSet,
    output_grid: &PointSet,
    rejected: &mut RejectedSet,
) -> Result<()> {
    let num_el = k.num_electrodes();
    let num_out = output_grid.len();

    if input_grid.len() != k.num_solution_points() {
        return Err(NeurofieldError::DimensionMismatch {
            expected: k.num_solution_points(),
            got: input_grid.len(),
        });
    }

    let step = input_grid.median_spacing();
    if step <= 0.0 {
        return Err(NeurofieldError::InvalidInput(
            "input grid has no usable spacing".into(),
        ));
    }

    info!(num_out, step, "interpolating lead field");

    let (lo, hi) = input_grid.bounding_box();
    // one extra step on each side so the truncation lands inside
    let to_vol = |p: &Vector3<f64>| (p - (lo - Vector3::repeat(step))) / step;

    let size = (
        ((hi.x - lo.x) / step) as usize + 3,
        ((hi.y - lo.y) / step) as usize + 3,
        ((hi.z - lo.z) / step) as usize + 3,
    );
    let mut spvol: Array3<i64> = Array3::zeros(size);

    for (i, p) in input_grid.iter().enumerate() {
        // points sit on a grid; absorb the transform rounding noise
        let q = to_vol(p) + Vector3::repeat(1e-3);
        spvol[(q.x as usize, q.y as usize, q.z as usize)] = i as i64 + 1;
    }

    let cell = |x: i64, y: i64, z: i64| -> i64 {
        if x < 0
            || y < 0
            || z < 0
            || x >= size.0 as i64
            || y >= size.1 as i64
            || z >= size.2 as i64
        {
            0
        } else {
            spvol[(x as usize, y as usize, z as usize)]
        }
    };

    let mut out = LeadField::zeros(num_el, num_out);

    for (oi, p) in output_grid.iter().enumerate() {
        if rejected.is_set(oi) {
            continue;
        }

        let q = to_vol(p) + Vector3::repeat(1e-3);
        let (qx, qy, qz) = (q.x.floor() as i64, q.y.floor() as i64, q.z.floor() as i64);
        let (fx, fy, fz) = (q.x.fract(), q.y.fract(), q.z.fract());

        // spot on a grid point: a straight copy, no 8 corners needed
        if fx + fy + fz <= 5e-3 {
            let index = cell(qx, qy, qz);
            if index == 0 {
                rejected.set(oi);
                continue;
            }
            let si = (index - 1) as usize;
            for ei in 0..num_el {
                out.matrix[(ei, 3 * oi)] = k.matrix[(ei, 3 * si)];
                out.matrix[(ei, 3 * oi + 1)] = k.matrix[(ei, 3 * si + 1)];
                out.matrix[(ei, 3 * oi + 2)] = k.matrix[(ei, 3 * si + 2)];
            }
            continue;
        }

        let corners = [
            cell(qx, qy, qz),
            cell(qx + 1, qy, qz),
            cell(qx, qy + 1, qz),
            cell(qx + 1, qy + 1, qz),
            cell(qx, qy, qz + 1),
            cell(qx + 1, qy, qz + 1),
            cell(qx, qy + 1, qz + 1),
            cell(qx + 1, qy + 1, qz + 1),
        ];

        if corners.iter().any(|&c| c == 0) {
            // not enough neighbours: clear the lead field there
            rejected.set(oi);
            continue;
        }

        let vec_at = |ei: usize, index: i64| {
            let si = (index - 1) as usize;
            Vector3::new(
                k.matrix[(ei, 3 * si)],
                k.matrix[(ei, 3 * si + 1)],
                k.matrix[(ei, 3 * si + 2)],
            )
        };

        for ei in 0..num_el {
            let r = interpolate_eight_vectors(
                vec_at(ei, corners[0]),
                vec_at(ei, corners[1]),
                vec_at(ei, corners[2]),
                vec_at(ei, corners[3]),
                vec_at(ei, corners[4]),
                vec_at(ei, corners[5]),
                vec_at(ei, corners[6]),
                vec_at(ei, corners[7]),
                fx,
                fy,
                fz,
            );
            out.matrix[(ei, 3 * oi)] = r.x;
            out.matrix[(ei, 3 * oi + 1)] = r.y;
            out.matrix[(ei, 3 * oi + 2)] = r.z;
        }
    }

    *k = out;
    Ok(())
}

/// Flag solution points whose column triplet is entirely zero, or
/// contains any non-finite element.
pub fn check_null_lead_field(k: &LeadField, rejected: &mut RejectedSet) {
    let num_el = k.num_electrodes();
    for sp in 0..k.num_solution_points() {
        let all_zero = (0..num_el).all(|ei| {
            k.matrix[(ei, 3 * sp)] == 0.0
                && k.matrix[(ei, 3 * sp + 1)] == 0.0
                && k.matrix[(ei, 3 * sp + 2)] == 0.0
        });
        if all_zero {
            rejected.set(sp);
            continue;
        }

        let any_bad = (0..num_el).any(|ei| {
            !k.matrix[(ei, 3 * sp)].is_finite()
                || !k.matrix[(ei, 3 * sp + 1)].is_finite()
                || !k.matrix[(ei, 3 * sp + 2)].is_finite()
        });
        if any_bad {
            rejected.set(sp);
        }
    }
}

/// Compact K by deleting the column triplets of rejected points,
/// preserving row order.
pub fn reject_points(k: &mut LeadField, rejected: &RejectedSet) {
    if !rejected.any() {
        return;
    }

    let num_el = k.num_electrodes();
    let num_src = k.num_solution_points();
    let num_dst = num_src - rejected.count();

    debug!(num_src, num_dst, "compacting lead field");

    let mut out = LeadField::zeros(num_el, num_dst);
    let mut dst = 0usize;
    for src in 0..num_src {
        if rejected.is_set(src) {
            continue;
        }
        for ei in 0..num_el {
            out.matrix[(ei, 3 * dst)] = k.matrix[(ei, 3 * src)];
            out.matrix[(ei, 3 * dst + 1)] = k.matrix[(ei, 3 * src + 1)];
            out.matrix[(ei, 3 * dst + 2)] = k.matrix[(ei, 3 * src + 2)];
        }
        dst += 1;
    }

    *k = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, step: f64) -> PointSet {
        let mut points = Vec::new();
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    points.push(Vector3::new(x as f64, y as f64, z as f64) * step);
                }
            }
        }
        PointSet::new(points)
    }

    fn filled_k(num_el: usize, num_sp: usize) -> LeadField {
        let mut k = LeadField::zeros(num_el, num_sp);
        for ei in 0..num_el {
            for j in 0..3 * num_sp {
                k.matrix[(ei, j)] = (ei * 31 + j * 7 + 1) as f64 * 0.01;
            }
        }
        k
    }

    #[test]
    fn identity_grid_returns_the_same_matrix() {
        let input = grid(3, 6.0);
        let output = input.clone();
        let mut k = filled_k(4, input.len());
        let original = k.clone();
        let mut rejected = RejectedSet::new(output.len());

        interpolate_lead_field(&mut k, &input, &output, &mut rejected).unwrap();

        assert_eq!(rejected.count(), 0);
        for (a, b) in k.matrix.iter().zip(original.matrix.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn midpoint_interpolates_and_boundary_rejects() {
        let input = grid(3, 6.0);
        let mut k = filled_k(2, input.len());
        // one point in the middle of a cell, one far outside
        let output = PointSet::new(vec![
            Vector3::new(3.0, 3.0, 3.0),
            Vector3::new(100.0, 100.0, 100.0),
        ]);
        let mut rejected = RejectedSet::new(output.len());

        interpolate_lead_field(&mut k, &input, &output, &mut rejected).unwrap();

        assert!(!rejected.is_set(0));
        assert!(rejected.is_set(1));
        assert!(k.matrix.column(0).iter().any(|&v| v != 0.0));
        assert!(k.matrix.column(3).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn null_and_nan_columns_are_flagged() {
        let mut k = filled_k(3, 4);
        // null out point 1, poison point 2
        for ei in 0..3 {
            for c in 0..3 {
                k.matrix[(ei, 3 + c)] = 0.0;
            }
        }
        k.matrix[(1, 7)] = f64::NAN;

        let mut rejected = RejectedSet::new(4);
        check_null_lead_field(&k, &mut rejected);

        assert!(rejected.is_set(1));
        assert!(rejected.is_set(2));
        assert!(!rejected.is_set(0));
        assert!(!rejected.is_set(3));
    }

    #[test]
    fn rejection_compacts_and_preserves_row_order() {
        let num_sp = 12;
        let mut k = filled_k(3, num_sp);
        let original = k.clone();

        let mut rejected = RejectedSet::new(num_sp);
        for sp in [2, 5, 9] {
            rejected.set(sp);
        }

        reject_points(&mut k, &rejected);

        assert_eq!(k.num_solution_points(), num_sp - 3);
        // first surviving block is sp 0, second sp 1, third sp 3
        for ei in 0..3 {
            for c in 0..3 {
                assert_eq!(k.matrix[(ei, 6 + c)], original.matrix[(ei, 9 + c)]);
            }
        }
    }
}
