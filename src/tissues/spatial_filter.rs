//! Spatial filtering over the electrode graph.
//!
//! Electrode-wise scalar maps (radius estimates, EEG maps) smoothed or
//! cleaned using each electrode's spatial neighbourhood.

use itertools::Itertools;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::PointSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpatialFilterKind {
    #[default]
    None,
    /// Replace only values inconsistent with their neighbourhood.
    Outlier,
    /// Distance-weighted mean over the interseptile value band.
    InterseptileWeightedMean,
}

/// Neighbour indices per electrode: everything within 1.5x the median
/// electrode spacing.
pub struct ElectrodeGraph {
    pub neighbours: Vec<Vec<usize>>,
    median_spacing: f64,
    positions: Vec<Vector3<f64>>,
}

impl ElectrodeGraph {
    pub fn build(electrodes: &PointSet) -> Self {
        let spacing = electrodes.median_spacing();
        let reach = 1.5 * spacing;
        let n = electrodes.len();
        let mut neighbours = vec![Vec::new(); n];
        for i in 0..n {
            for j in 0..n {
                if i != j && (electrodes.points[i] - electrodes.points[j]).norm() <= reach {
                    neighbours[i].push(j);
                }
            }
        }
        Self {
            neighbours,
            median_spacing: spacing,
            positions: electrodes.points.clone(),
        }
    }

    /// Filter one scalar map in place.
    pub fn filter(&self, kind: SpatialFilterKind, values: &mut [f64]) {
        match kind {
            SpatialFilterKind::None => {}
            SpatialFilterKind::Outlier => self.filter_outliers(values),
            SpatialFilterKind::InterseptileWeightedMean => self.filter_interseptile(values),
        }
    }

    fn filter_outliers(&self, values: &mut [f64]) {
        let original = values.to_vec();
        for (i, nb) in self.neighbours.iter().enumerate() {
            if nb.len() < 3 {
                continue;
            }
            let mut local: Vec<f64> = nb.iter().map(|&j| original[j]).collect();
            local.sort_by(|a, b| a.total_cmp(b));
            let median = local[local.len() / 2];
            let mut deviations: Vec<f64> = local.iter().map(|v| (v - median).abs()).collect();
            deviations.sort_by(|a, b| a.total_cmp(b));
            let mad = deviations[deviations.len() / 2].max(1e-12);
            if (original[i] - median).abs() > 3.0 * 1.4826 * mad {
                values[i] = median;
            }
        }
    }

    fn filter_interseptile(&self, values: &mut [f64]) {
        let original = values.to_vec();
        for (i, nb) in self.neighbours.iter().enumerate() {
            if nb.is_empty() {
                continue;
            }
            let local: Vec<(f64, f64)> = nb
                .iter()
                .map(|&j| {
                    let d = (self.positions[i] - self.positions[j]).norm();
                    (original[j], 1.0 / (d + 0.5 * self.median_spacing))
                })
                .chain(std::iter::once((
                    original[i],
                    1.0 / (0.5 * self.median_spacing),
                )))
                .sorted_by(|a, b| a.0.total_cmp(&b.0))
                .collect();

            // keep the [1/7, 6/7] quantile band
            let lo = local[local.len() / 7].0;
            let hi = local[local.len() * 6 / 7].0;

            let mut sum = 0.0;
            let mut sum_w = 0.0;
            for &(v, w) in &local {
                if v >= lo && v <= hi {
                    sum += v * w;
                    sum_w += w;
                }
            }
            if sum_w > 0.0 {
                values[i] = sum / sum_w;
            }
        }
    }
}

/// Filter several radius maps and return per-axis rescaling factors
/// that preserve the 3-D bounding box: filtering tends to pull points
/// inward, so each axis is rescaled by the global median of the
/// unfiltered/filtered extent ratio.
pub fn filter_radius_maps(
    graph: &ElectrodeGraph,
    kind: SpatialFilterKind,
    unit_directions: &[Vector3<f64>],
    maps: &mut [Vec<f64>],
) -> Vector3<f64> {
    if kind == SpatialFilterKind::None || maps.is_empty() {
        return Vector3::repeat(1.0);
    }

    let axis_max = |maps: &[Vec<f64>]| -> Vec<Vector3<f64>> {
        maps.iter()
            .map(|map| {
                let mut m: Vector3<f64> = Vector3::zeros();
                for (u, &r) in unit_directions.iter().zip(map.iter()) {
                    m.x = m.x.max(u.x * r);
                    m.y = m.y.max(u.y * r);
                    m.z = m.z.max(u.z * r);
                }
                m
            })
            .collect()
    };

    let old_maxes = axis_max(maps);

    for map in maps.iter_mut() {
        graph.filter(kind, map);
    }

    let new_maxes = axis_max(maps);

    let mut ratios: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for (old, new) in old_maxes.iter().zip(new_maxes.iter()) {
        for a in 0..3 {
            if new[a] > 0.0 {
                ratios[a].push(old[a] / new[a]);
            }
        }
    }

    let mut factor = Vector3::repeat(1.0);
    for a in 0..3 {
        if !ratios[a].is_empty() {
            ratios[a].sort_by(|x, y| x.total_cmp(y));
            factor[a] = ratios[a][ratios[a].len() / 2];
        }
    }
    factor
}

/// Modulate a radius by the per-axis factors: the scalar is taken into
/// 3-D along its electrode direction, rescaled, and brought back.
pub fn apply_axis_factors(radius: f64, unit_direction: Vector3<f64>, factor: Vector3<f64>) -> f64 {
    Vector3::new(
        unit_direction.x * radius * factor.x,
        unit_direction.y * radius * factor.y,
        unit_direction.z * radius * factor.z,
    )
    .norm()
}
