//! Ordered point sets with optional parallel names.

use nalgebra::{Matrix4, Vector3, Vector4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NeurofieldError, Result};

/// An ordered sequence of 3-D points, optionally labelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<Vector3<f64>>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

impl PointSet {
    pub fn new(points: Vec<Vector3<f64>>) -> Self {
        Self { points, names: None }
    }

    pub fn with_names(points: Vec<Vector3<f64>>, names: Vec<String>) -> Self {
        Self { points, names: Some(names) }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vector3<f64>> {
        self.points.iter()
    }

    /// Translate every point by `delta`.
    pub fn translate(&mut self, delta: Vector3<f64>) {
        for p in &mut self.points {
            *p += delta;
        }
    }

    /// Normalize every point to the unit sphere; null points are kept.
    pub fn normalize(&mut self) {
        for p in &mut self.points {
            let n = p.norm();
            if n > 0.0 {
                *p /= n;
            }
        }
    }

    pub fn centroid(&self) -> Vector3<f64> {
        if self.points.is_empty() {
            return Vector3::zeros();
        }
        self.points.iter().sum::<Vector3<f64>>() / self.points.len() as f64
    }

    pub fn bounding_box(&self) -> (Vector3<f64>, Vector3<f64>) {
        let mut lo = Vector3::repeat(f64::INFINITY);
        let mut hi = Vector3::repeat(f64::NEG_INFINITY);
        for p in &self.points {
            for a in 0..3 {
                lo[a] = lo[a].min(p[a]);
                hi[a] = hi[a].max(p[a]);
            }
        }
        (lo, hi)
    }

    /// Median nearest-neighbour distance, the natural step of a regular
    /// grid of points.
    pub fn median_spacing(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        let mut nearest: Vec<f64> = self
            .points
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                self.points
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, q)| (p - q).norm_squared())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        nearest.sort_by(|a, b| a.total_cmp(b));
        nearest[nearest.len() / 2].sqrt()
    }

    /// Keep points above the inverse center and above the guillotine
    /// plane, i.e. the smooth top part of the head surface.
    pub fn keep_top_head_points(&mut self, to_guillotine: &Matrix4<f64>) {
        let keep = |p: &Vector3<f64>| {
            let h = to_guillotine * Vector4::new(p.x, p.y, p.z, 1.0);
            p.z >= 0.0 && h.z >= 0.0
        };
        if let Some(names) = &mut self.names {
            let mut it = self.points.iter();
            names.retain(|_| keep(it.next().unwrap()));
        }
        self.points.retain(keep);
    }

    /// Uniform decimation down to at most `target` points.
    pub fn downsample(&mut self, target: usize) {
        if target == 0 || self.points.len() <= target {
            return;
        }
        let step = self.points.len() as f64 / target as f64;
        let picked: Vec<usize> = (0..target).map(|i| (i as f64 * step) as usize).collect();
        self.points = picked.iter().map(|&i| self.points[i]).collect();
        if let Some(names) = &mut self.names {
            *names = picked.iter().map(|&i| names[i].clone()).collect();
        }
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set: Self = serde_json::from_str(&content)?;
        if let Some(names) = &set.names {
            if names.len() != set.points.len() {
                return Err(NeurofieldError::InvalidInput(format!(
                    "point set {}: {} names for {} points",
                    path.display(),
                    names.len(),
                    set.points.len()
                )));
            }
        }
        Ok(set)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// A named cluster of points; several clusters form a multi-cluster
/// point file (one per tissue surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCluster {
    pub name: String,
    pub points: PointSet,
}

pub fn write_clusters(path: &Path, clusters: &[PointCluster]) -> Result<()> {
    std::fs::write(path, serde_json::to_string(clusters)?)?;
    Ok(())
}
