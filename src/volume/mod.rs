//! Voxel volumes
//!
//! Dense 3-D float volumes with voxel size, anatomical origin and
//! background estimate; masking, thresholding, surface extraction.

pub mod morphology;
pub mod regions;
pub mod sampling;
pub mod skull_strip;

pub use morphology::{MorphOp, StructuringElement};
pub use sampling::Interpolator;
pub use skull_strip::{skull_strip, SkullStripMethod};

use nalgebra::Vector3;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{NeurofieldError, Result};
use crate::geometry::PointSet;

/// A dense voxel volume. Voxel values are f32: binary masks use {0, 1},
/// label volumes store integer codes, intensities are arbitrary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub data: Array3<f32>,
    /// Physical voxel size in mm per axis.
    pub voxel_size: Vector3<f64>,
    /// Voxel coordinates of the anatomical origin.
    pub origin: Vector3<f64>,
    /// Estimated background value; voxels at or below it are empty.
    pub background: f32,
    /// Axis orientation code, e.g. "RAS".
    pub orientation: String,
}

impl Volume {
    pub fn zeros(d1: usize, d2: usize, d3: usize) -> Self {
        Self {
            data: Array3::zeros((d1, d2, d3)),
            voxel_size: Vector3::repeat(1.0),
            origin: Vector3::zeros(),
            background: 0.0,
            orientation: "RAS".to_string(),
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn mean_voxel_size(&self) -> f64 {
        (self.voxel_size.x + self.voxel_size.y + self.voxel_size.z) / 3.0
    }

    /// Checked voxel read; out of bounds reads 0.
    pub fn get(&self, x: i64, y: i64, z: i64) -> f32 {
        let (d1, d2, d3) = self.dims();
        if x < 0 || y < 0 || z < 0 || x >= d1 as i64 || y >= d2 as i64 || z >= d3 as i64 {
            0.0
        } else {
            self.data[(x as usize, y as usize, z as usize)]
        }
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        self.data[(x, y, z)] = value;
    }

    /// Voxels above `threshold` become `bin_value`, the rest 0.
    pub fn binarize(&mut self, threshold: f32, bin_value: f32) {
        self.data.mapv_inplace(|v| if v > threshold { bin_value } else { 0.0 });
    }

    /// Voxels inside [min, max] become `bin_value`, the rest 0.
    pub fn threshold_binarize(&mut self, min: f32, max: f32, bin_value: f32) {
        self.data
            .mapv_inplace(|v| if v >= min && v <= max { bin_value } else { 0.0 });
    }

    /// Per-axial-slice above-background area, in voxels.
    pub fn slice_areas(&self) -> Vec<f64> {
        let (d1, d2, d3) = self.dims();
        let mut areas = vec![0.0; d3];
        for z in 0..d3 {
            let mut count = 0usize;
            for x in 0..d1 {
                for y in 0..d2 {
                    if self.data[(x, y, z)] > self.background {
                        count += 1;
                    }
                }
            }
            areas[z] = count as f64;
        }
        areas
    }

    /// Boundary voxels of the above-background region, returned as
    /// points relative to `center` (absolute voxel coordinates).
    pub fn surface_points(&self, center: Vector3<f64>) -> PointSet {
        let (d1, d2, d3) = self.dims();
        let mut points = Vec::new();
        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    if self.data[(x, y, z)] <= self.background {
                        continue;
                    }
                    let (xi, yi, zi) = (x as i64, y as i64, z as i64);
                    let boundary = self.get(xi - 1, yi, zi) <= self.background
                        || self.get(xi + 1, yi, zi) <= self.background
                        || self.get(xi, yi - 1, zi) <= self.background
                        || self.get(xi, yi + 1, zi) <= self.background
                        || self.get(xi, yi, zi - 1) <= self.background
                        || self.get(xi, yi, zi + 1) <= self.background;
                    if boundary {
                        points.push(Vector3::new(x as f64, y as f64, z as f64) - center);
                    }
                }
            }
        }
        PointSet::new(points)
    }

    pub fn read_bin(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let volume: Self = bincode::deserialize(&bytes)?;
        if volume.data.is_empty() {
            return Err(NeurofieldError::InvalidInput(format!(
                "empty volume: {}",
                path.display()
            )));
        }
        Ok(volume)
    }

    pub fn write_bin(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_zero_outside() {
        let v = Volume::zeros(4, 4, 4);
        assert_eq!(v.get(-1, 0, 0), 0.0);
        assert_eq!(v.get(0, 0, 4), 0.0);
    }

    #[test]
    fn binarize_splits_at_threshold() {
        let mut v = Volume::zeros(2, 2, 2);
        v.set(0, 0, 0, 5.0);
        v.set(1, 1, 1, 0.2);
        v.binarize(0.5, 1.0);
        assert_eq!(v.get(0, 0, 0), 1.0);
        assert_eq!(v.get(1, 1, 1), 0.0);
    }

    #[test]
    fn surface_points_of_a_box_are_its_shell() {
        let mut v = Volume::zeros(10, 10, 10);
        for x in 2..8 {
            for y in 2..8 {
                for z in 2..8 {
                    v.set(x, y, z, 1.0);
                }
            }
        }
        let surface = v.surface_points(Vector3::zeros());
        // 6³ box minus 4³ interior
        assert_eq!(surface.len(), 6 * 6 * 6 - 4 * 4 * 4);
    }
}
