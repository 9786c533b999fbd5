//! Grey-level morphology over a spherical structuring element.
//!
//! Erosion and dilation are neighbourhood min/max, which on {0,1} masks
//! reduce to the usual binary operators. Border policy: dilation never
//! grows past the border, erosion never eats the border in.

use crate::error::{NeurofieldError, Result};
use crate::volume::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphOp {
    Erode,
    Dilate,
    Open,
    Close,
    Min,
    Max,
    Median,
    FastGaussian,
    Relax,
}

/// Voxel offsets of a ball of the given diameter. A diameter of at
/// least 1 always includes the 6-neighbourhood.
#[derive(Debug, Clone)]
pub struct StructuringElement {
    pub offsets: Vec<(i64, i64, i64)>,
}

impl StructuringElement {
    pub fn ball(diameter: f64) -> Result<Self> {
        if diameter <= 0.0 {
            return Err(NeurofieldError::InvalidInput(
                "structuring element diameter must be positive".into(),
            ));
        }
        let radius = diameter / 2.0;
        let r = radius.ceil() as i64;
        let r2 = radius * radius + 1e-6;
        let mut offsets = Vec::new();
        for dx in -r..=r {
            for dy in -r..=r {
                for dz in -r..=r {
                    let d2 = (dx * dx + dy * dy + dz * dz) as f64;
                    if d2 <= r2 || (diameter >= 1.0 && d2 <= 1.0) {
                        offsets.push((dx, dy, dz));
                    }
                }
            }
        }
        Ok(Self { offsets })
    }
}

enum Border {
    Zero,
    Center,
}

impl Volume {
    pub fn morphology(&mut self, op: MorphOp, diameter: f64, iterations: usize) -> Result<()> {
        let kernel = StructuringElement::ball(diameter)?;
        match op {
            MorphOp::Erode | MorphOp::Min => self.reduce_pass(&kernel, f32::min, Border::Center),
            MorphOp::Dilate | MorphOp::Max => self.reduce_pass(&kernel, f32::max, Border::Zero),
            MorphOp::Open => {
                self.reduce_pass(&kernel, f32::min, Border::Center);
                self.reduce_pass(&kernel, f32::max, Border::Zero);
            }
            MorphOp::Close => {
                self.reduce_pass(&kernel, f32::max, Border::Zero);
                self.reduce_pass(&kernel, f32::min, Border::Center);
            }
            MorphOp::Median => self.median_pass(&kernel),
            MorphOp::FastGaussian => self.fast_gaussian(diameter),
            MorphOp::Relax => {
                for _ in 0..iterations.max(1) {
                    self.mean_pass(&kernel);
                }
            }
        }
        Ok(())
    }

    fn reduce_pass(
        &mut self,
        kernel: &StructuringElement,
        reduce: fn(f32, f32) -> f32,
        border: Border,
    ) {
        let (d1, d2, d3) = self.dims();
        let mut out = self.data.clone();
        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    let center = self.data[(x, y, z)];
                    let mut acc = center;
                    for &(dx, dy, dz) in &kernel.offsets {
                        let (nx, ny, nz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
                        let inside = nx >= 0
                            && ny >= 0
                            && nz >= 0
                            && nx < d1 as i64
                            && ny < d2 as i64
                            && nz < d3 as i64;
                        let v = if inside {
                            self.data[(nx as usize, ny as usize, nz as usize)]
                        } else {
                            match border {
                                Border::Zero => 0.0,
                                Border::Center => center,
                            }
                        };
                        acc = reduce(acc, v);
                    }
                    out[(x, y, z)] = acc;
                }
            }
        }
        self.data = out;
    }

    fn median_pass(&mut self, kernel: &StructuringElement) {
        let (d1, d2, d3) = self.dims();
        let mut out = self.data.clone();
        let mut values = Vec::with_capacity(kernel.offsets.len());
        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    values.clear();
                    for &(dx, dy, dz) in &kernel.offsets {
                        values.push(self.get(x as i64 + dx, y as i64 + dy, z as i64 + dz));
                    }
                    values.sort_by(|a, b| a.total_cmp(b));
                    out[(x, y, z)] = values[values.len() / 2];
                }
            }
        }
        self.data = out;
    }

    fn mean_pass(&mut self, kernel: &StructuringElement) {
        let (d1, d2, d3) = self.dims();
        let mut out = self.data.clone();
        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    let mut acc = 0.0f64;
                    for &(dx, dy, dz) in &kernel.offsets {
                        acc += self.get(x as i64 + dx, y as i64 + dy, z as i64 + dz) as f64;
                    }
                    out[(x, y, z)] = (acc / kernel.offsets.len() as f64) as f32;
                }
            }
        }
        self.data = out;
    }

    /// Three successive axis-aligned box blurs approximate a Gaussian of
    /// the requested diameter.
    fn fast_gaussian(&mut self, diameter: f64) {
        let radius = ((diameter / 2.0) / 3f64.sqrt()).round().max(1.0) as i64;
        for _ in 0..3 {
            self.box_blur_axis(0, radius);
            self.box_blur_axis(1, radius);
            self.box_blur_axis(2, radius);
        }
    }

    fn box_blur_axis(&mut self, axis: usize, radius: i64) {
        let (d1, d2, d3) = self.dims();
        let mut out = self.data.clone();
        let dims = [d1 as i64, d2 as i64, d3 as i64];
        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    let idx = [x as i64, y as i64, z as i64];
                    let mut acc = 0.0f64;
                    let mut count = 0u32;
                    for o in -radius..=radius {
                        let mut n = idx;
                        n[axis] += o;
                        if n[axis] >= 0 && n[axis] < dims[axis] {
                            acc += self.data[(n[0] as usize, n[1] as usize, n[2] as usize)] as f64;
                            count += 1;
                        }
                    }
                    out[(x, y, z)] = (acc / count as f64) as f32;
                }
            }
        }
        self.data = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(side: usize, fill: usize) -> Volume {
        let mut v = Volume::zeros(side, side, side);
        let lo = (side - fill) / 2;
        for x in lo..lo + fill {
            for y in lo..lo + fill {
                for z in lo..lo + fill {
                    v.set(x, y, z, 1.0);
                }
            }
        }
        v
    }

    fn count(v: &Volume) -> usize {
        v.data.iter().filter(|&&x| x > 0.5).count()
    }

    #[test]
    fn erode_shrinks_dilate_grows() {
        let v0 = cube(16, 6);
        let mut eroded = v0.clone();
        eroded.morphology(MorphOp::Erode, 3.0, 1).unwrap();
        let mut dilated = v0.clone();
        dilated.morphology(MorphOp::Dilate, 3.0, 1).unwrap();
        assert!(count(&eroded) < count(&v0));
        assert!(count(&dilated) > count(&v0));
    }

    #[test]
    fn close_fills_a_hole() {
        let mut v = cube(16, 8);
        v.set(8, 8, 8, 0.0);
        v.morphology(MorphOp::Close, 3.0, 1).unwrap();
        assert_eq!(v.get(8, 8, 8), 1.0);
    }

    #[test]
    fn zero_diameter_is_invalid() {
        let mut v = cube(8, 4);
        assert!(v.morphology(MorphOp::Erode, 0.0, 1).is_err());
    }

    #[test]
    fn relax_keeps_mass_inside() {
        let mut v = cube(16, 8);
        let before = count(&v);
        v.morphology(MorphOp::Relax, 3.0, 2).unwrap();
        // smoothing spreads values but the bulk stays above half level
        assert!(count(&v) > before / 2);
        assert!(v.data.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }
}
