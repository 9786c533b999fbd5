//! Track container.
//!
//! A (numTimeFrames × numChannels) block of f64 with its sampling
//! frequency. Vectorial data stores three consecutive channels per
//! solution point.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NeurofieldError, Result};
use crate::markers::MarkerList;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSet {
    /// Rows are time frames, columns are channels.
    pub data: Array2<f64>,
    /// 0 when the timeline has been disrupted.
    pub sampling_frequency: f64,
    #[serde(default)]
    pub channel_names: Option<Vec<String>>,
    /// Three consecutive channels per solution point.
    #[serde(default)]
    pub vectorial: bool,
}

impl TrackSet {
    pub fn new(data: Array2<f64>, sampling_frequency: f64) -> Self {
        Self {
            data,
            sampling_frequency,
            channel_names: None,
            vectorial: false,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    /// Global field power per frame: the spatial standard deviation,
    /// computed against the average reference unless the data is
    /// all-positive by construction.
    pub fn gfp(&self, positive: bool) -> Vec<f64> {
        let n = self.num_channels() as f64;
        self.data
            .axis_iter(Axis(0))
            .map(|row| {
                let mean = if positive { 0.0 } else { row.sum() / n };
                (row.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
            })
            .collect()
    }

    /// Uniform decimation of the frames down to at most `target`.
    pub fn downsample(&self, target: usize) -> TrackSet {
        let frames = self.num_frames();
        if target == 0 || frames <= target {
            return self.clone();
        }
        let step = frames as f64 / target as f64;
        let rows: Vec<usize> = (0..target).map(|i| (i as f64 * step) as usize).collect();
        let mut data = Array2::zeros((rows.len(), self.num_channels()));
        for (out, &src) in rows.iter().enumerate() {
            data.row_mut(out).assign(&self.data.row(src));
        }
        TrackSet {
            data,
            sampling_frequency: 0.0,
            channel_names: self.channel_names.clone(),
            vectorial: self.vectorial,
        }
    }

    /// Stack another set below this one; channel counts must agree.
    pub fn concatenate(&mut self, other: &TrackSet) -> Result<()> {
        if self.num_channels() != other.num_channels() {
            return Err(NeurofieldError::DimensionMismatch {
                expected: self.num_channels(),
                got: other.num_channels(),
            });
        }
        self.data.append(Axis(0), other.data.view())?;
        Ok(())
    }

    pub fn read_bin(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn write_bin(&self, path: &Path) -> Result<()> {
        std::fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }

    /// Write only the frames covered by `epochs`, concatenated in
    /// order.
    pub fn write_epochs(&self, path: &Path, epochs: &MarkerList) -> Result<()> {
        let mut rows: Vec<usize> = Vec::new();
        for m in epochs.iter() {
            for t in m.from..=m.to {
                if t >= 0 && (t as usize) < self.num_frames() {
                    rows.push(t as usize);
                }
            }
        }
        let mut data = Array2::zeros((rows.len(), self.num_channels()));
        for (out, &src) in rows.iter().enumerate() {
            data.row_mut(out).assign(&self.data.row(src));
        }
        TrackSet {
            data,
            sampling_frequency: self.sampling_frequency,
            channel_names: self.channel_names.clone(),
            vectorial: self.vectorial,
        }
        .write_bin(path)
    }
}

impl From<ndarray::ShapeError> for NeurofieldError {
    fn from(e: ndarray::ShapeError) -> Self {
        NeurofieldError::InvalidInput(format!("shape error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{Marker, MarkerKind};
    use approx::assert_relative_eq;

    #[test]
    fn gfp_of_a_flat_map_is_zero() {
        let data = Array2::from_elem((3, 8), 2.5);
        let t = TrackSet::new(data, 250.0);
        for g in t.gfp(false) {
            assert_relative_eq!(g, 0.0, epsilon = 1e-12);
        }
        // positive convention skips the centering
        for g in t.gfp(true) {
            assert_relative_eq!(g, 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn downsample_caps_the_frame_count() {
        let data = Array2::from_shape_fn((1000, 2), |(t, _)| t as f64);
        let t = TrackSet::new(data, 250.0);
        let d = t.downsample(100);
        assert_eq!(d.num_frames(), 100);
        assert_eq!(d.sampling_frequency, 0.0);
        assert_eq!(d.data[(0, 0)], 0.0);
    }

    #[test]
    fn epochs_write_only_covered_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let data = Array2::from_shape_fn((10, 2), |(t, _)| t as f64);
        let t = TrackSet::new(data, 250.0);

        let mut epochs = MarkerList::new();
        epochs.append(Marker::new(2, 4, 0, "a", MarkerKind::Temp));
        epochs.append(Marker::new(8, 9, 0, "b", MarkerKind::Temp));

        t.write_epochs(&path, &epochs).unwrap();
        let back = TrackSet::read_bin(&path).unwrap();
        assert_eq!(back.num_frames(), 5);
        assert_eq!(back.data[(0, 0)], 2.0);
        assert_eq!(back.data[(4, 0)], 9.0);
    }
}
