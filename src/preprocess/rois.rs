//! Regions of interest.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NeurofieldError, Result};
use crate::preprocess::steps::RoiMethod;
use crate::preprocess::tracks::TrackSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    pub indices: Vec<usize>,
}

/// A named grouping of channel/solution-point indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rois {
    pub name: String,
    /// Number of channels the indices refer to.
    pub dimension: usize,
    pub rois: Vec<Roi>,
}

impl Rois {
    pub fn num_rois(&self) -> usize {
        self.rois.len()
    }

    pub fn roi_names(&self) -> Vec<String> {
        self.rois.iter().map(|r| r.name.clone()).collect()
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rois: Self = serde_json::from_str(&content)?;
        for roi in &rois.rois {
            if roi.indices.iter().any(|&i| i >= rois.dimension) {
                return Err(NeurofieldError::InvalidInput(format!(
                    "ROI {} indexes outside dimension {}",
                    roi.name, rois.dimension
                )));
            }
        }
        Ok(rois)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Reduce every frame over the ROIs; the output has one channel per
    /// ROI, named after it.
    pub fn average(&self, tracks: &TrackSet, method: RoiMethod) -> Result<TrackSet> {
        if tracks.num_channels() != self.dimension {
            return Err(NeurofieldError::DimensionMismatch {
                expected: self.dimension,
                got: tracks.num_channels(),
            });
        }

        let mut data = Array2::zeros((tracks.num_frames(), self.num_rois()));
        for t in 0..tracks.num_frames() {
            for (ri, roi) in self.rois.iter().enumerate() {
                if roi.indices.is_empty() {
                    continue;
                }
                data[(t, ri)] = match method {
                    RoiMethod::Mean => {
                        roi.indices.iter().map(|&i| tracks.data[(t, i)]).sum::<f64>()
                            / roi.indices.len() as f64
                    }
                    RoiMethod::Median => {
                        let mut values: Vec<f64> =
                            roi.indices.iter().map(|&i| tracks.data[(t, i)]).collect();
                        values.sort_by(|a, b| a.total_cmp(b));
                        values[values.len() / 2]
                    }
                };
            }
        }

        Ok(TrackSet {
            data,
            sampling_frequency: tracks.sampling_frequency,
            channel_names: Some(self.roi_names()),
            vectorial: false,
        })
    }
}
