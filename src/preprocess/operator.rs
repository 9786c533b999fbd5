//! Source operator application.
//!
//! The inverse solution is computed elsewhere; the pipeline consumes it
//! as a bank of matrices, one per regularization, each mapping an
//! electrode map to 3·numSolutionPoints source components.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{NeurofieldError, Result};
use crate::preprocess::tracks::TrackSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationChoice {
    #[default]
    None,
    /// Index into the operator's regularization bank.
    Fixed(usize),
    /// One choice for the whole subject, made on the sub-sampled
    /// concatenation.
    AutoGlobal,
    /// Chosen again for every file.
    AutoLocal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOperator {
    pub name: String,
    /// One (3·numSP × numElectrodes) matrix per regularization, weakest
    /// first.
    pub matrices: Vec<DMatrix<f64>>,
    pub regularization_labels: Vec<String>,
}

impl SourceOperator {
    pub fn num_electrodes(&self) -> usize {
        self.matrices.first().map_or(0, |m| m.ncols())
    }

    pub fn num_solution_points(&self) -> usize {
        self.matrices.first().map_or(0, |m| m.nrows() / 3)
    }

    pub fn num_regularizations(&self) -> usize {
        self.matrices.len()
    }

    pub fn read_bin(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let op: Self = bincode::deserialize(&bytes)?;
        if op.matrices.is_empty() {
            return Err(NeurofieldError::InvalidInput(format!(
                "source operator {} has no matrices",
                path.display()
            )));
        }
        Ok(op)
    }

    pub fn write_bin(&self, path: &Path) -> Result<()> {
        std::fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }

    /// Transform every map of `eeg`. Vectorial output keeps the three
    /// source components per point; scalar output stores their norm.
    pub fn apply(&self, eeg: &TrackSet, regularization: usize, vectorial: bool) -> Result<TrackSet> {
        let matrix = self.matrices.get(regularization).ok_or_else(|| {
            NeurofieldError::InvalidInput(format!(
                "regularization {regularization} out of range ({} available)",
                self.matrices.len()
            ))
        })?;
        if eeg.num_channels() != matrix.ncols() {
            return Err(NeurofieldError::DimensionMismatch {
                expected: matrix.ncols(),
                got: eeg.num_channels(),
            });
        }

        let num_sp = self.num_solution_points();
        let out_channels = if vectorial { 3 * num_sp } else { num_sp };
        let mut data = ndarray::Array2::zeros((eeg.num_frames(), out_channels));

        for (t, row) in eeg.data.outer_iter().enumerate() {
            let m = DVector::from_iterator(row.len(), row.iter().copied());
            let s = matrix * m;
            if vectorial {
                for c in 0..3 * num_sp {
                    data[(t, c)] = s[c];
                }
            } else {
                for sp in 0..num_sp {
                    data[(t, sp)] =
                        (s[3 * sp].powi(2) + s[3 * sp + 1].powi(2) + s[3 * sp + 2].powi(2)).sqrt();
                }
            }
        }

        Ok(TrackSet {
            data,
            sampling_frequency: eeg.sampling_frequency,
            channel_names: None,
            vectorial,
        })
    }

    /// Elbow of a decreasing norm curve: the point farthest from the
    /// chord between its two endpoints, in log scale.
    fn elbow(norms: &[f64]) -> usize {
        let n = norms.len();
        let logs: Vec<f64> = norms.iter().map(|v| v.max(1e-300).ln()).collect();
        let (x0, y0) = (0.0, logs[0]);
        let (x1, y1) = ((n - 1) as f64, logs[n - 1]);
        let chord = ((x1 - x0), (y1 - y0));
        let chord_len = (chord.0 * chord.0 + chord.1 * chord.1).sqrt().max(1e-30);

        let mut best = 0usize;
        let mut best_dist = f64::NEG_INFINITY;
        for (i, &y) in logs.iter().enumerate() {
            let x = i as f64;
            let dist = ((x - x0) * chord.1 - (y - y0) * chord.0).abs() / chord_len;
            if dist > best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }

    /// Pick one regularization on background data: the elbow of the
    /// mean solution norm across the bank (the norms decrease as the
    /// regularization strengthens; the elbow balances detail against
    /// noise amplification).
    pub fn auto_regularization(&self, sample: &TrackSet) -> usize {
        if self.matrices.len() < 3 {
            return 0;
        }

        let norms: Vec<f64> = (0..self.matrices.len())
            .map(|reg| match self.apply(sample, reg, false) {
                Ok(s) => (s.data.iter().map(|v| v * v).sum::<f64>() / s.data.len() as f64).sqrt(),
                Err(_) => 0.0,
            })
            .collect();

        let best = Self::elbow(&norms);
        debug!(chosen = best, "auto regularization");
        best
    }

    /// Transform with a per-map regularization choice: every map gets
    /// the elbow of its own solution norms across the bank.
    pub fn apply_auto_local(&self, eeg: &TrackSet, vectorial: bool) -> Result<TrackSet> {
        if self.matrices.len() < 3 {
            return self.apply(eeg, 0, vectorial);
        }

        let num_sp = self.num_solution_points();
        let out_channels = if vectorial { 3 * num_sp } else { num_sp };
        let mut data = ndarray::Array2::zeros((eeg.num_frames(), out_channels));

        for (t, row) in eeg.data.outer_iter().enumerate() {
            if row.len() != self.num_electrodes() {
                return Err(NeurofieldError::DimensionMismatch {
                    expected: self.num_electrodes(),
                    got: row.len(),
                });
            }
            let m = DVector::from_iterator(row.len(), row.iter().copied());

            let solutions: Vec<DVector<f64>> =
                self.matrices.iter().map(|matrix| matrix * &m).collect();
            let norms: Vec<f64> = solutions
                .iter()
                .map(|s| (s.iter().map(|v| v * v).sum::<f64>() / s.len() as f64).sqrt())
                .collect();
            let s = &solutions[Self::elbow(&norms)];

            if vectorial {
                for c in 0..3 * num_sp {
                    data[(t, c)] = s[c];
                }
            } else {
                for sp in 0..num_sp {
                    data[(t, sp)] =
                        (s[3 * sp].powi(2) + s[3 * sp + 1].powi(2) + s[3 * sp + 2].powi(2)).sqrt();
                }
            }
        }

        Ok(TrackSet {
            data,
            sampling_frequency: eeg.sampling_frequency,
            channel_names: None,
            vectorial,
        })
    }
}
