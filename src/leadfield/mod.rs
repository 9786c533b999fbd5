//! Lead field construction
//!
//! The lead field matrix K maps unit dipoles at solution points to
//! electrode potentials: (numElectrodes × 3·numSolutionPoints), column
//! triplets holding the x/y/z dipole components per solution point.

pub mod build;
pub mod interpolate;
pub mod surfaces;

pub use build::{compute_lead_field, LeadFieldPreset};
pub use interpolate::{check_null_lead_field, interpolate_lead_field, reject_points};
pub use surfaces::write_tissue_surfaces;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Solution points excluded from the lead field: insufficient geometric
/// support during interpolation, or a null/non-finite column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectedSet {
    bits: Vec<bool>,
}

impl RejectedSet {
    pub fn new(len: usize) -> Self {
        Self { bits: vec![false; len] }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set(&mut self, index: usize) {
        self.bits[index] = true;
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits[index]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b)
    }
}

/// Dense lead field matrix, row-major over electrodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadField {
    pub matrix: DMatrix<f64>,
}

impl LeadField {
    pub fn zeros(num_electrodes: usize, num_solution_points: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(num_electrodes, 3 * num_solution_points),
        }
    }

    pub fn num_electrodes(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn num_solution_points(&self) -> usize {
        self.matrix.ncols() / 3
    }

    /// Center every column on its mean over electrodes, i.e. express
    /// the lead field in the average reference.
    pub fn average_reference(&mut self) {
        let n = self.matrix.nrows() as f64;
        for mut col in self.matrix.column_iter_mut() {
            let mean = col.iter().sum::<f64>() / n;
            for v in col.iter_mut() {
                *v -= mean;
            }
        }
    }

    pub fn read_bin(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn write_bin(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }
}
