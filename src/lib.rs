//! EEG Electrical Source Imaging support.
//!
//! Builds L-SMAC lead field matrices from head anatomy, electrode
//! positions and solution points; estimates per-electrode tissue radii
//! from T1 volumes or labelled tissue segmentations; preprocesses EEG
//! into source-space time series through a source operator.

pub mod error;
pub mod config;
pub mod geometry;
pub mod volume;
pub mod tissues;
pub mod forward;
pub mod leadfield;
pub mod markers;
pub mod preprocess;
pub mod esi;

pub use config::{LeadFieldOptions, PreprocessOptions};
pub use error::{NeurofieldError, Result};
pub use forward::ForwardPreset;
pub use geometry::{PointSet, SphereFitModel};
pub use leadfield::{LeadField, RejectedSet};
pub use tissues::{TissueClass, TissueLimit, TissueRadii};
pub use volume::Volume;
