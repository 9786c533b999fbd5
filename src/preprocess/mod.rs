//! EEG preprocessing
//!
//! The per-file pipeline turning recorded EEG into (optionally
//! source-space) time series: spatial filtering, source transform,
//! normalization and standardization, ranking, thresholding, envelopes,
//! ROI averaging and epoch selection.

pub mod operator;
pub mod pipeline;
pub mod rois;
pub mod steps;
pub mod tracks;
pub mod zscore;

pub use operator::{RegularizationChoice, SourceOperator};
pub use pipeline::{preprocess_files, PreprocessOutcome};
pub use rois::Rois;
pub use steps::{EnvelopeKind, RoiMethod};
pub use tracks::TrackSet;
pub use zscore::{ZScoreFactors, ZScoreKind};
