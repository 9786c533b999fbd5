//! Tissue model
//!
//! Tissue classes with conductivities, per-electrode tissue radii, and
//! their estimation from T1 volumes or labelled tissue segmentations.

pub mod conductivity;
pub mod labels;
pub mod radii;
pub mod spatial_filter;
pub mod t1;

pub use conductivity::{age_to_skull_conductivity, split_skull_conductivity, TissueClass};
pub use labels::estimate_tissues_radii_segmentation;
pub use radii::{age_to_skull_thickness, TissueLimit, TissueRadii};
pub use spatial_filter::SpatialFilterKind;
pub use t1::estimate_tissues_radii_t1;
