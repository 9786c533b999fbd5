//! Markers and time cursors
//!
//! Sorted marker lists with the interval algebra the preprocessing
//! driver runs on, and the shared time cursor abstraction.

pub mod cursor;
pub mod marker;

pub use cursor::TimeCursor;
pub use marker::{
    bad_epochs_to_markers, epochs_to_markers, max_track_to_markers, BadEpochsSpec, EpochsSpec,
    GfpPeaksSpec, Marker, MarkerKind, MarkerList,
};
