//! Point sets and head geometry
//!
//! Labelled point sets, the ellipsoidal spherization model, the optimal
//! inverse center and the guillotine plane.

pub mod guillotine;
pub mod inverse_center;
pub mod points;
pub mod sphere_fit;

pub use guillotine::guillotine_plane;
pub use inverse_center::optimal_inverse_translation;
pub use points::PointSet;
pub use sphere_fit::SphereFitModel;
