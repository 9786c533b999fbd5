//! Guillotine plane.
//!
//! An axial cutting plane below the brain that excludes the neck from a
//! head MRI. Found on the slice-area profile: the narrowest slice (the
//! neck waist) below the widest slice of the head.

use nalgebra::{Matrix4, Vector3};
use tracing::debug;

use crate::error::{NeurofieldError, Result};
use crate::volume::Volume;

/// Transform from origin-relative coordinates to the plane frame; a
/// point is above the plane when its transformed z is >= 0.
pub fn guillotine_plane(volume: &Volume) -> Result<Matrix4<f64>> {
    let (_, _, dim_z) = volume.dims();
    if dim_z == 0 {
        return Err(NeurofieldError::Geometry("empty volume".into()));
    }

    let areas = volume.slice_areas();

    let z_widest = areas
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(z, _)| z)
        .unwrap_or(0);

    let z_bottom = areas.iter().position(|&a| a > 0.0).unwrap_or(0);

    // waist: smallest non-empty slice strictly below the widest one
    let waist = areas[z_bottom..z_widest]
        .iter()
        .enumerate()
        .filter(|(_, &a)| a > 0.0)
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(z, _)| z + z_bottom);

    let z_waist = match waist {
        Some(z) if areas[z] < 0.9 * areas[z_widest] => z,
        _ => {
            return Err(NeurofieldError::Geometry(
                "guillotine plane not found: no neck constriction below the widest slice".into(),
            ))
        }
    };

    let z_rel = z_waist as f64 - volume.origin.z;

    debug!(z_waist, z_widest, z_rel, "guillotine plane set");

    Ok(Matrix4::new_translation(&Vector3::new(0.0, 0.0, -z_rel)))
}
