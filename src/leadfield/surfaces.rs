//! Tissue surface export.
//!
//! The per-electrode layer radii, taken back into MRI space, make a
//! set of control surfaces (outer scalp, skull limits, spongy limits,
//! inner CSF) written as one multi-cluster point file.

use nalgebra::Vector3;
use std::path::Path;

use crate::error::Result;
use crate::geometry::points::{write_clusters, PointCluster};
use crate::geometry::PointSet;
use crate::tissues::{TissueClass, TissueLimit, TissueRadii};

/// Write one cluster per selected tissue surface, each point expressed
/// in MRI space.
pub fn write_tissue_surfaces(
    radii: &TissueRadii,
    tissues: &[TissueClass],
    electrodes: &PointSet,
    mri_center: Vector3<f64>,
    inverse_center: Vector3<f64>,
    path: &Path,
) -> Result<()> {
    let delta_center = inverse_center - mri_center;

    let layer = |tissue: TissueClass, limit: TissueLimit| -> PointSet {
        let points = electrodes
            .iter()
            .enumerate()
            .map(|(ei, p)| p * radii.get(ei, tissue, limit) as f64 + delta_center)
            .collect();
        PointSet {
            points,
            names: electrodes.names.clone(),
        }
    };

    let mut clusters = Vec::new();

    let scalp = PointSet {
        points: electrodes.iter().map(|p| p + delta_center).collect(),
        names: electrodes.names.clone(),
    };
    clusters.push(PointCluster {
        name: "Scalp".into(),
        points: scalp,
    });

    if tissues.contains(&TissueClass::Skull) {
        clusters.push(PointCluster {
            name: "SkullOut".into(),
            points: layer(TissueClass::Skull, TissueLimit::OuterRel),
        });
    }
    if tissues.contains(&TissueClass::SkullSpongy) {
        clusters.push(PointCluster {
            name: "SkullSpongyOut".into(),
            points: layer(TissueClass::SkullSpongy, TissueLimit::OuterRel),
        });
        clusters.push(PointCluster {
            name: "SkullSpongyIn".into(),
            points: layer(TissueClass::SkullSpongy, TissueLimit::InnerRel),
        });
    }
    if tissues.contains(&TissueClass::Skull) {
        clusters.push(PointCluster {
            name: "SkullIn".into(),
            points: layer(TissueClass::Skull, TissueLimit::InnerRel),
        });
    }
    if tissues.contains(&TissueClass::Csf) {
        clusters.push(PointCluster {
            name: "CSF".into(),
            points: layer(TissueClass::Csf, TissueLimit::InnerRel),
        });
    }

    write_clusters(path, &clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardPreset;

    #[test]
    fn clusters_follow_the_preset_tissues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surfaces.json");

        let electrodes = PointSet::new(vec![
            Vector3::new(0.0, 0.0, 90.0),
            Vector3::new(60.0, 0.0, 60.0),
        ]);
        let mut radii = TissueRadii::new(2);
        for e in 0..2 {
            radii.set(e, TissueClass::Skull, TissueLimit::InnerRel, 0.85);
            radii.set(e, TissueClass::Skull, TissueLimit::OuterRel, 0.92);
            radii.set(e, TissueClass::Csf, TissueLimit::InnerRel, 0.80);
        }

        write_tissue_surfaces(
            &radii,
            ForwardPreset::Exact4Shell.tissues(),
            &electrodes,
            Vector3::zeros(),
            Vector3::new(0.0, 0.0, 2.0),
            &path,
        )
        .unwrap();

        let clusters: Vec<PointCluster> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Scalp", "SkullOut", "SkullIn", "CSF"]);
        // the scalp cluster carries the inverse-center shift
        assert_eq!(clusters[0].points.points[0].z, 92.0);
    }
}
