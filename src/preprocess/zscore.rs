//! Z-Score standardization.
//!
//! Standardizes a stream against the center and spread of a background
//! sample. Scalar variants carry (center, spread) per channel;
//! vectorial variants carry (center, spread, offset) per component of
//! each solution point.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{NeurofieldError, Result};
use crate::preprocess::tracks::TrackSet;

/// Offset pushing standardized positive data above zero.
const ZSCORE_OFFSET: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZScoreKind {
    // positive (norm) data
    PositiveCenterScale,
    PositiveCenterScaleOffset,
    PositiveCenterScaleAbs,
    PositiveCenterScalePlus,
    PositiveNocenterScale,
    PositiveCenterScaleInvertOffset,
    // vectorial data, three components per point
    VectorialCenterVectorsCenterScale,
    VectorialCenterVectorsScale,
    VectorialCenterScaleByComponent,
    // signed (EEG) data
    SignedCenterScale,
}

impl ZScoreKind {
    pub fn is_vectorial(self) -> bool {
        matches!(
            self,
            ZScoreKind::VectorialCenterVectorsCenterScale
                | ZScoreKind::VectorialCenterVectorsScale
                | ZScoreKind::VectorialCenterScaleByComponent
        )
    }

    /// These variants produce signed results; the output datatype
    /// becomes plain scalar.
    pub fn makes_output_signed(self) -> bool {
        matches!(
            self,
            ZScoreKind::PositiveCenterScale | ZScoreKind::SignedCenterScale
        )
    }

    pub fn infix(self) -> &'static str {
        match self {
            ZScoreKind::PositiveCenterScale => "Z",
            ZScoreKind::PositiveCenterScaleOffset => "ZPos",
            ZScoreKind::PositiveCenterScaleAbs => "ZAbs",
            ZScoreKind::PositiveCenterScalePlus => "ZPlus",
            ZScoreKind::PositiveNocenterScale => "ZRms",
            ZScoreKind::PositiveCenterScaleInvertOffset => "ZInv",
            ZScoreKind::VectorialCenterVectorsCenterScale => "ZVect",
            ZScoreKind::VectorialCenterVectorsScale => "ZVectS",
            ZScoreKind::VectorialCenterScaleByComponent => "ZComp",
            ZScoreKind::SignedCenterScale => "Z",
        }
    }
}

/// Per-channel factors: (channels × 2) scalar, (points × 9) vectorial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZScoreFactors {
    pub kind: ZScoreKind,
    pub values: Array2<f64>,
}

fn robust_center_spread(values: &mut Vec<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let center = values[values.len() / 2];
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(|a, b| a.total_cmp(b));
    // MAD rescaled to a Gaussian sigma
    let spread = (deviations[deviations.len() / 2] * 1.4826).max(f64::MIN_POSITIVE);
    (center, spread)
}

/// Compute the factors on a background sample.
pub fn compute_zscore(sample: &TrackSet, kind: ZScoreKind) -> Result<ZScoreFactors> {
    if sample.num_frames() == 0 {
        return Err(NeurofieldError::InvalidInput("empty background sample".into()));
    }

    let values = if kind.is_vectorial() {
        if sample.num_channels() % 3 != 0 {
            return Err(NeurofieldError::InvalidInput(
                "vectorial standardization needs 3 channels per point".into(),
            ));
        }
        let num_points = sample.num_channels() / 3;
        let mut values = Array2::zeros((num_points, 9));
        for point in 0..num_points {
            for comp in 0..3 {
                let mut column: Vec<f64> =
                    sample.data.column(3 * point + comp).iter().copied().collect();
                let (center, spread) = robust_center_spread(&mut column);
                values[(point, 3 * comp)] = center;
                values[(point, 3 * comp + 1)] = spread;
                values[(point, 3 * comp + 2)] = ZSCORE_OFFSET;
            }
        }
        values
    } else {
        let mut values = Array2::zeros((sample.num_channels(), 2));
        for channel in 0..sample.num_channels() {
            let mut column: Vec<f64> = sample.data.column(channel).iter().copied().collect();
            if kind == ZScoreKind::PositiveNocenterScale {
                // variance from zero, all data
                let rms = (column.iter().map(|v| v * v).sum::<f64>() / column.len() as f64)
                    .sqrt()
                    .max(f64::MIN_POSITIVE);
                values[(channel, 0)] = 0.0;
                values[(channel, 1)] = rms;
            } else {
                let (center, spread) = robust_center_spread(&mut column);
                values[(channel, 0)] = center;
                values[(channel, 1)] = spread;
            }
        }
        values
    };

    Ok(ZScoreFactors { kind, values })
}

/// Apply the factors in place. Vectorial non-by-component variants
/// reduce the data to one positive channel per point.
pub fn apply_zscore(tracks: &mut TrackSet, factors: &ZScoreFactors) -> Result<()> {
    let kind = factors.kind;

    if kind.is_vectorial() {
        let num_points = factors.values.nrows();
        if tracks.num_channels() != 3 * num_points {
            return Err(NeurofieldError::DimensionMismatch {
                expected: 3 * num_points,
                got: tracks.num_channels(),
            });
        }

        let keep_components = kind == ZScoreKind::VectorialCenterScaleByComponent;
        let out_channels = if keep_components { 3 * num_points } else { num_points };
        let mut out = Array2::zeros((tracks.num_frames(), out_channels));

        for t in 0..tracks.num_frames() {
            for point in 0..num_points {
                let mut z = [0.0f64; 3];
                for comp in 0..3 {
                    let center = factors.values[(point, 3 * comp)];
                    let spread = factors.values[(point, 3 * comp + 1)];
                    let v = tracks.data[(t, 3 * point + comp)];
                    z[comp] = match kind {
                        // centering then per-component rescaling
                        ZScoreKind::VectorialCenterVectorsCenterScale
                        | ZScoreKind::VectorialCenterScaleByComponent => (v - center) / spread,
                        // centering only, pooled scale applied below
                        _ => v - center,
                    };
                }
                if keep_components {
                    for comp in 0..3 {
                        out[(t, 3 * point + comp)] = z[comp];
                    }
                } else {
                    let norm = if kind == ZScoreKind::VectorialCenterVectorsScale {
                        let pooled = (0..3)
                            .map(|c| factors.values[(point, 3 * c + 1)])
                            .sum::<f64>()
                            / 3.0;
                        (z[0].powi(2) + z[1].powi(2) + z[2].powi(2)).sqrt() / pooled
                    } else {
                        (z[0].powi(2) + z[1].powi(2) + z[2].powi(2)).sqrt()
                    };
                    out[(t, point)] = norm;
                }
            }
        }

        tracks.data = out;
        tracks.vectorial = keep_components;
        return Ok(());
    }

    if tracks.num_channels() != factors.values.nrows() {
        return Err(NeurofieldError::DimensionMismatch {
            expected: factors.values.nrows(),
            got: tracks.num_channels(),
        });
    }

    for t in 0..tracks.num_frames() {
        for channel in 0..tracks.num_channels() {
            let center = factors.values[(channel, 0)];
            let spread = factors.values[(channel, 1)];
            let z = (tracks.data[(t, channel)] - center) / spread;
            tracks.data[(t, channel)] = match factors.kind {
                ZScoreKind::PositiveCenterScale | ZScoreKind::SignedCenterScale => z,
                ZScoreKind::PositiveCenterScaleOffset => (z + ZSCORE_OFFSET).max(0.0),
                ZScoreKind::PositiveCenterScaleAbs => z.abs(),
                ZScoreKind::PositiveCenterScalePlus => z.max(0.0),
                ZScoreKind::PositiveNocenterScale => z,
                ZScoreKind::PositiveCenterScaleInvertOffset => (-z + ZSCORE_OFFSET).max(0.0),
                _ => unreachable!("vectorial handled above"),
            };
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(channels: usize) -> TrackSet {
        let data = Array2::from_shape_fn((200, channels), |(t, c)| {
            ((t * 13 + c * 7) % 17) as f64 * 0.1 + c as f64
        });
        TrackSet::new(data, 250.0)
    }

    #[test]
    fn standardized_background_is_centered() {
        let s = sample(4);
        let factors = compute_zscore(&s, ZScoreKind::SignedCenterScale).unwrap();
        let mut t = s.clone();
        apply_zscore(&mut t, &factors).unwrap();
        for channel in 0..4 {
            let mut column: Vec<f64> = t.data.column(channel).iter().copied().collect();
            column.sort_by(|a, b| a.total_cmp(b));
            let median = column[column.len() / 2];
            assert_relative_eq!(median, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn offset_variant_stays_non_negative() {
        let s = sample(3);
        let factors = compute_zscore(&s, ZScoreKind::PositiveCenterScaleOffset).unwrap();
        let mut t = s.clone();
        apply_zscore(&mut t, &factors).unwrap();
        assert!(t.data.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn vectorial_norm_reduces_the_dimension() {
        let s = sample(6); // 2 points
        let factors =
            compute_zscore(&s, ZScoreKind::VectorialCenterVectorsCenterScale).unwrap();
        assert_eq!(factors.values.dim(), (2, 9));
        let mut t = s.clone();
        apply_zscore(&mut t, &factors).unwrap();
        assert_eq!(t.num_channels(), 2);
        assert!(!t.vectorial);
        assert!(t.data.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn by_component_keeps_the_vectors() {
        let s = sample(6);
        let factors = compute_zscore(&s, ZScoreKind::VectorialCenterScaleByComponent).unwrap();
        let mut t = s.clone();
        apply_zscore(&mut t, &factors).unwrap();
        assert_eq!(t.num_channels(), 6);
        assert!(t.vectorial);
    }
}
