//! Scalar pipeline steps: GFP normalization, ranking, thresholding,
//! envelopes.

use ordered_float::OrderedFloat;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::preprocess::tracks::TrackSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    #[default]
    None,
    Analytic,
    SlidingWindow,
    GapBridging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoiMethod {
    #[default]
    Mean,
    Median,
}

//----------------------------------------------------------------------------
// GFP normalization

/// Single multiplicative factor bringing the background GFP level to 1:
/// the inverse of the mode of the GFP distribution, estimated on a
/// histogram of the background sample.
pub fn compute_gfp_normalization(sample: &TrackSet, positive: bool) -> f64 {
    let gfp = sample.gfp(positive);
    if gfp.is_empty() {
        return 1.0;
    }

    let max = gfp.iter().cloned().fold(f64::MIN_POSITIVE, f64::max);
    let bins = 100usize;
    let mut histogram = vec![0u32; bins];
    for &g in &gfp {
        let b = ((g / max * (bins as f64 - 1.0)) as usize).min(bins - 1);
        histogram[b] += 1;
    }

    let mode_bin = histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, &c)| c)
        .map(|(b, _)| b)
        .unwrap_or(0);
    let mode = (mode_bin as f64 + 0.5) / bins as f64 * max;

    if mode > 0.0 {
        1.0 / mode
    } else {
        let mut sorted = gfp;
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];
        if median > 0.0 {
            1.0 / median
        } else {
            1.0
        }
    }
}

pub fn apply_gfp_normalization(tracks: &mut TrackSet, factor: f64) {
    tracks.data.mapv_inplace(|v| v * factor);
}

//----------------------------------------------------------------------------
// Ranking

/// Replace every scalar by its rank in (0, 1] over the whole file.
/// Identical values share one rank; nulls stay at 0. Vectorial data is
/// ranked on the norms, each vector rescaled so its norm equals the
/// rank.
pub fn to_rank(tracks: &mut TrackSet) {
    if tracks.vectorial {
        rank_vectorial(tracks);
    } else {
        rank_scalar(tracks);
    }
}

fn shared_ranks(values: &[f64]) -> std::collections::HashMap<OrderedFloat<f64>, f64> {
    let mut non_null: Vec<f64> = values.iter().copied().filter(|&v| v != 0.0).collect();
    non_null.sort_by(|a, b| a.total_cmp(b));
    let total = non_null.len() as f64;

    let mut ranks = std::collections::HashMap::new();
    let mut i = 0usize;
    while i < non_null.len() {
        let mut j = i;
        while j + 1 < non_null.len() && non_null[j + 1] == non_null[i] {
            j += 1;
        }
        // identical values share the rank of their group's middle
        let rank = ((i + j) as f64 / 2.0 + 1.0) / total;
        ranks.insert(OrderedFloat(non_null[i]), rank);
        i = j + 1;
    }
    ranks
}

fn rank_scalar(tracks: &mut TrackSet) {
    let values: Vec<f64> = tracks.data.iter().copied().collect();
    let ranks = shared_ranks(&values);
    tracks.data.mapv_inplace(|v| {
        if v == 0.0 {
            0.0
        } else {
            *ranks.get(&OrderedFloat(v)).unwrap_or(&0.0)
        }
    });
}

fn rank_vectorial(tracks: &mut TrackSet) {
    let num_points = tracks.num_channels() / 3;
    let mut norms = Vec::with_capacity(tracks.num_frames() * num_points);
    for t in 0..tracks.num_frames() {
        for p in 0..num_points {
            norms.push(
                (tracks.data[(t, 3 * p)].powi(2)
                    + tracks.data[(t, 3 * p + 1)].powi(2)
                    + tracks.data[(t, 3 * p + 2)].powi(2))
                .sqrt(),
            );
        }
    }
    let ranks = shared_ranks(&norms);
    for t in 0..tracks.num_frames() {
        for p in 0..num_points {
            let norm = norms[t * num_points + p];
            let scale = if norm == 0.0 {
                0.0
            } else {
                ranks.get(&OrderedFloat(norm)).unwrap_or(&0.0) / norm
            };
            for c in 0..3 {
                tracks.data[(t, 3 * p + c)] *= scale;
            }
        }
    }
}

//----------------------------------------------------------------------------
// Thresholding

/// Clamp values of magnitude below `threshold` to 0.
pub fn apply_threshold(tracks: &mut TrackSet, threshold: f64) {
    tracks
        .data
        .mapv_inplace(|v| if v.abs() < threshold { 0.0 } else { v });
}

//----------------------------------------------------------------------------
// Envelopes

/// Window length in frames from a duration in ms.
fn window_frames(window_ms: f64, sampling_frequency: f64, num_frames: usize) -> usize {
    let w = if sampling_frequency > 0.0 {
        (window_ms * sampling_frequency / 1000.0).round() as usize
    } else {
        window_ms.round() as usize
    };
    w.clamp(1, num_frames.max(1))
}

/// Apply the chosen envelope per channel; the output is non-negative.
pub fn apply_envelope(tracks: &mut TrackSet, kind: EnvelopeKind, window_ms: f64) {
    let num_frames = tracks.num_frames();
    if num_frames == 0 || kind == EnvelopeKind::None {
        return;
    }
    let window = window_frames(window_ms, tracks.sampling_frequency, num_frames);

    for channel in 0..tracks.num_channels() {
        let column: Vec<f64> = tracks.data.column(channel).iter().copied().collect();
        let envelope = match kind {
            EnvelopeKind::Analytic => analytic_envelope(&column),
            EnvelopeKind::SlidingWindow => sliding_window_envelope(&column, window),
            EnvelopeKind::GapBridging => gap_bridging_envelope(&column),
            EnvelopeKind::None => unreachable!(),
        };
        for (t, v) in envelope.into_iter().enumerate() {
            tracks.data[(t, channel)] = v;
        }
    }
}

/// Magnitude of the analytic signal (Hilbert transform by FFT).
fn analytic_envelope(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 {
        return signal.iter().map(|v| v.abs()).collect();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f64>> =
        signal.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    // one-sided spectrum: keep DC and Nyquist, double the positives
    for (i, value) in buffer.iter_mut().enumerate() {
        if i == 0 || (n % 2 == 0 && i == n / 2) {
            continue;
        }
        if i < (n + 1) / 2 {
            *value *= 2.0;
        } else {
            *value = Complex::new(0.0, 0.0);
        }
    }

    ifft.process(&mut buffer);
    buffer.iter().map(|c| c.norm() / n as f64).collect()
}

/// Peak magnitude over a centered sliding window.
fn sliding_window_envelope(signal: &[f64], window: usize) -> Vec<f64> {
    let n = signal.len();
    let half = window / 2;
    (0..n)
        .map(|t| {
            let from = t.saturating_sub(half);
            let to = (t + half).min(n - 1);
            signal[from..=to].iter().fold(0.0f64, |m, v| m.max(v.abs()))
        })
        .collect()
}

/// Linear bridges between successive local magnitude peaks.
fn gap_bridging_envelope(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    let magnitude: Vec<f64> = signal.iter().map(|v| v.abs()).collect();
    if n < 3 {
        return magnitude;
    }

    let mut peaks = vec![0usize];
    for t in 1..n - 1 {
        if magnitude[t] >= magnitude[t - 1] && magnitude[t] >= magnitude[t + 1] {
            peaks.push(t);
        }
    }
    peaks.push(n - 1);

    let mut out = vec![0.0f64; n];
    for pair in peaks.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (va, vb) = (magnitude[a], magnitude[b]);
        for t in a..=b {
            let alpha = if b == a {
                0.0
            } else {
                (t - a) as f64 / (b - a) as f64
            };
            let bridged = va * (1.0 - alpha) + vb * alpha;
            out[t] = out[t].max(bridged);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn gfp_normalization_brings_background_to_one() {
        let data = Array2::from_shape_fn((500, 8), |(t, c)| {
            5.0 * ((t as f64 * 0.1).sin() + 0.1 * c as f64)
        });
        let mut tracks = TrackSet::new(data, 250.0);
        let factor = compute_gfp_normalization(&tracks, false);
        apply_gfp_normalization(&mut tracks, factor);
        let gfp = tracks.gfp(false);
        let mut sorted = gfp.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = sorted[sorted.len() / 2];
        assert!(median > 0.2 && median < 5.0, "median gfp {median}");
    }

    #[test]
    fn ranks_are_shared_for_ties_and_null_for_zeros() {
        let data = Array2::from_shape_vec((1, 6), vec![0.0, 5.0, 5.0, 1.0, 9.0, 2.0]).unwrap();
        let mut tracks = TrackSet::new(data, 0.0);
        to_rank(&mut tracks);
        assert_eq!(tracks.data[(0, 0)], 0.0);
        assert_eq!(tracks.data[(0, 1)], tracks.data[(0, 2)]);
        assert_relative_eq!(tracks.data[(0, 4)], 1.0, epsilon = 1e-12);
        assert!(tracks.data[(0, 3)] < tracks.data[(0, 5)]);
    }

    #[test]
    fn threshold_clamps_small_magnitudes() {
        let data = Array2::from_shape_vec((1, 4), vec![0.5, -0.2, 2.0, -3.0]).unwrap();
        let mut tracks = TrackSet::new(data, 0.0);
        apply_threshold(&mut tracks, 1.0);
        assert_eq!(tracks.data[(0, 0)], 0.0);
        assert_eq!(tracks.data[(0, 1)], 0.0);
        assert_eq!(tracks.data[(0, 2)], 2.0);
        assert_eq!(tracks.data[(0, 3)], -3.0);
    }

    #[test]
    fn analytic_envelope_of_a_tone_is_flat() {
        let n = 256;
        let data = Array2::from_shape_fn((n, 1), |(t, _)| {
            (std::f64::consts::TAU * 16.0 * t as f64 / n as f64).sin()
        });
        let mut tracks = TrackSet::new(data, 256.0);
        apply_envelope(&mut tracks, EnvelopeKind::Analytic, 0.0);
        // away from the edges the envelope of a pure tone sits at 1
        for t in 32..n - 32 {
            assert!((tracks.data[(t, 0)] - 1.0).abs() < 0.05, "at {t}");
        }
    }

    #[test]
    fn envelopes_are_non_negative() {
        let data = Array2::from_shape_fn((100, 2), |(t, c)| {
            ((t + c) as f64 * 0.3).sin() * 2.0
        });
        for kind in [
            EnvelopeKind::Analytic,
            EnvelopeKind::SlidingWindow,
            EnvelopeKind::GapBridging,
        ] {
            let mut tracks = TrackSet::new(data.clone(), 100.0);
            apply_envelope(&mut tracks, kind, 50.0);
            assert!(tracks.data.iter().all(|&v| v >= 0.0), "{kind:?}");
        }
    }
}
