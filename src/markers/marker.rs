//! Marker lists and their interval algebra.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    Trigger,
    Event,
    Temp,
}

/// One time interval [from, to] in frames, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub from: i64,
    pub to: i64,
    pub code: i32,
    pub name: String,
    pub kind: MarkerKind,
}

impl Marker {
    pub fn new(from: i64, to: i64, code: i32, name: impl Into<String>, kind: MarkerKind) -> Self {
        Self {
            from,
            to,
            code,
            name: name.into(),
            kind,
        }
    }

    pub fn len(&self) -> i64 {
        self.to - self.from + 1
    }

    pub fn overlaps(&self, other: &Marker) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

/// A list of markers kept sorted by (from, to).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerList {
    pub markers: Vec<Marker>,
}

impl MarkerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn append(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Marker> {
        self.markers.iter()
    }

    /// Total number of frames covered, overlaps counted once.
    pub fn covered_frames(&self) -> i64 {
        let mut sorted = self.clone();
        sorted.sort_and_clean();
        let mut total = 0;
        let mut last_end = i64::MIN;
        for m in &sorted.markers {
            let from = m.from.max(last_end + 1);
            if m.to >= from {
                total += m.to - from + 1;
                last_end = m.to;
            }
        }
        total
    }

    /// Sort by (from, to) and drop exact duplicates.
    pub fn sort_and_clean(&mut self) {
        self.markers
            .sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));
        self.markers
            .dedup_by(|a, b| a.from == b.from && a.to == b.to && a.name == b.name);
    }

    /// Keep only markers intersecting [from, to], clipped to it.
    pub fn keep_markers(&mut self, from: i64, to: i64) {
        self.markers.retain(|m| m.to >= from && m.from <= to);
        for m in &mut self.markers {
            m.from = m.from.max(from);
            m.to = m.to.min(to);
        }
    }

    /// Subtract the intervals of `cut` from every marker, splitting
    /// markers that straddle a cut.
    pub fn clip_markers(&mut self, cut: &MarkerList) {
        if cut.is_empty() {
            return;
        }
        let mut result = Vec::new();
        for m in &self.markers {
            let mut pieces = vec![(m.from, m.to)];
            for c in &cut.markers {
                let mut next = Vec::new();
                for (from, to) in pieces {
                    if c.to < from || c.from > to {
                        next.push((from, to));
                        continue;
                    }
                    if from < c.from {
                        next.push((from, c.from - 1));
                    }
                    if to > c.to {
                        next.push((c.to + 1, to));
                    }
                }
                pieces = next;
            }
            for (from, to) in pieces {
                let mut piece = m.clone();
                piece.from = from;
                piece.to = to;
                result.push(piece);
            }
        }
        self.markers = result;
    }

    /// Drop every marker overlapping any interval of `cut`.
    pub fn remove_markers(&mut self, cut: &MarkerList) {
        if cut.is_empty() {
            return;
        }
        self.markers
            .retain(|m| !cut.markers.iter().any(|c| c.overlaps(m)));
    }

    /// Insert the markers of `other` whose name matches `name`.
    pub fn insert_markers(&mut self, other: &MarkerList, name: &str) {
        for m in other.iter() {
            if m.name == name {
                self.markers.push(m.clone());
            }
        }
        self.sort_and_clean();
    }

    /// Consolidate the matching markers of `list` into merged time
    /// chunks clipped to [from, to], renamed `out_name`.
    pub fn markers_to_time_chunks(
        &mut self,
        list: &MarkerList,
        name: &str,
        from: i64,
        to: i64,
        out_name: &str,
    ) {
        let mut intervals: Vec<(i64, i64)> = list
            .iter()
            .filter(|m| m.name == name && m.to >= from && m.from <= to)
            .map(|m| (m.from.max(from), m.to.min(to)))
            .collect();
        intervals.sort_unstable();

        self.markers.clear();
        for (f, t) in intervals {
            match self.markers.last_mut() {
                Some(last) if f <= last.to + 1 => last.to = last.to.max(t),
                _ => self
                    .markers
                    .push(Marker::new(f, t, 0, out_name, MarkerKind::Temp)),
            }
        }
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

//----------------------------------------------------------------------------
// Epoch and selection specifications

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EpochsSpec {
    #[default]
    Whole,
    Periodic {
        length: i64,
    },
    List {
        intervals: Vec<(i64, i64)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GfpPeaksSpec {
    #[default]
    None,
    Auto,
    List {
        marker_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BadEpochsSpec {
    #[default]
    None,
    Auto {
        tolerance: f64,
    },
    List {
        marker_name: String,
    },
}

pub const MARKER_NAME_BLOCK: &str = "Block";
pub const MARKER_NAME_GFP_PEAK: &str = "MaxGfp";
pub const MARKER_NAME_BAD_EPOCH: &str = "BadEpoch";

/// Expand an epoch specification over [0, max_tf] into markers.
pub fn epochs_to_markers(spec: &EpochsSpec, max_tf: i64) -> MarkerList {
    let mut list = MarkerList::new();
    match spec {
        EpochsSpec::Whole => {
            list.append(Marker::new(0, max_tf, 0, MARKER_NAME_BLOCK, MarkerKind::Temp));
        }
        EpochsSpec::Periodic { length } => {
            let length = (*length).max(1);
            let mut from = 0;
            while from <= max_tf {
                let to = (from + length - 1).min(max_tf);
                list.append(Marker::new(from, to, 0, MARKER_NAME_BLOCK, MarkerKind::Temp));
                from += length;
            }
        }
        EpochsSpec::List { intervals } => {
            for &(from, to) in intervals {
                if to >= 0 && from <= max_tf && from <= to {
                    list.append(Marker::new(
                        from.max(0),
                        to.min(max_tf),
                        0,
                        MARKER_NAME_BLOCK,
                        MarkerKind::Temp,
                    ));
                }
            }
            list.sort_and_clean();
        }
    }
    list
}

/// One marker per strict local maximum of `track` within [from, to].
pub fn max_track_to_markers(track: &[f64], from: i64, to: i64, name: &str) -> MarkerList {
    let mut list = MarkerList::new();
    let from = from.max(1);
    let to = to.min(track.len() as i64 - 2);
    for t in from..=to {
        let i = t as usize;
        if track[i] > track[i - 1] && track[i] > track[i + 1] {
            list.append(Marker::new(t, t, 0, name, MarkerKind::Temp));
        }
    }
    list
}

/// Variance-based bad epoch detector: one-second-ish windows whose
/// power exceeds `tolerance` times the median window power are flagged
/// and merged.
pub fn bad_epochs_to_markers(
    data: &Array2<f64>,
    window: usize,
    tolerance: f64,
    name: &str,
) -> MarkerList {
    let num_tf = data.nrows();
    let window = window.max(1).min(num_tf.max(1));
    let mut list = MarkerList::new();
    if num_tf == 0 {
        return list;
    }

    // mean squared amplitude per window
    let mut powers = Vec::new();
    let mut starts = Vec::new();
    let mut start = 0usize;
    while start < num_tf {
        let end = (start + window).min(num_tf);
        let mut acc = 0.0;
        for t in start..end {
            for v in data.row(t) {
                acc += v * v;
            }
        }
        powers.push(acc / ((end - start) as f64 * data.ncols() as f64));
        starts.push((start, end));
        start = end;
    }

    let mut sorted = powers.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let baseline = sorted[sorted.len() / 2].max(f64::MIN_POSITIVE);

    for (power, &(from, to)) in powers.iter().zip(starts.iter()) {
        if power / baseline > tolerance {
            list.append(Marker::new(
                from as i64,
                to as i64 - 1,
                0,
                name,
                MarkerKind::Temp,
            ));
        }
    }

    // merge adjacent flagged windows
    let mut merged = MarkerList::new();
    merged.markers_to_time_chunks(&list, name, 0, num_tf as i64 - 1, name);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(intervals: &[(i64, i64)]) -> MarkerList {
        let mut l = MarkerList::new();
        for &(f, t) in intervals {
            l.append(Marker::new(f, t, 0, "m", MarkerKind::Temp));
        }
        l
    }

    #[test]
    fn keep_clips_to_the_range() {
        let mut l = list(&[(0, 10), (20, 30), (50, 60)]);
        l.keep_markers(5, 25);
        assert_eq!(l.len(), 2);
        assert_eq!((l.markers[0].from, l.markers[0].to), (5, 10));
        assert_eq!((l.markers[1].from, l.markers[1].to), (20, 25));
    }

    #[test]
    fn clip_splits_straddling_markers() {
        let mut l = list(&[(0, 100)]);
        l.clip_markers(&list(&[(10, 20), (50, 60)]));
        let spans: Vec<(i64, i64)> = l.iter().map(|m| (m.from, m.to)).collect();
        assert_eq!(spans, [(0, 9), (21, 49), (61, 100)]);
    }

    #[test]
    fn remove_drops_overlapping_markers() {
        let mut l = list(&[(0, 5), (10, 15), (20, 25)]);
        l.remove_markers(&list(&[(12, 13)]));
        assert_eq!(l.len(), 2);
        assert_eq!(l.markers[1].from, 20);
    }

    #[test]
    fn chunks_consolidate_overlaps() {
        let mut source = list(&[(0, 10), (5, 20), (40, 50)]);
        let mut chunks = MarkerList::new();
        chunks.markers_to_time_chunks(&source, "m", 0, 100, "chunk");
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks.markers[0].from, chunks.markers[0].to), (0, 20));
        source.sort_and_clean();
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn periodic_epochs_tile_the_range() {
        let l = epochs_to_markers(&EpochsSpec::Periodic { length: 30 }, 99);
        assert_eq!(l.len(), 4);
        assert_eq!((l.markers[3].from, l.markers[3].to), (90, 99));
        assert_eq!(l.covered_frames(), 100);
    }

    #[test]
    fn gfp_peaks_are_local_maxima() {
        let track = [0.0, 1.0, 0.5, 2.0, 0.1, 3.0, 0.0];
        let l = max_track_to_markers(&track, 0, 6, MARKER_NAME_GFP_PEAK);
        let peaks: Vec<i64> = l.iter().map(|m| m.from).collect();
        assert_eq!(peaks, [1, 3, 5]);
    }

    #[test]
    fn loud_window_is_flagged_bad() {
        let mut data = Array2::zeros((100, 4));
        for t in 0..100 {
            for c in 0..4 {
                data[(t, c)] = 1.0;
            }
        }
        for t in 40..50 {
            for c in 0..4 {
                data[(t, c)] = 50.0;
            }
        }
        let l = bad_epochs_to_markers(&data, 10, 5.0, MARKER_NAME_BAD_EPOCH);
        assert_eq!(l.len(), 1);
        assert!(l.markers[0].from >= 40 && l.markers[0].to <= 49);
    }
}
