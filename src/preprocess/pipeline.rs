//! Preprocessing driver.
//!
//! Runs the declarative step chain over a group of files: spatial
//! filter, source transform, complex merge, GFP normalization, Z-Score
//! standardization, ranking, thresholding, envelope, ROI averaging,
//! then epoch / GFP-peak / bad-epoch selection and output writing.
//! Steps needing whole-dataset statistics first run on one downsampled
//! concatenation of all inputs.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{BackgroundNormalization, PreprocessOptions};
use crate::error::{NeurofieldError, Result};
use crate::geometry::PointSet;
use crate::markers::{
    bad_epochs_to_markers, epochs_to_markers, marker::MARKER_NAME_BAD_EPOCH,
    marker::MARKER_NAME_BLOCK, marker::MARKER_NAME_GFP_PEAK, max_track_to_markers, BadEpochsSpec,
    EpochsSpec, GfpPeaksSpec, Marker, MarkerKind, MarkerList,
};
use crate::preprocess::operator::{RegularizationChoice, SourceOperator};
use crate::preprocess::rois::Rois;
use crate::preprocess::steps::{
    apply_envelope, apply_gfp_normalization, apply_threshold, compute_gfp_normalization, to_rank,
    EnvelopeKind,
};
use crate::preprocess::tracks::TrackSet;
use crate::preprocess::zscore::{apply_zscore, compute_zscore, ZScoreFactors};
use crate::tissues::spatial_filter::{ElectrodeGraph, SpatialFilterKind};

const DOWNSAMPLING_TARGET: usize = 2000;
const BAD_EPOCHS_DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Default)]
pub struct PreprocessOutcome {
    /// Output files grouped per epoch, in input order.
    pub output_files: Vec<Vec<PathBuf>>,
    pub zscore_files: Vec<PathBuf>,
    pub used_regularization: Option<usize>,
    pub timeline_disrupted: bool,
}

/// Effective settings after the no-nonsense pass over the options.
struct Effective {
    spatial_filter: SpatialFilterKind,
    graph: Option<ElectrodeGraph>,
    operator: Option<SourceOperator>,
    regularization: RegularizationChoice,
    merge_complex: bool,
    gfp_normalize: bool,
    standardization: BackgroundNormalization,
    zscore: Option<crate::preprocess::zscore::ZScoreKind>,
    ranking: bool,
    threshold: Option<f64>,
    envelope: EnvelopeKind,
    envelope_window_ms: f64,
    rois: Option<Rois>,
}

fn sanitize(options: &PreprocessOptions) -> Result<Effective> {
    let mut spatial_filter = options.spatial_filter;
    let graph = match &options.xyz_file {
        Some(path) if spatial_filter != SpatialFilterKind::None => {
            Some(ElectrodeGraph::build(&PointSet::read_json(path)?))
        }
        _ => {
            if spatial_filter != SpatialFilterKind::None {
                warn!("spatial filter requested without electrode coordinates, skipping");
                spatial_filter = SpatialFilterKind::None;
            }
            None
        }
    };

    let operator = match &options.operator_file {
        Some(path) => Some(SourceOperator::read_bin(path)?),
        None => None,
    };
    let regularization = if operator.is_some() {
        options.regularization
    } else {
        RegularizationChoice::None
    };

    let mut gfp_normalize = options.gfp_normalize;
    if gfp_normalize && options.standardization != BackgroundNormalization::None {
        // normalizing before standardizing would cancel out anyway
        warn!("GFP normalization is pointless before Z-Score, skipping");
        gfp_normalize = false;
    }

    let mut standardization = options.standardization;
    if standardization == BackgroundNormalization::LoadZScoreFile
        && options
            .zscore_file
            .as_ref()
            .map_or(true, |p| !p.exists())
    {
        standardization = BackgroundNormalization::ComputeZScore;
    }

    let threshold = options.threshold.filter(|&t| t != 0.0);

    let mut envelope = options.envelope;
    if envelope != EnvelopeKind::None && options.envelope_window_ms <= 0.0 {
        envelope = EnvelopeKind::None;
    }

    let rois = match &options.rois_file {
        Some(path) => Some(Rois::read_json(path)?),
        None => None,
    };

    Ok(Effective {
        spatial_filter,
        graph,
        operator,
        regularization,
        merge_complex: options.merge_complex,
        gfp_normalize,
        standardization,
        zscore: options.zscore,
        ranking: options.ranking,
        threshold,
        envelope,
        envelope_window_ms: options.envelope_window_ms,
        rois,
    })
}

fn filter_spatially(tracks: &mut TrackSet, graph: &ElectrodeGraph, kind: SpatialFilterKind) {
    if graph.neighbours.len() != tracks.num_channels() {
        warn!(
            electrodes = graph.neighbours.len(),
            channels = tracks.num_channels(),
            "electrode coordinates do not match the data, skipping spatial filter"
        );
        return;
    }
    for t in 0..tracks.num_frames() {
        let mut row: Vec<f64> = tracks.data.row(t).iter().copied().collect();
        graph.filter(kind, &mut row);
        for (c, v) in row.into_iter().enumerate() {
            tracks.data[(t, c)] = v;
        }
    }
}

/// Downsampled concatenation of all inputs; with complex pairs, one
/// stream for the real files and one for the imaginary ones.
fn subsample_inputs(inputs: &[PathBuf], merge_complex: bool) -> Result<(TrackSet, Option<TrackSet>)> {
    let mut real: Option<TrackSet> = None;
    let mut imag: Option<TrackSet> = None;

    let per_file = (DOWNSAMPLING_TARGET / inputs.len().max(1)).max(16);

    for (fi, path) in inputs.iter().enumerate() {
        let sub = TrackSet::read_bin(path)?.downsample(per_file);
        let slot = if merge_complex && fi % 2 == 1 {
            &mut imag
        } else {
            &mut real
        };
        match slot {
            Some(acc) => acc.concatenate(&sub)?,
            None => *slot = Some(sub),
        }
    }

    let real = real.ok_or_else(|| NeurofieldError::InvalidInput("no input files".into()))?;
    Ok((real, imag))
}

/// Preprocess a group of files into `options.output_dir`.
pub fn preprocess_files(
    inputs: &[PathBuf],
    options: &PreprocessOptions,
) -> Result<PreprocessOutcome> {
    if inputs.is_empty() {
        return Err(NeurofieldError::InvalidInput("no input files".into()));
    }
    if options.merge_complex && inputs.len() % 2 != 0 {
        return Err(NeurofieldError::InvalidInput(
            "complex merge needs real/imaginary file pairs".into(),
        ));
    }

    let eff = sanitize(options)?;

    let subsample_all = eff.gfp_normalize
        || eff.regularization == RegularizationChoice::AutoGlobal
        || eff.standardization == BackgroundNormalization::ComputeZScore;

    let timeline_disrupted =
        options.gfp_peaks != GfpPeaksSpec::None || eff.merge_complex;

    let time_cropping = options.epochs != EpochsSpec::Whole
        || options.gfp_peaks != GfpPeaksSpec::None
        || options.bad_epochs != BadEpochsSpec::None;

    let is_preprocessing = eff.spatial_filter != SpatialFilterKind::None
        || eff.operator.is_some()
        || eff.gfp_normalize
        || eff.standardization == BackgroundNormalization::ComputeZScore
        || eff.zscore.is_some()
        || eff.ranking
        || eff.threshold.is_some()
        || eff.envelope != EnvelopeKind::None
        || eff.rois.is_some()
        || time_cropping;

    let mut outcome = PreprocessOutcome {
        timeline_disrupted,
        ..Default::default()
    };

    if !is_preprocessing {
        outcome.output_files = vec![inputs.to_vec()];
        return Ok(outcome);
    }

    std::fs::create_dir_all(&options.output_dir)?;

    info!(num_files = inputs.len(), "preprocessing file group");

    // statistics that live across files
    let mut gfp_norm_factor = 1.0f64;
    let mut zscore_factors: Option<ZScoreFactors> = None;
    let mut used_regularization: Option<usize> = None;
    let mut stashed_real: Option<TrackSet> = None;
    let mut infix_for_factors = String::new();

    // the sub-sampled concatenation goes through the same head of the
    // chain first, yielding the whole-dataset statistics
    let temp_sets: Vec<TrackSet> = if subsample_all {
        let (real, imag) = subsample_inputs(inputs, eff.merge_complex)?;
        let mut sets = vec![real];
        sets.extend(imag);
        // written then re-read, so the temp path exercises the same
        // container as the real files
        let mut reread = Vec::new();
        for (i, set) in sets.iter().enumerate() {
            let temp = options
                .output_dir
                .join(format!(".subsampled-{}-{i}.bin", std::process::id()));
            set.write_bin(&temp)?;
            reread.push(TrackSet::read_bin(&temp)?);
            std::fs::remove_file(&temp)?;
        }
        reread
    } else {
        Vec::new()
    };

    let vectorial_esi = eff.zscore.map_or(false, |z| z.is_vectorial());

    // negative indices are the temp sets
    let first = -(temp_sets.len() as i64);
    for fi in first..inputs.len() as i64 {
        let is_temp = fi < 0;
        let mut infix = String::new();

        let (mut data, markers, input_path) = if is_temp {
            let set = temp_sets[(fi - first) as usize].clone();
            (set, MarkerList::new(), None)
        } else {
            let path = &inputs[fi as usize];
            let markers_path = marker_path(path);
            let markers = if markers_path.exists() {
                MarkerList::read_json(&markers_path)?
            } else {
                MarkerList::new()
            };
            (TrackSet::read_bin(path)?, markers, Some(path.clone()))
        };

        let mut positive_data = false;

        // ---- spatial filter
        if eff.spatial_filter != SpatialFilterKind::None {
            if let Some(graph) = &eff.graph {
                filter_spatially(&mut data, graph, eff.spatial_filter);
                infix.push_str(".SF");
            }
        }

        // ---- source transform
        if let Some(operator) = &eff.operator {
            let reg_label;
            if eff.regularization == RegularizationChoice::AutoLocal {
                // the choice is repeated for every map
                data = operator.apply_auto_local(&data, vectorial_esi)?;
                reg_label = "Local".to_string();
            } else {
                let reg = match eff.regularization {
                    RegularizationChoice::None => 0,
                    RegularizationChoice::Fixed(index) => index,
                    RegularizationChoice::AutoGlobal => match used_regularization {
                        Some(reg) => reg,
                        None => {
                            let reg = operator.auto_regularization(&data);
                            used_regularization = Some(reg);
                            reg
                        }
                    },
                    RegularizationChoice::AutoLocal => unreachable!(),
                };
                if used_regularization.is_none() {
                    used_regularization = Some(reg);
                }
                data = operator.apply(&data, reg, vectorial_esi)?;
                reg_label = operator
                    .regularization_labels
                    .get(reg)
                    .cloned()
                    .unwrap_or_else(|| format!("r{reg}"));
            }
            positive_data = !vectorial_esi;

            infix.push_str(&format!(
                ".ESI-{}-{}-{}",
                operator.name,
                operator.num_solution_points(),
                reg_label
            ));
        }

        // ---- complex merge: consecutive files are the real and
        // imaginary parts of one frequency band
        if eff.merge_complex {
            let pair_index = if is_temp { fi - first } else { fi };
            if pair_index % 2 == 0 {
                stashed_real = Some(data);
                continue;
            }
            let real = stashed_real.take().ok_or_else(|| {
                NeurofieldError::InvalidInput("imaginary file without its real part".into())
            })?;
            if real.num_channels() != data.num_channels()
                || real.num_frames() != data.num_frames()
            {
                return Err(NeurofieldError::InvalidInput(
                    "real and imaginary parts differ in shape".into(),
                ));
            }
            for (v, r) in data.data.iter_mut().zip(real.data.iter()) {
                *v = (*v * *v + r * r).sqrt();
            }
            data.sampling_frequency = 0.0;
            positive_data = true;
        }

        // ---- GFP normalization
        if eff.gfp_normalize {
            infix.push_str(".GfpNorm");
            if is_temp {
                gfp_norm_factor = compute_gfp_normalization(&data, positive_data);
                debug!(gfp_norm_factor, "gfp normalization factor");
            } else {
                apply_gfp_normalization(&mut data, gfp_norm_factor);
            }
        }

        // ---- Z-Score standardization
        if eff.standardization != BackgroundNormalization::None {
            if let Some(kind) = eff.zscore {
                if eff.standardization == BackgroundNormalization::ComputeZScore && is_temp {
                    zscore_factors = Some(compute_zscore(&data, kind)?);
                } else if eff.standardization == BackgroundNormalization::LoadZScoreFile
                    && zscore_factors.is_none()
                {
                    let path = options.zscore_file.as_ref().ok_or_else(|| {
                        NeurofieldError::InvalidInput("missing z-score factor file".into())
                    })?;
                    let bytes = std::fs::read(path)?;
                    zscore_factors = Some(bincode::deserialize(&bytes)?);
                }

                if !is_temp {
                    if let Some(factors) = &zscore_factors {
                        apply_zscore(&mut data, factors)?;
                        if kind.makes_output_signed() {
                            positive_data = false;
                        }
                    }
                }
                infix.push('.');
                infix.push_str(kind.infix());
            }
        }

        // the temp pass stops here: statistics are in, clean up
        if is_temp {
            infix_for_factors = infix;
            continue;
        }

        // ---- ranking
        if eff.ranking {
            to_rank(&mut data);
            infix.push_str(".Rank");
        }

        // ---- thresholding
        if let Some(threshold) = eff.threshold {
            apply_threshold(&mut data, threshold);
            infix.push_str(&format!(".Clip{threshold:.2}"));
        }

        // ---- envelope
        if eff.envelope != EnvelopeKind::None {
            apply_envelope(&mut data, eff.envelope, eff.envelope_window_ms);
            positive_data = true;
            infix.push_str(&format!(".Envelope{}", eff.envelope_window_ms as i64));
        }

        // ---- ROI averaging
        if let Some(rois) = &eff.rois {
            data = rois.average(&data, options.roi_method)?;
            if eff.ranking {
                to_rank(&mut data);
            }
            if let Some(threshold) = eff.threshold {
                apply_threshold(&mut data, threshold);
            }
            infix.push_str(&format!(".ROIS{}", rois.num_rois()));
        }

        // ---- epoch cutting and writing
        let max_tf = data.num_frames() as i64 - 1;
        let epoch_list = epochs_to_markers(&options.epochs, max_tf);

        let gfp_track = if options.gfp_peaks == GfpPeaksSpec::Auto {
            Some(data.gfp(positive_data))
        } else {
            None
        };

        let bad_list = match &options.bad_epochs {
            BadEpochsSpec::None => MarkerList::new(),
            BadEpochsSpec::Auto { tolerance } => {
                let window = if data.sampling_frequency > 0.0 {
                    data.sampling_frequency as usize
                } else {
                    BAD_EPOCHS_DEFAULT_WINDOW
                };
                bad_epochs_to_markers(&data.data, window, *tolerance, MARKER_NAME_BAD_EPOCH)
            }
            BadEpochsSpec::List { marker_name } => {
                let mut chunks = MarkerList::new();
                chunks.markers_to_time_chunks(
                    &markers,
                    marker_name,
                    0,
                    max_tf,
                    MARKER_NAME_BAD_EPOCH,
                );
                chunks
            }
        };

        let input_path = input_path.expect("real files carry their path");
        let stem = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tracks");
        let stem = stem.replace(".Real", "").replace(".Imag", "");

        for (epoch_index, epoch) in epoch_list.iter().enumerate() {
            let mut writing = MarkerList::new();

            match &options.gfp_peaks {
                GfpPeaksSpec::None => {
                    writing.append(Marker::new(
                        epoch.from,
                        epoch.to,
                        0,
                        MARKER_NAME_BLOCK,
                        MarkerKind::Temp,
                    ));
                }
                GfpPeaksSpec::Auto => {
                    let track = gfp_track.as_ref().expect("gfp computed above");
                    writing = max_track_to_markers(track, epoch.from, epoch.to, MARKER_NAME_GFP_PEAK);
                }
                GfpPeaksSpec::List { marker_name } => {
                    writing.insert_markers(&markers, marker_name);
                    writing.keep_markers(epoch.from, epoch.to);
                }
            }

            if options.bad_epochs != BadEpochsSpec::None {
                if options.gfp_peaks == GfpPeaksSpec::None {
                    writing.clip_markers(&bad_list);
                } else {
                    writing.remove_markers(&bad_list);
                }
            }

            writing.sort_and_clean();

            // ---- output naming, one infix per applied step
            let mut name = format!("{}{}{}", options.file_prefix, stem, infix);
            if matches!(options.epochs, EpochsSpec::List { .. } | EpochsSpec::Periodic { .. }) {
                name.push_str(&format!(".{}_{}", epoch.from, epoch.to));
            }
            if options.gfp_peaks != GfpPeaksSpec::None {
                name.push_str(".GfpMax");
            }
            if options.bad_epochs != BadEpochsSpec::None {
                name.push_str(".SkipBad");
            }
            name.push_str(".bin");

            let output_path = options.output_dir.join(&name);

            let mut out = data.clone();
            if timeline_disrupted {
                out.sampling_frequency = 0.0;
            }
            out.write_epochs(&output_path, &writing)?;

            // markers follow only while the timeline is intact
            if !timeline_disrupted && !markers.is_empty() {
                markers.write_json(&marker_path(&output_path))?;
            }

            if outcome.output_files.len() <= epoch_index {
                outcome.output_files.push(Vec::new());
            }
            outcome.output_files[epoch_index].push(output_path);
        }
    }

    // ---- Z-Score factor files, in both orientations
    if options.save_zscore {
        if let Some(factors) = &zscore_factors {
            let stem = inputs[0]
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("tracks")
                .replace(".Real", "")
                .replace(".Imag", "");

            let base = format!(
                "{}{}{}.{}Factors",
                options.file_prefix,
                stem,
                infix_for_factors,
                factors.kind.infix()
            );

            let by_channel = options.output_dir.join(format!("{base}.bin"));
            std::fs::write(&by_channel, bincode::serialize(factors)?)?;
            outcome.zscore_files.push(by_channel);

            let transposed = ZScoreFactors {
                kind: factors.kind,
                values: factors.values.t().to_owned(),
            };
            let by_factor = options.output_dir.join(format!("{base}.T.bin"));
            std::fs::write(&by_factor, bincode::serialize(&transposed)?)?;
            outcome.zscore_files.push(by_factor);
        }
    }

    outcome.used_regularization = used_regularization;
    Ok(outcome)
}

fn marker_path(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_owned();
    os.push(".mrk.json");
    PathBuf::from(os)
}
