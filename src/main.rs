use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use neurofield::config::{LeadFieldOptions, PreprocessOptions};
use neurofield::esi::{compute_lead_field_from_segmentation, compute_lead_field_from_t1};
use neurofield::forward::ForwardPreset;
use neurofield::geometry::PointSet;
use neurofield::leadfield::{reject_points, write_tissue_surfaces};
use neurofield::preprocess::preprocess_files;
use neurofield::tissues::SpatialFilterKind;
use neurofield::volume::Volume;
use neurofield::NeurofieldError;

#[derive(Parser, Debug)]
#[command(name = "neurofield")]
#[command(about = "EEG source imaging: lead fields, tissue radii, source-space preprocessing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a lead field matrix from head anatomy
    Leadfield {
        /// Head MRI volume
        #[arg(long)]
        head: PathBuf,

        /// Brain mask volume (T1 path)
        #[arg(long, conflicts_with = "tissues")]
        brain: Option<PathBuf>,

        /// Labelled tissues volume (segmentation path)
        #[arg(long)]
        tissues: Option<PathBuf>,

        /// Electrode coordinates
        #[arg(long)]
        xyz: PathBuf,

        /// Solution points
        #[arg(long)]
        sp: PathBuf,

        /// Forward model preset: ary, 3shell, 4shell or 6shell
        #[arg(long, default_value = "ary")]
        preset: ForwardPreset,

        /// Subject age in years
        #[arg(long, default_value_t = 35.0)]
        age: f64,

        /// Expected mean skull thickness in mm; 0 derives it from age
        #[arg(long, default_value_t = 0.0)]
        target_skull_thickness: f64,

        /// Skip the global skull thickness adjustment
        #[arg(long)]
        no_adjust_radius: bool,

        /// Spatial smoothing of the radius maps: none, outlier or
        /// interseptile
        #[arg(long, default_value = "none")]
        smoothing: String,

        /// Compact skull table thickness in mm, enabling the
        /// caller-provided spongy derivation
        #[arg(long)]
        compact_thickness: Option<f64>,

        /// Seed of the clique resampling
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,

        /// Output directory
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Run the preprocessing pipeline over a group of files
    Preprocess {
        /// TOML options file
        #[arg(long)]
        options: PathBuf,

        /// Input track files, in order
        inputs: Vec<PathBuf>,
    },
}

fn parse_smoothing(s: &str) -> Result<SpatialFilterKind, NeurofieldError> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(SpatialFilterKind::None),
        "outlier" => Ok(SpatialFilterKind::Outlier),
        "interseptile" => Ok(SpatialFilterKind::InterseptileWeightedMean),
        other => Err(NeurofieldError::InvalidInput(format!(
            "unknown smoothing: {other}"
        ))),
    }
}

fn run_leadfield(
    head: PathBuf,
    brain: Option<PathBuf>,
    tissues: Option<PathBuf>,
    xyz: PathBuf,
    sp: PathBuf,
    options: LeadFieldOptions,
    seed: u64,
    out: PathBuf,
) -> Result<(), NeurofieldError> {
    let head = Volume::read_bin(&head)?;
    let electrodes = PointSet::read_json(&xyz)?;
    let solution_points = PointSet::read_json(&sp)?;

    let mut result = match (&brain, &tissues) {
        (Some(brain), None) => {
            let brain = Volume::read_bin(brain)?;
            compute_lead_field_from_t1(
                &head,
                &brain,
                electrodes,
                solution_points,
                &options,
                seed,
                None,
            )?
        }
        (None, Some(tissues)) => {
            let tissues = Volume::read_bin(tissues)?;
            compute_lead_field_from_segmentation(
                &head,
                &tissues,
                electrodes,
                solution_points,
                &options,
                None,
            )?
        }
        _ => {
            return Err(NeurofieldError::InvalidInput(
                "exactly one of --brain or --tissues is required".into(),
            ))
        }
    };

    std::fs::create_dir_all(&out)?;

    reject_points(&mut result.k, &result.rejected);

    result.k.write_bin(&out.join("leadfield.bin"))?;
    std::fs::write(
        out.join("tissues_radii.bin"),
        bincode::serialize(&result.tissues_radii)
            .map_err(NeurofieldError::TrackContainer)?,
    )?;
    std::fs::write(
        out.join("rejected.json"),
        serde_json::to_string(&result.rejected).map_err(NeurofieldError::Serialization)?,
    )?;
    result
        .solution_points
        .write_json(&out.join("solution_points.json"))?;

    let inverse_center = head.origin - result.mri_center_to_inverse_center;
    write_tissue_surfaces(
        &result.tissues_radii,
        options.preset.tissues(),
        &result.electrodes,
        head.origin,
        inverse_center,
        &out.join("surfaces.json"),
    )?;

    info!(
        electrodes = result.k.num_electrodes(),
        solution_points = result.k.num_solution_points(),
        rejected = result.rejected.count(),
        "lead field written"
    );

    Ok(())
}

fn run() -> Result<(), NeurofieldError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Leadfield {
            head,
            brain,
            tissues,
            xyz,
            sp,
            preset,
            age,
            target_skull_thickness,
            no_adjust_radius,
            smoothing,
            compact_thickness,
            seed,
            out,
        } => {
            let options = LeadFieldOptions {
                preset,
                age: age.clamp(0.0, 100.0),
                target_skull_thickness,
                adjust_radius: !no_adjust_radius,
                smoothing: parse_smoothing(&smoothing)?,
                compact_thickness,
            };
            run_leadfield(head, brain, tissues, xyz, sp, options, seed, out)
        }

        Command::Preprocess { options, inputs } => {
            let options = PreprocessOptions::from_file(&options)
                .map_err(|e| NeurofieldError::InvalidInput(e.to_string()))?;
            let outcome = preprocess_files(&inputs, &options)?;
            info!(
                epoch_groups = outcome.output_files.len(),
                zscore_files = outcome.zscore_files.len(),
                "preprocessing done"
            );
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
