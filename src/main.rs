use anyhow::Context;
use clap::{Parser, ValueEnum};
use raclahe::{
    ClaheParams, EqualizationRegion, PredictorError, RaclaheConfig, RoiPredictor, SortBy,
    onnx_predictor::OnnxRoiPredictor, pipeline::process_patient_directory,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "raclahe")]
#[command(about = "Region-adaptive CLAHE for CT/MRI volumes, one patient directory at a time")]
#[command(version)]
pub struct Args {
    /// Directory holding one subdirectory per patient
    #[arg(long, env = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Directory the "RACLAHE OUTPUT" tree is written to
    #[arg(long, env = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// ONNX export of the ROI segmentation model
    #[arg(long, env = "WEIGHTS_PATH")]
    pub weights_path: PathBuf,

    /// Probability threshold for ROI foreground
    #[arg(
        long,
        env = "RACLAHE_THRESHOLD",
        default_value_t = raclahe::config::DEFAULT_THRESHOLD
    )]
    pub threshold: f32,

    /// Pixels added around every predicted box
    #[arg(long, env = "RACLAHE_MARGIN", default_value_t = 0)]
    pub margin: usize,

    /// Side of the square frame slices are resized to
    #[arg(
        long,
        env = "RACLAHE_TARGET_SIZE",
        default_value_t = raclahe::config::DEFAULT_TARGET_SIZE
    )]
    pub target_size: usize,

    /// CLAHE clip limit
    #[arg(long, env = "RACLAHE_CLIP_LIMIT", default_value_t = 0.01)]
    pub clip_limit: f32,

    /// CLAHE contextual region side in pixels (default: 1/8 of the slice)
    #[arg(long, env = "RACLAHE_KERNEL_SIZE")]
    pub kernel_size: Option<usize>,

    /// CLAHE histogram bins
    #[arg(long, env = "RACLAHE_NBINS", default_value_t = 256)]
    pub nbins: usize,

    /// Equalize a tight crop of the ROI instead of the zero-padded slice
    #[arg(long, env = "RACLAHE_CROP")]
    pub crop: bool,

    /// Order of the DICOM files of a series
    #[arg(long, env = "RACLAHE_SORT_BY", value_enum, default_value_t = SortArg::FileName)]
    pub sort_by: SortArg,

    /// Also write a PNG preview of every enhanced slice
    #[arg(long, env = "RACLAHE_PREVIEWS")]
    pub previews: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SortArg {
    FileName,
    InstanceNumber,
    ImagePosition,
    TablePosition,
    None,
}

impl From<SortArg> for SortBy {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::FileName => SortBy::FileName,
            SortArg::InstanceNumber => SortBy::InstanceNumber,
            SortArg::ImagePosition => SortBy::ImagePositionPatient,
            SortArg::TablePosition => SortBy::TablePosition,
            SortArg::None => SortBy::None,
        }
    }
}

impl From<&Args> for RaclaheConfig {
    fn from(args: &Args) -> Self {
        Self {
            target_size: args.target_size,
            threshold: args.threshold,
            roi_margin: args.margin,
            equalization_region: if args.crop {
                EqualizationRegion::Cropped
            } else {
                EqualizationRegion::Padded
            },
            clahe: ClaheParams {
                kernel_size: args.kernel_size.map(|k| (k, k)),
                clip_limit: args.clip_limit,
                nbins: args.nbins,
            },
            save_previews: args.previews,
        }
    }
}

#[derive(Debug, Default)]
struct BatchSummary {
    processed: usize,
    enhanced: usize,
    failed: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RaclaheConfig::from(&args);
    tracing::info!("Starting raclahe v{}", env!("CARGO_PKG_VERSION"));

    let predictor = load_predictor(&args.weights_path)
        .with_context(|| format!("loading ROI model from {}", args.weights_path.display()))?;

    let summary = run_batch(&args, predictor.as_ref(), &config)?;
    tracing::info!(
        processed = summary.processed,
        enhanced = summary.enhanced,
        failed = summary.failed,
        "batch finished"
    );
    Ok(())
}

fn load_predictor(path: &Path) -> Result<Box<dyn RoiPredictor>, PredictorError> {
    Ok(Box::new(OnnxRoiPredictor::from_file(path)?))
}

/// Process every patient subdirectory in name order. A failing patient is
/// logged and skipped.
fn run_batch(
    args: &Args,
    predictor: &dyn RoiPredictor,
    config: &RaclaheConfig,
) -> anyhow::Result<BatchSummary> {
    let mut patients: Vec<PathBuf> = fs::read_dir(&args.input_dir)
        .with_context(|| format!("reading input directory {}", args.input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    patients.sort();

    let mut summary = BatchSummary::default();
    for patient_dir in &patients {
        let Some(patient) = patient_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        tracing::info!(patient = %patient, "processing patient");

        match process_patient_directory(
            &patient,
            predictor,
            patient_dir,
            &args.output_dir,
            config,
            args.sort_by.into(),
        ) {
            Ok(report) => {
                summary.processed += 1;
                summary.enhanced += usize::from(report.is_enhanced());
                let path = report.serialization.directory.join(format!("{patient}_metadata.json"));
                if let Err(err) = write_metadata(&path, &report.metadata) {
                    tracing::error!(patient = %patient, "could not write metadata: {err:#}");
                }
            }
            Err(err) => {
                summary.failed += 1;
                tracing::error!(patient = %patient, "skipping patient: {err}");
            }
        }
    }
    Ok(summary)
}

fn write_metadata(path: &Path, metadata: &raclahe::MetadataRecord) -> anyhow::Result<()> {
    let json = metadata.to_json_pretty()?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn args_map_onto_the_pipeline_config() {
        let args = Args::try_parse_from([
            "raclahe",
            "--input-dir",
            "in",
            "--output-dir",
            "out",
            "--weights-path",
            "unet.onnx",
            "--margin",
            "4",
            "--kernel-size",
            "32",
            "--crop",
        ])
        .unwrap();
        let config = RaclaheConfig::from(&args);

        assert_eq!(config.roi_margin, 4);
        assert_eq!(config.clahe.kernel_size, Some((32, 32)));
        assert_eq!(config.equalization_region, EqualizationRegion::Cropped);
        assert_eq!(config.target_size, raclahe::config::DEFAULT_TARGET_SIZE);
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unet.onnx");

        let result = load_predictor(&path);
        assert!(matches!(result, Err(PredictorError::Load { path: p, .. }) if p == path));
    }
}
