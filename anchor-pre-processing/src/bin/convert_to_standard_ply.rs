//! Anchor container to a standard gaussian-splat PLY.
//!
//! Evaluates the colour, covariance and opacity MLPs stored next to the
//! container, expands every anchor into its child gaussians and writes the
//! ones above the opacity threshold as a 62-property `vertex` element.

use anchor_pre_processing::{AnchorConverter, ConversionConfig, DegeneratePolicy, MlpEvaluator};
use anyhow::{Context, Result};
use clap::Parser;
use constants::{DEFAULT_INPUT_FILE, DEFAULT_PLY_OUTPUT_FILE};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "convert-to-standard-ply")]
#[command(about = "Expands anchor point clouds into a standard gaussian-splat PLY")]
struct Args {
    /// Directory containing the anchor container and MLP weights.
    source_dir: PathBuf,

    /// Directory receiving the PLY file.
    output_dir: PathBuf,

    /// Container file name inside the source directory.
    #[arg(long, default_value = DEFAULT_INPUT_FILE)]
    input: String,

    /// Output file name inside the output directory.
    #[arg(long, default_value = DEFAULT_PLY_OUTPUT_FILE)]
    output: String,

    /// JSON file overriding pipeline parameters.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera position used for view directions, as `X,Y,Z`.
    #[arg(long, value_parser = parse_camera, allow_hyphen_values = true)]
    camera: Option<[f32; 3]>,

    /// Substitute a zero view direction or identity rotation instead of failing.
    #[arg(long)]
    allow_degenerate: bool,
}

fn parse_camera(value: &str) -> std::result::Result<[f32; 3], String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|e| format!("`{}`: {}", part, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("expected X,Y,Z, got `{}`", value)),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConversionConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ConversionConfig::default(),
    };
    if let Some(camera) = args.camera {
        config.camera_position = camera;
    }
    if args.allow_degenerate {
        config.degenerate_policy = DegeneratePolicy::Fallback;
    }
    config.validate()?;

    let model = MlpEvaluator::load_dir(
        &args.source_dir,
        config.model_input_dim(),
        config.gaussians_per_anchor,
    )
    .with_context(|| format!("Failed to load MLPs from {}", args.source_dir.display()))?;

    let converter =
        AnchorConverter::new(&args.source_dir, &args.output_dir, config).with_input(&args.input);
    let written = converter
        .convert_structured(&model, Some(&args.output))
        .with_context(|| format!("Failed to convert {}", converter.input_path().display()))?;

    log::info!(
        "Wrote {} gaussians to {}",
        written,
        args.output_dir.join(&args.output).display()
    );
    Ok(())
}
