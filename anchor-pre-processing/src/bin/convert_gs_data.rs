//! Anchor container to flat viewer binaries.
//!
//! Writes the anchors in octree order as raw little-endian f32 arrays:
//! positions, expanded child positions, extents, latent features, levels,
//! extra levels and the info block, plus a `manifest.json` summary.

use anchor_pre_processing::{AnchorConverter, ConversionConfig};
use anyhow::{Context, Result};
use clap::Parser;
use constants::DEFAULT_INPUT_FILE;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "convert-gs-data")]
#[command(about = "Packs anchor point clouds into flat binaries for the web viewer")]
struct Args {
    /// Directory containing the anchor container.
    source_dir: PathBuf,

    /// Directory receiving the binaries and manifest.
    output_dir: PathBuf,

    /// Container file name inside the source directory.
    #[arg(long, default_value = DEFAULT_INPUT_FILE)]
    input: String,

    /// JSON file overriding pipeline parameters.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConversionConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ConversionConfig::default(),
    };

    let converter =
        AnchorConverter::new(&args.source_dir, &args.output_dir, config).with_input(&args.input);
    let manifest = converter.convert_flat().with_context(|| {
        format!(
            "Failed to convert {}",
            converter.input_path().display()
        )
    })?;

    log::info!(
        "Wrote {} anchors to {}",
        manifest.anchor_count,
        args.output_dir.display()
    );
    Ok(())
}
