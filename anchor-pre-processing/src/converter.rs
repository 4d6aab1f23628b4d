/// Conversion driver: loads the anchor container, orders it spatially and
/// produces either the flat viewer binaries or the structured gaussian PLY.
use crate::anchors::{AnchorStore, SortedAnchors};
use crate::bounds::AnchorBounds;
use crate::config::ConversionConfig;
use crate::error::{ConvertError, Result};
use crate::expansion::GaussianExpander;
use crate::manifest::ConversionManifest;
use crate::model::{FeatureBatch, ModelEvaluator, ModelOutputs};
use crate::packer::{FlatArrays, write_gaussian_ply};
use crate::ply::PlyTable;
use crate::spatial_layout::Octree;
use constants::{
    DEFAULT_INPUT_FILE, DEFAULT_PLY_OUTPUT_FILE, INFO_FIELD, MANIFEST_FILE, VERTEX_ELEMENT,
    VIEW_DIRECTION_DIM,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Anchors loaded from the container together with their spatial order.
pub struct LoadedAnchors {
    pub store: AnchorStore,
    pub bounds: AnchorBounds,
    pub order: Vec<usize>,
    /// Whether the container declared an `info` property.
    pub has_info: bool,
}

impl LoadedAnchors {
    pub fn sorted(&self) -> SortedAnchors<'_> {
        SortedAnchors::new(&self.store, self.order.clone())
    }
}

pub struct AnchorConverter {
    /// Directory holding the anchor container and model weights.
    source_dir: PathBuf,
    output_dir: PathBuf,
    /// Container file name inside `source_dir`.
    input_name: String,
    config: ConversionConfig,
}

impl AnchorConverter {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: ConversionConfig,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            input_name: DEFAULT_INPUT_FILE.to_string(),
            config,
        }
    }

    pub fn with_input(mut self, input_name: impl Into<String>) -> Self {
        self.input_name = input_name.into();
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn input_path(&self) -> PathBuf {
        self.source_dir.join(&self.input_name)
    }

    /// Read and validate every anchor field, then compute the octree order.
    pub fn load(&self) -> Result<LoadedAnchors> {
        self.config.validate()?;

        let path = self.input_path();
        info!("Loading anchors from {}", path.display());
        let table = PlyTable::open(&path, VERTEX_ELEMENT)?;
        let has_info = table.has_property(INFO_FIELD);

        let store = AnchorStore::from_table(&table, &self.config)?;
        let bounds = AnchorBounds::from_points(&store.positions);
        self.log_bounds(&bounds, store.len());

        let order = self.spatial_order(&store.positions, bounds);
        Ok(LoadedAnchors {
            store,
            bounds,
            order,
            has_info,
        })
    }

    /// Octree traversal order, with insertion tracked on a progress bar.
    fn spatial_order(&self, points: &[[f32; 3]], bounds: AnchorBounds) -> Vec<usize> {
        let pb = progress_bar(
            points.len(),
            "[{bar:40.green/blue}] {pos}/{len} anchors ({percent}%) {msg}",
        );
        pb.set_message("Building octree");

        let mut tree = Octree::new(bounds, self.config.max_depth);
        for (index, point) in points.iter().enumerate() {
            tree.insert(point, index);
            if index % 10_000 == 0 {
                pb.set_position(index as u64);
            }
        }
        pb.finish_with_message("Octree built");

        info!(
            "Octree depth {}: {} nodes, {} leaves",
            self.config.max_depth,
            tree.node_count(),
            tree.leaf_count()
        );
        tree.sorted_indices()
    }

    /// Flat mode: seven raw f32 binaries plus `manifest.json`.
    pub fn convert_flat(&self) -> Result<ConversionManifest> {
        let start = Instant::now();
        let loaded = self.load()?;
        if !loaded.has_info && !loaded.store.is_empty() {
            return Err(ConvertError::format(
                INFO_FIELD,
                "required for flat output but missing from container",
            ));
        }

        let sorted = loaded.sorted();
        let arrays = FlatArrays::from_sorted(&sorted);
        let (level_histogram, extra_level_histogram) = loaded.store.level_histograms();

        self.ensure_output_dir()?;
        let files = arrays.write(&self.output_dir)?;

        let manifest = ConversionManifest {
            anchor_count: loaded.store.len(),
            gaussians_per_anchor: loaded.store.gaussians_per_anchor,
            feature_dim: loaded.store.feature_dim,
            octree_depth: self.config.max_depth,
            bounds: (!loaded.bounds.is_empty()).then_some(loaded.bounds),
            info: arrays.anchor_info.clone(),
            files,
            level_histogram,
            extra_level_histogram,
        };
        manifest.write(&self.output_dir.join(MANIFEST_FILE))?;
        manifest.log_summary();

        info!("Flat conversion finished in {:.2?}", start.elapsed());
        Ok(manifest)
    }

    /// Structured mode: evaluate the models, expand every anchor and write
    /// the surviving gaussians to `output_name` in the output directory.
    /// Returns the number of gaussians written.
    pub fn convert_structured<M: ModelEvaluator + ?Sized>(
        &self,
        model: &M,
        output_name: Option<&str>,
    ) -> Result<usize> {
        let start = Instant::now();
        let loaded = self.load()?;
        let sorted = loaded.sorted();

        let inputs = sorted.model_inputs(&self.config)?;
        let batch = FeatureBatch::new(&inputs, loaded.store.feature_dim + VIEW_DIRECTION_DIM);
        info!("Evaluating models over {} anchors", batch.len());
        let outputs = ModelOutputs::evaluate(model, batch, loaded.store.gaussians_per_anchor)?;

        let expander = GaussianExpander::new(&sorted, &outputs, &self.config);
        let records = expander.expand_filtered()?;
        let total = sorted.len() * loaded.store.gaussians_per_anchor;
        info!(
            "Kept {} of {} gaussians above opacity {}",
            records.len(),
            total,
            self.config.opacity_threshold
        );

        self.ensure_output_dir()?;
        let path = self
            .output_dir
            .join(output_name.unwrap_or(DEFAULT_PLY_OUTPUT_FILE));
        let written = write_gaussian_ply(&path, &records)?;

        info!("Structured conversion finished in {:.2?}", start.elapsed());
        Ok(written)
    }

    fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|e| ConvertError::io(&self.output_dir, e))
    }

    fn log_bounds(&self, bounds: &AnchorBounds, count: usize) {
        if bounds.is_empty() {
            info!("Container holds no anchors");
            return;
        }
        let size = bounds.dimensions();
        info!(
            "{} anchors, bounds ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3}), size {:.3} x {:.3} x {:.3}",
            count,
            bounds.min[0],
            bounds.min[1],
            bounds.min[2],
            bounds.max[0],
            bounds.max[1],
            bounds.max[2],
            size[0],
            size[1],
            size[2]
        );
    }
}

fn progress_bar(len: usize, template: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("▉▊▋▌▍▎▏ ");
    pb.set_style(style);
    pb
}
