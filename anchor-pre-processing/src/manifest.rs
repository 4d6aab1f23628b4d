/// Conversion manifest describing the flat binary outputs.
use crate::bin_writer::write_atomic;
use crate::bounds::AnchorBounds;
use crate::error::{ConvertError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One flat output file and the number of floats stored per anchor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlatFileInfo {
    pub file: String,
    pub floats_per_anchor: usize,
    pub float_count: usize,
}

/// Summary written alongside the flat outputs so consumers can validate
/// array lengths without parsing the binaries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConversionManifest {
    pub anchor_count: usize,
    pub gaussians_per_anchor: usize,
    pub feature_dim: usize,
    pub octree_depth: u32,
    pub bounds: Option<AnchorBounds>,
    pub info: Vec<f32>,
    pub files: Vec<FlatFileInfo>,
    /// Anchors per integer level.
    pub level_histogram: BTreeMap<i64, usize>,
    pub extra_level_histogram: BTreeMap<i64, usize>,
}

impl ConversionManifest {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConvertError::format("manifest", e.to_string()))?;
        write_atomic(path, |writer| writer.write_all(json.as_bytes()))?;
        info!("Generated manifest: {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ConvertError::format("manifest", e.to_string()))
    }

    pub fn log_summary(&self) {
        info!("Manifest summary:");
        info!("  Anchors: {}", self.anchor_count);
        info!(
            "  Gaussians: {}",
            self.anchor_count * self.gaussians_per_anchor
        );
        if let Some(bounds) = &self.bounds {
            info!(
                "  Bounds: ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})",
                bounds.min[0], bounds.min[1], bounds.min[2], bounds.max[0], bounds.max[1], bounds.max[2]
            );
        }
        for (level, count) in &self.level_histogram {
            info!("  level {}: {}", level, count);
        }
        for (level, count) in &self.extra_level_histogram {
            info!("  extra level {}: {}", level, count);
        }
    }
}
