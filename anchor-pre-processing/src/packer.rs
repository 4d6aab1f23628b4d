/// Output packing: flat per-field binaries and the structured viewer PLY.
use crate::anchors::SortedAnchors;
use crate::bin_writer::{write_atomic, write_f32_bin};
use crate::error::{ConvertError, Result};
use crate::expansion::{GaussianRecord, expand_positions, gaussian_property_names};
use crate::manifest::FlatFileInfo;
use crate::ply::{PlyHeader, write_float_element};
use constants::{
    ANCHOR_EXTRA_LEVELS_FILE, ANCHOR_FEATURES_FILE, ANCHOR_INFO_FILE, ANCHOR_LEVELS_FILE,
    ANCHOR_POSITIONS_FILE, ANCHOR_SCALES_FILE, GAUSSIAN_RECORD_FLOATS, GSPLAT_POSITIONS_FILE,
    VERTEX_ELEMENT,
};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Flat arrays in sorted anchor order, one per output file.
#[derive(Debug, Clone, Default)]
pub struct FlatArrays {
    pub anchor_positions: Vec<f32>,
    pub gsplat_positions: Vec<f32>,
    pub anchor_scales: Vec<f32>,
    pub anchor_features: Vec<f32>,
    pub anchor_levels: Vec<f32>,
    pub anchor_extra_levels: Vec<f32>,
    pub anchor_info: Vec<f32>,
    pub gaussians_per_anchor: usize,
    pub feature_dim: usize,
}

impl FlatArrays {
    pub fn from_sorted(anchors: &SortedAnchors<'_>) -> Self {
        let store = anchors.store();
        Self {
            anchor_positions: anchors.positions(),
            gsplat_positions: expand_positions(anchors),
            anchor_scales: anchors.extents(),
            anchor_features: anchors.features(),
            anchor_levels: anchors.levels(),
            anchor_extra_levels: anchors.extra_levels(),
            anchor_info: store.info.clone(),
            gaussians_per_anchor: store.gaussians_per_anchor,
            feature_dim: store.feature_dim,
        }
    }

    /// `(file name, data, floats per anchor)`; the info block has no
    /// per-anchor arity and reports 0.
    pub fn files(&self) -> [(&'static str, &[f32], usize); 7] {
        [
            (ANCHOR_POSITIONS_FILE, self.anchor_positions.as_slice(), 3),
            (GSPLAT_POSITIONS_FILE, self.gsplat_positions.as_slice(), 3 * self.gaussians_per_anchor),
            (ANCHOR_SCALES_FILE, self.anchor_scales.as_slice(), 3),
            (ANCHOR_FEATURES_FILE, self.anchor_features.as_slice(), self.feature_dim),
            (ANCHOR_LEVELS_FILE, self.anchor_levels.as_slice(), 1),
            (ANCHOR_EXTRA_LEVELS_FILE, self.anchor_extra_levels.as_slice(), 1),
            (ANCHOR_INFO_FILE, self.anchor_info.as_slice(), 0),
        ]
    }

    /// Write every array to `output_dir`.
    pub fn write(&self, output_dir: &Path) -> Result<Vec<FlatFileInfo>> {
        let mut written = Vec::with_capacity(7);
        for (name, data, floats_per_anchor) in self.files() {
            let path = output_dir.join(name);
            write_f32_bin(&path, data)?;
            info!("Saved {} ({} floats)", path.display(), data.len());
            written.push(FlatFileInfo {
                file: name.to_string(),
                floats_per_anchor,
                float_count: data.len(),
            });
        }
        Ok(written)
    }
}

/// Write surviving gaussians as a binary little-endian PLY with a single
/// `vertex` element, then read the header back and check the vertex count.
pub fn write_gaussian_ply(path: &Path, records: &[GaussianRecord]) -> Result<usize> {
    let names = gaussian_property_names();
    write_atomic(path, |writer| {
        let rows: Vec<[f32; GAUSSIAN_RECORD_FLOATS]> =
            records.iter().map(GaussianRecord::to_row).collect();
        write_float_element(
            writer,
            VERTEX_ELEMENT,
            &names,
            records.len(),
            rows.iter().map(|row| &row[..]),
        )
    })?;

    let stored = read_vertex_count(path)?;
    if stored != records.len() {
        return Err(ConvertError::format(
            path.display().to_string(),
            format!("wrote {} gaussians but header reports {}", records.len(), stored),
        ));
    }
    info!("Number of vertices in {}: {}", path.display(), stored);
    Ok(stored)
}

/// Vertex count declared in a PLY header.
pub fn read_vertex_count(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
    let header = PlyHeader::read(&mut BufReader::new(file))?;
    header
        .element(VERTEX_ELEMENT)
        .map(|element| element.count)
        .ok_or_else(|| ConvertError::format(VERTEX_ELEMENT, "element not found in output"))
}
