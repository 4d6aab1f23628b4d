/// Anchor attribute store, spatially sorted views and model feature assembly.
use crate::config::{ConversionConfig, DegeneratePolicy};
use crate::error::{ConvertError, Result};
use crate::ply::PlyTable;
use constants::{
    ANCHOR_INFO_LEN, ANCHOR_SCALE_COUNT, EXTRA_LEVEL_FIELD, FEATURE_PREFIX, INFO_FIELD,
    LEVEL_FIELD, OFFSET_PREFIX, POSITION_FIELDS, SCALE_PREFIX, VIEW_DIRECTION_DIM,
};
use log::warn;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Per-anchor attributes addressable by original index.
/// Multi-valued attributes are stored flat with a fixed stride per anchor.
#[derive(Debug, Clone, Default)]
pub struct AnchorStore {
    pub positions: Vec<[f32; 3]>,
    pub levels: Vec<f64>,
    pub extra_levels: Vec<f64>,
    /// Six scales per anchor.
    pub scales: Vec<[f64; ANCHOR_SCALE_COUNT]>,
    /// `feature_dim` features per anchor.
    pub features: Vec<f32>,
    /// `3 * gaussians_per_anchor` offsets per anchor, axis-major.
    pub offsets: Vec<f64>,
    /// Header block taken from the leading rows of the `info` column.
    pub info: Vec<f32>,
    pub feature_dim: usize,
    pub gaussians_per_anchor: usize,
}

impl AnchorStore {
    /// Gather every anchor field from the container, checking arity and
    /// finiteness before anything downstream runs.
    pub fn from_table(table: &PlyTable, config: &ConversionConfig) -> Result<Self> {
        let count = table.len();
        let feature_dim = config.feature_dim;
        let k = config.gaussians_per_anchor;

        let positions = table.points()?;
        for (field, axis) in POSITION_FIELDS.iter().zip(0..3) {
            check_finite(field, positions.iter().map(|p| p[axis] as f64))?;
        }

        let levels = table.values(LEVEL_FIELD)?.to_vec();
        check_finite(LEVEL_FIELD, levels.iter().copied())?;
        let extra_levels = table.values(EXTRA_LEVEL_FIELD)?.to_vec();
        check_finite(EXTRA_LEVEL_FIELD, extra_levels.iter().copied())?;

        let scale_columns = (0..ANCHOR_SCALE_COUNT)
            .map(|i| {
                let name = format!("{}{}", SCALE_PREFIX, i);
                let values = table.values(&name)?;
                check_finite(&name, values.iter().copied())?;
                Ok(values)
            })
            .collect::<Result<Vec<_>>>()?;
        check_no_extra_fields(table, SCALE_PREFIX, ANCHOR_SCALE_COUNT)?;
        let scales = (0..count)
            .map(|i| std::array::from_fn(|s| scale_columns[s][i]))
            .collect();

        let feature_columns = (0..feature_dim)
            .map(|i| {
                let name = format!("{}{}", FEATURE_PREFIX, i);
                let values = table.values(&name)?;
                check_finite(&name, values.iter().copied())?;
                Ok(values)
            })
            .collect::<Result<Vec<_>>>()?;
        check_no_extra_fields(table, FEATURE_PREFIX, feature_dim)?;
        let mut features = vec![0.0f32; count * feature_dim];
        for (column_idx, column) in feature_columns.iter().enumerate() {
            for (anchor, &value) in column.iter().enumerate() {
                features[anchor * feature_dim + column_idx] = value as f32;
            }
        }

        let offset_names = ordered_offset_fields(&table.property_names(), 3 * k)?;
        let mut offsets = vec![0.0f64; count * 3 * k];
        for (column_idx, name) in offset_names.iter().enumerate() {
            let column = table.values(name)?;
            check_finite(name, column.iter().copied())?;
            for (anchor, &value) in column.iter().enumerate() {
                // Offsets are stored as single precision in the container.
                offsets[anchor * 3 * k + column_idx] = value as f32 as f64;
            }
        }

        let info = if table.has_property(INFO_FIELD) {
            table
                .values(INFO_FIELD)?
                .iter()
                .take(ANCHOR_INFO_LEN)
                .map(|&v| v as f32)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            positions,
            levels,
            extra_levels,
            scales,
            features,
            offsets,
            info,
            feature_dim,
            gaussians_per_anchor: k,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn feature(&self, anchor: usize) -> &[f32] {
        &self.features[anchor * self.feature_dim..(anchor + 1) * self.feature_dim]
    }

    /// Offset magnitude for `axis` and child `j` of `anchor`.
    pub fn offset(&self, anchor: usize, axis: usize, j: usize) -> f64 {
        let k = self.gaussians_per_anchor;
        self.offsets[anchor * 3 * k + axis * k + j]
    }

    /// Exponentiated extent scales (components 3..6) of `anchor`.
    pub fn extent(&self, anchor: usize) -> [f64; 3] {
        let scale = &self.scales[anchor];
        [scale[3].exp(), scale[4].exp(), scale[5].exp()]
    }

    /// Exponentiated offset scales (components 0..3) of `anchor`.
    pub fn offset_scale(&self, anchor: usize) -> [f64; 3] {
        let scale = &self.scales[anchor];
        [scale[0].exp(), scale[1].exp(), scale[2].exp()]
    }

    /// Count of anchors per integer level, and per extra level.
    pub fn level_histograms(&self) -> (BTreeMap<i64, usize>, BTreeMap<i64, usize>) {
        (histogram(&self.levels), histogram(&self.extra_levels))
    }
}

fn histogram(values: &[f64]) -> BTreeMap<i64, usize> {
    let mut counts = BTreeMap::new();
    for &value in values {
        *counts.entry(value as i64).or_insert(0) += 1;
    }
    counts
}

fn check_finite(field: &str, values: impl Iterator<Item = f64>) -> Result<()> {
    for (anchor, value) in values.enumerate() {
        if !value.is_finite() {
            return Err(ConvertError::format(
                field,
                format!("non-finite value {} at anchor {}", value, anchor),
            ));
        }
    }
    Ok(())
}

/// Reject `<prefix><n>` fields beyond the expected arity.
fn check_no_extra_fields(table: &PlyTable, prefix: &str, expected: usize) -> Result<()> {
    for name in table.property_names() {
        if let Some(suffix) = name.strip_prefix(prefix) {
            if suffix.parse::<usize>().map_or(true, |i| i >= expected) {
                return Err(ConvertError::format(
                    name,
                    format!("unexpected field; anchors carry {} `{}*` values", expected, prefix),
                ));
            }
        }
    }
    Ok(())
}

/// Offset field names ordered by their trailing integer.
/// The sequence must be exactly `f_offset_0 .. f_offset_{expected-1}`.
pub fn ordered_offset_fields(names: &[&str], expected: usize) -> Result<Vec<String>> {
    let mut indexed = names
        .iter()
        .filter(|name| name.starts_with(OFFSET_PREFIX))
        .map(|name| {
            name.rsplit('_')
                .next()
                .and_then(|suffix| suffix.parse::<usize>().ok())
                .map(|index| (index, name.to_string()))
                .ok_or_else(|| ConvertError::format(*name, "offset field has no numeric suffix"))
        })
        .collect::<Result<Vec<_>>>()?;

    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(ConvertError::format(
            OFFSET_PREFIX,
            format!("expected {} offset fields, found {}", expected, indexed.len()),
        ));
    }
    for (position, (index, name)) in indexed.iter().enumerate() {
        if *index != position {
            return Err(ConvertError::format(
                name.as_str(),
                format!("offset sequence is not contiguous; expected index {}", position),
            ));
        }
    }

    Ok(indexed.into_iter().map(|(_, name)| name).collect())
}

/// Anchor data reordered by the spatial permutation. Row `i` of every array
/// belongs to original anchor `order[i]`.
#[derive(Debug, Clone)]
pub struct SortedAnchors<'a> {
    store: &'a AnchorStore,
    order: Vec<usize>,
}

impl<'a> SortedAnchors<'a> {
    pub fn new(store: &'a AnchorStore, order: Vec<usize>) -> Self {
        debug_assert_eq!(order.len(), store.len());
        Self { store, order }
    }

    pub fn store(&self) -> &'a AnchorStore {
        self.store
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn positions(&self) -> Vec<f32> {
        self.order
            .iter()
            .flat_map(|&i| self.store.positions[i])
            .collect()
    }

    pub fn levels(&self) -> Vec<f32> {
        self.order.iter().map(|&i| self.store.levels[i] as f32).collect()
    }

    pub fn extra_levels(&self) -> Vec<f32> {
        self.order
            .iter()
            .map(|&i| self.store.extra_levels[i] as f32)
            .collect()
    }

    /// Exponentiated extent scales, three per anchor.
    pub fn extents(&self) -> Vec<f32> {
        self.order
            .iter()
            .flat_map(|&i| self.store.extent(i).map(|v| v as f32))
            .collect()
    }

    pub fn features(&self) -> Vec<f32> {
        self.order
            .iter()
            .flat_map(|&i| self.store.feature(i).iter().copied())
            .collect()
    }

    /// Model input rows: latent features followed by the view direction.
    ///
    /// The direction is `(x - cx, y - cy, z + cz) / distance`. The z term adds
    /// the camera coordinate, matching the frame convention of the trained
    /// models; x and y subtract.
    pub fn model_inputs(&self, config: &ConversionConfig) -> Result<Vec<f32>> {
        let feature_dim = self.store.feature_dim;
        let width = feature_dim + VIEW_DIRECTION_DIM;
        let camera = config.camera_position.map(|c| c as f64);
        let mut rows = vec![0.0f32; self.len() * width];

        let degenerate: Vec<bool> = rows
            .par_chunks_mut(width.max(1))
            .zip(self.order.par_iter())
            .map(|(row, &anchor)| {
                row[..feature_dim].copy_from_slice(self.store.feature(anchor));
                let p = self.store.positions[anchor].map(|c| c as f64);
                let d = [p[0] - camera[0], p[1] - camera[1], p[2] + camera[2]];
                let distance = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();

                if distance > 0.0 {
                    for axis in 0..3 {
                        row[feature_dim + axis] = (d[axis] / distance) as f32;
                    }
                    false
                } else {
                    true
                }
            })
            .collect();

        // Report the first degenerate row in sorted order.
        if let Some(row) = degenerate.iter().position(|&d| d) {
            if config.degenerate_policy == DegeneratePolicy::Fail {
                return Err(ConvertError::degenerate(
                    self.order[row],
                    "anchor coincides with the camera; view direction undefined",
                ));
            }
        }
        let degenerate = degenerate.iter().filter(|&&d| d).count();

        if degenerate > 0 {
            warn!(
                "{} anchors coincide with the camera; using a zero view direction",
                degenerate
            );
        }

        Ok(rows)
    }
}
