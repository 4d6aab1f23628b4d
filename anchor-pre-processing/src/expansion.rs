/// Anchor to gaussian expansion and decoding into the viewer layout.
use crate::anchors::SortedAnchors;
use crate::config::{ConversionConfig, DegeneratePolicy};
use crate::error::{ConvertError, Result};
use crate::model::ModelOutputs;
use constants::{
    COLOR_CHANNELS, COVARIANCE_COMPONENTS, GAUSSIAN_RECORD_FLOATS, SH_REST_COEFFS,
};
use log::warn;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity rotation used by the degenerate fallback, `(w, x, y, z)`.
const IDENTITY_ROTATION: [f32; 4] = [1.0, 0.0, 0.0, 0.0];

/// One decoded gaussian in viewer order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianRecord {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub f_dc: [f32; COLOR_CHANNELS],
    pub f_rest: [f32; SH_REST_COEFFS],
    pub opacity: f32,
    pub scale: [f32; 3],
    pub rotation: [f32; 4],
}

impl GaussianRecord {
    /// Fields flattened in PLY property order.
    pub fn to_row(&self) -> [f32; GAUSSIAN_RECORD_FLOATS] {
        let mut row = [0.0f32; GAUSSIAN_RECORD_FLOATS];
        let parts: [&[f32]; 7] = [
            &self.position,
            &self.normal,
            &self.f_dc,
            &self.f_rest,
            std::slice::from_ref(&self.opacity),
            &self.scale,
            &self.rotation,
        ];
        let mut offset = 0;
        for part in parts {
            row[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }
        row
    }
}

/// PLY property names matching `GaussianRecord::to_row`.
pub fn gaussian_property_names() -> Vec<String> {
    let mut names: Vec<String> = ["x", "y", "z", "nx", "ny", "nz"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    names.extend((0..COLOR_CHANNELS).map(|i| format!("f_dc_{}", i)));
    names.extend((0..SH_REST_COEFFS).map(|i| format!("f_rest_{}", i)));
    names.push("opacity".to_string());
    names.extend((0..3).map(|i| format!("scale_{}", i)));
    names.extend((0..4).map(|i| format!("rot_{}", i)));
    names
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Position of each child: `position + offset * exp(scale[axis])` using the
/// first three scales. Returns `3 * k` values, child-major.
pub fn child_positions(anchors: &SortedAnchors<'_>, row: usize) -> Vec<f32> {
    let store = anchors.store();
    let anchor = anchors.order()[row];
    let k = store.gaussians_per_anchor;
    let position = store.positions[anchor];
    let offset_scale = store.offset_scale(anchor);

    let mut out = Vec::with_capacity(3 * k);
    for j in 0..k {
        for axis in 0..3 {
            let value =
                position[axis] as f64 + store.offset(anchor, axis, j) * offset_scale[axis];
            out.push(value as f32);
        }
    }
    out
}

/// Expanded child positions of every anchor, in sorted order (unfiltered).
pub fn expand_positions(anchors: &SortedAnchors<'_>) -> Vec<f32> {
    (0..anchors.len())
        .into_par_iter()
        .flat_map_iter(|row| child_positions(anchors, row))
        .collect()
}

pub fn decode_color(raw: f32, sh_c0: f64) -> f32 {
    ((raw as f64 - 0.5) / sh_c0) as f32
}

/// Logit of the raw opacity; `sentinel` when the raw value is not positive.
pub fn decode_opacity(raw: f32, sentinel: f32) -> f32 {
    if raw <= 0.0 {
        sentinel
    } else {
        (-(1.0 / raw as f64 - 1.0).ln()) as f32
    }
}

/// Log-domain scale: `ln(sigmoid(cov) * extent)`.
pub fn decode_scale(raw: f32, extent: f64) -> f32 {
    (sigmoid(raw as f64) * extent).ln() as f32
}

/// Unit quaternion from the last four covariance components, or `None` when
/// their norm is zero.
pub fn normalize_rotation(raw: &[f32]) -> Option<[f32; 4]> {
    let norm = raw.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(std::array::from_fn(|i| (raw[i] as f64 / norm) as f32))
    } else {
        None
    }
}

/// Decodes model outputs into gaussian records, anchor by anchor.
pub struct GaussianExpander<'a> {
    anchors: &'a SortedAnchors<'a>,
    outputs: &'a ModelOutputs,
    config: &'a ConversionConfig,
}

impl<'a> GaussianExpander<'a> {
    pub fn new(
        anchors: &'a SortedAnchors<'a>,
        outputs: &'a ModelOutputs,
        config: &'a ConversionConfig,
    ) -> Self {
        Self {
            anchors,
            outputs,
            config,
        }
    }

    /// All `k` children of the anchor at sorted row `row`, in child order.
    /// Returns the records and how many used the identity rotation fallback.
    pub fn expand_anchor(&self, row: usize) -> Result<(Vec<GaussianRecord>, usize)> {
        let store = self.anchors.store();
        let anchor = self.anchors.order()[row];
        let k = store.gaussians_per_anchor;
        let extent = store.extent(anchor);
        let positions = child_positions(self.anchors, row);

        let mut records = Vec::with_capacity(k);
        let mut fallbacks = 0;
        for j in 0..k {
            let gaussian = row * k + j;
            let color = &self.outputs.color[gaussian * COLOR_CHANNELS..][..COLOR_CHANNELS];
            let cov =
                &self.outputs.covariance[gaussian * COVARIANCE_COMPONENTS..][..COVARIANCE_COMPONENTS];

            let rotation = match normalize_rotation(&cov[3..7]) {
                Some(q) => q,
                None => match self.config.degenerate_policy {
                    DegeneratePolicy::Fail => {
                        return Err(ConvertError::degenerate(
                            anchor,
                            format!("zero-norm rotation vector for gaussian {}", j),
                        ));
                    }
                    DegeneratePolicy::Fallback => {
                        fallbacks += 1;
                        IDENTITY_ROTATION
                    }
                },
            };

            records.push(GaussianRecord {
                position: [positions[3 * j], positions[3 * j + 1], positions[3 * j + 2]],
                normal: [0.0; 3],
                f_dc: std::array::from_fn(|c| decode_color(color[c], self.config.sh_c0)),
                f_rest: [0.0; SH_REST_COEFFS],
                opacity: decode_opacity(self.outputs.opacity[gaussian], self.config.opacity_sentinel),
                scale: std::array::from_fn(|axis| decode_scale(cov[axis], extent[axis])),
                rotation,
            });
        }

        Ok((records, fallbacks))
    }

    /// Expand every anchor in sorted order.
    pub fn expand_all(&self) -> Result<Vec<GaussianRecord>> {
        let fallbacks = AtomicUsize::new(0);
        let per_anchor: Vec<Result<Vec<GaussianRecord>>> = (0..self.anchors.len())
            .into_par_iter()
            .map(|row| {
                let (records, used) = self.expand_anchor(row)?;
                fallbacks.fetch_add(used, Ordering::Relaxed);
                Ok(records)
            })
            .collect();
        // Sequential pass so the first failing anchor in sorted order is reported.
        let per_anchor = per_anchor.into_iter().collect::<Result<Vec<_>>>()?;

        let fallbacks = fallbacks.into_inner();
        if fallbacks > 0 {
            warn!(
                "{} gaussians had a zero-norm rotation; substituted the identity quaternion",
                fallbacks
            );
        }

        Ok(per_anchor.into_iter().flatten().collect())
    }

    /// Expanded records whose opacity exceeds the configured threshold.
    pub fn expand_filtered(&self) -> Result<Vec<GaussianRecord>> {
        let threshold = self.config.opacity_threshold;
        let mut records = self.expand_all()?;
        records.retain(|record| record.opacity > threshold);
        Ok(records)
    }
}
