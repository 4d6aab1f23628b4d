/// Pipeline parameters, defaulting to the shared constants
use crate::error::{ConvertError, Result};
use constants::{
    ANCHOR_FEATURE_DIM, DEFAULT_CAMERA_POSITION, GAUSSIANS_PER_ANCHOR, OCTREE_DEPTH_LIMIT,
    OCTREE_MAX_DEPTH, OPACITY_SENTINEL, OPACITY_THRESHOLD, SH_C0, VIEW_DIRECTION_DIM,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// What to do when the camera sits on an anchor or a rotation vector is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Abort the conversion with `DegenerateGeometry`.
    #[default]
    Fail,
    /// Use a zero view direction and the identity quaternion, logging a warning.
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Depth at which octree leaves collect anchors.
    pub max_depth: u32,
    /// Gaussians decoded from each anchor.
    pub gaussians_per_anchor: usize,
    /// Width of the latent feature stored per anchor.
    pub feature_dim: usize,
    /// Zeroth-order SH normalisation used for the DC colour term.
    pub sh_c0: f64,
    /// Opacity written when the raw model opacity is not positive.
    pub opacity_sentinel: f32,
    /// Gaussians must exceed this decoded opacity to reach the PLY output.
    pub opacity_threshold: f32,
    /// Camera used to build the view direction fed to the models.
    pub camera_position: [f32; 3],
    pub degenerate_policy: DegeneratePolicy,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_depth: OCTREE_MAX_DEPTH,
            gaussians_per_anchor: GAUSSIANS_PER_ANCHOR,
            feature_dim: ANCHOR_FEATURE_DIM,
            sh_c0: SH_C0,
            opacity_sentinel: OPACITY_SENTINEL,
            opacity_threshold: OPACITY_THRESHOLD,
            camera_position: DEFAULT_CAMERA_POSITION,
            degenerate_policy: DegeneratePolicy::Fail,
        }
    }
}

impl ConversionConfig {
    /// Load a JSON configuration; omitted keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ConvertError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth > OCTREE_DEPTH_LIMIT {
            return Err(ConvertError::Config(format!(
                "max_depth {} exceeds limit {}",
                self.max_depth, OCTREE_DEPTH_LIMIT
            )));
        }
        if self.gaussians_per_anchor == 0 {
            return Err(ConvertError::Config(
                "gaussians_per_anchor must be positive".into(),
            ));
        }
        if self.feature_dim == 0 {
            return Err(ConvertError::Config("feature_dim must be positive".into()));
        }
        if !self.sh_c0.is_finite() || self.sh_c0 == 0.0 {
            return Err(ConvertError::Config(format!(
                "sh_c0 must be finite and non-zero, got {}",
                self.sh_c0
            )));
        }
        if self.camera_position.iter().any(|c| !c.is_finite()) {
            return Err(ConvertError::Config(format!(
                "camera_position must be finite, got {:?}",
                self.camera_position
            )));
        }
        Ok(())
    }

    /// Width of a model input row: latent features plus view direction.
    pub fn model_input_dim(&self) -> usize {
        self.feature_dim + VIEW_DIRECTION_DIM
    }

    /// Offset values stored per anchor (one per axis and gaussian).
    pub fn offsets_per_anchor(&self) -> usize {
        3 * self.gaussians_per_anchor
    }
}
