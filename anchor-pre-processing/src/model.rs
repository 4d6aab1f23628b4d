/// Numeric model boundary: colour, covariance and opacity predictors
/// evaluated over the whole batch of anchor feature rows.
use crate::error::{ConvertError, Result};
use constants::{
    COLOR_CHANNELS, COLOR_MLP_FILE, COV_MLP_FILE, COVARIANCE_COMPONENTS, OPACITY_COMPONENTS,
    OPACITY_MLP_FILE,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Row-major batch of model inputs.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBatch<'a> {
    pub rows: &'a [f32],
    pub width: usize,
}

impl<'a> FeatureBatch<'a> {
    pub fn new(rows: &'a [f32], width: usize) -> Self {
        Self { rows, width }
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.rows.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three predictors. Each input row yields the values for every
/// gaussian of that anchor, gaussian-major: `k * 3` colours, `k * 7`
/// covariance components and `k` opacities per row.
pub trait ModelEvaluator {
    fn color(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>>;
    fn covariance(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>>;
    fn opacity(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>>;
}

/// Model outputs for a batch, checked against the expected shapes.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    pub color: Vec<f32>,
    pub covariance: Vec<f32>,
    pub opacity: Vec<f32>,
}

impl ModelOutputs {
    /// Run all three predictors once over `batch`.
    pub fn evaluate<M: ModelEvaluator + ?Sized>(
        model: &M,
        batch: FeatureBatch<'_>,
        gaussians_per_anchor: usize,
    ) -> Result<Self> {
        let anchors = batch.len();
        let color = model.color(batch)?;
        let covariance = model.covariance(batch)?;
        let opacity = model.opacity(batch)?;

        check_len("color", &color, anchors * gaussians_per_anchor * COLOR_CHANNELS)?;
        check_len(
            "covariance",
            &covariance,
            anchors * gaussians_per_anchor * COVARIANCE_COMPONENTS,
        )?;
        check_len(
            "opacity",
            &opacity,
            anchors * gaussians_per_anchor * OPACITY_COMPONENTS,
        )?;

        Ok(Self {
            color,
            covariance,
            opacity,
        })
    }
}

fn check_len(model: &str, values: &[f32], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(ConvertError::model(
            model,
            format!("produced {} values, expected {}", values.len(), expected),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Identity => x,
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }
}

/// Fully connected layer, `weights[out][in]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn outputs(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f32], output: &mut Vec<f32>) {
        output.clear();
        output.extend(self.weights.iter().zip(&self.bias).map(|(row, bias)| {
            let sum: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
            self.activation.apply(sum + bias)
        }));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    pub layers: Vec<DenseLayer>,
}

impl Mlp {
    /// Load layer weights from JSON and check the layer shapes chain from
    /// `input_dim` to `output_dim`.
    pub fn load(path: &Path, input_dim: usize, output_dim: usize) -> Result<Self> {
        let name = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        let mlp: Self = serde_json::from_str(&text)
            .map_err(|e| ConvertError::model(name.as_str(), format!("invalid weights: {}", e)))?;
        mlp.validate(&name, input_dim, output_dim)?;
        Ok(mlp)
    }

    pub fn validate(&self, name: &str, input_dim: usize, output_dim: usize) -> Result<()> {
        if self.layers.is_empty() {
            return Err(ConvertError::model(name, "no layers"));
        }

        let mut width = input_dim;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(ConvertError::model(
                    name,
                    format!("layer {} expects {} inputs", idx, width),
                ));
            }
            if layer.bias.len() != layer.outputs() {
                return Err(ConvertError::model(
                    name,
                    format!(
                        "layer {} has {} biases for {} outputs",
                        idx,
                        layer.bias.len(),
                        layer.outputs()
                    ),
                ));
            }
            width = layer.outputs();
        }

        if width != output_dim {
            return Err(ConvertError::model(
                name,
                format!("produces {} outputs, expected {}", width, output_dim),
            ));
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::outputs)
    }

    /// Evaluate every row independently, in parallel, preserving row order.
    pub fn forward_batch(&self, batch: FeatureBatch<'_>) -> Vec<f32> {
        let out_dim = self.output_dim();
        let mut output = vec![0.0f32; batch.len() * out_dim];
        if out_dim == 0 || batch.width == 0 {
            return output;
        }

        output
            .par_chunks_mut(out_dim)
            .zip(batch.rows.par_chunks(batch.width))
            .for_each_init(
                || (Vec::new(), Vec::new()),
                |(current, next), (out, row)| {
                    current.clear();
                    current.extend_from_slice(row);
                    for layer in &self.layers {
                        layer.forward(current, next);
                        std::mem::swap(current, next);
                    }
                    out.copy_from_slice(current);
                },
            );

        output
    }
}

/// CPU evaluator backed by three dense MLPs.
#[derive(Debug, Clone)]
pub struct MlpEvaluator {
    pub color: Mlp,
    pub covariance: Mlp,
    pub opacity: Mlp,
}

impl MlpEvaluator {
    /// Load `color_mlp.json`, `cov_mlp.json` and `opacity_mlp.json` from `dir`.
    pub fn load_dir(dir: &Path, input_dim: usize, gaussians_per_anchor: usize) -> Result<Self> {
        Ok(Self {
            color: Mlp::load(
                &dir.join(COLOR_MLP_FILE),
                input_dim,
                gaussians_per_anchor * COLOR_CHANNELS,
            )?,
            covariance: Mlp::load(
                &dir.join(COV_MLP_FILE),
                input_dim,
                gaussians_per_anchor * COVARIANCE_COMPONENTS,
            )?,
            opacity: Mlp::load(
                &dir.join(OPACITY_MLP_FILE),
                input_dim,
                gaussians_per_anchor * OPACITY_COMPONENTS,
            )?,
        })
    }

    fn run(&self, name: &str, mlp: &Mlp, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        if batch.width != mlp.input_dim() {
            return Err(ConvertError::model(
                name,
                format!(
                    "input rows have width {}, model expects {}",
                    batch.width,
                    mlp.input_dim()
                ),
            ));
        }
        let output = mlp.forward_batch(batch);
        if let Some(position) = output.iter().position(|v| !v.is_finite()) {
            return Err(ConvertError::model(
                name,
                format!("non-finite output for anchor row {}", position / mlp.output_dim()),
            ));
        }
        Ok(output)
    }
}

impl ModelEvaluator for MlpEvaluator {
    fn color(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        self.run("color", &self.color, batch)
    }

    fn covariance(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        self.run("covariance", &self.covariance, batch)
    }

    fn opacity(&self, batch: FeatureBatch<'_>) -> Result<Vec<f32>> {
        self.run("opacity", &self.opacity, batch)
    }
}
