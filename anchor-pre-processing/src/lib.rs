/// Anchor point-cloud conversion: spatial ordering, model-driven gaussian
/// expansion and packing into viewer formats.
pub mod anchors;
pub mod bin_writer;
pub mod bounds;
pub mod config;
pub mod converter;
pub mod error;
pub mod expansion;
pub mod manifest;
pub mod model;
pub mod packer;
pub mod ply;
pub mod spatial_layout;

pub use anchors::{AnchorStore, SortedAnchors};
pub use bounds::AnchorBounds;
pub use config::{ConversionConfig, DegeneratePolicy};
pub use converter::{AnchorConverter, LoadedAnchors};
pub use error::{ConvertError, Result};
pub use expansion::{GaussianExpander, GaussianRecord};
pub use manifest::ConversionManifest;
pub use model::{FeatureBatch, MlpEvaluator, ModelEvaluator, ModelOutputs};
pub use spatial_layout::{Octree, spatial_order};
