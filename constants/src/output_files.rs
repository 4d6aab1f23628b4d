/// Flat binary outputs, raw little-endian f32 with no header
pub const ANCHOR_POSITIONS_FILE: &str = "anchor_positions.bin";
pub const GSPLAT_POSITIONS_FILE: &str = "gsplat_positions.bin";
pub const ANCHOR_SCALES_FILE: &str = "anchor_scales.bin";
pub const ANCHOR_FEATURES_FILE: &str = "anchor_features.bin";
pub const ANCHOR_LEVELS_FILE: &str = "anchor_levels.bin";
pub const ANCHOR_EXTRA_LEVELS_FILE: &str = "anchor_extra_levels.bin";
pub const ANCHOR_INFO_FILE: &str = "anchor_info.bin";

/// Summary written next to the flat outputs
pub const MANIFEST_FILE: &str = "manifest.json";

/// Default input and output names inside the source/output directories
pub const DEFAULT_INPUT_FILE: &str = "point_cloud.ply";
pub const DEFAULT_PLY_OUTPUT_FILE: &str = "output.ply";

/// Model weight files read by the MLP evaluator
pub const COLOR_MLP_FILE: &str = "color_mlp.json";
pub const COV_MLP_FILE: &str = "cov_mlp.json";
pub const OPACITY_MLP_FILE: &str = "opacity_mlp.json";
