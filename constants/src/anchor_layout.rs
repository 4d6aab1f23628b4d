/// Latent feature width stored per anchor
pub const ANCHOR_FEATURE_DIM: usize = 32;

/// Scale components per anchor: three offset scales followed by three extents
pub const ANCHOR_SCALE_COUNT: usize = 6;

/// View direction components appended to the feature vector
pub const VIEW_DIRECTION_DIM: usize = 3;

/// Values in the anchor info header block
pub const ANCHOR_INFO_LEN: usize = 2;

/// Input container field names
pub const POSITION_FIELDS: [&str; 3] = ["x", "y", "z"];
pub const LEVEL_FIELD: &str = "level";
pub const EXTRA_LEVEL_FIELD: &str = "extra_level";
pub const INFO_FIELD: &str = "info";
pub const SCALE_PREFIX: &str = "scale_";
pub const FEATURE_PREFIX: &str = "f_anchor_feat_";
pub const OFFSET_PREFIX: &str = "f_offset_";

/// Element holding the anchors in the input container
pub const VERTEX_ELEMENT: &str = "vertex";
