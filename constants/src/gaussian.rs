/// Zeroth-order spherical harmonic normalisation constant
pub const SH_C0: f64 = 0.28209479177387814;

/// Number of gaussians decoded from every anchor
pub const GAUSSIANS_PER_ANCHOR: usize = 10;

/// Higher-order SH coefficients carried by the viewer layout (degree 3, RGB)
pub const SH_REST_COEFFS: usize = 45;

/// Opacity written for gaussians whose raw opacity is not positive
pub const OPACITY_SENTINEL: f32 = -100.0;

/// Gaussians at or below this decoded opacity are dropped from the PLY output
pub const OPACITY_THRESHOLD: f32 = -100.0;

/// Colour, covariance and opacity values produced per gaussian by the models
pub const COLOR_CHANNELS: usize = 3;
pub const COVARIANCE_COMPONENTS: usize = 7;
pub const OPACITY_COMPONENTS: usize = 1;

/// Floats per gaussian record in the viewer layout
pub const GAUSSIAN_RECORD_FLOATS: usize = 3 + 3 + COLOR_CHANNELS + SH_REST_COEFFS + 1 + 3 + 4;

/// Camera used for view-dependent decoding when none is given
pub const DEFAULT_CAMERA_POSITION: [f32; 3] = [0.0, 0.0, 0.0];
