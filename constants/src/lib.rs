/// Shared constants for the anchor conversion pipeline
pub mod anchor_layout;
pub mod gaussian;
pub mod octree;
pub mod output_files;

pub use anchor_layout::*;
pub use gaussian::*;
pub use octree::*;
pub use output_files::*;
