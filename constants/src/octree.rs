/// Depth at which octree nodes collect anchor indices (8^5 = 32768 leaf cells)
pub const OCTREE_MAX_DEPTH: u32 = 5;

/// Upper bound accepted for a configured octree depth
pub const OCTREE_DEPTH_LIMIT: u32 = 16;
