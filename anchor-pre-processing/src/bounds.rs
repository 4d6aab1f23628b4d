/// Anchor coordinate bounds tracking
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Points per chunk for the parallel bounds reduction
const BOUNDS_CHUNK_SIZE: usize = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Default for AnchorBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorBounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    /// Component-wise min/max over all points, reduced in parallel chunks.
    pub fn from_points(points: &[[f32; 3]]) -> Self {
        points
            .par_chunks(BOUNDS_CHUNK_SIZE)
            .map(|chunk| {
                let mut local = Self::new();
                for point in chunk {
                    local.update(point);
                }
                local
            })
            .reduce_with(|mut a, b| {
                a.merge(&b);
                a
            })
            .unwrap_or_else(Self::new)
    }

    /// Update bounds with a new point
    pub fn update(&mut self, point: &[f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    pub fn merge(&mut self, other: &Self) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// True until at least one point has been added.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// Box midpoint, computed in single precision.
    pub fn midpoint(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }

    pub fn dimensions(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}
