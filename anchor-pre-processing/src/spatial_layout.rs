/// Octree spatial layout giving a locality-preserving anchor order
use crate::bounds::AnchorBounds;

/// Index of a node inside the octree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

impl NodeId {
    const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Octree node; only nodes at the maximum depth hold anchor indices.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub bounds: AnchorBounds,
    pub depth: u32,
    pub children: [Option<NodeId>; 8],
    pub indices: Vec<usize>,
}

impl OctreeNode {
    fn new(bounds: AnchorBounds, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            children: [None; 8],
            indices: Vec::new(),
        }
    }
}

/// Arena-backed octree over anchor positions.
/// Purely additive: nodes are created lazily on insert and never merged or removed.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    max_depth: u32,
    len: usize,
}

impl Octree {
    /// Create an empty tree whose root spans `bounds`.
    pub fn new(bounds: AnchorBounds, max_depth: u32) -> Self {
        Self {
            nodes: vec![OctreeNode::new(bounds, 0)],
            max_depth,
            len: 0,
        }
    }

    /// Build a tree over `points`, inserting them in index order.
    pub fn build(points: &[[f32; 3]], max_depth: u32) -> Self {
        let mut tree = Self::new(AnchorBounds::from_points(points), max_depth);
        for (index, point) in points.iter().enumerate() {
            tree.insert(point, index);
        }
        tree
    }

    /// Descend from the root to `max_depth`, creating missing children, and
    /// record `index` in the leaf reached.
    pub fn insert(&mut self, point: &[f32; 3], index: usize) {
        let mut current = NodeId::ROOT;

        loop {
            let node = &self.nodes[current.index()];
            if node.depth == self.max_depth {
                break;
            }

            let slot = octant(point, &node.bounds.midpoint());
            let existing = node.children[slot];
            current = match existing {
                Some(child) => child,
                None => {
                    let child_node =
                        OctreeNode::new(child_bounds(&node.bounds, slot), node.depth + 1);
                    let child = NodeId(self.nodes.len() as u32);
                    self.nodes.push(child_node);
                    self.nodes[current.index()].children[slot] = Some(child);
                    child
                }
            };
        }

        self.nodes[current.index()].indices.push(index);
        self.len += 1;
    }

    /// Depth-first order: children in ascending octant order, then the
    /// node's own indices.
    pub fn sorted_indices(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.len);
        let mut stack = vec![(NodeId::ROOT, 0usize)];

        while let Some(&(id, next)) = stack.last() {
            let node = &self.nodes[id.index()];
            match (next..8).find_map(|slot| node.children[slot].map(|child| (slot, child))) {
                Some((slot, child)) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 = slot + 1;
                    }
                    stack.push((child, 0));
                }
                None => {
                    order.extend_from_slice(&node.indices);
                    stack.pop();
                }
            }
        }

        order
    }

    pub fn root(&self) -> &OctreeNode {
        &self.nodes[NodeId::ROOT.index()]
    }

    pub fn node(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.index()]
    }

    /// Number of inserted anchors.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes at the maximum depth that received at least one anchor.
    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.depth == self.max_depth && !node.indices.is_empty())
            .count()
    }
}

/// Octant of `point` relative to `mid`: bit i is set when coordinate i >= mid[i].
pub fn octant(point: &[f32; 3], mid: &[f32; 3]) -> usize {
    let mut slot = 0;
    for axis in 0..3 {
        if point[axis] >= mid[axis] {
            slot |= 1 << axis;
        }
    }
    slot
}

/// Sub-box for `slot`: upper half on set bits, lower half otherwise.
pub fn child_bounds(bounds: &AnchorBounds, slot: usize) -> AnchorBounds {
    let mid = bounds.midpoint();
    let mut child = *bounds;
    for axis in 0..3 {
        if slot & (1 << axis) != 0 {
            child.min[axis] = mid[axis];
        } else {
            child.max[axis] = mid[axis];
        }
    }
    child
}

/// Permutation of `[0, points.len())` grouping spatially adjacent points.
pub fn spatial_order(points: &[[f32; 3]], max_depth: u32) -> Vec<usize> {
    Octree::build(points, max_depth).sorted_indices()
}
