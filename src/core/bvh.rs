use crate::math::{intersect_aabb, Ray, AABB};
use glam::Vec3;
use log::debug;

/// How interior nodes choose their split plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    /// Split at the centroid median of the longest axis
    Median,
    /// Binned surface area heuristic
    Sah,
}

/// Build parameters, derived from the configured geometry quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhConfig {
    pub max_leaf_size: usize,
    pub sah_buckets: usize,
    pub split: SplitMethod,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            sah_buckets: 12,
            split: SplitMethod::Sah,
        }
    }
}

/// Node capacity needed to hold a binary BVH over `primitives` leaves
pub fn bvh_node_capacity(primitives: usize) -> usize {
    (2 * primitives).saturating_sub(1).max(1)
}

/// BVH node using compact representation
#[derive(Clone, Debug)]
pub enum BVHNode {
    Leaf {
        bounds: AABB,
        primitive_indices: Vec<u32>,
    },
    Internal {
        bounds: AABB,
        left: Box<BVHNode>,
        right: Box<BVHNode>,
    },
}

/// Primitive trait for objects that can be inserted into BVH
pub trait BVHPrimitive {
    fn bounds(&self) -> AABB;
    fn centroid(&self) -> Vec3 {
        self.bounds().center()
    }
}

impl BVHPrimitive for AABB {
    fn bounds(&self) -> AABB {
        *self
    }
}

/// BVH build statistics for profiling
#[derive(Debug, Clone, Copy, Default)]
pub struct BVHStats {
    pub num_nodes: usize,
    pub num_leaves: usize,
    pub max_depth: usize,
    pub total_primitives: usize,
    pub avg_leaf_size: f32,
}

impl BVHNode {
    /// Build a BVH over `primitives`. An empty input yields an empty leaf.
    pub fn build<P: BVHPrimitive>(primitives: &[P], config: &BvhConfig) -> Self {
        let indices: Vec<u32> = (0..primitives.len() as u32).collect();
        if indices.is_empty() {
            return BVHNode::Leaf {
                bounds: AABB::EMPTY,
                primitive_indices: indices,
            };
        }
        Self::build_recursive(primitives, indices, config)
    }

    fn build_recursive<P: BVHPrimitive>(primitives: &[P], mut indices: Vec<u32>, config: &BvhConfig) -> Self {
        let bounds = indices
            .iter()
            .fold(AABB::EMPTY, |acc, &idx| acc.union(&primitives[idx as usize].bounds()));

        if indices.len() <= config.max_leaf_size.max(1) {
            return BVHNode::Leaf {
                bounds,
                primitive_indices: indices,
            };
        }

        let mid = match config.split {
            SplitMethod::Sah => {
                let (split_axis, split_pos) =
                    Self::find_best_split(primitives, &indices, config.sah_buckets.max(2));
                Self::partition_primitives(primitives, &mut indices, split_axis, split_pos)
            }
            SplitMethod::Median => Self::median_split(primitives, &mut indices),
        };

        // Degenerate centroids: fall back to an even split so deep nodes
        // still shrink
        let mid = if mid == 0 || mid == indices.len() {
            indices.len() / 2
        } else {
            mid
        };

        let right_indices = indices.split_off(mid);
        let left = Box::new(Self::build_recursive(primitives, indices, config));
        let right = Box::new(Self::build_recursive(primitives, right_indices, config));

        BVHNode::Internal {
            bounds,
            left,
            right,
        }
    }

    fn centroid_bounds<P: BVHPrimitive>(primitives: &[P], indices: &[u32]) -> AABB {
        let mut bounds = AABB::EMPTY;
        for &idx in indices {
            bounds.grow_point(primitives[idx as usize].centroid());
        }
        bounds
    }

    fn median_split<P: BVHPrimitive>(primitives: &[P], indices: &mut [u32]) -> usize {
        let extent = Self::centroid_bounds(primitives, indices).extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let mid = indices.len() / 2;
        indices.select_nth_unstable_by(mid, |&a, &b| {
            let ca = primitives[a as usize].centroid()[axis];
            let cb = primitives[b as usize].centroid()[axis];
            ca.total_cmp(&cb)
        });
        mid
    }

    /// Find best split using binned SAH over the centroid bounds
    fn find_best_split<P: BVHPrimitive>(primitives: &[P], indices: &[u32], buckets: usize) -> (usize, f32) {
        let centroid_bounds = Self::centroid_bounds(primitives, indices);
        let mut best_cost = f32::INFINITY;
        let mut best_axis = 0;
        let mut best_pos = centroid_bounds.center()[0];

        for axis in 0..3 {
            let (cost, pos) = Self::evaluate_sah_axis(primitives, indices, &centroid_bounds, axis, buckets);
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = pos;
            }
        }

        (best_axis, best_pos)
    }

    /// Evaluate SAH cost for a given axis using binning
    fn evaluate_sah_axis<P: BVHPrimitive>(
        primitives: &[P],
        indices: &[u32],
        centroid_bounds: &AABB,
        axis: usize,
        buckets: usize,
    ) -> (f32, f32) {
        let mut bucket_bounds: Vec<Option<AABB>> = vec![None; buckets];
        let mut bucket_counts = vec![0; buckets];

        let axis_extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if axis_extent < 1e-6 {
            return (f32::INFINITY, 0.0);
        }

        for &idx in indices {
            let centroid = primitives[idx as usize].centroid();
            let offset = (centroid[axis] - centroid_bounds.min[axis]) / axis_extent;
            let bucket_idx = ((offset * buckets as f32) as usize).min(buckets - 1);

            bucket_counts[bucket_idx] += 1;
            let prim_bounds = primitives[idx as usize].bounds();
            bucket_bounds[bucket_idx] = Some(match bucket_bounds[bucket_idx] {
                Some(b) => b.union(&prim_bounds),
                None => prim_bounds,
            });
        }

        let mut best_cost = f32::INFINITY;
        let mut best_split = 0;

        for split in 1..buckets {
            let (left_bounds, left_count) = Self::accumulate_buckets(&bucket_bounds, &bucket_counts, 0, split);
            let (right_bounds, right_count) =
                Self::accumulate_buckets(&bucket_bounds, &bucket_counts, split, buckets);

            if let (Some(lb), Some(rb)) = (left_bounds, right_bounds) {
                let cost = Self::sah_cost(lb.surface_area(), left_count, rb.surface_area(), right_count);
                if cost < best_cost {
                    best_cost = cost;
                    best_split = split;
                }
            }
        }

        let split_pos = centroid_bounds.min[axis] + (best_split as f32 / buckets as f32) * axis_extent;

        (best_cost, split_pos)
    }

    fn accumulate_buckets(
        bucket_bounds: &[Option<AABB>],
        bucket_counts: &[usize],
        start: usize,
        end: usize,
    ) -> (Option<AABB>, usize) {
        let mut combined_bounds: Option<AABB> = None;
        let mut total_count = 0;

        for i in start..end {
            if let Some(bounds) = bucket_bounds[i] {
                combined_bounds = Some(match combined_bounds {
                    Some(b) => b.union(&bounds),
                    None => bounds,
                });
                total_count += bucket_counts[i];
            }
        }

        (combined_bounds, total_count)
    }

    /// SAH cost function
    fn sah_cost(left_area: f32, left_count: usize, right_area: f32, right_count: usize) -> f32 {
        const TRAVERSAL_COST: f32 = 0.125;
        const INTERSECTION_COST: f32 = 1.0;

        TRAVERSAL_COST + INTERSECTION_COST * (left_area * left_count as f32 + right_area * right_count as f32)
    }

    /// Partition primitives along axis at split position
    fn partition_primitives<P: BVHPrimitive>(
        primitives: &[P],
        indices: &mut [u32],
        axis: usize,
        split_pos: f32,
    ) -> usize {
        let mut left = 0;
        let mut right = indices.len();

        while left < right {
            let centroid = primitives[indices[left] as usize].centroid();
            if centroid[axis] < split_pos {
                left += 1;
            } else {
                right -= 1;
                indices.swap(left, right);
            }
        }

        left
    }

    /// Get bounding box for this node
    pub fn bounds(&self) -> &AABB {
        match self {
            BVHNode::Leaf { bounds, .. } => bounds,
            BVHNode::Internal { bounds, .. } => bounds,
        }
    }

    /// Gather statistics about the BVH
    pub fn stats(&self) -> BVHStats {
        let mut stats = BVHStats::default();
        self.gather_stats(&mut stats, 0);

        if stats.num_leaves > 0 {
            stats.avg_leaf_size = stats.total_primitives as f32 / stats.num_leaves as f32;
        }

        stats
    }

    fn gather_stats(&self, stats: &mut BVHStats, depth: usize) {
        stats.num_nodes += 1;
        stats.max_depth = stats.max_depth.max(depth);

        match self {
            BVHNode::Leaf { primitive_indices, .. } => {
                stats.num_leaves += 1;
                stats.total_primitives += primitive_indices.len();
            }
            BVHNode::Internal { left, right, .. } => {
                left.gather_stats(stats, depth + 1);
                right.gather_stats(stats, depth + 1);
            }
        }
    }

    /// Flatten to a depth-first node array plus the leaf-ordered primitive
    /// indices the leaves point into
    pub fn flatten(&self) -> FlatBvh {
        let mut flat = FlatBvh::default();
        self.flatten_recursive(&mut flat);
        flat
    }

    fn flatten_recursive(&self, flat: &mut FlatBvh) -> u32 {
        let node_idx = flat.nodes.len() as u32;

        match self {
            BVHNode::Leaf {
                bounds,
                primitive_indices,
            } => {
                flat.nodes.push(FlatBVHNode {
                    bounds_min: bounds.min.to_array(),
                    prim_count: primitive_indices.len() as u32,
                    bounds_max: bounds.max.to_array(),
                    prim_offset: flat.indices.len() as u32,
                });
                flat.indices.extend_from_slice(primitive_indices);
            }
            BVHNode::Internal { bounds, left, right } => {
                flat.nodes.push(FlatBVHNode::default());
                left.flatten_recursive(flat);
                let right_idx = right.flatten_recursive(flat);

                flat.nodes[node_idx as usize] = FlatBVHNode {
                    bounds_min: bounds.min.to_array(),
                    prim_count: 0,
                    bounds_max: bounds.max.to_array(),
                    prim_offset: right_idx,
                };
            }
        }

        node_idx
    }
}

/// GPU-friendly flat BVH node representation
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FlatBVHNode {
    pub bounds_min: [f32; 3],
    pub prim_count: u32,      // 0 = internal node, >0 = leaf with count
    pub bounds_max: [f32; 3],
    pub prim_offset: u32,     // For leaf: offset into indices, for internal: right child
}

/// Linearised BVH. The left child of an internal node is the next node.
#[derive(Clone, Debug, Default)]
pub struct FlatBvh {
    pub nodes: Vec<FlatBVHNode>,
    pub indices: Vec<u32>,
}

impl FlatBvh {
    pub fn build<P: BVHPrimitive>(primitives: &[P], config: &BvhConfig) -> Self {
        let root = BVHNode::build(primitives, config);
        if log::log_enabled!(log::Level::Debug) {
            let stats = root.stats();
            debug!(
                "bvh: {} primitives, {} nodes, {} leaves, depth {}, {:.1} per leaf",
                stats.total_primitives, stats.num_nodes, stats.num_leaves, stats.max_depth, stats.avg_leaf_size
            );
        }
        root.flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn bounds(&self) -> AABB {
        match self.nodes.first() {
            Some(root) if !self.indices.is_empty() => AABB::new(
                Vec3::from_array(root.bounds_min),
                Vec3::from_array(root.bounds_max),
            ),
            _ => AABB::EMPTY,
        }
    }

    /// Closest hit along `ray` up to `t_max`.
    ///
    /// `test` is called with a primitive index and the current closest
    /// distance and returns the hit distance if the primitive is hit closer.
    pub fn intersect<F>(&self, ray: &Ray, t_max: f32, mut test: F) -> Option<(u32, f32)>
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        if self.is_empty() {
            return None;
        }

        let mut closest: Option<(u32, f32)> = None;
        let mut limit = t_max;
        let mut stack = Vec::with_capacity(64);
        stack.push(0u32);

        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            let t_box = intersect_aabb(
                ray.origin,
                ray.direction,
                Vec3::from_array(node.bounds_min),
                Vec3::from_array(node.bounds_max),
            );
            if t_box < 0.0 && !Self::origin_inside(ray.origin, node) {
                continue;
            }
            if t_box > limit {
                continue;
            }

            if node.prim_count > 0 {
                let start = node.prim_offset as usize;
                for &prim in &self.indices[start..start + node.prim_count as usize] {
                    if let Some(t) = test(prim, limit) {
                        if t < limit {
                            limit = t;
                            closest = Some((prim, t));
                        }
                    }
                }
            } else {
                stack.push(node.prim_offset);
                stack.push(node_idx + 1);
            }
        }

        closest
    }

    fn origin_inside(origin: Vec3, node: &FlatBVHNode) -> bool {
        AABB::new(Vec3::from_array(node.bounds_min), Vec3::from_array(node.bounds_max)).contains_point(origin)
    }
}
