//! SAH-based BVH builder and CPU traversal.
//!
//! Produces a flat node array for GPU upload:
//! - 32-byte nodes, root at index 0
//! - children of an internal node are adjacent (`right == left + 1`)
//! - leaves reference a contiguous range of the `indices` permutation

use bytemuck::{Pod, Zeroable};
use radiant_core::constants::RAY_EPSILON;
use radiant_core::{Aabb, Ray, Triangle};

/// Number of SAH bins per axis.
const NUM_BINS: usize = 16;

/// Nodes with at most this many triangles become leaves.
pub const LEAF_SIZE: usize = 4;

/// Traversal stack depth; matches `STACK_SIZE` in `path_trace.comp`.
///
/// Depth-first traversal holds at most one entry per tree level, so a tree
/// no deeper than this never overflows the stack.
pub const STACK_SIZE: usize = 64;

/// Deepest level at which SAH splits are tried. Below it only median splits
/// are made, which halve the range and add at most 32 more levels for any
/// `u32`-indexed triangle count.
const SAH_DEPTH: usize = STACK_SIZE - 32;

/// Flat BVH node.
///
/// Leaf: `count > 0`, `left_or_first` is the first slot in `Bvh::indices`.
/// Internal: `count == 0`, `left_or_first` is the left child index.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.aabb_min.into(), self.aabb_max.into())
    }

    fn leaf(bounds: &Aabb, first: usize, count: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first as u32,
            aabb_max: bounds.max.to_array(),
            count: count as u32,
        }
    }

    fn internal(bounds: &Aabb, left: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left as u32,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }
}

/// Closest hit found by [`Bvh::intersect`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhHit {
    pub t: f32,
    /// Index into the original triangle slice.
    pub triangle: u32,
    pub u: f32,
    pub v: f32,
}

/// Built BVH.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bvh {
    /// Flat node array (index 0 = root). Empty for an empty scene.
    pub nodes: Vec<BvhNode>,
    /// Leaf slot to original triangle index.
    pub indices: Vec<u32>,
}

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            bounds: Aabb::EMPTY,
            count: 0,
        }
    }
}

struct Task {
    node: usize,
    start: usize,
    end: usize, // exclusive
    depth: usize,
}

impl Bvh {
    /// Build a BVH over `triangles`.
    #[tracing::instrument(skip_all, fields(triangles = triangles.len()))]
    pub fn build(triangles: &[Triangle]) -> Self {
        Self::build_with_sah_depth(triangles, SAH_DEPTH)
    }

    fn build_with_sah_depth(triangles: &[Triangle], sah_depth: usize) -> Self {
        let n = triangles.len();
        if n == 0 {
            return Self::default();
        }

        let aabbs: Vec<Aabb> = triangles.iter().map(Triangle::aabb).collect();
        let centroids: Vec<[f32; 3]> = triangles.iter().map(|t| t.centroid().to_array()).collect();

        let mut indices: Vec<u32> = (0..n as u32).collect();
        let mut nodes = Vec::with_capacity(2 * n);
        nodes.push(BvhNode::zeroed());

        let mut stack = vec![Task {
            node: 0,
            start: 0,
            end: n,
            depth: 1,
        }];

        while let Some(task) = stack.pop() {
            let range = &mut indices[task.start..task.end];
            let count = range.len();

            let mut bounds = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for &i in range.iter() {
                bounds.grow(&aabbs[i as usize]);
                centroid_bounds.grow_point(centroids[i as usize].into());
            }

            if count <= LEAF_SIZE || task.depth >= STACK_SIZE {
                nodes[task.node] = BvhNode::leaf(&bounds, task.start, count);
                continue;
            }

            let split = (task.depth < sah_depth)
                .then(|| find_best_split(range, &aabbs, &centroids, &centroid_bounds))
                .flatten()
                .map(|(axis, pos)| partition(range, |&i| centroids[i as usize][axis] < pos))
                .filter(|&mid| mid > 0 && mid < count);
            let mid = split.unwrap_or_else(|| median_split(range, &centroids, &centroid_bounds));

            let left = nodes.len();
            nodes.push(BvhNode::zeroed());
            nodes.push(BvhNode::zeroed());
            nodes[task.node] = BvhNode::internal(&bounds, left);

            // Right first so the left subtree is built first
            stack.push(Task {
                node: left + 1,
                start: task.start + mid,
                end: task.end,
                depth: task.depth + 1,
            });
            stack.push(Task {
                node: left,
                start: task.start,
                end: task.start + mid,
                depth: task.depth + 1,
            });
        }

        tracing::debug!(nodes = nodes.len(), "BVH built");
        debug_assert!(Self::depth_of(&nodes) <= STACK_SIZE);
        Self { nodes, indices }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounds of the whole tree.
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::EMPTY, BvhNode::aabb)
    }

    /// Longest root-to-leaf path, counting nodes.
    pub fn depth(&self) -> usize {
        Self::depth_of(&self.nodes)
    }

    fn depth_of(nodes: &[BvhNode]) -> usize {
        if nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((index, depth)) = stack.pop() {
            let node = &nodes[index];
            if node.is_leaf() {
                max_depth = max_depth.max(depth);
            } else {
                let left = node.left_or_first as usize;
                stack.push((left, depth + 1));
                stack.push((left + 1, depth + 1));
            }
        }
        max_depth
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Closest triangle hit along `ray` within `(RAY_EPSILON, t_max)`.
    pub fn intersect(&self, triangles: &[Triangle], ray: &Ray, t_max: f32) -> Option<BvhHit> {
        let mut best = None;
        self.traverse(ray, t_max, |tri, limit| {
            if let Some((t, u, v)) = triangles[tri as usize].intersect(ray, RAY_EPSILON, *limit) {
                *limit = t;
                best = Some(BvhHit {
                    t,
                    triangle: tri,
                    u,
                    v,
                });
            }
            false
        });
        best
    }

    /// True if anything blocks `ray` before `t_max`.
    pub fn occluded(&self, triangles: &[Triangle], ray: &Ray, t_max: f32) -> bool {
        self.traverse(ray, t_max, |tri, limit| {
            triangles[tri as usize]
                .intersect(ray, RAY_EPSILON, *limit)
                .is_some()
        })
    }

    /// Visit leaf triangles in nodes the ray enters before `limit`.
    ///
    /// `visit` may shrink the limit and returns true to stop; the return
    /// value reports whether traversal stopped early.
    fn traverse(&self, ray: &Ray, mut limit: f32, mut visit: impl FnMut(u32, &mut f32) -> bool) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let inv_dir = ray.direction.recip();
        let mut stack = [0u32; STACK_SIZE];
        let mut sp = 1;

        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if node
                .aabb()
                .intersect_ray_inv(ray.origin, inv_dir, limit)
                .is_none()
            {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &tri in &self.indices[first..first + node.count as usize] {
                    if visit(tri, &mut limit) {
                        return true;
                    }
                }
            } else {
                debug_assert!(sp + 2 <= STACK_SIZE, "BVH deeper than the traversal stack");
                stack[sp] = node.left_or_first + 1;
                stack[sp + 1] = node.left_or_first;
                sp += 2;
            }
        }
        false
    }
}

/// Binned SAH search over all three axes.
///
/// Returns `(axis, split position)` or `None` when no finite split exists.
fn find_best_split(
    indices: &[u32],
    aabbs: &[Aabb],
    centroids: &[[f32; 3]],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    let mut best_cost = f32::INFINITY;

    for axis in 0..3 {
        let min = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - min;
        if extent <= 1.0e-8 || !extent.is_finite() {
            continue;
        }

        let mut bins = [Bin::default(); NUM_BINS];
        let scale = NUM_BINS as f32 / extent;
        for &i in indices {
            let bin = (((centroids[i as usize][axis] - min) * scale) as usize).min(NUM_BINS - 1);
            bins[bin].bounds.grow(&aabbs[i as usize]);
            bins[bin].count += 1;
        }

        // Prefix sweep from the left
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.surface_area();
            left_count[i] = sweep_count;
        }

        // Suffix sweep from the right, evaluating each plane
        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            if left_count[i - 1] == 0 || sweep_count == 0 {
                continue;
            }
            let cost = left_count[i - 1] as f32 * left_area[i - 1]
                + sweep_count as f32 * sweep.surface_area();
            if cost.is_finite() && cost < best_cost {
                best_cost = cost;
                best = Some((axis, min + i as f32 / scale));
            }
        }
    }

    best
}

/// Median split along the longest centroid axis; both halves are non-empty
/// for any range of two or more.
fn median_split(indices: &mut [u32], centroids: &[[f32; 3]], centroid_bounds: &Aabb) -> usize {
    let axis = centroid_bounds.longest_axis();
    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
    });
    mid
}

/// In-place partition; returns the number of elements satisfying `pred`.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut left = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            slice.swap(left, i);
            left += 1;
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn make_tri(x: f32, y: f32, z: f32) -> Triangle {
        Triangle::flat(
            Vec3::new(x, y, z),
            Vec3::new(x + 1.0, y, z),
            Vec3::new(x, y + 1.0, z),
            0,
        )
    }

    fn grid(n: usize) -> Vec<Triangle> {
        (0..n)
            .map(|i| make_tri((i % 10) as f32 * 2.0, (i / 10) as f32 * 2.0, (i % 7) as f32))
            .collect()
    }

    #[test]
    fn node_size() {
        assert_eq!(BvhNode::SIZE, 32);
    }

    #[test]
    fn empty_input_yields_empty_tree() {
        let bvh = Bvh::build(&[]);
        assert!(bvh.is_empty());
        assert_eq!(bvh.depth(), 0);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(bvh.intersect(&[], &ray, f32::MAX).is_none());
    }

    #[test]
    fn single_triangle_is_single_leaf() {
        let bvh = Bvh::build(&[make_tri(0.0, 0.0, 0.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.nodes[0].is_leaf());
        assert_eq!(bvh.nodes[0].count, 1);
        assert_eq!(bvh.indices, vec![0]);
    }

    #[test]
    fn children_lie_inside_parents() {
        let bvh = Bvh::build(&grid(200));
        for node in bvh.nodes.iter().filter(|n| !n.is_leaf()) {
            let parent = node.aabb();
            let left = node.left_or_first as usize;
            for child in [left, left + 1] {
                assert!(parent.contains(&bvh.nodes[child].aabb()));
            }
        }
    }

    #[test]
    fn leaves_cover_every_triangle_once() {
        let tris = grid(137);
        let bvh = Bvh::build(&tris);

        let mut seen = vec![0u32; tris.len()];
        for leaf in bvh.nodes.iter().filter(|n| n.is_leaf()) {
            assert!(leaf.count as usize <= LEAF_SIZE);
            let first = leaf.left_or_first as usize;
            for &tri in &bvh.indices[first..first + leaf.count as usize] {
                seen[tri as usize] += 1;
                assert!(leaf.aabb().contains(&tris[tri as usize].aabb()));
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn build_is_deterministic() {
        let tris = grid(300);
        assert_eq!(Bvh::build(&tris), Bvh::build(&tris));
    }

    #[test]
    fn coincident_centroids_fall_back_to_median() {
        let tris: Vec<Triangle> = (0..33).map(|_| make_tri(0.0, 0.0, 0.0)).collect();
        let bvh = Bvh::build(&tris);
        assert!(bvh.leaf_count() >= 33 / LEAF_SIZE);
        assert!(bvh.nodes.iter().all(|n| !n.is_leaf() || n.count as usize <= LEAF_SIZE));
    }

    #[test]
    fn intersect_matches_brute_force() {
        let tris = grid(100);
        let bvh = Bvh::build(&tris);
        for i in 0..50 {
            let origin = Vec3::new(i as f32 * 0.37, i as f32 * 0.23, -10.0);
            let ray = Ray::new(origin, Vec3::new(0.05, 0.02, 1.0));
            let brute = tris
                .iter()
                .filter_map(|t| t.intersect(&ray, RAY_EPSILON, f32::MAX))
                .map(|(t, _, _)| t)
                .fold(f32::INFINITY, f32::min);
            let hit = bvh.intersect(&tris, &ray, f32::MAX);
            match hit {
                Some(hit) => approx::assert_relative_eq!(hit.t, brute, epsilon = 1e-4),
                None => assert!(brute.is_infinite()),
            }
            assert_eq!(bvh.occluded(&tris, &ray, f32::MAX), brute.is_finite());
        }
    }

    /// Triangles spaced geometrically along x, each larger than the last.
    fn stretched(n: usize, base: f32) -> Vec<Triangle> {
        (0..n)
            .map(|i| {
                let x = base.powi(i as i32);
                let size = 0.1 * x;
                Triangle::flat(
                    Vec3::new(x, 0.0, 0.0),
                    Vec3::new(x + size, 0.0, 0.0),
                    Vec3::new(x, size, 0.0),
                    0,
                )
            })
            .collect()
    }

    fn assert_every_triangle_found(bvh: &Bvh, tris: &[Triangle], checked: usize) {
        for (i, tri) in tris.iter().take(checked).enumerate() {
            let size = tri.positions[1].x - tri.positions[0].x;
            let origin = Vec3::new(tri.positions[0].x + 0.2 * size, 0.2 * size, -1.0);
            let ray = Ray::new(origin, Vec3::Z);
            let hit = bvh.intersect(tris, &ray, f32::MAX).expect("triangle missed");
            assert_eq!(hit.triangle as usize, i);
            assert!(bvh.occluded(tris, &ray, 2.0));
        }
    }

    #[test]
    fn stretched_layout_stays_within_traversal_stack() {
        let tris = stretched(160, 1.3);
        let bvh = Bvh::build(&tris);
        assert!(bvh.depth() <= STACK_SIZE);
        assert_every_triangle_found(&bvh, &tris, 100);
    }

    #[test]
    fn median_splits_below_sah_depth_bound_the_tree() {
        let tris = stretched(160, 1.3);
        let bvh = Bvh::build_with_sah_depth(&tris, 3);
        // Three SAH levels, then halving: ceil(log2(160 / 4)) + 1 more at most
        assert!(bvh.depth() <= 3 + 7, "depth {}", bvh.depth());
        assert!(bvh.nodes.iter().all(|n| !n.is_leaf() || n.count as usize <= LEAF_SIZE));
        assert_every_triangle_found(&bvh, &tris, 100);
    }

    #[test]
    fn occlusion_respects_distance() {
        let tris = vec![make_tri(0.0, 0.0, 5.0)];
        let bvh = Bvh::build(&tris);
        let ray = Ray::new(Vec3::new(0.25, 0.25, 0.0), Vec3::Z);
        assert!(bvh.occluded(&tris, &ray, 10.0));
        assert!(!bvh.occluded(&tris, &ray, 4.0));
    }
}
