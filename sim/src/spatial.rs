//! Spatial partitioning for proximity and visibility queries.
//!
//! An octree over combatant positions. Nodes live in a flat arena and each
//! combatant keeps a back-reference to the node that owns it, so removal and
//! small moves touch a single node instead of walking the tree.
//!
//! ## Performance
//!
//! - Radius / frustum queries prune whole subtrees with sphere-box and
//!   plane-box tests.
//! - `update_position` refreshes the stored position in place for moves under
//!   1m that stay inside the owning node.
//! - Removal folds a node's children back into it once all eight are empty
//!   leaves. Freed child blocks are reused by later subdivisions.
//! - k-nearest is best-first over node distance with a bounded result heap.

use bevy_ecs::prelude::*;
use glam::Vec3;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::components::CombatantId;
use crate::error::{SimError, SimResult};
use crate::geometry::{Aabb, Frustum, Ray};

/// Leaf capacity before a node subdivides.
pub const DEFAULT_NODE_CAPACITY: usize = 8;
/// Maximum subdivision depth.
pub const DEFAULT_MAX_DEPTH: u8 = 8;
/// Upper bound on the lateral tolerance of a ray query.
pub const MAX_RAY_TOLERANCE: f32 = 5.0;
/// Moves shorter than this may be applied in place.
const IN_PLACE_MOVE: f32 = 1.0;

/// Candidate returned by a ray query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCandidate {
    pub id: CombatantId,
    /// Distance along the ray to the closest approach.
    pub t: f32,
    /// Perpendicular distance from the ray.
    pub lateral: f32,
}

/// Read-only query surface used by AI and combat.
///
/// Implemented by [`SpatialIndex`]; tests can substitute a brute-force list.
pub trait SpatialQuery {
    /// Ids within `radius` of `center` (unordered).
    fn query_radius(&self, center: Vec3, radius: f32) -> SimResult<Vec<CombatantId>>;

    /// Ids within `tolerance` of the ray and `max_distance` along it,
    /// sorted by distance along the ray.
    fn query_ray(&self, ray: &Ray, max_distance: f32, tolerance: f32) -> SimResult<Vec<RayCandidate>>;

    /// Ids inside the frustum.
    fn query_frustum(&self, frustum: &Frustum) -> SimResult<Vec<CombatantId>>;

    /// Up to `k` ids within `max_distance` of `point`, nearest first.
    fn query_nearest(&self, point: Vec3, k: usize, max_distance: f32) -> SimResult<Vec<CombatantId>>;

    /// Indexed position of `id`.
    fn position_of(&self, id: CombatantId) -> Option<Vec3>;
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    depth: u8,
    parent: Option<usize>,
    items: Vec<CombatantId>,
    children: Option<[usize; 8]>,
}

impl Node {
    fn new(bounds: Aabb, depth: u8, parent: Option<usize>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            items: Vec::new(),
            children: None,
        }
    }

    fn is_empty_leaf(&self) -> bool {
        self.children.is_none() && self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    position: Vec3,
    node: usize,
}

/// Octree spatial index over combatant positions.
#[derive(Resource, Debug, Default)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    /// First slot of each detached block of eight nodes.
    free_blocks: Vec<usize>,
    entries: HashMap<CombatantId, Entry>,
    capacity: usize,
    max_depth: u8,
    built: bool,
}

/// Octant of `p` inside `bounds`, or `None` when it lies on a split plane.
fn child_octant(bounds: &Aabb, p: Vec3) -> Option<usize> {
    let c = bounds.center();
    if p.x == c.x || p.y == c.y || p.z == c.z {
        return None;
    }
    let mut index = 0;
    if p.x > c.x {
        index |= 1;
    }
    if p.y > c.y {
        index |= 2;
    }
    if p.z > c.z {
        index |= 4;
    }
    Some(index)
}

impl SpatialIndex {
    /// Create an index covering `bounds`.
    pub fn new(bounds: Aabb, capacity: usize, max_depth: u8) -> Self {
        let mut index = Self::default();
        index.initialize(bounds, capacity, max_depth);
        index
    }

    /// Cube of half-extent `half` centred on the origin with default tuning.
    pub fn with_half_extent(half: f32) -> Self {
        Self::new(Aabb::cube(half), DEFAULT_NODE_CAPACITY, DEFAULT_MAX_DEPTH)
    }

    /// (Re)initialise the tree, dropping every entry.
    pub fn initialize(&mut self, bounds: Aabb, capacity: usize, max_depth: u8) {
        self.nodes.clear();
        self.nodes.push(Node::new(bounds, 0, None));
        self.free_blocks.clear();
        self.entries.clear();
        self.capacity = capacity.max(1);
        self.max_depth = max_depth;
        self.built = true;
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.built
    }

    fn ensure_built(&self) -> SimResult<()> {
        if self.built {
            Ok(())
        } else {
            Err(SimError::IndexNotBuilt)
        }
    }

    /// Root bounds.
    pub fn bounds(&self) -> Option<Aabb> {
        self.nodes.first().map(|n| n.bounds)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nodes currently reachable from the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_blocks.len() * 8
    }

    pub fn contains(&self, id: CombatantId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop every entry but keep the bounds.
    pub fn clear(&mut self) {
        if let Some(root) = self.nodes.first().map(|n| n.bounds) {
            self.nodes.clear();
            self.nodes.push(Node::new(root, 0, None));
        }
        self.free_blocks.clear();
        self.entries.clear();
    }

    /// Insert (or move) `id`. The position is clamped into the root bounds.
    pub fn insert(&mut self, id: CombatantId, position: Vec3) -> SimResult<()> {
        self.ensure_built()?;
        if self.entries.contains_key(&id) {
            self.remove(id);
        }
        let position = self.nodes[0].bounds.clamp_point(position);
        self.entries.insert(id, Entry { position, node: 0 });
        let node = self.insert_at(0, id, position);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.node = node;
        }
        Ok(())
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove(&mut self, id: CombatantId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                if let Some(node) = self.nodes.get_mut(entry.node) {
                    node.items.retain(|&other| other != id);
                }
                self.collapse_from(entry.node);
                true
            }
            None => false,
        }
    }

    /// Move `id` to `position`, inserting it if unknown.
    pub fn update_position(&mut self, id: CombatantId, position: Vec3) -> SimResult<()> {
        self.ensure_built()?;
        let position = self.nodes[0].bounds.clamp_point(position);
        if let Some(entry) = self.entries.get_mut(&id) {
            let owner = &self.nodes[entry.node];
            if entry.position.distance_squared(position) < IN_PLACE_MOVE * IN_PLACE_MOVE
                && owner.bounds.contains(position)
            {
                entry.position = position;
                return Ok(());
            }
        }
        self.insert(id, position)
    }

    /// Descend from `node` and store `id`; returns the owning node.
    fn insert_at(&mut self, mut node: usize, id: CombatantId, position: Vec3) -> usize {
        while let Some(children) = self.nodes[node].children {
            match child_octant(&self.nodes[node].bounds, position) {
                Some(octant) => node = children[octant],
                None => break,
            }
        }

        self.nodes[node].items.push(id);
        let current = &self.nodes[node];
        if current.children.is_none()
            && current.items.len() > self.capacity
            && current.depth < self.max_depth
        {
            return self.subdivide(node, id);
        }
        node
    }

    /// Walk up from `node`, detaching children that are all empty leaves.
    fn collapse_from(&mut self, node: usize) {
        let mut current = Some(node);
        while let Some(index) = current {
            let Some(node) = self.nodes.get(index) else {
                return;
            };
            if let Some(children) = node.children {
                if !children.iter().all(|&c| self.nodes[c].is_empty_leaf()) {
                    return;
                }
                self.nodes[index].children = None;
                self.free_blocks.push(children[0]);
            }
            current = self.nodes[index].parent;
        }
    }

    /// Split a leaf and push its items down. Returns the new owner of `tracked`.
    fn subdivide(&mut self, node: usize, tracked: CombatantId) -> usize {
        let bounds = self.nodes[node].bounds;
        let depth = self.nodes[node].depth + 1;
        let children = (0..8).map(|octant| Node::new(bounds.octant(octant), depth, Some(node)));
        let first = match self.free_blocks.pop() {
            Some(first) => {
                for (slot, child) in self.nodes[first..first + 8].iter_mut().zip(children) {
                    *slot = child;
                }
                first
            }
            None => {
                let first = self.nodes.len();
                self.nodes.extend(children);
                first
            }
        };
        self.nodes[node].children = Some(std::array::from_fn(|i| first + i));

        let items = std::mem::take(&mut self.nodes[node].items);
        let mut tracked_owner = node;
        for item in items {
            let Some(position) = self.entries.get(&item).map(|e| e.position) else {
                continue;
            };
            let owner = match child_octant(&bounds, position) {
                Some(octant) => self.insert_at(first + octant, item, position),
                None => {
                    // On a split plane: stays with the parent.
                    self.nodes[node].items.push(item);
                    node
                }
            };
            if let Some(entry) = self.entries.get_mut(&item) {
                entry.node = owner;
            }
            if item == tracked {
                tracked_owner = owner;
            }
        }
        tracked_owner
    }

    /// Visit every node whose bounds pass `keep`, calling `visit` on its items.
    fn walk<K, V>(&self, mut keep: K, mut visit: V)
    where
        K: FnMut(&Aabb) -> bool,
        V: FnMut(CombatantId, Vec3),
    {
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !keep(&node.bounds) {
                continue;
            }
            for &id in &node.items {
                if let Some(entry) = self.entries.get(&id) {
                    visit(id, entry.position);
                }
            }
            if let Some(children) = node.children {
                stack.extend_from_slice(&children);
            }
        }
    }
}

/// Heap key ordered by `f32::total_cmp`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dist(f32);

impl Eq for Dist {}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl SpatialQuery for SpatialIndex {
    fn query_radius(&self, center: Vec3, radius: f32) -> SimResult<Vec<CombatantId>> {
        self.ensure_built()?;
        let radius_sq = radius * radius;
        let mut out = Vec::new();
        self.walk(
            |bounds| bounds.intersects_sphere(center, radius),
            |id, position| {
                if position.distance_squared(center) <= radius_sq {
                    out.push(id);
                }
            },
        );
        Ok(out)
    }

    fn query_ray(&self, ray: &Ray, max_distance: f32, tolerance: f32) -> SimResult<Vec<RayCandidate>> {
        self.ensure_built()?;
        let tolerance = tolerance.clamp(0.0, MAX_RAY_TOLERANCE);
        let mut out = Vec::new();
        self.walk(
            |bounds| bounds.expanded(tolerance).ray_intersection(ray, max_distance).is_some(),
            |id, position| {
                let t = ray.project(position);
                if !(0.0..=max_distance).contains(&t) {
                    return;
                }
                let lateral = ray.perpendicular_distance(position);
                if lateral <= tolerance {
                    out.push(RayCandidate { id, t, lateral });
                }
            },
        );
        out.sort_by(|a, b| a.t.total_cmp(&b.t));
        Ok(out)
    }

    fn query_frustum(&self, frustum: &Frustum) -> SimResult<Vec<CombatantId>> {
        self.ensure_built()?;
        let mut out = Vec::new();
        self.walk(
            |bounds| frustum.intersects_aabb(bounds),
            |id, position| {
                if frustum.contains_point(position) {
                    out.push(id);
                }
            },
        );
        Ok(out)
    }

    fn query_nearest(&self, point: Vec3, k: usize, max_distance: f32) -> SimResult<Vec<CombatantId>> {
        self.ensure_built()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let limit_sq = max_distance * max_distance;

        // Min-heap of nodes by bound distance, max-heap of the best k so far.
        let mut frontier: BinaryHeap<std::cmp::Reverse<(Dist, usize)>> = BinaryHeap::new();
        let mut best: BinaryHeap<(Dist, CombatantId)> = BinaryHeap::new();
        frontier.push(std::cmp::Reverse((Dist(self.nodes[0].bounds.distance_sq_to_point(point)), 0)));

        while let Some(std::cmp::Reverse((Dist(node_dist), index))) = frontier.pop() {
            if node_dist > limit_sq {
                break;
            }
            if best.len() == k && best.peek().is_some_and(|(Dist(worst), _)| node_dist > *worst) {
                break;
            }
            let node = &self.nodes[index];
            for &id in &node.items {
                let Some(entry) = self.entries.get(&id) else {
                    continue;
                };
                let d = entry.position.distance_squared(point);
                if d > limit_sq {
                    continue;
                }
                best.push((Dist(d), id));
                if best.len() > k {
                    best.pop();
                }
            }
            if let Some(children) = node.children {
                for child in children {
                    let d = self.nodes[child].bounds.distance_sq_to_point(point);
                    frontier.push(std::cmp::Reverse((Dist(d), child)));
                }
            }
        }

        let mut found = best.into_vec();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    fn position_of(&self, id: CombatantId) -> Option<Vec3> {
        self.entries.get(&id).map(|e| e.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Frustum;

    fn id(n: u32) -> CombatantId {
        CombatantId(Entity::from_raw(n))
    }

    fn index() -> SpatialIndex {
        SpatialIndex::with_half_extent(500.0)
    }

    #[test]
    fn test_unbuilt_index_reports_error() {
        let unbuilt = SpatialIndex::default();
        assert_eq!(unbuilt.query_radius(Vec3::ZERO, 10.0), Err(SimError::IndexNotBuilt));
        let mut unbuilt = SpatialIndex::default();
        assert_eq!(unbuilt.insert(id(1), Vec3::ZERO), Err(SimError::IndexNotBuilt));
    }

    #[test]
    fn test_insert_query_radius() {
        let mut index = index();
        index.insert(id(1), Vec3::new(10.0, 0.0, 10.0)).unwrap();
        index.insert(id(2), Vec3::new(15.0, 0.0, 10.0)).unwrap();
        index.insert(id(3), Vec3::new(100.0, 0.0, 100.0)).unwrap();

        let mut nearby = index.query_radius(Vec3::new(10.0, 0.0, 10.0), 10.0).unwrap();
        nearby.sort();
        assert_eq!(nearby, vec![id(1), id(2)]);
    }

    #[test]
    fn test_subdivides_past_capacity() {
        let mut index = index();
        for n in 0..50 {
            let p = Vec3::new(n as f32 * 3.1 - 70.0, 1.0, (n % 7) as f32 * 5.3 - 20.0);
            index.insert(id(n), p).unwrap();
        }
        assert!(index.node_count() > 1);
        assert_eq!(index.len(), 50);
        let all = index.query_radius(Vec3::ZERO, 1000.0).unwrap();
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn test_emptied_subtrees_collapse_and_slots_are_reused() {
        let mut index = index();
        let points: Vec<Vec3> = (0..60)
            .map(|n| Vec3::new(n as f32 * 2.7 - 80.0, 1.0, (n % 9) as f32 * 4.1 - 15.0))
            .collect();
        for (n, &p) in points.iter().enumerate() {
            index.insert(id(n as u32), p).unwrap();
        }
        let grown = index.node_count();
        let arena = index.nodes.len();
        assert!(grown > 1);

        for n in 0..points.len() {
            assert!(index.remove(id(n as u32)));
        }
        assert!(index.is_empty());
        assert_eq!(index.node_count(), 1);
        assert!(index.nodes[0].children.is_none());

        for (n, &p) in points.iter().enumerate() {
            index.insert(id(n as u32), p).unwrap();
        }
        assert_eq!(index.node_count(), grown);
        assert_eq!(index.nodes.len(), arena);
        assert_eq!(index.query_radius(Vec3::ZERO, 1000.0).unwrap().len(), points.len());
    }

    #[test]
    fn test_collapse_keeps_occupied_siblings() {
        let mut index = index();
        // Eight agents in the +x+y+z octant and one more elsewhere.
        for n in 0..9 {
            index.insert(id(n), Vec3::new(10.0 + n as f32, 1.0, 10.0)).unwrap();
        }
        index.insert(id(100), Vec3::new(-200.0, -1.0, -200.0)).unwrap();
        let before = index.node_count();
        assert!(before > 1);

        assert!(index.remove(id(100)));
        assert_eq!(index.node_count(), before);
        for n in 0..9 {
            assert!(index.contains(id(n)));
        }
        assert_eq!(index.query_radius(Vec3::new(14.0, 1.0, 10.0), 10.0).unwrap().len(), 9);

        let mut near = index.query_nearest(Vec3::new(10.0, 1.0, 10.0), 1, 5.0).unwrap();
        assert_eq!(near.pop(), Some(id(0)));
    }

    #[test]
    fn test_points_on_split_plane_stay_queryable() {
        let mut index = index();
        for n in 0..20 {
            // x == 0 is the root split plane.
            index.insert(id(n), Vec3::new(0.0, 0.5, n as f32 * 2.0 + 1.0)).unwrap();
        }
        let found = index.query_radius(Vec3::new(0.0, 0.5, 20.0), 100.0).unwrap();
        assert_eq!(found.len(), 20);
    }

    #[test]
    fn test_insert_clamps_to_bounds() {
        let mut index = index();
        index.insert(id(1), Vec3::new(9000.0, 0.0, 0.0)).unwrap();
        assert_eq!(index.position_of(id(1)).unwrap().x, 500.0);
    }

    #[test]
    fn test_remove_is_exact() {
        let mut index = index();
        index.insert(id(1), Vec3::new(1.0, 0.0, 1.0)).unwrap();
        index.insert(id(2), Vec3::new(2.0, 0.0, 2.0)).unwrap();
        assert!(index.remove(id(1)));
        assert!(!index.remove(id(1)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_radius(Vec3::ZERO, 50.0).unwrap(), vec![id(2)]);
    }

    #[test]
    fn test_update_position_small_and_large_moves() {
        let mut index = index();
        index.insert(id(1), Vec3::new(10.0, 0.0, 10.0)).unwrap();

        index.update_position(id(1), Vec3::new(10.5, 0.0, 10.0)).unwrap();
        assert_eq!(index.position_of(id(1)), Some(Vec3::new(10.5, 0.0, 10.0)));

        index.update_position(id(1), Vec3::new(-200.0, 0.0, 300.0)).unwrap();
        assert!(index.query_radius(Vec3::new(10.0, 0.0, 10.0), 5.0).unwrap().is_empty());
        assert_eq!(index.query_radius(Vec3::new(-200.0, 0.0, 300.0), 1.0).unwrap(), vec![id(1)]);
    }

    #[test]
    fn test_ray_query_sorted_and_tolerance_capped() {
        let mut index = index();
        index.insert(id(1), Vec3::new(0.5, 0.0, 40.0)).unwrap();
        index.insert(id(2), Vec3::new(-0.5, 0.0, 20.0)).unwrap();
        index.insert(id(3), Vec3::new(8.0, 0.0, 30.0)).unwrap();
        index.insert(id(4), Vec3::new(0.0, 0.0, -10.0)).unwrap();

        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let hits = index.query_ray(&ray, 100.0, 2.0).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![id(2), id(1)]);

        // A huge tolerance is capped, so the 8m-off point is still excluded.
        let wide = index.query_ray(&ray, 100.0, 50.0).unwrap();
        assert!(wide.iter().all(|h| h.id != id(3)));
    }

    #[test]
    fn test_nearest_k() {
        let mut index = index();
        for n in 0..30 {
            index.insert(id(n), Vec3::new(n as f32 * 4.0, 0.0, 0.0)).unwrap();
        }
        let nearest = index.query_nearest(Vec3::new(-1.0, 0.0, 0.0), 3, 1000.0).unwrap();
        assert_eq!(nearest, vec![id(0), id(1), id(2)]);

        let bounded = index.query_nearest(Vec3::ZERO, 10, 5.0).unwrap();
        assert_eq!(bounded, vec![id(0), id(1)]);
    }

    #[test]
    fn test_frustum_query() {
        let mut index = index();
        index.insert(id(1), Vec3::new(0.0, 0.0, -50.0)).unwrap();
        index.insert(id(2), Vec3::new(0.0, 0.0, 50.0)).unwrap();

        let frustum = Frustum::perspective(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -1.0),
            60f32.to_radians(),
            1.0,
            0.1,
            200.0,
        );
        assert_eq!(index.query_frustum(&frustum).unwrap(), vec![id(1)]);
    }
}
