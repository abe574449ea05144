//! Sparse hierarchical occupancy octree.
//!
//! The tree is a fixed-depth (16 level) octree over a 2^16 voxel key
//! space per axis, centered on the world origin. Every visited voxel
//! carries a clamped log-odds occupancy estimate; unvisited space is
//! simply absent. Eight sibling leaves that agree exactly are pruned
//! into their parent, so large uniform regions cost a single node.
//!
//! # Update path
//!
//! ```text
//! scan ──► ScanIntegrator::compute_update ──► free/occupied key sets
//!                                                   │
//!                                    update_node per key (descend,
//!                                    clamp at leaf, prune on unwind)
//! ```
//!
//! Inner nodes aggregate their children with max (occupied dominates),
//! which keeps coarse-depth queries conservative.

mod bbx;
mod integrator;
mod key;
mod node;
mod raycast;

pub use bbx::BoundingBox;
pub use integrator::{IntegrationResult, ScanIntegrator, ScanIntegratorConfig};
pub use key::{KeyCodec, KeySet, VoxelKey, KEY_ORIGIN, KEY_SPAN, TREE_DEPTH};
pub use node::OctreeNode;
pub use raycast::VoxelRay;

use crate::config::{log_odds, probability, OccupancyConfig};
use crate::core::{Point3D, PointCloud, Pose6D};
use crate::error::{MapError, Result};

/// Probabilistic 3D occupancy map backed by a sparse octree.
///
/// Single-owner, single-threaded. Construction fixes the resolution;
/// the sensor model may be adjusted afterwards through the setters.
#[derive(Debug)]
pub struct OccupancyOctree {
    root: OctreeNode,
    codec: KeyCodec,

    // Sensor model, stored in log-odds
    prob_hit_log: f32,
    prob_miss_log: f32,
    occ_prob_thres_log: f32,
    clamping_thres_min: f32,
    clamping_thres_max: f32,

    use_bbx_limit: bool,
    bbx: BoundingBox,

    use_change_detection: bool,
    changed_keys: KeySet,
}

/// Leaf yielded during tree iteration.
#[derive(Debug, Clone, Copy)]
pub struct Leaf<'a> {
    /// Key addressing the leaf; bits below `depth` are zero.
    pub key: VoxelKey,
    /// Depth of the leaf (16 = finest).
    pub depth: u8,
    /// The leaf node itself.
    pub node: &'a OctreeNode,
}

/// Iterative depth-first walk over the leaves of the tree.
///
/// Nodes at the depth cap are reported as leaves even when they have
/// children, which gives multi-resolution consumers the aggregated
/// (max-of-children) value.
#[derive(Debug)]
pub struct LeafIter<'a> {
    stack: Vec<Leaf<'a>>,
    max_depth: u8,
}

impl<'a> Iterator for LeafIter<'a> {
    type Item = Leaf<'a>;

    fn next(&mut self) -> Option<Leaf<'a>> {
        while let Some(entry) = self.stack.pop() {
            if entry.depth >= self.max_depth || entry.node.is_leaf() {
                return Some(entry);
            }
            for i in (0..8).rev() {
                if let Some(child) = entry.node.child(i) {
                    self.stack.push(Leaf {
                        key: entry.key.child_key(entry.depth, i),
                        depth: entry.depth + 1,
                        node: child,
                    });
                }
            }
        }
        None
    }
}

/// Clamping and threshold context threaded through recursive updates.
struct UpdateCtx<'a> {
    clamp_min: f32,
    clamp_max: f32,
    occ_thres: f32,
    changed: Option<&'a mut KeySet>,
}

impl OccupancyOctree {
    /// Create an empty tree with the default sensor model.
    ///
    /// The resolution must be positive and finite.
    pub fn new(resolution: f64) -> Self {
        Self::from_config(OccupancyConfig {
            resolution,
            ..Default::default()
        })
    }

    /// Create an empty tree from a validated configuration.
    pub fn with_config(config: OccupancyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: OccupancyConfig) -> Self {
        let codec = KeyCodec::new(config.resolution);
        let bbx = BoundingBox::new(&codec);
        Self {
            root: OctreeNode::new(),
            codec,
            prob_hit_log: log_odds(config.prob_hit),
            prob_miss_log: log_odds(config.prob_miss),
            occ_prob_thres_log: log_odds(config.occupancy_threshold),
            clamping_thres_min: log_odds(config.clamping_min),
            clamping_thres_max: log_odds(config.clamping_max),
            use_bbx_limit: false,
            bbx,
            use_change_detection: false,
            changed_keys: KeySet::default(),
        }
    }

    // === Accessors =========================================================

    /// Voxel edge length at the finest depth, in meters.
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.codec.resolution()
    }

    /// The coordinate/key codec of this tree.
    #[inline]
    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Hit probability of the sensor model.
    pub fn prob_hit(&self) -> f64 {
        probability(self.prob_hit_log)
    }

    /// Miss probability of the sensor model.
    pub fn prob_miss(&self) -> f64 {
        probability(self.prob_miss_log)
    }

    /// Occupancy threshold as a probability.
    pub fn occupancy_thres(&self) -> f64 {
        probability(self.occ_prob_thres_log)
    }

    /// Occupancy threshold in log-odds.
    #[inline]
    pub fn occupancy_thres_log(&self) -> f32 {
        self.occ_prob_thres_log
    }

    /// Lower clamping bound in log-odds.
    #[inline]
    pub fn clamping_thres_min_log(&self) -> f32 {
        self.clamping_thres_min
    }

    /// Upper clamping bound in log-odds.
    #[inline]
    pub fn clamping_thres_max_log(&self) -> f32 {
        self.clamping_thres_max
    }

    // === Sensor model setters =============================================

    /// Set the probability for a "hit" observation. Must be >= 0.5.
    pub fn set_prob_hit(&mut self, prob: f64) -> Result<()> {
        let lo = log_odds(prob);
        if !(lo >= 0.0) {
            return Err(MapError::InvalidParameter(format!(
                "prob_hit must be >= 0.5, got {prob}"
            )));
        }
        self.prob_hit_log = lo;
        Ok(())
    }

    /// Set the probability for a "miss" observation. Must be <= 0.5.
    pub fn set_prob_miss(&mut self, prob: f64) -> Result<()> {
        let lo = log_odds(prob);
        if !(lo <= 0.0) {
            return Err(MapError::InvalidParameter(format!(
                "prob_miss must be <= 0.5, got {prob}"
            )));
        }
        self.prob_miss_log = lo;
        Ok(())
    }

    /// Set the occupancy threshold probability.
    pub fn set_occupancy_thres(&mut self, prob: f64) -> Result<()> {
        if prob <= 0.0 || prob >= 1.0 {
            return Err(MapError::InvalidParameter(format!(
                "occupancy threshold must be in (0, 1), got {prob}"
            )));
        }
        self.occ_prob_thres_log = log_odds(prob);
        Ok(())
    }

    /// Set the lower clamping bound probability.
    pub fn set_clamping_thres_min(&mut self, prob: f64) -> Result<()> {
        let lo = log_odds(prob);
        if !lo.is_finite() || lo >= self.clamping_thres_max {
            return Err(MapError::InvalidParameter(format!(
                "clamping minimum {prob} must stay below the maximum"
            )));
        }
        self.clamping_thres_min = lo;
        Ok(())
    }

    /// Set the upper clamping bound probability.
    pub fn set_clamping_thres_max(&mut self, prob: f64) -> Result<()> {
        let lo = log_odds(prob);
        if !lo.is_finite() || lo <= self.clamping_thres_min {
            return Err(MapError::InvalidParameter(format!(
                "clamping maximum {prob} must stay above the minimum"
            )));
        }
        self.clamping_thres_max = lo;
        Ok(())
    }

    // === Occupancy layer ===================================================

    /// Whether a node counts as occupied under this tree's threshold.
    #[inline]
    pub fn is_node_occupied(&self, node: &OctreeNode) -> bool {
        node.log_odds() >= self.occ_prob_thres_log
    }

    /// Whether a node's value sits at either clamping bound.
    #[inline]
    pub fn is_node_at_threshold(&self, node: &OctreeNode) -> bool {
        node.log_odds() <= self.clamping_thres_min || node.log_odds() >= self.clamping_thres_max
    }

    /// Add a clamped log-odds delta to a node.
    #[inline]
    pub fn update_node_log_odds(&self, node: &mut OctreeNode, delta: f32) {
        node.set_log_odds(
            (node.log_odds() + delta).clamp(self.clamping_thres_min, self.clamping_thres_max),
        );
    }

    /// Integrate a "hit" observation into a node.
    #[inline]
    pub fn integrate_hit(&self, node: &mut OctreeNode) {
        self.update_node_log_odds(node, self.prob_hit_log);
    }

    /// Integrate a "miss" observation into a node.
    #[inline]
    pub fn integrate_miss(&self, node: &mut OctreeNode) {
        self.update_node_log_odds(node, self.prob_miss_log);
    }

    /// Snap a node's value to the clamping bound matching its class.
    #[inline]
    pub fn node_to_max_likelihood(&self, node: &mut OctreeNode) {
        node.set_log_odds(if node.log_odds() >= self.occ_prob_thres_log {
            self.clamping_thres_max
        } else {
            self.clamping_thres_min
        });
    }

    // === Updates ===========================================================

    /// Integrate an occupancy measurement at `key`.
    ///
    /// Descends to the finest depth, creating missing nodes at the
    /// neutral prior, and adds the hit/miss log-odds at the leaf. With
    /// `lazy_eval` the unwind skips pruning and inner-node aggregation;
    /// call [`update_inner_occupancy`](Self::update_inner_occupancy)
    /// before aggregate-dependent queries. Returns the leaf's new value.
    pub fn update_node(&mut self, key: VoxelKey, occupied: bool, lazy_eval: bool) -> f32 {
        let delta = if occupied {
            self.prob_hit_log
        } else {
            self.prob_miss_log
        };
        self.update_log_odds(key, delta, lazy_eval)
    }

    /// Integrate an occupancy measurement at a world point.
    pub fn update_node_at(&mut self, point: Point3D, occupied: bool, lazy_eval: bool) -> Result<f32> {
        let key = self.codec.point_to_key(point)?;
        Ok(self.update_node(key, occupied, lazy_eval))
    }

    /// Add an arbitrary log-odds delta at `key`.
    pub fn update_log_odds(&mut self, key: VoxelKey, delta: f32, lazy_eval: bool) -> f32 {
        let mut ctx = UpdateCtx {
            clamp_min: self.clamping_thres_min,
            clamp_max: self.clamping_thres_max,
            occ_thres: self.occ_prob_thres_log,
            changed: if self.use_change_detection {
                Some(&mut self.changed_keys)
            } else {
                None
            },
        };
        update_recurs(&mut self.root, false, &key, 0, delta, lazy_eval, &mut ctx)
    }

    /// Add an arbitrary log-odds delta at a world point.
    pub fn update_log_odds_at(&mut self, point: Point3D, delta: f32, lazy_eval: bool) -> Result<f32> {
        let key = self.codec.point_to_key(point)?;
        Ok(self.update_log_odds(key, delta, lazy_eval))
    }

    /// Insert one sensor beam.
    ///
    /// Every voxel between `origin` and `end` is updated as free and the
    /// endpoint voxel as occupied. With `0 < max_range < |end - origin|`
    /// the beam is clipped and only free space is carved, including the
    /// clipped endpoint.
    pub fn insert_ray(&mut self, origin: Point3D, end: Point3D, max_range: f64) -> Result<()> {
        let codec = self.codec;
        let beam = end - origin;
        let range = beam.norm();

        if max_range > 0.0 && range > max_range {
            let clipped = origin + beam * (max_range / range);
            for key in VoxelRay::between(origin, clipped, codec)? {
                self.update_node(key, false, false);
            }
            let end_key = codec.point_to_key(clipped)?;
            self.update_node(end_key, false, false);
        } else {
            for key in VoxelRay::between(origin, end, codec)? {
                self.update_node(key, false, false);
            }
            let end_key = codec.point_to_key(end)?;
            self.update_node(end_key, true, false);
        }
        Ok(())
    }

    /// Integrate a point cloud already expressed in the global frame.
    ///
    /// Uses the default [`ScanIntegrator`] configuration (unlimited
    /// range, eager evaluation).
    pub fn insert_scan(&mut self, cloud: &PointCloud, origin: Point3D) -> IntegrationResult {
        ScanIntegrator::default().integrate(self, cloud, origin)
    }

    /// Integrate a point cloud given in a sensor frame.
    ///
    /// Both the cloud and the sensor origin are moved through
    /// `frame_pose` before integration.
    pub fn insert_scan_transformed(
        &mut self,
        cloud: &PointCloud,
        sensor_origin: Point3D,
        frame_pose: &Pose6D,
    ) -> IntegrationResult {
        ScanIntegrator::default().integrate_transformed(self, cloud, sensor_origin, frame_pose)
    }

    /// Remove the subtree addressed by `key` at `depth` (0 = finest).
    ///
    /// Emptied ancestor branches are removed as well; a fully emptied
    /// tree resets the root to the neutral prior.
    pub fn delete_node(&mut self, key: VoxelKey, depth: u8) {
        let target = if depth == 0 {
            TREE_DEPTH
        } else {
            depth.min(TREE_DEPTH)
        };
        delete_recurs(&mut self.root, &key, 0, target);
    }

    /// Reset the tree to its empty state, keeping the sensor model.
    pub fn clear(&mut self) {
        self.root = OctreeNode::new();
        self.changed_keys.clear();
    }

    // === Tree-wide passes ==================================================

    /// Recompute every inner node as the maximum of its children.
    ///
    /// Required after lazy updates before any query that reads inner
    /// nodes (depth-capped enumeration, coarse search).
    pub fn update_inner_occupancy(&mut self) {
        update_inner_recurs(&mut self.root);
    }

    /// Collapse every node to the clamping bound matching its class.
    ///
    /// Idempotent; afterwards every node satisfies
    /// [`is_node_at_threshold`](Self::is_node_at_threshold).
    pub fn to_max_likelihood(&mut self) {
        let min = self.clamping_thres_min;
        let max = self.clamping_thres_max;
        let thres = self.occ_prob_thres_log;
        max_likelihood_recurs(&mut self.root, min, max, thres);
    }

    /// Losslessly prune the whole tree bottom-up.
    ///
    /// Only needed after lazy updates or deserialization; eager updates
    /// prune as they go.
    pub fn prune(&mut self) {
        prune_recurs(&mut self.root);
    }

    // === Queries ===========================================================

    /// Look up the node covering `key` at `depth` (0 = finest).
    ///
    /// Returns the pruned leaf when descent ends early on a childless
    /// node, and `None` when the path is absent from the tree.
    pub fn search(&self, key: VoxelKey, depth: u8) -> Option<&OctreeNode> {
        let target = if depth == 0 {
            TREE_DEPTH
        } else {
            depth.min(TREE_DEPTH)
        };
        let mut node = &self.root;
        for d in 0..target {
            match node.child(key.child_index(d)) {
                Some(child) => node = child,
                None => {
                    return if node.has_children() {
                        // Sibling branches exist but this key was never touched
                        None
                    } else {
                        Some(node)
                    };
                }
            }
        }
        Some(node)
    }

    /// Look up the finest node covering a world point.
    ///
    /// Returns `None` for unknown space and for points outside the key
    /// space.
    pub fn search_at(&self, point: Point3D) -> Option<&OctreeNode> {
        let key = self.codec.point_to_key(point).ok()?;
        self.search(key, 0)
    }

    /// Cast a ray and return the center of the first occupied voxel hit.
    ///
    /// The ray starts at `origin` and runs along `direction` (need not be
    /// normalized). Traversal reports a miss on the first unknown voxel
    /// unless `ignore_unknown` is set, when the ray exceeds `max_range`
    /// (`<= 0`: unlimited), or when it leaves the key space.
    pub fn cast_ray(
        &self,
        origin: Point3D,
        direction: Point3D,
        ignore_unknown: bool,
        max_range: f64,
    ) -> Option<Point3D> {
        let codec = self.codec;
        let origin_key = codec.point_to_key(origin).ok()?;

        match self.search(origin_key, 0) {
            Some(node) => {
                if self.is_node_occupied(node) {
                    return Some(codec.key_to_point(origin_key, TREE_DEPTH));
                }
            }
            None => {
                if !ignore_unknown {
                    return None;
                }
            }
        }

        let ray = VoxelRay::toward(origin, direction, max_range, codec).ok()?;
        for key in ray {
            match self.search(key, 0) {
                Some(node) if self.is_node_occupied(node) => {
                    return Some(codec.key_to_point(key, TREE_DEPTH));
                }
                Some(_) => {}
                None => {
                    if !ignore_unknown {
                        return None;
                    }
                }
            }
        }
        None
    }

    // === Leaf enumeration ==================================================

    /// Iterate over all leaves with their key and depth.
    ///
    /// A pristine tree (childless root at the neutral prior) yields
    /// nothing.
    pub fn leaves(&self) -> LeafIter<'_> {
        self.leaves_to_depth(0)
    }

    /// Iterate over leaves, treating nodes at `max_depth` as leaves
    /// (0 = no cap).
    pub fn leaves_to_depth(&self, max_depth: u8) -> LeafIter<'_> {
        let cap = if max_depth == 0 {
            TREE_DEPTH
        } else {
            max_depth.min(TREE_DEPTH)
        };
        let pristine = self.root.is_leaf() && self.root.log_odds() == 0.0;
        LeafIter {
            stack: if pristine {
                Vec::new()
            } else {
                vec![Leaf {
                    key: VoxelKey::new(0, 0, 0),
                    depth: 0,
                    node: &self.root,
                }]
            },
            max_depth: cap,
        }
    }

    /// Centers and edge lengths of all occupied leaves (0 = no depth cap).
    pub fn occupied_volumes(&self, max_depth: u8) -> Vec<(Point3D, f64)> {
        self.leaves_to_depth(max_depth)
            .filter(|l| self.is_node_occupied(l.node))
            .map(|l| (self.codec.key_to_point(l.key, l.depth), self.codec.node_size(l.depth)))
            .collect()
    }

    /// Centers and edge lengths of all free leaves (0 = no depth cap).
    pub fn free_volumes(&self, max_depth: u8) -> Vec<(Point3D, f64)> {
        self.leaves_to_depth(max_depth)
            .filter(|l| !self.is_node_occupied(l.node))
            .map(|l| (self.codec.key_to_point(l.key, l.depth), self.codec.node_size(l.depth)))
            .collect()
    }

    /// Centers of occupied leaves whose span intersects the given box.
    pub fn occupied_centers_in_bbx(&self, min: Point3D, max: Point3D) -> Vec<Point3D> {
        let mut bbx = BoundingBox::new(&self.codec);
        bbx.set_min(min, &self.codec);
        bbx.set_max(max, &self.codec);

        self.leaves()
            .filter(|l| self.is_node_occupied(l.node) && bbx.intersects_span(l.key, l.depth))
            .map(|l| self.codec.key_to_point(l.key, l.depth))
            .collect()
    }

    // === Statistics ========================================================

    /// Total number of allocated nodes, the root included.
    pub fn num_nodes(&self) -> usize {
        count_nodes(&self.root)
    }

    /// Number of leaf nodes.
    pub fn num_leaf_nodes(&self) -> usize {
        count_leaves(&self.root)
    }

    /// Count nodes at a clamping bound vs. nodes in between.
    pub fn thresholded_node_counts(&self) -> (usize, usize) {
        let mut thresholded = 0;
        let mut other = 0;
        count_thresholded(
            &self.root,
            self.clamping_thres_min,
            self.clamping_thres_max,
            &mut thresholded,
            &mut other,
        );
        (thresholded, other)
    }

    // === Bounding box ======================================================

    /// Enable or disable bounding-box gating of scan updates.
    pub fn enable_bbx_limit(&mut self, enable: bool) {
        self.use_bbx_limit = enable;
    }

    /// Whether bounding-box gating is active.
    #[inline]
    pub fn is_bbx_limit_enabled(&self) -> bool {
        self.use_bbx_limit
    }

    /// Set the lower corner of the update bounding box.
    pub fn set_bbx_min(&mut self, point: Point3D) {
        self.bbx.set_min(point, &self.codec);
    }

    /// Set the upper corner of the update bounding box.
    pub fn set_bbx_max(&mut self, point: Point3D) {
        self.bbx.set_max(point, &self.codec);
    }

    /// The current update bounding box.
    pub fn bbx(&self) -> &BoundingBox {
        &self.bbx
    }

    /// Whether a world point lies inside the update bounding box.
    pub fn in_bbx(&self, point: Point3D) -> bool {
        self.bbx.contains_point(point)
    }

    /// Whether a finest-depth key lies inside the update bounding box.
    pub fn in_bbx_key(&self, key: VoxelKey) -> bool {
        self.bbx.contains_key(key)
    }

    /// Whether scan updates accept this key under the active gate.
    #[inline]
    pub(crate) fn accepts_key(&self, key: VoxelKey) -> bool {
        !self.use_bbx_limit || self.bbx.contains_key(key)
    }

    // === Change tracking ===================================================

    /// Track or ignore occupancy-class changes during updates.
    pub fn enable_change_detection(&mut self, enable: bool) {
        self.use_change_detection = enable;
    }

    /// Keys whose occupancy class changed (or that were created) since
    /// the last reset.
    pub fn changed_keys(&self) -> &KeySet {
        &self.changed_keys
    }

    /// Forget all recorded changes.
    pub fn reset_change_set(&mut self) {
        self.changed_keys.clear();
    }

    // === Internal plumbing for the binary codec ============================

    pub(crate) fn root(&self) -> &OctreeNode {
        &self.root
    }

    /// Swap in a freshly decoded tree; called only after a successful
    /// parse so a failed read leaves the tree untouched.
    pub(crate) fn replace_contents(&mut self, resolution: f64, root: OctreeNode) {
        self.codec = KeyCodec::new(resolution);
        self.bbx.refresh_keys(&self.codec);
        self.root = root;
        self.changed_keys.clear();
        self.update_inner_occupancy();
    }
}

fn update_recurs(
    node: &mut OctreeNode,
    just_created: bool,
    key: &VoxelKey,
    depth: u8,
    delta: f32,
    lazy_eval: bool,
    ctx: &mut UpdateCtx<'_>,
) -> f32 {
    if depth == TREE_DEPTH {
        let old = node.log_odds();
        let new = (old + delta).clamp(ctx.clamp_min, ctx.clamp_max);
        node.set_log_odds(new);

        if let Some(changed) = ctx.changed.as_deref_mut() {
            let was_occupied = old >= ctx.occ_thres;
            let is_occupied = new >= ctx.occ_thres;
            if just_created || was_occupied != is_occupied {
                changed.insert(*key);
            }
        }
        return new;
    }

    let pos = key.child_index(depth);
    let mut child_created = false;
    if !node.child_exists(pos) {
        if !node.has_children() && !just_created && depth > 0 {
            // Pruned leaf: materialize the octants so the seven
            // untouched siblings keep the collapsed value.
            node.expand();
        } else {
            child_created = true;
        }
    }

    let value = update_recurs(
        node.child_entry(pos),
        child_created,
        key,
        depth + 1,
        delta,
        lazy_eval,
        ctx,
    );

    if !lazy_eval && !node.prune() {
        node.set_log_odds(node.max_child_log_odds());
    }
    value
}

/// Returns whether the caller should remove the visited child.
fn delete_recurs(node: &mut OctreeNode, key: &VoxelKey, depth: u8, target: u8) -> bool {
    if depth >= target {
        return true;
    }

    let pos = key.child_index(depth);
    if !node.child_exists(pos) {
        if !node.has_children() && depth > 0 {
            // Pruned leaf covering the key: expand so one octant can go
            node.expand();
        } else {
            return false;
        }
    }

    let remove_child = match node.child_mut(pos) {
        Some(child) => delete_recurs(child, key, depth + 1, target),
        None => false,
    };

    if remove_child {
        node.delete_child(pos);
        if !node.has_children() {
            if depth > 0 {
                return true;
            }
            // Fully emptied tree: the root reverts to the neutral prior
            node.set_log_odds(0.0);
            return false;
        }
        node.set_log_odds(node.max_child_log_odds());
    }
    false
}

fn update_inner_recurs(node: &mut OctreeNode) {
    if !node.has_children() {
        return;
    }
    for i in 0..8 {
        if let Some(child) = node.child_mut(i) {
            update_inner_recurs(child);
        }
    }
    node.set_log_odds(node.max_child_log_odds());
}

fn max_likelihood_recurs(node: &mut OctreeNode, min: f32, max: f32, thres: f32) {
    for i in 0..8 {
        if let Some(child) = node.child_mut(i) {
            max_likelihood_recurs(child, min, max, thres);
        }
    }
    node.set_log_odds(if node.log_odds() >= thres { max } else { min });
}

fn prune_recurs(node: &mut OctreeNode) {
    if !node.has_children() {
        return;
    }
    for i in 0..8 {
        if let Some(child) = node.child_mut(i) {
            prune_recurs(child);
        }
    }
    node.prune();
}

fn count_nodes(node: &OctreeNode) -> usize {
    let mut count = 1;
    for i in 0..8 {
        if let Some(child) = node.child(i) {
            count += count_nodes(child);
        }
    }
    count
}

fn count_leaves(node: &OctreeNode) -> usize {
    if node.is_leaf() {
        return 1;
    }
    let mut count = 0;
    for i in 0..8 {
        if let Some(child) = node.child(i) {
            count += count_leaves(child);
        }
    }
    count
}

fn count_thresholded(
    node: &OctreeNode,
    min: f32,
    max: f32,
    thresholded: &mut usize,
    other: &mut usize,
) {
    if node.log_odds() <= min || node.log_odds() >= max {
        *thresholded += 1;
    } else {
        *other += 1;
    }
    for i in 0..8 {
        if let Some(child) = node.child(i) {
            count_thresholded(child, min, max, thresholded, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tree() -> OccupancyOctree {
        OccupancyOctree::new(0.1)
    }

    fn key_at(tree: &OccupancyOctree, x: f64, y: f64, z: f64) -> VoxelKey {
        tree.codec().point_to_key(Point3D::new(x, y, z)).unwrap()
    }

    #[test]
    fn test_single_update_marks_occupied() {
        let mut tree = tree();
        let value = tree
            .update_node_at(Point3D::new(0.15, 0.15, 0.15), true, false)
            .unwrap();

        assert!(value > 0.0);
        let node = tree.search_at(Point3D::new(0.15, 0.15, 0.15)).unwrap();
        assert!(tree.is_node_occupied(node));
    }

    #[test]
    fn test_search_misses_untouched_voxel() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.15, 0.15, 0.15), true, false)
            .unwrap();

        assert!(tree.search_at(Point3D::new(0.05, 0.05, 0.05)).is_none());
    }

    #[test]
    fn test_empty_tree_search_returns_root_prior() {
        let tree = tree();
        let node = tree.search_at(Point3D::ZERO).unwrap();
        assert_eq!(node.log_odds(), 0.0);
    }

    #[test]
    fn test_repeated_updates_clamp() {
        let mut tree = tree();
        let key = key_at(&tree, 0.0, 0.0, 0.0);

        for _ in 0..100 {
            tree.update_node(key, true, false);
        }
        let max = tree.clamping_thres_max_log();
        let node = tree.search(key, 0).unwrap();
        assert_eq!(node.log_odds(), max);
        assert!(tree.is_node_at_threshold(node));

        for _ in 0..100 {
            tree.update_node(key, false, false);
        }
        let min = tree.clamping_thres_min_log();
        let node = tree.search(key, 0).unwrap();
        assert_eq!(node.log_odds(), min);
    }

    #[test]
    fn test_octant_pruning_collapses_parent() {
        let mut tree = tree();
        // Eight finest voxels sharing one depth-15 parent
        for x in [0.05, 0.15] {
            for y in [0.05, 0.15] {
                for z in [0.05, 0.15] {
                    tree.update_node_at(Point3D::new(x, y, z), true, false)
                        .unwrap();
                }
            }
        }
        tree.update_inner_occupancy();

        let node = tree
            .search(key_at(&tree, 0.05, 0.05, 0.05), 15)
            .expect("depth-15 parent present");
        assert!(node.is_leaf(), "parent should be a pruned leaf");
        assert!(tree.is_node_occupied(node));

        // The finest search still answers through the pruned leaf
        let fine = tree.search_at(Point3D::new(0.15, 0.05, 0.15)).unwrap();
        assert!(tree.is_node_occupied(fine));
    }

    #[test]
    fn test_update_below_pruned_leaf_expands() {
        let mut tree = tree();
        for x in [0.05, 0.15] {
            for y in [0.05, 0.15] {
                for z in [0.05, 0.15] {
                    tree.update_node_at(Point3D::new(x, y, z), true, false)
                        .unwrap();
                }
            }
        }
        let occupied_value = tree
            .search_at(Point3D::new(0.05, 0.05, 0.05))
            .unwrap()
            .log_odds();

        // Drive one octant back toward free; its siblings must keep the
        // collapsed value.
        for _ in 0..10 {
            tree.update_node_at(Point3D::new(0.05, 0.05, 0.05), false, false)
                .unwrap();
        }
        let sibling = tree.search_at(Point3D::new(0.15, 0.15, 0.15)).unwrap();
        assert_eq!(sibling.log_odds(), occupied_value);
        let updated = tree.search_at(Point3D::new(0.05, 0.05, 0.05)).unwrap();
        assert!(!tree.is_node_occupied(updated));
    }

    #[test]
    fn test_lazy_updates_defer_aggregation() {
        let mut tree = tree();
        let key = key_at(&tree, 1.0, 1.0, 1.0);
        tree.update_node(key, true, true);

        // Inner nodes still carry the neutral prior
        let coarse = tree.search(key, 10).unwrap();
        assert_eq!(coarse.log_odds(), 0.0);

        tree.update_inner_occupancy();
        let coarse = tree.search(key, 10).unwrap();
        assert!(tree.is_node_occupied(coarse));
    }

    #[test]
    fn test_lazy_then_prune_matches_eager() {
        let mut eager = tree();
        let mut lazy = tree();
        for x in [0.05, 0.15] {
            for y in [0.05, 0.15] {
                for z in [0.05, 0.15] {
                    let p = Point3D::new(x, y, z);
                    eager.update_node_at(p, true, false).unwrap();
                    lazy.update_node_at(p, true, true).unwrap();
                }
            }
        }
        lazy.update_inner_occupancy();
        lazy.prune();

        assert_eq!(eager.num_nodes(), lazy.num_nodes());
    }

    #[test]
    fn test_max_likelihood_is_idempotent() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.3, 0.0, 0.0), true, false)
            .unwrap();
        tree.update_node_at(Point3D::new(-0.3, 0.0, 0.0), false, false)
            .unwrap();

        tree.to_max_likelihood();
        let snapshot: Vec<f32> = tree.leaves().map(|l| l.node.log_odds()).collect();

        tree.to_max_likelihood();
        let again: Vec<f32> = tree.leaves().map(|l| l.node.log_odds()).collect();
        assert_eq!(snapshot, again);

        for leaf in tree.leaves() {
            assert!(tree.is_node_at_threshold(leaf.node));
        }
    }

    #[test]
    fn test_delete_node_removes_branch() {
        let mut tree = tree();
        let p = Point3D::new(0.55, 0.05, 0.05);
        tree.update_node_at(p, true, false).unwrap();
        let key = key_at(&tree, 0.55, 0.05, 0.05);

        tree.delete_node(key, 0);
        assert!(tree.search_at(p).is_none() || tree.search_at(p).unwrap().log_odds() == 0.0);
        // Sole branch removed, tree back to a single node
        assert_eq!(tree.num_nodes(), 1);
    }

    #[test]
    fn test_leaf_iteration_counts() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.05, 0.05, 0.05), true, false)
            .unwrap();
        tree.update_node_at(Point3D::new(2.05, 0.05, 0.05), false, false)
            .unwrap();

        let leaves: Vec<_> = tree.leaves().collect();
        assert_eq!(leaves.len(), 2);
        for leaf in &leaves {
            assert_eq!(leaf.depth, TREE_DEPTH);
        }

        assert_eq!(tree.occupied_volumes(0).len(), 1);
        assert_eq!(tree.free_volumes(0).len(), 1);
    }

    #[test]
    fn test_leaf_centers_round_trip() {
        let mut tree = tree();
        let p = Point3D::new(0.75, -0.35, 1.15);
        tree.update_node_at(p, true, false).unwrap();

        let (center, size) = tree.occupied_volumes(0)[0];
        assert_relative_eq!(size, 0.1);
        assert!(center.distance(&p) < 0.1);
    }

    #[test]
    fn test_depth_capped_enumeration_aggregates() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.05, 0.05, 0.05), true, false)
            .unwrap();

        let volumes = tree.occupied_volumes(14);
        assert_eq!(volumes.len(), 1);
        let (_, size) = volumes[0];
        assert_relative_eq!(size, 0.4); // 2^2 finest cells per edge
    }

    #[test]
    fn test_pristine_tree_has_no_leaves() {
        let tree = tree();
        assert_eq!(tree.leaves().count(), 0);
        assert_eq!(tree.num_nodes(), 1);
    }

    #[test]
    fn test_change_detection_records_crossings() {
        let mut tree = tree();
        tree.enable_change_detection(true);

        let key = key_at(&tree, 0.0, 0.0, 0.0);
        tree.update_node(key, true, false);
        assert!(tree.changed_keys().contains(&key));

        tree.reset_change_set();
        assert!(tree.changed_keys().is_empty());

        // Already occupied; another hit does not cross the threshold
        tree.update_node(key, true, false);
        assert!(tree.changed_keys().is_empty());

        // Enough misses flip it back to free
        for _ in 0..10 {
            tree.update_node(key, false, false);
        }
        assert!(tree.changed_keys().contains(&key));
    }

    #[test]
    fn test_bbx_membership() {
        let mut tree = tree();
        tree.set_bbx_min(Point3D::new(-1.0, -1.0, -1.0));
        tree.set_bbx_max(Point3D::new(1.0, 1.0, 1.0));

        assert!(tree.in_bbx(Point3D::ZERO));
        assert!(!tree.in_bbx(Point3D::new(2.0, 0.0, 0.0)));

        let inside = key_at(&tree, 0.5, 0.5, 0.5);
        assert!(tree.in_bbx_key(inside));
    }

    #[test]
    fn test_sensor_model_setters_validate() {
        let mut tree = tree();
        assert!(tree.set_prob_hit(0.8).is_ok());
        assert!(tree.set_prob_hit(0.3).is_err());
        assert!(tree.set_prob_miss(0.45).is_ok());
        assert!(tree.set_prob_miss(0.7).is_err());
        assert!(tree.set_clamping_thres_max(0.05).is_err());
    }

    #[test]
    fn test_insert_ray_carves_free_space() {
        let mut tree = tree();
        tree.insert_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), -1.0)
            .unwrap();

        for i in 0..10 {
            let x = 0.05 + 0.1 * f64::from(i);
            let node = tree
                .search_at(Point3D::new(x, 0.05, 0.05))
                .unwrap_or_else(|| panic!("voxel at x={x} should exist"));
            assert!(!tree.is_node_occupied(node), "voxel at x={x} should be free");
        }

        let endpoint = tree.search_at(Point3D::new(1.05, 0.05, 0.05)).unwrap();
        assert!(tree.is_node_occupied(endpoint));

        assert!(tree.search_at(Point3D::new(1.15, 0.05, 0.05)).is_none());
    }

    #[test]
    fn test_insert_ray_clipped_at_max_range() {
        let mut tree = tree();
        tree.insert_ray(Point3D::ZERO, Point3D::new(2.0, 0.0, 0.0), 0.5)
            .unwrap();

        // Clipped endpoint is free, not occupied
        let clipped = tree.search_at(Point3D::new(0.45, 0.05, 0.05)).unwrap();
        assert!(!tree.is_node_occupied(clipped));
        assert!(tree.search_at(Point3D::new(1.95, 0.05, 0.05)).is_none());
    }

    #[test]
    fn test_cast_ray_hits_stored_obstacle() {
        let mut tree = tree();
        // Carve known free space up to the obstacle, then the obstacle
        tree.insert_ray(Point3D::ZERO, Point3D::new(2.0, 0.0, 0.0), -1.0)
            .unwrap();

        let hit = tree
            .cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), false, -1.0)
            .expect("ray should hit the endpoint voxel");
        assert_relative_eq!(hit.x, 2.05, epsilon = 1e-9);
    }

    #[test]
    fn test_cast_ray_aborts_on_unknown() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(2.05, 0.05, 0.05), true, false)
            .unwrap();

        let miss = tree.cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), false, -1.0);
        assert!(miss.is_none());

        let hit = tree
            .cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), true, -1.0)
            .expect("unknown space ignored");
        assert_relative_eq!(hit.x, 2.05, epsilon = 1e-9);
        assert_relative_eq!(hit.y, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_cast_ray_respects_max_range() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(2.05, 0.05, 0.05), true, false)
            .unwrap();

        let miss = tree.cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), true, 1.0);
        assert!(miss.is_none());
    }

    #[test]
    fn test_cast_ray_monotonic_in_range() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(1.55, 0.05, 0.05), true, false)
            .unwrap();

        let hit_near = tree.cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), true, 2.0);
        let hit_far = tree.cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), true, 10.0);
        assert_eq!(hit_near, hit_far);
    }

    #[test]
    fn test_cast_ray_from_occupied_origin() {
        let mut tree = tree();
        tree.update_node_at(Point3D::ZERO, true, false).unwrap();

        let hit = tree
            .cast_ray(Point3D::ZERO, Point3D::new(0.0, 1.0, 0.0), false, -1.0)
            .expect("occupied origin is an immediate hit");
        assert_relative_eq!(hit.x, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_node_statistics() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.05, 0.05, 0.05), true, false)
            .unwrap();

        // One chain of 16 inner nodes plus root and the leaf
        assert_eq!(tree.num_nodes(), 17);
        assert_eq!(tree.num_leaf_nodes(), 1);

        let (thresholded, other) = tree.thresholded_node_counts();
        assert_eq!(thresholded + other, 17);
    }

    #[test]
    fn test_clear_resets_tree() {
        let mut tree = tree();
        tree.update_node_at(Point3D::new(0.5, 0.5, 0.5), true, false)
            .unwrap();
        assert!(tree.num_nodes() > 1);

        tree.clear();
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.leaves().count(), 0);
    }
}
