//! Scan integration: point cloud + sensor origin -> consistent map update.
//!
//! A scan is first turned into two key sets (free space along each beam,
//! occupied endpoints), conflicts are resolved with occupied winning,
//! and only then are nodes mutated. The outcome is therefore independent
//! of the point order in the cloud.

use crate::core::{Point3D, PointCloud, Pose6D};

use super::key::KeySet;
use super::raycast::VoxelRay;
use super::OccupancyOctree;

/// Configuration for scan integration.
#[derive(Debug, Clone)]
pub struct ScanIntegratorConfig {
    /// Maximum beam length in meters; negative disables the limit.
    ///
    /// Endpoints beyond the limit are not marked occupied, but the beam
    /// is still cleared up to the limit.
    pub max_range: f64,

    /// Defer pruning and inner-node aggregation.
    ///
    /// Speeds up insertion; the caller must run
    /// [`OccupancyOctree::update_inner_occupancy`] (and
    /// [`OccupancyOctree::prune`] if desired) before aggregate queries.
    pub lazy_eval: bool,

    /// Keep the tree pruned while inserting.
    ///
    /// Advisory: with eager evaluation, pruning already happens inside
    /// every node update; with `lazy_eval` nothing is pruned until the
    /// caller prunes explicitly.
    pub pruning: bool,
}

impl Default for ScanIntegratorConfig {
    fn default() -> Self {
        Self {
            max_range: -1.0,
            lazy_eval: false,
            pruning: true,
        }
    }
}

/// Outcome of integrating one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationResult {
    /// Voxels updated as free.
    pub cells_freed: usize,
    /// Voxels updated as occupied.
    pub cells_occupied: usize,
    /// Points skipped because they fall outside the key space.
    pub points_skipped: usize,
}

/// Integrates point clouds into an [`OccupancyOctree`].
#[derive(Debug, Clone, Default)]
pub struct ScanIntegrator {
    config: ScanIntegratorConfig,
}

impl ScanIntegrator {
    /// Create an integrator with the given configuration.
    pub fn new(config: ScanIntegratorConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ScanIntegratorConfig {
        &self.config
    }

    /// Compute the key sets a scan would touch, without mutating the tree.
    ///
    /// Returns `(free_cells, occupied_cells, points_skipped)`. Occupied
    /// keys are already removed from the free set, and the tree's
    /// bounding-box gate (if enabled) has been applied.
    pub fn compute_update(
        &self,
        tree: &OccupancyOctree,
        cloud: &PointCloud,
        origin: Point3D,
    ) -> (KeySet, KeySet, usize) {
        let codec = tree.codec();
        let mut free_cells = KeySet::default();
        let mut occupied_cells = KeySet::default();
        let mut skipped = 0usize;

        for &point in cloud {
            let beam = point - origin;
            let range = beam.norm();
            let within_range = self.config.max_range < 0.0 || range <= self.config.max_range;

            if within_range {
                let ray = match VoxelRay::between(origin, point, codec) {
                    Ok(ray) => ray,
                    Err(_) => {
                        skipped += 1;
                        continue;
                    }
                };
                for key in ray {
                    if tree.accepts_key(key) {
                        free_cells.insert(key);
                    }
                }
                match codec.point_to_key(point) {
                    Ok(key) => {
                        if tree.accepts_key(key) {
                            occupied_cells.insert(key);
                        }
                    }
                    Err(_) => skipped += 1,
                }
            } else {
                // Clip the beam; everything up to and including the
                // clipped endpoint is free, nothing is occupied.
                let clipped = origin + beam * (self.config.max_range / range);
                let ray = match VoxelRay::between(origin, clipped, codec) {
                    Ok(ray) => ray,
                    Err(_) => {
                        skipped += 1;
                        continue;
                    }
                };
                for key in ray {
                    if tree.accepts_key(key) {
                        free_cells.insert(key);
                    }
                }
                if let Ok(key) = codec.point_to_key(clipped) {
                    if tree.accepts_key(key) {
                        free_cells.insert(key);
                    }
                }
            }
        }

        // Occupied wins over free on the same voxel
        free_cells.retain(|key| !occupied_cells.contains(key));

        (free_cells, occupied_cells, skipped)
    }

    /// Integrate a cloud expressed in the global frame.
    pub fn integrate(
        &self,
        tree: &mut OccupancyOctree,
        cloud: &PointCloud,
        origin: Point3D,
    ) -> IntegrationResult {
        let (free_cells, occupied_cells, points_skipped) =
            self.compute_update(tree, cloud, origin);

        let result = IntegrationResult {
            cells_freed: free_cells.len(),
            cells_occupied: occupied_cells.len(),
            points_skipped,
        };

        for key in free_cells {
            tree.update_node(key, false, self.config.lazy_eval);
        }
        for key in occupied_cells {
            tree.update_node(key, true, self.config.lazy_eval);
        }

        if points_skipped > 0 {
            log::warn!("scan integration skipped {points_skipped} out-of-range points");
        }
        log::debug!(
            "integrated scan: {} free, {} occupied voxels",
            result.cells_freed,
            result.cells_occupied
        );
        result
    }

    /// Integrate a cloud given in a sensor frame.
    ///
    /// Cloud and sensor origin are both moved through `frame_pose` into
    /// the global frame first.
    pub fn integrate_transformed(
        &self,
        tree: &mut OccupancyOctree,
        cloud: &PointCloud,
        sensor_origin: Point3D,
        frame_pose: &Pose6D,
    ) -> IntegrationResult {
        let global_cloud = cloud.transformed(frame_pose);
        let global_origin = frame_pose.transform_point(sensor_origin);
        self.integrate(tree, &global_cloud, global_origin)
    }
}
