//! # VyomaMap
//!
//! Probabilistic 3D occupancy mapping on a sparse hierarchical octree.
//!
//! ## Overview
//!
//! VyomaMap ingests range-sensor scans (point clouds with a sensor
//! origin) and maintains, per visited voxel, a Bayesian log-odds
//! estimate of occupancy:
//!
//! - **Unknown** - never observed; not stored at all
//! - **Free** - carved out by beams passing through
//! - **Occupied** - beam endpoints
//!
//! ## Features
//!
//! - **Sparse octree**: 16-level tree over a 2^16 voxel key space per
//!   axis; uniform regions prune losslessly to a single node
//! - **Sensor fusion**: clamped log-odds updates with occupied-wins
//!   conflict resolution, order-independent scan integration
//! - **Raycasting**: 3D-DDA traversal for both map building and
//!   first-hit queries against the stored geometry
//! - **Persistence**: compact bit-packed binary format for the
//!   maximum-likelihood map
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vyoma_map::{OccupancyOctree, Point3D, PointCloud};
//!
//! let mut map = OccupancyOctree::new(0.05);
//!
//! let mut scan = PointCloud::new();
//! scan.push(Point3D::new(1.0, 0.3, 0.2));
//! let result = map.insert_scan(&scan, Point3D::ZERO);
//! println!("updated {} voxels", result.cells_freed + result.cells_occupied);
//!
//! if let Some(hit) = map.cast_ray(Point3D::ZERO, Point3D::new(1.0, 0.0, 0.0), false, -1.0) {
//!     println!("obstacle at {:?}", hit);
//! }
//! ```
//!
//! ## Coordinate System
//!
//! Right-handed, meters. The world origin sits at the center of the key
//! space, so coordinates up to `±resolution * 2^15` are mappable. The
//! tree is a single-owner, single-threaded structure; callers needing
//! parallelism partition scans across trees and merge, or wrap the tree
//! in external synchronization.

#![warn(missing_docs)]

// Core types
pub mod core;

// Unified configuration
pub mod config;

// Error types
pub mod error;

// The occupancy octree
pub mod octree;

// Persistence (save/load)
pub mod io;

// Re-export commonly used types
pub use config::{log_odds, probability, OccupancyConfig};
pub use core::{Point3D, PointCloud, Pose6D, Quaternion};
pub use error::{MapError, Result};
pub use octree::{
    BoundingBox, IntegrationResult, KeyCodec, KeySet, Leaf, LeafIter, OccupancyOctree,
    OctreeNode, ScanIntegrator, ScanIntegratorConfig, VoxelKey, VoxelRay, TREE_DEPTH,
};
