//! Integer voxel addressing for the occupancy octree.
//!
//! A voxel at the finest resolution is addressed by three 16-bit key
//! components. The world origin maps to the center of the key space:
//!
//! ```text
//! key = floor(coord / resolution) + 2^15
//!
//!   coord:  ... -2r    -r     0     r     2r ...
//!   key:    ... 32766 32767 32768 32769 32770 ...
//! ```
//!
//! At depth `d` (0 = root, 16 = finest voxel) only the top `d` bits of
//! each component are significant; the child slot chosen during a
//! top-down descent is one bit per axis at position `15 - d`, packed as
//! `zyx` with x least significant.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::ops::Index;

use crate::core::Point3D;
use crate::error::{MapError, Result};

/// Number of levels below the root; also the finest key depth.
pub const TREE_DEPTH: u8 = 16;

/// Key component of the world origin (half the key space).
pub const KEY_ORIGIN: u32 = 1 << 15;

/// Exclusive upper bound of a key component.
pub const KEY_SPAN: u32 = 1 << 16;

/// Address of a finest-resolution voxel: one 16-bit component per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VoxelKey(pub [u16; 3]);

impl VoxelKey {
    /// Create a key from components.
    #[inline]
    pub fn new(kx: u16, ky: u16, kz: u16) -> Self {
        Self([kx, ky, kz])
    }

    /// Child slot (0..8) selected at `depth` during top-down descent.
    #[inline]
    pub fn child_index(&self, depth: u8) -> usize {
        let bit = (TREE_DEPTH - 1 - depth) as u32;
        (((self.0[0] >> bit) & 1) | (((self.0[1] >> bit) & 1) << 1) | (((self.0[2] >> bit) & 1) << 2))
            as usize
    }

    /// Key of child slot `i` of the voxel this key addresses at `depth`.
    ///
    /// Sets one bit per axis at position `15 - depth`.
    #[inline]
    pub fn child_key(&self, depth: u8, i: usize) -> VoxelKey {
        let bit = (TREE_DEPTH - 1 - depth) as u32;
        VoxelKey([
            self.0[0] | ((i as u16 & 1) << bit),
            self.0[1] | (((i as u16 >> 1) & 1) << bit),
            self.0[2] | (((i as u16 >> 2) & 1) << bit),
        ])
    }
}

impl Index<usize> for VoxelKey {
    type Output = u16;

    #[inline]
    fn index(&self, axis: usize) -> &u16 {
        &self.0[axis]
    }
}

impl Hash for VoxelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Mix the three components into a single word before hashing
        let mixed = u64::from(self.0[0])
            .wrapping_add(u64::from(self.0[1]).wrapping_mul(1337))
            .wrapping_add(u64::from(self.0[2]).wrapping_mul(345_637));
        state.write_u64(mixed);
    }
}

/// Unordered set of voxel keys, used for scan updates and change tracking.
pub type KeySet = HashSet<VoxelKey>;

/// Bijection between world coordinates and voxel keys at a fixed
/// resolution. Pure and allocation-free.
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec {
    resolution: f64,
    inv_resolution: f64,
}

impl KeyCodec {
    /// Create a codec for the given voxel edge length.
    pub fn new(resolution: f64) -> Self {
        assert!(
            resolution.is_finite() && resolution > 0.0,
            "resolution must be positive"
        );
        Self {
            resolution,
            inv_resolution: 1.0 / resolution,
        }
    }

    /// Voxel edge length at the finest depth, in meters.
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Edge length of a voxel at `depth`, in meters.
    #[inline]
    pub fn node_size(&self, depth: u8) -> f64 {
        self.resolution * f64::from(1u32 << (TREE_DEPTH - depth))
    }

    /// Convert one world coordinate to a key component.
    ///
    /// Fails with [`MapError::OutOfRange`] when the coordinate lies
    /// outside the mappable volume. Ties at voxel boundaries round down.
    #[inline]
    pub fn coord_to_key(&self, coord: f64) -> Result<u16> {
        let cell = (coord * self.inv_resolution).floor() as i64 + i64::from(KEY_ORIGIN);
        if (0..i64::from(KEY_SPAN)).contains(&cell) {
            Ok(cell as u16)
        } else {
            Err(MapError::OutOfRange { coordinate: coord })
        }
    }

    /// Convert one world coordinate, saturating into the key space.
    ///
    /// Used for bounding-box corners, which may legitimately extend past
    /// the mappable volume.
    #[inline]
    pub fn coord_to_key_clamped(&self, coord: f64) -> u16 {
        let cell = (coord * self.inv_resolution).floor() as i64 + i64::from(KEY_ORIGIN);
        cell.clamp(0, i64::from(KEY_SPAN) - 1) as u16
    }

    /// Convert a world point to a voxel key.
    #[inline]
    pub fn point_to_key(&self, point: Point3D) -> Result<VoxelKey> {
        Ok(VoxelKey([
            self.coord_to_key(point.x)?,
            self.coord_to_key(point.y)?,
            self.coord_to_key(point.z)?,
        ]))
    }

    /// Convert a world point to a voxel key, saturating each axis.
    #[inline]
    pub fn point_to_key_clamped(&self, point: Point3D) -> VoxelKey {
        VoxelKey([
            self.coord_to_key_clamped(point.x),
            self.coord_to_key_clamped(point.y),
            self.coord_to_key_clamped(point.z),
        ])
    }

    /// Center coordinate of the finest voxel addressed by `key`.
    #[inline]
    pub fn key_to_coord(&self, key: u16) -> f64 {
        (f64::from(key) - f64::from(KEY_ORIGIN) + 0.5) * self.resolution
    }

    /// Center coordinate of the voxel addressed by `key` at `depth`.
    ///
    /// Bits below the depth are masked off before computing the center,
    /// so any key inside the voxel yields the same answer.
    #[inline]
    pub fn key_to_coord_at_depth(&self, key: u16, depth: u8) -> f64 {
        let shift = u32::from(TREE_DEPTH - depth);
        let base = u32::from(key) & !((1u32 << shift) - 1);
        let half_cells = f64::from(1u32 << shift) * 0.5;
        (f64::from(base) - f64::from(KEY_ORIGIN) + half_cells) * self.resolution
    }

    /// Center point of the voxel addressed by `key` at `depth`.
    #[inline]
    pub fn key_to_point(&self, key: VoxelKey, depth: u8) -> Point3D {
        Point3D::new(
            self.key_to_coord_at_depth(key[0], depth),
            self.key_to_coord_at_depth(key[1], depth),
            self.key_to_coord_at_depth(key[2], depth),
        )
    }
}
