//! Axis-aligned bounding box for gating map updates.

use crate::core::Point3D;

use super::key::{KeyCodec, VoxelKey, TREE_DEPTH};

/// Inclusive axis-aligned box over world points, with the matching voxel
/// key bounds precomputed whenever a corner changes.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    min: Point3D,
    max: Point3D,
    min_key: VoxelKey,
    max_key: VoxelKey,
}

impl BoundingBox {
    /// An empty box at the origin.
    pub fn new(codec: &KeyCodec) -> Self {
        let origin_key = codec.point_to_key_clamped(Point3D::ZERO);
        Self {
            min: Point3D::ZERO,
            max: Point3D::ZERO,
            min_key: origin_key,
            max_key: origin_key,
        }
    }

    /// Lower corner in world coordinates.
    #[inline]
    pub fn min(&self) -> Point3D {
        self.min
    }

    /// Upper corner in world coordinates.
    #[inline]
    pub fn max(&self) -> Point3D {
        self.max
    }

    /// Set the lower corner, saturating its key into the key space.
    pub fn set_min(&mut self, point: Point3D, codec: &KeyCodec) {
        self.min = point;
        self.min_key = codec.point_to_key_clamped(point);
    }

    /// Set the upper corner, saturating its key into the key space.
    pub fn set_max(&mut self, point: Point3D, codec: &KeyCodec) {
        self.max = point;
        self.max_key = codec.point_to_key_clamped(point);
    }

    /// Recompute the key bounds, e.g. after the resolution changed.
    pub fn refresh_keys(&mut self, codec: &KeyCodec) {
        self.min_key = codec.point_to_key_clamped(self.min);
        self.max_key = codec.point_to_key_clamped(self.max);
    }

    /// Edge lengths of the box.
    pub fn bounds(&self) -> Point3D {
        self.max - self.min
    }

    /// Center of the box.
    pub fn center(&self) -> Point3D {
        (self.min + self.max) * 0.5
    }

    /// Whether a world point lies inside the box (inclusive).
    #[inline]
    pub fn contains_point(&self, point: Point3D) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Whether a finest-depth key lies inside the key bounds (inclusive).
    #[inline]
    pub fn contains_key(&self, key: VoxelKey) -> bool {
        (0..3).all(|a| key[a] >= self.min_key[a] && key[a] <= self.max_key[a])
    }

    /// Whether the span of a depth-`depth` voxel intersects the key bounds.
    ///
    /// A coarse (pruned) leaf covers `2^(16-depth)` finest cells per axis.
    pub fn intersects_span(&self, key: VoxelKey, depth: u8) -> bool {
        let shift = u32::from(TREE_DEPTH - depth);
        (0..3).all(|a| {
            let base = u32::from(key[a]) & !((1u32 << shift) - 1);
            let high = base + (1u32 << shift) - 1;
            base <= u32::from(self.max_key[a]) && high >= u32::from(self.min_key[a])
        })
    }
}
