//! 3D digital differential analyser for voxel ray traversal.
//!
//! Walks the sequence of finest-resolution voxels a ray passes through
//! (Amanatides & Woo). Per axis, `t_max` is the parametric distance at
//! which the ray crosses the next voxel boundary and `t_delta` the
//! distance between consecutive crossings; each step advances the axis
//! with the smallest `t_max`:
//!
//! ```text
//!        │      │      │      │
//!   ─────┼──────┼──────●──────┼──   t_max[x] ─ crossings of vertical
//!        │      │    ● │      │                 boundaries
//!        │      │  ●   │      │
//!   ─────┼─────●┼──────┼──────┼──   t_max[y] ─ crossings of horizontal
//!        │   ●  │      │      │                 boundaries
//!        │ ●    │      │      │
//! ```
//!
//! Comparisons are strict `<` with ties resolved x before y before z, so
//! diagonal rays yield a reproducible key sequence.

use crate::core::Point3D;
use crate::error::Result;

use super::key::{KeyCodec, VoxelKey, KEY_SPAN};

/// Iterator over the voxel keys crossed by a ray.
///
/// Two forms exist: [`VoxelRay::between`] walks from an origin to an end
/// point, yielding the origin voxel and every intermediate voxel but not
/// the end voxel; [`VoxelRay::toward`] walks open-ended along a direction,
/// yielding every voxel after the origin voxel until the range limit or
/// the edge of the key space.
#[derive(Debug)]
pub struct VoxelRay {
    current: [i32; 3],
    step: [i32; 3],
    t_max: [f64; 3],
    t_delta: [f64; 3],
    /// End key for the bounded form (never emitted).
    end: Option<[i32; 3]>,
    /// Ray length in meters for the bounded form.
    length: f64,
    /// Range limit for the open-ended form (<= 0: none).
    max_range: f64,
    emit_start: bool,
    done: bool,
}

impl VoxelRay {
    /// Ray from `origin` to `end`, both of which must lie in the key space.
    ///
    /// Yields nothing when both points fall into the same voxel.
    pub fn between(origin: Point3D, end: Point3D, codec: KeyCodec) -> Result<VoxelRay> {
        let start_key = codec.point_to_key(origin)?;
        let end_key = codec.point_to_key(end)?;

        let direction = end - origin;
        let length = direction.norm();
        let same_voxel = start_key == end_key;

        let mut ray = Self::init(origin, direction, start_key, codec);
        ray.end = Some([
            i32::from(end_key[0]),
            i32::from(end_key[1]),
            i32::from(end_key[2]),
        ]);
        ray.length = length;
        ray.emit_start = !same_voxel;
        ray.done = same_voxel;
        Ok(ray)
    }

    /// Open-ended ray from `origin` along `direction`.
    ///
    /// The origin voxel itself is not yielded. `max_range <= 0` disables
    /// the range limit; traversal then ends at the edge of the key space.
    pub fn toward(
        origin: Point3D,
        direction: Point3D,
        max_range: f64,
        codec: KeyCodec,
    ) -> Result<VoxelRay> {
        let start_key = codec.point_to_key(origin)?;
        let norm = direction.norm();
        let mut ray = Self::init(origin, direction, start_key, codec);
        ray.max_range = max_range;
        ray.done = norm == 0.0;
        Ok(ray)
    }

    fn init(origin: Point3D, direction: Point3D, start_key: VoxelKey, codec: KeyCodec) -> VoxelRay {
        let resolution = codec.resolution();
        let direction = direction.normalized().unwrap_or(Point3D::ZERO);

        let mut step = [0i32; 3];
        let mut t_max = [f64::INFINITY; 3];
        let mut t_delta = [f64::INFINITY; 3];

        for axis in 0..3 {
            let d = direction[axis];
            if d != 0.0 {
                step[axis] = if d > 0.0 { 1 } else { -1 };
                // Distance from the origin to the first boundary crossing
                let voxel_border = codec.key_to_coord(start_key[axis])
                    + f64::from(step[axis]) * 0.5 * resolution;
                t_max[axis] = (voxel_border - origin[axis]) / d;
                t_delta[axis] = resolution / d.abs();
            }
        }

        VoxelRay {
            current: [
                i32::from(start_key[0]),
                i32::from(start_key[1]),
                i32::from(start_key[2]),
            ],
            step,
            t_max,
            t_delta,
            end: None,
            length: 0.0,
            max_range: -1.0,
            emit_start: false,
            done: false,
        }
    }

    #[inline]
    fn current_key(&self) -> VoxelKey {
        VoxelKey([
            self.current[0] as u16,
            self.current[1] as u16,
            self.current[2] as u16,
        ])
    }
}

impl Iterator for VoxelRay {
    type Item = VoxelKey;

    fn next(&mut self) -> Option<VoxelKey> {
        if self.done {
            return None;
        }
        if self.emit_start {
            self.emit_start = false;
            return Some(self.current_key());
        }

        // Advance the axis with the smallest boundary distance; ties
        // resolve to the lowest axis index.
        let mut axis = 0;
        if self.t_max[1] < self.t_max[0] {
            axis = 1;
        }
        if self.t_max[2] < self.t_max[axis] {
            axis = 2;
        }

        let t_entry = self.t_max[axis];
        self.current[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];

        if self.current[axis] < 0 || self.current[axis] >= KEY_SPAN as i32 {
            self.done = true;
            return None;
        }

        if let Some(end) = self.end {
            if self.current == end {
                self.done = true;
                return None;
            }
            // Numerical backstop: past the segment length without having
            // matched the end key exactly.
            let t_min = self.t_max[0].min(self.t_max[1]).min(self.t_max[2]);
            if t_min > self.length {
                self.done = true;
                return None;
            }
        } else if self.max_range > 0.0 && t_entry > self.max_range {
            self.done = true;
            return None;
        }

        Some(self.current_key())
    }
}
