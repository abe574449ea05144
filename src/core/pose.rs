//! Rigid 6-DoF transforms for expressing scans in the global frame.

use serde::{Deserialize, Serialize};

use super::point::Point3D;

/// Unit quaternion representing a 3D rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// Scalar part
    pub w: f64,
    /// X component of the vector part
    pub x: f64,
    /// Y component of the vector part
    pub y: f64,
    /// Z component of the vector part
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion from components, normalizing to unit length.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        let n = (w * w + x * x + y * y + z * z).sqrt();
        if n > 0.0 {
            Self {
                w: w / n,
                x: x / n,
                y: y / n,
                z: z / n,
            }
        } else {
            Self::identity()
        }
    }

    /// The identity rotation.
    #[inline]
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Build a rotation from intrinsic roll/pitch/yaw angles (radians).
    ///
    /// Applied in Z-Y-X order, the aerospace convention.
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();

        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Rotate a point.
    ///
    /// ```text
    /// p' = p + 2w(v × p) + 2(v × (v × p)),  v = (x, y, z)
    /// ```
    #[inline]
    pub fn rotate(&self, point: Point3D) -> Point3D {
        let v = Point3D::new(self.x, self.y, self.z);
        let t = v.cross(&point) * 2.0;
        point + t * self.w + v.cross(&t)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Rigid transform: rotation followed by translation.
///
/// Application is `p' = R·p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose6D {
    /// Translation in meters
    pub translation: Point3D,
    /// Rotation as a unit quaternion
    pub rotation: Quaternion,
}

impl Pose6D {
    /// Create a pose from translation and rotation.
    #[inline]
    pub fn new(translation: Point3D, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Identity pose at the origin with no rotation.
    #[inline]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Transform a point from the local frame to the global frame.
    #[inline]
    pub fn transform_point(&self, point: Point3D) -> Point3D {
        self.rotation.rotate(point) + self.translation
    }
}
