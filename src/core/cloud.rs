//! Point cloud container for range-sensor endpoints.

use serde::{Deserialize, Serialize};

use super::point::Point3D;
use super::pose::Pose6D;

/// An ordered sequence of 3D measurement endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    points: Vec<Point3D>,
}

impl PointCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cloud from existing points.
    pub fn from_points(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    /// Append an endpoint.
    #[inline]
    pub fn push(&mut self, point: Point3D) {
        self.points.push(point);
    }

    /// Number of endpoints.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate over the endpoints.
    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }

    /// Return a copy with every endpoint moved into the frame of `pose`.
    pub fn transformed(&self, pose: &Pose6D) -> PointCloud {
        PointCloud {
            points: self
                .points
                .iter()
                .map(|p| pose.transform_point(*p))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point3D;
    type IntoIter = std::slice::Iter<'a, Point3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
