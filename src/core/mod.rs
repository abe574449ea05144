//! Foundation types: points, rigid transforms, point clouds.

mod cloud;
mod point;
mod pose;

pub use cloud::PointCloud;
pub use point::Point3D;
pub use pose::{Pose6D, Quaternion};
