//! Persistence for occupancy octrees.

pub mod binary;
