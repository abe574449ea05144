//! Occupancy sensor-model configuration.
//!
//! Parameters are specified in the probability domain and converted to
//! log-odds when the tree is built:
//!
//! ```text
//! log_odds = log(p / (1 - p))
//!
//! Update: log_odds_new = clamp(log_odds_old + log_odds_observation)
//! ```
//!
//! The clamping bounds keep cells responsive to new evidence instead of
//! saturating after many identical observations.

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

/// Convert a probability to log-odds.
#[inline]
pub fn log_odds(probability: f64) -> f32 {
    (probability / (1.0 - probability)).ln() as f32
}

/// Convert log-odds back to a probability.
#[inline]
pub fn probability(log_odds: f32) -> f64 {
    1.0 / (1.0 + (-f64::from(log_odds)).exp())
}

/// Sensor model for occupancy updates, in the probability domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyConfig {
    /// Voxel edge length in meters.
    pub resolution: f64,

    /// Probability assigned to a "hit" observation.
    ///
    /// Must be >= 0.5 so a hit never decreases occupancy. Typical: 0.7
    pub prob_hit: f64,

    /// Probability assigned to a "miss" observation.
    ///
    /// Must be <= 0.5 so a miss never increases occupancy. Typical: 0.4
    pub prob_miss: f64,

    /// Probability above which a voxel counts as occupied.
    pub occupancy_threshold: f64,

    /// Lower clamping bound (probability).
    pub clamping_min: f64,

    /// Upper clamping bound (probability).
    pub clamping_max: f64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            resolution: 0.05, // 5cm voxels
            prob_hit: 0.7,
            prob_miss: 0.4,
            occupancy_threshold: 0.5,
            clamping_min: 0.1192,
            clamping_max: 0.971,
        }
    }
}

impl OccupancyConfig {
    /// Check the sign constraints of the sensor model.
    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(MapError::InvalidParameter(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.prob_hit < 0.5 || self.prob_hit >= 1.0 {
            return Err(MapError::InvalidParameter(format!(
                "prob_hit must be in [0.5, 1), got {}",
                self.prob_hit
            )));
        }
        if self.prob_miss > 0.5 || self.prob_miss <= 0.0 {
            return Err(MapError::InvalidParameter(format!(
                "prob_miss must be in (0, 0.5], got {}",
                self.prob_miss
            )));
        }
        if self.occupancy_threshold <= 0.0 || self.occupancy_threshold >= 1.0 {
            return Err(MapError::InvalidParameter(format!(
                "occupancy_threshold must be in (0, 1), got {}",
                self.occupancy_threshold
            )));
        }
        if self.clamping_min <= 0.0
            || self.clamping_max >= 1.0
            || self.clamping_min >= self.clamping_max
        {
            return Err(MapError::InvalidParameter(format!(
                "clamping bounds must satisfy 0 < min < max < 1, got [{}, {}]",
                self.clamping_min, self.clamping_max
            )));
        }
        Ok(())
    }
}
