//! Simulation configuration.
//!
//! `SimConfig` is a bevy resource and a serde document: hosts can ship it as
//! JSON and load it with [`SimConfig::from_json_str`]. Distance thresholds are
//! authored for a reference 500m half-extent world on a high-end device and are
//! scaled at runtime by [`SimConfig::lod_thresholds`].

use crate::error::{SimError, SimResult};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Reference world half-extent the base LOD distances are tuned for.
const REFERENCE_HALF_EXTENT: f32 = 500.0;

/// Upper bound on the world-size scaling factor.
const MAX_WORLD_FACTOR: f32 = 3.0;

/// Performance class of the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceTier {
    #[default]
    High,
    Medium,
    Low,
}

impl DeviceTier {
    /// Multiplier applied to LOD distance thresholds.
    pub fn distance_scale(&self) -> f32 {
        match self {
            DeviceTier::High => 1.0,
            DeviceTier::Medium => 0.85,
            DeviceTier::Low => 0.7,
        }
    }

    /// Multiplier applied to dynamic update intervals.
    pub fn interval_scale(&self) -> f32 {
        match self {
            DeviceTier::High => 1.0,
            DeviceTier::Medium => 1.25,
            DeviceTier::Low => 1.6,
        }
    }

    /// Frame rate the scheduler tries to hold on this device.
    pub fn target_fps(&self) -> f32 {
        match self {
            DeviceTier::High => 60.0,
            DeviceTier::Medium => 45.0,
            DeviceTier::Low => 30.0,
        }
    }
}

/// Configuration for the simulation core.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Half-extent of the playable square (agents live in `[-W, W]` on x and z).
    pub world_half_extent: f32,
    /// Host device class.
    pub device_tier: DeviceTier,
    /// Seed for the simulation RNG.
    pub seed: u64,
    /// Base distance (m) inside which agents are High LOD.
    pub lod_high_distance: f32,
    /// Base distance (m) inside which agents are Medium LOD.
    pub lod_medium_distance: f32,
    /// Base distance (m) inside which agents are Low LOD.
    pub lod_low_distance: f32,
    /// Number of frames High LOD full updates are spread over.
    pub stagger_high: u64,
    /// Number of frames Medium LOD full updates are spread over.
    pub stagger_medium: u64,
    /// Per-frame AI time budget in milliseconds at `interval_scale == 1`.
    pub ai_budget_ms: f32,
    /// Terrain line-of-sight raycasts allowed per frame.
    pub max_los_raycasts_per_frame: u32,
    /// Weapon-fire terrain raycasts allowed per frame.
    pub max_fire_raycasts_per_frame: u32,
    /// Octree leaf capacity before subdividing.
    pub index_node_capacity: usize,
    /// Maximum octree depth.
    pub index_max_depth: u8,
    /// Seconds between coarse updates for far culled agents.
    pub coarse_interval_secs: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_half_extent: REFERENCE_HALF_EXTENT,
            device_tier: DeviceTier::High,
            seed: 0x5EED,
            lod_high_distance: 120.0,
            lod_medium_distance: 250.0,
            lod_low_distance: 450.0,
            stagger_high: 3,
            stagger_medium: 2,
            ai_budget_ms: 4.0,
            max_los_raycasts_per_frame: 96,
            max_fire_raycasts_per_frame: 64,
            index_node_capacity: 8,
            index_max_depth: 8,
            coarse_interval_secs: 30.0,
        }
    }
}

/// LOD thresholds resolved for a particular world size and device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodThresholds {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
    /// Culled agents inside this range still get throttled basic movement.
    pub culled_near: f32,
    /// World-size scaling factor (>= 1).
    pub world_factor: f32,
    /// Combined interval widening for large worlds and weak devices.
    pub interval_factor: f32,
}

impl LodThresholds {
    pub fn high_sq(&self) -> f32 {
        self.high * self.high
    }

    pub fn medium_sq(&self) -> f32 {
        self.medium * self.medium
    }

    pub fn low_sq(&self) -> f32 {
        self.low * self.low
    }

    pub fn culled_near_sq(&self) -> f32 {
        self.culled_near * self.culled_near
    }
}

impl SimConfig {
    /// Parse and validate a JSON configuration document.
    /// Missing fields take their default values.
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: SimConfig =
            serde_json::from_str(json).map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> SimResult<()> {
        if !(self.world_half_extent > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "world_half_extent must be positive, got {}",
                self.world_half_extent
            )));
        }
        if !(self.lod_high_distance > 0.0
            && self.lod_medium_distance > self.lod_high_distance
            && self.lod_low_distance > self.lod_medium_distance)
        {
            return Err(SimError::InvalidConfig(
                "LOD distances must satisfy 0 < high < medium < low".to_string(),
            ));
        }
        if self.stagger_high == 0 || self.stagger_medium == 0 {
            return Err(SimError::InvalidConfig("stagger counts must be >= 1".to_string()));
        }
        if self.index_node_capacity == 0 {
            return Err(SimError::InvalidConfig("index_node_capacity must be >= 1".to_string()));
        }
        if !(self.ai_budget_ms >= 0.0) || !(self.coarse_interval_secs > 0.0) {
            return Err(SimError::InvalidConfig(
                "ai_budget_ms must be >= 0 and coarse_interval_secs > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// World-size scaling factor: grows with the square root of the extent.
    pub fn world_factor(&self) -> f32 {
        (self.world_half_extent / REFERENCE_HALF_EXTENT)
            .sqrt()
            .clamp(1.0, MAX_WORLD_FACTOR)
    }

    /// Resolve distance thresholds for the configured world and device.
    pub fn lod_thresholds(&self) -> LodThresholds {
        let world_factor = self.world_factor();
        let scale = world_factor * self.device_tier.distance_scale();
        let low = self.lod_low_distance * scale;
        LodThresholds {
            high: self.lod_high_distance * scale,
            medium: self.lod_medium_distance * scale,
            low,
            culled_near: low * 1.5,
            world_factor,
            interval_factor: world_factor * self.device_tier.interval_scale(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_thresholds_scale_with_world_size() {
        let small = SimConfig::default().lod_thresholds();
        let large = SimConfig {
            world_half_extent: 2000.0,
            ..Default::default()
        }
        .lod_thresholds();

        assert_eq!(small.world_factor, 1.0);
        assert!((large.world_factor - 2.0).abs() < 1e-4);
        assert!(large.high > small.high);
        assert!(large.low > small.low);
    }

    #[test]
    fn test_weak_device_shrinks_ranges_and_widens_intervals() {
        let high = SimConfig::default().lod_thresholds();
        let low = SimConfig {
            device_tier: DeviceTier::Low,
            ..Default::default()
        }
        .lod_thresholds();

        assert!(low.high < high.high);
        assert!(low.interval_factor > high.interval_factor);
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = SimConfig::from_json_str(r#"{ "world_half_extent": 800.0, "device_tier": "Medium" }"#)
            .unwrap();
        assert_eq!(config.world_half_extent, 800.0);
        assert_eq!(config.device_tier, DeviceTier::Medium);
        assert_eq!(config.stagger_high, 3);
    }

    #[test]
    fn test_from_json_rejects_inverted_thresholds() {
        let err = SimConfig::from_json_str(r#"{ "lod_high_distance": 500.0 }"#).unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
    }
}
