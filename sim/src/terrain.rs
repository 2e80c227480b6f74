//! Battlefield collaborators: terrain, objective zones and cover volumes.
//!
//! The simulation never owns terrain or game-mode data. It reads them through
//! the narrow traits below, held in the [`Battlefield`] resource. Every
//! collaborator is optional; a missing one disables the feature that needs it.
//!
//! [`TerrainGrid`], [`StaticZones`] and [`StaticCover`] are reference
//! implementations for demos and tests.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::components::Faction;
use crate::geometry::{Aabb, Ray};

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Height and line-of-sight queries against the ground.
pub trait TerrainQuery: Send + Sync {
    /// Ground height at world `(x, z)`.
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// Distance along `direction` at which the ray first enters the ground,
    /// if within `max_distance`.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32>;
}

/// Objective zones.
pub trait ZoneProvider: Send + Sync {
    fn zones(&self) -> Vec<Zone>;
}

/// Static cover volumes (sandbags, walls).
pub trait CoverVolumeProvider: Send + Sync {
    fn cover_volumes(&self) -> Vec<Aabb>;
}

// ============================================================================
// ZONES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoneState {
    #[default]
    Neutral,
    Contested,
    Captured,
}

/// Capturable objective area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub position: Vec3,
    pub radius: f32,
    pub owner: Option<Faction>,
    pub state: ZoneState,
    pub is_home_base: bool,
    /// Tickets per second drained from the side that does not hold it.
    pub ticket_bleed_rate: f32,
}

impl Zone {
    pub fn new(id: u32, position: Vec3, radius: f32) -> Self {
        Self {
            id: ZoneId(id),
            position,
            radius,
            owner: None,
            state: ZoneState::Neutral,
            is_home_base: false,
            ticket_bleed_rate: 1.0,
        }
    }

    pub fn owned_by(mut self, faction: Faction) -> Self {
        self.owner = Some(faction);
        self.state = ZoneState::Captured;
        self
    }

    pub fn home_base(mut self) -> Self {
        self.is_home_base = true;
        self
    }
}

// ============================================================================
// BATTLEFIELD RESOURCE
// ============================================================================

/// Attached collaborators plus the zone and cover data read this frame.
#[derive(Resource, Default, Clone)]
pub struct Battlefield {
    pub terrain: Option<Arc<dyn TerrainQuery>>,
    pub zone_provider: Option<Arc<dyn ZoneProvider>>,
    pub cover_provider: Option<Arc<dyn CoverVolumeProvider>>,
    /// Zones as of the last `refresh`.
    pub zones: Vec<Zone>,
    /// Cover volumes as of the last `refresh`.
    pub cover_volumes: Vec<Aabb>,
}

impl Battlefield {
    /// Pull zone and cover data from the providers.
    pub fn refresh(&mut self) {
        self.zones = self
            .zone_provider
            .as_ref()
            .map(|p| p.zones())
            .unwrap_or_default();
        self.cover_volumes = self
            .cover_provider
            .as_ref()
            .map(|p| p.cover_volumes())
            .unwrap_or_default();
    }

    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        self.terrain.as_ref().map(|t| t.height_at(x, z))
    }

    /// Whether terrain blocks the segment `from → to`.
    /// `None` when no terrain is attached.
    pub fn terrain_blocks(&self, from: Vec3, to: Vec3) -> Option<bool> {
        let terrain = self.terrain.as_ref()?;
        let delta = to - from;
        let distance = delta.length();
        if distance <= f32::EPSILON {
            return Some(false);
        }
        Some(terrain.raycast(from, delta / distance, distance).is_some())
    }

    /// Whether any cover volume blocks the segment `from → to`.
    pub fn volume_blocks(&self, from: Vec3, to: Vec3) -> bool {
        let distance = from.distance(to);
        if distance <= f32::EPSILON {
            return false;
        }
        let ray = Ray::between(from, to);
        self.cover_volumes
            .iter()
            .any(|v| v.ray_intersection(&ray, distance).is_some())
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }
}

impl std::fmt::Debug for Battlefield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Battlefield")
            .field("terrain", &self.terrain.is_some())
            .field("zone_provider", &self.zone_provider.is_some())
            .field("cover_provider", &self.cover_provider.is_some())
            .field("zones", &self.zones.len())
            .field("cover_volumes", &self.cover_volumes.len())
            .finish()
    }
}

// ============================================================================
// REFERENCE HEIGHTFIELD
// ============================================================================

/// Grid-based terrain heightmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainGrid {
    /// Width of the grid in cells (x axis).
    pub width: usize,
    /// Depth of the grid in cells (z axis).
    pub depth: usize,
    /// Size of each cell in world units.
    pub cell_size: f32,
    /// World position of cell (0, 0).
    pub origin_x: f32,
    pub origin_z: f32,
    /// Heights at cell centres (row-major, z rows).
    pub heights: Vec<f32>,
}

impl TerrainGrid {
    /// Flat grid centred on the origin.
    pub fn new(width: usize, depth: usize, cell_size: f32) -> Self {
        Self {
            width,
            depth,
            cell_size,
            origin_x: -(width as f32 * cell_size) / 2.0,
            origin_z: -(depth as f32 * cell_size) / 2.0,
            heights: vec![0.0; width * depth],
        }
    }

    /// Grid with a few hills, for demos.
    pub fn new_with_features(width: usize, depth: usize, cell_size: f32) -> Self {
        let mut grid = Self::new(width, depth, cell_size);
        let span_x = width as f32 * cell_size;
        let span_z = depth as f32 * cell_size;
        grid.raise_hill(-span_x * 0.25, -span_z * 0.25, span_x * 0.08, 12.0);
        grid.raise_hill(span_x * 0.25, span_z * 0.2, span_x * 0.06, 9.0);
        grid.raise_hill(0.0, span_z * 0.3, span_x * 0.05, 6.0);
        grid
    }

    /// Convert grid coordinates to world coordinates (centre of cell).
    pub fn grid_to_world(&self, gx: usize, gz: usize) -> (f32, f32) {
        (
            self.origin_x + (gx as f32 + 0.5) * self.cell_size,
            self.origin_z + (gz as f32 + 0.5) * self.cell_size,
        )
    }

    /// Add a smooth mound of `height` at world `(cx, cz)`.
    pub fn raise_hill(&mut self, cx: f32, cz: f32, radius: f32, height: f32) {
        if radius <= 0.0 {
            return;
        }
        for gz in 0..self.depth {
            for gx in 0..self.width {
                let (x, z) = self.grid_to_world(gx, gz);
                let d = ((x - cx).powi(2) + (z - cz).powi(2)).sqrt();
                if d < radius {
                    let falloff = 0.5 * (1.0 + (std::f32::consts::PI * d / radius).cos());
                    let i = gz * self.width + gx;
                    self.heights[i] += height * falloff;
                }
            }
        }
    }

    /// Raise every cell whose centre lies inside the x/z rectangle to `height`.
    pub fn raise_block(&mut self, min_x: f32, min_z: f32, max_x: f32, max_z: f32, height: f32) {
        for gz in 0..self.depth {
            for gx in 0..self.width {
                let (x, z) = self.grid_to_world(gx, gz);
                if (min_x..=max_x).contains(&x) && (min_z..=max_z).contains(&z) {
                    let i = gz * self.width + gx;
                    self.heights[i] = self.heights[i].max(height);
                }
            }
        }
    }

    /// Bilinear height between cell centres.
    pub fn get_height_at(&self, world_x: f32, world_z: f32) -> f32 {
        if self.width == 0 || self.depth == 0 {
            return 0.0;
        }
        let fx = ((world_x - self.origin_x) / self.cell_size - 0.5).clamp(0.0, (self.width - 1) as f32);
        let fz = ((world_z - self.origin_z) / self.cell_size - 0.5).clamp(0.0, (self.depth - 1) as f32);
        let x0 = fx.floor() as usize;
        let z0 = fz.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let z1 = (z0 + 1).min(self.depth - 1);
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let h = |x: usize, z: usize| self.heights[z * self.width + x];
        let top = h(x0, z0) * (1.0 - tx) + h(x1, z0) * tx;
        let bottom = h(x0, z1) * (1.0 - tx) + h(x1, z1) * tx;
        top * (1.0 - tz) + bottom * tz
    }
}

impl TerrainQuery for TerrainGrid {
    fn height_at(&self, x: f32, z: f32) -> f32 {
        self.get_height_at(x, z)
    }

    /// Fixed-step march at half a cell.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO || max_distance <= 0.0 {
            return None;
        }
        let step = (self.cell_size * 0.5).max(0.1);
        let mut t = step;
        while t < max_distance {
            let p = origin + direction * t;
            if p.y < self.get_height_at(p.x, p.z) {
                return Some(t);
            }
            t += step;
        }
        None
    }
}

/// Zone list held behind a lock so hosts can flip ownership at runtime.
#[derive(Debug, Default)]
pub struct StaticZones {
    zones: RwLock<Vec<Zone>>,
}

impl StaticZones {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self {
            zones: RwLock::new(zones),
        }
    }

    /// Change the owner of a zone. Returns whether the zone exists.
    pub fn set_owner(&self, id: ZoneId, owner: Option<Faction>) -> bool {
        let Ok(mut zones) = self.zones.write() else {
            return false;
        };
        match zones.iter_mut().find(|z| z.id == id) {
            Some(zone) => {
                zone.owner = owner;
                zone.state = if owner.is_some() {
                    ZoneState::Captured
                } else {
                    ZoneState::Neutral
                };
                true
            }
            None => false,
        }
    }
}

impl ZoneProvider for StaticZones {
    fn zones(&self) -> Vec<Zone> {
        self.zones.read().map(|z| z.clone()).unwrap_or_default()
    }
}

/// Fixed set of cover volumes.
#[derive(Debug, Clone, Default)]
pub struct StaticCover(pub Vec<Aabb>);

impl CoverVolumeProvider for StaticCover {
    fn cover_volumes(&self) -> Vec<Aabb> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terrain_grid_creation() {
        let grid = TerrainGrid::new(100, 100, 2.0);
        assert_eq!(grid.width, 100);
        assert_eq!(grid.depth, 100);
        assert_eq!(grid.heights.len(), 10000);
    }

    #[test]
    fn test_grid_to_world_is_cell_centre() {
        let grid = TerrainGrid::new(100, 100, 2.0);
        // Origin at (-100, -100)
        assert_eq!(grid.grid_to_world(0, 0), (-99.0, -99.0));
        assert_eq!(grid.grid_to_world(50, 99), (1.0, 99.0));
    }

    #[test]
    fn test_hill_raises_height() {
        let mut grid = TerrainGrid::new(50, 50, 2.0);
        grid.raise_hill(0.0, 0.0, 10.0, 5.0);
        assert!(grid.get_height_at(0.0, 0.0) > 4.0);
        assert_eq!(grid.get_height_at(40.0, 40.0), 0.0);
    }

    #[test]
    fn test_raycast_hits_wall() {
        let mut grid = TerrainGrid::new(100, 100, 1.0);
        grid.raise_block(-20.0, 9.0, 20.0, 11.0, 10.0);

        let origin = Vec3::new(0.0, 1.5, 0.0);
        let hit = grid.raycast(origin, Vec3::Z, 30.0);
        assert!(hit.is_some());
        assert!(hit.unwrap() < 11.0);

        // Flat ground, parallel ray: no hit.
        assert!(grid.raycast(origin, Vec3::X, 30.0).is_none());
    }

    #[test]
    fn test_battlefield_without_terrain() {
        let field = Battlefield::default();
        assert_eq!(field.height_at(0.0, 0.0), None);
        assert_eq!(field.terrain_blocks(Vec3::ZERO, Vec3::X), None);
        assert!(!field.volume_blocks(Vec3::ZERO, Vec3::X * 10.0));
    }

    #[test]
    fn test_battlefield_volume_blocks() {
        let mut field = Battlefield {
            cover_provider: Some(Arc::new(StaticCover(vec![Aabb::from_center(
                Vec3::new(0.0, 1.0, 5.0),
                Vec3::new(2.0, 1.0, 0.5),
            )]))),
            ..Default::default()
        };
        field.refresh();
        assert!(field.volume_blocks(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 10.0)));
        assert!(!field.volume_blocks(Vec3::new(10.0, 1.0, 0.0), Vec3::new(10.0, 1.0, 10.0)));
    }

    #[test]
    fn test_static_zones_set_owner() {
        let zones = StaticZones::new(vec![Zone::new(1, Vec3::ZERO, 15.0)]);
        assert!(zones.set_owner(ZoneId(1), Some(Faction::Red)));
        assert!(!zones.set_owner(ZoneId(9), None));
        let z = &zones.zones()[0];
        assert_eq!(z.owner, Some(Faction::Red));
        assert_eq!(z.state, ZoneState::Captured);
    }
}
