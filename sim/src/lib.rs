//! Skirmish Sim - Combatant Simulation Core
//!
//! AI, combat resolution and level-of-detail scheduling for hundreds of
//! autonomous combatants in a real-time 3D battle.
//! Uses `bevy_ecs` as the combatant store and `glam` for 3D math.

pub mod api;
pub mod battle;
pub mod components;
pub mod config;
pub mod error;
pub mod geometry;
pub mod profiler;
pub mod spatial;
pub mod systems;
pub mod terrain;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ForceLayout, SimWorld, SquadLayout};
pub use battle::{PlayerHit, PlayerState};
pub use components::*;
pub use config::{DeviceTier, SimConfig};
pub use error::{SimError, SimResult};
pub use geometry::{Aabb, Frustum, Ray};
pub use spatial::{SpatialIndex, SpatialQuery};
pub use systems::*;
pub use terrain::{
    CoverVolumeProvider, StaticCover, StaticZones, TerrainGrid, TerrainQuery, Zone, ZoneId,
    ZoneProvider, ZoneState,
};
pub use world::{AgentSnapshot, Snapshot, SquadSnapshot};
