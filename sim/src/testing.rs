//! Test fixtures shared by unit tests.

use bevy_ecs::prelude::*;
use glam::Vec3;
use std::sync::Arc;

use crate::battle::{FrameEvents, PlayerState, SimClock, Viewer};
use crate::components::*;
use crate::config::SimConfig;
use crate::spatial::SpatialIndex;
use crate::systems::squad::Squads;
use crate::terrain::{Battlefield, TerrainGrid};

/// World with every simulation resource and a 500m index.
pub fn world() -> World {
    let mut world = World::new();
    world.insert_resource(SpatialIndex::with_half_extent(500.0));
    world.insert_resource(Squads::default());
    world.insert_resource(Battlefield::default());
    world.insert_resource(PlayerState::default());
    world.insert_resource(SimConfig::default());
    world.insert_resource(SimClock::default());
    world.insert_resource(Viewer::default());
    world.insert_resource(FrameEvents::default());
    world
}

/// Spawn an indexed combatant facing `+z`.
pub fn spawn(world: &mut World, faction: Faction, position: Vec3) -> CombatantId {
    let entity = world.spawn_empty().id();
    let id = CombatantId(entity);
    world
        .entity_mut(entity)
        .insert(Combatant::new(id, faction, position, BehaviorProfile::rifleman(), 0.0));
    world
        .resource_mut::<SpatialIndex>()
        .insert(id, position)
        .expect("index built");
    id
}

pub fn set_terrain(world: &mut World, grid: TerrainGrid) {
    world.resource_mut::<Battlefield>().terrain = Some(Arc::new(grid));
}

pub fn combatant(world: &World, id: CombatantId) -> &Combatant {
    world.get::<Combatant>(id.entity()).expect("combatant exists")
}

pub fn combatant_mut(world: &mut World, id: CombatantId) -> Mut<'_, Combatant> {
    world.get_mut::<Combatant>(id.entity()).expect("combatant exists")
}
