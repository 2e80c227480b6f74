//! Public API for the simulation.
//!
//! `SimWorld` is the interface a host (game client, demo, test) uses to
//! drive the simulation: step it once per rendered frame, feed it the
//! viewer and player state, fire player shots into it, command squads, and
//! read snapshots back out.
//!
//! ## Frame Step
//!
//! `tick(dt)` runs one variable-length frame:
//! 1. advance the clock and pull zone/cover data from the collaborators
//! 2. run the LOD scheduler (death animations, removal, classification,
//!    per-tier updates)
//! 3. drain the frame's events into a [`FrameReport`]
//!
//! ## Performance
//!
//! - **LOD tiers**: agents far from the viewer update less often, or coarsely
//! - **Staggering**: near agents' full updates are spread over frames
//! - **Budgets**: AI time and terrain raycasts are capped per frame

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::battle::{FrameEvents, PlayerState, SimClock, SimRng, Viewer};
use crate::components::*;
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::geometry::{facing_toward, Aabb, Ray};
use crate::profiler::Profiler;
use crate::spatial::SpatialIndex;
use crate::systems::combat::{self, DamageOutcome, PlayerShotResult, WeaponProfile};
use crate::systems::lod::{FrameReport, LodScheduler, LodStats};
use crate::systems::pipeline;
use crate::systems::squad::{join_squad, SquadCommand, SquadId, Squads};
use crate::terrain::{Battlefield, CoverVolumeProvider, TerrainQuery, ZoneProvider};
use crate::world::{AgentSnapshot, Snapshot};

// ============================================================================
// FORCE LAYOUT
// ============================================================================

/// One squad to place when seeding forces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadLayout {
    pub faction: Faction,
    /// Centre of the squad's starting formation.
    pub center: Vec3,
    pub size: usize,
    /// Distance between members in the formation grid.
    pub spacing: f32,
    /// Members push toward objectives and only fight when pressed.
    #[serde(default)]
    pub objective_focused: bool,
}

/// Starting forces for both sides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForceLayout {
    pub squads: Vec<SquadLayout>,
}

impl ForceLayout {
    /// `squads_per_side` squads per faction, facing each other across the
    /// x axis `separation` metres apart.
    pub fn opposing_lines(squads_per_side: usize, squad_size: usize, separation: f32) -> Self {
        let mut squads = Vec::with_capacity(squads_per_side * 2);
        let lane = 20.0;
        for i in 0..squads_per_side {
            let z = (i as f32 - (squads_per_side as f32 - 1.0) / 2.0) * lane;
            for (faction, x) in [(Faction::Blue, -separation / 2.0), (Faction::Red, separation / 2.0)] {
                squads.push(SquadLayout {
                    faction,
                    center: Vec3::new(x, 0.0, z),
                    size: squad_size,
                    spacing: 3.0,
                    objective_focused: i % 3 == 2,
                });
            }
        }
        Self { squads }
    }

    pub fn total_agents(&self) -> usize {
        self.squads.iter().map(|s| s.size).sum()
    }
}

// ============================================================================
// SIM WORLD
// ============================================================================

/// The main simulation world container.
///
/// Holds the ECS world, the LOD scheduler, the simulation RNG and the
/// profiler, providing a clean API for:
/// - Stepping the simulation forward
/// - Spawning, removing and seeding combatants and squads
/// - Player fire, damage and squad commands
/// - Extracting state snapshots
pub struct SimWorld {
    world: World,
    scheduler: LodScheduler,
    rng: SimRng,
    profiler: Profiler,
}

impl SimWorld {
    /// Create a simulation with the default configuration.
    pub fn new() -> Self {
        Self::build(SimConfig::default())
    }

    /// Create a simulation with a custom configuration.
    pub fn with_config(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        let mut world = World::new();
        let bounds = Aabb::cube(config.world_half_extent);
        world.insert_resource(SpatialIndex::new(
            bounds,
            config.index_node_capacity,
            config.index_max_depth,
        ));
        world.insert_resource(Squads::default());
        world.insert_resource(Battlefield::default());
        world.insert_resource(PlayerState::default());
        world.insert_resource(SimClock::default());
        world.insert_resource(Viewer::default());
        world.insert_resource(FrameEvents::default());

        let scheduler = LodScheduler::new(&config);
        let rng = SimRng::seed_from_u64(config.seed);
        world.insert_resource(config);

        Self {
            world,
            scheduler,
            rng,
            profiler: Profiler::new(),
        }
    }

    /// Advance the simulation by one frame of `dt` seconds.
    pub fn tick(&mut self, dt: f32) -> SimResult<FrameReport> {
        if !self.world.resource::<SpatialIndex>().is_built() {
            return Err(SimError::IndexNotBuilt);
        }
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.world.resource_mut::<SimClock>().advance(dt);
        self.world.resource_mut::<Battlefield>().refresh();

        let stats = self
            .scheduler
            .run_frame(&mut self.world, &mut self.rng, &mut self.profiler)?;
        self.profiler.tick();

        let clock = *self.world.resource::<SimClock>();
        let events = std::mem::take(&mut *self.world.resource_mut::<FrameEvents>());
        Ok(FrameReport {
            frame: clock.frame,
            elapsed: clock.elapsed,
            stats,
            deaths: events.deaths,
            removed: events.removed,
            player_hits: events.player_hits,
            shots_fired: events.shots_fired,
        })
    }

    // ------------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------------

    /// Resolve a player shot along `ray`. `damage_fn(weapon, distance, headshot)`
    /// computes the damage before hit-zone scaling.
    pub fn fire_from_player<F>(&mut self, ray: &Ray, damage_fn: F, weapon: &WeaponProfile) -> SimResult<PlayerShotResult>
    where
        F: Fn(&WeaponProfile, f32, bool) -> f32,
    {
        combat::fire_from_player(&mut self.world, ray, damage_fn, weapon)
    }

    /// Damage a combatant directly (explosions, scripted events).
    pub fn apply_damage(
        &mut self,
        target: CombatantId,
        amount: f32,
        attacker: Option<TargetRef>,
        headshot: bool,
    ) -> SimResult<DamageOutcome> {
        combat::apply_damage(&mut self.world, target, amount, attacker, headshot)
    }

    /// Disorient every combatant within `radius` of `center` for `duration` seconds.
    pub fn apply_flash(&mut self, center: Vec3, radius: f32, duration: f32) -> SimResult<usize> {
        combat::apply_flash(&mut self.world, center, radius, duration)
    }

    // ------------------------------------------------------------------------
    // Squads
    // ------------------------------------------------------------------------

    pub fn create_squad(&mut self, faction: Faction) -> SquadId {
        self.world.resource_mut::<Squads>().create(faction)
    }

    /// Put a squad under player command. `SquadCommand::None` releases it.
    pub fn issue_squad_command(&mut self, squad: SquadId, command: SquadCommand, origin: Vec3) -> SimResult<()> {
        let result = self
            .world
            .resource_mut::<Squads>()
            .issue_command(squad, command, origin);
        if let Err(e) = &result {
            warn!(error = %e, "squad command ignored");
        }
        result
    }

    pub fn squads(&self) -> &Squads {
        self.world.resource::<Squads>()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Spawn a combatant, optionally into a squad. The first member of a
    /// squad becomes its leader.
    pub fn spawn(&mut self, faction: Faction, position: Vec3, squad: Option<SquadId>) -> SimResult<CombatantId> {
        let leads = match squad {
            Some(id) => self
                .world
                .resource::<Squads>()
                .get(id)
                .map(|s| s.members.is_empty())
                .ok_or(SimError::UnknownSquad(id))?,
            None => false,
        };
        let profile = if leads {
            BehaviorProfile::squad_leader()
        } else {
            BehaviorProfile::rifleman()
        };
        self.spawn_with_profile(faction, position, squad, profile)
    }

    /// Spawn a combatant with an explicit behaviour profile.
    pub fn spawn_with_profile(
        &mut self,
        faction: Faction,
        position: Vec3,
        squad: Option<SquadId>,
        profile: BehaviorProfile,
    ) -> SimResult<CombatantId> {
        if let Some(id) = squad {
            if self.world.resource::<Squads>().get(id).is_none() {
                return Err(SimError::UnknownSquad(id));
            }
        }

        let half = self.world.resource::<SimConfig>().world_half_extent;
        let mut position = Vec3::new(position.x.clamp(-half, half), position.y, position.z.clamp(-half, half));
        if let Some(ground) = self.world.resource::<Battlefield>().height_at(position.x, position.z) {
            position.y = ground;
        }
        let now = self.world.resource::<SimClock>().elapsed;

        let entity = self.world.spawn_empty().id();
        let id = CombatantId(entity);
        let mut combatant = Combatant::new(id, faction, position, profile, now);
        combatant.facing = facing_toward(position, Vec3::new(0.0, position.y, 0.0));
        combatant.visual_facing = combatant.facing;
        self.world.entity_mut(entity).insert(combatant);

        if let Err(e) = self.world.resource_mut::<SpatialIndex>().insert(id, position) {
            self.world.despawn(entity);
            return Err(e);
        }
        if let Some(squad) = squad {
            join_squad(&mut self.world, id, squad)?;
        }
        debug!(combatant = %id, faction = faction.as_str(), "combatant spawned");
        Ok(id)
    }

    /// Remove a combatant immediately. Returns false if it does not exist.
    pub fn remove(&mut self, id: CombatantId) -> bool {
        let removed = pipeline::remove_combatant(&mut self.world, id);
        if !removed {
            warn!(combatant = %id, "remove of unknown combatant");
        }
        removed
    }

    /// Replace every combatant and squad with `layout`.
    pub fn seed_forces(&mut self, layout: &ForceLayout) -> SimResult<Vec<SquadId>> {
        self.clear_forces();

        let mut created = Vec::with_capacity(layout.squads.len());
        for squad_layout in &layout.squads {
            let squad = self.create_squad(squad_layout.faction);
            let cols = (squad_layout.size as f32).sqrt().ceil().max(1.0) as usize;
            for i in 0..squad_layout.size {
                let row = (i / cols) as f32;
                let col = (i % cols) as f32;
                let offset = Vec3::new(
                    (col - (cols as f32 - 1.0) / 2.0) * squad_layout.spacing,
                    0.0,
                    (row - (cols as f32 - 1.0) / 2.0) * squad_layout.spacing,
                );
                let profile = if i == 0 {
                    BehaviorProfile::squad_leader()
                } else if squad_layout.objective_focused {
                    BehaviorProfile::assault()
                } else {
                    BehaviorProfile::rifleman()
                };
                self.spawn_with_profile(squad_layout.faction, squad_layout.center + offset, Some(squad), profile)?;
            }
            created.push(squad);
        }
        info!(
            squads = created.len(),
            agents = layout.total_agents(),
            "forces seeded"
        );
        Ok(created)
    }

    fn clear_forces(&mut self) {
        let entities: Vec<Entity> = self
            .world
            .query_filtered::<Entity, With<Combatant>>()
            .iter(&self.world)
            .collect();
        for entity in entities {
            self.world.despawn(entity);
        }
        self.world.resource_mut::<SpatialIndex>().clear();
        self.world.resource_mut::<Squads>().clear();
        self.world.resource_mut::<FrameEvents>().clear();
    }

    // ------------------------------------------------------------------------
    // Host inputs
    // ------------------------------------------------------------------------

    /// Camera position used for LOD classification.
    pub fn set_viewer(&mut self, position: Vec3) {
        self.world.resource_mut::<Viewer>().position = position;
    }

    /// Track the player's position and velocity this frame.
    pub fn update_player(&mut self, position: Vec3, velocity: Vec3) {
        let mut player = self.world.resource_mut::<PlayerState>();
        player.position = position;
        player.velocity = velocity;
    }

    pub fn player(&self) -> &PlayerState {
        self.world.resource::<PlayerState>()
    }

    pub fn player_mut(&mut self) -> Mut<'_, PlayerState> {
        self.world.resource_mut::<PlayerState>()
    }

    pub fn attach_terrain(&mut self, terrain: Arc<dyn TerrainQuery>) {
        self.world.resource_mut::<Battlefield>().terrain = Some(terrain);
    }

    pub fn attach_zones(&mut self, zones: Arc<dyn ZoneProvider>) {
        let mut battlefield = self.world.resource_mut::<Battlefield>();
        battlefield.zone_provider = Some(zones);
        battlefield.refresh();
    }

    pub fn attach_cover(&mut self, cover: Arc<dyn CoverVolumeProvider>) {
        let mut battlefield = self.world.resource_mut::<Battlefield>();
        battlefield.cover_provider = Some(cover);
        battlefield.refresh();
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.world.get::<Combatant>(id.entity())
    }

    pub fn combatant_count(&self) -> usize {
        self.world.resource::<SpatialIndex>().len()
    }

    pub fn agent_snapshot(&self, id: CombatantId) -> Option<AgentSnapshot> {
        self.combatant(id).map(AgentSnapshot::from_combatant)
    }

    /// Every combatant, ordered by id.
    pub fn all_agents(&mut self) -> Vec<AgentSnapshot> {
        let mut agents: Vec<AgentSnapshot> = self
            .world
            .query::<&Combatant>()
            .iter(&self.world)
            .map(AgentSnapshot::from_combatant)
            .collect();
        agents.sort_by_key(|a| a.id);
        agents
    }

    pub fn snapshot(&mut self) -> Snapshot {
        let lod = *self.scheduler.stats();
        Snapshot::from_world(&mut self.world, lod)
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> SimResult<String> {
        self.snapshot()
            .to_json()
            .map_err(|e| SimError::Serialization(e.to_string()))
    }

    pub fn lod_stats(&self) -> LodStats {
        *self.scheduler.stats()
    }

    pub fn interval_scale(&self) -> f32 {
        self.scheduler.interval_scale()
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        self.world.resource::<SpatialIndex>()
    }

    pub fn config(&self) -> &SimConfig {
        self.world.resource::<SimConfig>()
    }

    pub fn current_frame(&self) -> u64 {
        self.world.resource::<SimClock>().frame
    }

    pub fn current_time(&self) -> f64 {
        self.world.resource::<SimClock>().elapsed
    }

    /// Get direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Get mutable access to the ECS world (for advanced usage).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}
