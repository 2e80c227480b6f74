//! Shared per-frame context: clock, viewer, player, read-only battle view,
//! raycast budgets and deferred side effects.
//!
//! AI, movement and fire logic for one agent run against a [`BattleView`]
//! (shared borrows only) and push anything that touches *other* agents into
//! [`Effects`]. The scheduler applies those after the acting agent is written
//! back, so there is exactly one writer at a time.

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand_chacha::ChaCha8Rng;

use crate::components::{Combatant, CombatantId, Faction, Health, TargetRef};
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::spatial::{SpatialIndex, SpatialQuery};
use crate::systems::squad::{ManeuverPlan, Squad, SquadId, Squads};
use crate::terrain::Battlefield;

/// RNG used by every stochastic decision.
pub type SimRng = ChaCha8Rng;

/// Simulation clock.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct SimClock {
    /// Seconds since the simulation started.
    pub elapsed: f64,
    /// Delta of the current frame.
    pub dt: f32,
    /// Frames ticked so far.
    pub frame: u64,
}

impl SimClock {
    pub fn advance(&mut self, dt: f32) {
        self.dt = dt;
        self.elapsed += f64::from(dt);
        self.frame = self.frame.wrapping_add(1);
    }
}

/// Camera/viewer position used for LOD classification.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct Viewer {
    pub position: Vec3,
}

/// Player head sphere radius.
pub const PLAYER_HEAD_RADIUS: f32 = 0.25;
/// Player body sphere radius.
pub const PLAYER_BODY_RADIUS: f32 = 0.45;
const PLAYER_HEAD_HEIGHT: f32 = 1.65;
const PLAYER_BODY_HEIGHT: f32 = 1.1;

/// Externally tracked player.
#[derive(Resource, Debug, Clone)]
pub struct PlayerState {
    /// Player participates in the simulation (AI may target it).
    pub active: bool,
    pub position: Vec3,
    pub velocity: Vec3,
    pub faction: Faction,
    pub health: Health,
    pub suppression: f32,
    pub panic: f32,
    pub near_miss_count: u32,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            active: false,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            faction: Faction::Blue,
            health: Health::default(),
            suppression: 0.0,
            panic: 0.0,
            near_miss_count: 0,
        }
    }
}

impl PlayerState {
    /// Targetable by AI.
    pub fn is_targetable(&self) -> bool {
        self.active && !self.health.is_depleted()
    }

    pub fn head_center(&self) -> Vec3 {
        self.position + Vec3::Y * PLAYER_HEAD_HEIGHT
    }

    pub fn body_center(&self) -> Vec3 {
        self.position + Vec3::Y * PLAYER_BODY_HEIGHT
    }
}

/// Damage the player took from AI fire this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerHit {
    pub attacker: CombatantId,
    pub damage: f32,
    pub headshot: bool,
}

/// Things that happened this frame, drained into the frame report.
#[derive(Resource, Debug, Default)]
pub struct FrameEvents {
    /// Agents that started dying.
    pub deaths: Vec<CombatantId>,
    /// Agents removed after their death animation.
    pub removed: Vec<CombatantId>,
    pub player_hits: Vec<PlayerHit>,
    pub shots_fired: u32,
}

impl FrameEvents {
    pub fn clear(&mut self) {
        self.deaths.clear();
        self.removed.clear();
        self.player_hits.clear();
        self.shots_fired = 0;
    }
}

// ============================================================================
// RAYCAST BUDGET
// ============================================================================

/// Per-frame caps on terrain raycasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaycastBudget {
    pub los_remaining: u32,
    pub fire_remaining: u32,
    pub los_used: u32,
    pub fire_used: u32,
    /// Requests refused because the cap was hit.
    pub los_refused: u32,
    pub fire_refused: u32,
}

impl RaycastBudget {
    pub fn new(los: u32, fire: u32) -> Self {
        Self {
            los_remaining: los,
            fire_remaining: fire,
            ..Default::default()
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.max_los_raycasts_per_frame, config.max_fire_raycasts_per_frame)
    }

    /// Unlimited budget, for direct API calls.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }

    pub fn try_los(&mut self) -> bool {
        if self.los_remaining == 0 {
            self.los_refused += 1;
            return false;
        }
        self.los_remaining -= 1;
        self.los_used += 1;
        true
    }

    pub fn try_fire(&mut self) -> bool {
        if self.fire_remaining == 0 {
            self.fire_refused += 1;
            return false;
        }
        self.fire_remaining -= 1;
        self.fire_used += 1;
        true
    }
}

/// Mutable per-frame state threaded through agent updates.
pub struct FrameContext<'a> {
    pub rng: &'a mut SimRng,
    pub budget: RaycastBudget,
}

impl<'a> FrameContext<'a> {
    pub fn new(rng: &'a mut SimRng, budget: RaycastBudget) -> Self {
        Self { rng, budget }
    }
}

// ============================================================================
// EFFECTS
// ============================================================================

/// A side effect on something other than the acting agent.
#[derive(Debug, Clone)]
pub enum Effect {
    Damage {
        target: CombatantId,
        amount: f32,
        attacker: CombatantId,
        headshot: bool,
    },
    DamagePlayer(PlayerHit),
    /// A round passed close to `target`.
    NearMiss { target: CombatantId },
    PlayerNearMiss,
    /// Squad-wide suppress-and-flank orders.
    Maneuver(ManeuverPlan),
    ShotFired,
}

/// Side effects gathered during one agent update.
#[derive(Debug, Default)]
pub struct Effects(pub Vec<Effect>);

impl Effects {
    pub fn push(&mut self, effect: Effect) {
        self.0.push(effect);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.0.drain(..)
    }
}

// ============================================================================
// BATTLE VIEW
// ============================================================================

/// Where a target currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInfo {
    pub target: TargetRef,
    /// Ground position.
    pub position: Vec3,
    /// Point to aim at.
    pub aim_point: Vec3,
    pub velocity: Vec3,
    pub faction: Faction,
}

/// Read-only borrow of everything an agent update needs.
pub struct BattleView<'w> {
    pub world: &'w World,
    pub index: &'w dyn SpatialQuery,
    pub squads: &'w Squads,
    pub battlefield: &'w Battlefield,
    pub player: &'w PlayerState,
    pub config: &'w SimConfig,
    pub now: f64,
}

fn resource<'w, T: Resource>(world: &'w World, name: &'static str) -> SimResult<&'w T> {
    world.get_resource::<T>().ok_or(SimError::MissingResource(name))
}

impl<'w> BattleView<'w> {
    /// View backed by the world's own [`SpatialIndex`].
    pub fn from_world(world: &'w World) -> SimResult<Self> {
        let index: &SpatialIndex = resource(world, "SpatialIndex")?;
        if !index.is_built() {
            return Err(SimError::IndexNotBuilt);
        }
        Self::with_index(world, index)
    }

    /// View with a caller-supplied spatial query implementation.
    pub fn with_index(world: &'w World, index: &'w dyn SpatialQuery) -> SimResult<Self> {
        Ok(Self {
            world,
            index,
            squads: resource(world, "Squads")?,
            battlefield: resource(world, "Battlefield")?,
            player: resource(world, "PlayerState")?,
            config: resource(world, "SimConfig")?,
            now: resource::<SimClock>(world, "SimClock")?.elapsed,
        })
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&'w Combatant> {
        self.world.get::<Combatant>(id.entity())
    }

    pub fn squad(&self, id: SquadId) -> Option<&'w Squad> {
        self.squads.get(id)
    }

    /// Resolve a target reference; `None` if it is gone, dying or dead.
    pub fn resolve(&self, target: TargetRef) -> Option<TargetInfo> {
        match target {
            TargetRef::Combatant(id) => {
                let c = self.combatant(id)?;
                c.is_alive().then(|| TargetInfo {
                    target,
                    position: c.position,
                    aim_point: c.center_mass(),
                    velocity: c.velocity,
                    faction: c.faction,
                })
            }
            TargetRef::Player => self.player.is_targetable().then(|| TargetInfo {
                target,
                position: self.player.position,
                aim_point: self.player.body_center(),
                velocity: self.player.velocity,
                faction: self.player.faction,
            }),
        }
    }

    /// Live enemies of `faction` within `radius`, nearest first. Includes the
    /// player when targetable.
    pub fn enemies_near(&self, center: Vec3, radius: f32, faction: Faction) -> SimResult<Vec<TargetInfo>> {
        let mut found: Vec<(f32, TargetInfo)> = self
            .index
            .query_radius(center, radius)?
            .into_iter()
            .filter_map(|id| {
                let c = self.combatant(id)?;
                (c.faction != faction && c.is_alive()).then(|| {
                    (
                        c.position.distance_squared(center),
                        TargetInfo {
                            target: TargetRef::Combatant(id),
                            position: c.position,
                            aim_point: c.center_mass(),
                            velocity: c.velocity,
                            faction: c.faction,
                        },
                    )
                })
            })
            .collect();

        if self.player.is_targetable()
            && self.player.faction != faction
            && self.player.position.distance_squared(center) <= radius * radius
        {
            if let Some(info) = self.resolve(TargetRef::Player) {
                found.push((self.player.position.distance_squared(center), info));
            }
        }

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().map(|(_, info)| info).collect())
    }
}
