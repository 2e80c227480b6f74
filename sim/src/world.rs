//! Snapshot types.
//!
//! A `Snapshot` is a serializable view of the simulation that a host can send
//! to its renderer or UI. Combatant ids are exported as their packed entity bits.

use crate::battle::{PlayerState, SimClock};
use crate::components::*;
use crate::systems::lod::LodStats;
use crate::systems::squad::{SquadCommand, SquadId, Squads};
use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Snapshot of a single combatant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u64,
    pub faction: Faction,
    pub position: Vec3,
    pub velocity: Vec3,
    pub facing: f32,
    pub visual_facing: f32,
    pub health: f32,
    pub health_max: f32,
    pub state: CombatantState,
    /// Packed id of the combatant being fought, if any.
    pub target_id: Option<u64>,
    pub targets_player: bool,
    pub lod: LodTier,
    pub squad: Option<SquadId>,
    pub role: SquadRole,
    pub suppression: f32,
    pub panic: f32,
    pub is_dying: bool,
    pub death_progress: f32,
    pub death_phase: Option<DeathPhase>,
    pub is_full_auto: bool,
    pub in_cover: bool,
    pub destination: Option<Vec3>,
}

impl AgentSnapshot {
    pub fn from_combatant(c: &Combatant) -> Self {
        let death_phase = match c.lifecycle {
            Lifecycle::Alive => None,
            Lifecycle::Dying { elapsed } => Some(DeathPhase::at(elapsed)),
            Lifecycle::Dead => Some(DeathPhase::Done),
        };
        Self {
            id: c.id.to_bits(),
            faction: c.faction,
            position: c.position,
            velocity: c.velocity,
            facing: c.facing,
            visual_facing: c.visual_facing,
            health: c.health.current,
            health_max: c.health.max,
            state: c.state,
            target_id: match c.target {
                Some(TargetRef::Combatant(id)) => Some(id.to_bits()),
                _ => None,
            },
            targets_player: c.target == Some(TargetRef::Player),
            lod: c.schedule.lod,
            squad: c.squad,
            role: c.role,
            suppression: c.memory.suppression,
            panic: c.memory.panic,
            is_dying: c.is_dying(),
            death_progress: c.death_progress(),
            death_phase,
            is_full_auto: c.fire.is_full_auto,
            in_cover: c.fire.in_cover,
            destination: c.destination,
        }
    }
}

/// Snapshot of a squad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadSnapshot {
    pub id: SquadId,
    pub faction: Faction,
    /// Packed member ids; the first is the leader.
    pub members: Vec<u64>,
    pub command: SquadCommand,
    pub player_controlled: bool,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame: u64,
    /// Elapsed simulation time in seconds.
    pub time: f64,
    pub agents: Vec<AgentSnapshot>,
    pub squads: Vec<SquadSnapshot>,
    pub player_health: f32,
    pub player_suppression: f32,
    pub lod: LodStats,
}

impl Snapshot {
    /// Create a snapshot from the ECS world. Agents are ordered by id.
    pub fn from_world(world: &mut World, lod: LodStats) -> Self {
        let mut agents: Vec<AgentSnapshot> = world
            .query::<&Combatant>()
            .iter(world)
            .map(AgentSnapshot::from_combatant)
            .collect();
        agents.sort_by_key(|a| a.id);

        let squads = world
            .get_resource::<Squads>()
            .map(|squads| {
                squads
                    .iter()
                    .map(|s| SquadSnapshot {
                        id: s.id,
                        faction: s.faction,
                        members: s.members.iter().map(|m| m.to_bits()).collect(),
                        command: s.command,
                        player_controlled: s.player_controlled,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let clock = world.get_resource::<SimClock>().copied().unwrap_or_default();
        let (player_health, player_suppression) = world
            .get_resource::<PlayerState>()
            .map_or((0.0, 0.0), |p| (p.health.current, p.suppression));

        Self {
            frame: clock.frame,
            time: clock.elapsed,
            agents,
            squads,
            player_health,
            player_suppression,
            lod,
        }
    }

    pub fn agent(&self, id: CombatantId) -> Option<&AgentSnapshot> {
        let bits = id.to_bits();
        self.agents.iter().find(|a| a.id == bits)
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
