//! Squad coordination: membership, player commands, the suppress-and-flank
//! maneuver and zone defense.
//!
//! The squad table is a resource. Membership changes go through [`join_squad`]
//! and [`leave_squad`] so the `Combatant::squad` back-reference and the
//! leader role stay in step with the table.

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::battle::{BattleView, SimRng, TargetInfo};
use crate::components::*;
use crate::error::{SimError, SimResult};
use crate::geometry::horizontal;
use crate::systems::cover::find_nearest_cover;
use crate::systems::perception::enemies_within;
use crate::terrain::Zone;

/// Minimum live members before a squad will maneuver.
pub const MANEUVER_MIN_MEMBERS: usize = 3;
/// Seconds between maneuvers of one squad.
pub const MANEUVER_COOLDOWN: f64 = 10.0;
/// Target range band (m) in which a maneuver is considered.
pub const MANEUVER_RANGE: (f32, f32) = (30.0, 80.0);
const MANEUVER_ENEMY_RADIUS: f32 = 60.0;
const MANEUVER_MIN_ENEMIES: usize = 2;
const WOUNDED_FRACTION: f32 = 0.5;
/// Sideways offset of a flanking position from the target line.
const FLANK_OFFSET: f32 = 25.0;
/// Seconds an advancing agent has to reach its flank position.
pub const ADVANCE_TIMEOUT: f32 = 15.0;

/// Seconds between zone-defense checks per agent.
pub const DEFENSE_CHECK_INTERVAL: f64 = 5.0;
/// Zones further than this are not defended.
pub const DEFENSE_RANGE: f32 = 80.0;
/// Perimeter slots sit this far outside the zone radius.
const DEFENSE_SLOT_OFFSET: f32 = 8.0;
const DEFENSE_SLOTS: usize = 4;

/// Retreating agents only fight enemies this close.
pub const RETREAT_ENGAGE_RANGE: f32 = 30.0;
const PATROL_HERE_RADIUS: f32 = 20.0;
const FOLLOW_RADIUS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SquadId(pub u32);

/// Player-issued squad command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SquadCommand {
    #[default]
    None,
    Follow,
    Hold,
    PatrolHere,
    Retreat,
    FreeRoam,
}

/// A group of same-faction combatants. `members[0]` is the leader.
#[derive(Debug, Clone)]
pub struct Squad {
    pub id: SquadId,
    pub faction: Faction,
    pub members: Vec<CombatantId>,
    pub command: SquadCommand,
    /// Where the command was issued.
    pub command_position: Option<Vec3>,
    pub player_controlled: bool,
    pub last_maneuver: Option<f64>,
}

impl Squad {
    pub fn leader(&self) -> Option<CombatantId> {
        self.members.first().copied()
    }

    pub fn contains(&self, id: CombatantId) -> bool {
        self.members.contains(&id)
    }

    pub fn maneuver_ready(&self, now: f64) -> bool {
        self.last_maneuver.map_or(true, |t| now - t >= MANEUVER_COOLDOWN)
    }
}

/// Squad table.
#[derive(Resource, Debug, Default)]
pub struct Squads {
    squads: BTreeMap<SquadId, Squad>,
    next_id: u32,
}

impl Squads {
    pub fn create(&mut self, faction: Faction) -> SquadId {
        let id = SquadId(self.next_id);
        self.next_id += 1;
        self.squads.insert(
            id,
            Squad {
                id,
                faction,
                members: Vec::new(),
                command: SquadCommand::None,
                command_position: None,
                player_controlled: false,
                last_maneuver: None,
            },
        );
        id
    }

    pub fn get(&self, id: SquadId) -> Option<&Squad> {
        self.squads.get(&id)
    }

    pub fn get_mut(&mut self, id: SquadId) -> Option<&mut Squad> {
        self.squads.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Squad> {
        self.squads.values()
    }

    pub fn len(&self) -> usize {
        self.squads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    pub fn clear(&mut self) {
        self.squads.clear();
        self.next_id = 0;
    }

    /// Record a player command. `SquadCommand::None` releases player control.
    pub fn issue_command(&mut self, id: SquadId, command: SquadCommand, origin: Vec3) -> SimResult<()> {
        let squad = self.squads.get_mut(&id).ok_or(SimError::UnknownSquad(id))?;
        squad.command = command;
        squad.command_position = Some(origin);
        squad.player_controlled = command != SquadCommand::None;
        debug!(squad = id.0, ?command, "squad command issued");
        Ok(())
    }
}

// ============================================================================
// MEMBERSHIP
// ============================================================================

/// Add a combatant to a squad, leaving any previous one first.
pub fn join_squad(world: &mut World, id: CombatantId, squad: SquadId) -> SimResult<()> {
    let faction = world
        .get::<Combatant>(id.entity())
        .map(|c| c.faction)
        .ok_or(SimError::UnknownCombatant(id))?;
    if world.resource::<Squads>().get(squad).is_none() {
        return Err(SimError::UnknownSquad(squad));
    }
    leave_squad(world, id);

    let role = {
        let mut squads = world.resource_mut::<Squads>();
        let Some(entry) = squads.get_mut(squad) else {
            return Err(SimError::UnknownSquad(squad));
        };
        if entry.faction != faction {
            debug!(combatant = %id, squad = squad.0, "joining squad of another faction");
        }
        entry.members.push(id);
        if entry.members.len() == 1 {
            SquadRole::Leader
        } else {
            SquadRole::Follower
        }
    };

    if let Some(mut c) = world.get_mut::<Combatant>(id.entity()) {
        c.squad = Some(squad);
        c.role = role;
    }
    Ok(())
}

/// Remove a combatant from its squad, promoting the next member if it led.
/// Returns the squad it left.
pub fn leave_squad(world: &mut World, id: CombatantId) -> Option<SquadId> {
    let squad_id = world.get::<Combatant>(id.entity()).and_then(|c| c.squad);
    let promoted = {
        let mut squads = world.resource_mut::<Squads>();
        // The combatant may already be despawned: fall back to a table scan.
        let squad_id = squad_id.or_else(|| squads.iter().find(|s| s.contains(id)).map(|s| s.id))?;
        let squad = squads.get_mut(squad_id)?;
        let was_leader = squad.leader() == Some(id);
        squad.members.retain(|&m| m != id);
        let promoted = if was_leader { squad.leader() } else { None };
        Some((squad_id, promoted))
    };

    if let Some(mut c) = world.get_mut::<Combatant>(id.entity()) {
        c.squad = None;
        c.role = SquadRole::Follower;
        c.memory.defense = None;
    }

    let (squad_id, promoted) = promoted?;
    if let Some(new_leader) = promoted {
        if let Some(mut c) = world.get_mut::<Combatant>(new_leader.entity()) {
            c.role = SquadRole::Leader;
            c.memory.defense = None;
        }
        debug!(squad = squad_id.0, leader = %new_leader, "squad leader promoted");
    }
    Some(squad_id)
}

// ============================================================================
// SUPPRESS-AND-FLANK MANEUVER
// ============================================================================

/// Flanking order for one member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceOrder {
    pub id: CombatantId,
    pub destination: Vec3,
    pub waypoint: Option<Vec3>,
}

/// One suppressor pins the target while everyone else flanks.
#[derive(Debug, Clone, PartialEq)]
pub struct ManeuverPlan {
    pub squad: SquadId,
    pub target_position: Vec3,
    pub suppressor: CombatantId,
    pub advancers: Vec<AdvanceOrder>,
}

/// Check the maneuver trigger for `agent` engaging `target`, and build the
/// orders when it fires.
pub fn plan_maneuver(view: &BattleView, agent: &Combatant, target: &TargetInfo) -> SimResult<Option<ManeuverPlan>> {
    let Some(squad) = agent.squad.and_then(|id| view.squad(id)) else {
        return Ok(None);
    };
    if squad.player_controlled || !squad.maneuver_ready(view.now) {
        return Ok(None);
    }

    let live: Vec<&Combatant> = squad
        .members
        .iter()
        .filter_map(|&m| if m == agent.id { Some(agent) } else { view.combatant(m) })
        .filter(|c| c.is_alive())
        .collect();
    if live.len() < MANEUVER_MIN_MEMBERS {
        return Ok(None);
    }

    let range = agent.position.distance(target.position);
    if range < MANEUVER_RANGE.0 || range > MANEUVER_RANGE.1 {
        return Ok(None);
    }

    let pressed = enemies_within(view, agent.position, MANEUVER_ENEMY_RADIUS, agent.faction)? >= MANEUVER_MIN_ENEMIES;
    let wounded = live
        .iter()
        .any(|c| c.id != agent.id && c.health.fraction() < WOUNDED_FRACTION);
    if !pressed && !wounded {
        return Ok(None);
    }

    let is_live = |id: CombatantId| live.iter().any(|c| c.id == id);
    let suppressor = match (squad.members.first(), squad.members.get(1)) {
        (Some(&leader), _) if is_live(leader) => leader,
        (_, Some(&second)) if is_live(second) => second,
        _ => return Ok(None),
    };

    let half = view.config.world_half_extent - 1.0;
    let mut advancers = Vec::with_capacity(live.len() - 1);
    for (k, member) in live.iter().filter(|c| c.id != suppressor).enumerate() {
        let side = if k % 2 == 0 { 1.0 } else { -1.0 };
        let approach = horizontal(target.position - member.position).normalize_or_zero();
        let perpendicular = Vec3::new(-approach.z, 0.0, approach.x);
        let member_range = horizontal(target.position - member.position).length();
        let mut destination =
            target.position - approach * (member_range * 0.4) + perpendicular * side * FLANK_OFFSET;
        destination.x = destination.x.clamp(-half, half);
        destination.z = destination.z.clamp(-half, half);
        if let Some(ground) = view.battlefield.height_at(destination.x, destination.z) {
            destination.y = ground;
        }
        let waypoint = find_nearest_cover(view.battlefield, member.position, target.position)
            .map(|spot| spot.position)
            .filter(|p| p.distance_squared(destination) < member.position.distance_squared(destination));
        advancers.push(AdvanceOrder {
            id: member.id,
            destination,
            waypoint,
        });
    }

    Ok(Some(ManeuverPlan {
        squad: squad.id,
        target_position: target.position,
        suppressor,
        advancers,
    }))
}

/// Hand out maneuver orders and start the squad cooldown.
pub fn apply_maneuver(world: &mut World, plan: &ManeuverPlan, now: f64) {
    match world.resource_mut::<Squads>().get_mut(plan.squad) {
        Some(squad) => squad.last_maneuver = Some(now),
        None => return,
    }

    if let Some(mut c) = world.get_mut::<Combatant>(plan.suppressor.entity()) {
        if c.is_alive() {
            c.memory.last_known_target = Some(plan.target_position);
            c.destination = None;
            c.waypoint = None;
            c.transition(CombatantState::Suppressing, None);
            c.fire.is_full_auto = true;
            c.timers.alert = c.profile.suppression_duration;
            c.facing = crate::geometry::facing_toward(c.position, plan.target_position);
        }
    }

    for order in &plan.advancers {
        if let Some(mut c) = world.get_mut::<Combatant>(order.id.entity()) {
            if !c.is_alive() {
                continue;
            }
            c.memory.last_known_target = Some(plan.target_position);
            c.memory.defense = None;
            c.transition(CombatantState::Advancing, None);
            c.destination = Some(order.destination);
            c.waypoint = order.waypoint;
            c.timers.advance_timeout = ADVANCE_TIMEOUT;
        }
    }
    debug!(
        squad = plan.squad.0,
        suppressor = %plan.suppressor,
        advancers = plan.advancers.len(),
        "squad maneuver"
    );
}

// ============================================================================
// ZONE DEFENSE
// ============================================================================

/// Compass direction of a perimeter slot (N, E, S, W).
fn slot_direction(slot: usize) -> Vec3 {
    match slot % DEFENSE_SLOTS {
        0 => Vec3::Z,
        1 => Vec3::X,
        2 => Vec3::NEG_Z,
        _ => Vec3::NEG_X,
    }
}

/// Perimeter position of `slot` around `zone`.
pub fn slot_position(view: &BattleView, zone: &Zone, slot: usize) -> Vec3 {
    let mut p = zone.position + slot_direction(slot) * (zone.radius + DEFENSE_SLOT_OFFSET);
    if let Some(ground) = view.battlefield.height_at(p.x, p.z) {
        p.y = ground;
    }
    p
}

/// Whether an existing assignment still holds.
pub fn defense_still_valid(view: &BattleView, agent: &Combatant, assignment: &DefenseAssignment) -> bool {
    view.battlefield
        .zone(assignment.zone)
        .is_some_and(|z| z.owner == Some(agent.faction) && !z.is_home_base)
}

/// Find a defense slot for `agent`, if it is eligible and one is free.
pub fn defense_assignment(view: &BattleView, agent: &Combatant) -> SimResult<Option<DefenseAssignment>> {
    let Some(squad) = agent.squad.and_then(|id| view.squad(id)) else {
        return Ok(None);
    };
    if agent.role == SquadRole::Leader || agent.profile.objective_focused || squad.player_controlled {
        return Ok(None);
    }

    let zone = view
        .battlefield
        .zones
        .iter()
        .filter(|z| z.owner == Some(agent.faction) && !z.is_home_base)
        .map(|z| (horizontal(z.position - agent.position).length(), z))
        .filter(|(d, _)| *d <= DEFENSE_RANGE)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, z)| z);
    let Some(zone) = zone else {
        return Ok(None);
    };

    let cap = (squad.members.len() / 2).clamp(1, 2);
    let squad_defenders = squad
        .members
        .iter()
        .filter(|&&m| m != agent.id)
        .filter_map(|&m| view.combatant(m))
        .filter(|c| c.is_alive() && c.memory.defense.is_some_and(|d| d.zone == zone.id))
        .count();
    if squad_defenders >= cap {
        return Ok(None);
    }

    let mut taken = [false; DEFENSE_SLOTS];
    let reach = zone.radius + DEFENSE_SLOT_OFFSET + 2.0;
    for id in view.index.query_radius(zone.position, reach)? {
        if id == agent.id {
            continue;
        }
        if let Some(d) = view
            .combatant(id)
            .filter(|c| c.is_alive() && c.faction == agent.faction)
            .and_then(|c| c.memory.defense)
        {
            if d.zone == zone.id {
                taken[d.slot % DEFENSE_SLOTS] = true;
            }
        }
    }
    // Defenders still walking to their slot are outside the query: check the squad too.
    for c in squad.members.iter().filter_map(|&m| view.combatant(m)) {
        if c.id != agent.id && c.is_alive() {
            if let Some(d) = c.memory.defense.filter(|d| d.zone == zone.id) {
                taken[d.slot % DEFENSE_SLOTS] = true;
            }
        }
    }

    Ok(taken.iter().position(|t| !t).map(|slot| DefenseAssignment {
        zone: zone.id,
        slot,
        position: slot_position(view, zone, slot),
    }))
}

// ============================================================================
// PLAYER COMMANDS
// ============================================================================

/// Where a member of a player-controlled squad should go next, if the
/// command dictates it.
pub fn command_destination(view: &BattleView, agent: &Combatant, rng: &mut SimRng) -> Option<Vec3> {
    let squad = agent.squad.and_then(|id| view.squad(id))?;
    if !squad.player_controlled {
        return None;
    }
    let origin = squad.command_position.unwrap_or(agent.position);
    match squad.command {
        SquadCommand::Follow => {
            let slot = squad.members.iter().position(|&m| m == agent.id).unwrap_or(0);
            let n = squad.members.len().max(1);
            let angle = slot as f32 * std::f32::consts::TAU / n as f32;
            Some(view.player.position + Vec3::new(angle.sin(), 0.0, angle.cos()) * FOLLOW_RADIUS)
        }
        SquadCommand::Hold => Some(origin),
        SquadCommand::PatrolHere => {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let radius = rng.gen_range(0.0..PATROL_HERE_RADIUS);
            Some(origin + Vec3::new(angle.sin(), 0.0, angle.cos()) * radius)
        }
        SquadCommand::Retreat => {
            let home = view
                .battlefield
                .zones
                .iter()
                .filter(|z| z.is_home_base && z.owner == Some(agent.faction))
                .min_by(|a, b| {
                    a.position
                        .distance_squared(agent.position)
                        .total_cmp(&b.position.distance_squared(agent.position))
                })
                .map(|z| z.position);
            Some(home.unwrap_or(origin))
        }
        SquadCommand::FreeRoam | SquadCommand::None => None,
    }
}

/// Engagement range for `agent` given its squad's orders.
pub fn engage_range(view: &BattleView, agent: &Combatant) -> f32 {
    let retreating = agent
        .squad
        .and_then(|id| view.squad(id))
        .is_some_and(|s| s.player_controlled && s.command == SquadCommand::Retreat);
    if retreating {
        RETREAT_ENGAGE_RANGE.min(agent.profile.visual_range)
    } else {
        agent.profile.visual_range
    }
}
