//! Per-agent AI state machine.
//!
//! One handler per [`CombatantState`]. Handlers read the battle through a
//! [`BattleView`], mutate only the acting agent, and push squad-wide orders as
//! effects. All state changes go through `Combatant::transition`, which keeps
//! `target` set exactly while Alert or Engaging.
//!
//! ## Performance
//! - Enemy scans use the spatial index bounded by visual range
//! - Visibility checks stop at the first visible candidate
//! - Zone-defense eligibility is re-checked at most every 5s per agent

use glam::Vec3;
use rand::Rng;

use crate::battle::{BattleView, Effect, Effects, FrameContext, TargetInfo};
use crate::components::*;
use crate::error::SimResult;
use crate::geometry::{facing_toward, horizontal};
use crate::systems::cover::find_nearest_cover;
use crate::systems::movement::arrived_at;
use crate::systems::perception::{can_see_target, nearest_visible_enemy, reaction_delay, roll_engagement, Sighting};
use crate::systems::squad::{
    command_destination, defense_assignment, defense_still_valid, engage_range, plan_maneuver,
    DEFENSE_CHECK_INTERVAL,
};
use crate::systems::suppression;

/// Objective-focused agents ignore enemies further than this...
const OBJECTIVE_ENGAGE_RANGE: f32 = 40.0;
/// ...unless they were hit within this many seconds.
const RECENT_HIT_WINDOW: f32 = 3.0;
/// A hit this recent sends an engaged agent to cover.
const COVER_HIT_WINDOW: f32 = 2.0;
const COVER_HEALTH_FRACTION: f32 = 0.5;
const COVER_SUPPRESSION: f32 = 0.6;
/// Chance per check to use a burst pause to relocate.
const COVER_OPPORTUNITY_CHANCE: f32 = 0.15;
/// Seconds to reach cover before giving up.
pub const COVER_TIMEOUT: f32 = 8.0;

const WANDER_RADIUS: f32 = 30.0;
const FOLLOW_LEADER_DISTANCE: f32 = 12.0;

// ============================================================================
// DISPATCH
// ============================================================================

/// Run one AI step for `c`.
pub fn update(
    view: &BattleView,
    ctx: &mut FrameContext,
    c: &mut Combatant,
    dt: f32,
    effects: &mut Effects,
) -> SimResult<()> {
    if !c.is_alive() {
        return Ok(());
    }
    suppression::decay(&mut c.memory, dt);

    // A target that died or vanished ends the fight.
    if let Some(target) = c.target {
        if view.resolve(target).is_none() {
            c.return_to_rest();
        }
    }

    match c.state {
        CombatantState::Patrolling => patrol(view, ctx, c),
        CombatantState::Alert => alert(view, ctx, c, dt),
        CombatantState::Engaging => engage(view, ctx, c, effects),
        CombatantState::Suppressing => suppress(c, dt),
        CombatantState::Advancing => advance(view, ctx, c, dt),
        CombatantState::SeekingCover => seek_cover(view, c, dt),
        CombatantState::Defending => defend(view, ctx, c),
        CombatantState::Dead => Ok(()),
    }
}

fn enter_alert(view: &BattleView, c: &mut Combatant, sighting: &Sighting) {
    c.transition(CombatantState::Alert, Some(sighting.info.target));
    c.timers.reaction = reaction_delay(&c.profile, sighting.distance);
    c.memory.last_known_target = Some(sighting.info.position);
    c.facing = facing_toward(c.position, sighting.info.position);
    c.velocity = Vec3::ZERO;
    tracing::trace!(combatant = %c.id, distance = sighting.distance, at = view.now, "enemy spotted");
}

fn recently_hit(view: &BattleView, c: &Combatant, window: f32) -> bool {
    c.memory.since_hit(view.now).is_some_and(|s| s <= window)
}

// ============================================================================
// PATROLLING
// ============================================================================

fn patrol(view: &BattleView, ctx: &mut FrameContext, c: &mut Combatant) -> SimResult<()> {
    let hit_recently = recently_hit(view, c, RECENT_HIT_WINDOW);

    // Turn toward whoever just shot us.
    if hit_recently {
        if let Some(info) = c.memory.last_attacker.and_then(|a| view.resolve(a)) {
            c.facing = facing_toward(c.position, info.position);
        }
    }

    let range = engage_range(view, c);
    if let Some(sighting) = nearest_visible_enemy(view, &mut ctx.budget, c, range)? {
        let interested =
            !c.profile.objective_focused || sighting.distance <= OBJECTIVE_ENGAGE_RANGE || hit_recently;
        if interested && roll_engagement(ctx.rng, sighting.distance) {
            enter_alert(view, c, &sighting);
            return Ok(());
        }
    }

    if let Some(destination) = command_destination(view, c, ctx.rng) {
        if c.destination.map_or(true, |d| arrived_at(c, d) || d.distance_squared(destination) > 4.0) {
            c.destination = Some(destination);
        }
        return Ok(());
    }

    if view.now >= c.schedule.next_defense_check {
        c.schedule.next_defense_check = view.now + DEFENSE_CHECK_INTERVAL;
        if let Some(assignment) = defense_assignment(view, c)? {
            c.memory.defense = Some(assignment);
            c.transition(CombatantState::Defending, None);
            c.destination = Some(assignment.position);
            return Ok(());
        }
    }

    if c.destination.map_or(true, |d| arrived_at(c, d)) {
        c.destination = pick_patrol_destination(view, ctx, c);
    }
    Ok(())
}

/// Next wander/objective point for a free agent.
fn pick_patrol_destination(view: &BattleView, ctx: &mut FrameContext, c: &Combatant) -> Option<Vec3> {
    let half = view.config.world_half_extent - 1.0;
    let clamp = |p: Vec3| Vec3::new(p.x.clamp(-half, half), p.y, p.z.clamp(-half, half));

    // Followers stay with a living leader.
    if c.role == SquadRole::Follower && !c.profile.objective_focused {
        let leader = c
            .squad
            .and_then(|s| view.squad(s))
            .and_then(|s| s.leader())
            .filter(|&l| l != c.id)
            .and_then(|l| view.combatant(l))
            .filter(|l| l.is_alive());
        if let Some(leader) = leader {
            let anchor = leader.destination.unwrap_or(leader.position);
            if horizontal(anchor - c.position).length() > FOLLOW_LEADER_DISTANCE {
                let offset = Vec3::new(ctx.rng.gen_range(-6.0..6.0), 0.0, ctx.rng.gen_range(-6.0..6.0));
                return Some(clamp(anchor + offset));
            }
            return None;
        }
    }

    let objective = view
        .battlefield
        .zones
        .iter()
        .filter(|z| z.owner != Some(c.faction) && !z.is_home_base)
        .min_by(|a, b| {
            a.position
                .distance_squared(c.position)
                .total_cmp(&b.position.distance_squared(c.position))
        });
    if let Some(zone) = objective {
        let r = zone.radius * 0.6;
        let offset = Vec3::new(ctx.rng.gen_range(-r..=r), 0.0, ctx.rng.gen_range(-r..=r));
        return Some(clamp(zone.position + offset));
    }

    let angle = ctx.rng.gen_range(0.0..std::f32::consts::TAU);
    let radius = ctx.rng.gen_range(5.0..WANDER_RADIUS);
    Some(clamp(c.position + Vec3::new(angle.sin(), 0.0, angle.cos()) * radius))
}

// ============================================================================
// ALERT
// ============================================================================

fn alert(view: &BattleView, ctx: &mut FrameContext, c: &mut Combatant, dt: f32) -> SimResult<()> {
    let Some(info) = c.target.and_then(|t| view.resolve(t)) else {
        c.return_to_rest();
        return Ok(());
    };
    c.facing = facing_toward(c.position, info.position);
    c.velocity = Vec3::ZERO;
    c.timers.reaction -= dt;
    if c.timers.reaction > 0.0 {
        return Ok(());
    }

    if can_see_target(view, &mut ctx.budget, c, info.aim_point) {
        c.memory.last_known_target = Some(info.position);
        c.destination = None;
        c.fire.shots_in_burst = 0;
        c.transition(CombatantState::Engaging, Some(info.target));
    } else {
        c.return_to_rest();
    }
    Ok(())
}

// ============================================================================
// ENGAGING
// ============================================================================

fn engage(view: &BattleView, ctx: &mut FrameContext, c: &mut Combatant, effects: &mut Effects) -> SimResult<()> {
    let Some(info) = c.target.and_then(|t| view.resolve(t)) else {
        c.return_to_rest();
        return Ok(());
    };
    c.facing = facing_toward(c.position, info.position);
    c.destination = None;
    c.waypoint = None;

    let distance = c.position.distance(info.position);
    if distance > engage_range(view, c) * 1.2 {
        c.return_to_rest();
        return Ok(());
    }

    if !can_see_target(view, &mut ctx.budget, c, info.aim_point) {
        start_suppressing(c);
        return Ok(());
    }
    c.memory.last_known_target = Some(info.position);

    if let Some(plan) = plan_maneuver(view, c, &info)? {
        effects.push(Effect::Maneuver(plan));
        return Ok(());
    }

    if !c.fire.in_cover && wants_cover(view, ctx, c) {
        try_seek_cover(view, c, &info);
    }
    Ok(())
}

fn start_suppressing(c: &mut Combatant) {
    c.transition(CombatantState::Suppressing, None);
    c.fire.is_full_auto = true;
    c.fire.shots_in_burst = 0;
    c.timers.alert = c.profile.suppression_duration;
}

fn wants_cover(view: &BattleView, ctx: &mut FrameContext, c: &Combatant) -> bool {
    if recently_hit(view, c, COVER_HIT_WINDOW)
        || c.health.fraction() < COVER_HEALTH_FRACTION
        || c.memory.suppression > COVER_SUPPRESSION
    {
        return true;
    }
    // Between bursts: sometimes use the pause to relocate.
    c.fire.burst_cooldown > 0.0 && ctx.rng.gen::<f32>() < COVER_OPPORTUNITY_CHANCE
}

fn try_seek_cover(view: &BattleView, c: &mut Combatant, info: &TargetInfo) {
    let Some(spot) = find_nearest_cover(view.battlefield, c.position, info.position) else {
        return;
    };
    c.transition(CombatantState::SeekingCover, None);
    c.resume_target = Some(info.target);
    c.memory.cover_position = Some(spot.position);
    c.destination = Some(spot.position);
    c.waypoint = None;
    c.timers.cover_timeout = COVER_TIMEOUT;
}

// ============================================================================
// SUPPRESSING
// ============================================================================

fn suppress(c: &mut Combatant, dt: f32) -> SimResult<()> {
    c.velocity = Vec3::ZERO;
    c.destination = None;
    let Some(last_known) = c.memory.last_known_target else {
        c.return_to_rest();
        return Ok(());
    };
    c.facing = facing_toward(c.position, last_known);
    c.fire.is_full_auto = true;
    c.timers.alert -= dt;
    if c.timers.alert <= 0.0 {
        c.transition(CombatantState::Patrolling, None);
    }
    Ok(())
}

// ============================================================================
// ADVANCING
// ============================================================================

fn advance(view: &BattleView, ctx: &mut FrameContext, c: &mut Combatant, dt: f32) -> SimResult<()> {
    c.timers.advance_timeout -= dt;
    let arrived = c.waypoint.is_none() && c.destination.map_or(true, |d| arrived_at(c, d));
    if !arrived && c.timers.advance_timeout > 0.0 {
        return Ok(());
    }

    c.destination = None;
    c.waypoint = None;
    // Look where the enemy was before scanning.
    if let Some(last_known) = c.memory.last_known_target {
        c.facing = facing_toward(c.position, last_known);
    }
    let range = engage_range(view, c);
    match nearest_visible_enemy(view, &mut ctx.budget, c, range)? {
        Some(sighting) => {
            c.memory.last_known_target = Some(sighting.info.position);
            c.facing = facing_toward(c.position, sighting.info.position);
            c.transition(CombatantState::Engaging, Some(sighting.info.target));
        }
        None => c.transition(CombatantState::Patrolling, None),
    }
    Ok(())
}

// ============================================================================
// SEEKING COVER
// ============================================================================

fn seek_cover(view: &BattleView, c: &mut Combatant, dt: f32) -> SimResult<()> {
    c.timers.cover_timeout -= dt;
    let resume = c.resume_target.filter(|&t| view.resolve(t).is_some());

    let reached = c.memory.cover_position.map_or(true, |p| arrived_at(c, p));
    if !reached && c.timers.cover_timeout > 0.0 {
        return Ok(());
    }

    c.destination = None;
    c.memory.cover_position = None;
    match resume {
        Some(target) => {
            c.transition(CombatantState::Engaging, Some(target));
            // Peek-and-fire only when the spot was actually reached.
            c.fire.in_cover = reached;
            c.fire.shots_in_burst = 0;
        }
        None => c.return_to_rest(),
    }
    Ok(())
}

// ============================================================================
// DEFENDING
// ============================================================================

fn defend(view: &BattleView, ctx: &mut FrameContext, c: &mut Combatant) -> SimResult<()> {
    let assignment = c.memory.defense.filter(|a| defense_still_valid(view, c, a));
    let Some(assignment) = assignment else {
        c.memory.defense = None;
        c.destination = None;
        c.transition(CombatantState::Patrolling, None);
        return Ok(());
    };

    if let Some(sighting) = nearest_visible_enemy(view, &mut ctx.budget, c, engage_range(view, c))? {
        enter_alert(view, c, &sighting);
        return Ok(());
    }

    if arrived_at(c, assignment.position) {
        c.destination = None;
        if let Some(zone) = view.battlefield.zone(assignment.zone) {
            // Face outward from the zone.
            c.facing = facing_toward(zone.position, assignment.position);
        }
    } else {
        c.destination = Some(assignment.position);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{RaycastBudget, SimRng};
    use crate::testing;
    use bevy_ecs::prelude::World;
    use rand::SeedableRng;

    fn step(world: &World, c: &mut Combatant, dt: f32) -> Effects {
        let view = BattleView::from_world(world).unwrap();
        let mut rng = SimRng::seed_from_u64(7);
        let mut ctx = FrameContext::new(&mut rng, RaycastBudget::new(100, 100));
        let mut effects = Effects::default();
        update(&view, &mut ctx, c, dt, &mut effects).unwrap();
        effects
    }

    #[test]
    fn test_patrol_spots_close_enemy() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 10.0));
        let mut c = testing::combatant(&world, me).clone();

        step(&world, &mut c, 0.1);
        assert_eq!(c.state, CombatantState::Alert);
        assert_eq!(c.target, Some(TargetRef::Combatant(enemy)));
        assert!(c.timers.reaction > 0.0);
    }

    #[test]
    fn test_alert_becomes_engaging_after_reaction() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 10.0));
        let mut c = testing::combatant(&world, me).clone();
        step(&world, &mut c, 0.1);

        step(&world, &mut c, 0.1);
        assert_eq!(c.state, CombatantState::Alert);
        step(&world, &mut c, 2.0);
        assert_eq!(c.state, CombatantState::Engaging);
        assert_eq!(c.target, Some(TargetRef::Combatant(enemy)));
    }

    #[test]
    fn test_objective_focused_ignores_distant_enemy() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 70.0));
        let mut c = testing::combatant(&world, me).clone();
        c.profile = BehaviorProfile::assault();
        step(&world, &mut c, 0.1);
        assert_eq!(c.state, CombatantState::Patrolling);
        assert!(c.target.is_none());
    }

    #[test]
    fn test_dead_target_returns_to_rest() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 10.0));
        let mut c = testing::combatant(&world, me).clone();
        c.transition(CombatantState::Engaging, Some(TargetRef::Combatant(enemy)));

        testing::combatant_mut(&mut world, enemy).begin_dying();
        step(&world, &mut c, 0.1);
        assert_ne!(c.state, CombatantState::Engaging);
        assert!(c.target.is_none());
    }

    #[test]
    fn test_suppressing_times_out_to_patrol() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let mut c = testing::combatant(&world, me).clone();
        c.memory.last_known_target = Some(Vec3::new(0.0, 0.0, 40.0));
        start_suppressing(&mut c);
        assert!(c.fire.is_full_auto);

        step(&world, &mut c, 1.0);
        assert_eq!(c.state, CombatantState::Suppressing);
        let duration = c.profile.suppression_duration;
        step(&world, &mut c, duration);
        assert_eq!(c.state, CombatantState::Patrolling);
        assert!(!c.fire.is_full_auto);
    }

    #[test]
    fn test_seek_cover_timeout_resumes_fight() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 40.0));
        let mut c = testing::combatant(&world, me).clone();
        c.transition(CombatantState::SeekingCover, None);
        c.resume_target = Some(TargetRef::Combatant(enemy));
        c.memory.cover_position = Some(Vec3::new(25.0, 0.0, 0.0));
        c.timers.cover_timeout = COVER_TIMEOUT;

        step(&world, &mut c, 1.0);
        assert_eq!(c.state, CombatantState::SeekingCover);
        assert!(c.target.is_none());

        step(&world, &mut c, COVER_TIMEOUT);
        assert_eq!(c.state, CombatantState::Engaging);
        assert_eq!(c.target, Some(TargetRef::Combatant(enemy)));
        assert!(!c.fire.in_cover);
    }

    #[test]
    fn test_reaching_cover_sets_in_cover() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 40.0));
        let mut c = testing::combatant(&world, me).clone();
        c.transition(CombatantState::SeekingCover, None);
        c.resume_target = Some(TargetRef::Combatant(enemy));
        c.memory.cover_position = Some(Vec3::new(0.5, 0.0, 0.0));
        c.timers.cover_timeout = COVER_TIMEOUT;

        step(&world, &mut c, 0.1);
        assert_eq!(c.state, CombatantState::Engaging);
        assert!(c.fire.in_cover);
    }

    #[test]
    fn test_advancing_times_out() {
        let mut world = testing::world();
        let me = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let mut c = testing::combatant(&world, me).clone();
        c.transition(CombatantState::Advancing, None);
        c.destination = Some(Vec3::new(200.0, 0.0, 0.0));
        c.timers.advance_timeout = 15.0;

        step(&world, &mut c, 5.0);
        assert_eq!(c.state, CombatantState::Advancing);
        step(&world, &mut c, 11.0);
        assert_eq!(c.state, CombatantState::Patrolling);
        assert!(c.target.is_none());
    }
}
