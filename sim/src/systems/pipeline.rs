//! Per-agent update steps the LOD scheduler chooses between.
//!
//! Every step follows the same shape: copy the agent out of the world, work
//! on the copy against a read-only [`BattleView`], write it back, refresh its
//! index entry, then apply the side effects it produced on others.

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use tracing::{debug, trace};

use crate::battle::{BattleView, Effect, Effects, FrameContext, FrameEvents};
use crate::components::*;
use crate::error::{SimError, SimResult};
use crate::spatial::SpatialIndex;
use crate::systems::{ai, combat, movement, squad};
use crate::terrain::Battlefield;

/// Random offset applied to coarse-step objectives on each axis.
pub const COARSE_JITTER: f32 = 10.0;
/// Longest movement step a full update integrates at once.
const MAX_FULL_MOVE_STEP: f32 = 1.0;
/// Longest step AI timers and fire accumulators advance in one full update.
const MAX_FULL_AI_STEP: f32 = 1.0;

fn load(world: &World, id: CombatantId) -> Option<Combatant> {
    world.get::<Combatant>(id.entity()).filter(|c| c.is_alive()).cloned()
}

fn store(world: &mut World, c: Combatant) -> SimResult<()> {
    let id = c.id;
    let position = c.position;
    match world.get_mut::<Combatant>(id.entity()) {
        Some(mut slot) => *slot = c,
        None => return Err(SimError::UnknownCombatant(id)),
    }
    reindex(world, id, position)
}

/// Refresh the index entry of `id` after it moved.
pub fn reindex(world: &mut World, id: CombatantId, position: Vec3) -> SimResult<()> {
    world.resource_mut::<SpatialIndex>().update_position(id, position)
}

/// AI, movement, fire and reindex for one agent.
pub fn full_update(world: &mut World, ctx: &mut FrameContext, id: CombatantId, now: f64) -> SimResult<()> {
    let Some(mut c) = load(world, id) else {
        return Ok(());
    };
    let ai_dt = ((now - c.schedule.last_ai_update).max(0.0) as f32).min(MAX_FULL_AI_STEP);
    let move_dt = ((now - c.schedule.last_move_update).max(0.0) as f32).min(MAX_FULL_MOVE_STEP);
    let mut effects = Effects::default();
    {
        let view = BattleView::from_world(world)?;
        ai::update(&view, ctx, &mut c, ai_dt, &mut effects)?;
        movement::steer(&mut c);
        movement::integrate(&mut c, view.battlefield, move_dt);
        combat::update_fire(&view, ctx, &mut c, ai_dt, &mut effects)?;
    }
    c.schedule.last_ai_update = now;
    c.schedule.last_move_update = now;
    store(world, c)?;
    apply_effects(world, &mut effects, now)
}

/// Movement, rotation and reindex without any decision making.
/// `max_dt` caps the step for agents updated rarely.
pub fn movement_update(world: &mut World, id: CombatantId, now: f64, max_dt: f32) -> SimResult<()> {
    let Some(mut c) = load(world, id) else {
        return Ok(());
    };
    let dt = ((now - c.schedule.last_move_update).max(0.0) as f32).min(max_dt);
    movement::basic_move(&mut c, world.resource::<Battlefield>(), dt);
    c.schedule.last_move_update = now;
    store(world, c)
}

/// Render orientation only.
pub fn ultra_light_update(world: &mut World, id: CombatantId, dt: f32) {
    if let Some(mut c) = world.get_mut::<Combatant>(id.entity()) {
        if c.is_alive() {
            movement::rotate_visual(&mut c, dt);
        }
    }
}

/// Far-away coarse step: walk toward the nearest objective not held by the
/// agent's faction, without terrain sampling or AI.
pub fn coarse_update(world: &mut World, ctx: &mut FrameContext, id: CombatantId, now: f64) -> SimResult<()> {
    let Some(mut c) = load(world, id) else {
        return Ok(());
    };
    let elapsed = (now - c.schedule.last_coarse_update).max(0.0) as f32;
    c.schedule.last_coarse_update = now;
    c.schedule.last_move_update = now;

    let objective = world
        .resource::<Battlefield>()
        .zones
        .iter()
        .filter(|z| z.owner != Some(c.faction) && !z.is_home_base)
        .min_by(|a, b| {
            a.position
                .distance_squared(c.position)
                .total_cmp(&b.position.distance_squared(c.position))
        })
        .map(|z| z.position);

    if let Some(objective) = objective {
        let goal = objective
            + Vec3::new(
                ctx.rng.gen_range(-COARSE_JITTER..=COARSE_JITTER),
                0.0,
                ctx.rng.gen_range(-COARSE_JITTER..=COARSE_JITTER),
            );
        let mut step = goal - c.position;
        step.y = 0.0;
        let distance = step.length();
        let travel = (c.profile.move_speed * elapsed).min(distance);
        if distance > f32::EPSILON {
            c.position += step / distance * travel;
            c.facing = crate::geometry::facing_toward(Vec3::ZERO, step);
            c.visual_facing = c.facing;
        }
        trace!(combatant = %c.id, travel, "coarse step");
    }
    c.velocity = Vec3::ZERO;
    store(world, c)
}

/// Take a combatant out of the world, its squad and the index.
/// Returns false if it was already gone.
pub fn remove_combatant(world: &mut World, id: CombatantId) -> bool {
    if world.get::<Combatant>(id.entity()).is_none() {
        return false;
    }
    squad::leave_squad(world, id);
    world.resource_mut::<SpatialIndex>().remove(id);
    world.despawn(id.entity())
}

/// Apply side effects gathered from one agent update.
pub fn apply_effects(world: &mut World, effects: &mut Effects, now: f64) -> SimResult<()> {
    for effect in effects.drain() {
        match effect {
            Effect::Damage {
                target,
                amount,
                attacker,
                headshot,
            } => match combat::apply_damage(world, target, amount, Some(TargetRef::Combatant(attacker)), headshot) {
                Ok(_) => {}
                // Removed earlier this frame.
                Err(SimError::UnknownCombatant(id)) => debug!(combatant = %id, "hit on removed combatant"),
                Err(e) => return Err(e),
            },
            Effect::DamagePlayer(hit) => combat::apply_player_damage(world, hit),
            Effect::NearMiss { target } => combat::apply_near_miss(world, target),
            Effect::PlayerNearMiss => combat::apply_player_near_miss(world),
            Effect::Maneuver(plan) => squad::apply_maneuver(world, &plan, now),
            Effect::ShotFired => world.resource_mut::<FrameEvents>().shots_fired += 1,
        }
    }
    Ok(())
}
