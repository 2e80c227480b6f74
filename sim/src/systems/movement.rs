//! Movement integration - turns destinations into velocity, velocity into
//! position, and smooths the rendered facing.

use crate::components::*;
use crate::geometry::{facing_toward, horizontal, wrap_angle};
use crate::terrain::Battlefield;
use glam::Vec3;

/// Within this distance a destination counts as reached.
pub const ARRIVAL_RADIUS: f32 = 1.5;
/// Turn rate of the rendered facing (radians per second).
const VISUAL_TURN_RATE: f32 = 8.0;
/// Suppression above which movement slows down.
const SUPPRESSED_THRESHOLD: f32 = 0.5;

/// Desired ground speed for the agent's current state.
pub fn desired_speed(c: &Combatant) -> f32 {
    let base = match c.state {
        CombatantState::Advancing | CombatantState::SeekingCover => c.profile.sprint_speed,
        CombatantState::Patrolling | CombatantState::Defending => c.profile.move_speed,
        CombatantState::Alert | CombatantState::Engaging | CombatantState::Suppressing => {
            c.profile.move_speed * 0.5
        }
        CombatantState::Dead => 0.0,
    };
    if c.memory.suppression > SUPPRESSED_THRESHOLD {
        base * 0.6
    } else {
        base
    }
}

/// Current movement goal: the waypoint first, then the destination.
pub fn current_goal(c: &Combatant) -> Option<Vec3> {
    c.waypoint.or(c.destination)
}

/// Whether the agent stands on `point` (horizontal distance).
pub fn arrived_at(c: &Combatant, point: Vec3) -> bool {
    horizontal(point - c.position).length_squared() <= ARRIVAL_RADIUS * ARRIVAL_RADIUS
}

/// Steer toward the current goal, advancing waypoint → destination on arrival.
pub fn steer(c: &mut Combatant) {
    if let Some(waypoint) = c.waypoint {
        if arrived_at(c, waypoint) {
            c.waypoint = None;
        }
    }
    let Some(goal) = current_goal(c) else {
        c.velocity = Vec3::ZERO;
        return;
    };
    let to_goal = horizontal(goal - c.position);
    let distance = to_goal.length();
    if distance <= ARRIVAL_RADIUS {
        c.velocity = Vec3::ZERO;
        return;
    }
    c.velocity = to_goal / distance * desired_speed(c);
}

/// Apply velocity for `dt` seconds, clamp to the ground and turn the body
/// toward the direction of travel when not aiming at a target.
pub fn integrate(c: &mut Combatant, battlefield: &Battlefield, dt: f32) {
    if !c.is_alive() || dt <= 0.0 {
        return;
    }
    if c.velocity.length_squared() > 1e-6 {
        c.position += c.velocity * dt;
        if c.target.is_none() {
            c.facing = facing_toward(Vec3::ZERO, c.velocity);
        }
    }
    if let Some(ground) = battlefield.height_at(c.position.x, c.position.z) {
        c.position.y = ground;
    }
    rotate_visual(c, dt);
}

/// Move the rendered facing toward the logical facing.
pub fn rotate_visual(c: &mut Combatant, dt: f32) {
    let delta = wrap_angle(c.facing - c.visual_facing);
    let step = VISUAL_TURN_RATE * dt;
    c.visual_facing = if delta.abs() <= step {
        c.facing
    } else {
        wrap_angle(c.visual_facing + step * delta.signum())
    };
}

/// Steer and integrate in one step (used by reduced-fidelity tiers).
pub fn basic_move(c: &mut Combatant, battlefield: &Battlefield, dt: f32) {
    steer(c);
    integrate(c, battlefield, dt);
}
