//! Target detection and line-of-sight.
//!
//! Visibility is a chain of cheap-to-expensive checks: range, field of view,
//! terrain raycast (High/Medium LOD only, capped per frame), then cover
//! volumes. Any failing check means not visible.

use glam::Vec3;
use rand::Rng;

use crate::battle::{BattleView, RaycastBudget, SimRng, TargetInfo};
use crate::components::*;
use crate::error::SimResult;
use crate::geometry::{facing_toward, horizontal_distance_sq, wrap_angle};

/// Reaction delay added per 30m of range.
const REACTION_PER_30M: f32 = 0.25;
/// Closest candidates checked for visibility per scan.
const MAX_VISIBILITY_CHECKS: usize = 6;

/// Probability of committing to an engagement at `distance` metres.
pub fn engagement_chance(distance: f32) -> f32 {
    if distance < 30.0 {
        1.0
    } else if distance < 60.0 {
        0.8
    } else if distance < 90.0 {
        0.5
    } else {
        0.2
    }
}

/// Roll the distance-weighted engagement check.
pub fn roll_engagement(rng: &mut SimRng, distance: f32) -> bool {
    let chance = engagement_chance(distance);
    chance >= 1.0 || rng.gen::<f32>() < chance
}

/// Seconds before an alerted agent may open fire on a target at `distance`.
pub fn reaction_delay(profile: &BehaviorProfile, distance: f32) -> f32 {
    profile.reaction_delay + REACTION_PER_30M * (distance.max(0.0) / 30.0)
}

/// Whether `observer` can see `point` (an eye/aim height point).
///
/// Updates the observer's cached terrain result when a raycast is spent.
pub fn can_see_target(
    view: &BattleView,
    budget: &mut RaycastBudget,
    observer: &mut Combatant,
    point: Vec3,
) -> bool {
    let range = observer.profile.visual_range;
    if horizontal_distance_sq(observer.position, point) > range * range {
        return false;
    }

    let bearing = facing_toward(observer.position, point);
    if wrap_angle(bearing - observer.facing).abs() > observer.profile.half_fov() {
        return false;
    }

    let eye = observer.eye_position();
    if observer.schedule.lod.allows_terrain_los() && view.battlefield.terrain.is_some() {
        let clear = if budget.try_los() {
            let clear = view.battlefield.terrain_blocks(eye, point) != Some(true);
            observer.memory.los_cache = Some(clear);
            clear
        } else {
            // Out of raycasts: reuse the last answer, fail closed without one.
            observer.memory.los_cache.unwrap_or(false)
        };
        if !clear {
            return false;
        }
    }

    !view.battlefield.volume_blocks(eye, point)
}

/// A detected enemy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    pub info: TargetInfo,
    pub distance: f32,
}

/// Nearest visible enemy within `max_range` (capped by visual range).
pub fn nearest_visible_enemy(
    view: &BattleView,
    budget: &mut RaycastBudget,
    agent: &mut Combatant,
    max_range: f32,
) -> SimResult<Option<Sighting>> {
    let range = max_range.min(agent.profile.visual_range);
    let candidates = view.enemies_near(agent.position, range, agent.faction)?;
    for info in candidates.into_iter().take(MAX_VISIBILITY_CHECKS) {
        if can_see_target(view, budget, agent, info.aim_point) {
            return Ok(Some(Sighting {
                distance: agent.position.distance(info.position),
                info,
            }));
        }
    }
    Ok(None)
}

/// Number of live enemies within `radius` (no visibility check).
pub fn enemies_within(view: &BattleView, center: Vec3, radius: f32, faction: Faction) -> SimResult<usize> {
    Ok(view.enemies_near(center, radius, faction)?.len())
}
