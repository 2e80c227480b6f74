//! Combat resolution - shots, hits, damage and death.
//!
//! ## Shot model
//!
//! A shot is a ray from the muzzle toward the target's centre mass, led by the
//! target's velocity and scattered by the shooter's accuracy multiplier.
//! Candidates come from the spatial ray query; each is tested against its
//! posture's hit zones and the nearest hit along the ray wins. Terrain between
//! muzzle and hit blocks the shot when the fire raycast budget allows a check.
//!
//! ## Gather / apply
//!
//! Resolving a shot only reads the world. Damage and near misses are pushed as
//! [`Effect`]s and applied once the shooter's own update is written back.

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::battle::{
    BattleView, Effect, Effects, FrameContext, FrameEvents, PlayerHit, PlayerState, RaycastBudget, SimClock,
    SimRng, PLAYER_BODY_RADIUS, PLAYER_HEAD_RADIUS,
};
use crate::components::*;
use crate::error::{SimError, SimResult};
use crate::geometry::{facing_toward, ray_sphere, Ray};
use crate::spatial::SpatialIndex;
use crate::spatial::SpatialQuery;
use crate::systems::squad::leave_squad;
use crate::systems::suppression::{self, HIT_SUPPRESSION};

/// Combat configuration constants.
pub const MUZZLE_VELOCITY: f32 = 400.0;
pub const HEADSHOT_MULTIPLIER: f32 = 2.2;
/// Rounds passing within this distance cause suppression.
pub const NEAR_MISS_RADIUS: f32 = 3.0;
const FALLOFF_START: f32 = 30.0;
const FALLOFF_END: f32 = 150.0;
const FALLOFF_MIN: f32 = 0.5;

const FIRST_SHOT_BONUS: f32 = 0.6;
const BURST_DEGRADATION: f32 = 1.15;
const MAX_BURST_PENALTY: f32 = 2.5;
const FULL_AUTO_PENALTY: f32 = 1.6;
const RANGE_PENALTY_SCALE: f32 = 60.0;
const MAX_RANGE_PENALTY: f32 = 3.0;
const FLASH_PENALTY: f32 = 4.0;

/// Panic added by taking a hit.
const HIT_PANIC: f32 = 0.1;

// ============================================================================
// WEAPONS AND HIT ZONES
// ============================================================================

/// Weapon parameters for damage and range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeaponProfile {
    pub base_damage: f32,
    pub max_range: f32,
    pub headshot_multiplier: f32,
}

impl WeaponProfile {
    pub fn rifle() -> Self {
        Self {
            base_damage: 34.0,
            max_range: 250.0,
            headshot_multiplier: HEADSHOT_MULTIPLIER,
        }
    }
}

impl Default for WeaponProfile {
    fn default() -> Self {
        Self::rifle()
    }
}

/// Range falloff: full damage to 30m, linear to 50% at 150m.
pub fn damage_falloff(distance: f32) -> f32 {
    if distance <= FALLOFF_START {
        1.0
    } else {
        let t = ((distance - FALLOFF_START) / (FALLOFF_END - FALLOFF_START)).min(1.0);
        1.0 - t * (1.0 - FALLOFF_MIN)
    }
}

/// Standard damage function: falloff plus headshot multiplier.
pub fn standard_damage(weapon: &WeaponProfile, distance: f32, headshot: bool) -> f32 {
    let base = weapon.base_damage * damage_falloff(distance);
    if headshot {
        base * weapon.headshot_multiplier
    } else {
        base
    }
}

/// A sphere on the body, relative to the feet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitZone {
    pub height: f32,
    pub radius: f32,
    pub headshot: bool,
    pub damage_scale: f32,
}

const STANDING_ZONES: [HitZone; 3] = [
    HitZone { height: 1.65, radius: 0.18, headshot: true, damage_scale: 1.0 },
    HitZone { height: 1.2, radius: 0.35, headshot: false, damage_scale: 1.0 },
    HitZone { height: 0.55, radius: 0.3, headshot: false, damage_scale: 0.75 },
];

/// Crouched while fighting: lower and wider.
const CROUCHED_ZONES: [HitZone; 3] = [
    HitZone { height: 1.15, radius: 0.18, headshot: true, damage_scale: 1.0 },
    HitZone { height: 0.8, radius: 0.45, headshot: false, damage_scale: 1.0 },
    HitZone { height: 0.35, radius: 0.35, headshot: false, damage_scale: 0.75 },
];

pub fn hit_zones(state: CombatantState) -> &'static [HitZone] {
    match state {
        CombatantState::Engaging | CombatantState::Suppressing => &CROUCHED_ZONES,
        _ => &STANDING_ZONES,
    }
}

/// Nearest zone hit by `ray` on a body at `feet`.
fn intersect_zones(ray: &Ray, feet: Vec3, zones: &[HitZone], max_dist: f32) -> Option<(f32, HitZone)> {
    zones
        .iter()
        .filter_map(|z| ray_sphere(ray, feet + Vec3::Y * z.height, z.radius, max_dist).map(|t| (t, *z)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

// ============================================================================
// ACCURACY
// ============================================================================

/// Accuracy multiplier for the shooter's next shot (>= 1 is worse).
pub fn accuracy_multiplier(c: &Combatant, distance: f32, now: f64) -> f32 {
    let burst = if c.fire.shots_in_burst == 0 {
        FIRST_SHOT_BONUS
    } else {
        BURST_DEGRADATION
            .powi(c.fire.shots_in_burst as i32)
            .min(MAX_BURST_PENALTY)
    };
    let auto = if c.fire.is_full_auto { FULL_AUTO_PENALTY } else { 1.0 };
    let range = if distance > FALLOFF_START {
        ((distance - FALLOFF_START) / RANGE_PENALTY_SCALE)
            .exp()
            .min(MAX_RANGE_PENALTY)
    } else {
        1.0
    };
    let flash = if c.memory.is_flashed(now) { FLASH_PENALTY } else { 1.0 };
    burst * auto * range * flash * (1.0 + c.memory.suppression)
}

/// Aim point led by the target's velocity.
pub fn lead_aim(muzzle: Vec3, aim_point: Vec3, velocity: Vec3) -> Vec3 {
    let lead_time = muzzle.distance(aim_point) / MUZZLE_VELOCITY;
    aim_point + velocity * lead_time
}

/// Rotate `direction` by random yaw/pitch within `spread` radians.
pub fn scatter(rng: &mut SimRng, direction: Vec3, spread: f32) -> Vec3 {
    if spread <= 0.0 {
        return direction;
    }
    let right = direction.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
    let up = right.cross(direction).normalize_or_zero();
    let yaw = rng.gen_range(-spread..=spread);
    let pitch = rng.gen_range(-spread..=spread);
    (direction + right * yaw.tan() + up * pitch.tan()).normalize_or_zero()
}

// ============================================================================
// SHOT RESOLUTION
// ============================================================================

/// A resolved hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotHit {
    pub target: TargetRef,
    pub point: Vec3,
    pub distance: f32,
    pub headshot: bool,
    pub damage_scale: f32,
}

/// Outcome of one shot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotResolution {
    pub hit: Option<ShotHit>,
    /// Enemies of the shooter the round passed close to.
    pub near_misses: Vec<CombatantId>,
    pub player_near_miss: bool,
    /// A hit was cancelled by terrain.
    pub blocked: bool,
}

/// Who fired the shot.
#[derive(Debug, Clone, Copy)]
pub struct Shooter {
    pub id: Option<CombatantId>,
    pub faction: Faction,
}

/// Trace one round through the battle.
pub fn resolve_shot(
    view: &BattleView,
    budget: &mut RaycastBudget,
    shooter: Shooter,
    ray: &Ray,
    max_range: f32,
) -> SimResult<ShotResolution> {
    let candidates = view.index.query_ray(ray, max_range, NEAR_MISS_RADIUS)?;

    let mut best: Option<ShotHit> = None;
    let mut passed: Vec<(CombatantId, f32)> = Vec::new();

    for candidate in candidates {
        if Some(candidate.id) == shooter.id {
            continue;
        }
        let Some(c) = view.combatant(candidate.id) else {
            continue;
        };
        // Friendly fire disabled: allies are neither hit nor suppressed.
        if !c.is_alive() || c.faction == shooter.faction {
            continue;
        }
        match intersect_zones(ray, c.position, hit_zones(c.state), max_range) {
            Some((t, zone)) if best.map_or(true, |b| t < b.distance) => {
                best = Some(ShotHit {
                    target: TargetRef::Combatant(c.id),
                    point: ray.at(t),
                    distance: t,
                    headshot: zone.headshot,
                    damage_scale: zone.damage_scale,
                });
            }
            _ => passed.push((c.id, candidate.t)),
        }
    }

    let player = view.player;
    let mut player_passed = false;
    if player.is_targetable() && player.faction != shooter.faction && shooter.id.is_some() {
        let head = ray_sphere(ray, player.head_center(), PLAYER_HEAD_RADIUS, max_range);
        let body = ray_sphere(ray, player.body_center(), PLAYER_BODY_RADIUS, max_range);
        let player_hit = match (head, body) {
            (Some(h), Some(b)) if b < h => Some((b, false)),
            (Some(h), _) => Some((h, true)),
            (None, Some(b)) => Some((b, false)),
            (None, None) => None,
        };
        match player_hit {
            Some((t, headshot)) if best.map_or(true, |b| t < b.distance) => {
                best = Some(ShotHit {
                    target: TargetRef::Player,
                    point: ray.at(t),
                    distance: t,
                    headshot,
                    damage_scale: 1.0,
                });
            }
            _ => {
                let t = ray.project(player.body_center());
                player_passed = (0.0..=max_range).contains(&t)
                    && ray.perpendicular_distance(player.body_center()) <= NEAR_MISS_RADIUS;
            }
        }
    }

    let mut blocked = false;
    if let Some(hit) = best {
        if budget.try_fire() && view.battlefield.terrain_blocks(ray.origin, hit.point) == Some(true) {
            blocked = true;
            best = None;
        }
    }

    // Rounds stop at whatever they hit.
    let stop = best.map_or(max_range, |b| b.distance);
    let player_near_miss = player_passed && !blocked && ray.project(player.body_center()) <= stop;
    let near_misses = if blocked {
        Vec::new()
    } else {
        passed
            .into_iter()
            .filter(|(id, t)| *t <= stop && best.map_or(true, |b| b.target != TargetRef::Combatant(*id)))
            .map(|(id, _)| id)
            .collect()
    };

    Ok(ShotResolution {
        hit: best,
        near_misses,
        player_near_miss,
        blocked,
    })
}

// ============================================================================
// AI FIRE
// ============================================================================

/// Shots per burst for the agent's current posture.
fn burst_length(c: &Combatant) -> u32 {
    if c.fire.is_full_auto {
        c.profile.burst_length * 3
    } else if c.fire.in_cover {
        (c.profile.burst_length / 2).max(1)
    } else {
        c.profile.burst_length
    }
}

fn burst_pause(c: &Combatant) -> f32 {
    if c.fire.in_cover {
        c.profile.burst_pause * 1.5
    } else if c.fire.is_full_auto {
        c.profile.burst_pause * 0.5
    } else {
        c.profile.burst_pause
    }
}

/// Run the burst/cooldown logic and fire at most one round this update.
///
/// Engaging agents fire at their target; suppressing agents fire full-auto
/// at the last known position. Other states hold fire.
pub fn update_fire(
    view: &BattleView,
    ctx: &mut FrameContext,
    c: &mut Combatant,
    dt: f32,
    effects: &mut Effects,
) -> SimResult<()> {
    c.fire.fire_cooldown = (c.fire.fire_cooldown - dt).max(0.0);
    c.fire.burst_cooldown = (c.fire.burst_cooldown - dt).max(0.0);

    let aim = match (c.state, c.target) {
        (CombatantState::Engaging, Some(target)) => match view.resolve(target) {
            Some(info) => match target {
                TargetRef::Combatant(_) => lead_aim(c.muzzle_position(), info.aim_point, info.velocity),
                TargetRef::Player => info.aim_point,
            },
            None => return Ok(()),
        },
        (CombatantState::Suppressing, _) => match c.memory.last_known_target {
            Some(p) => p + Vec3::Y * CENTER_MASS_HEIGHT,
            None => return Ok(()),
        },
        _ => {
            c.fire.shots_in_burst = 0;
            return Ok(());
        }
    };

    c.facing = facing_toward(c.position, aim);
    if c.fire.burst_cooldown > 0.0 || c.fire.fire_cooldown > 0.0 {
        return Ok(());
    }

    let muzzle = c.muzzle_position();
    let distance = muzzle.distance(aim);
    let spread = c.profile.aim_jitter * accuracy_multiplier(c, distance, view.now);
    let direction = scatter(ctx.rng, (aim - muzzle).normalize_or_zero(), spread);
    if direction == Vec3::ZERO {
        return Ok(());
    }
    let ray = Ray::new(muzzle, direction);
    let weapon = WeaponProfile::rifle();
    let shooter = Shooter {
        id: Some(c.id),
        faction: c.faction,
    };
    let shot = resolve_shot(view, &mut ctx.budget, shooter, &ray, weapon.max_range)?;

    effects.push(Effect::ShotFired);
    if let Some(hit) = shot.hit {
        let amount = standard_damage(&weapon, hit.distance, hit.headshot) * hit.damage_scale;
        match hit.target {
            TargetRef::Combatant(target) => effects.push(Effect::Damage {
                target,
                amount,
                attacker: c.id,
                headshot: hit.headshot,
            }),
            TargetRef::Player => effects.push(Effect::DamagePlayer(PlayerHit {
                attacker: c.id,
                damage: amount,
                headshot: hit.headshot,
            })),
        }
    }
    for target in shot.near_misses {
        effects.push(Effect::NearMiss { target });
    }
    if shot.player_near_miss {
        effects.push(Effect::PlayerNearMiss);
    }

    c.fire.shots_in_burst += 1;
    c.fire.fire_cooldown = if c.fire.is_full_auto {
        c.profile.fire_interval * 0.7
    } else {
        c.profile.fire_interval
    };
    if c.fire.shots_in_burst >= burst_length(c) {
        c.fire.shots_in_burst = 0;
        c.fire.burst_cooldown = burst_pause(c);
    }
    Ok(())
}

// ============================================================================
// DAMAGE APPLICATION
// ============================================================================

/// Result of applying damage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DamageOutcome {
    /// Damage actually applied (0 for dying/dead targets).
    pub applied: f32,
    pub killed: bool,
    pub remaining_health: f32,
}

fn now(world: &World) -> f64 {
    world.get_resource::<SimClock>().map_or(0.0, |c| c.elapsed)
}

/// Apply damage to a combatant; starts its death when health reaches zero.
pub fn apply_damage(
    world: &mut World,
    target: CombatantId,
    amount: f32,
    attacker: Option<TargetRef>,
    headshot: bool,
) -> SimResult<DamageOutcome> {
    let now = now(world);
    let applied = {
        let Some(mut c) = world.get_mut::<Combatant>(target.entity()) else {
            warn!(combatant = %target, "damage applied to unknown combatant");
            return Err(SimError::UnknownCombatant(target));
        };
        if !c.is_alive() {
            return Ok(DamageOutcome {
                applied: 0.0,
                killed: false,
                remaining_health: c.health.current,
            });
        }
        let before = c.health.current;
        c.health.damage(amount);
        c.memory.last_hit_time = Some(now);
        if attacker.is_some() {
            c.memory.last_attacker = attacker;
        }
        c.memory.add_suppression(HIT_SUPPRESSION);
        c.memory.add_panic(HIT_PANIC);
        trace!(combatant = %target, amount, headshot, "damage applied");
        let applied = before - c.health.current;
        if !c.health.is_depleted() {
            return Ok(DamageOutcome {
                applied,
                killed: false,
                remaining_health: c.health.current,
            });
        }
        c.begin_dying();
        applied
    };

    kill(world, target);
    Ok(DamageOutcome {
        applied,
        killed: true,
        remaining_health: 0.0,
    })
}

/// Bookkeeping once a combatant starts dying: leave the squad immediately.
fn kill(world: &mut World, id: CombatantId) {
    leave_squad(world, id);
    if let Some(mut events) = world.get_resource_mut::<FrameEvents>() {
        events.deaths.push(id);
    }
    debug!(combatant = %id, "combatant killed");
}

/// Register a near miss on a combatant.
pub fn apply_near_miss(world: &mut World, target: CombatantId) {
    if let Some(mut c) = world.get_mut::<Combatant>(target.entity()) {
        if c.is_alive() {
            suppression::near_miss(&mut c.memory);
        }
    }
}

/// Register a near miss on the player.
pub fn apply_player_near_miss(world: &mut World) {
    let mut player = world.resource_mut::<PlayerState>();
    player.suppression = (player.suppression + suppression::NEAR_MISS_SUPPRESSION).min(1.0);
    player.panic = (player.panic + suppression::NEAR_MISS_PANIC).min(1.0);
    player.near_miss_count = player.near_miss_count.saturating_add(1);
}

/// Apply AI fire to the player and record it for the frame report.
pub fn apply_player_damage(world: &mut World, hit: PlayerHit) {
    world.resource_mut::<PlayerState>().health.damage(hit.damage);
    if let Some(mut events) = world.get_resource_mut::<FrameEvents>() {
        events.player_hits.push(hit);
    }
}

// ============================================================================
// PLAYER FIRE AND FLASH
// ============================================================================

/// Result of a player shot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerShotResult {
    pub hit: bool,
    pub point: Option<Vec3>,
    pub killed: bool,
    pub headshot: bool,
    pub damage: f32,
    #[serde(skip)]
    pub target: Option<CombatantId>,
}

/// Resolve a shot fired by the player.
pub fn fire_from_player<F>(
    world: &mut World,
    ray: &Ray,
    damage_fn: F,
    weapon: &WeaponProfile,
) -> SimResult<PlayerShotResult>
where
    F: Fn(&WeaponProfile, f32, bool) -> f32,
{
    let faction = world.resource::<PlayerState>().faction;
    let shot = {
        let view = BattleView::from_world(world)?;
        let mut budget = RaycastBudget::unlimited();
        resolve_shot(
            &view,
            &mut budget,
            Shooter { id: None, faction },
            ray,
            weapon.max_range,
        )?
    };

    for id in &shot.near_misses {
        apply_near_miss(world, *id);
    }

    let Some(hit) = shot.hit else {
        return Ok(PlayerShotResult::default());
    };
    let TargetRef::Combatant(target) = hit.target else {
        return Ok(PlayerShotResult::default());
    };
    let damage = damage_fn(weapon, hit.distance, hit.headshot) * hit.damage_scale;
    let outcome = apply_damage(world, target, damage, Some(TargetRef::Player), hit.headshot)?;
    Ok(PlayerShotResult {
        hit: true,
        point: Some(hit.point),
        killed: outcome.killed,
        headshot: hit.headshot,
        damage: outcome.applied,
        target: Some(target),
    })
}

/// Disorient every live combatant within `radius` of `center`.
/// Returns how many were affected.
pub fn apply_flash(world: &mut World, center: Vec3, radius: f32, duration: f32) -> SimResult<usize> {
    let now = now(world);
    let ids = world.resource::<SpatialIndex>().query_radius(center, radius)?;
    let mut affected = 0;
    for id in ids {
        if let Some(mut c) = world.get_mut::<Combatant>(id.entity()) {
            if c.is_alive() {
                c.memory.flash_until = c.memory.flash_until.max(now + f64::from(duration));
                c.memory.add_panic(0.2);
                affected += 1;
            }
        }
    }
    debug!(affected, radius, "flash applied");
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::squad::{join_squad, Squads};
    use crate::testing;

    #[test]
    fn test_damage_falloff() {
        assert_eq!(damage_falloff(10.0), 1.0);
        assert!((damage_falloff(90.0) - 0.75).abs() < 1e-5);
        assert!((damage_falloff(150.0) - 0.5).abs() < 1e-5);
        assert!((damage_falloff(500.0) - 0.5).abs() < 1e-5);
        let w = WeaponProfile::rifle();
        assert!((standard_damage(&w, 10.0, true) - 34.0 * 2.2).abs() < 1e-3);
    }

    #[test]
    fn test_accuracy_multiplier_terms() {
        let mut world = testing::world();
        let id = testing::spawn(&mut world, Faction::Blue, Vec3::ZERO);
        let mut c = testing::combatant(&world, id).clone();

        assert!((accuracy_multiplier(&c, 10.0, 0.0) - 0.6).abs() < 1e-5);

        c.fire.shots_in_burst = 20;
        assert!((accuracy_multiplier(&c, 10.0, 0.0) - 2.5).abs() < 1e-4);

        c.fire.shots_in_burst = 1;
        c.fire.is_full_auto = true;
        assert!((accuracy_multiplier(&c, 10.0, 0.0) - 1.15 * 1.6).abs() < 1e-4);

        c.fire.is_full_auto = false;
        let far = accuracy_multiplier(&c, 1000.0, 0.0);
        assert!((far - 1.15 * 3.0).abs() < 1e-3);

        c.memory.flash_until = 5.0;
        c.memory.suppression = 0.5;
        let flashed = accuracy_multiplier(&c, 10.0, 1.0);
        assert!((flashed - 1.15 * 4.0 * 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_resolve_shot_hits_nearest_enemy() {
        let mut world = testing::world();
        let near = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 20.0));
        let far = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 40.0));
        let view = BattleView::from_world(&world).unwrap();
        let mut budget = RaycastBudget::new(10, 10);

        let ray = Ray::new(Vec3::new(0.0, 1.2, 0.0), Vec3::Z);
        let shot = resolve_shot(&view, &mut budget, Shooter { id: None, faction: Faction::Blue }, &ray, 200.0).unwrap();
        let hit = shot.hit.unwrap();
        assert_eq!(hit.target, TargetRef::Combatant(near));
        assert!(!hit.headshot);
        assert!(!shot.near_misses.contains(&far));
    }

    #[test]
    fn test_friendly_fire_disabled() {
        let mut world = testing::world();
        testing::spawn(&mut world, Faction::Blue, Vec3::new(0.0, 0.0, 20.0));
        let view = BattleView::from_world(&world).unwrap();
        let mut budget = RaycastBudget::new(10, 10);
        let ray = Ray::new(Vec3::new(0.0, 1.2, 0.0), Vec3::Z);
        let shot = resolve_shot(&view, &mut budget, Shooter { id: None, faction: Faction::Blue }, &ray, 200.0).unwrap();
        assert!(shot.hit.is_none());
        assert!(shot.near_misses.is_empty());
    }

    #[test]
    fn test_near_miss_recorded() {
        let mut world = testing::world();
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(2.0, 0.0, 20.0));
        let view = BattleView::from_world(&world).unwrap();
        let mut budget = RaycastBudget::new(10, 10);
        let ray = Ray::new(Vec3::new(0.0, 1.2, 0.0), Vec3::Z);
        let shot = resolve_shot(&view, &mut budget, Shooter { id: None, faction: Faction::Blue }, &ray, 200.0).unwrap();
        assert!(shot.hit.is_none());
        assert_eq!(shot.near_misses, vec![enemy]);
    }

    #[test]
    fn test_terrain_blocks_hit() {
        let mut world = testing::world();
        let mut grid = crate::terrain::TerrainGrid::new(200, 200, 1.0);
        grid.raise_block(-5.0, 9.0, 5.0, 11.0, 5.0);
        testing::set_terrain(&mut world, grid);
        testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 20.0));
        let view = BattleView::from_world(&world).unwrap();
        let ray = Ray::new(Vec3::new(0.0, 1.2, 0.0), Vec3::Z);

        let mut budget = RaycastBudget::new(10, 10);
        let shot = resolve_shot(&view, &mut budget, Shooter { id: None, faction: Faction::Blue }, &ray, 200.0).unwrap();
        assert!(shot.blocked);
        assert!(shot.hit.is_none());

        // Fire raycast cap exhausted: the terrain check is skipped.
        let mut empty = RaycastBudget::new(10, 0);
        let shot = resolve_shot(&view, &mut empty, Shooter { id: None, faction: Faction::Blue }, &ray, 200.0).unwrap();
        assert!(shot.hit.is_some());
    }

    #[test]
    fn test_lethal_damage_starts_dying_and_leaves_squad() {
        let mut world = testing::world();
        let leader = testing::spawn(&mut world, Faction::Red, Vec3::ZERO);
        let second = testing::spawn(&mut world, Faction::Red, Vec3::X);
        let squad = world.resource_mut::<Squads>().create(Faction::Red);
        join_squad(&mut world, leader, squad).unwrap();
        join_squad(&mut world, second, squad).unwrap();

        let outcome = apply_damage(&mut world, leader, 500.0, None, false).unwrap();
        assert!(outcome.killed);
        let c = testing::combatant(&world, leader);
        assert!(c.is_dying());
        assert_eq!(c.death_progress(), 0.0);
        assert_eq!(c.state, CombatantState::Dead);
        assert!(c.target.is_none());
        assert_eq!(world.resource::<Squads>().get(squad).unwrap().members, vec![second]);
        assert_eq!(testing::combatant(&world, second).role, SquadRole::Leader);

        // Damage to a dying combatant is ignored.
        let again = apply_damage(&mut world, leader, 10.0, None, false).unwrap();
        assert_eq!(again.applied, 0.0);
        assert!(!again.killed);
    }

    #[test]
    fn test_damage_unknown_target() {
        let mut world = testing::world();
        let ghost = CombatantId(Entity::from_raw(999));
        assert_eq!(
            apply_damage(&mut world, ghost, 10.0, None, false),
            Err(SimError::UnknownCombatant(ghost))
        );
    }

    #[test]
    fn test_player_shot_kills_with_headshot() {
        let mut world = testing::world();
        let enemy = testing::spawn(&mut world, Faction::Red, Vec3::new(0.0, 0.0, 15.0));
        let ray = Ray::new(Vec3::new(0.0, 1.65, 0.0), Vec3::Z);
        let result = fire_from_player(&mut world, &ray, |_, _, headshot| if headshot { 150.0 } else { 10.0 }, &WeaponProfile::rifle()).unwrap();
        assert!(result.hit);
        assert!(result.headshot);
        assert!(result.killed);
        assert_eq!(result.target, Some(enemy));
        assert!(testing::combatant(&world, enemy).is_dying());
    }

    #[test]
    fn test_flash_disorients_nearby() {
        let mut world = testing::world();
        let close = testing::spawn(&mut world, Faction::Red, Vec3::new(3.0, 0.0, 0.0));
        let distant = testing::spawn(&mut world, Faction::Red, Vec3::new(60.0, 0.0, 0.0));
        assert_eq!(apply_flash(&mut world, Vec3::ZERO, 10.0, 3.0).unwrap(), 1);
        assert!(testing::combatant(&world, close).memory.is_flashed(1.0));
        assert!(!testing::combatant(&world, distant).memory.is_flashed(1.0));
    }
}
