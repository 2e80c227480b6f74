//! Level-of-detail scheduling.
//!
//! Each frame runs a small bevy schedule (death animations, removal of
//! finished bodies, tier classification) and then walks the tiers in priority
//! order, deciding per agent between a full update, a movement-only step, a
//! render-only refresh, a coarse step, or nothing.
//!
//! ## Parallelism Notes
//! - `lod_classification_system` gathers positions, classifies them (on the
//!   rayon pool with `--features parallel`), then applies results sequentially.
//! - Tier processing is exclusive: agent updates mutate the world one at a time.
//!
//! ## Degradation
//! Budgeted updates are timed against `ai_budget_ms / interval_scale`. Past the
//! budget the remaining full updates become movement-only; past twice the
//! budget they only refresh render orientation. A started update always
//! completes.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::battle::{FrameContext, FrameEvents, PlayerHit, RaycastBudget, SimClock, SimRng, Viewer};
use crate::components::*;
use crate::config::{LodThresholds, SimConfig};
use crate::error::{SimError, SimResult};
use crate::profiler::Profiler;
use crate::spatial::SpatialIndex;
use crate::systems::pipeline;

/// Medium tier update interval range (ms) before scaling.
pub const MEDIUM_INTERVAL_MS: (f32, f32) = (50.0, 250.0);
/// Low tier update interval range (ms) before scaling.
pub const LOW_INTERVAL_MS: (f32, f32) = (200.0, 1000.0);
/// Largest movement step for a Low tier agent.
pub const LOW_TIER_MAX_DT: f32 = 0.5;
/// Seconds between basic moves of near culled agents (before interval scale).
pub const CULLED_MOVE_INTERVAL: f32 = 1.0;
/// Smoothing factor of the frame-time moving average.
pub const FRAME_EMA_ALPHA: f32 = 0.1;
pub const MAX_INTERVAL_SCALE: f32 = 3.0;
/// Interval scale used while running well above the target frame rate.
const RELAXED_INTERVAL_SCALE: f32 = 0.75;
/// Fraction of the way back toward the centre an out-of-bounds agent moves.
const OUT_OF_BOUNDS_PULL: f32 = 0.05;

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Tier decision for one agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub tier: LodTier,
    pub distance_sq: f32,
    /// Corrected position for agents that strayed outside the world.
    pub nudged: Option<Vec3>,
}

/// Bucket one position by squared distance to the viewer.
pub fn classify(position: Vec3, viewer: Vec3, thresholds: &LodThresholds, half_extent: f32) -> Classification {
    if position.x.abs() > half_extent || position.z.abs() > half_extent {
        let pulled = Vec3::new(
            position.x * (1.0 - OUT_OF_BOUNDS_PULL),
            position.y,
            position.z * (1.0 - OUT_OF_BOUNDS_PULL),
        );
        return Classification {
            tier: LodTier::Culled,
            distance_sq: pulled.distance_squared(viewer),
            nudged: Some(pulled),
        };
    }

    let distance_sq = position.distance_squared(viewer);
    let tier = if distance_sq <= thresholds.high_sq() {
        LodTier::High
    } else if distance_sq <= thresholds.medium_sq() {
        LodTier::Medium
    } else if distance_sq <= thresholds.low_sq() {
        LodTier::Low
    } else {
        LodTier::Culled
    };
    Classification {
        tier,
        distance_sq,
        nudged: None,
    }
}

/// Update interval (seconds) for an agent `distance_sq` away, easing
/// quadratically from `range.0` at `start` to `range.1` at `end`.
pub fn dynamic_interval(
    distance_sq: f32,
    start: f32,
    end: f32,
    range_ms: (f32, f32),
    interval_factor: f32,
    interval_scale: f32,
) -> f64 {
    let span = (end - start).max(f32::EPSILON);
    let t = ((distance_sq.sqrt() - start) / span).clamp(0.0, 1.0);
    let ms = range_ms.0 + (range_ms.1 - range_ms.0) * t * t;
    f64::from(ms * interval_factor * interval_scale) / 1000.0
}

/// Whether `slot` gets its turn on `frame` when work is spread over `every` frames.
#[inline]
pub fn stagger_turn(frame: u64, slot: u64, every: u64) -> bool {
    every <= 1 || frame % every == slot % every
}

// ============================================================================
// SYSTEMS
// ============================================================================

/// Advance death animations; finished ones become `Dead`.
pub fn death_animation_system(clock: Res<SimClock>, mut query: Query<&mut Combatant>) {
    let dt = clock.dt;
    for mut c in query.iter_mut() {
        if let Lifecycle::Dying { elapsed } = c.lifecycle {
            let elapsed = elapsed + dt;
            c.lifecycle = if elapsed >= DEATH_TOTAL_SECS {
                Lifecycle::Dead
            } else {
                Lifecycle::Dying { elapsed }
            };
        }
    }
}

/// Remove every `Dead` combatant from the world, its squad and the index.
pub fn remove_finished_system(world: &mut World) {
    let finished: Vec<CombatantId> = world
        .query::<&Combatant>()
        .iter(world)
        .filter(|c| c.lifecycle == Lifecycle::Dead)
        .map(|c| c.id)
        .collect();
    for id in finished {
        if pipeline::remove_combatant(world, id) {
            trace!(combatant = %id, "body removed");
            world.resource_mut::<FrameEvents>().removed.push(id);
        }
    }
}

/// Assign tiers by squared distance to the viewer.
///
/// ## Data Access
/// - Reads: SimConfig, Viewer
/// - Writes: Combatant schedule metadata, SpatialIndex (out-of-bounds nudges)
pub fn lod_classification_system(
    config: Res<SimConfig>,
    viewer: Res<Viewer>,
    mut index: ResMut<SpatialIndex>,
    mut query: Query<&mut Combatant>,
) {
    let thresholds = config.lod_thresholds();
    let half = config.world_half_extent;
    let eye = viewer.position;

    // GATHER
    let positions: Vec<(Entity, Vec3)> = query
        .iter()
        .filter(|c| c.is_alive())
        .map(|c| (c.id.entity(), c.position))
        .collect();

    // COMPUTE
    #[cfg(feature = "parallel")]
    let classes: Vec<Classification> = positions
        .par_iter()
        .map(|&(_, p)| classify(p, eye, &thresholds, half))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let classes: Vec<Classification> = positions
        .iter()
        .map(|&(_, p)| classify(p, eye, &thresholds, half))
        .collect();

    // APPLY
    for (&(entity, _), class) in positions.iter().zip(classes) {
        let Ok(mut c) = query.get_mut(entity) else {
            continue;
        };
        c.schedule.lod = class.tier;
        c.schedule.distance_sq_to_viewer = class.distance_sq;
        if let Some(position) = class.nudged {
            c.position = position;
            if let Err(e) = index.update_position(c.id, position) {
                warn!(combatant = %c.id, error = %e, "failed to reindex nudged combatant");
            }
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Per-frame scheduling statistics plus running degradation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LodStats {
    pub frame: u64,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub culled: usize,
    pub full_updates: usize,
    pub movement_updates: usize,
    pub visual_only_updates: usize,
    pub ultra_light_updates: usize,
    pub coarse_updates: usize,
    pub removed: usize,
    pub ai_time_ms: f32,
    pub ai_budget_ms: f32,
    pub ema_frame_ms: f32,
    pub interval_scale: f32,
    pub los_raycasts: u32,
    pub los_refused: u32,
    pub fire_raycasts: u32,
    pub fire_refused: u32,
    /// Frames in which full updates were degraded to movement-only.
    pub visual_only_frames: u64,
    /// Frames in which full updates were degraded to orientation-only.
    pub ultra_light_frames: u64,
}

impl LodStats {
    pub fn tier_count(&self, tier: LodTier) -> usize {
        match tier {
            LodTier::High => self.high,
            LodTier::Medium => self.medium,
            LodTier::Low => self.low,
            LodTier::Culled => self.culled,
        }
    }

    pub fn live(&self) -> usize {
        self.high + self.medium + self.low + self.culled
    }
}

/// What happened during one `tick`.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub elapsed: f64,
    pub stats: LodStats,
    /// Agents that started dying.
    pub deaths: Vec<CombatantId>,
    /// Agents removed after finishing their death animation.
    pub removed: Vec<CombatantId>,
    pub player_hits: Vec<PlayerHit>,
    pub shots_fired: u32,
}

// ============================================================================
// SCHEDULER
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    id: CombatantId,
    distance_sq: f32,
    last_ai_update: f64,
    last_move_update: f64,
    last_coarse_update: f64,
}

/// Budget bookkeeping for the frame being processed.
struct FrameWork {
    now: f64,
    frame: u64,
    dt: f32,
    budget_ms: f32,
    spent: Duration,
    stats: LodStats,
    visual_only: bool,
    ultra_light: bool,
}

impl FrameWork {
    /// Close the frame: record AI time, overrun frames and raycast usage.
    fn finish(mut self, budget: &RaycastBudget) -> LodStats {
        self.stats.ai_time_ms = self.spent.as_secs_f32() * 1000.0;
        if self.visual_only {
            self.stats.visual_only_frames += 1;
            warn!(frame = self.frame, spent_ms = self.stats.ai_time_ms, "AI budget exceeded");
        }
        if self.ultra_light {
            self.stats.ultra_light_frames += 1;
        }
        self.stats.los_raycasts = budget.los_used;
        self.stats.los_refused = budget.los_refused;
        self.stats.fire_raycasts = budget.fire_used;
        self.stats.fire_refused = budget.fire_refused;
        self.stats
    }
}

/// Decides who gets simulated, and how much, each frame.
pub struct LodScheduler {
    pre_phase: Schedule,
    ema_dt: f32,
    interval_scale: f32,
    stats: LodStats,
}

impl LodScheduler {
    pub fn new(config: &SimConfig) -> Self {
        let mut pre_phase = Schedule::default();
        pre_phase.add_systems(
            (
                death_animation_system,
                remove_finished_system,
                lod_classification_system,
            )
                .chain(),
        );
        Self {
            pre_phase,
            ema_dt: 1.0 / config.device_tier.target_fps(),
            interval_scale: 1.0,
            stats: LodStats {
                interval_scale: 1.0,
                ..Default::default()
            },
        }
    }

    pub fn interval_scale(&self) -> f32 {
        self.interval_scale
    }

    /// Moving average of the frame time in seconds.
    pub fn ema_frame_secs(&self) -> f32 {
        self.ema_dt
    }

    /// Stats of the last processed frame.
    pub fn stats(&self) -> &LodStats {
        &self.stats
    }

    /// Fold `dt` into the frame-time average and retune the interval scale.
    pub fn record_frame(&mut self, dt: f32, target_fps: f32) {
        if dt > 0.0 {
            self.ema_dt += FRAME_EMA_ALPHA * (dt - self.ema_dt);
        }
        let fps = 1.0 / self.ema_dt.max(1e-6);
        self.interval_scale = if fps < target_fps * 0.95 {
            (target_fps / fps).min(MAX_INTERVAL_SCALE)
        } else if fps > target_fps * 1.5 {
            RELAXED_INTERVAL_SCALE
        } else {
            1.0
        };
    }

    /// Run one frame. The clock must already have been advanced.
    pub fn run_frame(&mut self, world: &mut World, rng: &mut SimRng, profiler: &mut Profiler) -> SimResult<LodStats> {
        let config = world
            .get_resource::<SimConfig>()
            .cloned()
            .ok_or(SimError::MissingResource("SimConfig"))?;
        let clock = *world
            .get_resource::<SimClock>()
            .ok_or(SimError::MissingResource("SimClock"))?;
        self.record_frame(clock.dt, config.device_tier.target_fps());

        let pre_phase = &mut self.pre_phase;
        profiler.time_section("pre_phase", || pre_phase.run(world));

        let buckets = collect_buckets(world);
        let mut work = FrameWork {
            now: clock.elapsed,
            frame: clock.frame,
            dt: clock.dt,
            budget_ms: config.ai_budget_ms / self.interval_scale,
            spent: Duration::ZERO,
            stats: LodStats {
                frame: clock.frame,
                high: buckets[0].len(),
                medium: buckets[1].len(),
                low: buckets[2].len(),
                culled: buckets[3].len(),
                removed: world.resource::<FrameEvents>().removed.len(),
                interval_scale: self.interval_scale,
                ema_frame_ms: self.ema_dt * 1000.0,
                visual_only_frames: self.stats.visual_only_frames,
                ultra_light_frames: self.stats.ultra_light_frames,
                ..Default::default()
            },
            visual_only: false,
            ultra_light: false,
        };
        work.stats.ai_budget_ms = work.budget_ms;

        let thresholds = config.lod_thresholds();
        let mut ctx = FrameContext::new(rng, RaycastBudget::from_config(&config));
        for (tier, entries) in [LodTier::High, LodTier::Medium, LodTier::Low, LodTier::Culled]
            .into_iter()
            .zip(&buckets)
        {
            let interval_scale = self.interval_scale;
            profiler.time_section(section_name(tier), || {
                process_tier(world, &mut ctx, &config, &thresholds, interval_scale, tier, entries, &mut work)
            })?;
        }

        self.stats = work.finish(&ctx.budget);
        trace!(
            frame = self.stats.frame,
            full = self.stats.full_updates,
            ai_ms = self.stats.ai_time_ms,
            "frame scheduled"
        );
        Ok(self.stats)
    }
}

fn section_name(tier: LodTier) -> &'static str {
    match tier {
        LodTier::High => "tier_high",
        LodTier::Medium => "tier_medium",
        LodTier::Low => "tier_low",
        LodTier::Culled => "tier_culled",
    }
}

/// Live agents per tier, nearest first.
fn collect_buckets(world: &mut World) -> [Vec<Scheduled>; 4] {
    let mut buckets: [Vec<Scheduled>; 4] = Default::default();
    for c in world.query::<&Combatant>().iter(world) {
        if !c.is_alive() {
            continue;
        }
        buckets[c.schedule.lod.coarseness() as usize].push(Scheduled {
            id: c.id,
            distance_sq: c.schedule.distance_sq_to_viewer,
            last_ai_update: c.schedule.last_ai_update,
            last_move_update: c.schedule.last_move_update,
            last_coarse_update: c.schedule.last_coarse_update,
        });
    }
    for bucket in &mut buckets {
        bucket.sort_by(|a, b| a.distance_sq.total_cmp(&b.distance_sq).then(a.id.cmp(&b.id)));
    }
    buckets
}

#[allow(clippy::too_many_arguments)]
fn process_tier(
    world: &mut World,
    ctx: &mut FrameContext,
    config: &SimConfig,
    thresholds: &LodThresholds,
    interval_scale: f32,
    tier: LodTier,
    entries: &[Scheduled],
    work: &mut FrameWork,
) -> SimResult<()> {
    for entry in entries {
        let slot = entry.id.stagger_slot();
        match tier {
            LodTier::High => {
                if stagger_turn(work.frame, slot, config.stagger_high) {
                    budgeted_full_update(world, ctx, entry.id, work)?;
                } else {
                    pipeline::movement_update(world, entry.id, work.now, f32::MAX)?;
                    work.stats.movement_updates += 1;
                }
            }
            LodTier::Medium => {
                let interval = dynamic_interval(
                    entry.distance_sq,
                    thresholds.high,
                    thresholds.medium,
                    MEDIUM_INTERVAL_MS,
                    thresholds.interval_factor,
                    interval_scale,
                );
                if work.now - entry.last_ai_update >= interval
                    && stagger_turn(work.frame, slot, config.stagger_medium)
                {
                    budgeted_full_update(world, ctx, entry.id, work)?;
                }
            }
            LodTier::Low => {
                let interval = dynamic_interval(
                    entry.distance_sq,
                    thresholds.medium,
                    thresholds.low,
                    LOW_INTERVAL_MS,
                    thresholds.interval_factor,
                    interval_scale,
                );
                if work.now - entry.last_move_update >= interval {
                    pipeline::movement_update(world, entry.id, work.now, LOW_TIER_MAX_DT)?;
                    work.stats.movement_updates += 1;
                }
            }
            LodTier::Culled => {
                if entry.distance_sq <= thresholds.culled_near_sq() {
                    let interval = CULLED_MOVE_INTERVAL * interval_scale;
                    if work.now - entry.last_move_update >= f64::from(interval) {
                        pipeline::movement_update(world, entry.id, work.now, interval)?;
                        work.stats.movement_updates += 1;
                    }
                } else if work.now - entry.last_coarse_update >= f64::from(config.coarse_interval_secs) {
                    pipeline::coarse_update(world, ctx, entry.id, work.now)?;
                    work.stats.coarse_updates += 1;
                }
            }
        }
    }
    Ok(())
}

/// Full update while the frame is within budget, visual-only movement once
/// it is over, render orientation only once it is twice over. Every branch
/// is charged to `work.spent`.
fn budgeted_full_update(
    world: &mut World,
    ctx: &mut FrameContext,
    id: CombatantId,
    work: &mut FrameWork,
) -> SimResult<()> {
    let spent_ms = work.spent.as_secs_f32() * 1000.0;
    let start = Instant::now();
    let result = if spent_ms > work.budget_ms * 2.0 {
        pipeline::ultra_light_update(world, id, work.dt);
        work.ultra_light = true;
        work.stats.ultra_light_updates += 1;
        Ok(())
    } else if spent_ms > work.budget_ms {
        work.visual_only = true;
        work.stats.visual_only_updates += 1;
        pipeline::movement_update(world, id, work.now, LOW_TIER_MAX_DT)
    } else {
        work.stats.full_updates += 1;
        pipeline::full_update(world, ctx, id, work.now)
    };
    work.spent += start.elapsed();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use rand::SeedableRng;

    fn thresholds() -> LodThresholds {
        SimConfig::default().lod_thresholds()
    }

    #[test]
    fn test_classification_is_monotone() {
        let t = thresholds();
        let half_extent = 500.0;
        assert!(t.low < half_extent);

        let samples = [
            t.high * 0.5,
            (t.high + t.medium) * 0.5,
            (t.medium + t.low) * 0.5,
            (t.low + half_extent) * 0.5,
        ];
        let tiers: Vec<LodTier> = samples
            .iter()
            .map(|&d| classify(Vec3::new(d, 0.0, 0.0), Vec3::ZERO, &t, half_extent).tier)
            .collect();
        assert_eq!(tiers, vec![LodTier::High, LodTier::Medium, LodTier::Low, LodTier::Culled]);

        let mut last = 0;
        for d in (0..500).step_by(5) {
            let class = classify(Vec3::new(d as f32, 0.0, 0.0), Vec3::ZERO, &t, half_extent);
            assert!(class.nudged.is_none());
            assert!(class.tier.coarseness() >= last, "tier went back at {d}");
            last = class.tier.coarseness();
        }
        assert_eq!(last, LodTier::Culled.coarseness());
    }

    #[test]
    fn test_out_of_bounds_is_culled_and_pulled_in() {
        let t = thresholds();
        let class = classify(Vec3::new(520.0, 0.0, 10.0), Vec3::new(510.0, 0.0, 10.0), &t, 500.0);
        assert_eq!(class.tier, LodTier::Culled);
        let nudged = class.nudged.unwrap();
        assert!((nudged.x - 494.0).abs() < 1e-3);
        assert!((nudged.z - 9.5).abs() < 1e-4);
    }

    #[test]
    fn test_dynamic_interval_eases_quadratically() {
        let near = dynamic_interval(100.0 * 100.0, 100.0, 200.0, MEDIUM_INTERVAL_MS, 1.0, 1.0);
        let mid = dynamic_interval(150.0 * 150.0, 100.0, 200.0, MEDIUM_INTERVAL_MS, 1.0, 1.0);
        let far = dynamic_interval(400.0 * 400.0, 100.0, 200.0, MEDIUM_INTERVAL_MS, 1.0, 1.0);
        assert!((near - 0.05).abs() < 1e-6);
        assert!((mid - 0.1).abs() < 1e-6);
        assert!((far - 0.25).abs() < 1e-6);

        let scaled = dynamic_interval(400.0 * 400.0, 100.0, 200.0, MEDIUM_INTERVAL_MS, 1.6, 2.0);
        assert!((scaled - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_stagger_turn() {
        let turns: Vec<bool> = (0..6).map(|frame| stagger_turn(frame, 4, 3)).collect();
        assert_eq!(turns, vec![false, true, false, false, true, false]);
        assert!(stagger_turn(7, 2, 1));
    }

    #[test]
    fn test_frame_ema_steady_at_target() {
        let mut scheduler = LodScheduler::new(&SimConfig::default());
        for _ in 0..30 {
            scheduler.record_frame(1.0 / 60.0, 60.0);
        }
        assert!((scheduler.interval_scale() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_ema_slow_frames_widen_intervals() {
        let mut scheduler = LodScheduler::new(&SimConfig::default());
        for _ in 0..30 {
            scheduler.record_frame(1.0 / 20.0, 60.0);
        }
        let scale = scheduler.interval_scale();
        assert!(scale > 1.0 && scale <= MAX_INTERVAL_SCALE, "scale {scale}");

        for _ in 0..200 {
            scheduler.record_frame(1.0 / 200.0, 60.0);
        }
        assert_eq!(scheduler.interval_scale(), RELAXED_INTERVAL_SCALE);
    }

    #[test]
    fn test_death_animation_then_removal() {
        let mut world = testing::world();
        let id = testing::spawn(&mut world, Faction::Red, Vec3::new(3.0, 0.0, 3.0));
        testing::combatant_mut(&mut world, id).begin_dying();

        let mut schedule = Schedule::default();
        schedule.add_systems((death_animation_system, remove_finished_system).chain());

        world.resource_mut::<SimClock>().dt = 1.0;
        for _ in 0..5 {
            schedule.run(&mut world);
        }
        assert!(testing::combatant(&world, id).is_dying());

        schedule.run(&mut world);
        assert!(world.get::<Combatant>(id.entity()).is_none());
        assert!(!world.resource::<SpatialIndex>().contains(id));
        assert_eq!(world.resource::<FrameEvents>().removed, vec![id]);

        schedule.run(&mut world);
        assert_eq!(world.resource::<FrameEvents>().removed.len(), 1);
    }

    #[test]
    fn test_classification_system_buckets_by_viewer_distance() {
        let mut world = testing::world();
        let near = testing::spawn(&mut world, Faction::Blue, Vec3::new(10.0, 0.0, 0.0));
        let mid = testing::spawn(&mut world, Faction::Blue, Vec3::new(200.0, 0.0, 0.0));
        let far = testing::spawn(&mut world, Faction::Blue, Vec3::new(-490.0, 0.0, -490.0));

        let mut schedule = Schedule::default();
        schedule.add_systems(lod_classification_system);
        schedule.run(&mut world);

        assert_eq!(testing::combatant(&world, near).schedule.lod, LodTier::High);
        assert_eq!(testing::combatant(&world, mid).schedule.lod, LodTier::Medium);
        assert_eq!(testing::combatant(&world, far).schedule.lod, LodTier::Culled);
    }

    #[test]
    fn test_zero_budget_degrades_and_counts_frames() {
        let mut world = testing::world();
        world.resource_mut::<SimConfig>().ai_budget_ms = 0.0;
        for i in 0..12 {
            testing::spawn(&mut world, Faction::Blue, Vec3::new(i as f32 * 3.0, 0.0, 0.0));
        }
        {
            let mut clock = world.resource_mut::<SimClock>();
            clock.advance(1.0 / 60.0);
        }

        let config = world.resource::<SimConfig>().clone();
        let mut scheduler = LodScheduler::new(&config);
        let mut rng = SimRng::seed_from_u64(11);
        let mut profiler = Profiler::new();
        let stats = scheduler.run_frame(&mut world, &mut rng, &mut profiler).unwrap();

        assert_eq!(stats.high, 12);
        assert!(stats.full_updates >= 1);
        assert!(stats.ultra_light_updates > 0);
        assert_eq!(stats.ultra_light_frames, 1);
        assert!(profiler.get_section("tier_high").is_some());
    }

    fn frame_work(world: &World, budget_ms: f32, spent: Duration) -> FrameWork {
        let clock = *world.resource::<SimClock>();
        FrameWork {
            now: clock.elapsed,
            frame: clock.frame,
            dt: clock.dt,
            budget_ms,
            spent,
            stats: LodStats::default(),
            visual_only: false,
            ultra_light: false,
        }
    }

    fn crowd(world: &mut World, count: usize) -> Vec<CombatantId> {
        let ids = (0..count)
            .map(|i| {
                let at = Vec3::new((i % 20) as f32 * 3.0, 0.0, (i / 20) as f32 * 3.0);
                testing::spawn(world, Faction::Blue, at)
            })
            .collect();
        world.resource_mut::<SimClock>().advance(1.0 / 60.0);
        ids
    }

    #[test]
    fn test_moderate_overrun_runs_visual_only_updates() {
        let mut world = testing::world();
        let ids = crowd(&mut world, 12);
        let config = world.resource::<SimConfig>().clone();
        let mut rng = SimRng::seed_from_u64(5);
        let mut ctx = FrameContext::new(&mut rng, RaycastBudget::from_config(&config));

        // One second of budget, already 1.1s spent: over, but nowhere near twice over.
        let mut work = frame_work(&world, 1000.0, Duration::from_millis(1100));
        let now = work.now;
        for &id in &ids {
            budgeted_full_update(&mut world, &mut ctx, id, &mut work).unwrap();
        }

        assert_eq!(work.stats.visual_only_updates, ids.len());
        assert_eq!(work.stats.full_updates, 0);
        assert_eq!(work.stats.ultra_light_updates, 0);
        for &id in &ids {
            let c = testing::combatant(&world, id);
            assert_eq!(c.schedule.last_move_update, now);
            assert_eq!(c.schedule.last_ai_update, 0.0);
        }

        let stats = work.finish(&ctx.budget);
        assert_eq!(stats.visual_only_frames, 1);
        assert_eq!(stats.ultra_light_frames, 0);
        assert!(stats.ai_time_ms >= 1100.0);

        // The count carries into later frame reports.
        let mut scheduler = LodScheduler::new(&config);
        scheduler.stats = stats;
        let mut profiler = Profiler::new();
        let next = scheduler.run_frame(&mut world, &mut rng, &mut profiler).unwrap();
        assert!(next.visual_only_frames >= 1);
        assert_eq!(scheduler.stats().visual_only_frames, next.visual_only_frames);
    }

    #[test]
    fn test_overrun_escalates_to_ultra_light() {
        let mut world = testing::world();
        let ids = crowd(&mut world, 300);
        let config = world.resource::<SimConfig>().clone();
        let mut rng = SimRng::seed_from_u64(6);
        let mut ctx = FrameContext::new(&mut rng, RaycastBudget::from_config(&config));

        // Start the frame at 1.5x a one microsecond budget.
        let mut work = frame_work(&world, 0.001, Duration::from_nanos(1500));
        for &id in &ids {
            budgeted_full_update(&mut world, &mut ctx, id, &mut work).unwrap();
        }

        assert_eq!(work.stats.full_updates, 0);
        assert!(work.stats.visual_only_updates > 0);
        assert!(work.stats.ultra_light_updates > 0);
        assert_eq!(work.stats.visual_only_updates + work.stats.ultra_light_updates, ids.len());
        assert!(work.spent > Duration::from_nanos(2000));

        let stats = work.finish(&ctx.budget);
        assert_eq!(stats.visual_only_frames, 1);
        assert_eq!(stats.ultra_light_frames, 1);
    }
}
