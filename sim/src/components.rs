//! ECS components for the combatant simulation.
//!
//! A combatant is one entity carrying a single [`Combatant`] component. The
//! component is plain data; decision logic lives in `systems::ai`, fire
//! resolution in `systems::combat`, and scheduling in `systems::lod`.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::systems::squad::SquadId;
use crate::terrain::ZoneId;

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable identifier for a combatant (its entity for its whole lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombatantId(pub Entity);

impl CombatantId {
    #[inline]
    pub fn entity(&self) -> Entity {
        self.0
    }

    /// Stable small integer used to spread work over frames.
    #[inline]
    pub fn stagger_slot(&self) -> u64 {
        u64::from(self.0.index())
    }

    /// Packed bits for serialization.
    #[inline]
    pub fn to_bits(&self) -> u64 {
        self.0.to_bits()
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

/// Faction/side identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Faction {
    #[default]
    Blue,
    Red,
}

impl Faction {
    pub fn opponent(&self) -> Self {
        match self {
            Faction::Blue => Faction::Red,
            Faction::Red => Faction::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Faction::Blue => "Blue",
            Faction::Red => "Red",
        }
    }
}

/// Weak reference to whatever an agent is fighting.
/// Resolved against the world every tick; never an owned pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Combatant(CombatantId),
    Player,
}

// ============================================================================
// VITALS
// ============================================================================

/// Hit points of a combatant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            (self.current / self.max).clamp(0.0, 1.0)
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    pub fn damage(&mut self, amount: f32) {
        self.current = (self.current - amount.max(0.0)).max(0.0);
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new(100.0)
    }
}

/// Seconds spent falling before the body hits the ground.
pub const DEATH_FALL_SECS: f32 = 0.7;
/// Seconds the body stays on the ground.
pub const DEATH_GROUND_SECS: f32 = 4.0;
/// Seconds spent fading out.
pub const DEATH_FADE_SECS: f32 = 1.0;
/// Total death animation length.
pub const DEATH_TOTAL_SECS: f32 = DEATH_FALL_SECS + DEATH_GROUND_SECS + DEATH_FADE_SECS;

/// Alive/dying/dead lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Lifecycle {
    #[default]
    Alive,
    /// Playing the death animation; `elapsed` seconds in.
    Dying { elapsed: f32 },
    /// Animation finished; awaiting removal this frame.
    Dead,
}

/// Visible phase of the death animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathPhase {
    Falling,
    Grounded,
    Fading,
    Done,
}

impl DeathPhase {
    pub fn at(elapsed: f32) -> Self {
        if elapsed < DEATH_FALL_SECS {
            DeathPhase::Falling
        } else if elapsed < DEATH_FALL_SECS + DEATH_GROUND_SECS {
            DeathPhase::Grounded
        } else if elapsed < DEATH_TOTAL_SECS {
            DeathPhase::Fading
        } else {
            DeathPhase::Done
        }
    }
}

// ============================================================================
// AI STATE
// ============================================================================

/// Finite AI state. `Dead` is terminal and only set by the combat resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CombatantState {
    #[default]
    Patrolling,
    Alert,
    Engaging,
    Suppressing,
    Advancing,
    SeekingCover,
    Defending,
    Dead,
}

impl CombatantState {
    /// States that require a live target reference.
    #[inline]
    pub fn carries_target(&self) -> bool {
        matches!(self, CombatantState::Alert | CombatantState::Engaging)
    }

    /// Non-combat states an agent returns to after a fight.
    #[inline]
    pub fn is_rest(&self) -> bool {
        matches!(self, CombatantState::Patrolling | CombatantState::Defending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CombatantState::Patrolling => "Patrolling",
            CombatantState::Alert => "Alert",
            CombatantState::Engaging => "Engaging",
            CombatantState::Suppressing => "Suppressing",
            CombatantState::Advancing => "Advancing",
            CombatantState::SeekingCover => "SeekingCover",
            CombatantState::Defending => "Defending",
            CombatantState::Dead => "Dead",
        }
    }
}

/// Squad role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SquadRole {
    Leader,
    #[default]
    Follower,
}

/// Per-agent behavioural tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BehaviorProfile {
    /// Base reaction delay in seconds (range penalty is added on top).
    pub reaction_delay: f32,
    /// Shots per burst.
    pub burst_length: u32,
    /// Pause between bursts in seconds.
    pub burst_pause: f32,
    /// Seconds between shots inside a burst.
    pub fire_interval: f32,
    /// Full field of view in degrees.
    pub field_of_view_deg: f32,
    /// Base aim jitter in radians.
    pub aim_jitter: f32,
    /// Maximum detection range in metres.
    pub visual_range: f32,
    /// Objective-focused agents ignore distant enemies unless shot at.
    pub objective_focused: bool,
    /// Seconds of blind fire after losing sight of a target.
    pub suppression_duration: f32,
    /// Walking speed (m/s).
    pub move_speed: f32,
    /// Running speed (m/s).
    pub sprint_speed: f32,
}

impl BehaviorProfile {
    pub fn rifleman() -> Self {
        Self {
            reaction_delay: 0.45,
            burst_length: 3,
            burst_pause: 0.9,
            fire_interval: 0.12,
            field_of_view_deg: 130.0,
            aim_jitter: 0.025,
            visual_range: 120.0,
            objective_focused: false,
            suppression_duration: 3.0,
            move_speed: 2.8,
            sprint_speed: 5.5,
        }
    }

    pub fn squad_leader() -> Self {
        Self {
            reaction_delay: 0.35,
            burst_length: 4,
            field_of_view_deg: 150.0,
            aim_jitter: 0.02,
            visual_range: 140.0,
            ..Self::rifleman()
        }
    }

    /// Pushes toward objectives; fights only when pressed.
    pub fn assault() -> Self {
        Self {
            reaction_delay: 0.5,
            burst_length: 5,
            burst_pause: 0.7,
            aim_jitter: 0.035,
            objective_focused: true,
            sprint_speed: 6.0,
            ..Self::rifleman()
        }
    }

    /// Half-angle of the field of view in radians.
    #[inline]
    pub fn half_fov(&self) -> f32 {
        (self.field_of_view_deg * 0.5).to_radians()
    }
}

impl Default for BehaviorProfile {
    fn default() -> Self {
        Self::rifleman()
    }
}

/// Zone perimeter slot an agent has been told to hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefenseAssignment {
    pub zone: ZoneId,
    pub slot: usize,
    pub position: Vec3,
}

/// Short-term tactical memory.
#[derive(Debug, Clone, Default)]
pub struct TacticalMemory {
    /// Incoming-fire pressure in `[0, 1]`.
    pub suppression: f32,
    /// Panic in `[0, 1]`.
    pub panic: f32,
    pub near_miss_count: u32,
    pub last_known_target: Option<Vec3>,
    pub cover_position: Option<Vec3>,
    pub defense: Option<DefenseAssignment>,
    /// Simulation time of the last hit taken.
    pub last_hit_time: Option<f64>,
    pub last_attacker: Option<TargetRef>,
    /// Disoriented until this simulation time.
    pub flash_until: f64,
    /// Last terrain line-of-sight result, reused when the raycast cap is hit.
    pub los_cache: Option<bool>,
}

impl TacticalMemory {
    pub fn add_suppression(&mut self, amount: f32) {
        self.suppression = (self.suppression + amount).clamp(0.0, 1.0);
    }

    pub fn add_panic(&mut self, amount: f32) {
        self.panic = (self.panic + amount).clamp(0.0, 1.0);
    }

    /// Seconds since the last hit, if any.
    pub fn since_hit(&self, now: f64) -> Option<f32> {
        self.last_hit_time.map(|t| (now - t).max(0.0) as f32)
    }

    pub fn is_flashed(&self, now: f64) -> bool {
        now < self.flash_until
    }
}

/// Burst and posture state used by the fire logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct FireState {
    pub shots_in_burst: u32,
    pub burst_cooldown: f32,
    pub fire_cooldown: f32,
    pub is_full_auto: bool,
    pub in_cover: bool,
}

/// Countdown timers (seconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct AiTimers {
    /// Remaining reaction time while Alert.
    pub reaction: f32,
    /// Remaining blind-fire time while Suppressing.
    pub alert: f32,
    /// Time left to reach cover before giving up.
    pub cover_timeout: f32,
    /// Time left to finish a flanking move.
    pub advance_timeout: f32,
}

// ============================================================================
// LOD / SCHEDULING
// ============================================================================

/// Simulation level-of-detail tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LodTier {
    /// Full AI, staggered across frames.
    #[default]
    High,
    /// Full AI at a distance-dependent interval.
    Medium,
    /// Movement only at a distance-dependent interval.
    Low,
    /// Coarse or no simulation.
    Culled,
}

impl LodTier {
    /// Ordering from finest (0) to coarsest (3).
    pub fn coarseness(&self) -> u8 {
        match self {
            LodTier::High => 0,
            LodTier::Medium => 1,
            LodTier::Low => 2,
            LodTier::Culled => 3,
        }
    }

    /// Whether the terrain raycast part of visibility is evaluated.
    pub fn allows_terrain_los(&self) -> bool {
        matches!(self, LodTier::High | LodTier::Medium)
    }
}

/// Scheduler bookkeeping stored on each combatant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleMeta {
    pub last_ai_update: f64,
    pub last_move_update: f64,
    pub last_coarse_update: f64,
    pub distance_sq_to_viewer: f32,
    pub lod: LodTier,
    /// Earliest time the zone-defense assignment is re-evaluated.
    pub next_defense_check: f64,
}

// ============================================================================
// COMBATANT
// ============================================================================

/// Eye height above the feet position.
pub const EYE_HEIGHT: f32 = 1.6;
/// Muzzle height above the feet position.
pub const MUZZLE_HEIGHT: f32 = 1.5;
/// Centre-of-mass height used as the default aim point.
pub const CENTER_MASS_HEIGHT: f32 = 1.2;

/// One simulated agent.
#[derive(Component, Debug, Clone)]
pub struct Combatant {
    pub id: CombatantId,
    pub faction: Faction,

    pub position: Vec3,
    pub velocity: Vec3,
    pub facing: f32,
    pub visual_facing: f32,

    pub health: Health,
    pub lifecycle: Lifecycle,

    pub state: CombatantState,
    /// Non-combat state to return to once a fight ends.
    pub rest_state: CombatantState,
    pub target: Option<TargetRef>,
    /// Target to resume once cover is reached.
    pub resume_target: Option<TargetRef>,
    pub timers: AiTimers,
    pub profile: BehaviorProfile,
    pub fire: FireState,
    pub memory: TacticalMemory,

    pub squad: Option<SquadId>,
    pub role: SquadRole,

    pub destination: Option<Vec3>,
    /// Intermediate point visited before `destination` (cover on a flank route).
    pub waypoint: Option<Vec3>,

    pub schedule: ScheduleMeta,
}

impl Combatant {
    pub fn new(id: CombatantId, faction: Faction, position: Vec3, profile: BehaviorProfile, now: f64) -> Self {
        Self {
            id,
            faction,
            position,
            velocity: Vec3::ZERO,
            facing: 0.0,
            visual_facing: 0.0,
            health: Health::default(),
            lifecycle: Lifecycle::Alive,
            state: CombatantState::Patrolling,
            rest_state: CombatantState::Patrolling,
            target: None,
            resume_target: None,
            timers: AiTimers::default(),
            profile,
            fire: FireState::default(),
            memory: TacticalMemory::default(),
            squad: None,
            role: SquadRole::Follower,
            destination: None,
            waypoint: None,
            schedule: ScheduleMeta {
                last_ai_update: now,
                last_move_update: now,
                last_coarse_update: now,
                ..Default::default()
            },
        }
    }

    /// Alive and not playing a death animation.
    #[inline]
    pub fn is_alive(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Alive)
    }

    #[inline]
    pub fn is_dying(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Dying { .. })
    }

    /// Death animation progress in `[0, 1]` (0 while alive).
    pub fn death_progress(&self) -> f32 {
        match self.lifecycle {
            Lifecycle::Alive => 0.0,
            Lifecycle::Dying { elapsed } => (elapsed / DEATH_TOTAL_SECS).clamp(0.0, 1.0),
            Lifecycle::Dead => 1.0,
        }
    }

    #[inline]
    pub fn eye_position(&self) -> Vec3 {
        self.position + Vec3::Y * EYE_HEIGHT
    }

    #[inline]
    pub fn muzzle_position(&self) -> Vec3 {
        self.position + Vec3::Y * MUZZLE_HEIGHT
    }

    #[inline]
    pub fn center_mass(&self) -> Vec3 {
        self.position + Vec3::Y * CENTER_MASS_HEIGHT
    }

    /// Single entry point for state changes.
    ///
    /// `target` is kept only for states that carry one; a target-carrying state
    /// without a target falls back to the rest state.
    pub fn transition(&mut self, state: CombatantState, target: Option<TargetRef>) {
        let (state, target) = match (state.carries_target(), target) {
            (true, Some(t)) => (state, Some(t)),
            (true, None) => (self.rest_state, None),
            (false, _) => (state, None),
        };

        if state.is_rest() {
            self.rest_state = state;
        }
        if state != CombatantState::SeekingCover {
            self.resume_target = None;
        }
        if !matches!(state, CombatantState::Engaging | CombatantState::SeekingCover) {
            self.fire.in_cover = false;
        }
        if state != CombatantState::Suppressing {
            self.fire.is_full_auto = false;
        }
        if self.state != state {
            debug!(
                combatant = %self.id,
                from = self.state.as_str(),
                to = state.as_str(),
                "state transition"
            );
        }
        self.state = state;
        self.target = target;
    }

    /// Return to the remembered non-combat state.
    pub fn return_to_rest(&mut self) {
        let rest = self.rest_state;
        self.destination = None;
        self.waypoint = None;
        self.transition(rest, None);
    }

    /// Begin the death animation.
    pub fn begin_dying(&mut self) {
        self.lifecycle = Lifecycle::Dying { elapsed: 0.0 };
        self.velocity = Vec3::ZERO;
        self.destination = None;
        self.waypoint = None;
        self.memory.defense = None;
        self.transition(CombatantState::Dead, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combatant() -> Combatant {
        Combatant::new(
            CombatantId(Entity::from_raw(7)),
            Faction::Blue,
            Vec3::ZERO,
            BehaviorProfile::rifleman(),
            0.0,
        )
    }

    #[test]
    fn test_transition_keeps_target_only_for_target_states() {
        let mut c = combatant();
        let enemy = TargetRef::Combatant(CombatantId(Entity::from_raw(9)));

        c.transition(CombatantState::Alert, Some(enemy));
        assert_eq!(c.state, CombatantState::Alert);
        assert_eq!(c.target, Some(enemy));

        c.transition(CombatantState::Suppressing, Some(enemy));
        assert_eq!(c.state, CombatantState::Suppressing);
        assert!(c.target.is_none());
    }

    #[test]
    fn test_target_state_without_target_falls_back_to_rest() {
        let mut c = combatant();
        c.transition(CombatantState::Defending, None);
        c.transition(CombatantState::Engaging, None);
        assert_eq!(c.state, CombatantState::Defending);
        assert!(c.target.is_none());
    }

    #[test]
    fn test_return_to_rest_remembers_defending() {
        let mut c = combatant();
        c.transition(CombatantState::Defending, None);
        c.transition(CombatantState::Alert, Some(TargetRef::Player));
        c.return_to_rest();
        assert_eq!(c.state, CombatantState::Defending);
    }

    #[test]
    fn test_death_progress_and_phases() {
        let mut c = combatant();
        assert_eq!(c.death_progress(), 0.0);
        c.begin_dying();
        assert!(c.is_dying());
        assert_eq!(c.state, CombatantState::Dead);
        assert_eq!(c.death_progress(), 0.0);

        assert_eq!(DeathPhase::at(0.1), DeathPhase::Falling);
        assert_eq!(DeathPhase::at(2.0), DeathPhase::Grounded);
        assert_eq!(DeathPhase::at(DEATH_TOTAL_SECS - 0.1), DeathPhase::Fading);
        assert_eq!(DeathPhase::at(DEATH_TOTAL_SECS), DeathPhase::Done);
    }

    #[test]
    fn test_memory_clamps() {
        let mut m = TacticalMemory::default();
        m.add_suppression(3.0);
        m.add_panic(-1.0);
        assert_eq!(m.suppression, 1.0);
        assert_eq!(m.panic, 0.0);
    }

    #[test]
    fn test_lod_coarseness_order() {
        assert!(LodTier::High.coarseness() < LodTier::Medium.coarseness());
        assert!(LodTier::Medium.coarseness() < LodTier::Low.coarseness());
        assert!(LodTier::Low.coarseness() < LodTier::Culled.coarseness());
    }
}
