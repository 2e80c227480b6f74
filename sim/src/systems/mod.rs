//! Simulation systems for the combatant core.
//!
//! Systems contain the logic that operates on `Combatant` components.
//!
//! ## Frame Order
//!
//! **Pre-phase** (bevy schedule, `lod`):
//! - `death_animation_system` - Advances dying bodies
//! - `remove_finished_system` - Removes finished bodies from world, squads and index
//! - `lod_classification_system` - Buckets live agents by distance to the viewer
//!
//! **Tier processing** (exclusive, `lod` + `pipeline`), High → Medium → Low → Culled:
//! - `pipeline::full_update` - `ai` → `movement` → `combat` → reindex → effects
//! - `pipeline::movement_update` - Movement, rotation and reindex only
//! - `pipeline::ultra_light_update` - Render orientation only
//! - `pipeline::coarse_update` - Far agents walk toward objectives
//!
//! **Support modules** used from the AI:
//! - `perception` - Visibility, engagement rolls, reaction delays
//! - `cover` - Cover search
//! - `squad` - Squads, commands, maneuvers, zone defense
//! - `suppression` - Suppression and panic decay

pub mod ai;
pub mod combat;
pub mod cover;
pub mod lod;
pub mod movement;
pub mod perception;
pub mod pipeline;
pub mod serialization;
pub mod squad;
pub mod suppression;

pub use combat::{DamageOutcome, PlayerShotResult, WeaponProfile};
pub use lod::{FrameReport, LodScheduler, LodStats};
pub use squad::{Squad, SquadCommand, SquadId, Squads};
