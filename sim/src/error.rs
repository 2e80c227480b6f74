//! Error types for the simulation core.
//!
//! Only programmer-error preconditions and stale ids surface as errors.
//! Gameplay outcomes such as "no target" or "no cover" are `Option`s.

use crate::components::CombatantId;
use crate::systems::squad::SquadId;
use thiserror::Error;

/// Simulation error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// The spatial index was queried before `initialize` was called.
    #[error("spatial index queried before it was built")]
    IndexNotBuilt,
    /// A combatant id that is not (or no longer) in the world.
    #[error("unknown combatant: {0}")]
    UnknownCombatant(CombatantId),
    /// A squad id that is not in the squad table.
    #[error("unknown squad: {0:?}")]
    UnknownSquad(SquadId),
    /// A required simulation resource is missing from the ECS world.
    #[error("missing simulation resource: {0}")]
    MissingResource(&'static str),
    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Snapshot serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
