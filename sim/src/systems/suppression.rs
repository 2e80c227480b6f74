//! Suppression and panic decay, plus incoming-fire pressure on near misses.

use crate::components::*;

/// Rate at which suppression decays per second.
pub const SUPPRESSION_DECAY_RATE: f32 = 0.15;
/// Rate at which panic decays per second.
pub const PANIC_DECAY_RATE: f32 = 0.1;
/// Suppression added by a round passing within the near-miss radius.
pub const NEAR_MISS_SUPPRESSION: f32 = 0.12;
/// Panic added by a near miss.
pub const NEAR_MISS_PANIC: f32 = 0.05;
/// Suppression added by taking a hit.
pub const HIT_SUPPRESSION: f32 = 0.2;

/// Decay suppression and panic over `dt` seconds.
pub fn decay(memory: &mut TacticalMemory, dt: f32) {
    memory.suppression = (memory.suppression - SUPPRESSION_DECAY_RATE * dt).max(0.0);
    memory.panic = (memory.panic - PANIC_DECAY_RATE * dt).max(0.0);
}

/// Register a near miss on an agent.
pub fn near_miss(memory: &mut TacticalMemory) {
    memory.add_suppression(NEAR_MISS_SUPPRESSION);
    memory.add_panic(NEAR_MISS_PANIC);
    memory.near_miss_count = memory.near_miss_count.saturating_add(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_decays() {
        let mut memory = TacticalMemory {
            suppression: 1.0,
            panic: 0.5,
            ..Default::default()
        };
        decay(&mut memory, 1.0);
        assert!((memory.suppression - (1.0 - SUPPRESSION_DECAY_RATE)).abs() < 0.001);
        assert!((memory.panic - 0.4).abs() < 0.001);

        decay(&mut memory, 100.0);
        assert_eq!(memory.suppression, 0.0);
        assert_eq!(memory.panic, 0.0);
    }

    #[test]
    fn test_near_miss_accumulates_and_clamps() {
        let mut memory = TacticalMemory::default();
        for _ in 0..20 {
            near_miss(&mut memory);
        }
        assert_eq!(memory.suppression, 1.0);
        assert_eq!(memory.panic, 1.0);
        assert_eq!(memory.near_miss_count, 20);
    }
}
