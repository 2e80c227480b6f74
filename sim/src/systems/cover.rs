//! Cover search.
//!
//! Candidates come from three sources, each verified to actually hide the
//! agent from the threat before it is scored:
//!
//! 1. sandbag volumes, with the spot placed 2m beyond the volume away from the threat;
//! 2. rough ground, proxied by local terrain-height variance on an 8m grid;
//! 3. raised ground on two rings around the agent.
//!
//! Without terrain only sandbags are considered; without a cover provider there
//! are no sandbags.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::geometry::horizontal;
use crate::terrain::Battlefield;

/// Maximum search radius around the agent.
pub const COVER_SEARCH_RADIUS: f32 = 30.0;
/// Offset of a sandbag spot beyond the volume.
const SANDBAG_STANDOFF: f32 = 2.0;
const VEGETATION_STEP: f32 = 8.0;
const VEGETATION_HALF_CELLS: i32 = 2;
/// Sample spacing used for the local height variance.
const VARIANCE_SAMPLE: f32 = 2.0;
const VARIANCE_THRESHOLD: f32 = 0.35;
const TERRAIN_RINGS: [f32; 2] = [10.0, 20.0];
const TERRAIN_BEARINGS: usize = 8;
const MIN_HEIGHT_ADVANTAGE: f32 = 1.5;
/// Height of a crouched agent's head above the ground.
const CROUCH_HEIGHT: f32 = 1.0;
const THREAT_EYE_HEIGHT: f32 = 1.6;
/// Spots closer than this to the threat are rejected.
const MIN_THREAT_DISTANCE: f32 = 6.0;

/// Where a cover spot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverSource {
    Sandbag,
    Vegetation,
    Terrain,
}

/// A verified cover position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverSpot {
    pub position: Vec3,
    pub source: CoverSource,
    pub score: f32,
}

/// Best verified cover within 30m of `agent`, hiding it from `threat`.
pub fn find_nearest_cover(battlefield: &Battlefield, agent: Vec3, threat: Vec3) -> Option<CoverSpot> {
    let threat_eye = threat + Vec3::Y * THREAT_EYE_HEIGHT;
    let mut best: Option<CoverSpot> = None;
    let mut consider = |spot: CoverSpot| {
        if best.map_or(true, |b| spot.score > b.score) {
            best = Some(spot);
        }
    };

    for spot in sandbag_candidates(battlefield, agent, threat, threat_eye) {
        consider(spot);
    }
    if battlefield.terrain.is_some() {
        for spot in vegetation_candidates(battlefield, agent, threat, threat_eye) {
            consider(spot);
        }
        for spot in terrain_candidates(battlefield, agent, threat, threat_eye) {
            consider(spot);
        }
    }
    best
}

/// Shared part of the score: closer is better, off the threat line is better.
fn base_score(agent: Vec3, threat: Vec3, candidate: Vec3) -> Option<(f32, f32)> {
    let distance = horizontal(candidate - agent).length();
    if distance > COVER_SEARCH_RADIUS {
        return None;
    }
    let to_candidate = horizontal(candidate - threat);
    if to_candidate.length() < MIN_THREAT_DISTANCE {
        return None;
    }
    let to_agent = horizontal(agent - threat).normalize_or_zero();
    let flank = 0.5 * (1.0 - to_candidate.normalize_or_zero().dot(to_agent));
    Some((10.0 / (1.0 + distance), flank))
}

fn sandbag_candidates(
    battlefield: &Battlefield,
    agent: Vec3,
    threat: Vec3,
    threat_eye: Vec3,
) -> Vec<CoverSpot> {
    let mut spots = Vec::new();
    for volume in &battlefield.cover_volumes {
        let center = volume.center();
        let away = horizontal(center - threat).normalize_or_zero();
        if away == Vec3::ZERO {
            continue;
        }
        let half = volume.half_extents();
        let reach = (away.x * half.x).abs() + (away.z * half.z).abs();
        let mut position = center + away * (reach + SANDBAG_STANDOFF);
        position.y = battlefield.height_at(position.x, position.z).unwrap_or(volume.min.y);

        if !battlefield.volume_blocks(threat_eye, position + Vec3::Y * CROUCH_HEIGHT) {
            continue;
        }
        let Some((proximity, flank)) = base_score(agent, threat, position) else {
            continue;
        };
        let nearby_bonus = if horizontal(position - agent).length() < 10.0 { 1.0 } else { 0.0 };
        spots.push(CoverSpot {
            position,
            source: CoverSource::Sandbag,
            score: proximity + flank + 2.0 + nearby_bonus,
        });
    }
    spots
}

fn terrain_hides(battlefield: &Battlefield, threat_eye: Vec3, spot: Vec3) -> bool {
    battlefield.terrain_blocks(threat_eye, spot + Vec3::Y * CROUCH_HEIGHT) == Some(true)
}

/// Height variance of a 5-point stencil around `(x, z)`.
fn local_variance(battlefield: &Battlefield, x: f32, z: f32) -> Option<f32> {
    let samples = [
        battlefield.height_at(x, z)?,
        battlefield.height_at(x + VARIANCE_SAMPLE, z)?,
        battlefield.height_at(x - VARIANCE_SAMPLE, z)?,
        battlefield.height_at(x, z + VARIANCE_SAMPLE)?,
        battlefield.height_at(x, z - VARIANCE_SAMPLE)?,
    ];
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    Some(samples.iter().map(|h| (h - mean).powi(2)).sum::<f32>() / samples.len() as f32)
}

fn vegetation_candidates(
    battlefield: &Battlefield,
    agent: Vec3,
    threat: Vec3,
    threat_eye: Vec3,
) -> Vec<CoverSpot> {
    let mut spots = Vec::new();
    for gz in -VEGETATION_HALF_CELLS..=VEGETATION_HALF_CELLS {
        for gx in -VEGETATION_HALF_CELLS..=VEGETATION_HALF_CELLS {
            let x = agent.x + gx as f32 * VEGETATION_STEP;
            let z = agent.z + gz as f32 * VEGETATION_STEP;
            let Some(variance) = local_variance(battlefield, x, z) else {
                continue;
            };
            if variance <= VARIANCE_THRESHOLD {
                continue;
            }
            let y = battlefield.height_at(x, z).unwrap_or(agent.y);
            let position = Vec3::new(x, y, z);
            if !terrain_hides(battlefield, threat_eye, position) {
                continue;
            }
            if let Some((proximity, flank)) = base_score(agent, threat, position) {
                spots.push(CoverSpot {
                    position,
                    source: CoverSource::Vegetation,
                    score: proximity + flank * 1.75,
                });
            }
        }
    }
    spots
}

fn terrain_candidates(
    battlefield: &Battlefield,
    agent: Vec3,
    threat: Vec3,
    threat_eye: Vec3,
) -> Vec<CoverSpot> {
    let agent_ground = battlefield.height_at(agent.x, agent.z).unwrap_or(agent.y);
    let mut spots = Vec::new();
    for ring in TERRAIN_RINGS {
        for i in 0..TERRAIN_BEARINGS {
            let angle = i as f32 * std::f32::consts::TAU / TERRAIN_BEARINGS as f32;
            let x = agent.x + angle.sin() * ring;
            let z = agent.z + angle.cos() * ring;
            let Some(y) = battlefield.height_at(x, z) else {
                continue;
            };
            let delta = y - agent_ground;
            if delta < MIN_HEIGHT_ADVANTAGE {
                continue;
            }
            let position = Vec3::new(x, y, z);
            if !terrain_hides(battlefield, threat_eye, position) {
                continue;
            }
            if let Some((proximity, flank)) = base_score(agent, threat, position) {
                spots.push(CoverSpot {
                    position,
                    source: CoverSource::Terrain,
                    score: proximity + flank + delta * 0.3,
                });
            }
        }
    }
    spots
}
