//! Property tests: octree queries agree with a brute-force scan.

use bevy_ecs::world::World;
use glam::Vec3;
use proptest::prelude::*;
use skirmish_sim::{CombatantId, SpatialIndex, SpatialQuery};

fn coord() -> impl Strategy<Value = f32> {
    -100.0f32..100.0
}

fn point() -> impl Strategy<Value = Vec3> {
    (coord(), -5.0f32..5.0, coord()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn populate(points: &[Vec3]) -> (SpatialIndex, Vec<(CombatantId, Vec3)>) {
    let mut world = World::new();
    let mut index = SpatialIndex::with_half_extent(100.0);
    let entries: Vec<(CombatantId, Vec3)> = points
        .iter()
        .map(|&p| (CombatantId(world.spawn_empty().id()), p))
        .collect();
    for &(id, p) in &entries {
        index.insert(id, p).unwrap();
    }
    (index, entries)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn radius_query_matches_brute_force(
        points in prop::collection::vec(point(), 0..200),
        center in point(),
        radius in 0.0f32..80.0,
    ) {
        let (index, entries) = populate(&points);

        let mut found = index.query_radius(center, radius).unwrap();
        found.sort();
        let mut expected: Vec<CombatantId> = entries
            .iter()
            .filter(|(_, p)| p.distance_squared(center) <= radius * radius)
            .map(|&(id, _)| id)
            .collect();
        expected.sort();

        prop_assert_eq!(found, expected);
    }

    #[test]
    fn moved_entries_are_found_at_new_position(
        points in prop::collection::vec(point(), 1..100),
        moves in prop::collection::vec(point(), 1..100),
    ) {
        let (mut index, mut entries) = populate(&points);
        for (entry, &to) in entries.iter_mut().zip(&moves) {
            index.update_position(entry.0, to).unwrap();
            entry.1 = to;
        }

        for &(id, p) in &entries {
            prop_assert_eq!(index.position_of(id), Some(p));
            let near = index.query_radius(p, 0.01).unwrap();
            prop_assert!(near.contains(&id));
        }
        prop_assert_eq!(index.len(), entries.len());
    }

    #[test]
    fn nearest_is_sorted_and_bounded(
        points in prop::collection::vec(point(), 0..150),
        origin in point(),
        k in 1usize..10,
    ) {
        let (index, entries) = populate(&points);
        let nearest = index.query_nearest(origin, k, 50.0).unwrap();

        prop_assert!(nearest.len() <= k);
        let distances: Vec<f32> = nearest
            .iter()
            .map(|id| index.position_of(*id).unwrap().distance(origin))
            .collect();
        prop_assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(distances.iter().all(|&d| d <= 50.0));

        let within = entries.iter().filter(|(_, p)| p.distance(origin) <= 50.0).count();
        prop_assert_eq!(nearest.len(), within.min(k));
    }

    #[test]
    fn removing_everything_collapses_to_root(
        points in prop::collection::vec(point(), 0..200),
        moves in prop::collection::vec(point(), 0..200),
    ) {
        let (mut index, entries) = populate(&points);
        for (entry, &to) in entries.iter().zip(&moves) {
            index.update_position(entry.0, to).unwrap();
        }
        for &(id, _) in &entries {
            prop_assert!(index.remove(id));
        }
        prop_assert!(index.is_empty());
        prop_assert_eq!(index.node_count(), 1);
    }
}
