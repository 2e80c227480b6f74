//! Basic demonstration of the skirmish simulation.
//!
//! Run with: RUST_LOG=skirmish_sim=debug cargo run --example basic_demo

use std::sync::Arc;

use glam::Vec3;
use skirmish_sim::{
    combat::standard_damage, Aabb, CombatantState, Faction, ForceLayout, Ray, SimResult, SimWorld, StaticCover,
    StaticZones, TerrainGrid, WeaponProfile, Zone,
};
use tracing_subscriber::EnvFilter;

fn main() -> SimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Skirmish Sim - Demo ===\n");

    let mut sim = SimWorld::new();
    sim.attach_terrain(Arc::new(TerrainGrid::new_with_features(250, 250, 4.0)));
    sim.attach_zones(Arc::new(StaticZones::new(vec![
        Zone::new(0, Vec3::new(-180.0, 0.0, 0.0), 20.0).owned_by(Faction::Blue).home_base(),
        Zone::new(1, Vec3::new(180.0, 0.0, 0.0), 20.0).owned_by(Faction::Red).home_base(),
        Zone::new(2, Vec3::new(0.0, 0.0, 0.0), 25.0),
        Zone::new(3, Vec3::new(-60.0, 0.0, 40.0), 15.0).owned_by(Faction::Blue),
    ])));
    sim.attach_cover(Arc::new(StaticCover(vec![
        Aabb::new(Vec3::new(-10.0, 0.0, -12.0), Vec3::new(-8.0, 1.2, -4.0)),
        Aabb::new(Vec3::new(8.0, 0.0, 4.0), Vec3::new(10.0, 1.2, 12.0)),
    ])));

    let squads = sim.seed_forces(&ForceLayout::opposing_lines(6, 6, 160.0))?;
    println!("Seeded {} squads, {} agents\n", squads.len(), sim.combatant_count());

    sim.set_viewer(Vec3::new(0.0, 30.0, -60.0));
    sim.update_player(Vec3::new(-20.0, 0.0, -40.0), Vec3::ZERO);

    // Run 20 seconds at 60 FPS
    for frame in 0..1200 {
        let report = sim.tick(1.0 / 60.0)?;

        if frame == 300 {
            let ray = Ray::new(Vec3::new(-20.0, 1.6, -40.0), Vec3::new(1.0, 0.0, 1.0));
            let shot = sim.fire_from_player(&ray, standard_damage, &WeaponProfile::rifle())?;
            println!("Player shot: hit={} killed={} damage={:.1}", shot.hit, shot.killed, shot.damage);
        }

        if (frame + 1) % 240 == 0 {
            println!(
                "--- Frame {} (t={:.1}s) --- live={} full={} deaths={} scale={:.2}",
                report.frame,
                report.elapsed,
                report.stats.live(),
                report.stats.full_updates,
                report.deaths.len(),
                sim.interval_scale()
            );
            print_states(&mut sim);
        }
    }

    println!("\n{}", sim.profiler().summary());
    Ok(())
}

fn print_states(sim: &mut SimWorld) {
    let agents = sim.all_agents();
    for faction in [Faction::Blue, Faction::Red] {
        let count = |state: CombatantState| {
            agents
                .iter()
                .filter(|a| a.faction == faction && a.state == state)
                .count()
        };
        println!(
            "  {:<4} patrol={} alert={} engage={} suppress={} advance={} cover={} defend={} dead={}",
            faction.as_str(),
            count(CombatantState::Patrolling),
            count(CombatantState::Alert),
            count(CombatantState::Engaging),
            count(CombatantState::Suppressing),
            count(CombatantState::Advancing),
            count(CombatantState::SeekingCover),
            count(CombatantState::Defending),
            count(CombatantState::Dead),
        );
    }
}
