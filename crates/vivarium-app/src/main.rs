//! Headless Vivarium runner: seeds a world, steps it, and reports per-tick
//! metrics. Pacing and sizing come from environment variables rather than a
//! CLI surface:
//!
//! - `VIVARIUM_SEED`: RNG seed (default: drawn from entropy)
//! - `VIVARIUM_TICKS`: ticks to simulate (default 10_000)
//! - `VIVARIUM_POPULATION`: creatures to seed (default from config)
//! - `VIVARIUM_REPORT_EVERY`: ticks between log lines (default 500)
//! - `VIVARIUM_SNAPSHOT`: path to write a final JSON snapshot

use anyhow::{Context, Result};
use std::fs;
use tracing::{info, warn};
use vivarium_core::{World, WorldConfig};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn main() -> Result<()> {
    init_tracing();

    let seed: u64 = env_parse("VIVARIUM_SEED").unwrap_or_else(rand::random);
    let ticks: u64 = env_parse("VIVARIUM_TICKS").unwrap_or(10_000);
    let report_every: u64 = env_parse::<u64>("VIVARIUM_REPORT_EVERY")
        .filter(|v| *v > 0)
        .unwrap_or(500);

    let config = WorldConfig {
        rng_seed: Some(seed),
        ..WorldConfig::default()
    };
    let population = env_parse("VIVARIUM_POPULATION").unwrap_or(config.initial_creatures);

    info!(seed, ticks, population, "starting vivarium run");
    let mut world = World::new(config);
    world.populate(population);

    let mut last = None;
    for _ in 0..ticks {
        let metrics = world.step();
        if metrics.tick.is_multiple_of(report_every) {
            info!(
                tick = metrics.tick,
                population = metrics.population,
                food = metrics.food,
                avg_energy = metrics.average_energy,
                avg_age = metrics.average_age,
                births = metrics.births,
                deaths = metrics.deaths,
                "tick summary",
            );
        }
        if metrics.population == 0 {
            warn!(tick = metrics.tick, "population extinct, stopping early");
            last = Some(metrics);
            break;
        }
        last = Some(metrics);
    }

    world.speciate();
    if let Some(metrics) = last {
        info!(
            tick = metrics.tick,
            population = metrics.population,
            species = world.species().len(),
            "run complete",
        );
    }

    if let Ok(path) = std::env::var("VIVARIUM_SNAPSHOT") {
        let json = world
            .snapshot()
            .to_json()
            .context("serializing final snapshot")?;
        fs::write(&path, json).with_context(|| format!("writing snapshot to {path}"))?;
        info!(path, "snapshot written");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
