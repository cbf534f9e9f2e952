//! Core simulation state for Vivarium: entity model, per-tick event log,
//! metrics, and the deterministic world stepping pipeline.
//!
//! The crate performs no file, network, or rendering I/O. A [`World`] is a
//! single-threaded, pull-based state machine: each [`World::step`] call is a
//! pure function of the current state and the seeded PRNG stream, so
//! identical configuration, seed, and call sequence reproduce bit-identical
//! metrics anywhere.

pub mod config;
pub mod world;

pub use config::{EvalContext, Expr, Value, WorldConfig};
pub use world::{World, WorldSnapshot};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vivarium_brain::Dna;

/// Stable handle of a creature; ids grow monotonically and are never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CreatureId(pub u64);

/// Stable handle of a food item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FoodId(pub u64);

/// Stable handle of an obstacle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ObstacleId(pub u64);

/// Transient intent flags set from brain outputs each brain tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionState {
    pub attacking: bool,
    pub eating: bool,
    pub donating: bool,
    /// Active broadcast channel, if any.
    pub broadcasting: Option<u8>,
}

/// Per-creature cooldown counters, decremented once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cooldowns {
    pub attack: u32,
    pub reproduction: u32,
}

/// A living agent. Owned exclusively by the [`World`]; mutated only during
/// its own slot of the tick pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creature {
    pub id: CreatureId,
    pub x: f32,
    pub y: f32,
    /// Facing angle in radians.
    pub heading: f32,
    pub energy: f32,
    /// Age in ticks.
    pub age: u64,
    pub dna: Dna,
    pub actions: ActionState,
    pub cooldowns: Cooldowns,
    /// Current forward speed in world units per tick.
    pub speed: f32,
    /// Current angular speed in radians per tick.
    pub angular_speed: f32,
    /// Hebbian-updated connection weights, persisted so learned state
    /// survives snapshots. `None` until the brain first fires.
    pub brain_weights: Option<Vec<f32>>,
}

/// An edible item; spawned periodically or dropped by deaths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: FoodId,
    pub x: f32,
    pub y: f32,
    pub nutrition: f32,
}

/// Static circular obstacle placed at world construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: ObstacleId,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Why a creature died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathCause {
    Starvation,
    Killed,
}

/// Observable happenings of one tick, cleared at the start of every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Birth {
        parent: CreatureId,
        child: CreatureId,
    },
    Death {
        creature: CreatureId,
        cause: DeathCause,
    },
    Eat {
        creature: CreatureId,
        food: FoodId,
    },
    Attack {
        attacker: CreatureId,
        target: CreatureId,
        damage: f32,
    },
    Donate {
        donor: CreatureId,
        recipient: CreatureId,
        amount: f32,
    },
    FoodSpawn {
        food: FoodId,
    },
}

/// Aggregate record returned from every [`World::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    pub tick: u64,
    pub population: usize,
    pub food: usize,
    pub average_energy: f32,
    pub average_age: f32,
    pub births: usize,
    pub deaths: usize,
}

/// The one hard failure surfaced to callers: malformed snapshot data at load
/// time.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}
