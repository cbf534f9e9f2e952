//! The world: entity storage, the per-tick pipeline, and snapshotting.
//!
//! Pipeline per [`World::step`]: spawn food, advance the brain clock, run
//! every creature's slot (sense, think, act, move, collide, pay costs,
//! learn), rebuild spatial indices, resolve interactions (eat, attack,
//! donate), apply queued deaths and reproductions, then advance the tick and
//! report metrics. All iteration is insertion-order-stable; hash maps are
//! used for lookups only, never iterated, so a fixed seed reproduces
//! bit-identical runs.

use crate::config::{EvalContext, WorldConfig};
use crate::{
    ActionState, Cooldowns, Creature, CreatureId, DeathCause, FoodId, FoodItem, Obstacle,
    ObstacleId, SnapshotError, TickMetrics, WorldEvent,
};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use vivarium_brain::{
    ActuatorGene, BrainRuntime, Dna, InnovationLedger, RADIUS_MAX, SensorGene, SpeciationState,
    Species, SpeciesMember, Xoshiro128, assign_species, mutate_dna, update_stagnation,
};
use vivarium_index::{SpatialHash, circles_overlap, ray_circle_hit, torus_delta, torus_distance_sq, wrap};

const DEFAULT_SEED: u64 = 0xDEAD_BEEF;
const SPAWN_ATTEMPTS: u32 = 8;

fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    } else if a < -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RayTarget {
    Food,
    Creature,
    Obstacle,
}

/// Complete serializable state; loading one and continuing must reproduce an
/// uninterrupted run tick for tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub config: WorldConfig,
    pub creatures: Vec<Creature>,
    pub food: Vec<FoodItem>,
    pub obstacles: Vec<Obstacle>,
    pub rng_state: [u32; 4],
    pub next_id: u64,
    pub ledger: InnovationLedger,
    pub speciation: SpeciationState,
    pub brain_accumulator: f32,
}

impl WorldSnapshot {
    /// Serialize to the canonical JSON form.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the canonical JSON form.
    pub fn from_json(data: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Top-level simulation orchestrator.
pub struct World {
    config: WorldConfig,
    tick: u64,
    rng: Xoshiro128,
    creatures: Vec<Creature>,
    food: Vec<FoodItem>,
    obstacles: Vec<Obstacle>,
    next_id: u64,
    ledger: InnovationLedger,
    speciation: SpeciationState,
    brain_accumulator: f32,
    events: Vec<WorldEvent>,
    creature_hash: SpatialHash<CreatureId>,
    food_hash: SpatialHash<FoodId>,
    obstacle_hash: SpatialHash<ObstacleId>,
    creature_by_id: HashMap<CreatureId, usize>,
    food_by_id: HashMap<FoodId, usize>,
    obstacle_by_id: HashMap<ObstacleId, usize>,
    runtimes: HashMap<CreatureId, BrainRuntime>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("creatures", &self.creatures.len())
            .field("food", &self.food.len())
            .field("obstacles", &self.obstacles.len())
            .finish()
    }
}

fn hash_for<K: Copy + Eq + std::hash::Hash>(config: &WorldConfig) -> SpatialHash<K> {
    let cell = if config.cell_size.is_finite() && config.cell_size > 0.0 {
        config.cell_size
    } else {
        1.0
    };
    let width = if config.world_width.is_finite() && config.world_width > 0.0 {
        config.world_width
    } else {
        1.0
    };
    let height = if config.world_height.is_finite() && config.world_height > 0.0 {
        config.world_height
    } else {
        1.0
    };
    SpatialHash::new(cell, width, height).expect("sanitized spatial dimensions")
}

impl World {
    /// Build a world from configuration, generating obstacles. With no seed
    /// configured a fixed default keeps construction deterministic.
    #[must_use]
    pub fn new(config: WorldConfig) -> Self {
        let rng = Xoshiro128::new(config.rng_seed.unwrap_or(DEFAULT_SEED));
        let creature_hash = hash_for(&config);
        let food_hash = hash_for(&config);
        let obstacle_hash = hash_for(&config);
        let mut world = Self {
            config,
            tick: 0,
            rng,
            creatures: Vec::new(),
            food: Vec::new(),
            obstacles: Vec::new(),
            next_id: 0,
            ledger: InnovationLedger::new(),
            speciation: SpeciationState::default(),
            brain_accumulator: 0.0,
            events: Vec::new(),
            creature_hash,
            food_hash,
            obstacle_hash,
            creature_by_id: HashMap::new(),
            food_by_id: HashMap::new(),
            obstacle_by_id: HashMap::new(),
            runtimes: HashMap::new(),
        };
        world.generate_obstacles();
        world.rebuild_obstacle_index();
        world
    }

    /// Restore a world from a snapshot. Spatial indices are rebuilt and
    /// brain runtimes recompile lazily from the persisted genomes and
    /// weights; stepping continues bit-identically to an uninterrupted run.
    #[must_use]
    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        let creature_hash = hash_for(&snapshot.config);
        let food_hash = hash_for(&snapshot.config);
        let obstacle_hash = hash_for(&snapshot.config);
        let mut world = Self {
            config: snapshot.config,
            tick: snapshot.tick,
            rng: Xoshiro128::from_state(snapshot.rng_state),
            creatures: snapshot.creatures,
            food: snapshot.food,
            obstacles: snapshot.obstacles,
            next_id: snapshot.next_id,
            ledger: snapshot.ledger,
            speciation: snapshot.speciation,
            brain_accumulator: snapshot.brain_accumulator,
            events: Vec::new(),
            creature_hash,
            food_hash,
            obstacle_hash,
            creature_by_id: HashMap::new(),
            food_by_id: HashMap::new(),
            obstacle_by_id: HashMap::new(),
            runtimes: HashMap::new(),
        };
        world.rebuild_obstacle_index();
        world.rebuild_dynamic_indices();
        world
    }

    /// Capture the complete state between ticks.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            config: self.config.clone(),
            creatures: self.creatures.clone(),
            food: self.food.clone(),
            obstacles: self.obstacles.clone(),
            rng_state: self.rng.state(),
            next_id: self.next_id,
            ledger: self.ledger.clone(),
            speciation: self.speciation.clone(),
            brain_accumulator: self.brain_accumulator,
        }
    }

    /// Restore from snapshot JSON; the malformed-data error is the caller's
    /// to handle.
    pub fn from_snapshot_json(data: &str) -> Result<Self, SnapshotError> {
        Ok(Self::from_snapshot(WorldSnapshot::from_json(data)?))
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Live creatures in insertion order.
    #[must_use]
    pub fn creatures(&self) -> &[Creature] {
        &self.creatures
    }

    /// Look up a creature by id.
    #[must_use]
    pub fn creature(&self, id: CreatureId) -> Option<&Creature> {
        self.creatures.iter().find(|c| c.id == id)
    }

    /// Mutable lookup, for trainer layers adjusting state between ticks.
    #[must_use]
    pub fn creature_mut(&mut self, id: CreatureId) -> Option<&mut Creature> {
        self.creatures.iter_mut().find(|c| c.id == id)
    }

    /// Live food items in insertion order.
    #[must_use]
    pub fn food(&self) -> &[FoodItem] {
        &self.food
    }

    /// Static obstacles.
    #[must_use]
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Events emitted by the most recent step.
    #[must_use]
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    /// Current species clusters (updated by [`World::speciate`]).
    #[must_use]
    pub fn species(&self) -> &[Species] {
        &self.speciation.species
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn generate_obstacles(&mut self) {
        let lo = self.config.obstacle_min_radius;
        let hi = self.config.obstacle_max_radius.max(lo);
        for _ in 0..self.config.obstacle_count {
            let id = ObstacleId(self.allocate_id());
            let x = self.rng.range(0.0, self.config.world_width);
            let y = self.rng.range(0.0, self.config.world_height);
            let radius = self.rng.range(lo, hi);
            self.obstacles.push(Obstacle { id, x, y, radius });
        }
    }

    fn rebuild_obstacle_index(&mut self) {
        self.obstacle_hash.clear();
        self.obstacle_by_id.clear();
        for (idx, o) in self.obstacles.iter().enumerate() {
            self.obstacle_hash.insert(o.id, o.x, o.y);
            self.obstacle_by_id.insert(o.id, idx);
        }
    }

    fn rebuild_dynamic_indices(&mut self) {
        self.creature_hash.clear();
        self.creature_by_id.clear();
        for (idx, c) in self.creatures.iter().enumerate() {
            self.creature_hash.insert(c.id, c.x, c.y);
            self.creature_by_id.insert(c.id, idx);
        }
        self.food_hash.clear();
        self.food_by_id.clear();
        for (idx, f) in self.food.iter().enumerate() {
            self.food_hash.insert(f.id, f.x, f.y);
            self.food_by_id.insert(f.id, idx);
        }
    }

    fn inside_obstacle(&self, x: f32, y: f32, margin: f32) -> bool {
        self.obstacles.iter().any(|o| {
            circles_overlap(
                (o.x, o.y),
                o.radius,
                (x, y),
                margin,
                self.config.world_width,
                self.config.world_height,
            )
        })
    }

    fn random_open_position(&mut self, margin: f32) -> (f32, f32) {
        let mut candidate = (0.0, 0.0);
        for _ in 0..SPAWN_ATTEMPTS {
            candidate = (
                self.rng.range(0.0, self.config.world_width),
                self.rng.range(0.0, self.config.world_height),
            );
            if !self.inside_obstacle(candidate.0, candidate.1, margin) {
                return candidate;
            }
        }
        candidate
    }

    /// Seed `count` creatures carrying baseline genomes.
    pub fn populate(&mut self, count: usize) {
        for idx in 0..count {
            let group = (idx % 4) as u32;
            let dna = Dna::baseline(group, &mut self.rng, &mut self.ledger);
            self.spawn_creature(dna);
        }
    }

    /// Seed creatures from externally supplied genomes.
    pub fn populate_with(&mut self, genomes: &[Dna]) {
        for dna in genomes {
            self.spawn_creature(dna.clone());
        }
    }

    /// Spawn one creature at a random open position.
    pub fn spawn_creature(&mut self, dna: Dna) -> CreatureId {
        let radius = dna.radius;
        let (x, y) = self.random_open_position(radius);
        self.spawn_creature_at(dna, x, y)
    }

    /// Spawn one creature at an explicit position.
    pub fn spawn_creature_at(&mut self, dna: Dna, x: f32, y: f32) -> CreatureId {
        let heading = self.rng.range(0.0, std::f32::consts::TAU);
        let id = CreatureId(self.allocate_id());
        self.creatures.push(Creature {
            id,
            x: wrap(x, self.config.world_width),
            y: wrap(y, self.config.world_height),
            heading,
            energy: self.config.initial_energy,
            age: 0,
            dna,
            actions: ActionState::default(),
            cooldowns: Cooldowns::default(),
            speed: 0.0,
            angular_speed: 0.0,
            brain_weights: None,
        });
        id
    }

    /// Place a food item directly, bypassing the spawn schedule.
    pub fn spawn_food_at(&mut self, x: f32, y: f32, nutrition: f32) -> FoodId {
        let id = FoodId(self.allocate_id());
        self.food.push(FoodItem {
            id,
            x: wrap(x, self.config.world_width),
            y: wrap(y, self.config.world_height),
            nutrition,
        });
        id
    }

    /// Cluster the current population into species and advance stagnation,
    /// using survival time as raw fitness. Intended for trainer layers; not
    /// part of [`World::step`].
    pub fn speciate(&mut self) {
        let members: Vec<SpeciesMember<'_>> = self
            .creatures
            .iter()
            .map(|c| SpeciesMember {
                id: c.id.0,
                dna: &c.dna,
                fitness: c.age as f32,
            })
            .collect();
        assign_species(&members, &mut self.speciation, &self.config.speciation);
        update_stagnation(
            &members,
            &mut self.speciation,
            self.config.speciation.stagnation_limit,
        );
    }

    /// Execute one simulation tick and report aggregate metrics.
    pub fn step(&mut self) -> TickMetrics {
        self.events.clear();

        self.spawn_food();
        let think = self.advance_brain_clock();

        // Fresh indices for sensing; membership and positions match exactly
        // what a snapshot-resumed run would rebuild.
        self.rebuild_dynamic_indices();

        let energy_at_tick_start: HashMap<CreatureId, f32> =
            self.creatures.iter().map(|c| (c.id, c.energy)).collect();

        let population = self.creatures.len();
        let mut starved: Vec<CreatureId> = Vec::new();
        let mut breeders: Vec<CreatureId> = Vec::new();
        for i in 0..self.creatures.len() {
            {
                let c = &mut self.creatures[i];
                c.cooldowns.attack = c.cooldowns.attack.saturating_sub(1);
                c.cooldowns.reproduction = c.cooldowns.reproduction.saturating_sub(1);
            }
            let slot_energy = self.creatures[i].energy;
            if think {
                self.think(i);
            }
            self.integrate(i);
            self.resolve_obstacle_overlap(i);
            self.apply_costs(i, population);
            self.creatures[i].age += 1;
            if think {
                self.learn(i, slot_energy);
            }

            let c = &self.creatures[i];
            if c.energy <= 0.0 {
                starved.push(c.id);
            } else if c.energy >= self.config.reproduction_threshold
                && c.cooldowns.reproduction == 0
                && population < self.config.max_creatures
            {
                breeders.push(c.id);
            }
        }

        // Indices again, now over post-movement positions.
        self.rebuild_dynamic_indices();
        let (eaten, killed) = self.resolve_interactions(&energy_at_tick_start);
        let deaths = self.apply_deaths(&starved, killed, &eaten, &energy_at_tick_start);
        let births = self.apply_reproduction(&breeders);

        self.tick += 1;

        let population = self.creatures.len();
        let (total_energy, total_age) = self
            .creatures
            .iter()
            .fold((0.0f32, 0.0f32), |(e, a), c| (e + c.energy, a + c.age as f32));
        TickMetrics {
            tick: self.tick,
            population,
            food: self.food.len(),
            average_energy: if population > 0 {
                total_energy / population as f32
            } else {
                0.0
            },
            average_age: if population > 0 {
                total_age / population as f32
            } else {
                0.0
            },
            births,
            deaths,
        }
    }

    fn spawn_food(&mut self) {
        for _ in 0..self.config.food_spawn_per_tick {
            if self.food.len() >= self.config.max_food {
                break;
            }
            let (x, y) = if self.config.food_avoids_obstacles {
                self.random_open_position(self.config.food_radius)
            } else {
                (
                    self.rng.range(0.0, self.config.world_width),
                    self.rng.range(0.0, self.config.world_height),
                )
            };
            let nutrition = self.config.food_nutrition.eval(&EvalContext::EMPTY);
            let id = FoodId(self.allocate_id());
            self.food.push(FoodItem { id, x, y, nutrition });
            self.events.push(WorldEvent::FoodSpawn { food: id });
        }
    }

    fn advance_brain_clock(&mut self) -> bool {
        if self.config.brain_rate <= 0.0 || self.config.tick_rate <= 0.0 {
            return false;
        }
        self.brain_accumulator += self.config.brain_rate / self.config.tick_rate;
        if self.brain_accumulator >= 1.0 {
            self.brain_accumulator = 0.0;
            true
        } else {
            false
        }
    }

    fn ensure_runtime(&mut self, i: usize) {
        let id = self.creatures[i].id;
        if self.runtimes.contains_key(&id) {
            return;
        }
        let mut runtime = BrainRuntime::compile(&self.creatures[i].dna.brain);
        if let Some(weights) = &self.creatures[i].brain_weights {
            runtime.restore_weights(weights);
        }
        self.runtimes.insert(id, runtime);
    }

    fn think(&mut self, i: usize) {
        self.ensure_runtime(i);
        let tap = self.rng.uniform();
        let inputs = self.sense(i, tap);
        let id = self.creatures[i].id;
        let Some(runtime) = self.runtimes.get_mut(&id) else {
            return;
        };
        let outputs = runtime.forward(&inputs).to_vec();
        self.apply_outputs(i, &outputs);
    }

    fn learn(&mut self, i: usize, slot_energy: f32) {
        if self.creatures[i].dna.brain.plasticity == 0.0 {
            return;
        }
        let id = self.creatures[i].id;
        let modulator = self.creatures[i].energy - slot_energy;
        if let Some(runtime) = self.runtimes.get_mut(&id) {
            runtime.hebbian_update(modulator);
            self.creatures[i].brain_weights = Some(runtime.weights());
        }
    }

    fn iff_sign(&self, observer: &Creature, other: &Creature) -> f32 {
        if observer.dna.has_iff {
            if observer.dna.group_id == other.dna.group_id {
                1.0
            } else {
                -1.0
            }
        } else {
            1.0
        }
    }

    fn sense(&self, i: usize, tap: f32) -> Vec<f32> {
        let mut inputs = Vec::with_capacity(self.creatures[i].dna.input_count());
        inputs.push(1.0);
        inputs.push(tap);
        for sensor in &self.creatures[i].dna.sensors {
            match sensor {
                SensorGene::RayVision {
                    rays,
                    fov,
                    max_distance,
                    offset,
                } => {
                    let heading = self.creatures[i].heading;
                    for ray in 0..*rays {
                        let fraction = if *rays > 1 {
                            ray as f32 / (*rays - 1) as f32 - 0.5
                        } else {
                            0.0
                        };
                        let angle = heading + offset + fov * fraction;
                        let mut slots = [0.0f32; 4];
                        if let Some((target, distance, sign)) =
                            self.cast_ray(i, angle, *max_distance)
                        {
                            slots[0] = (1.0 - distance / max_distance).clamp(0.0, 1.0);
                            match target {
                                RayTarget::Food => slots[1] = 1.0,
                                RayTarget::Creature => slots[2] = sign,
                                RayTarget::Obstacle => slots[3] = 1.0,
                            }
                        }
                        inputs.extend_from_slice(&slots);
                    }
                }
                SensorGene::Touch => {
                    let (food_touch, creature_touch, obstacle_touch) = self.touch_state(i);
                    inputs.push(food_touch);
                    inputs.push(creature_touch);
                    inputs.push(obstacle_touch);
                }
                SensorGene::EnergySense => {
                    let energy = self.creatures[i].energy;
                    let max = self.config.max_energy.max(f32::MIN_POSITIVE);
                    inputs.push((energy / max).clamp(0.0, 1.0));
                }
                SensorGene::BroadcastReceiver { channels } => {
                    for &channel in channels {
                        let (strength, bearing) = self.receive_broadcast(i, channel);
                        inputs.push(strength);
                        inputs.push(bearing);
                    }
                }
            }
        }
        inputs
    }

    fn cast_ray(&self, i: usize, angle: f32, max_distance: f32) -> Option<(RayTarget, f32, f32)> {
        let observer = &self.creatures[i];
        let width = self.config.world_width;
        let height = self.config.world_height;
        let start = (observer.x, observer.y);
        let end = (
            observer.x + angle.cos() * max_distance,
            observer.y + angle.sin() * max_distance,
        );
        let margin = self
            .config
            .obstacle_max_radius
            .max(RADIUS_MAX)
            .max(self.config.food_radius);

        let mut best: Option<(RayTarget, f32, f32)> = None;
        let mut best_t = f32::INFINITY;

        for fid in self.food_hash.query_ray(start, end, margin) {
            let Some(&fi) = self.food_by_id.get(&fid) else {
                continue;
            };
            let f = self.food[fi];
            if let Some(t) = ray_circle_hit(
                start,
                end,
                (f.x, f.y),
                self.config.food_radius,
                width,
                height,
            ) && t < best_t
            {
                best_t = t;
                best = Some((RayTarget::Food, t * max_distance, 0.0));
            }
        }
        for cid in self.creature_hash.query_ray(start, end, margin) {
            if cid == observer.id {
                continue;
            }
            let Some(&ci) = self.creature_by_id.get(&cid) else {
                continue;
            };
            let other = &self.creatures[ci];
            if let Some(t) = ray_circle_hit(
                start,
                end,
                (other.x, other.y),
                other.dna.radius,
                width,
                height,
            ) && t < best_t
            {
                best_t = t;
                best = Some((
                    RayTarget::Creature,
                    t * max_distance,
                    self.iff_sign(observer, other),
                ));
            }
        }
        for oid in self.obstacle_hash.query_ray(start, end, margin) {
            let Some(&oi) = self.obstacle_by_id.get(&oid) else {
                continue;
            };
            let o = self.obstacles[oi];
            if let Some(t) = ray_circle_hit(start, end, (o.x, o.y), o.radius, width, height)
                && t < best_t
            {
                best_t = t;
                best = Some((RayTarget::Obstacle, t * max_distance, 0.0));
            }
        }
        best
    }

    fn touch_state(&self, i: usize) -> (f32, f32, f32) {
        let observer = &self.creatures[i];
        let width = self.config.world_width;
        let height = self.config.world_height;
        let pos = (observer.x, observer.y);
        let radius = observer.dna.radius;

        let mut food_touch = 0.0;
        for fid in self
            .food_hash
            .query_radius(observer.x, observer.y, radius + self.config.food_radius)
        {
            let Some(&fi) = self.food_by_id.get(&fid) else {
                continue;
            };
            let f = self.food[fi];
            if circles_overlap(pos, radius, (f.x, f.y), self.config.food_radius, width, height) {
                food_touch = 1.0;
                break;
            }
        }

        let mut creature_touch = 0.0;
        let mut nearest = f32::INFINITY;
        for cid in self
            .creature_hash
            .query_radius(observer.x, observer.y, radius + RADIUS_MAX)
        {
            if cid == observer.id {
                continue;
            }
            let Some(&ci) = self.creature_by_id.get(&cid) else {
                continue;
            };
            let other = &self.creatures[ci];
            if circles_overlap(pos, radius, (other.x, other.y), other.dna.radius, width, height) {
                let d = torus_distance_sq(pos, (other.x, other.y), width, height);
                if d < nearest {
                    nearest = d;
                    creature_touch = self.iff_sign(observer, other);
                }
            }
        }

        let mut obstacle_touch = 0.0;
        for oid in self.obstacle_hash.query_radius(
            observer.x,
            observer.y,
            radius + self.config.obstacle_max_radius,
        ) {
            let Some(&oi) = self.obstacle_by_id.get(&oid) else {
                continue;
            };
            let o = self.obstacles[oi];
            if circles_overlap(pos, radius, (o.x, o.y), o.radius, width, height) {
                obstacle_touch = 1.0;
                break;
            }
        }

        (food_touch, creature_touch, obstacle_touch)
    }

    fn receive_broadcast(&self, i: usize, channel: u8) -> (f32, f32) {
        let observer = &self.creatures[i];
        let width = self.config.world_width;
        let height = self.config.world_height;
        let radius = self.config.broadcast_radius;
        let mut best: Option<(f32, f32)> = None;
        let mut nearest = f32::INFINITY;
        for cid in self
            .creature_hash
            .query_radius(observer.x, observer.y, radius)
        {
            if cid == observer.id {
                continue;
            }
            let Some(&ci) = self.creature_by_id.get(&cid) else {
                continue;
            };
            let other = &self.creatures[ci];
            if other.actions.broadcasting != Some(channel) {
                continue;
            }
            let dist_sq =
                torus_distance_sq((observer.x, observer.y), (other.x, other.y), width, height);
            if dist_sq > radius * radius || dist_sq >= nearest {
                continue;
            }
            nearest = dist_sq;
            let (dx, dy) = torus_delta((observer.x, observer.y), (other.x, other.y), width, height);
            let strength = (1.0 - dist_sq.sqrt() / radius).clamp(0.0, 1.0);
            let bearing = wrap_angle(dy.atan2(dx) - observer.heading) / std::f32::consts::PI;
            best = Some((strength, bearing));
        }
        best.unwrap_or((0.0, 0.0))
    }

    fn apply_outputs(&mut self, i: usize, outputs: &[f32]) {
        let max_forward = self.config.max_forward_speed;
        let reverse_scale = self.config.reverse_speed_scale;
        let max_turn = self.config.max_turn_rate;
        let creature = &mut self.creatures[i];

        let mut actions = ActionState::default();
        let mut speed = creature.speed;
        let mut angular = creature.angular_speed;
        let mut slot = 0usize;
        for actuator in &creature.dna.actuators {
            match actuator {
                ActuatorGene::Move => {
                    let forward = outputs.get(slot).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
                    let turn = outputs
                        .get(slot + 1)
                        .copied()
                        .unwrap_or(0.0)
                        .clamp(-1.0, 1.0);
                    slot += 2;
                    // Reverse gear is geared down relative to forward thrust.
                    speed = if forward >= 0.0 {
                        forward * max_forward
                    } else {
                        forward * max_forward * reverse_scale
                    };
                    angular = turn * max_turn;
                }
                ActuatorGene::Attack => {
                    actions.attacking = outputs.get(slot).copied().unwrap_or(0.0) > 0.5;
                    slot += 1;
                }
                ActuatorGene::Eat => {
                    actions.eating = outputs.get(slot).copied().unwrap_or(0.0) > 0.5;
                    slot += 1;
                }
                ActuatorGene::Donate => {
                    actions.donating = outputs.get(slot).copied().unwrap_or(0.0) > 0.5;
                    slot += 1;
                }
                ActuatorGene::Broadcast { channel } => {
                    if outputs.get(slot).copied().unwrap_or(0.0) > 0.5 {
                        actions.broadcasting = Some(*channel);
                    }
                    slot += 1;
                }
            }
        }
        creature.actions = actions;
        creature.speed = speed;
        creature.angular_speed = angular;
    }

    fn integrate(&mut self, i: usize) {
        let width = self.config.world_width;
        let height = self.config.world_height;
        let creature = &mut self.creatures[i];
        creature.heading = wrap(creature.heading + creature.angular_speed, std::f32::consts::TAU);
        creature.x = wrap(creature.x + creature.heading.cos() * creature.speed, width);
        creature.y = wrap(creature.y + creature.heading.sin() * creature.speed, height);
    }

    fn resolve_obstacle_overlap(&mut self, i: usize) {
        let width = self.config.world_width;
        let height = self.config.world_height;
        let (x, y, radius, heading) = {
            let c = &self.creatures[i];
            (c.x, c.y, c.dna.radius, c.heading)
        };
        let candidates = self
            .obstacle_hash
            .query_radius(x, y, radius + self.config.obstacle_max_radius);
        for oid in candidates {
            let Some(&oi) = self.obstacle_by_id.get(&oid) else {
                continue;
            };
            let o = self.obstacles[oi];
            let creature = &mut self.creatures[i];
            let (dx, dy) = torus_delta((o.x, o.y), (creature.x, creature.y), width, height);
            let dist_sq = dx * dx + dy * dy;
            let reach = o.radius + radius;
            if dist_sq >= reach * reach {
                continue;
            }
            let dist = dist_sq.sqrt();
            if dist > f32::EPSILON {
                let scale = reach / dist;
                creature.x = wrap(o.x + dx * scale, width);
                creature.y = wrap(o.y + dy * scale, height);
            } else {
                // Dead center: eject along the current heading.
                creature.x = wrap(o.x + reach * heading.cos(), width);
                creature.y = wrap(o.y + reach * heading.sin(), height);
            }
        }
    }

    fn apply_costs(&mut self, i: usize, population: usize) {
        let config = &self.config;
        let creature = &mut self.creatures[i];
        let reference = config.default_body_radius;
        let radius_scale = if reference > 0.0 {
            (creature.dna.radius * creature.dna.radius) / (reference * reference)
        } else {
            1.0
        };
        let density_scale = if config.max_creatures > 0 {
            1.0 + config.density_metabolism * population as f32 / config.max_creatures as f32
        } else {
            1.0
        };
        let mut cost = config.metabolism * radius_scale * density_scale;
        cost += config.move_cost * creature.speed.abs();
        cost += config.turn_cost * creature.angular_speed.abs();
        cost += config.vision_cost * creature.dna.total_rays() as f32;
        if creature.actions.broadcasting.is_some() {
            cost += config.broadcast_cost;
        }
        creature.energy = (creature.energy - cost).min(config.max_energy);
    }

    fn resolve_interactions(
        &mut self,
        energy_at_tick_start: &HashMap<CreatureId, f32>,
    ) -> (HashSet<FoodId>, HashSet<CreatureId>) {
        let order: Vec<CreatureId> = self.creatures.iter().map(|c| c.id).collect();
        let mut eaten: HashSet<FoodId> = HashSet::new();
        let mut killed: HashSet<CreatureId> = HashSet::new();
        for id in order {
            if killed.contains(&id) {
                continue;
            }
            let Some(&i) = self.creature_by_id.get(&id) else {
                continue;
            };
            if self.creatures[i].actions.eating {
                self.try_eat(i, &mut eaten);
            }
            if self.creatures[i].actions.attacking && self.creatures[i].cooldowns.attack == 0 {
                self.do_attack(i, &mut killed, energy_at_tick_start);
            }
            if self.creatures[i].actions.donating {
                self.do_donate(i, &killed);
            }
        }
        (eaten, killed)
    }

    fn try_eat(&mut self, i: usize, eaten: &mut HashSet<FoodId>) {
        let (id, x, y, radius) = {
            let c = &self.creatures[i];
            (c.id, c.x, c.y, c.dna.radius)
        };
        let width = self.config.world_width;
        let height = self.config.world_height;
        let candidates = self
            .food_hash
            .query_radius(x, y, radius + self.config.food_radius);
        for fid in candidates {
            if eaten.contains(&fid) {
                continue;
            }
            let Some(&fi) = self.food_by_id.get(&fid) else {
                continue;
            };
            let f = self.food[fi];
            if !circles_overlap((x, y), radius, (f.x, f.y), self.config.food_radius, width, height)
            {
                continue;
            }
            let creature = &mut self.creatures[i];
            creature.energy = (creature.energy + f.nutrition).min(self.config.max_energy);
            eaten.insert(fid);
            self.events.push(WorldEvent::Eat {
                creature: id,
                food: fid,
            });
            break; // one item per creature per tick
        }
    }

    fn do_attack(
        &mut self,
        i: usize,
        killed: &mut HashSet<CreatureId>,
        energy_at_tick_start: &HashMap<CreatureId, f32>,
    ) {
        let (id, x, y, radius, energy, group, has_iff) = {
            let c = &self.creatures[i];
            (
                c.id,
                c.x,
                c.y,
                c.dna.radius,
                c.energy,
                c.dna.group_id,
                c.dna.has_iff,
            )
        };
        // Cost and cooldown apply whether or not anything is in range.
        {
            let c = &mut self.creatures[i];
            c.cooldowns.attack = self.config.attack_cooldown;
            c.energy -= self.config.attack_cost;
        }
        let bindings = [("radius", radius), ("energy", energy)];
        let damage = self
            .config
            .attack_damage
            .eval(&EvalContext::new(&bindings));
        let width = self.config.world_width;
        let height = self.config.world_height;

        let candidates = self
            .creature_hash
            .query_radius(x, y, self.config.attack_radius + RADIUS_MAX);
        for target_id in candidates {
            if target_id == id || killed.contains(&target_id) {
                continue;
            }
            let Some(&ti) = self.creature_by_id.get(&target_id) else {
                continue;
            };
            if has_iff && self.creatures[ti].dna.group_id == group {
                continue;
            }
            let reach = self.config.attack_radius + self.creatures[ti].dna.radius;
            let dist_sq = torus_distance_sq(
                (x, y),
                (self.creatures[ti].x, self.creatures[ti].y),
                width,
                height,
            );
            if dist_sq > reach * reach {
                continue;
            }
            self.creatures[ti].energy -= damage;
            self.events.push(WorldEvent::Attack {
                attacker: id,
                target: target_id,
                damage,
            });
            if self.creatures[ti].energy <= 0.0 {
                killed.insert(target_id);
                self.events.push(WorldEvent::Death {
                    creature: target_id,
                    cause: DeathCause::Killed,
                });
                self.drop_corpse(ti, energy_at_tick_start);
            }
        }
    }

    fn do_donate(&mut self, i: usize, killed: &HashSet<CreatureId>) {
        let (id, x, y, group) = {
            let c = &self.creatures[i];
            (c.id, c.x, c.y, c.dna.group_id)
        };
        // The donor commits the energy regardless of whether an ally is found.
        self.creatures[i].energy -= self.config.donation_cost;

        let width = self.config.world_width;
        let height = self.config.world_height;
        let radius = self.config.donation_radius;
        let candidates = self.creature_hash.query_radius(x, y, radius);
        let recipient = candidates
            .into_iter()
            .filter(|cid| *cid != id && !killed.contains(cid))
            .filter_map(|cid| self.creature_by_id.get(&cid).map(|&ci| (cid, ci)))
            .filter(|&(_, ci)| self.creatures[ci].dna.group_id == group)
            .map(|(cid, ci)| {
                let d = torus_distance_sq(
                    (x, y),
                    (self.creatures[ci].x, self.creatures[ci].y),
                    width,
                    height,
                );
                (cid, ci, d)
            })
            .filter(|&(_, _, d)| d <= radius * radius)
            .min_by_key(|&(_, _, d)| OrderedFloat(d));

        if let Some((recipient_id, ri, _)) = recipient {
            let amount = self.config.donation_amount;
            let target = &mut self.creatures[ri];
            target.energy = (target.energy + amount).min(self.config.max_energy);
            self.events.push(WorldEvent::Donate {
                donor: id,
                recipient: recipient_id,
                amount,
            });
        }
    }

    fn drop_corpse(&mut self, i: usize, energy_at_tick_start: &HashMap<CreatureId, f32>) {
        let (id, x, y, radius) = {
            let c = &self.creatures[i];
            (c.id, c.x, c.y, c.dna.radius)
        };
        let energy = energy_at_tick_start
            .get(&id)
            .copied()
            .unwrap_or(0.0)
            .max(0.0);
        let count =
            ((energy * self.config.corpse_drop_rate).floor() as u32).min(self.config.corpse_drop_cap);
        if count == 0 {
            return;
        }
        let bindings = [("energy", energy), ("radius", radius)];
        let nutrition = self
            .config
            .corpse_nutrition
            .eval(&EvalContext::new(&bindings));
        let width = self.config.world_width;
        let height = self.config.world_height;
        for _ in 0..count {
            let angle = self.rng.range(0.0, std::f32::consts::TAU);
            let distance = self.rng.range(0.0, radius + 4.0);
            let fx = wrap(x + angle.cos() * distance, width);
            let fy = wrap(y + angle.sin() * distance, height);
            let food_id = FoodId(self.allocate_id());
            self.food.push(FoodItem {
                id: food_id,
                x: fx,
                y: fy,
                nutrition,
            });
            self.events.push(WorldEvent::FoodSpawn { food: food_id });
        }
    }

    fn apply_deaths(
        &mut self,
        starved: &[CreatureId],
        killed: HashSet<CreatureId>,
        eaten: &HashSet<FoodId>,
        energy_at_tick_start: &HashMap<CreatureId, f32>,
    ) -> usize {
        let mut doomed = killed;
        for &id in starved {
            if doomed.contains(&id) {
                continue;
            }
            let Some(&i) = self.creature_by_id.get(&id) else {
                continue;
            };
            self.drop_corpse(i, energy_at_tick_start);
            self.events.push(WorldEvent::Death {
                creature: id,
                cause: DeathCause::Starvation,
            });
            doomed.insert(id);
        }
        self.food.retain(|f| !eaten.contains(&f.id));
        self.creatures.retain(|c| !doomed.contains(&c.id));
        for id in &doomed {
            self.runtimes.remove(id);
        }
        doomed.len()
    }

    fn apply_reproduction(&mut self, breeders: &[CreatureId]) -> usize {
        let mut births = 0usize;
        for &parent_id in breeders {
            // The cap binds strictly, even mid-batch.
            if self.creatures.len() >= self.config.max_creatures {
                break;
            }
            let Some(pi) = self.creatures.iter().position(|c| c.id == parent_id) else {
                continue;
            };
            let share = self.config.child_energy_share;
            let parent_dna = self.creatures[pi].dna.clone();
            let (px, py) = (self.creatures[pi].x, self.creatures[pi].y);
            let child_energy = self.creatures[pi].energy * share;
            {
                let parent = &mut self.creatures[pi];
                parent.energy -= child_energy;
                parent.cooldowns.reproduction = self.config.reproduction_cooldown;
            }

            let child_dna = mutate_dna(
                &parent_dna,
                self.config.mutation_rate,
                self.config.mutation_strength,
                &mut self.rng,
                &mut self.ledger,
            );
            let jitter = self.config.spawn_jitter;
            let cx = wrap(px + self.rng.range(-jitter, jitter), self.config.world_width);
            let cy = wrap(py + self.rng.range(-jitter, jitter), self.config.world_height);
            let heading = self.rng.range(0.0, std::f32::consts::TAU);
            let child_id = CreatureId(self.allocate_id());
            self.creatures.push(Creature {
                id: child_id,
                x: cx,
                y: cy,
                heading,
                energy: child_energy.min(self.config.max_energy),
                age: 0,
                dna: child_dna,
                actions: ActionState::default(),
                cooldowns: Cooldowns {
                    attack: 0,
                    reproduction: self.config.reproduction_cooldown,
                },
                speed: 0.0,
                angular_speed: 0.0,
                brain_weights: None,
            });
            self.events.push(WorldEvent::Birth {
                parent: parent_id,
                child: child_id,
            });
            births += 1;
        }
        births
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> WorldConfig {
        WorldConfig {
            rng_seed: Some(7),
            obstacle_count: 0,
            food_spawn_per_tick: 0,
            metabolism: 0.0,
            density_metabolism: 0.0,
            move_cost: 0.0,
            turn_cost: 0.0,
            vision_cost: 0.0,
            ..WorldConfig::default()
        }
    }

    #[test]
    fn food_spawning_respects_rate_and_cap() {
        let config = WorldConfig {
            rng_seed: Some(1),
            obstacle_count: 0,
            food_spawn_per_tick: 3,
            max_food: 5,
            ..WorldConfig::default()
        };
        let mut world = World::new(config);
        world.step();
        assert_eq!(world.food().len(), 3);
        world.step();
        assert_eq!(world.food().len(), 5);
        world.step();
        assert_eq!(world.food().len(), 5);
        assert_eq!(
            world
                .events()
                .iter()
                .filter(|e| matches!(e, WorldEvent::FoodSpawn { .. }))
                .count(),
            0
        );
    }

    #[test]
    fn brain_clock_fires_at_the_configured_ratio() {
        let config = WorldConfig {
            tick_rate: 60.0,
            brain_rate: 20.0,
            ..quiet_config()
        };
        let mut world = World::new(config);
        let fires = (0..60).filter(|_| world.advance_brain_clock()).count();
        assert_eq!(fires, 20);
    }

    #[test]
    fn obstacle_overlap_is_projected_out() {
        let mut config = quiet_config();
        config.obstacle_count = 0;
        let mut world = World::new(config);
        let obstacle_id = ObstacleId(world.allocate_id());
        world.obstacles.push(Obstacle {
            id: obstacle_id,
            x: 100.0,
            y: 100.0,
            radius: 20.0,
        });
        world.rebuild_obstacle_index();

        let mut rng_dna = world.rng.clone();
        let dna = Dna::baseline(0, &mut rng_dna, &mut world.ledger);
        let id = world.spawn_creature_at(dna, 105.0, 100.0);
        let i = world.creatures.iter().position(|c| c.id == id).expect("spawned");
        world.resolve_obstacle_overlap(i);

        let c = world.creature(id).expect("creature");
        let dist = torus_distance_sq((100.0, 100.0), (c.x, c.y), 1_200.0, 900.0).sqrt();
        assert!(dist >= 20.0 + c.dna.radius - 1e-3);
    }

    #[test]
    fn stepping_an_empty_world_is_safe() {
        let mut world = World::new(quiet_config());
        for _ in 0..10 {
            let metrics = world.step();
            assert_eq!(metrics.population, 0);
            assert_eq!(metrics.births, 0);
            assert_eq!(metrics.deaths, 0);
        }
        assert_eq!(world.tick(), 10);
    }

    #[test]
    fn events_are_cleared_every_step() {
        let config = WorldConfig {
            rng_seed: Some(2),
            obstacle_count: 0,
            food_spawn_per_tick: 1,
            max_food: 1,
            ..WorldConfig::default()
        };
        let mut world = World::new(config);
        world.step();
        assert_eq!(world.events().len(), 1);
        world.step();
        assert!(world.events().is_empty());
    }
}
