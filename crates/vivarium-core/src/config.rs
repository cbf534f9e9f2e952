//! World configuration.
//!
//! Tuning fields are plain numbers except where per-event context matters;
//! those accept either a literal or a small arithmetic formula tree resolved
//! against named variables at evaluation time. The core performs no config
//! validation; supplying a well-formed configuration is the caller's
//! responsibility.

use serde::{Deserialize, Serialize};

/// Arithmetic expression tree evaluated against a variable context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Num(f32),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    /// Tree-walking evaluation. Unknown variables resolve to 0; division by
    /// zero yields 0 rather than NaN or a panic.
    #[must_use]
    pub fn eval(&self, ctx: &EvalContext<'_>) -> f32 {
        match self {
            Self::Num(n) => *n,
            Self::Var(name) => ctx.var(name),
            Self::Add(a, b) => a.eval(ctx) + b.eval(ctx),
            Self::Sub(a, b) => a.eval(ctx) - b.eval(ctx),
            Self::Mul(a, b) => a.eval(ctx) * b.eval(ctx),
            Self::Div(a, b) => {
                let denominator = b.eval(ctx);
                if denominator == 0.0 {
                    0.0
                } else {
                    a.eval(ctx) / denominator
                }
            }
            Self::Neg(inner) => -inner.eval(ctx),
        }
    }
}

/// Name-to-number bindings for formula evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    entries: &'a [(&'a str, f32)],
}

impl<'a> EvalContext<'a> {
    /// Context with no bindings.
    pub const EMPTY: EvalContext<'static> = EvalContext { entries: &[] };

    /// Wrap a slice of bindings.
    #[must_use]
    pub const fn new(entries: &'a [(&'a str, f32)]) -> Self {
        Self { entries }
    }

    fn var(&self, name: &str) -> f32 {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map_or(0.0, |(_, value)| *value)
    }
}

/// A config value that is either a literal number or a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Literal(f32),
    Formula(Expr),
}

impl Value {
    /// Evaluate against the given context.
    #[must_use]
    pub fn eval(&self, ctx: &EvalContext<'_>) -> f32 {
        match self {
            Self::Literal(n) => *n,
            Self::Formula(expr) => expr.eval(ctx),
        }
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Self::Literal(n)
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Literal(0.0)
    }
}

/// Static configuration for a Vivarium world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Cell size of the spatial hashes.
    pub cell_size: f32,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,

    /// Simulation ticks per second (pacing contract with callers).
    pub tick_rate: f32,
    /// Brain evaluations per second; brains fire when the accumulator of
    /// `brain_rate / tick_rate` crosses one.
    pub brain_rate: f32,

    /// Hard population cap; reproduction stops once reached.
    pub max_creatures: usize,
    /// Population seeded by [`crate::World::populate`].
    pub initial_creatures: usize,

    /// Energy ceiling for every creature.
    pub max_energy: f32,
    /// Energy assigned to seeded creatures.
    pub initial_energy: f32,
    /// Reference body radius for metabolism scaling.
    pub default_body_radius: f32,
    /// Baseline upkeep per tick, scaled by relative body area.
    pub metabolism: f32,
    /// Additional metabolism fraction at full population density.
    pub density_metabolism: f32,
    /// Energy per unit of forward speed.
    pub move_cost: f32,
    /// Energy per unit of angular speed.
    pub turn_cost: f32,
    /// Energy per vision ray per tick.
    pub vision_cost: f32,
    /// Energy per tick while broadcasting.
    pub broadcast_cost: f32,

    /// Food items spawned per tick while under the cap.
    pub food_spawn_per_tick: u32,
    /// Maximum food items alive at once.
    pub max_food: usize,
    /// Radius of a food item.
    pub food_radius: f32,
    /// Nutrition of spawned food. No formula variables are bound.
    pub food_nutrition: Value,
    /// Whether spawn positions avoid obstacle interiors.
    pub food_avoids_obstacles: bool,

    /// Area-of-effect radius around an attacker.
    pub attack_radius: f32,
    /// Damage per struck target; variables: `radius`, `energy` (attacker's).
    pub attack_damage: Value,
    /// Ticks between attacks.
    pub attack_cooldown: u32,
    /// Energy paid per attack, target or not.
    pub attack_cost: f32,

    /// Energy level required before reproducing.
    pub reproduction_threshold: f32,
    /// Fraction of parent energy transferred to the child.
    pub child_energy_share: f32,
    /// Ticks between reproductions.
    pub reproduction_cooldown: u32,
    /// Spawn distance jitter for children.
    pub spawn_jitter: f32,

    /// Food items dropped per unit of energy held at the start of the death
    /// tick.
    pub corpse_drop_rate: f32,
    /// Hard cap on food items dropped by one death.
    pub corpse_drop_cap: u32,
    /// Nutrition of corpse food; variables: `energy`, `radius` (deceased's).
    pub corpse_nutrition: Value,

    /// Search radius for donation targets.
    pub donation_radius: f32,
    /// Energy received by the chosen ally.
    pub donation_amount: f32,
    /// Energy paid by the donor, target or not.
    pub donation_cost: f32,

    /// Reception radius for broadcast signals.
    pub broadcast_radius: f32,

    /// Obstacles placed at world construction.
    pub obstacle_count: u32,
    /// Smallest obstacle radius.
    pub obstacle_min_radius: f32,
    /// Largest obstacle radius.
    pub obstacle_max_radius: f32,

    /// Top forward speed at full throttle.
    pub max_forward_speed: f32,
    /// Reverse speed as a fraction of forward speed.
    pub reverse_speed_scale: f32,
    /// Top angular speed in radians per tick.
    pub max_turn_rate: f32,

    /// Probability scale of genome mutations at reproduction.
    pub mutation_rate: f32,
    /// Magnitude scale of genome mutations.
    pub mutation_strength: f32,

    /// Speciation coefficients and limits.
    pub speciation: vivarium_brain::SpeciationConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_width: 1_200.0,
            world_height: 900.0,
            cell_size: 40.0,
            rng_seed: None,
            tick_rate: 60.0,
            brain_rate: 20.0,
            max_creatures: 200,
            initial_creatures: 40,
            max_energy: 100.0,
            initial_energy: 50.0,
            default_body_radius: 5.0,
            metabolism: 0.02,
            density_metabolism: 0.5,
            move_cost: 0.01,
            turn_cost: 0.005,
            vision_cost: 0.000_5,
            broadcast_cost: 0.01,
            food_spawn_per_tick: 1,
            max_food: 300,
            food_radius: 2.5,
            food_nutrition: Value::Literal(12.0),
            food_avoids_obstacles: true,
            attack_radius: 14.0,
            attack_damage: Value::Literal(8.0),
            attack_cooldown: 30,
            attack_cost: 0.5,
            reproduction_threshold: 75.0,
            child_energy_share: 0.35,
            reproduction_cooldown: 300,
            spawn_jitter: 12.0,
            corpse_drop_rate: 0.05,
            corpse_drop_cap: 4,
            corpse_nutrition: Value::Literal(8.0),
            donation_radius: 20.0,
            donation_amount: 5.0,
            donation_cost: 5.5,
            broadcast_radius: 150.0,
            obstacle_count: 6,
            obstacle_min_radius: 10.0,
            obstacle_max_radius: 35.0,
            max_forward_speed: 2.5,
            reverse_speed_scale: 0.5,
            max_turn_rate: 0.25,
            mutation_rate: 0.25,
            mutation_strength: 0.5,
            speciation: vivarium_brain::SpeciationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_passes_through() {
        let value = Value::Literal(4.5);
        assert_eq!(value.eval(&EvalContext::EMPTY), 4.5);
    }

    #[test]
    fn formula_resolves_variables() {
        // energy / 2 + radius
        let expr = Expr::Add(
            Box::new(Expr::Div(
                Box::new(Expr::Var("energy".into())),
                Box::new(Expr::Num(2.0)),
            )),
            Box::new(Expr::Var("radius".into())),
        );
        let ctx_entries = [("energy", 10.0), ("radius", 3.0)];
        let ctx = EvalContext::new(&ctx_entries);
        assert_eq!(expr.eval(&ctx), 8.0);
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let expr = Expr::Div(Box::new(Expr::Num(5.0)), Box::new(Expr::Num(0.0)));
        assert_eq!(expr.eval(&EvalContext::EMPTY), 0.0);
        let nested = Expr::Add(
            Box::new(Expr::Div(
                Box::new(Expr::Num(1.0)),
                Box::new(Expr::Var("missing".into())),
            )),
            Box::new(Expr::Num(2.0)),
        );
        assert_eq!(nested.eval(&EvalContext::EMPTY), 2.0);
    }

    #[test]
    fn unknown_variable_is_zero() {
        let expr = Expr::Var("nope".into());
        assert_eq!(expr.eval(&EvalContext::EMPTY), 0.0);
    }

    #[test]
    fn negation_applies() {
        let expr = Expr::Neg(Box::new(Expr::Num(3.0)));
        assert_eq!(expr.eval(&EvalContext::EMPTY), -3.0);
    }

    #[test]
    fn value_serde_keeps_literals_as_plain_numbers() {
        let literal: Value = 7.5.into();
        let json = serde_json::to_string(&literal).expect("serialize");
        assert_eq!(json, "7.5");
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, literal);

        let formula = Value::Formula(Expr::Mul(
            Box::new(Expr::Var("energy".into())),
            Box::new(Expr::Num(0.5)),
        ));
        let json = serde_json::to_string(&formula).expect("serialize");
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, formula);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = WorldConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: WorldConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
