//! Heritable creature description: body, sensors, actuators, and the
//! NEAT-style brain genome with innovation-number gene alignment.

use crate::rng::Xoshiro128;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Identifier of a node gene, local to a genome lineage.
pub type NodeId = u32;
/// Globally aligned identifier of a structural connection mutation.
pub type Innovation = u64;

/// Inclusive body radius bounds.
pub const RADIUS_MIN: f32 = 3.0;
pub const RADIUS_MAX: f32 = 10.0;
/// Symmetric clamp applied to every connection weight.
pub const WEIGHT_LIMIT: f32 = 5.0;
/// Number of addressable broadcast channels.
pub const BROADCAST_CHANNELS: u8 = 4;
/// Fixed inputs prepended to every brain: bias plus one uniform-random tap.
pub const BASE_INPUTS: usize = 2;

const RAY_COUNT_MAX: u32 = 16;

/// Sense organs a creature can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorGene {
    /// Cone of rays reporting the nearest hit per ray.
    RayVision {
        rays: u32,
        fov: f32,
        max_distance: f32,
        offset: f32,
    },
    /// Boolean overlap with food, creatures, and obstacles.
    Touch,
    /// Own energy normalized by the configured maximum.
    EnergySense,
    /// Per-channel nearest-broadcaster strength and bearing.
    BroadcastReceiver { channels: Vec<u8> },
}

impl SensorGene {
    /// Number of brain input slots this sensor occupies.
    #[must_use]
    pub fn input_width(&self) -> usize {
        match self {
            Self::RayVision { rays, .. } => *rays as usize * 4,
            Self::Touch => 3,
            Self::EnergySense => 1,
            Self::BroadcastReceiver { channels } => channels.len() * 2,
        }
    }
}

/// Action organs a creature can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorGene {
    /// Forward/reverse thrust plus turning; occupies two output slots.
    Move,
    Attack,
    Eat,
    Donate,
    Broadcast { channel: u8 },
}

impl ActuatorGene {
    /// Number of brain output slots this actuator occupies.
    #[must_use]
    pub const fn output_width(&self) -> usize {
        match self {
            Self::Move => 2,
            _ => 1,
        }
    }
}

/// Required brain input count for a sensor set.
#[must_use]
pub fn input_count(sensors: &[SensorGene]) -> usize {
    BASE_INPUTS + sensors.iter().map(SensorGene::input_width).sum::<usize>()
}

/// Required brain output count for an actuator set.
#[must_use]
pub fn output_count(actuators: &[ActuatorGene]) -> usize {
    actuators.iter().map(ActuatorGene::output_width).sum()
}

/// Structural role of a node gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Input,
    Output,
    Hidden,
}

/// Per-node transfer function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
    Linear,
    Step,
}

impl Activation {
    /// Apply the transfer function.
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::Linear => x,
            Self::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn random(rng: &mut Xoshiro128) -> Self {
        const ALL: [Activation; 5] = [
            Activation::Sigmoid,
            Activation::Tanh,
            Activation::Relu,
            Activation::Linear,
            Activation::Step,
        ];
        ALL[rng.index(ALL.len())]
    }
}

/// A neuron gene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    pub id: NodeId,
    pub kind: NodeKind,
    pub activation: Activation,
}

/// A synapse gene aligned across genomes by its innovation number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    pub innovation: Innovation,
    pub from: NodeId,
    pub to: NodeId,
    pub weight: f32,
    pub enabled: bool,
}

/// NEAT network description: node genes, connection genes, and the Hebbian
/// plasticity rate applied at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainGenome {
    pub nodes: Vec<NodeGene>,
    pub connections: Vec<ConnectionGene>,
    pub next_node: NodeId,
    pub plasticity: f32,
}

impl BrainGenome {
    /// Maximum innovation number present, or 0 for an empty genome.
    #[must_use]
    pub fn max_innovation(&self) -> Innovation {
        self.connections
            .iter()
            .map(|c| c.innovation)
            .max()
            .unwrap_or(0)
    }

    fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.connections
            .iter()
            .any(|c| c.from == from && c.to == to)
    }

    fn node_positions(&self, kind: NodeKind) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| (n.kind == kind).then_some(idx))
            .collect()
    }

    fn remove_nodes(&mut self, doomed: &HashSet<NodeId>) {
        self.nodes.retain(|n| !doomed.contains(&n.id));
        self.connections
            .retain(|c| !doomed.contains(&c.from) && !doomed.contains(&c.to));
    }
}

/// Caller-owned registry assigning globally unique innovation numbers.
///
/// The structural-key cache guarantees that the same `(from, to)` mutation
/// occurring independently in different lineages receives the same number,
/// which is what makes NEAT gene alignment work. The cache serializes as a
/// sorted entry list so the snapshot form is canonical.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "LedgerRepr", into = "LedgerRepr")]
pub struct InnovationLedger {
    next: Innovation,
    cache: HashMap<(NodeId, NodeId), Innovation>,
}

#[derive(Serialize, Deserialize)]
struct LedgerRepr {
    next: Innovation,
    entries: Vec<(NodeId, NodeId, Innovation)>,
}

impl From<InnovationLedger> for LedgerRepr {
    fn from(ledger: InnovationLedger) -> Self {
        let mut entries: Vec<(NodeId, NodeId, Innovation)> = ledger
            .cache
            .into_iter()
            .map(|((from, to), innovation)| (from, to, innovation))
            .collect();
        entries.sort_by_key(|&(_, _, innovation)| innovation);
        Self {
            next: ledger.next,
            entries,
        }
    }
}

impl From<LedgerRepr> for InnovationLedger {
    fn from(repr: LedgerRepr) -> Self {
        Self {
            next: repr.next,
            cache: repr
                .entries
                .into_iter()
                .map(|(from, to, innovation)| ((from, to), innovation))
                .collect(),
        }
    }
}

impl InnovationLedger {
    /// Fresh ledger starting at innovation 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            cache: HashMap::new(),
        }
    }

    /// Innovation number for a structural pair, drawing a fresh one on first
    /// sight and returning the cached number afterwards.
    pub fn innovation_for(&mut self, from: NodeId, to: NodeId) -> Innovation {
        if let Some(&existing) = self.cache.get(&(from, to)) {
            return existing;
        }
        let assigned = self.next;
        self.next += 1;
        self.cache.insert((from, to), assigned);
        assigned
    }

    /// Drop all assignments; intended for test isolation.
    pub fn reset(&mut self) {
        self.next = 1;
        self.cache.clear();
    }
}

/// Full heritable description of a creature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dna {
    /// Species tag used for display and friend-or-foe checks.
    pub group_id: u32,
    /// Whether friend-or-foe discrimination is active.
    pub has_iff: bool,
    /// Body radius in world units.
    pub radius: f32,
    pub sensors: Vec<SensorGene>,
    pub actuators: Vec<ActuatorGene>,
    pub brain: BrainGenome,
}

impl Dna {
    /// Baseline genome used to seed populations: ray vision, touch, energy
    /// sense, movement and eating, with a minimal fully connected brain.
    #[must_use]
    pub fn baseline(group_id: u32, rng: &mut Xoshiro128, ledger: &mut InnovationLedger) -> Self {
        let sensors = vec![
            SensorGene::RayVision {
                rays: 4,
                fov: std::f32::consts::FRAC_PI_2,
                max_distance: 120.0,
                offset: 0.0,
            },
            SensorGene::Touch,
            SensorGene::EnergySense,
        ];
        let actuators = vec![ActuatorGene::Move, ActuatorGene::Eat, ActuatorGene::Attack];
        let brain = minimal_brain(&sensors, &actuators, rng, ledger);
        Self {
            group_id,
            has_iff: false,
            radius: 5.0,
            sensors,
            actuators,
            brain,
        }
    }

    /// Total ray count across all vision sensors (drives the vision upkeep
    /// cost).
    #[must_use]
    pub fn total_rays(&self) -> u32 {
        self.sensors
            .iter()
            .map(|s| match s {
                SensorGene::RayVision { rays, .. } => *rays,
                _ => 0,
            })
            .sum()
    }

    /// Required brain input count for this sensor set.
    #[must_use]
    pub fn input_count(&self) -> usize {
        input_count(&self.sensors)
    }

    /// Required brain output count for this actuator set.
    #[must_use]
    pub fn output_count(&self) -> usize {
        output_count(&self.actuators)
    }
}

/// Minimal brain for the given organs: one input node per required input,
/// one output node per required output, fully connected with small random
/// weights, every edge registered with the ledger.
#[must_use]
pub fn minimal_brain(
    sensors: &[SensorGene],
    actuators: &[ActuatorGene],
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) -> BrainGenome {
    let n_in = input_count(sensors) as NodeId;
    let n_out = output_count(actuators) as NodeId;
    let mut nodes = Vec::with_capacity((n_in + n_out) as usize);
    for id in 0..n_in {
        nodes.push(NodeGene {
            id,
            kind: NodeKind::Input,
            activation: Activation::Linear,
        });
    }
    for id in n_in..n_in + n_out {
        nodes.push(NodeGene {
            id,
            kind: NodeKind::Output,
            activation: Activation::Tanh,
        });
    }
    let mut connections = Vec::with_capacity((n_in * n_out) as usize);
    for from in 0..n_in {
        for to in n_in..n_in + n_out {
            connections.push(ConnectionGene {
                innovation: ledger.innovation_for(from, to),
                from,
                to,
                weight: rng.range(-0.5, 0.5),
                enabled: true,
            });
        }
    }
    BrainGenome {
        nodes,
        connections,
        next_node: n_in + n_out,
        plasticity: 0.0,
    }
}

fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    } else if a < -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    }
    a
}

fn default_ray_vision() -> SensorGene {
    SensorGene::RayVision {
        rays: 4,
        fov: std::f32::consts::FRAC_PI_2,
        max_distance: 120.0,
        offset: 0.0,
    }
}

fn same_sensor_kind(a: &SensorGene, b: &SensorGene) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn same_actuator_kind(a: &ActuatorGene, b: &ActuatorGene) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Mutate a parent genome into an independent child.
///
/// Body and organ fields jitter at scaled fractions of `rate`; the brain
/// receives NEAT structural mutations; a reconciliation pass then restores
/// the input/output count invariants for the possibly changed organ sets.
#[must_use]
pub fn mutate_dna(
    parent: &Dna,
    rate: f32,
    strength: f32,
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) -> Dna {
    let mut child = parent.clone();

    child.radius = (child.radius + rng.gaussian(0.0, strength)).clamp(RADIUS_MIN, RADIUS_MAX);
    if rng.chance(rate / 5.0) {
        child.has_iff = !child.has_iff;
    }

    for sensor in &mut child.sensors {
        match sensor {
            SensorGene::RayVision {
                rays,
                fov,
                max_distance,
                offset,
            } => {
                if rng.chance(rate) {
                    *fov = (*fov + rng.gaussian(0.0, strength * 0.2)).clamp(0.1, std::f32::consts::TAU);
                }
                if rng.chance(rate) {
                    *max_distance = (*max_distance + rng.gaussian(0.0, strength * 10.0)).clamp(1.0, 1_000.0);
                }
                if rng.chance(rate) {
                    *offset = wrap_angle(*offset + rng.gaussian(0.0, strength * 0.2));
                }
                if rng.chance(rate / 2.0) {
                    let delta = if rng.chance(0.5) { 1 } else { -1 };
                    *rays = rays.saturating_add_signed(delta).clamp(1, RAY_COUNT_MAX);
                }
            }
            SensorGene::BroadcastReceiver { channels } => {
                if rng.chance(rate / 2.0) {
                    let candidates: Vec<u8> = (0..BROADCAST_CHANNELS)
                        .filter(|c| !channels.contains(c))
                        .collect();
                    if let Some(&channel) = rng.pick(&candidates) {
                        channels.push(channel);
                    }
                }
                if rng.chance(rate / 2.0) && !channels.is_empty() {
                    let idx = rng.index(channels.len());
                    channels.remove(idx);
                }
            }
            SensorGene::Touch | SensorGene::EnergySense => {}
        }
    }

    if rng.chance(rate / 3.0) {
        let mut additions: Vec<SensorGene> = Vec::new();
        if !child
            .sensors
            .iter()
            .any(|s| matches!(s, SensorGene::RayVision { .. }))
        {
            additions.push(default_ray_vision());
        }
        if !child.sensors.iter().any(|s| matches!(s, SensorGene::Touch)) {
            additions.push(SensorGene::Touch);
        }
        if !child
            .sensors
            .iter()
            .any(|s| matches!(s, SensorGene::EnergySense))
        {
            additions.push(SensorGene::EnergySense);
        }
        if !child
            .sensors
            .iter()
            .any(|s| matches!(s, SensorGene::BroadcastReceiver { .. }))
        {
            additions.push(SensorGene::BroadcastReceiver { channels: vec![0] });
        }
        if let Some(added) = rng.pick(&additions) {
            child.sensors.push(added.clone());
        }
    }
    if rng.chance(rate / 3.0) {
        let removable: Vec<usize> = child
            .sensors
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| (!matches!(s, SensorGene::EnergySense)).then_some(idx))
            .collect();
        if let Some(&idx) = rng.pick(&removable) {
            child.sensors.remove(idx);
        }
    }

    if rng.chance(rate / 4.0) {
        let mut additions: Vec<ActuatorGene> = Vec::new();
        for candidate in [ActuatorGene::Attack, ActuatorGene::Eat, ActuatorGene::Donate] {
            if !child.actuators.contains(&candidate) {
                additions.push(candidate);
            }
        }
        if !child
            .actuators
            .iter()
            .any(|a| matches!(a, ActuatorGene::Broadcast { .. }))
        {
            additions.push(ActuatorGene::Broadcast {
                channel: rng.int_between(0, BROADCAST_CHANNELS as i32 - 1) as u8,
            });
        }
        if let Some(added) = rng.pick(&additions) {
            child.actuators.push(added.clone());
        }
    }
    if rng.chance(rate / 4.0) {
        let removable: Vec<usize> = child
            .actuators
            .iter()
            .enumerate()
            .filter_map(|(idx, a)| (!matches!(a, ActuatorGene::Move)).then_some(idx))
            .collect();
        if let Some(&idx) = rng.pick(&removable) {
            child.actuators.remove(idx);
        }
    }

    mutate_brain(&mut child.brain, rate, strength, rng, ledger);
    reconcile_io(&mut child.brain, &child.sensors, &child.actuators, rng, ledger);
    child
}

fn mutate_brain(
    brain: &mut BrainGenome,
    rate: f32,
    strength: f32,
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) {
    for connection in &mut brain.connections {
        if rng.chance(rate) {
            connection.weight = (connection.weight + rng.gaussian(0.0, strength))
                .clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT);
        }
    }

    if rng.chance(rate * 0.5) {
        add_random_connection(brain, rng, ledger);
    }

    if rng.chance(rate * 0.3) {
        split_random_connection(brain, rng, ledger);
    }

    if rng.chance(rate * 0.1) && !brain.connections.is_empty() {
        let idx = rng.index(brain.connections.len());
        brain.connections[idx].enabled = !brain.connections[idx].enabled;
    }

    if rng.chance(rate * 0.1) {
        let hidden: Vec<usize> = brain.node_positions(NodeKind::Hidden);
        if let Some(&idx) = rng.pick(&hidden) {
            brain.nodes[idx].activation = Activation::random(rng);
        }
    }

    if rng.chance(rate) {
        brain.plasticity = (brain.plasticity + rng.gaussian(0.0, strength * 0.1)).clamp(0.0, 1.0);
    }
}

fn add_random_connection(
    brain: &mut BrainGenome,
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) {
    let targets: Vec<NodeId> = brain
        .nodes
        .iter()
        .filter(|n| n.kind != NodeKind::Input)
        .map(|n| n.id)
        .collect();
    if brain.nodes.is_empty() || targets.is_empty() {
        return;
    }
    for _ in 0..16 {
        let from = brain.nodes[rng.index(brain.nodes.len())].id;
        let to = targets[rng.index(targets.len())];
        if from == to || brain.has_edge(from, to) {
            continue;
        }
        brain.connections.push(ConnectionGene {
            innovation: ledger.innovation_for(from, to),
            from,
            to,
            weight: rng.range(-1.0, 1.0),
            enabled: true,
        });
        return;
    }
}

fn split_random_connection(
    brain: &mut BrainGenome,
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) {
    let enabled: Vec<usize> = brain
        .connections
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| c.enabled.then_some(idx))
        .collect();
    let Some(&idx) = rng.pick(&enabled) else {
        return;
    };
    let original = brain.connections[idx];
    brain.connections[idx].enabled = false;

    let node_id = brain.next_node;
    brain.next_node += 1;
    brain.nodes.push(NodeGene {
        id: node_id,
        kind: NodeKind::Hidden,
        activation: Activation::random(rng),
    });
    brain.connections.push(ConnectionGene {
        innovation: ledger.innovation_for(original.from, node_id),
        from: original.from,
        to: node_id,
        weight: 1.0,
        enabled: true,
    });
    brain.connections.push(ConnectionGene {
        innovation: ledger.innovation_for(node_id, original.to),
        from: node_id,
        to: original.to,
        weight: original.weight,
        enabled: true,
    });
}

/// Restore the input/output count invariants after organ changes.
///
/// Surplus nodes are dropped from the tail of their class together with every
/// connection touching them; missing nodes are appended with fresh ids and
/// wired to the opposite side with small random weights, mirroring
/// [`minimal_brain`].
pub fn reconcile_io(
    brain: &mut BrainGenome,
    sensors: &[SensorGene],
    actuators: &[ActuatorGene],
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) {
    let want_in = input_count(sensors);
    let want_out = output_count(actuators);

    let ins = brain.node_positions(NodeKind::Input);
    if ins.len() > want_in {
        let doomed: HashSet<NodeId> = ins[want_in..]
            .iter()
            .map(|&idx| brain.nodes[idx].id)
            .collect();
        brain.remove_nodes(&doomed);
    } else {
        for _ in ins.len()..want_in {
            let id = brain.next_node;
            brain.next_node += 1;
            brain.nodes.push(NodeGene {
                id,
                kind: NodeKind::Input,
                activation: Activation::Linear,
            });
            let outputs: Vec<NodeId> = brain
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Output)
                .map(|n| n.id)
                .collect();
            for to in outputs {
                brain.connections.push(ConnectionGene {
                    innovation: ledger.innovation_for(id, to),
                    from: id,
                    to,
                    weight: rng.range(-0.5, 0.5),
                    enabled: true,
                });
            }
        }
    }

    let outs = brain.node_positions(NodeKind::Output);
    if outs.len() > want_out {
        let doomed: HashSet<NodeId> = outs[want_out..]
            .iter()
            .map(|&idx| brain.nodes[idx].id)
            .collect();
        brain.remove_nodes(&doomed);
    } else {
        for _ in outs.len()..want_out {
            let id = brain.next_node;
            brain.next_node += 1;
            brain.nodes.push(NodeGene {
                id,
                kind: NodeKind::Output,
                activation: Activation::Tanh,
            });
            let inputs: Vec<NodeId> = brain
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Input)
                .map(|n| n.id)
                .collect();
            for from in inputs {
                brain.connections.push(ConnectionGene {
                    innovation: ledger.innovation_for(from, id),
                    from,
                    to: id,
                    weight: rng.range(-0.5, 0.5),
                    enabled: true,
                });
            }
        }
    }
}

/// NEAT crossover of two brain genomes.
///
/// Matching genes (shared innovation) come from either parent with a 60%
/// bias toward the fitter one, and stay disabled with 75% probability when
/// either copy is disabled. Disjoint and excess genes come from the fitter
/// parent only, or from both when fitness is exactly equal.
#[must_use]
pub fn crossover_brain(
    a: &BrainGenome,
    b: &BrainGenome,
    fitness_a: f32,
    fitness_b: f32,
    rng: &mut Xoshiro128,
) -> BrainGenome {
    let (fit, other, equal) = if fitness_b > fitness_a {
        (b, a, false)
    } else {
        (a, b, fitness_a == fitness_b)
    };

    let by_innovation = |g: &BrainGenome| -> BTreeMap<Innovation, ConnectionGene> {
        g.connections.iter().map(|c| (c.innovation, *c)).collect()
    };
    let fit_genes = by_innovation(fit);
    let other_genes = by_innovation(other);

    let mut innovations: Vec<Innovation> = fit_genes
        .keys()
        .chain(other_genes.keys())
        .copied()
        .collect();
    innovations.sort_unstable();
    innovations.dedup();

    let mut connections = Vec::new();
    for innovation in innovations {
        match (fit_genes.get(&innovation), other_genes.get(&innovation)) {
            (Some(fit_gene), Some(other_gene)) => {
                let mut gene = if rng.chance(0.6) { *fit_gene } else { *other_gene };
                if (!fit_gene.enabled || !other_gene.enabled) && rng.chance(0.75) {
                    gene.enabled = false;
                }
                connections.push(gene);
            }
            (Some(fit_gene), None) => connections.push(*fit_gene),
            (None, Some(other_gene)) => {
                if equal {
                    connections.push(*other_gene);
                }
            }
            (None, None) => unreachable!(),
        }
    }

    let referenced: HashSet<NodeId> = connections
        .iter()
        .flat_map(|c| [c.from, c.to])
        .collect();
    let mut nodes: Vec<NodeGene> = fit
        .nodes
        .iter()
        .filter(|n| n.kind != NodeKind::Hidden || referenced.contains(&n.id))
        .copied()
        .collect();
    let present: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
    for node in &other.nodes {
        if referenced.contains(&node.id) && !present.contains(&node.id) {
            nodes.push(*node);
        }
    }

    BrainGenome {
        nodes,
        connections,
        next_node: fit.next_node.max(other.next_node),
        plasticity: if rng.chance(0.5) {
            fit.plasticity
        } else {
            other.plasticity
        },
    }
}

/// Full-DNA crossover: averaged body, fitness-biased flags, organ-set union
/// with randomized overrides, NEAT brain crossover, then reconciliation.
#[must_use]
pub fn crossover_dna(
    a: &Dna,
    b: &Dna,
    fitness_a: f32,
    fitness_b: f32,
    rng: &mut Xoshiro128,
    ledger: &mut InnovationLedger,
) -> Dna {
    let (fit, other) = if fitness_b > fitness_a { (b, a) } else { (a, b) };

    let radius = ((a.radius + b.radius) * 0.5).clamp(RADIUS_MIN, RADIUS_MAX);
    let group_id = fit.group_id;
    let has_iff = if rng.chance(0.8) { fit.has_iff } else { other.has_iff };

    let mut sensors: Vec<SensorGene> = Vec::new();
    for sensor in &fit.sensors {
        let inherited = match other.sensors.iter().find(|o| same_sensor_kind(sensor, o)) {
            Some(counterpart) if rng.chance(0.5) => counterpart.clone(),
            _ => sensor.clone(),
        };
        sensors.push(inherited);
    }
    for sensor in &other.sensors {
        if !sensors.iter().any(|s| same_sensor_kind(s, sensor)) && rng.chance(0.5) {
            sensors.push(sensor.clone());
        }
    }
    if !sensors.iter().any(|s| matches!(s, SensorGene::EnergySense)) {
        sensors.push(SensorGene::EnergySense);
    }

    let mut actuators: Vec<ActuatorGene> = Vec::new();
    for actuator in &fit.actuators {
        let inherited = match other
            .actuators
            .iter()
            .find(|o| same_actuator_kind(actuator, o))
        {
            Some(counterpart) if rng.chance(0.5) => counterpart.clone(),
            _ => actuator.clone(),
        };
        actuators.push(inherited);
    }
    for actuator in &other.actuators {
        if !actuators.iter().any(|s| same_actuator_kind(s, actuator)) && rng.chance(0.5) {
            actuators.push(actuator.clone());
        }
    }
    if !actuators.iter().any(|a| matches!(a, ActuatorGene::Move)) {
        actuators.insert(0, ActuatorGene::Move);
    }

    let mut brain = crossover_brain(&a.brain, &b.brain, fitness_a, fitness_b, rng);
    reconcile_io(&mut brain, &sensors, &actuators, rng, ledger);

    Dna {
        group_id,
        has_iff,
        radius,
        sensors,
        actuators,
        brain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rng() -> Xoshiro128 {
        Xoshiro128::new(0xBADC_0FFE)
    }

    #[test]
    fn io_widths_sum_per_organ() {
        let sensors = vec![
            SensorGene::RayVision {
                rays: 3,
                fov: 1.0,
                max_distance: 100.0,
                offset: 0.0,
            },
            SensorGene::Touch,
            SensorGene::EnergySense,
            SensorGene::BroadcastReceiver {
                channels: vec![0, 2],
            },
        ];
        assert_eq!(input_count(&sensors), 2 + 12 + 3 + 1 + 4);

        let actuators = vec![
            ActuatorGene::Move,
            ActuatorGene::Attack,
            ActuatorGene::Eat,
            ActuatorGene::Donate,
            ActuatorGene::Broadcast { channel: 1 },
        ];
        assert_eq!(output_count(&actuators), 2 + 1 + 1 + 1 + 1);
    }

    #[test]
    fn minimal_brain_is_fully_connected() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let sensors = vec![SensorGene::EnergySense];
        let actuators = vec![ActuatorGene::Move];
        let brain = minimal_brain(&sensors, &actuators, &mut rng, &mut ledger);

        assert_eq!(brain.node_positions(NodeKind::Input).len(), 3);
        assert_eq!(brain.node_positions(NodeKind::Output).len(), 2);
        assert_eq!(brain.connections.len(), 6);
        assert!(brain.connections.iter().all(|c| c.enabled));
        assert!(
            brain
                .connections
                .iter()
                .all(|c| c.weight.abs() <= WEIGHT_LIMIT)
        );
        let unique: HashSet<Innovation> =
            brain.connections.iter().map(|c| c.innovation).collect();
        assert_eq!(unique.len(), brain.connections.len());
    }

    #[test]
    fn ledger_shares_innovations_across_lineages() {
        let mut ledger = InnovationLedger::new();
        let first = ledger.innovation_for(3, 9);
        let unrelated = ledger.innovation_for(4, 9);
        let repeat = ledger.innovation_for(3, 9);
        assert_eq!(first, repeat);
        assert_ne!(first, unrelated);

        ledger.reset();
        assert_eq!(ledger.innovation_for(3, 9), first);
    }

    #[test]
    fn ledger_serde_preserves_counter_and_cache() {
        let mut ledger = InnovationLedger::new();
        ledger.innovation_for(0, 5);
        ledger.innovation_for(1, 5);
        let json = serde_json::to_string(&ledger).expect("serialize");
        let mut restored: InnovationLedger = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.innovation_for(0, 5), ledger.innovation_for(0, 5));
        assert_eq!(restored.innovation_for(9, 9), ledger.innovation_for(9, 9));
    }

    #[test]
    fn mutation_preserves_genome_invariants() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let mut dna = Dna::baseline(0, &mut rng, &mut ledger);

        for _ in 0..200 {
            dna = mutate_dna(&dna, 0.8, 0.6, &mut rng, &mut ledger);

            assert!((RADIUS_MIN..=RADIUS_MAX).contains(&dna.radius));
            assert!(dna.sensors.iter().any(|s| matches!(s, SensorGene::EnergySense)));
            assert!(dna.actuators.iter().any(|a| matches!(a, ActuatorGene::Move)));
            assert_eq!(
                dna.brain.node_positions(NodeKind::Input).len(),
                dna.input_count()
            );
            assert_eq!(
                dna.brain.node_positions(NodeKind::Output).len(),
                dna.output_count()
            );
            assert!(
                dna.brain
                    .connections
                    .iter()
                    .all(|c| c.weight.abs() <= WEIGHT_LIMIT)
            );
            assert!((0.0..=1.0).contains(&dna.brain.plasticity));

            // No dangling endpoints, no duplicate structural pairs.
            let ids: HashSet<NodeId> = dna.brain.nodes.iter().map(|n| n.id).collect();
            let mut pairs = HashSet::new();
            for c in &dna.brain.connections {
                assert!(ids.contains(&c.from) && ids.contains(&c.to));
                assert!(pairs.insert((c.from, c.to)), "duplicate edge {:?}", (c.from, c.to));
                assert_ne!(c.from, c.to, "self-loop");
            }
            // No edges into inputs.
            let inputs: HashSet<NodeId> = dna
                .brain
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Input)
                .map(|n| n.id)
                .collect();
            assert!(dna.brain.connections.iter().all(|c| !inputs.contains(&c.to)));
        }
    }

    #[test]
    fn mutation_leaves_the_parent_untouched() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let parent = Dna::baseline(7, &mut rng, &mut ledger);
        let before = parent.clone();
        let _child = mutate_dna(&parent, 1.0, 1.0, &mut rng, &mut ledger);
        assert_eq!(parent, before);
    }

    #[test]
    fn split_disables_original_and_bridges_through_fresh_node() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let mut brain = minimal_brain(
            &[SensorGene::EnergySense],
            &[ActuatorGene::Eat],
            &mut rng,
            &mut ledger,
        );
        let original = brain.connections[0];
        // Force the split on the first (only remaining enabled) connection.
        for c in brain.connections.iter_mut().skip(1) {
            c.enabled = false;
        }
        split_random_connection(&mut brain, &mut rng, &mut ledger);

        let disabled = brain
            .connections
            .iter()
            .find(|c| c.innovation == original.innovation)
            .expect("original kept");
        assert!(!disabled.enabled);

        let hidden = brain
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Hidden)
            .expect("hidden node added");
        let incoming = brain
            .connections
            .iter()
            .find(|c| c.to == hidden.id)
            .expect("incoming bridge");
        let outgoing = brain
            .connections
            .iter()
            .find(|c| c.from == hidden.id)
            .expect("outgoing bridge");
        assert_eq!(incoming.weight, 1.0);
        assert_eq!(outgoing.weight, original.weight);
        assert_ne!(incoming.innovation, outgoing.innovation);
    }

    #[test]
    fn crossover_takes_disjoint_genes_from_the_fitter_parent() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let base = minimal_brain(
            &[SensorGene::EnergySense],
            &[ActuatorGene::Eat],
            &mut rng,
            &mut ledger,
        );
        let mut enriched = base.clone();
        split_random_connection(&mut enriched, &mut rng, &mut ledger);

        let child = crossover_brain(&enriched, &base, 2.0, 1.0, &mut rng);
        let child_innovations: HashSet<Innovation> =
            child.connections.iter().map(|c| c.innovation).collect();
        for c in &enriched.connections {
            assert!(child_innovations.contains(&c.innovation));
        }

        // The weaker parent's extra structure is not inherited.
        let child2 = crossover_brain(&enriched, &base, 1.0, 2.0, &mut rng);
        let base_innovations: HashSet<Innovation> =
            base.connections.iter().map(|c| c.innovation).collect();
        assert!(
            child2
                .connections
                .iter()
                .all(|c| base_innovations.contains(&c.innovation))
        );
    }

    #[test]
    fn equal_fitness_inherits_from_both_parents() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let base = minimal_brain(
            &[SensorGene::EnergySense],
            &[ActuatorGene::Eat],
            &mut rng,
            &mut ledger,
        );
        let mut left = base.clone();
        let mut right = base.clone();
        add_random_connection(&mut left, &mut rng, &mut ledger);
        split_random_connection(&mut right, &mut rng, &mut ledger);

        let child = crossover_brain(&left, &right, 1.0, 1.0, &mut rng);
        let child_innovations: HashSet<Innovation> =
            child.connections.iter().map(|c| c.innovation).collect();
        for c in left.connections.iter().chain(right.connections.iter()) {
            assert!(child_innovations.contains(&c.innovation));
        }
    }

    #[test]
    fn dna_crossover_guarantees_core_organs_and_reconciled_io() {
        let mut rng = test_rng();
        let mut ledger = InnovationLedger::new();
        let a = Dna::baseline(1, &mut rng, &mut ledger);
        let mut b = Dna::baseline(2, &mut rng, &mut ledger);
        for _ in 0..20 {
            b = mutate_dna(&b, 0.9, 0.5, &mut rng, &mut ledger);
        }

        for _ in 0..50 {
            let child = crossover_dna(&a, &b, 1.0, 3.0, &mut rng, &mut ledger);
            assert_eq!(child.group_id, b.group_id);
            assert!(child.sensors.iter().any(|s| matches!(s, SensorGene::EnergySense)));
            assert!(child.actuators.iter().any(|x| matches!(x, ActuatorGene::Move)));
            assert_eq!(
                child.brain.node_positions(NodeKind::Input).len(),
                child.input_count()
            );
            assert_eq!(
                child.brain.node_positions(NodeKind::Output).len(),
                child.output_count()
            );
            assert!((RADIUS_MIN..=RADIUS_MAX).contains(&child.radius));
        }
    }
}
