//! Evaluatable form of a brain genome.
//!
//! Nodes are assigned contiguous slots (inputs, then outputs, then hidden, in
//! genome order) and connections are flattened into parallel arrays for
//! linear-scan evaluation. The acyclic portion of the graph is ordered with
//! Kahn's algorithm; nodes left unresolved by a cycle are appended in node-id
//! order and read whatever partial accumulation exists when their turn comes.

use crate::genome::{Activation, BrainGenome, NodeKind, WEIGHT_LIMIT};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct FlatConnection {
    from: usize,
    to: usize,
    weight: f32,
    enabled: bool,
}

/// Compiled, evaluatable brain.
#[derive(Debug, Clone)]
pub struct BrainRuntime {
    input_count: usize,
    output_count: usize,
    activations: Vec<f32>,
    previous: Vec<f32>,
    functions: Vec<Activation>,
    connections: Vec<FlatConnection>,
    order: Vec<usize>,
    plasticity: f32,
}

impl BrainRuntime {
    /// Compile a genome. Connections referencing pruned nodes are skipped.
    #[must_use]
    pub fn compile(genome: &BrainGenome) -> Self {
        let inputs: Vec<&_> = genome
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Input)
            .collect();
        let outputs: Vec<&_> = genome
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Output)
            .collect();
        let hidden: Vec<&_> = genome
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Hidden)
            .collect();

        let mut slot_of = HashMap::new();
        let mut functions = Vec::with_capacity(genome.nodes.len());
        let mut node_ids = Vec::with_capacity(genome.nodes.len());
        for node in inputs.iter().chain(outputs.iter()).chain(hidden.iter()) {
            slot_of.insert(node.id, functions.len());
            functions.push(node.activation);
            node_ids.push(node.id);
        }

        let connections: Vec<FlatConnection> = genome
            .connections
            .iter()
            .filter_map(|c| {
                let from = *slot_of.get(&c.from)?;
                let to = *slot_of.get(&c.to)?;
                Some(FlatConnection {
                    from,
                    to,
                    weight: c.weight,
                    enabled: c.enabled,
                })
            })
            .collect();

        let input_count = inputs.len();
        let total = functions.len();
        let order = evaluation_order(total, input_count, &connections, &node_ids);

        Self {
            input_count,
            output_count: outputs.len(),
            activations: vec![0.0; total],
            previous: vec![0.0; total],
            functions,
            connections,
            order,
            plasticity: genome.plasticity,
        }
    }

    /// Number of input slots.
    #[must_use]
    pub const fn input_count(&self) -> usize {
        self.input_count
    }

    /// Number of output slots.
    #[must_use]
    pub const fn output_count(&self) -> usize {
        self.output_count
    }

    /// Connection weights in genome order, for persisting Hebbian state.
    #[must_use]
    pub fn weights(&self) -> Vec<f32> {
        self.connections.iter().map(|c| c.weight).collect()
    }

    /// Restore previously persisted weights. A length mismatch (stale data
    /// from an older genome shape) is silently ignored.
    pub fn restore_weights(&mut self, weights: &[f32]) {
        if weights.len() != self.connections.len() {
            return;
        }
        for (connection, &weight) in self.connections.iter_mut().zip(weights) {
            connection.weight = weight;
        }
    }

    /// Run one forward pass and return the output slice.
    ///
    /// Deterministic for identical inputs and weights. Activations from the
    /// previous pass are snapshotted before evaluation.
    pub fn forward(&mut self, inputs: &[f32]) -> &[f32] {
        self.previous.copy_from_slice(&self.activations);

        for slot in 0..self.input_count {
            self.activations[slot] = inputs.get(slot).copied().unwrap_or(0.0);
        }
        for slot in self.input_count..self.activations.len() {
            self.activations[slot] = 0.0;
        }

        for &node in &self.order {
            let mut sum = 0.0;
            for connection in &self.connections {
                if connection.enabled && connection.to == node {
                    sum += connection.weight * self.activations[connection.from];
                }
            }
            self.activations[node] = self.functions[node].apply(sum);
        }

        &self.activations[self.input_count..self.input_count + self.output_count]
    }

    /// Activation values of the pass before the most recent one.
    #[must_use]
    pub fn previous_activations(&self) -> &[f32] {
        &self.previous
    }

    /// Hebbian weight update: `w += plasticity * pre * post * modulator`,
    /// clamped to the global weight limit. No-op at zero plasticity.
    pub fn hebbian_update(&mut self, modulator: f32) {
        if self.plasticity == 0.0 {
            return;
        }
        for connection in &mut self.connections {
            if !connection.enabled {
                continue;
            }
            let pre = self.activations[connection.from];
            let post = self.activations[connection.to];
            connection.weight = (connection.weight + self.plasticity * pre * post * modulator)
                .clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT);
        }
    }
}

/// Kahn's topological sort over enabled edges whose target is not an input,
/// restricted to non-input nodes. Cyclic leftovers are appended in node-id
/// order.
fn evaluation_order(
    total: usize,
    input_count: usize,
    connections: &[FlatConnection],
    node_ids: &[u32],
) -> Vec<usize> {
    // Input slots are resolved sources; only edges between non-input nodes
    // constitute ordering dependencies.
    let mut in_degree = vec![0usize; total];
    for connection in connections {
        if connection.enabled && connection.to >= input_count && connection.from >= input_count {
            in_degree[connection.to] += 1;
        }
    }

    let mut order = Vec::with_capacity(total - input_count);
    let mut queue: Vec<usize> = (input_count..total)
        .filter(|&slot| in_degree[slot] == 0)
        .collect();
    let mut resolved = vec![false; total];
    let mut cursor = 0;
    while cursor < queue.len() {
        let node = queue[cursor];
        cursor += 1;
        resolved[node] = true;
        order.push(node);
        for connection in connections {
            if connection.enabled
                && connection.from == node
                && connection.to >= input_count
                && connection.to != node
                && !resolved[connection.to]
            {
                in_degree[connection.to] -= 1;
                if in_degree[connection.to] == 0 {
                    queue.push(connection.to);
                }
            }
        }
    }

    let mut leftovers: Vec<usize> = (input_count..total).filter(|&s| !resolved[s]).collect();
    leftovers.sort_by_key(|&slot| node_ids[slot]);
    order.extend(leftovers);
    order
}
