//! Species clustering over brain genomes: compatibility distance, member
//! assignment, fitness sharing, and stagnation culling.

use crate::genome::{BrainGenome, Dna, Innovation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coefficients and limits governing speciation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeciationConfig {
    /// Weight of excess genes (`c1`).
    pub excess_coefficient: f32,
    /// Weight of disjoint genes (`c2`).
    pub disjoint_coefficient: f32,
    /// Weight of the mean matching-gene weight difference (`c3`).
    pub weight_coefficient: f32,
    /// Compatibility distance below which a genome joins a species.
    pub distance_threshold: f32,
    /// Generations without improvement before a species is culled.
    pub stagnation_limit: u32,
}

impl Default for SpeciationConfig {
    fn default() -> Self {
        Self {
            excess_coefficient: 1.0,
            disjoint_coefficient: 1.0,
            weight_coefficient: 0.4,
            distance_threshold: 3.0,
            stagnation_limit: 15,
        }
    }
}

/// A cluster of compatible genomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub id: u64,
    pub representative: Dna,
    pub members: Vec<u64>,
    pub best_fitness: f32,
    pub stagnation: u32,
}

/// All species plus the monotonic id source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciationState {
    pub species: Vec<Species>,
    pub next_id: u64,
}

/// One population member offered to the clustering pass.
#[derive(Debug, Clone, Copy)]
pub struct SpeciesMember<'a> {
    pub id: u64,
    pub dna: &'a Dna,
    pub fitness: f32,
}

/// NEAT compatibility distance between two brain genomes.
///
/// Genes are aligned by innovation number; a gene present in only one genome
/// is excess when its innovation exceeds the other genome's maximum, disjoint
/// otherwise. Symmetric, and zero for identical genomes.
#[must_use]
pub fn compatibility_distance(
    a: &BrainGenome,
    b: &BrainGenome,
    c1: f32,
    c2: f32,
    c3: f32,
) -> f32 {
    let genes_a: BTreeMap<Innovation, f32> = a
        .connections
        .iter()
        .map(|c| (c.innovation, c.weight))
        .collect();
    let genes_b: BTreeMap<Innovation, f32> = b
        .connections
        .iter()
        .map(|c| (c.innovation, c.weight))
        .collect();
    let max_a = a.max_innovation();
    let max_b = b.max_innovation();

    let mut excess = 0usize;
    let mut disjoint = 0usize;
    let mut matching = 0usize;
    let mut weight_diff = 0.0f32;

    for (&innovation, &weight) in &genes_a {
        match genes_b.get(&innovation) {
            Some(&other_weight) => {
                matching += 1;
                weight_diff += (weight - other_weight).abs();
            }
            None if innovation > max_b => excess += 1,
            None => disjoint += 1,
        }
    }
    for &innovation in genes_b.keys() {
        if !genes_a.contains_key(&innovation) {
            if innovation > max_a {
                excess += 1;
            } else {
                disjoint += 1;
            }
        }
    }

    let n = genes_a.len().max(genes_b.len()).max(1) as f32;
    let mean_weight_diff = if matching > 0 {
        weight_diff / matching as f32
    } else {
        0.0
    };
    (c1 * excess as f32 + c2 * disjoint as f32) / n + c3 * mean_weight_diff
}

/// Cluster the population: each member joins the first species whose
/// representative is within the distance threshold, or founds a new one.
/// Species left without members are removed.
pub fn assign_species(
    members: &[SpeciesMember<'_>],
    state: &mut SpeciationState,
    config: &SpeciationConfig,
) {
    for species in &mut state.species {
        species.members.clear();
    }
    for member in members {
        let found = state.species.iter_mut().find(|s| {
            compatibility_distance(
                &member.dna.brain,
                &s.representative.brain,
                config.excess_coefficient,
                config.disjoint_coefficient,
                config.weight_coefficient,
            ) < config.distance_threshold
        });
        match found {
            Some(species) => species.members.push(member.id),
            None => {
                let id = state.next_id;
                state.next_id += 1;
                // f32::MIN rather than -inf keeps the state JSON-serializable.
                state.species.push(Species {
                    id,
                    representative: member.dna.clone(),
                    members: vec![member.id],
                    best_fitness: f32::MIN,
                    stagnation: 0,
                });
            }
        }
    }
    state.species.retain(|s| !s.members.is_empty());
}

/// Fitness shared across a species: `raw / size`, unchanged for a
/// non-positive size.
#[must_use]
pub fn adjusted_fitness(raw: f32, species_size: usize) -> f32 {
    if species_size == 0 {
        raw
    } else {
        raw / species_size as f32
    }
}

/// Advance stagnation counters and cull species that stopped improving.
///
/// A species whose current best fitness beats its all-time best resets its
/// counter, records the new best, and adopts its first current member as the
/// fresh representative. Species at or above the limit are culled, unless
/// that would empty the set entirely, in which case the single best species
/// survives with its counter reset.
pub fn update_stagnation(
    members: &[SpeciesMember<'_>],
    state: &mut SpeciationState,
    stagnation_limit: u32,
) {
    for species in &mut state.species {
        let mut current_best = f32::MIN;
        let mut first_member: Option<&SpeciesMember<'_>> = None;
        for id in &species.members {
            if let Some(member) = members.iter().find(|m| m.id == *id) {
                if first_member.is_none() {
                    first_member = Some(member);
                }
                if member.fitness > current_best {
                    current_best = member.fitness;
                }
            }
        }
        if current_best > species.best_fitness {
            species.best_fitness = current_best;
            species.stagnation = 0;
            if let Some(member) = first_member {
                species.representative = member.dna.clone();
            }
        } else {
            species.stagnation += 1;
        }
    }

    let all_stagnant = state
        .species
        .iter()
        .all(|s| s.stagnation >= stagnation_limit);
    if all_stagnant {
        if let Some(best) = state
            .species
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| {
                x.best_fitness
                    .partial_cmp(&y.best_fitness)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(idx, _)| idx)
        {
            let mut keeper = state.species.swap_remove(best);
            keeper.stagnation = 0;
            state.species = vec![keeper];
        }
    } else {
        state.species.retain(|s| s.stagnation < stagnation_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{
        ActuatorGene, ConnectionGene, Dna, InnovationLedger, SensorGene, minimal_brain, mutate_dna,
    };
    use crate::rng::Xoshiro128;

    fn simple_dna(rng: &mut Xoshiro128, ledger: &mut InnovationLedger) -> Dna {
        let sensors = vec![SensorGene::EnergySense];
        let actuators = vec![ActuatorGene::Move];
        let brain = minimal_brain(&sensors, &actuators, rng, ledger);
        Dna {
            group_id: 0,
            has_iff: false,
            radius: 5.0,
            sensors,
            actuators,
            brain,
        }
    }

    #[test]
    fn identical_genomes_have_zero_distance() {
        let mut rng = Xoshiro128::new(1);
        let mut ledger = InnovationLedger::new();
        let dna = simple_dna(&mut rng, &mut ledger);
        assert_eq!(
            compatibility_distance(&dna.brain, &dna.brain, 1.0, 1.0, 1.0),
            0.0
        );
    }

    #[test]
    fn distance_is_symmetric() {
        let mut rng = Xoshiro128::new(2);
        let mut ledger = InnovationLedger::new();
        let a = simple_dna(&mut rng, &mut ledger);
        let mut b = a.clone();
        for _ in 0..10 {
            b = mutate_dna(&b, 0.9, 0.5, &mut rng, &mut ledger);
        }
        let d_ab = compatibility_distance(&a.brain, &b.brain, 1.0, 1.0, 0.4);
        let d_ba = compatibility_distance(&b.brain, &a.brain, 1.0, 1.0, 0.4);
        assert!((d_ab - d_ba).abs() < 1e-6);
    }

    #[test]
    fn distance_matches_worked_example() {
        // Both genomes share innovations 1 and 2; one carries two more beyond
        // the other's maximum: N = 4, excess = 2, d = 0.5.
        let gene = |innovation, from, to| ConnectionGene {
            innovation,
            from,
            to,
            weight: 1.0,
            enabled: true,
        };
        let small = BrainGenome {
            nodes: Vec::new(),
            connections: vec![gene(1, 0, 1), gene(2, 0, 2)],
            next_node: 3,
            plasticity: 0.0,
        };
        let large = BrainGenome {
            nodes: Vec::new(),
            connections: vec![gene(1, 0, 1), gene(2, 0, 2), gene(3, 1, 2), gene(4, 2, 1)],
            next_node: 3,
            plasticity: 0.0,
        };
        let d = compatibility_distance(&small, &large, 1.0, 1.0, 1.0);
        assert!((d - 0.5).abs() < 1e-6);
    }

    #[test]
    fn uniform_population_forms_a_single_species() {
        let mut rng = Xoshiro128::new(3);
        let mut ledger = InnovationLedger::new();
        let dna = simple_dna(&mut rng, &mut ledger);
        let clones: Vec<Dna> = (0..8).map(|_| dna.clone()).collect();
        let members: Vec<SpeciesMember<'_>> = clones
            .iter()
            .enumerate()
            .map(|(idx, dna)| SpeciesMember {
                id: idx as u64,
                dna,
                fitness: 1.0,
            })
            .collect();

        let mut state = SpeciationState::default();
        assign_species(&members, &mut state, &SpeciationConfig::default());
        assert_eq!(state.species.len(), 1);
        assert_eq!(state.species[0].members.len(), 8);
    }

    #[test]
    fn divergent_genome_founds_a_second_species() {
        let mut rng = Xoshiro128::new(4);
        let mut ledger = InnovationLedger::new();
        let base = simple_dna(&mut rng, &mut ledger);
        let mut mutant = base.clone();
        for _ in 0..40 {
            mutant = mutate_dna(&mutant, 1.0, 1.0, &mut rng, &mut ledger);
        }

        let members = [
            SpeciesMember {
                id: 0,
                dna: &base,
                fitness: 1.0,
            },
            SpeciesMember {
                id: 1,
                dna: &mutant,
                fitness: 1.0,
            },
        ];
        let config = SpeciationConfig {
            distance_threshold: 0.05,
            ..SpeciationConfig::default()
        };
        let mut state = SpeciationState::default();
        assign_species(&members, &mut state, &config);
        assert_eq!(state.species.len(), 2);
        assert_ne!(state.species[0].id, state.species[1].id);
    }

    #[test]
    fn adjusted_fitness_shares_and_guards() {
        assert_eq!(adjusted_fitness(8.0, 4), 2.0);
        assert_eq!(adjusted_fitness(8.0, 0), 8.0);
    }

    #[test]
    fn stagnant_species_are_culled_but_one_survives() {
        let mut rng = Xoshiro128::new(5);
        let mut ledger = InnovationLedger::new();
        let dna_a = simple_dna(&mut rng, &mut ledger);
        let dna_b = simple_dna(&mut rng, &mut ledger);

        let mut state = SpeciationState {
            species: vec![
                Species {
                    id: 0,
                    representative: dna_a.clone(),
                    members: vec![0],
                    best_fitness: 10.0,
                    stagnation: 4,
                },
                Species {
                    id: 1,
                    representative: dna_b.clone(),
                    members: vec![1],
                    best_fitness: 2.0,
                    stagnation: 4,
                },
            ],
            next_id: 2,
        };
        let members = [
            SpeciesMember {
                id: 0,
                dna: &dna_a,
                fitness: 1.0,
            },
            SpeciesMember {
                id: 1,
                dna: &dna_b,
                fitness: 1.0,
            },
        ];

        // Both cross the limit this round; the higher best-fitness species
        // must survive with its counter reset.
        update_stagnation(&members, &mut state, 5);
        assert_eq!(state.species.len(), 1);
        assert_eq!(state.species[0].id, 0);
        assert_eq!(state.species[0].stagnation, 0);
    }

    #[test]
    fn improvement_resets_stagnation_and_updates_best() {
        let mut rng = Xoshiro128::new(6);
        let mut ledger = InnovationLedger::new();
        let dna = simple_dna(&mut rng, &mut ledger);
        let mut state = SpeciationState {
            species: vec![Species {
                id: 0,
                representative: dna.clone(),
                members: vec![7],
                best_fitness: 3.0,
                stagnation: 9,
            }],
            next_id: 1,
        };
        let members = [SpeciesMember {
            id: 7,
            dna: &dna,
            fitness: 5.0,
        }];
        update_stagnation(&members, &mut state, 15);
        assert_eq!(state.species[0].best_fitness, 5.0);
        assert_eq!(state.species[0].stagnation, 0);
    }
}
