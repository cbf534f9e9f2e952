//! Evolution machinery for Vivarium: the deterministic PRNG, the NEAT genome
//! model with innovation-number alignment, the compiled brain runtime, and
//! speciation.

pub mod genome;
pub mod rng;
pub mod runtime;
pub mod species;

pub use genome::{
    Activation, ActuatorGene, BASE_INPUTS, BROADCAST_CHANNELS, BrainGenome, ConnectionGene, Dna,
    Innovation, InnovationLedger, NodeGene, NodeId, NodeKind, RADIUS_MAX, RADIUS_MIN, SensorGene,
    WEIGHT_LIMIT, crossover_brain, crossover_dna, input_count, minimal_brain, mutate_dna,
    output_count, reconcile_io,
};
pub use rng::Xoshiro128;
pub use runtime::BrainRuntime;
pub use species::{
    SpeciationConfig, SpeciationState, Species, SpeciesMember, adjusted_fitness, assign_species,
    compatibility_distance, update_stagnation,
};
