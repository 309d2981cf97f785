pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    SimulationConfig, UniverseConfig, TimingConfig, InitialConditions, MechanicsConfig,
    CellCycleConfig, CellCycleModelKind, ExperimentConfig, AnoikisConfig, OutputConfig,
};
pub use sim_params::SimParams;
pub use snapshot::Snapshot;
pub use vecmath::{Vec3, clamp};
