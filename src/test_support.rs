//! Shared fixtures for the inline test modules.

use organoid_common::config::*;

/// A complete configuration with small, round-number parameters.
pub fn test_config() -> SimulationConfig {
    SimulationConfig {
        universe: UniverseConfig { width: 10.0, depth: 10.0, height: 5.0 },
        timing: TimingConfig {
            dt_hours: 0.01,
            total_time_hours: 1.0,
            record_interval_hours: 0.1,
        },
        initial_conditions: InitialConditions {
            num_luminal: 4,
            num_myoepithelial: 4,
            num_luminal_stem: 0,
            num_myoepithelial_stem: 0,
            num_ecm_particles: 0,
            ecm_plane_height: 0.0,
            placement_seed: 42,
        },
        mechanics: MechanicsConfig {
            cell_cell_stiffness: 15.0,
            cell_ecm_stiffness: 15.0,
            ecm_ecm_stiffness: 15.0,
            homotypic_multiplier: 1.0,
            heterotypic_multiplier: 0.1,
            rest_length: 1.0,
            cell_ecm_rest_length: 1.0,
            ecm_ecm_rest_length: 1.0,
            division_rest_length: 0.5,
            spring_growth_duration: 1.0,
            cutoff_length: None,
            damping: 1.0,
            apoptosis_duration_hours: 0.25,
        },
        cell_cycle: CellCycleConfig {
            model: CellCycleModelKind::Stochastic,
            m_duration_hours: 1.0,
            s_duration_hours: 5.0,
            g2_duration_hours: 4.0,
            min_g1_duration_hours: 4.0,
            max_g1_duration_hours: 8.0,
            quiescent_height_fraction: None,
            equilibrium_height: None,
        },
        experiment: ExperimentConfig::default(),
        anoikis: AnoikisConfig::default(),
        output: OutputConfig {
            base_filename: "test".into(),
            save_positions: false,
            save_stats: false,
            save_positions_in_snapshot: false,
            save_boundary_metrics: false,
            save_adjacency_matrix: false,
            format: None,
        },
    }
}

pub fn test_params() -> organoid_common::SimParams {
    test_config().get_sim_params()
}
