use serde::{Deserialize, Serialize};

use crate::config::CellCycleModelKind;

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World & Grid
    pub world_width: f32,  // x extent (cell diameters)
    pub world_depth: f32,  // y extent
    pub world_height: f32, // z extent (height axis)
    pub grid_cell_size: f32,
    pub inv_grid_cell_size: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub grid_dim_z: u32,
    pub num_grid_cells: u32,

    // Time (hours)
    pub dt: f32,
    pub time_step: u32, // Current simulation step number

    // Interaction geometry
    pub interaction_radius: f32, // Neighbor-pair enumeration range
    pub interaction_radius_sq: f32,
    pub default_radius: f32, // Physical radius assigned to new cells

    // Spring mechanics
    pub cell_cell_stiffness: f32,
    pub cell_ecm_stiffness: f32,
    pub ecm_ecm_stiffness: f32,
    pub homotypic_multiplier: f32,
    pub heterotypic_multiplier: f32,
    pub rest_length: f32,            // Base rest length; cell radii derive from it
    pub cell_ecm_rest_length: f32,   // Final rest length for cell-ECM pairs
    pub ecm_ecm_rest_length: f32,    // Final rest length for ECM-ECM pairs
    pub division_rest_length: f32,   // Initial rest-length fraction for fresh sibling pairs
    pub spring_growth_duration: f32, // Hours over which the sibling rest length regrows
    pub cutoff_length: Option<f32>,  // Beyond this separation the force is zero
    pub decay_alpha: f32,            // Exponential decay rate of the repulsion/attraction law
    pub damping: f32,                // Drag coefficient for overdamped integration

    // Apoptosis
    pub apoptosis_duration: f32, // Hours from onset to removal

    // Cell cycle (hours)
    pub cycle_model: CellCycleModelKind,
    pub m_duration: f32,
    pub s_duration: f32,
    pub g2_duration: f32,
    pub min_g1_duration: f32,
    pub max_g1_duration: f32,
    pub quiescent_height_fraction: Option<f32>,
    pub equilibrium_height: Option<f32>,

    // Anoikis
    pub anoikis_enabled: bool,
    pub anoikis_height_threshold: f32,
    pub anoikis_rate_per_hr: f32,
}
