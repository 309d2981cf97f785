use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::SimParams;
use std::path::Path;

// Configuration for universe properties (extents in cell diameters)
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UniverseConfig {
    pub width: f32,
    pub depth: f32,
    pub height: f32,
}

// Configuration for timing (all durations in hours)
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub dt_hours: f32,
    pub total_time_hours: f32,
    pub record_interval_hours: f32,
}

// Initial conditions for the simulation, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    pub num_luminal: u32,
    pub num_myoepithelial: u32,
    #[serde(default)]
    pub num_luminal_stem: u32,
    #[serde(default)]
    pub num_myoepithelial_stem: u32,
    #[serde(default)]
    pub num_ecm_particles: u32,
    /// Height (z) at which the ECM substrate layer is seeded.
    #[serde(default = "default_ecm_plane_height")]
    pub ecm_plane_height: f32,
    pub placement_seed: u64,
}

fn default_ecm_plane_height() -> f32 {
    0.0
}

// Spring-force mechanics parameters
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MechanicsConfig {
    #[serde(default = "default_stiffness")]
    pub cell_cell_stiffness: f32,
    #[serde(default = "default_stiffness")]
    pub cell_ecm_stiffness: f32,
    #[serde(default = "default_stiffness")]
    pub ecm_ecm_stiffness: f32,
    #[serde(default = "default_multiplier")]
    pub homotypic_multiplier: f32,
    #[serde(default = "default_multiplier")]
    pub heterotypic_multiplier: f32,
    #[serde(default = "default_rest_length")]
    pub rest_length: f32,
    #[serde(default = "default_rest_length")]
    pub cell_ecm_rest_length: f32,
    #[serde(default = "default_rest_length")]
    pub ecm_ecm_rest_length: f32,
    /// Fraction of the final rest length at which a fresh sibling pair starts.
    #[serde(default = "default_division_rest_length")]
    pub division_rest_length: f32,
    /// Hours over which a fresh sibling pair's rest length regrows to final.
    #[serde(default = "default_spring_growth_duration")]
    pub spring_growth_duration: f32,
    /// Optional separation beyond which the pairwise force is zero.
    #[serde(default)]
    pub cutoff_length: Option<f32>,
    #[serde(default = "default_damping")]
    pub damping: f32,
    #[serde(default = "default_apoptosis_duration")]
    pub apoptosis_duration_hours: f32,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellCycleModelKind {
    /// G1 duration drawn uniformly from [min, max] hours at birth.
    Stochastic,
    /// Stochastic draw plus contact-inhibition: G1 extends while the cell
    /// is compressed below a fraction of the equilibrium height.
    HeightGated,
}

// Cell-cycle phase durations and quiescence gating
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CellCycleConfig {
    #[serde(default = "default_cycle_model")]
    pub model: CellCycleModelKind,
    #[serde(default = "default_m_duration")]
    pub m_duration_hours: f32,
    #[serde(default = "default_s_duration")]
    pub s_duration_hours: f32,
    #[serde(default = "default_g2_duration")]
    pub g2_duration_hours: f32,
    pub min_g1_duration_hours: f32,
    pub max_g1_duration_hours: f32,
    // Required when model = "heightgated"
    #[serde(default)]
    pub quiescent_height_fraction: Option<f32>,
    #[serde(default)]
    pub equilibrium_height: Option<f32>,
}

fn default_cycle_model() -> CellCycleModelKind {
    CellCycleModelKind::Stochastic
}

// Integrin gain/loss-of-function experimental perturbation
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub b1_gain_of_function: bool,
    #[serde(default)]
    pub b1_loss_of_function: bool,
    #[serde(default)]
    pub b4_gain_of_function: bool,
    #[serde(default)]
    pub b4_loss_of_function: bool,
    #[serde(default)]
    pub activation_time_hours: f32,
    #[serde(default)]
    pub affects_luminal: bool,
    #[serde(default)]
    pub affects_myoepithelial: bool,
}

impl ExperimentConfig {
    pub fn any_flag_set(&self) -> bool {
        self.b1_gain_of_function
            || self.b1_loss_of_function
            || self.b4_gain_of_function
            || self.b4_loss_of_function
    }
}

// Height-triggered apoptosis (anoikis) settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AnoikisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_anoikis_height")]
    pub height_threshold: f32,
    #[serde(default)]
    pub rate_per_hr: f32,
}

impl Default for AnoikisConfig {
    fn default() -> Self {
        AnoikisConfig {
            enabled: false,
            height_threshold: default_anoikis_height(),
            rate_per_hr: 0.0,
        }
    }
}

fn default_anoikis_height() -> f32 {
    1.0
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    pub save_positions_in_snapshot: bool,
    #[serde(default = "default_true")]
    pub save_boundary_metrics: bool,
    #[serde(default = "default_true")]
    pub save_adjacency_matrix: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

fn default_true() -> bool {
    true
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub universe: UniverseConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    pub mechanics: MechanicsConfig,
    pub cell_cycle: CellCycleConfig,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub anoikis: AnoikisConfig,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks configuration preconditions. All violations are fatal at setup.
    pub fn validate(&self) -> Result<()> {
        let mech = &self.mechanics;
        if mech.cell_cell_stiffness <= 0.0 {
            anyhow::bail!("cell_cell_stiffness must be positive.");
        }
        if mech.cell_ecm_stiffness <= 0.0 {
            anyhow::bail!("cell_ecm_stiffness must be positive.");
        }
        if mech.ecm_ecm_stiffness <= 0.0 {
            anyhow::bail!("ecm_ecm_stiffness must be positive.");
        }
        if mech.homotypic_multiplier <= 0.0 {
            anyhow::bail!("homotypic_multiplier must be positive.");
        }
        if mech.heterotypic_multiplier <= 0.0 {
            anyhow::bail!("heterotypic_multiplier must be positive.");
        }
        if !(0.0..=1.0).contains(&mech.division_rest_length) {
            anyhow::bail!("division_rest_length must lie in [0, 1].");
        }
        if mech.spring_growth_duration < 0.0 {
            anyhow::bail!("spring_growth_duration must be non-negative.");
        }
        if mech.rest_length <= 0.0 {
            anyhow::bail!("rest_length must be positive.");
        }
        if mech.cell_ecm_rest_length <= 0.0 {
            anyhow::bail!("cell_ecm_rest_length must be positive.");
        }
        if mech.ecm_ecm_rest_length <= 0.0 {
            anyhow::bail!("ecm_ecm_rest_length must be positive.");
        }
        if mech.damping <= 0.0 {
            anyhow::bail!("damping must be positive.");
        }
        if mech.apoptosis_duration_hours <= 0.0 {
            anyhow::bail!("apoptosis_duration_hours must be positive.");
        }

        let cycle = &self.cell_cycle;
        if cycle.min_g1_duration_hours <= 0.0 || cycle.max_g1_duration_hours < cycle.min_g1_duration_hours {
            anyhow::bail!("Cell-cycle G1 duration range [min, max] is invalid.");
        }
        if cycle.model == CellCycleModelKind::HeightGated {
            if cycle.quiescent_height_fraction.is_none() || cycle.equilibrium_height.is_none() {
                anyhow::bail!(
                    "Height-gated cell-cycle model requires quiescent_height_fraction and equilibrium_height."
                );
            }
        }

        let exp = &self.experiment;
        if exp.b1_gain_of_function && exp.b1_loss_of_function {
            anyhow::bail!("Cannot request both gain and loss of function for B1 integrin.");
        }
        if exp.b4_gain_of_function && exp.b4_loss_of_function {
            anyhow::bail!("Cannot request both gain and loss of function for B4 integrin.");
        }
        if exp.any_flag_set() && !exp.affects_luminal && !exp.affects_myoepithelial {
            anyhow::bail!("Integrin experiment configured but no affected cell lineage selected.");
        }

        if self.timing.dt_hours <= 0.0 {
            anyhow::bail!("dt_hours must be positive.");
        }
        if self.initial_conditions.num_luminal
            + self.initial_conditions.num_myoepithelial
            + self.initial_conditions.num_luminal_stem
            + self.initial_conditions.num_myoepithelial_stem
            == 0
        {
            anyhow::bail!("At least one initial cell is required.");
        }

        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let mech = &self.mechanics;
        let cycle = &self.cell_cycle;

        // Neighbor-pair enumeration range: the configured cutoff if present,
        // otherwise 1.5 times the longest configured rest length (springs are
        // effectively zero beyond that).
        let longest_rest = mech
            .rest_length
            .max(mech.cell_ecm_rest_length)
            .max(mech.ecm_ecm_rest_length);
        let interaction_radius = mech.cutoff_length.unwrap_or(1.5 * longest_rest);

        // Grid parameters. Cell size matches the interaction radius so a
        // 3x3x3 neighborhood scan covers every candidate pair.
        let grid_cell_size = interaction_radius;
        let inv_grid_cell_size = if grid_cell_size > 1e-9 { 1.0 / grid_cell_size } else { 0.0 };
        let grid_dim_x = (self.universe.width * inv_grid_cell_size).ceil().max(1.0) as u32;
        let grid_dim_y = (self.universe.depth * inv_grid_cell_size).ceil().max(1.0) as u32;
        let grid_dim_z = (self.universe.height * inv_grid_cell_size).ceil().max(1.0) as u32;
        let num_grid_cells = grid_dim_x * grid_dim_y * grid_dim_z;

        SimParams {
            // World & Grid
            world_width: self.universe.width,
            world_depth: self.universe.depth,
            world_height: self.universe.height,
            grid_cell_size,
            inv_grid_cell_size,
            grid_dim_x,
            grid_dim_y,
            grid_dim_z,
            num_grid_cells,
            // Time
            dt: self.timing.dt_hours,
            time_step: 0,
            // Interaction geometry
            interaction_radius,
            interaction_radius_sq: interaction_radius * interaction_radius,
            default_radius: 0.5 * mech.rest_length,
            // Spring mechanics
            cell_cell_stiffness: mech.cell_cell_stiffness,
            cell_ecm_stiffness: mech.cell_ecm_stiffness,
            ecm_ecm_stiffness: mech.ecm_ecm_stiffness,
            homotypic_multiplier: mech.homotypic_multiplier,
            heterotypic_multiplier: mech.heterotypic_multiplier,
            rest_length: mech.rest_length,
            cell_ecm_rest_length: mech.cell_ecm_rest_length,
            ecm_ecm_rest_length: mech.ecm_ecm_rest_length,
            division_rest_length: mech.division_rest_length,
            spring_growth_duration: mech.spring_growth_duration,
            cutoff_length: mech.cutoff_length,
            decay_alpha: 5.0,
            damping: mech.damping,
            apoptosis_duration: mech.apoptosis_duration_hours,
            // Cell cycle
            cycle_model: cycle.model,
            m_duration: cycle.m_duration_hours,
            s_duration: cycle.s_duration_hours,
            g2_duration: cycle.g2_duration_hours,
            min_g1_duration: cycle.min_g1_duration_hours,
            max_g1_duration: cycle.max_g1_duration_hours,
            quiescent_height_fraction: cycle.quiescent_height_fraction,
            equilibrium_height: cycle.equilibrium_height,
            // Anoikis
            anoikis_enabled: self.anoikis.enabled,
            anoikis_height_threshold: self.anoikis.height_threshold,
            anoikis_rate_per_hr: self.anoikis.rate_per_hr,
        }
    }
}

// Default functions for mechanics parameters
fn default_stiffness() -> f32 {
    15.0
}

fn default_multiplier() -> f32 {
    1.0
}

fn default_rest_length() -> f32 {
    1.0
}

fn default_division_rest_length() -> f32 {
    0.5
}

fn default_spring_growth_duration() -> f32 {
    1.0
}

fn default_damping() -> f32 {
    1.0
}

fn default_apoptosis_duration() -> f32 {
    0.25
}

// Default functions for cell-cycle phase durations
fn default_m_duration() -> f32 {
    1.0
}

fn default_s_duration() -> f32 {
    5.0
}

fn default_g2_duration() -> f32 {
    4.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SimulationConfig {
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
                placement_seed: 7,
            },
            mechanics: MechanicsConfig {
                cell_cell_stiffness: default_stiffness(),
                cell_ecm_stiffness: default_stiffness(),
                ecm_ecm_stiffness: default_stiffness(),
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

    #[test]
    fn rejects_non_positive_stiffness() {
        let mut config = base_config();
        config.mechanics.cell_cell_stiffness = 0.0;
        assert!(config.validate().is_err());
        config.mechanics.cell_cell_stiffness = -2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_multipliers() {
        let mut config = base_config();
        config.mechanics.heterotypic_multiplier = 0.0;
        assert!(config.validate().is_err());
        let mut config = base_config();
        config.mechanics.homotypic_multiplier = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_simultaneous_gain_and_loss_of_same_integrin() {
        let mut config = base_config();
        config.experiment.b1_gain_of_function = true;
        config.experiment.b1_loss_of_function = true;
        config.experiment.affects_luminal = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_experiment_without_lineage() {
        let mut config = base_config();
        config.experiment.b4_gain_of_function = true;
        assert!(config.validate().is_err());
        config.experiment.affects_myoepithelial = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn height_gated_model_requires_quiescence_parameters() {
        let mut config = base_config();
        config.cell_cycle.model = CellCycleModelKind::HeightGated;
        assert!(config.validate().is_err());
        config.cell_cycle.quiescent_height_fraction = Some(0.8);
        assert!(config.validate().is_err());
        config.cell_cycle.equilibrium_height = Some(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_pair_rest_lengths() {
        let mut config = base_config();
        config.mechanics.cell_ecm_rest_length = 0.0;
        assert!(config.validate().is_err());
        let mut config = base_config();
        config.mechanics.ecm_ecm_rest_length = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn interaction_radius_covers_longest_rest_length() {
        let mut config = base_config();
        config.mechanics.ecm_ecm_rest_length = 2.0;
        let params = config.get_sim_params();
        assert!((params.interaction_radius - 3.0).abs() < 1e-6);
    }

    #[test]
    fn division_rest_length_must_be_a_fraction() {
        let mut config = base_config();
        config.mechanics.division_rest_length = 1.5;
        assert!(config.validate().is_err());
    }
}
