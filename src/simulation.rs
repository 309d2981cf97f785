use crate::aggregators::{
    adjacency_matrix, measure_boundaries, track_heights, BoundaryMetrics, MetricsWriter, HEIGHT_KEY,
};
use crate::cell_cycle::update_phase;
use crate::context::SimulationContext;
use crate::forces::SpringForceModel;
use crate::phenotype::{IntegrinExperiment, Phenotype, Variant};
use crate::population::Population;
use anyhow::Result;
use log::{debug, info};
use organoid_common::{clamp, SimParams, SimulationConfig, Snapshot, Vec3};
use rand::prelude::*;
use rand::distr::Uniform;
use rand::seq::SliceRandom;

/// Manages the state and execution of the organoid simulation.
///
/// Each step follows a strict synchronous sequence: experiment check,
/// aggregate derived signals (height), cell-cycle update, death handling,
/// divisions, force accumulation, position integration.
pub struct OrganoidSimulation {
    /// The simulation configuration, including initial conditions and parameters.
    pub config: SimulationConfig,
    params: SimParams,
    /// All agents plus the spatial neighbor grid.
    pub population: Population,
    forces: SpringForceModel,
    experiment: Option<IntegrinExperiment>,
    ctx: SimulationContext,
    /// The current simulation physics time step number.
    pub current_time_step: u32,
    /// Stores collected simulation data snapshots at record intervals.
    recorded_snapshots: Vec<Snapshot>,
    /// Boundary metrics from the most recent recording pass.
    last_boundary: BoundaryMetrics,
}

impl OrganoidSimulation {
    /// Creates a new `OrganoidSimulation`, initializing state and placing initial agents.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        let mut ctx = SimulationContext::new(
            config.initial_conditions.placement_seed,
            params.dt,
        );
        let experiment = IntegrinExperiment::from_config(&config.experiment)?;

        let mut population = Population::new();
        place_initial_agents(&mut population, &config, &params, &mut ctx)?;
        population.rebuild_grid(&params);

        Ok(OrganoidSimulation {
            config,
            params,
            population,
            forces: SpringForceModel::new(),
            experiment,
            ctx,
            current_time_step: 0,
            recorded_snapshots: Vec::new(),
            last_boundary: BoundaryMetrics::default(),
        })
    }

    /// Advances the simulation by one physics timestep (`dt`).
    pub fn step(&mut self) -> Result<()> {
        self.params.time_step = self.current_time_step;

        // --- 0. One-shot integrin perturbation (if configured) ---
        if let Some(experiment) = &mut self.experiment {
            experiment.maybe_apply(
                self.ctx.time,
                self.population.agents_mut().iter_mut().map(|a| &mut a.phenotype),
            );
        }

        // --- 1. Aggregate derived signals ---
        track_heights(&mut self.population);

        // --- 2. Cell-cycle phase update ---
        self.update_cell_cycles()?;

        // --- 3. Death handling: anoikis onset, then completed apoptosis ---
        self.population.apply_anoikis(&self.params, &mut self.ctx);
        let removed = self.population.remove_dead(&self.params, self.ctx.time);
        if removed > 0 {
            self.forces.registry_mut().prune(&self.population);
        }

        // --- 4. Divisions (marks fresh sibling pairs in the registry) ---
        self.population
            .handle_divisions(&self.params, &mut self.ctx, self.forces.registry_mut())?;
        self.forces.registry_mut().expire(
            self.ctx.time,
            self.ctx.dt,
            self.params.spring_growth_duration,
        );

        // --- 5. Pairwise force accumulation over the rebuilt grid ---
        self.population.clear_forces();
        self.population.rebuild_grid(&self.params);
        self.forces.accumulate(&mut self.population, &self.params, &self.ctx)?;

        // --- 6. Overdamped position integration ---
        self.population.integrate(&self.params, self.ctx.dt);

        self.ctx.advance();
        self.current_time_step += 1;
        Ok(())
    }

    fn update_cell_cycles(&mut self) -> Result<()> {
        let params = &self.params;
        let time = self.ctx.time;
        for agent in self.population.agents_mut() {
            let age = agent.age(time);
            let height = agent.cell_data(HEIGHT_KEY);
            let phenotype = agent.phenotype;
            update_phase(&mut agent.cycle, &phenotype, age, height, params, time)?;
        }
        Ok(())
    }

    /// Computes and writes the per-step boundary metrics line and adjacency
    /// matrix line. Rebuilds the grid first so the scan sees current positions.
    pub fn record_metrics(&mut self, writer: &mut MetricsWriter) -> Result<()> {
        self.population.rebuild_grid(&self.params);
        self.last_boundary = measure_boundaries(&self.population, &self.params);
        writer.write_boundary(&self.last_boundary)?;
        let matrix = adjacency_matrix(&self.population, &self.params);
        let num_cells = self
            .population
            .agents()
            .iter()
            .filter(|a| a.phenotype.is_cell())
            .count();
        writer.write_adjacency(num_cells, &matrix)?;
        Ok(())
    }

    /// Collects all specified metrics and stores them as a Snapshot.
    /// Should be called at record intervals, after `record_metrics`.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let current_sim_time = self.ctx.time;
        debug!("Recording snapshot at {:.2} h...", current_sim_time);

        let agents = self.population.agents();
        let mut cell_count = 0u32;
        let mut luminal_count = 0u32;
        let mut myoepithelial_count = 0u32;
        let mut apoptotic_count = 0u32;
        let mut height_sum = 0.0f32;
        for agent in agents {
            if !agent.phenotype.is_cell() {
                continue;
            }
            cell_count += 1;
            height_sum += agent.position.height();
            match agent.phenotype.family() {
                crate::phenotype::Family::Luminal => luminal_count += 1,
                crate::phenotype::Family::Myoepithelial => myoepithelial_count += 1,
                _ => {}
            }
            if agent.is_apoptotic() {
                apoptotic_count += 1;
            }
        }
        let mean_cell_height = if cell_count > 0 {
            height_sum / cell_count as f32
        } else {
            0.0
        };

        let positions = if self.config.output.save_positions_in_snapshot {
            Some(self.get_positions())
        } else {
            None
        };

        self.recorded_snapshots.push(Snapshot {
            time: current_sim_time,
            total_agent_count: agents.len() as u32,
            cell_count,
            luminal_count,
            myoepithelial_count,
            apoptotic_count,
            total_boundary_length: self.last_boundary.total_length,
            heterotypic_boundary_length: self.last_boundary.heterotypic_length,
            total_neighbor_pairs: self.last_boundary.total_pairs,
            heterotypic_neighbor_pairs: self.last_boundary.heterotypic_pairs,
            mean_cell_height,
            positions,
        });
        Ok(())
    }

    /// Retrieves the current positions of all active agents.
    pub fn get_positions(&self) -> Vec<(f32, f32, f32)> {
        self.population
            .agents()
            .iter()
            .map(|a| (a.position.x, a.position.y, a.position.z))
            .collect()
    }

    /// Returns the current number of agents in the simulation.
    pub fn current_agent_count(&self) -> u32 {
        self.population.len() as u32
    }

    /// Provides access to the simulation parameters.
    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Provides access to the original simulation configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }
}

/// Helper function for initial agent placement based on the configuration.
/// Uses grid-based jittered sampling for better initial spread: cells on a
/// monolayer one cell diameter above the ECM plane, ECM particles on the
/// plane itself.
fn place_initial_agents(
    pop: &mut Population,
    config: &SimulationConfig,
    params: &SimParams,
    ctx: &mut SimulationContext,
) -> Result<()> {
    let ic = &config.initial_conditions;

    // Assemble and shuffle the phenotype assignment list.
    let mut variants: Vec<Variant> = Vec::new();
    variants.extend(std::iter::repeat(Variant::Luminal).take(ic.num_luminal as usize));
    variants.extend(std::iter::repeat(Variant::Myoepithelial).take(ic.num_myoepithelial as usize));
    variants.extend(std::iter::repeat(Variant::LuminalStem).take(ic.num_luminal_stem as usize));
    variants.extend(
        std::iter::repeat(Variant::MyoepithelialStem).take(ic.num_myoepithelial_stem as usize),
    );
    variants.shuffle(&mut ctx.rng);

    let cell_height = clamp(
        ic.ecm_plane_height + 2.0 * params.default_radius,
        0.0,
        params.world_height,
    );
    let cell_positions = jittered_plane_positions(variants.len(), params, cell_height, ctx)?;
    for (pos, variant) in cell_positions.into_iter().zip(variants) {
        pop.spawn(pos, Phenotype::new(variant), params, ctx)?;
    }

    let ecm_height = clamp(ic.ecm_plane_height, 0.0, params.world_height);
    let ecm_positions =
        jittered_plane_positions(ic.num_ecm_particles as usize, params, ecm_height, ctx)?;
    for pos in ecm_positions {
        pop.spawn(pos, Phenotype::new(Variant::Ecm), params, ctx)?;
    }

    info!(
        "Placed {} cells and {} ECM particles.",
        pop.len() - ic.num_ecm_particles as usize,
        ic.num_ecm_particles
    );
    Ok(())
}

/// Jittered grid sampling over the XY extent at a fixed height.
fn jittered_plane_positions(
    count: usize,
    params: &SimParams,
    height: f32,
    ctx: &mut SimulationContext,
) -> Result<Vec<Vec3>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let margin = params.default_radius;
    let x_min = margin;
    let x_max = params.world_width - margin;
    let y_min = margin;
    let y_max = params.world_depth - margin;
    if x_max <= x_min || y_max <= y_min {
        anyhow::bail!("Universe extent too small for the placement margin.");
    }
    let width = x_max - x_min;
    let depth = y_max - y_min;

    // Compute grid dimensions for jittered placement.
    let cols = ((count as f32 * width / depth).sqrt().floor() as usize).max(1);
    let rows = ((count + cols - 1) / cols).max(1);
    // Create and shuffle grid bins.
    let mut bins: Vec<(usize, usize)> = (0..cols)
        .flat_map(|ix| (0..rows).map(move |iy| (ix, iy)))
        .collect();
    bins.shuffle(&mut ctx.rng);
    bins.truncate(count);
    // Sample one position per bin.
    let mut positions = Vec::with_capacity(count);
    let bin_w = width / cols as f32;
    let bin_d = depth / rows as f32;
    for (ix, iy) in bins {
        let x0 = x_min + ix as f32 * bin_w;
        let y0 = y_min + iy as f32 * bin_d;
        let dist_x = Uniform::new(x0, x0 + bin_w)?;
        let dist_y = Uniform::new(y0, y0 + bin_d)?;
        let px = ctx.rng.sample(&dist_x);
        let py = ctx.rng.sample(&dist_y);
        positions.push(Vec3::new(px, py, height));
    }
    Ok(positions)
}
