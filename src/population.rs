use crate::cell_cycle::CellCycleState;
use crate::context::SimulationContext;
use crate::forces::DivisionPairRegistry;
use crate::grid::SpatialGrid;
use crate::phenotype::{Phenotype, Variant};
use anyhow::Result;
use log::debug;
use organoid_common::{clamp, SimParams, Vec3};
use rand::prelude::*;
use rand_distr::UnitSphere;
use std::collections::HashMap;

pub type AgentId = u32;

/// A point agent: a biological cell or an inert ECM particle.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub position: Vec3,
    /// Physical radius; pairwise rest lengths derive from it.
    pub radius: f32,
    /// Drag coefficient for the overdamped position update.
    pub damping: f32,
    /// Simulation time at which this agent was created (or last divided).
    pub birth_time: f32,
    pub phenotype: Phenotype,
    pub cycle: CellCycleState,
    /// Time at which apoptosis started, if it has.
    pub apoptosis_start: Option<f32>,
    /// Per-step force accumulator, cleared before each force pass.
    pub applied_force: Vec3,
    /// String-keyed scalar store for externally written signals (e.g. "height").
    cell_data: HashMap<String, f32>,
}

impl Agent {
    pub fn age(&self, current_time: f32) -> f32 {
        current_time - self.birth_time
    }

    pub fn is_apoptotic(&self) -> bool {
        self.apoptosis_start.is_some()
    }

    /// Remaining time before removal, if apoptosis has begun.
    pub fn time_until_death(&self, params: &SimParams, current_time: f32) -> Option<f32> {
        self.apoptosis_start
            .map(|start| (start + params.apoptosis_duration - current_time).max(0.0))
    }

    pub fn cell_data(&self, key: &str) -> Option<f32> {
        self.cell_data.get(key).copied()
    }

    pub fn set_cell_data(&mut self, key: &str, value: f32) {
        self.cell_data.insert(key.to_string(), value);
    }
}

/// Container for all agents plus the spatial grid used for neighbor-pair
/// enumeration. Agents are stored contiguously; ids stay stable across
/// removals via the id-to-index map.
pub struct Population {
    agents: Vec<Agent>,
    index_of: HashMap<AgentId, usize>,
    next_id: AgentId,
    grid: SpatialGrid,
    // Position mirror refreshed on each grid rebuild.
    positions: Vec<Vec3>,
}

impl Population {
    pub fn new() -> Self {
        Population {
            agents: Vec::new(),
            index_of: HashMap::new(),
            next_id: 0,
            grid: SpatialGrid::new(),
            positions: Vec::new(),
        }
    }

    /// Creates an agent with a fresh cell-cycle state and returns its id.
    pub fn spawn(
        &mut self,
        position: Vec3,
        phenotype: Phenotype,
        params: &SimParams,
        ctx: &mut SimulationContext,
    ) -> Result<AgentId> {
        let cycle = CellCycleState::for_phenotype(&phenotype, params, &mut ctx.rng, ctx.time)?;
        let id = self.next_id;
        self.next_id += 1;
        self.index_of.insert(id, self.agents.len());
        self.agents.push(Agent {
            id,
            position,
            radius: params.default_radius,
            damping: params.damping,
            birth_time: ctx.time,
            phenotype,
            cycle,
            apoptosis_start: None,
            applied_force: Vec3::zero(),
            cell_data: HashMap::new(),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.index_of.get(&id).map(|&idx| &self.agents[idx])
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        let idx = *self.index_of.get(&id)?;
        Some(&mut self.agents[idx])
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    /// Refreshes the position mirror and rebuilds the spatial grid. Must run
    /// after any step phase that moves, adds or removes agents and before the
    /// next neighbor query.
    pub fn rebuild_grid(&mut self, params: &SimParams) {
        self.positions.clear();
        self.positions.extend(self.agents.iter().map(|a| a.position));
        self.grid.rebuild(&self.positions, params);
    }

    /// Visits every agent index within `max_dist_sq` of agent `idx`.
    /// Pair order is not stable across steps; callers must not rely on it.
    pub fn for_each_neighbor<F>(&self, idx: usize, max_dist_sq: f32, params: &SimParams, f: F)
    where
        F: FnMut(u32) -> bool,
    {
        self.grid.for_each_neighbor(
            idx as u32,
            self.positions[idx],
            max_dist_sq,
            params,
            &self.positions,
            f,
        );
    }

    /// Adds a force contribution to an agent's accumulator.
    pub fn apply_force(&mut self, idx: usize, force: Vec3) {
        let agent = &mut self.agents[idx];
        agent.applied_force = agent.applied_force.add(force);
    }

    pub fn clear_forces(&mut self) {
        for agent in &mut self.agents {
            agent.applied_force = Vec3::zero();
        }
    }

    /// Overdamped position update: dx = dt * F / damping, clamped to the
    /// world box so agents never leave the grid.
    pub fn integrate(&mut self, params: &SimParams, dt: f32) {
        for agent in &mut self.agents {
            let displacement = agent.applied_force.scale(dt / agent.damping);
            let pos = agent.position.add(displacement);
            agent.position = Vec3::new(
                clamp(pos.x, 0.0, params.world_width),
                clamp(pos.y, 0.0, params.world_depth),
                clamp(pos.z, 0.0, params.world_height),
            );
        }
    }

    /// Marks an agent as apoptotic. A second call is a no-op; the original
    /// onset time stands.
    pub fn start_apoptosis(&mut self, id: AgentId, current_time: f32) {
        if let Some(agent) = self.agent_mut(id) {
            if agent.apoptosis_start.is_none() {
                agent.apoptosis_start = Some(current_time);
                debug!("Agent {} started apoptosis at t={:.2} h.", id, current_time);
            }
        }
    }

    /// Removes agents whose apoptosis window has elapsed. Returns how many
    /// were removed. Index map is rebuilt afterwards.
    pub fn remove_dead(&mut self, params: &SimParams, current_time: f32) -> usize {
        let before = self.agents.len();
        self.agents.retain(|agent| match agent.apoptosis_start {
            Some(start) => start + params.apoptosis_duration > current_time,
            None => true,
        });
        let removed = before - self.agents.len();
        if removed > 0 {
            self.reindex();
            debug!("Removed {} dead agents ({} remain).", removed, self.agents.len());
        }
        removed
    }

    fn reindex(&mut self) {
        self.index_of.clear();
        for (idx, agent) in self.agents.iter().enumerate() {
            self.index_of.insert(agent.id, idx);
        }
    }

    /// Divides every cell whose cycle flags it ready. The daughter is placed
    /// at the parent position plus a small random offset, both cycle states
    /// are reset, the sibling pair is division-marked, and a stem parent's
    /// daughter takes the differentiated variant of the same lineage.
    pub fn handle_divisions(
        &mut self,
        params: &SimParams,
        ctx: &mut SimulationContext,
        registry: &mut DivisionPairRegistry,
    ) -> Result<u32> {
        let ready: Vec<usize> = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.cycle.ready_to_divide && !a.is_apoptotic())
            .map(|(idx, _)| idx)
            .collect();

        let mut divisions = 0;
        for parent_idx in ready {
            let (parent_id, parent_pos, parent_radius, parent_damping, parent_phenotype) = {
                let parent = &self.agents[parent_idx];
                (parent.id, parent.position, parent.radius, parent.damping, parent.phenotype)
            };

            // Place the daughter half the initial sibling rest length away in
            // a uniformly random direction.
            let final_rest = parent_radius + params.default_radius;
            let separation = (params.division_rest_length * final_rest).max(1e-3);
            let dir: [f32; 3] = UnitSphere.sample(&mut ctx.rng);
            let offset = Vec3::new(dir[0], dir[1], dir[2]).scale(0.5 * separation);
            let daughter_pos = Vec3::new(
                clamp(parent_pos.x + offset.x, 0.0, params.world_width),
                clamp(parent_pos.y + offset.y, 0.0, params.world_depth),
                clamp(parent_pos.z + offset.z, 0.0, params.world_height),
            );

            // Stem divisions are asymmetric: the parent keeps its variant,
            // the daughter differentiates within the lineage.
            let daughter_phenotype = if parent_phenotype.is_stem() {
                Phenotype::new(parent_phenotype.differentiated_variant())
            } else {
                parent_phenotype
            };

            let daughter_cycle =
                CellCycleState::for_phenotype(&daughter_phenotype, params, &mut ctx.rng, ctx.time)?;
            let daughter_id = self.next_id;
            self.next_id += 1;
            self.index_of.insert(daughter_id, self.agents.len());
            self.agents.push(Agent {
                id: daughter_id,
                position: daughter_pos,
                radius: params.default_radius,
                damping: parent_damping,
                birth_time: ctx.time,
                phenotype: daughter_phenotype,
                cycle: daughter_cycle,
                apoptosis_start: None,
                applied_force: Vec3::zero(),
                cell_data: HashMap::new(),
            });

            // Reset the parent: its age restarts and G1 is redrawn.
            let parent = &mut self.agents[parent_idx];
            parent.birth_time = ctx.time;
            parent
                .cycle
                .reset_for_division(&parent_phenotype, params, &mut ctx.rng, ctx.time)?;
            parent.position = Vec3::new(
                clamp(parent_pos.x - offset.x, 0.0, params.world_width),
                clamp(parent_pos.y - offset.y, 0.0, params.world_depth),
                clamp(parent_pos.z - offset.z, 0.0, params.world_height),
            );

            registry.mark(parent_id, daughter_id, ctx.time);
            divisions += 1;
            debug!(
                "Agent {} divided at t={:.2} h; daughter {} ({:?}).",
                parent_id,
                ctx.time,
                daughter_id,
                daughter_phenotype.variant()
            );
        }

        Ok(divisions)
    }

    /// Height-triggered apoptosis: a cell detached above the threshold height
    /// starts dying with probability `rate * dt` per step.
    pub fn apply_anoikis(&mut self, params: &SimParams, ctx: &mut SimulationContext) {
        if !params.anoikis_enabled {
            return;
        }
        let p_death = (params.anoikis_rate_per_hr * ctx.dt).min(1.0);
        let mut doomed = Vec::new();
        for agent in &self.agents {
            if !agent.phenotype.is_cell() || agent.is_apoptotic() {
                continue;
            }
            if agent.position.height() > params.anoikis_height_threshold
                && ctx.rng.random::<f32>() < p_death
            {
                doomed.push(agent.id);
            }
        }
        for id in doomed {
            self.start_apoptosis(id, ctx.time);
        }
    }
}

impl Default for Population {
    fn default() -> Self {
        Population::new()
    }
}
