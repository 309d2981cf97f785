use crate::phenotype::Phenotype;
use anyhow::Result;
use organoid_common::{CellCycleModelKind, SimParams};
use rand::prelude::*;
use rand::distr::Uniform;
use serde::{Serialize, Deserialize};

/// Proliferative phase of a cell. `G0` is absorbing: terminally
/// differentiated cells enter it and never leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    M,
    G1,
    S,
    G2,
    G0,
}

/// Per-agent cell-cycle state, mutated once per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellCycleState {
    pub phase: Phase,
    /// G1 duration in hours; stochastically drawn at birth and extended
    /// step-by-step while the cell is quiescent under the height-gated model.
    pub g1_duration: f32,
    /// Simulation time at which the current quiescence bout began.
    pub quiescence_onset: f32,
    /// Accumulated time spent quiescent in the current bout.
    pub quiescent_duration: f32,
    /// Cached readiness flag derived from phase and age.
    pub ready_to_divide: bool,
}

impl CellCycleState {
    /// Creates the cycle state for a freshly created agent. Terminally
    /// differentiated phenotypes get an infinite G1 and sit in G0 forever;
    /// cycling phenotypes draw a G1 duration uniformly from the configured
    /// [min, max] range.
    pub fn for_phenotype(
        phenotype: &Phenotype,
        params: &SimParams,
        rng: &mut StdRng,
        birth_time: f32,
    ) -> Result<Self> {
        if phenotype.is_terminally_differentiated() || !phenotype.is_cell() {
            return Ok(CellCycleState {
                phase: Phase::G0,
                g1_duration: f32::INFINITY,
                quiescence_onset: birth_time,
                quiescent_duration: 0.0,
                ready_to_divide: false,
            });
        }
        Ok(CellCycleState {
            phase: Phase::M,
            g1_duration: draw_g1_duration(params, rng)?,
            quiescence_onset: birth_time,
            quiescent_duration: 0.0,
            ready_to_divide: false,
        })
    }

    /// Resets the state after a division event (applied to both the parent,
    /// whose age restarts, and the daughter copy). The G1 duration is redrawn
    /// so siblings decorrelate.
    pub fn reset_for_division(
        &mut self,
        phenotype: &Phenotype,
        params: &SimParams,
        rng: &mut StdRng,
        current_time: f32,
    ) -> Result<()> {
        *self = CellCycleState::for_phenotype(phenotype, params, rng, current_time)?;
        Ok(())
    }
}

fn draw_g1_duration(params: &SimParams, rng: &mut StdRng) -> Result<f32> {
    let dist = Uniform::new_inclusive(params.min_g1_duration, params.max_g1_duration)?;
    Ok(rng.sample(dist))
}

/// Advances one agent's cycle state by one timestep.
///
/// Terminally differentiated phenotypes transition to G0 unconditionally.
/// Otherwise the phase is a pure function of elapsed age versus the cumulative
/// phase durations, except that under the height-gated model a cell sitting in
/// G1 below the quiescence threshold height has its G1 extended by `dt` each
/// step (the contact-inhibition mechanism).
pub fn update_phase(
    state: &mut CellCycleState,
    phenotype: &Phenotype,
    age: f32,
    height_signal: Option<f32>,
    params: &SimParams,
    current_time: f32,
) -> Result<()> {
    if phenotype.is_terminally_differentiated() || !phenotype.is_cell() {
        state.phase = Phase::G0;
        state.ready_to_divide = false;
        return Ok(());
    }

    if state.phase == Phase::G1 && params.cycle_model == CellCycleModelKind::HeightGated {
        let fraction = params.quiescent_height_fraction.ok_or_else(|| {
            anyhow::anyhow!("Height-gated cycle update invoked with quiescent_height_fraction unset.")
        })?;
        let equilibrium = params.equilibrium_height.ok_or_else(|| {
            anyhow::anyhow!("Height-gated cycle update invoked with equilibrium_height unset.")
        })?;
        let height = height_signal.ok_or_else(|| {
            anyhow::anyhow!("Height signal missing; the height tracker must run before the cycle update.")
        })?;

        if height < fraction * equilibrium {
            // Compressed below the quiescence threshold: extend G1 and keep
            // accumulating quiescent time from the recorded onset.
            state.g1_duration += params.dt;
            state.quiescent_duration += params.dt;
        } else {
            state.quiescent_duration = 0.0;
            state.quiescence_onset = current_time;
        }
    }

    let m_end = params.m_duration;
    let g1_end = m_end + state.g1_duration;
    let s_end = g1_end + params.s_duration;
    let g2_end = s_end + params.g2_duration;

    state.phase = if age < m_end {
        Phase::M
    } else if age < g1_end {
        Phase::G1
    } else if age < s_end {
        Phase::S
    } else {
        Phase::G2
    };
    state.ready_to_divide = age >= g2_end;

    Ok(())
}
