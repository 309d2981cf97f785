use crate::context::SimulationContext;
use crate::population::{Agent, AgentId, Population};
use anyhow::Result;
use organoid_common::{SimParams, Vec3};
use std::collections::HashMap;

/// Interaction kind of an agent pair; each kind carries its own stiffness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    CellCell,
    CellEcm,
    EcmEcm,
}

impl PairKind {
    pub fn classify(a: &Agent, b: &Agent) -> PairKind {
        match (a.phenotype.is_cell(), b.phenotype.is_cell()) {
            (true, true) => PairKind::CellCell,
            (false, false) => PairKind::EcmEcm,
            _ => PairKind::CellEcm,
        }
    }

    fn stiffness(self, params: &SimParams) -> f32 {
        match self {
            PairKind::CellCell => params.cell_cell_stiffness,
            PairKind::CellEcm => params.cell_ecm_stiffness,
            PairKind::EcmEcm => params.ecm_ecm_stiffness,
        }
    }
}

/// Tracks which sibling pairs are still inside the post-division rest-length
/// growth window. Keyed by unordered id pair, each entry recording the
/// simulation time of the division. Marked on division, swept by `expire`
/// once the window closes (the force pass also unmarks eagerly when it
/// evaluates a pair whose window has just closed). This is the only
/// cross-step mutable state the force model owns.
#[derive(Debug, Default)]
pub struct DivisionPairRegistry {
    pairs: HashMap<(AgentId, AgentId), f32>,
}

fn pair_key(a: AgentId, b: AgentId) -> (AgentId, AgentId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl DivisionPairRegistry {
    pub fn new() -> Self {
        DivisionPairRegistry::default()
    }

    pub fn mark(&mut self, a: AgentId, b: AgentId, marked_at: f32) {
        self.pairs.insert(pair_key(a, b), marked_at);
    }

    pub fn unmark(&mut self, a: AgentId, b: AgentId) {
        self.pairs.remove(&pair_key(a, b));
    }

    pub fn is_marked(&self, a: AgentId, b: AgentId) -> bool {
        self.pairs.contains_key(&pair_key(a, b))
    }

    /// Division time of the pair, if still marked.
    pub fn marked_at(&self, a: AgentId, b: AgentId) -> Option<f32> {
        self.pairs.get(&pair_key(a, b)).copied()
    }

    /// Drops every pair whose growth window closes this step, whether or not
    /// the force pass ever evaluated it. Pairs that stay out of interaction
    /// range for the whole window must not linger and re-enter growth after a
    /// later division resets an agent's age.
    pub fn expire(&mut self, current_time: f32, dt: f32, growth_duration: f32) {
        self.pairs
            .retain(|_, &mut marked_at| current_time - marked_at + dt < growth_duration);
    }

    /// Drops entries referring to agents that no longer exist.
    pub fn prune(&mut self, pop: &Population) {
        self.pairs
            .retain(|&(a, b), _| pop.agent(a).is_some() && pop.agent(b).is_some());
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Pairwise spring-force model with phenotype-dependent stiffness multipliers,
/// post-division rest-length growth and apoptotic rest-length shrink.
pub struct SpringForceModel {
    registry: DivisionPairRegistry,
    // Scratch pair list reused across steps.
    pair_buffer: Vec<(usize, usize)>,
}

impl SpringForceModel {
    pub fn new() -> Self {
        SpringForceModel {
            registry: DivisionPairRegistry::new(),
            pair_buffer: Vec::new(),
        }
    }

    pub fn registry_mut(&mut self) -> &mut DivisionPairRegistry {
        &mut self.registry
    }

    /// Accumulates spring forces onto every agent. Each undirected neighbor
    /// pair is computed once and applied equal-and-opposite.
    pub fn accumulate(
        &mut self,
        pop: &mut Population,
        params: &SimParams,
        ctx: &SimulationContext,
    ) -> Result<()> {
        self.pair_buffer.clear();
        for idx in 0..pop.len() {
            pop.for_each_neighbor(idx, params.interaction_radius_sq, params, |neighbor_idx| {
                // Visit each undirected pair from its lower index only.
                if (neighbor_idx as usize) > idx {
                    self.pair_buffer.push((idx, neighbor_idx as usize));
                }
                true
            });
        }

        let pairs = std::mem::take(&mut self.pair_buffer);
        for &(a_idx, b_idx) in &pairs {
            let force = {
                let agents = pop.agents();
                self.force_between(&agents[a_idx], &agents[b_idx], params, ctx)?
            };
            pop.apply_force(a_idx, force);
            pop.apply_force(b_idx, force.scale(-1.0));
        }
        self.pair_buffer = pairs;

        Ok(())
    }

    /// Computes the force applied to `a` by `b` (equal and opposite for `b`).
    ///
    /// Overlap >= 0 (agents further apart than the rest length) uses an
    /// exponentially decaying attraction; overlap < 0 uses a logarithmic
    /// repulsion whose argument must stay inside its domain.
    pub fn force_between(
        &mut self,
        a: &Agent,
        b: &Agent,
        params: &SimParams,
        ctx: &SimulationContext,
    ) -> Result<Vec3> {
        let separation = b.position.sub(a.position);
        let distance = separation.length();
        if distance <= 0.0 {
            anyhow::bail!(
                "Agents {} and {} coincide exactly; the unit vector is undefined.",
                a.id,
                b.id
            );
        }

        // Cutoff short-circuit before any rest-length work.
        if let Some(cutoff) = params.cutoff_length {
            if distance > cutoff {
                return Ok(Vec3::zero());
            }
        }

        let kind = PairKind::classify(a, b);
        let stiffness = kind.stiffness(params);

        // Final rest length: sum of physical radii for true cell-cell pairs,
        // the per-kind configured value otherwise.
        let final_rest = match kind {
            PairKind::CellCell => a.radius + b.radius,
            PairKind::CellEcm => params.cell_ecm_rest_length,
            PairKind::EcmEcm => params.ecm_ecm_rest_length,
        };

        let rest_length = self.rest_length(a, b, kind, final_rest, params, ctx);

        let overlap = distance - rest_length;
        let unit = separation.scale(1.0 / distance);
        let multiplier = match kind {
            PairKind::CellCell => {
                if a.phenotype.family() == b.phenotype.family() {
                    params.homotypic_multiplier
                } else {
                    params.heterotypic_multiplier
                }
            }
            _ => 1.0,
        };

        let magnitude =
            spring_magnitude(multiplier, stiffness, overlap, final_rest, params.decay_alpha)?;

        Ok(unit.scale(magnitude))
    }

    /// Current rest length for the pair: linear regrowth for division-marked
    /// siblings, linear per-side shrink for apoptotic agents.
    fn rest_length(
        &mut self,
        a: &Agent,
        b: &Agent,
        kind: PairKind,
        final_rest: f32,
        params: &SimParams,
        ctx: &SimulationContext,
    ) -> f32 {
        let mut rest_length = final_rest;

        if kind == PairKind::CellCell {
            if let Some(marked_at) = self.registry.marked_at(a.id, b.id) {
                // Growth is clocked from the recorded division time, not agent
                // age, so a later division of either sibling cannot reopen the
                // window.
                let elapsed = ctx.time - marked_at;
                if elapsed + ctx.dt >= params.spring_growth_duration {
                    // Growth window closes this step: revert to the final length.
                    self.registry.unmark(a.id, b.id);
                } else {
                    let initial = params.division_rest_length * final_rest;
                    rest_length =
                        initial + (final_rest - initial) * elapsed / params.spring_growth_duration;
                }
            }
        }

        // An apoptotic agent's contribution shrinks linearly to zero over its
        // remaining time to death. Sides are radius-weighted for cell-cell
        // pairs and split evenly otherwise.
        if a.is_apoptotic() || b.is_apoptotic() {
            let weight_a = match kind {
                PairKind::CellCell => a.radius / (a.radius + b.radius),
                _ => 0.5,
            };
            let mut side_a = rest_length * weight_a;
            let mut side_b = rest_length * (1.0 - weight_a);
            if let Some(remaining) = a.time_until_death(params, ctx.time) {
                side_a *= remaining / params.apoptosis_duration;
            }
            if let Some(remaining) = b.time_until_death(params, ctx.time) {
                side_b *= remaining / params.apoptosis_duration;
            }
            rest_length = side_a + side_b;
        }

        rest_length
    }
}

impl Default for SpringForceModel {
    fn default() -> Self {
        SpringForceModel::new()
    }
}

/// Scalar force magnitude along the pair axis. Overlap >= 0 uses the
/// exponentially decaying branch; overlap < 0 uses the logarithmic branch,
/// whose argument must stay strictly positive.
fn spring_magnitude(
    multiplier: f32,
    stiffness: f32,
    overlap: f32,
    final_rest: f32,
    decay_alpha: f32,
) -> Result<f32> {
    if overlap >= 0.0 {
        return Ok(multiplier * stiffness * overlap * (-decay_alpha * overlap / final_rest).exp());
    }
    if overlap <= -final_rest {
        anyhow::bail!(
            "Overlap {} at or below -rest length {}; logarithmic force law argument out of domain.",
            overlap,
            final_rest
        );
    }
    Ok(multiplier * stiffness * final_rest * (1.0 + overlap / final_rest).ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenotype::{Phenotype, Variant};
    use crate::test_support::test_params;
    use organoid_common::SimParams;

    fn ctx() -> SimulationContext {
        SimulationContext::new(3, 0.01)
    }

    fn make_pair(
        params: &SimParams,
        ctx: &mut SimulationContext,
        pos_a: Vec3,
        pos_b: Vec3,
        variant_a: Variant,
        variant_b: Variant,
    ) -> (Population, AgentId, AgentId) {
        let mut pop = Population::new();
        let a = pop.spawn(pos_a, Phenotype::new(variant_a), params, ctx).unwrap();
        let b = pop.spawn(pos_b, Phenotype::new(variant_b), params, ctx).unwrap();
        (pop, a, b)
    }

    #[test]
    fn zero_force_at_rest_length() {
        // Two luminal cells separated by exactly the rest length (sum of the
        // two default radii) feel no net force.
        let params = test_params();
        let mut ctx = ctx();
        let rest = 2.0 * params.default_radius;
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.0 + rest, 3.0, 1.0),
            Variant::Luminal,
            Variant::Luminal,
        );
        let mut model = SpringForceModel::new();
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(f.length() < 1e-6);
    }

    #[test]
    fn forces_obey_newtons_third_law() {
        let params = test_params();
        let mut ctx = ctx();
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.7, 3.4, 1.2),
            Variant::Luminal,
            Variant::Myoepithelial,
        );
        let mut model = SpringForceModel::new();
        let f_ab = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        let f_ba = model
            .force_between(pop.agent(b).unwrap(), pop.agent(a).unwrap(), &params, &ctx)
            .unwrap();
        assert!((f_ab.x + f_ba.x).abs() < 1e-6);
        assert!((f_ab.y + f_ba.y).abs() < 1e-6);
        assert!((f_ab.z + f_ba.z).abs() < 1e-6);
    }

    #[test]
    fn multiplier_is_symmetric_across_phenotype_orderings() {
        let params = test_params();
        let mut ctx = ctx();
        let variants = [
            Variant::Luminal,
            Variant::Myoepithelial,
            Variant::LuminalStem,
            Variant::MyoepithelialStem,
            Variant::Unlabeled,
        ];
        for &va in &variants {
            for &vb in &variants {
                let (pop, a, b) = make_pair(
                    &params,
                    &mut ctx,
                    Vec3::new(3.0, 3.0, 1.0),
                    Vec3::new(4.2, 3.0, 1.0),
                    va,
                    vb,
                );
                let mut model = SpringForceModel::new();
                let f_ab = model
                    .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
                    .unwrap();
                let f_ba = model
                    .force_between(pop.agent(b).unwrap(), pop.agent(a).unwrap(), &params, &ctx)
                    .unwrap();
                assert!(
                    (f_ab.length() - f_ba.length()).abs() < 1e-6,
                    "asymmetric multiplier for {:?}/{:?}",
                    va,
                    vb
                );
            }
        }
    }

    #[test]
    fn force_law_is_continuous_at_zero_overlap() {
        let params = test_params();
        let mut ctx = ctx();
        let rest = 2.0 * params.default_radius;
        let eps = 1e-4f32;

        for offset in [-eps, 0.0, eps] {
            let (pop, a, b) = make_pair(
                &params,
                &mut ctx,
                Vec3::new(3.0, 3.0, 1.0),
                Vec3::new(3.0 + rest + offset, 3.0, 1.0),
                Variant::Luminal,
                Variant::Luminal,
            );
            let mut model = SpringForceModel::new();
            let f = model
                .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
                .unwrap();
            // Both branches vanish at the boundary; with a tiny offset the
            // magnitude stays of order stiffness * |offset|.
            assert!(f.length() <= params.cell_cell_stiffness * eps * 2.0 + 1e-6);
        }
    }

    #[test]
    fn coincident_agents_are_fatal() {
        let params = test_params();
        let mut ctx = ctx();
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.0, 3.0, 1.0),
            Variant::Luminal,
            Variant::Luminal,
        );
        let mut model = SpringForceModel::new();
        let result = model.force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx);
        assert!(result.is_err());
    }

    #[test]
    fn cutoff_short_circuits_to_zero() {
        let mut params = test_params();
        params.cutoff_length = Some(1.2);
        let mut ctx = ctx();
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(4.5, 3.0, 1.0),
            Variant::Luminal,
            Variant::Luminal,
        );
        let mut model = SpringForceModel::new();
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert_eq!(f.length(), 0.0);
    }

    #[test]
    fn division_marked_pair_grows_rest_length_then_unmarks() {
        // Scenario: siblings at age 0 with division_rest_length 0.5 and a
        // one-hour growth window. At age 0 the rest length is exactly half
        // the final one; at age T_g the pair must be unmarked and revert.
        let mut params = test_params();
        params.division_rest_length = 0.5;
        params.spring_growth_duration = 1.0;
        let mut ctx = SimulationContext::new(3, 0.01);

        let rest = 2.0 * params.default_radius;
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.0 + 0.5 * rest, 3.0, 1.0), // separation = L_min
            Variant::LuminalStem,
            Variant::Luminal,
        );
        let mut model = SpringForceModel::new();
        model.registry_mut().mark(a, b, ctx.time);

        // At age 0 the rest length equals L_min = 0.5 * rest, so the force at
        // separation 0.5 * rest is zero.
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(f.length() < 1e-6);
        assert!(model.registry_mut().is_marked(a, b));

        // At age T_g the window closes: the pair unmarks and reverts to the
        // final rest length, so the same separation is now compressive.
        ctx.time = params.spring_growth_duration;
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(!model.registry_mut().is_marked(a, b));
        // Repulsive: pushes a away from b (negative x for force on a).
        assert!(f.x < 0.0);
    }

    #[test]
    fn apoptotic_agent_shrinks_its_rest_length_side() {
        let params = test_params();
        let mut ctx = ctx();
        let rest = 2.0 * params.default_radius;
        let (mut pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.0 + rest, 3.0, 1.0),
            Variant::Luminal,
            Variant::Luminal,
        );
        // Halfway through apoptosis agent a's side is half-shrunk, pulling the
        // rest length below the separation and producing attraction.
        pop.start_apoptosis(a, 0.0);
        ctx.time = 0.5 * params.apoptosis_duration;
        let mut model = SpringForceModel::new();
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(f.x > 0.0);
    }

    #[test]
    fn accumulate_applies_equal_and_opposite_forces() {
        let params = test_params();
        let mut ctx = ctx();
        let (mut pop, _a, _b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(3.6, 3.0, 1.0),
            Variant::Luminal,
            Variant::Luminal,
        );
        pop.rebuild_grid(&params);
        let mut model = SpringForceModel::new();
        model.accumulate(&mut pop, &params, &ctx).unwrap();

        let agents = pop.agents();
        let net = agents[0].applied_force.add(agents[1].applied_force);
        assert!(net.length() < 1e-6);
        assert!(agents[0].applied_force.length() > 0.0);
    }

    #[test]
    fn pair_kinds_use_their_own_rest_lengths() {
        let mut params = test_params();
        // 1.5 and the 4.5 x-coordinate below are exactly representable in
        // f32, so the first pair's overlap is exactly zero.
        params.cell_ecm_rest_length = 1.5;
        params.ecm_ecm_rest_length = 0.6;
        let mut ctx = ctx();

        // A cell-ECM pair at exactly the cell-ECM rest length feels nothing.
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(4.5, 3.0, 1.0),
            Variant::Luminal,
            Variant::Ecm,
        );
        let mut model = SpringForceModel::new();
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(f.length() < 1e-6);

        // An ECM-ECM pair at the same separation is past its shorter rest
        // length and is pulled back together.
        let (pop, a, b) = make_pair(
            &params,
            &mut ctx,
            Vec3::new(3.0, 3.0, 1.0),
            Vec3::new(4.5, 3.0, 1.0),
            Variant::Ecm,
            Variant::Ecm,
        );
        let f = model
            .force_between(pop.agent(a).unwrap(), pop.agent(b).unwrap(), &params, &ctx)
            .unwrap();
        assert!(f.x > 0.0);
    }

    #[test]
    fn expire_sweeps_pairs_that_were_never_evaluated() {
        // A marked pair that stays out of interaction range for the whole
        // growth window must still drop out of the registry, so a later
        // division of either sibling cannot put it back in growth.
        let params = test_params();
        let mut registry = DivisionPairRegistry::new();
        registry.mark(0, 1, 0.0);
        registry.mark(2, 3, 0.9);

        registry.expire(params.spring_growth_duration, 0.01, params.spring_growth_duration);
        assert!(!registry.is_marked(0, 1));
        assert!(registry.is_marked(2, 3));
    }

    #[test]
    fn log_branch_argument_out_of_domain_is_fatal() {
        assert!(spring_magnitude(1.0, 15.0, -1.0, 1.0, 5.0).is_err());
        assert!(spring_magnitude(1.0, 15.0, -1.5, 1.0, 5.0).is_err());
        // Just inside the domain: finite and repulsive.
        let magnitude = spring_magnitude(1.0, 15.0, -0.99, 1.0, 5.0).unwrap();
        assert!(magnitude.is_finite());
        assert!(magnitude < 0.0);
    }
}
