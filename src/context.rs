use rand::prelude::*;

/// Explicitly-threaded simulation clock and RNG. Replaces global singletons so
/// every consumer sees the same deterministic, seeded stream.
pub struct SimulationContext {
    /// Current simulation time in hours.
    pub time: f32,
    /// Physics timestep in hours.
    pub dt: f32,
    /// Host-side RNG for placement, cycle draws and stochastic death.
    pub rng: StdRng,
}

impl SimulationContext {
    pub fn new(seed: u64, dt: f32) -> Self {
        SimulationContext {
            time: 0.0,
            dt,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advances the clock by one timestep.
    pub fn advance(&mut self) {
        self.time += self.dt;
    }
}
