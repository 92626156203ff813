use crate::actor::Id;
use crate::strategy::{enabled, SchedulingStrategy, UnitInfo};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Uniformly picks among enabled units and resolves choices with a seeded generator.
pub struct RandomStrategy {
    // Immutable state.
    seed: u64,
    depth_bound: usize,

    // Mutable state.
    rng: SmallRng,
    explored_steps: usize,
    max_explored_steps: usize,
}

impl RandomStrategy {
    pub fn new(seed: u64, depth_bound: usize) -> Self {
        RandomStrategy {
            seed,
            depth_bound,
            rng: SmallRng::seed_from_u64(seed),
            explored_steps: 0,
            max_explored_steps: 0,
        }
    }
}

/// `true` with probability `1 / max_value`.
pub(crate) fn coin(rng: &mut SmallRng, max_value: usize) -> bool {
    rng.gen_range(0..max_value.max(1)) == 0
}

impl SchedulingStrategy for RandomStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], _current: Option<Id>) -> Option<Id> {
        let enabled = enabled(units);
        if enabled.is_empty() {
            return None;
        }
        let chosen = enabled[self.rng.gen_range(0..enabled.len())];
        self.explored_steps += 1;
        Some(chosen)
    }

    fn next_choice(&mut self, max_value: usize) -> Option<bool> {
        self.explored_steps += 1;
        Some(coin(&mut self.rng, max_value))
    }

    fn explored_steps(&self) -> usize {
        self.explored_steps
    }

    fn max_explored_steps(&self) -> usize {
        self.max_explored_steps
    }

    fn depth_bound(&self) -> usize {
        self.depth_bound
    }

    fn has_finished(&self) -> bool {
        false
    }

    fn configure_next_iteration(&mut self) {
        self.max_explored_steps = self.max_explored_steps.max(self.explored_steps);
        self.explored_steps = 0;
    }

    fn reset(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.explored_steps = 0;
        self.max_explored_steps = 0;
    }

    fn description(&self) -> String {
        format!("Random[seed={}]", self.seed)
    }
}
