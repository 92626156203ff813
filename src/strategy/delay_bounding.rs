use crate::actor::Id;
use crate::strategy::random::coin;
use crate::strategy::{round_robin, SchedulingStrategy, UnitInfo};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Exhaustive delay bounding.
///
/// Units run in round-robin order starting from the current unit, so without delays the
/// current unit keeps running. A delay at step `s` skips to the next unit in that order.
/// Successive iterations enumerate every placement of `max_delays` delays (several may share
/// a step) over the longest schedule observed so far, starting with the delay-free schedule.
pub struct DelayBoundingStrategy {
    depth_bound: usize,
    max_delays: usize,
    /// Non-decreasing steps at which a delay is injected.
    delays: Vec<usize>,
    started: bool,
    explored_steps: usize,
    max_explored_steps: usize,
    finished: bool,
}

impl DelayBoundingStrategy {
    pub fn new(depth_bound: usize, max_delays: usize) -> Self {
        DelayBoundingStrategy {
            depth_bound,
            max_delays,
            delays: Vec::new(),
            started: false,
            explored_steps: 0,
            max_explored_steps: 0,
            finished: false,
        }
    }

    pub fn delays(&self) -> &[usize] {
        &self.delays
    }

    /// Advances `delays` to the next placement, or returns false once every placement within
    /// `horizon` steps has been tried.
    fn advance(&mut self, horizon: usize) -> bool {
        let mut i = self.delays.len();
        while i > 0 {
            i -= 1;
            if self.delays[i] + 1 < horizon {
                let next = self.delays[i] + 1;
                for delay in &mut self.delays[i..] {
                    *delay = next;
                }
                return true;
            }
        }
        false
    }
}

fn delays_at(delays: &[usize], step: usize) -> usize {
    delays.iter().filter(|d| **d == step).count()
}

impl SchedulingStrategy for DelayBoundingStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        let ordered = round_robin(units, current);
        if ordered.is_empty() {
            return None;
        }
        let skips = delays_at(&self.delays, self.explored_steps);
        if skips > 0 {
            log::debug!("Injected delay. step={}, skips={}", self.explored_steps, skips);
        }
        self.explored_steps += 1;
        Some(ordered[skips % ordered.len()])
    }

    fn next_choice(&mut self, _max_value: usize) -> Option<bool> {
        let choice = delays_at(&self.delays, self.explored_steps) % 2 == 1;
        self.explored_steps += 1;
        Some(choice)
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
        self.finished
    }

    fn configure_next_iteration(&mut self) {
        self.max_explored_steps = self.max_explored_steps.max(self.explored_steps);
        self.explored_steps = 0;
        let horizon = self.max_explored_steps;
        if !self.started {
            self.started = true;
            self.delays = vec![0; self.max_delays];
            self.finished = self.max_delays == 0 || horizon == 0;
        } else {
            self.finished = !self.advance(horizon);
        }
    }

    fn reset(&mut self) {
        self.delays.clear();
        self.started = false;
        self.explored_steps = 0;
        self.max_explored_steps = 0;
        self.finished = false;
    }

    fn description(&self) -> String {
        format!("DelayBounding[max_delays={}, delays={:?}]", self.max_delays, self.delays)
    }
}

/// Delay bounding with `max_delays` delay steps drawn at random each iteration from the longest
/// schedule seen so far. Each delay skips a random number of units in round-robin order.
pub struct RandomDelayBoundingStrategy {
    // Immutable state.
    seed: u64,
    depth_bound: usize,
    max_delays: usize,

    // Mutable state.
    rng: SmallRng,
    delays: Vec<usize>,
    explored_steps: usize,
    max_explored_steps: usize,
}

impl RandomDelayBoundingStrategy {
    pub fn new(seed: u64, depth_bound: usize, max_delays: usize) -> Self {
        RandomDelayBoundingStrategy {
            seed,
            depth_bound,
            max_delays,
            rng: SmallRng::seed_from_u64(seed),
            delays: Vec::new(),
            explored_steps: 0,
            max_explored_steps: 0,
        }
    }

    pub fn delays(&self) -> &[usize] {
        &self.delays
    }
}

impl SchedulingStrategy for RandomDelayBoundingStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        let ordered = round_robin(units, current);
        if ordered.is_empty() {
            return None;
        }
        let mut index = 0;
        for _ in 0..delays_at(&self.delays, self.explored_steps) {
            index = (index + self.rng.gen_range(0..ordered.len())) % ordered.len();
        }
        self.explored_steps += 1;
        Some(ordered[index])
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
        self.delays.clear();
        if self.max_explored_steps > 0 {
            for _ in 0..self.max_delays {
                self.delays.push(self.rng.gen_range(0..self.max_explored_steps));
            }
        }
        self.delays.sort_unstable();
    }

    fn reset(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.delays.clear();
        self.explored_steps = 0;
        self.max_explored_steps = 0;
    }

    fn description(&self) -> String {
        format!(
            "RandomDelayBounding[seed={}, max_delays={}, delays={:?}]",
            self.seed, self.max_delays, self.delays
        )
    }
}
