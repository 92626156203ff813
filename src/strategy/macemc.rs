use crate::actor::Id;
use crate::strategy::{IddfsStrategy, RandomStrategy, SchedulingStrategy, UnitInfo};

/// Liveness-guided search in the style of MaceMC: an iterative-deepening prefix of at most
/// `safety_prefix_bound` decisions, then a random walk until the overall depth bound. The long
/// random suffixes are what let cycles repeat often enough to be detected.
pub struct MaceMcStrategy {
    prefix: IddfsStrategy,
    walk: RandomStrategy,
    depth_bound: usize,
}

impl MaceMcStrategy {
    pub fn new(seed: u64, depth_bound: usize, safety_prefix_bound: usize) -> Self {
        MaceMcStrategy {
            prefix: IddfsStrategy::new(safety_prefix_bound),
            walk: RandomStrategy::new(seed, 0),
            depth_bound,
        }
    }

    fn in_prefix(&self) -> bool {
        !self.prefix.has_reached_depth_bound()
    }
}

impl SchedulingStrategy for MaceMcStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        if self.in_prefix() {
            self.prefix.next_unit(units, current)
        } else {
            self.walk.next_unit(units, current)
        }
    }

    fn next_choice(&mut self, max_value: usize) -> Option<bool> {
        if self.in_prefix() {
            self.prefix.next_choice(max_value)
        } else {
            self.walk.next_choice(max_value)
        }
    }

    fn explored_steps(&self) -> usize {
        self.prefix.explored_steps() + self.walk.explored_steps()
    }

    fn max_explored_steps(&self) -> usize {
        self.prefix.max_explored_steps() + self.walk.max_explored_steps()
    }

    fn depth_bound(&self) -> usize {
        self.depth_bound
    }

    fn has_finished(&self) -> bool {
        self.prefix.has_finished()
    }

    fn configure_next_iteration(&mut self) {
        self.prefix.configure_next_iteration();
        self.walk.configure_next_iteration();
    }

    fn reset(&mut self) {
        self.prefix.reset();
        self.walk.reset();
    }

    fn description(&self) -> String {
        format!(
            "MaceMC[prefix={}, walk={}, depth_bound={}]",
            self.prefix.description(),
            self.walk.description(),
            self.depth_bound
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::strategy::test_units::*;

    #[test]
    fn prefix_then_random_walk() {
        let mut macemc = MaceMcStrategy::new(3, 6, 2);
        let units = all_enabled(2);
        let mut steps = 0;
        while !macemc.has_reached_depth_bound() {
            macemc.next_unit(&units, None).unwrap();
            steps += 1;
        }
        assert_eq!(steps, 6);
        // The prefix is capped at its current iterative-deepening depth.
        assert_eq!(macemc.prefix.explored_steps(), 1);
        assert_eq!(macemc.walk.explored_steps(), 5);
    }

    #[test]
    fn finishes_with_prefix_search() {
        let mut macemc = MaceMcStrategy::new(3, 4, 1);
        let units = all_enabled(2);
        let mut iterations = 0;
        while !macemc.has_finished() {
            while !macemc.has_reached_depth_bound() {
                macemc.next_unit(&units, None);
            }
            macemc.configure_next_iteration();
            iterations += 1;
        }
        assert_eq!(iterations, 2);
        assert_eq!(macemc.explored_steps(), 0);
    }
}
