use crate::actor::Id;
use crate::strategy::{SchedulingStrategy, UnitInfo};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Probabilistic concurrency testing.
///
/// Keeps a randomized total order over every unit seen so far and always runs the
/// highest-priority enabled unit. At `bug_depth - 1` change points, drawn uniformly from the
/// longest iteration seen so far, the highest-priority enabled unit is demoted to lowest
/// priority. A change point that falls on a step with a single enabled unit moves to the next
/// free step.
pub struct PctStrategy {
    // Immutable state.
    seed: u64,
    depth_bound: usize,
    bug_depth: usize,

    // Mutable state.
    rng: SmallRng,
    explored_steps: usize,
    max_explored_steps: usize,
    /// Highest priority first.
    priorities: Vec<Id>,
    change_points: BTreeSet<usize>,
}

impl PctStrategy {
    pub fn new(seed: u64, depth_bound: usize, bug_depth: usize) -> Self {
        PctStrategy {
            seed,
            depth_bound,
            bug_depth,
            rng: SmallRng::seed_from_u64(seed),
            explored_steps: 0,
            max_explored_steps: 0,
            priorities: Vec::new(),
            change_points: BTreeSet::new(),
        }
    }

    /// The current priority list, highest first.
    pub fn priorities(&self) -> &[Id] {
        &self.priorities
    }

    pub fn change_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.change_points.iter().copied()
    }

    fn discover(&mut self, units: &[UnitInfo], current: Option<Id>) {
        if self.priorities.is_empty() {
            if let Some(current) = current {
                self.priorities.push(current);
            }
        }
        for unit in units.iter().filter(|u| u.is_enabled()) {
            if self.priorities.contains(&unit.id) {
                continue;
            }
            let index = if self.priorities.is_empty() {
                0
            } else {
                self.rng.gen_range(0..self.priorities.len()) + 1
            };
            self.priorities.insert(index, unit.id);
            log::debug!("Inserted priority. id={:?}, index={}", unit.id, index);
        }
    }

    fn is_enabled(units: &[UnitInfo], id: Id) -> bool {
        units.iter().any(|u| u.id == id && u.is_enabled())
    }

    fn highest_enabled(&self, units: &[UnitInfo]) -> Option<usize> {
        self.priorities.iter().position(|id| Self::is_enabled(units, *id))
    }
}

/// Moves a change point that landed on a forced step to the next step without one.
pub(crate) fn defer_change_point(points: &mut BTreeSet<usize>, step: usize) {
    points.remove(&step);
    let mut next = step + 1;
    while points.contains(&next) {
        next += 1;
    }
    points.insert(next);
}

/// Draws `count` points uniformly from `0..max`.
pub(crate) fn draw_points(rng: &mut SmallRng, count: usize, max: usize) -> BTreeSet<usize> {
    let mut points = BTreeSet::new();
    if max > 0 {
        for _ in 0..count {
            points.insert(rng.gen_range(0..max));
        }
    }
    points
}

impl SchedulingStrategy for PctStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        let enabled_count = units.iter().filter(|u| u.is_enabled()).count();
        if enabled_count == 0 {
            return None;
        }
        self.discover(units, current);

        if self.change_points.contains(&self.explored_steps) {
            if enabled_count == 1 {
                defer_change_point(&mut self.change_points, self.explored_steps);
            } else if let Some(index) = self.highest_enabled(units) {
                let demoted = self.priorities.remove(index);
                self.priorities.push(demoted);
                log::debug!("Demoted priority. id={:?}, step={}", demoted, self.explored_steps);
            }
        }

        let chosen = self.priorities[self.highest_enabled(units)?];
        self.explored_steps += 1;
        Some(chosen)
    }

    fn next_choice(&mut self, _max_value: usize) -> Option<bool> {
        let choice = self.change_points.contains(&self.explored_steps);
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
        false
    }

    fn configure_next_iteration(&mut self) {
        self.max_explored_steps = self.max_explored_steps.max(self.explored_steps);
        self.explored_steps = 0;
        self.priorities.clear();
        self.change_points = draw_points(
            &mut self.rng,
            self.bug_depth.saturating_sub(1),
            self.max_explored_steps,
        );
    }

    fn reset(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.explored_steps = 0;
        self.max_explored_steps = 0;
        self.priorities.clear();
        self.change_points.clear();
    }

    fn description(&self) -> String {
        format!(
            "PCT[seed={}, bug_depth={}, change_points={:?}]",
            self.seed, self.bug_depth, self.change_points
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::strategy::test_units::*;
    use crate::RunStatus;

    #[test]
    fn current_unit_is_listed_before_choosing() {
        let mut pct = PctStrategy::new(11, 0, 1);
        let units = all_enabled(3);
        pct.next_unit(&units, Some(Id::from(1)));
        assert_eq!(pct.priorities()[0], Id::from(1));
        assert_eq!(pct.priorities().len(), 3);
    }

    #[test]
    fn only_enabled_units_get_priorities() {
        let mut pct = PctStrategy::new(3, 0, 2);
        let waiting = units(&[RunStatus::Enabled, RunStatus::Idle, RunStatus::BlockedOnReceive]);
        assert_eq!(pct.next_unit(&waiting, None), Some(Id::from(0)));
        assert_eq!(pct.priorities(), &[Id::from(0)][..]);

        let woken = units(&[RunStatus::Enabled, RunStatus::Enabled, RunStatus::BlockedOnReceive]);
        pct.next_unit(&woken, None);
        assert_eq!(pct.priorities().len(), 2);
        assert!(!pct.priorities().contains(&Id::from(2)));
    }

    #[test]
    fn chooses_highest_priority_enabled_unit() {
        for seed in 0..20 {
            let mut pct = PctStrategy::new(seed, 0, 3);
            let mut statuses = vec![RunStatus::Enabled; 4];
            for step in 0..30 {
                // Vary which units are enabled.
                statuses[step % 4] = RunStatus::Idle;
                statuses[(step + 2) % 4] = RunStatus::Enabled;
                let units = units(&statuses);
                let chosen = pct.next_unit(&units, Some(Id::from(0))).unwrap();
                let expected = pct
                    .priorities()
                    .iter()
                    .copied()
                    .find(|id| units[usize::from(*id)].is_enabled())
                    .unwrap();
                assert_eq!(chosen, expected, "seed={seed}, step={step}");
            }
            pct.configure_next_iteration();
        }
    }

    #[test]
    fn change_points_come_from_previous_iteration() {
        let mut pct = PctStrategy::new(5, 0, 4);
        let units = all_enabled(2);
        for _ in 0..10 {
            pct.next_unit(&units, None);
        }
        pct.configure_next_iteration();
        assert_eq!(pct.max_explored_steps(), 10);
        let points: Vec<_> = pct.change_points().collect();
        assert!(!points.is_empty() && points.len() <= 3);
        assert!(points.iter().all(|p| *p < 10));
    }

    #[test]
    fn change_point_demotes_highest_enabled() {
        let mut pct = PctStrategy::new(0, 0, 2);
        pct.priorities = Id::vec_from([2_usize, 0, 1]);
        pct.change_points.insert(0);
        let chosen = pct.next_unit(&all_enabled(3), None);
        assert_eq!(chosen, Some(Id::from(0)));
        assert_eq!(pct.priorities(), &Id::vec_from([0_usize, 1, 2])[..]);
    }

    #[test]
    fn change_point_on_forced_step_is_deferred() {
        let mut pct = PctStrategy::new(0, 0, 2);
        pct.priorities = Id::vec_from([0_usize, 1]);
        pct.change_points.insert(0);
        pct.change_points.insert(1);
        let units = units(&[RunStatus::Enabled, RunStatus::Idle]);
        assert_eq!(pct.next_unit(&units, None), Some(Id::from(0)));
        assert_eq!(pct.change_points().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn same_seed_same_schedule() {
        let run = |pct: &mut PctStrategy| {
            let units = all_enabled(3);
            let mut schedule = Vec::new();
            for _ in 0..3 {
                for _ in 0..8 {
                    schedule.push(pct.next_unit(&units, Some(Id::from(0))));
                }
                pct.configure_next_iteration();
            }
            schedule
        };
        let mut a = PctStrategy::new(42, 0, 3);
        let first = run(&mut a);
        a.reset();
        assert_eq!(run(&mut a), first);
        assert_eq!(run(&mut PctStrategy::new(42, 0, 3)), first);
    }
}
