use crate::actor::{Id, OperationId};
use crate::strategy::pct::{defer_change_point, draw_points};
use crate::strategy::random::coin;
use crate::strategy::{SchedulingStrategy, UnitInfo};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Operation ids with at least one enabled unit, ascending.
fn enabled_operations(units: &[UnitInfo]) -> Vec<OperationId> {
    let ops: BTreeSet<_> = units.iter().filter(|u| u.is_enabled()).map(|u| u.operation_id).collect();
    ops.into_iter().collect()
}

fn operation_of(units: &[UnitInfo], id: Id) -> Option<OperationId> {
    units.iter().find(|u| u.id == id).map(|u| u.operation_id)
}

/// Keeps running units of one operation, switching to a random other operation at up to
/// `max_switches` random points per iteration or when the current operation has nothing enabled.
pub struct RandomOperationBoundingStrategy {
    // Immutable state.
    seed: u64,
    depth_bound: usize,
    max_switches: usize,

    // Mutable state.
    rng: SmallRng,
    switch_points: BTreeSet<usize>,
    operation: Option<OperationId>,
    explored_steps: usize,
    max_explored_steps: usize,
}

impl RandomOperationBoundingStrategy {
    pub fn new(seed: u64, depth_bound: usize, max_switches: usize) -> Self {
        RandomOperationBoundingStrategy {
            seed,
            depth_bound,
            max_switches,
            rng: SmallRng::seed_from_u64(seed),
            switch_points: BTreeSet::new(),
            operation: None,
            explored_steps: 0,
            max_explored_steps: 0,
        }
    }

    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }
}

impl SchedulingStrategy for RandomOperationBoundingStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        let ops = enabled_operations(units);
        if ops.is_empty() {
            return None;
        }
        if self.operation.is_none() {
            self.operation = current.and_then(|id| operation_of(units, id));
        }

        let mut switch = self.switch_points.contains(&self.explored_steps);
        if switch && ops.len() == 1 {
            defer_change_point(&mut self.switch_points, self.explored_steps);
            switch = false;
        }
        let keep = self.operation.filter(|op| ops.contains(op) && !switch);
        let operation = match keep {
            Some(op) => op,
            None => {
                let others: Vec<_> = ops.iter().copied().filter(|op| Some(*op) != self.operation).collect();
                let pool = if others.is_empty() { &ops } else { &others };
                let op = pool[self.rng.gen_range(0..pool.len())];
                log::debug!(
                    "Switched operation. from={:?}, to={}, step={}",
                    self.operation,
                    op,
                    self.explored_steps
                );
                op
            }
        };
        self.operation = Some(operation);

        let candidates: Vec<_> = units
            .iter()
            .filter(|u| u.is_enabled() && u.operation_id == operation)
            .map(|u| u.id)
            .collect();
        self.explored_steps += 1;
        Some(candidates[self.rng.gen_range(0..candidates.len())])
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
        self.operation = None;
        self.switch_points = draw_points(&mut self.rng, self.max_switches, self.max_explored_steps);
    }

    fn reset(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.switch_points.clear();
        self.operation = None;
        self.explored_steps = 0;
        self.max_explored_steps = 0;
    }

    fn description(&self) -> String {
        format!(
            "RandomOperationBounding[seed={}, max_switches={}, switch_points={:?}]",
            self.seed, self.max_switches, self.switch_points
        )
    }
}

/// PCT over operations: a randomized priority order over operation ids, with `bug_depth - 1`
/// change points that demote the highest-priority enabled operation. Within the chosen
/// operation the current unit keeps running if it can, otherwise the lowest id runs.
pub struct PrioritizedOperationBoundingStrategy {
    // Immutable state.
    seed: u64,
    depth_bound: usize,
    bug_depth: usize,

    // Mutable state.
    rng: SmallRng,
    priorities: Vec<OperationId>,
    change_points: BTreeSet<usize>,
    explored_steps: usize,
    max_explored_steps: usize,
}

impl PrioritizedOperationBoundingStrategy {
    pub fn new(seed: u64, depth_bound: usize, bug_depth: usize) -> Self {
        PrioritizedOperationBoundingStrategy {
            seed,
            depth_bound,
            bug_depth,
            rng: SmallRng::seed_from_u64(seed),
            priorities: Vec::new(),
            change_points: BTreeSet::new(),
            explored_steps: 0,
            max_explored_steps: 0,
        }
    }

    pub fn priorities(&self) -> &[OperationId] {
        &self.priorities
    }

    fn discover(&mut self, units: &[UnitInfo], current: Option<Id>) {
        if self.priorities.is_empty() {
            if let Some(op) = current.and_then(|id| operation_of(units, id)) {
                self.priorities.push(op);
            }
        }
        for unit in units.iter().filter(|u| u.is_enabled()) {
            if self.priorities.contains(&unit.operation_id) {
                continue;
            }
            let index = if self.priorities.is_empty() {
                0
            } else {
                self.rng.gen_range(0..self.priorities.len()) + 1
            };
            self.priorities.insert(index, unit.operation_id);
        }
    }

    fn highest_enabled(&self, ops: &[OperationId]) -> Option<usize> {
        self.priorities.iter().position(|op| ops.contains(op))
    }
}

impl SchedulingStrategy for PrioritizedOperationBoundingStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        let ops = enabled_operations(units);
        if ops.is_empty() {
            return None;
        }
        self.discover(units, current);

        if self.change_points.contains(&self.explored_steps) {
            if ops.len() == 1 {
                defer_change_point(&mut self.change_points, self.explored_steps);
            } else if let Some(index) = self.highest_enabled(&ops) {
                let demoted = self.priorities.remove(index);
                self.priorities.push(demoted);
                log::debug!("Demoted operation. operation={}, step={}", demoted, self.explored_steps);
            }
        }

        let operation = self.priorities[self.highest_enabled(&ops)?];
        let mut candidates = units.iter().filter(|u| u.is_enabled() && u.operation_id == operation);
        let chosen = match current {
            Some(current) if units.iter().any(|u| u.id == current && u.is_enabled() && u.operation_id == operation) => {
                current
            }
            _ => candidates.next()?.id,
        };
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
        self.priorities.clear();
        self.change_points.clear();
        self.explored_steps = 0;
        self.max_explored_steps = 0;
    }

    fn description(&self) -> String {
        format!(
            "PrioritizedOperationBounding[seed={}, bug_depth={}, change_points={:?}]",
            self.seed, self.bug_depth, self.change_points
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RunStatus;

    fn unit(id: usize, operation_id: OperationId) -> UnitInfo {
        UnitInfo { id: Id::from(id), status: RunStatus::Enabled, operation_id }
    }

    #[test]
    fn sticks_to_current_operation_without_switch_points() {
        let units = vec![unit(0, 1), unit(1, 2), unit(2, 1), unit(3, 2)];
        let mut rob = RandomOperationBoundingStrategy::new(4, 0, 0);
        for _ in 0..20 {
            let chosen = rob.next_unit(&units, Some(Id::from(1))).unwrap();
            assert_eq!(operation_of(&units, chosen), Some(2));
        }
        assert_eq!(rob.operation(), Some(2));
    }

    #[test]
    fn switches_at_switch_points() {
        let units = vec![unit(0, 1), unit(1, 2)];
        let mut rob = RandomOperationBoundingStrategy::new(4, 0, 0);
        rob.switch_points.insert(1);
        assert_eq!(rob.next_unit(&units, Some(Id::from(0))), Some(Id::from(0)));
        assert_eq!(rob.next_unit(&units, Some(Id::from(0))), Some(Id::from(1)));
        assert_eq!(rob.next_unit(&units, Some(Id::from(1))), Some(Id::from(1)));
    }

    #[test]
    fn falls_back_when_operation_has_nothing_enabled() {
        let mut units = vec![unit(0, 1), unit(1, 2)];
        let mut rob = RandomOperationBoundingStrategy::new(4, 0, 0);
        assert_eq!(rob.next_unit(&units, Some(Id::from(0))), Some(Id::from(0)));
        units[0].status = RunStatus::Idle;
        assert_eq!(rob.next_unit(&units, Some(Id::from(0))), Some(Id::from(1)));
    }

    #[test]
    fn prioritized_runs_highest_operation() {
        let units = vec![unit(0, 1), unit(1, 2), unit(2, 3)];
        let mut pob = PrioritizedOperationBoundingStrategy::new(0, 0, 1);
        pob.priorities = vec![3, 1, 2];
        assert_eq!(pob.next_unit(&units, None), Some(Id::from(2)));

        pob.change_points.insert(pob.explored_steps());
        assert_eq!(pob.next_unit(&units, None), Some(Id::from(0)));
        assert_eq!(pob.priorities(), &[1, 2, 3]);
    }

    #[test]
    fn prioritized_prefers_current_unit_within_operation() {
        let units = vec![unit(0, 1), unit(1, 1), unit(2, 2)];
        let mut pob = PrioritizedOperationBoundingStrategy::new(0, 0, 1);
        pob.priorities = vec![1, 2];
        assert_eq!(pob.next_unit(&units, Some(Id::from(1))), Some(Id::from(1)));
        assert_eq!(pob.next_unit(&units, Some(Id::from(2))), Some(Id::from(0)));
    }

    #[test]
    fn prioritized_skips_operations_with_nothing_enabled() {
        let mut units = vec![unit(0, 1), unit(1, 2)];
        units[1].status = RunStatus::BlockedOnReceive;
        let mut pob = PrioritizedOperationBoundingStrategy::new(5, 0, 1);
        assert_eq!(pob.next_unit(&units, None), Some(Id::from(0)));
        assert_eq!(pob.priorities(), &[1]);

        units[1].status = RunStatus::Enabled;
        pob.next_unit(&units, None);
        assert_eq!(pob.priorities().len(), 2);
    }
}
