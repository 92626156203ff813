//! Pluggable scheduling strategies.
//!
//! At every scheduling point the runtime hands the strategy a snapshot of the registered units
//! and asks which one runs next. Nondeterministic boolean choices made by the program are
//! resolved by the same strategy, so a strategy plus its seed fully determines an iteration.
//!
//! | Strategy | Systematic? | Notes |
//! |---|---|---|
//! | [`RandomStrategy`] | no | uniform choice, seeded |
//! | [`DfsStrategy`] | yes | backtracks over a combined decision stack |
//! | [`IddfsStrategy`] | yes | DFS with a depth bound that grows between passes |
//! | [`PctStrategy`] | no | randomized priorities with `bug_depth - 1` change points |
//! | [`DelayBoundingStrategy`] | yes | every placement of a bounded number of delays |
//! | [`RandomDelayBoundingStrategy`] | no | randomly placed delays |
//! | [`RandomOperationBoundingStrategy`] | no | sticks to one operation between switch points |
//! | [`PrioritizedOperationBoundingStrategy`] | no | PCT over operation ids |
//! | [`MaceMcStrategy`] | partly | IDDFS prefix followed by a random walk |
//! | [`ReplayStrategy`] | n/a | forces a recorded [`Trace`](crate::Trace) |

use crate::actor::{Id, OperationId};
use crate::RunStatus;

mod delay_bounding;
mod dfs;
mod macemc;
mod operation_bounding;
mod pct;
mod random;
mod replay;

pub use delay_bounding::{DelayBoundingStrategy, RandomDelayBoundingStrategy};
pub use dfs::{DfsStrategy, IddfsStrategy};
pub use macemc::MaceMcStrategy;
pub use operation_bounding::{PrioritizedOperationBoundingStrategy, RandomOperationBoundingStrategy};
pub use pct::PctStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

/// What a strategy can see of a registered unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnitInfo {
    pub id: Id,
    pub status: RunStatus,
    pub operation_id: OperationId,
}

impl UnitInfo {
    pub fn is_enabled(&self) -> bool {
        self.status == RunStatus::Enabled
    }
}

/// Decides which unit runs next and resolves nondeterministic choices.
pub trait SchedulingStrategy: Send {
    /// Picks the next unit among the enabled entries of `units` (which are ordered by id).
    /// `current` is the unit that made the previous decision possible, if any. Returning `None`
    /// ends the iteration.
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id>;

    /// Resolves a boolean choice that is true with probability `1 / max_value` under random
    /// strategies. Returning `None` ends the iteration.
    fn next_choice(&mut self, max_value: usize) -> Option<bool>;

    /// Resolves a boolean choice keyed by `key`. Only replay cares about the key.
    fn next_fair_choice(&mut self, _key: &str) -> Option<bool> {
        self.next_choice(2)
    }

    /// Decisions made during the current iteration.
    fn explored_steps(&self) -> usize;

    /// The longest iteration seen since the last [`reset`](Self::reset).
    fn max_explored_steps(&self) -> usize;

    /// Zero means unbounded.
    fn depth_bound(&self) -> usize;

    fn has_reached_depth_bound(&self) -> bool {
        let bound = self.depth_bound();
        bound != 0 && self.explored_steps() >= bound
    }

    /// True once a systematic strategy has nothing left to explore.
    fn has_finished(&self) -> bool;

    /// Prepares the next iteration of a batch.
    fn configure_next_iteration(&mut self);

    /// Restores the state at the start of a batch, including the random seed.
    fn reset(&mut self);

    fn description(&self) -> String;

    /// Set when a forced decision could not be honored.
    fn divergence(&self) -> Option<String> {
        None
    }
}

/// Enabled units in id order.
pub(crate) fn enabled(units: &[UnitInfo]) -> Vec<Id> {
    units.iter().filter(|u| u.is_enabled()).map(|u| u.id).collect()
}

/// Enabled units in round-robin order starting from `current` (or the next id after it).
pub(crate) fn round_robin(units: &[UnitInfo], current: Option<Id>) -> Vec<Id> {
    let mut ordered = enabled(units);
    if let Some(current) = current {
        let start = ordered.iter().position(|id| *id >= current).unwrap_or(0);
        ordered.rotate_left(start);
    }
    ordered
}


#[cfg(test)]
mod test {
    use super::test_units::*;
    use super::*;

    #[test]
    fn round_robin_starts_at_current() {
        let units = units(&[
            RunStatus::Enabled,
            RunStatus::Idle,
            RunStatus::Enabled,
            RunStatus::Enabled,
        ]);
        assert_eq!(round_robin(&units, None), Id::vec_from([0_usize, 2, 3]));
        assert_eq!(round_robin(&units, Some(Id::from(2))), Id::vec_from([2_usize, 3, 0]));
        // A disabled current continues with the next id.
        assert_eq!(round_robin(&units, Some(Id::from(1))), Id::vec_from([2_usize, 3, 0]));
        assert_eq!(round_robin(&units, Some(Id::from(9))), Id::vec_from([0_usize, 2, 3]));
    }
}
