//! Program-state snapshots keyed by fingerprint, used to detect revisits within an iteration.

use crate::actor::Id;
use crate::Fingerprint;
use nohash_hasher::IntMap;

/// The program state observed at one scheduling decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgramState {
    /// Trace index of the decision taken in this state.
    pub step: usize,
    pub fingerprint: Fingerprint,
    /// The unit the decision released.
    pub scheduled: Id,
    /// Units that were enabled, in id order.
    pub enabled: Vec<Id>,
    /// Number of registered liveness monitors.
    pub liveness_monitors: usize,
    /// Names of liveness monitors that were hot.
    pub hot_monitors: Vec<&'static str>,
}

impl ProgramState {
    /// Whether at least one liveness monitor is registered and all of them are hot.
    pub fn all_hot(&self) -> bool {
        self.liveness_monitors > 0 && self.hot_monitors.len() == self.liveness_monitors
    }
}

/// Records the states of one iteration and flags a revisit when a fingerprint recurs with no
/// invalidation in between. Fingerprint equality is taken as state equality.
#[derive(Default)]
pub struct StateCache {
    states: Vec<ProgramState>,
    seen: IntMap<Fingerprint, usize>,
    revisits: usize,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a state. Returns the position of the earlier state with the same fingerprint if
    /// this is a revisit.
    pub fn capture(&mut self, state: ProgramState) -> Option<usize> {
        let position = self.states.len();
        let previous = self.seen.insert(state.fingerprint, position);
        if let Some(previous) = previous {
            self.revisits += 1;
            log::trace!(
                "Revisited state. fingerprint={}, first_step={}, step={}",
                state.fingerprint,
                self.states[previous].step,
                state.step
            );
        }
        self.states.push(state);
        previous
    }

    /// Forgets every fingerprint seen so far, so no later revisit can span this point. Called
    /// when a unit completes, since the program can never return to an earlier state.
    pub fn invalidate(&mut self) {
        self.seen.clear();
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.seen.clear();
        self.revisits = 0;
    }

    pub fn states(&self) -> &[ProgramState] {
        &self.states
    }

    /// The states from a revisited position up to, but excluding, the latest state.
    pub fn cycle(&self, start: usize) -> &[ProgramState] {
        let end = self.states.len().saturating_sub(1);
        &self.states[start.min(end)..end]
    }

    pub fn revisits(&self) -> usize {
        self.revisits
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
