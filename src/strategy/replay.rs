use crate::actor::Id;
use crate::strategy::{SchedulingStrategy, UnitInfo};
use crate::trace::{Trace, TraceStepKind};

/// Forces every decision to match a recorded [`Trace`].
///
/// A decision that cannot be honored (wrong kind, a unit that is not enabled, a different fair
/// choice key) records a divergence and ends the iteration. Running out of recorded steps while
/// units are still enabled ends the iteration as if a depth bound were hit.
pub struct ReplayStrategy {
    trace: Trace,
    index: usize,
    divergence: Option<String>,
    finished: bool,
}

impl ReplayStrategy {
    pub fn new(trace: Trace) -> Self {
        ReplayStrategy { trace, index: 0, divergence: None, finished: false }
    }

    fn diverge(&mut self, message: String) -> Option<bool> {
        log::debug!("Replay diverged. step={}, reason={}", self.index, message);
        self.divergence = Some(message);
        None
    }

    fn next_recorded_choice(&mut self, key: Option<&str>) -> Option<bool> {
        let Some(step) = self.trace.get(self.index) else {
            return self.diverge(format!(
                "the program asked for a choice after all {} recorded steps",
                self.trace.len()
            ));
        };
        let value = match (&step.kind, key) {
            (TraceStepKind::NondeterministicChoice(value), None) => *value,
            (TraceStepKind::FairNondeterministicChoice { key: recorded, value }, Some(key))
                if recorded == key =>
            {
                *value
            }
            (kind, _) => {
                let message = format!("expected {:?} at step {}, but the program made a choice", kind, step.index);
                return self.diverge(message);
            }
        };
        self.index += 1;
        Some(value)
    }
}

impl SchedulingStrategy for ReplayStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], _current: Option<Id>) -> Option<Id> {
        let any_enabled = units.iter().any(|u| u.is_enabled());
        let step = match self.trace.get(self.index) {
            Some(step) => step,
            None => return None,
        };
        if !any_enabled {
            // The recorded run made further decisions, so ending here is a divergence.
            let message = format!("no unit is enabled at recorded step {}", step.index);
            self.diverge(message);
            return None;
        }
        match step.kind {
            TraceStepKind::SchedulingChoice(id) => {
                if units.iter().any(|u| u.id == id && u.is_enabled()) {
                    self.index += 1;
                    Some(id)
                } else {
                    let message = format!("{:?} is not enabled at step {}", id, step.index);
                    self.diverge(message);
                    None
                }
            }
            ref kind => {
                let message = format!("expected {:?} at step {}, but the scheduler was asked", kind, step.index);
                self.diverge(message);
                None
            }
        }
    }

    fn next_choice(&mut self, _max_value: usize) -> Option<bool> {
        self.next_recorded_choice(None)
    }

    fn next_fair_choice(&mut self, key: &str) -> Option<bool> {
        self.next_recorded_choice(Some(key))
    }

    fn explored_steps(&self) -> usize {
        self.index
    }

    fn max_explored_steps(&self) -> usize {
        self.trace.len()
    }

    fn depth_bound(&self) -> usize {
        0
    }

    fn has_finished(&self) -> bool {
        self.finished
    }

    fn configure_next_iteration(&mut self) {
        self.finished = true;
        self.index = 0;
    }

    fn reset(&mut self) {
        self.index = 0;
        self.divergence = None;
        self.finished = false;
    }

    fn description(&self) -> String {
        format!("Replay[steps={}]", self.trace.len())
    }

    fn divergence(&self) -> Option<String> {
        self.divergence.clone()
    }
}
