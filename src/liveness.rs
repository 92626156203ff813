//! Turns state revisits into non-progress diagnoses.

use crate::actor::{Id, LivenessStatus};
use crate::state_cache::ProgramState;
use std::collections::BTreeSet;

/// Tracks the registered liveness monitors and classifies revisit cycles.
#[derive(Default)]
pub struct LivenessChecker {
    monitors: Vec<&'static str>,
}

impl LivenessChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_monitor(&mut self, name: &'static str) {
        log::debug!("Registered liveness monitor. name={}", name);
        self.monitors.push(name);
    }

    pub fn monitors(&self) -> &[&'static str] {
        &self.monitors
    }

    pub fn clear(&mut self) {
        self.monitors.clear();
    }

    /// Classifies the cyclic suffix between two equal-fingerprint states. The cycle is a
    /// violation when every liveness monitor stays hot in each of its states and the cycle is
    /// fair: each unit enabled throughout the cycle is scheduled at least once within it.
    pub fn check_cycle(&self, cycle: &[ProgramState]) -> Option<String> {
        if cycle.is_empty() || self.monitors.is_empty() {
            return None;
        }
        if !cycle.iter().all(ProgramState::all_hot) {
            return None;
        }

        let mut always_enabled: BTreeSet<Id> = cycle[0].enabled.iter().copied().collect();
        for state in &cycle[1..] {
            always_enabled.retain(|id| state.enabled.contains(id));
        }
        let scheduled: BTreeSet<Id> = cycle.iter().map(|s| s.scheduled).collect();
        if let Some(starved) = always_enabled.iter().find(|id| !scheduled.contains(id)) {
            log::debug!(
                "Ignored unfair cycle. starved={:?}, first_step={}, length={}",
                starved,
                cycle[0].step,
                cycle.len()
            );
            return None;
        }

        Some(format!(
            "Monitors {:?} stayed hot through a cycle of {} scheduling steps starting at step {}.",
            self.monitors,
            cycle.len(),
            cycle[0].step
        ))
    }

    /// Flags liveness monitors that are still hot when an iteration terminates.
    pub fn check_termination(&self, statuses: &[(&'static str, LivenessStatus)]) -> Option<String> {
        let hot: Vec<_> = statuses
            .iter()
            .filter(|(_, status)| *status == LivenessStatus::Hot)
            .map(|(name, _)| *name)
            .collect();
        if hot.is_empty() {
            None
        } else {
            Some(format!("Monitors {:?} were hot when the program terminated.", hot))
        }
    }
}
