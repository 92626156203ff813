//! An ordered, replayable log of scheduling and choice decisions.

use crate::actor::Id;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The decision recorded by a [`TraceStep`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum TraceStepKind {
    /// The scheduler released the unit with this [`Id`].
    SchedulingChoice(Id),
    /// An unconstrained boolean choice.
    NondeterministicChoice(bool),
    /// A boolean choice keyed by a caller-supplied id.
    FairNondeterministicChoice { key: String, value: bool },
}

/// One decision together with its position in the [`Trace`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub kind: TraceStepKind,
}

impl TraceStep {
    /// The scheduled unit, if this is a scheduling step.
    pub fn scheduled(&self) -> Option<Id> {
        match self.kind {
            TraceStepKind::SchedulingChoice(id) => Some(id),
            _ => None,
        }
    }

    /// The boolean value, if this is a choice step.
    pub fn choice(&self) -> Option<bool> {
        match self.kind {
            TraceStepKind::SchedulingChoice(_) => None,
            TraceStepKind::NondeterministicChoice(value) => Some(value),
            TraceStepKind::FairNondeterministicChoice { value, .. } => Some(value),
        }
    }
}

/// Decisions in the order they were made. Steps live in a growable arena, so truncation is
/// simply "shrink to length" and a step's index always equals its position.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<TraceStep>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn add_scheduling_choice(&mut self, id: Id) -> &TraceStep {
        self.push(TraceStepKind::SchedulingChoice(id))
    }

    pub fn add_nondeterministic_choice(&mut self, value: bool) -> &TraceStep {
        self.push(TraceStepKind::NondeterministicChoice(value))
    }

    pub fn add_fair_nondeterministic_choice(&mut self, key: impl Into<String>, value: bool) -> &TraceStep {
        self.push(TraceStepKind::FairNondeterministicChoice { key: key.into(), value })
    }

    fn push(&mut self, kind: TraceStepKind) -> &TraceStep {
        let index = self.steps.len();
        self.steps.push(TraceStep { index, kind });
        &self.steps[index]
    }

    /// Removes and returns the last step.
    pub fn pop(&mut self) -> Option<TraceStep> {
        self.steps.pop()
    }

    /// Returns the last step without removing it.
    pub fn peek(&self) -> Option<&TraceStep> {
        self.steps.last()
    }

    pub fn get(&self, index: usize) -> Option<&TraceStep> {
        self.steps.get(index)
    }

    /// Drops every step at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.steps.truncate(len);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceStep> {
        self.steps.iter()
    }

    /// The ids of scheduled units, in order.
    pub fn schedule(&self) -> Vec<Id> {
        self.steps.iter().filter_map(TraceStep::scheduled).collect()
    }

    /// Serializes the trace so a surrounding tool can persist it for later replay.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a persisted trace, rejecting one whose step indices are not contiguous.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let trace: Trace = serde_json::from_str(json)?;
        if let Some(step) = trace.steps.iter().enumerate().find(|(i, s)| *i != s.index) {
            return Err(Error::InvalidTrace(format!(
                "step at position {} has index {}",
                step.0, step.1.index
            )));
        }
        Ok(trace)
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceStep;
    type IntoIter = std::slice::Iter<'a, TraceStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

impl Display for TraceStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TraceStepKind::SchedulingChoice(id) => write!(f, "{}: schedule {:?}", self.index, id),
            TraceStepKind::NondeterministicChoice(value) => write!(f, "{}: choose {}", self.index, value),
            TraceStepKind::FairNondeterministicChoice { key, value } => {
                write!(f, "{}: choose {} (fair, key={})", self.index, value, key)
            }
        }
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Trace[{}]:", self.steps.len())?;
        for step in &self.steps {
            writeln!(f, "- {step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indices_match_positions() {
        let mut trace = Trace::new();
        trace.add_scheduling_choice(Id::from(2));
        trace.add_nondeterministic_choice(true);
        trace.add_fair_nondeterministic_choice("retry", false);
        assert_eq!(trace.len(), 3);
        for (i, step) in trace.iter().enumerate() {
            assert_eq!(step.index, i);
        }
        assert_eq!(trace.schedule(), vec![Id::from(2)]);
    }

    #[test]
    fn pop_and_peek() {
        let mut trace = Trace::new();
        assert_eq!(trace.peek(), None);
        assert_eq!(trace.pop(), None);

        trace.add_scheduling_choice(Id::from(0));
        trace.add_nondeterministic_choice(false);
        assert_eq!(trace.peek().and_then(TraceStep::choice), Some(false));
        assert_eq!(trace.len(), 2);

        let popped = trace.pop().unwrap();
        assert_eq!(popped.index, 1);
        assert_eq!(trace.peek().and_then(TraceStep::scheduled), Some(Id::from(0)));

        // Appending after a pop reuses the freed index.
        let step = trace.add_scheduling_choice(Id::from(1));
        assert_eq!(step.index, 1);
    }

    #[test]
    fn truncates_to_length() {
        let mut trace = Trace::new();
        for i in 0..5 {
            trace.add_scheduling_choice(Id::from(i));
        }
        trace.truncate(2);
        assert_eq!(trace.schedule(), vec![Id::from(0), Id::from(1)]);
    }

    #[test]
    fn json_persistence() {
        let mut trace = Trace::new();
        trace.add_scheduling_choice(Id::from(3));
        trace.add_fair_nondeterministic_choice("coin", true);
        let json = trace.to_json().unwrap();
        assert_eq!(Trace::from_json(&json).unwrap(), trace);

        let gap = r#"{"steps":[{"index":1,"kind":{"NondeterministicChoice":true}}]}"#;
        assert!(matches!(Trace::from_json(gap), Err(Error::InvalidTrace(_))));
        assert!(matches!(Trace::from_json("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn can_display() {
        let mut trace = Trace::new();
        trace.add_scheduling_choice(Id::from(1));
        trace.add_nondeterministic_choice(true);
        assert_eq!(
            format!("{trace}"),
            "Trace[2]:\n- 0: schedule Id(1)\n- 1: choose true\n"
        );
    }
}
