//! A library for systematically testing concurrent, actor-based programs.
//!
//! The program under test runs on a controlled runtime that serializes it: exactly one unit
//! (actor or wrapped task) runs at a time, and every send, creation, or nondeterministic choice
//! is a scheduling point where a pluggable [`strategy`] decides what happens next. Each decision
//! is recorded in a [`Trace`], so any bug found can be replayed step for step.
//!
//! A small example follows. Depth-first search enumerates both coin flips and finds the one
//! combination that violates the assertion.
//!
//! ```rust
//! use schedcheck::*;
//!
//! struct Flipper;
//!
//! impl Actor for Flipper {
//!     fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
//!         let a = cx.random_bool();
//!         let b = cx.random_bool();
//!         cx.assert(!(a && b), "both coins came up heads");
//!         HandlerOutcome::Completed
//!     }
//! }
//!
//! let config = Configuration::new().strategy(StrategyKind::Dfs).iterations(100);
//! let mut engine = TestingEngine::new(config, |cx| {
//!     let flipper = cx.create_actor(Flipper);
//!     cx.send(flipper, Event::new("Flip"));
//! })
//! .unwrap();
//! let report = engine.run();
//! let bug = report.assert_bug();
//! assert_eq!(bug.kind, BugKind::Assertion);
//! assert_eq!(report.iterations, 4);
//!
//! let replayed = engine.replay(&bug.trace);
//! assert_eq!(replayed.bug.map(|b| b.kind), Some(BugKind::Assertion));
//! ```

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

pub mod actor;
mod config;
mod engine;
mod error;
mod liveness;
pub mod report;
mod runtime;
mod state_cache;
pub mod strategy;
#[cfg(test)]
mod test_util;
mod trace;

pub use actor::{
    Actor, Event, HandlerOutcome, Id, LivenessStatus, Monitor, OperationId, ReceivePredicate,
};
pub use config::{Configuration, StrategyKind};
pub use engine::{Bug, BugKind, IterationResult, TestReport, TestingEngine};
pub use error::Error;
pub use liveness::LivenessChecker;
pub use report::{ReportData, Reporter, WriteReporter};
pub use runtime::{Cx, RunStatus};
pub use state_cache::{ProgramState, StateCache};
pub use strategy::{SchedulingStrategy, UnitInfo};
pub use trace::{Trace, TraceStep, TraceStepKind};

/// An order-independent digest of a global program snapshot. Equal fingerprints are treated as
/// equal states.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Folds per-unit and per-monitor hashes into a fingerprint. The result does not depend on
    /// the order of `hashes`.
    pub fn from_hashes(hashes: impl IntoIterator<Item = u64>) -> Self {
        Fingerprint(
            hashes
                .into_iter()
                .fold(19u64, |acc, h| acc.wrapping_add(h.wrapping_mul(31))),
        )
    }

    pub fn from_raw(raw: u64) -> Self {
        Fingerprint(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl nohash_hasher::IsEnabled for Fingerprint {}

/// Converts a fingerprint component to a hash that is stable across runs and builds.
#[inline]
pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = stable::hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

// Helpers for stable hashing, wherein hashes should not vary across builds.
mod stable {
    use ahash::{AHasher, RandomState};
    use std::hash::BuildHasher;

    const KEY1: u64 = 123_456_789_987_654_321;
    const KEY2: u64 = 98_765_432_123_456_789;
    const KEY3: u64 = 908_070_605_040_302_010;
    const KEY4: u64 = 10_203_040_506_070_809;

    pub(crate) const fn build_hasher() -> RandomState {
        RandomState::with_seeds(KEY1, KEY2, KEY3, KEY4)
    }

    pub(crate) fn hasher() -> AHasher {
        build_hasher().build_hasher()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprint_ignores_order() {
        let a = Fingerprint::from_hashes(vec![stable_hash("x"), stable_hash("y"), 7]);
        let b = Fingerprint::from_hashes(vec![7, stable_hash("y"), stable_hash("x")]);
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::from_hashes(vec![stable_hash("x"), 7]));
    }

    #[test]
    fn fingerprint_of_nothing_is_the_seed() {
        assert_eq!(Fingerprint::from_hashes(Vec::new()).raw(), 19);
        assert_eq!(Fingerprint::from_hashes(vec![1, 2]).raw(), 19 + 31 + 62);
    }

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash(&("actor", 3u64)), stable_hash(&("actor", 3u64)));
        assert_ne!(stable_hash(&("actor", 3u64)), stable_hash(&("actor", 4u64)));
    }

    #[test]
    fn can_display_fingerprint() {
        assert_eq!(Fingerprint::from_raw(255).to_string(), "00000000000000ff");
    }
}
