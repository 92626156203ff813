use crate::actor::{Event, Id, LivenessStatus, Monitor, OperationId, ReceivePredicate};
use crate::engine::{Bug, BugKind, IterationResult};
use crate::liveness::LivenessChecker;
use crate::runtime::RunStatus;
use crate::state_cache::{ProgramState, StateCache};
use crate::strategy::{SchedulingStrategy, UnitInfo};
use crate::{stable_hash, Configuration, Fingerprint, Trace};
use parking_lot::Condvar;
use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Who holds the right to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Turn {
    Root,
    Unit(Id),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UnitKind {
    Actor,
    Task,
}

/// A schedulable unit. Its mailbox and received-event slot are only touched by the unit's own
/// thread or by whoever holds the turn while the unit is parked.
pub(crate) struct Unit {
    pub(crate) id: Id,
    pub(crate) name: &'static str,
    pub(crate) kind: UnitKind,
    pub(crate) status: RunStatus,
    pub(crate) operation_id: OperationId,
    pub(crate) mailbox: VecDeque<Event>,
    /// An event handed over by a sender while the unit was blocked on a receive.
    pub(crate) received: Option<Event>,
    pub(crate) predicate: Option<ReceivePredicate>,
    pub(crate) waiting_on: Option<(Vec<Id>, bool)>,
    /// Last published local-state hash.
    pub(crate) state_hash: u64,
    /// Whether a handler is running. Its state changes are not published until it returns.
    pub(crate) in_handler: bool,
    /// Creator to hand the turn back to if the unit yields before passing a scheduling point.
    pub(crate) return_to: Option<Turn>,
    pub(crate) condvar: Arc<Condvar>,
}

impl Unit {
    pub(crate) fn new(
        id: Id,
        name: &'static str,
        kind: UnitKind,
        status: RunStatus,
        operation_id: OperationId,
        return_to: Option<Turn>,
    ) -> Self {
        Unit {
            id,
            name,
            kind,
            status,
            operation_id,
            mailbox: VecDeque::new(),
            received: None,
            predicate: None,
            waiting_on: None,
            state_hash: 0,
            in_handler: false,
            return_to,
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Excludes the id so that fingerprints do not depend on creation order.
    fn contribution(&self) -> u64 {
        let mailbox: Vec<&str> = self.mailbox.iter().map(Event::name).collect();
        stable_hash(&(
            self.name,
            self.state_hash,
            self.in_handler,
            self.status,
            mailbox,
            self.received.is_some(),
        ))
    }

    fn info(&self) -> UnitInfo {
        UnitInfo { id: self.id, status: self.status, operation_id: self.operation_id }
    }
}

pub(crate) struct MonitorEntry {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) monitor: Box<dyn Monitor>,
}

impl MonitorEntry {
    fn contribution(&self) -> u64 {
        stable_hash(&(self.name, self.monitor.local_state_hash(), self.monitor.liveness_status()))
    }
}

/// Everything the scheduler mutates, guarded by a single lock.
pub(crate) struct Registry {
    // Immutable state.
    pub(crate) config: Configuration,
    pub(crate) root_condvar: Arc<Condvar>,

    // Mutable state.
    pub(crate) strategy: Box<dyn SchedulingStrategy>,
    pub(crate) units: Vec<Unit>,
    pub(crate) monitors: Vec<MonitorEntry>,
    pub(crate) turn: Turn,
    /// The unit released by the latest decision.
    pub(crate) current: Option<Id>,
    /// Set while the root entry closure runs. Scheduling points are no-ops then.
    pub(crate) root_phase: bool,
    pub(crate) ended: bool,
    /// Every parked thread must unwind.
    pub(crate) aborted: bool,
    pub(crate) trace: Trace,
    pub(crate) state_cache: StateCache,
    pub(crate) liveness: LivenessChecker,
    pub(crate) failure: Option<(BugKind, String)>,
    pub(crate) depth_bound_hit: bool,
    pub(crate) next_operation_id: OperationId,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

impl Registry {
    pub(crate) fn new(config: Configuration, strategy: Box<dyn SchedulingStrategy>) -> Self {
        Registry {
            config,
            root_condvar: Arc::new(Condvar::new()),
            strategy,
            units: Vec::new(),
            monitors: Vec::new(),
            turn: Turn::Root,
            current: None,
            root_phase: true,
            ended: false,
            aborted: false,
            trace: Trace::new(),
            state_cache: StateCache::new(),
            liveness: LivenessChecker::new(),
            failure: None,
            depth_bound_hit: false,
            next_operation_id: 0,
            handles: Vec::new(),
        }
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.units.clear();
        self.monitors.clear();
        self.turn = Turn::Root;
        self.current = None;
        self.root_phase = true;
        self.ended = false;
        self.aborted = false;
        self.trace = Trace::new();
        self.state_cache.clear();
        self.liveness.clear();
        self.failure = None;
        self.depth_bound_hit = false;
        self.next_operation_id = 0;
    }

    pub(crate) fn take_result(&mut self) -> IterationResult {
        let trace = std::mem::take(&mut self.trace);
        IterationResult {
            bug: self.failure.take().map(|(kind, message)| Bug { kind, message, trace: trace.clone() }),
            trace,
            explored_steps: self.strategy.explored_steps(),
            depth_bound_hit: self.depth_bound_hit,
            revisits: self.state_cache.revisits(),
        }
    }

    pub(crate) fn unit(&self, id: Id) -> Option<&Unit> {
        self.units.get(id.index())
    }

    pub(crate) fn unit_mut(&mut self, id: Id) -> Option<&mut Unit> {
        self.units.get_mut(id.index())
    }

    pub(crate) fn condvar(&self, turn: Turn) -> Arc<Condvar> {
        match turn {
            Turn::Root => Arc::clone(&self.root_condvar),
            Turn::Unit(id) => match self.unit(id) {
                Some(unit) => Arc::clone(&unit.condvar),
                None => Arc::clone(&self.root_condvar),
            },
        }
    }

    pub(crate) fn unit_infos(&self) -> Vec<UnitInfo> {
        self.units
            .iter()
            .filter(|u| u.status != RunStatus::Completed)
            .map(Unit::info)
            .collect()
    }

    /// Operation id for an event sent or raised by `sender`.
    pub(crate) fn operation_id_for(&mut self, sender: Option<Id>, new_operation: bool) -> OperationId {
        if new_operation {
            self.next_operation_id += 1;
            self.next_operation_id
        } else {
            sender.and_then(|id| self.unit(id)).map_or(0, |u| u.operation_id)
        }
    }

    pub(crate) fn register_monitor(&mut self, type_id: TypeId, monitor: Box<dyn Monitor>) {
        let name = monitor.name();
        if monitor.liveness_status().is_some() {
            self.liveness.register_monitor(name);
        }
        log::debug!("Registered monitor. name={}", name);
        self.monitors.push(MonitorEntry { type_id, name, monitor });
    }

    /// Order-independent digest of every live unit and monitor.
    pub(crate) fn fingerprint(&self) -> Fingerprint {
        let units = self
            .units
            .iter()
            .filter(|u| u.status != RunStatus::Completed)
            .map(Unit::contribution);
        let monitors = self.monitors.iter().map(MonitorEntry::contribution);
        Fingerprint::from_hashes(units.chain(monitors))
    }

    fn liveness_statuses(&self) -> Vec<(&'static str, LivenessStatus)> {
        self.monitors
            .iter()
            .filter_map(|m| m.monitor.liveness_status().map(|s| (m.name, s)))
            .collect()
    }

    /// Wakes every unit whose wait is satisfied by `completed` finishing.
    pub(crate) fn wake_waiters(&mut self) {
        let completed: Vec<Id> = self
            .units
            .iter()
            .filter(|u| u.status == RunStatus::Completed)
            .map(|u| u.id)
            .collect();
        for unit in &mut self.units {
            if unit.status != RunStatus::WaitingOnUnits {
                continue;
            }
            let satisfied = match &unit.waiting_on {
                Some((ids, wait_all)) => waits_satisfied(ids, *wait_all, &completed),
                None => true,
            };
            if satisfied {
                log::debug!("Wait satisfied. id={:?}", unit.id);
                unit.waiting_on = None;
                unit.status = RunStatus::Enabled;
            }
        }
    }

    pub(crate) fn is_satisfied(&self, ids: &[Id], wait_all: bool) -> bool {
        let completed: Vec<Id> = ids
            .iter()
            .copied()
            .filter(|id| self.unit(*id).map_or(true, |u| u.status == RunStatus::Completed))
            .collect();
        waits_satisfied(ids, wait_all, &completed)
    }

    /// Ends the iteration: every parked thread is woken so that it can unwind.
    pub(crate) fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.aborted = true;
        for unit in &self.units {
            unit.condvar.notify_all();
        }
        self.root_condvar.notify_all();
    }

    /// Records the first failure of the iteration and ends it.
    pub(crate) fn fail(&mut self, kind: BugKind, message: String) {
        if self.failure.is_none() && !self.ended {
            log::info!("Found bug. kind={}, steps={}, message={}", kind, self.trace.len(), message);
            self.failure = Some((kind, message));
        }
        self.finish();
    }

    /// No unit is enabled: either the program terminated or it deadlocked.
    fn end_quiescent(&mut self) {
        let stuck: Vec<Id> = self
            .units
            .iter()
            .filter(|u| matches!(u.status, RunStatus::BlockedOnReceive | RunStatus::WaitingOnUnits))
            .map(|u| u.id)
            .collect();
        if !stuck.is_empty() {
            let message = format!("Deadlock detected. {stuck:?} are waiting and no unit is enabled.");
            if self.config.deadlock_is_bug {
                self.fail(BugKind::Deadlock, message);
                return;
            }
            log::debug!("{}", message);
        }
        if self.config.check_liveness {
            if let Some(message) = self.liveness.check_termination(&self.liveness_statuses()) {
                self.fail(BugKind::Liveness { cycle: None }, message);
                return;
            }
        }
        log::debug!("Program terminated. steps={}, units={}", self.trace.len(), self.units.len());
        self.finish();
    }

    /// Asks the strategy which unit runs next and records the decision. `None` means the
    /// iteration has ended.
    pub(crate) fn pick_next(&mut self) -> Option<Id> {
        if self.ended {
            return None;
        }
        if self.strategy.has_reached_depth_bound() {
            log::debug!("Reached depth bound. steps={}", self.strategy.explored_steps());
            self.depth_bound_hit = true;
            self.finish();
            return None;
        }
        let units = self.unit_infos();
        match self.strategy.next_unit(&units, self.current) {
            Some(id) if units.iter().any(|u| u.id == id && u.is_enabled()) => {
                self.trace.add_scheduling_choice(id);
                log::trace!("Scheduled unit. step={}, id={:?}", self.trace.len() - 1, id);
                self.current = Some(id);
                if self.config.cache_program_state || self.config.check_liveness {
                    self.capture_state(id, &units);
                }
                if self.ended {
                    None
                } else {
                    Some(id)
                }
            }
            Some(id) => {
                let message = format!("The strategy chose {id:?}, which is not enabled.");
                self.fail(BugKind::Assertion, message);
                None
            }
            None => {
                if let Some(reason) = self.strategy.divergence() {
                    self.fail(BugKind::ReplayDivergence, format!("Replay diverged: {reason}"));
                } else if units.iter().any(UnitInfo::is_enabled) {
                    log::debug!("Strategy stopped scheduling. steps={}", self.trace.len());
                    self.depth_bound_hit = true;
                    self.finish();
                } else {
                    self.end_quiescent();
                }
                None
            }
        }
    }

    /// Resolves a nondeterministic choice. `None` means the iteration has ended.
    pub(crate) fn pick_choice(&mut self, max_value: usize, key: Option<&str>) -> Option<bool> {
        if self.ended {
            return None;
        }
        if self.strategy.has_reached_depth_bound() {
            log::debug!("Reached depth bound. steps={}", self.strategy.explored_steps());
            self.depth_bound_hit = true;
            self.finish();
            return None;
        }
        let value = match key {
            None => self.strategy.next_choice(max_value),
            Some(key) => self.strategy.next_fair_choice(key),
        };
        match (value, key) {
            (Some(value), None) => {
                self.trace.add_nondeterministic_choice(value);
                log::trace!("Chose value. step={}, value={}", self.trace.len() - 1, value);
                Some(value)
            }
            (Some(value), Some(key)) => {
                self.trace.add_fair_nondeterministic_choice(key, value);
                log::trace!("Chose fair value. step={}, key={}, value={}", self.trace.len() - 1, key, value);
                Some(value)
            }
            (None, _) => {
                if let Some(reason) = self.strategy.divergence() {
                    self.fail(BugKind::ReplayDivergence, format!("Replay diverged: {reason}"));
                } else {
                    self.depth_bound_hit = true;
                    self.finish();
                }
                None
            }
        }
    }

    fn capture_state(&mut self, scheduled: Id, units: &[UnitInfo]) {
        let hot_monitors = self
            .liveness_statuses()
            .into_iter()
            .filter(|(_, status)| *status == LivenessStatus::Hot)
            .map(|(name, _)| name)
            .collect();
        let state = ProgramState {
            step: self.trace.len() - 1,
            fingerprint: self.fingerprint(),
            scheduled,
            enabled: units.iter().filter(|u| u.is_enabled()).map(|u| u.id).collect(),
            liveness_monitors: self.liveness.monitors().len(),
            hot_monitors,
        };
        let Some(start) = self.state_cache.capture(state) else {
            return;
        };
        if !self.config.check_liveness {
            return;
        }
        let cycle = self.state_cache.cycle(start);
        if let Some(message) = self.liveness.check_cycle(cycle) {
            let first_step = cycle[0].step;
            let end = self.trace.len() - 1;
            self.fail(BugKind::Liveness { cycle: Some(first_step..end) }, message);
        }
    }
}

fn waits_satisfied(ids: &[Id], wait_all: bool, completed: &[Id]) -> bool {
    if ids.is_empty() {
        return true;
    }
    if wait_all {
        ids.iter().all(|id| completed.contains(id))
    } else {
        ids.iter().any(|id| completed.contains(id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry(config: Configuration) -> Registry {
        let strategy = config.build_strategy(0);
        Registry::new(config, strategy)
    }

    fn add_actor(reg: &mut Registry, name: &'static str, status: RunStatus) -> Id {
        let id = Id::from(reg.units.len());
        reg.units.push(Unit::new(id, name, UnitKind::Actor, status, 0, None));
        id
    }

    #[test]
    fn fingerprint_ignores_ids_and_completed_units() {
        let mut a = registry(Configuration::new());
        add_actor(&mut a, "Client", RunStatus::Enabled);
        add_actor(&mut a, "Server", RunStatus::Idle);

        let mut b = registry(Configuration::new());
        add_actor(&mut b, "Server", RunStatus::Idle);
        add_actor(&mut b, "Client", RunStatus::Enabled);
        add_actor(&mut b, "Gone", RunStatus::Completed);

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_mailbox_and_handler() {
        let mut reg = registry(Configuration::new());
        let id = add_actor(&mut reg, "Client", RunStatus::Enabled);
        let before = reg.fingerprint();

        reg.unit_mut(id).unwrap().in_handler = true;
        let mid_handler = reg.fingerprint();
        assert_ne!(before, mid_handler);

        reg.unit_mut(id).unwrap().in_handler = false;
        reg.unit_mut(id).unwrap().mailbox.push_back(Event::new("Ping"));
        assert_ne!(before, reg.fingerprint());
        assert_ne!(mid_handler, reg.fingerprint());
    }

    #[test]
    fn wakes_waiters_once_satisfied() {
        let mut reg = registry(Configuration::new());
        let a = add_actor(&mut reg, "A", RunStatus::Enabled);
        let b = add_actor(&mut reg, "B", RunStatus::Enabled);
        let all = add_actor(&mut reg, "All", RunStatus::WaitingOnUnits);
        let any = add_actor(&mut reg, "Any", RunStatus::WaitingOnUnits);
        reg.unit_mut(all).unwrap().waiting_on = Some((vec![a, b], true));
        reg.unit_mut(any).unwrap().waiting_on = Some((vec![a, b], false));

        reg.unit_mut(a).unwrap().status = RunStatus::Completed;
        reg.wake_waiters();
        assert_eq!(reg.unit(all).unwrap().status, RunStatus::WaitingOnUnits);
        assert_eq!(reg.unit(any).unwrap().status, RunStatus::Enabled);
        assert!(!reg.is_satisfied(&[a, b], true));
        assert!(reg.is_satisfied(&[a, b], false));

        reg.unit_mut(b).unwrap().status = RunStatus::Completed;
        reg.wake_waiters();
        assert_eq!(reg.unit(all).unwrap().status, RunStatus::Enabled);
        assert!(reg.is_satisfied(&[], true));
    }

    #[test]
    fn assigns_operation_ids() {
        let mut reg = registry(Configuration::new());
        let id = add_actor(&mut reg, "A", RunStatus::Enabled);
        assert_eq!(reg.operation_id_for(None, false), 0);
        assert_eq!(reg.operation_id_for(Some(id), true), 1);
        assert_eq!(reg.operation_id_for(None, true), 2);
        reg.unit_mut(id).unwrap().operation_id = 2;
        assert_eq!(reg.operation_id_for(Some(id), false), 2);
    }

    #[test]
    fn classifies_quiescence() {
        let mut reg = registry(Configuration::new());
        add_actor(&mut reg, "Idle", RunStatus::Idle);
        assert_eq!(reg.pick_next(), None);
        assert!(reg.ended);
        assert!(reg.failure.is_none());

        let mut reg = registry(Configuration::new());
        add_actor(&mut reg, "Stuck", RunStatus::BlockedOnReceive);
        assert_eq!(reg.pick_next(), None);
        assert!(matches!(reg.failure, Some((BugKind::Deadlock, _))));

        let mut reg = registry(Configuration::new().deadlock_is_bug(false));
        add_actor(&mut reg, "Stuck", RunStatus::BlockedOnReceive);
        assert_eq!(reg.pick_next(), None);
        assert!(reg.failure.is_none());
    }

    #[test]
    fn records_scheduling_decisions() {
        let mut reg = registry(Configuration::new().strategy(crate::StrategyKind::Dfs));
        let a = add_actor(&mut reg, "A", RunStatus::Enabled);
        add_actor(&mut reg, "B", RunStatus::Enabled);
        assert_eq!(reg.pick_next(), Some(a));
        assert_eq!(reg.trace.schedule(), vec![a]);
        assert_eq!(reg.current, Some(a));
    }
}
