//! The controlled runtime.
//!
//! Every unit (actor or wrapped task) and the root entry closure run on their own OS thread,
//! but only the holder of the turn ever runs. Everybody else is parked on its own condition
//! variable. At each scheduling point the running thread asks the strategy for the next unit
//! under the registry lock, hands the turn over, and parks until it is chosen again. Ending an
//! iteration sets `aborted` and wakes every parked thread, which then unwinds with a private
//! payload caught at the top of its thread.

use crate::actor::{Actor, Event, HandlerOutcome, Id, Monitor, OperationId, ReceivePredicate};
use crate::engine::{BugKind, IterationResult};
use crate::strategy::SchedulingStrategy;
use crate::Configuration;
use parking_lot::{Mutex, MutexGuard};
use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

mod context;
mod registry;

pub use context::Cx;
use registry::{Registry, Turn, Unit, UnitKind};

/// Run status of a unit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RunStatus {
    /// Registered but not started yet.
    Created,
    /// Can run when chosen.
    Enabled,
    /// Out of events. A send re-enables it. Not a deadlock.
    Idle,
    /// Waiting for an event that matches a predicate.
    BlockedOnReceive,
    /// Waiting for other units to complete.
    WaitingOnUnits,
    Completed,
}

/// The entry closure run in the root context at the start of every iteration.
pub(crate) type Entry = Arc<dyn Fn(&mut Cx) + Send + Sync>;

/// Unwinding payload used to tear down the threads of an ended iteration.
struct Teardown;

fn teardown() -> ! {
    panic::resume_unwind(Box::new(Teardown))
}

type Guard<'a> = MutexGuard<'a, Registry>;

fn hand_turn(reg: &mut Guard<'_>, to: Turn) {
    log::trace!("Handing over turn. from={:?}, to={:?}", reg.turn, to);
    reg.turn = to;
    reg.condvar(to).notify_all();
}

/// Parks until `me` holds the turn. Unwinds if the iteration is aborted meanwhile.
fn wait_for_turn(reg: &mut Guard<'_>, me: Turn) {
    let condvar = reg.condvar(me);
    while reg.turn != me && !reg.aborted {
        condvar.wait(reg);
    }
    if reg.aborted {
        teardown();
    }
}

/// Records an assertion failure and unwinds the calling thread.
fn fail_with(reg: &mut Guard<'_>, message: String) -> ! {
    reg.fail(BugKind::Assertion, message);
    teardown()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) struct Runtime {
    registry: Mutex<Registry>,
}

impl Runtime {
    pub(crate) fn new(config: Configuration, strategy: Box<dyn SchedulingStrategy>) -> Self {
        Runtime { registry: Mutex::new(Registry::new(config, strategy)) }
    }

    /// Grants access to the strategy between iterations.
    pub(crate) fn with_strategy<R>(&self, f: impl FnOnce(&mut dyn SchedulingStrategy) -> R) -> R {
        f(&mut *self.registry.lock().strategy)
    }

    /// Runs the entry closure once under control of the strategy and waits for every thread of
    /// the iteration to exit.
    pub(crate) fn run_iteration(self: &Arc<Self>, entry: Entry) -> IterationResult {
        self.registry.lock().begin_iteration();

        let runtime = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("root".to_string())
            .spawn(move || runtime.run_root(entry));
        match spawned {
            Ok(handle) => {
                let _ = handle.join();
            }
            Err(err) => {
                self.registry
                    .lock()
                    .fail(BugKind::Panic, format!("Unable to spawn the root thread: {err}"));
            }
        }

        loop {
            let handles = std::mem::take(&mut self.registry.lock().handles);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
        self.registry.lock().take_result()
    }

    fn run_root(self: Arc<Self>, entry: Entry) {
        let mut cx = Cx::new(Arc::clone(&self), None);
        match panic::catch_unwind(AssertUnwindSafe(|| entry(&mut cx))) {
            Ok(()) => self.root_done(),
            Err(payload) => self.unwound(None, payload),
        }
    }

    /// Leaves the root phase, makes the first decision, and waits for the iteration to end.
    fn root_done(&self) {
        let mut reg = self.registry.lock();
        if reg.ended {
            return;
        }
        reg.root_phase = false;
        log::trace!("Root finished. units={}", reg.units.len());
        if let Some(next) = reg.pick_next() {
            hand_turn(&mut reg, Turn::Unit(next));
        }
        let condvar = Arc::clone(&reg.root_condvar);
        while !reg.ended {
            condvar.wait(&mut reg);
        }
    }

    /// Handles a thread that unwound. Teardown is expected; anything else is a panic in the
    /// program under test.
    fn unwound(&self, id: Option<Id>, payload: Box<dyn Any + Send>) {
        if payload.is::<Teardown>() {
            return;
        }
        let message = panic_message(&*payload);
        let mut reg = self.registry.lock();
        let who = match id.and_then(|id| reg.unit(id)) {
            Some(unit) => format!("{} {:?}", unit.name, unit.id),
            None => "root".to_string(),
        };
        reg.fail(BugKind::Panic, format!("{who} panicked: {message}"));
    }

    /// A scheduling point where the caller stays enabled. While the root entry closure runs,
    /// the root keeps the turn and a unit reaching its first scheduling point parks until the
    /// strategy picks it.
    fn scheduling_point(&self, reg: &mut Guard<'_>, me: Turn) {
        let return_to = match me {
            Turn::Unit(id) => reg.unit_mut(id).and_then(|u| u.return_to.take()),
            Turn::Root => None,
        };
        if reg.root_phase {
            if me != Turn::Root {
                hand_turn(reg, return_to.unwrap_or(Turn::Root));
                wait_for_turn(reg, me);
            }
            return;
        }
        match reg.pick_next() {
            Some(next) if Turn::Unit(next) == me => {}
            Some(next) => {
                hand_turn(reg, Turn::Unit(next));
                wait_for_turn(reg, me);
            }
            None => teardown(),
        }
    }

    /// Gives up the turn because the unit can no longer run, then parks until it is chosen
    /// again. A unit still starting up hands the turn straight back to its creator.
    fn yield_unit(&self, reg: &mut Guard<'_>, id: Id) {
        let me = Turn::Unit(id);
        let return_to = reg.unit_mut(id).and_then(|u| u.return_to.take());
        match return_to {
            Some(creator) => hand_turn(reg, creator),
            None if reg.root_phase => hand_turn(reg, Turn::Root),
            None => match reg.pick_next() {
                Some(next) => hand_turn(reg, Turn::Unit(next)),
                None => teardown(),
            },
        }
        wait_for_turn(reg, me);
    }

    pub(crate) fn assert(&self, predicate: bool, message: &str) {
        if !predicate {
            fail_with(&mut self.registry.lock(), format!("Assertion failed: {message}"));
        }
    }

    pub(crate) fn create_actor(
        self: &Arc<Self>,
        me: Turn,
        actor: Box<dyn Actor>,
        payload: Option<Event>,
    ) -> Id {
        let mut reg = self.registry.lock();
        let id = Id::from(reg.units.len());
        let name = actor.name();
        let operation_id = match me {
            Turn::Unit(creator) => reg.unit(creator).map_or(0, |u| u.operation_id),
            Turn::Root => 0,
        };
        reg.units.push(Unit::new(id, name, UnitKind::Actor, RunStatus::Created, operation_id, Some(me)));

        let runtime = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("actor-{}", id))
            .spawn(move || runtime.run_actor(id, actor, payload));
        match spawned {
            Ok(handle) => reg.handles.push(handle),
            Err(err) => {
                reg.fail(BugKind::Panic, format!("Unable to spawn a thread for {name}: {err}"));
                teardown();
            }
        }
        log::debug!("Created actor. id={:?}, name={}", id, name);

        hand_turn(&mut reg, Turn::Unit(id));
        wait_for_turn(&mut reg, me);
        self.scheduling_point(&mut reg, me);
        id
    }

    pub(crate) fn spawn_task(
        self: &Arc<Self>,
        me: Turn,
        name: &'static str,
        task: Box<dyn FnOnce(&mut Cx) + Send>,
    ) -> Id {
        let mut reg = self.registry.lock();
        if !reg.config.schedule_intra_actor_concurrency {
            reg.fail(
                BugKind::Assertion,
                format!("Task '{name}' cannot be spawned unless intra-actor concurrency is scheduled."),
            );
            teardown();
        }
        let id = Id::from(reg.units.len());
        let operation_id = match me {
            Turn::Unit(parent) => reg.unit(parent).map_or(0, |u| u.operation_id),
            Turn::Root => 0,
        };
        reg.units.push(Unit::new(id, name, UnitKind::Task, RunStatus::Enabled, operation_id, None));

        let runtime = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("task-{}", id))
            .spawn(move || runtime.run_task(id, task));
        match spawned {
            Ok(handle) => reg.handles.push(handle),
            Err(err) => {
                reg.fail(BugKind::Panic, format!("Unable to spawn a thread for {name}: {err}"));
                teardown();
            }
        }
        log::debug!("Spawned task. id={:?}, name={}", id, name);

        self.scheduling_point(&mut reg, me);
        id
    }

    fn run_actor(self: Arc<Self>, id: Id, mut actor: Box<dyn Actor>, payload: Option<Event>) {
        let mut cx = Cx::new(Arc::clone(&self), Some(id));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive_actor(&mut cx, id, &mut *actor, payload)
        }));
        if let Err(payload) = result {
            self.unwound(Some(id), payload);
        }
    }

    fn run_task(self: Arc<Self>, id: Id, task: Box<dyn FnOnce(&mut Cx) + Send>) {
        let mut cx = Cx::new(Arc::clone(&self), Some(id));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_start(id);
            task(&mut cx);
            self.complete(id);
        }));
        if let Err(payload) = result {
            self.unwound(Some(id), payload);
        }
    }

    /// The event loop of an actor: start, then handle one event at a time until halted.
    fn drive_actor(&self, cx: &mut Cx, id: Id, actor: &mut dyn Actor, payload: Option<Event>) {
        self.wait_for_start(id);
        let mut outcome = actor.on_start(cx, payload);
        loop {
            self.publish_state(id, actor.local_state_hash());
            let event = match outcome {
                HandlerOutcome::BlockedOnReceive(predicate) => self.receive(id, predicate),
                HandlerOutcome::BlockedOnOthers { units, wait_all } => {
                    self.wait_for_units(id, units, wait_all);
                    self.next_event(cx, id, actor)
                }
                HandlerOutcome::Completed => self.next_event(cx, id, actor),
            };
            if event.is_halt() {
                log::debug!("Halting actor. id={:?}", id);
                actor.on_halt(cx);
                self.complete(id);
                return;
            }
            self.enter_handler(id);
            outcome = actor.on_event(cx, event);
        }
    }

    fn wait_for_start(&self, id: Id) {
        let mut reg = self.registry.lock();
        wait_for_turn(&mut reg, Turn::Unit(id));
        if let Some(unit) = reg.unit_mut(id) {
            if unit.status == RunStatus::Created {
                unit.status = RunStatus::Enabled;
            }
            unit.in_handler = true;
        }
    }

    /// Called at handler boundaries, the only points where the actor's own state is reachable.
    fn publish_state(&self, id: Id, state_hash: u64) {
        if let Some(unit) = self.registry.lock().unit_mut(id) {
            unit.state_hash = state_hash;
            unit.in_handler = false;
        }
    }

    fn enter_handler(&self, id: Id) {
        if let Some(unit) = self.registry.lock().unit_mut(id) {
            unit.in_handler = true;
        }
    }

    /// The raised event if there is one, otherwise the next deliverable mailbox event.
    fn next_event(&self, cx: &mut Cx, id: Id, actor: &dyn Actor) -> Event {
        match cx.raised.take() {
            Some(event) => {
                let mut reg = self.registry.lock();
                if let Some(unit) = reg.unit_mut(id) {
                    unit.operation_id = event.operation_id;
                }
                if reg.config.bound_operations {
                    log::debug!(
                        "Handling raised event. id={:?}, event={}, operation={}",
                        id,
                        event.name(),
                        event.operation_id
                    );
                } else {
                    log::debug!("Handling raised event. id={:?}, event={}", id, event.name());
                }
                event
            }
            None => self.dequeue(id, actor),
        }
    }

    /// Takes the first event that is neither deferred nor ignored, dropping ignored events on
    /// the way. Fires the default handler or goes idle when there is none.
    fn dequeue(&self, id: Id, actor: &dyn Actor) -> Event {
        let mut reg = self.registry.lock();
        loop {
            let found = match reg.unit_mut(id) {
                Some(unit) => {
                    let mut found = None;
                    let mut i = 0;
                    while i < unit.mailbox.len() {
                        if actor.ignores(&unit.mailbox[i]) {
                            if let Some(event) = unit.mailbox.remove(i) {
                                log::debug!("Ignored event. id={:?}, event={}", id, event.name());
                            }
                        } else if actor.defers(&unit.mailbox[i]) {
                            i += 1;
                        } else {
                            found = unit.mailbox.remove(i);
                            break;
                        }
                    }
                    if let Some(event) = &found {
                        unit.operation_id = event.operation_id;
                    }
                    found
                }
                None => None,
            };
            if let Some(event) = found {
                if reg.config.bound_operations {
                    log::debug!(
                        "Dequeued event. id={:?}, event={}, sender={:?}, operation={}",
                        id,
                        event.name(),
                        event.sender,
                        event.operation_id
                    );
                } else {
                    log::debug!("Dequeued event. id={:?}, event={}, sender={:?}", id, event.name(), event.sender);
                }
                return event;
            }

            if actor.has_default_handler() {
                log::trace!("Firing default handler. id={:?}", id);
                self.scheduling_point(&mut reg, Turn::Unit(id));
                return Event::default_event();
            }

            if let Some(unit) = reg.unit_mut(id) {
                unit.status = RunStatus::Idle;
            }
            log::trace!("Actor is idle. id={:?}", id);
            self.yield_unit(&mut reg, id);
        }
    }

    fn receive(&self, id: Id, predicate: ReceivePredicate) -> Event {
        let mut reg = self.registry.lock();
        let immediate = reg.unit_mut(id).and_then(|unit| {
            let position = unit.mailbox.iter().position(|e| predicate(e))?;
            let event = unit.mailbox.remove(position)?;
            unit.operation_id = event.operation_id;
            Some(event)
        });
        if let Some(event) = immediate {
            log::debug!("Received event without waiting. id={:?}, event={}", id, event.name());
            return event;
        }
        if let Some(unit) = reg.unit_mut(id) {
            unit.predicate = Some(predicate);
            unit.status = RunStatus::BlockedOnReceive;
        }
        log::debug!("Waiting for event. id={:?}", id);
        self.yield_unit(&mut reg, id);

        match reg.unit_mut(id).and_then(|u| u.received.take()) {
            Some(event) => {
                if reg.config.bound_operations {
                    log::debug!(
                        "Received event. id={:?}, event={}, operation={}",
                        id,
                        event.name(),
                        event.operation_id
                    );
                } else {
                    log::debug!("Received event. id={:?}, event={}", id, event.name());
                }
                event
            }
            None => fail_with(&mut reg, format!("{id:?} resumed without the event it was waiting for.")),
        }
    }

    fn wait_for_units(&self, id: Id, units: Vec<Id>, wait_all: bool) {
        let mut reg = self.registry.lock();
        if let Some(unknown) = units.iter().find(|u| reg.unit(**u).is_none()) {
            let message = format!("{id:?} cannot wait on unknown unit {unknown:?}.");
            fail_with(&mut reg, message);
        }
        if reg.is_satisfied(&units, wait_all) {
            return;
        }
        log::debug!("Waiting on units. id={:?}, units={:?}, wait_all={}", id, units, wait_all);
        if let Some(unit) = reg.unit_mut(id) {
            unit.status = RunStatus::WaitingOnUnits;
            unit.waiting_on = Some((units, wait_all));
        }
        self.yield_unit(&mut reg, id);
    }

    /// Marks the unit completed and passes the turn on. The calling thread exits afterwards.
    fn complete(&self, id: Id) {
        let mut reg = self.registry.lock();
        let return_to = match reg.unit_mut(id) {
            Some(unit) => {
                unit.status = RunStatus::Completed;
                unit.mailbox.clear();
                unit.return_to.take()
            }
            None => None,
        };
        log::debug!("Unit completed. id={:?}", id);
        reg.state_cache.invalidate();
        reg.wake_waiters();
        match return_to {
            Some(creator) => hand_turn(&mut reg, creator),
            None if reg.root_phase => hand_turn(&mut reg, Turn::Root),
            None => {
                if let Some(next) = reg.pick_next() {
                    hand_turn(&mut reg, Turn::Unit(next));
                }
            }
        }
    }

    pub(crate) fn send(&self, me: Turn, sender: Option<Id>, target: Id, mut event: Event, new_operation: bool) {
        let mut reg = self.registry.lock();
        let target_kind = reg.unit(target).map(|u| u.kind);
        match target_kind {
            None => {
                let message = format!("Cannot send event '{}' to unknown unit {:?}.", event.name(), target);
                fail_with(&mut reg, message);
            }
            Some(UnitKind::Task) => {
                let message = format!("Cannot send event '{}' to task {:?}.", event.name(), target);
                fail_with(&mut reg, message);
            }
            Some(UnitKind::Actor) => {}
        }
        event.sender = sender;
        event.operation_id = reg.operation_id_for(sender, new_operation);
        if reg.config.bound_operations {
            log::debug!(
                "Sent event. from={:?}, to={:?}, event={}, operation={}",
                sender,
                target,
                event.name(),
                event.operation_id
            );
        } else {
            log::debug!("Sent event. from={:?}, to={:?}, event={}", sender, target, event.name());
        }

        if let Some(unit) = reg.unit_mut(target) {
            match unit.status {
                RunStatus::Completed => {
                    log::debug!("Dropped event for completed unit. to={:?}, event={}", target, event.name());
                }
                RunStatus::BlockedOnReceive if unit.predicate.as_ref().map_or(false, |p| p(&event)) => {
                    unit.predicate = None;
                    unit.received = Some(event);
                    unit.status = RunStatus::Enabled;
                }
                RunStatus::Idle => {
                    unit.mailbox.push_back(event);
                    unit.status = RunStatus::Enabled;
                }
                _ => unit.mailbox.push_back(event),
            }
        }
        self.scheduling_point(&mut reg, me);
    }

    /// Stamps a raised event. Delivery happens in the raiser's own event loop.
    pub(crate) fn prepare_raise(&self, raiser: Id, mut event: Event, new_operation: bool) -> Event {
        let mut reg = self.registry.lock();
        if reg.unit(raiser).map(|u| u.kind) != Some(UnitKind::Actor) {
            fail_with(&mut reg, format!("Only actors can raise events, but {raiser:?} tried to."));
        }
        event.sender = Some(raiser);
        event.operation_id = reg.operation_id_for(Some(raiser), new_operation);
        if reg.config.bound_operations {
            log::debug!(
                "Raised event. id={:?}, event={}, operation={}",
                raiser,
                event.name(),
                event.operation_id
            );
        } else {
            log::debug!("Raised event. id={:?}, event={}", raiser, event.name());
        }
        event
    }

    /// An explicit scheduling point.
    pub(crate) fn yield_now(&self, me: Turn) {
        let mut reg = self.registry.lock();
        self.scheduling_point(&mut reg, me);
    }

    pub(crate) fn choose(&self, max_value: usize, key: Option<&str>) -> bool {
        let mut reg = self.registry.lock();
        match reg.pick_choice(max_value, key) {
            Some(value) => value,
            None => teardown(),
        }
    }

    pub(crate) fn register_monitor(&self, type_id: TypeId, monitor: Box<dyn Monitor>) {
        self.registry.lock().register_monitor(type_id, monitor);
    }

    /// Delivers an event to every monitor of the given type.
    pub(crate) fn invoke_monitors(&self, type_id: TypeId, event: Event) {
        let mut reg = self.registry.lock();
        let mut delivered = false;
        let mut violation = None;
        for entry in reg.monitors.iter_mut().filter(|m| m.type_id == type_id) {
            delivered = true;
            if let Err(message) = entry.monitor.on_event(&event) {
                violation = Some(format!("Monitor {} detected a violation: {}", entry.name, message));
                break;
            }
        }
        if !delivered {
            log::debug!("No monitor registered for event. event={}", event.name());
        }
        if let Some(message) = violation {
            fail_with(&mut reg, message);
        }
    }

    pub(crate) fn operation_id(&self, id: Option<Id>) -> OperationId {
        let reg = self.registry.lock();
        id.and_then(|id| reg.unit(id)).map_or(0, |u| u.operation_id)
    }
}
