use super::registry::Turn;
use super::Runtime;
use crate::actor::{Actor, Event, Id, Monitor, OperationId};
use std::any::TypeId;
use std::sync::Arc;

/// The handle through which the root entry closure, actors, and tasks talk to the runtime.
///
/// Every call that can affect another unit is a scheduling point: the strategy may hand the turn
/// to a different unit before the call returns. While the root entry closure is still running
/// the root keeps the turn, and each unit it creates runs only up to its first scheduling point.
pub struct Cx {
    runtime: Arc<Runtime>,
    id: Option<Id>,
    pub(crate) raised: Option<Event>,
}

impl Cx {
    pub(crate) fn new(runtime: Arc<Runtime>, id: Option<Id>) -> Self {
        Cx { runtime, id, raised: None }
    }

    fn turn(&self) -> Turn {
        match self.id {
            Some(id) => Turn::Unit(id),
            None => Turn::Root,
        }
    }

    /// The id of the calling unit, or `None` in the root context.
    pub fn id(&self) -> Option<Id> {
        self.id
    }

    /// The operation the calling unit is currently working on. Always `0` in the root context.
    pub fn operation_id(&self) -> OperationId {
        self.runtime.operation_id(self.id)
    }

    /// Creates an actor and runs its start handler before returning.
    pub fn create_actor<A: Actor>(&mut self, actor: A) -> Id {
        self.runtime.create_actor(self.turn(), Box::new(actor), None)
    }

    /// Like [`Cx::create_actor`], handing `payload` to [`Actor::on_start`].
    pub fn create_actor_with<A: Actor>(&mut self, actor: A, payload: Event) -> Id {
        self.runtime.create_actor(self.turn(), Box::new(actor), Some(payload))
    }

    /// Enqueues an event in the target's mailbox. The event continues the sender's operation.
    pub fn send(&mut self, target: Id, event: Event) {
        self.runtime.send(self.turn(), self.id, target, event, false);
    }

    /// Enqueues an event that starts a new operation.
    pub fn send_new_operation(&mut self, target: Id, event: Event) {
        self.runtime.send(self.turn(), self.id, target, event, true);
    }

    /// Schedules an event for the calling actor, handled right after the current handler and
    /// ahead of its mailbox. At most one event can be raised per handler.
    pub fn raise(&mut self, event: Event) {
        self.raise_event(event, false);
    }

    pub fn raise_new_operation(&mut self, event: Event) {
        self.raise_event(event, true);
    }

    fn raise_event(&mut self, event: Event, new_operation: bool) {
        let Some(id) = self.id else {
            self.runtime.assert(false, "events cannot be raised from the root context");
            return;
        };
        if let Some(pending) = &self.raised {
            let message = format!(
                "{id:?} raised '{}' while '{}' was still pending",
                event.name(),
                pending.name()
            );
            self.runtime.assert(false, &message);
        }
        self.raised = Some(self.runtime.prepare_raise(id, event, new_operation));
    }

    /// Raises [`Event::halt`]. The actor completes once the current handler returns.
    pub fn halt(&mut self) {
        self.raise(Event::halt());
    }

    /// A controlled nondeterministic boolean. With a random strategy it is `true` with
    /// probability `1 / max_value`.
    pub fn choose(&mut self, max_value: usize) -> bool {
        self.runtime.choose(max_value, None)
    }

    pub fn random_bool(&mut self) -> bool {
        self.choose(2)
    }

    /// A nondeterministic boolean that strategies must resolve fairly for the given call site.
    pub fn fair_choice(&mut self, key: &str) -> bool {
        self.runtime.choose(2, Some(key))
    }

    /// Fails the iteration with an assertion bug unless `predicate` holds.
    pub fn assert(&self, predicate: bool, message: &str) {
        self.runtime.assert(predicate, message);
    }

    /// Registers a monitor for this iteration. Monitors are addressed by type.
    pub fn register_monitor<M: Monitor>(&mut self, monitor: M) {
        self.runtime.register_monitor(TypeId::of::<M>(), Box::new(monitor));
    }

    /// Delivers an event synchronously to the registered monitors of type `M`.
    pub fn monitor<M: Monitor>(&mut self, event: Event) {
        self.runtime.invoke_monitors(TypeId::of::<M>(), event);
    }

    /// Spawns a wrapped task: a closure scheduled as a unit of its own. Only permitted when
    /// intra-actor concurrency is scheduled.
    pub fn spawn_task<F>(&mut self, name: &'static str, task: F) -> Id
    where
        F: FnOnce(&mut Cx) + Send + 'static,
    {
        self.runtime.spawn_task(self.turn(), name, Box::new(task))
    }

    /// Gives the strategy a chance to run another unit.
    pub fn yield_now(&mut self) {
        self.runtime.yield_now(self.turn());
    }

    /// Blocks the calling unit until all (or any) of the given units have completed. Actors
    /// usually return [`HandlerOutcome::BlockedOnOthers`](crate::HandlerOutcome::BlockedOnOthers)
    /// instead; this is the way for tasks to wait.
    pub fn wait_for(&mut self, units: Vec<Id>, wait_all: bool) {
        match self.id {
            Some(id) => self.runtime.wait_for_units(id, units, wait_all),
            None => self.runtime.assert(false, "the root context cannot wait on units"),
        }
    }
}
