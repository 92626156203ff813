//! The contract between the controlled runtime and the program under test.
//!
//! An [`Actor`] is an event-driven unit: the runtime delivers one [`Event`] at a time and the
//! actor reports via [`HandlerOutcome`] whether it is ready for the next event or is blocked.
//! Every interaction with other actors goes through the [`Cx`](crate::Cx) handed to each
//! handler, which is where the runtime intercepts sends, raises, creation, and nondeterministic
//! choices. A [`Monitor`] is a global observer that can reject events (safety) and reports a
//! [`LivenessStatus`] consumed by the liveness checker.

use crate::Cx;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};

/// Uniquely identifies a schedulable unit (an actor or a wrapped task) within one iteration.
/// Ids are assigned monotonically starting at zero.
#[derive(
    Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize,
)]
pub struct Id(u64);

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Id({})", self.0))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Id {
    /// Generates a [`Vec`] of [`Id`]s based on an iterator.
    pub fn vec_from<T>(ids: impl IntoIterator<Item = T>) -> Vec<Id>
    where
        T: Into<Id>,
    {
        ids.into_iter().map(Into::into).collect()
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<Id> for usize {
    fn from(id: Id) -> Self {
        id.0 as usize
    }
}

impl From<usize> for Id {
    fn from(u: usize) -> Self {
        Id(u as u64)
    }
}

impl From<Id> for u64 {
    fn from(id: Id) -> Self {
        id.0
    }
}

/// Identifies a causal chain of events. Zero means the event is not attached to any operation.
pub type OperationId = u64;

/// Tag of the event that halts its receiver.
pub const HALT: &str = "Halt";

/// Tag of the synthetic event delivered when an actor with a default handler has nothing else
/// to do.
pub const DEFAULT: &str = "Default";

/// An event envelope: a type tag, the sender, the operation it belongs to, and an optional
/// application payload.
pub struct Event {
    name: &'static str,
    pub(crate) sender: Option<Id>,
    pub(crate) operation_id: OperationId,
    payload: Option<Box<dyn Any + Send>>,
}

impl Event {
    pub fn new(name: &'static str) -> Self {
        Event { name, sender: None, operation_id: 0, payload: None }
    }

    pub fn with_payload<T: Any + Send>(name: &'static str, payload: T) -> Self {
        Event { payload: Some(Box::new(payload)), ..Event::new(name) }
    }

    /// An event that terminates the actor that dequeues it.
    pub fn halt() -> Self {
        Event::new(HALT)
    }

    pub(crate) fn default_event() -> Self {
        Event::new(DEFAULT)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sender(&self) -> Option<Id> {
        self.sender
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn is_halt(&self) -> bool {
        self.name == HALT
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT
    }

    /// Borrows the payload if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Moves the payload out if it has type `T`.
    pub fn take_payload<T: Any>(&mut self) -> Option<T> {
        match self.payload.take()?.downcast::<T>() {
            Ok(payload) => Some(*payload),
            Err(payload) => {
                self.payload = Some(payload);
                None
            }
        }
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("sender", &self.sender)
            .field("operation_id", &self.operation_id)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// A predicate over events, used when a handler blocks on a receive.
pub type ReceivePredicate = Box<dyn Fn(&Event) -> bool + Send>;

/// What a handler reports back to the runtime once it returns.
pub enum HandlerOutcome {
    /// The handler finished; the actor moves on to its next event.
    Completed,
    /// The actor waits for an event matching the predicate. The matching event is delivered
    /// through [`Actor::on_event`] ahead of anything else in the mailbox.
    BlockedOnReceive(ReceivePredicate),
    /// The actor waits for other units to complete, either all of them or any of them.
    BlockedOnOthers { units: Vec<Id>, wait_all: bool },
}

impl HandlerOutcome {
    /// Blocks until an event with the given tag arrives.
    pub fn receive(name: &'static str) -> Self {
        HandlerOutcome::BlockedOnReceive(Box::new(move |e: &Event| e.name() == name))
    }
}

impl Debug for HandlerOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Completed => write!(f, "Completed"),
            HandlerOutcome::BlockedOnReceive(_) => write!(f, "BlockedOnReceive"),
            HandlerOutcome::BlockedOnOthers { units, wait_all } => f
                .debug_struct("BlockedOnOthers")
                .field("units", units)
                .field("wait_all", wait_all)
                .finish(),
        }
    }
}

/// An event-driven unit of the program under test.
///
/// The runtime owns the actor for the duration of one iteration and runs it on a dedicated
/// thread, but only while the scheduler has granted it the turn.
pub trait Actor: Send + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs when the actor is created, with the optional payload passed to
    /// [`Cx::create_actor_with`](crate::Cx::create_actor_with).
    fn on_start(&mut self, _cx: &mut Cx, _payload: Option<Event>) -> HandlerOutcome {
        HandlerOutcome::Completed
    }

    /// Handles one event.
    fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome;

    /// Whether the event must stay in the mailbox for now.
    fn defers(&self, _event: &Event) -> bool {
        false
    }

    /// Whether the event is dropped when dequeued.
    fn ignores(&self, _event: &Event) -> bool {
        false
    }

    /// Whether a [`DEFAULT`] event fires when no other event is available.
    fn has_default_handler(&self) -> bool {
        false
    }

    /// Runs when the actor dequeues a [`HALT`] event.
    fn on_halt(&mut self, _cx: &mut Cx) {}

    /// Summarizes the locally-observable state, consumed by program-state fingerprints. Actors
    /// whose state never matters for revisits can keep the default.
    fn local_state_hash(&self) -> u64 {
        0
    }
}

/// Progress status of a liveness monitor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LivenessStatus {
    /// Some expected progress has not happened yet.
    Hot,
    /// Nothing is pending.
    Cold,
}

/// A global observer invoked synchronously through [`Cx::monitor`](crate::Cx::monitor).
pub trait Monitor: Send + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Observes an event. Returning an error reports a safety violation.
    fn on_event(&mut self, event: &Event) -> Result<(), String>;

    /// `None` for monitors that only check safety.
    fn liveness_status(&self) -> Option<LivenessStatus> {
        None
    }

    fn local_state_hash(&self) -> u64 {
        0
    }
}
