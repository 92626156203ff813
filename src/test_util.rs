//! Sample programs shared by the tests.

/// Three actors forwarding one operation down a chain: the front starts a new operation, the
/// middle forwards it, and the back raises a follow-up event to itself before halting.
pub mod chain {
    use crate::{Actor, Cx, Event, HandlerOutcome, Id, OperationId};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// `(actor, event, operation)` in handling order.
    pub type Log = Arc<Mutex<Vec<(&'static str, &'static str, OperationId)>>>;

    pub struct Front {
        pub next: Id,
        pub log: Log,
    }

    impl Actor for Front {
        fn name(&self) -> &'static str {
            "Front"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            self.log.lock().push(("Front", event.name(), event.operation_id()));
            cx.send_new_operation(self.next, Event::new("E"));
            HandlerOutcome::Completed
        }
    }

    pub struct Middle {
        pub next: Id,
        pub log: Log,
    }

    impl Actor for Middle {
        fn name(&self) -> &'static str {
            "Middle"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            self.log.lock().push(("Middle", event.name(), event.operation_id()));
            cx.send(self.next, Event::new("F"));
            HandlerOutcome::Completed
        }
    }

    pub struct Back {
        pub log: Log,
    }

    impl Actor for Back {
        fn name(&self) -> &'static str {
            "Back"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            self.log.lock().push(("Back", event.name(), event.operation_id()));
            match event.name() {
                "F" => cx.raise(Event::new("G")),
                _ => cx.halt(),
            }
            HandlerOutcome::Completed
        }
    }

    /// Creates the back (id 0), middle (id 1), and front (id 2), then kicks the front.
    pub fn program(log: Log) -> impl Fn(&mut Cx) + Send + Sync + 'static {
        move |cx| {
            log.lock().clear();
            let back = cx.create_actor(Back { log: Arc::clone(&log) });
            let middle = cx.create_actor(Middle { next: back, log: Arc::clone(&log) });
            let front = cx.create_actor(Front { next: middle, log: Arc::clone(&log) });
            cx.send(front, Event::new("Kick"));
        }
    }
}

/// Two actors exchanging pings and pongs, observed by a liveness monitor that only cools down
/// once the pinger reports completion.
pub mod ping_pong {
    use crate::{stable_hash, Actor, Cx, Event, HandlerOutcome, Id, LivenessStatus, Monitor};

    pub struct Pinger {
        pub ponger: Id,
        /// Rounds left before halting, or `None` to play forever.
        pub rounds: Option<u32>,
        pub report_done: bool,
    }

    impl Actor for Pinger {
        fn name(&self) -> &'static str {
            "Pinger"
        }

        fn on_start(&mut self, cx: &mut Cx, _payload: Option<Event>) -> HandlerOutcome {
            cx.send(self.ponger, Event::new("Ping"));
            HandlerOutcome::Completed
        }

        fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
            if let Some(rounds) = &mut self.rounds {
                *rounds -= 1;
                if *rounds == 0 {
                    if self.report_done {
                        cx.monitor::<Progress>(Event::new("Done"));
                    }
                    cx.send(self.ponger, Event::halt());
                    cx.halt();
                    return HandlerOutcome::Completed;
                }
            }
            cx.send(self.ponger, Event::new("Ping"));
            HandlerOutcome::Completed
        }

        fn local_state_hash(&self) -> u64 {
            stable_hash(&self.rounds)
        }
    }

    pub struct Ponger;

    impl Actor for Ponger {
        fn name(&self) -> &'static str {
            "Ponger"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            if let Some(sender) = event.sender() {
                cx.send(sender, Event::new("Pong"));
            }
            HandlerOutcome::Completed
        }
    }

    #[derive(Default)]
    pub struct Progress {
        done: bool,
    }

    impl Monitor for Progress {
        fn name(&self) -> &'static str {
            "Progress"
        }

        fn on_event(&mut self, event: &Event) -> Result<(), String> {
            if event.name() == "Done" {
                self.done = true;
            }
            Ok(())
        }

        fn liveness_status(&self) -> Option<LivenessStatus> {
            Some(if self.done { LivenessStatus::Cold } else { LivenessStatus::Hot })
        }

        fn local_state_hash(&self) -> u64 {
            self.done as u64
        }
    }

    pub fn program(rounds: Option<u32>, report_done: bool) -> impl Fn(&mut Cx) + Send + Sync + 'static {
        move |cx| {
            cx.register_monitor(Progress::default());
            let ponger = cx.create_actor(Ponger);
            cx.create_actor(Pinger { ponger, rounds, report_done });
        }
    }
}

/// Two incrementers updating a shared counter. The racy variant yields between reading and
/// writing, so an update can be lost.
pub mod racy_counter {
    use crate::{Actor, Cx, Event, HandlerOutcome, Id};
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub struct Incrementer {
        pub counter: Arc<Mutex<u32>>,
        pub checker: Id,
        pub racy: bool,
    }

    impl Actor for Incrementer {
        fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
            if self.racy {
                let read = *self.counter.lock();
                cx.yield_now();
                *self.counter.lock() = read + 1;
            } else {
                *self.counter.lock() += 1;
            }
            cx.send(self.checker, Event::new("Done"));
            cx.halt();
            HandlerOutcome::Completed
        }
    }

    pub struct Checker {
        pub counter: Arc<Mutex<u32>>,
        pub expected: u32,
        pub seen: u32,
    }

    impl Actor for Checker {
        fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
            self.seen += 1;
            if self.seen == self.expected {
                let actual = *self.counter.lock();
                cx.assert(actual == self.expected, "lost update");
                cx.halt();
            }
            HandlerOutcome::Completed
        }
    }

    pub fn program(racy: bool) -> impl Fn(&mut Cx) + Send + Sync + 'static {
        move |cx| {
            let counter = Arc::new(Mutex::new(0));
            let checker = cx.create_actor(Checker { counter: Arc::clone(&counter), expected: 2, seen: 0 });
            for _ in 0..2 {
                let incrementer = cx.create_actor(Incrementer {
                    counter: Arc::clone(&counter),
                    checker,
                    racy,
                });
                cx.send(incrementer, Event::new("Go"));
            }
        }
    }
}

/// Workers entering a critical section watched by a safety monitor, optionally serialized by
/// a lock actor.
pub mod mutex {
    use crate::{Actor, Cx, Event, HandlerOutcome, Id, Monitor};
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct Lock {
        holder: Option<Id>,
        waiting: VecDeque<Id>,
    }

    impl Actor for Lock {
        fn name(&self) -> &'static str {
            "Lock"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            match (event.name(), event.sender()) {
                ("Acquire", Some(sender)) if self.holder.is_none() => {
                    self.holder = Some(sender);
                    cx.send(sender, Event::new("Granted"));
                }
                ("Acquire", Some(sender)) => self.waiting.push_back(sender),
                ("Release", _) => {
                    self.holder = self.waiting.pop_front();
                    if let Some(next) = self.holder {
                        cx.send(next, Event::new("Granted"));
                    }
                }
                _ => {}
            }
            HandlerOutcome::Completed
        }
    }

    pub struct Worker {
        pub lock: Option<Id>,
    }

    impl Worker {
        fn critical_section(&mut self, cx: &mut Cx) {
            cx.monitor::<Exclusion>(Event::new("Enter"));
            cx.yield_now();
            cx.monitor::<Exclusion>(Event::new("Exit"));
        }
    }

    impl Actor for Worker {
        fn name(&self) -> &'static str {
            "Worker"
        }

        fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
            match (event.name(), self.lock) {
                ("Start", Some(lock)) => {
                    cx.send(lock, Event::new("Acquire"));
                    return HandlerOutcome::receive("Granted");
                }
                ("Start", None) => {
                    self.critical_section(cx);
                    cx.halt();
                }
                ("Granted", Some(lock)) => {
                    self.critical_section(cx);
                    cx.send(lock, Event::new("Release"));
                    cx.halt();
                }
                _ => {}
            }
            HandlerOutcome::Completed
        }
    }

    #[derive(Default)]
    pub struct Exclusion {
        inside: u32,
    }

    impl Monitor for Exclusion {
        fn on_event(&mut self, event: &Event) -> Result<(), String> {
            match event.name() {
                "Enter" if self.inside > 0 => return Err("two workers in the critical section".to_string()),
                "Enter" => self.inside += 1,
                _ => self.inside = self.inside.saturating_sub(1),
            }
            Ok(())
        }
    }

    pub fn program(use_lock: bool) -> impl Fn(&mut Cx) + Send + Sync + 'static {
        move |cx| {
            cx.register_monitor(Exclusion::default());
            let lock = if use_lock { Some(cx.create_actor(Lock::default())) } else { None };
            for _ in 0..2 {
                let worker = cx.create_actor(Worker { lock });
                cx.send(worker, Event::new("Start"));
            }
        }
    }
}

/// A client waiting for a response that the server drops on the floor.
pub mod deadlock {
    use crate::{Actor, Cx, Event, HandlerOutcome, Id};

    pub struct Server;

    impl Actor for Server {
        fn on_event(&mut self, _cx: &mut Cx, _event: Event) -> HandlerOutcome {
            HandlerOutcome::Completed
        }

        fn ignores(&self, event: &Event) -> bool {
            event.name() == "Request"
        }
    }

    pub struct Client {
        pub server: Id,
    }

    impl Actor for Client {
        fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
            cx.send(self.server, Event::new("Request"));
            HandlerOutcome::receive("Response")
        }
    }

    pub fn program() -> impl Fn(&mut Cx) + Send + Sync + 'static {
        |cx| {
            let server = cx.create_actor(Server);
            let client = cx.create_actor(Client { server });
            cx.send(client, Event::new("Start"));
        }
    }
}
