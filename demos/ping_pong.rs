use schedcheck::*;

/// Bounces a ball between two players. With a round limit the server halts both players once
/// the rally ends; otherwise the rally never ends.
struct Server {
    receiver: Id,
    rounds: Option<u32>,
}

impl Actor for Server {
    fn name(&self) -> &'static str {
        "Server"
    }

    fn on_start(&mut self, cx: &mut Cx, _payload: Option<Event>) -> HandlerOutcome {
        cx.send_new_operation(self.receiver, Event::new("Ping"));
        HandlerOutcome::Completed
    }

    fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
        if let Some(rounds) = &mut self.rounds {
            *rounds -= 1;
            if *rounds == 0 {
                cx.monitor::<RallyEnds>(Event::new("RallyOver"));
                cx.send(self.receiver, Event::halt());
                cx.halt();
                return HandlerOutcome::Completed;
            }
        }
        cx.send(self.receiver, Event::new("Ping"));
        HandlerOutcome::Completed
    }

    fn local_state_hash(&self) -> u64 {
        stable_hash(&self.rounds)
    }
}

struct Receiver;

impl Actor for Receiver {
    fn name(&self) -> &'static str {
        "Receiver"
    }

    fn on_event(&mut self, cx: &mut Cx, event: Event) -> HandlerOutcome {
        if let Some(server) = event.sender() {
            cx.send(server, Event::new("Pong"));
        }
        HandlerOutcome::Completed
    }
}

/// Hot until the rally is over.
#[derive(Default)]
struct RallyEnds {
    over: bool,
}

impl Monitor for RallyEnds {
    fn name(&self) -> &'static str {
        "RallyEnds"
    }

    fn on_event(&mut self, _event: &Event) -> Result<(), String> {
        self.over = true;
        Ok(())
    }

    fn liveness_status(&self) -> Option<LivenessStatus> {
        Some(if self.over { LivenessStatus::Cold } else { LivenessStatus::Hot })
    }

    fn local_state_hash(&self) -> u64 {
        self.over as u64
    }
}

fn program(rounds: Option<u32>) -> impl Fn(&mut Cx) + Send + Sync + 'static {
    move |cx| {
        cx.register_monitor(RallyEnds::default());
        let receiver = cx.create_actor(Receiver);
        cx.create_actor(Server { receiver, rounds });
    }
}

fn main() -> Result<(), pico_args::Error> {
    env_logger::init_from_env(env_logger::Env::default()
        .default_filter_or("info")); // `RUST_LOG=${LEVEL}` env variable to override

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some("check") => {
            let rounds = args.opt_free_from_str()?.unwrap_or(3);
            let strategy: StrategyKind = args.opt_free_from_str()?.unwrap_or(StrategyKind::Dfs);
            let iterations = args.opt_free_from_str()?.unwrap_or(1_000);
            println!("Testing a rally of {} rounds with {} for up to {} iterations.",
                     rounds, strategy, iterations);

            let config = Configuration::new()
                .strategy(strategy)
                .iterations(iterations)
                .check_liveness(true);
            run(config, program(Some(rounds)));
        }
        Some("liveness") => {
            let seed = args.opt_free_from_str()?.unwrap_or(0);
            println!("Searching for an endless rally with seed {}.", seed);

            let config = Configuration::new()
                .seed(seed)
                .depth_bound(500)
                .iterations(100)
                .check_liveness(true);
            run(config, program(None));
        }
        _ => {
            println!("USAGE:");
            println!("  ./ping_pong check [ROUNDS] [STRATEGY] [ITERATIONS]");
            println!("  ./ping_pong liveness [SEED]");
        }
    }

    Ok(())
}

fn run(config: Configuration, program: impl Fn(&mut Cx) + Send + Sync + 'static) {
    let mut engine = match TestingEngine::new(config, program) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            return;
        }
    };
    let report = engine.run_and_report(&mut WriteReporter::new(&mut std::io::stdout()));
    if let Some(bug) = report.first_bug() {
        match bug.trace.to_json() {
            Ok(json) => println!("Trace to replay: {}", json),
            Err(err) => eprintln!("Unable to serialize the trace: {}", err),
        }
    }
}
