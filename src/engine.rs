//! Runs a program for a batch of iterations under a scheduling strategy, collecting bugs.

use crate::report::{ReportData, Reporter};
use crate::runtime::{Cx, Entry, Runtime};
use crate::strategy::{ReplayStrategy, SchedulingStrategy};
use crate::trace::{Trace, TraceStep};
use crate::{Configuration, Error};
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Classifies a [`Bug`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BugKind {
    /// A failed [`Cx::assert`], a monitor rejecting an event, or a misuse of the runtime.
    Assertion,
    /// A fair cycle during which every liveness monitor stayed hot, identified by the range of
    /// trace steps forming the cycle, or a liveness monitor that was hot at termination.
    Liveness { cycle: Option<Range<usize>> },
    /// Some unit waits while no unit is enabled.
    Deadlock,
    /// Program code panicked.
    Panic,
    /// A replayed trace no longer matches the program.
    ReplayDivergence,
}

impl Display for BugKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BugKind::Assertion => write!(f, "assertion"),
            BugKind::Liveness { .. } => write!(f, "liveness"),
            BugKind::Deadlock => write!(f, "deadlock"),
            BugKind::Panic => write!(f, "panic"),
            BugKind::ReplayDivergence => write!(f, "replay divergence"),
        }
    }
}

/// A finding together with the trace that reproduces it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bug {
    pub kind: BugKind,
    pub message: String,
    pub trace: Trace,
}

impl Bug {
    /// The trace steps forming a liveness cycle.
    pub fn cycle(&self) -> Option<&[TraceStep]> {
        match &self.kind {
            BugKind::Liveness { cycle: Some(range) } => self.trace.steps().get(range.clone()),
            _ => None,
        }
    }
}

impl Display for Bug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} bug: {}", self.kind, self.message)?;
        write!(f, "{}", self.trace)?;
        if let Some(cycle) = self.cycle() {
            write!(f, "Cycle:")?;
            for step in cycle {
                write!(f, "\n- {}", step)?;
            }
        }
        Ok(())
    }
}

/// The outcome of one iteration.
#[derive(Clone, Debug)]
pub struct IterationResult {
    pub bug: Option<Bug>,
    pub trace: Trace,
    pub explored_steps: usize,
    pub depth_bound_hit: bool,
    /// Number of fingerprint revisits flagged by the state cache.
    pub revisits: usize,
}

/// Summary of a batch of iterations.
#[derive(Clone, Debug)]
pub struct TestReport {
    pub iterations: usize,
    pub bugs: Vec<Bug>,
    /// Total decisions across all iterations.
    pub explored_steps: usize,
    pub max_explored_steps: usize,
    pub depth_bound_hits: usize,
    pub revisits: usize,
    pub seed: u64,
    pub strategy: String,
    pub duration: Duration,
}

impl TestReport {
    pub fn first_bug(&self) -> Option<&Bug> {
        self.bugs.first()
    }

    /// Panics if any iteration found a bug.
    pub fn assert_no_bugs(&self) -> &Self {
        if let Some(bug) = self.first_bug() {
            panic!("Expected no bugs, but found {} in total. First:\n{}", self.bugs.len(), bug);
        }
        self
    }

    /// Panics unless a bug was found. Otherwise returns the first one.
    pub fn assert_bug(&self) -> &Bug {
        match self.first_bug() {
            Some(bug) => bug,
            None => panic!(
                "Expected a bug, but none was found. iterations={}, strategy={}, seed={}",
                self.iterations, self.strategy, self.seed
            ),
        }
    }
}

/// Drives iterations of a program, given as an entry closure run in the root context.
///
/// ```rust
/// use schedcheck::*;
///
/// struct Echo;
///
/// impl Actor for Echo {
///     fn on_event(&mut self, cx: &mut Cx, _event: Event) -> HandlerOutcome {
///         cx.halt();
///         HandlerOutcome::Completed
///     }
/// }
///
/// let config = Configuration::new().strategy(StrategyKind::Dfs).iterations(10);
/// let mut engine = TestingEngine::new(config, |cx| {
///     let echo = cx.create_actor(Echo);
///     cx.send(echo, Event::new("Ping"));
/// })
/// .unwrap();
/// let report = engine.run();
/// report.assert_no_bugs();
/// assert_eq!(report.iterations, 1);
/// ```
pub struct TestingEngine {
    config: Configuration,
    seed: u64,
    entry: Entry,
    runtime: Arc<Runtime>,
}

impl TestingEngine {
    pub fn new<F>(config: Configuration, entry: F) -> Result<Self, Error>
    where
        F: Fn(&mut Cx) + Send + Sync + 'static,
    {
        config.validate()?;
        let seed = match config.seed {
            Some(seed) => seed,
            None => {
                let seed = time_seed();
                log::info!("No seed configured. Using a time-derived seed. seed={}", seed);
                seed
            }
        };
        let strategy = config.build_strategy(seed);
        Ok(TestingEngine {
            runtime: Arc::new(Runtime::new(config.clone(), strategy)),
            config,
            seed,
            entry: Arc::new(entry),
        })
    }

    /// Replaces the configured strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn SchedulingStrategy>) -> Self {
        self.runtime = Arc::new(Runtime::new(self.config.clone(), strategy));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Runs the batch and returns its summary.
    pub fn run(&mut self) -> TestReport {
        self.execute(None)
    }

    /// Runs the batch, emitting progress about once per second and the bugs at the end.
    pub fn run_and_report(&mut self, reporter: &mut dyn Reporter) -> TestReport {
        self.execute(Some(reporter))
    }

    fn execute(&mut self, mut reporter: Option<&mut dyn Reporter>) -> TestReport {
        let start = Instant::now();
        let description = self.runtime.with_strategy(|strategy| {
            strategy.reset();
            strategy.description()
        });
        log::info!(
            "Started testing. strategy={}, iterations={}, depth_bound={}",
            description,
            self.config.iterations,
            self.config.depth_bound
        );

        let mut report = TestReport {
            iterations: 0,
            bugs: Vec::new(),
            explored_steps: 0,
            max_explored_steps: 0,
            depth_bound_hits: 0,
            revisits: 0,
            seed: self.seed,
            strategy: description,
            duration: Duration::default(),
        };
        let mut last_report = Instant::now();
        for iteration in 0..self.config.iterations {
            let result = self.runtime.run_iteration(Arc::clone(&self.entry));
            report.iterations += 1;
            report.explored_steps += result.explored_steps;
            report.max_explored_steps = report.max_explored_steps.max(result.explored_steps);
            report.revisits += result.revisits;
            if result.depth_bound_hit {
                report.depth_bound_hits += 1;
            }
            log::debug!(
                "Finished iteration. iteration={}, steps={}, depth_bound_hit={}, bug={}",
                iteration,
                result.explored_steps,
                result.depth_bound_hit,
                result.bug.is_some()
            );

            if let Some(bug) = result.bug {
                log::info!("Iteration found a bug. iteration={}, kind={}, steps={}", iteration, bug.kind, bug.trace.len());
                report.bugs.push(bug);
                if !self.config.full_exploration {
                    break;
                }
            }

            let finished = self.runtime.with_strategy(|strategy| {
                strategy.configure_next_iteration();
                strategy.has_finished()
            });
            if finished {
                log::info!("Strategy exhausted its search space. iterations={}", report.iterations);
                break;
            }

            if let Some(reporter) = reporter.as_deref_mut() {
                if last_report.elapsed() >= Duration::from_secs(1) {
                    reporter.report_checking(report_data(&report, start.elapsed(), false));
                    last_report = Instant::now();
                }
            }
        }

        report.duration = start.elapsed();
        log::info!(
            "Finished testing. iterations={}, bugs={}, steps={}, sec={}",
            report.iterations,
            report.bugs.len(),
            report.explored_steps,
            report.duration.as_secs()
        );
        if let Some(reporter) = reporter {
            reporter.report_checking(report_data(&report, report.duration, true));
            reporter.report_bugs(&report.bugs);
        }
        report
    }

    /// Re-executes the program along a recorded trace. The result carries a
    /// [`BugKind::ReplayDivergence`] bug if the program no longer follows the trace.
    pub fn replay(&self, trace: &Trace) -> IterationResult {
        log::info!("Replaying trace. steps={}", trace.len());
        let strategy = Box::new(ReplayStrategy::new(trace.clone()));
        let runtime = Arc::new(Runtime::new(self.config.clone(), strategy));
        runtime.run_iteration(Arc::clone(&self.entry))
    }
}

fn report_data(report: &TestReport, duration: Duration, done: bool) -> ReportData {
    ReportData {
        iterations: report.iterations,
        bugs: report.bugs.len(),
        explored_steps: report.explored_steps,
        max_explored_steps: report.max_explored_steps,
        depth_bound_hits: report.depth_bound_hits,
        duration,
        done,
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
