use std::io::Write;
use std::time::Duration;

use crate::Bug;

/// The data sent during a report event.
pub struct ReportData {
    /// The number of iterations run so far.
    pub iterations: usize,
    /// The number of bugs found so far.
    pub bugs: usize,
    /// The total number of decisions across iterations.
    pub explored_steps: usize,
    /// The most decisions taken by a single iteration.
    pub max_explored_steps: usize,
    /// The number of iterations that stopped at the depth bound.
    pub depth_bound_hits: usize,
    /// The current duration testing has been running for.
    pub duration: Duration,
    /// Whether testing is done.
    pub done: bool,
}

/// A reporter for progress during testing.
pub trait Reporter {
    /// Report a progress event.
    fn report_checking(&mut self, data: ReportData);

    /// Report the bugs at the end of the run.
    fn report_bugs(&mut self, bugs: &[Bug]);
}

pub struct WriteReporter<'a, W> {
    writer: &'a mut W,
}

impl<'a, W> WriteReporter<'a, W> {
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W> Reporter for WriteReporter<'a, W>
where
    W: Write,
{
    fn report_checking(&mut self, data: ReportData) {
        if data.done {
            let _ = writeln!(
                self.writer,
                "Done. iterations={}, bugs={}, steps={}, max steps={}, depth bound hits={}, sec={}",
                data.iterations,
                data.bugs,
                data.explored_steps,
                data.max_explored_steps,
                data.depth_bound_hits,
                data.duration.as_secs(),
            );
        } else {
            let _ = writeln!(
                self.writer,
                "Testing. iterations={}, bugs={}, steps={}, max steps={}, depth bound hits={}",
                data.iterations, data.bugs, data.explored_steps, data.max_explored_steps, data.depth_bound_hits
            );
        }
    }

    fn report_bugs(&mut self, bugs: &[Bug]) {
        for bug in bugs {
            let _ = writeln!(self.writer, "{}", bug);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{BugKind, Id, Trace};

    #[test]
    fn writes_summary_and_bugs() {
        let mut trace = Trace::new();
        trace.add_scheduling_choice(Id::from(1));
        let bug = Bug { kind: BugKind::Deadlock, message: "stuck".to_string(), trace };

        let mut written = Vec::new();
        let mut reporter = WriteReporter::new(&mut written);
        reporter.report_checking(ReportData {
            iterations: 3,
            bugs: 1,
            explored_steps: 12,
            max_explored_steps: 5,
            depth_bound_hits: 0,
            duration: Duration::from_secs(2),
            done: true,
        });
        reporter.report_bugs(&[bug]);

        let output = String::from_utf8(written).unwrap();
        assert!(output.starts_with(
            "Done. iterations=3, bugs=1, steps=12, max steps=5, depth bound hits=0, sec=2\n"
        ));
        assert!(output.contains("Found deadlock bug: stuck"));
        assert!(output.contains("0: schedule Id(1)"));
    }
}
