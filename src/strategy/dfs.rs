use crate::actor::Id;
use crate::strategy::{enabled, SchedulingStrategy, UnitInfo};

/// One decision on the current search path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Branch {
    options: usize,
    chosen: usize,
}

/// Exhaustive depth-first search. Scheduling decisions and boolean choices share one decision
/// stack: each iteration replays the stack's prefix, extends it with first options, and
/// [`configure_next_iteration`](SchedulingStrategy::configure_next_iteration) backtracks to the
/// deepest branch with an unexplored sibling.
pub struct DfsStrategy {
    depth_bound: usize,
    stack: Vec<Branch>,
    index: usize,
    max_explored_steps: usize,
    finished: bool,
}

impl DfsStrategy {
    pub fn new(depth_bound: usize) -> Self {
        DfsStrategy {
            depth_bound,
            stack: Vec::new(),
            index: 0,
            max_explored_steps: 0,
            finished: false,
        }
    }

    fn set_depth_bound(&mut self, depth_bound: usize) {
        self.depth_bound = depth_bound;
    }

    fn decide(&mut self, options: usize) -> usize {
        let chosen = match self.stack.get_mut(self.index) {
            Some(branch) => {
                if branch.options != options {
                    log::debug!(
                        "Branching factor changed along a replayed prefix. step={}, recorded={}, observed={}",
                        self.index,
                        branch.options,
                        options
                    );
                    branch.options = options;
                    branch.chosen = branch.chosen.min(options - 1);
                }
                branch.chosen
            }
            None => {
                self.stack.push(Branch { options, chosen: 0 });
                0
            }
        };
        self.index += 1;
        chosen
    }
}

impl SchedulingStrategy for DfsStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], _current: Option<Id>) -> Option<Id> {
        let enabled = enabled(units);
        if enabled.is_empty() {
            return None;
        }
        let chosen = self.decide(enabled.len());
        Some(enabled[chosen])
    }

    fn next_choice(&mut self, _max_value: usize) -> Option<bool> {
        Some(self.decide(2) == 1)
    }

    fn explored_steps(&self) -> usize {
        self.index
    }

    fn max_explored_steps(&self) -> usize {
        self.max_explored_steps
    }

    fn depth_bound(&self) -> usize {
        self.depth_bound
    }

    fn has_finished(&self) -> bool {
        self.finished
    }

    fn configure_next_iteration(&mut self) {
        self.max_explored_steps = self.max_explored_steps.max(self.index);
        self.stack.truncate(self.index);
        while let Some(last) = self.stack.last_mut() {
            if last.chosen + 1 < last.options {
                last.chosen += 1;
                break;
            }
            self.stack.pop();
        }
        self.finished = self.stack.is_empty();
        self.index = 0;
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.index = 0;
        self.max_explored_steps = 0;
        self.finished = false;
    }

    fn description(&self) -> String {
        format!("DFS[depth_bound={}]", self.depth_bound)
    }
}

/// Depth-first search whose depth bound starts at one and grows each time a pass exhausts the
/// current bound, up to `max_depth`. Stops early once a pass never reaches its bound, since
/// deeper passes would explore the same executions.
pub struct IddfsStrategy {
    dfs: DfsStrategy,
    max_depth: usize,
    current_depth: usize,
    reached_bound: bool,
    max_explored_steps: usize,
    finished: bool,
}

impl IddfsStrategy {
    pub fn new(max_depth: usize) -> Self {
        IddfsStrategy {
            dfs: DfsStrategy::new(1),
            max_depth,
            current_depth: 1,
            reached_bound: false,
            max_explored_steps: 0,
            finished: false,
        }
    }

    pub fn current_depth(&self) -> usize {
        self.current_depth
    }
}

impl SchedulingStrategy for IddfsStrategy {
    fn next_unit(&mut self, units: &[UnitInfo], current: Option<Id>) -> Option<Id> {
        self.dfs.next_unit(units, current)
    }

    fn next_choice(&mut self, max_value: usize) -> Option<bool> {
        self.dfs.next_choice(max_value)
    }

    fn explored_steps(&self) -> usize {
        self.dfs.explored_steps()
    }

    fn max_explored_steps(&self) -> usize {
        self.max_explored_steps.max(self.dfs.max_explored_steps())
    }

    fn depth_bound(&self) -> usize {
        self.current_depth
    }

    fn has_finished(&self) -> bool {
        self.finished
    }

    fn configure_next_iteration(&mut self) {
        if self.dfs.explored_steps() >= self.current_depth {
            self.reached_bound = true;
        }
        self.dfs.configure_next_iteration();
        if !self.dfs.has_finished() {
            return;
        }
        if self.reached_bound && self.current_depth < self.max_depth {
            self.max_explored_steps = self.max_explored_steps.max(self.dfs.max_explored_steps());
            self.current_depth += 1;
            self.reached_bound = false;
            self.dfs.reset();
            self.dfs.set_depth_bound(self.current_depth);
            log::debug!("Deepening search. depth={}", self.current_depth);
        } else {
            self.finished = true;
        }
    }

    fn reset(&mut self) {
        self.dfs.reset();
        self.current_depth = 1;
        self.dfs.set_depth_bound(1);
        self.reached_bound = false;
        self.max_explored_steps = 0;
        self.finished = false;
    }

    fn description(&self) -> String {
        format!("IDDFS[depth={}, max_depth={}]", self.current_depth, self.max_depth)
    }
}
