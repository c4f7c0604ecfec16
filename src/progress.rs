//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::error::kind_of;
use crate::graph::{Task, TaskId};
use crate::task::TaskResult;
use crate::work::StateCounts;
use std::cell::Cell;

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as individual tasks progress through build states.
    fn update(&self, counts: &StateCounts);

    /// Called once the set of tasks to run is known.
    fn outdated(&self, count: usize);

    /// Called when a worker picks up a task.
    fn task_started(&self, worker: usize, id: TaskId, task: &Task);

    /// Called when a task completes, successfully or not.
    fn task_finished(&self, id: TaskId, task: &Task, result: &TaskResult);

    /// Called with a task's warning text, both when the task just ran and
    /// when it is up to date but warned last time it ran.
    fn warning(&self, task: &Task, text: &str);

    /// Log a line of output without corrupting the progress display.
    fn log(&self, msg: &str);
}

/// Discards all notifications.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _counts: &StateCounts) {}
    fn outdated(&self, _count: usize) {}
    fn task_started(&self, _worker: usize, _id: TaskId, _task: &Task) {}
    fn task_finished(&self, _id: TaskId, _task: &Task, _result: &TaskResult) {}
    fn warning(&self, _task: &Task, _text: &str) {}
    fn log(&self, _msg: &str) {}
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print which worker runs each task, and how long it took.
    verbose: bool,
    outdated: Cell<usize>,
    started: Cell<usize>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            ..Default::default()
        }
    }
}

/// "[ 42%]" style prefix for the `started`th of `total` tasks.
fn percent(started: usize, total: usize) -> String {
    let pct = if total == 0 {
        100
    } else {
        (started * 100 / total).min(100)
    };
    format!("[{:>3}%]", pct)
}

impl Progress for ConsoleProgress {
    fn update(&self, _counts: &StateCounts) {
        // ignore
    }

    fn outdated(&self, count: usize) {
        self.outdated.set(count);
        self.started.set(0);
    }

    fn task_started(&self, worker: usize, _id: TaskId, task: &Task) {
        self.started.set(self.started.get() + 1);
        let prefix = percent(self.started.get(), self.outdated.get());
        if self.verbose {
            self.log(&format!("{} {} (worker {})", prefix, task.message, worker));
        } else {
            self.log(&format!("{} {}", prefix, task.message));
        }
    }

    fn task_finished(&self, _id: TaskId, task: &Task, result: &TaskResult) {
        match result.error() {
            None => {
                if self.verbose {
                    let (start, end) = result.span;
                    self.log(&format!(
                        "finished: {} in {:.2}s",
                        task.message,
                        end.duration_since(start).as_secs_f64()
                    ));
                }
            }
            Some(err) => {
                self.log(&format!("failed: {} ({})", task.message, kind_of(err)));
                self.log(&format!("  declared at {}", task.location));
                self.log(&format!("  {:#}", err));
            }
        }
    }

    fn warning(&self, task: &Task, text: &str) {
        self.log(&format!("warning: {}:", task.message));
        for line in text.lines() {
            self.log(&format!("  {}", line));
        }
    }

    fn log(&self, msg: &str) {
        println!("{}", msg);
    }
}
