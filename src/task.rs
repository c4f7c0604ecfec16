//! Runs a single task on a worker thread.
//! Unaware of the build graph: the coordinator hands over a detached [`Job`]
//! and gets back a [`FinishedTask`] over the completion channel.

use crate::action::{Action, Deposit, Step};
use crate::canon::{absolute_path, is_inside};
use crate::error::BuildError;
use crate::fs::{FileSystem, MTime};
use crate::graph::{FileId, TaskId};
use anyhow::anyhow;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Everything a worker needs to run one task.
pub struct Job {
    pub id: TaskId,
    pub action: Box<dyn Action>,
    pub phony: bool,
    /// Inputs whose mtime was known when the task was admitted.
    pub inputs: Vec<(PathBuf, MTime)>,
    pub outputs: Vec<(FileId, PathBuf)>,
    pub build_dir: PathBuf,
    pub fs: Arc<dyn FileSystem>,
}

/// What a successful run leaves behind.
#[derive(Debug)]
pub struct Completed {
    /// Fresh mtimes of the outputs; empty for phony tasks.
    pub outputs: Vec<(FileId, MTime)>,
    /// Discovered inputs, canonical and validated.
    pub deposits: Vec<PathBuf>,
    pub warning: Option<String>,
}

/// The result of executing a task.
pub struct TaskResult {
    pub span: (Instant, Instant),
    pub outcome: anyhow::Result<Completed>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.outcome.as_ref().err()
    }
}

pub struct FinishedTask {
    /// Which worker ran the task.
    pub worker: usize,
    pub id: TaskId,
    pub result: TaskResult,
}

/// Messages from workers to the coordinator.
pub enum Message {
    Started { worker: usize, id: TaskId },
    Finished(FinishedTask),
}

/// Runs a job to completion on the calling (worker) thread.  Never panics:
/// a panicking action is reported as a failure.
pub fn run(worker: usize, mut job: Job) -> FinishedTask {
    let start = Instant::now();
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| lifecycle(&mut job))) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(BuildError::execution(anyhow!("task panicked: {}", msg)))
        }
    };
    if outcome.is_err() && !job.phony {
        remove_outputs(&job);
    }
    FinishedTask {
        worker,
        id: job.id,
        result: TaskResult {
            span: (start, Instant::now()),
            outcome,
        },
    }
}

fn lifecycle(job: &mut Job) -> anyhow::Result<Completed> {
    let before = prepare(job)?;
    let deposit = execute(job.action.as_mut())?;
    finalize(job, before, deposit)
}

fn stat(fs: &dyn FileSystem, path: &std::path::Path) -> anyhow::Result<MTime> {
    fs.stat(path).map_err(|err| anyhow!("stat {:?}: {}", path, err))
}

fn check_inputs(job: &Job, when: &str) -> anyhow::Result<()> {
    for (path, mtime) in &job.inputs {
        if stat(job.fs.as_ref(), path)? != *mtime {
            return Err(BuildError::consistency(format!(
                "input {:?} was changed {}; inputs must stay unchanged during the build",
                path, when
            )));
        }
    }
    Ok(())
}

/// Creates output directories and snapshots output mtimes.
fn prepare(job: &Job) -> anyhow::Result<Vec<MTime>> {
    let mut before = Vec::new();
    if !job.phony {
        for (_, path) in &job.outputs {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|err| anyhow!("mkdir {:?}: {}", dir, err))?;
            }
            before.push(stat(job.fs.as_ref(), path)?);
        }
    }
    check_inputs(job, "before execution")?;
    Ok(before)
}

/// Resumes the action past its side effect and collects the deposit.
fn execute(action: &mut dyn Action) -> anyhow::Result<Deposit> {
    match action.resume().map_err(BuildError::execution)? {
        Step::Done => Ok(Deposit::default()),
        Step::Deposit(deposit) => match action.resume().map_err(BuildError::execution)? {
            Step::Done => Ok(deposit),
            step => Err(BuildError::protocol(format!(
                "action yielded a {} after its deposit; it must be done by then",
                step.describe()
            ))),
        },
        Step::Publish(_) => Err(BuildError::protocol(
            "action yielded a second publication; expected a deposit or nothing",
        )),
    }
}

fn finalize(job: &Job, before: Vec<MTime>, deposit: Deposit) -> anyhow::Result<Completed> {
    check_inputs(job, "while building")?;

    let mut outputs = Vec::new();
    if !job.phony {
        for ((id, path), before) in job.outputs.iter().zip(before) {
            let after = stat(job.fs.as_ref(), path)?;
            if !after.exists() {
                return Err(BuildError::protocol(format!(
                    "task did not create output {:?}",
                    path
                )));
            }
            if !after.advanced_from(before) {
                return Err(BuildError::protocol(format!(
                    "output {:?} was not touched by the task; every run must update output timestamps",
                    path
                )));
            }
            outputs.push((*id, after));
        }
    }

    let mut deposits = Vec::with_capacity(deposit.inputs.len());
    for path in deposit.inputs {
        let path = absolute_path(&path).map_err(|err| anyhow!("resolve {:?}: {}", path, err))?;
        if is_inside(&path, &job.build_dir) {
            return Err(BuildError::protocol(format!(
                "deposit {:?} lies inside the build directory; declare it as an input instead",
                path
            )));
        }
        if !stat(job.fs.as_ref(), &path)?.exists() {
            return Err(BuildError::protocol(format!(
                "deposit {:?} does not exist",
                path
            )));
        }
        if !deposits.contains(&path) {
            deposits.push(path);
        }
    }

    let warning = deposit
        .warning
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty());

    Ok(Completed {
        outputs,
        deposits,
        warning,
    })
}

/// A failed task must not leave outputs that could look fresh next time.
fn remove_outputs(job: &Job) {
    for (_, path) in &job.outputs {
        if path.is_file() {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!(path = ?path, %err, "could not remove output of failed task");
            }
        }
    }
}
