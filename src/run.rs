//! Runs one build invocation over a declared graph.

use crate::cancel::CancelToken;
use crate::graph::Graph;
use crate::progress::Progress;
use crate::record::Record;
use crate::work::{Failure, Options, Work};
use std::path::PathBuf;

/// The result of a build.
#[derive(Debug)]
pub enum BuildResult {
    /// Everything requested was already up to date.
    NothingToDo,
    /// Build succeeded, and the number is the count of executed tasks.
    Success(usize),
    /// At least one task failed.
    Failed { failures: Vec<Failure> },
    /// Cancellation stopped admission while `in_flight` tasks were running.
    Stopped {
        in_flight: usize,
        failures: Vec<Failure>,
    },
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::NothingToDo | BuildResult::Success(_))
    }

    pub fn failures(&self) -> &[Failure] {
        match self {
            BuildResult::Failed { failures } | BuildResult::Stopped { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl std::fmt::Display for BuildResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildResult::NothingToDo => write!(f, "cook: no work to do"),
            BuildResult::Success(n) => write!(f, "cook: ran {} tasks, now up to date", n),
            BuildResult::Failed { failures } => {
                write!(f, "cook: {} tasks failed", failures.len())?;
                for failure in failures {
                    write!(f, "\n  {}", failure)?;
                }
                Ok(())
            }
            BuildResult::Stopped {
                in_flight,
                failures,
            } => write!(
                f,
                "cook: cancelled with {} tasks in flight, {} failed",
                in_flight,
                failures.len()
            ),
        }
    }
}

/// Bring `requested` (or the default targets, when `None`) up to date.
///
/// Loads the record from the graph's layout, runs the outdated tasks, then
/// sweeps undeclared files from the build directory and saves the record.
/// The sweep and save happen even when scheduling fails part way through.
pub fn start(
    graph: &mut Graph,
    options: &Options,
    requested: Option<&[PathBuf]>,
    progress: &dyn Progress,
    cancel: &CancelToken,
) -> anyhow::Result<BuildResult> {
    options.validate()?;
    let mut record = Record::load(graph.layout().record_path());

    let result = {
        let mut work = Work::new(graph, &mut record, progress, options.clone());
        match requested {
            Some(paths) => {
                for path in paths {
                    work.want_file(path)?;
                }
            }
            None => work.want_defaults(),
        }
        work.compute_outdated()?;
        work.run(cancel)
    };

    let cleaned = record.clean(graph);
    let saved = record.save();
    let result = result?;
    let removed = cleaned?;
    if !removed.is_empty() {
        progress.log(&format!(
            "removed {} files not declared by any task",
            removed.len()
        ));
    }
    saved?;
    Ok(result)
}
