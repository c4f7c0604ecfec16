//! Build runner, choosing and executing tasks as determined by out of date
//! inputs.
//!
//! All graph and record mutation happens on the coordinating thread; workers
//! only report back through the completion channel.

use crate::cancel::CancelToken;
use crate::canon::absolute_path;
use crate::error::{kind_of, BuildError};
use crate::graph::{FileId, Graph, TaskId};
use crate::hash;
use crate::progress::Progress;
use crate::record::Record;
use crate::run::BuildResult;
use crate::task::{self, Completed, FinishedTask, Job, Message};
use crate::thread_pool::scoped_thread_pool;
use anyhow::anyhow;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::Location;
use std::path::Path;
use std::sync::mpsc;

/// Build steps go through this sequence of states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Outdated, but some producer of an input has not finished yet.
    Want,
    /// Every producer resolved; waiting for a free worker.
    Ready,
    Running,
    Done,
    Failed,
}
const STATE_COUNT: usize = TaskState::Failed as usize + 1;

/// Counters that track tasks of the current build in each state.
#[derive(Clone, Debug, Default)]
pub struct StateCounts([usize; STATE_COUNT]);

impl StateCounts {
    pub fn get(&self, state: TaskState) -> usize {
        self.0[state as usize]
    }

    pub fn add(&mut self, state: TaskState, delta: isize) {
        let slot = &mut self.0[state as usize];
        *slot = slot.saturating_add_signed(delta);
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of tasks running at once.
    pub jobs: usize,
    /// Stop admitting tasks after the first failure.
    pub fail_fast: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            jobs: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            fail_fast: false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jobs == 0 {
            return Err(BuildError::config("job count must be at least 1"));
        }
        Ok(())
    }
}

/// A task that did not complete.
#[derive(Debug)]
pub struct Failure {
    pub task: TaskId,
    pub message: String,
    /// Where the task was declared.
    pub location: &'static Location<'static>,
    pub error: anyhow::Error,
}

impl Failure {
    pub fn kind(&self) -> &'static str {
        kind_of(&self.error)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (declared at {}): {}: {:#}",
            self.message,
            self.location,
            self.kind(),
            self.error
        )
    }
}

/// Why admission stopped early.
#[derive(Clone, Copy, Debug)]
enum Stop {
    FailFast { in_flight: usize },
    Cancelled { in_flight: usize },
}

pub struct Work<'a> {
    graph: &'a mut Graph,
    record: &'a mut Record,
    progress: &'a dyn Progress,
    options: Options,

    /// Files requested for this build.
    wanted: Vec<FileId>,
    /// State of every outdated task; tasks absent here are up to date.
    states: FxHashMap<TaskId, TaskState>,
    counts: StateCounts,
    ready: VecDeque<TaskId>,
    failures: Vec<Failure>,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a mut Graph,
        record: &'a mut Record,
        progress: &'a dyn Progress,
        options: Options,
    ) -> Self {
        Work {
            graph,
            record,
            progress,
            options,
            wanted: Vec::new(),
            states: FxHashMap::default(),
            counts: StateCounts::default(),
            ready: VecDeque::new(),
            failures: Vec::new(),
        }
    }

    /// Request a registered path to be brought up to date.
    pub fn want_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        match self.graph.try_get(path) {
            Some(id) => {
                self.want_fileid(id);
                Ok(())
            }
            None => {
                let path = absolute_path(path).unwrap_or_else(|_| path.to_path_buf());
                Err(BuildError::UnknownTarget(path).into())
            }
        }
    }

    pub fn want_fileid(&mut self, id: FileId) {
        if !self.wanted.contains(&id) {
            self.wanted.push(id);
        }
    }

    /// Request the outputs of the default tasks, or of every task when no
    /// defaults were declared.
    pub fn want_defaults(&mut self) {
        let tasks: Vec<TaskId> = if self.graph.defaults().is_empty() {
            self.graph.task_ids().collect()
        } else {
            self.graph.defaults().to_vec()
        };
        let graph: &Graph = self.graph;
        let outputs: Vec<FileId> = tasks
            .iter()
            .flat_map(move |&id| graph.task(id).outputs.iter().copied())
            .collect();
        for id in outputs {
            self.want_fileid(id);
        }
    }

    fn set_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(prev) = self.states.insert(id, state) {
            self.counts.add(prev, -1);
        }
        self.counts.add(state, 1);
        self.progress.update(&self.counts);
    }

    /// Tasks the wanted files transitively depend on, in declaration order.
    /// Declaration order is a topological order: inputs exist before their
    /// consumers are declared.
    fn parents(&self) -> Vec<TaskId> {
        let mut seen = FxHashSet::default();
        let mut stack = self.wanted.clone();
        while let Some(file) = stack.pop() {
            if let Some(id) = self.graph.file(file).producer {
                if seen.insert(id) {
                    stack.extend(self.graph.task(id).inputs.iter().copied());
                }
            }
        }
        let mut parents: Vec<TaskId> = seen.into_iter().collect();
        parents.sort();
        parents
    }

    /// Compute the primary key of every task in the graph.
    fn compute_primaries(&mut self) -> anyhow::Result<()> {
        let ids: Vec<TaskId> = self.graph.task_ids().collect();
        let graph: &Graph = self.graph;
        let sources: Vec<FileId> = ids
            .iter()
            .flat_map(move |&id| hash::source_inputs(graph, id))
            .collect();
        self.graph.stat_all(&sources)?;
        for id in ids {
            let primary = hash::primary_key(self.graph, id)?;
            self.graph.task_mut(id).primary = Some(primary);
        }
        Ok(())
    }

    /// Check a single task against the record, ignoring its inputs'
    /// producers.  Fills in the task's secondary key and recorded deposits.
    fn is_dirty(&mut self, id: TaskId) -> anyhow::Result<bool> {
        let task = self.graph.task(id);
        let primary = task
            .primary
            .ok_or_else(|| anyhow!("task {:?} has no primary key", task.message))?;
        if task.force {
            tracing::debug!(task = %task.message, "forced");
            return Ok(true);
        }
        if !self.record.has(&primary) {
            tracing::debug!(task = %task.message, "no record entry");
            return Ok(true);
        }
        if !task.phony {
            let outputs = task.outputs.clone();
            for out in outputs {
                if !self.graph.stat(out)?.exists() {
                    tracing::debug!(path = ?self.graph.file(out).path, "output missing");
                    return Ok(true);
                }
            }
        }

        let paths = self.record.get_deposits(&primary).unwrap_or_default().to_vec();
        let mut deposits = Vec::with_capacity(paths.len());
        for path in paths {
            let fid = self
                .graph
                .get_or_create(&path)
                .map_err(|err| anyhow!("resolve {:?}: {}", path, err))?;
            deposits.push(fid);
        }
        self.graph.stat_all(&deposits)?;
        let secondary = hash::secondary_key(self.graph, id, &deposits)?;
        let task = self.graph.task_mut(id);
        task.deposits = deposits;
        task.secondary = Some(secondary);
        task.warning = self.record.get_warning(&primary).map(str::to_string);

        let dirty = self.record.get_secondary(&primary) != Some(&secondary);
        if dirty {
            tracing::debug!(task = %task.message, "outputs or deposits changed");
        }
        Ok(dirty)
    }

    /// Decide which tasks must run to bring the wanted files up to date.
    /// Returns the number of outdated tasks.
    pub fn compute_outdated(&mut self) -> anyhow::Result<usize> {
        self.compute_primaries()?;
        let parents = self.parents();
        let relevant: FxHashSet<TaskId> = parents.iter().copied().collect();

        let mut stack = Vec::new();
        for &id in &parents {
            if self.is_dirty(id)? {
                stack.push(id);
            }
        }

        // A rebuilt producer invalidates every consumer, even though the
        // consumers' own keys can't see that yet.
        let mut outdated = FxHashSet::default();
        while let Some(id) = stack.pop() {
            if !outdated.insert(id) {
                continue;
            }
            for &out in &self.graph.task(id).outputs {
                for &dep in &self.graph.file(out).dependants {
                    if relevant.contains(&dep) && !outdated.contains(&dep) {
                        stack.push(dep);
                    }
                }
            }
        }

        for &id in &parents {
            if outdated.contains(&id) {
                self.set_state(id, TaskState::Want);
            }
        }
        // Tasks that will not run still show what they warned about last
        // time, whether or not they were requested.
        for id in self.graph.task_ids() {
            if outdated.contains(&id) {
                continue;
            }
            let task = self.graph.task(id);
            let warning = task.primary.and_then(|primary| self.record.get_warning(&primary));
            if let Some(warning) = warning {
                self.progress.warning(task, warning);
            }
        }
        for &id in &parents {
            if outdated.contains(&id) && self.inputs_resolved(id) {
                self.set_state(id, TaskState::Ready);
                self.ready.push_back(id);
            }
        }

        tracing::info!(
            tasks = self.graph.task_count(),
            wanted = parents.len(),
            outdated = outdated.len(),
            "computed outdated tasks"
        );
        self.progress.outdated(outdated.len());
        Ok(outdated.len())
    }

    /// Whether every producer of the task's inputs is up to date or done.
    fn inputs_resolved(&self, id: TaskId) -> bool {
        self.graph.task(id).inputs.iter().all(|&file| {
            match self.graph.file(file).producer {
                None => true,
                Some(producer) => matches!(
                    self.states.get(&producer),
                    None | Some(TaskState::Done)
                ),
            }
        })
    }

    /// Detach everything a worker needs from the graph.
    fn job(&mut self, id: TaskId) -> anyhow::Result<Job> {
        let action = self
            .graph
            .take_action(id)
            .ok_or_else(|| anyhow!("task {:?} has already run", self.graph.task(id).message))?;
        let task = self.graph.task(id);
        let inputs = task
            .inputs
            .iter()
            .map(|&f| self.graph.file(f))
            .filter(|file| !file.phony)
            .filter_map(|file| file.mtime().map(|mtime| (file.path.clone(), mtime)))
            .collect();
        let outputs = task
            .outputs
            .iter()
            .map(|&f| (f, self.graph.file(f).path.clone()))
            .collect();
        Ok(Job {
            id,
            action,
            phony: task.phony,
            inputs,
            outputs,
            build_dir: self.graph.layout().root().to_path_buf(),
            fs: self.graph.fs().clone(),
        })
    }

    fn task_succeeded(&mut self, id: TaskId, completed: Completed) -> anyhow::Result<()> {
        for (file, mtime) in completed.outputs {
            self.graph.set_mtime(file, mtime);
        }
        let mut deposits = Vec::with_capacity(completed.deposits.len());
        for path in &completed.deposits {
            let fid = self
                .graph
                .get_or_create(path)
                .map_err(|err| anyhow!("resolve {:?}: {}", path, err))?;
            deposits.push(fid);
        }
        let secondary = hash::secondary_key(self.graph, id, &deposits)?;
        let task = self.graph.task_mut(id);
        task.deposits = deposits;
        task.secondary = Some(secondary);
        task.warning = completed.warning;
        self.record.update(self.graph, id)?;

        let task = self.graph.task(id);
        if let Some(warning) = &task.warning {
            self.progress.warning(task, warning);
        }
        self.set_state(id, TaskState::Done);

        let mut newly_ready = Vec::new();
        for &out in &self.graph.task(id).outputs {
            for &dep in &self.graph.file(out).dependants {
                if self.states.get(&dep) == Some(&TaskState::Want)
                    && !newly_ready.contains(&dep)
                    && self.inputs_resolved(dep)
                {
                    newly_ready.push(dep);
                }
            }
        }
        for dep in newly_ready {
            self.set_state(dep, TaskState::Ready);
            self.ready.push_back(dep);
        }
        Ok(())
    }

    fn task_failed(&mut self, id: TaskId, error: anyhow::Error) {
        let task = self.graph.task(id);
        tracing::debug!(task = %task.message, kind = kind_of(&error), "task failed");
        self.failures.push(Failure {
            task: id,
            message: task.message.clone(),
            location: task.location,
            error,
        });
        self.set_state(id, TaskState::Failed);
    }

    /// Returns whether the task succeeded.
    fn task_finished(&mut self, finished: FinishedTask) -> anyhow::Result<bool> {
        let id = finished.id;
        self.progress
            .task_finished(id, self.graph.task(id), &finished.result);
        match finished.result.outcome {
            Ok(completed) => {
                self.task_succeeded(id, completed)?;
                Ok(true)
            }
            Err(error) => {
                self.task_failed(id, error);
                Ok(false)
            }
        }
    }

    /// Run the outdated tasks.  Must follow `compute_outdated`.
    pub fn run(&mut self, cancel: &CancelToken) -> anyhow::Result<BuildResult> {
        if self.states.is_empty() {
            return Ok(BuildResult::NothingToDo);
        }
        let jobs = NonZeroUsize::new(self.options.jobs)
            .ok_or_else(|| BuildError::config("job count must be at least 1"))?;

        let (tx, rx) = mpsc::channel::<Message>();
        let mut stop: Option<Stop> = None;
        let scheduled = scoped_thread_pool(jobs, |pool| -> anyhow::Result<()> {
            let mut running = 0;
            loop {
                while stop.is_none() && running < jobs.get() {
                    if cancel.is_cancelled() {
                        self.progress.log(&format!(
                            "cancelled; waiting for {} running tasks",
                            running
                        ));
                        stop = Some(Stop::Cancelled { in_flight: running });
                        break;
                    }
                    let Some(id) = self.ready.pop_front() else {
                        break;
                    };
                    let job = self.job(id)?;
                    self.set_state(id, TaskState::Running);
                    let tx = tx.clone();
                    pool.execute(move |worker| {
                        // The sends only fail if the coordinator has gone
                        // away, in which case nobody cares about the result.
                        let _ = tx.send(Message::Started { worker, id });
                        let _ = tx.send(Message::Finished(task::run(worker, job)));
                    })?;
                    running += 1;
                }

                if running == 0 {
                    break;
                }

                match rx.recv()? {
                    Message::Started { worker, id } => {
                        self.progress
                            .task_started(worker, id, self.graph.task(id));
                    }
                    Message::Finished(finished) => {
                        running -= 1;
                        let ok = self.task_finished(finished)?;
                        if !ok && self.options.fail_fast && stop.is_none() {
                            self.progress.log(&format!(
                                "stopping after failure; waiting for {} running tasks",
                                running
                            ));
                            stop = Some(Stop::FailFast { in_flight: running });
                        }
                    }
                }
            }
            Ok(())
        });

        // Anything outdated that did not finish must run next time, even if
        // its own keys would not show it: a dependency may have been rebuilt.
        let unfinished: Vec<TaskId> = self
            .states
            .iter()
            .filter(|&(_, &state)| state != TaskState::Done)
            .map(|(&id, _)| id)
            .collect();
        for id in unfinished {
            if let Some(primary) = self.graph.task(id).primary {
                self.record.invalidate(&primary);
            }
        }
        scheduled?;

        let done = self.counts.get(TaskState::Done);
        let failures = std::mem::take(&mut self.failures);
        Ok(match stop {
            Some(Stop::Cancelled { in_flight }) => BuildResult::Stopped {
                in_flight,
                failures,
            },
            Some(Stop::FailFast { .. }) | None if !failures.is_empty() => {
                BuildResult::Failed { failures }
            }
            _ => BuildResult::Success(done),
        })
    }

    pub fn counts(&self) -> &StateCounts {
        &self.counts
    }
}
