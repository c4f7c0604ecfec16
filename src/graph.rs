//! The build graph, a bipartite graph between files and tasks.
//!
//! Files are registered once per canonical absolute path.  A task is created
//! from an action's publication; its outputs must be paths the graph has never
//! seen before, and its inputs must already exist (on disk or as another
//! task's output).  Together these rules make cycles impossible: a task can
//! only consume files that were known before it was declared.

use crate::action::{Action, Publication, Step};
use crate::canon::{absolute_path, is_inside};
use crate::checksum::{Hash, Value};
use crate::densemap::{dense_id, DenseMap};
use crate::error::BuildError;
use crate::fs::{FileSystem, MTime, RealFileSystem};
use crate::layout::Layout;
use anyhow::anyhow;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;

dense_id!(
    /// Id for File nodes in the Graph.
    FileId
);
dense_id!(
    /// Id for Task nodes in the Graph.
    TaskId
);

#[derive(Debug)]
pub struct File {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// The task that produces this file, if any.
    pub producer: Option<TaskId>,
    /// Tasks that declared this file as an input.
    pub dependants: Vec<TaskId>,
    /// A symbolic output with no real file.
    pub phony: bool,
    /// Cached stat result; None until first stat.
    mtime: Option<MTime>,
}

impl File {
    pub fn mtime(&self) -> Option<MTime> {
        self.mtime
    }
}

pub struct Task {
    pub inputs: Vec<FileId>,
    pub outputs: Vec<FileId>,
    pub message: String,
    pub check: Value,
    pub force: bool,
    pub phony: bool,
    pub primary: Option<Hash>,
    pub secondary: Option<Hash>,
    /// Inputs discovered by running the task.
    pub deposits: Vec<FileId>,
    pub warning: Option<String>,
    /// Where the task was declared.
    pub location: &'static Location<'static>,
    action: Option<Box<dyn Action>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("message", &self.message)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("primary", &self.primary)
            .field("location", &self.location)
            .finish()
    }
}

/// Handle returned to whoever declared a task.  Dependent actions read their
/// dependency's metadata from here.
#[derive(Debug, Clone)]
pub struct Published {
    pub task: TaskId,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// The single output, when there is exactly one.
    pub output: Option<PathBuf>,
    pub fields: BTreeMap<String, Value>,
}

impl Published {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

const RESERVED_FIELDS: [&str; 2] = ["inputs", "outputs"];

pub struct Graph {
    layout: Layout,
    fs: Arc<dyn FileSystem>,
    files: DenseMap<FileId, File>,
    tasks: DenseMap<TaskId, Task>,
    file_to_id: FxHashMap<PathBuf, FileId>,
    defaults: Vec<TaskId>,
}

impl Graph {
    pub fn new(layout: Layout) -> Self {
        Graph::with_fs(layout, Arc::new(RealFileSystem::new()))
    }

    pub fn with_fs(layout: Layout, fs: Arc<dyn FileSystem>) -> Self {
        Graph {
            layout,
            fs,
            files: DenseMap::default(),
            tasks: DenseMap::default(),
            file_to_id: FxHashMap::default(),
            defaults: Vec::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id]
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &File)> {
        self.files.iter()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id]
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> {
        self.tasks.all_ids()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Look up or register a path.  Relative paths resolve against the
    /// current directory.
    pub fn get_or_create(&mut self, path: impl AsRef<Path>) -> std::io::Result<FileId> {
        let path = absolute_path(path)?;
        Ok(self.intern(path))
    }

    fn intern(&mut self, path: PathBuf) -> FileId {
        if let Some(&id) = self.file_to_id.get(&path) {
            return id;
        }
        let id = self.files.push(File {
            path: path.clone(),
            producer: None,
            dependants: Vec::new(),
            phony: false,
            mtime: None,
        });
        self.file_to_id.insert(path, id);
        id
    }

    pub fn try_get(&self, path: impl AsRef<Path>) -> Option<FileId> {
        let path = absolute_path(path).ok()?;
        self.file_to_id.get(&path).copied()
    }

    pub fn exists_registered(&self, path: impl AsRef<Path>) -> bool {
        self.try_get(path).is_some()
    }

    /// Existence and mtime of a file, stat()ing it on first access only.
    pub fn stat(&mut self, id: FileId) -> anyhow::Result<MTime> {
        if let Some(mtime) = self.files[id].mtime {
            return Ok(mtime);
        }
        let file = &mut self.files[id];
        let mtime = self
            .fs
            .stat(&file.path)
            .map_err(|err| anyhow!("stat {:?}: {}", file.path, err))?;
        file.mtime = Some(mtime);
        Ok(mtime)
    }

    /// Force a fresh stat(), returning whether the cached state changed.
    pub fn restat(&mut self, id: FileId) -> anyhow::Result<bool> {
        let previous = self.files[id].mtime.take();
        let mtime = self.stat(id)?;
        Ok(previous != Some(mtime))
    }

    /// Record an mtime observed elsewhere (e.g. by a worker).
    pub fn set_mtime(&mut self, id: FileId, mtime: MTime) {
        self.files[id].mtime = Some(mtime);
    }

    /// stat() every not-yet-known file in `ids`, in parallel.
    pub fn stat_all(&mut self, ids: &[FileId]) -> anyhow::Result<()> {
        let pending: Vec<(FileId, &Path)> = ids
            .iter()
            .filter(|&&id| self.files[id].mtime.is_none())
            .map(|&id| (id, self.files[id].path.as_path()))
            .collect();
        let fs = &self.fs;
        let results: Vec<(FileId, anyhow::Result<MTime>)> = pending
            .par_iter()
            .map(|&(id, path)| {
                let res = fs
                    .stat(path)
                    .map_err(|err| anyhow!("stat {:?}: {}", path, err));
                (id, res)
            })
            .collect();
        for (id, res) in results {
            self.files[id].mtime = Some(res?);
        }
        Ok(())
    }

    pub(crate) fn take_action(&mut self, id: TaskId) -> Option<Box<dyn Action>> {
        self.tasks[id].action.take()
    }

    /// Run an action up to its publication and add the declared task to the
    /// graph.
    #[track_caller]
    pub fn spawn(&mut self, mut action: impl Action + 'static) -> anyhow::Result<Published> {
        let location = Location::caller();
        let publication = match action.resume()? {
            Step::Publish(publication) => publication,
            Step::Done => {
                return Err(BuildError::protocol(
                    "action did not yield anything; it must first publish",
                ))
            }
            step => {
                return Err(BuildError::protocol(format!(
                    "action yielded a {} instead of a publication",
                    step.describe()
                )))
            }
        };
        self.add_task(publication, Box::new(action), location)
    }

    fn add_task(
        &mut self,
        publication: Publication,
        action: Box<dyn Action>,
        location: &'static Location<'static>,
    ) -> anyhow::Result<Published> {
        let Publication {
            inputs,
            message,
            outputs,
            check,
            force,
            result,
            phony,
        } = publication;

        if message.trim().is_empty() {
            return Err(BuildError::config(format!(
                "task declared at {} has no message; every task needs one",
                location
            )));
        }
        if outputs.is_empty() {
            return Err(BuildError::config(format!(
                "task {:?} declares no outputs; every task needs at least one",
                message
            )));
        }
        if let Some(key) = RESERVED_FIELDS.iter().find(|k| result.contains_key(**k)) {
            return Err(BuildError::config(format!(
                "task {:?}: result field {:?} is reserved",
                message, key
            )));
        }

        let inputs = resolve_unique(inputs)?;
        let outputs = resolve_unique(outputs)?;

        for output in &outputs {
            if self.file_to_id.contains_key(output) || inputs.contains(output) {
                return Err(BuildError::config(format!(
                    "output {:?} of task {:?} is already known to the build",
                    output, message
                )));
            }
            if !phony && !is_inside(output, self.layout.root()) {
                return Err(BuildError::config(format!(
                    "output {:?} of task {:?} is outside the build directory {:?}",
                    output,
                    message,
                    self.layout.root()
                )));
            }
            if is_inside(output, &self.layout.bookkeeping_dir())
                && !is_inside(output, &self.layout.intermediate_dir())
            {
                return Err(BuildError::config(format!(
                    "output {:?} of task {:?} is reserved for build bookkeeping",
                    output, message
                )));
            }
        }

        // Inputs must exist now, unless another task produces them.
        let mut input_stats = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let known = self.file_to_id.get(input).map(|&id| &self.files[id]);
            let mtime = match known {
                Some(file) if file.producer.is_some() => None,
                Some(file) if file.mtime.is_some() => file.mtime,
                _ => Some(
                    self.fs
                        .stat(input)
                        .map_err(|err| anyhow!("stat {:?}: {}", input, err))?,
                ),
            };
            if mtime == Some(MTime::Missing) {
                return Err(BuildError::config(format!(
                    "input {:?} of task {:?} does not exist and no task produces it",
                    input, message
                )));
            }
            input_stats.push(mtime);
        }

        let id = self.tasks.push(Task {
            inputs: Vec::with_capacity(inputs.len()),
            outputs: Vec::with_capacity(outputs.len()),
            message,
            check,
            force,
            phony,
            primary: None,
            secondary: None,
            deposits: Vec::new(),
            warning: None,
            location,
            action: Some(action),
        });

        let mut in_ids = Vec::with_capacity(inputs.len());
        for (path, mtime) in inputs.iter().zip(input_stats) {
            let fid = self.intern(path.clone());
            if let Some(mtime) = mtime {
                self.files[fid].mtime = Some(mtime);
            }
            self.files[fid].dependants.push(id);
            in_ids.push(fid);
        }
        let mut out_ids = Vec::with_capacity(outputs.len());
        for path in &outputs {
            let fid = self.intern(path.clone());
            let file = &mut self.files[fid];
            file.producer = Some(id);
            file.phony = phony;
            out_ids.push(fid);
        }
        let task = &mut self.tasks[id];
        task.inputs = in_ids;
        task.outputs = out_ids;

        tracing::trace!(task = ?id, outputs = outputs.len(), "declared task");
        Ok(Published {
            task: id,
            output: if outputs.len() == 1 {
                Some(outputs[0].clone())
            } else {
                None
            },
            inputs,
            outputs,
            fields: result,
        })
    }

    /// Mark a task's outputs as built when no targets are requested.
    pub fn add_default(&mut self, published: &Published) {
        if !self.defaults.contains(&published.task) {
            self.defaults.push(published.task);
        }
    }

    pub fn defaults(&self) -> &[TaskId] {
        &self.defaults
    }
}

/// Make paths absolute and canonical, dropping duplicates but keeping order.
fn resolve_unique(paths: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths {
        let path = absolute_path(&path).map_err(|err| anyhow!("resolve {:?}: {}", path, err))?;
        if !out.contains(&path) {
            out.push(path);
        }
    }
    Ok(out)
}
