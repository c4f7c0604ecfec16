//! Cache keys for tasks.
//!
//! The primary key identifies "this task, declared this way, over these
//! sources" and must be computable before anything runs, since it is the
//! join key into the record of the previous run.  The secondary key is taken
//! over the observable results of running the task (output and deposit
//! mtimes) and detects outputs that were touched or deleted behind our back.

use crate::checksum::{checksum, Hash, Value};
use crate::graph::{FileId, Graph, TaskId};

/// Files whose mtime feeds the primary key: inputs not produced by a task.
pub fn source_inputs(graph: &Graph, id: TaskId) -> impl Iterator<Item = FileId> + '_ {
    graph
        .task(id)
        .inputs
        .iter()
        .copied()
        .filter(move |&f| graph.file(f).producer.is_none())
}

fn path_set(graph: &Graph, ids: &[FileId]) -> Value {
    Value::set(ids.iter().map(|&f| graph.file(f).path.as_path()))
}

/// Map of path to mtime for `ids`, stat()ing as needed.
fn mtime_map(graph: &mut Graph, ids: &[FileId]) -> anyhow::Result<Value> {
    let mut entries = Vec::with_capacity(ids.len());
    for &f in ids {
        let mtime = graph.stat(f)?;
        entries.push((Value::from(graph.file(f).path.as_path()), Value::Int(mtime.nanos())));
    }
    Ok(Value::Map(entries))
}

/// Digest over input paths, output paths, the check value and the mtimes of
/// source inputs.
pub fn primary_key(graph: &mut Graph, id: TaskId) -> anyhow::Result<Hash> {
    let sources: Vec<FileId> = source_inputs(graph, id).collect();
    let source_times = mtime_map(graph, &sources)?;
    let task = graph.task(id);
    let value = Value::List(vec![
        path_set(graph, &task.inputs),
        source_times,
        path_set(graph, &task.outputs),
        task.check.clone(),
    ]);
    Ok(checksum(&value))
}

/// Digest over the mtimes of outputs and of the given deposits; missing files
/// hash as a sentinel.
pub fn secondary_key(graph: &mut Graph, id: TaskId, deposits: &[FileId]) -> anyhow::Result<Hash> {
    let outputs = graph.task(id).outputs.clone();
    let value = Value::List(vec![
        mtime_map(graph, &outputs)?,
        mtime_map(graph, deposits)?,
    ]);
    Ok(checksum(&value))
}
