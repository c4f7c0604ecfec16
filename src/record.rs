//! The build record stores information about previous runs for determining
//! which tasks are up to date.
//!
//! It is a JSON object keyed by primary key, each value being
//! `[secondary_key, [deposit_paths...], warning_or_null]`.

use crate::canon::canon_path;
use crate::checksum::Hash;
use crate::graph::{Graph, TaskId};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry(pub Hash, pub Vec<PathBuf>, pub Option<String>);

#[derive(Debug)]
pub struct Record {
    path: PathBuf,
    entries: BTreeMap<Hash, Entry>,
}

impl Record {
    /// An empty record that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Record {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Read the record at `path`.  A missing file is the first run; an
    /// unreadable or corrupt one is treated the same way, which forces a
    /// full rebuild.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = ?path, %err, "ignoring corrupt build record");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(path = ?path, %err, "ignoring unreadable build record");
                BTreeMap::new()
            }
        };
        tracing::debug!(path = ?path, entries = entries.len(), "loaded build record");
        Record { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, primary: &Hash) -> bool {
        self.entries.contains_key(primary)
    }

    pub fn get_secondary(&self, primary: &Hash) -> Option<&Hash> {
        self.entries.get(primary).map(|e| &e.0)
    }

    pub fn get_deposits(&self, primary: &Hash) -> Option<&[PathBuf]> {
        self.entries.get(primary).map(|e| e.1.as_slice())
    }

    pub fn get_warning(&self, primary: &Hash) -> Option<&str> {
        self.entries.get(primary).and_then(|e| e.2.as_deref())
    }

    /// Overwrite the entry for an executed task from its current keys,
    /// deposits and warning.
    pub fn update(&mut self, graph: &Graph, id: TaskId) -> anyhow::Result<()> {
        let task = graph.task(id);
        let primary = task
            .primary
            .ok_or_else(|| anyhow!("task {:?} has no primary key", task.message))?;
        let secondary = task
            .secondary
            .ok_or_else(|| anyhow!("task {:?} has no secondary key", task.message))?;
        let deposits = task
            .deposits
            .iter()
            .map(|&f| graph.file(f).path.clone())
            .collect();
        self.entries
            .insert(primary, Entry(secondary, deposits, task.warning.clone()));
        Ok(())
    }

    /// Forget a task, forcing it to run next time.
    pub fn invalidate(&mut self, primary: &Hash) -> bool {
        self.entries.remove(primary).is_some()
    }

    /// Drop entries of tasks no longer in the graph, then delete every file in
    /// the build directory the graph does not know about.  Returns the
    /// removed files.
    pub fn clean(&mut self, graph: &Graph) -> anyhow::Result<Vec<PathBuf>> {
        let current: HashSet<Hash> = graph
            .task_ids()
            .filter_map(|id| graph.task(id).primary)
            .collect();
        let before = self.entries.len();
        self.entries.retain(|primary, _| current.contains(primary));
        if self.entries.len() != before {
            tracing::debug!(dropped = before - self.entries.len(), "pruned build record");
        }

        let layout = graph.layout();
        let temporary = layout.temporary_dir();
        let record = canon_path(&self.path);
        let mut removed = Vec::new();
        if !layout.root().is_dir() {
            return Ok(removed);
        }
        let walk = walkdir::WalkDir::new(layout.root())
            .into_iter()
            .filter_entry(|e| e.path() != temporary.as_path());
        for entry in walk {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let path = canon_path(entry.path());
            if path == record || graph.exists_registered(&path) {
                continue;
            }
            tracing::warn!(path = ?path, "removing non-declared file");
            std::fs::remove_file(&path).with_context(|| format!("remove {:?}", path))?;
            removed.push(path);
        }
        Ok(removed)
    }

    /// Persist the record.  Writes a sibling file and renames it over the
    /// old one, so a crash never leaves a truncated record behind.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut w = std::io::BufWriter::new(
                std::fs::File::create(&tmp).with_context(|| format!("create {:?}", tmp))?,
            );
            serde_json::to_writer(&mut w, &self.entries)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {:?} to {:?}", tmp, self.path))?;
        Ok(())
    }
}
