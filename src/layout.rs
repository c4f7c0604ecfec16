//! Directory layout of a build output directory.
//!
//! ```text
//! <root>/                  declared outputs live anywhere below here
//! <root>/.cook/record.json persisted build record
//! <root>/.cook/intermediate/
//! <root>/.cook/temporary/  scratch space, emptied on every initialization
//! ```

use crate::canon::{absolute_path, canon_path};
use anyhow::Context;
use std::path::{Path, PathBuf};

const BOOKKEEPING: &str = ".cook";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Describe a layout without touching the disk.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Layout {
            root: absolute_path(root)?,
        })
    }

    /// Create the directory structure, wiping any previous temporary dir.
    pub fn initialize(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let layout = Layout::new(root)?;
        for dir in [layout.root.clone(), layout.intermediate_dir()] {
            std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
        }
        let temporary = layout.temporary_dir();
        if temporary.is_dir() {
            std::fs::remove_dir_all(&temporary)
                .with_context(|| format!("remove {:?}", temporary))?;
        }
        std::fs::create_dir_all(&temporary).with_context(|| format!("create {:?}", temporary))?;
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bookkeeping_dir(&self) -> PathBuf {
        self.root.join(BOOKKEEPING)
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.bookkeeping_dir().join("intermediate")
    }

    pub fn temporary_dir(&self) -> PathBuf {
        self.bookkeeping_dir().join("temporary")
    }

    pub fn record_path(&self) -> PathBuf {
        self.bookkeeping_dir().join("record.json")
    }

    /// A path inside the build directory.
    pub fn build(&self, path: impl AsRef<Path>) -> PathBuf {
        canon_path(self.root.join(path))
    }

    /// A path inside the intermediate directory, for outputs nobody names
    /// explicitly.
    pub fn intermediate(&self, path: impl AsRef<Path>) -> PathBuf {
        canon_path(self.intermediate_dir().join(path))
    }

    /// A path inside the temporary directory.  Files here are never part of
    /// the graph and are ignored by the orphan sweep.
    pub fn temporary(&self, path: impl AsRef<Path>) -> PathBuf {
        canon_path(self.temporary_dir().join(path))
    }
}
