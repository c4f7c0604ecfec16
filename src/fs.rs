use std::path::Path;
use std::time::SystemTime;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
///
/// Anything that is not a regular file (directories, sockets, ...) is
/// reported as Missing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }

    /// Whether `self` is a strictly later observation than `before`.
    /// Any stamp is later than Missing.
    pub fn advanced_from(&self, before: MTime) -> bool {
        match (before, *self) {
            (_, MTime::Missing) => false,
            (MTime::Missing, MTime::Stamp(_)) => true,
            (MTime::Stamp(b), MTime::Stamp(a)) => a > b,
        }
    }

    /// Nanoseconds since the epoch, or -1 for Missing.  Used as checksum input.
    pub fn nanos(&self) -> i128 {
        match self {
            MTime::Missing => -1,
            MTime::Stamp(t) => match t.duration_since(SystemTime::UNIX_EPOCH) {
                Ok(d) => d.as_nanos() as i128,
                Err(e) => -(e.duration().as_nanos() as i128) - 2,
            },
        }
    }
}

/// Filesystem access needed by the graph.  Indirected as a trait so tests
/// can fake timestamps.
pub trait FileSystem: Send + Sync {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => MTime::Stamp(meta.modified()?),
            Ok(_) => MTime::Missing,
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }
}
