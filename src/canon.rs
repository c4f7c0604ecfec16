//! Path canonicalization.

use std::path::{Component, Path, PathBuf};

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar" and "foo/../bar" => "bar".
/// A ".." that cannot be resolved is kept for relative paths and dropped
/// at the root of absolute ones.
pub fn canon_path(path: impl AsRef<Path>) -> PathBuf {
    let mut out = PathBuf::new();
    // Number of components pushed that a ".." may pop.
    let mut poppable = 0usize;
    for component in path.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if poppable > 0 {
                    out.pop();
                    poppable -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                poppable += 1;
            }
        }
    }
    out
}

/// Resolve a path against the current directory, then canonicalize it.
pub fn absolute_path(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(canon_path(path))
    } else {
        Ok(canon_path(std::env::current_dir()?.join(path)))
    }
}

/// Whether `path` lies inside `dir`, comparing whole components.
/// Both paths must already be canonical.
pub fn is_inside(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}
