//! Error classes raised by the core.  These travel inside `anyhow::Error`;
//! use `downcast_ref::<BuildError>()` to tell them apart.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid setup, reported before any task runs.
    #[error("{0}")]
    Config(String),

    #[error("unknown target {0:?}")]
    UnknownTarget(PathBuf),

    /// The action broke the declare/run protocol.  A bug in the action.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A file changed underneath the build.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The action's side effect failed.
    #[error("{0:#}")]
    Execution(anyhow::Error),
}

impl BuildError {
    pub fn config(msg: impl Into<String>) -> anyhow::Error {
        BuildError::Config(msg.into()).into()
    }

    pub fn protocol(msg: impl Into<String>) -> anyhow::Error {
        BuildError::Protocol(msg.into()).into()
    }

    pub fn consistency(msg: impl Into<String>) -> anyhow::Error {
        BuildError::Consistency(msg.into()).into()
    }

    /// Wrap an error raised by an action's side effect.  Errors that already
    /// carry a class keep it.
    pub fn execution(err: anyhow::Error) -> anyhow::Error {
        if err.is::<BuildError>() {
            err
        } else {
            BuildError::Execution(err).into()
        }
    }

    /// Short name of the class, for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Config(_) | BuildError::UnknownTarget(_) => "configuration error",
            BuildError::Protocol(_) => "protocol violation",
            BuildError::Consistency(_) => "consistency violation",
            BuildError::Execution(_) => "execution failure",
        }
    }
}

/// Classify an arbitrary error; anything not raised by the core counts as an
/// execution failure.
pub fn kind_of(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<BuildError>() {
        Some(b) => b.kind(),
        None => "execution failure",
    }
}
