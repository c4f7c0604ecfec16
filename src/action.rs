//! The two-phase action protocol.
//!
//! An action is a resumable computation.  The first resume must declare the
//! task (a [`Publication`]), before any I/O happens, so the whole graph can be
//! known up front.  If the task turns out to be outdated it is resumed again
//! to perform its side effect, after which it may report a [`Deposit`] of
//! discovered inputs.  After that it must be finished.

use crate::checksum::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What an action produces at each resume.
#[derive(Debug)]
pub enum Step {
    Publish(Publication),
    Deposit(Deposit),
    /// The computation has terminated.
    Done,
}

impl Step {
    pub fn describe(&self) -> &'static str {
        match self {
            Step::Publish(_) => "publication",
            Step::Deposit(_) => "deposit",
            Step::Done => "nothing",
        }
    }
}

/// A resumable build action.  The core calls `resume` once to obtain the
/// publication and, only if the task must run, again (and a final time) to
/// perform the side effect.
pub trait Action: Send {
    fn resume(&mut self) -> anyhow::Result<Step>;
}

/// A task declaration, as yielded by an action's first resume.
#[derive(Debug, Default)]
pub struct Publication {
    pub inputs: Vec<PathBuf>,
    pub message: String,
    pub outputs: Vec<PathBuf>,
    /// Extra cache key material, e.g. compiler flags.
    pub check: Value,
    pub force: bool,
    /// Fields exposed to dependents through the `Published` handle.
    pub result: BTreeMap<String, Value>,
    pub phony: bool,
}

impl Publication {
    pub fn new(message: impl Into<String>) -> Self {
        Publication {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn inputs<P: Into<PathBuf>>(mut self, inputs: impl IntoIterator<Item = P>) -> Self {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn outputs<P: Into<PathBuf>>(mut self, outputs: impl IntoIterator<Item = P>) -> Self {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn check(mut self, check: impl Into<Value>) -> Self {
        self.check = check.into();
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn phony(mut self, phony: bool) -> Self {
        self.phony = phony;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.result.insert(key.into(), value.into());
        self
    }
}

/// Inputs discovered while running, plus an optional warning.
#[derive(Debug, Default, Clone)]
pub struct Deposit {
    pub inputs: Vec<PathBuf>,
    pub warning: Option<String>,
}

impl Deposit {
    pub fn new<P: Into<PathBuf>>(inputs: impl IntoIterator<Item = P>) -> Self {
        Deposit {
            inputs: inputs.into_iter().map(Into::into).collect(),
            warning: None,
        }
    }

    pub fn warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

type RunFn = Box<dyn FnOnce() -> anyhow::Result<Option<Deposit>> + Send>;

enum RuleState {
    Fresh(Publication, RunFn),
    Published(RunFn),
    Ran,
    Finished,
}

/// An Action built from a publication and a closure performing the side
/// effect.
pub struct Rule {
    state: RuleState,
}

impl Rule {
    pub fn new(
        publication: Publication,
        run: impl FnOnce() -> anyhow::Result<Option<Deposit>> + Send + 'static,
    ) -> Self {
        Rule {
            state: RuleState::Fresh(publication, Box::new(run)),
        }
    }
}

impl Action for Rule {
    fn resume(&mut self) -> anyhow::Result<Step> {
        match std::mem::replace(&mut self.state, RuleState::Finished) {
            RuleState::Fresh(publication, run) => {
                self.state = RuleState::Published(run);
                Ok(Step::Publish(publication))
            }
            RuleState::Published(run) => {
                self.state = RuleState::Ran;
                Ok(match run()? {
                    Some(deposit) => Step::Deposit(deposit),
                    None => Step::Done,
                })
            }
            RuleState::Ran | RuleState::Finished => Ok(Step::Done),
        }
    }
}

/// A phony task that completes once all of `inputs` are built.
pub fn group<P: Into<PathBuf>>(
    name: impl Into<PathBuf>,
    inputs: impl IntoIterator<Item = P>,
) -> Rule {
    let name = name.into();
    let publication = Publication::new(format!("Group {:?} done.", name))
        .inputs(inputs)
        .outputs([name])
        .phony(true);
    Rule::new(publication, || Ok(None))
}

/// Copies `input` to `output`.
pub fn copy(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Rule {
    let (input, output) = (input.into(), output.into());
    let publication = Publication::new(format!("Copy {:?} to {:?}", input, output))
        .inputs([input.clone()])
        .outputs([output.clone()]);
    Rule::new(publication, move || {
        std::fs::copy(&input, &output)
            .map_err(|err| anyhow::anyhow!("copy {:?}: {}", input, err))?;
        // Some platforms clone the source mtime; stamp the output explicitly.
        std::fs::File::options()
            .write(true)
            .open(&output)?
            .set_modified(std::time::SystemTime::now())?;
        Ok(None)
    })
}
