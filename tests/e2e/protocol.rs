use crate::e2e::*;
use cook::{Action, BuildError, Deposit, Publication, Rule, Step};
use std::path::PathBuf;

/// Yields a scripted sequence of steps, then Done forever.
struct Scripted {
    steps: Vec<Step>,
    /// Output to write when the side effect runs.
    output: Option<PathBuf>,
    resumed: usize,
}

impl Scripted {
    fn new(publication: Publication, rest: Vec<Step>) -> Self {
        let output = publication.outputs.first().cloned();
        let mut steps = vec![Step::Publish(publication)];
        steps.extend(rest);
        Scripted {
            steps,
            output,
            resumed: 0,
        }
    }
}

impl Action for Scripted {
    fn resume(&mut self) -> anyhow::Result<Step> {
        self.resumed += 1;
        if self.resumed == 2 {
            if let Some(output) = &self.output {
                write_stamped(output, "out")?;
            }
        }
        Ok(if self.steps.is_empty() {
            Step::Done
        } else {
            self.steps.remove(0)
        })
    }
}

fn protocol_violation(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<BuildError>(), Some(BuildError::Protocol(_)))
}

#[test]
fn second_yield_must_be_deposit_or_done() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    graph.spawn(Scripted::new(
        Publication::new("republish").outputs([space.out("a")]),
        vec![Step::Publish(Publication::new("again"))],
    ))?;
    let result = space.build(&mut graph)?;
    assert_eq!(result.failures().len(), 1);
    assert!(protocol_violation(&result.failures()[0].error));
    Ok(())
}

#[test]
fn no_third_yield_after_deposit() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    graph.spawn(Scripted::new(
        Publication::new("chatty").outputs([space.out("a")]),
        vec![
            Step::Deposit(Deposit::default()),
            Step::Deposit(Deposit::default()),
        ],
    ))?;
    let result = space.build(&mut graph)?;
    assert_eq!(result.failures().len(), 1);
    assert!(protocol_violation(&result.failures()[0].error));
    // Outputs of the failed task are removed.
    assert!(!space.out("a").exists());
    Ok(())
}

#[test]
fn well_behaved_scripted_action() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    graph.spawn(Scripted::new(
        Publication::new("fine").outputs([space.out("a")]),
        vec![Step::Deposit(Deposit::default())],
    ))?;
    assert_success(&space.build(&mut graph)?, 1);
    Ok(())
}

/// Never yields at all.
struct Mute;
impl Action for Mute {
    fn resume(&mut self) -> anyhow::Result<Step> {
        Ok(Step::Done)
    }
}

#[test]
fn action_must_publish_first() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    let err = graph.spawn(Mute).unwrap_err();
    assert!(protocol_violation(&err));

    // Declaring a well-formed task beforehand changes nothing.
    graph.spawn(Scripted::new(
        Publication::new("x").outputs([space.out("sub/x")]),
        vec![],
    ))?;
    let err = graph.spawn(Mute).unwrap_err();
    assert!(protocol_violation(&err));
    // Declaring does not touch the build directory.
    assert!(!space.out("sub").exists());
    Ok(())
}

#[test]
fn missing_output_is_a_violation() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    graph.spawn(Rule::new(
        Publication::new("lazy").outputs([space.out("never")]),
        || Ok(None),
    ))?;
    let result = space.build(&mut graph)?;
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].kind(), "protocol violation");
    Ok(())
}

#[test]
fn output_timestamp_must_advance() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.out("a.o");
    // Left over from an earlier build, with no record entry.
    write_stamped(&out, "old")?;
    let before = mtime(&out)?;

    let mut graph = space.graph()?;
    let target = out.clone();
    graph.spawn(Rule::new(
        Publication::new("coarse").outputs([out.clone()]),
        move || {
            std::fs::write(&target, "new bytes")?;
            // What a filesystem with coarse timestamps would show.
            set_mtime(&target, before)?;
            Ok(None)
        },
    ))?;
    let result = space.build(&mut graph)?;
    assert_eq!(result.failures().len(), 1);
    assert!(protocol_violation(&result.failures()[0].error));
    assert!(!out.exists());
    Ok(())
}

#[test]
fn deposit_inside_build_dir_is_a_violation() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let private = space.out("private.h");
    write_stamped(&private, "")?;
    let mut graph = space.graph()?;
    graph.spawn(depositing(
        &log,
        "sneaky",
        &[],
        &space.out("a.o"),
        &[private],
        None,
    ))?;
    let result = space.build(&mut graph)?;
    assert_eq!(result.failures().len(), 1);
    assert!(protocol_violation(&result.failures()[0].error));
    Ok(())
}
