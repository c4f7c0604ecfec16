use crate::e2e::*;
use cook::{BuildError, BuildResult, CancelToken, Graph, NoProgress, Options, Publication, Rule};

/// a.c -> A -> a.o -> B -> b.o -> C -> c.out, plus an unrelated d.c -> D.
/// B fails when `b_fails` is set.
fn declare(space: &TestSpace, log: &Log, b_fails: bool) -> anyhow::Result<Graph> {
    let mut graph = space.graph()?;
    let (a, b, c) = (space.out("a.o"), space.out("b.o"), space.out("c.out"));
    graph.spawn(concat(log, "A", &[space.src("a.c")], &a))?;
    if b_fails {
        graph.spawn(failing(log, "B", &[a], &b, "exit status 1"))?;
    } else {
        graph.spawn(concat(log, "B", &[a], &b))?;
    }
    graph.spawn(concat(log, "C", &[b], &c))?;
    graph.spawn(concat(log, "D", &[space.src("d.c")], &space.out("d.o")))?;
    Ok(graph)
}

#[test]
fn failure_blocks_only_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a.c", "a")?;
    space.write("d.c", "d")?;
    let log = Log::default();

    let result = space.build(&mut declare(&space, &log, true)?)?;
    assert_eq!(log.take(), vec!["A", "B", "D"]);
    let failures = match &result {
        BuildResult::Failed { failures } => failures,
        other => panic!("expected failure, got {}", other),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "B");
    assert_eq!(failures[0].kind(), "execution failure");
    assert!(matches!(
        failures[0].error.downcast_ref::<BuildError>(),
        Some(BuildError::Execution(_))
    ));
    assert!(failures[0].location.file().ends_with("failure.rs"));
    assert!(!result.is_success());

    // The partial output of the failed task was removed; C never ran.
    assert!(!space.out("b.o").exists());
    assert!(!space.out("c.out").exists());
    assert!(space.out("d.o").exists());

    // Fixed: only the failed task and what it blocked run.
    let result = space.build(&mut declare(&space, &log, false)?)?;
    assert_success(&result, 2);
    assert_eq!(log.take(), vec!["B", "C"]);
    Ok(())
}

#[test]
fn failure_in_rebuild_keeps_dependents_outdated() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a.c", "v1")?;
    space.write("d.c", "d")?;
    let log = Log::default();

    assert_success(&space.build(&mut declare(&space, &log, false)?)?, 4);
    log.take();

    space.write("a.c", "v2")?;
    let result = space.build(&mut declare(&space, &log, true)?)?;
    assert_eq!(result.failures().len(), 1);
    assert_eq!(log.take(), vec!["A", "B"]);

    let result = space.build(&mut declare(&space, &log, false)?)?;
    assert_success(&result, 2);
    assert_eq!(log.take(), vec!["B", "C"]);
    assert_eq!(space.read(&space.out("c.out"))?, "v2");
    Ok(())
}

#[test]
fn fail_fast_stops_admission() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let mut graph = space.graph()?;
    graph.spawn(failing(&log, "X", &[], &space.out("x"), "boom"))?;
    graph.spawn(concat(&log, "Y", &[], &space.out("y")))?;
    graph.spawn(concat(&log, "Z", &[], &space.out("z")))?;

    let options = Options {
        jobs: 1,
        fail_fast: true,
    };
    let result = cook::start(&mut graph, &options, None, &NoProgress, &CancelToken::new())?;
    assert_eq!(log.take(), vec!["X"]);
    match result {
        BuildResult::Failed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].error.to_string(), "boom");
        }
        other => panic!("expected failure, got {}", other),
    }
    Ok(())
}

#[test]
fn keep_going_without_fail_fast() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let mut graph = space.graph()?;
    graph.spawn(failing(&log, "X", &[], &space.out("x"), "boom"))?;
    graph.spawn(failing(&log, "Y", &[], &space.out("y"), "bang"))?;
    graph.spawn(concat(&log, "Z", &[], &space.out("z")))?;

    let options = Options {
        jobs: 1,
        fail_fast: false,
    };
    let result = cook::start(&mut graph, &options, None, &NoProgress, &CancelToken::new())?;
    assert_eq!(log.take(), vec!["X", "Y", "Z"]);
    assert_eq!(result.failures().len(), 2);
    assert!(result.to_string().starts_with("cook: 2 tasks failed"));
    Ok(())
}

#[test]
fn panicking_action_is_a_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let mut graph = space.graph()?;
    graph.spawn(Rule::new(
        Publication::new("panics").outputs([space.out("p")]),
        || panic!("kaboom"),
    ))?;
    graph.spawn(concat(&log, "other", &[], &space.out("o")))?;

    let result = space.build(&mut graph)?;
    assert_eq!(log.take(), vec!["other"]);
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].error.to_string(), "task panicked: kaboom");
    Ok(())
}

#[test]
fn cancelled_before_admission() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let declare = || -> anyhow::Result<Graph> {
        let mut graph = space.graph()?;
        graph.spawn(concat(&log, "X", &[], &space.out("x")))?;
        Ok(graph)
    };

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = cook::start(&mut declare()?, &space.options(), None, &NoProgress, &cancel)?;
    match result {
        BuildResult::Stopped {
            in_flight,
            failures,
        } => {
            assert_eq!(in_flight, 0);
            assert!(failures.is_empty());
        }
        other => panic!("expected cancellation, got {}", other),
    }
    assert!(log.take().is_empty());

    assert_success(&space.build(&mut declare()?)?, 1);
    Ok(())
}

#[test]
fn cancelled_mid_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let log = Log::default();
    let cancel = CancelToken::new();

    let declare = || -> anyhow::Result<Graph> {
        let mut graph = space.graph()?;
        let (handler, x_log, x) = (cancel.clone(), log.clone(), space.out("x"));
        graph.spawn(Rule::new(
            Publication::new("X").outputs([x.clone()]),
            move || {
                x_log.push("X");
                write_stamped(&x, "x")?;
                // Simulates an interrupt arriving while X runs.
                handler.cancel();
                Ok(None)
            },
        ))?;
        graph.spawn(concat(&log, "Y", &[], &space.out("y")))?;
        Ok(graph)
    };

    let options = Options {
        jobs: 1,
        fail_fast: false,
    };
    let result = cook::start(&mut declare()?, &options, None, &NoProgress, &cancel)?;
    assert!(matches!(result, BuildResult::Stopped { in_flight: 0, .. }));
    assert_eq!(log.take(), vec!["X"]);

    // X's success was recorded before stopping; only Y is left.
    let result = cook::start(
        &mut declare()?,
        &options,
        None,
        &NoProgress,
        &CancelToken::new(),
    )?;
    assert_success(&result, 1);
    assert_eq!(log.take(), vec!["Y"]);
    Ok(())
}

#[test]
fn inputs_must_not_change_during_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let header = space.write("config.h", "v1")?;
    let log = Log::default();

    let mut graph = space.graph()?;
    let a = space.out("a.o");
    let (a_out, a_header) = (a.clone(), header.clone());
    graph.spawn(Rule::new(
        Publication::new("A").outputs([a.clone()]),
        move || {
            write_stamped(&a_out, "a")?;
            // Rewrites a source another task consumes.
            write_stamped(&a_header, "v2")?;
            Ok(None)
        },
    ))?;
    graph.spawn(concat(&log, "B", &[a, header], &space.out("b.o")))?;

    let result = space.build(&mut graph)?;
    assert!(log.take().is_empty());
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].message, "B");
    assert!(matches!(
        result.failures()[0].error.downcast_ref::<BuildError>(),
        Some(BuildError::Consistency(_))
    ));
    Ok(())
}

#[test]
fn failure_summary_names_location() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = space.graph()?;
    let line = line!() + 1;
    graph.spawn(Rule::new(
        Publication::new("broken").outputs([space.out("x")]),
        || anyhow::bail!("compiler crashed"),
    ))?;
    let result = space.build(&mut graph)?;
    let failure = &result.failures()[0];
    assert_eq!(failure.location.line(), line);
    let text = failure.to_string();
    assert!(text.starts_with("broken (declared at "));
    assert!(text.ends_with("execution failure: compiler crashed"));
    Ok(())
}
