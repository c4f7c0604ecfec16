use crate::e2e::*;
use cook::{CancelToken, Graph};

/// A task over main.c that discovers headers/a.h and headers/b.h while
/// running.
fn declare(space: &TestSpace, log: &Log, warning: Option<&str>) -> anyhow::Result<Graph> {
    let mut graph = space.graph()?;
    let headers = vec![space.src("headers/a.h"), space.src("headers/b.h")];
    graph.spawn(depositing(
        log,
        "compile",
        &[space.src("main.c")],
        &space.out("main.o"),
        &headers,
        warning,
    ))?;
    Ok(graph)
}

#[test]
fn changed_deposit_reruns_task() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "#include <a.h>")?;
    space.write("headers/a.h", "a")?;
    space.write("headers/b.h", "b")?;
    let log = Log::default();

    assert_success(&space.build(&mut declare(&space, &log, None)?)?, 1);
    assert_nothing_to_do(&space.build(&mut declare(&space, &log, None)?)?);
    assert_eq!(log.take(), vec!["compile"]);

    // Headers are not declared inputs, but the record remembers them.
    space.write("headers/b.h", "b2")?;
    assert_success(&space.build(&mut declare(&space, &log, None)?)?, 1);
    assert_eq!(log.take(), vec!["compile"]);

    // A deleted deposit also counts as a change.  The task no longer
    // reports it once rerun.
    std::fs::remove_file(space.src("headers/a.h"))?;
    let only_b = |log: &Log| -> anyhow::Result<Graph> {
        let mut graph = space.graph()?;
        graph.spawn(depositing(
            log,
            "compile",
            &[space.src("main.c")],
            &space.out("main.o"),
            &[space.src("headers/b.h")],
            None,
        ))?;
        Ok(graph)
    };
    assert_success(&space.build(&mut only_b(&log)?)?, 1);
    assert_eq!(log.take(), vec!["compile"]);
    assert_nothing_to_do(&space.build(&mut only_b(&log)?)?);
    Ok(())
}

#[test]
fn missing_deposit_fails_task() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "")?;
    let log = Log::default();
    let result = space.build(&mut declare(&space, &log, None)?)?;
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].kind(), "protocol violation");
    Ok(())
}

#[test]
fn warnings_resurface_while_up_to_date() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "")?;
    space.write("headers/a.h", "")?;
    space.write("headers/b.h", "")?;
    let log = Log::default();

    let run = |warning: Option<&str>| -> anyhow::Result<Vec<(String, String)>> {
        let progress = CapturingProgress::default();
        cook::start(
            &mut declare(&space, &log, warning)?,
            &space.options(),
            None,
            &progress,
            &CancelToken::new(),
        )?;
        let warnings = progress.warnings.lock().unwrap().clone();
        Ok(warnings)
    };

    let expected = vec![("compile".to_string(), "unused variable 'x'".to_string())];
    assert_eq!(run(Some("\n unused variable 'x'  \n"))?, expected);
    assert_eq!(log.take(), vec!["compile"]);

    // Up to date, but the warning from last time is shown again.
    assert_eq!(run(Some("ignored: the task does not run"))?, expected);
    assert!(log.take().is_empty());
    Ok(())
}

#[test]
fn blank_warning_is_no_warning() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "")?;
    space.write("headers/a.h", "")?;
    space.write("headers/b.h", "")?;
    let log = Log::default();

    let progress = CapturingProgress::default();
    cook::start(
        &mut declare(&space, &log, Some("   \n\t"))?,
        &space.options(),
        None,
        &progress,
        &CancelToken::new(),
    )?;
    assert!(progress.warnings.lock().unwrap().is_empty());
    let record = cook::record::Record::load(space.layout()?.record_path());
    assert_eq!(record.len(), 1);
    Ok(())
}

#[test]
fn warnings_resurface_for_unrequested_tasks() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.c", "")?;
    space.write("headers/a.h", "")?;
    space.write("headers/b.h", "")?;
    space.write("other.c", "")?;
    let log = Log::default();

    let both = || -> anyhow::Result<Graph> {
        let mut graph = declare(&space, &log, Some("beware"))?;
        graph.spawn(concat(&log, "other", &[space.src("other.c")], &space.out("o.o")))?;
        Ok(graph)
    };
    assert_success(&space.build(&mut both()?)?, 2);
    log.take();

    let progress = CapturingProgress::default();
    let requested = vec![space.out("o.o")];
    let result = cook::start(
        &mut both()?,
        &space.options(),
        Some(requested.as_slice()),
        &progress,
        &CancelToken::new(),
    )?;
    assert_nothing_to_do(&result);
    assert!(log.take().is_empty());
    assert_eq!(
        progress.warnings.lock().unwrap().as_slice(),
        [("compile".to_string(), "beware".to_string())]
    );
    Ok(())
}
