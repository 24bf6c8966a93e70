//! Test suite for dependency edges seen through their owning task

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskdep::{
    BufferSink, Declare, Dependee, DependeeKind, LogLevel, Options, Task, TaskError,
    TaskRegistry, Work,
};

fn task(name: &str) -> Task {
    let options = Options::builder()
        .default_registry(TaskRegistry::new())
        .default_sink(Arc::new(BufferSink::new()))
        .default_log_level(LogLevel::Silent)
        .color_support(0)
        .build()
        .unwrap();
    Task::builder().name(name).options(options).build().unwrap()
}

#[tokio::test]
async fn test_edge_states_after_run() -> Result<()> {
    let upstream = task("upstream");
    let t = task("t");
    t.depend(vec![
        Declare::from(&upstream),
        Declare::from(Dependee::future(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!("late"))
        })),
        Declare::named("made", Dependee::producer(|r| {
            r.resolve(3);
        })),
    ])?;

    let edges = t.dependencies();
    assert!(edges.iter().all(|edge| !edge.is_started() && !edge.is_resolved()));
    assert_eq!(
        edges.iter().map(|edge| edge.kind()).collect::<Vec<_>>(),
        vec![DependeeKind::Task, DependeeKind::Future, DependeeKind::Producer]
    );
    assert_eq!(
        edges.iter().map(|edge| edge.name().to_string()).collect::<Vec<_>>(),
        vec!["upstream", "", "made"]
    );

    t.run().await?;
    assert!(edges.iter().all(|edge| edge.is_resolved() && !edge.has_error()));
    assert_eq!(t.dep(1)?, json!("late"));
    assert_eq!(t.dep("made")?, json!(3));
    assert_eq!(t.dep("upstream")?, json!(null));

    // Named resolutions only cover named edges
    let mut names: Vec<_> = t.resolutions().into_keys().collect();
    names.sort();
    assert_eq!(names, vec!["made", "upstream"]);
    Ok(())
}

#[tokio::test]
async fn test_edge_resolve_is_memoized() -> Result<()> {
    let t = task("t");
    t.depend(Dependee::rejected("gone"))?;
    let edge = t.dependencies().remove(0);

    let first = edge.resolve().await.unwrap_err();
    let second = edge.resolve().await.unwrap_err();
    assert_eq!(first, second);
    assert!(edge.has_error() && !edge.is_resolved());
    assert_eq!(
        edge.value().unwrap_err(),
        TaskError::Unsettled { name: "anonymous dependency".into() }
    );

    // The task observes the outcome the edge already settled to
    let failure = t.run().await.unwrap_err();
    assert_eq!(failure.cause(), Some(&first));
    Ok(())
}

#[test]
fn test_nested_groups_are_flattened() -> Result<()> {
    let t = task("t");
    t.depend(vec![
        Declare::from(vec![Declare::from("a"), Declare::from("b")]),
        Declare::from(vec![Declare::from(vec![Declare::from("c")])]),
    ])?;
    assert_eq!(t.dependencies().len(), 3);
    assert_eq!(t.dependencies()[2].name(), "c");
    Ok(())
}

#[test]
fn test_explicit_name_collides_with_derived_name() {
    let t = task("t");
    t.depend("shared").unwrap();
    let err = t.depend(Declare::named("shared", Dependee::ready(1))).unwrap_err();
    assert!(matches!(err, TaskError::DuplicateDependency { .. }));
    assert_eq!(t.dependencies().len(), 1);

    // Two implicit edges with the same derived name are allowed
    t.depend("shared").unwrap();
    assert_eq!(t.dependencies().len(), 2);
}

#[tokio::test]
async fn test_work_sees_dependencies_through_the_task() -> Result<()> {
    let t = Task::builder()
        .name("sum")
        .work(Work::future(|task| async move {
            let x = task.dep("x").map_err(|e| json!(e.to_string()))?;
            let y = task.dep("y").map_err(|e| json!(e.to_string()))?;
            Ok(json!(x.as_f64().unwrap_or(0.0) + y.as_f64().unwrap_or(0.0)))
        }))
        .depend(vec![("x", Dependee::ready(1.5)), ("y", Dependee::ready(2.5))])
        .options(
            Options::builder()
                .default_registry(TaskRegistry::new())
                .default_sink(Arc::new(BufferSink::new()))
                .build()?,
        )
        .build()?;
    assert_eq!(t.run().await?, json!(4.0));
    Ok(())
}

#[test]
fn test_name_collisions_do_not_depend_on_order() {
    let first = task("first");
    assert!(first
        .depend(vec![Declare::from("x"), Declare::named("x", Dependee::ready(1))])
        .is_err());
    let second = task("second");
    assert!(second
        .depend(vec![Declare::named("x", Dependee::ready(1)), Declare::from("x")])
        .is_err());
    assert!(first.dependencies().is_empty() && second.dependencies().is_empty());

    let third = task("third");
    third.depend(("x", Dependee::ready(1))).unwrap();
    assert_eq!(
        third.depend("x").unwrap_err(),
        TaskError::DuplicateDependency { label: "[third]".into(), name: "x".into() }
    );
    assert_eq!(third.dependencies().len(), 1);
}
