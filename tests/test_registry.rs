//! Test suite for the task registry and name-based dependencies

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use taskdep::{
    BufferSink, Cause, LogLevel, Options, Task, TaskError, TaskFailure, TaskRegistry, Work,
};

fn options(registry: &TaskRegistry) -> Options {
    Options::builder()
        .default_registry(registry.clone())
        .default_sink(Arc::new(BufferSink::new()))
        .default_log_level(LogLevel::Silent)
        .color_support(0)
        .build()
        .unwrap()
}

fn task(name: &str, work: Work, registry: &TaskRegistry) -> Task {
    Task::builder()
        .name(name)
        .work(work)
        .options(options(registry))
        .build()
        .unwrap()
}

#[test]
fn test_round_trip() -> Result<()> {
    let registry = TaskRegistry::new();
    let t = task("build", Work::noop(), &registry);

    registry.add(&t)?;
    assert!(registry.has(&t));
    assert!(registry.get("build").unwrap().ptr_eq(&t));
    assert!(t.is_registered());

    let removed = registry.remove("build")?;
    assert!(removed.ptr_eq(&t));
    assert!(!registry.has(&t));
    assert!(registry.get("build").is_none());
    assert!(!t.is_registered());
    Ok(())
}

#[test]
fn test_name_conflict() {
    let registry = TaskRegistry::new();
    let first = task("same", Work::noop(), &registry);
    let second = task("same", Work::noop(), &registry);

    registry.add(&first).unwrap();
    let err = registry.add(&second).unwrap_err();
    assert_eq!(err, TaskError::NameConflict { name: "same".into() });
    assert!(registry.has(&first));
    assert!(!registry.has(&second));
    assert!(!second.is_registered());
}

#[test]
fn test_add_validation() {
    let registry = TaskRegistry::new();
    let anonymous = Task::builder().options(options(&registry)).build().unwrap();
    assert_eq!(registry.add(&anonymous).unwrap_err(), TaskError::AnonymousTask);

    let t = task("once", Work::noop(), &registry);
    registry.add(&t).unwrap();
    let other = TaskRegistry::new();
    assert_eq!(
        other.add(&t).unwrap_err(),
        TaskError::AlreadyRegistered { label: "[once]".into() }
    );
    assert!(other.is_empty());
}

#[test]
fn test_remove_missing() {
    let registry = TaskRegistry::new();
    assert_eq!(
        registry.remove("ghost").unwrap_err(),
        TaskError::NoSuchTask { name: "ghost".into() }
    );

    let t = task("loose", Work::noop(), &registry);
    assert_eq!(
        t.deregister().unwrap_err(),
        TaskError::NotRegistered { label: "[loose]".into() }
    );
}

#[test]
fn test_register_uses_default_registry() -> Result<()> {
    let registry = TaskRegistry::new();
    let t = task("defaulted", Work::noop(), &registry);
    t.register(None)?;
    assert!(registry.has(&t));
    assert!(t.registry().unwrap().ptr_eq(&registry));

    t.deregister()?;
    assert!(!registry.has("defaulted"));
    assert!(!t.is_registered());

    let explicit = TaskRegistry::new();
    t.register(Some(&explicit))?;
    assert!(explicit.has(&t) && !registry.has(&t));
    Ok(())
}

#[test]
fn test_new_task_and_clear() -> Result<()> {
    let registry = TaskRegistry::new();
    let a = registry.new_task("a", Work::noop(), ())?;
    let b = registry.new_task("b", Work::noop(), "a")?;
    assert!(b.has_deps());
    assert_eq!(registry.len(), 2);

    assert!(registry.new_task("a", Work::noop(), ()).is_err());
    assert_eq!(registry.len(), 2);

    registry.clear();
    assert!(registry.is_empty());
    assert!(!a.is_registered() && !b.is_registered());
    Ok(())
}

#[tokio::test]
async fn test_name_dependencies_resolve_through_registry() -> Result<()> {
    let registry = TaskRegistry::new();
    registry.new_task("fetch", Work::sync(|_| Ok(json!("payload"))), ())?;
    let consume = registry.new_task(
        "consume",
        Work::sync(|task| {
            let payload = task.dep("fetch").map_err(|e| json!(e.to_string()))?;
            Ok(json!({ "got": payload }))
        }),
        "fetch",
    )?;

    assert_eq!(consume.run().await?, json!({"got": "payload"}));
    assert!(registry.get("fetch").unwrap().is_done());
    Ok(())
}

#[tokio::test]
async fn test_name_dependency_lookup_failures() {
    let registry = TaskRegistry::new();
    let loose = task("loose", Work::noop(), &registry);
    loose.depend("anything").unwrap();
    let failure = loose.run().await.unwrap_err();
    assert_eq!(
        failure.cause(),
        Some(&Cause::Lookup(TaskError::NotRegistered { label: "[loose]".into() }))
    );

    let registered = registry.new_task("registered", Work::noop(), "missing").unwrap();
    let failure = registered.run().await.unwrap_err();
    match failure {
        TaskFailure::Dependency { cause, index, .. } => {
            assert_eq!(index, 0);
            assert_eq!(cause, Cause::Lookup(TaskError::NoSuchTask { name: "missing".into() }));
        }
        other => panic!("unexpected failure {:?}", other),
    }
}

#[tokio::test]
async fn test_shared_dependency_runs_once() -> Result<()> {
    let registry = TaskRegistry::new();
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = count.clone();
    registry.new_task(
        "shared",
        Work::sync(move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!("once"))
        }),
        (),
    )?;
    let left = registry.new_task("left", Work::noop(), "shared")?;
    let right = registry.new_task("right", Work::noop(), "shared")?;
    let top = registry.new_task("top", Work::noop(), vec![&left, &right])?;

    top.run().await?;
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(left.dep("shared")?, json!("once"));
    assert_eq!(right.dep(0)?, json!("once"));
    Ok(())
}
