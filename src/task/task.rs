//! The task node and its resolution engine.
//!
//! A task starts `Idle`. The first call to [`Task::run`] moves it to `Busy` and
//! creates the single shared future every later caller receives. Polling that
//! future resolves all dependency edges concurrently, then runs the task's own
//! work once, and settles the task as `Done` or `Failed`.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::debug;

use super::dependency::{Declare, Dependency};
use super::registry::{TaskRegistry, WeakRegistry};
use super::work::Work;
use crate::core::config::{self, LogLevel, Options};
use crate::core::errors::{DependencyName, Result, TaskError, TaskFailure};
use crate::core::logging::{label_of, LogSink, TaskLogger};

/// The memoized outcome of a task, shared by every caller of `run`
pub type TaskFuture = Shared<BoxFuture<'static, std::result::Result<Value, TaskFailure>>>;

/// Lifecycle of a task. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Idle,
    Busy,
    Done,
    Failed,
}

impl TaskState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key for [`Task::dep`]: declaration index or dependency name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepKey {
    Index(usize),
    Name(String),
}

impl From<usize> for DepKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for DepKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for DepKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{}", index),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Structured view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub state: String,
    pub is_registered: bool,
    pub has_dep: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Value>,
}

struct Progress {
    state: TaskState,
    work: Option<Work>,
    deps: Vec<Arc<Dependency>>,
    resolutions: HashMap<String, Value>,
    result: Option<Value>,
}

struct TaskInner {
    name: String,
    logger: TaskLogger,
    progress: Mutex<Progress>,
    future: Mutex<Option<TaskFuture>>,
    registry: Mutex<Option<WeakRegistry>>,
    default_registry: TaskRegistry,
}

/// A named or anonymous unit of deferred work.
///
/// Cloning a `Task` clones the handle; both handles refer to the same node.
///
/// ```no_run
/// # async fn demo() {
/// use taskdep::{Task, Work};
/// use serde_json::json;
///
/// let a = Task::new("a", Work::sync(|_| Ok(json!(1))));
/// let b = Task::new("b", Work::sync(|_| Ok(json!(2))));
/// let sum = Task::builder()
///     .name("sum")
///     .work(Work::sync(|task| {
///         let a = task.dep("a").map_err(|e| json!(e.to_string()))?;
///         let b = task.dep(1).map_err(|e| json!(e.to_string()))?;
///         Ok(json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
///     }))
///     .depend(vec![a, b])
///     .build()
///     .unwrap();
///
/// assert_eq!(sum.run().await.unwrap(), json!(3));
/// # }
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

/// Non-owning reference to a task
#[derive(Clone, Default)]
pub struct WeakTask {
    inner: Weak<TaskInner>,
}

impl WeakTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Task> {
        self.inner.upgrade().map(|inner| Task { inner })
    }

    pub fn ptr_eq(&self, other: &WeakTask) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// Whether this refers to `task`
    pub fn is(&self, task: &Task) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&task.inner))
    }
}

impl fmt::Debug for WeakTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(task) => write!(f, "WeakTask({})", task.label()),
            None => f.write_str("WeakTask(dropped)"),
        }
    }
}

impl Task {
    /// Create a task with the process-wide options
    pub fn new(name: impl Into<String>, work: Work) -> Self {
        Self::with_options(name.into(), work, &config::options())
    }

    pub fn anonymous(work: Work) -> Self {
        Self::new(String::new(), work)
    }

    pub fn builder() -> TaskBuilder {
        TaskBuilder::new()
    }

    fn with_options(name: String, work: Work, options: &Options) -> Self {
        let logger = TaskLogger::new(
            &name,
            options.default_sink.clone(),
            options.default_log_level,
            options.color(),
        );
        Self {
            inner: Arc::new(TaskInner {
                name,
                logger,
                progress: Mutex::new(Progress {
                    state: TaskState::Idle,
                    work: Some(work),
                    deps: Vec::new(),
                    resolutions: HashMap::new(),
                    result: None,
                }),
                future: Mutex::new(None),
                registry: Mutex::new(None),
                default_registry: options.default_registry.clone(),
            }),
        }
    }

    /// Name of this task, empty when anonymous
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `[name]`, or `[anonymous task]`
    pub fn label(&self) -> String {
        label_of(&self.inner.name)
    }

    pub fn has_name(&self) -> bool {
        !self.inner.name.is_empty()
    }

    pub fn has_deps(&self) -> bool {
        !self.inner.progress.lock().deps.is_empty()
    }

    pub fn state(&self) -> TaskState {
        self.inner.progress.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == TaskState::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.state() == TaskState::Busy
    }

    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    pub fn is_failed(&self) -> bool {
        self.state() == TaskState::Failed
    }

    /// The resolved value. Warns and returns `None` unless the task is done.
    pub fn resolved(&self) -> Option<Value> {
        let result = {
            let progress = self.inner.progress.lock();
            match progress.state {
                TaskState::Done => progress.result.clone(),
                _ => None,
            }
        };
        if result.is_none() {
            self.warn("not resolved yet");
        }
        result
    }

    /// The failure, once the task has failed
    pub fn failure(&self) -> Option<TaskFailure> {
        let future = self.inner.future.lock().clone()?;
        match future.peek() {
            Some(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
        self.inner.progress.lock().deps.clone()
    }

    /// Values of the named dependencies, filled in once all of them resolved
    pub fn resolutions(&self) -> HashMap<String, Value> {
        self.inner.progress.lock().resolutions.clone()
    }

    pub fn registry(&self) -> Option<TaskRegistry> {
        self.inner.registry.lock().as_ref().and_then(WeakRegistry::upgrade)
    }

    pub fn is_registered(&self) -> bool {
        self.registry().is_some()
    }

    /// Threshold in effect
    pub fn log_level(&self) -> LogLevel {
        self.inner.logger.level()
    }

    /// Set the log threshold; `LogLevel::Default` follows the configured default
    pub fn set_log_level(&self, level: LogLevel) -> &Self {
        self.inner.logger.set_level(level);
        self
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        self.inner.logger.sink()
    }

    pub fn set_sink(&self, sink: Arc<dyn LogSink>) -> &Self {
        self.inner.logger.set_sink(sink);
        self
    }

    pub fn log(&self, message: impl AsRef<str>) -> &Self {
        self.inner.logger.log(message.as_ref());
        self
    }

    pub fn warn(&self, message: impl AsRef<str>) -> &Self {
        self.inner.logger.warn(message.as_ref());
        self
    }

    pub fn error(&self, message: impl AsRef<str>) -> &Self {
        self.inner.logger.error(message.as_ref());
        self
    }

    /// Add one or more dependencies. The task must be idle. A name may be shared
    /// only by implicitly named edges; an explicit name must be unique on the task.
    pub fn depend(&self, deps: impl Into<Declare>) -> Result<&Self> {
        let mut declared = Vec::new();
        deps.into().flatten(&mut declared);
        let edges: Vec<Arc<Dependency>> = declared
            .into_iter()
            .map(|(name, dependee)| Arc::new(Dependency::new(self, dependee, name)))
            .collect();

        let mut progress = self.inner.progress.lock();
        if progress.state != TaskState::Idle {
            return Err(TaskError::NotIdle { label: self.label() });
        }
        {
            // Name -> whether any edge holding it was named explicitly
            let mut taken: HashMap<&str, bool> = HashMap::new();
            for dep in progress.deps.iter().filter(|dep| !dep.name().is_empty()) {
                *taken.entry(dep.name()).or_default() |= dep.is_explicit();
            }
            for edge in edges.iter().filter(|edge| !edge.name().is_empty()) {
                match taken.get(edge.name()).copied() {
                    Some(explicit) if explicit || edge.is_explicit() => {
                        return Err(TaskError::DuplicateDependency {
                            label: self.label(),
                            name: edge.name().to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        taken.insert(edge.name(), edge.is_explicit());
                    }
                }
            }
        }
        progress.deps.extend(edges);
        Ok(self)
    }

    /// Value of a dependency by declaration index or name
    pub fn dep(&self, key: impl Into<DepKey>) -> Result<Value> {
        let key = key.into();
        let progress = self.inner.progress.lock();
        let found = match &key {
            DepKey::Index(index) => progress.deps.get(*index).map(|dep| dep.value()),
            DepKey::Name(name) => match progress.resolutions.get(name) {
                Some(value) => Some(Ok(value.clone())),
                None => progress
                    .deps
                    .iter()
                    .find(|dep| dep.name() == name)
                    .map(|dep| dep.value()),
            },
        };
        found.unwrap_or_else(|| {
            Err(TaskError::NoSuchDependency {
                key: key.to_string(),
            })
        })
    }

    /// Add this task to `registry`, or to the configured default registry
    pub fn register(&self, registry: Option<&TaskRegistry>) -> Result<&Self> {
        registry.unwrap_or(&self.inner.default_registry).add(self)?;
        Ok(self)
    }

    pub fn deregister(&self) -> Result<&Self> {
        let registry = self
            .registry()
            .ok_or_else(|| TaskError::NotRegistered { label: self.label() })?;
        registry.remove(self.name())?;
        Ok(self)
    }

    pub(crate) fn registry_slot(&self) -> MutexGuard<'_, Option<WeakRegistry>> {
        self.inner.registry.lock()
    }

    /// Start the task, or return the future of the run already started.
    ///
    /// The state moves to `Busy` immediately; the work itself runs as the
    /// returned future is polled.
    pub fn run(&self) -> TaskFuture {
        let mut slot = self.inner.future.lock();
        if let Some(future) = slot.as_ref() {
            return future.clone();
        }
        let (work, deps) = {
            let mut progress = self.inner.progress.lock();
            progress.state = TaskState::Busy;
            (progress.work.take().unwrap_or_default(), progress.deps.clone())
        };
        let future = self.clone().execute(work, deps).boxed().shared();
        *slot = Some(future.clone());
        future
    }

    async fn execute(
        self,
        work: Work,
        deps: Vec<Arc<Dependency>>,
    ) -> std::result::Result<Value, TaskFailure> {
        let outcome = self.settle(work, &deps).await;
        {
            let mut progress = self.inner.progress.lock();
            match &outcome {
                Ok(value) => {
                    progress.state = TaskState::Done;
                    progress.result = Some(value.clone());
                }
                Err(_) => progress.state = TaskState::Failed,
            }
        }
        match &outcome {
            Ok(_) => self.log(self.inner.logger.green("resolved.")),
            Err(failure) => self.error(format!("failed: {}", failure)),
        };
        outcome
    }

    async fn settle(
        &self,
        work: Work,
        deps: &[Arc<Dependency>],
    ) -> std::result::Result<Value, TaskFailure> {
        if !deps.is_empty() {
            self.log(format!("{} dependencies...", self.inner.logger.yellow("Resolving")));
            let mut pending: FuturesUnordered<_> = deps
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, dep)| async move { (index, dep.resolve().await) })
                .collect();
            // The first edge to fail in completion order is the one reported
            loop {
                let next = pending.next().await;
                let Some((index, outcome)) = next else {
                    break;
                };
                if let Err(cause) = outcome {
                    drain(pending);
                    return Err(TaskFailure::Dependency {
                        task: self.downgrade(),
                        label: self.label(),
                        dependency: DependencyName(deps[index].name().to_string()),
                        index,
                        cause,
                    });
                }
            }

            {
                let mut progress = self.inner.progress.lock();
                for dep in deps.iter().filter(|dep| !dep.name().is_empty()) {
                    if let Ok(value) = dep.value() {
                        progress.resolutions.insert(dep.name().to_string(), value);
                    }
                }
            }
            self.log(format!(
                "All the dependencies have been {}",
                self.inner.logger.green("resolved")
            ));
        }

        self.log(format!("{}...", self.inner.logger.yellow("running")));
        work.invoke(self)
            .await
            .map_err(|reason| TaskFailure::Job {
                task: self.downgrade(),
                label: self.label(),
                reason,
            })
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let (state, has_dep, resolved) = {
            let progress = self.inner.progress.lock();
            (
                progress.state,
                !progress.deps.is_empty(),
                progress.result.clone(),
            )
        };
        TaskSnapshot {
            name: self.inner.name.clone(),
            state: state.name().to_string(),
            is_registered: self.is_registered(),
            has_dep,
            resolved,
        }
    }

    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same task
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Keep driving the remaining edges after the task has given up on them, so
/// dependee tasks already started still settle.
fn drain<F>(pending: FuturesUnordered<F>)
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    if pending.is_empty() {
        return;
    }
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(pending.for_each(|_| future::ready(())));
        }
        Err(_) => debug!("no runtime to drain the remaining dependencies on"),
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("registered", &self.is_registered())
            .field("logger", &self.inner.logger)
            .finish()
    }
}

/// Builder for Task
pub struct TaskBuilder {
    name: String,
    work: Work,
    deps: Vec<Declare>,
    options: Option<Options>,
    log_level: LogLevel,
    sink: Option<Arc<dyn LogSink>>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            work: Work::noop(),
            deps: Vec::new(),
            options: None,
            log_level: LogLevel::Default,
            sink: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn work(mut self, work: Work) -> Self {
        self.work = work;
        self
    }

    pub fn depend(mut self, deps: impl Into<Declare>) -> Self {
        self.deps.push(deps.into());
        self
    }

    /// Use these options instead of the process-wide ones
    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Task> {
        let options = self.options.unwrap_or_else(config::options);
        let task = Task::with_options(self.name, self.work, &options);
        task.set_log_level(self.log_level);
        if let Some(sink) = self.sink {
            task.set_sink(sink);
        }
        task.depend(self.deps)?;
        Ok(task)
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
