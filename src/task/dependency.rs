//! Dependency edges: one resolvable reference from a task to whatever it waits on.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use super::task::{Task, WeakTask};
use super::work::{panic_reason, Resolver, Settlement};
use crate::core::errors::{Cause, Result, TaskError};

type Resolution = std::result::Result<Value, Cause>;

/// Something a task can depend on
pub enum Dependee {
    /// Another task; resolving runs it
    Task(Task),
    /// An in-flight computation this engine does not own
    Future(BoxFuture<'static, Settlement>),
    /// Invoked with a `Resolver` when the edge is first resolved
    Producer(Box<dyn FnOnce(Resolver) + Send>),
    /// A task looked up by name in the depender's registry at resolution time
    Name(String),
}

impl Dependee {
    pub fn task(task: &Task) -> Self {
        Self::Task(task.clone())
    }

    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        Self::Future(fut.boxed())
    }

    /// An external value that has already resolved
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Future(future::ready(Ok(value.into())).boxed())
    }

    /// An external value that has already been rejected
    pub fn rejected(reason: impl Into<Value>) -> Self {
        Self::Future(future::ready(Err(reason.into())).boxed())
    }

    pub fn producer<F>(f: F) -> Self
    where
        F: FnOnce(Resolver) + Send + 'static,
    {
        Self::Producer(Box::new(f))
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn kind(&self) -> DependeeKind {
        match self {
            Self::Task(_) => DependeeKind::Task,
            Self::Future(_) => DependeeKind::Future,
            Self::Producer(_) => DependeeKind::Producer,
            Self::Name(_) => DependeeKind::Name,
        }
    }

    /// Name the edge takes when none is given explicitly
    fn implicit_name(&self) -> String {
        match self {
            Self::Task(task) => task.name().to_string(),
            Self::Name(name) => name.clone(),
            Self::Future(_) | Self::Producer(_) => String::new(),
        }
    }
}

impl From<Task> for Dependee {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl From<&Task> for Dependee {
    fn from(task: &Task) -> Self {
        Self::Task(task.clone())
    }
}

impl From<&str> for Dependee {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Dependee {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Debug for Dependee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => f.debug_tuple("Task").field(&task.label()).finish(),
            Self::Future(_) => f.write_str("Future"),
            Self::Producer(_) => f.write_str("Producer"),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependeeKind {
    Task,
    Future,
    Producer,
    Name,
}

/// One or more dependency declarations, optionally named
pub enum Declare {
    One(Dependee),
    Named(String, Dependee),
    Group(Vec<Declare>),
}

impl Declare {
    /// No dependencies
    pub fn none() -> Self {
        Self::Group(Vec::new())
    }

    pub fn named(name: impl Into<String>, dependee: impl Into<Dependee>) -> Self {
        Self::Named(name.into(), dependee.into())
    }

    /// Flatten nested groups into (explicit name, dependee) pairs
    pub(crate) fn flatten(self, out: &mut Vec<(Option<String>, Dependee)>) {
        match self {
            Self::One(dependee) => out.push((None, dependee)),
            Self::Named(name, dependee) => {
                let name = if name.is_empty() { None } else { Some(name) };
                out.push((name, dependee));
            }
            Self::Group(group) => {
                for declare in group {
                    declare.flatten(out);
                }
            }
        }
    }
}

impl Default for Declare {
    fn default() -> Self {
        Self::none()
    }
}

impl From<()> for Declare {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl From<Dependee> for Declare {
    fn from(dependee: Dependee) -> Self {
        Self::One(dependee)
    }
}

impl From<Task> for Declare {
    fn from(task: Task) -> Self {
        Self::One(task.into())
    }
}

impl From<&Task> for Declare {
    fn from(task: &Task) -> Self {
        Self::One(task.into())
    }
}

impl From<&str> for Declare {
    fn from(name: &str) -> Self {
        Self::One(name.into())
    }
}

impl From<String> for Declare {
    fn from(name: String) -> Self {
        Self::One(name.into())
    }
}

impl<K: Into<String>, D: Into<Dependee>> From<(K, D)> for Declare {
    fn from((name, dependee): (K, D)) -> Self {
        Self::Named(name.into(), dependee.into())
    }
}

impl<T: Into<Declare>> From<Vec<T>> for Declare {
    fn from(group: Vec<T>) -> Self {
        Self::Group(group.into_iter().map(Into::into).collect())
    }
}

impl<D: Into<Dependee>> From<BTreeMap<String, D>> for Declare {
    fn from(map: BTreeMap<String, D>) -> Self {
        Self::Group(
            map.into_iter()
                .map(|(name, dependee)| Self::Named(name, dependee.into()))
                .collect(),
        )
    }
}

/// A dependency edge owned by its depender.
///
/// Resolution is memoized: the first call to [`Dependency::resolve`] starts the
/// dependee, later calls share the same in-flight or settled outcome.
pub struct Dependency {
    depender: WeakTask,
    depender_label: String,
    name: String,
    explicit: bool,
    kind: DependeeKind,
    target: Option<Task>,
    dependee: Mutex<Option<Dependee>>,
    pending: OnceLock<Shared<BoxFuture<'static, Resolution>>>,
    outcome: OnceLock<Resolution>,
}

impl Dependency {
    pub(crate) fn new(depender: &Task, dependee: Dependee, name: Option<String>) -> Self {
        let explicit = name.is_some();
        let name = name.unwrap_or_else(|| dependee.implicit_name());
        let target = match &dependee {
            Dependee::Task(task) => Some(task.clone()),
            _ => None,
        };
        Self {
            depender: depender.downgrade(),
            depender_label: depender.label(),
            name,
            explicit,
            kind: dependee.kind(),
            target,
            dependee: Mutex::new(Some(dependee)),
            pending: OnceLock::new(),
            outcome: OnceLock::new(),
        }
    }

    /// Name used by `Task::dep`; empty when unnamed
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name was given at declaration rather than derived
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn kind(&self) -> DependeeKind {
        self.kind
    }

    /// The referenced task, for task dependees
    pub fn target(&self) -> Option<&Task> {
        self.target.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(_)))
    }

    pub fn has_error(&self) -> bool {
        matches!(self.outcome.get(), Some(Err(_)))
    }

    /// Whether resolution has started
    pub fn is_started(&self) -> bool {
        self.pending.get().is_some()
    }

    /// The resolved value
    pub fn value(&self) -> Result<Value> {
        match self.outcome.get() {
            Some(Ok(value)) => Ok(value.clone()),
            _ => Err(TaskError::Unsettled {
                name: self.display_name(),
            }),
        }
    }

    pub fn error(&self) -> Option<Cause> {
        match self.outcome.get() {
            Some(Err(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Resolve the dependee, once
    pub async fn resolve(&self) -> Resolution {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let pending = self.pending.get_or_init(|| self.start()).clone();
        let outcome = pending.await;
        self.outcome.get_or_init(|| outcome).clone()
    }

    fn display_name(&self) -> String {
        if self.name.is_empty() {
            "anonymous dependency".to_string()
        } else {
            format!("dependency '{}'", self.name)
        }
    }

    fn start(&self) -> Shared<BoxFuture<'static, Resolution>> {
        let Some(dependee) = self.dependee.lock().take() else {
            return settled(Err(Cause::Lookup(TaskError::Unsettled {
                name: self.display_name(),
            })));
        };
        match dependee {
            Dependee::Task(task) => run_task(&task),
            Dependee::Future(fut) => AssertUnwindSafe(fut)
                .catch_unwind()
                .map(|caught| match caught {
                    Ok(settlement) => settlement.map_err(Cause::Rejected),
                    Err(payload) => Err(Cause::Rejected(panic_reason(payload))),
                })
                .boxed()
                .shared(),
            Dependee::Producer(produce) => {
                let (resolver, signal) = Resolver::channel();
                let handle = resolver.clone();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| produce(resolver))) {
                    handle.reject(panic_reason(payload));
                }
                drop(handle);
                async move {
                    match signal.await {
                        Ok(settlement) => settlement.map_err(Cause::Rejected),
                        Err(_) => future::pending().await,
                    }
                }
                .boxed()
                .shared()
            }
            Dependee::Name(name) => match self.lookup(&name) {
                Ok(task) => run_task(&task),
                Err(err) => settled(Err(Cause::Lookup(err))),
            },
        }
    }

    fn lookup(&self, name: &str) -> Result<Task> {
        let registry = self
            .depender
            .upgrade()
            .and_then(|task| task.registry())
            .ok_or_else(|| TaskError::NotRegistered {
                label: self.depender_label.clone(),
            })?;
        registry.get(name).ok_or_else(|| TaskError::NoSuchTask {
            name: name.to_string(),
        })
    }
}

fn run_task(task: &Task) -> Shared<BoxFuture<'static, Resolution>> {
    task.run()
        .map(|outcome| outcome.map_err(|failure| Cause::Task(Box::new(failure))))
        .boxed()
        .shared()
}

fn settled(outcome: Resolution) -> Shared<BoxFuture<'static, Resolution>> {
    future::ready(outcome).boxed().shared()
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("resolved", &self.is_resolved())
            .field("error", &self.has_error())
            .finish()
    }
}
