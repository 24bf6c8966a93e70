use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::dependency::Declare;
use super::task::Task;
use super::work::Work;
use crate::core::errors::{Result, TaskError};

/// Namespace mapping unique names to tasks.
///
/// Cloning a registry clones the handle. A task registered here holds a
/// non-owning back-reference to it, cleared when the task is removed.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, Task>>,
}

/// Non-owning reference to a registry
#[derive(Clone, Default)]
pub struct WeakRegistry {
    tasks: Weak<DashMap<String, Task>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<TaskRegistry> {
        self.tasks.upgrade().map(|tasks| TaskRegistry { tasks })
    }
}

/// A task, or the name of one
#[derive(Debug, Clone, Copy)]
pub enum TaskKey<'a> {
    Task(&'a Task),
    Name(&'a str),
}

impl<'a> From<&'a Task> for TaskKey<'a> {
    fn from(task: &'a Task) -> Self {
        Self::Task(task)
    }
}

impl<'a> From<&'a str> for TaskKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for TaskKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

lazy_static! {
    static ref GLOBAL_REGISTRY: TaskRegistry = TaskRegistry::new();
}

impl TaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> Self {
        GLOBAL_REGISTRY.clone()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            tasks: Arc::downgrade(&self.tasks),
        }
    }

    /// Whether both handles refer to the same registry
    pub fn ptr_eq(&self, other: &TaskRegistry) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }

    /// Register a task under its name
    pub fn add(&self, task: &Task) -> Result<&Self> {
        if !task.has_name() {
            return Err(TaskError::AnonymousTask);
        }
        let mut slot = task.registry_slot();
        if slot.as_ref().and_then(WeakRegistry::upgrade).is_some() {
            return Err(TaskError::AlreadyRegistered { label: task.label() });
        }
        match self.tasks.entry(task.name().to_string()) {
            Entry::Occupied(_) => {
                return Err(TaskError::NameConflict {
                    name: task.name().to_string(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(task.clone());
            }
        }
        *slot = Some(self.downgrade());
        debug!(task = task.name(), "registered task");
        Ok(self)
    }

    /// Create a task and register it
    pub fn new_task(
        &self,
        name: impl Into<String>,
        work: Work,
        deps: impl Into<Declare>,
    ) -> Result<Task> {
        let task = Task::builder().name(name).work(work).depend(deps).build()?;
        self.add(&task)?;
        Ok(task)
    }

    /// Deregister a task by name, returning it
    pub fn remove(&self, name: &str) -> Result<Task> {
        let task = self.get(name).ok_or_else(|| TaskError::NoSuchTask {
            name: name.to_string(),
        })?;
        let mut slot = task.registry_slot();
        if self
            .tasks
            .remove_if(name, |_, held| held.ptr_eq(&task))
            .is_none()
        {
            return Err(TaskError::NoSuchTask {
                name: name.to_string(),
            });
        }
        *slot = None;
        drop(slot);
        debug!(task = name, "deregistered task");
        Ok(task)
    }

    /// The task registered under `name`
    pub fn get(&self, name: &str) -> Option<Task> {
        self.tasks.get(name).map(|entry| entry.value().clone())
    }

    /// For a task, whether it is the very task registered under its name;
    /// for a name, whether anything is registered under it
    pub fn has<'a>(&self, key: impl Into<TaskKey<'a>>) -> bool {
        match key.into() {
            TaskKey::Task(task) => self
                .tasks
                .get(task.name())
                .is_some_and(|entry| entry.value().ptr_eq(task)),
            TaskKey::Name(name) => self.tasks.contains_key(name),
        }
    }

    /// Deregister every task
    pub fn clear(&self) -> &Self {
        for name in self.names() {
            // Entries removed concurrently are already gone
            let _ = self.remove(&name);
        }
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sets_back_reference() {
        let registry = TaskRegistry::new();
        let task = Task::new("a", Work::noop());
        registry.add(&task).unwrap();
        assert!(task.registry().unwrap().ptr_eq(&registry));
        assert_eq!(registry.len(), 1);
        assert!(registry.has("a"));
        assert!(registry.has(&task));
    }

    #[test]
    fn test_stale_task_is_not_held() {
        let registry = TaskRegistry::new();
        let old = registry.new_task("a", Work::noop(), ()).unwrap();
        registry.remove("a").unwrap();
        let new = registry.new_task("a", Work::noop(), ()).unwrap();
        assert!(registry.has(&new));
        assert!(!registry.has(&old));
        assert!(registry.has("a"));
    }

    #[test]
    fn test_clear() {
        let registry = TaskRegistry::new();
        let a = registry.new_task("a", Work::noop(), ()).unwrap();
        let b = registry.new_task("b", Work::noop(), ()).unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!a.is_registered() && !b.is_registered());
    }

    #[test]
    fn test_global_is_a_singleton() {
        assert!(TaskRegistry::global().ptr_eq(&TaskRegistry::global()));
        assert!(!TaskRegistry::global().ptr_eq(&TaskRegistry::new()));
    }

    #[test]
    fn test_dropped_registry_releases_task() {
        let task = Task::new("a", Work::noop());
        {
            let registry = TaskRegistry::new();
            registry.add(&task).unwrap();
            assert!(task.is_registered());
        }
        assert!(!task.is_registered());
        TaskRegistry::new().add(&task).unwrap();
    }
}
