use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::task::WeakTask;

/// Validation errors, raised synchronously by the call that breaks a precondition
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// Anonymous tasks have no name to be registered under
    #[error("anonymous task can't be added to a registry")]
    AnonymousTask,

    #[error("the task {label} has already been registered")]
    AlreadyRegistered { label: String },

    #[error("the task name '{name}' conflicts")]
    NameConflict { name: String },

    /// Dependencies can only change before the first run
    #[error("the task {label} is not idle")]
    NotIdle { label: String },

    #[error("the task {label} is not registered")]
    NotRegistered { label: String },

    #[error("no such task as '{name}'")]
    NoSuchTask { name: String },

    #[error("no such dependency as {key}")]
    NoSuchDependency { key: String },

    #[error("the task {label} already has a dependency named '{name}'")]
    DuplicateDependency { label: String, name: String },

    /// Reading the value of an edge that has not resolved
    #[error("{name} is not resolved")]
    Unsettled { name: String },

    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },

    #[error("invalid option '{option}': {message}")]
    InvalidOption { option: String, message: String },
}

impl TaskError {
    /// Create an option error
    pub fn invalid_option<O: Into<String>, M: Into<String>>(option: O, message: M) -> Self {
        Self::InvalidOption {
            option: option.into(),
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::AnonymousTask
            | Self::AlreadyRegistered { .. }
            | Self::NameConflict { .. }
            | Self::NotRegistered { .. }
            | Self::NoSuchTask { .. } => "registry",
            Self::NotIdle { .. } | Self::DuplicateDependency { .. } => "declaration",
            Self::NoSuchDependency { .. } | Self::Unsettled { .. } => "lookup",
            Self::InvalidLogLevel { .. } | Self::InvalidOption { .. } => "configuration",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TaskError>;

/// Why a dependency edge failed to resolve
#[derive(Debug, Clone, Error)]
pub enum Cause {
    /// An external future or a producer rejected with this reason
    #[error("rejected with {0}")]
    Rejected(Value),

    /// The dependee task failed
    #[error(transparent)]
    Task(Box<TaskFailure>),

    /// Name resolution failed
    #[error(transparent)]
    Lookup(TaskError),
}

impl Cause {
    /// The rejection reason, if the edge was rejected by an external value or a producer
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

impl PartialEq for Cause {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Rejected(a), Self::Rejected(b)) => a == b,
            (Self::Task(a), Self::Task(b)) => a == b,
            (Self::Lookup(a), Self::Lookup(b)) => a == b,
            _ => false,
        }
    }
}

/// The failed outcome of a task
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    /// The task's own work rejected, returned an error or panicked
    #[error("an error occurred during the execution of {label}: {reason}")]
    Job {
        task: WeakTask,
        label: String,
        reason: Value,
    },

    /// A dependency failed before the task's own work ran
    #[error("{label} can't be executed because its dependency #{index} {dependency} failed to resolve: {cause}")]
    Dependency {
        task: WeakTask,
        label: String,
        dependency: DependencyName,
        index: usize,
        #[source]
        cause: Cause,
    },
}

impl TaskFailure {
    /// Label of the task that failed
    pub fn label(&self) -> &str {
        match self {
            Self::Job { label, .. } | Self::Dependency { label, .. } => label,
        }
    }

    pub fn task(&self) -> &WeakTask {
        match self {
            Self::Job { task, .. } | Self::Dependency { task, .. } => task,
        }
    }

    /// The value a job rejected with
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Self::Job { reason, .. } => Some(reason),
            Self::Dependency { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Dependency { cause, .. } => Some(cause),
            Self::Job { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Job { .. } => "job",
            Self::Dependency { .. } => "dependency",
        }
    }
}

impl PartialEq for TaskFailure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Job { task: a, reason: ra, .. },
                Self::Job { task: b, reason: rb, .. },
            ) => a.ptr_eq(b) && ra == rb,
            (
                Self::Dependency { task: a, index: ia, cause: ca, .. },
                Self::Dependency { task: b, index: ib, cause: cb, .. },
            ) => a.ptr_eq(b) && ia == ib && ca == cb,
            _ => false,
        }
    }
}

/// Name of a dependency edge as reported in failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyName(pub String);

impl DependencyName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(anonymous dependency)")
        } else {
            write!(f, "'{}'", self.0)
        }
    }
}
