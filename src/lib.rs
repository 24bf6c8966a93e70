//! Taskdep - lazily resolved, memoized task dependency graphs.
//!
//! A [`Task`] is a unit of work that may depend on other tasks, on external
//! futures, on producer callbacks, or on task names looked up in a
//! [`TaskRegistry`]. Running a task resolves its dependencies concurrently,
//! then runs its own work exactly once; every caller shares the same future.

// Core infrastructure modules
pub mod core;

// The resolution engine
pub mod task;

// Re-exports for convenience
pub use crate::core::config::{
    configure, options, reset_options, set_options, LogLevel, Options, OptionsBuilder,
};
pub use crate::core::errors::{Cause, DependencyName, Result, TaskError, TaskFailure};
pub use crate::core::logging::{BufferSink, LogSink, Severity, TracingSink};
pub use task::*;
