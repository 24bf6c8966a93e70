// Infrastructure shared by the task engine

pub mod config;
pub mod errors;
pub mod logging;

// Re-export commonly used types
pub use config::{configure, options, reset_options, set_options, LogLevel, Options, OptionsBuilder};
pub use errors::{Cause, DependencyName, Result, TaskError, TaskFailure};
pub use logging::{BufferSink, LogSink, Severity, TracingSink};
