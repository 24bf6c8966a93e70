use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::errors::{Result, TaskError};
use super::logging::{LogSink, TracingSink};
use crate::task::TaskRegistry;

/// Log threshold, in ascending verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Follow the configured default
    Default,
    /// Do not output any logs
    Silent,
    /// Log only errors
    Error,
    /// Log warnings and errors
    #[serde(alias = "WARNING")]
    Warn,
    /// Output every single log
    #[serde(alias = "VERBOSE")]
    All,
}

impl LogLevel {
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Default => -1,
            Self::Silent => 0,
            Self::Error => 1,
            Self::Warn => 2,
            Self::All => 3,
        }
    }
}

impl FromStr for LogLevel {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(Self::Default),
            "SILENT" => Ok(Self::Silent),
            "ERROR" => Ok(Self::Error),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ALL" | "VERBOSE" => Ok(Self::All),
            _ => Err(TaskError::InvalidLogLevel { value: s.to_string() }),
        }
    }
}

impl TryFrom<i8> for LogLevel {
    type Error = TaskError;

    fn try_from(value: i8) -> Result<Self> {
        match value {
            -1 => Ok(Self::Default),
            0 => Ok(Self::Silent),
            1 => Ok(Self::Error),
            2 => Ok(Self::Warn),
            3 => Ok(Self::All),
            _ => Err(TaskError::InvalidLogLevel { value: value.to_string() }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "DEFAULT",
            Self::Silent => "SILENT",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::All => "ALL",
        };
        f.write_str(name)
    }
}

/// Process-wide defaults injected into every new task
#[derive(Clone)]
pub struct Options {
    /// Registry used by `Task::register` without an explicit registry
    pub default_registry: TaskRegistry,
    /// Sink used to output logs
    pub default_sink: Arc<dyn LogSink>,
    /// Threshold for tasks whose level is `Default`
    pub default_log_level: LogLevel,
    /// 1 for decorated output, 0 for plain text
    pub color_support: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_registry: TaskRegistry::global(),
            default_sink: Arc::new(TracingSink),
            default_log_level: LogLevel::Warn,
            color_support: if cfg!(target_arch = "wasm32") { 0 } else { 1 },
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("default_registry", &self.default_registry)
            .field("default_log_level", &self.default_log_level)
            .field("color_support", &self.color_support)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Create a new builder for Options
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Defaults, overridden by `TASKDEP_LOG_LEVEL` and `NO_COLOR`
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(level) = std::env::var("TASKDEP_LOG_LEVEL") {
            options.default_log_level = level.parse()?;
        }
        if std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            options.color_support = 0;
        }
        options.validate()?;
        Ok(options)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_log_level == LogLevel::Default {
            return Err(TaskError::invalid_option(
                "defaultLogLevel",
                "the default level can't defer to itself",
            ));
        }
        if self.color_support > 1 {
            return Err(TaskError::invalid_option(
                "colorSupport",
                format!("expected 0 or 1, got {}", self.color_support),
            ));
        }
        Ok(())
    }

    pub fn color(&self) -> bool {
        self.color_support == 1
    }
}

/// Builder for Options
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            options: Options::default(),
        }
    }

    pub fn default_registry(mut self, registry: TaskRegistry) -> Self {
        self.options.default_registry = registry;
        self
    }

    pub fn default_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.options.default_sink = sink;
        self
    }

    pub fn default_log_level(mut self, level: LogLevel) -> Self {
        self.options.default_log_level = level;
        self
    }

    pub fn color_support(mut self, color: u8) -> Self {
        self.options.color_support = color;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref OPTIONS: RwLock<Options> = RwLock::new(Options::default());
}

/// Snapshot of the process-wide options
pub fn options() -> Options {
    OPTIONS.read().clone()
}

/// Replace the process-wide options
pub fn set_options(options: Options) -> Result<()> {
    options.validate()?;
    *OPTIONS.write() = options;
    Ok(())
}

/// Edit the process-wide options in place; nothing changes if the result is invalid
pub fn configure<F>(edit: F) -> Result<()>
where
    F: FnOnce(&mut Options),
{
    let mut guard = OPTIONS.write();
    let mut next = guard.clone();
    edit(&mut next);
    next.validate()?;
    *guard = next;
    Ok(())
}

/// Restore the initial process-wide options
pub fn reset_options() {
    *OPTIONS.write() = Options::default();
}
