//! Log sinks and the per-task logger that applies the severity threshold.

use console::{style, Style};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::config::LogLevel;

/// Destination for task log lines.
///
/// Every call receives the task label (`[name]`) and the message separately;
/// the conventional rendering is `"<label> <message>"`.
pub trait LogSink: Send + Sync {
    fn log(&self, label: &str, message: &str);
    fn warn(&self, label: &str, message: &str);
    fn error(&self, label: &str, message: &str);
}

/// Forwards task logs to `tracing` events under the `taskdep` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, label: &str, message: &str) {
        info!(target: "taskdep", "{} {}", label, message);
    }

    fn warn(&self, label: &str, message: &str) {
        warn!(target: "taskdep", "{} {}", label, message);
    }

    fn error(&self, label: &str, message: &str) {
        error!(target: "taskdep", "{} {}", label, message);
    }
}

/// Severity of a captured line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Log,
    Warn,
    Error,
}

/// Sink that keeps every line in memory
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured lines in emission order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    /// Captured lines with their severity
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    fn push(&self, severity: Severity, label: &str, message: &str) {
        self.lines
            .lock()
            .push((severity, format!("{} {}", label, message)));
    }
}

impl LogSink for BufferSink {
    fn log(&self, label: &str, message: &str) {
        self.push(Severity::Log, label, message);
    }

    fn warn(&self, label: &str, message: &str) {
        self.push(Severity::Warn, label, message);
    }

    fn error(&self, label: &str, message: &str) {
        self.push(Severity::Error, label, message);
    }
}

/// Logger owned by a single task
pub(crate) struct TaskLogger {
    name: String,
    color: bool,
    default_level: LogLevel,
    level: Mutex<LogLevel>,
    sink: RwLock<Arc<dyn LogSink>>,
}

impl TaskLogger {
    pub(crate) fn new(
        name: &str,
        sink: Arc<dyn LogSink>,
        default_level: LogLevel,
        color: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            color,
            default_level,
            level: Mutex::new(LogLevel::Default),
            sink: RwLock::new(sink),
        }
    }

    /// Plain label, without decorations
    pub(crate) fn label(&self) -> String {
        label_of(&self.name)
    }

    fn decorated_label(&self) -> String {
        if self.name.is_empty() {
            return label_of(&self.name);
        }
        format!("[{}]", style(&self.name).cyan().force_styling(self.color))
    }

    pub(crate) fn yellow(&self, text: &str) -> String {
        Style::new()
            .yellow()
            .force_styling(self.color)
            .apply_to(text)
            .to_string()
    }

    pub(crate) fn green(&self, text: &str) -> String {
        Style::new()
            .green()
            .force_styling(self.color)
            .apply_to(text)
            .to_string()
    }

    /// The explicitly set level, `Default` when unset
    pub(crate) fn own_level(&self) -> LogLevel {
        *self.level.lock()
    }

    pub(crate) fn set_level(&self, level: LogLevel) {
        *self.level.lock() = level;
    }

    /// Threshold in effect
    pub(crate) fn level(&self) -> LogLevel {
        match self.own_level() {
            LogLevel::Default => self.default_level,
            level => level,
        }
    }

    pub(crate) fn sink(&self) -> Arc<dyn LogSink> {
        self.sink.read().clone()
    }

    pub(crate) fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write() = sink;
    }

    /// Routine progress, only for named tasks
    pub(crate) fn log(&self, message: &str) {
        if self.level() >= LogLevel::All && !self.name.is_empty() {
            self.sink().log(&self.decorated_label(), message);
        }
    }

    pub(crate) fn warn(&self, message: &str) {
        if self.level() >= LogLevel::Warn {
            self.sink().warn(&self.decorated_label(), message);
        }
    }

    pub(crate) fn error(&self, message: &str) {
        if self.level() >= LogLevel::Error {
            self.sink().error(&self.decorated_label(), message);
        }
    }
}

impl fmt::Debug for TaskLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLogger")
            .field("label", &self.label())
            .field("level", &self.level())
            .field("color", &self.color)
            .finish()
    }
}

pub(crate) fn label_of(name: &str) -> String {
    if name.is_empty() {
        "[anonymous task]".to_string()
    } else {
        format!("[{}]", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(name: &str, sink: &BufferSink, level: LogLevel) -> TaskLogger {
        TaskLogger::new(name, Arc::new(sink.clone()), level, false)
    }

    #[test]
    fn test_threshold() {
        let sink = BufferSink::new();
        let log = logger("build", &sink, LogLevel::Warn);
        log.log("running...");
        log.warn("careful");
        log.error("broken");
        assert_eq!(sink.lines(), vec!["[build] careful", "[build] broken"]);

        sink.clear();
        log.set_level(LogLevel::Silent);
        log.error("broken");
        assert!(sink.lines().is_empty());

        log.set_level(LogLevel::All);
        log.log("running...");
        assert_eq!(sink.entries(), vec![(Severity::Log, "[build] running...".to_string())]);
    }

    #[test]
    fn test_anonymous_tasks_skip_routine_logs() {
        let sink = BufferSink::new();
        let log = logger("", &sink, LogLevel::All);
        log.log("running...");
        log.warn("careful");
        assert_eq!(sink.lines(), vec!["[anonymous task] careful"]);
    }

    #[test]
    fn test_color() {
        let sink = BufferSink::new();
        let log = TaskLogger::new("build", Arc::new(sink.clone()), LogLevel::All, true);
        log.log(&log.green("resolved."));
        let line = &sink.lines()[0];
        assert!(line.contains("\u{1b}["));
        assert!(line.contains("build"));
        assert_eq!(log.label(), "[build]");
    }
}
