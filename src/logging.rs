//! Scalar logging sinks for modifiers.
//!
//! Modifiers report per-parameter scalars (e.g. sparsity) through the
//! [`ScalarLogger`] trait. Loggers are shared between modifiers as
//! [`SharedLogger`] handles; which loggers a modifier writes to is chosen
//! by its `log_types` field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Token selecting every attached logger.
pub const ALL_LOGGERS_TOKEN: &str = "__ALL__";

/// Sink for `(tag, value, step)` scalars.
pub trait ScalarLogger: Send + Sync + fmt::Debug {
    /// Logger name, matched against a modifier's `log_types`.
    fn name(&self) -> &str;

    /// Record one scalar.
    fn log_scalar(&self, tag: &str, value: f32, step: u64);
}

/// Logger handle shared across modifiers.
pub type SharedLogger = Arc<dyn ScalarLogger>;

/// Forwards scalars to `tracing` at info level.
#[derive(Debug, Default, Clone)]
pub struct TracingLogger;

impl ScalarLogger for TracingLogger {
    fn name(&self) -> &str {
        "tracing"
    }

    fn log_scalar(&self, tag: &str, value: f32, step: u64) {
        tracing::info!(target: "podar::scalars", tag, value, step, "scalar");
    }
}

/// One recorded scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedScalar {
    pub tag: String,
    pub value: f32,
    pub step: u64,
}

/// Keeps every scalar in memory.
#[derive(Debug)]
pub struct MemoryLogger {
    name: String,
    records: Mutex<Vec<LoggedScalar>>,
}

impl MemoryLogger {
    /// Create a memory logger with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), records: Mutex::new(Vec::new()) }
    }

    /// Snapshot of everything logged so far.
    pub fn records(&self) -> Vec<LoggedScalar> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records whose tag starts with `prefix`.
    pub fn records_with_prefix(&self, prefix: &str) -> Vec<LoggedScalar> {
        self.records().into_iter().filter(|r| r.tag.starts_with(prefix)).collect()
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl ScalarLogger for MemoryLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn log_scalar(&self, tag: &str, value: f32, step: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LoggedScalar { tag: tag.to_string(), value, step });
        }
    }
}

/// `log_types` recipe field: `__ALL__` or a list of logger names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogTypes {
    Token(String),
    Names(Vec<String>),
}

impl Default for LogTypes {
    fn default() -> Self {
        LogTypes::Token(ALL_LOGGERS_TOKEN.to_string())
    }
}

impl LogTypes {
    /// Whether a logger with this name should receive scalars.
    pub fn selects(&self, logger_name: &str) -> bool {
        match self {
            LogTypes::Token(token) => token == ALL_LOGGERS_TOKEN || token == logger_name,
            LogTypes::Names(names) => names
                .iter()
                .any(|n| n == ALL_LOGGERS_TOKEN || n == logger_name),
        }
    }

    /// Keep only the loggers this selection allows.
    pub fn filter(&self, loggers: &[SharedLogger]) -> Vec<SharedLogger> {
        loggers.iter().filter(|l| self.selects(l.name())).cloned().collect()
    }
}

/// Convert a fractional epoch into the step number used for logging.
pub fn log_step(epoch: f64, steps_per_epoch: usize) -> u64 {
    let step = if steps_per_epoch == 0 {
        epoch.round()
    } else {
        (epoch * steps_per_epoch as f64).round()
    };
    step.max(0.0) as u64
}
