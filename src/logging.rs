//! Structured log records and the sink they flow through.
//!
//! Every component hands transient [`LogRecord`] values to an injected
//! [`LogSink`]; nothing holds a logger singleton. The production sink
//! renders records as `tracing` events, so filtering and output formats
//! are decided by the subscriber installed in `main`.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Severity levels, ordered `crit < error < warn < req < info`.
///
/// `req` sits between `warn` and `info` so that request records can be
/// filtered in without enabling general informational chatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Crit,
    Error,
    Warn,
    Req,
    Info,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Crit => "crit",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Req => "req",
            Level::Info => "info",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A plain gateway message.
    Plain { level: Level, text: String },
    /// A chunk of output from a supervised child process.
    Subprocess {
        level: Level,
        app: String,
        data: String,
    },
    /// A routed request, emitted once before the handler runs.
    Request {
        level: Level,
        descr: String,
        url: String,
    },
}

impl LogRecord {
    pub fn plain(level: Level, text: impl Into<String>) -> Self {
        LogRecord::Plain {
            level,
            text: text.into(),
        }
    }

    pub fn subprocess(level: Level, app: &str, data: impl Into<String>) -> Self {
        LogRecord::Subprocess {
            level,
            app: app.to_string(),
            data: data.into(),
        }
    }

    pub fn request(descr: impl Into<String>, url: impl Into<String>) -> Self {
        LogRecord::Request {
            level: Level::Req,
            descr: descr.into(),
            url: url.into(),
        }
    }

    pub fn level(&self) -> Level {
        match self {
            LogRecord::Plain { level, .. }
            | LogRecord::Subprocess { level, .. }
            | LogRecord::Request { level, .. } => *level,
        }
    }
}

/// Where log records go. Implementations serialize writes internally;
/// callers never lock.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

pub type SharedSink = Arc<dyn LogSink>;

/// The production sink: renders records as `tracing` events.
///
/// `crit` and `req` have no direct `tracing` counterpart, so they map to
/// `error` and `info` respectively and carry their original name as a
/// `level` field.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        match record {
            LogRecord::Plain { level, text } => match level {
                Level::Crit => error!(level = "crit", "{text}"),
                Level::Error => error!("{text}"),
                Level::Warn => warn!("{text}"),
                Level::Req | Level::Info => info!("{text}"),
            },
            LogRecord::Subprocess { level, app, data } => match level {
                Level::Crit | Level::Error => error!(app = %app, "{data}"),
                Level::Warn => warn!(app = %app, "{data}"),
                Level::Req | Level::Info => info!(app = %app, "{data}"),
            },
            LogRecord::Request { descr, url, .. } => {
                info!(level = "req", url = %url, "{descr}");
            }
        }
    }
}

/// Collects records in memory. Used by the test suite to assert on the
/// exact record stream a component produced.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("sink mutex poisoned").clone()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        self.records.lock().expect("sink mutex poisoned").push(record);
    }
}
