//! Per-session log buffering
//!
//! Each session owns one buffer per log type. Entries accumulate in order and
//! are drained by `GetLog`: retrieval returns everything gathered since the
//! previous retrieval (or since session start) and clears the buffer.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Serialize;

use crate::{Error, Result};

/// Log types exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    /// Console and resource-load messages from the browser
    Browser,
    /// Browser-instrumentation events (tracing, page, network domains)
    Performance,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Browser => "browser",
            LogType::Performance => "performance",
        }
    }
}

impl FromStr for LogType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "browser" => Ok(LogType::Browser),
            "performance" => Ok(LogType::Performance),
            other => Err(Error::unknown(format!("log type '{}' not found", other))),
        }
    }
}

/// Log severity, ordered so entries below a configured minimum are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    All,
    Debug,
    Info,
    Warning,
    Severe,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::All => "ALL",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Severe => "SEVERE",
            LogLevel::Off => "OFF",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(LogLevel::All),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "SEVERE" => Ok(LogLevel::Severe),
            "OFF" => Ok(LogLevel::Off),
            other => Err(Error::unknown(format!("invalid log level: {}", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered log entry
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Severity name (`INFO`, `SEVERE`, ...)
    pub level: String,
    /// Origin tag (`javascript`, `network`, ...)
    pub source: String,
    /// Message payload; JSON text for performance entries
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: &str, message: String) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            level: level.as_str().to_string(),
            source: source.to_string(),
            message,
        }
    }
}

struct TypedBuffer {
    entries: VecDeque<LogEntry>,
    min_level: LogLevel,
}

/// Session-scoped log buffers, one per [`LogType`]
pub struct LogBuffers {
    browser: Mutex<TypedBuffer>,
    performance: Mutex<TypedBuffer>,
    capacity: usize,
}

impl std::fmt::Debug for LogBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBuffers").field("capacity", &self.capacity).finish()
    }
}

impl LogBuffers {
    /// `performance_level` is `Off` unless performance logging was requested
    /// at session creation.
    pub fn new(capacity: usize, browser_level: LogLevel, performance_level: LogLevel) -> Self {
        Self {
            browser: Mutex::new(TypedBuffer {
                entries: VecDeque::new(),
                min_level: browser_level,
            }),
            performance: Mutex::new(TypedBuffer {
                entries: VecDeque::new(),
                min_level: performance_level,
            }),
            capacity,
        }
    }

    fn buffer(&self, log_type: LogType) -> &Mutex<TypedBuffer> {
        match log_type {
            LogType::Browser => &self.browser,
            LogType::Performance => &self.performance,
        }
    }

    /// Whether entries of this type are collected at all
    pub fn enabled(&self, log_type: LogType) -> bool {
        self.buffer(log_type)
            .lock()
            .map(|b| b.min_level < LogLevel::Off)
            .unwrap_or(false)
    }

    /// Append an entry, dropping the oldest one past capacity
    pub fn append(&self, log_type: LogType, entry: LogEntry) {
        let mut buffer = match self.buffer(log_type).lock() {
            Ok(b) => b,
            Err(_) => return,
        };
        let entry_level: LogLevel = entry.level.parse().unwrap_or(LogLevel::Info);
        if entry_level < buffer.min_level {
            return;
        }
        if buffer.entries.len() == self.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(entry);
    }

    /// Append a browser-instrumentation event to the performance log.
    ///
    /// The message wraps `{"message": {"method": "<Domain>.<event>",
    /// "params": ...}}`; clients group entries by the domain prefix before
    /// the first `.` in the method name.
    pub fn append_performance_event(&self, method: &str, params: serde_json::Value) {
        if !self.enabled(LogType::Performance) {
            return;
        }
        let message = serde_json::json!({
            "message": { "method": method, "params": params }
        });
        self.append(
            LogType::Performance,
            LogEntry::new(LogLevel::Info, "performance", message.to_string()),
        );
    }

    /// Return and clear all buffered entries of the given type
    pub fn drain(&self, log_type: LogType) -> Vec<LogEntry> {
        match self.buffer(log_type).lock() {
            Ok(mut buffer) => buffer.entries.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}
