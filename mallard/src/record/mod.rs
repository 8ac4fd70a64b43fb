//! # Log Record Module
//!
//! Core data structures for the record pipeline: severity levels, the
//! `LogRecord` value that travels from a call-site to the log targets, and
//! the borrowed `RecordView` handed to filters and formatters.
//!
//! ## Design Notes
//!
//! - A record is a plain value. Once dispatch completes the engine holds no
//!   reference to it; targets that need to keep it must copy.
//! - The payload is either resolved UTF-8 text or a binary
//!   `(template_id, encoded args)` pair whose formatting is deferred until a
//!   target actually serializes the record.
//! - Severity is ordered with *smaller = more severe*, so admission checks
//!   are a single integer comparison against the source's effective level.

mod __test__;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Log severity level with compact `u8` representation.
///
/// Ordered from most severe (`FATAL` = 0) to least severe (`DIAG` = 7).
/// A record is admitted when `record.level <= source.effective_level`.
///
/// Serializes as lowercase strings (`"fatal"`, `"warn"`, ...) for human
/// readability while remaining one byte internally.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  FATAL = 0,
  ERROR = 1,
  WARN = 2,
  NOTICE = 3,
  INFO = 4,
  TRACE = 5,
  DEBUG = 6,
  DIAG = 7,
}

impl LogLevel {
  /// Convert from a raw `u8`. Out-of-range values clamp to `DIAG`.
  #[inline]
  pub fn from_u8(level: u8) -> LogLevel {
    match level {
      0 => LogLevel::FATAL,
      1 => LogLevel::ERROR,
      2 => LogLevel::WARN,
      3 => LogLevel::NOTICE,
      4 => LogLevel::INFO,
      5 => LogLevel::TRACE,
      6 => LogLevel::DEBUG,
      _ => LogLevel::DIAG,
    }
  }

  /// Parse a level name, case-insensitive. Returns `None` on unknown input.
  pub fn parse(name: &str) -> Option<LogLevel> {
    match name.to_ascii_lowercase().as_str() {
      "fatal" => Some(LogLevel::FATAL),
      "error" => Some(LogLevel::ERROR),
      "warn" | "warning" => Some(LogLevel::WARN),
      "notice" => Some(LogLevel::NOTICE),
      "info" => Some(LogLevel::INFO),
      "trace" => Some(LogLevel::TRACE),
      "debug" => Some(LogLevel::DEBUG),
      "diag" => Some(LogLevel::DIAG),
      _ => None,
    }
  }

  /// Upper-case display name, fixed width friendly.
  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      LogLevel::FATAL => "FATAL",
      LogLevel::ERROR => "ERROR",
      LogLevel::WARN => "WARN",
      LogLevel::NOTICE => "NOTICE",
      LogLevel::INFO => "INFO",
      LogLevel::TRACE => "TRACE",
      LogLevel::DEBUG => "DEBUG",
      LogLevel::DIAG => "DIAG",
    }
  }

  /// True when a record at this level passes a threshold level.
  #[inline]
  pub fn admitted_by(&self, threshold: LogLevel) -> bool {
    (*self as u8) <= (threshold as u8)
  }
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Record flag bits.
pub const FLAG_BINARY: u32 = 1 << 0;
pub const FLAG_HAS_STACK_TRACE: u32 = 1 << 1;
pub const FLAG_LIFE_SIGN_CANDIDATE: u32 = 1 << 2;

/// Call-site location. The strings are expected to be `'static` literals
/// supplied by the logging macros (`file!()`, `module_path!()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
  pub file: &'static str,
  pub line: u32,
  pub function: &'static str,
}

impl SourceLocation {
  pub const UNKNOWN: SourceLocation = SourceLocation {
    file: "",
    line: 0,
    function: "",
  };
}

/// Capture the current call-site as a [`SourceLocation`].
#[macro_export]
macro_rules! callsite {
  () => {
    $crate::record::SourceLocation {
      file: file!(),
      line: line!(),
      function: module_path!(),
    }
  };
}

/// The record payload: resolved text, or a binary template reference whose
/// expansion is deferred to the serializing target.
#[derive(Debug, Clone)]
pub enum Payload {
  Text(String),
  Binary {
    /// Template id resolved through the format message cache.
    template_id: u32,
    /// Argument bytes in `(type_code, payload)*` wire form (see `codec`).
    args: Vec<u8>,
    arg_count: u16,
  },
}

/// A single log record.
///
/// `record_id` is strictly increasing within a process; the engine assigns it
/// from a global counter at construction time. `source_id`/`source_name`
/// identify the originating log source without owning it.
#[derive(Debug, Clone)]
pub struct LogRecord {
  pub record_id: u64,
  /// Wall-clock time, nanoseconds since the Unix epoch.
  pub time_unix_nanos: u64,
  /// Monotonic time, nanoseconds since an arbitrary process origin.
  pub time_mono_nanos: u64,
  pub level: LogLevel,
  pub thread_id: u64,
  pub thread_name: Arc<str>,
  pub location: SourceLocation,
  pub source_id: u32,
  pub source_name: Arc<str>,
  pub payload: Payload,
  pub flags: u32,
}

impl LogRecord {
  #[inline]
  pub fn is_binary(&self) -> bool {
    self.flags & FLAG_BINARY != 0
  }

  /// The resolved message for text records, empty for binary records.
  #[inline]
  pub fn text(&self) -> &str {
    match &self.payload {
      Payload::Text(s) => s.as_str(),
      Payload::Binary { .. } => "",
    }
  }
}

/// A record plus its resolved message text, borrowed for the duration of one
/// dispatch. Binary payloads are expanded exactly once per dispatch and the
/// result is shared by every target, filter, and formatter that sees the
/// record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
  pub record: &'a LogRecord,
  pub msg: &'a str,
}

// Process-wide sequential thread ids. The OS thread id is opaque in std, so
// each thread draws one from this counter on first use.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
  static THREAD_INFO: (u64, Arc<str>) = {
    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    let name: Arc<str> = match std::thread::current().name() {
      Some(n) => Arc::from(n),
      None => Arc::from(format!("thread-{}", id).as_str()),
    };
    (id, name)
  };
}

/// The calling thread's process-unique id and name.
#[inline]
pub fn current_thread_info() -> (u64, Arc<str>) {
  THREAD_INFO.with(|info| (info.0, Arc::clone(&info.1)))
}

/// Wall-clock nanoseconds since the Unix epoch.
#[inline]
pub fn wall_clock_nanos() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}

/// Monotonic nanoseconds since the first call in this process.
#[inline]
pub fn mono_clock_nanos() -> u64 {
  use std::sync::OnceLock;
  use std::time::Instant;
  static ORIGIN: OnceLock<Instant> = OnceLock::new();
  let origin = *ORIGIN.get_or_init(Instant::now);
  origin.elapsed().as_nanos() as u64
}
