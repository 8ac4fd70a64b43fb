//! # Logger Module
//!
//! The per-call-site fast path. A [`Logger`] is a cheap handle binding one
//! log source to the engine; `can_log` is a single relaxed atomic load, and
//! nothing allocates until a record is actually admitted.
//!
//! Call-sites normally go through the macros (`info!`, `log_every_n!`,
//! `log_cached!`, ...) which capture the source location and per-call-site
//! guard state; see the `macros` module.


use crate::engine::EngineCore;
use crate::msg_cache::MsgCache;
use crate::record::{LogLevel, Payload, SourceLocation, FLAG_BINARY};
use crate::source::LogSource;
use std::fmt;
use std::sync::Arc;

/// A handle for emitting records against one log source.
#[derive(Debug, Clone)]
pub struct Logger {
  core: Arc<EngineCore>,
  source: Arc<LogSource>,
}

impl Logger {
  pub fn new(core: Arc<EngineCore>, source: Arc<LogSource>) -> Self {
    Self { core, source }
  }

  #[inline]
  pub fn source(&self) -> &Arc<LogSource> {
    &self.source
  }

  #[inline]
  pub fn core(&self) -> &Arc<EngineCore> {
    &self.core
  }

  #[inline]
  pub fn msg_cache(&self) -> &MsgCache {
    self.core.msg_cache()
  }

  /// The fast-path admission check: one relaxed load, no allocation.
  #[inline]
  pub fn can_log(&self, level: LogLevel) -> bool {
    self.source.can_log(level)
  }

  /// Emits a text record. Callers should gate on [`Self::can_log`] first;
  /// this re-checks only as a safety net for direct API use.
  pub fn log(&self, level: LogLevel, location: SourceLocation, msg: String) {
    if !self.can_log(level) {
      return;
    }
    let record = self
      .core
      .make_record(&self.source, level, location, Payload::Text(msg), 0);
    self.core.submit(record, &self.source);
  }

  /// Emits a text record from format arguments without an intermediate
  /// allocation when the message is a plain literal.
  pub fn log_fmt(&self, level: LogLevel, location: SourceLocation, args: fmt::Arguments<'_>) {
    if !self.can_log(level) {
      return;
    }
    let msg = match args.as_str() {
      Some(literal) => literal.to_string(),
      None => args.to_string(),
    };
    self.log(level, location, msg);
  }

  /// Emits a binary record: a cached template id plus encoded arguments.
  pub fn log_binary(
    &self,
    level: LogLevel,
    location: SourceLocation,
    template_id: u32,
    args: Vec<u8>,
    arg_count: u16,
  ) {
    if !self.can_log(level) {
      return;
    }
    let record = self.core.make_record(
      &self.source,
      level,
      location,
      Payload::Binary {
        template_id,
        args,
        arg_count,
      },
      FLAG_BINARY,
    );
    self.core.submit(record, &self.source);
  }

  /// Starts a continued log: append fragments, emit one record on `end`.
  pub fn begin(&self, level: LogLevel, location: SourceLocation) -> RecordBuilder<'_> {
    RecordBuilder {
      logger: self,
      level,
      location,
      buf: String::new(),
    }
  }
}

/// Accumulates message fragments and emits a single record on
/// [`RecordBuilder::end`]. Dropping the builder without `end` discards the
/// fragments.
#[derive(Debug)]
pub struct RecordBuilder<'a> {
  logger: &'a Logger,
  level: LogLevel,
  location: SourceLocation,
  buf: String,
}

impl<'a> RecordBuilder<'a> {
  pub fn append(&mut self, fragment: &str) -> &mut Self {
    self.buf.push_str(fragment);
    self
  }

  pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
    use fmt::Write as _;
    let _ = self.buf.write_fmt(args);
    self
  }

  pub fn end(self) {
    self.logger.log(self.level, self.location, self.buf);
  }
}
