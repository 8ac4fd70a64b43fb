use std::io;
use thiserror::Error;

/// Error kinds surfaced by the engine's configuration and lifecycle APIs.
///
/// The logging fast path never returns one of these; failures there are
/// converted into statistics counters and a self-log line at the engine's
/// report level.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  /// Format string or filter expression could not be parsed. Carries the
  /// byte offset of the offending position within the input.
  #[error("parse error at offset {pos}: {what}")]
  ParseError { what: String, pos: usize },

  #[error("unknown selector '{0}'")]
  UnknownSelector(String),

  #[error("unknown filter '{0}'")]
  UnknownFilter(String),

  #[error("unknown flush policy '{0}'")]
  UnknownFlushPolicy(String),

  #[error("unknown log target scheme '{0}'")]
  UnknownScheme(String),

  /// The target slot table is exhausted (fixed capacity, see engine params).
  #[error("log target table is full")]
  TableFull,

  #[error("not found: {0}")]
  NotFound(String),

  /// Another thread removed the same target first.
  #[error("log target was removed concurrently")]
  ConcurrentRemove,

  #[error("duplicate name '{0}'")]
  DuplicateName(String),

  /// A binary record referenced a template id that is not in the format
  /// message cache.
  #[error("format cache miss for template id {0}")]
  FormatCacheMiss(u32),

  #[error("i/o error: {0}")]
  Io(#[from] io::Error),

  #[error("engine is already initialized")]
  AlreadyInitialized,

  #[error("engine is not initialized")]
  NotInitialized,
}

impl EngineError {
  /// Shorthand for a parse error with a position.
  pub fn parse(what: impl Into<String>, pos: usize) -> Self {
    EngineError::ParseError {
      what: what.into(),
      pos,
    }
  }
}

pub type EngineResult<T> = Result<T, EngineError>;
