//! # Tracing Bridge
//!
//! A `tracing_subscriber::Layer` that forwards `tracing` events into the
//! engine, so hosts already instrumented with the tracing macros can route
//! through mallard targets without touching call-sites. The event target
//! (`my_app::db`) maps onto the source tree (`my_app.db`), levels map onto
//! the nearest engine severity, and the message plus any structured fields
//! are flattened into the record text.

mod __test__;

use crate::engine::Engine;
use crate::record::{LogLevel, Payload, SourceLocation};
use std::fmt::Write as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Maps a tracing verbosity level onto the engine's severity scale.
#[inline]
pub fn map_level(level: &Level) -> LogLevel {
  match *level {
    Level::ERROR => LogLevel::ERROR,
    Level::WARN => LogLevel::WARN,
    Level::INFO => LogLevel::INFO,
    Level::DEBUG => LogLevel::DEBUG,
    Level::TRACE => LogLevel::TRACE,
  }
}

/// Collects the `message` field and flattens the rest into `key=value`
/// pairs.
#[derive(Default)]
struct MessageVisitor {
  message: Option<String>,
  fields: String,
}

impl MessageVisitor {
  fn into_message(self) -> String {
    match (self.message, self.fields.is_empty()) {
      (Some(message), true) => message,
      (Some(mut message), false) => {
        message.push(' ');
        message.push_str(&self.fields);
        message
      },
      (None, _) => self.fields,
    }
  }

  fn push_field(&mut self, name: &str, rendered: std::fmt::Arguments<'_>) {
    if !self.fields.is_empty() {
      self.fields.push(' ');
    }
    let _ = write!(self.fields, "{}={}", name, rendered);
  }
}

impl Visit for MessageVisitor {
  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      self.message = Some(value.to_string());
    } else {
      self.push_field(field.name(), format_args!("{}", value));
    }
  }

  fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
    if field.name() == "message" {
      self.message = Some(format!("{:?}", value));
    } else {
      self.push_field(field.name(), format_args!("{:?}", value));
    }
  }
}

/// The bridge layer; clone of the engine handle per event is avoided by
/// holding it for the layer's lifetime.
pub struct EngineLayer {
  engine: Engine,
}

impl EngineLayer {
  pub fn new(engine: Engine) -> Self {
    Self { engine }
  }
}

impl<S> Layer<S> for EngineLayer
where
  S: Subscriber + for<'a> LookupSpan<'a>,
{
  fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
    let meta = event.metadata();
    let level = map_level(meta.level());

    let core = self.engine.core();
    let source_name = meta.target().replace("::", ".");
    // Fast lookup first; the tree lock is only taken for a new source.
    let source = match core.sources().get(&source_name) {
      Some(source) => source,
      None => match core.sources().define(&source_name, true) {
        Ok(source) => source,
        Err(_) => return,
      },
    };
    if !source.can_log(level) {
      return;
    }

    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);

    let location = SourceLocation {
      file: meta.file().unwrap_or(""),
      line: meta.line().unwrap_or(0),
      function: meta.module_path().unwrap_or(""),
    };
    let record = core.make_record(
      &source,
      level,
      location,
      Payload::Text(visitor.into_message()),
      0,
    );
    core.submit(record, &source);
  }
}
