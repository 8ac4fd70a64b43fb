#[cfg(test)]
mod __test__ {

  use crate::bridge::{map_level, EngineLayer};
  use crate::engine::{Engine, EngineParams};
  use crate::filter::FilterRegistry;
  use crate::format::Formatter;
  use crate::record::LogLevel;
  use crate::selector::SelectorRegistry;
  use crate::target::{MemoryWriter, Target};
  use std::sync::Arc;
  use tracing_subscriber::layer::SubscriberExt;

  fn engine_with_memory_target(pattern: &str) -> (Engine, Arc<MemoryWriter>) {
    let engine = Engine::init(EngineParams {
      max_threads: 16,
      max_log_targets: 8,
      ..EngineParams::default()
    })
    .unwrap();
    let selectors = SelectorRegistry::new();
    let filters = FilterRegistry::new();
    let formatter = Arc::new(Formatter::compile(pattern, &selectors, &filters).unwrap());
    let mem = MemoryWriter::new();
    engine
      .add_target(Target::new("mem", Box::new(Arc::clone(&mem))).with_formatter(formatter))
      .unwrap();
    (engine, mem)
  }

  #[test]
  fn test_level_mapping() {
    assert_eq!(map_level(&tracing::Level::ERROR), LogLevel::ERROR);
    assert_eq!(map_level(&tracing::Level::WARN), LogLevel::WARN);
    assert_eq!(map_level(&tracing::Level::INFO), LogLevel::INFO);
    assert_eq!(map_level(&tracing::Level::DEBUG), LogLevel::DEBUG);
    assert_eq!(map_level(&tracing::Level::TRACE), LogLevel::TRACE);
  }

  #[test]
  fn test_events_flow_into_engine() {
    let (engine, mem) = engine_with_memory_target("${src}|${msg}");
    let layer = EngineLayer::new(engine.clone());
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
      tracing::info!(target: "app::db", "connected in {}ms", 12);
      tracing::debug!(target: "app::db", "suppressed by level");
    });

    assert_eq!(mem.lines(), vec!["app.db|connected in 12ms".to_string()]);
    assert!(engine.core().sources().get("app.db").is_some());
    engine.terminate().unwrap();
  }

  #[test]
  fn test_structured_fields_flattened() {
    let (engine, mem) = engine_with_memory_target("${msg}");
    let layer = EngineLayer::new(engine.clone());
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
      tracing::warn!(target: "auth", user = "bob", attempts = 3, "login failed");
    });

    let lines = mem.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("login failed"));
    assert!(lines[0].contains("user=bob"));
    assert!(lines[0].contains("attempts=3"));
    engine.terminate().unwrap();
  }
}
