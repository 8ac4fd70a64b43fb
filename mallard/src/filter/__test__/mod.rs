#[cfg(test)]
mod __test__ {

  use crate::filter::*;
  use crate::record::{
    current_thread_info, LogLevel, LogRecord, Payload, RecordView, SourceLocation,
  };
  use std::sync::Arc;

  fn record(level: LogLevel, msg: &str) -> LogRecord {
    let (tid, tname) = current_thread_info();
    LogRecord {
      record_id: 1,
      time_unix_nanos: 0,
      time_mono_nanos: 0,
      level,
      thread_id: tid,
      thread_name: tname,
      location: SourceLocation {
        file: "src/db/pool.rs",
        line: 42,
        function: "db::pool",
      },
      source_id: 7,
      source_name: "db.pool".into(),
      payload: Payload::Text(msg.to_string()),
      flags: 0,
    }
  }

  fn accepts(filter: &dyn Filter, level: LogLevel, msg: &str) -> bool {
    let rec = record(level, msg);
    let view = RecordView {
      record: &rec,
      msg: rec.text(),
    };
    filter.accept(&view)
  }

  #[test]
  fn test_level_filter_ops() {
    let le_warn = LevelFilter {
      op: CompareOp::Le,
      level: LogLevel::WARN,
    };
    assert!(accepts(&le_warn, LogLevel::FATAL, ""));
    assert!(accepts(&le_warn, LogLevel::WARN, ""));
    assert!(!accepts(&le_warn, LogLevel::INFO, ""));

    let eq_info = LevelFilter {
      op: CompareOp::Eq,
      level: LogLevel::INFO,
    };
    assert!(accepts(&eq_info, LogLevel::INFO, ""));
    assert!(!accepts(&eq_info, LogLevel::WARN, ""));
  }

  #[test]
  fn test_name_filter_literal_and_regex() {
    let registry = FilterRegistry::new();
    let by_src = parse_filter("src == db.pool", &registry).unwrap();
    assert!(accepts(by_src.as_ref(), LogLevel::INFO, "x"));

    let by_msg = parse_filter("msg ~= time.?out", &registry).unwrap();
    assert!(accepts(by_msg.as_ref(), LogLevel::INFO, "connection timeout"));
    assert!(!accepts(by_msg.as_ref(), LogLevel::INFO, "connected"));

    let ne = parse_filter("tname != reaper", &registry).unwrap();
    assert!(accepts(ne.as_ref(), LogLevel::INFO, "x"));
  }

  #[test]
  fn test_and_or_not_combinators() {
    let registry = FilterRegistry::new();
    let expr = "(level <= WARN AND src == db.pool) OR msg == magic";
    let filter = parse_filter(expr, &registry).unwrap();
    assert!(accepts(filter.as_ref(), LogLevel::ERROR, "anything"));
    assert!(accepts(filter.as_ref(), LogLevel::DEBUG, "magic"));
    assert!(!accepts(filter.as_ref(), LogLevel::DEBUG, "anything"));

    let negated = parse_filter("NOT level == INFO", &registry).unwrap();
    assert!(!accepts(negated.as_ref(), LogLevel::INFO, ""));
    assert!(accepts(negated.as_ref(), LogLevel::WARN, ""));
  }

  #[test]
  fn test_parse_errors() {
    let registry = FilterRegistry::new();
    assert!(parse_filter("bogus == x", &registry).is_err());
    assert!(parse_filter("level ?? INFO", &registry).is_err());
    assert!(parse_filter("(level == INFO", &registry).is_err());
    assert!(parse_filter("nosuch(1)", &registry).is_err());
  }

  #[test]
  fn test_count_filter_every_n() {
    let filter = CountFilter::new(3);
    let mut passed = 0;
    for _ in 0..10 {
      if accepts(&filter, LogLevel::INFO, "") {
        passed += 1;
      }
    }
    // ceil(10 / 3) = 4: calls 1, 4, 7, 10
    assert_eq!(passed, 4);
  }

  #[test]
  fn test_rate_limit_window() {
    let filter = RateLimitFilter::new(3, 1, TimeUnit::Seconds);
    let base = crate::record::mono_clock_nanos().max(1);

    let fire = |offset_nanos: u64| {
      let mut rec = record(LogLevel::INFO, "x");
      rec.time_mono_nanos = base + offset_nanos;
      let view = RecordView {
        record: &rec,
        msg: "x",
      };
      filter.accept(&view)
    };

    // First window: 3 pass, 2 rejected
    let mut passed = 0;
    for i in 0..5 {
      if fire(i * 1000) {
        passed += 1;
      }
    }
    assert_eq!(passed, 3);
    assert_eq!(filter.total_discarded(), 2);

    // Next window reopens the budget and archives the discard count
    assert!(fire(1_100_000_000));
    assert_eq!(filter.take_discard_summary(), Some(2));
    assert_eq!(filter.take_discard_summary(), None);
  }

  #[test]
  fn test_registry_construct_and_duplicates() {
    let registry = FilterRegistry::new();
    assert!(registry.contains("rate_limit"));
    let filter = registry
      .construct("count_n", &["2".to_string()])
      .unwrap();
    assert!(accepts(filter.as_ref(), LogLevel::INFO, ""));
    assert!(!accepts(filter.as_ref(), LogLevel::INFO, ""));

    let duplicate = registry.register(
      "count_n",
      Box::new(|_| Ok(Arc::new(CountFilter::new(1)) as Arc<dyn Filter>)),
    );
    assert!(duplicate.is_err());
  }

  #[test]
  fn test_rate_limit_expression() {
    let registry = FilterRegistry::new();
    let filter = parse_filter("rate_limit(2, 1, seconds)", &registry).unwrap();
    let mut passed = 0;
    for _ in 0..5 {
      if accepts(filter.as_ref(), LogLevel::INFO, "") {
        passed += 1;
      }
    }
    assert_eq!(passed, 2);
  }
}
