#[cfg(test)]
mod __test__ {

  use crate::record::*;

  #[test]
  fn test_level_ordering() {
    // Smaller value means more severe
    assert!(LogLevel::FATAL < LogLevel::ERROR);
    assert!(LogLevel::ERROR < LogLevel::WARN);
    assert!(LogLevel::WARN < LogLevel::NOTICE);
    assert!(LogLevel::NOTICE < LogLevel::INFO);
    assert!(LogLevel::INFO < LogLevel::TRACE);
    assert!(LogLevel::TRACE < LogLevel::DEBUG);
    assert!(LogLevel::DEBUG < LogLevel::DIAG);
  }

  #[test]
  fn test_level_admission() {
    // Threshold INFO admits FATAL..INFO, rejects TRACE..DIAG
    assert!(LogLevel::FATAL.admitted_by(LogLevel::INFO));
    assert!(LogLevel::INFO.admitted_by(LogLevel::INFO));
    assert!(!LogLevel::TRACE.admitted_by(LogLevel::INFO));
    assert!(!LogLevel::DIAG.admitted_by(LogLevel::INFO));
  }

  #[test]
  fn test_level_parse() {
    assert_eq!(LogLevel::parse("info"), Some(LogLevel::INFO));
    assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::WARN));
    assert_eq!(LogLevel::parse("warning"), Some(LogLevel::WARN));
    assert_eq!(LogLevel::parse("notice"), Some(LogLevel::NOTICE));
    assert_eq!(LogLevel::parse("bogus"), None);
  }

  #[test]
  fn test_level_round_trip() {
    for raw in 0u8..8 {
      let level = LogLevel::from_u8(raw);
      assert_eq!(level as u8, raw);
      assert_eq!(LogLevel::parse(level.as_str()), Some(level));
    }
  }

  #[test]
  fn test_thread_info_stable_within_thread() {
    let (id1, name1) = current_thread_info();
    let (id2, name2) = current_thread_info();
    assert_eq!(id1, id2);
    assert_eq!(name1, name2);
  }

  #[test]
  fn test_thread_info_unique_across_threads() {
    let (main_id, _) = current_thread_info();
    let other_id = std::thread::spawn(|| current_thread_info().0)
      .join()
      .unwrap();
    assert_ne!(main_id, other_id);
  }

  #[test]
  fn test_record_text_accessor() {
    let (tid, tname) = current_thread_info();
    let record = LogRecord {
      record_id: 1,
      time_unix_nanos: wall_clock_nanos(),
      time_mono_nanos: mono_clock_nanos(),
      level: LogLevel::INFO,
      thread_id: tid,
      thread_name: tname,
      location: crate::callsite!(),
      source_id: 0,
      source_name: "".into(),
      payload: Payload::Text("hello".to_string()),
      flags: 0,
    };
    assert_eq!(record.text(), "hello");
    assert!(!record.is_binary());
  }

  #[test]
  fn test_binary_record_flags() {
    let (tid, tname) = current_thread_info();
    let record = LogRecord {
      record_id: 2,
      time_unix_nanos: 0,
      time_mono_nanos: 0,
      level: LogLevel::DEBUG,
      thread_id: tid,
      thread_name: tname,
      location: SourceLocation::UNKNOWN,
      source_id: 0,
      source_name: "".into(),
      payload: Payload::Binary {
        template_id: 7,
        args: vec![],
        arg_count: 0,
      },
      flags: FLAG_BINARY,
    };
    assert!(record.is_binary());
    assert_eq!(record.text(), "");
  }
}
