#[cfg(test)]
mod __test__ {

  use crate::preinit::PreInitQueue;
  use crate::record::{current_thread_info, LogLevel, LogRecord, Payload, SourceLocation};

  fn record(n: u64) -> LogRecord {
    let (tid, tname) = current_thread_info();
    LogRecord {
      record_id: n,
      time_unix_nanos: 0,
      time_mono_nanos: 0,
      level: LogLevel::INFO,
      thread_id: tid,
      thread_name: tname,
      location: SourceLocation::UNKNOWN,
      source_id: 0,
      source_name: "".into(),
      payload: Payload::Text(format!("msg {}", n)),
      flags: 0,
    }
  }

  #[test]
  fn test_drain_preserves_order() {
    let queue = PreInitQueue::new(16);
    for n in 0..5 {
      queue.push(record(n));
    }
    assert_eq!(queue.len(), 5);

    let mut seen = Vec::new();
    queue.drain(&mut |rec| seen.push(rec.record_id));
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
    assert_eq!(queue.discarded(), 0);
  }

  #[test]
  fn test_overflow_evicts_oldest() {
    let queue = PreInitQueue::new(3);
    for n in 0..5 {
      queue.push(record(n));
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.discarded(), 2);

    let mut seen = Vec::new();
    queue.drain(&mut |rec| seen.push(rec.record_id));
    assert_eq!(seen, vec![2, 3, 4]);
  }

  #[test]
  fn test_purge_counts_discards() {
    let queue = PreInitQueue::new(8);
    for n in 0..4 {
      queue.push(record(n));
    }
    queue.purge();
    assert!(queue.is_empty());
    assert_eq!(queue.discarded(), 4);
  }

  #[test]
  fn test_capacity_floor() {
    let queue = PreInitQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    queue.push(record(1));
    queue.push(record(2));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.discarded(), 1);
  }
}
