#[cfg(test)]
mod __test__ {

  use crate::flush::*;

  #[test]
  fn test_immediate_and_never() {
    assert!(ImmediateFlushPolicy.should_flush(0, 0, 0));
    assert!(!NeverFlushPolicy.should_flush(u64::MAX, u64::MAX, u64::MAX));
  }

  #[test]
  fn test_count_policy() {
    let policy = CountFlushPolicy { every_msgs: 3 };
    assert!(!policy.should_flush(0, 2, 0));
    assert!(policy.should_flush(0, 3, 0));
  }

  #[test]
  fn test_size_policy() {
    let policy = SizeFlushPolicy { bytes: 4096 };
    assert!(!policy.should_flush(4095, 10, 0));
    assert!(policy.should_flush(4096, 10, 0));
  }

  #[test]
  fn test_time_policy_resets_on_flush() {
    let policy = TimeFlushPolicy::new(1_000_000);
    assert!(!policy.should_flush(0, 0, 500_000));
    assert!(policy.should_flush(1, 1, 1_000_000));
    policy.on_flush(1_000_000);
    assert!(!policy.should_flush(1, 1, 1_500_000));
    assert!(policy.should_flush(1, 1, 2_000_000));
  }

  #[test]
  fn test_combinators() {
    let registry = FlushPolicyRegistry::new();
    let both = parse_flush_policy("and(count:2, size:100)", &registry).unwrap();
    assert!(!both.should_flush(100, 1, 0));
    assert!(!both.should_flush(50, 2, 0));
    assert!(both.should_flush(100, 2, 0));

    let either = parse_flush_policy("or(count:2, size:100)", &registry).unwrap();
    assert!(either.should_flush(100, 1, 0));
    assert!(either.should_flush(50, 2, 0));
    assert!(!either.should_flush(50, 1, 0));

    let inverted = parse_flush_policy("not(never)", &registry).unwrap();
    assert!(inverted.should_flush(0, 0, 0));
  }

  #[test]
  fn test_parse_duration() {
    assert_eq!(parse_duration_nanos("200ms").unwrap(), 200_000_000);
    assert_eq!(parse_duration_nanos("5s").unwrap(), 5_000_000_000);
    assert_eq!(parse_duration_nanos("3us").unwrap(), 3_000);
    assert_eq!(parse_duration_nanos("1m").unwrap(), 60_000_000_000);
    assert_eq!(parse_duration_nanos("7").unwrap(), 7_000_000_000);
    assert!(parse_duration_nanos("7lightyears").is_err());
    assert!(parse_duration_nanos("ms").is_err());
  }

  #[test]
  fn test_registry_unknown_policy() {
    let registry = FlushPolicyRegistry::new();
    assert!(parse_flush_policy("bogus", &registry).is_err());
    assert!(parse_flush_policy("time:200ms", &registry).is_ok());
  }
}
