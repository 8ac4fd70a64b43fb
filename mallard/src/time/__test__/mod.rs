#[cfg(test)]
mod __test__ {

  use crate::time::TimeSource;
  use std::time::Duration;

  #[test]
  fn test_direct_clock_advances() {
    let source = TimeSource::direct();
    let a = source.now_unix_nanos();
    std::thread::sleep(Duration::from_millis(2));
    let b = source.now_unix_nanos();
    assert!(b > a);
    assert!(!source.is_lazy());
  }

  #[test]
  fn test_lazy_clock_tracks_time() {
    let source = TimeSource::lazy(Duration::from_millis(1));
    assert!(source.is_lazy());
    let a = source.now_unix_nanos();
    assert!(a > 0);
    std::thread::sleep(Duration::from_millis(20));
    let b = source.now_unix_nanos();
    assert!(b > a, "sampler did not refresh the cached clock");
    source.shutdown();

    // After shutdown the cached value stays put
    let frozen = source.now_unix_nanos();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(source.now_unix_nanos(), frozen);
  }
}
