//! # Time Source
//!
//! Wall-clock acquisition for the logging fast path. The direct source
//! queries the system clock per record; the lazy source runs a background
//! sampler that caches the clock at a configured resolution, turning the
//! fast-path read into one relaxed atomic load. Timestamp accuracy then
//! degrades to the sampling resolution, which is the trade the host opts
//! into.

mod __test__;

use crate::record::wall_clock_nanos;
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
enum Clock {
  Direct,
  Lazy {
    cached: Arc<AtomicU64>,
    shutdown: Sender<()>,
    sampler: Mutex<Option<JoinHandle<()>>>,
  },
}

#[derive(Debug)]
pub struct TimeSource {
  clock: Clock,
}

impl TimeSource {
  /// Reads the system clock on every call.
  pub fn direct() -> Self {
    Self {
      clock: Clock::Direct,
    }
  }

  /// Spawns the sampler thread and caches the clock every `resolution`.
  pub fn lazy(resolution: Duration) -> Self {
    let cached = Arc::new(AtomicU64::new(wall_clock_nanos()));
    let (shutdown, rx) = bounded::<()>(1);
    let sampler_cache = Arc::clone(&cached);
    let sampler = std::thread::Builder::new()
      .name("mallard-time".to_string())
      .spawn(move || loop {
        sampler_cache.store(wall_clock_nanos(), Ordering::Relaxed);
        match rx.recv_timeout(resolution) {
          Ok(()) => break,
          Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
          Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
      })
      .ok();

    Self {
      clock: Clock::Lazy {
        cached,
        shutdown,
        sampler: Mutex::new(sampler),
      },
    }
  }

  pub fn is_lazy(&self) -> bool {
    matches!(self.clock, Clock::Lazy { .. })
  }

  /// Wall-clock nanoseconds; never blocks.
  #[inline]
  pub fn now_unix_nanos(&self) -> u64 {
    match &self.clock {
      Clock::Direct => wall_clock_nanos(),
      Clock::Lazy { cached, .. } => cached.load(Ordering::Relaxed),
    }
  }

  /// Stops the sampler thread, if any. Idempotent.
  pub fn shutdown(&self) {
    if let Clock::Lazy {
      shutdown, sampler, ..
    } = &self.clock
    {
      let _ = shutdown.try_send(());
      if let Some(handle) = sampler.lock().unwrap().take() {
        let _ = handle.join();
      }
    }
  }
}

impl Drop for TimeSource {
  fn drop(&mut self) {
    self.shutdown();
  }
}
