//! # Statistics Module
//!
//! Thread-striped counters for log targets and the engine. Each counter is a
//! cache-line padded stripe of `AtomicU64` indexed by the thread's GC slot,
//! so the hot path performs one uncontended relaxed add; readers sum the
//! stripes on demand.


use crate::record::LogLevel;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single `AtomicU64` padded to its own cache line to avoid false sharing
/// between thread stripes.
#[repr(align(64))]
#[derive(Debug, Default)]
struct PaddedCounter(AtomicU64);

/// One statistic, striped across thread slots.
#[derive(Debug)]
pub struct StatCounter {
  stripes: Box<[PaddedCounter]>,
}

impl StatCounter {
  pub fn new(max_threads: usize) -> Self {
    let stripes: Vec<PaddedCounter> = (0..max_threads).map(|_| PaddedCounter::default()).collect();
    Self {
      stripes: stripes.into_boxed_slice(),
    }
  }

  #[inline]
  pub fn add(&self, slot: usize, delta: u64) {
    if let Some(stripe) = self.stripes.get(slot) {
      stripe.0.fetch_add(delta, Ordering::Relaxed);
    }
  }

  #[inline]
  pub fn incr(&self, slot: usize) {
    self.add(slot, 1);
  }

  pub fn sum(&self) -> u64 {
    self
      .stripes
      .iter()
      .map(|stripe| stripe.0.load(Ordering::Relaxed))
      .sum()
  }

  /// Zeroes one thread's stripe; called when the thread's GC slot is
  /// recycled for a new thread.
  pub fn reset_slot(&self, slot: usize) {
    if let Some(stripe) = self.stripes.get(slot) {
      stripe.0.store(0, Ordering::Relaxed);
    }
  }
}

/// The per-target counter block.
#[derive(Debug)]
pub struct TargetStats {
  pub msg_discarded: StatCounter,
  pub msg_submitted: StatCounter,
  pub msg_written: StatCounter,
  pub msg_fail_write: StatCounter,
  pub bytes_submitted: StatCounter,
  pub bytes_written: StatCounter,
  pub bytes_fail_write: StatCounter,
  pub flush_submitted: StatCounter,
  pub flush_executed: StatCounter,
  pub flush_failed: StatCounter,
  pub flush_discarded: StatCounter,
}

impl TargetStats {
  pub fn new(max_threads: usize) -> Self {
    Self {
      msg_discarded: StatCounter::new(max_threads),
      msg_submitted: StatCounter::new(max_threads),
      msg_written: StatCounter::new(max_threads),
      msg_fail_write: StatCounter::new(max_threads),
      bytes_submitted: StatCounter::new(max_threads),
      bytes_written: StatCounter::new(max_threads),
      bytes_fail_write: StatCounter::new(max_threads),
      flush_submitted: StatCounter::new(max_threads),
      flush_executed: StatCounter::new(max_threads),
      flush_failed: StatCounter::new(max_threads),
      flush_discarded: StatCounter::new(max_threads),
    }
  }

  pub fn reset_thread(&self, slot: usize) {
    self.msg_discarded.reset_slot(slot);
    self.msg_submitted.reset_slot(slot);
    self.msg_written.reset_slot(slot);
    self.msg_fail_write.reset_slot(slot);
    self.bytes_submitted.reset_slot(slot);
    self.bytes_written.reset_slot(slot);
    self.bytes_fail_write.reset_slot(slot);
    self.flush_submitted.reset_slot(slot);
    self.flush_executed.reset_slot(slot);
    self.flush_failed.reset_slot(slot);
    self.flush_discarded.reset_slot(slot);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      msg_discarded: self.msg_discarded.sum(),
      msg_submitted: self.msg_submitted.sum(),
      msg_written: self.msg_written.sum(),
      msg_fail_write: self.msg_fail_write.sum(),
      bytes_submitted: self.bytes_submitted.sum(),
      bytes_written: self.bytes_written.sum(),
      bytes_fail_write: self.bytes_fail_write.sum(),
      flush_submitted: self.flush_submitted.sum(),
      flush_executed: self.flush_executed.sum(),
      flush_failed: self.flush_failed.sum(),
      flush_discarded: self.flush_discarded.sum(),
    }
  }
}

/// Point-in-time sums of a target's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub msg_discarded: u64,
  pub msg_submitted: u64,
  pub msg_written: u64,
  pub msg_fail_write: u64,
  pub bytes_submitted: u64,
  pub bytes_written: u64,
  pub bytes_fail_write: u64,
  pub flush_submitted: u64,
  pub flush_executed: u64,
  pub flush_failed: u64,
  pub flush_discarded: u64,
}

impl fmt::Display for StatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "\tLog messages discarded: {}", self.msg_discarded)?;
    writeln!(f, "\tLog messages submitted: {}", self.msg_submitted)?;
    writeln!(f, "\tLog messages written: {}", self.msg_written)?;
    writeln!(f, "\tLog messages failed write: {}", self.msg_fail_write)?;
    writeln!(f, "\tBytes submitted: {}", self.bytes_submitted)?;
    writeln!(f, "\tBytes written: {}", self.bytes_written)?;
    writeln!(f, "\tBytes failed write: {}", self.bytes_fail_write)?;
    writeln!(f, "\tFlush requests submitted: {}", self.flush_submitted)?;
    writeln!(f, "\tFlush requests executed: {}", self.flush_executed)?;
    writeln!(f, "\tFlush requests failed execution: {}", self.flush_failed)?;
    write!(f, "\tFlush requests discarded: {}", self.flush_discarded)
  }
}

/// Engine-wide per-level message counts.
#[derive(Debug)]
pub struct LevelStats {
  counts: [StatCounter; 8],
}

impl LevelStats {
  pub fn new(max_threads: usize) -> Self {
    Self {
      counts: std::array::from_fn(|_| StatCounter::new(max_threads)),
    }
  }

  #[inline]
  pub fn record(&self, slot: usize, level: LogLevel) {
    self.counts[level as usize].incr(slot);
  }

  pub fn count(&self, level: LogLevel) -> u64 {
    self.counts[level as usize].sum()
  }

  pub fn reset_thread(&self, slot: usize) {
    for counter in &self.counts {
      counter.reset_slot(slot);
    }
  }
}
