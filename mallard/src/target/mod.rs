//! # Log Target Module
//!
//! The fixed-capacity slot table of log targets and the dispatch path that
//! walks it for every admitted record. Slots are read lock-free under an
//! epoch guard; add/remove/replace race freely with dispatch and hand
//! dislodged objects to the collector.
//!
//! A [`Target`] is the engine-owned composite around a concrete sink (the
//! [`TargetWriter`]): level floor, filter, formatter, flush policy and the
//! statistics block all live here, each swappable at runtime. A distinguished
//! default target (stderr) receives every record that no slot accepts, so
//! nothing is silently lost at startup or during reconfiguration.

mod __test__;

use crate::codec::UdtRegistry;
use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::flush::FlushPolicy;
use crate::format::{resolve_message, FormatContext, Formatter};
use crate::gc::{ComponentHandle, EpochGc, EpochGuard};
use crate::msg_cache::MsgCache;
use crate::preinit::PreInitQueue;
use crate::record::{
  current_thread_info, mono_clock_nanos, LogLevel, LogRecord, Payload, RecordView, SourceLocation,
};
use crate::source::{LogSource, AFFINITY_MASK_BITS};
use crate::stats::{StatsSnapshot, TargetStats};
use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How a target consumes records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
  /// The engine formats to bytes and hands them to [`TargetWriter::write`].
  #[default]
  Text,
  /// The writer drives the formatter itself against a structured receptor
  /// (databases, monitoring backends).
  Structured,
}

/// The trait a concrete sink implements. Everything else about a target
/// (admission, formatting, statistics, flushing) is engine-owned.
pub trait TargetWriter: Send + Sync {
  fn type_name(&self) -> &'static str {
    "custom"
  }

  fn on_start(&self) -> EngineResult<()> {
    Ok(())
  }

  fn on_stop(&self) -> EngineResult<()> {
    Ok(())
  }

  fn mode(&self) -> WriteMode {
    WriteMode::Text
  }

  /// Writes one formatted record. Must be thread-safe.
  fn write(&self, formatted: &[u8], view: &RecordView<'_>) -> EngineResult<()>;

  /// Structured ingestion for [`WriteMode::Structured`] writers.
  fn write_structured(
    &self,
    _view: &RecordView<'_>,
    _formatter: Option<&Formatter>,
    _ctx: &FormatContext,
  ) -> EngineResult<()> {
    Ok(())
  }

  fn flush(&self) -> EngineResult<()> {
    Ok(())
  }

  /// Async pipelines report whether they have drained `observed` records.
  fn is_caught_up(&self, _observed: u64) -> bool {
    true
  }
}

/// Console sink; the default target writes to stderr through this.
pub struct ConsoleWriter {
  use_stderr: bool,
}

impl ConsoleWriter {
  pub fn stderr() -> Self {
    Self { use_stderr: true }
  }

  pub fn stdout() -> Self {
    Self { use_stderr: false }
  }
}

impl TargetWriter for ConsoleWriter {
  fn type_name(&self) -> &'static str {
    if self.use_stderr {
      "stderr"
    } else {
      "stdout"
    }
  }

  fn write(&self, formatted: &[u8], _view: &RecordView<'_>) -> EngineResult<()> {
    if self.use_stderr {
      let mut out = std::io::stderr().lock();
      out.write_all(formatted)?;
      out.write_all(b"\n")?;
    } else {
      let mut out = std::io::stdout().lock();
      out.write_all(formatted)?;
      out.write_all(b"\n")?;
    }
    Ok(())
  }

  fn flush(&self) -> EngineResult<()> {
    if self.use_stderr {
      std::io::stderr().lock().flush()?;
    } else {
      std::io::stdout().lock().flush()?;
    }
    Ok(())
  }
}

/// In-memory sink collecting formatted lines; used by tests and embedders
/// that inspect output programmatically.
#[derive(Default)]
pub struct MemoryWriter {
  lines: Mutex<Vec<String>>,
}

impl MemoryWriter {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap().clone()
  }

  pub fn line_count(&self) -> usize {
    self.lines.lock().unwrap().len()
  }
}

impl TargetWriter for Arc<MemoryWriter> {
  fn type_name(&self) -> &'static str {
    "memory"
  }

  fn write(&self, formatted: &[u8], _view: &RecordView<'_>) -> EngineResult<()> {
    let line = String::from_utf8_lossy(formatted).into_owned();
    self.lines.lock().unwrap().push(line);
    Ok(())
  }
}

const SLOT_EMPTY: *mut Target = std::ptr::null_mut();
const SLOT_RESERVED: *mut Target = 1 as *mut Target;

#[inline]
fn is_real_slot(ptr: *mut Target) -> bool {
  ptr != SLOT_EMPTY && ptr != SLOT_RESERVED
}

/// Everything dispatch needs besides the record itself.
#[derive(Clone)]
pub struct DispatchCtx {
  pub gc: Arc<EpochGc>,
  pub msg_cache: Arc<MsgCache>,
  pub udt: Arc<UdtRegistry>,
  pub format: FormatContext,
}

impl DispatchCtx {
  #[inline]
  fn thread_slot(&self) -> usize {
    self.gc.thread_slots().current_slot().unwrap_or(0)
  }
}

/// An engine-owned log target: the sink plus its admission and formatting
/// state.
pub struct Target {
  name: String,
  writer: Box<dyn TargetWriter>,
  slot_id: AtomicUsize,
  level_floor: AtomicU8,
  running: AtomicBool,
  passkey: u32,
  formatter: ComponentHandle<Formatter>,
  filter: ComponentHandle<dyn Filter>,
  flush_policy: ComponentHandle<dyn FlushPolicy>,
  stats: Option<TargetStats>,
  bytes_since_flush: AtomicU64,
  msgs_since_flush: AtomicU64,
}

impl std::fmt::Debug for Target {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Target")
      .field("name", &self.name)
      .field("type", &self.writer.type_name())
      .field("slot_id", &self.slot_id)
      .field("running", &self.running)
      .finish()
  }
}

impl Target {
  pub fn new(name: impl Into<String>, writer: Box<dyn TargetWriter>) -> Self {
    Self {
      name: name.into(),
      writer,
      slot_id: AtomicUsize::new(usize::MAX),
      level_floor: AtomicU8::new(LogLevel::DIAG as u8),
      running: AtomicBool::new(false),
      passkey: 0,
      formatter: ComponentHandle::new(None),
      filter: ComponentHandle::new(None),
      flush_policy: ComponentHandle::new(None),
      stats: None,
      bytes_since_flush: AtomicU64::new(0),
      msgs_since_flush: AtomicU64::new(0),
    }
  }

  pub fn with_level_floor(self, level: LogLevel) -> Self {
    self.level_floor.store(level as u8, Ordering::Relaxed);
    self
  }

  pub fn with_passkey(mut self, passkey: u32) -> Self {
    self.passkey = passkey;
    self
  }

  pub fn with_formatter(mut self, formatter: Arc<Formatter>) -> Self {
    self.formatter.set_direct(Some(formatter));
    self
  }

  pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
    self.filter.set_direct(Some(filter));
    self
  }

  pub fn with_flush_policy(mut self, policy: Arc<dyn FlushPolicy>) -> Self {
    self.flush_policy.set_direct(Some(policy));
    self
  }

  pub fn with_stats(mut self, max_threads: usize) -> Self {
    self.stats = Some(TargetStats::new(max_threads));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn type_name(&self) -> &'static str {
    self.writer.type_name()
  }

  /// The slot index this target occupies; immutable once published.
  pub fn slot_id(&self) -> usize {
    self.slot_id.load(Ordering::Relaxed)
  }

  pub fn passkey(&self) -> u32 {
    self.passkey
  }

  pub fn level_floor(&self) -> LogLevel {
    LogLevel::from_u8(self.level_floor.load(Ordering::Relaxed))
  }

  pub fn set_level_floor(&self, level: LogLevel) {
    self.level_floor.store(level as u8, Ordering::Relaxed);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn has_formatter(&self) -> bool {
    self.formatter.is_installed()
  }

  pub fn stats(&self) -> Option<StatsSnapshot> {
    self.stats.as_ref().map(|s| s.snapshot())
  }

  pub fn stats_block(&self) -> Option<&TargetStats> {
    self.stats.as_ref()
  }

  pub fn is_caught_up(&self) -> bool {
    let observed = self
      .stats
      .as_ref()
      .map(|s| s.msg_submitted.sum())
      .unwrap_or(0);
    self.writer.is_caught_up(observed)
  }

  pub fn start(&self) -> EngineResult<()> {
    self.writer.on_start()?;
    self.running.store(true, Ordering::Release);
    Ok(())
  }

  pub fn stop(&self) -> EngineResult<()> {
    self.running.store(false, Ordering::Release);
    self.writer.on_stop()
  }

  pub fn flush(&self) -> EngineResult<()> {
    self.writer.flush()
  }

  /// Delivers one record. Returns true when the record was written (or
  /// enqueued by an async sink), false when this target refused it.
  pub fn log(&self, view: &RecordView<'_>, guard: &EpochGuard<'_>, ctx: &DispatchCtx) -> bool {
    let slot = ctx.thread_slot();

    // Quick rejects: stopped target, level floor.
    if !self.running.load(Ordering::Acquire)
      || view.record.level as u8 > self.level_floor.load(Ordering::Relaxed)
    {
      if let Some(stats) = &self.stats {
        stats.msg_discarded.incr(slot);
      }
      return false;
    }

    if let Some(filter) = self.filter.load(guard) {
      if !filter.accept(view) {
        if let Some(stats) = &self.stats {
          stats.msg_discarded.incr(slot);
        }
        return false;
      }
      // The rate limiter reports the size of a closed window exactly once;
      // deliver the summary before the record that reopened the flow.
      if let Some(discarded) = filter.take_discard_summary() {
        self.write_summary(discarded, view, guard, ctx, slot);
      }
    }

    self.write_record(view, guard, ctx, slot)
  }

  fn write_summary(
    &self,
    discarded: u64,
    view: &RecordView<'_>,
    guard: &EpochGuard<'_>,
    ctx: &DispatchCtx,
    slot: usize,
  ) {
    let (tid, tname) = current_thread_info();
    let summary = LogRecord {
      record_id: view.record.record_id,
      time_unix_nanos: view.record.time_unix_nanos,
      time_mono_nanos: view.record.time_mono_nanos,
      level: LogLevel::NOTICE,
      thread_id: tid,
      thread_name: tname,
      location: SourceLocation::UNKNOWN,
      source_id: view.record.source_id,
      source_name: Arc::clone(&view.record.source_name),
      payload: Payload::Text(format!("rate limiter discarded {} messages", discarded)),
      flags: 0,
    };
    let summary_view = RecordView {
      record: &summary,
      msg: summary.text(),
    };
    self.write_record(&summary_view, guard, ctx, slot);
  }

  fn write_record(
    &self,
    view: &RecordView<'_>,
    guard: &EpochGuard<'_>,
    ctx: &DispatchCtx,
    slot: usize,
  ) -> bool {
    let formatter = self.formatter.load(guard);

    let (written, bytes) = match self.writer.mode() {
      WriteMode::Text => {
        let formatted = match formatter {
          Some(f) => f.format_to_string(view, &ctx.format),
          None => view.msg.to_string(),
        };
        let bytes = formatted.len() as u64;
        if let Some(stats) = &self.stats {
          stats.msg_submitted.incr(slot);
          stats.bytes_submitted.add(slot, bytes);
        }
        (self.writer.write(formatted.as_bytes(), view), bytes)
      },
      WriteMode::Structured => {
        if let Some(stats) = &self.stats {
          stats.msg_submitted.incr(slot);
        }
        (
          self
            .writer
            .write_structured(view, formatter.map(|f| f.as_ref()), &ctx.format),
          0,
        )
      },
    };

    match written {
      Ok(()) => {
        if let Some(stats) = &self.stats {
          stats.msg_written.incr(slot);
          stats.bytes_written.add(slot, bytes);
        }
        self.maybe_flush(view, guard, ctx, slot, bytes);
        true
      },
      Err(_) => {
        if let Some(stats) = &self.stats {
          stats.msg_fail_write.incr(slot);
          stats.bytes_fail_write.add(slot, bytes);
        }
        false
      },
    }
  }

  fn maybe_flush(
    &self,
    _view: &RecordView<'_>,
    guard: &EpochGuard<'_>,
    _ctx: &DispatchCtx,
    slot: usize,
    bytes: u64,
  ) {
    let bytes_pending = self.bytes_since_flush.fetch_add(bytes, Ordering::Relaxed) + bytes;
    let msgs_pending = self.msgs_since_flush.fetch_add(1, Ordering::Relaxed) + 1;

    let Some(policy) = self.flush_policy.load(guard) else {
      return;
    };
    let now = mono_clock_nanos();
    if !policy.should_flush(bytes_pending, msgs_pending, now) {
      return;
    }

    if let Some(stats) = &self.stats {
      stats.flush_submitted.incr(slot);
    }
    match self.writer.flush() {
      Ok(()) => {
        self.bytes_since_flush.store(0, Ordering::Relaxed);
        self.msgs_since_flush.store(0, Ordering::Relaxed);
        policy.on_flush(now);
        if let Some(stats) = &self.stats {
          stats.flush_executed.incr(slot);
        }
      },
      Err(_) => {
        if let Some(stats) = &self.stats {
          stats.flush_failed.incr(slot);
        }
      },
    }
  }
}

/// The fixed-capacity table of target slots.
pub struct TargetTable {
  slots: Box<[AtomicPtr<Target>]>,
  names: Mutex<HashMap<String, usize>>,
  default_target: Target,
  populated: AtomicUsize,
}

impl std::fmt::Debug for TargetTable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TargetTable")
      .field("capacity", &self.slots.len())
      .field("populated", &self.populated)
      .finish()
  }
}

impl TargetTable {
  pub fn new(capacity: usize, default_target: Target) -> Self {
    let slots: Vec<AtomicPtr<Target>> = (0..capacity)
      .map(|_| AtomicPtr::new(SLOT_EMPTY))
      .collect();
    default_target.running.store(true, Ordering::Release);
    Self {
      slots: slots.into_boxed_slice(),
      names: Mutex::new(HashMap::new()),
      default_target,
      populated: AtomicUsize::new(0),
    }
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  pub fn target_count(&self) -> usize {
    self.populated.load(Ordering::Acquire)
  }

  pub fn has_targets(&self) -> bool {
    self.target_count() > 0
  }

  pub fn default_target(&self) -> &Target {
    &self.default_target
  }

  /// Installs a target: reserve a slot, start the sink, publish, and drain
  /// the pre-init queue into the very first target.
  pub fn add(
    &self,
    target: Target,
    ctx: &DispatchCtx,
    preinit: &PreInitQueue,
  ) -> EngineResult<usize> {
    let slot = {
      let mut names = self.names.lock().unwrap();
      if names.contains_key(target.name()) {
        return Err(EngineError::DuplicateName(target.name().to_string()));
      }
      let slot = self
        .slots
        .iter()
        .position(|s| {
          s.compare_exchange(SLOT_EMPTY, SLOT_RESERVED, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        })
        .ok_or(EngineError::TableFull)?;
      names.insert(target.name().to_string(), slot);
      slot
    };

    target.slot_id.store(slot, Ordering::Relaxed);
    if let Err(err) = target.start() {
      self.names.lock().unwrap().remove(target.name());
      self.slots[slot].store(SLOT_EMPTY, Ordering::Release);
      return Err(err);
    }

    ctx.gc.advance_epoch();
    let published = Arc::new(target);
    self.slots[slot].store(Arc::into_raw(published) as *mut Target, Ordering::Release);

    // First target: replay everything captured before configuration.
    if self.populated.fetch_add(1, Ordering::SeqCst) == 0 {
      self.drain_preinit(slot, ctx, preinit);
    }
    Ok(slot)
  }

  fn drain_preinit(&self, slot: usize, ctx: &DispatchCtx, preinit: &PreInitQueue) {
    let guard = ctx.gc.enter();
    let ptr = self.slots[slot].load(Ordering::Acquire);
    if !is_real_slot(ptr) {
      return;
    }
    let target = unsafe { &*ptr };
    preinit.drain(&mut |record| {
      if let Ok(resolved) = resolve_message(&record, &ctx.msg_cache, &ctx.udt) {
        let msg_owned;
        let msg = match resolved {
          Some(expanded) => {
            msg_owned = expanded;
            msg_owned.as_str()
          },
          None => record.text(),
        };
        let view = RecordView {
          record: &record,
          msg,
        };
        target.log(&view, &guard, ctx);
      }
    });
  }

  /// Removes the target in `slot`. A failed sink stop still vacates the
  /// slot, but the target object is deliberately leaked rather than risking
  /// reclamation of a half-stopped resource.
  pub fn remove(&self, slot: usize, ctx: &DispatchCtx) -> EngineResult<()> {
    let cell = self
      .slots
      .get(slot)
      .ok_or_else(|| EngineError::NotFound(format!("target slot {}", slot)))?;

    let current = cell.load(Ordering::Acquire);
    if !is_real_slot(current) {
      return Err(EngineError::NotFound(format!("target slot {}", slot)));
    }
    if cell
      .compare_exchange(current, SLOT_EMPTY, Ordering::SeqCst, Ordering::Relaxed)
      .is_err()
    {
      return Err(EngineError::ConcurrentRemove);
    }
    self.populated.fetch_sub(1, Ordering::SeqCst);

    let target = unsafe { &*current };
    self.names.lock().unwrap().remove(target.name());
    let stop_result = target.stop();

    let epoch = ctx.gc.advance_epoch();
    match stop_result {
      Ok(()) => {
        let raw = current as usize;
        ctx.gc.retire(
          epoch,
          Box::new(move || {
            drop(unsafe { Arc::from_raw(raw as *const Target) });
          }),
        );
        Ok(())
      },
      // Leak on stop failure; see the method doc.
      Err(err) => Err(err),
    }
  }

  pub fn remove_by_name(&self, name: &str, ctx: &DispatchCtx) -> EngineResult<()> {
    let slot = self
      .slot_by_name(name)
      .ok_or_else(|| EngineError::NotFound(format!("target '{}'", name)))?;
    self.remove(slot, ctx)
  }

  pub fn slot_by_name(&self, name: &str) -> Option<usize> {
    self.names.lock().unwrap().get(name).copied()
  }

  /// A shared handle to the target in `slot`, if populated.
  pub fn get(&self, slot: usize, ctx: &DispatchCtx) -> Option<Arc<Target>> {
    let _guard = ctx.gc.enter();
    let ptr = self.slots.get(slot)?.load(Ordering::Acquire);
    if !is_real_slot(ptr) {
      return None;
    }
    // The guard keeps the Arc's backing allocation alive across the bump.
    unsafe {
      Arc::increment_strong_count(ptr as *const Target);
      Some(Arc::from_raw(ptr as *const Target))
    }
  }

  pub fn get_by_name(&self, name: &str, ctx: &DispatchCtx) -> Option<Arc<Target>> {
    self.get(self.slot_by_name(name)?, ctx)
  }

  /// Swaps a component on the target in `slot`; the old component is retired
  /// through the collector.
  pub fn replace_formatter(
    &self,
    slot: usize,
    formatter: Arc<Formatter>,
    ctx: &DispatchCtx,
  ) -> EngineResult<()> {
    self.with_target(slot, ctx, |target| {
      target.formatter.replace(Some(formatter), &ctx.gc);
    })
  }

  pub fn replace_filter(
    &self,
    slot: usize,
    filter: Arc<dyn Filter>,
    ctx: &DispatchCtx,
  ) -> EngineResult<()> {
    self.with_target(slot, ctx, |target| {
      target.filter.replace(Some(filter), &ctx.gc);
    })
  }

  pub fn replace_flush_policy(
    &self,
    slot: usize,
    policy: Arc<dyn FlushPolicy>,
    ctx: &DispatchCtx,
  ) -> EngineResult<()> {
    self.with_target(slot, ctx, |target| {
      target.flush_policy.replace(Some(policy), &ctx.gc);
    })
  }

  fn with_target(
    &self,
    slot: usize,
    ctx: &DispatchCtx,
    apply: impl FnOnce(&Target),
  ) -> EngineResult<()> {
    let guard = ctx.gc.enter();
    let ptr = self
      .slots
      .get(slot)
      .ok_or_else(|| EngineError::NotFound(format!("target slot {}", slot)))?
      .load(Ordering::Acquire);
    if !is_real_slot(ptr) {
      return Err(EngineError::NotFound(format!("target slot {}", slot)));
    }
    apply(unsafe { &*ptr });
    drop(guard);
    Ok(())
  }

  /// Delivers one record to every permitting slot; falls back to the
  /// default target when nothing accepted it. An unresolvable binary
  /// template id drops the record and surfaces the error to the caller.
  pub fn dispatch(
    &self,
    record: &LogRecord,
    source: &LogSource,
    ctx: &DispatchCtx,
  ) -> EngineResult<()> {
    // Binary payloads are expanded once, shared by all targets.
    let resolved = resolve_message(record, &ctx.msg_cache, &ctx.udt)?;
    let msg = match &resolved {
      Some(expanded) => expanded.as_str(),
      None => record.text(),
    };
    let view = RecordView { record, msg };
    let mask = source.affinity_mask();

    let guard = ctx.gc.enter();
    let mut accepted = false;
    for (slot, cell) in self.slots.iter().enumerate() {
      let ptr = cell.load(Ordering::Acquire);
      if !is_real_slot(ptr) {
        continue;
      }
      if slot < AFFINITY_MASK_BITS && mask & (1u64 << slot) == 0 {
        continue;
      }
      let target = unsafe { &*ptr };
      if target.passkey != 0 && !source.has_passkey(target.passkey) {
        continue;
      }
      accepted |= target.log(&view, &guard, ctx);
    }

    if !accepted {
      self.default_target.log(&view, &guard, ctx);
    }
    drop(guard);
    Ok(())
  }

  /// Removes every target. Used at reconfiguration and teardown; the default
  /// target is not a slot resident and survives.
  pub fn clear(&self, ctx: &DispatchCtx) {
    for slot in 0..self.slots.len() {
      let _ = self.remove(slot, ctx);
    }
  }

  /// Visits every populated target.
  pub fn for_each(&self, ctx: &DispatchCtx, visitor: &mut dyn FnMut(usize, &Target)) {
    let _guard = ctx.gc.enter();
    for (slot, cell) in self.slots.iter().enumerate() {
      let ptr = cell.load(Ordering::Acquire);
      if is_real_slot(ptr) {
        visitor(slot, unsafe { &*ptr });
      }
    }
  }

  /// Zeroes one thread's stat stripes across all live targets; hooked to
  /// thread-slot release.
  pub fn reset_thread_stats(&self, thread_slot: usize, gc: &EpochGc) {
    let _guard = gc.enter();
    for cell in self.slots.iter() {
      let ptr = cell.load(Ordering::Acquire);
      if is_real_slot(ptr) {
        let target = unsafe { &*ptr };
        if let Some(stats) = &target.stats {
          stats.reset_thread(thread_slot);
        }
      }
    }
    if let Some(stats) = &self.default_target.stats {
      stats.reset_thread(thread_slot);
    }
  }
}

impl Drop for TargetTable {
  fn drop(&mut self) {
    // Teardown: no readers remain.
    for cell in self.slots.iter() {
      let ptr = cell.swap(SLOT_EMPTY, Ordering::AcqRel);
      if is_real_slot(ptr) {
        let target = unsafe { Arc::from_raw(ptr as *const Target) };
        let _ = target.stop();
        drop(target);
      }
    }
  }
}
