//! # Engine Module
//!
//! The engine handle owns every piece of global state the logging pipeline
//! touches: the source tree, the target slot table, the epoch collector, the
//! format message cache, the registries, the pre-init queue and the time
//! source. All public APIs operate on an [`Engine`]; a process-wide default
//! engine is offered as a convenience for hosts that want free-function
//! ergonomics.


use crate::codec::UdtRegistry;
use crate::config::SchemeRegistry;
use crate::error::{EngineError, EngineResult};
use crate::filter::{Filter, FilterRegistry};
use crate::flush::{FlushPolicy, FlushPolicyRegistry};
use crate::format::{FormatContext, Formatter, ProcessInfo, DEFAULT_FORMAT};
use crate::gc::{ComponentHandle, EpochGc, ThreadSlotRegistry};
use crate::logger::Logger;
use crate::msg_cache::MsgCache;
use crate::preinit::{PreInitQueue, DEFAULT_PRE_INIT_CAPACITY};
use crate::record::{
  current_thread_info, mono_clock_nanos, LogLevel, LogRecord, Payload, RecordView, SourceLocation,
  FLAG_LIFE_SIGN_CANDIDATE,
};
use crate::selector::SelectorRegistry;
use crate::source::{LogSource, PropagateMode, SourceTree};
use crate::stats::LevelStats;
use crate::target::{ConsoleWriter, DispatchCtx, Target, TargetTable};
use crate::time::TimeSource;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineParams {
  pub max_threads: usize,
  pub max_log_targets: usize,
  pub enable_lazy_time_source: bool,
  pub lazy_time_resolution: Duration,
  pub enable_statistics: bool,
  pub pre_init_queue_size: usize,
  /// Threshold for the engine's own self-log stream.
  pub report_level: LogLevel,
  /// Application name reported by the `${app}` selector.
  pub app_name: Option<String>,
  /// Retires between automatic reclamation passes.
  pub gc_frequency: u64,
  /// Optional background reclamation sweep.
  pub gc_sweep_period: Option<Duration>,
}

impl Default for EngineParams {
  fn default() -> Self {
    Self {
      max_threads: 256,
      max_log_targets: 256,
      enable_lazy_time_source: false,
      lazy_time_resolution: Duration::from_millis(1),
      enable_statistics: true,
      pre_init_queue_size: DEFAULT_PRE_INIT_CAPACITY,
      report_level: LogLevel::WARN,
      app_name: None,
      gc_frequency: 1024,
      gc_sweep_period: None,
    }
  }
}

type LifeSignHandler = Box<dyn Fn(&LogRecord) + Send + Sync>;

/// All engine state; shared behind an `Arc` by loggers and the bridge layer.
pub struct EngineCore {
  params: EngineParams,
  gc: Arc<EpochGc>,
  sources: SourceTree,
  targets: TargetTable,
  msg_cache: Arc<MsgCache>,
  udt: Arc<UdtRegistry>,
  selectors: SelectorRegistry,
  filters: FilterRegistry,
  flush_policies: FlushPolicyRegistry,
  schemes: SchemeRegistry,
  preinit: PreInitQueue,
  time: TimeSource,
  record_seq: AtomicU64,
  default_formatter: RwLock<Arc<Formatter>>,
  format_ctx: FormatContext,
  report_level: AtomicU8,
  level_stats: LevelStats,
  life_sign: RwLock<Option<LifeSignHandler>>,
  global_life_sign_filter: ComponentHandle<dyn Filter>,
  sweeper: Mutex<Option<(crossbeam_channel::Sender<()>, JoinHandle<()>)>>,
}

impl std::fmt::Debug for EngineCore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EngineCore")
      .field("sources", &self.sources)
      .field("targets", &self.targets)
      .finish()
  }
}

impl EngineCore {
  #[inline]
  pub fn dispatch_ctx(&self) -> DispatchCtx {
    DispatchCtx {
      gc: Arc::clone(&self.gc),
      msg_cache: Arc::clone(&self.msg_cache),
      udt: Arc::clone(&self.udt),
      format: self.format_ctx.clone(),
    }
  }

  pub fn params(&self) -> &EngineParams {
    &self.params
  }

  pub fn gc(&self) -> &Arc<EpochGc> {
    &self.gc
  }

  pub fn sources(&self) -> &SourceTree {
    &self.sources
  }

  pub fn targets(&self) -> &TargetTable {
    &self.targets
  }

  pub fn msg_cache(&self) -> &Arc<MsgCache> {
    &self.msg_cache
  }

  pub fn udt(&self) -> &Arc<UdtRegistry> {
    &self.udt
  }

  pub fn selectors(&self) -> &SelectorRegistry {
    &self.selectors
  }

  pub fn filters(&self) -> &FilterRegistry {
    &self.filters
  }

  pub fn flush_policies(&self) -> &FlushPolicyRegistry {
    &self.flush_policies
  }

  pub fn schemes(&self) -> &SchemeRegistry {
    &self.schemes
  }

  pub fn preinit(&self) -> &PreInitQueue {
    &self.preinit
  }

  pub fn level_stats(&self) -> &LevelStats {
    &self.level_stats
  }

  pub fn default_formatter(&self) -> Arc<Formatter> {
    Arc::clone(&self.default_formatter.read().unwrap())
  }

  pub fn report_level(&self) -> LogLevel {
    LogLevel::from_u8(self.report_level.load(Ordering::Relaxed))
  }

  pub fn set_report_level(&self, level: LogLevel) {
    self.report_level.store(level as u8, Ordering::Relaxed);
  }

  /// Assembles a record with the next sequence id and the configured time
  /// source.
  pub fn make_record(
    &self,
    source: &LogSource,
    level: LogLevel,
    location: SourceLocation,
    payload: Payload,
    flags: u32,
  ) -> LogRecord {
    let (thread_id, thread_name) = current_thread_info();
    LogRecord {
      record_id: self.record_seq.fetch_add(1, Ordering::Relaxed) + 1,
      time_unix_nanos: self.time.now_unix_nanos(),
      time_mono_nanos: mono_clock_nanos(),
      level,
      thread_id,
      thread_name,
      location,
      source_id: source.id(),
      source_name: Arc::clone(source.qualified_name()),
      payload,
      flags,
    }
  }

  /// The post-filter half of the fast path: life-sign, pre-init capture, and
  /// target dispatch.
  pub fn submit(&self, record: LogRecord, source: &LogSource) {
    let thread_slot = self.gc.thread_slots().current_slot().unwrap_or(0);
    self.level_stats.record(thread_slot, record.level);

    let ctx = self.dispatch_ctx();

    // Per-source filter, then the life-sign side channel.
    {
      let guard = self.gc.enter();
      if let Some(filter) = source.filter.load(&guard) {
        let view = RecordView {
          record: &record,
          msg: record.text(),
        };
        if !filter.accept(&view) {
          return;
        }
      }
      self.dispatch_life_sign_guarded(&record, source, &guard);
    }

    if !self.targets.has_targets() {
      self.preinit.push(record);
      return;
    }

    if let Err(err) = self.targets.dispatch(&record, source, &ctx) {
      // Fast path never propagates errors; account and self-log instead.
      if let Some(stats) = self.targets.default_target().stats_block() {
        stats.msg_discarded.incr(thread_slot);
      }
      self.report(LogLevel::ERROR, &format!("record dropped: {}", err));
    }
  }

  fn dispatch_life_sign_guarded(
    &self,
    record: &LogRecord,
    source: &LogSource,
    guard: &crate::gc::EpochGuard<'_>,
  ) {
    let handlers = self.life_sign.read().unwrap();
    let Some(handler) = handlers.as_ref() else {
      return;
    };

    let view = RecordView {
      record,
      msg: record.text(),
    };
    let mut admitted = record.flags & FLAG_LIFE_SIGN_CANDIDATE != 0;
    if !admitted {
      if let Some(filter) = self.global_life_sign_filter.load(guard) {
        admitted = filter.accept(&view);
      }
    }
    if !admitted {
      if let Some(filter) = source.life_sign_filter.load(guard) {
        admitted = filter.accept(&view);
      }
    }
    if admitted {
      handler(record);
    }
  }

  /// The engine's own diagnostics stream: formatted through the default
  /// formatter and written to the default target, gated by the report level.
  pub fn report(&self, level: LogLevel, msg: &str) {
    if !level.admitted_by(self.report_level()) {
      return;
    }
    let record = self.make_record(
      self.sources.root(),
      level,
      SourceLocation::UNKNOWN,
      Payload::Text(format!("[mallard] {}", msg)),
      0,
    );
    let view = RecordView {
      record: &record,
      msg: record.text(),
    };
    let ctx = self.dispatch_ctx();
    let guard = self.gc.enter();
    self.targets.default_target().log(&view, &guard, &ctx);
  }
}

/// The engine handle.
#[derive(Debug, Clone)]
pub struct Engine {
  core: Arc<EngineCore>,
}

impl Engine {
  /// Builds and starts an engine.
  pub fn init(params: EngineParams) -> EngineResult<Engine> {
    let thread_slots = ThreadSlotRegistry::new(params.max_threads.max(1));
    // Epoch values are dense, so size the ring generously past the thread
    // count to keep `insert` from ever spinning in practice.
    let ring_words = (params.max_threads.max(1) * 4).next_power_of_two().max(1024);
    let gc = Arc::new(EpochGc::new(
      Arc::clone(&thread_slots),
      params.gc_frequency,
      ring_words,
    ));

    let selectors = SelectorRegistry::new();
    let filters = FilterRegistry::new();
    let flush_policies = FlushPolicyRegistry::new();
    let default_formatter = Arc::new(Formatter::compile(DEFAULT_FORMAT, &selectors, &filters)?);

    let format_ctx = FormatContext {
      process: Arc::new(ProcessInfo::detect(params.app_name.clone())),
    };

    let mut default_target = Target::new("default", Box::new(ConsoleWriter::stderr()))
      .with_formatter(Arc::clone(&default_formatter));
    if params.enable_statistics {
      default_target = default_target.with_stats(params.max_threads);
    }

    let time = if params.enable_lazy_time_source {
      TimeSource::lazy(params.lazy_time_resolution)
    } else {
      TimeSource::direct()
    };

    let core = Arc::new(EngineCore {
      gc,
      sources: SourceTree::new(LogLevel::INFO),
      targets: TargetTable::new(params.max_log_targets.max(1), default_target),
      msg_cache: Arc::new(MsgCache::new()),
      udt: Arc::new(UdtRegistry::new()),
      selectors,
      filters,
      flush_policies,
      schemes: SchemeRegistry::new(),
      preinit: PreInitQueue::new(params.pre_init_queue_size.max(1)),
      time,
      record_seq: AtomicU64::new(0),
      default_formatter: RwLock::new(default_formatter),
      format_ctx,
      report_level: AtomicU8::new(params.report_level as u8),
      level_stats: LevelStats::new(params.max_threads),
      life_sign: RwLock::new(None),
      global_life_sign_filter: ComponentHandle::new(None),
      sweeper: Mutex::new(None),
      params,
    });

    // Departing threads zero their stat stripes everywhere.
    let weak: Weak<EngineCore> = Arc::downgrade(&core);
    core
      .gc
      .thread_slots()
      .set_release_hook(Box::new(move |slot| {
        if let Some(core) = weak.upgrade() {
          core.targets.reset_thread_stats(slot, &core.gc);
          core.level_stats.reset_thread(slot);
        }
      }));

    if let Some(period) = core.params.gc_sweep_period {
      let (tx, rx) = crossbeam_channel::bounded::<()>(1);
      let gc = Arc::clone(&core.gc);
      let handle = std::thread::Builder::new()
        .name("mallard-gc".to_string())
        .spawn(move || loop {
          match rx.recv_timeout(period) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => gc.recycle(),
          }
        })?;
      *core.sweeper.lock().unwrap() = Some((tx, handle));
    }

    Ok(Engine { core })
  }

  pub fn core(&self) -> &Arc<EngineCore> {
    &self.core
  }

  /// Stops background threads, removes every target and reclaims retired
  /// objects.
  pub fn terminate(&self) -> EngineResult<()> {
    if let Some((tx, handle)) = self.core.sweeper.lock().unwrap().take() {
      let _ = tx.try_send(());
      let _ = handle.join();
    }
    let ctx = self.core.dispatch_ctx();
    self.core.targets.clear(&ctx);
    self.core.time.shutdown();
    self.core.gc.recycle();
    Ok(())
  }

  /// Obtains a logger bound to a source, creating the source path on first
  /// use.
  pub fn logger(&self, qualified_name: &str) -> EngineResult<Logger> {
    let source = self.core.sources.define(qualified_name, true)?;
    Ok(Logger::new(Arc::clone(&self.core), source))
  }

  /// Installs a target, filling in engine defaults for any component the
  /// builder left unset.
  pub fn add_target(&self, mut target: Target) -> EngineResult<usize> {
    if !target.has_formatter() {
      target = target.with_formatter(self.core.default_formatter());
    }
    if self.core.params.enable_statistics && target.stats_block().is_none() {
      target = target.with_stats(self.core.params.max_threads);
    }
    let ctx = self.core.dispatch_ctx();
    let slot = self.core.targets.add(target, &ctx, &self.core.preinit)?;
    self.core.report(
      LogLevel::NOTICE,
      &format!("log target added in slot {}", slot),
    );
    Ok(slot)
  }

  pub fn remove_target(&self, slot: usize) -> EngineResult<()> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.remove(slot, &ctx)
  }

  pub fn remove_target_by_name(&self, name: &str) -> EngineResult<()> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.remove_by_name(name, &ctx)
  }

  pub fn get_target(&self, slot: usize) -> Option<Arc<Target>> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.get(slot, &ctx)
  }

  pub fn get_target_by_name(&self, name: &str) -> Option<Arc<Target>> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.get_by_name(name, &ctx)
  }

  pub fn replace_formatter(&self, slot: usize, pattern: &str) -> EngineResult<()> {
    let formatter = Arc::new(Formatter::compile(
      pattern,
      &self.core.selectors,
      &self.core.filters,
    )?);
    let ctx = self.core.dispatch_ctx();
    self.core.targets.replace_formatter(slot, formatter, &ctx)
  }

  pub fn replace_filter(&self, slot: usize, filter: Arc<dyn Filter>) -> EngineResult<()> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.replace_filter(slot, filter, &ctx)
  }

  pub fn replace_flush_policy(&self, slot: usize, policy: Arc<dyn FlushPolicy>) -> EngineResult<()> {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.replace_flush_policy(slot, policy, &ctx)
  }

  /// Sets a source's level with subtree propagation.
  pub fn set_level(
    &self,
    qualified_name: &str,
    level: LogLevel,
    mode: PropagateMode,
  ) -> EngineResult<()> {
    let source = self.core.sources.define(qualified_name, true)?;
    self.core.sources.set_level(&source, level, mode);
    Ok(())
  }

  /// Restricts a source's routing to the named targets. Slots beyond the
  /// affinity mask width are joined through the target's passkey.
  pub fn bind_affinity(&self, qualified_name: &str, target_names: &[&str]) -> EngineResult<()> {
    let source = self.core.sources.define(qualified_name, true)?;
    let ctx = self.core.dispatch_ctx();
    source.set_affinity_mask(0);
    for name in target_names {
      let slot = self
        .core
        .targets
        .slot_by_name(name)
        .ok_or_else(|| EngineError::NotFound(format!("target '{}'", name)))?;
      source.bind_target_slot(slot);
      if let Some(target) = self.core.targets.get(slot, &ctx) {
        if target.passkey() != 0 {
          source.add_passkey(target.passkey());
        }
      }
    }
    Ok(())
  }

  /// Installs (or clears) a per-source record filter, published via the
  /// collector.
  pub fn set_source_filter(
    &self,
    qualified_name: &str,
    filter: Option<Arc<dyn Filter>>,
  ) -> EngineResult<()> {
    let source = self.core.sources.define(qualified_name, true)?;
    source.filter.replace(filter, &self.core.gc);
    Ok(())
  }

  pub fn set_source_life_sign_filter(
    &self,
    qualified_name: &str,
    filter: Option<Arc<dyn Filter>>,
  ) -> EngineResult<()> {
    let source = self.core.sources.define(qualified_name, true)?;
    source.life_sign_filter.replace(filter, &self.core.gc);
    Ok(())
  }

  pub fn set_global_life_sign_filter(&self, filter: Option<Arc<dyn Filter>>) {
    self
      .core
      .global_life_sign_filter
      .replace(filter, &self.core.gc);
  }

  /// Installs the life-sign hook invoked on the fast path for admitted
  /// records.
  pub fn set_life_sign_handler(&self, handler: Option<LifeSignHandler>) {
    *self.core.life_sign.write().unwrap() = handler;
  }

  /// Replaces the default format used by the default target and by targets
  /// added without an explicit formatter.
  pub fn set_default_format(&self, pattern: &str) -> EngineResult<()> {
    let formatter = Arc::new(Formatter::compile(
      pattern,
      &self.core.selectors,
      &self.core.filters,
    )?);
    *self.core.default_formatter.write().unwrap() = Arc::clone(&formatter);
    Ok(())
  }

  /// Removes every configured target. The built-in default target is not a
  /// slot resident and keeps receiving records, so nothing goes dark.
  pub fn clear_targets(&self) {
    let ctx = self.core.dispatch_ctx();
    self.core.targets.clear(&ctx);
  }

  pub fn purge_pre_init_queue(&self) {
    self.core.preinit.purge();
  }
}

// --- process-wide default engine ---------------------------------------------

static DEFAULT_ENGINE: RwLock<Option<Engine>> = RwLock::new(None);

/// Initializes the process-wide default engine.
pub fn init_default(params: EngineParams) -> EngineResult<Engine> {
  let mut slot = DEFAULT_ENGINE.write().unwrap();
  if slot.is_some() {
    return Err(EngineError::AlreadyInitialized);
  }
  let engine = Engine::init(params)?;
  *slot = Some(engine.clone());
  Ok(engine)
}

/// The default engine, if initialized.
pub fn default_engine() -> EngineResult<Engine> {
  DEFAULT_ENGINE
    .read()
    .unwrap()
    .clone()
    .ok_or(EngineError::NotInitialized)
}

pub fn is_initialized() -> bool {
  DEFAULT_ENGINE.read().unwrap().is_some()
}

/// Terminates and drops the default engine.
pub fn terminate_default() -> EngineResult<()> {
  let engine = {
    let mut slot = DEFAULT_ENGINE.write().unwrap();
    slot.take().ok_or(EngineError::NotInitialized)?
  };
  engine.terminate()
}
