#[cfg(test)]
mod __test__ {

  use crate::error::EngineError;
  use crate::filter::{FilterRegistry, parse_filter};
  use crate::flush::CountFlushPolicy;
  use crate::format::{FormatContext, Formatter, ProcessInfo};
  use crate::gc::{EpochGc, ThreadSlotRegistry};
  use crate::msg_cache::MsgCache;
  use crate::codec::UdtRegistry;
  use crate::preinit::PreInitQueue;
  use crate::record::{current_thread_info, LogLevel, LogRecord, Payload, SourceLocation};
  use crate::selector::SelectorRegistry;
  use crate::source::SourceTree;
  use crate::target::*;
  use std::sync::Arc;

  fn make_ctx() -> DispatchCtx {
    DispatchCtx {
      gc: Arc::new(EpochGc::new(ThreadSlotRegistry::new(32), 64, 1024)),
      msg_cache: Arc::new(MsgCache::new()),
      udt: Arc::new(UdtRegistry::new()),
      format: FormatContext {
        process: Arc::new(ProcessInfo::detect(None)),
      },
    }
  }

  fn formatter(pattern: &str) -> Arc<Formatter> {
    let selectors = SelectorRegistry::new();
    let filters = FilterRegistry::new();
    Arc::new(Formatter::compile(pattern, &selectors, &filters).unwrap())
  }

  fn make_table() -> (TargetTable, Arc<MemoryWriter>) {
    let default_mem = MemoryWriter::new();
    let default_target = Target::new("default", Box::new(Arc::clone(&default_mem)))
      .with_formatter(formatter("${msg}"));
    (TargetTable::new(8, default_target), default_mem)
  }

  fn record(n: u64, level: LogLevel, msg: &str) -> LogRecord {
    let (tid, tname) = current_thread_info();
    LogRecord {
      record_id: n,
      time_unix_nanos: 1_700_000_000_000_000_000,
      time_mono_nanos: n,
      level,
      thread_id: tid,
      thread_name: tname,
      location: SourceLocation::UNKNOWN,
      source_id: 1,
      source_name: "test".into(),
      payload: Payload::Text(msg.to_string()),
      flags: 0,
    }
  }

  fn memory_target(name: &str, mem: &Arc<MemoryWriter>) -> Target {
    Target::new(name, Box::new(Arc::clone(mem)))
      .with_formatter(formatter("${msg}"))
      .with_stats(32)
  }

  #[test]
  fn test_add_and_dispatch() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::INFO);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    let slot = table
      .add(memory_target("mem", &mem), &ctx, &preinit)
      .unwrap();
    assert_eq!(table.target_count(), 1);

    table
      .dispatch(&record(1, LogLevel::INFO, "hello"), &source, &ctx)
      .unwrap();
    assert_eq!(mem.lines(), vec!["hello".to_string()]);

    let target = table.get(slot, &ctx).unwrap();
    assert_eq!(target.slot_id(), slot);
    let stats = target.stats().unwrap();
    assert_eq!(stats.msg_submitted, 1);
    assert_eq!(stats.msg_written, 1);
    assert_eq!(stats.bytes_written, 5);
  }

  #[test]
  fn test_duplicate_name_rejected() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let mem = MemoryWriter::new();
    table
      .add(memory_target("dup", &mem), &ctx, &preinit)
      .unwrap();
    match table.add(memory_target("dup", &mem), &ctx, &preinit) {
      Err(EngineError::DuplicateName(name)) => assert_eq!(name, "dup"),
      other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn test_table_full_and_slot_reuse() {
    let ctx = make_ctx();
    let default_target = Target::new("default", Box::new(ConsoleWriter::stderr()));
    let table = TargetTable::new(2, default_target);
    let preinit = PreInitQueue::new(16);
    let mem = MemoryWriter::new();

    let s0 = table.add(memory_target("a", &mem), &ctx, &preinit).unwrap();
    let s1 = table.add(memory_target("b", &mem), &ctx, &preinit).unwrap();
    assert_ne!(s0, s1);
    assert!(matches!(
      table.add(memory_target("c", &mem), &ctx, &preinit),
      Err(EngineError::TableFull)
    ));

    table.remove(s0, &ctx).unwrap();
    assert!(table.get(s0, &ctx).is_none());
    let s2 = table.add(memory_target("c", &mem), &ctx, &preinit).unwrap();
    assert_eq!(s2, s0);
  }

  #[test]
  fn test_remove_missing_slot() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    assert!(matches!(
      table.remove(3, &ctx),
      Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
      table.remove(99, &ctx),
      Err(EngineError::NotFound(_))
    ));
  }

  #[test]
  fn test_level_floor_rejects() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    let target = memory_target("floored", &mem).with_level_floor(LogLevel::WARN);
    let slot = table.add(target, &ctx, &preinit).unwrap();

    table
      .dispatch(&record(1, LogLevel::ERROR, "in"), &source, &ctx)
      .unwrap();
    table
      .dispatch(&record(2, LogLevel::INFO, "out"), &source, &ctx)
      .unwrap();

    assert_eq!(mem.lines(), vec!["in".to_string()]);
    let stats = table.get(slot, &ctx).unwrap().stats().unwrap();
    assert_eq!(stats.msg_submitted, 1);
    assert_eq!(stats.msg_discarded, 1);
  }

  #[test]
  fn test_target_filter_discard_accounting() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let registry = FilterRegistry::new();
    let only_magic = parse_filter("msg == magic", &registry).unwrap();

    let mem = MemoryWriter::new();
    let target = memory_target("filtered", &mem).with_filter(only_magic);
    let slot = table.add(target, &ctx, &preinit).unwrap();

    table
      .dispatch(&record(1, LogLevel::INFO, "magic"), &source, &ctx)
      .unwrap();
    table
      .dispatch(&record(2, LogLevel::INFO, "mundane"), &source, &ctx)
      .unwrap();

    assert_eq!(mem.lines(), vec!["magic".to_string()]);
    let stats = table.get(slot, &ctx).unwrap().stats().unwrap();
    assert_eq!(stats.msg_submitted, 1);
    assert_eq!(stats.msg_discarded, 1);
  }

  #[test]
  fn test_affinity_mask_routing() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem_a = MemoryWriter::new();
    let mem_b = MemoryWriter::new();
    let slot_a = table
      .add(memory_target("a", &mem_a), &ctx, &preinit)
      .unwrap();
    let _slot_b = table
      .add(memory_target("b", &mem_b), &ctx, &preinit)
      .unwrap();

    // Route the source only to target a
    source.set_affinity_mask(0);
    source.bind_target_slot(slot_a);

    table
      .dispatch(&record(1, LogLevel::INFO, "routed"), &source, &ctx)
      .unwrap();
    assert_eq!(mem_a.line_count(), 1);
    assert_eq!(mem_b.line_count(), 0);
  }

  #[test]
  fn test_passkey_routing() {
    let ctx = make_ctx();
    let (table, default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let holder = tree.define("holder", true).unwrap();
    let outsider = tree.define("outsider", true).unwrap();
    holder.add_passkey(0xCAFE);

    let mem = MemoryWriter::new();
    let target = memory_target("private", &mem).with_passkey(0xCAFE);
    table.add(target, &ctx, &preinit).unwrap();

    table
      .dispatch(&record(1, LogLevel::INFO, "from holder"), &holder, &ctx)
      .unwrap();
    table
      .dispatch(&record(2, LogLevel::INFO, "from outsider"), &outsider, &ctx)
      .unwrap();

    // The outsider's record went to the default target, not the private one
    assert_eq!(mem.lines(), vec!["from holder".to_string()]);
    assert_eq!(default_mem.lines(), vec!["from outsider".to_string()]);
  }

  #[test]
  fn test_preinit_drains_into_first_target() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    for n in 0..4 {
      preinit.push(record(n, LogLevel::INFO, &format!("early {}", n)));
    }

    let mem = MemoryWriter::new();
    table
      .add(memory_target("first", &mem), &ctx, &preinit)
      .unwrap();
    assert_eq!(
      mem.lines(),
      vec!["early 0", "early 1", "early 2", "early 3"]
    );
    assert!(preinit.is_empty());

    // A second target gets no replay
    let mem2 = MemoryWriter::new();
    table
      .add(memory_target("second", &mem2), &ctx, &preinit)
      .unwrap();
    assert_eq!(mem2.line_count(), 0);
  }

  #[test]
  fn test_replace_formatter_under_use() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    let slot = table
      .add(memory_target("swappable", &mem), &ctx, &preinit)
      .unwrap();

    table
      .dispatch(&record(1, LogLevel::INFO, "one"), &source, &ctx)
      .unwrap();
    table
      .replace_formatter(slot, formatter("XXX ${msg}"), &ctx)
      .unwrap();
    table
      .dispatch(&record(2, LogLevel::INFO, "two"), &source, &ctx)
      .unwrap();

    assert_eq!(mem.lines(), vec!["one".to_string(), "XXX two".to_string()]);
  }

  #[test]
  fn test_flush_policy_accounting() {
    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    let target = memory_target("flushing", &mem)
      .with_flush_policy(Arc::new(CountFlushPolicy { every_msgs: 2 }));
    let slot = table.add(target, &ctx, &preinit).unwrap();

    for n in 0..4 {
      table
        .dispatch(&record(n, LogLevel::INFO, "x"), &source, &ctx)
        .unwrap();
    }
    let stats = table.get(slot, &ctx).unwrap().stats().unwrap();
    assert_eq!(stats.flush_submitted, 2);
    assert_eq!(stats.flush_executed, 2);
  }

  #[test]
  fn test_binary_record_dispatch() {
    use crate::codec::Encodable;
    use crate::record::FLAG_BINARY;

    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    table
      .add(memory_target("bin", &mem), &ctx, &preinit)
      .unwrap();

    let template_id = ctx.msg_cache.cache("hello {}");
    let mut args = Vec::new();
    42i32.encode_arg(&mut args);
    let mut rec = record(1, LogLevel::INFO, "");
    rec.payload = Payload::Binary {
      template_id,
      args,
      arg_count: 1,
    };
    rec.flags |= FLAG_BINARY;

    table.dispatch(&rec, &source, &ctx).unwrap();
    assert_eq!(mem.lines(), vec!["hello 42".to_string()]);

    // Unknown template id surfaces the cache miss
    let mut bad = record(2, LogLevel::INFO, "");
    bad.payload = Payload::Binary {
      template_id: 9999,
      args: Vec::new(),
      arg_count: 0,
    };
    bad.flags |= FLAG_BINARY;
    assert!(matches!(
      table.dispatch(&bad, &source, &ctx),
      Err(EngineError::FormatCacheMiss(9999))
    ));
    assert_eq!(mem.line_count(), 1);
  }

  #[test]
  fn test_remove_while_logging_concurrently() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    let ctx = make_ctx();
    let (table, _default_mem) = make_table();
    let table = Arc::new(table);
    let preinit = PreInitQueue::new(16);
    let tree = SourceTree::new(LogLevel::DIAG);
    let source = tree.define("test", true).unwrap();

    let mem = MemoryWriter::new();
    let slot = table
      .add(memory_target("victim", &mem), &ctx, &preinit)
      .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for t in 0..4 {
      let table = Arc::clone(&table);
      let ctx = ctx.clone();
      let stop = Arc::clone(&stop);
      let source = Arc::clone(&source);
      handles.push(thread::spawn(move || {
        let mut n = 0u64;
        while !stop.load(Ordering::Relaxed) {
          let rec = record(t * 1_000_000 + n, LogLevel::INFO, "spin");
          let _ = table.dispatch(&rec, &source, &ctx);
          n += 1;
        }
      }));
    }

    thread::sleep(std::time::Duration::from_millis(50));
    table.remove(slot, &ctx).unwrap();
    assert!(table.get(slot, &ctx).is_none());
    stop.store(true, Ordering::Relaxed);
    for h in handles {
      h.join().unwrap();
    }
    ctx.gc.recycle();
  }
}
