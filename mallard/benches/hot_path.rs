use criterion::{criterion_group, criterion_main, Criterion};
use mallard::bitset::RollingBitset;
use mallard::engine::{Engine, EngineParams};
use mallard::filter::FilterRegistry;
use mallard::format::Formatter;
use mallard::record::LogLevel;
use mallard::selector::SelectorRegistry;
use mallard::target::{MemoryWriter, Target};
use std::hint::black_box;
use std::sync::Arc;

fn engine_with_memory_target() -> (Engine, Arc<MemoryWriter>) {
  let engine = Engine::init(EngineParams {
    max_threads: 32,
    max_log_targets: 8,
    ..EngineParams::default()
  })
  .unwrap();
  let selectors = SelectorRegistry::new();
  let filters = FilterRegistry::new();
  let formatter = Arc::new(Formatter::compile("${level} ${msg}", &selectors, &filters).unwrap());
  let mem = MemoryWriter::new();
  engine
    .add_target(Target::new("mem", Box::new(Arc::clone(&mem))).with_formatter(formatter))
    .unwrap();
  (engine, mem)
}

fn bench_can_log(c: &mut Criterion) {
  let (engine, _mem) = engine_with_memory_target();
  let logger = engine.logger("bench.reject").unwrap();

  c.bench_function("can_log_rejected", |b| {
    b.iter(|| black_box(logger.can_log(black_box(LogLevel::DIAG))))
  });
  engine.terminate().unwrap();
}

fn bench_text_log(c: &mut Criterion) {
  let (engine, mem) = engine_with_memory_target();
  let logger = engine.logger("bench.text").unwrap();

  c.bench_function("text_log_dispatch", |b| {
    b.iter(|| {
      mallard::info!(logger, "benchmark message {}", black_box(42));
    })
  });
  black_box(mem.line_count());
  engine.terminate().unwrap();
}

fn bench_binary_log(c: &mut Criterion) {
  let (engine, mem) = engine_with_memory_target();
  let logger = engine.logger("bench.binary").unwrap();

  c.bench_function("binary_log_dispatch", |b| {
    b.iter(|| {
      mallard::log_cached!(
        logger,
        LogLevel::INFO,
        "benchmark message {}",
        black_box(42u64)
      );
    })
  });
  black_box(mem.line_count());
  engine.terminate().unwrap();
}

fn bench_bitset_insert(c: &mut Criterion) {
  c.bench_function("bitset_insert_query", |b| {
    let bits = RollingBitset::new(4096);
    let mut next = 0u64;
    b.iter(|| {
      bits.insert(next);
      next += 1;
      black_box(bits.query_full_prefix())
    })
  });
}

criterion_group!(
  benches,
  bench_can_log,
  bench_text_log,
  bench_binary_log,
  bench_bitset_insert
);
criterion_main!(benches);
