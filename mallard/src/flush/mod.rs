//! # Flush Policies
//!
//! Predicates that decide when a target should flush its buffered output,
//! evaluated after every written record over `(bytes_since_flush,
//! msgs_since_flush, now)`. The same AND/OR/NOT algebra as record filters
//! applies, over the primitives `count`, `size`, `time`, `immediate` and
//! `never`.

mod __test__;

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub trait FlushPolicy: Send + Sync {
  fn should_flush(&self, bytes_since_flush: u64, msgs_since_flush: u64, now_nanos: u64) -> bool;

  /// Notification that a flush was executed, for time-based policies.
  fn on_flush(&self, _now_nanos: u64) {}
}

/// Flush after every record.
pub struct ImmediateFlushPolicy;

impl FlushPolicy for ImmediateFlushPolicy {
  #[inline]
  fn should_flush(&self, _bytes: u64, _msgs: u64, _now: u64) -> bool {
    true
  }
}

/// Never flush; the sink flushes on its own schedule (or at stop).
pub struct NeverFlushPolicy;

impl FlushPolicy for NeverFlushPolicy {
  #[inline]
  fn should_flush(&self, _bytes: u64, _msgs: u64, _now: u64) -> bool {
    false
  }
}

/// Flush once at least `every_msgs` records accumulated.
pub struct CountFlushPolicy {
  pub every_msgs: u64,
}

impl FlushPolicy for CountFlushPolicy {
  #[inline]
  fn should_flush(&self, _bytes: u64, msgs: u64, _now: u64) -> bool {
    msgs >= self.every_msgs
  }
}

/// Flush once at least `bytes` accumulated.
pub struct SizeFlushPolicy {
  pub bytes: u64,
}

impl FlushPolicy for SizeFlushPolicy {
  #[inline]
  fn should_flush(&self, bytes: u64, _msgs: u64, _now: u64) -> bool {
    bytes >= self.bytes
  }
}

/// Flush when at least `period_nanos` elapsed since the previous flush.
pub struct TimeFlushPolicy {
  period_nanos: u64,
  last_flush: AtomicU64,
}

impl TimeFlushPolicy {
  pub fn new(period_nanos: u64) -> Self {
    Self {
      period_nanos: period_nanos.max(1),
      last_flush: AtomicU64::new(0),
    }
  }
}

impl FlushPolicy for TimeFlushPolicy {
  fn should_flush(&self, _bytes: u64, msgs: u64, now: u64) -> bool {
    if msgs == 0 {
      return false;
    }
    let last = self.last_flush.load(Ordering::Relaxed);
    now.saturating_sub(last) >= self.period_nanos
  }

  fn on_flush(&self, now_nanos: u64) {
    self.last_flush.store(now_nanos, Ordering::Relaxed);
  }
}

pub struct AndFlushPolicy(pub Vec<Arc<dyn FlushPolicy>>);

impl FlushPolicy for AndFlushPolicy {
  fn should_flush(&self, bytes: u64, msgs: u64, now: u64) -> bool {
    self.0.iter().all(|p| p.should_flush(bytes, msgs, now))
  }

  fn on_flush(&self, now: u64) {
    for policy in &self.0 {
      policy.on_flush(now);
    }
  }
}

pub struct OrFlushPolicy(pub Vec<Arc<dyn FlushPolicy>>);

impl FlushPolicy for OrFlushPolicy {
  fn should_flush(&self, bytes: u64, msgs: u64, now: u64) -> bool {
    self.0.iter().any(|p| p.should_flush(bytes, msgs, now))
  }

  fn on_flush(&self, now: u64) {
    for policy in &self.0 {
      policy.on_flush(now);
    }
  }
}

pub struct NotFlushPolicy(pub Arc<dyn FlushPolicy>);

impl FlushPolicy for NotFlushPolicy {
  fn should_flush(&self, bytes: u64, msgs: u64, now: u64) -> bool {
    !self.0.should_flush(bytes, msgs, now)
  }

  fn on_flush(&self, now: u64) {
    self.0.on_flush(now);
  }
}

/// Parses a duration like `200ms`, `5s`, `3us` or `1m` into nanoseconds.
pub fn parse_duration_nanos(spec: &str) -> EngineResult<u64> {
  let digits_end = spec
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(spec.len());
  let (number, unit) = spec.split_at(digits_end);
  let value: u64 = number
    .parse()
    .map_err(|_| EngineError::InvalidConfig(format!("bad duration '{}'", spec)))?;
  let nanos = match unit {
    "ns" => value,
    "us" => value * 1_000,
    "ms" => value * 1_000_000,
    "s" | "" => value * 1_000_000_000,
    "m" => value * 60 * 1_000_000_000,
    _ => {
      return Err(EngineError::InvalidConfig(format!(
        "bad duration unit '{}'",
        unit
      )))
    },
  };
  Ok(nanos)
}

pub type FlushPolicyCtor =
  Box<dyn Fn(&[String]) -> EngineResult<Arc<dyn FlushPolicy>> + Send + Sync>;

/// Registry of named flush-policy constructors, consulted when parsing
/// configuration specs like `count:100`, `size:4096` or `time:200ms`.
pub struct FlushPolicyRegistry {
  ctors: RwLock<HashMap<String, FlushPolicyCtor>>,
}

impl Default for FlushPolicyRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl FlushPolicyRegistry {
  pub fn new() -> Self {
    let registry = Self {
      ctors: RwLock::new(HashMap::new()),
    };
    registry
      .register("immediate", Box::new(|_| Ok(Arc::new(ImmediateFlushPolicy))))
      .expect("builtin flush policy registration");
    registry
      .register("never", Box::new(|_| Ok(Arc::new(NeverFlushPolicy))))
      .expect("builtin flush policy registration");
    registry
      .register(
        "count",
        Box::new(|args| {
          let every_msgs = single_u64_arg("count", args)?;
          Ok(Arc::new(CountFlushPolicy { every_msgs }))
        }),
      )
      .expect("builtin flush policy registration");
    registry
      .register(
        "size",
        Box::new(|args| {
          let bytes = single_u64_arg("size", args)?;
          Ok(Arc::new(SizeFlushPolicy { bytes }))
        }),
      )
      .expect("builtin flush policy registration");
    registry
      .register(
        "time",
        Box::new(|args| {
          if args.len() != 1 {
            return Err(EngineError::InvalidConfig(
              "time flush policy expects one duration argument".to_string(),
            ));
          }
          Ok(Arc::new(TimeFlushPolicy::new(parse_duration_nanos(
            &args[0],
          )?)))
        }),
      )
      .expect("builtin flush policy registration");
    registry
  }

  pub fn register(&self, name: &str, ctor: FlushPolicyCtor) -> EngineResult<()> {
    let mut ctors = self.ctors.write().unwrap();
    if ctors.contains_key(name) {
      return Err(EngineError::DuplicateName(name.to_string()));
    }
    ctors.insert(name.to_string(), ctor);
    Ok(())
  }

  pub fn construct(&self, name: &str, args: &[String]) -> EngineResult<Arc<dyn FlushPolicy>> {
    let ctors = self.ctors.read().unwrap();
    let ctor = ctors
      .get(name)
      .ok_or_else(|| EngineError::UnknownFlushPolicy(name.to_string()))?;
    ctor(args)
  }
}

fn single_u64_arg(name: &str, args: &[String]) -> EngineResult<u64> {
  if args.len() != 1 {
    return Err(EngineError::InvalidConfig(format!(
      "{} flush policy expects one argument",
      name
    )));
  }
  args[0]
    .parse()
    .map_err(|_| EngineError::InvalidConfig(format!("bad {} argument '{}'", name, args[0])))
}

/// Parses a flush policy spec: `name`, `name:arg`, or the combinators
/// `and(a:1, b:2)`, `or(...)`, `not(...)`.
pub fn parse_flush_policy(
  spec: &str,
  registry: &FlushPolicyRegistry,
) -> EngineResult<Arc<dyn FlushPolicy>> {
  let spec = spec.trim();

  if let Some(rest) = spec.strip_prefix("and(").and_then(|s| s.strip_suffix(')')) {
    return Ok(Arc::new(AndFlushPolicy(parse_policy_list(rest, registry)?)));
  }
  if let Some(rest) = spec.strip_prefix("or(").and_then(|s| s.strip_suffix(')')) {
    return Ok(Arc::new(OrFlushPolicy(parse_policy_list(rest, registry)?)));
  }
  if let Some(rest) = spec.strip_prefix("not(").and_then(|s| s.strip_suffix(')')) {
    return Ok(Arc::new(NotFlushPolicy(parse_flush_policy(rest, registry)?)));
  }

  let (name, args) = match spec.split_once(':') {
    Some((name, arg)) => (name.trim(), vec![arg.trim().to_string()]),
    None => (spec, Vec::new()),
  };
  registry.construct(name, &args)
}

fn parse_policy_list(
  list: &str,
  registry: &FlushPolicyRegistry,
) -> EngineResult<Vec<Arc<dyn FlushPolicy>>> {
  list
    .split(',')
    .map(|part| parse_flush_policy(part, registry))
    .collect()
}
