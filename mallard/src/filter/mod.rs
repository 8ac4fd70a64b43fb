//! # Record Filters
//!
//! Composable boolean predicates over log records. Filters hang off log
//! sources (pre-dispatch) and log targets (per sink), and are combined with
//! AND/OR/NOT nodes around stateful leaves such as the every-N counter and
//! the rate limiter.
//!
//! A textual filter expression language is used by the configuration layer:
//!
//! ```text
//! level <= WARN
//! (src == db.pool AND level <= NOTICE) OR msg ~= timeout
//! NOT tname == worker-0
//! rate_limit(100, 1, seconds)
//! ```

mod __test__;

use crate::error::{EngineError, EngineResult};
use crate::record::{mono_clock_nanos, LogLevel, RecordView};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A predicate over one record.
pub trait Filter: Send + Sync {
  fn accept(&self, view: &RecordView<'_>) -> bool;

  /// Rate-limiting filters report the number of records they discarded in a
  /// closed window, exactly once, so the caller can synthesize a summary
  /// record. All other filters return `None`.
  fn take_discard_summary(&self) -> Option<u64> {
    None
  }
}

pub struct AndFilter(pub Vec<Arc<dyn Filter>>);

impl Filter for AndFilter {
  fn accept(&self, view: &RecordView<'_>) -> bool {
    self.0.iter().all(|f| f.accept(view))
  }

  fn take_discard_summary(&self) -> Option<u64> {
    self.0.iter().find_map(|f| f.take_discard_summary())
  }
}

pub struct OrFilter(pub Vec<Arc<dyn Filter>>);

impl Filter for OrFilter {
  fn accept(&self, view: &RecordView<'_>) -> bool {
    self.0.iter().any(|f| f.accept(view))
  }

  fn take_discard_summary(&self) -> Option<u64> {
    self.0.iter().find_map(|f| f.take_discard_summary())
  }
}

pub struct NotFilter(pub Arc<dyn Filter>);

impl Filter for NotFilter {
  fn accept(&self, view: &RecordView<'_>) -> bool {
    !self.0.accept(view)
  }
}

/// Comparison operators for level and value leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl CompareOp {
  pub fn parse(token: &str) -> Option<CompareOp> {
    match token {
      "==" => Some(CompareOp::Eq),
      "!=" => Some(CompareOp::Ne),
      "<" => Some(CompareOp::Lt),
      "<=" => Some(CompareOp::Le),
      ">" => Some(CompareOp::Gt),
      ">=" => Some(CompareOp::Ge),
      _ => None,
    }
  }

  #[inline]
  fn holds<T: Ord>(&self, lhs: T, rhs: T) -> bool {
    match self {
      CompareOp::Eq => lhs == rhs,
      CompareOp::Ne => lhs != rhs,
      CompareOp::Lt => lhs < rhs,
      CompareOp::Le => lhs <= rhs,
      CompareOp::Gt => lhs > rhs,
      CompareOp::Ge => lhs >= rhs,
    }
  }
}

/// Compares the record level against a constant.
///
/// Note the comparison is on severity rank, where smaller is more severe:
/// `level <= WARN` admits FATAL, ERROR and WARN.
pub struct LevelFilter {
  pub op: CompareOp,
  pub level: LogLevel,
}

impl Filter for LevelFilter {
  #[inline]
  fn accept(&self, view: &RecordView<'_>) -> bool {
    self.op.holds(view.record.level as u8, self.level as u8)
  }
}

/// Which record string a [`NameFilter`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameField {
  Source,
  File,
  Function,
  ThreadName,
  Msg,
}

impl NameField {
  pub fn parse(name: &str) -> Option<NameField> {
    match name {
      "src" => Some(NameField::Source),
      "file" => Some(NameField::File),
      "func" => Some(NameField::Function),
      "tname" => Some(NameField::ThreadName),
      "msg" => Some(NameField::Msg),
      _ => None,
    }
  }

  fn extract<'a>(&self, view: &'a RecordView<'_>) -> &'a str {
    match self {
      NameField::Source => &view.record.source_name,
      NameField::File => view.record.location.file,
      NameField::Function => view.record.location.function,
      NameField::ThreadName => &view.record.thread_name,
      NameField::Msg => view.msg,
    }
  }
}

pub enum NameMatcher {
  Literal(String),
  Pattern(Regex),
}

/// Matches a record string field against a literal or regex.
pub struct NameFilter {
  pub field: NameField,
  pub matcher: NameMatcher,
  pub negate: bool,
}

impl Filter for NameFilter {
  fn accept(&self, view: &RecordView<'_>) -> bool {
    let value = self.field.extract(view);
    let matched = match &self.matcher {
      NameMatcher::Literal(lit) => value == lit,
      NameMatcher::Pattern(re) => re.is_match(value),
    };
    matched != self.negate
  }
}

/// Passes every Nth call: the 1st, (N+1)th, (2N+1)th and so on.
pub struct CountFilter {
  every: u64,
  calls: AtomicU64,
}

impl CountFilter {
  pub fn new(every: u64) -> Self {
    Self {
      every: every.max(1),
      calls: AtomicU64::new(0),
    }
  }
}

impl Filter for CountFilter {
  #[inline]
  fn accept(&self, _view: &RecordView<'_>) -> bool {
    let prev = self.calls.fetch_add(1, Ordering::Relaxed);
    prev % self.every == 0
  }
}

/// Time units accepted by the rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
  Micros,
  Millis,
  Seconds,
  Minutes,
}

impl TimeUnit {
  pub fn parse(name: &str) -> Option<TimeUnit> {
    match name.to_ascii_lowercase().as_str() {
      "micros" | "us" => Some(TimeUnit::Micros),
      "millis" | "ms" => Some(TimeUnit::Millis),
      "seconds" | "s" | "sec" => Some(TimeUnit::Seconds),
      "minutes" | "m" | "min" => Some(TimeUnit::Minutes),
      _ => None,
    }
  }

  pub fn to_nanos(&self, value: u64) -> u64 {
    match self {
      TimeUnit::Micros => value * 1_000,
      TimeUnit::Millis => value * 1_000_000,
      TimeUnit::Seconds => value * 1_000_000_000,
      TimeUnit::Minutes => value * 60 * 1_000_000_000,
    }
  }
}

/// Fixed-window rate limiter: at most `max_msgs` accepted per window.
///
/// Rejections are counted; when a window with rejections closes, the count
/// moves into a pending summary that the dispatcher collects through
/// [`Filter::take_discard_summary`] and turns into a synthesized
/// "discarded N messages" record.
pub struct RateLimitFilter {
  max_msgs: u64,
  window_nanos: u64,
  window_start: AtomicU64,
  count: AtomicU64,
  discarded: AtomicU64,
  pending_summary: AtomicU64,
}

impl RateLimitFilter {
  pub fn new(max_msgs: u64, window: u64, unit: TimeUnit) -> Self {
    Self {
      max_msgs,
      window_nanos: unit.to_nanos(window).max(1),
      window_start: AtomicU64::new(0),
      count: AtomicU64::new(0),
      discarded: AtomicU64::new(0),
      pending_summary: AtomicU64::new(0),
    }
  }

  /// Total records rejected since creation, across all windows.
  pub fn total_discarded(&self) -> u64 {
    self.discarded.load(Ordering::Relaxed) + self.pending_summary.load(Ordering::Relaxed)
  }

  /// The admission decision against an explicit monotonic clock value; the
  /// call-site `log_moderate!` guard uses this directly.
  pub fn allow(&self, now: u64) -> bool {
    let start = self.window_start.load(Ordering::Acquire);
    if now.saturating_sub(start) >= self.window_nanos
      && self
        .window_start
        .compare_exchange(start, now, Ordering::SeqCst, Ordering::Relaxed)
        .is_ok()
    {
      // This thread closed the window: archive its rejection count for the
      // summary record and open a fresh budget.
      let dropped = self.discarded.swap(0, Ordering::Relaxed);
      if dropped > 0 {
        self.pending_summary.fetch_add(dropped, Ordering::Relaxed);
      }
      self.count.store(0, Ordering::Release);
    }

    let taken = self.count.fetch_add(1, Ordering::Relaxed);
    if taken < self.max_msgs {
      true
    } else {
      self.discarded.fetch_add(1, Ordering::Relaxed);
      false
    }
  }
}

impl Filter for RateLimitFilter {
  fn accept(&self, view: &RecordView<'_>) -> bool {
    let now = if view.record.time_mono_nanos != 0 {
      view.record.time_mono_nanos
    } else {
      mono_clock_nanos()
    };
    self.allow(now)
  }

  fn take_discard_summary(&self) -> Option<u64> {
    let pending = self.pending_summary.swap(0, Ordering::Relaxed);
    (pending > 0).then_some(pending)
  }
}

/// Constructor signature for filters referenced by name in expressions,
/// e.g. `rate_limit(100, 1, seconds)`.
pub type FilterCtor = Box<dyn Fn(&[String]) -> EngineResult<Arc<dyn Filter>> + Send + Sync>;

/// Registry of named filter constructors. `count_n` and `rate_limit` are
/// built in; users add their own once at startup.
pub struct FilterRegistry {
  ctors: RwLock<HashMap<String, FilterCtor>>,
}

impl Default for FilterRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl FilterRegistry {
  pub fn new() -> Self {
    let registry = Self {
      ctors: RwLock::new(HashMap::new()),
    };

    registry
      .register("count_n", Box::new(make_count_filter))
      .expect("builtin filter registration");
    registry
      .register("rate_limit", Box::new(make_rate_limit_filter))
      .expect("builtin filter registration");
    registry
  }

  pub fn register(&self, name: &str, ctor: FilterCtor) -> EngineResult<()> {
    let mut ctors = self.ctors.write().unwrap();
    if ctors.contains_key(name) {
      return Err(EngineError::DuplicateName(name.to_string()));
    }
    ctors.insert(name.to_string(), ctor);
    Ok(())
  }

  pub fn construct(&self, name: &str, args: &[String]) -> EngineResult<Arc<dyn Filter>> {
    let ctors = self.ctors.read().unwrap();
    let ctor = ctors
      .get(name)
      .ok_or_else(|| EngineError::UnknownFilter(name.to_string()))?;
    ctor(args)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.ctors.read().unwrap().contains_key(name)
  }
}

fn make_count_filter(args: &[String]) -> EngineResult<Arc<dyn Filter>> {
  if args.len() != 1 {
    return Err(EngineError::InvalidConfig(
      "count_n expects one argument".to_string(),
    ));
  }
  let every: u64 = args[0]
    .parse()
    .map_err(|_| EngineError::InvalidConfig(format!("bad count_n argument '{}'", args[0])))?;
  Ok(Arc::new(CountFilter::new(every)))
}

fn make_rate_limit_filter(args: &[String]) -> EngineResult<Arc<dyn Filter>> {
  if args.len() != 3 {
    return Err(EngineError::InvalidConfig(
      "rate_limit expects (max_msgs, window, unit)".to_string(),
    ));
  }
  let max_msgs: u64 = args[0]
    .parse()
    .map_err(|_| EngineError::InvalidConfig(format!("bad rate_limit count '{}'", args[0])))?;
  let window: u64 = args[1]
    .parse()
    .map_err(|_| EngineError::InvalidConfig(format!("bad rate_limit window '{}'", args[1])))?;
  let unit = TimeUnit::parse(&args[2])
    .ok_or_else(|| EngineError::InvalidConfig(format!("bad rate_limit unit '{}'", args[2])))?;
  Ok(Arc::new(RateLimitFilter::new(max_msgs, window, unit)))
}

// --- filter expression parser ------------------------------------------------

struct Tokens<'a> {
  input: &'a str,
  pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Word(String),
  Op(String),
  LParen,
  RParen,
  Comma,
}

impl<'a> Tokens<'a> {
  fn new(input: &'a str) -> Self {
    Self { input, pos: 0 }
  }

  fn skip_ws(&mut self) {
    let rest = &self.input[self.pos..];
    let trimmed = rest.trim_start();
    self.pos += rest.len() - trimmed.len();
  }

  fn peek(&mut self) -> Option<(Token, usize)> {
    self.skip_ws();
    let start = self.pos;
    let rest = &self.input[start..];
    let mut chars = rest.chars();
    let first = chars.next()?;

    let token = match first {
      '(' => (Token::LParen, 1),
      ')' => (Token::RParen, 1),
      ',' => (Token::Comma, 1),
      '=' | '!' | '<' | '>' | '~' => {
        let two: String = rest.chars().take(2).collect();
        if two.len() == 2 && (two.ends_with('=')) {
          (Token::Op(two), 2)
        } else {
          (Token::Op(first.to_string()), 1)
        }
      },
      '"' => {
        let mut len = 1;
        for ch in chars {
          len += ch.len_utf8();
          if ch == '"' {
            break;
          }
        }
        let word = rest[1..len - 1].to_string();
        (Token::Word(word), len)
      },
      _ => {
        let mut len = 0;
        for ch in rest.chars() {
          if ch.is_whitespace() || "(),=!<>~\"".contains(ch) {
            break;
          }
          len += ch.len_utf8();
        }
        (Token::Word(rest[..len].to_string()), len)
      },
    };
    Some((token.0, start + token.1))
  }

  fn next(&mut self) -> Option<Token> {
    let (token, end) = self.peek()?;
    self.pos = end;
    Some(token)
  }
}

/// Parses a filter expression into a filter tree.
pub fn parse_filter(input: &str, registry: &FilterRegistry) -> EngineResult<Arc<dyn Filter>> {
  let mut tokens = Tokens::new(input);
  let filter = parse_or(&mut tokens, registry)?;
  tokens.skip_ws();
  if tokens.pos != input.len() {
    return Err(EngineError::parse("trailing input", tokens.pos));
  }
  Ok(filter)
}

fn parse_or(tokens: &mut Tokens<'_>, registry: &FilterRegistry) -> EngineResult<Arc<dyn Filter>> {
  let mut parts = vec![parse_and(tokens, registry)?];
  while let Some((Token::Word(word), end)) = tokens.peek() {
    if word.eq_ignore_ascii_case("or") {
      tokens.pos = end;
      parts.push(parse_and(tokens, registry)?);
    } else {
      break;
    }
  }
  if parts.len() == 1 {
    Ok(parts.pop().unwrap())
  } else {
    Ok(Arc::new(OrFilter(parts)))
  }
}

fn parse_and(tokens: &mut Tokens<'_>, registry: &FilterRegistry) -> EngineResult<Arc<dyn Filter>> {
  let mut parts = vec![parse_unary(tokens, registry)?];
  while let Some((Token::Word(word), end)) = tokens.peek() {
    if word.eq_ignore_ascii_case("and") {
      tokens.pos = end;
      parts.push(parse_unary(tokens, registry)?);
    } else {
      break;
    }
  }
  if parts.len() == 1 {
    Ok(parts.pop().unwrap())
  } else {
    Ok(Arc::new(AndFilter(parts)))
  }
}

fn parse_unary(tokens: &mut Tokens<'_>, registry: &FilterRegistry) -> EngineResult<Arc<dyn Filter>> {
  match tokens.peek() {
    Some((Token::Word(word), end)) if word.eq_ignore_ascii_case("not") => {
      tokens.pos = end;
      let inner = parse_unary(tokens, registry)?;
      Ok(Arc::new(NotFilter(inner)))
    },
    Some((Token::LParen, end)) => {
      tokens.pos = end;
      let inner = parse_or(tokens, registry)?;
      match tokens.next() {
        Some(Token::RParen) => Ok(inner),
        _ => Err(EngineError::parse("expected ')'", tokens.pos)),
      }
    },
    _ => parse_leaf(tokens, registry),
  }
}

fn parse_leaf(tokens: &mut Tokens<'_>, registry: &FilterRegistry) -> EngineResult<Arc<dyn Filter>> {
  let at = tokens.pos;
  let name = match tokens.next() {
    Some(Token::Word(word)) => word,
    _ => return Err(EngineError::parse("expected filter leaf", at)),
  };

  match tokens.peek() {
    // name(args...) goes through the registry
    Some((Token::LParen, end)) => {
      tokens.pos = end;
      let mut args = Vec::new();
      loop {
        match tokens.next() {
          Some(Token::RParen) => break,
          Some(Token::Word(word)) => {
            args.push(word);
            match tokens.next() {
              Some(Token::Comma) => continue,
              Some(Token::RParen) => break,
              _ => return Err(EngineError::parse("expected ',' or ')'", tokens.pos)),
            }
          },
          _ => return Err(EngineError::parse("expected filter argument", tokens.pos)),
        }
      }
      registry.construct(&name, &args)
    },
    // field op value
    Some((Token::Op(op), end)) => {
      tokens.pos = end;
      let value = match tokens.next() {
        Some(Token::Word(word)) => word,
        _ => return Err(EngineError::parse("expected comparison value", tokens.pos)),
      };
      build_compare_leaf(&name, &op, &value, at)
    },
    _ => Err(EngineError::UnknownFilter(name)),
  }
}

fn build_compare_leaf(
  field: &str,
  op: &str,
  value: &str,
  at: usize,
) -> EngineResult<Arc<dyn Filter>> {
  if field == "level" {
    let op = CompareOp::parse(op).ok_or_else(|| EngineError::parse("bad level operator", at))?;
    let level = LogLevel::parse(value)
      .ok_or_else(|| EngineError::InvalidConfig(format!("unknown level '{}'", value)))?;
    return Ok(Arc::new(LevelFilter { op, level }));
  }

  let name_field =
    NameField::parse(field).ok_or_else(|| EngineError::UnknownFilter(field.to_string()))?;
  let filter = match op {
    "==" | "!=" => NameFilter {
      field: name_field,
      matcher: NameMatcher::Literal(value.to_string()),
      negate: op == "!=",
    },
    "~=" => NameFilter {
      field: name_field,
      matcher: NameMatcher::Pattern(
        Regex::new(value).map_err(|e| EngineError::parse(format!("bad regex: {}", e), at))?,
      ),
      negate: false,
    },
    _ => return Err(EngineError::parse("bad name operator", at)),
  };
  Ok(Arc::new(filter))
}
