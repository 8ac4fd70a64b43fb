//! # Field Selector Compiler
//!
//! Compiles a format string such as
//!
//! ```text
//! ${time} ${level:6} [${tid}] ${src} ${msg}
//! ```
//!
//! into an ordered list of [`SelectorNode`]s that the formatter walks for
//! every record. Literal text is copied verbatim; `${name[:arg]*}` selects a
//! record or process field, a constant, an environment variable, an ANSI
//! formatting directive, or a conditional/switch branch whose bodies are
//! format strings themselves.
//!
//! Selectors are extensible: a registry maps names to constructors, each
//! assigned a dense type id in registration order. The record and process
//! field selectors are pre-registered; `if`, `switch`, `expr-switch` and
//! `fmt` are grammar built-ins handled by the compiler.

mod __test__;

use crate::error::{EngineError, EngineResult};
use crate::filter::{parse_filter, Filter, FilterRegistry};
use crate::record::{LogLevel, RecordView};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Text justification: positive pads/left-justifies to N columns, negative
/// right-justifies.
pub type Justify = Option<i32>;

/// Record- and process-derived fields known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  RecordId,
  Level,
  ThreadId,
  ThreadName,
  Source,
  Module,
  File,
  Line,
  Function,
  Msg,
  Host,
  User,
  OsName,
  OsVer,
  App,
  Prog,
  Pid,
}

/// Time reference for the `${time}` selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneStyle {
  #[default]
  Local,
  Utc,
}

/// Sub-second precision for time selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePrecision {
  Seconds,
  #[default]
  Millis,
  Micros,
  Nanos,
}

/// User-registered selector behavior: renders text for one record.
pub trait CustomSelector: Send + Sync {
  fn emit(&self, view: &RecordView<'_>, out: &mut String);
}

/// One compiled element of a format string.
pub enum SelectorNode {
  /// Literal text between selectors.
  Static(String),
  Field {
    kind: FieldKind,
    just: Justify,
  },
  Time {
    zone: TimeZoneStyle,
    precision: TimePrecision,
    just: Justify,
  },
  /// Seconds (or finer) since the Unix epoch as an integer.
  TimeEpoch {
    precision: TimePrecision,
  },
  Env {
    var: String,
    just: Justify,
  },
  ConstStr(String),
  ConstInt(i64),
  ConstLevel(LogLevel),
  If {
    cond: Arc<dyn Filter>,
    then_nodes: Vec<SelectorNode>,
    else_nodes: Vec<SelectorNode>,
  },
  /// Value-equality branch: the value expression is rendered to text and
  /// compared against each case constant.
  Switch {
    value: Vec<SelectorNode>,
    cases: Vec<(String, Vec<SelectorNode>)>,
    default: Vec<SelectorNode>,
  },
  /// Predicate branch: the first case whose condition admits the record
  /// wins.
  ExprSwitch {
    cases: Vec<(Arc<dyn Filter>, Vec<SelectorNode>)>,
    default: Vec<SelectorNode>,
  },
  /// Pre-computed ANSI escape sequence; consumes no record field.
  Fmt(String),
  Custom {
    type_id: u32,
    selector: Arc<dyn CustomSelector>,
    just: Justify,
  },
}

impl std::fmt::Debug for SelectorNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SelectorNode::Static(text) => write!(f, "Static({:?})", text),
      SelectorNode::Field { kind, just } => write!(f, "Field({:?}, {:?})", kind, just),
      SelectorNode::Time { zone, precision, .. } => write!(f, "Time({:?}, {:?})", zone, precision),
      SelectorNode::TimeEpoch { precision } => write!(f, "TimeEpoch({:?})", precision),
      SelectorNode::Env { var, .. } => write!(f, "Env({:?})", var),
      SelectorNode::ConstStr(text) => write!(f, "ConstStr({:?})", text),
      SelectorNode::ConstInt(value) => write!(f, "ConstInt({})", value),
      SelectorNode::ConstLevel(level) => write!(f, "ConstLevel({})", level),
      SelectorNode::If { .. } => write!(f, "If"),
      SelectorNode::Switch { cases, .. } => write!(f, "Switch({} cases)", cases.len()),
      SelectorNode::ExprSwitch { cases, .. } => write!(f, "ExprSwitch({} cases)", cases.len()),
      SelectorNode::Fmt(esc) => write!(f, "Fmt({:?})", esc),
      SelectorNode::Custom { type_id, .. } => write!(f, "Custom(type_id={})", type_id),
    }
  }
}

/// Parsed `${name:arg:arg}` before construction.
#[derive(Debug)]
pub struct SelectorSpec {
  pub name: String,
  pub args: Vec<String>,
  /// Byte offset of the selector within the format string, for errors.
  pub pos: usize,
}

impl SelectorSpec {
  /// Extracts a trailing integer argument as justification, if present.
  pub fn justify(&self) -> Justify {
    self.args.iter().find_map(|arg| arg.trim().parse().ok())
  }
}

pub type SelectorCtor = Box<dyn Fn(&SelectorSpec) -> EngineResult<SelectorNode> + Send + Sync>;

/// Registry of selector constructors, keyed by name. Each registration is
/// assigned a dense type id usable for later dispatch by backends.
pub struct SelectorRegistry {
  ctors: RwLock<HashMap<String, (u32, Arc<SelectorCtor>)>>,
  next_type_id: AtomicU32,
}

impl Default for SelectorRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl SelectorRegistry {
  pub fn new() -> Self {
    let registry = Self {
      ctors: RwLock::new(HashMap::new()),
      next_type_id: AtomicU32::new(0),
    };
    registry.register_builtins();
    registry
  }

  fn register_builtins(&self) {
    let fields: &[(&str, FieldKind)] = &[
      ("rid", FieldKind::RecordId),
      ("level", FieldKind::Level),
      ("tid", FieldKind::ThreadId),
      ("tname", FieldKind::ThreadName),
      ("src", FieldKind::Source),
      ("mod", FieldKind::Module),
      ("file", FieldKind::File),
      ("line", FieldKind::Line),
      ("func", FieldKind::Function),
      ("msg", FieldKind::Msg),
      ("host", FieldKind::Host),
      ("user", FieldKind::User),
      ("os_name", FieldKind::OsName),
      ("os_ver", FieldKind::OsVer),
      ("app", FieldKind::App),
      ("prog", FieldKind::Prog),
      ("pid", FieldKind::Pid),
    ];
    for &(name, kind) in fields {
      self
        .register(
          name,
          Box::new(move |spec| {
            Ok(SelectorNode::Field {
              kind,
              just: spec.justify(),
            })
          }),
        )
        .expect("builtin selector registration");
    }

    self
      .register("time", Box::new(make_time_selector))
      .expect("builtin selector registration");
    self
      .register(
        "time_epoch",
        Box::new(|spec| {
          Ok(SelectorNode::TimeEpoch {
            precision: parse_precision(&spec.args).unwrap_or(TimePrecision::Seconds),
          })
        }),
      )
      .expect("builtin selector registration");
    self
      .register("env", Box::new(make_env_selector))
      .expect("builtin selector registration");
    self
      .register(
        "const-str",
        Box::new(|spec| Ok(SelectorNode::ConstStr(spec.args.join(":")))),
      )
      .expect("builtin selector registration");
    self
      .register(
        "const-int",
        Box::new(|spec| {
          let raw = spec.args.join(":");
          let value = raw.trim().parse().map_err(|_| {
            EngineError::parse(format!("bad const-int argument '{}'", raw), spec.pos)
          })?;
          Ok(SelectorNode::ConstInt(value))
        }),
      )
      .expect("builtin selector registration");
    self
      .register(
        "const-time",
        Box::new(|spec| {
          // Accepted as a pre-formatted timestamp; emitted verbatim.
          Ok(SelectorNode::ConstStr(spec.args.join(":")))
        }),
      )
      .expect("builtin selector registration");
    self
      .register(
        "const-level",
        Box::new(|spec| {
          let raw = spec.args.join(":");
          let level = LogLevel::parse(raw.trim()).ok_or_else(|| {
            EngineError::parse(format!("bad const-level argument '{}'", raw), spec.pos)
          })?;
          Ok(SelectorNode::ConstLevel(level))
        }),
      )
      .expect("builtin selector registration");
  }

  /// Registers a selector constructor and returns its dense type id.
  pub fn register(&self, name: &str, ctor: SelectorCtor) -> EngineResult<u32> {
    let mut ctors = self.ctors.write().unwrap();
    if ctors.contains_key(name) {
      return Err(EngineError::DuplicateName(name.to_string()));
    }
    let type_id = self.next_type_id.fetch_add(1, Ordering::Relaxed);
    ctors.insert(name.to_string(), (type_id, Arc::new(ctor)));
    Ok(type_id)
  }

  /// Registers a [`CustomSelector`] implementation under a name with no
  /// arguments.
  pub fn register_custom(
    &self,
    name: &str,
    selector: Arc<dyn CustomSelector>,
  ) -> EngineResult<u32> {
    let mut ctors = self.ctors.write().unwrap();
    if ctors.contains_key(name) {
      return Err(EngineError::DuplicateName(name.to_string()));
    }
    let type_id = self.next_type_id.fetch_add(1, Ordering::Relaxed);
    let ctor: SelectorCtor = Box::new(move |spec| {
      Ok(SelectorNode::Custom {
        type_id,
        selector: Arc::clone(&selector),
        just: spec.justify(),
      })
    });
    ctors.insert(name.to_string(), (type_id, Arc::new(ctor)));
    Ok(type_id)
  }

  fn construct(&self, spec: &SelectorSpec) -> EngineResult<SelectorNode> {
    let ctor = {
      let ctors = self.ctors.read().unwrap();
      match ctors.get(&spec.name) {
        Some((_, ctor)) => Arc::clone(ctor),
        None => return Err(EngineError::UnknownSelector(spec.name.clone())),
      }
    };
    ctor(spec)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.ctors.read().unwrap().contains_key(name)
  }
}

fn make_time_selector(spec: &SelectorSpec) -> EngineResult<SelectorNode> {
  let mut zone = TimeZoneStyle::default();
  let mut precision = TimePrecision::default();
  let mut just = None;
  for arg in &spec.args {
    let arg = arg.trim();
    if let Ok(n) = arg.parse::<i32>() {
      just = Some(n);
    } else if let Some(parsed) = precision_token(arg) {
      precision = parsed;
    } else {
      match arg {
        "utc" | "global" | "zone" => zone = TimeZoneStyle::Utc,
        "local" => zone = TimeZoneStyle::Local,
        "" => {},
        other => {
          return Err(EngineError::parse(
            format!("bad time argument '{}'", other),
            spec.pos,
          ))
        },
      }
    }
  }
  Ok(SelectorNode::Time {
    zone,
    precision,
    just,
  })
}

fn precision_token(token: &str) -> Option<TimePrecision> {
  match token {
    "seconds" => Some(TimePrecision::Seconds),
    "millis" => Some(TimePrecision::Millis),
    "micros" => Some(TimePrecision::Micros),
    "nanos" => Some(TimePrecision::Nanos),
    _ => None,
  }
}

fn parse_precision(args: &[String]) -> Option<TimePrecision> {
  args.iter().find_map(|arg| precision_token(arg.trim()))
}

fn make_env_selector(spec: &SelectorSpec) -> EngineResult<SelectorNode> {
  // ${env:name=VAR}
  for arg in &spec.args {
    if let Some(var) = arg.trim().strip_prefix("name=") {
      return Ok(SelectorNode::Env {
        var: var.to_string(),
        just: spec.justify(),
      });
    }
  }
  Err(EngineError::parse(
    "env selector requires name=VAR",
    spec.pos,
  ))
}

// --- ANSI formatting directives ----------------------------------------------

fn ansi_color_index(name: &str) -> Option<u8> {
  match name {
    "black" => Some(0),
    "red" => Some(1),
    "green" => Some(2),
    "yellow" => Some(3),
    "blue" => Some(4),
    "magenta" => Some(5),
    "cyan" => Some(6),
    "white" => Some(7),
    _ => None,
  }
}

fn ansi_font_code(name: &str) -> Option<u8> {
  match name {
    "bold" => Some(1),
    "faint" => Some(2),
    "italic" => Some(3),
    "underline" => Some(4),
    "blink" => Some(5),
    "cross-out" => Some(9),
    _ => None,
  }
}

fn compile_fmt_directive(args: &[String], pos: usize) -> EngineResult<SelectorNode> {
  let mut escape = String::new();
  for arg in args {
    let arg = arg.trim();
    if arg == "default" {
      escape.push_str("\x1b[0m");
    } else if let Some(color) = arg.strip_prefix("begin-fg-color=") {
      let idx = ansi_color_index(color)
        .ok_or_else(|| EngineError::parse(format!("unknown color '{}'", color), pos))?;
      escape.push_str(&format!("\x1b[{}m", 30 + idx));
    } else if let Some(color) = arg.strip_prefix("begin-bg-color=") {
      let idx = ansi_color_index(color)
        .ok_or_else(|| EngineError::parse(format!("unknown color '{}'", color), pos))?;
      escape.push_str(&format!("\x1b[{}m", 40 + idx));
    } else if arg == "end-fg-color" {
      escape.push_str("\x1b[39m");
    } else if arg == "end-bg-color" {
      escape.push_str("\x1b[49m");
    } else if let Some(font) = arg.strip_prefix("font=") {
      let code = ansi_font_code(font)
        .ok_or_else(|| EngineError::parse(format!("unknown font '{}'", font), pos))?;
      escape.push_str(&format!("\x1b[{}m", code));
    } else {
      return Err(EngineError::parse(
        format!("bad fmt directive '{}'", arg),
        pos,
      ));
    }
  }
  Ok(SelectorNode::Fmt(escape))
}

// --- format string compiler --------------------------------------------------

/// Compiles a format string against the selector and filter registries.
pub fn compile_format(
  input: &str,
  selectors: &SelectorRegistry,
  filters: &FilterRegistry,
) -> EngineResult<Vec<SelectorNode>> {
  let compiler = Compiler { selectors, filters };
  compiler.compile(input, 0)
}

struct Compiler<'a> {
  selectors: &'a SelectorRegistry,
  filters: &'a FilterRegistry,
}

impl<'a> Compiler<'a> {
  fn compile(&self, input: &str, base_pos: usize) -> EngineResult<Vec<SelectorNode>> {
    let mut nodes = Vec::new();
    let mut literal = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
      if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
        if !literal.is_empty() {
          nodes.push(SelectorNode::Static(std::mem::take(&mut literal)));
        }
        let end = find_closing_brace(input, i + 2)
          .ok_or_else(|| EngineError::parse("unclosed '${'", base_pos + i))?;
        let inner = &input[i + 2..end];
        nodes.push(self.compile_selector(inner, base_pos + i + 2)?);
        i = end + 1;
      } else {
        let ch = input[i..].chars().next().unwrap();
        literal.push(ch);
        i += ch.len_utf8();
      }
    }
    if !literal.is_empty() {
      nodes.push(SelectorNode::Static(literal));
    }
    Ok(nodes)
  }

  fn compile_selector(&self, inner: &str, pos: usize) -> EngineResult<SelectorNode> {
    let parts = split_top_level(inner);
    let name = parts.first().map(|p| p.trim()).unwrap_or("");
    if name.is_empty() {
      return Err(EngineError::parse("empty selector", pos));
    }
    let args: Vec<String> = parts[1..].iter().map(|p| p.to_string()).collect();

    match name {
      "if" => self.compile_if(&args, pos),
      "switch" => self.compile_switch(&args, pos),
      "expr-switch" => self.compile_expr_switch(&args, pos),
      "fmt" => compile_fmt_directive(&args, pos),
      "case" | "default" => Err(EngineError::parse(
        format!("'{}' selector is only valid inside a switch", name),
        pos,
      )),
      _ => self.selectors.construct(&SelectorSpec {
        name: name.to_string(),
        args,
        pos,
      }),
    }
  }

  fn compile_if(&self, args: &[String], pos: usize) -> EngineResult<SelectorNode> {
    if args.len() < 2 || args.len() > 3 {
      return Err(EngineError::parse("if expects COND : THEN [: ELSE]", pos));
    }
    let cond = parse_filter(args[0].trim(), self.filters)?;
    let then_nodes = self.compile(&args[1], pos)?;
    let else_nodes = match args.get(2) {
      Some(body) => self.compile(body, pos)?,
      None => Vec::new(),
    };
    Ok(SelectorNode::If {
      cond,
      then_nodes,
      else_nodes,
    })
  }

  /// A switch branch argument must itself be a `${case: ...}` or
  /// `${default: ...}` selector.
  fn parse_branch<'b>(&self, arg: &'b str, pos: usize) -> EngineResult<(&'b str, Vec<&'b str>)> {
    let arg = arg.trim();
    let inner = arg
      .strip_prefix("${")
      .and_then(|rest| rest.strip_suffix('}'))
      .ok_or_else(|| EngineError::parse("switch branch must be ${case} or ${default}", pos))?;
    let parts = split_top_level(inner);
    let head = parts.first().map(|p| p.trim()).unwrap_or("");
    Ok((head, parts[1..].to_vec()))
  }

  fn compile_switch(&self, args: &[String], pos: usize) -> EngineResult<SelectorNode> {
    if args.is_empty() {
      return Err(EngineError::parse("switch expects a value expression", pos));
    }
    let value = self.compile(args[0].trim(), pos)?;
    let mut cases = Vec::new();
    let mut default = Vec::new();

    for arg in &args[1..] {
      let (head, rest) = self.parse_branch(arg, pos)?;
      match head {
        "case" => {
          if rest.len() < 2 {
            return Err(EngineError::parse("case expects CONST : EXPR", pos));
          }
          let constant = rest[0].trim().to_string();
          let body = self.compile(&rest[1..].join(":"), pos)?;
          cases.push((constant, body));
        },
        "default" => {
          default = self.compile(&rest.join(":"), pos)?;
        },
        other => {
          return Err(EngineError::parse(
            format!("unexpected '{}' in switch", other),
            pos,
          ))
        },
      }
    }
    Ok(SelectorNode::Switch {
      value,
      cases,
      default,
    })
  }

  fn compile_expr_switch(&self, args: &[String], pos: usize) -> EngineResult<SelectorNode> {
    let mut cases = Vec::new();
    let mut default = Vec::new();
    for arg in args {
      let (head, rest) = self.parse_branch(arg, pos)?;
      match head {
        "case" => {
          if rest.len() < 2 {
            return Err(EngineError::parse("case expects COND : EXPR", pos));
          }
          let cond = parse_filter(rest[0].trim(), self.filters)?;
          let body = self.compile(&rest[1..].join(":"), pos)?;
          cases.push((cond, body));
        },
        "default" => {
          default = self.compile(&rest.join(":"), pos)?;
        },
        other => {
          return Err(EngineError::parse(
            format!("unexpected '{}' in expr-switch", other),
            pos,
          ))
        },
      }
    }
    Ok(SelectorNode::ExprSwitch { cases, default })
  }
}

/// Finds the `}` closing a `${` opened right before `start`, allowing nested
/// `${ ... }` selectors in between.
fn find_closing_brace(input: &str, start: usize) -> Option<usize> {
  let bytes = input.as_bytes();
  let mut depth = 1;
  let mut i = start;
  while i < bytes.len() {
    if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
      depth += 1;
      i += 2;
    } else if bytes[i] == b'}' {
      depth -= 1;
      if depth == 0 {
        return Some(i);
      }
      i += 1;
    } else {
      i += 1;
    }
  }
  None
}

/// Splits selector args on `:` at nesting depth zero.
fn split_top_level(input: &str) -> SmallVec<[&str; 6]> {
  let bytes = input.as_bytes();
  let mut parts = SmallVec::new();
  let mut depth = 0usize;
  let mut seg_start = 0;
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
      depth += 1;
      i += 2;
    } else if bytes[i] == b'}' && depth > 0 {
      depth -= 1;
      i += 1;
    } else if bytes[i] == b':' && depth == 0 {
      parts.push(&input[seg_start..i]);
      i += 1;
      seg_start = i;
    } else {
      i += 1;
    }
  }
  parts.push(&input[seg_start..]);
  parts
}
