//! # Formatter and Receptor Module
//!
//! Walks a compiled selector list over one record and feeds the selected
//! fields to a [`FieldReceptor`]. Two receptor styles exist:
//!
//! - **By-type**: the selectors call `receive_string` / `receive_uint` /
//!   `receive_time` / `receive_level`, which a byte-oriented receptor (the
//!   text receptor, the JSON receptor) turns into output bytes.
//! - **By-name**: every record/process field also flows through a semantic
//!   method (`receive_host_name`, `receive_process_id`, ...) whose default
//!   forwards to the by-type channel. Structured backends (databases,
//!   monitoring sinks) override the semantic methods and map fields to typed
//!   columns without a string round-trip.
//!
//! Binary records are resolved before formatting: the template is fetched
//! from the message cache and `{}` placeholders are expanded with the
//! decoded arguments.


use crate::codec::{decode_args, UdtRegistry};
use crate::error::{EngineError, EngineResult};
use crate::filter::FilterRegistry;
use crate::msg_cache::MsgCache;
use crate::record::{LogLevel, LogRecord, Payload, RecordView};
use crate::selector::{
  compile_format, FieldKind, SelectorNode, SelectorRegistry, TimePrecision, TimeZoneStyle,
};
use chrono::{DateTime, Local, Utc};
use std::fmt::Write as _;
use std::sync::Arc;

/// The engine's default text format.
pub const DEFAULT_FORMAT: &str = "${time} ${level} [${tid}] ${src} ${msg}";

/// Static process facts consulted by the process-derived selectors.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
  pub host: String,
  pub user: String,
  pub os_name: String,
  pub os_ver: String,
  pub app: String,
  pub prog: String,
  pub pid: u32,
}

impl ProcessInfo {
  /// Gathers process facts once at engine init. `app` defaults to the
  /// program name unless the host application configures one.
  pub fn detect(app_name: Option<String>) -> Self {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let user = std::env::var("USER")
      .or_else(|_| std::env::var("USERNAME"))
      .unwrap_or_else(|_| "unknown".to_string());
    let prog = std::env::current_exe()
      .ok()
      .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
      .unwrap_or_else(|| "unknown".to_string());
    let os_ver = std::env::var("OS_VERSION").unwrap_or_else(|_| "unknown".to_string());
    Self {
      host,
      user,
      os_name: std::env::consts::OS.to_string(),
      os_ver,
      app: app_name.unwrap_or_else(|| prog.clone()),
      prog,
      pid: std::process::id(),
    }
  }
}

/// Receives the fields a formatter selects out of a record.
///
/// The `receive_*` by-type methods are mandatory; the semantic by-name
/// methods default to the by-type channel.
pub trait FieldReceptor {
  fn receive_string(&mut self, value: &str);
  fn receive_int(&mut self, value: i64);
  fn receive_uint(&mut self, value: u64);
  fn receive_time(&mut self, unix_nanos: u64, rendered: &str);
  fn receive_level(&mut self, level: LogLevel);

  fn receive_record_id(&mut self, rid: u64) {
    self.receive_uint(rid);
  }
  fn receive_host_name(&mut self, host: &str) {
    self.receive_string(host);
  }
  fn receive_user_name(&mut self, user: &str) {
    self.receive_string(user);
  }
  fn receive_os_name(&mut self, os: &str) {
    self.receive_string(os);
  }
  fn receive_os_version(&mut self, version: &str) {
    self.receive_string(version);
  }
  fn receive_app_name(&mut self, app: &str) {
    self.receive_string(app);
  }
  fn receive_program_name(&mut self, prog: &str) {
    self.receive_string(prog);
  }
  fn receive_process_id(&mut self, pid: u64) {
    self.receive_uint(pid);
  }
  fn receive_thread_id(&mut self, tid: u64) {
    self.receive_uint(tid);
  }
  fn receive_thread_name(&mut self, name: &str) {
    self.receive_string(name);
  }
  fn receive_source_name(&mut self, src: &str) {
    self.receive_string(src);
  }
  fn receive_module_name(&mut self, module: &str) {
    self.receive_string(module);
  }
  fn receive_file_name(&mut self, file: &str) {
    self.receive_string(file);
  }
  fn receive_line(&mut self, line: u32) {
    self.receive_uint(line as u64);
  }
  fn receive_function_name(&mut self, function: &str) {
    self.receive_string(function);
  }
  fn receive_log_msg(&mut self, msg: &str) {
    self.receive_string(msg);
  }
  fn receive_log_time(&mut self, unix_nanos: u64, rendered: &str) {
    self.receive_time(unix_nanos, rendered);
  }
  fn receive_log_level(&mut self, level: LogLevel) {
    self.receive_level(level);
  }
}

/// By-type receptor writing plain text into a `String`.
pub struct TextReceptor<'a> {
  pub out: &'a mut String,
}

impl<'a> FieldReceptor for TextReceptor<'a> {
  fn receive_string(&mut self, value: &str) {
    self.out.push_str(value);
  }

  fn receive_int(&mut self, value: i64) {
    let _ = write!(self.out, "{}", value);
  }

  fn receive_uint(&mut self, value: u64) {
    let _ = write!(self.out, "{}", value);
  }

  fn receive_time(&mut self, _unix_nanos: u64, rendered: &str) {
    self.out.push_str(rendered);
  }

  fn receive_level(&mut self, level: LogLevel) {
    self.out.push_str(level.as_str());
  }
}

/// By-name receptor building a JSON object keyed by semantic field names.
/// Fields selected without a semantic identity land in an `extra` array.
pub struct JsonReceptor {
  map: serde_json::Map<String, serde_json::Value>,
}

impl Default for JsonReceptor {
  fn default() -> Self {
    Self::new()
  }
}

impl JsonReceptor {
  pub fn new() -> Self {
    Self {
      map: serde_json::Map::new(),
    }
  }

  fn push_extra(&mut self, value: serde_json::Value) {
    self
      .map
      .entry("extra")
      .or_insert_with(|| serde_json::Value::Array(Vec::new()))
      .as_array_mut()
      .expect("extra is an array")
      .push(value);
  }

  pub fn finish(self) -> serde_json::Value {
    serde_json::Value::Object(self.map)
  }
}

impl FieldReceptor for JsonReceptor {
  fn receive_string(&mut self, value: &str) {
    self.push_extra(serde_json::Value::String(value.to_string()));
  }

  fn receive_int(&mut self, value: i64) {
    self.push_extra(serde_json::Value::from(value));
  }

  fn receive_uint(&mut self, value: u64) {
    self.push_extra(serde_json::Value::from(value));
  }

  fn receive_time(&mut self, unix_nanos: u64, _rendered: &str) {
    self.push_extra(serde_json::Value::from(unix_nanos));
  }

  fn receive_level(&mut self, level: LogLevel) {
    self.push_extra(serde_json::Value::String(level.as_str().to_string()));
  }

  fn receive_record_id(&mut self, rid: u64) {
    self.map.insert("rid".to_string(), rid.into());
  }

  fn receive_host_name(&mut self, host: &str) {
    self.map.insert("host".to_string(), host.into());
  }

  fn receive_user_name(&mut self, user: &str) {
    self.map.insert("user".to_string(), user.into());
  }

  fn receive_os_name(&mut self, os: &str) {
    self.map.insert("os_name".to_string(), os.into());
  }

  fn receive_os_version(&mut self, version: &str) {
    self.map.insert("os_ver".to_string(), version.into());
  }

  fn receive_app_name(&mut self, app: &str) {
    self.map.insert("app".to_string(), app.into());
  }

  fn receive_program_name(&mut self, prog: &str) {
    self.map.insert("prog".to_string(), prog.into());
  }

  fn receive_process_id(&mut self, pid: u64) {
    self.map.insert("pid".to_string(), pid.into());
  }

  fn receive_thread_id(&mut self, tid: u64) {
    self.map.insert("tid".to_string(), tid.into());
  }

  fn receive_thread_name(&mut self, name: &str) {
    self.map.insert("tname".to_string(), name.into());
  }

  fn receive_source_name(&mut self, src: &str) {
    self.map.insert("src".to_string(), src.into());
  }

  fn receive_module_name(&mut self, module: &str) {
    self.map.insert("mod".to_string(), module.into());
  }

  fn receive_file_name(&mut self, file: &str) {
    self.map.insert("file".to_string(), file.into());
  }

  fn receive_line(&mut self, line: u32) {
    self.map.insert("line".to_string(), line.into());
  }

  fn receive_function_name(&mut self, function: &str) {
    self.map.insert("func".to_string(), function.into());
  }

  fn receive_log_msg(&mut self, msg: &str) {
    self.map.insert("msg".to_string(), msg.into());
  }

  fn receive_log_time(&mut self, unix_nanos: u64, rendered: &str) {
    self.map.insert("time".to_string(), rendered.into());
    self.map.insert("time_unix_nanos".to_string(), unix_nanos.into());
  }

  fn receive_log_level(&mut self, level: LogLevel) {
    self.map.insert("level".to_string(), level.as_str().into());
  }
}

/// Shared inputs for field emission.
#[derive(Debug, Clone)]
pub struct FormatContext {
  pub process: Arc<ProcessInfo>,
}

/// A compiled format string.
pub struct Formatter {
  pattern: String,
  nodes: Vec<SelectorNode>,
}

impl std::fmt::Debug for Formatter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Formatter")
      .field("pattern", &self.pattern)
      .finish()
  }
}

impl Formatter {
  pub fn compile(
    pattern: &str,
    selectors: &SelectorRegistry,
    filters: &FilterRegistry,
  ) -> EngineResult<Self> {
    let nodes = compile_format(pattern, selectors, filters)?;
    Ok(Self {
      pattern: pattern.to_string(),
      nodes,
    })
  }

  pub fn pattern(&self) -> &str {
    &self.pattern
  }

  /// Walks the compiled selectors over one record.
  pub fn format(&self, view: &RecordView<'_>, ctx: &FormatContext, out: &mut dyn FieldReceptor) {
    emit_nodes(&self.nodes, view, ctx, out);
  }

  /// Convenience: format into a fresh string through the text receptor.
  pub fn format_to_string(&self, view: &RecordView<'_>, ctx: &FormatContext) -> String {
    let mut text = String::with_capacity(128);
    let mut receptor = TextReceptor { out: &mut text };
    self.format(view, ctx, &mut receptor);
    text
  }
}

fn emit_nodes(
  nodes: &[SelectorNode],
  view: &RecordView<'_>,
  ctx: &FormatContext,
  out: &mut dyn FieldReceptor,
) {
  for node in nodes {
    emit_node(node, view, ctx, out);
  }
}

fn emit_node(
  node: &SelectorNode,
  view: &RecordView<'_>,
  ctx: &FormatContext,
  out: &mut dyn FieldReceptor,
) {
  match node {
    SelectorNode::Static(text) => out.receive_string(text),
    SelectorNode::Field { kind, just } => emit_field(*kind, *just, view, ctx, out),
    SelectorNode::Time {
      zone,
      precision,
      just,
    } => {
      let rendered = render_time(view.record.time_unix_nanos, *zone, *precision);
      match just {
        Some(n) => out.receive_log_time(view.record.time_unix_nanos, &justify(&rendered, *n)),
        None => out.receive_log_time(view.record.time_unix_nanos, &rendered),
      }
    },
    SelectorNode::TimeEpoch { precision } => {
      let nanos = view.record.time_unix_nanos;
      let value = match precision {
        TimePrecision::Seconds => nanos / 1_000_000_000,
        TimePrecision::Millis => nanos / 1_000_000,
        TimePrecision::Micros => nanos / 1_000,
        TimePrecision::Nanos => nanos,
      };
      out.receive_uint(value);
    },
    SelectorNode::Env { var, just } => {
      let value = std::env::var(var).unwrap_or_default();
      out.receive_string(&apply_justify(value, *just));
    },
    SelectorNode::ConstStr(text) => out.receive_string(text),
    SelectorNode::ConstInt(value) => out.receive_int(*value),
    SelectorNode::ConstLevel(level) => out.receive_level(*level),
    SelectorNode::If {
      cond,
      then_nodes,
      else_nodes,
    } => {
      if cond.accept(view) {
        emit_nodes(then_nodes, view, ctx, out);
      } else {
        emit_nodes(else_nodes, view, ctx, out);
      }
    },
    SelectorNode::Switch {
      value,
      cases,
      default,
    } => {
      let mut rendered = String::new();
      {
        let mut receptor = TextReceptor { out: &mut rendered };
        emit_nodes(value, view, ctx, &mut receptor);
      }
      let key = rendered.trim();
      let body = cases
        .iter()
        .find(|(constant, _)| constant == key)
        .map(|(_, body)| body)
        .unwrap_or(default);
      emit_nodes(body, view, ctx, out);
    },
    SelectorNode::ExprSwitch { cases, default } => {
      let body = cases
        .iter()
        .find(|(cond, _)| cond.accept(view))
        .map(|(_, body)| body)
        .unwrap_or(default);
      emit_nodes(body, view, ctx, out);
    },
    SelectorNode::Fmt(escape) => out.receive_string(escape),
    SelectorNode::Custom { selector, just, .. } => {
      let mut text = String::new();
      selector.emit(view, &mut text);
      out.receive_string(&apply_justify(text, *just));
    },
  }
}

fn emit_field(
  kind: FieldKind,
  just: Option<i32>,
  view: &RecordView<'_>,
  ctx: &FormatContext,
  out: &mut dyn FieldReceptor,
) {
  // Justified fields go through a text rendering; unjustified fields use the
  // semantic channel so structured receptors see typed values.
  if let Some(n) = just {
    let mut rendered = String::new();
    {
      let mut receptor = TextReceptor { out: &mut rendered };
      emit_field(kind, None, view, ctx, &mut receptor);
    }
    out.receive_string(&justify(&rendered, n));
    return;
  }

  let record = view.record;
  match kind {
    FieldKind::RecordId => out.receive_record_id(record.record_id),
    FieldKind::Level => out.receive_log_level(record.level),
    FieldKind::ThreadId => out.receive_thread_id(record.thread_id),
    FieldKind::ThreadName => out.receive_thread_name(&record.thread_name),
    FieldKind::Source => out.receive_source_name(&record.source_name),
    FieldKind::Module => out.receive_module_name(record.location.function),
    FieldKind::File => out.receive_file_name(record.location.file),
    FieldKind::Line => out.receive_line(record.location.line),
    FieldKind::Function => out.receive_function_name(record.location.function),
    FieldKind::Msg => out.receive_log_msg(view.msg),
    FieldKind::Host => out.receive_host_name(&ctx.process.host),
    FieldKind::User => out.receive_user_name(&ctx.process.user),
    FieldKind::OsName => out.receive_os_name(&ctx.process.os_name),
    FieldKind::OsVer => out.receive_os_version(&ctx.process.os_ver),
    FieldKind::App => out.receive_app_name(&ctx.process.app),
    FieldKind::Prog => out.receive_program_name(&ctx.process.prog),
    FieldKind::Pid => out.receive_process_id(ctx.process.pid as u64),
  }
}

fn render_time(unix_nanos: u64, zone: TimeZoneStyle, precision: TimePrecision) -> String {
  let spec = match precision {
    TimePrecision::Seconds => "%Y-%m-%d %H:%M:%S",
    TimePrecision::Millis => "%Y-%m-%d %H:%M:%S%.3f",
    TimePrecision::Micros => "%Y-%m-%d %H:%M:%S%.6f",
    TimePrecision::Nanos => "%Y-%m-%d %H:%M:%S%.9f",
  };
  let utc: DateTime<Utc> = DateTime::from_timestamp_nanos(unix_nanos as i64);
  match zone {
    TimeZoneStyle::Utc => utc.format(spec).to_string(),
    TimeZoneStyle::Local => utc.with_timezone(&Local).format(spec).to_string(),
  }
}

fn justify(text: &str, n: i32) -> String {
  let width = n.unsigned_abs() as usize;
  if n >= 0 {
    format!("{:<width$}", text, width = width)
  } else {
    format!("{:>width$}", text, width = width)
  }
}

fn apply_justify(text: String, just: Option<i32>) -> String {
  match just {
    Some(n) => justify(&text, n),
    None => text,
  }
}

/// Expands a `{}`-style template with decoded argument values. `{{` and `}}`
/// escape literal braces; surplus `{}` placeholders stay verbatim.
pub fn expand_template(template: &str, args: &[crate::codec::ArgValue]) -> String {
  let mut out = String::with_capacity(template.len() + 16 * args.len());
  let mut arg_iter = args.iter();
  let bytes = template.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
      out.push('{');
      i += 2;
    } else if bytes[i] == b'}' && i + 1 < bytes.len() && bytes[i + 1] == b'}' {
      out.push('}');
      i += 2;
    } else if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'}' {
      match arg_iter.next() {
        Some(arg) => {
          let _ = write!(out, "{}", arg);
        },
        None => out.push_str("{}"),
      }
      i += 2;
    } else {
      let ch = template[i..].chars().next().unwrap();
      out.push(ch);
      i += ch.len_utf8();
    }
  }
  out
}

/// Resolves a record's message: `None` for text records (use
/// [`LogRecord::text`]), the expanded template for binary records.
///
/// A binary record whose template id does not resolve is a
/// [`EngineError::FormatCacheMiss`]; the dispatcher drops the record and
/// accounts it.
pub fn resolve_message(
  record: &LogRecord,
  msg_cache: &MsgCache,
  udt: &UdtRegistry,
) -> EngineResult<Option<String>> {
  match &record.payload {
    Payload::Text(_) => Ok(None),
    Payload::Binary {
      template_id,
      args,
      arg_count,
    } => {
      let template = msg_cache
        .get(*template_id)
        .ok_or(EngineError::FormatCacheMiss(*template_id))?;
      let values = decode_args(args, *arg_count, udt)?;
      Ok(Some(expand_template(&template, &values)))
    },
  }
}
