//! # Configuration Module
//!
//! The engine consumes an already-parsed configuration tree of maps, arrays,
//! strings, integers and booleans; property-file and format-specific parsing
//! stay outside the core. A `serde_json::Value` conversion is provided for
//! hosts that configure from JSON.
//!
//! Recognized top-level keys:
//!
//! - `log_format` — default format string.
//! - `log_level` — root level, optionally suffixed with a propagation sigil
//!   (`*` = SET, `+` = LOOSE, `-` = RESTRICT).
//! - `log_filter` — filter expression installed on the root source.
//! - `rate_limit` — shortcut for a global rate-limit filter.
//! - `log_target` — a target URL string (`scheme://path?k=v&k=v`) or a map
//!   with a `url` entry plus overrides; arrays add several targets.
//! - `<dotted>.log_level` / `<dotted>.log_affinity` — per-source overrides.
//!
//! `MALLARD_LOG_LEVEL`, `MALLARD_LOG_FORMAT` and `MALLARD_LOG_FILTER`
//! environment variables override their configuration counterparts.


use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::filter::{parse_filter, AndFilter, Filter, RateLimitFilter, TimeUnit};
use crate::flush::parse_flush_policy;
use crate::format::Formatter;
use crate::record::LogLevel;
use crate::source::PropagateMode;
use crate::target::{ConsoleWriter, Target, TargetWriter};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// The parsed configuration tree handed to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
  Map(BTreeMap<String, ConfigNode>),
  Array(Vec<ConfigNode>),
  String(String),
  Int(i64),
  Bool(bool),
}

impl ConfigNode {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      ConfigNode::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      ConfigNode::Int(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigNode>> {
    match self {
      ConfigNode::Map(m) => Some(m),
      _ => None,
    }
  }

  /// Converts a JSON value; floats and nulls have no configuration meaning
  /// and are rejected.
  pub fn from_json(value: &serde_json::Value) -> EngineResult<ConfigNode> {
    match value {
      serde_json::Value::Object(map) => {
        let mut out = BTreeMap::new();
        for (key, entry) in map {
          out.insert(key.clone(), ConfigNode::from_json(entry)?);
        }
        Ok(ConfigNode::Map(out))
      },
      serde_json::Value::Array(items) => {
        let entries: EngineResult<Vec<ConfigNode>> =
          items.iter().map(ConfigNode::from_json).collect();
        Ok(ConfigNode::Array(entries?))
      },
      serde_json::Value::String(s) => Ok(ConfigNode::String(s.clone())),
      serde_json::Value::Number(n) => n
        .as_i64()
        .map(ConfigNode::Int)
        .ok_or_else(|| EngineError::InvalidConfig(format!("non-integer number {}", n))),
      serde_json::Value::Bool(b) => Ok(ConfigNode::Bool(*b)),
      serde_json::Value::Null => Err(EngineError::InvalidConfig("null value".to_string())),
    }
  }
}

/// A parsed `scheme://path?key=value&key=value` target URL.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetUrl {
  pub scheme: String,
  pub path: String,
  pub params: Vec<(String, String)>,
}

impl TargetUrl {
  pub fn param(&self, key: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }
}

/// Parses a target URL. The scheme is mandatory; path and query are not.
pub fn parse_target_url(input: &str) -> EngineResult<TargetUrl> {
  let (scheme, rest) = input
    .split_once("://")
    .ok_or_else(|| EngineError::parse(format!("target url '{}' lacks a scheme", input), 0))?;
  if scheme.is_empty() {
    return Err(EngineError::parse("empty target scheme", 0));
  }

  let (path, query) = match rest.split_once('?') {
    Some((path, query)) => (path, Some(query)),
    None => (rest, None),
  };

  let mut params = Vec::new();
  if let Some(query) = query {
    for pair in query.split('&').filter(|p| !p.is_empty()) {
      match pair.split_once('=') {
        Some((key, value)) => params.push((key.to_string(), value.to_string())),
        None => params.push((pair.to_string(), String::new())),
      }
    }
  }

  Ok(TargetUrl {
    scheme: scheme.to_string(),
    path: path.to_string(),
    params,
  })
}

pub type SchemeCtor = Box<dyn Fn(&TargetUrl) -> EngineResult<Box<dyn TargetWriter>> + Send + Sync>;

/// Registry of target constructors keyed by URL scheme. The console schemes
/// are built in; concrete backends register theirs at startup.
pub struct SchemeRegistry {
  ctors: RwLock<HashMap<String, SchemeCtor>>,
}

impl std::fmt::Debug for SchemeRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SchemeRegistry")
      .field("schemes", &self.ctors.read().unwrap().len())
      .finish()
  }
}

impl Default for SchemeRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl SchemeRegistry {
  pub fn new() -> Self {
    let registry = Self {
      ctors: RwLock::new(HashMap::new()),
    };
    registry
      .register(
        "stderr",
        Box::new(|_| Ok(Box::new(ConsoleWriter::stderr()) as Box<dyn TargetWriter>)),
      )
      .expect("builtin scheme registration");
    registry
      .register(
        "stdout",
        Box::new(|_| Ok(Box::new(ConsoleWriter::stdout()) as Box<dyn TargetWriter>)),
      )
      .expect("builtin scheme registration");
    registry
  }

  pub fn register(&self, scheme: &str, ctor: SchemeCtor) -> EngineResult<()> {
    let mut ctors = self.ctors.write().unwrap();
    if ctors.contains_key(scheme) {
      return Err(EngineError::DuplicateName(scheme.to_string()));
    }
    ctors.insert(scheme.to_string(), ctor);
    Ok(())
  }

  pub fn construct(&self, url: &TargetUrl) -> EngineResult<Box<dyn TargetWriter>> {
    let ctors = self.ctors.read().unwrap();
    let ctor = ctors
      .get(&url.scheme)
      .ok_or_else(|| EngineError::UnknownScheme(url.scheme.clone()))?;
    ctor(url)
  }
}

/// Splits a level value like `debug*` into the level and its propagation
/// sigil.
pub fn parse_level_spec(spec: &str) -> EngineResult<(LogLevel, PropagateMode)> {
  let spec = spec.trim();
  let (name, mode) = match spec.chars().last().and_then(PropagateMode::from_sigil) {
    Some(mode) => (&spec[..spec.len() - 1], mode),
    None => (spec, PropagateMode::None),
  };
  let level = LogLevel::parse(name.trim())
    .ok_or_else(|| EngineError::InvalidConfig(format!("unknown log level '{}'", name)))?;
  Ok((level, mode))
}

fn parse_rate_limit_node(node: &ConfigNode) -> EngineResult<Arc<dyn Filter>> {
  match node {
    // Bare integer: N records per second
    ConfigNode::Int(max) if *max > 0 => Ok(Arc::new(RateLimitFilter::new(
      *max as u64,
      1,
      TimeUnit::Seconds,
    ))),
    ConfigNode::String(spec) => {
      let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
      if parts.len() != 3 {
        return Err(EngineError::InvalidConfig(format!(
          "rate_limit expects 'max, window, unit', got '{}'",
          spec
        )));
      }
      let max: u64 = parts[0]
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("bad rate_limit count '{}'", parts[0])))?;
      let window: u64 = parts[1]
        .parse()
        .map_err(|_| EngineError::InvalidConfig(format!("bad rate_limit window '{}'", parts[1])))?;
      let unit = TimeUnit::parse(parts[2])
        .ok_or_else(|| EngineError::InvalidConfig(format!("bad rate_limit unit '{}'", parts[2])))?;
      Ok(Arc::new(RateLimitFilter::new(max, window, unit)))
    },
    other => Err(EngineError::InvalidConfig(format!(
      "bad rate_limit value: {:?}",
      other
    ))),
  }
}

/// Builds a [`Target`] from a URL and the engine's registries.
fn build_target(engine: &Engine, url: &TargetUrl) -> EngineResult<Target> {
  let core = engine.core();
  let writer = core.schemes().construct(url)?;

  let name = url
    .param("name")
    .map(str::to_string)
    .unwrap_or_else(|| url.scheme.clone());
  let mut target = Target::new(name, writer);

  if let Some(level) = url.param("level") {
    let parsed = LogLevel::parse(level)
      .ok_or_else(|| EngineError::InvalidConfig(format!("unknown target level '{}'", level)))?;
    target = target.with_level_floor(parsed);
  }
  if let Some(pattern) = url.param("format") {
    let formatter = Formatter::compile(pattern, core.selectors(), core.filters())?;
    target = target.with_formatter(Arc::new(formatter));
  }
  if let Some(expr) = url.param("filter") {
    target = target.with_filter(parse_filter(expr, core.filters())?);
  }
  if let Some(spec) = url.param("flush_policy") {
    target = target.with_flush_policy(parse_flush_policy(spec, core.flush_policies())?);
  }
  if let Some(passkey) = url.param("passkey") {
    let key: u32 = passkey
      .parse()
      .map_err(|_| EngineError::InvalidConfig(format!("bad passkey '{}'", passkey)))?;
    target = target.with_passkey(key);
  }
  Ok(target)
}

fn apply_target_node(engine: &Engine, node: &ConfigNode) -> EngineResult<()> {
  match node {
    ConfigNode::String(url) => {
      let url = parse_target_url(url)?;
      engine.add_target(build_target(engine, &url)?)?;
      Ok(())
    },
    // Map form: `url` plus query-style overrides as entries.
    ConfigNode::Map(map) => {
      let url_value = map
        .get("url")
        .and_then(ConfigNode::as_str)
        .ok_or_else(|| EngineError::InvalidConfig("log_target map requires 'url'".to_string()))?;
      let mut url = parse_target_url(url_value)?;
      for (key, value) in map {
        if key == "url" {
          continue;
        }
        let rendered = match value {
          ConfigNode::String(s) => s.clone(),
          ConfigNode::Int(v) => v.to_string(),
          ConfigNode::Bool(b) => b.to_string(),
          other => {
            return Err(EngineError::InvalidConfig(format!(
              "bad log_target property '{}': {:?}",
              key, other
            )))
          },
        };
        url.params.push((key.clone(), rendered));
      }
      engine.add_target(build_target(engine, &url)?)?;
      Ok(())
    },
    ConfigNode::Array(items) => {
      for item in items {
        apply_target_node(engine, item)?;
      }
      Ok(())
    },
    other => Err(EngineError::InvalidConfig(format!(
      "bad log_target value: {:?}",
      other
    ))),
  }
}

/// Applies a full configuration tree to the engine.
pub fn apply_config(engine: &Engine, config: &ConfigNode) -> EngineResult<()> {
  let map = config
    .as_map()
    .ok_or_else(|| EngineError::InvalidConfig("configuration root must be a map".to_string()))?;

  // Default format first so targets added below inherit it.
  if let Some(node) = map.get("log_format") {
    let pattern = node
      .as_str()
      .ok_or_else(|| EngineError::InvalidConfig("log_format must be a string".to_string()))?;
    engine.set_default_format(pattern)?;
  }

  if let Some(node) = map.get("log_level") {
    let spec = node
      .as_str()
      .ok_or_else(|| EngineError::InvalidConfig("log_level must be a string".to_string()))?;
    let (level, mode) = parse_level_spec(spec)?;
    engine.set_level("", level, mode)?;
  }

  // Root filter: the explicit expression and the rate-limit shortcut are
  // conjoined when both appear.
  let mut root_filters: Vec<Arc<dyn Filter>> = Vec::new();
  if let Some(node) = map.get("log_filter") {
    let expr = node
      .as_str()
      .ok_or_else(|| EngineError::InvalidConfig("log_filter must be a string".to_string()))?;
    root_filters.push(parse_filter(expr, engine.core().filters())?);
  }
  if let Some(node) = map.get("rate_limit") {
    root_filters.push(parse_rate_limit_node(node)?);
  }
  match root_filters.len() {
    0 => {},
    1 => engine.set_source_filter("", Some(root_filters.pop().unwrap()))?,
    _ => engine.set_source_filter("", Some(Arc::new(AndFilter(root_filters))))?,
  }

  if let Some(node) = map.get("log_target") {
    apply_target_node(engine, node)?;
  }

  apply_source_overrides(engine, map)?;
  apply_env_overrides(engine)?;
  Ok(())
}

fn apply_source_overrides(engine: &Engine, map: &BTreeMap<String, ConfigNode>) -> EngineResult<()> {
  for (key, value) in map {
    if let Some(source) = key.strip_suffix(".log_level") {
      let spec = value.as_str().ok_or_else(|| {
        EngineError::InvalidConfig(format!("{} must be a string", key))
      })?;
      let (level, mode) = parse_level_spec(spec)?;
      engine.set_level(source, level, mode)?;
    } else if let Some(source) = key.strip_suffix(".log_affinity") {
      let names: Vec<&str> = match value {
        ConfigNode::String(name) => vec![name.as_str()],
        ConfigNode::Array(items) => {
          let mut names = Vec::new();
          for item in items {
            names.push(item.as_str().ok_or_else(|| {
              EngineError::InvalidConfig(format!("{} entries must be strings", key))
            })?);
          }
          names
        },
        other => {
          return Err(EngineError::InvalidConfig(format!(
            "bad {} value: {:?}",
            key, other
          )))
        },
      };
      engine.bind_affinity(source, &names)?;
    }
  }
  Ok(())
}

fn apply_env_overrides(engine: &Engine) -> EngineResult<()> {
  if let Ok(spec) = std::env::var("MALLARD_LOG_LEVEL") {
    let (level, mode) = parse_level_spec(&spec)?;
    engine.set_level("", level, mode)?;
  }
  if let Ok(pattern) = std::env::var("MALLARD_LOG_FORMAT") {
    engine.set_default_format(&pattern)?;
  }
  if let Ok(expr) = std::env::var("MALLARD_LOG_FILTER") {
    let filter = parse_filter(&expr, engine.core().filters())?;
    engine.set_source_filter("", Some(filter))?;
  }
  Ok(())
}

/// Reapplies only levels and affinities from a configuration subset; every
/// other key is ignored. This is the entrypoint behind dynamic reload.
pub fn reconfigure(engine: &Engine, config: &ConfigNode) -> EngineResult<()> {
  let map = config
    .as_map()
    .ok_or_else(|| EngineError::InvalidConfig("configuration root must be a map".to_string()))?;

  if let Some(node) = map.get("log_level") {
    let spec = node
      .as_str()
      .ok_or_else(|| EngineError::InvalidConfig("log_level must be a string".to_string()))?;
    let (level, mode) = parse_level_spec(spec)?;
    engine.set_level("", level, mode)?;
  }
  apply_source_overrides(engine, map)
}
