//! # Log Source Tree
//!
//! The rooted name-tree of log sources. Each node carries the per-call-site
//! admission state the fast path reads with relaxed atomics: effective
//! level, target affinity mask, and optional epoch-published filters. Tree
//! shape mutations (defining sources, level propagation) hold a tree-wide
//! mutex; none of them touch the logging hot path.
//!
//! Sources are created on first resolution of their dotted qualified name
//! and live until engine teardown.

mod __test__;

use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::gc::ComponentHandle;
use crate::record::LogLevel;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Level propagation applied to the subtree by `set_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagateMode {
  /// Leave descendants untouched.
  None,
  /// Overwrite every descendant.
  Set,
  /// Pull descendants whose threshold is less severe down to the level.
  Restrict,
  /// Raise descendants whose threshold is more severe up to the level.
  Loose,
}

impl PropagateMode {
  /// Parses the propagation sigil used in configuration values:
  /// `*` = Set, `-` = Restrict, `+` = Loose.
  pub fn from_sigil(sigil: char) -> Option<PropagateMode> {
    match sigil {
      '*' => Some(PropagateMode::Set),
      '-' => Some(PropagateMode::Restrict),
      '+' => Some(PropagateMode::Loose),
      _ => None,
    }
  }
}

/// Number of target slots covered by the affinity mask. Targets in slots at
/// or above this bound are reachable from every source; private routing for
/// them uses passkeys instead.
pub const AFFINITY_MASK_BITS: usize = 64;

/// A node in the source tree.
pub struct LogSource {
  id: u32,
  name: String,
  qualified_name: Arc<str>,
  parent: Weak<LogSource>,
  children: Mutex<BTreeMap<String, Arc<LogSource>>>,
  effective_level: AtomicU8,
  affinity_mask: AtomicU64,
  passkeys: Mutex<SmallVec<[u32; 4]>>,
  /// Optional per-source record filter, epoch-published.
  pub filter: ComponentHandle<dyn Filter>,
  /// Optional life-sign admission filter, epoch-published.
  pub life_sign_filter: ComponentHandle<dyn Filter>,
}

impl std::fmt::Debug for LogSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LogSource")
      .field("id", &self.id)
      .field("qualified_name", &self.qualified_name)
      .field("level", &self.level())
      .finish()
  }
}

impl LogSource {
  fn new(id: u32, name: &str, qualified_name: &str, parent: Weak<LogSource>, level: LogLevel) -> Self {
    Self {
      id,
      name: name.to_string(),
      qualified_name: Arc::from(qualified_name),
      parent,
      children: Mutex::new(BTreeMap::new()),
      effective_level: AtomicU8::new(level as u8),
      affinity_mask: AtomicU64::new(u64::MAX),
      passkeys: Mutex::new(SmallVec::new()),
      filter: ComponentHandle::new(None),
      life_sign_filter: ComponentHandle::new(None),
    }
  }

  #[inline]
  pub fn id(&self) -> u32 {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn qualified_name(&self) -> &Arc<str> {
    &self.qualified_name
  }

  pub fn parent(&self) -> Option<Arc<LogSource>> {
    self.parent.upgrade()
  }

  /// The admission threshold, read with a relaxed load on the fast path.
  #[inline]
  pub fn level(&self) -> LogLevel {
    LogLevel::from_u8(self.effective_level.load(Ordering::Relaxed))
  }

  #[inline]
  pub fn set_level_direct(&self, level: LogLevel) {
    self.effective_level.store(level as u8, Ordering::Relaxed);
  }

  /// The fast-path admission check: no locks, no allocation.
  #[inline]
  pub fn can_log(&self, level: LogLevel) -> bool {
    level as u8 <= self.effective_level.load(Ordering::Relaxed)
  }

  #[inline]
  pub fn affinity_mask(&self) -> u64 {
    self.affinity_mask.load(Ordering::Relaxed)
  }

  /// Routes this source to a target slot. Slots at or above
  /// [`AFFINITY_MASK_BITS`] are unaffected by the mask.
  pub fn bind_target_slot(&self, slot: usize) {
    if slot < AFFINITY_MASK_BITS {
      self
        .affinity_mask
        .fetch_or(1u64 << slot, Ordering::Relaxed);
    }
  }

  pub fn unbind_target_slot(&self, slot: usize) {
    if slot < AFFINITY_MASK_BITS {
      self
        .affinity_mask
        .fetch_and(!(1u64 << slot), Ordering::Relaxed);
    }
  }

  /// Replaces the whole mask, e.g. when configuration specifies an explicit
  /// affinity list.
  pub fn set_affinity_mask(&self, mask: u64) {
    self.affinity_mask.store(mask, Ordering::Relaxed);
  }

  pub fn add_passkey(&self, key: u32) {
    let mut keys = self.passkeys.lock().unwrap();
    if !keys.contains(&key) {
      keys.push(key);
    }
  }

  pub fn remove_passkey(&self, key: u32) {
    self.passkeys.lock().unwrap().retain(|k| *k != key);
  }

  pub fn has_passkey(&self, key: u32) -> bool {
    self.passkeys.lock().unwrap().contains(&key)
  }

  pub fn children(&self) -> Vec<Arc<LogSource>> {
    self.children.lock().unwrap().values().cloned().collect()
  }
}

/// The tree of log sources, owned by the engine.
pub struct SourceTree {
  root: Arc<LogSource>,
  by_id: RwLock<HashMap<u32, Arc<LogSource>>>,
  tree_lock: Mutex<()>,
  next_id: AtomicU32,
}

impl std::fmt::Debug for SourceTree {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SourceTree")
      .field("sources", &self.by_id.read().unwrap().len())
      .finish()
  }
}

impl Default for SourceTree {
  fn default() -> Self {
    Self::new(LogLevel::INFO)
  }
}

impl SourceTree {
  pub fn new(root_level: LogLevel) -> Self {
    // The root source has the empty name and id 0.
    let root = Arc::new(LogSource::new(0, "", "", Weak::new(), root_level));
    let mut by_id = HashMap::new();
    by_id.insert(0, Arc::clone(&root));
    Self {
      root,
      by_id: RwLock::new(by_id),
      tree_lock: Mutex::new(()),
      next_id: AtomicU32::new(1),
    }
  }

  pub fn root(&self) -> &Arc<LogSource> {
    &self.root
  }

  /// Resolves a dotted qualified name, creating nodes along the way. With
  /// `create_missing == false` only the final segment may be created;
  /// missing intermediates are an error.
  pub fn define(&self, qualified: &str, create_missing: bool) -> EngineResult<Arc<LogSource>> {
    if qualified.is_empty() {
      return Ok(Arc::clone(&self.root));
    }
    let _tree = self.tree_lock.lock().unwrap();

    let segments: Vec<&str> = qualified.split('.').filter(|s| !s.is_empty()).collect();
    let mut current = Arc::clone(&self.root);
    for (index, segment) in segments.iter().enumerate() {
      let existing = current.children.lock().unwrap().get(*segment).cloned();
      current = match existing {
        Some(child) => child,
        None => {
          let is_last = index == segments.len() - 1;
          if !is_last && !create_missing {
            return Err(EngineError::NotFound(format!(
              "missing intermediate source '{}' in '{}'",
              segment, qualified
            )));
          }
          self.add_child(&current, segment)
        },
      };
    }
    Ok(current)
  }

  fn add_child(&self, parent: &Arc<LogSource>, segment: &str) -> Arc<LogSource> {
    let qualified = if parent.qualified_name.is_empty() {
      segment.to_string()
    } else {
      format!("{}.{}", parent.qualified_name, segment)
    };

    // Children inherit the parent's threshold unless an environment variable
    // overrides it: dots become underscores, suffixed `_log_level`.
    let mut level = parent.level();
    let env_key = format!("{}_log_level", qualified.replace('.', "_"));
    if let Ok(value) = std::env::var(&env_key) {
      if let Some(parsed) = LogLevel::parse(&value) {
        level = parsed;
      }
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let child = Arc::new(LogSource::new(
      id,
      segment,
      &qualified,
      Arc::downgrade(parent),
      level,
    ));
    parent
      .children
      .lock()
      .unwrap()
      .insert(segment.to_string(), Arc::clone(&child));
    self.by_id.write().unwrap().insert(id, Arc::clone(&child));
    child
  }

  /// Looks a source up without creating it.
  pub fn get(&self, qualified: &str) -> Option<Arc<LogSource>> {
    if qualified.is_empty() {
      return Some(Arc::clone(&self.root));
    }
    let mut current = Arc::clone(&self.root);
    for segment in qualified.split('.').filter(|s| !s.is_empty()) {
      let child = current.children.lock().unwrap().get(segment).cloned()?;
      current = child;
    }
    Some(current)
  }

  pub fn get_by_id(&self, id: u32) -> Option<Arc<LogSource>> {
    self.by_id.read().unwrap().get(&id).cloned()
  }

  /// Sets the level of `source` and propagates into its subtree per `mode`.
  pub fn set_level(&self, source: &Arc<LogSource>, level: LogLevel, mode: PropagateMode) {
    let _tree = self.tree_lock.lock().unwrap();
    source.set_level_direct(level);
    if mode == PropagateMode::None {
      return;
    }
    for child in source.children() {
      propagate_level(&child, level, mode);
    }
  }

  /// Visits sources whose qualified name matches `include` (all when absent)
  /// and does not match `exclude`.
  pub fn for_each(
    &self,
    include: Option<&Regex>,
    exclude: Option<&Regex>,
    visitor: &mut dyn FnMut(&Arc<LogSource>),
  ) {
    visit(&self.root, include, exclude, visitor);
  }

  pub fn source_count(&self) -> usize {
    self.by_id.read().unwrap().len()
  }
}

fn propagate_level(source: &Arc<LogSource>, level: LogLevel, mode: PropagateMode) {
  let apply = match mode {
    PropagateMode::Set => true,
    // Severity rank grows toward DIAG; "restrict" caps verbosity, "loose"
    // guarantees at least this much verbosity.
    PropagateMode::Restrict => source.level() as u8 > level as u8,
    PropagateMode::Loose => (source.level() as u8) < level as u8,
    PropagateMode::None => false,
  };
  if apply {
    source.set_level_direct(level);
  }
  for child in source.children() {
    propagate_level(&child, level, mode);
  }
}

fn visit(
  source: &Arc<LogSource>,
  include: Option<&Regex>,
  exclude: Option<&Regex>,
  visitor: &mut dyn FnMut(&Arc<LogSource>),
) {
  let name = source.qualified_name();
  let included = include.map(|re| re.is_match(name)).unwrap_or(true);
  let excluded = exclude.map(|re| re.is_match(name)).unwrap_or(false);
  if included && !excluded {
    visitor(source);
  }
  for child in source.children() {
    visit(&child, include, exclude, visitor);
  }
}
