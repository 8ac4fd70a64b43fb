//! # Format Message Cache
//!
//! Interns format-string templates and hands out stable 32-bit ids. Binary
//! records carry a template id instead of the template text; the id is
//! resolved back to the template only when a target serializes the record.
//!
//! Ids are stable for the process lifetime and never reused; id `0` is
//! reserved as invalid. The reverse map is append-only, so readers always
//! observe a stable slice.


use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Reserved invalid template id.
pub const INVALID_TEMPLATE_ID: u32 = 0;

#[derive(Debug)]
pub struct MsgCache {
  lookup: RwLock<HashMap<Arc<str>, u32>>,
  // Index `id - 1` holds the template for `id`.
  templates: RwLock<Vec<Arc<str>>>,
}

impl Default for MsgCache {
  fn default() -> Self {
    Self::new()
  }
}

impl MsgCache {
  pub fn new() -> Self {
    Self {
      lookup: RwLock::new(HashMap::with_capacity(1024)),
      templates: RwLock::new(Vec::with_capacity(1024)),
    }
  }

  /// Interns a template and returns its id; returns the existing id when the
  /// template was cached before.
  pub fn cache(&self, template: &str) -> u32 {
    // Read path first: most call-sites intern once and hit here never again,
    // but the bridge and dynamic templates lean on this lookup.
    if let Ok(lookup) = self.lookup.read() {
      if let Some(&id) = lookup.get(template) {
        return id;
      }
    }
    self.cache_slow(template)
  }

  #[cold]
  fn cache_slow(&self, template: &str) -> u32 {
    let mut lookup = self.lookup.write().unwrap();
    // Double-check after taking the write lock.
    if let Some(&id) = lookup.get(template) {
      return id;
    }

    let mut templates = self.templates.write().unwrap();
    let interned: Arc<str> = Arc::from(template);
    templates.push(Arc::clone(&interned));
    let id = templates.len() as u32;
    lookup.insert(interned, id);
    id
  }

  /// Idempotent alias of [`Self::cache`].
  #[inline]
  pub fn get_or_cache(&self, template: &str) -> u32 {
    self.cache(template)
  }

  /// Resolves an id back to its template.
  pub fn get(&self, id: u32) -> Option<Arc<str>> {
    if id == INVALID_TEMPLATE_ID {
      return None;
    }
    self
      .templates
      .read()
      .unwrap()
      .get((id - 1) as usize)
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.templates.read().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
