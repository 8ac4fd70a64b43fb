//! # Epoch GC Module
//!
//! Deferred reclamation for objects that are read lock-free on the logging
//! hot path and replaced concurrently: log targets, formatters, filters, and
//! flush policies.
//!
//! ## Scheme
//!
//! Epoch values are drawn from a single monotonic counter. A reader *enters*
//! by drawing a fresh epoch value and *leaves* by inserting that value into a
//! [`RollingBitset`]; since every drawn value is inserted exactly once, the
//! bitset's full prefix is the minimum epoch any thread can still be inside.
//! A mutator draws its own epoch, unlinks the old object, and retires it
//! tagged with that epoch; the object is destroyed only once the full prefix
//! has passed it, i.e. once every reader that could have observed the old
//! pointer has left.
//!
//! Retire lists are per thread slot and lock-free (CAS push onto a list
//! head); reclamation claims a whole list with a swap, destroys the eligible
//! entries, and pushes the survivors back.
//!
//! Every managed object carries its own destructor thunk; the collector
//! never applies a generic deleter. Cyclic ownership between managed objects
//! is prohibited.


use crate::bitset::RollingBitset;
use std::cell::RefCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Raw pointer wrapper that may cross thread boundaries inside destructor
/// thunks. Safety rests on the epoch protocol: the pointee is unreachable by
/// the time the thunk runs.
struct SendPtr<T: ?Sized>(*mut T);
unsafe impl<T: ?Sized> Send for SendPtr<T> {}

/// Allocates small dense slot ids to threads, used for GC retire lists and
/// statistics striping. Slots are claimed with a linear CAS probe on first
/// use and returned through a thread-local destructor when the thread exits.
pub struct ThreadSlotRegistry {
  slots: Box<[AtomicU64]>,
  /// Invoked with the slot id right before it is returned to the free pool;
  /// the engine hooks this to zero the departing thread's stat stripes.
  release_hook: RwLock<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

impl std::fmt::Debug for ThreadSlotRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ThreadSlotRegistry")
      .field("max_threads", &self.slots.len())
      .finish()
  }
}

struct SlotGuard {
  registry: Weak<ThreadSlotRegistry>,
  slot: usize,
}

impl Drop for SlotGuard {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.release(self.slot);
    }
  }
}

thread_local! {
  static SLOT_GUARDS: RefCell<Vec<SlotGuard>> = const { RefCell::new(Vec::new()) };
}

impl ThreadSlotRegistry {
  pub fn new(max_threads: usize) -> Arc<Self> {
    let slots: Vec<AtomicU64> = (0..max_threads).map(|_| AtomicU64::new(0)).collect();
    Arc::new(Self {
      slots: slots.into_boxed_slice(),
      release_hook: RwLock::new(None),
    })
  }

  pub fn max_threads(&self) -> usize {
    self.slots.len()
  }

  pub fn set_release_hook(&self, hook: Box<dyn Fn(usize) + Send + Sync>) {
    *self.release_hook.write().unwrap() = Some(hook);
  }

  /// The calling thread's slot in this registry, claiming one on first use.
  /// Returns `None` when more threads are live than the registry was sized
  /// for.
  pub fn current_slot(self: &Arc<Self>) -> Option<usize> {
    let key = Arc::as_ptr(self) as usize;
    SLOT_GUARDS.with(|guards| {
      let mut guards = guards.borrow_mut();
      for guard in guards.iter() {
        if guard.registry.as_ptr() as usize == key {
          return Some(guard.slot);
        }
      }
      let slot = self.alloc()?;
      guards.push(SlotGuard {
        registry: Arc::downgrade(self),
        slot,
      });
      Some(slot)
    })
  }

  fn alloc(&self) -> Option<usize> {
    for (i, slot) in self.slots.iter().enumerate() {
      if slot.load(Ordering::Acquire) == 0
        && slot
          .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
          .is_ok()
      {
        return Some(i);
      }
    }
    None
  }

  fn release(&self, slot: usize) {
    if let Some(hook) = self.release_hook.read().unwrap().as_ref() {
      hook(slot);
    }
    self.slots[slot].store(0, Ordering::Release);
  }
}

struct RetiredNode {
  epoch: u64,
  destroy: Option<Box<dyn FnOnce() + Send>>,
  next: *mut RetiredNode,
}

struct RetireList {
  head: AtomicPtr<RetiredNode>,
}

impl RetireList {
  fn push(&self, node: *mut RetiredNode) {
    let mut head = self.head.load(Ordering::Relaxed);
    loop {
      unsafe { (*node).next = head };
      match self
        .head
        .compare_exchange(head, node, Ordering::AcqRel, Ordering::Relaxed)
      {
        Ok(_) => return,
        Err(current) => head = current,
      }
    }
  }
}

/// The epoch-based garbage collector.
pub struct EpochGc {
  current_epoch: AtomicU64,
  epoch_set: RollingBitset,
  retire_lists: Box<[RetireList]>,
  retire_count: AtomicU64,
  gc_frequency: u64,
  slots: Arc<ThreadSlotRegistry>,
}

impl std::fmt::Debug for EpochGc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EpochGc")
      .field("current_epoch", &self.current_epoch)
      .field("retire_count", &self.retire_count)
      .field("gc_frequency", &self.gc_frequency)
      .finish()
  }
}

/// RAII epoch: entered on construction, left on drop. Pass [`Self::epoch`]
/// to [`EpochGc::retire`] when unlinking objects inside the scope.
pub struct EpochGuard<'a> {
  gc: &'a EpochGc,
  epoch: u64,
}

impl<'a> EpochGuard<'a> {
  #[inline]
  pub fn epoch(&self) -> u64 {
    self.epoch
  }
}

impl<'a> Drop for EpochGuard<'a> {
  fn drop(&mut self) {
    self.gc.end_epoch(self.epoch);
  }
}

impl EpochGc {
  /// `gc_frequency` is the number of retires between automatic reclamation
  /// passes on the retiring thread.
  pub fn new(slots: Arc<ThreadSlotRegistry>, gc_frequency: u64, ring_size_words: usize) -> Self {
    let lists: Vec<RetireList> = (0..slots.max_threads())
      .map(|_| RetireList {
        head: AtomicPtr::new(ptr::null_mut()),
      })
      .collect();
    Self {
      current_epoch: AtomicU64::new(0),
      epoch_set: RollingBitset::new(ring_size_words),
      retire_lists: lists.into_boxed_slice(),
      retire_count: AtomicU64::new(0),
      gc_frequency: gc_frequency.max(1),
      slots,
    }
  }

  pub fn thread_slots(&self) -> &Arc<ThreadSlotRegistry> {
    &self.slots
  }

  /// Draws a fresh epoch and marks it active. Must be paired with exactly
  /// one [`Self::end_epoch`]; prefer [`Self::enter`].
  #[inline]
  pub fn begin_epoch(&self) -> u64 {
    self.current_epoch.fetch_add(1, Ordering::SeqCst)
  }

  /// Marks an epoch drawn by [`Self::begin_epoch`] as finished.
  #[inline]
  pub fn end_epoch(&self, epoch: u64) {
    self.epoch_set.insert(epoch);
  }

  /// Enters a scoped epoch.
  #[inline]
  pub fn enter(&self) -> EpochGuard<'_> {
    EpochGuard {
      gc: self,
      epoch: self.begin_epoch(),
    }
  }

  /// Advances the epoch clock and returns the drawn value, already marked
  /// finished. Call before unlinking a published pointer; any reader that
  /// could have seen the old pointer holds a strictly smaller epoch, so an
  /// object retired with the returned value stays alive until those readers
  /// leave.
  pub fn advance_epoch(&self) -> u64 {
    let epoch = self.begin_epoch();
    self.end_epoch(epoch);
    epoch
  }

  /// The minimum epoch any thread can still be inside.
  #[inline]
  pub fn min_active_epoch(&self) -> u64 {
    self.epoch_set.query_full_prefix()
  }

  /// Hands an unlinked object to the collector. `destroy` runs once no
  /// thread can hold a reference obtained before `retired_at` was drawn.
  pub fn retire(&self, retired_at: u64, destroy: Box<dyn FnOnce() + Send>) {
    let slot = self.slots.current_slot().unwrap_or(0);
    let node = Box::into_raw(Box::new(RetiredNode {
      epoch: retired_at,
      destroy: Some(destroy),
      next: ptr::null_mut(),
    }));
    self.retire_lists[slot].push(node);

    let retires = self.retire_count.fetch_add(1, Ordering::Relaxed) + 1;
    if retires % self.gc_frequency == 0 {
      self.recycle();
    }
  }

  /// Destroys every retired object whose epoch is below the minimum active
  /// epoch. Thread-safe; concurrent calls partition the lists between them.
  pub fn recycle(&self) {
    let min_active = self.min_active_epoch();
    for list in self.retire_lists.iter() {
      let mut node = list.head.swap(ptr::null_mut(), Ordering::AcqRel);
      let mut survivors: *mut RetiredNode = ptr::null_mut();
      while !node.is_null() {
        let next = unsafe { (*node).next };
        if unsafe { (*node).epoch } < min_active {
          let mut owned = unsafe { Box::from_raw(node) };
          if let Some(destroy) = owned.destroy.take() {
            destroy();
          }
        } else {
          unsafe { (*node).next = survivors };
          survivors = node;
        }
        node = next;
      }
      // Push survivors back; concurrent retirers may have grown the list in
      // the meantime, so splice chain by chain.
      while !survivors.is_null() {
        let next = unsafe { (*survivors).next };
        list.push(survivors);
        survivors = next;
      }
    }
  }

  /// Number of objects still waiting on their reclamation epoch. Diagnostic
  /// only; callers must not race this against `recycle`.
  pub fn pending_retired(&self) -> usize {
    let mut count = 0;
    for list in self.retire_lists.iter() {
      let mut node = list.head.load(Ordering::Acquire);
      while !node.is_null() {
        count += 1;
        node = unsafe { (*node).next };
      }
    }
    count
  }
}

impl Drop for EpochGc {
  fn drop(&mut self) {
    // Teardown: no readers remain, destroy everything unconditionally.
    for list in self.retire_lists.iter() {
      let mut node = list.head.swap(ptr::null_mut(), Ordering::AcqRel);
      while !node.is_null() {
        let mut owned = unsafe { Box::from_raw(node) };
        node = owned.next;
        if let Some(destroy) = owned.destroy.take() {
          destroy();
        }
      }
    }
  }
}

/// An atomically swappable, epoch-protected shared handle. This is how a
/// target's formatter, filter, and flush policy are replaced while dispatch
/// reads them lock-free.
pub struct ComponentHandle<T: ?Sized + Send + Sync + 'static> {
  ptr: AtomicPtr<Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ComponentHandle<T> {
  pub fn new(initial: Option<Arc<T>>) -> Self {
    let raw = match initial {
      Some(component) => Box::into_raw(Box::new(component)),
      None => ptr::null_mut(),
    };
    Self {
      ptr: AtomicPtr::new(raw),
    }
  }

  /// Reads the current component. The borrow is pinned to an active epoch
  /// guard; clone the `Arc` to keep the component beyond it.
  #[inline]
  pub fn load<'g>(&self, _guard: &'g EpochGuard<'_>) -> Option<&'g Arc<T>> {
    let raw = self.ptr.load(Ordering::Acquire);
    if raw.is_null() {
      None
    } else {
      Some(unsafe { &*raw })
    }
  }

  /// Publishes a replacement and retires the previous component to the
  /// collector.
  pub fn replace(&self, new: Option<Arc<T>>, gc: &EpochGc) {
    let epoch = gc.advance_epoch();
    let raw = match new {
      Some(component) => Box::into_raw(Box::new(component)),
      None => ptr::null_mut(),
    };
    let old = self.ptr.swap(raw, Ordering::AcqRel);
    if !old.is_null() {
      let old = SendPtr(old);
      gc.retire(
        epoch,
        Box::new(move || {
          let old = old;
          let SendPtr(raw) = old;
          drop(unsafe { Box::from_raw(raw) });
        }),
      );
    }
  }

  /// Whether a component is currently installed.
  pub fn is_installed(&self) -> bool {
    !self.ptr.load(Ordering::Acquire).is_null()
  }

  /// Direct store, for initialization before the handle is shared.
  pub fn set_direct(&mut self, new: Option<Arc<T>>) {
    let raw = match new {
      Some(component) => Box::into_raw(Box::new(component)),
      None => ptr::null_mut(),
    };
    let old = self.ptr.swap(raw, Ordering::AcqRel);
    if !old.is_null() {
      drop(unsafe { Box::from_raw(old) });
    }
  }
}

impl<T: ?Sized + Send + Sync + 'static> Drop for ComponentHandle<T> {
  fn drop(&mut self) {
    let raw = self.ptr.load(Ordering::Acquire);
    if !raw.is_null() {
      drop(unsafe { Box::from_raw(raw) });
    }
  }
}

impl<T: ?Sized + Send + Sync + 'static> std::fmt::Debug for ComponentHandle<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let installed = !self.ptr.load(Ordering::Relaxed).is_null();
    f.debug_struct("ComponentHandle")
      .field("installed", &installed)
      .finish()
  }
}
