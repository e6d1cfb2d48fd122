//! Bounded in-memory cache with least-recently-used eviction.
//!
//! The recency list is a doubly linked list stored in a slab: nodes live in
//! a `Vec` and reference their neighbors by index, so moving or evicting a
//! node only rewrites two index pairs and there is no ownership cycle to
//! manage. A `HashMap` keyed on the cache key points into the slab for O(1)
//! lookup.
//!
//! All operations lock an internal mutex, so a cache instance can be shared
//! freely between tasks: one logical operation completes fully before the
//! next begins. Nothing under the lock performs I/O.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

struct Slot<K, V> {
  key: K,
  value: V,
  prev: Option<usize>,
  next: Option<usize>,
}

struct Inner<K, V> {
  capacity: usize,
  map: HashMap<K, usize>,
  slots: Vec<Option<Slot<K, V>>>,
  free: Vec<usize>,
  /// Most recently used.
  head: Option<usize>,
  /// Least recently used; eviction victim.
  tail: Option<usize>,
}

/// Fixed-capacity key/value cache with strict recency ordering.
pub struct LruCache<K, V> {
  inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
  /// Create a cache holding at most `capacity` entries (clamped to >= 1).
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      inner: Mutex::new(Inner {
        capacity,
        map: HashMap::with_capacity(capacity),
        slots: Vec::with_capacity(capacity),
        free: Vec::new(),
        head: None,
        tail: None,
      }),
    }
  }

  /// Look up a key, promoting it to most-recently-used on a hit.
  ///
  /// A miss has no side effect.
  pub fn get(&self, key: &K) -> Option<V> {
    let mut inner = self.lock();
    let idx = *inner.map.get(key)?;
    inner.unlink(idx);
    inner.push_front(idx);
    inner.slot(idx).map(|s| s.value.clone())
  }

  /// Insert or replace an entry, promoting it to most-recently-used.
  ///
  /// If the insert pushes the cache over capacity, the least-recently-used
  /// entry is evicted.
  pub fn set(&self, key: K, value: V) {
    let mut inner = self.lock();

    if let Some(&idx) = inner.map.get(&key) {
      if let Some(slot) = inner.slot_mut(idx) {
        slot.value = value;
      }
      inner.unlink(idx);
      inner.push_front(idx);
      return;
    }

    let idx = inner.allocate(key.clone(), value);
    inner.map.insert(key, idx);
    inner.push_front(idx);

    if inner.map.len() > inner.capacity {
      inner.evict_tail();
    }
  }

  /// Drop every entry and reset the recency structure.
  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.map.clear();
    inner.slots.clear();
    inner.free.clear();
    inner.head = None;
    inner.tail = None;
  }

  /// Current number of entries.
  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self.lock().map.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
  fn slot(&self, idx: usize) -> Option<&Slot<K, V>> {
    self.slots.get(idx).and_then(|s| s.as_ref())
  }

  fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot<K, V>> {
    self.slots.get_mut(idx).and_then(|s| s.as_mut())
  }

  fn allocate(&mut self, key: K, value: V) -> usize {
    let slot = Slot {
      key,
      value,
      prev: None,
      next: None,
    };
    match self.free.pop() {
      Some(idx) => {
        self.slots[idx] = Some(slot);
        idx
      }
      None => {
        self.slots.push(Some(slot));
        self.slots.len() - 1
      }
    }
  }

  /// Detach a node from the recency list, fixing up neighbors and ends.
  fn unlink(&mut self, idx: usize) {
    let (prev, next) = match self.slot(idx) {
      Some(s) => (s.prev, s.next),
      None => return,
    };

    match prev {
      Some(p) => {
        if let Some(slot) = self.slot_mut(p) {
          slot.next = next;
        }
      }
      None => self.head = next,
    }

    match next {
      Some(n) => {
        if let Some(slot) = self.slot_mut(n) {
          slot.prev = prev;
        }
      }
      None => self.tail = prev,
    }

    if let Some(slot) = self.slot_mut(idx) {
      slot.prev = None;
      slot.next = None;
    }
  }

  fn push_front(&mut self, idx: usize) {
    let old_head = self.head;
    if let Some(slot) = self.slot_mut(idx) {
      slot.prev = None;
      slot.next = old_head;
    }
    if let Some(h) = old_head {
      if let Some(slot) = self.slot_mut(h) {
        slot.prev = Some(idx);
      }
    }
    self.head = Some(idx);
    if self.tail.is_none() {
      self.tail = Some(idx);
    }
  }

  fn evict_tail(&mut self) {
    let Some(idx) = self.tail else { return };
    self.unlink(idx);
    if let Some(slot) = self.slots[idx].take() {
      self.map.remove(&slot.key);
    }
    self.free.push(idx);
  }
}
