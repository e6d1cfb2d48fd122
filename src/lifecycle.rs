//! Live-instance accounting for diagnostics.
//!
//! Counts live instances per type name so leaks of long-lived handles show
//! up as growing counters. Purely diagnostic; nothing depends on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Total live instances above which a warning is raised.
const TOTAL_WARN_THRESHOLD: usize = 80;

/// Per-type live instances above which a warning is raised.
const PER_TYPE_WARN_THRESHOLD: usize = 20;

/// Shared counter of live instances, keyed by type name.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
  live: Mutex<HashMap<String, usize>>,
}

impl LifecycleTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, type_name: &str) {
    let mut live = self.lock();
    *live.entry(type_name.to_string()).or_insert(0) += 1;
    info!(type_name, "instance registered");
  }

  pub fn deregister(&self, type_name: &str) {
    let mut live = self.lock();
    match live.get_mut(type_name) {
      Some(count) if *count > 1 => *count -= 1,
      Some(_) => {
        live.remove(type_name);
      }
      None => {}
    }
    info!(type_name, "instance deregistered");
  }

  /// Total live instances across all types.
  pub fn total_live(&self) -> usize {
    self.lock().values().sum()
  }

  /// Live instances for one type.
  #[allow(dead_code)]
  pub fn live_count(&self, type_name: &str) -> usize {
    self.lock().get(type_name).copied().unwrap_or(0)
  }

  /// A human-readable warning when instance counts look like a leak.
  pub fn warning(&self) -> Option<String> {
    if self.total_live() > TOTAL_WARN_THRESHOLD {
      return Some("Live instances are growing. Inspect ownership and drop paths.".to_string());
    }

    let live = self.lock();
    live
      .iter()
      .max_by_key(|(_, count)| **count)
      .filter(|(_, count)| **count > PER_TYPE_WARN_THRESHOLD)
      .map(|(name, count)| format!("{} has {} live instances.", name, count))
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
    self.live.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// RAII registration: registers on creation, deregisters on drop.
pub struct InstanceGuard {
  tracker: Arc<LifecycleTracker>,
  type_name: String,
}

impl InstanceGuard {
  pub fn new(tracker: Arc<LifecycleTracker>, type_name: impl Into<String>) -> Self {
    let type_name = type_name.into();
    tracker.register(&type_name);
    Self { tracker, type_name }
  }
}

impl Drop for InstanceGuard {
  fn drop(&mut self) {
    self.tracker.deregister(&self.type_name);
  }
}
