//! Network condition simulator for exercising resilience logic.
//!
//! Holds a process-wide fault profile that the client consults once per
//! network attempt. When enabled it can delay the attempt and/or fail it
//! with a configurable probability, so retry/backoff behavior can be
//! validated under controllable degraded conditions. The profile is never
//! persisted; a fresh process starts with simulation disabled.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

use super::error::NetworkError;

/// The active fault profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultProfile {
  pub enabled: bool,
  pub latency_ms: u64,
  /// Probability in [0, 1] that an attempt fails with a simulated error.
  pub failure_rate: f64,
}

impl Default for FaultProfile {
  fn default() -> Self {
    Self {
      enabled: false,
      latency_ms: 0,
      failure_rate: 0.0,
    }
  }
}

/// Mutable simulation state, injected into the client rather than reached
/// for as a global.
#[derive(Debug, Default)]
pub struct NetworkSimulator {
  profile: Mutex<FaultProfile>,
}

impl NetworkSimulator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the active profile. `failure_rate` is clamped to [0, 1].
  pub fn configure(&self, enabled: bool, latency_ms: u64, failure_rate: f64) {
    let mut profile = self.lock();
    profile.enabled = enabled;
    profile.latency_ms = latency_ms;
    profile.failure_rate = failure_rate.clamp(0.0, 1.0);
  }

  /// Copy of the current profile, for display.
  pub fn snapshot(&self) -> FaultProfile {
    *self.lock()
  }

  /// Apply the configured degradation to the calling attempt.
  ///
  /// Reads the profile once (a concurrent `configure` may win or lose the
  /// race, never tear), sleeps the configured latency without holding any
  /// lock, then rolls for a simulated failure. Each retry attempt passes
  /// through here independently.
  pub async fn apply_if_needed(&self) -> Result<(), NetworkError> {
    let profile = self.snapshot();
    if !profile.enabled {
      return Ok(());
    }

    if profile.latency_ms > 0 {
      tokio::time::sleep(Duration::from_millis(profile.latency_ms)).await;
    }

    let roll: f64 = rand::thread_rng().gen_range(0.0..1.0);
    if roll < profile.failure_rate {
      return Err(NetworkError::Simulated);
    }

    Ok(())
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, FaultProfile> {
    self.profile.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
