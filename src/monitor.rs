//! Periodic resource-usage sampler with CSV export.
//!
//! Polls `/proc/self/status` once per second on a background task and keeps
//! the most recent samples in a ring buffer. Not algorithmically
//! interesting; exists so memory trends can be eyeballed and exported while
//! exercising the networking layer.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Samples retained in the ring buffer (one minute at the default cadence).
const MAX_SAMPLES: usize = 60;

/// One point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
  pub timestamp: DateTime<Utc>,
  /// Resident set size.
  pub rss_bytes: u64,
  /// Peak resident set size over the process lifetime.
  pub peak_rss_bytes: u64,
  /// Virtual memory size.
  pub vm_bytes: u64,
}

/// Background memory sampler.
pub struct MemoryMonitor {
  samples: Arc<Mutex<VecDeque<MemorySample>>>,
  task: Option<JoinHandle<()>>,
}

impl Default for MemoryMonitor {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryMonitor {
  pub fn new() -> Self {
    Self {
      samples: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_SAMPLES))),
      task: None,
    }
  }

  /// Start sampling once per second. A second `start` is a no-op.
  pub fn start(&mut self) {
    if self.task.is_some() {
      return;
    }

    let samples = Arc::clone(&self.samples);
    self.task = Some(tokio::spawn(async move {
      let mut interval = tokio::time::interval(Duration::from_secs(1));
      loop {
        interval.tick().await;
        if let Some(sample) = sample_memory() {
          debug!(rss = sample.rss_bytes, "memory sample");
          let mut buffer = samples.lock().unwrap_or_else(PoisonError::into_inner);
          if buffer.len() == MAX_SAMPLES {
            buffer.pop_front();
          }
          buffer.push_back(sample);
        }
      }
    }));
  }

  /// Stop the sampling task. Collected samples are kept.
  pub fn stop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }

  /// Snapshot of the collected samples, oldest first.
  pub fn samples(&self) -> Vec<MemorySample> {
    self
      .samples
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .copied()
      .collect()
  }

  pub fn latest(&self) -> Option<MemorySample> {
    self
      .samples
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .back()
      .copied()
  }

  /// Write the collected samples as CSV into the temp directory and return
  /// the file path.
  pub fn export_csv(&self) -> Result<PathBuf> {
    let csv = render_csv(&self.samples());

    let filename = format!("pulselog-memory-{}.csv", Utc::now().timestamp());
    let path = std::env::temp_dir().join(filename);
    std::fs::write(&path, csv)
      .map_err(|e| eyre!("Failed to write CSV to {}: {}", path.display(), e))?;

    Ok(path)
  }
}

impl Drop for MemoryMonitor {
  fn drop(&mut self) {
    self.stop();
  }
}

fn render_csv(samples: &[MemorySample]) -> String {
  let mut csv = String::from("timestamp,rss_bytes,peak_rss_bytes,vm_bytes\n");
  for sample in samples {
    csv.push_str(&format!(
      "{},{},{},{}\n",
      sample.timestamp.timestamp(),
      sample.rss_bytes,
      sample.peak_rss_bytes,
      sample.vm_bytes
    ));
  }
  csv
}

/// Read the current memory numbers from procfs. Returns `None` when the
/// fields can't be read (non-Linux platforms, early process teardown).
fn sample_memory() -> Option<MemorySample> {
  let status = std::fs::read_to_string("/proc/self/status").ok()?;
  parse_status(&status)
}

fn parse_status(status: &str) -> Option<MemorySample> {
  let rss_bytes = status_field_kb(status, "VmRSS:")? * 1024;
  let peak_rss_bytes = status_field_kb(status, "VmHWM:")? * 1024;
  let vm_bytes = status_field_kb(status, "VmSize:")? * 1024;

  Some(MemorySample {
    timestamp: Utc::now(),
    rss_bytes,
    peak_rss_bytes,
    vm_bytes,
  })
}

fn status_field_kb(status: &str, field: &str) -> Option<u64> {
  status
    .lines()
    .find(|line| line.starts_with(field))?
    .split_whitespace()
    .nth(1)?
    .parse()
    .ok()
}
