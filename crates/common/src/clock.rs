//! Clock and timing utilities for keeping the frame loop honest.
//!
//! An export is anchored to a monotonic epoch recorded when the encoder
//! starts. This module provides:
//! - The export clock itself
//! - Drift measurement between the video and audio streams
//! - Per-frame real-time budget accounting

use std::time::{Duration, Instant};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A monotonic clock anchored to the moment an export started.
#[derive(Debug, Clone)]
pub struct ExportClock {
    /// The instant the export started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl ExportClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get nanoseconds elapsed since the export started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Get seconds elapsed since the export started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at export start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The instant `ns` nanoseconds after the epoch.
    pub fn instant_at(&self, ns: u64) -> Instant {
        self.epoch + Duration::from_nanos(ns)
    }

    /// Convert an elapsed nanosecond value to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / 1_000_000_000.0
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (ns).
    pub reference_ns: u64,
    /// Timestamp in the measured stream (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Outcome of checking one frame against its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    OnTime,
    Overrun { late_ns: u64 },
}

/// Real-time budget accounting for a fixed frame rate.
///
/// Frame `i` owns the interval `[i / fps, (i + 1) / fps)` measured from the
/// export epoch. Boundaries are computed from the frame index each time so
/// rounding never accumulates.
#[derive(Debug)]
pub struct FrameBudget {
    fps: u32,
    overruns: u64,
    worst_late_ns: u64,
}

impl FrameBudget {
    /// Create a budget for the given frame rate.
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            overruns: 0,
            worst_late_ns: 0,
        }
    }

    /// Length of one frame interval in nanoseconds (truncated).
    pub fn interval_ns(&self) -> u64 {
        (NANOS_PER_SEC / self.fps as u128) as u64
    }

    /// When frame `frame_index` is due to start.
    pub fn frame_start_ns(&self, frame_index: u64) -> u64 {
        (frame_index as u128 * NANOS_PER_SEC / self.fps as u128) as u64
    }

    /// When frame `frame_index` must be finished.
    pub fn deadline_ns(&self, frame_index: u64) -> u64 {
        self.frame_start_ns(frame_index + 1)
    }

    /// Record that `frame_index` finished at `completed_ns` since the epoch.
    pub fn record(&mut self, frame_index: u64, completed_ns: u64) -> BudgetStatus {
        let deadline = self.deadline_ns(frame_index);
        if completed_ns <= deadline {
            return BudgetStatus::OnTime;
        }
        let late_ns = completed_ns - deadline;
        self.overruns += 1;
        self.worst_late_ns = self.worst_late_ns.max(late_ns);
        BudgetStatus::Overrun { late_ns }
    }

    /// Number of frames that finished after their deadline.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Worst lateness seen so far, in milliseconds.
    pub fn worst_late_ms(&self) -> f64 {
        self.worst_late_ns as f64 / 1_000_000.0
    }
}
