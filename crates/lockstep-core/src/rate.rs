//! Updates-per-second meter for frame broadcasts.
//!
//! The meter samples once every [`SAMPLE_INTERVAL`] frames and keeps an
//! exponential moving average of the time between server updates.

use std::time::Instant;

/// Number of frames between samples.
pub const SAMPLE_INTERVAL: u64 = 5;

/// Weight given to the newest sample in the moving average.
const SMOOTHING: f64 = 0.1;

/// Exponential moving average of the interval between frame updates.
#[derive(Debug, Clone)]
pub struct UpdateRate {
    avg_update_secs: f64,
    last_sample: Option<Instant>,
    sample_interval: u64,
}

impl Default for UpdateRate {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateRate {
    /// Creates a meter sampling every [`SAMPLE_INTERVAL`] frames.
    pub fn new() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    /// Creates a meter sampling every `interval` frames (minimum 1).
    pub fn with_interval(interval: u64) -> Self {
        Self {
            avg_update_secs: 0.0,
            last_sample: None,
            sample_interval: interval.max(1),
        }
    }

    /// Records that `frame` became current now.
    pub fn observe(&mut self, frame: u64) {
        self.observe_at(frame, Instant::now());
    }

    /// Records that `frame` became current at `now`.
    ///
    /// Frames that are not a multiple of the sample interval are ignored.
    pub fn observe_at(&mut self, frame: u64, now: Instant) {
        if frame % self.sample_interval != 0 {
            return;
        }

        if let Some(last) = self.last_sample {
            let per_frame =
                now.saturating_duration_since(last).as_secs_f64() / self.sample_interval as f64;
            if self.avg_update_secs > 0.0 {
                self.avg_update_secs =
                    self.avg_update_secs * (1.0 - SMOOTHING) + per_frame * SMOOTHING;
            } else {
                self.avg_update_secs = per_frame;
            }
        }

        self.last_sample = Some(now);
    }

    /// Average seconds between updates, or zero before two samples.
    pub fn average_interval_secs(&self) -> f64 {
        self.avg_update_secs
    }

    /// Updates per second, or zero when unknown.
    pub fn updates_per_second(&self) -> f64 {
        if self.avg_update_secs > 0.0 {
            1.0 / self.avg_update_secs
        } else {
            0.0
        }
    }

    /// Forgets all samples.
    pub fn reset(&mut self) {
        self.avg_update_secs = 0.0;
        self.last_sample = None;
    }
}
