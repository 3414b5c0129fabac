//! Throughput estimation.
//!
//! Instantaneous speed is sampled at most every [`SPEED_SAMPLE_INTERVAL`]
//! and averaged over the last [`SPEED_SAMPLES`] samples, which smooths out
//! the burstiness of chunked sends.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of samples in the moving average
pub const SPEED_SAMPLES: usize = 5;

/// Minimum time between two samples
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Moving-average speed estimator for one file.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last_time: Instant,
    last_bytes: u64,
    samples: VecDeque<f64>,
}

impl SpeedEstimator {
    /// Create an estimator whose first interval starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            last_time: now,
            last_bytes: 0,
            samples: VecDeque::with_capacity(SPEED_SAMPLES),
        }
    }

    /// Forget all samples and start a new interval at `now` with zero bytes.
    pub fn reset(&mut self, now: Instant) {
        self.last_time = now;
        self.last_bytes = 0;
        self.samples.clear();
    }

    /// Record the cumulative byte count at `now` and return the current
    /// estimate in bytes per second.
    ///
    /// A new sample is taken only if at least [`SPEED_SAMPLE_INTERVAL`] has
    /// passed since the previous one.
    pub fn sample(&mut self, cumulative_bytes: u64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_time);

        if elapsed >= SPEED_SAMPLE_INTERVAL {
            let delta = cumulative_bytes.saturating_sub(self.last_bytes);
            let instant = delta as f64 / elapsed.as_secs_f64();

            if self.samples.len() == SPEED_SAMPLES {
                self.samples.pop_front();
            }
            self.samples.push_back(instant);

            self.last_time = now;
            self.last_bytes = cumulative_bytes;
        }

        self.estimate()
    }

    /// Mean of the current samples, 0 while there are none.
    pub fn estimate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

/// Estimated time to move the remaining bytes, `None` if the speed is unknown.
pub fn eta(total: u64, transferred: u64, bps: f64) -> Option<Duration> {
    if !bps.is_finite() || bps <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(transferred) as f64;
    Duration::try_from_secs_f64(remaining / bps).ok()
}

/// Plain average speed over a whole transfer, 0 if no time elapsed.
pub fn average_speed(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}
