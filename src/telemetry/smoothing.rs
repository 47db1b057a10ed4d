//! Exponential moving average for noisy telemetry.
//!
//! The smoothing factor is derived from the elapsed time between samples, so
//! irregular sampling cadence decays the same way as a steady one.

use std::time::Instant;

/// Default time constant shared by the network, CPU and memory readings.
pub const DEFAULT_TIME_CONSTANT_SECS: f64 = 5.0;

/// Compute one EMA update.
///
/// `alpha = 1 - e^(-dt / tau)`, clamped to `[0, 1]`.
///
/// - With no `previous` value the sample seeds the average.
/// - A non-positive `dt` or `tau` returns the sample unchanged.
pub fn exponential_moving_average(
    previous: Option<f64>,
    sample: f64,
    delta_seconds: f64,
    time_constant_seconds: f64,
) -> f64 {
    let Some(previous) = previous else {
        return sample;
    };
    if delta_seconds <= 0.0 || time_constant_seconds <= 0.0 {
        return sample;
    }
    let alpha = (1.0 - (-delta_seconds / time_constant_seconds).exp()).clamp(0.0, 1.0);
    previous + alpha * (sample - previous)
}

/// Smoothing state for a single metric.
#[derive(Debug, Clone)]
pub struct EmaState {
    value: Option<f64>,
    last_sample: Option<Instant>,
    time_constant_secs: f64,
}

impl EmaState {
    pub fn new(time_constant_secs: f64) -> Self {
        Self {
            value: None,
            last_sample: None,
            time_constant_secs,
        }
    }

    /// Feed a sample taken at `now` and return the smoothed value.
    pub fn update(&mut self, sample: f64, now: Instant) -> f64 {
        let dt = self
            .last_sample
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        let next = exponential_moving_average(self.value, sample, dt, self.time_constant_secs);
        self.value = Some(next);
        self.last_sample = Some(now);
        next
    }

    /// Current smoothed value, zero before the first sample.
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

impl Default for EmaState {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT_SECS)
    }
}
