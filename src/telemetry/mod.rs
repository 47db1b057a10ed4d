//! Host telemetry: worker auto-tuning, smoothing and live sampling.

pub mod sampler;
pub mod smoothing;
pub mod tune;

pub use sampler::{MemoryStats, NetworkCounters, SysinfoProbe, SystemProbe, TelemetryReading, TelemetrySampler};
pub use smoothing::{exponential_moving_average, EmaState, DEFAULT_TIME_CONSTANT_SECS};
pub use tune::{
    estimate_check_workers, estimate_upload_workers, estimate_worker_counts, SystemSnapshot,
    CHECK_HARD_CAP, UPLOAD_HARD_CAP,
};
