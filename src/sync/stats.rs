//! Run counters shared between workers and the dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one engine run. Workers mutate a single instance behind the
/// engine's lock; everyone else works on clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_uploaded: u64,
    pub retries_attempted: u64,
    pub verifications_total: u64,
    pub verifications_passed: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl EngineStats {
    /// Wall-clock seconds between start and end (or `now` while running).
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        match self.start_time {
            Some(start) => {
                let end = self.end_time.unwrap_or(now);
                ((end - start).num_milliseconds().max(0) as f64) / 1000.0
            }
            None => 0.0,
        }
    }

    /// Average upload throughput in bytes per second.
    pub fn throughput_bytes_per_sec(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.elapsed_secs(now);
        if elapsed > 0.0 {
            self.bytes_uploaded as f64 / elapsed
        } else {
            0.0
        }
    }

    /// `passed/total` as a display string, or `-` when nothing was verified.
    pub fn verification_ratio(&self) -> String {
        if self.verifications_total == 0 {
            "-".to_string()
        } else {
            format!("{}/{}", self.verifications_passed, self.verifications_total)
        }
    }

    pub fn files_processed(&self) -> u64 {
        self.files_uploaded + self.files_skipped + self.files_failed
    }
}
