//! Text shown in the dashboard panes and the final summary.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;

use crate::config::PricingSettings;
use crate::identity::Identity;
use crate::sync::{EngineStats, FileToSync};
use crate::ui::format_bytes;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Number of files listed before the upload prompt.
pub const SAMPLE_FILES: usize = 10;

pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

pub fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

/// The two-line overview: destination, account and totals, then status.
pub fn overview_lines(
    local_root: &Path,
    bucket: &str,
    identity: Option<&Identity>,
    totals: Option<(usize, u64)>,
    status: &str,
) -> Vec<String> {
    let bucket = if bucket.is_empty() { "(unknown)" } else { bucket };
    let left = format!("Sync: [{}] => [s3://{}]", local_root.display(), bucket);
    let mid = match identity {
        Some(id) => {
            let account = id.alias.as_deref().unwrap_or(&id.account_id);
            let account = if account.is_empty() { "account?" } else { account };
            format!("AWS: {}/{} @{}", account, id.principal, id.region)
        }
        None => "AWS: unknown".to_string(),
    };
    let right = match totals {
        Some((files, bytes)) => format!("Files: {} | Size: {:.1} GB", files, gib(bytes)),
        None => "Files: … | Size: …".to_string(),
    };
    vec![format!("{} | {} | {}", left, mid, right), format!("Status: {}", status)]
}

/// File age buckets by modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    Day,
    Week,
    Month,
    HalfYear,
    Year,
    Older,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 6] = [
        AgeBucket::Day,
        AgeBucket::Week,
        AgeBucket::Month,
        AgeBucket::HalfYear,
        AgeBucket::Year,
        AgeBucket::Older,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgeBucket::Day => "<1d",
            AgeBucket::Week => "<1w",
            AgeBucket::Month => "<1m",
            AgeBucket::HalfYear => "<6m",
            AgeBucket::Year => "<1y",
            AgeBucket::Older => ">=1y",
        }
    }

    pub fn from_age(age: Duration) -> Self {
        match age.as_secs() / 86_400 {
            0 => AgeBucket::Day,
            1..=6 => AgeBucket::Week,
            7..=29 => AgeBucket::Month,
            30..=179 => AgeBucket::HalfYear,
            180..=364 => AgeBucket::Year,
            _ => AgeBucket::Older,
        }
    }

    /// Unreadable files count as the oldest bucket.
    pub fn for_path(path: &Path, now: SystemTime) -> Self {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|mtime| Self::from_age(now.duration_since(mtime).unwrap_or_default()))
            .unwrap_or(AgeBucket::Older)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgeHistogram {
    counts: [usize; 6],
}

impl AgeHistogram {
    pub fn from_files(files: &[FileToSync], now: SystemTime) -> Self {
        let mut histogram = Self::default();
        for file in files {
            histogram.add(AgeBucket::for_path(&file.local_path, now));
        }
        histogram
    }

    pub fn add(&mut self, bucket: AgeBucket) {
        self.counts[bucket.index()] += 1;
    }

    pub fn count(&self, bucket: AgeBucket) -> usize {
        self.counts[bucket.index()]
    }

    pub fn line(&self) -> String {
        AgeBucket::ALL
            .iter()
            .map(|b| format!("{}:{}", b.label(), self.count(*b)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Counts of uploaded file extensions.
#[derive(Debug, Clone, Default)]
pub struct ExtensionCounter {
    counts: HashMap<String, usize>,
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "noext".to_string())
}

impl ExtensionCounter {
    pub fn record(&mut self, extension: &str) {
        *self.counts.entry(extension.to_string()).or_insert(0) += 1;
    }

    /// Most common first; ties broken by name.
    pub fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    pub fn line(&self) -> String {
        let top = self.top(3);
        if top.is_empty() {
            return "-".to_string();
        }
        top.iter().map(|(ext, n)| format!("{}:{}", ext, n)).collect::<Vec<_>>().join(", ")
    }
}

/// Rough cost of the check and upload phases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub head_requests: usize,
    pub upload_files: usize,
    pub upload_bytes: u64,
    pub head_cost: f64,
    pub storage_monthly: f64,
}

impl CostEstimate {
    pub fn new(pricing: &PricingSettings, checked: usize, upload_files: usize, upload_bytes: u64) -> Self {
        Self {
            head_requests: checked,
            upload_files,
            upload_bytes,
            head_cost: checked as f64 / 1000.0 * pricing.head_per_1000,
            storage_monthly: gib(upload_bytes) * pricing.storage_per_gb_month,
        }
    }

    pub fn log_line(&self) -> String {
        format!(
            "ESTIMATES: to_check={} to_upload={} size_gb={:.3} head_cost≈${:.3} storage_monthly≈${:.3}",
            self.head_requests,
            self.upload_files,
            gib(self.upload_bytes),
            self.head_cost,
            self.storage_monthly
        )
    }
}

/// Up to [`SAMPLE_FILES`] numbered entries plus a remainder line.
pub fn sample_lines(files: &[FileToSync], bucket: &str) -> Vec<String> {
    let mut lines: Vec<String> = files
        .iter()
        .take(SAMPLE_FILES)
        .enumerate()
        .map(|(i, f)| format!("{:2}. {} -> s3://{}/{}", i + 1, f.file_name(), bucket, f.remote_key))
        .collect();
    if files.len() > SAMPLE_FILES {
        lines.push(format!("... and {} more files", files.len() - SAMPLE_FILES));
    }
    lines
}

pub fn total_size(files: &[FileToSync]) -> u64 {
    files
        .iter()
        .filter_map(|f| std::fs::metadata(&f.local_path).ok())
        .map(|m| m.len())
        .sum()
}

pub fn summary_lines(stats: &EngineStats) -> Vec<String> {
    vec![
        format!("Duration: {:.1}s", stats.elapsed_secs(Utc::now())),
        format!(
            "Uploaded: {}  Skipped: {}  Failed: {}",
            stats.files_uploaded, stats.files_skipped, stats.files_failed
        ),
        format!("Bytes uploaded: {}", format_bytes(stats.bytes_uploaded)),
        format!("Retries: {}  Verified: {}", stats.retries_attempted, stats.verification_ratio()),
    ]
}
