//! Settings file and command-line overrides.
//!
//! Settings live in a TOML file, by default
//! `<config dir>/bucket-sync/config.toml`:
//!
//! ```toml
//! [aws]
//! profile = "backup"
//!
//! [s3]
//! bucket_name = "my-backups"
//! storage_class = "STANDARD_IA"
//!
//! [sync]
//! local_path = "/srv/photos"
//! exclude_patterns = ["*.tmp", ".git"]
//! max_concurrent_uploads = 0   # 0 = auto
//! ```
//!
//! Every key is optional except `s3.bucket_name`, which may also come from
//! the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sync::{EngineConfig, HashAlgorithm, RetryPolicy};

const MIB: u64 = 1024 * 1024;

/// Upper bound for either retry delay, in seconds.
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides the IAM account alias shown in the overview.
    #[serde(default)]
    pub account_alias: Option<String>,
}

fn default_profile() -> String {
    "default".to_string()
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            region: None,
            account_alias: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Settings {
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            storage_class: default_storage_class(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    #[serde(default = "default_true")]
    pub verify_upload: bool,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds.
    #[serde(default = "default_retry_delay_base")]
    pub retry_delay_base: f64,
    /// Seconds.
    #[serde(default = "default_retry_delay_max")]
    pub retry_delay_max: f64,
    #[serde(default)]
    pub retry_permanent_errors: bool,
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    #[serde(default = "default_chunk_size_mb")]
    pub multipart_threshold_mb: u64,
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// 0 = auto-tune.
    #[serde(default)]
    pub max_concurrent_uploads: usize,
    /// 0 = auto-tune.
    #[serde(default)]
    pub max_concurrent_checks: usize,
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_base() -> f64 {
    1.0
}

fn default_retry_delay_max() -> f64 {
    60.0
}

fn default_chunk_size_mb() -> u64 {
    100
}

fn default_include_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            verify_upload: true,
            hash_algorithm: HashAlgorithm::default(),
            max_retries: default_max_retries(),
            retry_delay_base: default_retry_delay_base(),
            retry_delay_max: default_retry_delay_max(),
            retry_permanent_errors: false,
            chunk_size_mb: default_chunk_size_mb(),
            multipart_threshold_mb: default_chunk_size_mb(),
            include_patterns: default_include_patterns(),
            exclude_patterns: Vec::new(),
            max_concurrent_uploads: 0,
            max_concurrent_checks: 0,
        }
    }
}

/// Rough S3 prices used for the pre-upload estimate, in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default = "default_head_price")]
    pub head_per_1000: f64,
    #[serde(default = "default_storage_price")]
    pub storage_per_gb_month: f64,
}

fn default_head_price() -> f64 {
    0.0004
}

fn default_storage_price() -> f64 {
    0.023
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            head_per_1000: default_head_price(),
            storage_per_gb_month: default_storage_price(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingSettings {
    /// Configured log file, else `<data dir>/bucket-sync/bucket-sync.log`.
    pub fn log_file(&self) -> PathBuf {
        self.file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bucket-sync")
                .join("bucket-sync.log")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub s3: S3Settings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub pricing: PricingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub bucket_name: Option<String>,
    pub local_path: Option<PathBuf>,
    pub max_concurrent_uploads: Option<usize>,
    pub max_concurrent_checks: Option<usize>,
}

/// Clamp a configured delay into the range `validate` accepts.
fn delay_secs(secs: f64) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, MAX_RETRY_DELAY_SECS) };
    Duration::from_secs_f64(secs)
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bucket-sync").join("config.toml"))
    }

    /// Load settings. An explicit path must exist; a missing default file
    /// just means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                other => {
                    debug!(path = ?other, "No settings file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        info!(path = %path.display(), "Loading settings");
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(profile) = &overrides.profile {
            self.aws.profile = profile.clone();
        }
        if let Some(bucket) = &overrides.bucket_name {
            self.s3.bucket_name = bucket.clone();
        }
        if let Some(path) = &overrides.local_path {
            self.sync.local_path = path.clone();
        }
        if let Some(n) = overrides.max_concurrent_uploads {
            self.sync.max_concurrent_uploads = n;
        }
        if let Some(n) = overrides.max_concurrent_checks {
            self.sync.max_concurrent_checks = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.s3.bucket_name.trim().is_empty() {
            bail!("No bucket configured: set s3.bucket_name or pass --bucket-name");
        }
        if self.sync.chunk_size_mb == 0 {
            bail!("sync.chunk_size_mb must be at least 1");
        }
        let delays = [self.sync.retry_delay_base, self.sync.retry_delay_max];
        if delays.iter().any(|d| !d.is_finite() || *d < 0.0 || *d > MAX_RETRY_DELAY_SECS) {
            bail!(
                "sync.retry_delay_base and sync.retry_delay_max must be between 0 and {} seconds",
                MAX_RETRY_DELAY_SECS
            );
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.sync.max_retries)
            .with_delays(delay_secs(self.sync.retry_delay_base), delay_secs(self.sync.retry_delay_max))
            .with_retry_permanent(self.sync.retry_permanent_errors)
    }

    /// Build the engine configuration with the resolved worker counts.
    pub fn engine_config(&self, uploads: usize, checks: usize) -> EngineConfig {
        EngineConfig {
            profile: self.aws.profile.clone(),
            bucket_name: self.s3.bucket_name.clone(),
            local_root: self.sync.local_path.clone(),
            storage_class: self.s3.storage_class.clone(),
            verify_upload: self.sync.verify_upload,
            hash_algorithm: self.sync.hash_algorithm,
            retry: self.retry_policy(),
            chunk_size_mb: self.sync.chunk_size_mb,
            multipart_threshold: self.sync.multipart_threshold_mb.saturating_mul(MIB),
            include_patterns: self.sync.include_patterns.clone(),
            exclude_patterns: self.sync.exclude_patterns.clone(),
            max_concurrent_uploads: uploads.max(1),
            max_concurrent_checks: checks.max(1),
        }
    }
}
