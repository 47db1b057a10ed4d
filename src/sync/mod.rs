//! Sync pipeline: discovery, change detection and upload.

pub mod engine;
pub mod error;
pub mod filter;
pub mod hash;
pub mod keys;
pub mod retry;
pub mod stats;

pub use engine::{EngineConfig, FileState, FileToSync, SyncEngine, DEFAULT_MULTIPART_THRESHOLD};
pub use error::{SyncError, SyncResult};
pub use filter::PathFilter;
pub use hash::{file_digest, file_md5, HashAlgorithm};
pub use keys::remote_key_for;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use stats::EngineStats;
