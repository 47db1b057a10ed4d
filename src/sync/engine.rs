//! Sync engine: discovery, change detection and bounded parallel upload.
//!
//! The engine has no UI. Each stage reports progress through callbacks that
//! may be invoked from any worker thread.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use jwalk::WalkDir;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::store::{CompletedPart, MultipartSession, ObjectMetadata, ObjectStore, RemoteObject};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::filter::PathFilter;
use crate::sync::hash::{file_digest, file_md5, md5_matches, HashAlgorithm};
use crate::sync::keys::remote_key_for;
use crate::sync::retry::{retry_with_backoff, RetryPolicy};
use crate::sync::stats::EngineStats;

const MIB: u64 = 1024 * 1024;

/// Default size above which files go through multipart upload.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * MIB;

/// A discovered local file and the key it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileToSync {
    pub local_path: PathBuf,
    pub remote_key: String,
}

impl FileToSync {
    pub fn new(local_path: impl Into<PathBuf>, remote_key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
        }
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.remote_key.clone())
    }
}

/// Lifecycle of one file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Skipped,
    NeedsUpload,
    Uploaded,
    Failed,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Skipped | FileState::Uploaded | FileState::Failed)
    }

    pub fn can_transition_to(self, next: FileState) -> bool {
        !self.is_terminal()
            && matches!(
                (self, next),
                (FileState::Discovered, FileState::Skipped)
                    | (FileState::Discovered, FileState::NeedsUpload)
                    | (FileState::NeedsUpload, FileState::Uploaded)
                    | (FileState::NeedsUpload, FileState::Failed)
            )
    }

    /// Move to `next`, or stay put when the move would be a regression.
    pub fn advance(self, next: FileState) -> FileState {
        if self.can_transition_to(next) {
            next
        } else {
            warn!(from = ?self, to = ?next, "Ignoring invalid file state transition");
            self
        }
    }
}

/// Everything the engine needs for one run. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub profile: String,
    pub bucket_name: String,
    pub local_root: PathBuf,
    pub storage_class: String,
    pub verify_upload: bool,
    pub hash_algorithm: HashAlgorithm,
    pub retry: RetryPolicy,
    pub chunk_size_mb: u64,
    /// Size in bytes above which uploads use multipart.
    pub multipart_threshold: u64,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_concurrent_uploads: usize,
    pub max_concurrent_checks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            bucket_name: String::new(),
            local_root: PathBuf::from("./data"),
            storage_class: "STANDARD".to_string(),
            verify_upload: true,
            hash_algorithm: HashAlgorithm::Sha256,
            retry: RetryPolicy::default(),
            chunk_size_mb: 100,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            include_patterns: vec!["*".to_string()],
            exclude_patterns: Vec::new(),
            max_concurrent_uploads: 20,
            max_concurrent_checks: 20,
        }
    }
}

impl EngineConfig {
    /// Multipart part size in bytes.
    pub fn part_size(&self) -> u64 {
        self.chunk_size_mb.max(1).saturating_mul(MIB)
    }
}

/// Sync engine bound to one store.
pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<dyn ObjectStore>,
    filter: PathFilter,
    stats: Mutex<EngineStats>,
    cancelled: AtomicBool,
}

impl SyncEngine {
    /// Fails only when the include/exclude patterns do not compile.
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let filter = PathFilter::new(&config.include_patterns, &config.exclude_patterns)?;
        debug!(
            include = ?filter.include_patterns(),
            exclude = ?filter.exclude_patterns(),
            "Path filter ready"
        );
        Ok(Self {
            config,
            store,
            filter,
            stats: Mutex::new(EngineStats::default()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Stop taking new work. Files already being checked or uploaded finish;
    /// the rest are left untouched.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Cancellation requested; no new files will be started");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> EngineStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> MutexGuard<'_, EngineStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_stats(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.lock_stats());
    }

    fn mark_started(&self) {
        self.update_stats(|s| {
            if s.start_time.is_none() {
                s.start_time = Some(Utc::now());
            }
        });
    }

    fn count_retry(&self) {
        self.update_stats(|s| s.retries_attempted += 1);
    }

    fn build_pool(&self, workers: usize, stage: &'static str) -> SyncResult<ThreadPool> {
        Ok(ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(move |i| format!("{}-{}", stage, i))
            .build()?)
    }

    // ---------- Discovery ----------

    /// Walk the local root and return every candidate, sorted by key.
    pub fn discover_all_files(&self) -> Vec<FileToSync> {
        self.mark_started();
        let root = &self.config.local_root;
        if !root.exists() {
            warn!(root = %root.display(), "Local path does not exist; nothing to discover");
            return Vec::new();
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).skip_hidden(false).follow_links(false) {
            if self.is_cancelled() {
                info!(found = files.len(), "Discovery cancelled");
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking {}: {}", root.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();
            let is_file = if file_type.is_symlink() {
                // Symlinked files count, symlinked directories are not entered.
                fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false)
            } else {
                file_type.is_file()
            };
            if !is_file {
                continue;
            }

            let relative = relative_display(&path, root);
            if !self.filter.is_candidate(&relative) {
                debug!(path = %relative, "Filtered out");
                continue;
            }

            let remote_key = remote_key_for(&path, root);
            files.push(FileToSync::new(path, remote_key));
        }

        files.sort_by(|a, b| a.remote_key.cmp(&b.remote_key));
        info!(count = files.len(), root = %root.display(), "Discovery complete");
        files
    }

    // ---------- Check ----------

    /// Decide in parallel which candidates need uploading.
    ///
    /// `on_progress(done, total)` runs once per checked candidate with
    /// strictly increasing `done`. After [`SyncEngine::cancel`] the remaining
    /// candidates are neither checked nor returned.
    pub fn check_files_to_sync<P>(&self, candidates: &[FileToSync], on_progress: P) -> SyncResult<Vec<FileToSync>>
    where
        P: Fn(usize, usize) + Sync,
    {
        self.mark_started();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let total = candidates.len();
        let done = Mutex::new(0usize);
        let pool = self.build_pool(self.config.max_concurrent_checks, "check")?;

        let needs_upload: Vec<FileToSync> = pool.install(|| {
            candidates
                .par_iter()
                .filter_map(|file| {
                    if self.is_cancelled() {
                        return None;
                    }
                    let state = FileState::Discovered.advance(self.check_file(file));
                    tick(&done, total, &on_progress);
                    (state == FileState::NeedsUpload).then(|| file.clone())
                })
                .collect()
        });

        info!(checked = total, needs_upload = needs_upload.len(), "Check complete");
        Ok(needs_upload)
    }

    /// Classify one file as `Skipped` or `NeedsUpload`.
    pub fn check_file(&self, file: &FileToSync) -> FileState {
        let local_size = match fs::metadata(&file.local_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %file.local_path.display(), "Local file vanished: {}", e);
                return self.skip();
            }
        };

        let remote = match self.head_with_retry(&file.remote_key) {
            Ok(Some(remote)) => remote,
            Ok(None) => return FileState::NeedsUpload,
            Err(e) => {
                warn!(key = %file.remote_key, "Remote check failed, scheduling upload: {}", e);
                return FileState::NeedsUpload;
            }
        };

        if remote.size != local_size {
            return FileState::NeedsUpload;
        }
        if remote.is_multipart() {
            // Multipart ETags are not a content hash; equal size is enough.
            return self.skip();
        }

        match file_md5(&file.local_path) {
            Ok(local_md5) if md5_matches(&local_md5, &remote.content_id) => self.skip(),
            Ok(_) => FileState::NeedsUpload,
            Err(e) => {
                warn!(path = %file.local_path.display(), "Cannot hash local file, skipping: {}", e);
                self.skip()
            }
        }
    }

    fn skip(&self) -> FileState {
        self.update_stats(|s| s.files_skipped += 1);
        FileState::Skipped
    }

    fn head_with_retry(&self, key: &str) -> SyncResult<Option<RemoteObject>> {
        retry_with_backoff(&self.config.retry, "head", key, || self.count_retry(), || self.store.head(key))
    }

    // ---------- Upload ----------

    /// Upload `files` in parallel. Per-file failures are counted, never
    /// returned; the only error is failing to start the pool.
    ///
    /// `on_file_done(file, success, bytes)` and `on_progress(done, total)`
    /// each run exactly once per attempted file. Files not yet started when
    /// the engine is cancelled are not attempted.
    pub fn upload_files<D, P>(&self, files: &[FileToSync], on_file_done: D, on_progress: P) -> SyncResult<()>
    where
        D: Fn(&FileToSync, bool, u64) + Sync,
        P: Fn(usize, usize) + Sync,
    {
        self.mark_started();
        let total = files.len();

        if total > 0 {
            let done = Mutex::new(0usize);
            let pool = self.build_pool(self.config.max_concurrent_uploads, "upload")?;

            pool.install(|| {
                files.par_iter().for_each(|file| {
                    if self.is_cancelled() {
                        return;
                    }
                    let (state, bytes) = self.upload_one(file);
                    on_file_done(file, state == FileState::Uploaded, bytes);
                    tick(&done, total, &on_progress);
                });
            });
        }

        self.update_stats(|s| s.end_time = Some(Utc::now()));
        let stats = self.stats();
        info!(
            uploaded = stats.files_uploaded,
            failed = stats.files_failed,
            bytes = stats.bytes_uploaded,
            "Upload complete"
        );
        Ok(())
    }

    fn upload_one(&self, file: &FileToSync) -> (FileState, u64) {
        let state = FileState::NeedsUpload;
        let size = fs::metadata(&file.local_path).map(|m| m.len());

        let result = size
            .map_err(|e| SyncError::local(&file.local_path, e))
            .and_then(|size| self.upload_file(file, size).map(|_| size));

        match result {
            Ok(size) => {
                self.update_stats(|s| {
                    s.files_uploaded += 1;
                    s.bytes_uploaded += size;
                });
                debug!(key = %file.remote_key, size, "Uploaded");
                (state.advance(FileState::Uploaded), size)
            }
            Err(e) => {
                self.update_stats(|s| s.files_failed += 1);
                error!(key = %file.remote_key, "Upload failed: {}", e);
                let size = fs::metadata(&file.local_path).map(|m| m.len()).unwrap_or(0);
                (state.advance(FileState::Failed), size)
            }
        }
    }

    /// Transfer one file and optionally verify it.
    pub fn upload_file(&self, file: &FileToSync, size: u64) -> SyncResult<()> {
        let metadata = self.object_metadata(file)?;
        let multipart = size > self.config.multipart_threshold;

        if multipart {
            self.upload_multipart(file, &metadata)?;
        } else {
            let key = file.remote_key.as_str();
            retry_with_backoff(&self.config.retry, "put", key, || self.count_retry(), || {
                self.store.put(&file.local_path, key, &metadata, &self.config.storage_class)
            })?;
        }

        if self.config.verify_upload {
            self.verify(file, size)?;
        }
        Ok(())
    }

    /// User metadata for `file`, including its digest under the configured
    /// algorithm as `content-<algorithm>`.
    pub fn object_metadata(&self, file: &FileToSync) -> SyncResult<ObjectMetadata> {
        let algorithm = self.config.hash_algorithm;
        let digest = file_digest(&file.local_path, algorithm).map_err(|e| SyncError::local(&file.local_path, e))?;

        let mut metadata = ObjectMetadata::new();
        metadata.insert("original-filename".to_string(), file.file_name());
        metadata.insert("upload-timestamp".to_string(), Utc::now().to_rfc3339());
        metadata.insert("hash-algorithm".to_string(), algorithm.to_string());
        metadata.insert(format!("content-{}", algorithm), digest);
        Ok(metadata)
    }

    fn upload_multipart(&self, file: &FileToSync, metadata: &ObjectMetadata) -> SyncResult<()> {
        let key = file.remote_key.as_str();
        let session = retry_with_backoff(&self.config.retry, "multipart_begin", key, || self.count_retry(), || {
            self.store.multipart_begin(key, metadata, &self.config.storage_class)
        })?;

        match self.upload_parts(file, &session) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort_multipart(&session);
                Err(e)
            }
        }
    }

    fn upload_parts(&self, file: &FileToSync, session: &MultipartSession) -> SyncResult<()> {
        let key = file.remote_key.as_str();
        let mut reader = File::open(&file.local_path).map_err(|e| SyncError::local(&file.local_path, e))?;
        let part_size = usize::try_from(self.config.part_size()).unwrap_or(usize::MAX);

        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut part_number: u32 = 1;
        loop {
            let data = read_chunk(&mut reader, part_size).map_err(|e| SyncError::local(&file.local_path, e))?;
            if data.is_empty() {
                break;
            }
            let part = retry_with_backoff(&self.config.retry, "multipart_put_part", key, || self.count_retry(), || {
                self.store.multipart_put_part(session, part_number, data.clone())
            })?;
            parts.push(part);
            part_number += 1;
        }

        retry_with_backoff(&self.config.retry, "multipart_complete", key, || self.count_retry(), || {
            self.store.multipart_complete(session, &parts)
        })?;
        debug!(key, parts = parts.len(), "Multipart upload complete");
        Ok(())
    }

    fn abort_multipart(&self, session: &MultipartSession) {
        if let Err(e) = self.store.multipart_abort(session) {
            warn!(key = %session.key, upload_id = %session.upload_id, "Multipart abort failed: {}", e);
        }
    }

    fn verify(&self, file: &FileToSync, size: u64) -> SyncResult<()> {
        self.update_stats(|s| s.verifications_total += 1);
        let key = file.remote_key.as_str();

        let fail = |reason: String| SyncError::Verification {
            key: key.to_string(),
            reason,
        };

        let remote = self.head_with_retry(key)?.ok_or_else(|| fail("object missing after upload".to_string()))?;
        if remote.size != size {
            return Err(fail(format!("size mismatch: local {} remote {}", size, remote.size)));
        }
        if !remote.is_multipart() {
            let local = file_md5(&file.local_path).map_err(|e| SyncError::local(&file.local_path, e))?;
            if !md5_matches(&local, &remote.content_id) {
                return Err(fail(format!("checksum mismatch: local {} remote {}", local, remote.content_id)));
            }
        }

        self.update_stats(|s| s.verifications_passed += 1);
        Ok(())
    }
}

/// Bump the shared counter and report while still holding the lock, so
/// observers see `done` strictly increasing.
fn tick<P: Fn(usize, usize)>(done: &Mutex<usize>, total: usize, on_progress: &P) {
    let mut guard = done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard += 1;
    on_progress(*guard, total);
}

/// Read up to `limit` bytes, stopping early only at end of file.
fn read_chunk<R: Read>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.by_ref().take(limit as u64).read_to_end(&mut data)?;
    Ok(data)
}

fn relative_display(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
