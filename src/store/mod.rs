//! Remote object store interface.
//!
//! The sync engine only talks to the destination through [`ObjectStore`].
//! Calls are blocking: each one occupies the worker thread that issued it.

pub mod s3;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

pub use s3::S3Store;

/// Broad failure class, used to decide whether a call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The object or session does not exist.
    NotFound,
    /// Timeouts, resets, throttling and other failures that may succeed later.
    Transient,
    /// Authentication, permission and configuration failures.
    Permanent,
}

#[derive(Debug, Error)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, operation, message)
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Permanent, operation, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// User metadata attached to uploaded objects.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Result of a remote metadata read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Opaque content identifier (the S3 ETag, without quotes).
    pub content_id: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

impl RemoteObject {
    /// S3 multipart ETags look like `<md5-of-md5s>-<part count>` and are not
    /// comparable to a local content hash.
    pub fn is_multipart(&self) -> bool {
        is_multipart_content_id(&self.content_id)
    }
}

pub fn is_multipart_content_id(content_id: &str) -> bool {
    content_id.contains('-')
}

/// Handle for an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub key: String,
    pub upload_id: String,
}

/// A part accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub part_id: String,
}

/// Blocking object store client.
pub trait ObjectStore: Send + Sync {
    /// Upload a whole file in one request.
    fn put(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &ObjectMetadata,
        storage_class: &str,
    ) -> StoreResult<()>;

    /// Read remote metadata. A missing object is `Ok(None)`.
    fn head(&self, key: &str) -> StoreResult<Option<RemoteObject>>;

    fn multipart_begin(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        storage_class: &str,
    ) -> StoreResult<MultipartSession>;

    /// Upload part `part_number` (1-based). Parts are sent in order.
    fn multipart_put_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<CompletedPart>;

    fn multipart_complete(&self, session: &MultipartSession, parts: &[CompletedPart]) -> StoreResult<()>;

    fn multipart_abort(&self, session: &MultipartSession) -> StoreResult<()>;

    /// Short display form of the destination, e.g. `s3://bucket`.
    fn describe(&self) -> String;
}
