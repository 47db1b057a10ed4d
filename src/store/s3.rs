use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use opendal::layers::TimeoutLayer;
use opendal::{services::S3, ErrorKind, Operator, Writer};

use crate::aws::AwsSession;
use crate::store::{
    CompletedPart, MultipartSession, ObjectMetadata, ObjectStore, RemoteObject, StoreError,
    StoreErrorKind, StoreResult,
};

const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters kept around so an operator can be rebuilt for a
/// different storage class.
#[derive(Clone)]
struct S3Params {
    bucket: String,
    region: Option<String>,
    endpoint: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl S3Params {
    fn operator(&self, storage_class: &str) -> Result<Operator> {
        let mut builder = S3::default()
            .bucket(&self.bucket)
            .access_key_id(&self.access_key_id)
            .secret_access_key(&self.secret_access_key)
            .default_storage_class(storage_class);

        if let Some(region) = &self.region {
            builder = builder.region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(token) = &self.session_token {
            builder = builder.session_token(token);
        }

        let operator = Operator::new(builder)
            .context("Failed to configure S3 operator")?
            .layer(
                TimeoutLayer::new()
                    .with_timeout(OPERATION_TIMEOUT)
                    .with_io_timeout(IO_TIMEOUT),
            )
            .finish();
        Ok(operator)
    }
}

struct Slot<W> {
    writer: W,
    /// Set once a write or close failed. The writer's buffered state is then
    /// unknown, so it may only be aborted.
    failed: bool,
}

/// Open multipart writers keyed by upload id.
struct SessionTable<W> {
    slots: Mutex<HashMap<String, Slot<W>>>,
}

impl<W> SessionTable<W> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, session: &MultipartSession, writer: W) {
        self.restore(session, writer, false);
    }

    /// Put a writer back after use, marking it failed if the call errored.
    fn restore(&self, session: &MultipartSession, writer: W, failed: bool) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(session.upload_id.clone(), Slot { writer, failed });
        }
    }

    /// Remove the writer whatever its state. Used by abort.
    fn take(&self, operation: &'static str, session: &MultipartSession) -> StoreResult<W> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StoreError::permanent(operation, "writer table poisoned"))?;
        slots
            .remove(&session.upload_id)
            .map(|slot| slot.writer)
            .ok_or_else(|| missing_session(operation, session))
    }

    /// Remove a writer that can still accept data. A failed writer stays
    /// registered so a later abort can discard it.
    fn take_writable(&self, operation: &'static str, session: &MultipartSession) -> StoreResult<W> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StoreError::permanent(operation, "writer table poisoned"))?;
        match slots.get(&session.upload_id) {
            None => Err(missing_session(operation, session)),
            Some(slot) if slot.failed => Err(StoreError::permanent(
                operation,
                format!("multipart session {} for {} already failed", session.upload_id, session.key),
            )),
            Some(_) => slots
                .remove(&session.upload_id)
                .map(|slot| slot.writer)
                .ok_or_else(|| missing_session(operation, session)),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }
}

fn missing_session(operation: &'static str, session: &MultipartSession) -> StoreError {
    StoreError::new(
        StoreErrorKind::NotFound,
        operation,
        format!("no multipart session {} for {}", session.upload_id, session.key),
    )
}

/// S3 (and S3-compatible) object store using OpenDAL.
///
/// Multipart sessions map onto OpenDAL writers: each part is one chunk-sized
/// `write`, `complete` closes the writer and `abort` discards it.
pub struct S3Store {
    session: AwsSession,
    params: S3Params,
    operators: Mutex<HashMap<String, Operator>>,
    writers: SessionTable<Writer>,
    next_upload: AtomicU64,
    chunk_size: usize,
}

impl S3Store {
    /// Connect to `bucket` with the credentials of the session's profile.
    pub fn connect(
        session: AwsSession,
        bucket: &str,
        endpoint: Option<&str>,
        storage_class: &str,
        chunk_size: usize,
    ) -> Result<Self> {
        let credentials = session.credentials()?;
        let params = S3Params {
            bucket: bucket.to_string(),
            region: session.region(),
            endpoint: endpoint.map(str::to_string),
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().map(str::to_string),
        };

        // Build the default operator eagerly so config errors surface at startup.
        let operator = params.operator(storage_class)?;
        let mut operators = HashMap::new();
        operators.insert(storage_class.to_string(), operator);

        Ok(Self {
            session,
            params,
            operators: Mutex::new(operators),
            writers: SessionTable::new(),
            next_upload: AtomicU64::new(1),
            chunk_size,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.params.bucket
    }

    fn operator_for(&self, operation: &'static str, storage_class: &str) -> StoreResult<Operator> {
        let mut operators = self
            .operators
            .lock()
            .map_err(|_| StoreError::permanent(operation, "operator cache poisoned"))?;
        if let Some(op) = operators.get(storage_class) {
            return Ok(op.clone());
        }
        let op = self
            .params
            .operator(storage_class)
            .map_err(|e| StoreError::permanent(operation, format!("{:#}", e)))?;
        operators.insert(storage_class.to_string(), op.clone());
        Ok(op)
    }

    fn default_operator(&self, operation: &'static str) -> StoreResult<Operator> {
        let operators = self
            .operators
            .lock()
            .map_err(|_| StoreError::permanent(operation, "operator cache poisoned"))?;
        operators
            .values()
            .next()
            .cloned()
            .ok_or_else(|| StoreError::permanent(operation, "no S3 operator configured"))
    }
}

fn metadata_pairs(metadata: &ObjectMetadata) -> Vec<(String, String)> {
    metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Classify an OpenDAL error for the retry logic.
fn map_err(operation: &'static str, err: opendal::Error) -> StoreError {
    let kind = match err.kind() {
        ErrorKind::NotFound => StoreErrorKind::NotFound,
        ErrorKind::PermissionDenied | ErrorKind::ConfigInvalid | ErrorKind::Unsupported => {
            StoreErrorKind::Permanent
        }
        _ => StoreErrorKind::Transient,
    };
    StoreError::new(kind, operation, err.to_string())
}

/// A writer that failed mid-write may already have buffered or sent part of
/// the data, so writing the same bytes again could duplicate them. Such
/// failures are never retried on the same session.
fn writer_err(operation: &'static str, err: opendal::Error) -> StoreError {
    let mapped = map_err(operation, err);
    match mapped.kind {
        StoreErrorKind::Transient => StoreError::permanent(operation, mapped.message),
        _ => mapped,
    }
}

impl ObjectStore for S3Store {
    fn put(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &ObjectMetadata,
        storage_class: &str,
    ) -> StoreResult<()> {
        let data = std::fs::read(local_path).map_err(|e| {
            StoreError::permanent("put", format!("failed to read {}: {}", local_path.display(), e))
        })?;
        let op = self.operator_for("put", storage_class)?;
        self.session
            .block_on(op.write_with(key, data).user_metadata(metadata_pairs(metadata)))
            .map(|_| ())
            .map_err(|e| map_err("put", e))
    }

    fn head(&self, key: &str) -> StoreResult<Option<RemoteObject>> {
        let op = self.default_operator("head")?;
        match self.session.block_on(op.stat(key)) {
            Ok(meta) => Ok(Some(RemoteObject {
                content_id: meta.etag().unwrap_or_default().trim_matches('"').to_string(),
                size: meta.content_length(),
                last_modified: meta.last_modified().map(|t| t.to_string()),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_err("head", e)),
        }
    }

    fn multipart_begin(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        storage_class: &str,
    ) -> StoreResult<MultipartSession> {
        let op = self.operator_for("multipart_begin", storage_class)?;
        let writer = self
            .session
            .block_on(
                op.writer_with(key)
                    .chunk(self.chunk_size)
                    .user_metadata(metadata_pairs(metadata)),
            )
            .map_err(|e| map_err("multipart_begin", e))?;

        let session = MultipartSession {
            key: key.to_string(),
            upload_id: format!("w{}", self.next_upload.fetch_add(1, Ordering::Relaxed)),
        };
        self.writers.insert(&session, writer);
        Ok(session)
    }

    fn multipart_put_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let part_id = format!("{:x}", Md5::digest(&data));
        let mut writer = self.writers.take_writable("multipart_put_part", session)?;
        let result = self.session.block_on(writer.write(data));
        self.writers.restore(session, writer, result.is_err());
        result.map_err(|e| writer_err("multipart_put_part", e))?;
        Ok(CompletedPart { part_number, part_id })
    }

    fn multipart_complete(&self, session: &MultipartSession, _parts: &[CompletedPart]) -> StoreResult<()> {
        let mut writer = self.writers.take_writable("multipart_complete", session)?;
        match self.session.block_on(writer.close()) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.writers.restore(session, writer, true);
                Err(writer_err("multipart_complete", e))
            }
        }
    }

    fn multipart_abort(&self, session: &MultipartSession) -> StoreResult<()> {
        let mut writer = self.writers.take("multipart_abort", session)?;
        self.session
            .block_on(writer.abort())
            .map_err(|e| map_err("multipart_abort", e))
    }

    fn describe(&self) -> String {
        match &self.params.endpoint {
            Some(endpoint) => format!("s3://{} ({})", self.params.bucket, endpoint),
            None => format!("s3://{}", self.params.bucket),
        }
    }
}
