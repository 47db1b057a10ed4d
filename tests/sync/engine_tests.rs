// Tests for the sync engine against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bucket_sync::store::StoreErrorKind;
use bucket_sync::sync::{remote_key_for, FileToSync, HashAlgorithm};
use tempfile::TempDir;

use crate::common::{engine, test_config, write_file, MemoryStore};

const MIB: usize = 1024 * 1024;

fn three_file_tree() -> (TempDir, Arc<MemoryStore>) {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "new.txt", b"fresh content");
    write_file(dir.path(), "nested/other.bin", b"\x00\x01\x02");
    write_file(dir.path(), "same.txt", b"already there");

    let store = Arc::new(MemoryStore::new());
    store.preload("same.txt", b"already there");
    (dir, store)
}

#[test]
fn test_discover_check_upload_scenario() {
    let (dir, store) = three_file_tree();
    let engine = engine(test_config(dir.path()), &store);

    let candidates = engine.discover_all_files();
    assert_eq!(candidates.len(), 3);

    let to_upload = engine.check_files_to_sync(&candidates, |_, _| {}).unwrap();
    let mut keys: Vec<&str> = to_upload.iter().map(|f| f.remote_key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["nested/other.bin", "new.txt"]);

    engine.upload_files(&to_upload, |_, _, _| {}, |_, _| {}).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.files_uploaded, 2);
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(stats.files_failed, 0);
    assert_eq!(stats.bytes_uploaded, 13 + 3);
    assert_eq!(stats.verification_ratio(), "2/2");
    assert!(stats.start_time.is_some() && stats.end_time.is_some());
    assert_eq!(store.object("new.txt").unwrap(), b"fresh content");
}

#[test]
fn test_changed_content_same_size_needs_upload() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.txt", b"abcd");
    let store = Arc::new(MemoryStore::new());
    store.preload("a.txt", b"wxyz");
    let engine = engine(test_config(dir.path()), &store);

    let candidates = engine.discover_all_files();
    let to_upload = engine.check_files_to_sync(&candidates, |_, _| {}).unwrap();
    assert_eq!(to_upload.len(), 1);
}

#[test]
fn test_progress_is_strictly_increasing() {
    let dir = TempDir::new().unwrap();
    for i in 0..20 {
        write_file(dir.path(), &format!("f{:02}.txt", i), format!("file {}", i).as_bytes());
    }
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(dir.path()), &store);

    let seen = Mutex::new(Vec::new());
    let candidates = engine.discover_all_files();
    engine
        .check_files_to_sync(&candidates, |done, total| {
            assert_eq!(total, 20);
            seen.lock().unwrap().push(done);
        })
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen, (1..=20).collect::<Vec<_>>());
}

#[test]
fn test_permanent_failure_counted_once() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "denied.txt", b"secret");
    let store = Arc::new(MemoryStore::new());
    store.fail("put", "denied.txt", StoreErrorKind::Permanent, None);
    let engine = engine(test_config(dir.path()), &store);

    let done_calls = Mutex::new(Vec::new());
    let files = engine.discover_all_files();
    engine
        .upload_files(&files, |file, success, _| done_calls.lock().unwrap().push((file.remote_key.clone(), success)), |_, _| {})
        .unwrap();

    assert_eq!(done_calls.into_inner().unwrap(), vec![("denied.txt".to_string(), false)]);
    let stats = engine.stats();
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_uploaded, 0);
    // Permanent errors do not consume the retry budget.
    assert_eq!(store.count("put", "denied.txt"), 1);
    assert_eq!(stats.retries_attempted, 0);
}

#[test]
fn test_permanent_failure_retried_when_configured() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "denied.txt", b"secret");
    let store = Arc::new(MemoryStore::new());
    store.fail("put", "denied.txt", StoreErrorKind::Permanent, None);
    let mut config = test_config(dir.path());
    config.retry = config.retry.with_retry_permanent(true).with_max_retries(2);
    let engine = engine(config, &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert_eq!(store.count("put", "denied.txt"), 3);
    assert_eq!(engine.stats().files_failed, 1);
}

#[test]
fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "flaky.txt", b"eventually");
    let store = Arc::new(MemoryStore::new());
    store.fail("put", "flaky.txt", StoreErrorKind::Transient, Some(2));
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.files_uploaded, 1);
    assert_eq!(stats.retries_attempted, 2);
    assert_eq!(store.count("put", "flaky.txt"), 3);
}

#[test]
fn test_transient_failures_exhaust_budget() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "down.txt", b"never");
    let store = Arc::new(MemoryStore::new());
    store.fail("put", "down.txt", StoreErrorKind::Transient, None);
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert_eq!(store.count("put", "down.txt"), 4);
    assert_eq!(engine.stats().files_failed, 1);
    assert_eq!(engine.stats().retries_attempted, 3);
}

#[test]
fn test_failed_head_during_check_schedules_upload() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "x.txt", b"data");
    let store = Arc::new(MemoryStore::new());
    store.preload("x.txt", b"data");
    store.fail("head", "x.txt", StoreErrorKind::Permanent, None);
    let engine = engine(test_config(dir.path()), &store);

    let candidates = engine.discover_all_files();
    let to_upload = engine.check_files_to_sync(&candidates, |_, _| {}).unwrap();
    assert_eq!(to_upload.len(), 1);
}

#[test]
fn test_multipart_upload_and_size_only_verify() {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..(2 * MIB + MIB / 2)).map(|i| (i % 251) as u8).collect();
    write_file(dir.path(), "big.bin", &data);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert_eq!(store.count("multipart_put_part", "big.bin"), 3);
    assert_eq!(store.count("multipart_complete", "big.bin"), 1);
    assert_eq!(store.count("put", "big.bin"), 0);
    assert_eq!(store.object("big.bin").unwrap(), data);

    let stats = engine.stats();
    assert_eq!(stats.files_uploaded, 1);
    assert_eq!(stats.verification_ratio(), "1/1");

    // A multipart remote object with equal size counts as up to date.
    let to_upload = engine.check_files_to_sync(&files, |_, _| {}).unwrap();
    assert!(to_upload.is_empty());
}

#[test]
fn test_multipart_failure_aborts_session() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "big.bin", &vec![7u8; 2 * MIB]);
    let store = Arc::new(MemoryStore::new());
    store.fail("multipart_put_part", "big.bin", StoreErrorKind::Transient, None);
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert_eq!(store.count("multipart_put_part", "big.bin"), 4);
    assert_eq!(store.count("multipart_abort", "big.bin"), 1);
    assert_eq!(store.count("multipart_complete", "big.bin"), 0);
    assert!(store.object("big.bin").is_none());

    // The abort comes after the last failed part.
    let calls = store.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.op, "multipart_abort");
    assert_eq!(engine.stats().files_failed, 1);
}

#[test]
fn test_upload_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    for i in 0..12 {
        write_file(dir.path(), &format!("f{}.dat", i), b"payload");
    }
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(15)));
    let mut config = test_config(dir.path());
    config.max_concurrent_uploads = 3;
    config.verify_upload = false;
    let engine = engine(config, &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert!(store.max_in_flight() <= 3, "saw {}", store.max_in_flight());
    assert!(store.max_in_flight() >= 2);
    assert_eq!(engine.stats().files_uploaded, 12);
}

#[test]
fn test_check_concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    for i in 0..10 {
        write_file(dir.path(), &format!("f{}.dat", i), b"payload");
    }
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(15)));
    let mut config = test_config(dir.path());
    config.max_concurrent_checks = 1;
    let engine = engine(config, &store);

    let candidates = engine.discover_all_files();
    engine.check_files_to_sync(&candidates, |_, _| {}).unwrap();
    assert_eq!(store.max_in_flight(), 1);
    assert_eq!(store.count_op("head"), 10);
}

#[test]
fn test_on_file_done_called_once_per_file() {
    let (dir, store) = three_file_tree();
    store.fail("put", "new.txt", StoreErrorKind::Permanent, None);
    let engine = engine(test_config(dir.path()), &store);

    let done = AtomicUsize::new(0);
    let progress = AtomicUsize::new(0);
    let files = engine.discover_all_files();
    engine
        .upload_files(
            &files,
            |_, _, _| {
                done.fetch_add(1, Ordering::SeqCst);
            },
            |_, _| {
                progress.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(progress.load(Ordering::SeqCst), 3);
    let stats = engine.stats();
    assert_eq!(stats.files_uploaded + stats.files_failed, 3);
}

#[test]
fn test_keys_are_stable_across_path_forms() {
    let (dir, store) = three_file_tree();
    let engine = engine(test_config(dir.path()), &store);
    let files = engine.discover_all_files();

    let keys: Vec<&str> = files.iter().map(|f| f.remote_key.as_str()).collect();
    assert_eq!(keys, vec!["nested/other.bin", "new.txt", "same.txt"]);

    for file in &files {
        let dotted = dir.path().join(".").join(&file.remote_key);
        assert_eq!(remote_key_for(&dotted, dir.path()), file.remote_key);
        assert_eq!(remote_key_for(&file.local_path, &dir.path().join("nested/..")), file.remote_key);
    }
}

#[test]
fn test_filters_apply_during_discovery() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "keep.jpg", b"1");
    write_file(dir.path(), "drop.txt", b"2");
    write_file(dir.path(), "cache/inner.jpg", b"3");
    write_file(dir.path(), ".hidden.jpg", b"4");

    let store = Arc::new(MemoryStore::new());
    let mut config = test_config(dir.path());
    config.include_patterns = vec!["*.jpg".to_string()];
    config.exclude_patterns = vec!["cache".to_string()];
    let engine = engine(config, &store);

    let keys: Vec<String> = engine.discover_all_files().into_iter().map(|f| f.remote_key).collect();
    assert_eq!(keys, vec![".hidden.jpg".to_string(), "keep.jpg".to_string()]);
}

#[test]
fn test_missing_root_discovers_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(&dir.path().join("absent")), &store);
    assert!(engine.discover_all_files().is_empty());
}

#[test]
fn test_verification_failure_marks_file_failed() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "v.txt", b"verify me");
    let store = Arc::new(MemoryStore::new());
    // The upload succeeds but the object never shows up on HEAD.
    store.fail("head", "v.txt", StoreErrorKind::NotFound, None);
    let engine = engine(test_config(dir.path()), &store);

    let files = vec![FileToSync::new(dir.path().join("v.txt"), "v.txt")];
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.verifications_total, 1);
    assert_eq!(stats.verifications_passed, 0);
    assert_eq!(store.count("put", "v.txt"), 1);
}

#[test]
fn test_storage_class_passed_to_store() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "cold.txt", b"archive");
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config(dir.path());
    config.storage_class = "GLACIER_IR".to_string();
    let engine = engine(config, &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();
    assert_eq!(store.storage_class("cold.txt").as_deref(), Some("GLACIER_IR"));
}

#[test]
fn test_failed_complete_aborts_session() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "big.bin", &vec![3u8; 2 * MIB]);
    let store = Arc::new(MemoryStore::new());
    store.fail("multipart_complete", "big.bin", StoreErrorKind::Transient, None);
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    assert_eq!(store.count("multipart_put_part", "big.bin"), 2);
    assert_eq!(store.count("multipart_complete", "big.bin"), 4);
    assert_eq!(store.count("multipart_abort", "big.bin"), 1);
    assert_eq!(store.calls().last().unwrap().op, "multipart_abort");
    assert!(store.object("big.bin").is_none());

    let stats = engine.stats();
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_uploaded, 0);
    assert_eq!(stats.retries_attempted, 3);
}

#[test]
fn test_vanished_local_file_fails_without_store_calls() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(dir.path()), &store);
    let ghost = FileToSync::new(dir.path().join("gone.txt"), "gone.txt");

    let done = Mutex::new(Vec::new());
    engine
        .upload_files(
            &[ghost],
            |_, success, bytes| done.lock().unwrap().push((success, bytes)),
            |_, _| {},
        )
        .unwrap();

    assert!(store.calls().is_empty());
    assert_eq!(*done.lock().unwrap(), vec![(false, 0)]);
    let stats = engine.stats();
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.retries_attempted, 0);
}

#[test]
fn test_metadata_records_configured_digest() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "hello.txt", b"hello world");
    let store = Arc::new(MemoryStore::new());
    let engine = engine(test_config(dir.path()), &store);

    let files = engine.discover_all_files();
    engine.upload_files(&files, |_, _, _| {}, |_, _| {}).unwrap();

    let metadata = store.metadata("hello.txt").unwrap();
    assert_eq!(metadata["hash-algorithm"], "sha256");
    assert_eq!(
        metadata["content-sha256"],
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
    assert_eq!(metadata["original-filename"], "hello.txt");

    let mut config = test_config(dir.path());
    config.hash_algorithm = HashAlgorithm::Md5;
    let md5_engine = crate::common::engine(config, &store);
    let metadata = md5_engine.object_metadata(&files[0]).unwrap();
    assert_eq!(metadata["content-md5"], "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert!(!metadata.contains_key("content-sha256"));
}

#[test]
fn test_cancel_stops_new_checks_and_uploads() {
    let (dir, store) = three_file_tree();
    let engine = engine(test_config(dir.path()), &store);
    let files = engine.discover_all_files();
    assert_eq!(files.len(), 3);

    engine.cancel();
    assert!(engine.is_cancelled());

    let progress = AtomicUsize::new(0);
    let to_upload = engine
        .check_files_to_sync(&files, |_, _| {
            progress.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(to_upload.is_empty());

    let done = AtomicUsize::new(0);
    engine
        .upload_files(
            &files,
            |_, _, _| {
                done.fetch_add(1, Ordering::SeqCst);
            },
            |_, _| {
                progress.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    assert!(store.calls().is_empty());
    assert_eq!(progress.load(Ordering::SeqCst), 0);
    assert_eq!(done.load(Ordering::SeqCst), 0);
    let stats = engine.stats();
    assert_eq!(stats.files_uploaded + stats.files_failed + stats.files_skipped, 0);
    assert!(engine.discover_all_files().is_empty());
}

#[test]
fn test_cancel_mid_upload_finishes_started_files() {
    let dir = TempDir::new().unwrap();
    for i in 0..8 {
        write_file(dir.path(), &format!("f{}.dat", i), b"payload");
    }
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config(dir.path());
    config.max_concurrent_uploads = 1;
    let engine = engine(config, &store);

    let files = engine.discover_all_files();
    let done = Mutex::new(Vec::new());
    engine
        .upload_files(
            &files,
            |file, success, _| {
                done.lock().unwrap().push((file.remote_key.clone(), success));
                engine.cancel();
            },
            |_, _| {},
        )
        .unwrap();

    // One worker: the file in flight completes, nothing after it starts.
    let done = done.into_inner().unwrap();
    assert_eq!(done.len(), 1);
    assert!(done[0].1);
    assert_eq!(store.count_op("put"), 1);
    assert_eq!(engine.stats().files_uploaded, 1);
}
