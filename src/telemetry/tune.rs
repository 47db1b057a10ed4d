//! Worker auto-tuning heuristics.
//!
//! Maps a point-in-time view of the host onto worker counts for the check and
//! upload stages. Every function here is pure and clamps its result, so a
//! bogus snapshot can never produce zero workers or blow past the hard cap.

/// Default ceiling for concurrent uploads.
pub const UPLOAD_HARD_CAP: usize = 32;
/// Default ceiling for concurrent remote metadata checks.
pub const CHECK_HARD_CAP: usize = 64;

/// Smallest chunk size assumed when estimating per-worker memory.
const MIN_CHUNK_MB: u64 = 8;
const MIB: u64 = 1024 * 1024;

/// Host resources at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemSnapshot {
    pub logical_cpu_count: usize,
    pub total_memory_bytes: Option<u64>,
    pub available_memory_bytes: Option<u64>,
}

/// Estimate the number of concurrent upload workers.
///
/// CPU bound is 2x logical cores. Memory bound assumes each worker keeps
/// about two chunks resident and spends at most a quarter of available
/// memory; unknown memory collapses it to a single worker.
pub fn estimate_upload_workers(chunk_size_mb: u64, system: &SystemSnapshot, hard_cap: usize) -> usize {
    let hard_cap = hard_cap.max(1);
    let cpu = system.logical_cpu_count.max(1);

    let per_worker_bytes = chunk_size_mb.max(MIN_CHUNK_MB).saturating_mul(2 * MIB);
    let max_by_mem = match system.available_memory_bytes {
        Some(available) if available > 0 => ((available / 4) / per_worker_bytes).max(1),
        _ => 1,
    };
    let max_by_mem = usize::try_from(max_by_mem).unwrap_or(usize::MAX);

    let max_by_cpu = hard_cap.min(cpu.saturating_mul(2)).max(1);

    max_by_cpu.min(max_by_mem).min(hard_cap).clamp(1, hard_cap)
}

/// Estimate the number of concurrent check (HEAD) workers.
///
/// Checks are small requests, so parallelism scales with 4x logical cores.
pub fn estimate_check_workers(system: &SystemSnapshot, hard_cap: usize) -> usize {
    let hard_cap = hard_cap.max(1);
    let cpu = system.logical_cpu_count.max(1);
    cpu.saturating_mul(4).clamp(1, hard_cap)
}

/// Return `(upload_workers, check_workers)` using the default hard caps.
pub fn estimate_worker_counts(chunk_size_mb: u64, system: &SystemSnapshot) -> (usize, usize) {
    (
        estimate_upload_workers(chunk_size_mb, system, UPLOAD_HARD_CAP),
        estimate_check_workers(system, CHECK_HARD_CAP),
    )
}
