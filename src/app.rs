//! Run orchestration: identity check, the three pipeline stages and the
//! dashboard updates between them.

use std::fmt;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::PricingSettings;
use crate::events::{run_stage, StageEvent, IDLE_TICK};
use crate::identity::{Identity, IdentityResolver};
use crate::report::{
    self, extension_of, gib, mib, overview_lines, sample_lines, total_size, AgeHistogram, CostEstimate,
    ExtensionCounter,
};
use crate::sync::{EngineStats, FileToSync, SyncEngine};
use crate::telemetry::{estimate_worker_counts, SystemProbe, SystemSnapshot, TelemetryReading, TelemetrySampler};
use crate::ui::Frontend;

/// Exit code when the user declined a prompt or cancelled a running stage.
pub const EXIT_CANCELLED: i32 = 1;
/// Exit code when at least one file failed to upload.
pub const EXIT_FAILURES: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSource {
    Manual,
    Auto,
}

impl fmt::Display for WorkerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSource::Manual => write!(f, "manual"),
            WorkerSource::Auto => write!(f, "auto"),
        }
    }
}

/// Pool sizes for a run and where they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    pub uploads: usize,
    pub checks: usize,
    pub source: WorkerSource,
    pub snapshot: SystemSnapshot,
    pub chunk_size_mb: u64,
}

fn gb_or_unknown(bytes: Option<u64>) -> String {
    bytes.map(|b| format!("{:.1}GB", gib(b))).unwrap_or_else(|| "?".to_string())
}

impl WorkerPlan {
    pub fn log_line(&self) -> String {
        format!(
            "WORKERS: uploads={} checks={} source={} cpu={} mem_total={} mem_avail={} chunk={}MB",
            self.uploads,
            self.checks,
            self.source,
            self.snapshot.logical_cpu_count,
            gb_or_unknown(self.snapshot.total_memory_bytes),
            gb_or_unknown(self.snapshot.available_memory_bytes),
            self.chunk_size_mb
        )
    }
}

/// Decide the pool sizes. A requested count of 0 means auto.
///
/// The plan is manual only when both stages were given; otherwise the
/// auto-tuner fills in whichever stage was left at 0.
pub fn resolve_worker_plan(
    requested_uploads: usize,
    requested_checks: usize,
    chunk_size_mb: u64,
    probe: &mut dyn SystemProbe,
) -> WorkerPlan {
    let snapshot = probe.snapshot();
    if requested_uploads > 0 && requested_checks > 0 {
        return WorkerPlan {
            uploads: requested_uploads,
            checks: requested_checks,
            source: WorkerSource::Manual,
            snapshot,
            chunk_size_mb,
        };
    }

    let (auto_uploads, auto_checks) = estimate_worker_counts(chunk_size_mb, &snapshot);
    WorkerPlan {
        uploads: if requested_uploads > 0 { requested_uploads } else { auto_uploads },
        checks: if requested_checks > 0 { requested_checks } else { auto_checks },
        source: WorkerSource::Auto,
        snapshot,
        chunk_size_mb,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Skip every confirmation prompt.
    pub assume_yes: bool,
}

impl RunOptions {
    fn prompts(&self) -> bool {
        !self.dry_run && !self.assume_yes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    UpToDate,
    DryRun,
    CancelledBeforeCheck,
    CancelledBeforeUpload,
    /// Ctrl+C or Esc while a stage was running.
    Interrupted,
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "Completed",
            RunOutcome::UpToDate => "Up to date",
            RunOutcome::DryRun => "Dry run complete",
            RunOutcome::CancelledBeforeCheck | RunOutcome::CancelledBeforeUpload | RunOutcome::Interrupted => {
                "Cancelled"
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunOutcome::CancelledBeforeCheck | RunOutcome::CancelledBeforeUpload | RunOutcome::Interrupted
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit_code: i32,
    pub outcome: RunOutcome,
    pub stats: EngineStats,
}

/// Smoothed host readings, sampled on every progress event and idle tick.
/// The smoothing weights each sample by the time since the previous one, so
/// bursts of events do not skew the averages.
struct LiveGauges<P: SystemProbe> {
    sampler: TelemetrySampler<P>,
    reading: TelemetryReading,
    threads: Option<usize>,
}

impl<P: SystemProbe> LiveGauges<P> {
    fn new(sampler: TelemetrySampler<P>) -> Self {
        Self {
            sampler,
            reading: TelemetryReading::default(),
            threads: None,
        }
    }

    fn refresh(&mut self) {
        self.reading = self.sampler.sample();
        self.threads = self.sampler.probe_mut().thread_count();
    }

    fn line(&self, workers: usize) -> String {
        let threads = self.threads.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
        format!(
            "Workers: {} | Threads: {} | CPU: {:.0}% | Mem: {:.0}% | Net: {:.1} MiB/s",
            workers, threads, self.reading.cpu_percent, self.reading.mem_percent, self.reading.net_mib_per_sec
        )
    }
}

const INTERRUPTED_NOTE: &str = "Cancelled by user.";

/// Check the keyboard without blocking and cancel the engine on Ctrl+C/Esc.
fn watch_cancel(engine: &SyncEngine, ui: &mut dyn Frontend) -> Result<()> {
    if !engine.is_cancelled() && ui.cancel_requested()? {
        warn!("Cancelled by user; waiting for in-flight files");
        engine.cancel();
        ui.set_footer("Cancelling... waiting for in-flight files");
    }
    Ok(())
}

fn percent(done: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| done as f64 / total as f64 * 100.0)
}

fn per_sec(count: f64, started: Instant) -> f64 {
    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}

/// Upload-stage tallies built from [`StageEvent`]s.
#[derive(Default)]
struct UploadTally {
    done: usize,
    failed: usize,
    bytes: u64,
    extensions: ExtensionCounter,
}

pub struct SyncApp<P: SystemProbe> {
    engine: SyncEngine,
    identity: Box<dyn IdentityResolver>,
    gauges: LiveGauges<P>,
    pricing: PricingSettings,
    options: RunOptions,
    plan: WorkerPlan,
    resolved: Option<Identity>,
    totals: Option<(usize, u64)>,
}

impl<P: SystemProbe> SyncApp<P> {
    pub fn new(
        engine: SyncEngine,
        identity: Box<dyn IdentityResolver>,
        sampler: TelemetrySampler<P>,
        pricing: PricingSettings,
        options: RunOptions,
        plan: WorkerPlan,
    ) -> Self {
        Self {
            engine,
            identity,
            gauges: LiveGauges::new(sampler),
            pricing,
            options,
            plan,
            resolved: None,
            totals: None,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn bucket(&self) -> &str {
        &self.engine.config().bucket_name
    }

    fn local_root(&self) -> PathBuf {
        self.engine.config().local_root.clone()
    }

    fn show_overview(&self, ui: &mut dyn Frontend, status: &str) {
        ui.set_overview(overview_lines(
            &self.local_root(),
            self.bucket(),
            self.resolved.as_ref(),
            self.totals,
            status,
        ));
    }

    /// Drive one full run against `ui`.
    pub fn run(&mut self, ui: &mut dyn Frontend) -> Result<RunReport> {
        self.show_overview(ui, "Resolving identity...");
        ui.redraw()?;
        info!("{}", self.plan.log_line());

        if !self.confirm_identity(ui)? {
            return self.finish(ui, RunOutcome::CancelledBeforeCheck, Some("Cancelled by user before checking."));
        }

        let candidates = self.discover(ui)?;
        self.totals = Some((candidates.len(), total_size(&candidates)));
        if self.interrupted(ui)? {
            return self.finish(ui, RunOutcome::Interrupted, Some(INTERRUPTED_NOTE));
        }

        let to_upload = self.check(ui, &candidates)?;
        if self.interrupted(ui)? {
            return self.finish(ui, RunOutcome::Interrupted, Some(INTERRUPTED_NOTE));
        }
        if to_upload.is_empty() {
            info!("Everything is up to date.");
            return self.finish(ui, RunOutcome::UpToDate, Some("Everything is up to date."));
        }

        let upload_bytes = total_size(&to_upload);
        let estimate = CostEstimate::new(&self.pricing, candidates.len(), to_upload.len(), upload_bytes);
        info!("{}", estimate.log_line());
        for line in sample_lines(&to_upload, self.bucket()) {
            info!("FILE: {}", line);
        }

        if self.options.dry_run {
            info!(count = to_upload.len(), "DRY RUN: no files uploaded");
            return self.finish(ui, RunOutcome::DryRun, None);
        }

        if self.options.prompts() {
            self.show_overview(ui, "Awaiting upload confirmation");
            let question = format!(
                "Proceed with upload of {} files ({:.2} GB)?",
                to_upload.len(),
                gib(upload_bytes)
            );
            if !ui.confirm(&question)? {
                return self.finish(ui, RunOutcome::CancelledBeforeUpload, Some("Cancelled by user before upload."));
            }
        }

        self.upload(ui, &to_upload)?;
        if self.engine.is_cancelled() {
            return self.finish(ui, RunOutcome::Interrupted, Some(INTERRUPTED_NOTE));
        }
        self.finish(ui, RunOutcome::Completed, None)
    }

    /// Poll for a cancel key between stages. True once the engine has been
    /// cancelled, whether now or from inside a stage.
    fn interrupted(&self, ui: &mut dyn Frontend) -> Result<bool> {
        watch_cancel(&self.engine, ui)?;
        Ok(self.engine.is_cancelled())
    }

    fn confirm_identity(&mut self, ui: &mut dyn Frontend) -> Result<bool> {
        match self.identity.resolve_identity() {
            Ok(identity) => {
                info!("IDENTITY: {}", identity.summary());
                info!("ARN: {}", identity.arn);
                self.resolved = Some(identity);
            }
            Err(e) => warn!("Could not resolve AWS identity: {:#}", e),
        }

        self.show_overview(ui, "Awaiting confirmation");
        ui.redraw()?;
        if !self.options.prompts() {
            return Ok(true);
        }

        let question = match &self.resolved {
            Some(identity) => format!("Continue as {}?", identity.summary()),
            None => "Proceed without identity details?".to_string(),
        };
        ui.confirm(&question)
    }

    fn discover(&mut self, ui: &mut dyn Frontend) -> Result<Vec<FileToSync>> {
        self.show_overview(ui, "Discovering files...");
        let started = Instant::now();
        let engine = &self.engine;

        let candidates = run_stage(IDLE_TICK, |_tx| engine.discover_all_files(), |_| {
            watch_cancel(engine, ui)?;
            ui.set_discovery(
                vec![format!("Scanning... {:.1}s", started.elapsed().as_secs_f64())],
                None,
            );
            ui.redraw()
        })?;

        let found = candidates.len();
        ui.set_discovery(
            vec![
                format!("Files found: {}", found),
                format!(
                    "Elapsed: {:.1}s | Rate: {:.1} files/s",
                    started.elapsed().as_secs_f64(),
                    per_sec(found as f64, started)
                ),
            ],
            Some(100.0),
        );
        ui.redraw()?;
        Ok(candidates)
    }

    fn check(&mut self, ui: &mut dyn Frontend, candidates: &[FileToSync]) -> Result<Vec<FileToSync>> {
        self.show_overview(ui, "Checking remote state...");
        let started = Instant::now();
        let total = candidates.len();
        let workers = self.plan.checks;
        let engine = &self.engine;
        let gauges = &mut self.gauges;
        let mut done = 0usize;

        let to_upload = run_stage(
            IDLE_TICK,
            |tx| {
                engine.check_files_to_sync(candidates, |done, total| {
                    let _ = tx.send(StageEvent::CheckProgress { done, total });
                })
            },
            |event| {
                if let Some(StageEvent::CheckProgress { done: d, .. }) = event {
                    done = d;
                }
                watch_cancel(engine, ui)?;
                gauges.refresh();
                ui.set_checking(
                    vec![
                        format!("Checked: {}/{}", done, total),
                        format!(
                            "Elapsed: {:.1}s | Files/s: {:.1}",
                            started.elapsed().as_secs_f64(),
                            per_sec(done as f64, started)
                        ),
                        gauges.line(workers),
                    ],
                    percent(done, total),
                );
                ui.redraw()
            },
        )??;

        ui.set_checking(
            vec![
                format!("Checked: {}/{}", total, total),
                format!("Need upload: {} | Up to date: {}", to_upload.len(), total - to_upload.len()),
                format!("Elapsed: {:.1}s", started.elapsed().as_secs_f64()),
            ],
            Some(100.0),
        );
        ui.redraw()?;
        Ok(to_upload)
    }

    fn upload(&mut self, ui: &mut dyn Frontend, files: &[FileToSync]) -> Result<()> {
        self.show_overview(ui, "Uploading...");
        let started = Instant::now();
        let total = files.len();
        let workers = self.plan.uploads;
        let ages = AgeHistogram::from_files(files, SystemTime::now());
        let engine = &self.engine;
        let gauges = &mut self.gauges;
        let mut tally = UploadTally::default();

        run_stage(
            IDLE_TICK,
            |tx| {
                engine.upload_files(
                    files,
                    |file, success, bytes| {
                        let _ = tx.send(StageEvent::FileDone {
                            extension: extension_of(&file.local_path),
                            success,
                            bytes,
                        });
                    },
                    |done, total| {
                        let _ = tx.send(StageEvent::UploadProgress { done, total });
                    },
                )
            },
            |event| {
                match event {
                    Some(StageEvent::FileDone { extension, success, bytes }) => {
                        if success {
                            tally.bytes += bytes;
                            tally.extensions.record(&extension);
                        } else {
                            tally.failed += 1;
                        }
                    }
                    Some(StageEvent::UploadProgress { done, .. }) => tally.done = done,
                    Some(StageEvent::CheckProgress { .. }) | None => {}
                }
                watch_cancel(engine, ui)?;
                gauges.refresh();
                // Snapshot under the lock, render without it.
                let stats = engine.stats();
                ui.set_upload(
                    vec![
                        format!("Files: {}/{} | Failed: {}", tally.done, total, tally.failed),
                        format!(
                            "Throughput: {:.1} MiB/s | Uploaded: {:.2} GB",
                            mib(tally.bytes) / started.elapsed().as_secs_f64().max(f64::EPSILON),
                            gib(tally.bytes)
                        ),
                        gauges.line(workers),
                        format!("Verify: {}", stats.verification_ratio()),
                        format!("Top Types: {}", tally.extensions.line()),
                        format!("Age: {}", ages.line()),
                    ],
                    percent(tally.done, total),
                );
                ui.redraw()
            },
        )??;
        Ok(())
    }

    fn finish(&mut self, ui: &mut dyn Frontend, outcome: RunOutcome, note: Option<&str>) -> Result<RunReport> {
        let stats = self.engine.stats();
        let exit_code = match outcome {
            o if o.is_cancelled() => EXIT_CANCELLED,
            _ if stats.files_failed > 0 => EXIT_FAILURES,
            _ => 0,
        };

        let mut lines: Vec<String> = note.map(|n| vec![n.to_string()]).unwrap_or_default();
        if outcome != RunOutcome::CancelledBeforeCheck {
            lines.extend(report::summary_lines(&stats));
        }
        ui.set_summary(lines);
        self.show_overview(ui, outcome.status());
        info!(status = outcome.status(), exit_code, "Run finished");
        if outcome == RunOutcome::Interrupted {
            // The user already asked to leave; do not hold the screen.
            ui.redraw()?;
        } else {
            ui.wait_for_quit()?;
        }

        Ok(RunReport {
            exit_code,
            outcome,
            stats,
        })
    }
}
