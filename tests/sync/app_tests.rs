// Tests for the run orchestration, driven through a headless dashboard

use std::sync::Arc;

use std::time::Duration;

use anyhow::{anyhow, Result};
use ratatui::{backend::TestBackend, Terminal};
use tempfile::TempDir;

use bucket_sync::app::{resolve_worker_plan, RunOptions, RunOutcome, RunReport, SyncApp, EXIT_CANCELLED, EXIT_FAILURES};
use bucket_sync::config::PricingSettings;
use bucket_sync::identity::{Identity, IdentityResolver};
use bucket_sync::store::StoreErrorKind;
use bucket_sync::telemetry::{MemoryStats, NetworkCounters, SystemProbe, TelemetrySampler};
use bucket_sync::ui::{shared_log, Key, KeySource, LiveDashboard, ScriptedKeys, SharedLog};

use crate::common::{engine, test_config, write_file, MemoryStore};

struct QuietProbe;

impl SystemProbe for QuietProbe {
    fn logical_cpu_count(&self) -> usize {
        2
    }
    fn memory_stats(&mut self) -> Option<MemoryStats> {
        None
    }
    fn network_counters(&mut self) -> Option<NetworkCounters> {
        None
    }
    fn cpu_percent(&mut self) -> Option<f64> {
        Some(12.0)
    }
    fn mem_percent(&mut self) -> Option<f64> {
        None
    }
    fn thread_count(&mut self) -> Option<usize> {
        Some(7)
    }
}

struct StaticIdentity(Option<Identity>);

impl IdentityResolver for StaticIdentity {
    fn resolve_identity(&self) -> Result<Identity> {
        self.0.clone().ok_or_else(|| anyhow!("no credentials"))
    }
}

fn alice() -> Identity {
    Identity {
        account_id: "111122223333".to_string(),
        alias: Some("prod".to_string()),
        arn: "arn:aws:iam::111122223333:user/alice".to_string(),
        principal: "alice".to_string(),
        region: "eu-west-1".to_string(),
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    app: SyncApp<QuietProbe>,
    log: SharedLog,
}

fn harness(identity: Option<Identity>, options: RunOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "new.txt", b"fresh content");
    write_file(dir.path(), "docs/readme.md", b"# hello");
    write_file(dir.path(), "same.txt", b"already there");

    let store = Arc::new(MemoryStore::new());
    store.preload("same.txt", b"already there");

    let plan = resolve_worker_plan(2, 2, 1, &mut QuietProbe);
    let mut config = test_config(dir.path());
    config.max_concurrent_uploads = plan.uploads;
    config.max_concurrent_checks = plan.checks;

    let app = SyncApp::new(
        engine(config, &store),
        Box::new(StaticIdentity(identity)),
        TelemetrySampler::new(QuietProbe),
        PricingSettings::default(),
        options,
        plan,
    );

    Harness {
        _dir: dir,
        store,
        app,
        log: shared_log(),
    }
}

fn run(h: &mut Harness, keys: &str) -> (RunReport, LiveDashboard<TestBackend, ScriptedKeys>) {
    let terminal = Terminal::new(TestBackend::new(140, 40)).unwrap();
    let mut dashboard = LiveDashboard::new(terminal, ScriptedKeys::new(keys), h.log.clone());
    let report = h.app.run(&mut dashboard).unwrap();
    (report, dashboard)
}

/// Answers every prompt with `q` and reports a cancel key on the `at`-th poll.
struct CancelOnPoll {
    polls: usize,
    at: usize,
}

impl KeySource for CancelOnPoll {
    fn next_key(&mut self, _timeout: Duration) -> Result<Option<Key>> {
        Ok(Some(Key::Char('q')))
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        self.polls += 1;
        Ok(self.polls == self.at)
    }
}

fn log_lines(log: &SharedLog) -> Vec<String> {
    log.lock().unwrap().tail(usize::MAX).into_iter().map(|l| l.text).collect()
}

#[test]
fn test_declined_identity_does_no_work() {
    let mut h = harness(Some(alice()), RunOptions::default());
    let (report, dashboard) = run(&mut h, "n");

    assert_eq!(report.outcome, RunOutcome::CancelledBeforeCheck);
    assert_eq!(report.exit_code, EXIT_CANCELLED);
    assert!(h.store.calls().is_empty());
    assert!(report.stats.start_time.is_none());
    assert_eq!(dashboard.state().summary, vec!["Cancelled by user before checking.".to_string()]);
    assert_eq!(dashboard.state().footer, "Press q to quit…");
}

#[test]
fn test_missing_identity_asks_to_proceed() {
    let mut h = harness(None, RunOptions::default());
    let (report, dashboard) = run(&mut h, "n");

    assert_eq!(report.outcome, RunOutcome::CancelledBeforeCheck);
    assert!(log_lines(&h.log).contains(&"PROMPT: Proceed without identity details? (no)".to_string()));
    assert!(dashboard.state().overview[0].contains("AWS: unknown"));
}

#[test]
fn test_full_run_uploads_changed_files() {
    let mut h = harness(Some(alice()), RunOptions::default());
    let (report, dashboard) = run(&mut h, "yyq");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.stats.files_uploaded, 2);
    assert_eq!(report.stats.files_skipped, 1);
    assert_eq!(h.store.object("docs/readme.md").unwrap(), b"# hello");

    let state = dashboard.state();
    assert!(state.overview[0].contains("AWS: prod/alice @eu-west-1"));
    assert!(state.overview[0].contains("Files: 3"));
    assert_eq!(state.overview[1], "Status: Completed");
    assert_eq!(state.upload.lines[0], "Files: 2/2 | Failed: 0");
    assert!(state.upload.lines[2].starts_with("Workers: 2 | Threads: 7 | CPU: 12%"));
    assert_eq!(state.upload.lines[3], "Verify: 2/2");
    assert_eq!(state.upload.lines[4], "Top Types: .md:1, .txt:1");
    assert_eq!(state.upload.lines[5], "Age: <1d:2, <1w:0, <1m:0, <6m:0, <1y:0, >=1y:0");
    assert_eq!(state.upload.percent, Some(100.0));
    assert_eq!(state.checking.lines[1], "Need upload: 2 | Up to date: 1");
    assert!(state.summary.iter().any(|l| l == "Uploaded: 2  Skipped: 1  Failed: 0"));

    let log = log_lines(&h.log);
    assert!(log.iter().any(|l| l.starts_with("PROMPT: Proceed with upload of 2 files")));
}

#[test]
fn test_declined_upload_stops_after_check() {
    let mut h = harness(Some(alice()), RunOptions::default());
    let (report, _) = run(&mut h, "yn");

    assert_eq!(report.outcome, RunOutcome::CancelledBeforeUpload);
    assert_eq!(report.exit_code, EXIT_CANCELLED);
    assert_eq!(h.store.count_op("head"), 3);
    assert_eq!(h.store.count_op("put"), 0);
}

#[test]
fn test_dry_run_never_uploads_or_prompts() {
    let options = RunOptions {
        dry_run: true,
        assume_yes: false,
    };
    let mut h = harness(Some(alice()), options);
    let (report, _) = run(&mut h, "");

    assert_eq!(report.outcome, RunOutcome::DryRun);
    assert_eq!(report.exit_code, 0);
    assert_eq!(h.store.count_op("put"), 0);
    assert_eq!(h.store.count_op("head"), 3);
    assert!(!log_lines(&h.log).iter().any(|l| l.starts_with("PROMPT")));
}

#[test]
fn test_up_to_date_short_circuits() {
    let options = RunOptions {
        dry_run: false,
        assume_yes: true,
    };
    let mut h = harness(Some(alice()), options);
    h.store.preload("new.txt", b"fresh content");
    h.store.preload("docs/readme.md", b"# hello");
    let (report, dashboard) = run(&mut h, "");

    assert_eq!(report.outcome, RunOutcome::UpToDate);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.stats.files_skipped, 3);
    assert_eq!(dashboard.state().summary[0], "Everything is up to date.");
    assert_eq!(dashboard.state().upload.lines, vec!["Waiting...".to_string()]);
}

#[test]
fn test_failed_files_set_exit_code() {
    let options = RunOptions {
        dry_run: false,
        assume_yes: true,
    };
    let mut h = harness(Some(alice()), options);
    h.store.fail("put", "new.txt", StoreErrorKind::Permanent, None);
    let (report, dashboard) = run(&mut h, "");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exit_code, EXIT_FAILURES);
    assert_eq!(report.stats.files_failed, 1);
    assert_eq!(dashboard.state().upload.lines[0], "Files: 2/2 | Failed: 1");
}

#[test]
fn test_ctrl_c_after_identity_stops_before_check() {
    let mut h = harness(Some(alice()), RunOptions::default());
    let (report, dashboard) = run(&mut h, "y\u{3}");

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.exit_code, EXIT_CANCELLED);
    assert!(h.store.calls().is_empty());
    assert_eq!(dashboard.state().summary[0], "Cancelled by user.");
    assert_eq!(dashboard.state().overview[1], "Status: Cancelled");
    assert!(dashboard.state().footer.starts_with("Cancelling"));
}

#[test]
fn test_ctrl_c_during_check_never_uploads() {
    let options = RunOptions {
        dry_run: false,
        assume_yes: true,
    };
    let mut h = harness(Some(alice()), options);
    let terminal = Terminal::new(TestBackend::new(140, 40)).unwrap();
    // First poll follows discovery, the second comes from the check stage.
    let keys = CancelOnPoll { polls: 0, at: 2 };
    let mut dashboard = LiveDashboard::new(terminal, keys, h.log.clone());
    let report = h.app.run(&mut dashboard).unwrap();

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.exit_code, EXIT_CANCELLED);
    assert!(h.store.count_op("head") <= 3);
    assert_eq!(h.store.count_op("put"), 0);
    assert_eq!(report.stats.files_uploaded, 0);
    assert!(h.app.engine().is_cancelled());
}
