use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bucket_sync::app::{resolve_worker_plan, RunOptions, RunReport, SyncApp};
use bucket_sync::aws::AwsSession;
use bucket_sync::config::{Overrides, Settings};
use bucket_sync::identity::AwsIdentityResolver;
use bucket_sync::store::s3::S3Store;
use bucket_sync::sync::SyncEngine;
use bucket_sync::telemetry::{SysinfoProbe, TelemetrySampler};
use bucket_sync::ui::{format_bytes, shared_log, DashboardLogLayer, LiveDashboard, SharedLog, TerminalKeys};

/// Sync a local directory tree to an S3 bucket with a live dashboard.
#[derive(Parser, Debug)]
#[command(name = "bucket-sync", version, about)]
struct Cli {
    /// Settings file (default: <config dir>/bucket-sync/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// AWS profile name
    #[arg(long)]
    profile: Option<String>,

    /// Destination bucket
    #[arg(long)]
    bucket_name: Option<String>,

    /// Local directory to sync
    #[arg(long)]
    local_path: Option<PathBuf>,

    /// Check only, upload nothing
    #[arg(long)]
    dry_run: bool,

    /// Skip all confirmation prompts
    #[arg(long, visible_alias = "no-confirm")]
    yes: bool,

    /// Concurrent uploads (0 = auto)
    #[arg(long)]
    max_concurrent_uploads: Option<usize>,

    /// Concurrent remote checks (0 = auto)
    #[arg(long)]
    max_concurrent_checks: Option<usize>,

    /// Print the final stats as JSON
    #[arg(long)]
    summary_json: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            profile: self.profile.clone(),
            bucket_name: self.bucket_name.clone(),
            local_path: self.local_path.clone(),
            max_concurrent_uploads: self.max_concurrent_uploads,
            max_concurrent_checks: self.max_concurrent_checks,
        }
    }
}

fn init_logging(settings: &Settings, log: SharedLog) -> Result<()> {
    let path = settings.logging.log_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let pane_level = settings.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
        .with(DashboardLogLayer::new(log).with_min_level(pane_level))
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn build_app(settings: &Settings, options: RunOptions) -> Result<SyncApp<SysinfoProbe>> {
    let session = AwsSession::load(&settings.aws.profile, settings.aws.region.as_deref())?;

    let mut probe = SysinfoProbe::new();
    let plan = resolve_worker_plan(
        settings.sync.max_concurrent_uploads,
        settings.sync.max_concurrent_checks,
        settings.sync.chunk_size_mb,
        &mut probe,
    );

    let engine_config = settings.engine_config(plan.uploads, plan.checks);
    let part_size = usize::try_from(engine_config.part_size()).context("chunk_size_mb too large")?;
    let store = S3Store::connect(
        session.clone(),
        &settings.s3.bucket_name,
        settings.s3.endpoint.as_deref(),
        &settings.s3.storage_class,
        part_size,
    )?;
    let engine = SyncEngine::new(engine_config, Arc::new(store))?;
    let identity = AwsIdentityResolver::new(session).with_alias(settings.aws.account_alias.clone());

    Ok(SyncApp::new(
        engine,
        Box::new(identity),
        TelemetrySampler::new(probe),
        settings.pricing.clone(),
        options,
        plan,
    ))
}

fn run_dashboard(app: &mut SyncApp<SysinfoProbe>, log: SharedLog) -> Result<RunReport> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;

    let mut dashboard = LiveDashboard::new(terminal, TerminalKeys, log);
    let res = app.run(&mut dashboard);

    // Restore terminal
    disable_raw_mode()?;
    execute!(dashboard.terminal_mut().backend_mut(), LeaveAlternateScreen)?;
    dashboard.terminal_mut().show_cursor()?;

    res
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;
    println!("{}", "Sync summary".bold());
    println!("  Outcome:   {}", report.outcome.status());
    println!("  Uploaded:  {}", stats.files_uploaded.to_string().green());
    println!("  Skipped:   {}", stats.files_skipped);
    let failed = stats.files_failed.to_string();
    println!("  Failed:    {}", if stats.files_failed > 0 { failed.red() } else { failed.normal() });
    println!("  Bytes:     {}", format_bytes(stats.bytes_uploaded));
    println!("  Retries:   {}", stats.retries_attempted);
    println!("  Verified:  {}", stats.verification_ratio());
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_overrides(&cli.overrides());
    settings.validate()?;

    let log = shared_log();
    init_logging(&settings, log.clone())?;

    let options = RunOptions {
        dry_run: cli.dry_run,
        assume_yes: cli.yes,
    };
    let mut app = build_app(&settings, options)?;
    let report = run_dashboard(&mut app, log)?;

    print_summary(&report);
    if cli.summary_json {
        println!("{}", serde_json::to_string_pretty(&report.stats)?);
    }

    std::process::exit(report.exit_code);
}
