//! usb-backup - Command-line interface for the prioritized backup engine.
//!
//! Scans the source directories, picks the most important files that fit on
//! the device, and copies them with progress reporting to stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use engine::{
    create_job, destination_dir, load_profile_or_default, plan_job, platform,
    progress::human_size, resolve_profile_path, run_job, CancelToken, ChannelSink, EngineConfig,
    JobOptions, Objective, ProgressSink, RunSummary, SignalOutcome, ThroughputMode,
};
use tracing::{info, Level};

/// usb-backup - Back up the most important files that fit on a USB device
#[derive(Parser, Debug)]
#[command(name = "usb-backup")]
#[command(version)]
#[command(about = "Copy the highest-priority files that fit onto a capacity-limited device")]
struct Args {
    /// Comma-separated source directories to scan
    #[arg(long, value_name = "DIRS", default_value = "~")]
    sources: String,

    /// Selection objective: count or space
    #[arg(long, value_name = "OBJECTIVE", default_value = "count")]
    objective: String,

    /// Comma-separated extra exclude glob patterns (matched against full paths)
    #[arg(long, value_name = "GLOBS", default_value = "")]
    exclude: String,

    /// Importance profile JSON (relative paths resolve against the device root)
    #[arg(long, value_name = "PATH", default_value = engine::profile::DEFAULT_PROFILE_NAME)]
    profile: PathBuf,

    /// Destination sub-folder on the device; auto-named unless --resume
    #[arg(long, value_name = "NAME")]
    dest_subdir: Option<String>,

    /// Plan only, do not copy
    #[arg(long)]
    dry_run: bool,

    /// Resume into an existing destination instead of creating a new one
    #[arg(long)]
    resume: bool,

    /// Concurrent copy workers (0 = one per CPU)
    #[arg(long, value_name = "N", default_value_t = 0)]
    workers: usize,

    /// Bytes to leave free on the device
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    reserve: u64,

    /// Disable progress lines (maximum throughput)
    #[arg(long)]
    no_progress: bool,

    /// Copy heuristics for very fast SSD/NVMe media
    #[arg(long)]
    fast_ssd: bool,

    /// Fast-SSD heuristics plus a raised process priority
    #[arg(long)]
    boost: bool,

    /// Device root (defaults to the directory holding this executable)
    #[arg(long, value_name = "PATH")]
    usb_root: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn throughput_mode(&self) -> ThroughputMode {
        if self.boost {
            ThroughputMode::Boost
        } else if self.fast_ssd {
            ThroughputMode::FastSsd
        } else {
            ThroughputMode::Standard
        }
    }

    fn validate(&self) -> Result<()> {
        if self.quiet && self.verbose > 0 {
            bail!("Cannot use both --quiet and --verbose options");
        }
        Ok(())
    }
}

/// How a CLI run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// Planned only
    DryRun { selected: usize, pending: usize },
    /// The copy engine ran to completion (possibly cancelled)
    Finished(RunSummary),
}

impl Outcome {
    fn exit_code(&self) -> i32 {
        match self {
            Outcome::Finished(summary) if summary.errors > 0 => 2,
            _ => 0,
        }
    }
}

/// Prints log lines as they arrive and the aggregate line once per second.
struct Reporter {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    fn spawn(sink: Arc<ChannelSink>, logs: Receiver<String>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = tick(Duration::from_secs(1));
            loop {
                select! {
                    recv(logs) -> line => match line {
                        Ok(line) => println!("{}", line),
                        Err(_) => break,
                    },
                    recv(ticker) -> _ => {
                        if let Some(snapshot) = sink.latest() {
                            println!("{}", snapshot.total_line());
                        }
                    },
                    recv(stop_rx) -> _ => break,
                }
            }
            for line in logs.try_iter() {
                println!("{}", line);
            }
        });
        Reporter {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the reporter
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}

fn install_signal_handler(cancel: &CancelToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || match cancel.cancel() {
        SignalOutcome::First => eprintln!("\nInterrupt received, stopping gracefully..."),
        SignalOutcome::Repeated => {
            eprintln!("Second interrupt, exiting");
            std::process::exit(1);
        }
    })
    .context("Failed to install interrupt handler")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate executable")?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Executable has no parent directory: {}", exe.display()))
}

/// Parse and validate command-line arguments, then run the backup
fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("Warning: {:#}", e);
    }

    let cancel = CancelToken::new();
    if let Err(e) = install_signal_handler(&cancel) {
        eprintln!("Warning: {:#}", e);
    }

    let exit_code = match run_cli(&args, &cancel) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, cancel: &CancelToken) -> Result<Outcome> {
    args.validate().context("Invalid arguments")?;

    let objective: Objective = args.objective.parse().map_err(|e: String| anyhow!(e))?;
    let mode = args.throughput_mode();
    if mode == ThroughputMode::Boost {
        platform::raise_priority();
    }
    let config = EngineConfig::for_mode(mode).with_workers(args.workers);

    let device_root = match &args.usb_root {
        Some(root) => root.clone(),
        None => executable_dir()?,
    };
    let free = platform::usable_free_space(&device_root, args.reserve);
    let destination = destination_dir(&device_root, args.dest_subdir.as_deref(), args.resume)
        .context("Invalid destination sub-folder")?;
    let tiers = load_profile_or_default(&resolve_profile_path(&device_root, &args.profile));

    println!("USB root: {}", device_root.display());
    println!("Destination: {}", destination.display());
    println!("Free space (usable): {}", human_size(free));
    info!(mode = %mode, workers = config.workers, "configuration ready");

    let mut job = create_job(JobOptions {
        sources: split_list(&args.sources).into_iter().map(PathBuf::from).collect(),
        device_root,
        destination,
        objective,
        capacity: free,
        tiers,
        extra_excludes: split_list(&args.exclude),
        config,
    })
    .context("Failed to create backup job")?;

    let channel = if args.no_progress {
        None
    } else {
        let (sink, logs) = ChannelSink::new(1024);
        Some((Arc::new(sink), logs))
    };
    let sink: Option<Arc<ChannelSink>> = channel.as_ref().map(|(sink, _)| Arc::clone(sink));
    let reporter = channel.map(|(sink, logs)| Reporter::spawn(sink, logs));
    let sink_ref: Option<&dyn ProgressSink> = sink.as_deref().map(|s| s as &dyn ProgressSink);

    plan_job(&mut job, cancel, sink_ref).context("Failed to plan backup")?;

    let stats = &job.stats;
    println!(
        "Scanned {} files in {:.2}s ({} total)",
        stats.scanned_files,
        stats.scan_duration.as_secs_f64(),
        human_size(stats.scanned_bytes)
    );
    println!(
        "Selected {} files totalling {} (objective: {})",
        job.plan.len(),
        human_size(job.plan.used_bytes),
        objective
    );
    println!("Already present (same size): {} files", stats.already_present);
    println!(
        "To copy now: {} files, {}",
        stats.pending_files,
        human_size(stats.pending_bytes)
    );

    if args.dry_run {
        drop(reporter);
        let breakdown: Vec<String> = job
            .plan
            .priority_breakdown(5)
            .iter()
            .map(|(priority, count)| format!("{}: {}", priority, count))
            .collect();
        println!("Plan by priority (top 5): [{}]", breakdown.join(", "));
        println!("Dry run complete. No files were copied.");
        return Ok(Outcome::DryRun {
            selected: job.plan.len(),
            pending: job.stats.pending_files,
        });
    }

    println!(
        "Starting copy with {} worker(s)...",
        job.options.config.workers
    );
    let started = Instant::now();
    let summary = run_job(&mut job, cancel, sink_ref).context("Failed to run backup")?;
    drop(reporter);

    if let Some(snapshot) = sink.as_ref().and_then(|s| s.latest()) {
        println!("{}", snapshot.total_line());
    }
    println!(
        "Copy complete in {:.2}s: copied={}, skipped={}, errors={}",
        started.elapsed().as_secs_f64(),
        summary.copied,
        summary.skipped,
        summary.errors
    );
    if summary.cancelled > 0 {
        println!("Cancelled before completion: {} files", summary.cancelled);
    }
    let manifest = job.manifest_path();
    if manifest.exists() {
        println!("Manifest: {}", manifest.display());
    }

    Ok(Outcome::Finished(summary))
}
