use crate::config::{
    DEFAULT_CONFIG_FILE, DEFAULT_SWEEP_OUTPUT, DEFAULT_TEMP_DIR, GENERATED_COEFFS_FILE_NAME,
    GENERATED_POINTS_FILE_NAME, START_SIGNAL_NAME, COMPLETION_SIGNAL_NAME,
};
use crate::engine::signal::{backend_for, SignalBackendKind, SignalChannel};
use crate::engine::{MonitorSettings, RunEngine};
use crate::inputs::{self, CoefficientSpec};
use crate::metrics;
use crate::model::{
    sweep_percent, Implementation, PointsSpec, RunConfig, RunEvent, RunState, SharedChannelConfig,
    SweepEvent,
};
use crate::orchestrator::{process_run_completion, run_controller, utc_timestamp, UiCommand};
use crate::sweep::summary::{summary_lines, write_summary_json, SweepSummary};
use crate::sweep::{progress_line, ResultSink, SweepDriver, SweepPlan};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "compute-bench",
    version,
    about = "Drive an external compute worker over named signals and shared files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Log protocol details (signal raises, drains, file generation)
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Arm the worker once (or --repeat times) and report the result
    Run(RunArgs),
    /// Run the benchmark sweep and write one CSV row per attempted run
    Sweep(SweepArgs),
    /// Generate a file of uniformly random polynomial coefficients
    GenCoeffs(GenCoeffsArgs),
    /// Generate a points spec file (`start end step`)
    GenPoints(GenPointsArgs),
}

/// Where the worker looks for its config and shared files, and how signals are reached.
#[derive(Debug, Args, Clone)]
pub struct ChannelArgs {
    /// Config file read by the worker
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// Directory holding the progress and completion-time files
    #[arg(long, default_value = DEFAULT_TEMP_DIR)]
    pub temp_dir: PathBuf,

    /// Signal primitive shared with the worker
    #[arg(long, value_enum, default_value_t = SignalBackendKind::default())]
    pub signal_backend: SignalBackendKind,

    /// Directory for file-backed signals (default: runtime dir)
    #[arg(long)]
    pub signal_dir: Option<PathBuf>,

    /// Name of the "start computation" signal
    #[arg(long, default_value = START_SIGNAL_NAME)]
    pub start_signal: String,

    /// Name of the "computation completed" signal
    #[arg(long, default_value = COMPLETION_SIGNAL_NAME)]
    pub completion_signal: String,
}

impl ChannelArgs {
    /// Resolve paths to absolute form (the worker may run from another directory).
    pub fn build(&self) -> Result<(SharedChannelConfig, SignalChannel)> {
        let shared = SharedChannelConfig::new(absolute(&self.config_file)?, absolute(&self.temp_dir)?)
            .with_signal_names(&self.start_signal, &self.completion_signal);
        let backend = backend_for(self.signal_backend, self.signal_dir.clone())?;
        let signals = SignalChannel::new(backend, &shared);
        Ok((shared, signals))
    }
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,

    /// Kernel implementation
    #[arg(long, value_enum, default_value_t = Implementation::NativeCompiled)]
    pub implementation: Implementation,

    /// Let the worker use several threads
    #[arg(long)]
    pub multithreading: bool,

    /// Thread count (used with --multithreading)
    #[arg(long, default_value_t = 1)]
    pub threads: u32,

    /// Use the vectorized (AVX) kernel
    #[arg(long)]
    pub avx: bool,

    /// Ask the worker to write the computed values
    #[arg(long)]
    pub save_results: bool,

    /// Results file written by the worker (required with --save-results)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Ask for a chart of the computed values
    #[arg(long)]
    pub generate_chart: bool,

    /// Coefficients file, one value per line
    #[arg(long)]
    pub coefficients: PathBuf,

    /// Points spec file (`start end step`)
    #[arg(long)]
    pub points: PathBuf,

    /// Give up on a run after this long
    #[arg(long, default_value = "600s")]
    pub timeout: humantime::Duration,

    /// Progress/completion poll interval
    #[arg(long, default_value = "100ms")]
    pub poll_interval: humantime::Duration,

    /// Number of sequential runs with the same configuration
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Export the last completed run as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,

    /// JSON sweep plan (default: the built-in benchmark)
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// CSV output
    #[arg(long, default_value = DEFAULT_SWEEP_OUTPUT)]
    pub output: PathBuf,

    /// Also write the per-configuration aggregate as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Print the plan and the number of runs, then exit
    #[arg(long)]
    pub describe: bool,

    /// Override the plan's per-run timeout
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Override the plan's repetitions per configuration
    #[arg(long)]
    pub repetitions: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct GenCoeffsArgs {
    /// Number of coefficients
    #[arg(long)]
    pub count: usize,

    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    pub min: f64,

    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    pub max: f64,

    /// Seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output file (default: temp/generated.coeffs)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct GenPointsArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub start: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub end: f64,

    #[arg(long)]
    pub step: f64,

    /// Output file (default: temp/generated.points)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(args: &Cli) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("compute_bench_cli={level}")));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_single(run_args).await,
        Command::Sweep(sweep_args) => run_sweep(sweep_args).await,
        Command::GenCoeffs(gen) => gen_coeffs(gen),
        Command::GenPoints(gen) => gen_points(gen),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    Ok(cwd.join(path))
}

fn existing_file(path: &Path, what: &str) -> Result<PathBuf> {
    if !path.is_file() {
        bail!("{what} file {} does not exist", path.display());
    }
    std::fs::canonicalize(path).with_context(|| format!("failed to resolve {}", path.display()))
}

/// Validate the run flags and build the `RunConfig` handed to the worker.
pub fn build_run_config(args: &RunArgs, shared: &SharedChannelConfig) -> Result<RunConfig> {
    if args.threads == 0 {
        bail!("--threads must be at least 1");
    }
    if args.repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    if args.save_results && args.output.is_none() {
        bail!("--save-results requires --output");
    }
    let coefficients = existing_file(&args.coefficients, "coefficients")?;
    let points = existing_file(&args.points, "points")?;

    let mut cfg = RunConfig::new(shared, args.implementation, coefficients, points);
    cfg.multithreading = args.multithreading;
    cfg.thread_count = args.threads;
    cfg.use_vectorization = args.avx;
    cfg.save_results = args.save_results;
    cfg.generate_chart = args.generate_chart;
    cfg.output_path = args.output.as_deref().map(absolute).transpose()?;
    Ok(cfg)
}

/// Forward Ctrl-C as a cancellation; `on_interrupt` runs once.
fn spawn_ctrl_c<F>(on_interrupt: F) -> tokio::task::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt();
        }
    })
}

/// Queue `Start`, then repeat the cancel if Ctrl-C landed while it was being queued;
/// a `Cancel` that reaches the controller before its run exists is dropped.
fn arm_run(
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    cfg: &RunConfig,
    interrupted: &AtomicBool,
) -> Result<()> {
    cmd_tx
        .send(UiCommand::Start(Box::new(cfg.clone())))
        .map_err(|_| anyhow!("run controller stopped unexpectedly"))?;
    if interrupted.load(Ordering::SeqCst) {
        let _ = cmd_tx.send(UiCommand::Cancel);
    }
    Ok(())
}

async fn run_single(args: RunArgs) -> Result<()> {
    let (shared, signals) = args.channel.build()?;
    let cfg = build_run_config(&args, &shared)?;
    let settings = MonitorSettings {
        poll_interval: Duration::from(args.poll_interval),
        timeout: Duration::from(args.timeout),
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let engine = RunEngine::new(shared, signals, settings);
    let controller = tokio::spawn(run_controller(engine, evt_tx, cmd_rx));

    let interrupted = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let flag = interrupted.clone();
        let tx = cmd_tx.clone();
        spawn_ctrl_c(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(UiCommand::Cancel);
        })
    };

    let mut elapsed: Vec<f64> = Vec::new();
    let mut failures = 0u32;
    for attempt in 1..=args.repeat {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        if args.repeat > 1 {
            let _ = out_tx.send(OutputLine::Stderr(format!("== Run {attempt}/{} ==", args.repeat)));
        }
        arm_run(&cmd_tx, &cfg, &interrupted)?;

        let mut last_progress: Option<u8> = None;
        while let Some(ev) = evt_rx.recv().await {
            match ev {
                RunEvent::StateChanged { state } => {
                    if matches!(state, RunState::Armed | RunState::Polling) {
                        tracing::debug!("state: {state:?}");
                    }
                }
                RunEvent::Progress { percent } => {
                    if last_progress != Some(percent) {
                        last_progress = Some(percent);
                        let _ = out_tx.send(OutputLine::Stderr(format!("Progress: {percent}%")));
                    }
                }
                RunEvent::Info(msg) => {
                    let _ = out_tx.send(OutputLine::Stderr(msg));
                }
                RunEvent::RunCompleted { result } => {
                    elapsed.push(result.elapsed_seconds);
                    let processed =
                        process_run_completion(&cfg, &result, args.export_json.as_deref());
                    for line in processed.summary {
                        let _ = out_tx.send(OutputLine::Stdout(line));
                    }
                    for msg in processed.messages {
                        let _ = out_tx.send(OutputLine::Stderr(msg));
                    }
                    break;
                }
                RunEvent::RunEnded { state, message } => {
                    failures += 1;
                    let _ = out_tx.send(OutputLine::Stderr(format!("Run {state:?}: {message}")));
                    break;
                }
            }
        }
    }

    if elapsed.len() > 1 {
        if let Some(m) = metrics::compute_metrics(&elapsed) {
            let _ = out_tx.send(OutputLine::Stdout(format!(
                "Computation time over {} runs: avg {:.6} med {:.6} p25 {:.6} p75 {:.6} s",
                elapsed.len(),
                m.mean,
                m.median,
                m.p25,
                m.p75
            )));
        }
    }

    let _ = cmd_tx.send(UiCommand::Quit);
    let ctl_res = controller.await.context("run controller task failed")?;
    ctrl_c.abort();
    drop(out_tx);
    let _ = out_handle.await;
    ctl_res?;

    if interrupted.load(Ordering::Relaxed) {
        bail!("interrupted");
    }
    if failures > 0 {
        bail!("{failures} of {} run(s) did not complete", args.repeat);
    }
    Ok(())
}

async fn run_sweep(args: SweepArgs) -> Result<()> {
    let mut plan = match args.plan.as_deref() {
        Some(path) => SweepPlan::load(path)?,
        None => SweepPlan::default(),
    };
    if let Some(timeout) = args.timeout {
        plan.run_timeout = Duration::from(timeout);
    }
    if let Some(repetitions) = args.repetitions {
        plan.repetitions = repetitions;
    }
    plan.validate()?;

    let (out_tx, out_handle) = spawn_output_writer();
    if args.describe {
        for line in plan.describe() {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(());
    }

    let (shared, signals) = args.channel.build()?;
    let mut sink = ResultSink::create(&args.output)?;
    let driver = SweepDriver::new(shared, signals, plan);

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let flag = cancel.clone();
        let tx = out_tx.clone();
        spawn_ctrl_c(move || {
            flag.store(true, Ordering::Relaxed);
            let _ = tx.send(OutputLine::Stderr(
                "Interrupted; recording the current run and stopping".into(),
            ));
        })
    };

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SweepEvent>();
    let printer = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = evt_rx.recv().await {
                match ev {
                    SweepEvent::ScenarioStarted { name, index, count } => {
                        let _ = out_tx.send(OutputLine::Stderr(format!(
                            "== {name} ({}/{count}) ==",
                            index + 1
                        )));
                    }
                    SweepEvent::RunRecorded {
                        record,
                        done,
                        total,
                    } => {
                        let _ = out_tx.send(OutputLine::Stdout(format!(
                            "{} ({:.1}%)",
                            progress_line(&record, done, total),
                            sweep_percent(done, total)
                        )));
                    }
                    SweepEvent::Info(msg) => {
                        let _ = out_tx.send(OutputLine::Stderr(msg));
                    }
                }
            }
        })
    };

    let outcome = driver.run(&mut sink, &evt_tx, cancel).await;
    drop(evt_tx);
    let _ = printer.await;
    ctrl_c.abort();

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            drop(out_tx);
            let _ = out_handle.await;
            return Err(e);
        }
    };

    for line in summary_lines(&outcome.configs) {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    let mut summary_err = None;
    if let Some(path) = args.summary_json.as_deref() {
        let summary = SweepSummary {
            generated_at: utc_timestamp(),
            attempts: sink.rows(),
            configs: outcome.configs.clone(),
        };
        match write_summary_json(path, &summary) {
            Ok(()) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Summary saved to {}", path.display())));
            }
            Err(e) => summary_err = Some(e),
        }
    }
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Results saved to {} ({} rows)",
        args.output.display(),
        sink.rows()
    )));
    drop(out_tx);
    let _ = out_handle.await;

    if let Some(e) = summary_err {
        return Err(e);
    }
    if outcome.cancelled {
        bail!(
            "sweep interrupted after {} of {} runs",
            outcome.attempted,
            driver.plan().total_attempts()
        );
    }
    Ok(())
}

fn gen_coeffs(args: GenCoeffsArgs) -> Result<()> {
    let spec = CoefficientSpec {
        count: args.count,
        min: args.min,
        max: args.max,
        seed: args.seed,
    };
    let out = args
        .out
        .unwrap_or_else(|| Path::new(DEFAULT_TEMP_DIR).join(GENERATED_COEFFS_FILE_NAME));
    let values = inputs::generate_coefficients(&spec)?;
    inputs::write_coefficients(&out, &values)?;
    println!("{}", out.display());
    Ok(())
}

fn gen_points(args: GenPointsArgs) -> Result<()> {
    let spec = PointsSpec {
        start: args.start,
        end: args.end,
        step: args.step,
    };
    let out = args
        .out
        .unwrap_or_else(|| Path::new(DEFAULT_TEMP_DIR).join(GENERATED_POINTS_FILE_NAME));
    inputs::write_points_spec(&out, &spec)?;
    println!("{}", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("compute-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn run_defaults_match_the_protocol_constants() {
        let cli = parse(&["run", "--coefficients", "c", "--points", "p"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.implementation, Implementation::NativeCompiled);
        assert_eq!(Duration::from(args.timeout), Duration::from_secs(600));
        assert_eq!(Duration::from(args.poll_interval), Duration::from_millis(100));
        assert_eq!(args.channel.start_signal, "ComputeEvent");
        assert_eq!(args.channel.config_file, PathBuf::from("config.ini"));
    }

    #[test]
    fn negative_bounds_parse() {
        let cli = parse(&["gen-points", "--start", "-100", "--end", "100", "--step", "0.001"]);
        let Command::GenPoints(args) = cli.command else {
            panic!("expected gen-points");
        };
        assert_eq!(args.start, -100.0);
    }

    #[test]
    fn run_validation() {
        let dir = TempDir::new().unwrap();
        let coeffs = dir.path().join("poly.coeffs");
        let points = dir.path().join("range.points");
        std::fs::write(&coeffs, "1\n").unwrap();
        std::fs::write(&points, "0 1 0.5\n").unwrap();
        let shared = SharedChannelConfig::in_dir(dir.path());

        let base = |extra: &[&str]| {
            let mut argv = vec![
                "run",
                "--coefficients",
                coeffs.to_str().unwrap(),
                "--points",
                points.to_str().unwrap(),
            ];
            argv.extend_from_slice(extra);
            let Command::Run(args) = parse(&argv).command else {
                panic!("expected run");
            };
            args
        };

        let cfg = build_run_config(&base(&["--multithreading", "--threads", "4"]), &shared).unwrap();
        assert!(cfg.multithreading);
        assert_eq!(cfg.thread_count, 4);
        assert!(cfg.coefficients_path.is_absolute());

        let err = build_run_config(&base(&["--save-results"]), &shared).unwrap_err();
        assert!(err.to_string().contains("--output"), "{err}");
        assert!(build_run_config(&base(&["--threads", "0"]), &shared).is_err());

        let mut missing = base(&[]);
        missing.points = dir.path().join("nope.points");
        let err = build_run_config(&missing, &shared).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[tokio::test]
    async fn interrupt_racing_start_still_cancels_the_armed_run() {
        use crate::engine::signal::{FileSignalBackend, SignalBackend};

        let dir = TempDir::new().unwrap();
        let shared = SharedChannelConfig::in_dir(dir.path());
        let backend: Arc<dyn SignalBackend> = Arc::new(FileSignalBackend::new(dir.path().join("sig")));
        let _start = backend.create(&shared.start_signal).unwrap();
        let _done = backend.create(&shared.completion_signal).unwrap();
        let signals = SignalChannel::new(backend, &shared);
        let settings = MonitorSettings {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(30),
        };
        let cfg = RunConfig::new(&shared, Implementation::NativeCompiled, "c", "p");
        let engine = RunEngine::new(shared, signals, settings);

        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(engine, evt_tx, cmd_rx));

        // Ctrl-C fired after the loop checked the flag: its Cancel arrives with no run.
        let interrupted = AtomicBool::new(true);
        cmd_tx.send(UiCommand::Cancel).unwrap();
        arm_run(&cmd_tx, &cfg, &interrupted).unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(ev) = evt_rx.recv().await {
                if let RunEvent::RunEnded { state, .. } = ev {
                    return Some(state);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(ended, Some(RunState::Cancelled));

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();
    }

    #[test]
    fn arming_without_interrupt_sends_only_start() {
        let dir = TempDir::new().unwrap();
        let shared = SharedChannelConfig::in_dir(dir.path());
        let cfg = RunConfig::new(&shared, Implementation::Assembly, "c", "p");
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

        arm_run(&cmd_tx, &cfg, &AtomicBool::new(false)).unwrap();
        assert!(matches!(cmd_rx.try_recv(), Ok(UiCommand::Start(_))));
        assert!(cmd_rx.try_recv().is_err());
    }
}
