//! Switchyard - Main entry point
//!
//! `switchyard check` validates a configuration file. `switchyard route` reads
//! gateway requests as JSON lines on stdin, routes each one, and writes every
//! routing decision as a JSON line on stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use switchyard_common::{init_tracing, LogFormat};
use switchyard_config::validate::{lint_config, validate_endpoints};
use switchyard_config::Config;
use switchyard_engine::{
    DrainCoordinator, GatewayRequest, HttpDispatcher, RecoveryProber, RoutingDecision,
    RoutingEngine, SignalManager, SignalType,
};

/// Connect timeout for outbound provider calls
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Switchyard - provider routing and failover for API gateways
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level filter (overrides the configuration file)
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    /// Log output format (overrides the configuration file)
    #[arg(long = "log-format", value_enum, global = true)]
    log_format: Option<FormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file and exit
    Check {
        /// Configuration file path
        #[arg(short = 'c', long = "config", env = "SWITCHYARD_CONFIG")]
        config: Option<PathBuf>,

        /// Also check that every provider endpoint accepts TCP connections
        #[arg(long)]
        network: bool,

        /// Connect timeout for the network check
        #[arg(long = "timeout-ms", default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Route JSON-line requests from stdin, writing decisions to stdout
    Route {
        /// Configuration file path
        #[arg(short = 'c', long = "config", env = "SWITCHYARD_CONFIG")]
        config: Option<PathBuf>,

        /// Seed for weighted selection (overrides the configuration file)
        #[arg(long)]
        seed: Option<u64>,

        /// Write Prometheus metrics to this file on exit
        #[arg(long = "metrics-out")]
        metrics_out: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Pretty,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Check { config, .. } | Commands::Route { config, .. } => config.clone(),
    };
    let config = load_config(config_path.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.map(LogFormat::from).unwrap_or(config.logging.format);
    init_tracing(level, format);

    match cli.command {
        Commands::Check {
            network, timeout_ms, ..
        } => check(&config, config_path, network, Duration::from_millis(timeout_ms)).await,
        Commands::Route {
            seed, metrics_out, ..
        } => route(config, config_path, seed, metrics_out).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display())),
        None => Config::default_embedded().context("Failed to load embedded configuration"),
    }
}

/// Validate configuration and exit
async fn check(
    config: &Config,
    path: Option<PathBuf>,
    network: bool,
    connect_timeout: Duration,
) -> Result<()> {
    match &path {
        Some(path) => info!("Testing configuration file: {}", path.display()),
        None => info!("Testing embedded default configuration"),
    }

    config.validate().context("Configuration validation failed")?;

    let mut report = lint_config(config);
    if network {
        report.merge(validate_endpoints(config, connect_timeout).await);
    }
    for warning in &report.warnings {
        warn!("{}", warning.message);
    }
    for e in &report.errors {
        error!("{}", e);
    }
    if !report.is_ok() {
        bail!("{} endpoint check(s) failed", report.errors.len());
    }

    info!("Configuration test successful:");
    info!("  - {} provider(s)", config.providers.len());
    info!("  - {} capability policy(ies)", config.capability_policies().len());
    info!("  - {} warning(s)", report.warnings.len());

    println!(
        "switchyard: configuration {} test is successful",
        path.as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(embedded)".to_string())
    );
    Ok(())
}

/// Route stdin requests until EOF or a shutdown signal
async fn route(
    mut config: Config,
    path: Option<PathBuf>,
    seed: Option<u64>,
    metrics_out: Option<PathBuf>,
) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    if seed.is_some() {
        config.engine.rng_seed = seed;
    }

    let dispatcher = Arc::new(
        HttpDispatcher::new(CONNECT_TIMEOUT).context("Failed to create HTTP dispatcher")?,
    );
    let engine = RoutingEngine::from_config(&config, dispatcher)
        .context("Failed to build routing engine")?;

    let shutdown = CancellationToken::new();
    let writer = spawn_decision_writer(engine.subscribe(), shutdown.clone());
    let prober = RecoveryProber::new(engine.clone(), config.health.probe_interval())
        .spawn(shutdown.clone());
    let drain = DrainCoordinator::new(config.engine.drain_timeout());
    let mut signals = SignalManager::new();
    let _listener = signals
        .listen()
        .context("Failed to register signal handlers")?;

    info!("Switchyard routing started, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let request: GatewayRequest = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed request line");
                        continue;
                    }
                };
                let Some(in_flight) = drain.begin() else {
                    break;
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    let _in_flight = in_flight;
                    if let Err(e) = engine.route(request).await {
                        warn!(outcome = e.outcome(), error = %e, "Request not routed");
                    }
                });
            }
            signal = signals.recv() => match signal {
                Some(SignalType::Reload) => reload(&engine, path.as_deref()),
                Some(SignalType::Shutdown) | None => break,
            },
        }
    }

    drain.request_shutdown();
    let drained = drain.wait_for_drain().await;
    shutdown.cancel();
    if let Err(e) = prober.await {
        warn!(error = %e, "Prober task failed");
    }
    if let Err(e) = writer.await {
        warn!(error = %e, "Decision writer task failed");
    }

    if let Some(out) = metrics_out {
        match engine.metrics() {
            Some(metrics) => std::fs::write(&out, metrics.export_prometheus())
                .with_context(|| format!("Failed to write metrics to {}", out.display()))?,
            None => warn!("Metrics are disabled, not writing {}", out.display()),
        }
    }

    if !drained {
        warn!("Exited with requests still in flight");
    }
    info!("Switchyard routing stopped");
    Ok(())
}

/// Reload configuration on SIGHUP
fn reload(engine: &RoutingEngine, path: Option<&std::path::Path>) {
    let Some(path) = path else {
        warn!("Running on embedded configuration, nothing to reload");
        return;
    };
    let config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Reload failed, keeping current configuration");
            return;
        }
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "Reloaded configuration is invalid, keeping current configuration");
        return;
    }
    match engine.apply_config(&config) {
        Ok(summary) => info!(
            providers = summary.providers,
            removed = summary.removed.len(),
            "Configuration reloaded"
        ),
        Err(e) => error!(error = %e, "Reload rejected, keeping current configuration"),
    }
}

/// Write every decision to stdout as one JSON line
fn spawn_decision_writer(
    mut rx: broadcast::Receiver<Arc<RoutingDecision>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let received = tokio::select! {
                biased;
                received = rx.recv() => received,
                _ = shutdown.cancelled() => break,
            };
            match received {
                Ok(decision) => write_decision(&mut stdout, &decision).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Decision writer fell behind, records dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
        while let Ok(decision) = rx.try_recv() {
            write_decision(&mut stdout, &decision).await;
        }
        if let Err(e) = stdout.flush().await {
            warn!(error = %e, "Failed to flush stdout");
        }
    })
}

async fn write_decision(stdout: &mut tokio::io::Stdout, decision: &RoutingDecision) {
    let mut line = match serde_json::to_vec(decision) {
        Ok(line) => line,
        Err(e) => {
            warn!(decision = %decision.id, error = %e, "Failed to serialize decision");
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = stdout.write_all(&line).await {
        warn!(error = %e, "Failed to write decision");
    }
}
