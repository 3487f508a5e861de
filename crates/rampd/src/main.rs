//! rampd — the ramp progressive-delivery controller daemon.
//!
//! Sweeps a fleet of opted-in serving platform services and, per
//! service, rolls the newest ready revision forward, holds, rolls back,
//! or promotes based on its health metrics.
//!
//! Two modes:
//!
//! - **HTTP** (default) — serves `POST /rollout`, running one sweep per
//!   request
//! - **CLI** (`--cli`) — runs sweeps in a loop, sleeping
//!   `--cli-run-interval` between them
//!
//! # Usage
//!
//! ```text
//! rampd --cli --project my-project --steps 5,30,60 --min-wait 10m
//! rampd --project my-project --regions us-east1 --http-addr 0.0.0.0:8080
//! rampd --config ramp.toml
//! ```

mod server;
mod sweep;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ramp_core::{config, Config, HealthCriterion, Percentile, Strategy, Target};

use sweep::Endpoints;

#[derive(Parser, Debug)]
#[command(
    name = "rampd",
    about = "Progressive delivery controller for ramp services",
    version
)]
struct Cli {
    /// Logging filter directive (e.g. debug).
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Run the sweep loop instead of the HTTP trigger server.
    #[arg(long)]
    cli: bool,

    /// Time between sweeps in CLI mode.
    #[arg(long, default_value = "60s", value_parser = parse_duration_flag)]
    cli_run_interval: Duration,

    /// Address for the HTTP trigger server.
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// host:port of the serving platform API.
    #[arg(long, default_value = "127.0.0.1:8443")]
    serving_api: String,

    /// host:port of the Prometheus query API.
    #[arg(long, default_value = "127.0.0.1:9090")]
    prometheus: String,

    /// Load strategies from a ramp.toml file instead of the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project the targeted services are deployed in.
    #[arg(long, required_unless_present = "config")]
    project: Option<String>,

    /// Comma-separated regions to scan (empty: all regions).
    #[arg(long, default_value = "")]
    regions: String,

    /// Label selector opting services in.
    #[arg(long, default_value = "rollout-strategy=gradual")]
    label: String,

    /// Comma-separated traffic percentages the candidate steps through.
    #[arg(long, default_value = "5,20,50,80")]
    steps: String,

    /// Time window to look back when assessing the candidate's health.
    #[arg(long, default_value = "30m", value_parser = parse_duration_flag)]
    healthcheck_offset: Duration,

    /// Minimum time to wait between rollout stages (0 to disable).
    #[arg(long, default_value = "30m", value_parser = parse_duration_flag)]
    min_wait: Duration,

    /// Minimum requests in the window needed to judge the candidate.
    #[arg(long, default_value_t = 100)]
    min_requests: i64,

    /// Maximum server error rate, in percent.
    #[arg(long, default_value_t = 1.0)]
    max_error_rate: f64,

    /// Maximum p99 latency in milliseconds (0 to ignore).
    #[arg(long, default_value_t = 0.0)]
    latency_p99: f64,

    /// Maximum p95 latency in milliseconds (0 to ignore).
    #[arg(long, default_value_t = 0.0)]
    latency_p95: f64,

    /// Maximum p50 latency in milliseconds (0 to ignore).
    #[arg(long, default_value_t = 0.0)]
    latency_p50: f64,
}

fn parse_duration_flag(s: &str) -> Result<Duration, String> {
    config::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.verbosity))
        .context("invalid verbosity")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config {
            strategies: vec![strategy_from_flags(&cli)?],
        },
    };
    config
        .validate()
        .context("invalid rollout configuration")?;
    for strategy in &config.strategies {
        log_health_criteria(strategy);
    }

    let endpoints = Endpoints {
        serving_api: cli.serving_api.clone(),
        prometheus: cli.prometheus.clone(),
    };
    let config = Arc::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if cli.cli {
        run_daemon(
            &endpoints,
            &config,
            cli.cli_run_interval,
            shutdown_tx,
            shutdown_rx,
        )
        .await
    } else {
        let state = server::AppState {
            endpoints,
            config,
            shutdown: shutdown_rx,
        };
        server::run_server(cli.http_addr, state, shutdown_tx).await
    }
}

/// Run sweeps in a loop until interrupted.
async fn run_daemon(
    endpoints: &Endpoints,
    config: &Config,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(interval_secs = interval.as_secs(), "rollout loop starting");

    // Flip the shutdown signal on Ctrl-C; in-flight ticks observe it at
    // their next suspension point.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut ticker = shutdown_rx.clone();
    loop {
        for strategy in &config.strategies {
            let errors = sweep::run_sweep(endpoints, strategy, &shutdown_rx).await;
            if !errors.is_empty() {
                warn!(
                    n = errors.len(),
                    "sweep finished with errors:\n{}",
                    sweep::errors_to_string(&errors)
                );
            }
        }

        if *ticker.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ticker.changed() => break,
        }
    }

    info!("rollout loop stopped");
    Ok(())
}

/// Build the single flag-defined strategy.
fn strategy_from_flags(cli: &Cli) -> anyhow::Result<Strategy> {
    let steps = parse_steps(&cli.steps)?;
    let regions: Vec<String> = cli
        .regions
        .split(',')
        .filter(|region| !region.is_empty())
        .map(str::to_string)
        .collect();
    let target = Target::new(
        cli.project.as_deref().unwrap_or_default(),
        regions,
        &cli.label,
    );

    Ok(Strategy::new(
        target,
        steps,
        cli.healthcheck_offset,
        cli.min_wait,
        health_criteria_from_flags(cli),
    ))
}

fn parse_steps(steps: &str) -> anyhow::Result<Vec<i64>> {
    steps
        .split(',')
        .map(|step| {
            step.trim()
                .parse::<i64>()
                .with_context(|| format!("invalid step value {step:?}"))
        })
        .collect()
}

/// Error rate and request count are always checked; latency criteria
/// only for the percentiles given a positive threshold.
fn health_criteria_from_flags(cli: &Cli) -> Vec<HealthCriterion> {
    let mut criteria = vec![
        HealthCriterion::ErrorRate {
            threshold: cli.max_error_rate,
        },
        HealthCriterion::RequestCount {
            threshold: cli.min_requests as f64,
        },
    ];

    if cli.latency_p99 > 0.0 {
        criteria.push(HealthCriterion::Latency {
            percentile: Percentile::P99,
            threshold_ms: cli.latency_p99,
        });
    }
    if cli.latency_p95 > 0.0 {
        criteria.push(HealthCriterion::Latency {
            percentile: Percentile::P95,
            threshold_ms: cli.latency_p95,
        });
    }
    if cli.latency_p50 > 0.0 {
        criteria.push(HealthCriterion::Latency {
            percentile: Percentile::P50,
            threshold_ms: cli.latency_p50,
        });
    }

    criteria
}

fn log_health_criteria(strategy: &Strategy) {
    for criterion in &strategy.health_criteria {
        debug!(
            metric = %criterion.metric_label(),
            threshold = criterion.threshold(),
            "health criterion configured"
        );
    }
}
