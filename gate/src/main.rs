//! Aegis Gate - Main entry point
//!
//! Reads JSON lines of opportunities and execution receipts, prints one JSON
//! line per admission decision or processed receipt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Arg, Command};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aegis_gate::{
    AdmissionGate, ExecutionReceipt, FeedbackConfig, GateConfig, GateError, Result,
    SwarmOpportunity, VERSION,
};

/// One line of input
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputRecord {
    Receipt {
        receipt: ExecutionReceipt,
    },
    Opportunity {
        #[serde(flatten)]
        opportunity: SwarmOpportunity,

        /// Risk factor values by factor name
        #[serde(default)]
        factors: HashMap<String, f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("aegis-gate")
        .version(VERSION)
        .about("Aegis Gate - risk and swarm consensus admission control")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (defaults to layered config/aegis* and AEGIS__ env)"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("OUTPUT")
                .help("Generate example config and exit"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("JSON-lines input of opportunities and receipts, '-' for stdin")
                .default_value("-"),
        )
        .arg(
            Arg::new("metrics-addr")
                .long("metrics-addr")
                .value_name("ADDR")
                .help("Serve Prometheus metrics on this address (e.g. 0.0.0.0:9090)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log format (text, json)")
                .default_value("text"),
        )
        .get_matches();

    // Initialize logging
    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("text");
    init_logging(log_level, log_format)?;

    // Handle config generation
    if let Some(output_path) = matches.get_one::<String>("generate-config") {
        let config = GateConfig::with_default_roster();
        config.save_to_file(output_path)?;
        info!("Generated example config at: {}", output_path);
        return Ok(());
    }

    info!(version = VERSION, "🛡️ Aegis Gate starting...");

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        info!("Loading config from: {}", config_path);
        GateConfig::from_file(config_path)?
    } else {
        GateConfig::from_env_and_file()?
    };
    if config.evaluators.is_empty() {
        warn!("🔶 No evaluators configured, using the default warden roster");
        config.evaluators = GateConfig::default_roster();
    }

    if let Some(addr) = matches.get_one::<String>("metrics-addr") {
        init_metrics(addr)?;
    }

    let gate = AdmissionGate::from_config(&config)?;
    if !gate.swarm().is_ready() {
        return Err(GateError::NotReady {
            registered: gate.swarm().instance_count(),
            required: config.swarm.min_instances,
        });
    }

    let input = matches
        .get_one::<String>("input")
        .map(String::as_str)
        .unwrap_or("-");
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        info!("Reading opportunities from stdin");
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        info!("Reading opportunities from: {}", input);
        Box::new(BufReader::new(tokio::fs::File::open(input).await?))
    };

    info!("🚀 Aegis Gate ready!");

    // Set up graceful shutdown
    let shutdown_signal = setup_shutdown_signal();

    tokio::select! {
        result = run_input_loop(&gate, reader, &config.feedback) => {
            if let Err(e) = result {
                error!("Input loop failed: {}", e);
                return Err(e);
            }
            info!("Input exhausted");
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    log_summary(&gate).await;
    info!("Aegis Gate stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            tracing::Level::INFO
        }
    };

    let json = match log_format.to_lowercase().as_str() {
        "json" => true,
        "text" => false,
        other => {
            return Err(GateError::invalid_config(format!(
                "unknown log format: {}",
                other
            )))
        }
    };

    // Decisions go to stdout; logs stay on stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("aegis_gate={level},aegis_risk={level}", level = level).into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    Ok(())
}

/// Install the Prometheus exporter
fn init_metrics(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| GateError::invalid_config(format!("invalid metrics address {}: {}", addr, e)))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GateError::internal(format!("failed to install metrics exporter: {}", e)))?;

    info!("📊 Serving metrics on {}", addr);
    Ok(())
}

/// Process input lines until EOF, purging stale feedback entries on a timer
async fn run_input_loop(
    gate: &AdmissionGate,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    feedback: &FeedbackConfig,
) -> Result<()> {
    let mut lines = reader.lines();
    let cleanup = Arc::clone(gate.feedback())
        .spawn_cleanup(feedback.cleanup_interval(), feedback.retention());

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: InputRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed input line: {}", e);
                continue;
            }
        };

        let output = match record {
            InputRecord::Opportunity {
                opportunity,
                factors,
            } => {
                let factor_values = gate.resolve_factors(&factors);
                match gate.admit(&opportunity, &factor_values).await {
                    Ok(decision) => serde_json::to_string(&decision)?,
                    Err(e) => {
                        error!("Admission of {} failed: {}", opportunity.id, e);
                        continue;
                    }
                }
            }
            InputRecord::Receipt { receipt } => {
                match gate.feedback().process_receipt(receipt).await {
                    Ok(outcome) => serde_json::to_string(&outcome)?,
                    Err(e) => {
                        warn!("Receipt rejected: {}", e);
                        continue;
                    }
                }
            }
        };

        println!("{}", output);
    }

    cleanup.abort();
    Ok(())
}

/// Log end-of-run statistics
async fn log_summary(gate: &AdmissionGate) {
    let stats = gate.swarm().stats();
    info!(
        "Swarm: {} rounds, {} executed, {} rejected ({} vetoes, {} expired), {} abstentions, avg {:.1}ms",
        stats.total_evaluations,
        stats.executed,
        stats.rejected,
        stats.vetoes,
        stats.deadline_rejections,
        stats.abstentions,
        stats.avg_processing_time_ms
    );

    let performance = gate.feedback().get_performance().await;
    info!(
        "Feedback: {} settled, {} pending, hit rate {:.2}, PnL ${:.2}",
        performance.settled,
        performance.pending,
        performance.hit_rate,
        performance.total_realized_pnl_usd
    );

    match gate.calibrator().calibrate().result() {
        Some(result) => info!(
            "Calibration: accuracy {:.3}, bias {:+.3} over {} points",
            result.accuracy, result.bias, result.data_points
        ),
        None => info!(
            "Calibration: not yet reliable ({} points)",
            gate.calibrator().len()
        ),
    }

    let violations = gate.thresholds().get_violation_stats();
    if violations.total > 0 {
        warn!(
            "Thresholds: {} violations, {} unacknowledged",
            violations.total, violations.unacknowledged
        );
    }
}

/// Set up graceful shutdown signal handling
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
