use std::fs::{self, File};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use cycle_bench::compare::compare_dirs;
use cycle_bench::config::{HarnessConfig, RunMode};
use cycle_bench::harness::{HarnessOptions, run_harness_with_metrics};
use cycle_bench::observability::{MetricsCollector, log_snapshot};
#[cfg(feature = "metrics-server")]
use cycle_bench::observability::server::MetricsServer;
use cycle_bench::process::SystemBackend;
use cycle_bench::stages::standard_stage_names;
use cycle_bench::unit::discover_units;
use cycle_bench::validation::validate_config;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
#[cfg(feature = "metrics-server")]
use std::net::SocketAddr;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let otlp_endpoint_for_tracing = match &cli.command {
        Commands::Run(args) => args.otlp_endpoint.clone(),
        _ => None,
    };

    configure_tracing(otlp_endpoint_for_tracing.as_deref())?;

    let command_result = match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Discover {
            config,
            mode,
            data_root,
        } => discover_command(config, mode, data_root),
        Commands::Validate { config } => validate_command(config),
        Commands::Compare { left, right, json } => compare_command(&left, &right, json),
        Commands::ListStages => {
            list_stages();
            Ok(())
        }
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint_for_tracing.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer =
                opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "cycle-bench")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;

            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        } else {
            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        }
    }

    #[cfg(not(feature = "otel"))]
    {
        if let Some(endpoint) = otlp_endpoint {
            eprintln!(
                "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
                endpoint
            );
        }

        tracing_subscriber::registry()
            .with(filter.clone())
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    mode: RunMode,
    data_root: Option<PathBuf>,
) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load_or_default(path)?;
    if let Some(root) = data_root {
        match mode {
            RunMode::Normal => config.data_root = root,
            RunMode::Test => config.test_data_root = root,
        }
    }
    Ok(config)
}

fn run_command(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.mode, args.data_root)?;

    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    if !validation.is_ok() {
        for error_msg in &validation.errors {
            error!("{error_msg}");
        }
        bail!(
            "Harness config is invalid ({} error(s))",
            validation.errors.len()
        );
    }

    let metrics_handle = MetricsCollector::new();

    #[cfg(feature = "metrics-server")]
    let metrics_server = if let Some(addr_str) = &args.metrics_listen {
        let addr: SocketAddr = addr_str
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {addr_str}"))?;
        Some(MetricsServer::start(addr, metrics_handle.clone())?)
    } else {
        None
    };

    #[cfg(not(feature = "metrics-server"))]
    if let Some(addr_str) = &args.metrics_listen {
        warn!(
            "Metrics server feature not enabled; ignoring --metrics-listen={}.",
            addr_str
        );
    }

    let options = HarnessOptions {
        config,
        mode: args.mode,
        workers: args.workers,
        color: !args.no_color && io::stdout().is_terminal(),
        quiet: false,
    };
    let report =
        run_harness_with_metrics(options, Arc::new(SystemBackend), metrics_handle.clone())?;

    println!(
        "Harness completed {}/{} units ({} failed, {} skipped)",
        report.summary.completed,
        report.summary.total_units,
        report.summary.failed,
        report.summary.skipped
    );
    match report.summary.mean_improvement {
        Some(mean) => println!("Average improvement: {mean:.4} times"),
        None => println!("Average improvement: n/a (no completed units)"),
    }
    for entry in report.units.iter().filter(|e| e.error.is_some()) {
        warn!(
            txnum = entry.txnum,
            status = entry.status,
            "{}",
            entry.error.as_deref().unwrap_or_default()
        );
    }

    if let Some(path) = args.report {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        to_writer_pretty(file, &report)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        info!(report = %path.display(), "Harness report written");
    }

    let snapshot = metrics_handle.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = args.metrics_json {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = args.metrics_prometheus {
        create_parent(&path)?;
        fs::write(&path, snapshot.to_prometheus()).with_context(|| {
            format!("Failed to write Prometheus metrics: {}", path.display())
        })?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }

    #[cfg(feature = "metrics-server")]
    if let Some(mut server) = metrics_server {
        server.stop();
    }

    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn discover_command(
    config: Option<PathBuf>,
    mode: RunMode,
    data_root: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config.as_deref(), mode, data_root)?;
    let root = config.data_root_for(mode);
    let units = discover_units(root)?;
    info!(data_root = %root.display(), units = units.len(), "Discovery finished");
    for unit in units {
        println!("{unit}");
    }
    Ok(())
}

fn validate_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = HarnessConfig::load_or_default(config_path.as_deref())?;
    let label = config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<built-in defaults>".to_string());
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(file = %label, "{warning}");
    }

    if report.is_ok() {
        info!(file = %label, "Config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %label, "{error_msg}");
        }
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn compare_command(left: &Path, right: &Path, json: bool) -> Result<()> {
    let rows = compare_dirs(left, right)?;
    if rows.is_empty() {
        warn!(
            left = %left.display(),
            right = %right.display(),
            "No common block heights"
        );
    }
    if json {
        to_writer_pretty(io::stdout().lock(), &rows)?;
        println!();
        return Ok(());
    }
    let left_label = dir_label(left);
    let right_label = dir_label(right);
    for row in &rows {
        println!("{}", row.render(&left_label, &right_label));
    }
    Ok(())
}

fn dir_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn list_stages() {
    println!("Pipeline stages:");
    for (idx, name) in standard_stage_names().iter().enumerate() {
        println!("{}. {name}", idx + 1);
    }
}

#[derive(Parser)]
#[command(
    name = "cycle-bench",
    version,
    about = "Drives the input-generator and circuit pipeline per block and compares cycle counts against a baseline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Discover {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = RunMode::Normal)]
        mode: RunMode,
        #[arg(long = "data-root")]
        data_root: Option<PathBuf>,
    },
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    Compare {
        left: PathBuf,
        right: PathBuf,
        #[arg(long)]
        json: bool,
    },
    ListStages,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = RunMode::Normal)]
    mode: RunMode,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long = "data-root")]
    data_root: Option<PathBuf>,
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    no_color: bool,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    #[arg(long = "metrics-listen")]
    metrics_listen: Option<String>,
    #[arg(long = "otlp-endpoint")]
    otlp_endpoint: Option<String>,
}
