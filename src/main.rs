use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pipe_runner::catalog::{CatalogResolver, GlobCatalog, NoCatalog};
use pipe_runner::chart::Chart;
use pipe_runner::config::{DownloadSettings, PipelineConfig};
use pipe_runner::digest::{compute_sha256, sidecar_path, verify_sha256, write_sha256};
use pipe_runner::driver::{FailurePolicy, PipelineDriver, PipelineStatus};
use pipe_runner::input::InputSource;
use pipe_runner::lockfile::generate_lock;
use pipe_runner::observability::{MetricsCollector, log_snapshot};
#[cfg(feature = "metrics-server")]
use pipe_runner::observability::server::MetricsServer;
use pipe_runner::presets::generate_preset;
use pipe_runner::step::Step;
use pipe_runner::tools::{FfmpegTools, SystemLauncher};
use pipe_runner::validation::{ValidationReport, validate_config};
use pipe_runner::watcher::{DEFAULT_POLL_INTERVAL, DEFAULT_STABLE_POLLS};
use serde::Serialize;
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

    let otlp_endpoint = match &cli.command {
        Commands::Run(args) => args.otlp_endpoint.clone(),
        _ => None,
    };
    configure_tracing(otlp_endpoint.as_deref())?;

    let result = match cli.command {
        Commands::Run(args) => run_pipelines(args),
        Commands::Validate { source } => validate_cmd(&source),
        Commands::Lock { source, output } => lock_cmd(&source, &output),
        Commands::Render { chart, output } => render_cmd(&chart, output.as_deref()),
        Commands::ListSteps => {
            list_steps();
            Ok(())
        }
        Commands::Config { action } => config_command(action),
        Commands::Digest {
            path,
            output,
            verify,
        } => digest_cmd(&path, output, verify),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pipe-runner", &mut io::stdout());
            Ok(())
        }
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr));

    #[cfg(feature = "otel")]
    if let Some(endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "pipe-runner"),
            ])))
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .install_simple()?;
        return registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|err| anyhow!(err.to_string()));
    }

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = otlp_endpoint {
        eprintln!(
            "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
            endpoint
        );
    }

    registry
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

fn run_pipelines(args: RunArgs) -> Result<()> {
    let mut config = args.source.load()?;
    apply_download_overrides(&mut config, &args);

    let report = validate_config(&config);
    log_validation(&args.source.label(), &report);
    if !report.is_ok() {
        bail!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        );
    }

    if args.dry_run {
        for (name, spec) in &config.pipelines {
            let steps: Vec<&str> = spec.steps.iter().map(Step::tag).collect();
            info!(
                pipeline = name.as_str(),
                input = spec.input.tag(),
                steps = ?steps,
                "Would run pipeline"
            );
        }
        return Ok(());
    }

    let tools = FfmpegTools::new(&config.tools.ffmpeg);
    let launcher = SystemLauncher;
    let catalog: Box<dyn CatalogResolver> = match &config.catalog {
        Some(settings) => Box::new(GlobCatalog::new(settings.clone())),
        None => Box::new(NoCatalog),
    };
    let metrics = MetricsCollector::new();

    #[cfg(feature = "metrics-server")]
    let metrics_server = if let Some(addr_str) = &args.metrics_listen {
        let addr: SocketAddr = addr_str
            .parse()
            .with_context(|| format!("Invalid metrics listen address: {addr_str}"))?;
        Some(MetricsServer::start(addr, metrics.clone())?)
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

    let driver = PipelineDriver::new(&config, &tools, &launcher, &*catalog)
        .with_policy(args.on_failure)
        .with_metrics(metrics.clone())
        .with_digests(args.digest);
    let outcome = driver.run_all();

    emit_metrics(&args, &metrics)?;

    #[cfg(feature = "metrics-server")]
    if let Some(mut server) = metrics_server {
        server.stop();
    }

    let run_report = outcome?;
    for pipeline in &run_report.pipelines {
        match (&pipeline.status, &pipeline.artifact) {
            (PipelineStatus::Succeeded, Some(artifact)) => info!(
                pipeline = pipeline.name.as_str(),
                output = %artifact.output_path.display(),
                "Final artifact"
            ),
            _ => error!(
                pipeline = pipeline.name.as_str(),
                error = pipeline.error.as_deref().unwrap_or("unknown"),
                "Pipeline did not complete"
            ),
        }
    }

    if let Some(path) = &args.report {
        write_json(path, &run_report)?;
        info!(report = %path.display(), "Run report written");
    }

    if run_report.failed() > 0 {
        bail!(
            "{} of {} pipeline(s) failed",
            run_report.failed(),
            run_report.pipelines.len()
        );
    }
    info!(pipelines = run_report.succeeded(), "All pipelines completed");
    Ok(())
}

fn apply_download_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(directory) = &args.downloads_dir {
        match config.downloads.as_mut() {
            Some(downloads) => downloads.directory = directory.clone(),
            None => {
                config.downloads = Some(DownloadSettings {
                    directory: directory.clone(),
                    poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
                    stable_polls: DEFAULT_STABLE_POLLS,
                    max_wait_secs: None,
                })
            }
        }
    }

    let Some(downloads) = config.downloads.as_mut() else {
        if args.max_wait.is_some() || args.poll_interval_ms.is_some() {
            warn!("No downloads directory configured; ignoring download wait overrides");
        }
        return;
    };
    if let Some(max_wait) = args.max_wait {
        downloads.max_wait_secs = Some(max_wait);
    }
    if let Some(interval) = args.poll_interval_ms {
        downloads.poll_interval_ms = interval;
    }
}

fn emit_metrics(args: &RunArgs, metrics: &MetricsCollector) -> Result<()> {
    if !(args.print_metrics || args.metrics_json.is_some() || args.metrics_prometheus.is_some()) {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = &args.metrics_json {
        write_json(path, &snapshot)?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &args.metrics_prometheus {
        ensure_parent(path)?;
        fs::write(path, snapshot.to_prometheus()).with_context(|| {
            format!("Failed to write Prometheus metrics: {}", path.display())
        })?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn validate_cmd(source: &ConfigSource) -> Result<()> {
    let config = source.load()?;
    let report = validate_config(&config);
    log_validation(&source.label(), &report);

    if report.is_ok() {
        info!(file = %source.label(), "Config validation passed");
        Ok(())
    } else {
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lock_cmd(source: &ConfigSource, output: &Path) -> Result<()> {
    let config = source.load()?;
    let report = validate_config(&config);
    log_validation(&source.label(), &report);
    if !report.is_ok() {
        bail!(
            "Cannot generate lockfile due to {} validation error(s)",
            report.errors.len()
        );
    }

    ensure_parent(output)?;
    generate_lock(&config, output)?;
    info!(lockfile = %output.display(), "Lockfile generated successfully");
    Ok(())
}

fn render_cmd(chart_path: &Path, output: Option<&Path>) -> Result<()> {
    let chart = Chart::load(chart_path)?;
    let rendered = chart.render()?;
    PipelineConfig::from_yaml_str(&rendered).with_context(|| {
        format!(
            "Rendered config from {} is not a valid pipeline config",
            chart_path.display()
        )
    })?;

    match output {
        Some(path) => {
            ensure_parent(path)?;
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write rendered config: {}", path.display()))?;
            info!(path = %path.display(), "Rendered config written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn list_steps() {
    println!("Available steps:");
    for tag in Step::TAGS {
        println!("- {tag}");
    }
    println!("Available inputs:");
    for tag in InputSource::TAGS {
        println!("- {tag}");
    }
}

fn config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::New { preset, output } => {
            let destination =
                output.unwrap_or_else(|| PathBuf::from(format!("configs/{preset}.yaml")));
            let generated = generate_preset(&preset, &destination)?;
            info!(
                preset = %preset,
                path = %generated.display(),
                "Preset config generated"
            );
            Ok(())
        }
        ConfigCommands::Lint { configs } => lint_configs(&configs),
    }
}

fn lint_configs(configs: &[PathBuf]) -> Result<()> {
    if configs.is_empty() {
        bail!("No config files supplied for linting");
    }

    let mut failures = 0usize;
    for path in configs {
        match PipelineConfig::load(path) {
            Ok(config) => {
                let report = validate_config(&config);
                log_validation(&path.display().to_string(), &report);
                if report.is_ok() {
                    info!(file = %path.display(), "Lint passed");
                } else {
                    failures += 1;
                }
            }
            Err(err) => {
                failures += 1;
                error!(file = %path.display(), "Failed to load config: {err:#}");
            }
        }
    }

    if failures > 0 {
        bail!("Lint failed for {failures} config(s)");
    }
    info!("All config lint checks passed");
    Ok(())
}

fn digest_cmd(path: &Path, output: Option<PathBuf>, verify: bool) -> Result<()> {
    if verify {
        let digest_file = output.unwrap_or_else(|| sidecar_path(path));
        verify_sha256(path, &digest_file)?;
        info!(file = %path.display(), digest = %digest_file.display(), "Digest verified");
        return Ok(());
    }

    match output {
        Some(out_path) => {
            let digest = write_sha256(path, &out_path)?;
            println!("{}  {}", digest, path.display());
            info!(
                file = %path.display(),
                digest_output = %out_path.display(),
                "SHA256 digest written"
            );
        }
        None => {
            let digest = compute_sha256(path)?;
            println!("{}  {}", digest, path.display());
        }
    }
    Ok(())
}

fn log_validation(label: &str, report: &ValidationReport) {
    for warning in &report.warnings {
        warn!(file = %label, "{warning}");
    }
    for error_msg in &report.errors {
        error!(file = %label, "{error_msg}");
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    to_writer_pretty(file, value).with_context(|| format!("Failed to write {}", path.display()))
}

#[derive(Parser)]
#[command(
    name = "pipe-runner",
    version,
    about = "Run declarative trim/upscale pipelines over local files, catalogued episodes and manual downloads"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the pipeline config comes from: a plain YAML file or a chart.
#[derive(Args)]
struct ConfigSource {
    #[arg(value_name = "CONFIG", required_unless_present = "chart")]
    config: Option<PathBuf>,
    /// Chart naming a config template and the values to render it with.
    #[arg(long, env = "CHART_PATH")]
    chart: Option<PathBuf>,
}

impl ConfigSource {
    fn load(&self) -> Result<PipelineConfig> {
        match (&self.config, &self.chart) {
            (Some(path), _) => PipelineConfig::load(path),
            (None, Some(chart)) => PipelineConfig::load_chart(chart),
            (None, None) => bail!("Either a config file or --chart is required"),
        }
    }

    fn label(&self) -> String {
        self.config
            .as_ref()
            .or(self.chart.as_ref())
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: ConfigSource,
    #[arg(long)]
    dry_run: bool,
    #[arg(long = "on-failure", value_enum, default_value_t = FailurePolicy::Abort)]
    on_failure: FailurePolicy,
    /// Give up on a manual download after this many seconds.
    #[arg(long = "max-wait", value_name = "SECS")]
    max_wait: Option<u64>,
    #[arg(long = "poll-interval-ms", value_name = "MS")]
    poll_interval_ms: Option<u64>,
    #[arg(long = "downloads-dir")]
    downloads_dir: Option<PathBuf>,
    /// Record a SHA-256 of each final artifact in the report.
    #[arg(long)]
    digest: bool,
    #[arg(long)]
    report: Option<PathBuf>,
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

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Validate {
        #[command(flatten)]
        source: ConfigSource,
    },
    Lock {
        #[command(flatten)]
        source: ConfigSource,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print (or write) the config a chart renders to.
    Render {
        #[arg(long, env = "CHART_PATH")]
        chart: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    ListSteps,
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    Digest {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Compare against OUTPUT (or `<path>.sha256`) instead of writing.
        #[arg(long)]
        verify: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Lint {
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
}
