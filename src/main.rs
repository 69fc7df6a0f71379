use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liverun::config::{Config, DEFAULT_CONFIG_FILE};
use liverun::execution::{ExecutionOrchestrator, ExecutionPhase, RetryConfig};
use liverun::model::{ArgValue, Args};
use liverun::notifications::{LogTelemetry, Telemetry, TelemetryFanout, WebhookTelemetry};
use liverun::report::{self, ConsoleNotifier, ConsoleReporter};
use liverun::script::load_script;
use liverun::sink::{ResultSink, ResultStore};
use liverun::transport::{HttpTransport, ReplayTransport, Transport};
use liverun::watcher::{precheck, ScriptWatcher};
use liverun::StaticCluster;

#[derive(Parser)]
#[command(name = "liverun")]
#[command(about = "Run scripts against a live cluster and stream their results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: liverun.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script once and print its results
    Run(ScriptOptions),

    /// Re-execute a script every time it changes
    Watch(ScriptOptions),

    /// Parse the vis spec and validate arguments without executing
    Check {
        script: PathBuf,

        /// Vis spec (default: vis.json next to the script)
        #[arg(long)]
        vis: Option<PathBuf>,

        /// Script argument, repeatable; a repeated key becomes a list
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
}

#[derive(ClapArgs)]
struct ScriptOptions {
    script: PathBuf,

    /// Vis spec (default: vis.json next to the script)
    #[arg(long)]
    vis: Option<PathBuf>,

    /// Script argument, repeatable; a repeated key becomes a list
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,

    /// Treat the execution as user-initiated (required for mutation scripts)
    #[arg(long)]
    manual: bool,

    /// Replay recorded NDJSON events instead of contacting the cluster
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(options) => {
            let config = load_config(cli.config.as_deref(), options.replay.is_some())?;
            let phase = cmd_run(&config, &options)?;
            if matches!(
                phase,
                ExecutionPhase::Failed | ExecutionPhase::TimedOut | ExecutionPhase::Cancelled
            ) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Watch(options) => {
            let config = load_config(cli.config.as_deref(), options.replay.is_some())?;
            cmd_watch(&config, &options)
        }
        Commands::Check { script, vis, args } => cmd_check(&script, vis.as_deref(), &args),
    }
}

/// Load the config file. A replay run may go without one.
fn load_config(path: Option<&Path>, replay: bool) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if replay && !path.exists() {
        return Ok(Config::offline());
    }

    Config::load(&path).with_context(|| format!("Could not load {}", path.display()))
}

/// Parse `key=value` pairs; a key given more than once becomes a list
fn parse_args(pairs: &[String]) -> Result<Args> {
    let mut args = Args::new();

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid argument '{}', expected KEY=VALUE", pair))?;
        let key = key.trim().to_string();
        if key.is_empty() {
            anyhow::bail!("Invalid argument '{}', empty key", pair);
        }

        let value = value.to_string();
        let merged = match args.remove(&key) {
            None => ArgValue::Single(value),
            Some(ArgValue::Single(first)) => ArgValue::List(vec![first, value]),
            Some(ArgValue::List(mut values)) => {
                values.push(value);
                ArgValue::List(values)
            }
        };
        args.insert(key, merged);
    }

    Ok(args)
}

fn build_transport(config: &Config, replay: Option<&Path>) -> Result<Arc<dyn Transport>> {
    if let Some(path) = replay {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file: {}", path.display()))?;
        let transport = ReplayTransport::from_ndjson(&text)
            .with_context(|| format!("Failed to parse replay file: {}", path.display()))?;
        return Ok(Arc::new(transport));
    }

    let transport = HttpTransport::new(config.require_endpoint()?)?.with_token(config.token()?);
    Ok(Arc::new(transport))
}

fn build_orchestrator(
    config: &Config,
    options: &ScriptOptions,
    sink: Arc<dyn ResultSink>,
    reporter: Option<Arc<dyn Telemetry>>,
) -> Result<ExecutionOrchestrator> {
    let cluster = Arc::new(StaticCluster::ready(config.cluster_name(), config.cluster_config()));

    let mut telemetry = TelemetryFanout::new().with(Arc::new(LogTelemetry));
    if let Some(ref url) = config.notifications.webhook_url {
        telemetry = telemetry.with(Arc::new(WebhookTelemetry::new(url.clone(), "liverun")));
    }
    if let Some(reporter) = reporter {
        telemetry = telemetry.with(reporter);
    }

    let orchestrator = ExecutionOrchestrator::builder(cluster, sink)
        .transport(build_transport(config, options.replay.as_deref())?)
        .telemetry(Arc::new(telemetry))
        .notifier(Arc::new(ConsoleNotifier))
        .retry_config(RetryConfig::from(&config.execution))
        .notice_auto_hide(Duration::from_millis(config.notifications.auto_hide_ms))
        .build();

    Ok(orchestrator)
}

#[tokio::main]
async fn cmd_run(config: &Config, options: &ScriptOptions) -> Result<ExecutionPhase> {
    let script = load_script(&options.script, options.vis.as_deref())?;
    let args = parse_args(&options.args)?;

    let sink = Arc::new(ResultStore::new());
    let mut orchestrator = build_orchestrator(config, options, sink.clone(), None)?;

    println!("{} Running {}...", "→".blue(), script.id.cyan());

    if options.manual {
        orchestrator.set_script_and_args_manually(script, args);
    } else {
        orchestrator.set_script_and_args(script, args);
    }
    orchestrator.execute()?;

    let settled = tokio::select! {
        phase = orchestrator.run_until_settled() => Some(phase?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let phase = match settled {
        Some(phase) => phase,
        None => {
            orchestrator.cancel_execution();
            orchestrator.phase()
        }
    };

    report::print_outcome(phase, &sink.snapshot());
    Ok(phase)
}

#[tokio::main]
async fn cmd_watch(config: &Config, options: &ScriptOptions) -> Result<()> {
    let args = parse_args(&options.args)?;

    let sink = Arc::new(ResultStore::new());
    let reporter: Arc<dyn Telemetry> = Arc::new(ConsoleReporter::new(sink.clone()));
    let orchestrator = build_orchestrator(config, options, sink, Some(reporter))?;
    let handle = orchestrator.handle();
    let driver = tokio::spawn(orchestrator.run());

    let watcher = ScriptWatcher::new(
        options.script.clone(),
        options.vis.clone(),
        args,
        options.manual,
        handle.clone(),
    );
    watcher.rerun()?;

    // Plain thread: it blocks on file events and must not hold up shutdown
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = done_tx.send(watcher.start());
    });

    tokio::select! {
        result = done_rx => result.context("Watcher stopped unexpectedly")??,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            println!("\n{}", "Stopped watching".dimmed());
        }
    }

    handle.shutdown();
    driver.await.context("Orchestrator task failed")??;
    Ok(())
}

fn cmd_check(script_path: &Path, vis_path: Option<&Path>, pairs: &[String]) -> Result<()> {
    let script = load_script(script_path, vis_path)?;
    let args = parse_args(pairs)?;

    match precheck(&script.vis, &args) {
        Some(problem) => {
            println!("{} {}", "✗".red(), problem.red());
            std::process::exit(1);
        }
        None => {
            println!("{} {} is ready to run", "✓".green(), script.id.cyan());
            Ok(())
        }
    }
}
