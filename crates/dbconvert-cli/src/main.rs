//! dbconvert CLI - cross-dialect relational database conversion.

use clap::{Parser, Subcommand, ValueEnum};
use dbconvert::config::OutputMode;
use dbconvert::{
    Config, ConversionHandle, ConversionResult, ConversionSession, ConvertError, DriverCatalog,
    Orchestrator, Scope, Severity,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbconvert")]
#[command(about = "Convert schema and data between relational database engines")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Schema,
    Data,
    Both,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Schema => Scope::Schema,
            ScopeArg::Data => Scope::Data,
            ScopeArg::Both => Scope::Both,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the source database into the target
    Run {
        /// Override what is converted
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Generate and print scripts without touching the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Write schema scripts to a file or directory without executing them
    Script {
        /// Output file, or directory with --per-object
        #[arg(short, long)]
        output: PathBuf,

        /// One file per object
        #[arg(long)]
        per_object: bool,
    },

    /// Test database connections
    HealthCheck,

    /// List the registered database engines
    Engines,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, ConvertError> {
    let cli = Cli::parse();

    // Needs no configuration.
    if let Commands::Engines = cli.command {
        print_engines(cli.output_json)?;
        return Ok(0);
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Engines => Ok(0),
        Commands::Run {
            scope,
            batch_size,
            workers,
            dry_run,
        } => {
            if let Some(scope) = scope {
                config.conversion.scope = scope.into();
            }
            if let Some(n) = batch_size {
                config.conversion.batch_size = n;
            }
            if let Some(n) = workers {
                config.conversion.workers = Some(n);
            }
            if dry_run {
                config.conversion.execute_on_target = false;
                config.conversion.output.mode = OutputMode::InMemory;
                config.conversion.output.path = None;
            }
            config.validate()?;

            let result = convert(&config, cli.output_json).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                if dry_run {
                    for script in &result.scripts {
                        println!("{}", script.trim_end());
                        println!();
                    }
                }
                print_summary(&result, dry_run);
            }
            Ok(result.exit_code)
        }

        Commands::Script { output, per_object } => {
            config.conversion.scope = Scope::Schema;
            config.conversion.execute_on_target = false;
            config.conversion.output.mode = OutputMode::File;
            config.conversion.output.path = Some(output.clone());
            config.conversion.output.per_object = per_object;
            config.validate()?;

            let result = convert(&config, cli.output_json).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Scripts written to {}", output.display());
                print_summary(&result, false);
            }
            Ok(result.exit_code)
        }

        Commands::HealthCheck => {
            let session = ConversionSession::from_config(&config);
            let result = Orchestrator::health_check(&session).await;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Health Check Results:");
                for (side, endpoint) in [("Source", &result.source), ("Target", &result.target)] {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        side,
                        endpoint.engine,
                        if endpoint.connected { "OK" } else { "FAILED" },
                        endpoint.latency_ms
                    );
                    if let Some(ref err) = endpoint.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(ConvertError::connection("health-check", "one or both databases are unreachable"));
            }
            Ok(0)
        }
    }
}

/// Start the run, print its events and wait for the result.
async fn convert(config: &Config, quiet: bool) -> Result<ConversionResult, ConvertError> {
    let handle = Orchestrator::start(ConversionSession::from_config(config));
    setup_signal_handler(handle.cancel_token());

    let printer = (!quiet).then(|| print_events(&handle));
    let result = handle.await_result().await?;
    if let Some(printer) = printer {
        // The event stream closes when the run finishes.
        let _ = printer.await;
    }
    Ok(result)
}

fn print_events(handle: &ConversionHandle) -> tokio::task::JoinHandle<()> {
    handle.subscribe_fn(|event| {
        let label = match event.severity {
            Severity::Info => "INFO ",
            Severity::Warning => "WARN ",
            Severity::Error => "ERROR",
        };
        match &event.object {
            Some(object) => println!("[{}] {}: {}", label, object, event.message),
            None => println!("[{}] {}", label, event.message),
        }
    })
}

fn print_summary(result: &ConversionResult, dry_run: bool) {
    let status_msg = if dry_run { "Dry run completed" } else { "Conversion finished" };
    println!("\n{}: {}", status_msg, result.message);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Objects: {} scripted, {} skipped",
        result.objects_scripted, result.objects_skipped
    );
    println!(
        "  Tables: {} transferred, {} failed",
        result.tables_transferred, result.tables_failed
    );
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    println!("  Errors: {}, warnings: {}", result.errors, result.warnings);
}

fn print_engines(json: bool) -> Result<(), ConvertError> {
    let catalog = DriverCatalog::with_builtins();
    let engines = catalog.engines();

    if json {
        let listing: Vec<serde_json::Value> = engines
            .iter()
            .map(|engine| {
                serde_json::json!({
                    "engine": engine,
                    "aliases": catalog.aliases_of(engine),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for engine in engines {
            let aliases = catalog.aliases_of(engine);
            if aliases.is_empty() {
                println!("{}", engine);
            } else {
                println!("{} ({})", engine, aliases.join(", "));
            }
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler(cancel_token: CancellationToken) {
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Canceling conversion...", name);
                    token.cancel();
                }
                Err(e) => warn!("Cannot listen for {}: {}", name, e),
            }
        });
    }
}

#[cfg(not(unix))]
fn setup_signal_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Canceling conversion...");
                cancel_token.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}
