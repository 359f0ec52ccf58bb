use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use web_jockey::config::GatewayConfig;
use web_jockey::logging::{Level, LogRecord, LogSink, SharedSink, TracingSink};
use web_jockey::router::RouteTable;
use web_jockey::server::GatewayServer;
use web_jockey::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "web-jockey", version, about = "Configuration-driven local gateway")]
struct Args {
    /// Working directory
    #[arg(short = 'd', long = "cwd", default_value = ".")]
    cwd: PathBuf,

    /// Logging directory
    #[arg(short = 'l', long = "log")]
    log: Option<PathBuf>,

    /// Config file name
    #[arg(short = 'c', long = "config", default_value = "web-jockey.yaml")]
    config: PathBuf,

    /// Display request logs on the console
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Port number (overrides the config file)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let args = Args::parse();

    let working_dir = args.cwd.clone();
    let config_path = working_dir.join(&args.config);

    // Config must load before the subscriber, because the file layers
    // depend on the configured log directory. A load failure falls back
    // to a console-only subscriber for the crit record.
    let config = GatewayConfig::load(&config_path, &working_dir).map(|config| {
        config
            .with_port_override(args.port)
            .with_log_override(args.log.as_ref().map(|dir| working_dir.join(dir)))
    });

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.verbose, None)?;
            TracingSink.emit(LogRecord::plain(Level::Crit, format!("{e:#}")));
            std::process::exit(1);
        }
    };

    init_logging(args.verbose, config.log_dir.as_deref())?;
    let sink: SharedSink = Arc::new(TracingSink);

    info!(
        port = config.port,
        static_routes = config.static_routes.len(),
        dynamic_routes = config.dynamic_routes.len(),
        subprocesses = config.subprocesses.len(),
        "Configuration loaded"
    );

    // Subprocesses launch before the listener opens; the gateway serves
    // regardless of their health.
    let supervisor = Supervisor::new(config.working_dir.clone(), Arc::clone(&sink));
    supervisor.launch_all(&config.subprocesses);

    let router = Arc::new(RouteTable::from_config(&config, Arc::clone(&sink)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = match GatewayServer::bind(addr, router, Arc::clone(&sink)).await {
        Ok(server) => server,
        Err(e) => {
            sink.emit(LogRecord::plain(Level::Crit, format!("{e:#}")));
            supervisor.shutdown();
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve_handle = tokio::spawn(server.serve(shutdown_rx, started));

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    let _ = shutdown_tx.send(true);
    supervisor.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(5), serve_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Install the tracing subscriber: a console layer filtered at `warn`
/// (`info` with --verbose, `RUST_LOG` wins when set), plus an
/// `activity.log` JSON layer and an `errors.log` layer when a log
/// directory is configured.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if verbose { "info" } else { "warn" };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer().with_filter(console_filter);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let activity = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("activity.log"))?;
            let errors = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("errors.log"))?;

            tracing_subscriber::registry()
                .with(console)
                .with(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(Arc::new(activity))
                        .with_filter(LevelFilter::INFO),
                )
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(errors))
                        .with_filter(LevelFilter::ERROR),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry().with(console).init();
        }
    }

    Ok(())
}
