//! node-runtime: echo server built on the connection runtime
//!
//! Starts a TCP and/or UDP echo node as configured and runs until SIGINT or
//! SIGTERM, then stops and disposes both nodes.
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration
//! ./node-runtime -g -c ./config.json
//!
//! # Run with custom configuration
//! ./node-runtime -c ./config.json
//!
//! # Run with environment overrides
//! NODE_RUNTIME_LOG_LEVEL=debug ./node-runtime -c ./config.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use node_runtime::config::{load_config_with_env, Config};
use node_runtime::handlers::{EchoDatagramHandler, EchoStreamHandler};
use node_runtime::node::{ExceptionHandler, TcpNode, UdpNode};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/node-runtime/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("node-runtime v{}", node_runtime::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"node-runtime v{}

TCP/UDP echo server with bounded concurrency and graceful shutdown.

USAGE:
    node-runtime [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/node-runtime/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    NODE_RUNTIME_TCP_ADDR          Override TCP bind address
    NODE_RUNTIME_UDP_ADDR          Override UDP bind address
    NODE_RUNTIME_LOG_LEVEL         Override log level (trace, debug, info, warn, error)
    NODE_RUNTIME_MAX_CONCURRENCY   Override TCP workers and UDP concurrency
"#,
        node_runtime::VERSION
    );
}

/// Initialize tracing subscriber
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().unwrap_or_else(|_| Level::WARN.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => subscriber.json().init(),
        ("json", false) => subscriber.json().without_time().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }
}

/// Exception callback shared by both nodes
fn log_exception(node: &'static str) -> ExceptionHandler {
    Arc::new(move |err, peer| {
        warn!(node, peer = ?peer, error = %err, "Handler reported failure");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        node_runtime::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("node-runtime v{}", node_runtime::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let tcp_node = match &config.tcp {
        Some(tcp) => {
            let node = TcpNode::tcp(tcp.clone(), EchoStreamHandler::factory())?
                .with_exception_handler(log_exception("tcp"));
            node.start().await.context("Failed to start TCP node")?;
            Some(node)
        }
        None => None,
    };

    let udp_node = match &config.udp {
        Some(udp) => {
            let node = UdpNode::udp(udp.clone(), EchoDatagramHandler::factory())?
                .with_exception_handler(log_exception("udp"));
            if let Err(e) = node.start().await {
                if let Some(tcp) = &tcp_node {
                    tcp.dispose().await;
                }
                return Err(e).context("Failed to start UDP node");
            }
            Some(node)
        }
        None => None,
    };

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for SIGINT");
            }
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    info!("Shutting down...");

    if let Some(node) = tcp_node {
        node.dispose().await;
        let stats = node.stats();
        info!(
            "Final TCP stats: {} accepted, {} processed, {} failed, {} dropped",
            stats.accepted, stats.processed, stats.failed, stats.dropped
        );
    }

    if let Some(node) = udp_node {
        node.dispose().await;
        let stats = node.stats();
        info!(
            "Final UDP stats: {} received, {} processed, {} failed, {} dropped",
            stats.accepted, stats.processed, stats.failed, stats.dropped
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
