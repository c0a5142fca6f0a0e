//! wsgate: real-time WebSocket connection gateway
//!
//! Accepts WebSocket upgrades on `/ws`, supervises every connection with a
//! ping/pong heartbeat, answers control frames, and drains gracefully on
//! SIGINT/SIGTERM or a fatal fault.
//!
//! Usage:
//!   wsgate                                   # Default port 7070
//!   wsgate --port 8080                       # Custom port
//!   wsgate --drain-timeout-ms 5000           # Shorter drain window
//!   wsgate --log-file /var/log/wsgate.log    # Log to a file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use wsgate_protocol::Limits;
use wsgate_server::{Gateway, GatewayConfig};
use wsgate_transport::{DiscardHandler, HeartbeatConfig, ShutdownReason, ShutdownState, TransportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "wsgate", about = "wsgate: WebSocket connection gateway", version)]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "WSGATE_PORT", default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, env = "WSGATE_HOSTNAME", default_value = "127.0.0.1")]
    hostname: String,

    /// Maximum concurrent connections (0 for unlimited)
    #[arg(long, env = "WSGATE_MAX_CONNECTIONS", default_value_t = Limits::MAX_CONNECTIONS)]
    max_connections: usize,

    /// Largest accepted inbound frame, in bytes
    #[arg(long, env = "WSGATE_MAX_FRAME_BYTES", default_value_t = Limits::MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Heartbeat probe period in milliseconds
    #[arg(long, env = "WSGATE_HEARTBEAT_INTERVAL_MS", default_value_t = Limits::HEARTBEAT_INTERVAL.as_millis() as u64)]
    heartbeat_interval_ms: u64,

    /// Unanswered probes tolerated before a connection is terminated
    #[arg(long, env = "WSGATE_MAX_MISSED_HEARTBEATS", default_value_t = Limits::MAX_MISSED_HEARTBEATS)]
    max_missed_heartbeats: u32,

    /// Upper bound on the shutdown drain in milliseconds
    #[arg(long, env = "WSGATE_DRAIN_TIMEOUT_MS", default_value_t = Limits::DRAIN_TIMEOUT.as_millis() as u64)]
    drain_timeout_ms: u64,

    /// Allow cross-origin requests
    #[arg(long, env = "WSGATE_ENABLE_CORS")]
    enable_cors: bool,

    /// Enable verbose logging
    #[arg(long, env = "WSGATE_VERBOSE")]
    verbose: bool,

    /// Append logs to a file instead of stdout
    #[arg(long, env = "WSGATE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "WSGATE_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            transport: TransportConfig {
                port: self.port,
                hostname: self.hostname.clone(),
                max_connections: (self.max_connections > 0).then_some(self.max_connections),
                max_frame_bytes: self.max_frame_bytes,
                heartbeat: HeartbeatConfig {
                    interval: Duration::from_millis(self.heartbeat_interval_ms),
                    max_missed: self.max_missed_heartbeats.max(1),
                },
                enable_cors: self.enable_cors,
                verbose_logging: self.verbose,
            },
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (writer, ansi) = match &cli.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            eprintln!("Logging to {}", path.display());
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

/// Route SIGINT/SIGTERM into the shutdown state. Keeps listening after the
/// first signal so repeats are logged and ignored instead of killing the
/// process mid-drain.
fn spawn_signal_listener(state: Arc<ShutdownState>) {
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(name) => {
                    state.request_shutdown(ShutdownReason::Signal(name.to_string()));
                }
                Err(e) => {
                    error!("failed to listen for shutdown signals: {e}");
                    return;
                }
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "SIGINT")
}

/// Panics anywhere in the process start the same drain as a signal.
fn install_fault_hook(state: Arc<ShutdownState>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        state.request_shutdown(ShutdownReason::Fault(info.to_string()));
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = cli.gateway_config();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                        wsgate                               ║");
    println!("║                WebSocket connection gateway                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Binding:    {}:{}", cli.hostname, cli.port);
    println!(
        "  Heartbeat:  every {} ms, {} missed probe(s) tolerated",
        config.transport.heartbeat.interval.as_millis(),
        config.transport.heartbeat.max_missed
    );
    println!("  Drain:      {} ms", config.drain_timeout.as_millis());
    match config.transport.max_connections {
        Some(max) => println!("  Capacity:   {max} connections"),
        None => println!("  Capacity:   unlimited"),
    }
    println!();

    let gateway = Gateway::start(config, DiscardHandler)
        .await
        .context("failed to start gateway")?;

    let state = gateway.shutdown_state();
    spawn_signal_listener(state.clone());
    install_fault_hook(state);

    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Server running!");
    println!();
    println!("  WebSocket endpoint:");
    println!("    ws://{}:{}{}", cli.hostname, gateway.port(), Limits::UPGRADE_PATH);
    println!("  Health:");
    println!("    http://{}:{}{}", cli.hostname, gateway.port(), Limits::HEALTH_PATH);
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let outcome = gateway.run_until_shutdown().await;

    println!();
    if outcome.is_clean() {
        println!("  Server stopped.");
    } else {
        println!("  Server stopped with connections still open.");
    }
    std::process::exit(outcome.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_reference_limits() {
        let cli = Cli::parse_from(["wsgate"]);
        let config = cli.gateway_config();
        assert_eq!(config.transport.port, 7070);
        assert_eq!(config.transport.heartbeat, HeartbeatConfig::default());
        assert_eq!(config.drain_timeout, Limits::DRAIN_TIMEOUT);
        assert_eq!(config.transport.max_connections, Some(Limits::MAX_CONNECTIONS));
        assert_eq!(config.transport.max_frame_bytes, Limits::MAX_FRAME_BYTES);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn zero_connection_cap_means_unlimited() {
        let cli = Cli::parse_from(["wsgate", "--max-connections", "0", "--max-missed-heartbeats", "0"]);
        let config = cli.gateway_config();
        assert_eq!(config.transport.max_connections, None);
        assert_eq!(config.transport.heartbeat.max_missed, 1);
    }

    #[test]
    fn unwritable_log_directory_names_the_directory() {
        let blocker = std::env::temp_dir().join(format!("wsgate-log-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let log_path = blocker.join("logs").join("wsgate.log");

        let cli = Cli::parse_from(["wsgate", "--log-file", log_path.to_str().unwrap()]);
        let err = init_tracing(&cli).unwrap_err();
        let _ = std::fs::remove_file(&blocker);

        assert!(
            format!("{err:#}").contains("failed to create log directory"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn timing_flags_are_milliseconds() {
        let cli = Cli::parse_from([
            "wsgate",
            "--heartbeat-interval-ms",
            "500",
            "--drain-timeout-ms",
            "250",
            "--log-format",
            "json",
        ]);
        let config = cli.gateway_config();
        assert_eq!(config.transport.heartbeat.interval, Duration::from_millis(500));
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
