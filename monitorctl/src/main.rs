mod demo;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use demo::DemoProvider;
use monitor_ipc::messages::{Ping, Pong, ServiceStatus, StatusRequest};
use monitor_ipc::provider::{ExtensionManager, ManagerEvent, ProviderManager, TunnelProvider};
use monitor_ipc::{ChannelStatus, Monitor};
use serde::Serialize;
use shared_utils::config::{ChannelMode, Config};
use shared_utils::logging::{init_logging, LogOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  monitorctl ping\n  monitorctl --output json status\n  monitorctl watch --interval-ms 500 --count 10\n  monitorctl demo --count 5")]
struct Args {
    /// Log level (default: from config)
    #[arg(short, long, value_enum, env = "TUNNELMON_CTL_LOG_LEVEL")]
    log_level: Option<LogLevelArg>,

    /// Emit logs as JSON (default: from config)
    #[arg(long, env = "TUNNELMON_JSON_LOGS")]
    json_logs: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider socket to connect to (overrides the config file)
    #[arg(short, long)]
    socket_path: Option<PathBuf>,

    /// Output format for command results (table|json)
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the provider answers
    Ping,
    /// Show the provider's service status once
    Status,
    /// Poll the provider's service status at a fixed interval
    Watch {
        /// Poll interval in milliseconds (default: from config)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many status updates
        #[arg(long)]
        count: Option<u64>,
    },
    /// Poll an in-process demo provider; no helper needed
    Demo {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many status updates
        #[arg(long, default_value_t = 5)]
        count: u64,
    },
}

#[derive(Serialize)]
struct Message<'a> {
    status: &'a str,
    detail: &'a str,
}

fn print_msg(format: OutputFormat, status: &str, detail: &str) {
    match format {
        OutputFormat::Table => println!("{status}: {detail}"),
        OutputFormat::Json => {
            let msg = Message { status, detail };
            match serde_json::to_string(&msg) {
                Ok(s) => println!("{s}"),
                Err(_) => println!("{{\"status\":\"{status}\",\"detail\":\"{detail}\"}}"),
            }
        }
    }
}

fn format_status(format: OutputFormat, status: &ServiceStatus) -> String {
    match format {
        OutputFormat::Table => format!(
            "tunnel: {}  interface: {}  rx: {}  tx: {}  uptime: {}s  version: {}",
            if status.tunnel_active { "up" } else { "down" },
            status.active_interface.as_deref().unwrap_or("-"),
            status.bytes_received,
            status.bytes_sent,
            status.uptime_secs,
            status.provider_version,
        ),
        OutputFormat::Json => serde_json::to_string(status).unwrap_or_default(),
    }
}

fn client_id() -> String {
    format!("monitorctl-{}", std::process::id())
}

/// Build the provider manager the configuration asks for. Loop-back mode
/// hosts the demo provider.
fn provider_manager(config: &Config) -> Result<ProviderManager> {
    let demo = || -> Arc<dyn TunnelProvider> { Arc::new(DemoProvider::new()) };
    Ok(ProviderManager::from_kind(
        &config.channel_kind(),
        config.io_timeout(),
        demo,
    )?)
}

/// Logging options from the configuration, with command-line overrides.
fn log_options(args: &Args, config: &Config) -> LogOptions {
    let mut options = LogOptions::from_config(config);
    if let Some(level) = args.log_level {
        options.level = level.into();
    }
    if args.json_logs {
        options.json_format = true;
    }
    options
}

fn demo_manager() -> Result<ProviderManager> {
    Ok(ProviderManager::mock::<()>(Arc::new(DemoProvider::new()), None)?)
}

/// Wait until the manager's channel has finished connecting.
async fn wait_connected(manager: &ProviderManager, limit: Duration) -> Result<()> {
    let mut status = manager.subscribe_status();
    let settled = time::timeout(
        limit,
        status.wait_for(|s| *s != ChannelStatus::Connecting),
    )
    .await
    .map_err(|_| anyhow!("timed out connecting to the provider"))?
    .map_err(|_| anyhow!("provider channel went away"))?;

    if settled.is_connected() {
        Ok(())
    } else {
        bail!("could not connect to the provider (status: {})", *settled)
    }
}

async fn connect(config: &Config) -> Result<(ProviderManager, Monitor)> {
    let manager = provider_manager(config)?;
    manager.start().await?;
    wait_connected(&manager, config.io_timeout()).await?;

    let monitor = Monitor::new();
    monitor.set_channel(Some(manager.channel()));
    Ok((manager, monitor))
}

/// Poll the provider behind `manager`, handing every service state to
/// `on_state`. Returns the number of states seen.
async fn watch<F>(
    manager: ProviderManager,
    interval: Duration,
    count: Option<u64>,
    io_timeout: Duration,
    mut on_state: F,
) -> Result<u64>
where
    F: FnMut(&ServiceStatus),
{
    let (extension, mut events) = ExtensionManager::<ServiceStatus>::new(manager);
    extension.start().await?;
    wait_connected(extension.provider(), io_timeout).await?;

    let id = client_id();
    let started = extension.start_monitoring(
        move || StatusRequest {
            client_id: id.clone(),
        },
        interval,
    );
    if !started {
        extension.stop().await;
        bail!("provider is not connected");
    }

    let mut seen = 0;
    loop {
        if count.is_some_and(|count| seen >= count) {
            break;
        }

        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        match event {
            Some(ManagerEvent::ServiceStateChanged(state)) => {
                seen += 1;
                on_state(&state);
            }
            Some(ManagerEvent::TunnelStateChanged(status)) => {
                debug!(%status, "Tunnel state changed");
                if status == ChannelStatus::Disconnected {
                    warn!("Provider disconnected");
                    break;
                }
            }
            None => break,
        }
    }

    extension.stop().await;
    Ok(seen)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, fallback) = match &args.config {
        Some(path) => (Config::load(path)?, None),
        None => match Config::load(Config::default_path()) {
            Ok(config) => (config, None),
            Err(e) => {
                let mut config = Config::default();
                config.apply_env_overrides();
                (config, Some(e))
            }
        },
    };
    if let Some(path) = &args.socket_path {
        config.channel.mode = ChannelMode::Socket;
        config.channel.socket_path = path.display().to_string();
    }

    let _guard = init_logging(log_options(&args, &config));
    if let Some(e) = fallback {
        debug!("Using default configuration ({})", e);
    }

    match args.command {
        Command::Ping => {
            let (manager, monitor) = connect(&config).await?;
            let sent = Instant::now();
            let result = monitor.send::<Ping, Pong>(&Ping).await;
            manager.stop().await;
            result?;
            print_msg(
                args.output,
                "ok",
                &format!("pong in {:.1} ms", sent.elapsed().as_secs_f64() * 1000.0),
            );
        }
        Command::Status => {
            let (manager, monitor) = connect(&config).await?;
            let request = StatusRequest {
                client_id: client_id(),
            };
            let result = monitor.send::<_, ServiceStatus>(&request).await;
            manager.stop().await;
            println!("{}", format_status(args.output, &result?));
        }
        Command::Watch { interval_ms, count } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.poll_interval());
            let output = args.output;
            let seen = watch(
                provider_manager(&config)?,
                interval,
                count,
                config.io_timeout(),
                |state| println!("{}", format_status(output, state)),
            )
            .await?;
            info!(updates = seen, "Watch finished");
        }
        Command::Demo { interval_ms, count } => {
            let output = args.output;
            let seen = watch(
                demo_manager()?,
                Duration::from_millis(interval_ms),
                Some(count),
                config.io_timeout(),
                |state| println!("{}", format_status(output, state)),
            )
            .await?;
            info!(updates = seen, "Demo finished");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use monitor_ipc::Channel;

    #[test]
    fn help_renders_with_examples() {
        let mut cmd = Args::command();
        let help = cmd.render_long_help().to_string();
        assert!(
            help.contains("Examples:"),
            "help output should include examples for quick start"
        );
    }

    #[test]
    fn parses_status_default_output() {
        let args = Args::parse_from(["bin", "status"]);
        assert!(matches!(args.command, Command::Status));
        assert!(matches!(args.output, OutputFormat::Table));
    }

    #[test]
    fn parses_watch_with_json_output() {
        let args = Args::parse_from([
            "bin",
            "--output",
            "json",
            "--socket-path",
            "/tmp/provider.sock",
            "watch",
            "--interval-ms",
            "250",
            "--count",
            "3",
        ]);
        assert!(matches!(args.output, OutputFormat::Json));
        assert_eq!(args.socket_path, Some(PathBuf::from("/tmp/provider.sock")));
        match args.command {
            Command::Watch { interval_ms, count } => {
                assert_eq!(interval_ms, Some(250));
                assert_eq!(count, Some(3));
            }
            _ => panic!("expected watch subcommand"),
        }
    }

    #[test]
    fn formats_status_as_json() {
        let status = ServiceStatus {
            tunnel_active: true,
            provider_version: "1.0".to_string(),
            ..Default::default()
        };
        let json = format_status(OutputFormat::Json, &status);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tunnel_active"], true);
        assert_eq!(value["provider_version"], "1.0");

        let table = format_status(OutputFormat::Table, &status);
        assert!(table.starts_with("tunnel: up"));
    }

    #[test]
    fn log_level_comes_from_config_unless_given() {
        let mut config = Config::default();
        config.log_level = "debug".to_string();
        config.logging.json = true;

        let args = Args::parse_from(["bin", "ping"]);
        let options = log_options(&args, &config);
        assert_eq!(options.level, tracing::Level::DEBUG);
        assert!(options.json_format);

        let args = Args::parse_from(["bin", "--log-level", "error", "ping"]);
        assert_eq!(log_options(&args, &config).level, tracing::Level::ERROR);
    }

    #[test]
    fn provider_manager_follows_channel_mode() {
        let mut config = Config::default();
        config.channel.socket_path = "/tmp/tunnelmon-test.sock".to_string();
        match provider_manager(&config).unwrap() {
            ProviderManager::Socket(manager) => {
                assert_eq!(
                    manager.channel().path(),
                    std::path::Path::new("/tmp/tunnelmon-test.sock")
                );
                assert_eq!(manager.channel().status(), ChannelStatus::Disconnected);
            }
            ProviderManager::Mock(_) => panic!("expected a socket manager"),
        }

        config.channel.mode = ChannelMode::Loopback;
        let manager = provider_manager(&config).unwrap();
        assert!(matches!(manager, ProviderManager::Mock(_)));
        assert_eq!(manager.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn demo_watch_stops_after_count() {
        let mut states = Vec::new();
        let seen = watch(
            demo_manager().unwrap(),
            Duration::from_millis(10),
            Some(3),
            Duration::from_secs(1),
            |state| states.push(state.clone()),
        )
        .await
        .unwrap();

        assert_eq!(seen, 3);
        assert!(states.iter().all(|s| s.tunnel_active));
        assert!(states[2].bytes_received > states[0].bytes_received);
    }

    #[tokio::test]
    async fn connect_fails_without_helper() {
        let mut config = Config::default();
        config.channel.socket_path = "/nonexistent/tunnelmon/provider.sock".to_string();
        assert!(connect(&config).await.is_err());
    }

    #[tokio::test]
    async fn ping_over_loopback() {
        let mut config = Config::default();
        config.channel.mode = ChannelMode::Loopback;
        let (manager, monitor) = connect(&config).await.unwrap();
        let pong: Pong = monitor.send(&Ping).await.unwrap();
        assert_eq!(pong, Pong);
        manager.stop().await;
    }
}
