// ABOUTME: Main entry point for the machine-box command line tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use machine_box::config::AppConfig;
use machine_box::docker::{ContainerManager, ExecHandle, ExecRunner, MachineLauncher};
use machine_box::logs::{ConsoleSink, LogStreamingManager, OutputSink};
use machine_box::transport::{ConnectionController, ConnectionEvent, WebSocketConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "machine-box", version, about = "Manage developer machines running in Docker")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a shell command inside a container
    Exec {
        container: String,
        command: String,
        /// Return immediately instead of streaming output
        #[arg(long)]
        detach: bool,
    },
    /// Check whether a process started by `exec` is still running
    Alive { container: String, pid_file: String },
    /// Terminate a process started by `exec`
    Kill { container: String, pid_file: String },
    /// Launch the startup command in dev machines as they start
    Launcher,
    /// Print the ordered output of a channel from the event endpoint
    Logs {
        channel: String,
        /// Endpoint URL, overriding the configured one
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.stderr)?;

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Command::Exec {
            container,
            command,
            detach,
        } => {
            let runner = ExecRunner::new(connect(&config).await?);
            let console = ConsoleSink;
            let sink: Option<&dyn OutputSink> = if detach { None } else { Some(&console) };
            let handle = runner.start(&container, &command, sink).await?;
            if let Some(pid_file) = handle.pid_file_path() {
                eprintln!("pid file: {pid_file}");
            }
        }
        Command::Alive {
            container,
            pid_file,
        } => {
            let runner = ExecRunner::new(connect(&config).await?);
            let alive = runner
                .is_alive(&ExecHandle::from_pid_file(container, pid_file))
                .await?;
            println!("{}", if alive { "alive" } else { "dead" });
        }
        Command::Kill {
            container,
            pid_file,
        } => {
            let runner = ExecRunner::new(connect(&config).await?);
            runner
                .kill(&ExecHandle::from_pid_file(container, pid_file))
                .await?;
        }
        Command::Launcher => run_launcher(&config).await?,
        Command::Logs { channel, endpoint } => {
            let endpoint = endpoint
                .or_else(|| config.events.endpoint.clone())
                .context("no event endpoint configured; pass --endpoint")?;
            run_logs(&endpoint, &channel).await?;
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<ContainerManager> {
    Ok(ContainerManager::new(&config.docker, config.machines.dev_label.clone()).await?)
}

async fn run_launcher(config: &AppConfig) -> Result<()> {
    let manager = connect(config).await?;
    let events = manager.machine_events();
    let launcher = MachineLauncher::new(
        manager.clone(),
        ExecRunner::new(manager),
        config.machines.startup_command.clone(),
    );

    tokio::select! {
        () = launcher.run(events) => warn!("Docker event feed ended"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down launcher"),
    }
    Ok(())
}

async fn run_logs(endpoint: &str, channel: &str) -> Result<()> {
    let (controller, mut events) = ConnectionController::new(WebSocketConnector::new());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::StoppedOnError { reason } => {
                    error!("Event endpoint connection stopped: {}", reason);
                }
                other => info!("Event endpoint connection: {:?}", other),
            }
        }
    });

    controller.initialize(endpoint).await;
    let bus = controller.connection().await?;

    let mut streams = LogStreamingManager::new(bus);
    streams.start_streaming(channel, Arc::new(ConsoleSink)).await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, flushing log stream");
    streams.stop_all().await;
    controller.close().await;
    Ok(())
}

fn setup_logging(to_stderr: bool) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_env("MACHINE_BOX_LOG")
        .unwrap_or_else(|_| "machine_box=info".into());

    if to_stderr {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return Ok(());
    }

    let log_dir = AppConfig::log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let log_file = log_dir.join(format!(
        "machine-box-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(file)
                .with_ansi(false), // No ANSI colors in log file
        )
        .with(filter)
        .init();
    Ok(())
}
