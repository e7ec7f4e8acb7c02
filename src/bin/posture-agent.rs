//! posture-agent CLI: runs collection cycles and inspects the spool.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use posture_agent::config::Config;
use posture_agent::coordinator::DeliveryCoordinator;
use posture_agent::producer::{AgentInfo, CommandProducer};
use posture_agent::scheduler::Scheduler;
use posture_agent::shutdown::Shutdown;
use posture_agent::spool::SpoolQueue;
use posture_agent::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use posture_agent::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "posture-agent", about = "Host posture agent with durable delivery")]
struct Cli {
    /// Config file (TOML or JSON). Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run collection cycles on the configured interval until Ctrl-C
    Run,
    /// Run a single collection cycle
    Once {
        /// Also write the snapshot as pretty JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Inspect the local spool
    Spool {
        #[command(subcommand)]
        action: SpoolAction,
    },
}

#[derive(Subcommand)]
enum SpoolAction {
    /// Print the number of pending events
    Count,
    /// List pending events, oldest first
    List,
}

type Coordinator = DeliveryCoordinator<CommandProducer, HttpTransport>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Run => cmd_run(config).await,
        Command::Once { output } => cmd_once(config, output).await,
        Command::Spool { action } => {
            let spool = SpoolQueue::open(&config.spool_dir, config.spool_capacity).await?;
            match action {
                SpoolAction::Count => cmd_spool_count(&spool).await,
                SpoolAction::List => cmd_spool_list(&spool).await,
            }
        }
    }
}

fn telemetry(config: &Config) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "posture-agent".to_string(),
        log_level: config.log_level.clone(),
    })?)
}

async fn build_coordinator(config: &Config, shutdown: Shutdown) -> anyhow::Result<Coordinator> {
    let (program, args) = config
        .collector_command()
        .context("no collector configured (set COLLECTOR_COMMAND or `collector` in the config file)")?;

    let producer =
        CommandProducer::new(program, args).with_agent(AgentInfo::new(config.agent_id.clone()));
    let transport = HttpTransport::new(config.transport_config())?;
    let spool = SpoolQueue::open(&config.spool_dir, config.spool_capacity)
        .await
        .with_context(|| format!("cannot open spool at {}", config.spool_dir.display()))?;

    Ok(DeliveryCoordinator::new(
        producer,
        transport,
        spool,
        config.coordinator_config(),
        shutdown,
    ))
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    let _guard = telemetry(&config)?;

    let shutdown = Shutdown::new();
    let coordinator = build_coordinator(&config, shutdown.clone()).await?;
    let scheduler = Scheduler::new(config.interval, shutdown.clone())?;

    tracing::info!(
        agent_id = %config.agent_id,
        interval_secs = config.interval.as_secs(),
        spool_dir = %config.spool_dir.display(),
        "posture agent starting"
    );

    let stop = scheduler.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, stopping");
        stop.trigger();
    });

    let coordinator = &coordinator;
    scheduler
        .run(|| async move {
            coordinator.run_cycle().await;
        })
        .await;
    Ok(())
}

async fn cmd_once(config: Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = telemetry(&config)?;

    let coordinator = build_coordinator(&config, Shutdown::new()).await?;
    let report = coordinator.run_cycle().await;

    if let (Some(path), Some(snapshot)) = (output, report.snapshot.as_ref()) {
        let json = serde_json::to_string_pretty(snapshot)?;
        match tokio::fs::write(&path, json).await {
            Ok(()) => tracing::info!(path = %path.display(), "snapshot written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot write snapshot"),
        }
    }

    if let Some(err) = report.producer_error {
        anyhow::bail!("collection failed: {err}");
    }
    Ok(())
}

async fn cmd_spool_count(spool: &SpoolQueue) -> anyhow::Result<()> {
    println!("{}", spool.count().await?);
    Ok(())
}

async fn cmd_spool_list(spool: &SpoolQueue) -> anyhow::Result<()> {
    let events = spool.list_pending().await?;

    if events.is_empty() {
        println!("Spool is empty.");
        return Ok(());
    }

    println!("{:<36}  {:<25}  BYTES", "ID", "CREATED");
    println!("{}", "-".repeat(72));

    for event in &events {
        let bytes = serde_json::to_vec(&event.payload)?.len();
        println!(
            "{:<36}  {:<25}  {}",
            event.id,
            event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            bytes
        );
    }

    println!("\n{} event(s), capacity {}", events.len(), spool.capacity());
    Ok(())
}
