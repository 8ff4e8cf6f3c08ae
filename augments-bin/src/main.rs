use std::sync::Arc;

use augments_executor::DockerEngine;
use augments_workspaces::{InMemoryStorage, OrchestratorConfig, WorkspaceManager};
use clap::{Parser, Subcommand};
use color_eyre::eyre;
use tokio::io::BufReader;
use tracing::{info, warn};

mod session;

use session::SessionEnd;

#[derive(Parser)]
#[command(name = "augments-orchestrator", about = "Workspace container orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and read workspace commands from stdin (default)
    Serve,
    /// Print the workspace containers known to the engine and exit
    Containers,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    color_eyre::install()?;
    // stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = OrchestratorConfig::from_env()?;
    info!(
        socket = %config.docker_socket,
        image = %config.container.image,
        ports = ?(config.ports.start..config.ports.end),
        "Configuration loaded"
    );

    let engine = DockerEngine::connect(
        &config.docker_socket,
        config.container.engine_timeout.as_secs(),
    )?;
    match engine.client().ping().await {
        Ok(_) => info!("Connected to Docker"),
        Err(e) => warn!(error = %e, "Docker not reachable yet, provisioning will fail until it is"),
    }

    let manager = WorkspaceManager::from_config(
        Arc::new(InMemoryStorage::new()),
        Arc::new(engine),
        &config,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Containers => {
            let containers = manager.list_all_workspace_containers().await;
            println!("{}", serde_json::to_string_pretty(&containers)?);
            Ok(())
        }
        Command::Serve => serve(manager, &config).await,
    }
}

async fn serve(manager: WorkspaceManager, config: &OrchestratorConfig) -> eyre::Result<()> {
    let existing = manager.list_all_workspace_containers().await;
    info!(count = existing.len(), "Found existing workspace containers");
    for container in &existing {
        info!(
            container_id = %container.id,
            state = container.state.as_deref().unwrap_or("unknown"),
            "Existing workspace container"
        );
    }

    let sweep =
        manager.spawn_reconciliation_sweep(config.sweep_interval, config.provisioning_timeout);

    info!("Accepting workspace commands on stdin, `help` lists them");
    let input = BufReader::new(tokio::io::stdin());
    tokio::select! {
        end = session::run(&manager, input, tokio::io::stdout()) => {
            if end? == SessionEnd::InputClosed {
                info!("Command input closed, running until Ctrl-C");
                tokio::signal::ctrl_c().await?;
            }
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!("Shutting down orchestrator");
    sweep.abort();
    Ok(())
}
