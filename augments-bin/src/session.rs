//! Line-oriented command session driving a [`WorkspaceManager`].
//!
//! Every input line is one command; every command produces one line of JSON.

use augments_common::WorkspaceStatus;
use augments_workspaces::WorkspaceManager;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use color_eyre::eyre;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "augments", no_binary_name = true, disable_version_flag = true)]
struct SessionLine {
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Create a workspace for a user and provision it in the background
    Create {
        user_id: String,
        name: String,
        /// Free-form description, may span several words
        description: Vec<String>,
    },
    /// Show the workspace owned by a user
    Get { user_id: String },
    /// Show a workspace by id
    Show { workspace_id: String },
    /// Resource stats for one workspace, or for every workspace when no id is given
    Stats { workspace_id: Option<String> },
    /// Stop and remove the container, then delete the workspace
    Delete { workspace_id: String },
    /// Re-run provisioning for a workspace in ERROR
    Retry { workspace_id: String },
    /// Overwrite the status of a workspace
    Status {
        workspace_id: String,
        #[arg(value_parser = parse_status)]
        status: WorkspaceStatus,
    },
    /// Record an access to the workspace
    Touch { workspace_id: String },
    /// List workspace containers known to the engine
    Containers,
    /// End the session and shut down
    #[command(alias = "quit")]
    Exit,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Exit,
    InputClosed,
}

fn parse_status(raw: &str) -> Result<WorkspaceStatus, String> {
    match raw.to_ascii_uppercase().as_str() {
        "PROVISIONING" => Ok(WorkspaceStatus::Provisioning),
        "ACTIVE" => Ok(WorkspaceStatus::Active),
        "SUSPENDED" => Ok(WorkspaceStatus::Suspended),
        "ERROR" => Ok(WorkspaceStatus::Error),
        _ => Err(format!(
            "unknown status {raw:?}, expected provisioning, active, suspended or error"
        )),
    }
}

pub fn parse_line(line: &str) -> Result<SessionCommand, clap::Error> {
    SessionLine::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
}

pub async fn execute(manager: &WorkspaceManager, command: SessionCommand) -> eyre::Result<Value> {
    let value = match command {
        SessionCommand::Create {
            user_id,
            name,
            description,
        } => {
            let description = (!description.is_empty()).then(|| description.join(" "));
            let workspace = manager
                .create_workspace(&user_id, &name, description)
                .await?;
            serde_json::to_value(workspace)?
        }
        SessionCommand::Get { user_id } => {
            serde_json::to_value(manager.get_workspace(&user_id).await?)?
        }
        SessionCommand::Show { workspace_id } => {
            serde_json::to_value(manager.get_workspace_by_id(&workspace_id).await?)?
        }
        SessionCommand::Stats {
            workspace_id: Some(workspace_id),
        } => serde_json::to_value(manager.get_workspace_stats(&workspace_id).await?)?,
        SessionCommand::Stats { workspace_id: None } => {
            serde_json::to_value(manager.get_all_workspaces_stats().await?)?
        }
        SessionCommand::Delete { workspace_id } => {
            manager.delete_workspace(&workspace_id).await?;
            json!({ "deleted": workspace_id })
        }
        SessionCommand::Retry { workspace_id } => {
            serde_json::to_value(manager.retry_provisioning(&workspace_id).await?)?
        }
        SessionCommand::Status {
            workspace_id,
            status,
        } => serde_json::to_value(
            manager
                .update_workspace_status(&workspace_id, status)
                .await?,
        )?,
        SessionCommand::Touch { workspace_id } => {
            serde_json::to_value(manager.update_last_accessed(&workspace_id).await?)?
        }
        SessionCommand::Containers => {
            serde_json::to_value(manager.list_all_workspace_containers().await)?
        }
        SessionCommand::Exit => Value::Null,
    };
    Ok(value)
}

/// Execute commands from `reader` until `exit` or end of input.
pub async fn run<R, W>(
    manager: &WorkspaceManager,
    reader: R,
    mut writer: W,
) -> eyre::Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let output = match parse_line(&line) {
            Ok(SessionCommand::Exit) => return Ok(SessionEnd::Exit),
            Ok(command) => {
                debug!(?command, "Executing session command");
                match execute(manager, command).await {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(error = %e, "Session command failed");
                        json!({ "error": e.to_string() }).to_string()
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::DisplayHelp => e.render().to_string(),
            Err(e) => json!({ "error": e.render().to_string().trim() }).to_string(),
        };

        writer.write_all(output.trim_end().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(SessionEnd::InputClosed)
}
