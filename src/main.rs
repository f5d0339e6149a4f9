use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use asset_vfs::{list_projects, BroadcastPort, Notification, SyncConfig, SyncSession};

#[derive(Parser)]
#[command(name = "asset-vfs")]
#[command(about = "Virtual asset overlay of a project and its libraries, with live sync", version)]
struct Cli {
    /// Workspace root containing the projects dir and libraries
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file (defaults to <workspace>/asset-vfs.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every project in the workspace
    Projects,

    /// Print the virtual namespace of a project
    Enum {
        #[arg(short, long)]
        project: String,

        /// Print the enumeration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Map a virtual path to the physical file serving it
    Resolve {
        #[arg(short, long)]
        project: String,

        virtual_path: String,
    },

    /// Watch a project and print notifications until interrupted
    Watch {
        #[arg(short, long)]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref());

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::load_or_default(&cli.workspace)?,
    };

    match cli.command {
        Commands::Projects => {
            let projects = list_projects(&cli.workspace, &config)
                .with_context(|| {
                    format!("Failed to list projects in {}", cli.workspace.display())
                })?;
            if projects.is_empty() {
                println!("{}", "No projects found".yellow());
            }
            for project in projects {
                let libs = if project.libs.is_empty() {
                    "no libraries".dimmed().to_string()
                } else {
                    project.libs.join(", ")
                };
                println!("{} {} {}", "•".bright_blue(), project.dir.bright_white().bold(), libs);
            }
        }

        Commands::Enum { project, json } => {
            let (session, _port) = open(&cli.workspace, &project, config).await?;
            let enumeration = session.enumerate();
            if json {
                println!("{}", serde_json::to_string_pretty(&enumeration)?);
            } else {
                for (asset_type, assets) in &enumeration.assets {
                    if assets.is_empty() {
                        continue;
                    }
                    println!(
                        "{} {}",
                        asset_type.to_string().cyan().bold(),
                        format!("({})", assets.len()).dimmed()
                    );
                    for asset in assets {
                        match &asset.lib {
                            Some(lib) => {
                                println!("  {} {}", asset.name, format!("[{lib}]").dimmed())
                            }
                            None => println!("  {}", asset.name),
                        }
                    }
                }
                for collision in session.collisions() {
                    println!(
                        "{} {} {} shadows {}",
                        "⚠".bright_yellow(),
                        collision.asset_path.yellow(),
                        collision.winner.display(),
                        collision.shadowed.display()
                    );
                }
            }
            session.close().await;
        }

        Commands::Resolve {
            project,
            virtual_path,
        } => {
            let (session, _port) = open(&cli.workspace, &project, config).await?;
            let physical = session.resolve_physical(&virtual_path);
            let marker = if physical.exists() { "✓".green() } else { "✗".red() };
            println!("{} {}", marker, physical.display());
            session.close().await;
        }

        Commands::Watch { project } => {
            let (session, port) = open(&cli.workspace, &project, config).await?;
            let mut notifications = port.subscribe();
            println!("{}", format!("👁  Watching {}...", project).bright_cyan().bold());

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    received = notifications.recv() => match received {
                        Ok(notification) => print_notification(&notification),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("dropped {} notifications", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            session.close().await;
            println!("{}", "Stopped".dimmed());
        }
    }

    Ok(())
}

async fn open(
    workspace: &Path,
    project: &str,
    config: SyncConfig,
) -> Result<(SyncSession, Arc<BroadcastPort>)> {
    let port = Arc::new(BroadcastPort::new());
    let session = SyncSession::open(workspace, project, config, port.clone())
        .await
        .with_context(|| format!("Failed to open project {project}"))?;
    Ok((session, port))
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::FilesChanged { files } => {
            for file in files {
                if file.deleted {
                    println!("{} {}", "-".red(), file.name);
                } else {
                    let mtime = file.mtime_ms.to_string();
                    println!("{} {} {}", "~".green(), file.name, mtime.dimmed());
                }
            }
        }
        Notification::DuplicateAssetsDetected { collisions } => {
            for collision in collisions {
                println!(
                    "{} duplicate {}: {} shadows {}",
                    "⚠".bright_yellow(),
                    collision.asset_path.yellow(),
                    collision.winner.display(),
                    collision.shadowed.display()
                );
            }
        }
        Notification::IndexRebuilt => println!("{}", "↻ index rebuilt".bright_blue()),
    }
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("asset_vfs=info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "asset-vfs.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}
