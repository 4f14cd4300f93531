#![allow(clippy::multiple_crate_versions)]

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use replay_engine::app::Services;
use replay_engine::config::Config;
use replay_engine::models::format_bytes;
use replay_engine::progress::TransferStatus;
use replay_engine::server::ServerState;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay-engine")]
#[command(about = "Model downloads and inference server supervision for Replay", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/replay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inference server until Ctrl-C (default)
    Serve,
    /// Download or update the server install
    Sync,
    /// Show install and server status
    Status,
    /// Voice models
    Weights {
        #[command(subcommand)]
        action: WeightsAction,
    },
    /// Baseline engine weights
    Required {
        #[command(subcommand)]
        action: RequiredAction,
    },
    /// Stem separation models
    Stems {
        #[command(subcommand)]
        action: StemsAction,
    },
}

#[derive(Subcommand)]
enum WeightsAction {
    /// List catalog and local models
    List {
        /// Skip the remote catalog
        #[arg(long)]
        local: bool,
    },
    /// Download a model from the catalog
    Download { id: String },
    /// Import a model folder, .zip or .pth file
    Add { path: PathBuf },
    /// Delete a local model
    Remove { name: String },
    /// Open a local model's folder
    Reveal { name: String },
}

#[derive(Subcommand)]
enum RequiredAction {
    /// Presence and size check
    Check,
    /// Full checksum verification
    Verify,
    /// Download anything missing or damaged
    Download,
}

#[derive(Subcommand)]
enum StemsAction {
    /// List downloaded stem model files
    List,
    /// Download a stem model known to the running server
    Download { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;
    let services = Services::new(config).context("Failed to prepare the data directory")?;

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&services).await,
        Commands::Sync => sync(&services).await,
        Commands::Status => status(&services).await,
        Commands::Weights { action } => weights(&services, action).await,
        Commands::Required { action } => required(&services, action).await,
        Commands::Stems { action } => stems(&services, action).await,
    };

    // the child server must be gone before we exit
    services
        .shutdown()
        .await
        .context("Failed to stop the server")?;
    result
}

async fn serve(services: &Services) -> anyhow::Result<()> {
    tracing::info!("Starting Replay engine");
    let notifier = services.spawn_notifier();

    if !services.server_is_valid().await? {
        tracing::warn!("Server install is missing or damaged, run: replay-engine sync");
    }

    let mut status = services.supervisor.watch();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                if current.state == ServerState::Fatal {
                    break Err(anyhow::anyhow!(
                        "{}",
                        current.last_error.unwrap_or(current.message)
                    ));
                }
            }
        }
    };

    services.shutdown().await?;
    notifier.abort();
    outcome
}

async fn sync(services: &Services) -> anyhow::Result<()> {
    let sync = &services.sync;
    let work = sync.download_latest(&services.fetcher, services.policy());
    let started = with_progress(work, || transfer_snapshot(&sync.status())).await?;

    if started {
        let version = sync.read_version_marker().await.unwrap_or_default();
        println!("Server install is up to date ({version})");
    } else {
        println!("A server download is already running");
    }
    Ok(())
}

async fn status(services: &Services) -> anyhow::Result<()> {
    println!("Data directory: {}", services.paths.root().display());

    match services.sync.read_version_marker().await {
        Some(version) => println!("Installed server: {version}"),
        None => println!("Installed server: none"),
    }
    match services.manifest(true).await {
        Ok(manifest) => println!("Latest server: {}", manifest.version),
        Err(e) => println!("Latest server: unavailable ({e})"),
    }

    let required = services.required.has_downloaded_all().await?;
    println!(
        "Required weights: {}",
        if required { "present" } else { "missing" }
    );

    let port = services.config.server.port;
    if services.api.health().await {
        println!("Server: responding on port {port}");
    } else {
        println!("Server: not running on port {port}");
    }
    Ok(())
}

async fn weights(services: &Services, action: WeightsAction) -> anyhow::Result<()> {
    let registry = &services.weights;
    match action {
        WeightsAction::List { local } => {
            for option in registry.list(local).await? {
                let mark = if option.downloaded { "*" } else { " " };
                println!(
                    "{mark} {:<40} {:<30} {}",
                    option.weight.name,
                    option.weight.id,
                    format_bytes(option.weight.size)
                );
            }
        }
        WeightsAction::Download { id } => {
            let work = registry.download(&id);
            let started = with_progress(work, || {
                let status = registry.status(&id);
                let (loaded, total) = status.progress.map_or((0, 0), |p| (p.loaded, p.total));
                (loaded, total, id.clone())
            })
            .await?;
            if started {
                println!("Downloaded {}", registry.display_name_for(&id).await);
            } else {
                println!("{id} is already downloading");
            }
        }
        WeightsAction::Add { path } => {
            let option = registry.add_local_model(&path).await?;
            println!("Added {}", option.weight.name);
        }
        WeightsAction::Remove { name } => {
            if !registry.remove_by_name(&name)? {
                bail!("No local model named {name}");
            }
            println!("Removed {name}");
        }
        WeightsAction::Reveal { name } => {
            if !registry.reveal_by_name(&name)? {
                bail!("No local model named {name}");
            }
        }
    }
    Ok(())
}

async fn required(services: &Services, action: RequiredAction) -> anyhow::Result<()> {
    let downloader = &services.required;
    match action {
        RequiredAction::Check => {
            if downloader.has_downloaded_all().await? {
                println!("All required weights are present");
            } else {
                bail!("Required weights are missing, run: replay-engine required download");
            }
        }
        RequiredAction::Verify => {
            if downloader.verify_all().await? {
                println!("All required weights verified");
            } else {
                bail!("Required weights are missing or damaged, run: replay-engine required download");
            }
        }
        RequiredAction::Download => {
            let work = downloader.download_all();
            let started = with_progress(work, || transfer_snapshot(&downloader.status())).await?;
            if started {
                println!("Required weights downloaded");
            } else {
                println!("Required weights are already downloading");
            }
        }
    }
    Ok(())
}

async fn stems(services: &Services, action: StemsAction) -> anyhow::Result<()> {
    let downloader = &services.required;
    match action {
        StemsAction::List => {
            for file in downloader.list_stem_models()? {
                println!("{file}");
            }
        }
        StemsAction::Download { name } => {
            let models = services
                .api
                .stemming_models()
                .await
                .context("The server must be running to look up stem models")?;
            let Some(model) = models.into_iter().find(|m| m.name == name) else {
                bail!("The server does not know a stem model named {name}");
            };

            let work = downloader.download_stem_model(&model);
            let started = with_progress(work, || {
                let status = downloader.stem_status(&name);
                let (loaded, total) = status.item.progress.map_or((0, 0), |p| (p.loaded, p.total));
                let message = status.files.map_or_else(
                    || name.clone(),
                    |files| format!("{name} ({} of {} files left)", files.remaining, files.total),
                );
                (loaded, total, message)
            })
            .await?;
            if started {
                println!("Downloaded {name}");
            } else {
                println!("{name} is already downloading");
            }
        }
    }
    Ok(())
}

/// Bytes so far, bytes expected, and status text of a multi-file pass
fn transfer_snapshot(status: &TransferStatus) -> (u64, u64, String) {
    let current = status.progress.map_or(0, |p| p.loaded);
    (
        status.total_size_downloaded + current,
        status.total_size,
        status.download_status.clone(),
    )
}

/// Drive `work` to completion while rendering the polled progress
async fn with_progress<T, F>(work: impl Future<Output = T>, snapshot: F) -> T
where
    F: Fn() -> (u64, u64, String),
{
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    tokio::pin!(work);
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let output = loop {
        tokio::select! {
            output = &mut work => break output,
            _ = ticker.tick() => {
                let (loaded, total, message) = snapshot();
                if total > 0 {
                    bar.set_length(total);
                    bar.set_position(loaded.min(total));
                }
                bar.set_message(message);
            }
        }
    };

    bar.finish_and_clear();
    output
}
