// src/main.rs

use anyhow::{Context, Result};
use aurum::collaborators::aur::AurArchive;
use aurum::collaborators::makepkg::Makepkg;
use aurum::collaborators::pacman::{Pacman, PacmanDb};
use aurum::{sync_install, CancelToken, Config, SyncContext, SyncRequest};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "aurum")]
#[command(author, version, about = "AUR helper with layered, lock-protected installs", long_about = None)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/aurum/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages from the repositories or the AUR
    Sync {
        /// Refresh the repository databases first
        #[arg(short = 'y', long)]
        refresh: bool,

        /// Upgrade installed AUR packages; pass twice to allow downgrades
        #[arg(short = 'u', long = "sysupgrade", action = ArgAction::Count)]
        sysupgrade: u8,

        /// Do not ask for confirmation
        #[arg(long)]
        noconfirm: bool,

        /// Packages to install; prefix with `aur/` or `<repo>/` to pick the origin
        targets: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Sync {
            refresh,
            sysupgrade,
            noconfirm,
            targets,
        } => {
            if targets.is_empty() && sysupgrade == 0 && !refresh {
                anyhow::bail!("no targets specified");
            }
            config.no_confirm |= noconfirm;
            config.validate()?;
            config.check_tools()?;

            let cancel = CancelToken::new();
            cancel
                .cancel_when(tokio::signal::ctrl_c())
                .context("failed to install the interrupt handler")?;

            let ctx = SyncContext {
                local_db: Arc::new(PacmanDb::new(&config)),
                archive: Arc::new(AurArchive::new(&config)?),
                build_tool: Arc::new(Makepkg::new(&config)),
                package_manager: Arc::new(Pacman::new(&config)),
                config: Arc::new(config),
                cancel,
            };

            info!("Starting sync of {} target(s)", targets.len());
            sync_install(
                &ctx,
                &SyncRequest {
                    targets,
                    refresh,
                    sysupgrade,
                },
            )?;
            println!("Done.");
            Ok(())
        }
    }
}
