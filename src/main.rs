//! Grove CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Incremental invalidation for multi-project workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Workspace config file (defaults to grove.toml under the root)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Project manifests to open (defaults to grove-project.toml under the root)
    #[arg(short, long = "manifest")]
    manifests: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every project and print its build order
    Check {
        /// Also print cache statistics
        #[arg(long)]
        stats: bool,
    },
    /// Report what a change to one file invalidates
    Invalidate {
        /// The changed file
        path: PathBuf,

        /// Treat the file as newly added
        #[arg(long, conflicts_with = "removed")]
        added: bool,

        /// Treat the file as removed
        #[arg(long)]
        removed: bool,
    },
    /// Watch the root and report invalidations as files change
    Watch,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "grove={0},grove_workspace={0},grove_watcher={0},grove_cache={0},grove_core={0}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let session = commands::Session {
        root: cli.root,
        config: cli.config,
        manifests: cli.manifests,
    };

    match cli.command {
        Commands::Check { stats } => commands::check(&session, stats),
        Commands::Invalidate { path, added, removed } => {
            let kind = if added {
                commands::FileEvent::Added
            } else if removed {
                commands::FileEvent::Removed
            } else {
                commands::FileEvent::Changed
            };
            commands::invalidate(&session, &path, kind)
        }
        Commands::Watch => commands::watch(&session).await,
        Commands::Version => {
            println!("Grove v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
