use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vaultlink::{IndexerConfig, Vault, VaultWatcher, read_snapshot};

#[derive(Debug, Parser)]
#[command(
    name = "vaultlink",
    version,
    about = "Vault backlink indexer: snapshot + SQLite, kept in sync with the filesystem"
)]
struct Cli {
    /// Path to the vault directory.
    #[arg(long, env = "VAULTLINK_VAULT", global = true)]
    vault: Option<PathBuf>,

    /// TOML config file.
    #[arg(long, env = "VAULTLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory for the snapshot and the SQLite store (overrides the config).
    #[arg(long, env = "VAULTLINK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the index once and exit.
    Index,
    /// Watch a vault and rebuild on every change until Ctrl-C.
    Watch,
    /// Print the documents linking to a target, read from the snapshot.
    Backlinks {
        /// Link target as written inside `[[...]]`.
        target: String,
    },
    /// Print the snapshot and database locations.
    Paths,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Command::Index => handle_index(cli.vault, cfg).await?,
        Command::Watch => handle_watch(cli.vault, cfg).await?,
        Command::Backlinks { target } => handle_backlinks(&cfg, &target)?,
        Command::Paths => {
            println!("snapshot: {}", cfg.snapshot_path().display());
            println!("database: {}", cfg.db_path().display());
        }
    }

    Ok(())
}

async fn handle_index(vault: Option<PathBuf>, cfg: IndexerConfig) -> anyhow::Result<()> {
    let root = require_vault(vault)?;
    let vault = Vault::with_config(root, cfg.clone())?;
    let indexer = vaultlink::Indexer::new(cfg);
    let snapshot = indexer.snapshot_path();

    let index = tokio::task::spawn_blocking(move || indexer.rebuild(&vault)).await??;
    println!(
        "indexed: notes={} targets={} backlinks={}",
        index.len(),
        index.targets().count(),
        index.backlink_count()
    );
    println!("snapshot: {}", snapshot.display());
    Ok(())
}

async fn handle_watch(vault: Option<PathBuf>, cfg: IndexerConfig) -> anyhow::Result<()> {
    let root = require_vault(vault)?;
    let mut watcher = VaultWatcher::new(cfg);
    watcher.subscribe(|index| {
        println!(
            "index updated: notes={} backlinks={}",
            index.len(),
            index.backlink_count()
        );
    });

    watcher.start_watch(root).await?;
    println!("watching... (Ctrl-C to stop)");
    tokio::signal::ctrl_c().await?;
    watcher.stop_watch().await;
    Ok(())
}

fn handle_backlinks(cfg: &IndexerConfig, target: &str) -> anyhow::Result<()> {
    let index = read_snapshot(&cfg.snapshot_path())?;
    for source in index.backlinks_for(target) {
        println!("{source}");
    }
    Ok(())
}

fn load_config(
    path: Option<&std::path::Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<IndexerConfig> {
    let mut cfg = match path {
        Some(p) => IndexerConfig::from_toml_file(p)?,
        None => IndexerConfig::default(),
    };
    if let Some(dir) = data_dir {
        cfg = cfg.with_data_dir(dir);
    }
    Ok(cfg)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn require_vault(vault: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    vault.ok_or_else(|| anyhow::anyhow!("missing --vault (or VAULTLINK_VAULT)"))
}
