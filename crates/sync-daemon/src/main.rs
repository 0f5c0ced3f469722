//! sync-daemon: keeps wiki projects and their Git-tracked Markdown folders
//! in step.
//!
//! `run` watches the base path and syncs the projects whose folders change.
//! The other subcommands are one-shot operator actions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sync_core::{ConflictStrategy, DocumentStore, FileStatus, SyncConfig, SyncEngine, SyncEvent};
use sync_daemon::watcher::DEFAULT_DEBOUNCE;
use sync_daemon::{FileWatcher, JsonFileStore, Runner};

#[derive(Parser, Debug)]
#[command(name = "sync-daemon")]
#[command(about = "Sync wiki projects with Git-tracked Markdown folders")]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory holding the project folders
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// fileWins, dbWins or manual
    #[arg(long)]
    strategy: Option<ConflictStrategy>,

    /// Turn sync on regardless of the config file
    #[arg(long)]
    enable: bool,

    /// JSON file holding the document store
    /// (default: <base path>/.wiki-sync/store.json)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync everything, then watch for changes until Ctrl+C
    Run {
        /// Debounce period for file events, in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Also sync every project on this period, in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run one pass for a project, or for every project
    Sync { project: Option<String> },
    /// List folders that belong to no project
    Scan,
    /// Turn a folder into a project
    Adopt {
        folder: PathBuf,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Move a folder into the orphan area
    Quarantine {
        folder: PathBuf,
        #[arg(long)]
        project: Option<String>,
    },
    /// Prepend an empty frontmatter block to pending files
    FixFrontmatter {
        project: String,
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Hand a pending file to the store as an attachment
    Attach { project: String, file: String },
    /// Move a pending file into the orphan area
    Discard { project: String, file: String },
    /// Show whether a page's file exists and matches the store
    Status { project: String, title: String },
    /// Rewrite a page's file from the store
    Restore { project: String, title: String },
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    config.apply_env()?;
    if let Some(base) = &args.base_path {
        config.base_path = base.clone();
    }
    if let Some(strategy) = args.strategy {
        config.conflict_strategy = strategy;
    }
    if args.enable {
        config.enabled = true;
    }
    Ok(config)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG; defaults to info, or debug with --verbose
    let default_filter = if args.verbose {
        "debug,sync_core=debug,sync_daemon=debug"
    } else {
        "info,sync_core=info,sync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    info!("Base path: {}", config.base_path.display());
    info!("Conflict strategy: {:?}", config.conflict_strategy);
    if !config.enabled {
        info!("Sync is disabled; passes and write-back will be skipped");
    }

    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| config.base_path.join(".wiki-sync").join("store.json"));
    let store = JsonFileStore::open(&store_path)?;
    let engine = Arc::new(SyncEngine::new(config));
    let _events = engine.events().subscribe(|event: SyncEvent| {
        if let Ok(json) = serde_json::to_string(&event) {
            info!(target: "sync_daemon::events", "{}", json);
        }
    });
    let runner = Arc::new(Runner::new(engine.clone(), store));
    let ctx = runner.context();
    let store = runner.store();

    match args.command {
        Command::Run { debounce_ms, interval } => {
            let base = engine.config().base_path.clone();
            std::fs::create_dir_all(&base).with_context(|| format!("creating {}", base.display()))?;
            let debounce = debounce_ms.map(Duration::from_millis).unwrap_or(DEFAULT_DEBOUNCE);
            let watcher = FileWatcher::new(base, debounce)?;
            runner.clone().run(watcher, interval.map(Duration::from_secs)).await?;
            info!("Shutting down");
        }
        Command::Sync { project } => match project {
            Some(identifier) => print_json(&runner.sync_project(&identifier))?,
            None => {
                for (identifier, report) in runner.sync_all()? {
                    println!("{}:", identifier);
                    print_json(&report)?;
                }
            }
        },
        Command::Scan => print_json(&engine.scan_all_folders(store)?)?,
        Command::Adopt { folder, parent } => {
            let parent = match parent {
                Some(identifier) => Some(
                    store
                        .project(&identifier)?
                        .with_context(|| format!("unknown project {}", identifier))?,
                ),
                None => None,
            };
            let project = engine.adopt_folder(store, &ctx, &folder, parent.as_ref())?;
            println!("Adopted {} as {}", folder.display(), project.identifier);
        }
        Command::Quarantine { folder, project } => {
            let project = match project {
                Some(identifier) => store.project(&identifier)?,
                None => None,
            };
            let target = engine.quarantine_folder(&folder, ctx.actor(), project.as_ref())?;
            println!("Moved {} to {}", folder.display(), target.display());
        }
        Command::FixFrontmatter { project, files } => {
            print_json(&engine.fix_missing_frontmatter(store, &ctx, &project, &files)?)?;
        }
        Command::Attach { project, file } => {
            let target = engine.attach_pending_file(store, &ctx, &project, &file)?;
            println!("Attached {} as {}", file, target.display());
        }
        Command::Discard { project, file } => {
            let target = engine.discard_pending_file(store, &ctx, &project, &file)?;
            println!("Moved {} to {}", file, target.display());
        }
        Command::Status { project, title } => {
            let Some(doc) = store.document_by_title(&project, &title)? else {
                bail!("no page '{}' in {}", title, project);
            };
            match engine.file_status(store, &doc)? {
                FileStatus::Missing { expected } => {
                    println!("missing (expected at {})", expected.display())
                }
                FileStatus::Present { path, locked, in_sync } => println!(
                    "{} {}{}",
                    path.display(),
                    if in_sync { "in sync" } else { "differs from the store" },
                    if locked { ", locked" } else { "" }
                ),
            }
        }
        Command::Restore { project, title } => {
            let Some(doc) = store.document_by_title(&project, &title)? else {
                bail!("no page '{}' in {}", title, project);
            };
            let path = engine.restore_file(store, &ctx, &doc)?;
            println!("Restored {}", path.display());
        }
    }

    Ok(())
}
