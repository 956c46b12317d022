use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use filescanner::actions::{self, Action, ExecuteOptions};
use filescanner::inventory::{Inventory, ScanOptions};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "filescanner", version, about = "File inventory with duplicate detection and music tag indexing")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum ActionArg {
    Print,
    Unlink,
    #[value(name = "move-tags", alias = "moveid3")]
    MoveTags,
    #[value(name = "move-path", alias = "movepath")]
    MovePath,
    Read,
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Print => Action::Print,
            ActionArg::Unlink => Action::Unlink,
            ActionArg::MoveTags => Action::MoveTags,
            ActionArg::MovePath => Action::MovePath,
            ActionArg::Read => Action::Read,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema
    Init,

    /// Scan a folder and bring its files into the inventory
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Also read tags of music files while scanning
        #[arg(long)]
        tags: bool,

        /// Skip content hashing
        #[arg(long)]
        no_hash: bool,

        /// Instead of walking, check stored files under the path still exist
        #[arg(short = 'c', long, conflicts_with = "scantags")]
        checkdb: bool,

        /// Instead of walking, read tags of stored music files under the path
        #[arg(short = 's', long)]
        scantags: bool,

        /// Number of parallel workers (0 = use config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// List files under a path whose content repeats an earlier file
    Duplicates {
        /// Directory to search
        path: PathBuf,
    },

    /// Run a SQL statement from a file and print the first column
    Query {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Apply an action to every path listed in a file
    Execute {
        /// File with one path per line
        #[arg(short, long)]
        list: PathBuf,

        #[arg(short, long, value_enum)]
        action: ActionArg,

        /// Print what would happen without touching any file
        #[arg(long)]
        dry_run: bool,

        /// Root directory for moves (overrides config target_root)
        #[arg(long)]
        target_root: Option<PathBuf>,

        /// Number of parallel workers (0 = use config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = filescanner::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(filescanner::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    if let Commands::Scan { jobs, .. } | Commands::Execute { jobs, .. } = &cli.command {
        if *jobs > 0 {
            config.workers.scan = *jobs;
            config.workers.tags = *jobs;
            config.workers.check = *jobs;
            config.workers.execute = *jobs;
        }
    }

    let inventory = Inventory::from_config(&config, &db_path)
        .context("Failed to open database")?
        .with_progress(true);

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", db_path.display());
        }

        Commands::Scan { path, tags, no_hash, checkdb, scantags, .. } => {
            let path = absolute(&path)?;
            let prefix = path.to_string_lossy();

            let report = if checkdb {
                inventory.deletion_scan(&prefix).context("Deletion check failed")?
            } else if scantags {
                inventory.scan_tags_under(&prefix).context("Tag scan failed")?
            } else {
                let options = ScanOptions { hash: !no_hash, tags };
                inventory.scan_folder(&path, options).context("Scan failed")?
            };
            println!(
                "Scan complete: {} processed, {} new, {} hashed, {} tagged, {} deleted, {} errors",
                report.processed, report.new, report.hashed, report.tagged, report.deleted,
                report.errors + report.hash_failures + report.tag_failures
            );
        }

        Commands::Duplicates { path } => {
            let path = absolute(&path)?;
            let duplicates = inventory
                .find_duplicates(&path.to_string_lossy())
                .context("Duplicate search failed")?;
            for dup in &duplicates {
                log::info!("{} duplicates {} ({})", dup.path, dup.original, dup.hash);
                println!("{}", dup.path);
            }
        }

        Commands::Query { file } => {
            let sql = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let db = inventory.pool().acquire().context("Failed to connect")?;
            let rows = filescanner::query::run_query(&db, &sql).context("Query failed")?;
            for row in rows {
                println!("{}", row);
            }
        }

        Commands::Execute { list, action, dry_run, target_root, .. } => {
            let paths = actions::read_list(&list)
                .with_context(|| format!("Failed to read {}", list.display()))?;
            let options = ExecuteOptions {
                dry_run,
                target_root: target_root.or(config.target_root.clone()),
            };
            if dry_run {
                println!("DRY RUN: no files will be changed");
            }
            let report = actions::execute(
                &inventory,
                paths,
                action.into(),
                &options,
                inventory.workers().execute,
            )
            .context("Execute failed")?;
            println!(
                "Execute complete: {} processed, {} done, {} skipped, {} errors",
                report.processed, report.done, report.skipped, report.errors
            );
        }

        Commands::Stats => {
            let stats = inventory.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Total files:      {}", stats.total_files);
            println!("Deleted files:    {}", stats.deleted_files);
            println!("Music files:      {}", stats.music_files);
            println!("Tag-scanned:      {}", stats.tag_scanned);
            println!("Hashed files:     {}", stats.hashed_files);
            println!("Duplicate groups: {}", stats.duplicate_groups);
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Invalid path {}", path.display()))
}
