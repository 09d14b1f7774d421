//! # Catalog Harness CLI (`cath`)
//!
//! ## Usage
//!
//! ```bash
//! cath --config ./config/cath.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cath init` | Create the SQLite database and the `posts` table |
//! | `cath sources` | Show whether each source can be attempted |
//! | `cath run` | Fetch, merge and archive CIDs (explicit or automatic) |
//! | `cath select` | Print the CID an automatic run would pick |
//! | `cath filter <cid> [url..]` | Run the sample URL filter |
//! | `cath merge --api a.json --probe p.json` | Merge fixture files offline |
//! | `cath archive` | Re-archive the latest snapshot |
//! | `cath draft latest\|daily\|cid` | Write Markdown drafts and queue them |
//! | `cath publish` | Import queued drafts into SQLite |
//! | `cath show <cid>` | Most recent history entry of a CID |
//! | `cath export` | Dump history or a daily log as a JSON array |
//! | `cath stats` | Counts across logs, queue and database |
//!
//! ## Examples
//!
//! ```bash
//! # Two explicit CIDs
//! cath run --cids sweet101,bini512
//!
//! # Second unseen CID from the latest listing
//! cath run --auto --auto-index 2
//!
//! # Drafts for every record of one day
//! cath draft daily 20251128
//! ```

use std::path::{Path, PathBuf};

use anyhow::bail;
use clap::{Parser, Subcommand};

use catalog_harness::config::{self, Config};
use catalog_harness::pipeline::RunOptions;
use catalog_harness::{
    archive, draft, export, inspect, logging, migrate, pipeline, publish, show, sources, stats,
};

const DEFAULT_CONFIG: &str = "./config/cath.toml";

/// Catalog Harness CLI: fetch, reconcile, archive and publish catalog
/// records keyed by content id.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cath.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cath",
    about = "Catalog Harness: fetch, reconcile, archive and publish catalog records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the publish database schema. Safe to run repeatedly.
    Init,

    /// Show configuration-level readiness of each source.
    Sources,

    /// Fetch, merge and archive CIDs.
    ///
    /// Without `--cids` or `--file` the next unseen CID is picked from the
    /// latest listing.
    Run {
        /// Comma-separated CIDs. May be repeated.
        #[arg(long, value_delimiter = ',')]
        cids: Vec<String>,

        /// File with one CID per line.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Force automatic selection even when CIDs are given.
        #[arg(long)]
        auto: bool,

        /// Which unseen candidate to pick (1-indexed).
        #[arg(long, default_value_t = 1)]
        auto_index: usize,
    },

    /// Print the CID an automatic run would pick.
    Select {
        #[arg(long, default_value_t = 1)]
        index: usize,
    },

    /// Run the sample URL filter over the given URLs.
    Filter {
        cid: String,
        urls: Vec<String>,
    },

    /// Merge source fixture files into one enriched record.
    Merge {
        #[arg(long)]
        api: Option<PathBuf>,
        #[arg(long)]
        probe: Option<PathBuf>,
        /// JSON array of URLs, or an object with `sample_images`.
        #[arg(long)]
        samples: Option<PathBuf>,
    },

    /// Apply the archive policies to the latest snapshot.
    Archive,

    /// Write Markdown drafts and publish-queue descriptors.
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },

    /// Import queued drafts into the database.
    Publish {
        /// Parse and report without writing or moving anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the most recent history entry of a CID.
    Show { cid: String },

    /// Dump the history log, or one daily log, as a JSON array.
    Export {
        /// Daily log to export (YYYYMMDD).
        #[arg(long)]
        day: Option<String>,

        /// Output file path. Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show counts for logs, processed set, queue and posts.
    Stats,
}

#[derive(Subcommand)]
enum DraftAction {
    /// Draft the newest record; an existing draft file is kept.
    Latest,
    /// Draft every record of one daily log (default: today).
    Daily { day: Option<String> },
    /// Draft one CID from the latest snapshot, history or source cache.
    Cid { cid: String },
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    if path == Path::new(DEFAULT_CONFIG) {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    bail!("Config file not found: {}", path.display())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("warn")?;
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Run {
            cids,
            file,
            auto,
            auto_index,
        } => {
            let opts = RunOptions {
                cids,
                file,
                auto,
                auto_index,
            };
            pipeline::run_pipeline(&cfg, &opts).await?;
        }
        Commands::Select { index } => {
            inspect::run_select(&cfg, index).await?;
        }
        Commands::Filter { cid, urls } => {
            inspect::run_filter(&cfg, &cid, &urls)?;
        }
        Commands::Merge {
            api,
            probe,
            samples,
        } => {
            if api.is_none() && probe.is_none() {
                bail!("merge needs at least one of --api or --probe");
            }
            inspect::run_merge(&cfg, api.as_deref(), probe.as_deref(), samples.as_deref())?;
        }
        Commands::Archive => {
            archive::run_archive(&cfg)?;
        }
        Commands::Draft { action } => match action {
            DraftAction::Latest => draft::generate_latest(&cfg)?,
            DraftAction::Daily { day } => draft::generate_daily(&cfg, day.as_deref())?,
            DraftAction::Cid { cid } => draft::generate_for_cid(&cfg, &cid)?,
        },
        Commands::Publish { dry_run } => {
            publish::run_publish(&cfg, dry_run).await?;
        }
        Commands::Show { cid } => {
            show::run_show(&cfg, &cid)?;
        }
        Commands::Export { day, output } => {
            export::run_export(&cfg, day.as_deref(), output.as_deref())?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
