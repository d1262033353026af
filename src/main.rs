use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use favdupes::catalog::Catalog;
use favdupes::config::Config;
use favdupes::duplicates::{ContentHash, ExhaustiveSearch, Verdict};
use favdupes::export::{self, ExportFormat};
use favdupes::logging::{self, LogTarget};

#[derive(Parser, Debug)]
#[command(name = "favdupes", version, about = "Track duplicate groups in an image collection")]
struct Cli {
    /// Path to config file (overrides FAVDUPES_CONFIG)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Catalog file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    catalog: Option<PathBuf>,

    /// Log to stderr instead of journald or the log file
    #[arg(long, global = true)]
    stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add blob fingerprint records from a JSON file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run duplicate discovery over every stored blob
    Find,

    /// Remove a deleted blob from the catalog and its duplicate group
    Trim { hash: String },

    /// Drop every group member not reviewed yet
    PurgePending,

    /// Drop all duplicate groups
    PurgeAll,

    /// Record a review verdict (new, false, keep, skip) for a grouped hash
    Verdict { hash: String, verdict: Verdict },

    /// List duplicate groups with their verdicts
    List,

    /// Check that the registry and its index agree
    Check,

    /// Export duplicate group members
    Export {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Output format; inferred from the path extension when omitted, else csv
        #[arg(short, long)]
        format: Option<ExportFormat>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let target = if cli.stderr {
        LogTarget::Stderr
    } else {
        LogTarget::System(config.logging.dir.clone())
    };
    logging::init(target)?;

    let catalog_path = cli.catalog.clone().unwrap_or_else(|| config.catalog_path.clone());
    let mut catalog = Catalog::load(&catalog_path)?;

    let modified = run(&cli.command, &config, &mut catalog)?;
    if modified {
        catalog.save(&catalog_path)?;
        info!("Catalog saved to {:?}", catalog_path);
    }
    Ok(())
}

/// Execute one subcommand; returns true if the catalog needs saving.
fn run(command: &Command, config: &Config, catalog: &mut Catalog) -> Result<bool> {
    match command {
        Command::Import { file } => {
            let count = catalog.import_blobs(file)?;
            println!("Imported {} blobs ({} in catalog)", count, catalog.blobs.len());
            Ok(true)
        }
        Command::Find => {
            let found = catalog.find_duplicates(
                &config.sensitivity.regular,
                &config.sensitivity.animated,
                &ExhaustiveSearch,
            )?;
            let dups = catalog.duplicates();
            println!(
                "Found {} new duplicates; {} images in {} groups",
                found,
                dups.hash_count(),
                dups.group_count()
            );
            Ok(true)
        }
        Command::Trim { hash } => {
            let hash = ContentHash::from(hash.as_str());
            match catalog.delete_blob(&hash)? {
                None => {
                    println!("{} is not in the catalog", hash);
                    Ok(false)
                }
                Some(true) => {
                    println!("Removed {}; its duplicate group was deleted", hash);
                    Ok(true)
                }
                Some(false) => {
                    println!("Removed {}", hash);
                    Ok(true)
                }
            }
        }
        Command::PurgePending => {
            let summary = catalog.duplicates_mut().delete_pending_duplicates();
            println!(
                "Deleted {} groups and {} hash entries",
                summary.groups_deleted, summary.hashes_removed
            );
            Ok(true)
        }
        Command::PurgeAll => {
            let summary = catalog.duplicates_mut().delete_all_duplicates();
            println!(
                "Deleted {} groups and {} hash entries",
                summary.groups_deleted, summary.hashes_removed
            );
            Ok(true)
        }
        Command::Verdict { hash, verdict } => {
            let key = catalog
                .duplicates()
                .group_of(hash)
                .map(|(key, _)| key.clone())
                .with_context(|| format!("{} is not in any duplicate group", hash))?;
            catalog
                .duplicates_mut()
                .set_verdict(&key, &ContentHash::from(hash.as_str()), *verdict)?;
            println!("{} in {} is now {}", hash, key, verdict);
            Ok(true)
        }
        Command::List => {
            for (key, group) in catalog.duplicates().registry() {
                println!("{}", key);
                for (hash, verdict) in &group.verdicts {
                    println!("    {:<8} {}", verdict, hash);
                }
            }
            Ok(false)
        }
        Command::Check => {
            catalog.duplicates().check_consistency()?;
            println!(
                "Registry consistent: {} groups, {} hashes",
                catalog.duplicates().group_count(),
                catalog.duplicates().hash_count()
            );
            Ok(false)
        }
        Command::Export { path, format } => {
            let format = (*format)
                .or_else(|| ExportFormat::from_path(path))
                .unwrap_or(ExportFormat::Csv);
            let count = export::export_duplicates(catalog.duplicates(), path, format)?;
            println!("Exported {} group members to {}", count, path.display());
            Ok(false)
        }
    }
}
