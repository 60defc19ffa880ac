use anyhow::Result;
use clap::{Parser, Subcommand};
use rowsync::schema::reconcile::TableFilter;
use rowsync::store::FileStore;
use rowsync::{sync_stores, FromWorker, SyncOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rowsync", version, about = "Converge a destination database to a source with minimal data transfer")]
struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a source endpoint on stdin/stdout (run me over ssh or a pipe)
    From {
        /// Database file to serve
        database: PathBuf,
    },
    /// Sync a destination database file from a source database file
    Sync {
        /// Source database file
        #[arg(long)]
        from: PathBuf,
        /// Destination database file (rewritten in place)
        #[arg(long)]
        to: PathBuf,
        /// Comma-separated table names to exclude entirely
        #[arg(long, default_value = "")]
        ignore: String,
        /// Comma-separated table names to sync exclusively
        #[arg(long, default_value = "")]
        only: String,
        /// Concurrent table workers
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Run each worker against an independent read view instead of one
        /// shared snapshot
        #[arg(long)]
        no_snapshot: bool,
        /// Do everything, then roll back instead of committing
        #[arg(long)]
        rollback_after: bool,
        /// Commit what was applied even if the sync fails partway
        #[arg(long)]
        partial: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::From { database } => {
            let store = FileStore::load(&database)?;
            let worker = FromWorker::new(store, tokio::io::stdin(), tokio::io::stdout());
            worker.run().await
        }

        Command::Sync {
            from,
            to,
            ignore,
            only,
            workers,
            no_snapshot,
            rollback_after,
            partial,
        } => {
            let from_store = FileStore::load(&from)?;
            let to_store = FileStore::load(&to)?;

            let opts = SyncOptions {
                filter: TableFilter::new(
                    TableFilter::parse_list(&ignore),
                    TableFilter::parse_list(&only),
                ),
                no_snapshot,
                rollback_after,
                partial,
            };

            let from_handles = (0..workers.max(1)).map(|_| from_store.handle()).collect();
            let to_handles = (0..workers.max(1)).map(|_| to_store.handle()).collect();

            let report = match sync_stores(from_handles, to_handles, opts).await {
                Ok(report) => report,
                Err(e) => {
                    if partial {
                        // The workers committed what they could; keep it.
                        FileStore::save(&to_store, &to)?;
                    }
                    return Err(e);
                }
            };
            FileStore::save(&to_store, &to)?;

            for table in &report.tables {
                info!(
                    table = %table.table,
                    hash_commands = table.hash_commands,
                    rows_commands = table.rows_commands,
                    rows_changed = table.rows_changed,
                    "synced"
                );
            }
            info!(
                tables = report.tables.len(),
                rows_changed = report.rows_changed(),
                "done"
            );
            Ok(())
        }
    }
}
