//! asha-sync: inspect and drive the local sync mirror
//!
//! Usage:
//!   asha-sync pending                       # List unconfirmed writes
//!   asha-sync sync                          # Replay the ledger now
//!   asha-sync fetch visits --patient 3      # Refresh one patient's visits
//!   asha-sync --offline fetch patients      # Read the mirror without the network

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use asha_sync_core::{
    ConnectivityFlag, Database, EntityKind, HttpTransport, ListFilter, ParentRef,
    PatientCategory, RemoteClient, SyncConfig, SyncEngine,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "asha-sync", about = "Inspect and drive the Asha sync mirror")]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite mirror; overrides `database_path` from the config
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Treat the network as unreachable
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List pending ledger entries, oldest first
    Pending,
    /// List pending entries and retained sync history
    History,
    /// Print pending and tombstone counts
    Count,
    /// Run one sync pass
    Sync,
    /// Fetch a list, refreshing the mirror when online
    Fetch {
        /// patients, visits, pregnancy_visits, child_growth or vaccinations
        kind: EntityKind,
        /// Parent patient local id
        #[arg(long)]
        patient: Option<i64>,
        /// Patient category, e.g. "Pregnant Woman"
        #[arg(long)]
        category: Option<String>,
        /// Patient name prefix
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one local record
    Show { kind: EntityKind, local_id: i64 },
    /// Drop sync history older than the given number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// List remote deletes still owed
    Tombstones,
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SyncConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => SyncConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.display().to_string();
    }
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path))?;
    let transport = HttpTransport::new(&config).context("building HTTP client")?;
    let network = Arc::new(ConnectivityFlag::new(!cli.offline));
    let engine = SyncEngine::new(db, RemoteClient::new(Arc::new(transport), config), network);

    match cli.command {
        Command::Pending => print_json(&engine.list_pending()?)?,
        Command::History => print_json(&engine.list_ledger()?)?,
        Command::Count => print_json(&json!({
            "pending": engine.pending_count()?,
            "tombstones": engine.tombstones()?.len(),
            "last_sync_at": engine.last_sync_at()?,
        }))?,
        Command::Sync => {
            let report = engine.force_sync().await?;
            print_json(&report)?;
        }
        Command::Fetch {
            kind,
            patient,
            category,
            name,
        } => {
            let filter = ListFilter {
                parent: patient.map(ParentRef::local),
                category: category.map(PatientCategory::from),
                name_prefix: name,
            };
            let outcome = engine.fetch_list(kind, filter).await?;
            print_json(&json!({
                "stale": outcome.stale,
                "error": outcome.error,
                "inserted": outcome.inserted,
                "updated": outcome.updated,
                "skipped": outcome.skipped,
                "records": outcome.records,
            }))?;
        }
        Command::Show { kind, local_id } => {
            let record = engine
                .get_record(kind, local_id)?
                .with_context(|| format!("no {} record with local id {}", kind, local_id))?;
            print_json(&record)?;
        }
        Command::Purge { days } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            let purged = engine.purge_synced(cutoff)?;
            tracing::info!(purged, "Purged sync history");
        }
        Command::Tombstones => {
            let rows: Vec<_> = engine
                .tombstones()?
                .into_iter()
                .map(|t| {
                    json!({
                        "kind": t.kind.table(),
                        "server_id": t.server_id,
                        "deleted_at": t.deleted_at,
                        "retry_count": t.retry_count,
                        "last_error": t.last_error,
                    })
                })
                .collect();
            print_json(&rows)?;
        }
    }

    Ok(())
}
