use clap::{Parser, Subcommand};
use datasync::admin::{AdminState, admin_router};
use datasync::config::{Settings, redact_db_url};
use datasync::crypto::random_key;
use datasync::mapping::repair_sequence;
use datasync::pipeline::Pipeline;
use datasync::sync::SyncOptions;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "datasync", about = "DataSync: BI data-source integration and sync pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API and the due-sync scheduler (default)
    Serve,
    /// Sync one data source now
    Sync {
        id: Uuid,
        /// Run even if the source is not active
        #[arg(long, action = clap::ArgAction::SetTrue)]
        force: bool,
    },
    /// Sync every active data source whose frequency has elapsed
    SyncDue,
    /// Test a data source's connection
    Test { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init structured logging (respects RUST_LOG; defaults to info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(database = %redact_db_url(&settings.database_url), "connecting to database");

    let db = Database::connect(&settings.database_url).await?;
    Migrator::up(&db, None).await?;
    repair_sequence(&db).await?;

    tracing::info!("database initialized");

    let master_key = settings.encryption_key.unwrap_or_else(|| {
        tracing::warn!(
            "BI_ENCRYPTION_KEY not set, using a random key. \
             Stored connection secrets will be unreadable after restart. \
             Set BI_ENCRYPTION_KEY to a 64-char hex string (32 bytes) in production."
        );
        random_key()
    });

    let pipeline = Pipeline::new(db, master_key, &settings);

    match cli.command {
        None | Some(Commands::Serve) => serve(pipeline, &settings).await?,
        Some(Commands::Sync { id, force }) => {
            let outcome = pipeline
                .sync_data_source(
                    id,
                    SyncOptions {
                        force,
                        payload: None,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(2);
            }
        }
        Some(Commands::SyncDue) => {
            let due: Vec<Uuid> = pipeline
                .list_data_sources_needing_sync()
                .await?
                .iter()
                .map(|ds| ds.id)
                .collect();
            let outcomes = pipeline.sync_data_sources(&due).await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Some(Commands::Test { id }) => {
            let result = pipeline.test_connection(id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

async fn serve(pipeline: Pipeline, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();

    // ── Due-sync scheduler ────────────────────────────────────────────────────
    let scheduler = if settings.scheduler_interval.is_zero() {
        tracing::info!("due-sync scheduler disabled");
        None
    } else {
        tracing::info!(interval_secs = settings.scheduler_interval.as_secs(), "due-sync scheduler online");
        Some(
            pipeline
                .scheduler(settings.scheduler_interval)
                .spawn(cancel.clone()),
        )
    };

    // ── REST API ──────────────────────────────────────────────────────────────
    let state = AdminState { pipeline };
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "API online");

    let shutdown = cancel.clone();
    axum::serve(listener, admin_router(state, &settings.cors_allowed_origins))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = scheduler {
        handle.await.ok();
    }
    Ok(())
}
