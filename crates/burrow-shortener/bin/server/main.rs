mod cli;

use crate::cli::{LogFormatArg, StorageBackendArg, CLI};
use anyhow::Context;
use burrow_shortener::{Settings, ShortenerService};
use burrow_storage::{InMemoryRepository, PostgresRepository, Repository};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        storage_backend = %config.storage,
        base_url = %config.base_url,
        trusted_subnet = ?config.trusted_subnet.map(|subnet| subnet.to_string()),
        delete_queue_capacity = config.delete_queue_capacity,
        "starting shortener"
    );

    let settings = config.settings();

    match config.storage {
        StorageBackendArg::InMemory => {
            run(InMemoryRepository::new(), settings).await?;
        }
        StorageBackendArg::File => {
            let path = config
                .file_storage_path
                .context("file storage path is required when storage backend is file")?;
            let repository = InMemoryRepository::open(&path)
                .await
                .with_context(|| format!("failed to load storage log {}", path.display()))?;
            run(repository, settings).await?;
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .context("database dsn is required when storage backend is postgres")?;
            let repository = PostgresRepository::connect(&dsn)
                .await
                .context("failed to connect to postgres")?;
            repository
                .ensure_schema()
                .await
                .context("failed to prepare postgres schema")?;
            run(repository, settings).await?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormatArg::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormatArg::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run<R: Repository>(repository: R, settings: Settings) -> anyhow::Result<()> {
    repository
        .ping()
        .await
        .context("storage backend is unreachable")?;
    let stats = repository.get_stats().await?;
    info!(urls = stats.urls, users = stats.users, "storage ready");

    let (service, deletions) =
        ShortenerService::spawn(repository, settings).context("invalid cookie key")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let stats = service.shutdown(deletions).await?;
    info!(
        deletes_applied = stats.applied,
        deletes_failed = stats.failed,
        "shortener stopped"
    );
    Ok(())
}
