//! River loader
//!
//! Streams NDJSON load records into a document store, resolving identifier
//! references between the loaded documents.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Context;
use clap::Parser;
use helios_loader::{DocumentStore, LoaderConfig, Loader, init_logging};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};

#[cfg(feature = "sqlite")]
use helios_loader::SqliteStore;

/// Opens the SQLite store named by the configuration.
#[cfg(feature = "sqlite")]
fn create_store(config: &LoaderConfig) -> anyhow::Result<SqliteStore> {
    info!(database = %config.database_url, "Initializing SQLite store");
    let store = if config.is_memory_database() {
        SqliteStore::in_memory()?
    } else {
        SqliteStore::open(&config.database_url)?
    };
    store.init_schema()?;
    Ok(store)
}

#[cfg(not(feature = "sqlite"))]
fn create_store(config: &LoaderConfig) -> anyhow::Result<helios_loader::InMemoryStore> {
    if !config.is_memory_database() {
        anyhow::bail!(
            "database '{}' requires the sqlite feature; only ':memory:' is available",
            config.database_url
        );
    }
    info!("Initializing in-memory store");
    Ok(helios_loader::InMemoryStore::new())
}

async fn open_input(config: &LoaderConfig) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if config.reads_stdin() {
        info!("Reading load records from stdin");
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(&config.input)
        .await
        .with_context(|| format!("cannot open input '{}'", config.input))?;
    info!(input = %config.input, "Reading load records");
    Ok(Box::new(BufReader::new(file)))
}

async fn run<S: DocumentStore>(config: &LoaderConfig, store: S) -> anyhow::Result<()> {
    let input = open_input(config).await?;
    let mut output = match &config.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create output '{}'", path))?,
        )),
        None => None,
    };

    let mut loader = Loader::new(store);
    loader
        .load_ndjson(input, |document| {
            if let Some(out) = output.as_mut() {
                serde_json::to_writer(&mut *out, document)?;
                out.write_all(b"\n")?;
            }
            Ok(())
        })
        .await?;

    if let Some(mut out) = output {
        out.flush()?;
    }

    let (stats, pending) = loader.finish();
    info!(
        loaded = stats.loaded,
        rejected = stats.rejected,
        resolved = stats.resolved,
        deferred = stats.deferred,
        skipped = stats.skipped,
        discharged = stats.discharged,
        "Load complete"
    );
    if !pending.is_empty() {
        for (target, source, ids) in pending.iter() {
            warn!(target = %target, source = %source, ids = ?ids, "Reference never resolved");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LoaderConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(version = helios_loader::VERSION, "Starting river-load");

    let store = create_store(&config)?;
    run(&config, store).await
}
