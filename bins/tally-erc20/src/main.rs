//! Tally ERC20 - token supply and balance indexer
//!
//! Replays ERC20 logs from a JSON-lines file into a SQLite ledger and serves
//! it over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Index a log dump, metadata from a local node
//! tally-erc20 --input logs.jsonl --rpc-url http://localhost:8545
//!
//! # No metadata calls, keep the API up afterwards
//! tally-erc20 --input logs.jsonl --offline --serve
//!
//! # Only two tokens, skip events that fail to apply
//! tally-erc20 --input logs.jsonl --contracts 0x123...,0x456... --on-error skip
//! ```

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use std::sync::Arc;
use tally::etl::JsonLinesExtractor;
use tally::{Pipeline, TallyConfig};
use tally_common::{MetadataFetcher, MetadataSource, StaticMetadata};
use tally_erc20::{EntityStore, Erc20Decoder, Erc20Sink, SqliteStore};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();

    tracing::info!(target: "tally_erc20::main", "Starting Tally ERC20 indexer");
    tracing::info!(target: "tally_erc20::main", "Input: {}", config.input);
    tracing::info!(target: "tally_erc20::main", "Database: {}", config.db_path);
    tracing::info!(target: "tally_erc20::main", "Error policy: {}", config.on_error);

    // Create storage
    let store: Arc<dyn EntityStore> = Arc::new(
        SqliteStore::new(&config.db_path)
            .with_context(|| format!("Failed to open database {}", config.db_path))?,
    );
    if let Some(checkpoint) = store.checkpoint()? {
        tracing::info!(
            target: "tally_erc20::main",
            block = checkpoint.block_number,
            log_index = checkpoint.log_index,
            "Resuming after checkpoint"
        );
    }

    // Create metadata source
    let metadata: Arc<dyn MetadataSource> = if config.offline {
        tracing::info!(target: "tally_erc20::main", "Offline mode: token metadata will use defaults");
        Arc::new(StaticMetadata::new())
    } else {
        tracing::info!(target: "tally_erc20::main", "RPC URL: {}", config.rpc_url);
        Arc::new(MetadataFetcher::new(config.rpc_url.clone())?)
    };

    // Create extractor
    let extractor = JsonLinesExtractor::open(&config.input, config.batch_size).await?;

    let contract_filter = config.contract_filter()?;
    if !contract_filter.is_empty() {
        tracing::info!(
            target: "tally_erc20::main",
            "Indexing only {} configured contract(s)",
            contract_filter.allowed.len()
        );
    }

    let sink = Arc::new(Erc20Sink::new(store.clone(), metadata).with_error_policy(config.on_error));

    let tally_config = TallyConfig::builder(Box::new(extractor))
        .add_decoder(Arc::new(Erc20Decoder::new()))
        .add_sink(sink.clone())
        .with_contract_filter(contract_filter)
        .error_policy(config.on_error)
        .build();

    let pipeline = Pipeline::new(tally_config)?;
    let router = pipeline.router();

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP API to {addr}"))?;
    tracing::info!(target: "tally_erc20::main", "HTTP API listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    // Run the pipeline (returns once the input is drained or on shutdown)
    let result = pipeline.run(shutdown.clone()).await;

    if config.serve && result.is_ok() && !shutdown.is_cancelled() {
        tracing::info!(target: "tally_erc20::main", "Input drained, serving until Ctrl+C");
        shutdown.cancelled().await;
    }
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(target: "tally_erc20::main", "Server error: {}", e),
        Err(e) => tracing::error!(target: "tally_erc20::main", "Server task failed: {}", e),
    }

    let stats = result.context("Pipeline failed")?;

    // Print final statistics
    let sink_stats = sink.stats();
    tracing::info!(target: "tally_erc20::main", "Final Statistics:");
    tracing::info!(target: "tally_erc20::main", "  Logs read: {}", stats.logs);
    tracing::info!(target: "tally_erc20::main", "  Events applied: {}", sink_stats.applied);
    tracing::info!(target: "tally_erc20::main", "  Events already applied: {}", sink_stats.replayed);
    tracing::info!(target: "tally_erc20::main", "  Events failed: {}", sink_stats.failed);
    if let Ok(store_stats) = store.stats() {
        tracing::info!(target: "tally_erc20::main", "  Tokens: {}", store_stats.tokens);
        tracing::info!(target: "tally_erc20::main", "  Accounts: {}", store_stats.accounts);
        tracing::info!(target: "tally_erc20::main", "  Snapshots: {}", store_stats.snapshots);
        if let Some(checkpoint) = store_stats.checkpoint {
            tracing::info!(target: "tally_erc20::main", "  Latest block: {}", checkpoint.block_number);
        }
    }

    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "tally_erc20::main", "Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(target: "tally_erc20::main", "Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!(target: "tally_erc20::main", "Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        () = terminate => {
            tracing::info!(target: "tally_erc20::main", "Received SIGTERM, initiating graceful shutdown...");
        }
        () = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}
