//! jetindex CLI — run the firehose indexer and inspect its state.
//!
//! Usage:
//! ```bash
//! jetindex run    --endpoint wss://jetstream.example/subscribe --db ./jetindex.db
//! jetindex status --db ./jetindex.db
//! jetindex info
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use jetindex_core::types::Collection;
use jetindex_observability::{init_otlp_metrics, init_tracing, IndexerMetrics, LogConfig};
use jetindex_storage::SqliteStorage;
use jetindex_stream::{Connector, ConnectorConfig, ConnectorState, WsTransport};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("jetindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("jetindex {}", env!("CARGO_PKG_VERSION"));
    println!("Real-time firehose indexer for gather collections\n");
    println!("USAGE:");
    println!("    jetindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run      Run the indexer against a firehose endpoint");
    println!("    status   Show cursor and row counts for a database");
    println!("    info     Show JetIndex configuration info");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("RUN OPTIONS:");
    println!("    --endpoint <url>     Firehose WebSocket endpoint (required)");
    println!("    --db <path>          SQLite database path (default ./jetindex.db)");
    println!("    --indexer-id <id>    Cursor key for this indexer (default jetindex)");
    println!("    --otlp <endpoint>    Export metrics via OTLP to this endpoint");
    println!("    --json-logs          Emit JSON structured logs");
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.windows(2)
        .find(|pair| pair[0] == name)
        .map(|pair| pair[1].clone())
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

async fn cmd_run(args: &[String]) -> Result<()> {
    let Some(endpoint) = flag_value(args, "--endpoint") else {
        bail!("run requires --endpoint <url>");
    };
    let db_path = flag_value(args, "--db").unwrap_or_else(|| "./jetindex.db".to_string());

    init_tracing(&LogConfig {
        json: has_flag(args, "--json-logs"),
        ..Default::default()
    });

    // Install the OTLP exporter before any metrics handle is created so
    // instruments bind to the real provider.
    let _provider = match flag_value(args, "--otlp") {
        Some(otlp) => Some(
            init_otlp_metrics(&otlp, "jetindex")
                .with_context(|| format!("failed to init OTLP metrics exporter at {otlp}"))?,
        ),
        None => None,
    };

    let mut config = ConnectorConfig::new(endpoint.clone());
    if let Some(indexer_id) = flag_value(args, "--indexer-id") {
        config.indexer_id = indexer_id;
    }

    info!(endpoint = %endpoint, db = %db_path, indexer_id = %config.indexer_id, "starting jetindex");

    let storage = Arc::new(
        SqliteStorage::open(&db_path)
            .await
            .with_context(|| format!("failed to open database at {db_path}"))?,
    );
    let transport =
        Arc::new(WsTransport::new(&endpoint).with_collections(config.collections.clone()));

    let handle = Connector::new(
        config,
        transport,
        storage.clone(),
        storage,
        IndexerMetrics::global(),
    )
    .spawn()
    .await
    .context("failed to start connector")?;

    let mut state_rx = handle.state_watch();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping gracefully");
                handle.shutdown().await.context("shutdown failed")?;
                info!("stopped");
                return Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    // Connector task gone; surface its result.
                    return handle.join().await.context("connector exited");
                }
                let state = *state_rx.borrow();
                info!(%state, "connector state changed");
                if state == ConnectorState::Failed {
                    error!("connector reported unhealthy; exiting");
                    return handle.join().await.context("connector failed");
                }
            }
        }
    }
}

async fn cmd_status(args: &[String]) -> Result<()> {
    let db_path = flag_value(args, "--db").unwrap_or_else(|| "./jetindex.db".to_string());
    let indexer_id = flag_value(args, "--indexer-id").unwrap_or_else(|| "jetindex".to_string());

    let storage = SqliteStorage::open(&db_path)
        .await
        .with_context(|| format!("failed to open database at {db_path}"))?;

    use jetindex_core::tracker::CursorStore;
    match storage.load(&indexer_id).await? {
        Some(seq) => println!("Cursor ({indexer_id}): {seq}"),
        None => println!("Cursor ({indexer_id}): none (never advanced)"),
    }

    println!("Rows (total):  {}", storage.entity_count().await?);
    println!("Rows (active): {}", storage.active_entity_count().await?);
    for collection in Collection::all() {
        let active = storage.active_entities(collection).await?.len();
        println!("  {:24} {}", collection.nsid(), active);
    }

    Ok(())
}

fn cmd_info() {
    println!("JetIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Collections: scene, event, post, alliance (app.gather.*)");
    println!("  Backpressure: pause at 1000 queued, resume at 100");
    println!("  Reconnect: exponential backoff with jitter, unlimited by default");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Cursor: monotonic microsecond high-water mark per indexer id");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flag_value_finds_pair() {
        let a = args(&["--endpoint", "wss://x.example", "--db", "./x.db"]);
        assert_eq!(flag_value(&a, "--endpoint").as_deref(), Some("wss://x.example"));
        assert_eq!(flag_value(&a, "--db").as_deref(), Some("./x.db"));
        assert_eq!(flag_value(&a, "--indexer-id"), None);
    }

    #[test]
    fn flag_value_missing_trailing_value() {
        let a = args(&["--db"]);
        assert_eq!(flag_value(&a, "--db"), None);
    }

    #[test]
    fn has_flag_detects_switch() {
        let a = args(&["--json-logs", "--db", "./x.db"]);
        assert!(has_flag(&a, "--json-logs"));
        assert!(!has_flag(&a, "--otlp"));
    }
}
