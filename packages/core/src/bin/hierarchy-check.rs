//! Hierarchy Integrity Check
//!
//! Opens a Synergia database, recomputes the closure table and materialized
//! paths from parent pointers, and prints the differences as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Database from SYNERGIA_DB_PATH (default ./data/synergia.db)
//! cargo run --bin hierarchy-check
//!
//! # Explicit database file
//! cargo run --bin hierarchy-check -- /var/lib/synergia/synergia.db
//! ```
//!
//! Exits with status 1 when the hierarchy is inconsistent, so the check can
//! gate backups and migrations. Logs go to stderr (`RUST_LOG` controls the
//! level), the report to stdout.

use synergia_core::{HierarchyConfig, HierarchyEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = HierarchyConfig::from_env();
    if let Some(path) = std::env::args().nth(1) {
        config.db_path = path.into();
    }

    if !config.db_path.exists() {
        anyhow::bail!("Database not found: {}", config.db_path.display());
    }

    let engine = HierarchyEngine::open(config).await?;
    let report = engine.verify_integrity().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        tracing::error!("Hierarchy is inconsistent: {} issues", report.issue_count());
        std::process::exit(1);
    }

    tracing::info!(
        "Hierarchy is consistent ({} nodes, {} closure edges)",
        report.node_count,
        report.edge_count
    );
    Ok(())
}
