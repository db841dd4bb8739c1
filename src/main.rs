//! Daemon entry point: loads the website roster, wires the engine together,
//! and runs the scheduler until interrupted.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

use newsloom::cli::Cli;
use newsloom::fetcher::{FetchConfig, HttpFetcher};
use newsloom::models::{RuleSet, Website};
use newsloom::runner::SessionRunner;
use newsloom::scheduler::AutoScheduler;
use newsloom::session::SessionTracker;
use newsloom::store::MemoryStore;

/// One roster entry: the rules are written structured in YAML and stored as
/// serialized text on the [`Website`], exactly as the admin collaborator
/// would hand them over.
#[derive(Debug, Deserialize)]
struct RosterEntry {
    name: String,
    base_url: String,
    rules: RuleSet,
}

#[derive(Debug, Deserialize)]
struct Roster {
    websites: Vec<RosterEntry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    info!(config = %args.config, interval_secs = args.interval_secs, "newsloom starting up");

    let roster_text = tokio::fs::read_to_string(&args.config).await.map_err(|e| {
        error!(path = %args.config, error = %e, "could not read website roster");
        e
    })?;
    let roster: Roster = serde_yaml::from_str(&roster_text)?;

    let store = Arc::new(MemoryStore::new());
    for (i, entry) in roster.websites.into_iter().enumerate() {
        store.add_website(Website {
            id: i as u64 + 1,
            name: entry.name,
            base_url: entry.base_url,
            rules: entry.rules.to_json(),
            created_at: Utc::now(),
        });
    }

    let fetcher = Arc::new(HttpFetcher::new(FetchConfig {
        timeout: Duration::from_secs(args.fetch_timeout_secs),
        ..FetchConfig::default()
    })?);
    let tracker = Arc::new(SessionTracker::default());
    let runner = Arc::new(SessionRunner::new(
        fetcher,
        store.clone(),
        Arc::clone(&tracker),
    ));
    let scheduler = AutoScheduler::new(
        store.clone(),
        store.clone(),
        tracker,
        runner,
        Duration::from_secs(args.interval_secs),
    );

    if args.once {
        scheduler.run_cycle_now().await;
        info!(posts = store.posts().len(), logs = store.logs().len(), "single cycle complete");
        return Ok(());
    }

    scheduler.initialize().await;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    info!(posts = store.posts().len(), logs = store.logs().len(), "newsloom stopped");

    Ok(())
}
