//! Command-line interface definitions for the newsloom daemon.
//!
//! All options can be provided via command-line flags or environment
//! variables.

use clap::Parser;

/// Command-line arguments for the scrape orchestration daemon.
///
/// # Examples
///
/// ```sh
/// # Hourly scheduled scraping against a website roster
/// newsloom -c websites.yaml
///
/// # Single cycle, then exit
/// newsloom -c websites.yaml --once
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the website roster (YAML)
    #[arg(short, long, default_value = "websites.yaml")]
    pub config: String,

    /// Seconds between scheduler cycles
    #[arg(long, env = "NEWSLOOM_INTERVAL_SECS", default_value_t = 3600)]
    pub interval_secs: u64,

    /// Per-request fetch timeout in seconds
    #[arg(long, env = "NEWSLOOM_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    /// Run exactly one cycle and exit instead of arming the timer
    #[arg(long)]
    pub once: bool,
}
