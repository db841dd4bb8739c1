//! # newsloom
//!
//! Scrape orchestration engine for an automated content-ingestion pipeline:
//! a process-wide scheduler periodically visits a configured set of
//! websites, extracts article content with per-site extraction rules,
//! deduplicates and stores normalized articles, and records the outcome of
//! every run.
//!
//! ## Architecture
//!
//! One scheduler cycle fans out one scrape session per website:
//!
//! 1. **Fetch**: download the site's listing page (bounded timeout)
//! 2. **Extract**: apply the site's declarative rule set to the markup
//! 3. **Normalize**: derive slugs, drop duplicates against stored posts and
//!    within the run
//! 4. **Persist**: store new posts and one append-only log per run
//!
//! Every step updates the shared [`session::SessionTracker`], which also
//! carries the cooperative cancellation flag polled between items. Failures
//! are isolated per website: a fetch timeout or malformed rule set produces
//! a failed log for that site and nothing else.

pub mod cli;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod utils;

pub use error::{FetchError, RuleSetError, StoreError};
pub use extractor::{Extraction, Extractor};
pub use fetcher::{Fetch, FetchConfig, HttpFetcher};
pub use models::{
    ArticleCandidate, LogStatus, NewLog, NewPost, Post, RuleSet, RunCounts, ScrapeLog, Website,
};
pub use runner::SessionRunner;
pub use scheduler::AutoScheduler;
pub use session::{Phase, SessionOutcome, SessionSnapshot, SessionTracker};
pub use store::{MemoryStore, PostStore, WebsiteDirectory};
