//! Typed errors for the scrape engine.
//!
//! Every failure that can cross a component boundary is a value here, not a
//! panic. Fetch failures and malformed rule sets are downgraded to a failed
//! Log for the affected website; a storage conflict is downgraded to a
//! duplicate-skip.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured timeout on the error
            FetchError::Timeout(Duration::ZERO)
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Errors produced when parsing a stored extraction rule set.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("rule set is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid selector for field `{field}`: {selector}")]
    InvalidSelector { field: &'static str, selector: String },
}

/// Errors surfaced by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer committed the same slug or source URL first.
    /// The runner treats this as a duplicate-skip, never a run failure.
    #[error("slug or source URL already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
