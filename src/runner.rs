//! Per-website scrape execution.
//!
//! One [`SessionRunner::run`] call takes a website end to end:
//! register session → fetch listing → extract candidates → normalize and
//! persist each one → write the terminal log. Progress lands in the
//! [`SessionTracker`] after every step, the cancellation flag is checked
//! between items, and every failure mode is converted into a `failed` log —
//! `run` never propagates an error to its caller, so one website can never
//! take down another's run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::dedup::{normalize, NormalizeOutcome};
use crate::error::StoreError;
use crate::extractor::Extractor;
use crate::fetcher::Fetch;
use crate::models::{LogStatus, NewLog, RuleSet, RunCounts, ScrapeLog, Website};
use crate::session::{Phase, SessionOutcome, SessionTracker};
use crate::store::PostStore;
use crate::utils::truncate_for_log;

/// Runs one website's scrape session end-to-end.
pub struct SessionRunner {
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn PostStore>,
    tracker: Arc<SessionTracker>,
}

enum RunEnd {
    Completed,
    Cancelled,
}

impl SessionRunner {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn PostStore>,
        tracker: Arc<SessionTracker>,
    ) -> Self {
        Self {
            fetcher,
            store,
            tracker,
        }
    }

    /// Execute one scrape run. Infallible to the caller: every failure is
    /// recorded as an error log and a `failed` session.
    #[instrument(level = "info", skip_all, fields(website = %website.name))]
    pub async fn run(&self, website: &Website) -> ScrapeLog {
        let session_id = self.tracker.start(website);
        let cancel = self
            .tracker
            .cancel_flag(session_id)
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

        match self.run_inner(session_id, &cancel, website).await {
            Ok(log) => log,
            Err(e) => {
                // Unanticipated internal fault: isolate to this website.
                let counts = self
                    .tracker
                    .get(session_id)
                    .map(|s| s.counts)
                    .unwrap_or_default();
                error!(error = %e, "run failed with internal fault");
                self.fail(session_id, website, format!("internal fault: {e}"), counts)
                    .await
            }
        }
    }

    async fn run_inner(
        &self,
        session_id: Uuid,
        cancel: &AtomicBool,
        website: &Website,
    ) -> anyhow::Result<ScrapeLog> {
        let run_time = Utc::now();
        let mut counts = RunCounts::default();

        // Stored rules are opaque text until here; malformed rules fail this
        // run only, never the process.
        let extractor = match RuleSet::from_json(&website.rules).and_then(|r| Extractor::compile(&r))
        {
            Ok(extractor) => extractor,
            Err(e) => {
                warn!(error = %e, "rule set rejected");
                return Ok(self
                    .fail(session_id, website, format!("invalid rule set: {e}"), counts)
                    .await);
            }
        };
        let base_url = match Url::parse(&website.base_url) {
            Ok(url) => url,
            Err(e) => {
                return Ok(self
                    .fail(session_id, website, format!("invalid base URL: {e}"), counts)
                    .await);
            }
        };

        self.tracker.update(session_id, Phase::Fetching, counts);
        let markup = match self.fetcher.fetch(&website.base_url).await {
            Ok(markup) => markup,
            Err(e) => {
                // The run's only early-exit path: a failed listing fetch.
                warn!(error = %e, "listing fetch failed");
                return Ok(self
                    .fail(session_id, website, format!("fetch failed: {e}"), counts)
                    .await);
            }
        };

        self.tracker.update(session_id, Phase::Extracting, counts);
        let extraction = extractor.extract(&markup, &base_url, run_time);
        counts.discovered = extraction.discovered;
        counts.rejected = extraction.rejected;
        info!(
            discovered = counts.discovered,
            rejected = counts.rejected,
            "listing extracted"
        );

        self.tracker.update(session_id, Phase::Persisting, counts);
        let mut seen_slugs = HashSet::new();
        let mut end = RunEnd::Completed;
        for candidate in extraction.candidates {
            // Cooperative cancellation checkpoint: nothing persists after
            // the flag is observed; already-committed posts stay.
            if cancel.load(Ordering::Acquire) {
                end = RunEnd::Cancelled;
                break;
            }

            let url = candidate.source_url.clone();
            match normalize(candidate, website, self.store.as_ref(), &mut seen_slugs).await? {
                NormalizeOutcome::NewPost(post) => match self.store.create_post(post).await {
                    Ok(stored) => {
                        debug!(slug = %stored.slug, "post created");
                        counts.created += 1;
                    }
                    Err(StoreError::Conflict) => {
                        // Lost a slug/url race to another writer; a skip,
                        // not a failure.
                        debug!(%url, "persistence conflict; counting as duplicate");
                        counts.skipped += 1;
                    }
                    Err(StoreError::Other(e)) => return Err(e),
                },
                NormalizeOutcome::DuplicateSkipped => counts.skipped += 1,
                NormalizeOutcome::Rejected(reason) => {
                    warn!(%url, reason, "candidate rejected");
                    counts.rejected += 1;
                }
            }
            self.tracker.update(session_id, Phase::Persisting, counts);
        }

        let (outcome, message) = match end {
            RunEnd::Completed => (
                SessionOutcome::Completed,
                format!(
                    "scraped {} new posts ({} discovered, {} duplicates, {} rejected)",
                    counts.created, counts.discovered, counts.skipped, counts.rejected
                ),
            ),
            RunEnd::Cancelled => (
                SessionOutcome::Cancelled,
                format!(
                    "run cancelled after {} created, {} duplicates, {} rejected",
                    counts.created, counts.skipped, counts.rejected
                ),
            ),
        };
        self.tracker.finish(session_id, outcome);
        info!(
            created = counts.created,
            skipped = counts.skipped,
            rejected = counts.rejected,
            "run finished"
        );
        Ok(self
            .write_log(website, LogStatus::Success, message, counts)
            .await)
    }

    /// Transition the session to `failed` and record the error log.
    async fn fail(
        &self,
        session_id: Uuid,
        website: &Website,
        message: String,
        counts: RunCounts,
    ) -> ScrapeLog {
        self.tracker
            .finish(session_id, SessionOutcome::Failed(message.clone()));
        self.write_log(website, LogStatus::Error, message, counts)
            .await
    }

    async fn write_log(
        &self,
        website: &Website,
        status: LogStatus,
        message: String,
        counts: RunCounts,
    ) -> ScrapeLog {
        let log = NewLog {
            website_id: website.id,
            status,
            message,
            counts,
        };
        match self.store.create_log(log.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                // The log collaborator itself failed; surface the outcome to
                // the caller anyway so the cycle can finish its accounting.
                error!(error = %e, message = %truncate_for_log(&log.message, 200), "failed to persist log");
                ScrapeLog {
                    id: 0,
                    website_id: log.website_id,
                    status: log.status,
                    message: log.message,
                    counts: log.counts,
                    created_at: Utc::now(),
                }
            }
        }
    }
}
