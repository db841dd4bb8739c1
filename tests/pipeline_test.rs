//! End-to-end tests for the scrape pipeline: runner, tracker, deduplication,
//! and scheduler, driven against in-memory collaborators and stub fetchers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use newsloom::error::{FetchError, StoreError};
use newsloom::fetcher::Fetch;
use newsloom::models::{LogStatus, NewLog, NewPost, Post, RuleSet, ScrapeLog, Website};
use newsloom::runner::SessionRunner;
use newsloom::scheduler::AutoScheduler;
use newsloom::session::{Phase, SessionTracker};
use newsloom::store::{MemoryStore, PostStore, WebsiteDirectory};

// ---------------------------------------------------------------------------
// Stub fetchers
// ---------------------------------------------------------------------------

/// Serves canned pages by URL; unknown URLs time out.
struct StubFetcher {
    pages: HashMap<String, String>,
}

impl StubFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Fetch for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or(FetchError::Timeout(Duration::from_secs(30)))
    }
}

/// Blocks every fetch until permits are released; used to hold a cycle open.
struct GatedFetcher {
    gate: Arc<tokio::sync::Semaphore>,
    page: String,
}

#[async_trait]
impl Fetch for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        permit.forget();
        Ok(self.page.clone())
    }
}

// ---------------------------------------------------------------------------
// Instrumented store: cancels the running session after K created posts
// ---------------------------------------------------------------------------

struct CancelAfter {
    inner: Arc<MemoryStore>,
    tracker: Arc<SessionTracker>,
    after: u32,
    created: AtomicU32,
    cancelled_session: Mutex<Option<Uuid>>,
}

#[async_trait]
impl PostStore for CancelAfter {
    async fn find_post_by_slug_or_url(
        &self,
        slug: &str,
        source_url: &str,
    ) -> anyhow::Result<Option<Post>> {
        self.inner.find_post_by_slug_or_url(slug, source_url).await
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let stored = self.inner.create_post(post).await?;
        if self.created.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            for session in self.tracker.active() {
                self.tracker.cancel(session.id);
                *self.cancelled_session.lock().unwrap() = Some(session.id);
            }
        }
        Ok(stored)
    }

    async fn create_log(&self, log: NewLog) -> anyhow::Result<ScrapeLog> {
        self.inner.create_log(log).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_rules() -> RuleSet {
    RuleSet {
        article: ".story".to_string(),
        link: "a[href]".to_string(),
        title: "h2".to_string(),
        date: None,
        author: None,
        body: None,
        image: None,
        category: None,
        date_format: None,
    }
}

fn website(id: u64, name: &str, base_url: &str) -> Website {
    Website {
        id,
        name: name.to_string(),
        base_url: base_url.to_string(),
        rules: default_rules().to_json(),
        created_at: Utc::now(),
    }
}

fn story(title: &str, href: &str) -> String {
    format!(r#"<div class="story"><h2>{title}</h2><a href="{href}">read</a></div>"#)
}

fn listing(stories: &[String]) -> String {
    format!("<html><body>{}</body></html>", stories.join("\n"))
}

fn engine(
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn PostStore>,
) -> (Arc<SessionTracker>, SessionRunner) {
    let tracker = Arc::new(SessionTracker::default());
    let runner = SessionRunner::new(fetcher, store, Arc::clone(&tracker));
    (tracker, runner)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn completed_run_persists_exactly_the_new_candidates() {
    // 5 list items: 1 missing a title (rejected), 1 already stored by source
    // URL (duplicate), 3 new.
    let page = listing(&[
        story("Alpha Story", "/alpha"),
        story("", "/untitled"),
        story("Existing Story", "/existing"),
        story("Beta Story", "/beta"),
        story("Gamma Story", "/gamma"),
    ]);
    let store = Arc::new(MemoryStore::new());
    store
        .create_post(NewPost {
            website_id: 1,
            title: "Existing Story".to_string(),
            source_url: "https://site-a.test/existing".to_string(),
            published_at: Utc::now(),
            author: String::new(),
            category: String::new(),
            body: String::new(),
            image_urls: vec![],
            slug: "existing-story".to_string(),
        })
        .await
        .unwrap();

    let fetcher = Arc::new(StubFetcher::new(&[("https://site-a.test", page.as_str())]));
    let (_tracker, runner) = engine(fetcher, store.clone());

    let log = runner.run(&website(1, "Site A", "https://site-a.test")).await;

    assert_eq!(log.status, LogStatus::Success);
    assert_eq!(log.counts.discovered, 5);
    assert_eq!(log.counts.created, 3);
    assert_eq!(log.counts.skipped, 1);
    assert_eq!(log.counts.rejected, 1);
    // 1 seeded + 3 new.
    assert_eq!(store.posts().len(), 4);
    assert_eq!(store.logs().len(), 1);
}

#[tokio::test]
async fn rerunning_identical_content_is_idempotent() {
    let page = listing(&[
        story("Alpha Story", "/alpha"),
        story("Beta Story", "/beta"),
    ]);
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StubFetcher::new(&[("https://site-a.test", page.as_str())]));
    let (_tracker, runner) = engine(fetcher, store.clone());
    let site = website(1, "Site A", "https://site-a.test");

    let first = runner.run(&site).await;
    assert_eq!(first.counts.created, 2);
    assert_eq!(store.posts().len(), 2);

    let second = runner.run(&site).await;
    assert_eq!(second.status, LogStatus::Success);
    assert_eq!(second.counts.created, 0);
    assert_eq!(second.counts.skipped, 2);
    // Post count never increases after the first run.
    assert_eq!(store.posts().len(), 2);
}

#[tokio::test]
async fn cancellation_keeps_committed_posts_and_stops_the_rest() {
    let stories: Vec<String> = (1..=6)
        .map(|i| story(&format!("Story {i}"), &format!("/s{i}")))
        .collect();
    let page = listing(&stories);

    let memory = Arc::new(MemoryStore::new());
    let tracker = Arc::new(SessionTracker::default());
    let store = Arc::new(CancelAfter {
        inner: memory.clone(),
        tracker: Arc::clone(&tracker),
        after: 2,
        created: AtomicU32::new(0),
        cancelled_session: Mutex::new(None),
    });
    let fetcher = Arc::new(StubFetcher::new(&[("https://site-a.test", page.as_str())]));
    let runner = SessionRunner::new(fetcher, store.clone(), Arc::clone(&tracker));

    let log = runner.run(&website(1, "Site A", "https://site-a.test")).await;

    // Exactly the 2 posts committed before cancellation remain.
    assert_eq!(memory.posts().len(), 2);
    assert_eq!(log.counts.created, 2);
    assert_eq!(log.counts.discovered, 6);
    assert!(log.message.contains("cancelled"));

    // The session reached the cancelled terminal phase with partial counts.
    let id = store.cancelled_session.lock().unwrap().expect("cancelled");
    let snapshot = tracker.get(id).expect("still within retention window");
    assert_eq!(snapshot.phase, Phase::Cancelled);
    assert_eq!(snapshot.counts.created, 2);
}

#[tokio::test]
async fn one_site_timing_out_does_not_affect_another() {
    let page_b = listing(&[story("B One", "/b1"), story("B Two", "/b2")]);
    // Site A's URL is absent from the stub, so its fetch times out.
    let fetcher = Arc::new(StubFetcher::new(&[("https://site-b.test", page_b.as_str())]));

    let store = Arc::new(MemoryStore::new());
    store.add_website(website(1, "Site A", "https://site-a.test"));
    store.add_website(website(2, "Site B", "https://site-b.test"));

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
        Duration::from_secs(3600),
    );

    assert!(scheduler.run_cycle_now().await);

    let logs = store.logs();
    assert_eq!(logs.len(), 2);
    let log_a = logs.iter().find(|l| l.website_id == 1).unwrap();
    let log_b = logs.iter().find(|l| l.website_id == 2).unwrap();

    assert_eq!(log_a.status, LogStatus::Error);
    assert!(log_a.message.contains("fetch failed"));
    assert_eq!(log_b.status, LogStatus::Success);
    assert_eq!(log_b.counts.created, 2);
    assert_eq!(store.posts().len(), 2);
}

#[tokio::test]
async fn initialize_twice_arms_exactly_one_timer() {
    /// Counts how often the scheduler asks for the roster.
    struct CountingDirectory {
        calls: AtomicU32,
    }

    #[async_trait]
    impl WebsiteDirectory for CountingDirectory {
        async fn list_websites(&self) -> anyhow::Result<Vec<Website>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    let directory = Arc::new(CountingDirectory {
        calls: AtomicU32::new(0),
    });
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(SessionTracker::default());
    let fetcher = Arc::new(StubFetcher::new(&[]));
    let runner = Arc::new(SessionRunner::new(
        fetcher,
        store.clone(),
        Arc::clone(&tracker),
    ));
    let scheduler = AutoScheduler::new(
        directory.clone(),
        store,
        tracker,
        runner,
        Duration::from_secs(3600),
    );

    scheduler.initialize().await;
    scheduler.initialize().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // One immediate cycle from the first initialize; the second was a no-op
    // and the hourly timer has not ticked.
    assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn overlapping_cycle_tick_is_skipped_not_deferred() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let fetcher = Arc::new(GatedFetcher {
        gate: Arc::clone(&gate),
        page: listing(&[story("Slow Story", "/slow")]),
    });

    let store = Arc::new(MemoryStore::new());
    store.add_website(website(1, "Slow Site", "https://slow.test"));

    let tracker = Arc::new(SessionTracker::default());
    let runner = Arc::new(SessionRunner::new(
        fetcher,
        store.clone(),
        Arc::clone(&tracker),
    ));
    let scheduler = Arc::new(AutoScheduler::new(
        store.clone(),
        store.clone(),
        Arc::clone(&tracker),
        runner,
        Duration::from_secs(3600),
    ));

    // First cycle blocks inside the fetch.
    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_cycle_now().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tracker.active().len(), 1);

    // A tick while the cycle is active is skipped: zero new sessions.
    assert!(!scheduler.run_cycle_now().await);
    assert_eq!(tracker.active().len(), 1);

    gate.add_permits(1);
    assert!(first.await.unwrap());

    // Only the first cycle ever ran.
    assert_eq!(store.logs().len(), 1);
    assert_eq!(store.posts().len(), 1);
}

#[tokio::test]
async fn malformed_rule_set_fails_the_run_not_the_process() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StubFetcher::new(&[]));
    let (_tracker, runner) = engine(fetcher, store.clone());

    let mut site = website(1, "Broken Site", "https://broken.test");
    site.rules = "{not valid json".to_string();

    let log = runner.run(&site).await;
    assert_eq!(log.status, LogStatus::Error);
    assert!(log.message.contains("invalid rule set"));
    assert!(store.posts().is_empty());
}
