//! Collaborator traits for the website directory and the persistence layer,
//! plus an in-memory implementation used by tests and the standalone binary.
//!
//! The engine never touches storage beyond these operations. The real
//! storage collaborator is expected to serialize conflicting writes at its
//! own layer: `create_post` must enforce slug/source-URL uniqueness and
//! report a race as [`StoreError::Conflict`], which the runner degrades to a
//! duplicate-skip.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tracing::warn;

use crate::error::StoreError;
use crate::models::{NewLog, NewPost, Post, ScrapeLog, Website};

/// Source of the configured website list, consumed once per scheduler cycle.
#[async_trait]
pub trait WebsiteDirectory: Send + Sync {
    async fn list_websites(&self) -> Result<Vec<Website>>;
}

/// Persistence operations for posts and run logs.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Look up a stored post by exact slug or exact source URL.
    async fn find_post_by_slug_or_url(&self, slug: &str, source_url: &str)
        -> Result<Option<Post>>;

    /// Persist a new post. Must enforce the slug/source-URL uniqueness
    /// invariant even when the deduplicator's checks raced another writer.
    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError>;

    /// Append one run-outcome record. Logs are never mutated afterwards.
    async fn create_log(&self, log: NewLog) -> Result<ScrapeLog>;
}

/// Resolve accidental duplicate website configurations at read time:
/// among entries sharing a name, keep the one with the most associated
/// posts, tie-broken by earliest creation. Returned in id order.
///
/// This is a read-time workaround, not a write-time constraint; creation
/// of duplicates is the admin collaborator's gap (see DESIGN.md).
pub fn reconcile_websites(
    websites: Vec<Website>,
    post_counts: &HashMap<u64, usize>,
) -> Vec<Website> {
    let total = websites.len();
    let mut kept: Vec<Website> = websites
        .into_iter()
        .into_group_map_by(|w| w.name.clone())
        .into_values()
        .filter_map(|group| {
            group.into_iter().min_by(|a, b| {
                let posts_a = post_counts.get(&a.id).copied().unwrap_or(0);
                let posts_b = post_counts.get(&b.id).copied().unwrap_or(0);
                posts_b
                    .cmp(&posts_a)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
        })
        .collect();
    kept.sort_by_key(|w| w.id);
    if kept.len() < total {
        warn!(
            dropped = total - kept.len(),
            "duplicate website configurations reconciled at read time"
        );
    }
    kept
}

#[derive(Default)]
struct MemoryInner {
    websites: Vec<Website>,
    posts: Vec<Post>,
    logs: Vec<ScrapeLog>,
    next_post_id: u64,
    next_log_id: u64,
}

/// In-memory store implementing both collaborator traits.
///
/// Lock discipline: one mutex over all tables, never held across an await.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_website(&self, website: Website) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.websites.push(website);
    }

    pub fn posts(&self) -> Vec<Post> {
        self.inner.lock().expect("store lock poisoned").posts.clone()
    }

    pub fn logs(&self) -> Vec<ScrapeLog> {
        self.inner.lock().expect("store lock poisoned").logs.clone()
    }
}

#[async_trait]
impl WebsiteDirectory for MemoryStore {
    async fn list_websites(&self) -> Result<Vec<Website>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let counts = inner.posts.iter().counts_by(|p| p.website_id);
        Ok(reconcile_websites(inner.websites.clone(), &counts))
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn find_post_by_slug_or_url(
        &self,
        slug: &str,
        source_url: &str,
    ) -> Result<Option<Post>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .posts
            .iter()
            .find(|p| p.slug == slug || (!source_url.is_empty() && p.source_url == source_url))
            .cloned())
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner
            .posts
            .iter()
            .any(|p| p.slug == post.slug || p.source_url == post.source_url)
        {
            return Err(StoreError::Conflict);
        }
        inner.next_post_id += 1;
        let now = Utc::now();
        let stored = Post {
            id: inner.next_post_id,
            website_id: post.website_id,
            title: post.title,
            source_url: post.source_url,
            published_at: post.published_at,
            author: post.author,
            category: post.category,
            body: post.body,
            image_urls: post.image_urls,
            slug: post.slug,
            created_at: now,
            updated_at: now,
        };
        inner.posts.push(stored.clone());
        Ok(stored)
    }

    async fn create_log(&self, log: NewLog) -> Result<ScrapeLog> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_log_id += 1;
        let stored = ScrapeLog {
            id: inner.next_log_id,
            website_id: log.website_id,
            status: log.status,
            message: log.message,
            counts: log.counts,
            created_at: Utc::now(),
        };
        inner.logs.push(stored.clone());
        Ok(stored)
    }
}
