//! Candidate normalization and duplicate detection.
//!
//! Precedence, per candidate:
//! 1. exact source-URL match against stored posts → skip
//! 2. exact slug match against stored posts → skip when the content is the
//!    same; when the content differs, the slug gets a numeric suffix and the
//!    candidate is persisted as a new post
//! 3. within the same run, repeated candidates resolving to the same slug →
//!    keep only the first
//!
//! These checks are best-effort: the persistence layer also enforces the
//! uniqueness invariant, and the runner degrades a lost race
//! ([`crate::error::StoreError::Conflict`]) to a skip.

use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::models::{ArticleCandidate, NewPost, Website};
use crate::store::PostStore;

/// Upper bound on slug-collision probing. A run that somehow accumulates
/// this many same-slug variants skips the candidate instead of looping.
const MAX_SLUG_PROBES: u32 = 50;

/// Result of normalizing one candidate.
#[derive(Debug)]
pub enum NormalizeOutcome {
    /// Candidate is new; persist this post.
    NewPost(NewPost),
    /// Candidate matches an already-stored post or an earlier candidate in
    /// the same run. Counted, not an error.
    DuplicateSkipped,
    /// Candidate is missing mandatory fields. Counted, never fatal.
    Rejected(&'static str),
}

/// Canonicalize a candidate against stored posts and this run's own output.
///
/// `seen_slugs` carries the slugs already claimed earlier in the same run
/// (including suffixed variants); the caller owns it for the run's duration.
pub async fn normalize(
    candidate: ArticleCandidate,
    website: &Website,
    store: &dyn PostStore,
    seen_slugs: &mut HashSet<String>,
) -> Result<NormalizeOutcome> {
    if candidate.title.is_empty() || candidate.source_url.is_empty() {
        return Ok(NormalizeOutcome::Rejected("missing title or link"));
    }
    if candidate.slug.is_empty() {
        return Ok(NormalizeOutcome::Rejected("title yields empty slug"));
    }

    if seen_slugs.contains(&candidate.slug) {
        debug!(slug = %candidate.slug, "duplicate within run; keeping first");
        return Ok(NormalizeOutcome::DuplicateSkipped);
    }

    let mut slug = candidate.slug.clone();
    if let Some(existing) = store
        .find_post_by_slug_or_url(&slug, &candidate.source_url)
        .await?
    {
        if existing.source_url == candidate.source_url {
            debug!(url = %candidate.source_url, "already stored; skipping");
            seen_slugs.insert(slug);
            return Ok(NormalizeOutcome::DuplicateSkipped);
        }
        // Same slug, different article. Same content means a true duplicate;
        // different content gets a suffixed slug.
        if existing.title == candidate.title && existing.body == candidate.body {
            debug!(%slug, "stored slug with identical content; skipping");
            seen_slugs.insert(slug);
            return Ok(NormalizeOutcome::DuplicateSkipped);
        }
        match next_free_slug(&slug, store, seen_slugs).await? {
            Some(free) => slug = free,
            None => return Ok(NormalizeOutcome::DuplicateSkipped),
        }
    }

    seen_slugs.insert(slug.clone());
    let mut post = NewPost::from_candidate(candidate, website.id);
    post.slug = slug;
    Ok(NormalizeOutcome::NewPost(post))
}

/// Find the first `base-N` slug not taken by a stored post or by this run.
async fn next_free_slug(
    base: &str,
    store: &dyn PostStore,
    seen_slugs: &HashSet<String>,
) -> Result<Option<String>> {
    for n in 2..=MAX_SLUG_PROBES {
        let probe = format!("{base}-{n}");
        if seen_slugs.contains(&probe) {
            continue;
        }
        if store.find_post_by_slug_or_url(&probe, "").await?.is_none() {
            return Ok(Some(probe));
        }
    }
    Ok(None)
}
