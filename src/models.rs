//! Data models for websites, extraction rules, and scraped articles.
//!
//! This module defines the core data structures used throughout the engine:
//! - [`Website`]: configuration for one scrape target
//! - [`RuleSet`]: declarative per-site selectors, stored as opaque JSON text
//! - [`ArticleCandidate`]: transient extraction result for one discovered item
//! - [`Post`]: the stored, deduplicated article
//! - [`ScrapeLog`]: durable, append-only record of one run's outcome
//! - [`RunCounts`]: discovered/created/skipped/rejected tallies for a run

use chrono::{DateTime, Utc};
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::RuleSetError;

/// Configuration for one scrape target.
///
/// Created and edited by the administrative collaborator; read-only to the
/// engine. `rules` holds a serialized [`RuleSet`] and must round-trip
/// through text storage without loss.
///
/// `name` is a soft-unique key: the directory collaborator reconciles
/// accidental duplicates at read time (see `store::reconcile_websites`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    pub id: u64,
    pub name: String,
    pub base_url: String,
    /// Serialized [`RuleSet`] (JSON text), parsed at use time.
    pub rules: String,
    pub created_at: DateTime<Utc>,
}

/// Declarative selectors mapping markup locations to article fields.
///
/// `article` locates each entry on the listing page; the remaining selectors
/// are resolved *within* an entry. `link` and `title` are mandatory at
/// extraction time; the rest degrade to empty when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    /// Selector locating each article entry on the listing page.
    pub article: String,
    /// Selector for the entry's link (an `<a href>` or the entry itself).
    pub link: String,
    /// Selector for the entry's title text.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Optional chrono format string tried first when parsing date text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
}

impl RuleSet {
    /// Parse a rule set from its stored JSON text and validate every selector.
    ///
    /// Malformed rules fail the *run* that uses them, never the process.
    pub fn from_json(text: &str) -> Result<Self, RuleSetError> {
        let rules: RuleSet = serde_json::from_str(text)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Serialize back to the stored text form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), RuleSetError> {
        Self::check("article", &self.article)?;
        Self::check("link", &self.link)?;
        Self::check("title", &self.title)?;
        for (field, sel) in [
            ("date", &self.date),
            ("author", &self.author),
            ("body", &self.body),
            ("image", &self.image),
            ("category", &self.category),
        ] {
            if let Some(sel) = sel {
                Self::check(field, sel)?;
            }
        }
        Ok(())
    }

    fn check(field: &'static str, selector: &str) -> Result<(), RuleSetError> {
        Selector::parse(selector).map_err(|_| RuleSetError::InvalidSelector {
            field,
            selector: selector.to_string(),
        })?;
        Ok(())
    }
}

/// The extractor's output for one discovered item.
///
/// Transient: exists only within a run until normalized and persisted, or
/// discarded as a duplicate.
#[derive(Debug, Clone)]
pub struct ArticleCandidate {
    pub title: String,
    pub source_url: String,
    /// Best-effort parsed; falls back to the run's start time when the
    /// site's date text is unparseable.
    pub published_at: DateTime<Utc>,
    pub author: String,
    pub category: String,
    pub body: String,
    pub image_urls: Vec<String>,
    /// Derived from the title; see `utils::slugify`.
    pub slug: String,
}

/// The stored, deduplicated article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub website_id: u64,
    pub title: String,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub author: String,
    pub category: String,
    pub body: String,
    pub image_urls: Vec<String>,
    /// Unique across all posts.
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new post as handed to the persistence collaborator.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub website_id: u64,
    pub title: String,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
    pub author: String,
    pub category: String,
    pub body: String,
    pub image_urls: Vec<String>,
    pub slug: String,
}

impl NewPost {
    pub fn from_candidate(candidate: ArticleCandidate, website_id: u64) -> Self {
        Self {
            website_id,
            title: candidate.title,
            source_url: candidate.source_url,
            published_at: candidate.published_at,
            author: candidate.author,
            category: candidate.category,
            body: candidate.body,
            image_urls: candidate.image_urls,
            slug: candidate.slug,
        }
    }
}

/// Outcome status of one per-website scrape attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

/// Running tallies for one scrape session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Candidates discovered on the listing page.
    pub discovered: u32,
    /// Posts newly persisted this run.
    pub created: u32,
    /// Candidates skipped as duplicates (stored or same-run).
    pub skipped: u32,
    /// Candidates rejected for missing mandatory fields.
    pub rejected: u32,
}

/// One durable record per completed or failed scrape attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeLog {
    pub id: u64,
    pub website_id: u64,
    pub status: LogStatus,
    pub message: String,
    pub counts: RunCounts,
    pub created_at: DateTime<Utc>,
}

/// A new log record as handed to the persistence collaborator.
#[derive(Debug, Clone)]
pub struct NewLog {
    pub website_id: u64,
    pub status: LogStatus,
    pub message: String,
    pub counts: RunCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules() -> RuleSet {
        RuleSet {
            article: ".card".to_string(),
            link: "a[href]".to_string(),
            title: "h2".to_string(),
            date: Some("time".to_string()),
            author: None,
            body: Some("p.summary".to_string()),
            image: Some("img".to_string()),
            category: None,
            date_format: Some("%Y-%m-%d".to_string()),
        }
    }

    #[test]
    fn test_rule_set_round_trips_through_text() {
        let rules = sample_rules();
        let text = rules.to_json();
        let parsed = RuleSet::from_json(&text).unwrap();
        assert_eq!(parsed, rules);
    }

    #[test]
    fn test_rule_set_rejects_invalid_json() {
        assert!(matches!(
            RuleSet::from_json("{not json"),
            Err(RuleSetError::Malformed(_))
        ));
    }

    #[test]
    fn test_rule_set_rejects_invalid_selector() {
        let mut rules = sample_rules();
        rules.title = ":::nonsense???".to_string();
        let text = serde_json::to_string(&rules).unwrap();
        match RuleSet::from_json(&text) {
            Err(RuleSetError::InvalidSelector { field, .. }) => assert_eq!(field, "title"),
            other => panic!("expected InvalidSelector, got {other:?}"),
        }
    }

    #[test]
    fn test_optional_fields_default_to_none() {
        let text = r#"{"article":".item","link":"a","title":"h1"}"#;
        let rules = RuleSet::from_json(text).unwrap();
        assert!(rules.date.is_none());
        assert!(rules.body.is_none());
        assert!(rules.date_format.is_none());
    }

    #[test]
    fn test_website_serialization() {
        let site = Website {
            id: 1,
            name: "Example Daily".to_string(),
            base_url: "https://example.com".to_string(),
            rules: sample_rules().to_json(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&site).unwrap();
        let back: Website = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "Example Daily");
        // The embedded rule text survives the outer round trip intact.
        assert_eq!(RuleSet::from_json(&back.rules).unwrap(), sample_rules());
    }

    #[test]
    fn test_run_counts_default_is_zero() {
        let counts = RunCounts::default();
        assert_eq!(counts.discovered, 0);
        assert_eq!(counts.created, 0);
        assert_eq!(counts.skipped, 0);
        assert_eq!(counts.rejected, 0);
    }
}
