//! Rule-driven article extraction from raw markup.
//!
//! An [`Extractor`] is a compiled [`RuleSet`]: the entry selector locates
//! article entries on a listing page, and per-field sub-selectors resolve
//! title, link, date, author, body, images, and category within each entry.
//!
//! Leniency rules:
//! - entries missing a title or a resolvable link are dropped, never fatal
//! - any other missing field degrades to empty
//! - unparseable date text falls back to the run's start time, so
//!   otherwise-valid content is never discarded over a date format

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::RuleSetError;
use crate::models::{ArticleCandidate, RuleSet};
use crate::utils::slugify;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Date formats tried, in order, after the rule set's own `date_format`.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%d %B %Y", "%m/%d/%Y"];

/// Result of applying a rule set to one listing page.
///
/// `discovered` counts every entry the article selector matched;
/// `rejected` counts the entries dropped for missing mandatory fields.
/// `discovered == candidates.len() + rejected` always holds.
#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<ArticleCandidate>,
    pub discovered: u32,
    pub rejected: u32,
}

/// A rule set with its selectors compiled, ready to apply to markup.
pub struct Extractor {
    article: Selector,
    link: Selector,
    title: Selector,
    date: Option<Selector>,
    author: Option<Selector>,
    body: Option<Selector>,
    image: Option<Selector>,
    category: Option<Selector>,
    date_format: Option<String>,
}

impl Extractor {
    /// Compile every selector in the rule set.
    pub fn compile(rules: &RuleSet) -> Result<Self, RuleSetError> {
        Ok(Self {
            article: compile_one("article", &rules.article)?,
            link: compile_one("link", &rules.link)?,
            title: compile_one("title", &rules.title)?,
            date: compile_opt("date", rules.date.as_deref())?,
            author: compile_opt("author", rules.author.as_deref())?,
            body: compile_opt("body", rules.body.as_deref())?,
            image: compile_opt("image", rules.image.as_deref())?,
            category: compile_opt("category", rules.category.as_deref())?,
            date_format: rules.date_format.clone(),
        })
    }

    /// Apply the compiled rules to a listing page, producing one candidate
    /// per usable entry. Finite, single pass over the document.
    pub fn extract(&self, markup: &str, base_url: &Url, run_time: DateTime<Utc>) -> Extraction {
        let document = Html::parse_document(markup);
        let mut out = Extraction::default();

        for entry in document.select(&self.article) {
            out.discovered += 1;

            let Some(source_url) = self.resolve_link(entry, base_url) else {
                warn!("entry has no resolvable link; rejecting");
                out.rejected += 1;
                continue;
            };
            let title = self.field_text(entry, Some(&self.title));
            if title.is_empty() {
                warn!(url = %source_url, "entry has no title; rejecting");
                out.rejected += 1;
                continue;
            }

            let published_at = self
                .date_text(entry)
                .map(|text| parse_date(&text, self.date_format.as_deref(), run_time))
                .unwrap_or(run_time);

            let slug = slugify(&title);
            out.candidates.push(ArticleCandidate {
                title,
                source_url,
                published_at,
                author: self.field_text(entry, self.author.as_ref()),
                category: self.field_text(entry, self.category.as_ref()),
                body: self.field_text(entry, self.body.as_ref()),
                image_urls: self.resolve_images(entry, base_url),
                slug,
            });
        }

        debug!(
            discovered = out.discovered,
            rejected = out.rejected,
            "extracted candidates"
        );
        out
    }

    /// Locate the entry's link and resolve it against the base URL.
    /// Falls back to the entry element itself when it carries the href.
    fn resolve_link(&self, entry: ElementRef<'_>, base_url: &Url) -> Option<String> {
        let href = entry
            .select(&self.link)
            .find_map(|el| el.value().attr("href"))
            .or_else(|| entry.value().attr("href"))?;
        base_url.join(href).ok().map(|u| u.to_string())
    }

    fn resolve_images(&self, entry: ElementRef<'_>, base_url: &Url) -> Vec<String> {
        let Some(selector) = &self.image else {
            return Vec::new();
        };
        entry
            .select(selector)
            .filter_map(|el| el.value().attr("src"))
            .filter_map(|src| base_url.join(src).ok())
            .map(|u| u.to_string())
            .collect()
    }

    /// Text of the first match for `selector` inside the entry, with
    /// whitespace collapsed. Empty when the selector is absent or matches
    /// nothing.
    fn field_text(&self, entry: ElementRef<'_>, selector: Option<&Selector>) -> String {
        let Some(selector) = selector else {
            return String::new();
        };
        entry
            .select(selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default()
    }

    /// Date text for the entry: a `datetime` attribute when present (the
    /// `<time>` convention), otherwise the element's text.
    fn date_text(&self, entry: ElementRef<'_>) -> Option<String> {
        let selector = self.date.as_ref()?;
        let el = entry.select(selector).next()?;
        if let Some(dt) = el.value().attr("datetime") {
            return Some(dt.trim().to_string());
        }
        let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
        (!text.is_empty()).then_some(text)
    }
}

fn compile_one(field: &'static str, selector: &str) -> Result<Selector, RuleSetError> {
    Selector::parse(selector).map_err(|_| RuleSetError::InvalidSelector {
        field,
        selector: selector.to_string(),
    })
}

fn compile_opt(
    field: &'static str,
    selector: Option<&str>,
) -> Result<Option<Selector>, RuleSetError> {
    selector.map(|s| compile_one(field, s)).transpose()
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

/// Best-effort date parsing: the site's own format first, then RFC 3339,
/// RFC 2822, and a ladder of common formats. Unparseable text yields
/// `fallback` (the run's start time).
fn parse_date(text: &str, site_format: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(fmt) = site_format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return dt.and_utc();
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return dt.and_utc();
            }
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return dt.with_timezone(&Utc);
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return dt.and_utc();
            }
        }
    }
    debug!(%text, "unparseable date text; falling back to run time");
    fallback
}
