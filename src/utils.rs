//! Utility functions for slug derivation and log-friendly string handling.

/// Maximum length of a derived slug, in bytes. Long titles are cut at the
/// nearest hyphen boundary at or below this limit.
pub const MAX_SLUG_LEN: usize = 80;

/// Convert a title to a URL-friendly slug.
///
/// Lowercases the text, removes everything that is not alphanumeric, a
/// space, or a hyphen, joins words with single hyphens, and truncates to
/// [`MAX_SLUG_LEN`].
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("Trump-Xi 'situationship'"), "trump-xi-situationship");
/// ```
pub fn slugify(title: &str) -> String {
    let cleaned = title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "");
    let mut slug = cleaned
        .split([' ', '-'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > MAX_SLUG_LEN {
        let mut limit = MAX_SLUG_LEN;
        while !slug.is_char_boundary(limit) {
            limit -= 1;
        }
        let cut = slug[..limit].rfind('-').unwrap_or(limit);
        slug.truncate(cut);
    }
    slug
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes with an ellipsis and byte
/// count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}
