use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};

/// One crawled classified ad.
///
/// Built once per cycle by the extractor and never mutated afterwards; it is
/// either inserted into the store, used only for a last-seen refresh, or
/// dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    /// Price text as rendered, currency symbol included.
    pub price: String,
    pub size: String,
    pub year: String,
    pub floors: String,
    pub description: String,
    /// Absolute detail-page URL with accents folded to base Latin.
    pub url: String,
    /// URL path after the site host.
    pub path: String,
    /// The trailing `_<digits>` token of the path; the dedup key.
    pub external_id: u64,
    pub scraped_at: DateTime<Utc>,
}

/// One configured crawl entry point: a listing-category URL.
#[derive(Debug, Clone)]
pub struct Source {
    pub url: String,
    /// URL path after the site host.
    pub path: String,
    /// Category token shared by the source URL and every listing it yields.
    /// Listings resolving to a different token are discarded.
    pub category: String,
}

impl Source {
    pub fn from_url(url: &str, base_url: &str, category_pattern: &Regex) -> Result<Self> {
        let path = url
            .strip_prefix(base_url)
            .ok_or_else(|| ScoutError::Config(format!("source URL {url} is not under {base_url}")))?
            .to_string();
        let category = category_token(&path, category_pattern)
            .ok_or_else(|| ScoutError::Config(format!("source URL {url} has no category segment")))?
            .to_string();

        Ok(Self {
            url: url.to_string(),
            path,
            category,
        })
    }
}

/// Category token of a listing path, usually its first segment.
pub fn category_token<'a>(path: &'a str, pattern: &Regex) -> Option<&'a str> {
    pattern
        .captures(path)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str())
}
