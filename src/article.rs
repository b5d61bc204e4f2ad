//! Cached article metadata and the content fingerprint used to detect edits.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw metadata as returned by the extractor for a single page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub description: String,
    pub author: String,
    pub image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// One cached article, keyed by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub url: String,
    pub title: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleRecord {
    pub fn from_extracted(url: impl Into<String>, article: ExtractedArticle) -> Self {
        let modified_at = article.modified_at.or(article.published_at);
        let fingerprint = fingerprint(
            &article.title,
            &article.description,
            &article.author,
            modified_at,
        );

        Self {
            url: url.into(),
            title: article.title,
            description: article.description,
            author: article.author,
            image: article.image,
            published_at: article.published_at,
            modified_at,
            fingerprint,
            fetched_at: Utc::now(),
        }
    }

    /// Date shown as the item's `pubDate`.
    pub fn display_date(&self) -> DateTime<Utc> {
        self.published_at
            .or(self.modified_at)
            .unwrap_or(self.fetched_at)
    }
}

pub fn fingerprint(
    title: &str,
    description: &str,
    author: &str,
    modified_at: Option<DateTime<Utc>>,
) -> String {
    let modified = modified_at.map(|d| d.to_rfc3339()).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(format!("{}||{}||{}||{}", title, description, author, modified));
    hex::encode(hasher.finalize())
}

/// Best-effort parse of the date formats found in article markup.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offsets without a colon, e.g. 2024-05-01T10:00:00+0200
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// RFC-2822 style date as used in RSS `pubDate` / `lastBuildDate`.
pub fn format_rss_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
