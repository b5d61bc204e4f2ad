use std::collections::HashSet;
use std::sync::RwLock;

use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::HttpFetcher;

/// Lists the article URLs published on the archive page.
pub struct ArchiveLister {
    fetcher: HttpFetcher,
    archive_url: String,
    link_selector: String,
    /// Most recent non-empty listing, used for feed ordering
    last_listing: RwLock<Vec<String>>,
}

impl ArchiveLister {
    pub fn new(fetcher: HttpFetcher, config: &Config) -> Self {
        Self {
            fetcher,
            archive_url: config.archive_url.clone(),
            link_selector: config.link_selector.clone(),
            last_listing: RwLock::new(Vec::new()),
        }
    }

    /// Fetch the archive and return absolute article URLs in order of first appearance.
    ///
    /// An archive page with no recognizable links is logged and yields an empty list
    /// rather than an error, so a transient empty page never wipes the feed. An
    /// unusable archive URL or selector is an error.
    pub async fn list_article_urls(&self) -> Result<Vec<String>> {
        info!("Fetching archive links from {}", self.archive_url);
        let html = self.fetcher.fetch_html(&self.archive_url).await?;

        let urls = parse_archive_links(&html, &self.archive_url, &self.link_selector)?;
        if urls.is_empty() {
            warn!("No article links found on the archive page {}", self.archive_url);
            return Ok(urls);
        }

        info!("Found {} article links in the archive", urls.len());
        if let Ok(mut last) = self.last_listing.write() {
            *last = urls.clone();
        }
        Ok(urls)
    }

    /// The last successful listing, without touching the network.
    pub fn last_listing(&self) -> Vec<String> {
        self.last_listing
            .read()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }
}

/// Absolute article URLs in order of first appearance; empty when nothing matches.
pub fn parse_archive_links(html: &str, base_url: &str, selector: &str) -> Result<Vec<String>> {
    let base = Url::parse(base_url)
        .map_err(|e| Error::parse(base_url, format!("invalid archive URL: {}", e)))?;
    let selector = Selector::parse(selector)
        .map_err(|e| Error::parse(base_url, format!("invalid link selector: {}", e)))?;

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let Ok(mut full) = base.join(href) else {
            continue;
        };
        full.set_fragment(None);
        let full = full.to_string();
        if seen.insert(full.clone()) {
            urls.push(full);
        }
    }

    Ok(urls)
}
