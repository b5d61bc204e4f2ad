use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use askama::Template;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::archive::ArchiveLister;
use crate::article::{format_rss_date, ArticleRecord};
use crate::cache::CacheStore;
use crate::config::ChannelConfig;
use crate::crawler::Crawler;

#[derive(Template)]
#[template(path = "rss.xml", escape = "html")]
pub struct RssTemplate<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub description: &'a str,
    pub language: &'a str,
    pub self_url: &'a str,
    pub last_build_date: String,
    pub items: Vec<FeedItem>,
}

pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub description: String,
    pub author: String,
    pub enclosure: Option<Enclosure>,
}

pub struct Enclosure {
    pub url: String,
    pub mime: &'static str,
}

impl From<ArticleRecord> for FeedItem {
    fn from(record: ArticleRecord) -> Self {
        let pub_date = format_rss_date(record.display_date());
        let enclosure = record.image.filter(|i| !i.is_empty()).map(|url| Enclosure {
            mime: image_mime(&url),
            url,
        });

        Self {
            title: record.title,
            link: record.url,
            pub_date,
            description: record.description,
            author: record.author,
            enclosure,
        }
    }
}

/// MIME type for an enclosure, guessed from the image path.
pub fn image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

/// Newest first; undated records last; ties by archive position, then cache order.
pub fn sort_records(records: &mut [ArticleRecord], archive_order: &[String]) {
    let position: HashMap<&str, usize> = archive_order
        .iter()
        .enumerate()
        .map(|(i, url)| (url.as_str(), i))
        .collect();

    records.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| {
                let pa = position.get(a.url.as_str()).copied().unwrap_or(usize::MAX);
                let pb = position.get(b.url.as_str()).copied().unwrap_or(usize::MAX);
                pa.cmp(&pb)
            })
    });
}

pub fn render_rss(
    channel: &ChannelConfig,
    archive_url: &str,
    self_url: &str,
    records: Vec<ArticleRecord>,
) -> Result<String, askama::Error> {
    RssTemplate {
        title: &channel.title,
        link: archive_url,
        description: &channel.description,
        language: &channel.language,
        self_url,
        last_build_date: format_rss_date(Utc::now()),
        items: records.into_iter().map(FeedItem::from).collect(),
    }
    .render()
}

/// Serves the cached snapshot as RSS and nudges the crawler when the cache lags the archive.
pub struct FeedService {
    cache: Arc<CacheStore>,
    lister: Arc<ArchiveLister>,
    crawler: Arc<Crawler>,
    channel: ChannelConfig,
    archive_url: String,
    self_url: String,
    /// Set while a completeness check is listing the archive
    checking: Arc<AtomicBool>,
}

/// Clears the in-flight flag when a completeness check ends.
struct CheckGuard(Arc<AtomicBool>);

impl Drop for CheckGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FeedService {
    pub fn new(
        cache: Arc<CacheStore>,
        lister: Arc<ArchiveLister>,
        crawler: Arc<Crawler>,
        channel: ChannelConfig,
        archive_url: String,
        self_url: String,
    ) -> Self {
        Self {
            cache,
            lister,
            crawler,
            channel,
            archive_url,
            self_url,
            checking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Render the current cache. Never waits on the network.
    pub async fn get_feed(&self) -> Result<String, askama::Error> {
        self.trigger_crawl_if_incomplete();

        let mut records = self.cache.load().await;
        sort_records(&mut records, &self.lister.last_listing());
        render_rss(&self.channel, &self.archive_url, &self.self_url, records)
    }

    /// Fire-and-forget: list the archive in the background and start the
    /// worker if any listed article is missing from the cache.
    ///
    /// At most one check is in flight; requests arriving meanwhile skip it.
    pub fn trigger_crawl_if_incomplete(&self) {
        if self.crawler.is_running() {
            return;
        }
        if self
            .checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Completeness check already in flight, skipping");
            return;
        }

        let guard = CheckGuard(self.checking.clone());
        let cache = self.cache.clone();
        let lister = self.lister.clone();
        let crawler = self.crawler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let links = match lister.list_article_urls().await {
                Ok(links) => links,
                Err(e) => {
                    warn!("Could not list archive for completeness check: {}", e);
                    return;
                }
            };

            let cached: HashSet<String> = cache.urls().await;
            let missing = links.iter().filter(|url| !cached.contains(*url)).count();
            if missing > 0 {
                info!("Cache is missing {} archived articles, starting crawl", missing);
                crawler.ensure_running();
            }
        });
    }
}
