use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::archive::ArchiveLister;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::crawler::{CrawlPhase, CrawlSettings, Crawler};
use crate::extractor::Extractor;
use crate::feed::FeedService;
use crate::fetcher::HttpFetcher;

pub struct AppState {
    pub cache: Arc<CacheStore>,
    pub lister: Arc<ArchiveLister>,
    pub crawler: Arc<Crawler>,
    pub feed: Arc<FeedService>,
}

impl AppState {
    /// Wire every component from static configuration.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let fetcher = HttpFetcher::new(config)?;
        let cache = Arc::new(CacheStore::new(&config.cache_path));
        let lister = Arc::new(ArchiveLister::new(fetcher.clone(), config));
        let extractor = Arc::new(Extractor::new(fetcher, config));
        let crawler = Arc::new(Crawler::new(
            cache.clone(),
            lister.clone(),
            extractor,
            CrawlSettings::from_config(config),
        ));
        let feed = Arc::new(FeedService::new(
            cache.clone(),
            lister.clone(),
            crawler.clone(),
            config.channel.clone(),
            config.archive_url.clone(),
            config.self_url().to_string(),
        ));

        Ok(Self {
            cache,
            lister,
            crawler,
            feed,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rss.xml", get(rss_feed))
        .route("/rss-status", get(rss_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

pub async fn rss_feed(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = state.feed.get_feed().await?;
    Ok((
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        body,
    ))
}

#[derive(Debug, Serialize)]
pub struct RssStatus {
    pub cache_count: usize,
    pub links_count: usize,
    pub worker_running: bool,
    pub phase: CrawlPhase,
}

pub async fn rss_status(State(state): State<Arc<AppState>>) -> Json<RssStatus> {
    let cache_count = state.cache.load().await.len();
    let links_count = match state.lister.list_article_urls().await {
        Ok(links) => links.len(),
        Err(e) => {
            warn!("rss-status: could not list archive: {}", e);
            0
        }
    };

    Json(RssStatus {
        cache_count,
        links_count,
        worker_running: state.crawler.is_running(),
        phase: state.crawler.phase(),
    })
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
