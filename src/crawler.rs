//! Background crawl worker.
//!
//! A run lists the archive, backfills every URL missing from the cache in
//! rate-limited batches, then keeps re-verifying the whole archive until a
//! complete pass changes nothing. All progress is committed to the
//! [`CacheStore`] as it happens, so a fresh run after a crash resumes from the
//! cache/archive difference.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::ArchiveLister;
use crate::cache::{CacheStore, MergeOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extractor::Extractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CrawlPhase {
    Idle = 0,
    Listing = 1,
    Backfilling = 2,
    Verifying = 3,
}

impl CrawlPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CrawlPhase::Listing,
            2 => CrawlPhase::Backfilling,
            3 => CrawlPhase::Verifying,
            _ => CrawlPhase::Idle,
        }
    }
}

/// Pacing knobs, all taken from static configuration.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub batch_size: usize,
    pub request_delay: Duration,
    pub batch_pause: Duration,
    pub group_pause: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            request_delay: config.request_delay(),
            batch_pause: config.batch_pause(),
            group_pause: config.group_pause(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub listed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub verify_passes: usize,
}

pub struct Crawler {
    cache: Arc<CacheStore>,
    lister: Arc<ArchiveLister>,
    extractor: Arc<Extractor>,
    settings: CrawlSettings,
    running: AtomicBool,
    phase: AtomicU8,
}

/// Clears the running flag when a spawned run ends, however it ends.
struct RunningGuard(Arc<Crawler>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.set_phase(CrawlPhase::Idle);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl Crawler {
    pub fn new(
        cache: Arc<CacheStore>,
        lister: Arc<ArchiveLister>,
        extractor: Arc<Extractor>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            cache,
            lister,
            extractor,
            settings,
            running: AtomicBool::new(false),
            phase: AtomicU8::new(CrawlPhase::Idle as u8),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> CrawlPhase {
        CrawlPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: CrawlPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    fn try_claim(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(self.clone()))
    }

    /// Spawn a background run unless one is already active.
    ///
    /// Returns `true` if this call started the worker.
    pub fn ensure_running(self: &Arc<Self>) -> bool {
        let Some(guard) = self.try_claim() else {
            info!("Crawl worker already running, skipping");
            return false;
        };

        tokio::spawn(async move {
            info!("Crawl worker started");
            match guard.0.run_claimed().await {
                Ok(report) => info!(
                    "Crawl worker finished: {} listed, {} inserted, {} updated, {} failed, {} verification passes",
                    report.listed, report.inserted, report.updated, report.failed, report.verify_passes
                ),
                Err(e) => error!("Crawl worker stopped: {}", e),
            }
            drop(guard);
        });
        true
    }

    /// Run one complete worker lifetime on the current task.
    ///
    /// Fails with [`Error::AlreadyRunning`] while another run holds the worker.
    pub async fn run(self: &Arc<Self>) -> Result<CrawlReport> {
        let guard = self.try_claim().ok_or(Error::AlreadyRunning)?;
        let result = self.run_claimed().await;
        drop(guard);
        result
    }

    /// List, backfill, then verify until stable. Callers hold the running flag.
    async fn run_claimed(&self) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();

        self.set_phase(CrawlPhase::Listing);
        let links = self
            .lister
            .list_article_urls()
            .await
            .map_err(|e| Error::Startup(Box::new(e)))?;
        report.listed = links.len();

        self.set_phase(CrawlPhase::Backfilling);
        self.backfill(&links, &mut report).await;

        self.set_phase(CrawlPhase::Verifying);
        loop {
            let updated = self.verify_pass(&links, &mut report).await;
            report.verify_passes += 1;
            if updated == 0 {
                info!("Verification pass found no changes, worker going idle");
                break;
            }
            info!("Verification pass changed {} articles, starting another", updated);
        }

        Ok(report)
    }

    /// Fetch every listed URL that is not cached yet, one batch at a time.
    ///
    /// URLs that fail are skipped for the rest of this run and retried by the next one.
    async fn backfill(&self, links: &[String], report: &mut CrawlReport) {
        let mut skipped: HashSet<String> = HashSet::new();

        loop {
            let cached = self.cache.urls().await;
            let batch: Vec<&String> = links
                .iter()
                .filter(|url| !cached.contains(*url) && !skipped.contains(*url))
                .take(self.settings.batch_size)
                .collect();

            if batch.is_empty() {
                break;
            }
            info!("Backfilling batch of {} articles", batch.len());

            for url in batch {
                match self.fetch_and_merge(url).await {
                    Some(MergeOutcome::Inserted) => {
                        report.inserted += 1;
                        info!("Added {}", url);
                    }
                    Some(MergeOutcome::Updated) => report.updated += 1,
                    Some(MergeOutcome::Unchanged) => {}
                    None => {
                        report.failed += 1;
                        skipped.insert(url.clone());
                    }
                }
                pause(self.settings.request_delay).await;
            }

            pause(self.settings.batch_pause).await;
        }
    }

    /// Re-extract every listed URL and overwrite records whose fingerprint changed.
    ///
    /// Returns the number of records inserted or updated.
    async fn verify_pass(&self, links: &[String], report: &mut CrawlReport) -> usize {
        let mut changed = 0;

        for (i, group) in links.chunks(self.settings.batch_size).enumerate() {
            if i > 0 {
                pause(self.settings.group_pause).await;
            }

            for url in group {
                match self.fetch_and_merge(url).await {
                    Some(MergeOutcome::Updated) => {
                        changed += 1;
                        report.updated += 1;
                        info!("Updated modified article {}", url);
                    }
                    Some(MergeOutcome::Inserted) => {
                        changed += 1;
                        report.inserted += 1;
                        info!("Added {} during verification", url);
                    }
                    Some(MergeOutcome::Unchanged) => {}
                    None => report.failed += 1,
                }
                pause(self.settings.request_delay).await;
            }
        }

        changed
    }

    /// `None` means the URL failed and was logged.
    async fn fetch_and_merge(&self, url: &str) -> Option<MergeOutcome> {
        let record = match self.extractor.extract(url).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                return None;
            }
        };

        match self.cache.merge(record).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Failed to persist {}: {}", url, e);
                None
            }
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
