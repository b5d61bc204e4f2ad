use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::article::ArticleRecord;
use crate::error::{Error, Result};

/// What a [`CacheStore::merge`] did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Same fingerprint as the cached record; nothing was written.
    Unchanged,
}

/// Durable URL -> record mapping backed by a single pretty-printed JSON file.
///
/// The file is the only source of truth: every operation reads it afresh. All
/// I/O is serialized through one lock, and writes go to a temporary file in
/// the same directory which is then renamed over the old one, so readers
/// never observe a partially written store.
pub struct CacheStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All known records. Missing or corrupt storage yields an empty list.
    pub async fn load(&self) -> Vec<ArticleRecord> {
        let _guard = self.io_lock.lock().await;
        match self.read().await {
            Ok(snapshot) => snapshot.records,
            Err(e) => {
                warn!("Treating cache as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Replace the whole store. Failures are logged and leave the previous file intact.
    pub async fn save(&self, records: &[ArticleRecord]) {
        let _guard = self.io_lock.lock().await;
        if let Err(e) = self.write(records.to_vec()).await {
            error!("Failed to save cache: {}", e);
        }
    }

    /// Read-modify-write of a single record under the store lock.
    ///
    /// A record whose fingerprint matches the cached one is left untouched on disk.
    /// A store that cannot be read is never overwritten; one with unreadable
    /// entries is copied to [`CacheStore::corrupt_path`] before the rewrite.
    pub async fn merge(&self, record: ArticleRecord) -> Result<MergeOutcome> {
        let _guard = self.io_lock.lock().await;
        let Snapshot {
            mut records,
            damaged,
        } = self.read().await?;

        let outcome = match records.iter_mut().find(|r| r.url == record.url) {
            Some(existing) if existing.fingerprint == record.fingerprint => {
                return Ok(MergeOutcome::Unchanged);
            }
            Some(existing) => {
                *existing = record;
                MergeOutcome::Updated
            }
            None => {
                records.push(record);
                MergeOutcome::Inserted
            }
        };

        if damaged {
            self.preserve_damaged().await?;
        }
        self.write(records).await?;
        Ok(outcome)
    }

    pub async fn urls(&self) -> HashSet<String> {
        self.load().await.into_iter().map(|r| r.url).collect()
    }

    /// Where a damaged store is copied before it gets rewritten.
    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    async fn read(&self) -> Result<Snapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file at {}, starting empty", self.path.display());
                return Ok(Snapshot::default());
            }
            Err(source) => {
                return Err(Error::CacheIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(parse_snapshot(&bytes, &self.path))
    }

    async fn preserve_damaged(&self) -> Result<()> {
        let backup = self.corrupt_path();
        warn!(
            "Cache {} has unreadable content, keeping a copy at {}",
            self.path.display(),
            backup.display()
        );
        tokio::fs::copy(&self.path, &backup)
            .await
            .map_err(|source| Error::CacheIo {
                path: backup,
                source,
            })?;
        Ok(())
    }

    async fn write(&self, records: Vec<ArticleRecord>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &records))
            .await
            .map_err(|e| Error::CacheIo {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }
}

/// Records read from disk, plus whether anything on disk had to be dropped.
#[derive(Debug, Default)]
struct Snapshot {
    records: Vec<ArticleRecord>,
    damaged: bool,
}

/// Tolerant decode: entries that are not valid records are skipped one by one.
fn parse_snapshot(bytes: &[u8], path: &Path) -> Snapshot {
    let entries = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Array(entries)) => entries,
        Ok(_) => {
            warn!("Cache {} is not a JSON array, ignoring it", path.display());
            return Snapshot {
                records: Vec::new(),
                damaged: true,
            };
        }
        Err(e) => {
            warn!("Cache {} is not valid JSON: {}", path.display(), e);
            return Snapshot {
                records: Vec::new(),
                damaged: true,
            };
        }
    };

    let mut damaged = false;
    let mut records = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<ArticleRecord>(entry) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping unreadable cache entry #{} in {}: {}", i, path.display(), e);
                damaged = true;
            }
        }
    }

    Snapshot {
        records: dedup_by_url(records),
        damaged,
    }
}

/// Keep the last occurrence of each URL, preserving first-seen order.
fn dedup_by_url(records: Vec<ArticleRecord>) -> Vec<ArticleRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ArticleRecord> = Vec::with_capacity(records.len());

    for record in records {
        match index.get(&record.url) {
            Some(&i) => unique[i] = record,
            None => {
                index.insert(record.url.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

fn write_atomically(path: &Path, records: &[ArticleRecord]) -> Result<()> {
    let io_err = |source| Error::CacheIo {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let json = serde_json::to_vec_pretty(records)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::ExtractedArticle;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("articles_cache.json"));
        (dir, store)
    }

    fn record(url: &str, description: &str) -> ArticleRecord {
        ArticleRecord::from_extracted(
            url,
            ExtractedArticle {
                title: format!("Title of {}", url),
                description: description.to_string(),
                author: "Redazione".to_string(),
                image: None,
                published_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                modified_at: None,
            },
        )
    }

    mod load_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_file_is_empty() {
            let (_dir, store) = create_test_store();
            assert!(store.load().await.is_empty());
        }

        #[tokio::test]
        async fn test_corrupt_file_is_empty() {
            let (_dir, store) = create_test_store();
            std::fs::write(store.path(), b"{ not json").unwrap();
            assert!(store.load().await.is_empty());
        }

        #[tokio::test]
        async fn test_non_array_document_is_empty() {
            let (_dir, store) = create_test_store();
            std::fs::write(store.path(), br#"{"url": "https://a"}"#).unwrap();
            assert!(store.load().await.is_empty());
        }

        #[tokio::test]
        async fn test_duplicates_collapse_to_last() {
            let (_dir, store) = create_test_store();
            let records = vec![
                record("https://a", "old"),
                record("https://b", "b"),
                record("https://a", "new"),
            ];
            std::fs::write(store.path(), serde_json::to_vec(&records).unwrap()).unwrap();

            let loaded = store.load().await;
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded[0].url, "https://a");
            assert_eq!(loaded[0].description, "new");
            assert_eq!(loaded[1].url, "https://b");
        }
    }

    mod save_tests {
        use super::*;

        #[tokio::test]
        async fn test_save_then_load() {
            let (_dir, store) = create_test_store();
            let records = vec![record("https://a", "a"), record("https://b", "b")];

            store.save(&records).await;

            assert_eq!(store.load().await, records);
        }

        #[tokio::test]
        async fn test_file_is_pretty_utf8() {
            let (_dir, store) = create_test_store();
            store.save(&[record("https://a", "Città d'arte")]).await;

            let raw = std::fs::read_to_string(store.path()).unwrap();
            assert!(raw.starts_with("[\n"));
            assert!(raw.contains("Città d'arte"));
        }

        #[tokio::test]
        async fn test_save_creates_parent_dirs() {
            let dir = tempfile::tempdir().unwrap();
            let store = CacheStore::new(dir.path().join("nested/deeper/cache.json"));

            store.save(&[record("https://a", "a")]).await;

            assert_eq!(store.load().await.len(), 1);
        }

        #[tokio::test]
        async fn test_save_leaves_no_temp_files() {
            let (dir, store) = create_test_store();
            store.save(&[record("https://a", "a")]).await;
            store.save(&[record("https://b", "b")]).await;

            let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
            assert_eq!(entries.len(), 1);
        }

        #[tokio::test]
        async fn test_failed_save_keeps_previous_state() {
            let dir = tempfile::tempdir().unwrap();
            // The cache path is a directory, so the final rename fails
            let target = dir.path().join("cache.json");
            std::fs::create_dir(&target).unwrap();
            std::fs::write(target.join("keep"), b"x").unwrap();
            let store = CacheStore::new(&target);

            store.save(&[record("https://a", "a")]).await;

            assert!(target.is_dir());
            assert!(target.join("keep").exists());
        }
    }

    mod merge_tests {
        use super::*;

        #[tokio::test]
        async fn test_merge_inserts_new() {
            let (_dir, store) = create_test_store();

            let outcome = store.merge(record("https://a", "a")).await.unwrap();

            assert_eq!(outcome, MergeOutcome::Inserted);
            assert_eq!(store.load().await.len(), 1);
        }

        #[tokio::test]
        async fn test_merge_same_fingerprint_does_not_rewrite() {
            let (_dir, store) = create_test_store();
            let first = record("https://a", "a");
            store.merge(first.clone()).await.unwrap();
            let before = std::fs::read(store.path()).unwrap();

            let mut again = record("https://a", "a");
            again.fetched_at = first.fetched_at + chrono::Duration::hours(1);
            let outcome = store.merge(again).await.unwrap();

            assert_eq!(outcome, MergeOutcome::Unchanged);
            assert_eq!(std::fs::read(store.path()).unwrap(), before);
            assert_eq!(store.load().await[0].fetched_at, first.fetched_at);
        }

        #[tokio::test]
        async fn test_merge_changed_fingerprint_updates_in_place() {
            let (_dir, store) = create_test_store();
            store.merge(record("https://a", "a")).await.unwrap();
            store.merge(record("https://b", "b")).await.unwrap();

            let outcome = store.merge(record("https://b", "b edited")).await.unwrap();

            assert_eq!(outcome, MergeOutcome::Updated);
            let records = store.load().await;
            assert_eq!(records.len(), 2);
            assert_eq!(records[1].url, "https://b");
            assert_eq!(records[1].description, "b edited");
            assert_eq!(records[1].fingerprint, record("https://b", "b edited").fingerprint);
        }

        #[tokio::test]
        async fn test_concurrent_merges_lose_nothing() {
            let (_dir, store) = create_test_store();
            let store = Arc::new(store);

            let mut handles = Vec::new();
            for i in 0..20 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .merge(record(&format!("https://a/{}", i), "x"))
                        .await
                        .unwrap()
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(store.urls().await.len(), 20);
        }

        #[tokio::test]
        async fn test_merge_over_corrupt_file_keeps_a_copy() {
            let (_dir, store) = create_test_store();
            std::fs::write(store.path(), b"garbage").unwrap();

            store.merge(record("https://a", "a")).await.unwrap();

            assert_eq!(store.load().await.len(), 1);
            assert_eq!(std::fs::read(store.corrupt_path()).unwrap(), b"garbage");
        }

        #[tokio::test]
        async fn test_merge_keeps_records_next_to_a_malformed_one() {
            let (_dir, store) = create_test_store();
            for i in 0..5 {
                store
                    .merge(record(&format!("https://a/{}", i), "x"))
                    .await
                    .unwrap();
            }

            // Damage the last entry on disk
            let mut doc: serde_json::Value =
                serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
            doc[4].as_object_mut().unwrap().remove("fetched_at");
            std::fs::write(store.path(), serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
            let damaged = std::fs::read(store.path()).unwrap();

            let outcome = store.merge(record("https://b", "b")).await.unwrap();

            assert_eq!(outcome, MergeOutcome::Inserted);
            let urls = store.urls().await;
            assert_eq!(urls.len(), 5);
            for i in 0..4 {
                assert!(urls.contains(&format!("https://a/{}", i)));
            }
            assert!(urls.contains("https://b"));
            assert_eq!(std::fs::read(store.corrupt_path()).unwrap(), damaged);
        }

        #[tokio::test]
        async fn test_load_skips_malformed_entries() {
            let (_dir, store) = create_test_store();
            let mut doc = serde_json::to_value(vec![record("https://a", "a")]).unwrap();
            doc.as_array_mut()
                .unwrap()
                .push(serde_json::json!({ "url": "https://broken" }));
            std::fs::write(store.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

            let records = store.load().await;

            assert_eq!(records.len(), 1);
            assert_eq!(records[0].url, "https://a");
        }

        #[tokio::test]
        async fn test_merge_propagates_read_errors() {
            let dir = tempfile::tempdir().unwrap();
            // Reading a directory fails with an I/O error other than NotFound
            let target = dir.path().join("cache.json");
            std::fs::create_dir(&target).unwrap();
            std::fs::write(target.join("keep"), b"x").unwrap();
            let store = CacheStore::new(&target);

            let result = store.merge(record("https://a", "a")).await;

            assert!(matches!(result, Err(Error::CacheIo { .. })));
            assert!(target.join("keep").exists());
        }

        #[tokio::test]
        async fn test_clean_merge_writes_no_copy() {
            let (_dir, store) = create_test_store();
            store.merge(record("https://a", "a")).await.unwrap();
            store.merge(record("https://b", "b")).await.unwrap();

            assert!(!store.corrupt_path().exists());
        }
    }
}
