use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The remote page could not be retrieved (network, timeout or non-2xx status).
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The page was retrieved but the expected structure is missing.
    #[error("unexpected page structure at {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("cache I/O error on {}: {source}", .path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),

    #[error("a crawl is already running")]
    AlreadyRunning,

    /// The archive could not be listed when a crawl started.
    #[error("crawl aborted at startup: {0}")]
    Startup(#[source] Box<Error>),
}

impl Error {
    pub fn parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
