use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Shared HTTP client used by the archive lister and the article extractor.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|source| Error::Fetch {
                url: String::new(),
                source,
            })?;

        Ok(Self { client })
    }

    /// GET a page and return its body, treating non-2xx statuses as failures.
    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        debug!("Fetching {}", url);

        let fetch_err = |source| Error::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        let response = response.error_for_status().map_err(fetch_err)?;
        response.text().await.map_err(fetch_err)
    }
}
