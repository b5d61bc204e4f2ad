use reqwest::Url;
use scraper::Selector;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_archive_url")]
    pub archive_url: String,
    /// CSS selector matching article links on the archive page
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Articles per backfill batch and per verification group
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between two article fetches, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_group_pause_ms")]
    pub group_pause_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_archive_url() -> String {
    "https://www.artbooms.com/archivio-completo".to_string()
}

fn default_link_selector() -> String {
    r#"a[href^="/blog/"]"#.to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("articles_cache.json")
}

fn default_bind_addr() -> String {
    "0.0.0.0:10000".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; Artbooms-RSS/1.0)".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_request_delay_ms() -> u64 {
    1200
}

fn default_batch_pause_ms() -> u64 {
    500
}

fn default_group_pause_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_title")]
    pub title: String,
    #[serde(default = "default_channel_description")]
    pub description: String,
    #[serde(default = "default_channel_language")]
    pub language: String,
    /// Public URL of the feed itself; the archive URL is used when unset
    #[serde(default)]
    pub self_url: Option<String>,
    #[serde(default = "default_author")]
    pub default_author: String,
    /// Suffix the site appends to every `og:title`
    #[serde(default = "default_title_suffix")]
    pub title_suffix: String,
}

fn default_channel_title() -> String {
    "Artbooms RSS Feed".to_string()
}

fn default_channel_description() -> String {
    "Feed dinamico e arricchito".to_string()
}

fn default_channel_language() -> String {
    "it-it".to_string()
}

fn default_author() -> String {
    "ARTBOOMS".to_string()
}

fn default_title_suffix() -> String {
    "— ARTBOOMS".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            title: default_channel_title(),
            description: default_channel_description(),
            language: default_channel_language(),
            self_url: None,
            default_author: default_author(),
            title_suffix: default_title_suffix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_url: default_archive_url(),
            link_selector: default_link_selector(),
            cache_path: default_cache_path(),
            bind_addr: default_bind_addr(),
            user_agent: default_user_agent(),
            batch_size: default_batch_size(),
            request_delay_ms: default_request_delay_ms(),
            batch_pause_ms: default_batch_pause_ms(),
            group_pause_ms: default_group_pause_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            channel: ChannelConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        Url::parse(&self.archive_url)
            .map_err(|e| anyhow::anyhow!("invalid archive_url {:?}: {}", self.archive_url, e))?;
        Selector::parse(&self.link_selector)
            .map_err(|e| anyhow::anyhow!("invalid link_selector {:?}: {}", self.link_selector, e))?;
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn group_pause(&self) -> Duration {
        Duration::from_millis(self.group_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The `atom:link rel="self"` target
    pub fn self_url(&self) -> &str {
        self.channel.self_url.as_deref().unwrap_or(&self.archive_url)
    }
}
