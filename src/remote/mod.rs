//! Remote catalog archives: directory listing and resumable downloads.

pub mod directory;
pub mod download;
pub mod rate_limiter;

use crate::config::DownloadConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;

pub use directory::{file_name_from_url, list_http_directory, parse_directory_listing};
pub use download::{download_file, DownloadOptions, DownloadReport};
pub use rate_limiter::Throttle;

/// Where catalog files come from.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Absolute URLs of the files under `url` ending with `ext`
    async fn list(&self, url: &str, ext: &str) -> Result<Vec<String>>;

    /// Fetch one file into `dest`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<DownloadReport>;
}

/// HTTP(S) archive access through reqwest.
pub struct HttpRemote {
    client: Client,
    options: DownloadOptions,
}

impl HttpRemote {
    pub fn new(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    pub fn from_config(config: &DownloadConfig, throttle: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = archive_client(timeout)?;
        let throttle = (throttle || config.throttle).then(|| {
            Throttle::new(config.throttle_bytes_per_sec, config.chunk_bytes as u64)
        });
        let options = DownloadOptions {
            chunk_bytes: config.chunk_bytes,
            timeout,
            max_attempts: config.max_attempts,
            throttle,
        };
        Ok(Self::new(client, options))
    }
}

/// A client that hands back archive bytes exactly as served.
///
/// `.gz` files are often sent with `Content-Encoding: gzip`; decoding them
/// in transit would store plain text under a `.gz` name, hide
/// `Content-Length` and hash the wrong bytes.
pub fn archive_client(connect_timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("cat_ingest/", env!("CARGO_PKG_VERSION")))
        .no_gzip()
        .no_deflate()
        .build()?)
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn list(&self, url: &str, ext: &str) -> Result<Vec<String>> {
        list_http_directory(&self.client, url, ext).await
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<DownloadReport> {
        download_file(&self.client, url, dest, &self.options).await
    }
}
