use crate::error::{IngestError, Result};
use crate::remote::rate_limiter::Throttle;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Progress is logged every `chunk_bytes` * 100 bytes; also the throttle burst
    pub chunk_bytes: usize,
    /// Per-chunk read timeout
    pub timeout: Duration,
    pub max_attempts: u32,
    pub throttle: Option<Throttle>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: 100 * 1024,
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            throttle: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
    pub sha256: String,
}

/// Why one attempt failed; every variant except `Fatal` is retried.
enum AttemptError {
    Retry(String),
    Fatal(IngestError),
}

/// Stream `url` into `dest`.
///
/// The body is written to `dest` + `.tmp` and renamed into place only once it
/// is complete: when the server sent a non-zero `Content-Length`, the byte
/// count must match it. Broken connections, read timeouts, short bodies and
/// 5xx responses are retried from scratch up to `max_attempts` times; 4xx
/// responses are not.
#[instrument(skip(client, opts), fields(dest = %dest.display()))]
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    opts: &DownloadOptions,
) -> Result<DownloadReport> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(dest);
    let mut last_error = String::new();

    for attempt in 1..=opts.max_attempts {
        let started = Instant::now();
        match try_download(client, url, &tmp, opts).await {
            Ok((bytes, sha256)) => {
                fs::rename(&tmp, dest).await?;
                let secs = started.elapsed().as_secs_f64();
                info!(
                    "Downloaded {} bytes in {:.1}s (attempt {}/{})",
                    bytes, secs, attempt, opts.max_attempts
                );
                metrics::counter!("cat_ingest_download_bytes_total").increment(bytes);
                metrics::histogram!("cat_ingest_download_duration_seconds").record(secs);
                return Ok(DownloadReport {
                    url: url.to_string(),
                    path: dest.to_path_buf(),
                    bytes,
                    attempts: attempt,
                    sha256,
                });
            }
            Err(AttemptError::Fatal(e)) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
            Err(AttemptError::Retry(reason)) => {
                let _ = fs::remove_file(&tmp).await;
                metrics::counter!("cat_ingest_download_retries_total").increment(1);
                warn!(
                    "{}. Attempt {}/{} failed, trying again...",
                    reason, attempt, opts.max_attempts
                );
                last_error = reason;
            }
        }
    }

    Err(IngestError::Download {
        url: url.to_string(),
        message: format!("gave up after {} attempts: {}", opts.max_attempts, last_error),
    })
}

async fn try_download(
    client: &Client,
    url: &str,
    tmp: &Path,
    opts: &DownloadOptions,
) -> std::result::Result<(u64, String), AttemptError> {
    let resp = match tokio::time::timeout(opts.timeout, client.get(url).send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return Err(AttemptError::Retry(format!("Connection error occurred: {e}"))),
        Err(_) => return Err(AttemptError::Retry("Connection timed out".to_string())),
    };

    let status = resp.status();
    if status.is_server_error() {
        return Err(AttemptError::Retry(format!("Server responded {status}")));
    }
    if !status.is_success() {
        return Err(AttemptError::Fatal(IngestError::Download {
            url: url.to_string(),
            message: format!("server responded {status}"),
        }));
    }

    // A zero length is treated as unknown
    let expected = resp.content_length().filter(|n| *n > 0);
    let mut resp = resp;
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|e| AttemptError::Fatal(e.into()))?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let progress_every = (opts.chunk_bytes as u64).saturating_mul(100).max(1);
    let mut next_progress = progress_every;

    loop {
        let chunk = match tokio::time::timeout(opts.timeout, resp.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(AttemptError::Retry(format!("Read error occurred: {e}"))),
            Err(_) => return Err(AttemptError::Retry("Read timeout occurred".to_string())),
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        hasher.update(&chunk);
        written += chunk.len() as u64;

        if written >= next_progress {
            match expected {
                Some(total) => debug!("{} / {} bytes", written, total),
                None => debug!("{} bytes", written),
            }
            next_progress += progress_every;
        }
        if let Some(throttle) = &opts.throttle {
            throttle.acquire(chunk.len() as u64).await;
        }
    }
    file.flush().await.map_err(|e| AttemptError::Fatal(e.into()))?;
    drop(file);

    if let Some(total) = expected {
        if written != total {
            return Err(AttemptError::Retry(format!(
                "Short read ({written} of {total} bytes)"
            )));
        }
    }
    Ok((written, hex::encode(hasher.finalize())))
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
