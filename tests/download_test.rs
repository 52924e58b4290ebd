use anyhow::Result;
use cat_ingest::remote::{archive_client, download_file, DownloadOptions, HttpRemote, RemoteSource};
use cat_ingest::IngestError;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use std::io::Write;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const BODY: &[u8] = b"source_id,ra,dec\n1,10.0,20.0\n2,11.0,21.0\n3,12.0,22.0\n4,13.0,23.0\n";

fn response(status: &str, declared_len: usize, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {declared_len}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

fn full() -> Vec<u8> {
    response("200 OK", BODY.len(), BODY)
}

/// Advertises the whole body but hangs up halfway through it
fn truncated() -> Vec<u8> {
    response("200 OK", BODY.len(), &BODY[..BODY.len() / 2])
}

/// Serves the scripted responses in order, repeating the last one.
async fn serve(script: Vec<Vec<u8>>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let reply = script[n.min(script.len() - 1)].clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), hits)
}

fn options(max_attempts: u32) -> DownloadOptions {
    DownloadOptions {
        timeout: Duration::from_secs(2),
        max_attempts,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_truncated_body_is_retried() -> Result<()> {
    let (base, hits) = serve(vec![truncated(), full()]).await;
    let dir = tempdir()?;
    let dest = dir.path().join("GaiaSource_1.csv");

    let report = download_file(&Client::new(), &format!("{base}/GaiaSource_1.csv"), &dest, &options(5)).await?;

    assert_eq!(report.attempts, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(report.bytes, BODY.len() as u64);
    assert_eq!(std::fs::read(&dest)?, BODY);
    assert_eq!(report.sha256, hex::encode(Sha256::digest(BODY)));
    assert!(!dir.path().join("GaiaSource_1.csv.tmp").exists());
    Ok(())
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() -> Result<()> {
    let (base, hits) = serve(vec![truncated()]).await;
    let dir = tempdir()?;
    let dest = dir.path().join("f.csv");

    let err = download_file(&Client::new(), &format!("{base}/f.csv"), &dest, &options(3))
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Download { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(!dest.exists());
    assert!(!dir.path().join("f.csv.tmp").exists());
    Ok(())
}

#[tokio::test]
async fn test_client_error_is_not_retried() -> Result<()> {
    let (base, hits) = serve(vec![response("404 Not Found", 0, b"")]).await;
    let dir = tempdir()?;

    let result = download_file(&Client::new(), &format!("{base}/missing.csv"), &dir.path().join("m.csv"), &options(5)).await;

    assert!(result.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_retried() -> Result<()> {
    let (base, hits) = serve(vec![response("503 Service Unavailable", 0, b""), full()]).await;
    let dir = tempdir()?;
    let dest = dir.path().join("f.csv");

    let report = download_file(&Client::new(), &format!("{base}/f.csv"), &dest, &options(5)).await?;

    assert_eq!(report.attempts, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_gzip_archive_is_stored_as_served() -> Result<()> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(BODY)?;
    let gz = enc.finish()?;
    let mut reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/x-gzip\r\nContent-Encoding: gzip\r\nConnection: close\r\n\r\n",
        gz.len()
    )
    .into_bytes();
    reply.extend_from_slice(&gz);
    let (base, _) = serve(vec![reply]).await;
    let dir = tempdir()?;
    let dest = dir.path().join("GaiaSource_1.csv.gz");
    let client = archive_client(Duration::from_secs(2))?;

    let report = download_file(&client, &format!("{base}/GaiaSource_1.csv.gz"), &dest, &options(1)).await?;

    assert_eq!(report.bytes, gz.len() as u64);
    assert_eq!(report.sha256, hex::encode(Sha256::digest(&gz)));
    assert_eq!(std::fs::read(&dest)?, gz);
    Ok(())
}

#[tokio::test]
async fn test_http_remote_lists_index() -> Result<()> {
    let index = br#"<html><body>
        <a href="../">Parent Directory</a>
        <a href="GaiaSource_000000-003111.csv.gz">GaiaSource_000000-003111.csv.gz</a>
        <a href="GaiaSource_003112-005263.csv.gz">GaiaSource_003112-005263.csv.gz</a>
        <a href="_MD5SUM.txt">_MD5SUM.txt</a>
        </body></html>"#;
    let (base, _) = serve(vec![response("200 OK", index.len(), index)]).await;
    let remote = HttpRemote::new(Client::new(), options(1));

    let files = remote.list(&format!("{base}/gaia_source"), "gz").await?;

    assert_eq!(
        files,
        vec![
            format!("{base}/gaia_source/GaiaSource_000000-003111.csv.gz"),
            format!("{base}/gaia_source/GaiaSource_003112-005263.csv.gz"),
        ]
    );
    Ok(())
}
