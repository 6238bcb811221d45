//! Streamed archive download with progress accounting

use anyhow::{Context, Result};
use reqwest::Url;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::progress::{chunk_size_for, DownloadProgress, ProgressDisplay};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub bytes: u64,
    /// Declared Content-Length, when the server sent one
    pub total: Option<u64>,
    pub elapsed: Duration,
}

/// GET `url` into `dest`, replacing any existing file. Progress is reported
/// only when the response declares its length.
pub async fn download(url: &Url, dest: &Path, display: &ProgressDisplay) -> Result<DownloadReport> {
    let started = Instant::now();
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        // peers are always on the local network
        .no_proxy()
        .build()
        .context("build HTTP client")?;
    let mut response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()
        .with_context(|| format!("GET {}", url))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("create {}", dest.display()))?;
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("Downloading {}", name);

    let total = response.content_length();
    let bytes = match total {
        None => {
            let body = response.bytes().await.context("read response body")?;
            let mut file = file;
            file.write_all(&body).await.context("write archive")?;
            file.flush().await?;
            body.len() as u64
        }
        Some(total) => {
            let chunk = chunk_size_for(total) as u64;
            let mut writer = BufWriter::with_capacity(chunk as usize, file);
            let mut progress = DownloadProgress::new(total, Instant::now());
            let mut pending = 0u64;
            while let Some(data) = response.chunk().await.context("read response body")? {
                writer.write_all(&data).await.context("write archive")?;
                pending += data.len() as u64;
                if pending >= chunk {
                    display.update(&progress.record(pending, Instant::now()));
                    pending = 0;
                }
            }
            if pending > 0 || total == 0 {
                display.update(&progress.record(pending, Instant::now()));
            }
            writer.flush().await.context("flush archive")?;
            let received = progress.received();
            if received < total {
                anyhow::bail!("connection closed after {} of {} bytes", received, total);
            }
            received
        }
    };

    let elapsed = started.elapsed();
    display.finish(bytes, elapsed);
    Ok(DownloadReport {
        bytes,
        total,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_raw(response: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = s.read(&mut buf).await;
            s.write_all(&response).await.unwrap();
            s.shutdown().await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn writes_body_with_declared_length() {
        let body = vec![7u8; 50_000];
        let mut resp = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len()).into_bytes();
        resp.extend_from_slice(&body);
        let port = serve_raw(resp).await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("in/ReceiveFile.zip");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"old contents that are longer than nothing").unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/x.zip", port)).unwrap();
        let report = download(&url, &dest, &ProgressDisplay::new(false, false)).await.unwrap();

        assert_eq!(report.bytes, 50_000);
        assert_eq!(report.total, Some(50_000));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn reads_in_one_shot_without_length() {
        let resp = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nno-length-body".to_vec();
        let port = serve_raw(resp).await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("ReceiveFile.zip");
        let url = Url::parse(&format!("http://127.0.0.1:{}/x.zip", port)).unwrap();
        let report = download(&url, &dest, &ProgressDisplay::new(true, false)).await.unwrap();
        assert_eq!(report.total, None);
        assert_eq!(std::fs::read(&dest).unwrap(), b"no-length-body");
    }

    #[tokio::test]
    async fn http_error_status_fails() {
        let resp = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec();
        let port = serve_raw(resp).await;
        let tmp = tempfile::tempdir().unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/x.zip", port)).unwrap();
        let res = download(&url, &tmp.path().join("r.zip"), &ProgressDisplay::new(false, false)).await;
        assert!(res.is_err());
    }
}
