//! Network transport used by the fetcher.

use std::path::Path;

use anyhow::{Context, Result};
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::security::scrub_url;

/// Downloads a URL to a local file.
///
/// Implementations must not retry; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// HTTP(S) GET transport following redirects.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpTransport { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let display_url = scrub_url(url);
        debug!("GET {}", display_url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(scrub_url(&e.to_string())))
            .context(format!("Request to {} failed", display_url))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!(scrub_url(&e.to_string())))?;

        let mut file = File::create(dest)
            .await
            .context(format!("Failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| anyhow::anyhow!(scrub_url(&e.to_string())))
                .context(format!("Download of {} interrupted", display_url))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!("Downloaded {} bytes from {}", written, display_url);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_streams_body_to_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/tools/yara.zip")
            .match_header("user-agent", "triage-packager-test")
            .with_status(200)
            .with_body("PK fake archive")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("yara.zip");
        let transport = HttpTransport::new("triage-packager-test").unwrap();

        let written = transport
            .download(&format!("{}/tools/yara.zip", server.url()), &dest)
            .await
            .unwrap();

        assert_eq!(written, 15);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK fake archive");
    }

    #[tokio::test]
    async fn test_download_follows_redirects() {
        let mut server = Server::new_async().await;
        let target = format!("{}/mirror/avml", server.url());
        let _redirect = server
            .mock("GET", "/latest/avml")
            .with_status(302)
            .with_header("location", &target)
            .create_async()
            .await;
        let _file = server
            .mock("GET", "/mirror/avml")
            .with_status(200)
            .with_body("ELF")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("avml");
        let transport = HttpTransport::new("test").unwrap();
        transport
            .download(&format!("{}/latest/avml", server.url()), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"ELF");
    }

    #[tokio::test]
    async fn test_http_error_status_is_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let transport = HttpTransport::new("test").unwrap();
        let result = transport
            .download(&format!("{}/missing.zip", server.url()), &dir.path().join("x"))
            .await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("404"), "unexpected error: {}", message);
    }
}
