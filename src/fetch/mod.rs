//! HTTP plumbing for downloading feeds and querying Socrata.
//!
//! Everything goes through the [`HttpClient`] trait so that authentication
//! can be layered on as a wrapper ([`auth::AppToken`]) around a
//! [`BasicClient`].

mod basic;
pub mod auth;

pub use basic::BasicClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Request, Response};
use tracing::{debug, info};

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// GETs `url` and returns the body. Non-2xx statuses are errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Reads `source` from the network when it is an http(s) URL, otherwise
/// from the local filesystem.
pub async fn load_source<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Vec<u8>> {
    let bytes = if is_url(source) {
        info!(url = source, "Downloading");
        fetch_bytes(client, source)
            .await
            .with_context(|| format!("failed to download {source}"))?
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {source}"))?
    };
    debug!(source, bytes = bytes.len(), "Loaded source");
    Ok(bytes)
}
