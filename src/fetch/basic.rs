use super::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

/// Plain [`reqwest::Client`] with no authentication.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }

    /// A client whose requests fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self(reqwest::Client::builder().timeout(timeout).build()?))
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
