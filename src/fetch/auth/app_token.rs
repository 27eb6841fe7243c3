use crate::fetch::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, InvalidHeaderValue};

/// Socrata's application token header.
pub const APP_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-app-token");

/// An [`HttpClient`] wrapper that sends a Socrata application token.
///
/// Requests without a token are accepted by Socrata but throttled much
/// harder, so an empty token is simply not sent.
pub struct AppToken<C> {
    inner: C,
    token: Option<HeaderValue>,
}

impl<C> AppToken<C> {
    /// Fails if `token` contains characters not allowed in a header value.
    pub fn new(inner: C, token: &str) -> Result<Self, InvalidHeaderValue> {
        let token = match token.trim() {
            "" => None,
            t => {
                let mut value = HeaderValue::from_str(t)?;
                value.set_sensitive(true);
                Some(value)
            }
        };
        Ok(Self { inner, token })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for AppToken<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        if let Some(token) = &self.token {
            req.headers_mut().insert(APP_TOKEN_HEADER, token.clone());
        }
        self.inner.execute(req).await
    }
}
