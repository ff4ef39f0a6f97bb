//! Harbor HTTP Client
//!
//! A type-safe HTTP client for the unary endpoints of the Harbor control
//! plane. Streaming endpoints (job streams, runner streams, exec) are
//! WebSockets and are not covered here.
//!
//! # Example
//!
//! ```no_run
//! use harbor_client::HarborClient;
//! use harbor_core::domain::job::ApplicationRef;
//! use harbor_core::domain::operation::Operation;
//! use harbor_core::dto::job::{JobTemplate, QueueJobRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = HarborClient::new("http://localhost:9701").with_token("hbr_...");
//!
//!     let template = JobTemplate::new(ApplicationRef::new("shop", "web"), Operation::Up);
//!     let queued = client.queue_job(QueueJobRequest::new(template)).await?;
//!
//!     println!("Queued job: {}", queued.job_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod projects;
mod runners;
mod tasks;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the Harbor API
///
/// Methods are organized into logical groups:
/// - Job queueing, inspection and cancellation
/// - Runner registration and adoption
/// - On-demand runner tasks
/// - Projects, on-demand runner profiles and runner config
#[derive(Debug, Clone)]
pub struct HarborClient {
    /// Base URL of the server (e.g., "http://localhost:9701")
    base_url: String,
    /// Bearer token sent with every request
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl HarborClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use harbor_client::HarborClient;
    ///
    /// let client = HarborClient::new("http://localhost:9701");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    /// Authenticate every request with `token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn put(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.put(self.url(path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.delete(self.url(path)))
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!(status = status.as_u16(), "Request failed");
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HarborClient::new("http://localhost:9701");
        assert_eq!(client.base_url(), "http://localhost:9701");
        assert!(client.token.is_none());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HarborClient::new("http://localhost:9701/");
        assert_eq!(client.url("/job/list"), "http://localhost:9701/job/list");
    }

    #[test]
    fn test_token_is_sent_as_bearer() {
        let client = HarborClient::new("http://localhost:9701").with_token("hbr_abc");
        let request = client.get("/runner/list").build().unwrap();
        assert_eq!(
            request.headers()["authorization"].to_str().unwrap(),
            "Bearer hbr_abc"
        );
    }
}
