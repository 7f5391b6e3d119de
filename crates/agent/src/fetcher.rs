//! Payload retrieval.
//!
//! [`PayloadSource`] opens a streamed payload for a job id;
//! [`HttpPayloadSource`] implements it as `GET <base>/printer/<job-id>` with
//! a bearer credential. Only status 200 is accepted.

use async_trait::async_trait;
use bytes::Bytes;
use printlink_core::protocol::payload_url;

/// Opens payload streams for jobs.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Issue the request and return the body once headers are in.
    async fn open(&self, job_id: &str) -> Result<Box<dyn PayloadBody>, FetchError>;
}

/// A streamed payload body, read chunk by chunk in arrival order.
#[async_trait]
pub trait PayloadBody: Send {
    /// Next chunk, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset mid-stream, ...).
    #[error("{0}")]
    Transport(String),

    /// The server answered with something other than 200.
    #[error("Bad status: {0}")]
    BadStatus(u16),
}

/// HTTP payload source for the control plane.
pub struct HttpPayloadSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpPayloadSource {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn open(&self, job_id: &str) -> Result<Box<dyn PayloadBody>, FetchError> {
        let response = self
            .client
            .get(payload_url(&self.base_url, job_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        Ok(Box::new(HttpPayloadBody { response }))
    }
}

struct HttpPayloadBody {
    response: reqwest::Response,
}

#[async_trait]
impl PayloadBody for HttpPayloadBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        self.response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}
