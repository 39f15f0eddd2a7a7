use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{Client, Response};
use tokio::time::timeout;

use crate::error::RenderError;
use crate::process::{MAX_DIAGNOSTICS, truncate};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-exchange timeout in seconds, body included
    pub timeout_seconds: u64,
    /// Longest accepted success body; anything longer is an error
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_body_bytes: 50 * 1024 * 1024,
            user_agent: format!("xmlpress/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Async HTTP client for the render service. Requests are never retried.
pub struct AsyncHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl AsyncHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    /// POST `body` to `url` and return the response body of a 2xx answer.
    ///
    /// A 2xx body longer than `max_body_bytes` is rejected whole. Non-2xx
    /// answers become [`RenderError::Status`] carrying the start of the body.
    pub async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<u8>, RenderError> {
        let exchange = async {
            let response = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body)
                .send()
                .await
                .map_err(|e| self.classify(url, e))?;

            let status = response.status();
            if status.is_success() {
                let limit = self.config.max_body_bytes;
                let (bytes, complete) = self.read_body(url, response, limit).await?;
                if complete {
                    Ok(bytes)
                } else {
                    Err(RenderError::OutputTooLarge {
                        target: url.to_string(),
                        limit,
                    })
                }
            } else {
                let (bytes, _) = self.read_body(url, response, MAX_DIAGNOSTICS + 1).await?;
                let text = String::from_utf8_lossy(&bytes);
                Err(RenderError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                    body: truncate(text.trim(), MAX_DIAGNOSTICS),
                })
            }
        };

        timeout(Duration::from_secs(self.config.timeout_seconds), exchange)
            .await
            .map_err(|_| RenderError::Timeout {
                target: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            })?
    }

    /// Read at most `limit` bytes of the body. The flag is false when the
    /// body was longer and reading stopped early.
    async fn read_body(
        &self,
        url: &str,
        response: Response,
        limit: usize,
    ) -> Result<(Vec<u8>, bool), RenderError> {
        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = TryStreamExt::try_next(&mut stream)
            .await
            .map_err(|e| self.classify(url, e))?
        {
            let room = limit - buffer.len();
            if chunk.len() > room {
                buffer.extend_from_slice(&chunk[..room]);
                return Ok((buffer, false));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok((buffer, true))
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> RenderError {
        if error.is_timeout() {
            RenderError::Timeout {
                target: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            }
        } else {
            RenderError::Transport {
                url: url.to_string(),
                details: error.to_string(),
            }
        }
    }
}
