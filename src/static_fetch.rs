//! Bounded static retrieval
//!
//! One GET per call, raced against a wall-clock timer. The body is streamed
//! chunk by chunk and the running total is compared with the ceiling after
//! every chunk, so a missing or under-reported `Content-Length` cannot push an
//! oversized document through.

use crate::{Admission, AdmissionGuard, Config, ScrapeError, ValidatedUrl};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.5";
const MAX_REDIRECTS: usize = 10;

/// Markup retrieved by the static path. `byte_length` never exceeds the
/// configured ceiling.
#[derive(Debug, Clone)]
pub struct StaticDocument {
    pub html: String,
    pub byte_length: usize,
    pub content_type: String,
    pub final_url: String,
    pub status: u16,
    pub duration: Duration,
}

pub struct StaticFetcher {
    client: Client,
    max_response_size: usize,
    fetch_timeout: Duration,
}

impl StaticFetcher {
    /// `guard` is consulted for redirect hops only when
    /// `config.admission.revalidate_redirects` is set; otherwise redirects
    /// are followed with the client's default cap and no re-admission.
    pub fn new(config: &Config, guard: &AdmissionGuard) -> Result<Self, ScrapeError> {
        let redirect_policy = if config.admission.revalidate_redirects {
            let guard = guard.clone();
            Policy::custom(move |attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                // Lexical only: the policy runs on a runtime worker, where a
                // blocking DNS lookup is not allowed.
                match guard.validate_lexical(attempt.url().as_str()) {
                    Admission::Allowed(_) => attempt.follow(),
                    Admission::Rejected(rejection) => {
                        attempt.error(format!("Redirect blocked: {rejection}"))
                    }
                }
            })
        } else {
            Policy::default()
        };

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect_policy)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ScrapeError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            client,
            max_response_size: config.max_response_size,
            fetch_timeout: config.fetch_timeout,
        })
    }

    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    /// Fetch `url`, failing with `Timeout` once the configured budget elapses.
    /// Dropping the in-flight future on timeout cancels the request; the
    /// timer is dropped on every path.
    pub async fn fetch(&self, url: &ValidatedUrl) -> Result<StaticDocument, ScrapeError> {
        let start_time = Instant::now();

        let document = match timeout(self.fetch_timeout, self.fetch_inner(url, start_time)).await {
            Ok(result) => result?,
            Err(_) => return Err(ScrapeError::Timeout(self.fetch_timeout)),
        };

        info!(
            "Fetched {} ({} bytes, {}) in {:?}",
            url,
            document.byte_length,
            document.content_type,
            document.duration
        );
        Ok(document)
    }

    async fn fetch_inner(
        &self,
        url: &ValidatedUrl,
        start_time: Instant,
    ) -> Result<StaticDocument, ScrapeError> {
        let response = self
            .client
            .get(url.as_url().clone())
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::UpstreamHttp {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if let Some(content_type) = &content_type {
            if !is_html_content_type(content_type) {
                return Err(ScrapeError::UnsupportedContentType(content_type.clone()));
            }
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > self.max_response_size {
                debug!(
                    "Declared length {} exceeds ceiling {}",
                    declared, self.max_response_size
                );
                return Err(ScrapeError::TooLarge(self.max_response_size));
            }
        }

        let final_url = response.url().to_string();
        let body = self.read_bounded(response).await?;
        let byte_length = body.len();

        Ok(StaticDocument {
            html: String::from_utf8_lossy(&body).into_owned(),
            byte_length,
            content_type: content_type.unwrap_or_default(),
            final_url,
            status: status.as_u16(),
            duration: start_time.elapsed(),
        })
    }

    async fn read_bounded(&self, mut response: Response) -> Result<Vec<u8>, ScrapeError> {
        let mut body = Vec::new();
        let mut total: usize = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.classify_transport_error(e))?
        {
            total += chunk.len();
            if total > self.max_response_size {
                debug!(
                    "Aborting body read at {} bytes (ceiling {})",
                    total, self.max_response_size
                );
                return Err(ScrapeError::TooLarge(self.max_response_size));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> ScrapeError {
        if err.is_timeout() {
            ScrapeError::Timeout(self.fetch_timeout)
        } else {
            err.into()
        }
    }
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml")
}
