//! The shared HTTP client used by registry and mirror suppliers.
//!
//! Server errors (5xx) are retried with exponential backoff by the retry
//! middleware; connection failures are fatal on first sight. Metadata
//! requests additionally run under an idle timeout and a total deadline.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{
    default_on_request_success, policies::ExponentialBackoff, Retryable, RetryableStrategy,
    RetryTransientMiddleware,
};
use url::Url;

use super::SupplierError;

/// How often a transient response is retried before giving up.
pub const MAX_RETRIES: u32 = 3;
/// Abort a metadata request making no progress for this long.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(8);
/// Abort a metadata request outlasting this in total.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("drover/", env!("CARGO_PKG_VERSION"));

/// Retry server errors only. Connection failures must surface immediately,
/// so everything that is not an HTTP response stays fatal.
struct RetryServerErrors;

impl RetryableStrategy for RetryServerErrors {
    fn handle(
        &self,
        res: &Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) => default_on_request_success(response),
            Err(_) => Some(Retryable::Fatal),
        }
    }
}

/// HTTP client with the supplier retry discipline baked in.
#[derive(Clone)]
pub struct HttpClient {
    client: ClientWithMiddleware,
    total_timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, SupplierError> {
        Self::with_timeouts(DEFAULT_IDLE_TIMEOUT, DEFAULT_TOTAL_TIMEOUT)
    }

    pub fn with_timeouts(idle: Duration, total: Duration) -> Result<Self, SupplierError> {
        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .read_timeout(idle)
            .connect_timeout(idle)
            .build()
            .map_err(SupplierError::ClientSetup)?;
        let client = reqwest_middleware::ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES),
                RetryServerErrors,
            ))
            .build();
        Ok(HttpClient {
            client,
            total_timeout: total,
        })
    }

    /// Fetch JSON metadata under the idle and total time budgets.
    pub async fn get_json(&self, url: &Url) -> Result<serde_json::Value, SupplierError> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|source| SupplierError::Http {
                    url: url.clone(),
                    source,
                })?;
            check_status(url, &response)?;
            response
                .json()
                .await
                .map_err(|source| SupplierError::InvalidMetadata {
                    url: url.clone(),
                    reason: source.to_string(),
                })
        };
        tokio::time::timeout(self.total_timeout, request)
            .await
            .map_err(|_| SupplierError::Timeout {
                url: url.clone(),
                limit: self.total_timeout,
            })?
    }

    /// Fetch a body as text under the same budgets (mirror metadata).
    pub async fn get_text(&self, url: &Url) -> Result<String, SupplierError> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|source| SupplierError::Http {
                    url: url.clone(),
                    source,
                })?;
            check_status(url, &response)?;
            response
                .text()
                .await
                .map_err(|source| SupplierError::InvalidMetadata {
                    url: url.clone(),
                    reason: source.to_string(),
                })
        };
        tokio::time::timeout(self.total_timeout, request)
            .await
            .map_err(|_| SupplierError::Timeout {
                url: url.clone(),
                limit: self.total_timeout,
            })?
    }

    /// Download a body to a file. Only the idle timeout applies; large
    /// archives may legitimately take longer than the metadata deadline.
    pub async fn download(&self, url: &Url, dest: &std::path::Path) -> Result<(), SupplierError> {
        use tokio::io::AsyncWriteExt;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| SupplierError::Http {
                url: url.clone(),
                source,
            })?;
        check_status(url, &response)?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| SupplierError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        let mut response = response;
        while let Some(chunk) =
            response
                .chunk()
                .await
                .map_err(|source| SupplierError::Http {
                    url: url.clone(),
                    source: reqwest_middleware::Error::Reqwest(source),
                })?
        {
            file.write_all(&chunk)
                .await
                .map_err(|source| SupplierError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| SupplierError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

fn check_status(url: &Url, response: &reqwest::Response) -> Result<(), SupplierError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(SupplierError::NotFound { url: url.clone() });
    }
    if !status.is_success() {
        return Err(SupplierError::Status {
            url: url.clone(),
            status,
        });
    }
    Ok(())
}
