//! Request execution with bounded retries.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::super::ProviderError;
use super::DigitalOceanClient;
use super::wire::WireError;

/// Outcome of a single HTTP exchange that did not succeed.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum Failure {
    /// Worth retrying, optionally after a provider-supplied delay.
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Surfaced to the caller immediately.
    Fatal(ProviderError),
}

/// Maps a non-success status to a retry decision.
pub(super) fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    resource: &str,
) -> Failure {
    let message = error_message(body);
    match status.as_u16() {
        401 | 403 => Failure::Fatal(ProviderError::Authentication { message }),
        404 => Failure::Fatal(ProviderError::NotFound {
            resource: resource.to_owned(),
        }),
        409 | 422 => Failure::Fatal(ProviderError::Conflict { message }),
        429 => Failure::Transient {
            message: format!("rate limited: {message}"),
            retry_after: retry_after(headers),
        },
        code if status.is_server_error() => Failure::Transient {
            message: format!("status {code}: {message}"),
            retry_after: None,
        },
        code => Failure::Fatal(ProviderError::Rejected {
            status: code,
            message,
        }),
    }
}

/// Reads a `Retry-After` hint expressed in whole seconds.
pub(super) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<WireError>(body).map_or_else(
        |_| String::from_utf8_lossy(body).trim().to_owned(),
        |parsed| parsed.message,
    )
}

pub(super) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|err| ProviderError::Decode {
        message: err.to_string(),
    })
}

impl DigitalOceanClient {
    /// Sends a request, retrying transient failures, and returns the body of
    /// the first successful response.
    pub(super) async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        authenticated: bool,
    ) -> Result<Vec<u8>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let (message, hint) = match self
                .send_once(method.clone(), url, body, authenticated)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::Transient {
                    message,
                    retry_after,
                }) => (message, retry_after),
            };

            if !self.retry.should_retry(attempt) {
                return Err(ProviderError::Unavailable {
                    attempts: attempt,
                    message,
                });
            }
            let delay = self.retry.delay_after(attempt, hint);
            warn!(%method, url, attempt, ?delay, %message, "retrying provider request");
            sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        authenticated: bool,
    ) -> Result<Vec<u8>, Failure> {
        let mut request = self.http.request(method, url);
        if authenticated {
            request = request.bearer_auth(&self.token);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|err| Failure::Transient {
            message: err.to_string(),
            retry_after: None,
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|err| Failure::Transient {
            message: err.to_string(),
            retry_after: None,
        })?;

        if status.is_success() {
            debug!(url, status = status.as_u16(), "provider request succeeded");
            return Ok(bytes.to_vec());
        }
        Err(classify(status, &headers, &bytes, url))
    }

    pub(super) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let body = self.send(Method::GET, url, None, true).await?;
        decode(&body)
    }

    pub(super) async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let body = self.send(Method::POST, url, Some(payload), true).await?;
        decode(&body)
    }
}

/// Serialises a request body up front so retries resend identical bytes.
pub(super) fn to_payload<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ProviderError> {
    serde_json::to_value(value).map_err(|err| ProviderError::InvalidRequest(err.to_string()))
}
