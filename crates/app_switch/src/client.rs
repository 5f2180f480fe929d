//! Network execution with bounded retries.
//!
//! [`RetryingRequestClient`] owns the retry bookkeeping and the mapping from
//! HTTP status to the error taxonomy; the wire itself sits behind
//! [`HttpDispatch`] so tests can run without a network.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use error_stack::{report, ResultExt};
use masking::PeekInterface;
use switch_env::logger;

use crate::{
    consts,
    errors::{CustomResult, SwitchError},
    request::{Method, Request},
    types::GatewayResponse,
};

/// Retry behavior of one `send` call. Part of the call, not of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Single attempt.
    NoRetry,
    /// Up to this many attempts in total for retryable failures.
    RetryUpTo(u8),
}

/// Transport seam: send one request, return status and body or a transport
/// error. Implementations must not retry.
#[async_trait::async_trait]
pub trait HttpDispatch: Send + Sync {
    async fn dispatch(&self, request: &Request) -> CustomResult<GatewayResponse, SwitchError>;
}

/// Production dispatch over `reqwest`.
#[derive(Debug)]
pub struct ReqwestDispatch {
    client: reqwest::Client,
}

impl ReqwestDispatch {
    /// Build the underlying client with the standard request timeout.
    pub fn new() -> CustomResult<Self, SwitchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(consts::REQUEST_TIMEOUT_SECS))
            .build()
            .change_context(SwitchError::TransportError)
            .attach_printable("Failed to construct the HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpDispatch for ReqwestDispatch {
    async fn dispatch(&self, request: &Request) -> CustomResult<GatewayResponse, SwitchError> {
        let url = reqwest::Url::parse(&request.url).change_context(SwitchError::UrlParsingFailed)?;

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value.clone().into_inner());
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(http::header::CONTENT_TYPE.as_str(), content_type.as_ref());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.peek().clone());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() || error.is_connect() {
                report!(SwitchError::TransportError)
                    .attach_printable("Connectivity failure while reaching the gateway")
            } else {
                report!(SwitchError::TransportError).attach_printable(error.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        let headers = Some(response.headers().to_owned());
        let body = response
            .bytes()
            .await
            .change_context(SwitchError::TransportError)
            .attach_printable("Connection failed while reading the response body")?;

        Ok(GatewayResponse {
            status_code,
            headers,
            body,
        })
    }
}

/// Executes gateway calls with bounded, policy-driven retries.
///
/// Bookkeeping is keyed by request URL: the counter resets whenever a new
/// top-level `send` for that URL starts (not on each retry) and is removed
/// once the attempt sequence terminates. The counters are not shared across
/// client instances.
pub struct RetryingRequestClient {
    dispatch: std::sync::Arc<dyn HttpDispatch>,
    attempts: Mutex<HashMap<String, u8>>,
}

impl std::fmt::Debug for RetryingRequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingRequestClient").finish_non_exhaustive()
    }
}

impl RetryingRequestClient {
    pub fn new(dispatch: std::sync::Arc<dyn HttpDispatch>) -> Self {
        Self {
            dispatch,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Send `request`, retrying per `policy`, and classify the final answer
    /// into the error taxonomy. The request body is wiped from memory when
    /// the attempt sequence terminates, whatever the outcome.
    pub async fn send(
        &self,
        request: Request,
        policy: RetryPolicy,
    ) -> CustomResult<GatewayResponse, SwitchError> {
        let retry_key = request.url.clone();
        self.reset_counter(&retry_key);

        let result = self.run_attempts(&request, policy, &retry_key).await;

        self.remove_counter(&retry_key);
        // Dropping the request zeroizes the StrongSecret body.
        drop(request);
        result
    }

    async fn run_attempts(
        &self,
        request: &Request,
        policy: RetryPolicy,
        retry_key: &str,
    ) -> CustomResult<GatewayResponse, SwitchError> {
        loop {
            let attempt = self.record_attempt(retry_key);
            let outcome = match self.dispatch.dispatch(request).await {
                Ok(response) => classify_response(response),
                Err(error) => Err(error),
            };

            match outcome {
                Ok(response) => {
                    logger::debug!(url = %request.url, attempt, status_code = response.status_code);
                    return Ok(response);
                }
                Err(error) => {
                    let retryable = error.current_context().is_retryable();
                    let limit = match policy {
                        RetryPolicy::NoRetry => return Err(error),
                        RetryPolicy::RetryUpTo(limit) => limit,
                    };
                    if !retryable {
                        return Err(error);
                    }
                    if attempt >= limit {
                        return Err(error.change_context(SwitchError::RetryBudgetExceeded));
                    }
                    logger::warn!(url = %request.url, attempt, "Retrying gateway request");
                    tokio::time::sleep(Duration::from_millis(consts::RETRY_DELAY_MILLIS)).await;
                }
            }
        }
    }

    fn reset_counter(&self, retry_key: &str) {
        self.lock_attempts().insert(retry_key.to_string(), 0);
    }

    fn record_attempt(&self, retry_key: &str) -> u8 {
        let mut attempts = self.lock_attempts();
        let count = attempts.entry(retry_key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn remove_counter(&self, retry_key: &str) {
        self.lock_attempts().remove(retry_key);
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, HashMap<String, u8>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Map an HTTP status onto the closed error taxonomy.
///
/// 429 is terminal here, not retryable, even under `RetryUpTo`. The upstream
/// protocol specifies it that way; do not change without product
/// confirmation.
fn classify_response(
    response: GatewayResponse,
) -> CustomResult<GatewayResponse, SwitchError> {
    match response.status_code {
        200..=299 => Ok(response),
        401 => Err(report!(SwitchError::AuthenticationError)),
        403 => Err(report!(SwitchError::AuthorizationError)),
        429 => Err(report!(SwitchError::RateLimited)),
        400 | 422 => Err(report!(SwitchError::MalformedRequest {
            detail: String::from_utf8_lossy(&response.body).into_owned(),
        })),
        status_code @ 500..=599 => Err(report!(SwitchError::ServerError { status_code })),
        _ => Err(report!(SwitchError::MalformedRequest {
            detail: format!("Unexpected HTTP status {}", response.status_code),
        })),
    }
}
