use std::fmt::{Debug, Formatter};
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, error, instrument, trace, warn};

use crate::google_drive::CredentialProvider;
use crate::google_drive::transfer::{
    HttpTransport, TransferDestination, TransferRequest, TransferResponse,
};
use crate::prelude::*;

const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];
/// Upper bound of the random part added to every backoff delay
const MAX_JITTER_MS: u64 = 1000;

/// What the executor does with the result of one attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RetryClass {
    Success,
    ServerError,
    RateLimited,
    AuthExpired,
    Fatal,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

pub fn classify(response: &TransferResponse) -> RetryClass {
    match response.status {
        0..=399 => RetryClass::Success,
        401 => RetryClass::AuthExpired,
        403 => {
            // an unreadable body carries no rate limit reason
            let rate_limited = serde_json::from_slice::<ErrorEnvelope>(&response.body)
                .map(|envelope| {
                    envelope
                        .error
                        .errors
                        .iter()
                        .any(|e| RATE_LIMIT_REASONS.contains(&e.reason.as_str()))
                })
                .unwrap_or(false);
            if rate_limited {
                RetryClass::RateLimited
            } else {
                RetryClass::Fatal
            }
        }
        500.. => RetryClass::ServerError,
        _ => RetryClass::Fatal,
    }
}

/// Issues remote requests with the retry policy of the drive API.
///
/// Server errors and rate limiting back off exponentially, an expired token is refreshed once per
/// attempt and retried right away. Everything else is final.
pub struct TransferExecutor {
    transport: Arc<dyn HttpTransport>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    max_tries: u32,
    backoff_base: Duration,
}

impl TransferExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialProvider>,
        max_tries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            transport,
            credentials: Some(credentials),
            max_tries: max_tries.max(1),
            backoff_base,
        }
    }

    /// Executor without a bearer token, used to talk to the credential endpoints themselves.
    pub fn unauthenticated(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            credentials: None,
            max_tries: 5,
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Delay before retry number `attempt + 1` without the random jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(1..=MAX_JITTER_MS);
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    async fn authorize(&self, request: &mut TransferRequest) {
        request
            .headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("authorization"));
        let Some(credentials) = &self.credentials else {
            return;
        };
        if let Some(token) = credentials.current_access_token().await {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
    }

    #[instrument(skip(self, request), fields(request = %request))]
    pub async fn execute(&self, request: &mut TransferRequest) -> EngineResult<TransferResponse> {
        let mut attempt: u32 = 0;
        loop {
            self.authorize(request).await;
            reset_destination(&request.destination)?;
            trace!("attempt {} of {}", attempt + 1, self.max_tries);
            let response = match self.transport.execute(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("no response for {}: {:#}", request, e);
                    return Err(EngineError::remote(format!("{}: {:#}", request, e)));
                }
            };

            let class = classify(&response);
            debug!("status {} classified as {:?}", response.status, class);
            match class {
                RetryClass::Success => return Ok(response),
                RetryClass::Fatal => return Err(failure(request, &response)),
                RetryClass::AuthExpired if !request.retry_on_auth_error => {
                    return Err(failure(request, &response));
                }
                _ if attempt + 1 >= self.max_tries => {
                    warn!("giving up on {} after {} attempts", request, attempt + 1);
                    return Err(failure(request, &response));
                }
                RetryClass::ServerError | RetryClass::RateLimited => {
                    let delay = self.backoff_delay(attempt);
                    debug!("retrying {} in {:?}", request, delay);
                    tokio::time::sleep(delay).await;
                }
                RetryClass::AuthExpired => {
                    let Some(credentials) = &self.credentials else {
                        return Err(failure(request, &response));
                    };
                    if let Err(e) = credentials.refresh().await {
                        error!("could not refresh credentials: {:#}", e);
                        return Err(failure(request, &response));
                    }
                    debug!("credentials refreshed, retrying {}", request);
                }
            }
            attempt += 1;
        }
    }
}

fn reset_destination(destination: &TransferDestination) -> EngineResult<()> {
    if let TransferDestination::File(file) = destination {
        file.set_len(0)?;
        let mut file = file;
        file.seek(SeekFrom::Start(0))?;
    }
    Ok(())
}

fn failure(request: &TransferRequest, response: &TransferResponse) -> EngineError {
    if response.status == 404 {
        return EngineError::NotFound(request.url.clone());
    }
    let body = String::from_utf8_lossy(&response.body);
    let body: String = body.chars().take(200).collect();
    EngineError::remote(format!("{} returned {}: {}", request, response.status, body))
}

impl Debug for TransferExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TransferExecutor {{ max_tries: {}, backoff_base: {:?} }}",
            self.max_tries, self.backoff_base
        )
    }
}
