//! Generation client with timeout, retry and backoff.
//!
//! The client wraps a [`Transport`] (one backend call) and a [`Sleeper`]
//! (how backoff waits are spent). Every call runs under the policy's
//! timeout. Failures are classified: rate limiting and timeouts are retried
//! with waits of `base_delay * 2^(attempt - 1)` until the attempt ceiling;
//! every other failure is returned immediately.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quire_core::client::{GenerationClient, GenerationParams, HttpTransport, PromptPayload, RetryPolicy, TokioSleeper};
//! use quire_core::Config;
//!
//! # async fn run() -> quire_core::Result<()> {
//! let config = Config::default();
//! let transport = HttpTransport::new(&config.backend)?;
//! let client = GenerationClient::new(
//!     Arc::new(transport),
//!     Arc::new(TokioSleeper),
//!     RetryPolicy::from(&config.retry),
//! );
//! let text = client
//!     .generate(&PromptPayload::new("You are helpful.", "Say hi", GenerationParams::default()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::RetryConfig;
use crate::Error;

pub use http::HttpTransport;

/// Upper bound on the backoff exponent; keeps the multiplication in range.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Longest response body excerpt kept in a terminal error.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Sampling parameters for one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output ceiling.
    pub max_output_tokens: u32,
    /// Ask for a strict JSON object.
    pub json_mode: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 4096,
            json_mode: false,
        }
    }
}

/// Instructions plus parameters for one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    /// System instructions.
    pub system: String,
    /// User message.
    pub user: String,
    /// Sampling parameters.
    pub params: GenerationParams,
}

impl PromptPayload {
    /// Build a payload.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            params,
        }
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rate limiting or timeout; retry after a backoff wait.
    Retryable,
    /// Anything else; retrying will not help.
    Terminal,
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend answered 429.
    #[error("rate limited")]
    RateLimited,
    /// The call did not complete in time.
    #[error("timed out")]
    Timeout,
    /// Any other non-success status.
    #[error("status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body excerpt.
        body: String,
    },
    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The response envelope could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Classify the failure.
    ///
    /// Server errors and connection failures are terminal.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited | Self::Timeout | Self::Status { code: 429, .. } => {
                FailureClass::Retryable
            },
            Self::Status { .. } | Self::Connect(_) | Self::Malformed(_) => FailureClass::Terminal,
        }
    }
}

/// A single call to the text-generation backend.
///
/// Implementations must not retry; the [`GenerationClient`] owns that.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the payload and return the generated text.
    async fn complete(&self, payload: &PromptPayload) -> Result<String, TransportError>;
}

/// How backoff and pacing waits are spent.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timeout and retry settings for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first. Never below 1.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub base_delay: Duration,
    /// Timeout for each call.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// A single attempt with the given timeout.
    #[must_use]
    pub const fn single_attempt(call_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            call_timeout,
        }
    }

    /// Wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Final failure of a generation after the retry policy was applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause} (after {attempts} attempt(s))")]
pub struct GenerationError {
    /// Failure of the last attempt.
    pub cause: TransportError,
    /// Number of calls made.
    pub attempts: u32,
}

impl GenerationError {
    /// Classification of the last failure.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        self.cause.class()
    }
}

impl From<GenerationError> for Error {
    fn from(err: GenerationError) -> Self {
        let attempts = err.attempts;
        match err.cause {
            TransportError::RateLimited | TransportError::Status { code: 429, .. } => {
                Self::UpstreamRateLimited { attempts }
            },
            TransportError::Timeout => Self::UpstreamTimeout { attempts },
            TransportError::Status { code, body } => Self::UpstreamTerminal {
                status: Some(code),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            },
            TransportError::Connect(message) | TransportError::Malformed(message) => {
                Self::UpstreamTerminal {
                    status: None,
                    message,
                }
            },
        }
    }
}

/// Backend client applying timeouts and the retry policy.
#[derive(Clone)]
pub struct GenerationClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl GenerationClient {
    /// Create a client.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, sleeper: Arc<dyn Sleeper>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    /// Default retry policy of this client.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sleeper used for backoff waits; shared with the burst scheduler.
    #[must_use]
    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    /// Generate text under the default policy.
    pub async fn generate(&self, payload: &PromptPayload) -> Result<String, GenerationError> {
        self.generate_with(payload, self.policy).await
    }

    /// Generate text under an explicit policy.
    #[instrument(level = "debug", skip_all, fields(max_attempts = policy.max_attempts))]
    pub async fn generate_with(
        &self,
        payload: &PromptPayload,
        policy: RetryPolicy,
    ) -> Result<String, GenerationError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(policy.call_timeout, self.transport.complete(payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout),
                };

            let cause = match outcome {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(attempt, "generation succeeded after retry");
                    }
                    return Ok(text);
                },
                Err(cause) => cause,
            };

            if cause.class() == FailureClass::Terminal || attempt >= max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    error = %cause,
                    "generation failed"
                );
                return Err(GenerationError {
                    cause,
                    attempts: attempt,
                });
            }

            let delay = policy.delay_after(attempt);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %cause,
                "retryable generation failure; backing off"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
