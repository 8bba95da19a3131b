//! Error types and handling for quire-core operations.
//!
//! Errors are split along the line the pipeline cares about: what happened on the
//! synchronous request path (validation, safety, shell generation) and what
//! happened in the background (section generation). Each variant carries enough
//! context to decide whether a retry could help.
//!
//! ## Error Categories
//!
//! - **Input**: the request failed validation before any backend call
//! - **Safety**: the intent gate rejected the topic
//! - **Upstream**: the text-generation backend was rate limited, timed out, or
//!   failed terminally
//! - **Section**: a background section exhausted its retries
//! - **Storage / Config / Serialization / I/O**: ambient failures
//!
//! Malformed backend output is *not* an error. The extractor always produces a
//! usable shell and records what it had to repair as
//! [`ShellWarning`](crate::ShellWarning) values.
//!
//! ## Recovery Hints
//!
//! ```rust
//! use quire_core::Error;
//!
//! let err = Error::UpstreamRateLimited { attempts: 4 };
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), "upstream_rate_limited");
//!
//! let err = Error::InvalidInput("topic must not be empty".into());
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

/// The main error type for quire-core operations.
///
/// `Display` is the diagnostic message meant for logs. Use
/// [`Error::user_message`] for text that is safe to show to the person who
/// submitted the request.
#[derive(Error, Debug)]
pub enum Error {
    /// The request failed validation.
    ///
    /// Raised before any backend call is made: empty or over-long topic, a
    /// missing or short session token, or a malformed document id.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The intent safety gate rejected the topic.
    #[error("Request rejected by safety gate: {reason}")]
    SafetyRejected {
        /// Reason reported by the classifier.
        reason: String,
    },

    /// The backend kept answering 429 until the retry ceiling was reached.
    #[error("Upstream rate limited after {attempts} attempts")]
    UpstreamRateLimited {
        /// Number of calls made, including the first.
        attempts: u32,
    },

    /// The backend kept timing out until the retry ceiling was reached.
    #[error("Upstream timed out after {attempts} attempts")]
    UpstreamTimeout {
        /// Number of calls made, including the first.
        attempts: u32,
    },

    /// The backend returned a non-retryable failure.
    ///
    /// Covers 4xx responses other than 429, server errors, connection
    /// failures, and response envelopes that could not be decoded.
    #[error("Upstream failure{}: {message}", status_suffix(.status))]
    UpstreamTerminal {
        /// HTTP-like status, when the backend produced one.
        status: Option<u16>,
        /// Diagnostic message.
        message: String,
    },

    /// A background section could not be produced.
    ///
    /// Never surfaced on the synchronous path; recorded against the section.
    #[error("Section {index} generation failed: {reason}")]
    SectionGenerationFailed {
        /// Outline index of the section.
        index: u32,
        /// What went wrong.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence gateway operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Requested document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Only the retryable upstream classes (rate limiting and timeouts) and
    /// transient I/O failures qualify. Everything else is permanent for the
    /// request that produced it.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::UpstreamRateLimited { .. } | Self::UpstreamTimeout { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a stable string identifier.
    ///
    /// Used as the `category` field on structured log events.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::SafetyRejected { .. } => "safety_rejected",
            Self::UpstreamRateLimited { .. } => "upstream_rate_limited",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamTerminal { .. } => "upstream_terminal",
            Self::SectionGenerationFailed { .. } => "section_generation_failed",
            Self::Io(_) => "io",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::NotFound(_) => "not_found",
            Self::Other(_) => "other",
        }
    }

    /// Message suitable for the person who submitted the request.
    ///
    /// Validation and safety messages are passed through because they describe
    /// the caller's own input. Backend and storage details stay in the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::SafetyRejected { .. } => {
                "This topic can't be turned into a document. Please choose a different topic."
                    .to_string()
            },
            Self::UpstreamRateLimited { .. } | Self::UpstreamTimeout { .. } => {
                "The writing service is busy right now. Please try again in a few minutes."
                    .to_string()
            },
            Self::UpstreamTerminal { .. } | Self::SectionGenerationFailed { .. } => {
                "We couldn't generate this document. Please try again later.".to_string()
            },
            Self::NotFound(_) => "That document could not be found.".to_string(),
            Self::Io(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Other(_) => "Something went wrong on our side. Please try again.".to_string(),
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display_formatting() {
        let errors = vec![
            (Error::InvalidInput("topic too long".into()), "Invalid input"),
            (
                Error::SafetyRejected {
                    reason: "weapons".into(),
                },
                "safety gate",
            ),
            (Error::UpstreamRateLimited { attempts: 4 }, "rate limited"),
            (Error::UpstreamTimeout { attempts: 3 }, "timed out"),
            (Error::Storage("disk full".into()), "Storage error"),
            (Error::Config("bad value".into()), "Configuration error"),
        ];

        for (error, needle) in errors {
            let rendered = error.to_string();
            assert!(
                rendered.contains(needle),
                "expected {rendered:?} to contain {needle:?}"
            );
        }
    }

    #[test]
    fn test_upstream_terminal_display_includes_status_when_present() {
        let with_status = Error::UpstreamTerminal {
            status: Some(400),
            message: "bad request".into(),
        };
        assert_eq!(with_status.to_string(), "Upstream failure (400): bad request");

        let without_status = Error::UpstreamTerminal {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(
            without_status.to_string(),
            "Upstream failure: connection refused"
        );
    }

    #[test]
    fn test_error_categories() {
        let cases = vec![
            (Error::InvalidInput("x".into()), "invalid_input"),
            (
                Error::SafetyRejected { reason: "x".into() },
                "safety_rejected",
            ),
            (
                Error::UpstreamRateLimited { attempts: 1 },
                "upstream_rate_limited",
            ),
            (Error::UpstreamTimeout { attempts: 1 }, "upstream_timeout"),
            (
                Error::UpstreamTerminal {
                    status: None,
                    message: "x".into(),
                },
                "upstream_terminal",
            ),
            (
                Error::SectionGenerationFailed {
                    index: 3,
                    reason: "x".into(),
                },
                "section_generation_failed",
            ),
            (Error::Io(io::Error::other("x")), "io"),
            (Error::Storage("x".into()), "storage"),
            (Error::Config("x".into()), "config"),
            (Error::Serialization("x".into()), "serialization"),
            (Error::NotFound("x".into()), "not_found"),
            (Error::Other("x".into()), "other"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.category(), expected);
        }
    }

    #[test]
    fn test_error_recoverability() {
        let recoverable = vec![
            Error::UpstreamRateLimited { attempts: 4 },
            Error::UpstreamTimeout { attempts: 4 },
            Error::Io(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
        ];
        let permanent = vec![
            Error::InvalidInput("x".into()),
            Error::SafetyRejected { reason: "x".into() },
            Error::UpstreamTerminal {
                status: Some(401),
                message: "x".into(),
            },
            Error::Io(io::Error::new(io::ErrorKind::NotFound, "missing")),
            Error::Storage("x".into()),
        ];

        for error in recoverable {
            assert!(error.is_recoverable(), "Expected {error:?} to be recoverable");
        }
        for error in permanent {
            assert!(!error.is_recoverable(), "Expected {error:?} to be permanent");
        }
    }

    #[test]
    fn test_user_message_hides_diagnostics() {
        let err = Error::UpstreamTerminal {
            status: Some(401),
            message: "invalid api key sk-live-123".into(),
        };
        let message = err.user_message();
        assert!(!message.contains("sk-live"));
        assert!(!message.contains("401"));

        let err = Error::Storage("/var/lib/quire: permission denied".into());
        assert!(!err.user_message().contains("/var/lib"));
    }

    #[test]
    fn test_user_message_passes_validation_text_through() {
        let err = Error::InvalidInput("Topic must be at most 200 characters".into());
        assert_eq!(err.user_message(), "Topic must be at most 200 characters");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
