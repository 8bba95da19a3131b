//! # quire-core
//!
//! Core pipeline for quire: turns a short topic into a long-form document
//! using a text-generation backend.
//!
//! A request produces a document *shell* synchronously (title, subtitle,
//! outline and the first section). When the full document is requested, the
//! remaining sections are generated in the background in small concurrent
//! bursts and written through a persistence gateway as they complete.
//!
//! ## Architecture
//!
//! - **Validation and safety**: request checks and an intent gate that runs
//!   before any content is generated
//! - **Classification**: keyword-based topic category and subtitle
//! - **Generation client**: backend calls with timeouts, classified failures
//!   and exponential backoff
//! - **Extraction**: turns messy backend output into a complete shell
//! - **Bursts**: grouped background generation with cancellation
//! - **Persistence**: a gateway trait with memory and file implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quire_core::{BurstSupervisor, Config, GenerationRequest, GenerationService};
//!
//! # async fn run() -> quire_core::Result<()> {
//! let config = Config::load()?;
//! let service = GenerationService::from_config(&config, BurstSupervisor::new())?;
//!
//! let outcome = service
//!     .handle(GenerationRequest::new("Sourdough Baking", "session-0123456789").full_document(true))
//!     .await?;
//! println!("{}", outcome.response.shell.title);
//!
//! if let Some(burst) = outcome.burst {
//!     let report = burst.wait().await?;
//!     println!("{} sections persisted", report.indices(quire_core::SectionStatus::Persisted).len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Operations return [`Result<T, Error>`]. Malformed backend output is never
//! an error; it shows up as [`ShellWarning`]s on the shell instead.
//!
//! ```rust
//! use quire_core::Error;
//!
//! let err = Error::UpstreamTimeout { attempts: 4 };
//! if err.is_recoverable() {
//!     eprintln!("try again later: {}", err.user_message());
//! }
//! ```

/// Background burst generation of remaining sections
pub mod burst;
/// Keyword topic classification
pub mod classify;
/// Backend client, transports and retry policy
pub mod client;
/// Configuration loading and defaults
pub mod config;
/// Error types and result aliases
pub mod error;
/// Resilient shell extraction
pub mod extract;
/// Persistence gateway and stores
pub mod persistence;
/// Prompt construction
pub mod prompt;
/// Intent safety gate
pub mod safety;
/// Tolerant scanning over almost-JSON text
pub mod scan;
/// Request pipeline
pub mod service;
/// Core data types
pub mod types;
/// Request validation
pub mod validation;

// Re-export commonly used types
pub use burst::{BurstHandle, BurstOrchestrator, BurstPlan, BurstProgress, BurstReport, BurstSupervisor};
pub use classify::TopicClassifier;
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{ShellExtractor, clean_section_content};
pub use persistence::{FileStore, MemoryStore, PersistenceGateway};
pub use safety::{SafetyGate, TopicScreen, screen_topic};
pub use service::{GenerationOutcome, GenerationResponse, GenerationService};
pub use types::*;
pub use validation::{MAX_TOPIC_CHARS, MIN_SESSION_TOKEN_CHARS};
