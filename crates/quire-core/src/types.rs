//! Core data types for the generation pipeline.
//!
//! These types cross every boundary in the crate: the request that enters the
//! service, the verdicts and classifications computed for it, the shell that is
//! returned synchronously, and the per-section state the burst orchestrator
//! drives in the background.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Maximum length accepted for a caller-supplied document id.
pub const MAX_DOCUMENT_ID_LEN: usize = 64;

/// Identifier of a generated document.
///
/// Ids are used as storage keys, so they are restricted to ASCII
/// alphanumerics, `-` and `_`.
///
/// ```rust
/// use quire_core::DocumentId;
///
/// let id = DocumentId::generate("Sourdough Baking", "session-token-1");
/// assert!(id.as_str().starts_with("doc_"));
/// assert_eq!(id.as_str().len(), 16);
///
/// assert!(DocumentId::parse("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a fresh id for a new document.
    ///
    /// Uses the first 12 hex chars of a SHA-256 over the topic, the session
    /// token, and the current time, with a `doc_` prefix.
    #[must_use]
    pub fn generate(topic: &str, session_token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(topic.as_bytes());
        hasher.update([0]);
        hasher.update(session_token.as_bytes());
        hasher.update([0]);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        hasher.update(nanos.to_le_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().take(6).fold(String::new(), |mut acc, b| {
            // write! to String is infallible
            let _ = write!(acc, "{b:02x}");
            acc
        });
        Self(format!("doc_{hex}"))
    }

    /// Validate a caller-supplied id.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Document id must not be empty".into()));
        }
        if trimmed.len() > MAX_DOCUMENT_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "Document id must be at most {MAX_DOCUMENT_ID_LEN} characters"
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidInput(
                "Document id may only contain letters, digits, '-' and '_'".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to turn a topic into a document.
///
/// Construct with [`GenerationRequest::new`] and the builder methods; the
/// service validates it before any backend call is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Short user-supplied topic, 1..=200 characters after trimming.
    pub topic: String,
    /// Opaque caller session token, at least 10 characters.
    pub session_token: String,
    /// Whether the remaining sections should be generated in the background.
    #[serde(default)]
    pub full_document_requested: bool,
    /// Resume or upgrade an existing document instead of starting fresh.
    #[serde(default)]
    pub existing_document_id: Option<String>,
}

impl GenerationRequest {
    /// Create a preview request (shell only).
    #[must_use]
    pub fn new(topic: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            session_token: session_token.into(),
            full_document_requested: false,
            existing_document_id: None,
        }
    }

    /// Request the full document.
    #[must_use]
    pub const fn full_document(mut self, full: bool) -> Self {
        self.full_document_requested = full;
        self
    }

    /// Target an existing document id.
    #[must_use]
    pub fn with_existing_document(mut self, id: impl Into<String>) -> Self {
        self.existing_document_id = Some(id.into());
        self
    }
}

/// Where a safety verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// The topic matched the configured allow-list; no backend call was made.
    AllowList,
    /// The backend classifier answered.
    Classifier,
    /// The classifier could not complete and the gate defaulted to allowed.
    FailOpen,
}

/// Outcome of the intent safety gate. Produced once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the topic may be processed.
    pub allowed: bool,
    /// Optional explanation from the classifier, or the fail-open cause.
    pub reason: Option<String>,
    /// Provenance of the verdict.
    pub source: VerdictSource,
}

impl SafetyVerdict {
    /// Verdict for an allow-listed topic.
    #[must_use]
    pub const fn allow_listed() -> Self {
        Self {
            allowed: true,
            reason: None,
            source: VerdictSource::AllowList,
        }
    }

    /// Verdict reported by the classifier.
    #[must_use]
    pub const fn classified(allowed: bool, reason: Option<String>) -> Self {
        Self {
            allowed,
            reason,
            source: VerdictSource::Classifier,
        }
    }

    /// Default verdict when the classifier failed or answered garbage.
    #[must_use]
    pub fn fail_open(cause: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: Some(cause.into()),
            source: VerdictSource::FailOpen,
        }
    }
}

/// Heuristic document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    /// Software, engineering and other technical subjects.
    Technical,
    /// Everyday practical subjects; also the fallback.
    Lifestyle,
    /// Scholarly subjects.
    Academic,
}

impl TopicCategory {
    /// Lowercase name used in logs and output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Lifestyle => "lifestyle",
            Self::Academic => "academic",
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category plus the subtitle embedded in the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicClassification {
    /// Selected category.
    pub category: TopicCategory,
    /// Rendered subtitle for this topic.
    pub subtitle: String,
}

/// One entry in the table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEntry {
    /// 1-based position in the document.
    pub index: u32,
    /// Section title.
    pub title: String,
    /// Search hint for an illustration, consumed by the image collaborator.
    pub image_hint: String,
}

/// A degradation the extractor (or the pipeline) had to apply.
///
/// Warnings are observability only; a shell with warnings is still complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ShellWarning {
    /// Control characters or a byte-order mark were removed from the response.
    ControlCharactersStripped {
        /// Number of characters removed.
        count: usize,
    },
    /// No `{ ... }` pair was found; the whole text was used as the candidate.
    NoJsonObject,
    /// The candidate was not valid JSON; field-by-field recovery was used.
    StrictParseFailed {
        /// Parser diagnostic.
        detail: String,
    },
    /// A field was salvaged by the tolerant scanner.
    FieldRecovered {
        /// Field name.
        field: String,
    },
    /// A field could not be recovered and was synthesized.
    FieldDefaulted {
        /// Field name.
        field: String,
    },
    /// Outline indices were missing, duplicated or out of order and were rewritten.
    OutlineRenumbered,
    /// The topic references a watch-listed trademark.
    TrademarkReference {
        /// The matched watchlist term.
        term: String,
    },
}

/// First-stage document skeleton returned synchronously.
///
/// Every field is always populated; the extractor synthesizes defaults for
/// anything the backend failed to provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentShell {
    /// Full document title.
    pub title: String,
    /// Shortened title for covers and listings.
    pub display_title: String,
    /// Subtitle line.
    pub subtitle: String,
    /// Ordered outline; index 1 is the first section.
    pub table_of_contents: Vec<OutlineEntry>,
    /// Body of section 1.
    pub first_section_content: String,
    /// Further-reading resources suggested by the backend.
    pub auxiliary_resources: Vec<String>,
    /// Degradation flags recorded while building the shell.
    #[serde(default)]
    pub warnings: Vec<ShellWarning>,
}

impl DocumentShell {
    /// Outline entries after the first section, in order.
    pub fn remaining_sections(&self) -> impl Iterator<Item = &OutlineEntry> {
        self.table_of_contents.iter().filter(|entry| entry.index > 1)
    }
}

/// Lifecycle state of a background section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Planned, not started.
    Pending,
    /// A generation call is in flight.
    InProgress,
    /// Content was written to the persistence gateway.
    Persisted,
    /// Retries were exhausted or the task was interrupted.
    Failed,
}

impl SectionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A section the burst orchestrator is responsible for.
///
/// State only moves forward: `Pending -> InProgress -> Persisted | Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTask {
    /// Outline index, unique within the document.
    pub index: u32,
    /// Section title.
    pub title: String,
    /// Illustration hint carried from the outline.
    pub image_hint: String,
    /// Current lifecycle state.
    pub status: SectionStatus,
    /// Generated content once persisted.
    pub content: Option<String>,
    /// Failure reason once failed.
    pub failure: Option<String>,
}

impl SectionTask {
    /// Create a pending task for an outline entry.
    #[must_use]
    pub fn pending(entry: &OutlineEntry) -> Self {
        Self {
            index: entry.index,
            title: entry.title.clone(),
            image_hint: entry.image_hint.clone(),
            status: SectionStatus::Pending,
            content: None,
            failure: None,
        }
    }

    /// `Pending -> InProgress`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(SectionStatus::Pending, SectionStatus::InProgress)
    }

    /// `InProgress -> Persisted`. Call only after the gateway write succeeded.
    pub fn mark_persisted(&mut self, content: String) -> Result<()> {
        self.transition(SectionStatus::InProgress, SectionStatus::Persisted)?;
        self.content = Some(content);
        Ok(())
    }

    /// `InProgress -> Failed`.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(SectionStatus::InProgress, SectionStatus::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, from: SectionStatus, to: SectionStatus) -> Result<()> {
        if self.status != from {
            return Err(Error::Other(format!(
                "section {} cannot move from {} to {to}",
                self.index, self.status
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// Durable state of one section as stored by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRecord {
    /// Outline index.
    pub index: u32,
    /// `Persisted` or `Failed`.
    pub status: SectionStatus,
    /// Section body when persisted.
    pub content: Option<String>,
    /// Failure reason when failed.
    pub failure: Option<String>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl SectionRecord {
    /// Record for a successfully generated section.
    #[must_use]
    pub fn persisted(index: u32, content: impl Into<String>) -> Self {
        Self {
            index,
            status: SectionStatus::Persisted,
            content: Some(content.into()),
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Record for a section whose generation failed.
    #[must_use]
    pub fn failed(index: u32, reason: impl Into<String>) -> Self {
        Self {
            index,
            status: SectionStatus::Failed,
            content: None,
            failure: Some(reason.into()),
            updated_at: Utc::now(),
        }
    }

    /// Whether two records describe the same durable state, ignoring timestamps.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.index == other.index
            && self.status == other.status
            && self.content == other.content
            && self.failure == other.failure
    }
}

/// The shell plus whatever sections have reached a terminal state so far.
///
/// Readable at any time, including while sections are still pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document id.
    pub id: DocumentId,
    /// First-stage shell.
    pub shell: DocumentShell,
    /// Terminal section records keyed by index.
    pub sections: BTreeMap<u32, SectionRecord>,
}

impl Document {
    /// Status of an outline index as a reader would observe it.
    ///
    /// Section 1 lives in the shell and is always persisted.
    #[must_use]
    pub fn section_status(&self, index: u32) -> SectionStatus {
        if index == 1 {
            return SectionStatus::Persisted;
        }
        self.sections
            .get(&index)
            .map_or(SectionStatus::Pending, |record| record.status)
    }

    /// Content of an outline index, if persisted.
    #[must_use]
    pub fn section_content(&self, index: u32) -> Option<&str> {
        if index == 1 {
            return Some(&self.shell.first_section_content);
        }
        self.sections
            .get(&index)
            .and_then(|record| record.content.as_deref())
    }

    /// Indices from the outline that are persisted (including section 1).
    #[must_use]
    pub fn persisted_indices(&self) -> Vec<u32> {
        self.indices_with(SectionStatus::Persisted)
    }

    /// Indices from the outline that failed.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<u32> {
        self.indices_with(SectionStatus::Failed)
    }

    /// Indices from the outline that have no terminal record yet.
    #[must_use]
    pub fn pending_indices(&self) -> Vec<u32> {
        self.indices_with(SectionStatus::Pending)
    }

    /// Whether every outline entry is persisted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shell
            .table_of_contents
            .iter()
            .all(|entry| self.section_status(entry.index) == SectionStatus::Persisted)
    }

    fn indices_with(&self, status: SectionStatus) -> Vec<u32> {
        self.shell
            .table_of_contents
            .iter()
            .map(|entry| entry.index)
            .filter(|index| self.section_status(*index) == status)
            .collect()
    }
}
