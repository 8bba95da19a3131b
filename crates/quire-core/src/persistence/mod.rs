//! Persistence gateway boundary.
//!
//! The pipeline writes through [`PersistenceGateway`] and never assumes a
//! particular backend. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and the offline CLI paths
//! - [`FileStore`]: JSON files under a data directory with atomic writes
//!
//! ## Write semantics
//!
//! All writes are keyed upserts. Writing the same state twice is a no-op
//! that still succeeds, so a retried write is harmless. Sections can only be
//! written once the document shell exists, and a failure record never
//! overwrites a persisted section.

mod file;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{Document, DocumentId, DocumentShell, Result, SectionRecord, SectionStatus};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable storage for document shells and sections.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create or replace the document shell.
    ///
    /// Existing section records are kept for indices still in the outline.
    async fn upsert_shell(&self, id: &DocumentId, shell: &DocumentShell) -> Result<()>;

    /// Store generated content for a section.
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) when the
    /// document has no shell yet.
    async fn upsert_section(&self, id: &DocumentId, index: u32, content: &str) -> Result<()>;

    /// Record that a section could not be generated.
    ///
    /// Ignored when the section is already persisted.
    async fn record_section_failure(&self, id: &DocumentId, index: u32, reason: &str)
    -> Result<()>;

    /// Load the shell and every section written so far.
    async fn load_document(&self, id: &DocumentId) -> Result<Option<Document>>;
}

/// What a write would do to the stored sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SectionWrite {
    /// Same state is already stored.
    Unchanged,
    /// A persisted section must not be downgraded to failed.
    KeepPersisted,
    /// Store the new record.
    Store(SectionRecord),
}

/// Decide how a new section record combines with the stored one.
pub(crate) fn plan_section_write(
    existing: Option<&SectionRecord>,
    incoming: SectionRecord,
) -> SectionWrite {
    match existing {
        Some(current) if current.same_state(&incoming) => SectionWrite::Unchanged,
        Some(current)
            if current.status == SectionStatus::Persisted
                && incoming.status == SectionStatus::Failed =>
        {
            SectionWrite::KeepPersisted
        },
        _ => SectionWrite::Store(incoming),
    }
}

/// Whether a section record belongs with the shell. Section 1 lives in the
/// shell itself.
pub(crate) fn keeps_section(shell: &DocumentShell, index: u32) -> bool {
    index > 1 && shell.table_of_contents.iter().any(|entry| entry.index == index)
}

/// Drop section records whose index is no longer in the outline.
pub(crate) fn retain_outline_sections(
    sections: &mut BTreeMap<u32, SectionRecord>,
    shell: &DocumentShell,
) {
    sections.retain(|index, _| keeps_section(shell, *index));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_section_write() {
        let persisted = SectionRecord::persisted(2, "body");
        assert_eq!(
            plan_section_write(Some(&persisted), SectionRecord::persisted(2, "body")),
            SectionWrite::Unchanged
        );
        assert_eq!(
            plan_section_write(Some(&persisted), SectionRecord::failed(2, "late failure")),
            SectionWrite::KeepPersisted
        );
        assert!(matches!(
            plan_section_write(Some(&persisted), SectionRecord::persisted(2, "new body")),
            SectionWrite::Store(_)
        ));

        let failed = SectionRecord::failed(3, "exhausted");
        assert!(matches!(
            plan_section_write(Some(&failed), SectionRecord::persisted(3, "retried")),
            SectionWrite::Store(_)
        ));
        assert!(matches!(
            plan_section_write(None, SectionRecord::failed(3, "x")),
            SectionWrite::Store(_)
        ));
    }
}
