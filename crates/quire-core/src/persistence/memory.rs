use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{PersistenceGateway, SectionWrite, plan_section_write, retain_outline_sections};
use crate::{Document, DocumentId, DocumentShell, Error, Result, SectionRecord};

/// In-memory [`PersistenceGateway`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn write_section(&self, id: &DocumentId, record: SectionRecord) -> Result<()> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {id} has no shell")))?;

        let index = record.index;
        match plan_section_write(document.sections.get(&index), record) {
            SectionWrite::Store(record) => {
                debug!(document = %id, index, status = %record.status, "stored section");
                document.sections.insert(index, record);
            },
            SectionWrite::Unchanged | SectionWrite::KeepPersisted => {},
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn upsert_shell(&self, id: &DocumentId, shell: &DocumentShell) -> Result<()> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(id) {
            Some(document) if document.shell == *shell => {},
            Some(document) => {
                document.shell = shell.clone();
                retain_outline_sections(&mut document.sections, shell);
            },
            None => {
                documents.insert(
                    id.clone(),
                    Document {
                        id: id.clone(),
                        shell: shell.clone(),
                        sections: BTreeMap::new(),
                    },
                );
            },
        }
        Ok(())
    }

    async fn upsert_section(&self, id: &DocumentId, index: u32, content: &str) -> Result<()> {
        self.write_section(id, SectionRecord::persisted(index, content))
            .await
    }

    async fn record_section_failure(
        &self,
        id: &DocumentId,
        index: u32,
        reason: &str,
    ) -> Result<()> {
        self.write_section(id, SectionRecord::failed(index, reason))
            .await
    }

    async fn load_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(id).cloned())
    }
}
