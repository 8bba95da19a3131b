//! File-backed persistence.
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/documents/<document_id>/
//!   shell.json          # DocumentShell
//!   sections/
//!     2.json            # SectionRecord per background section
//!     3.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! crash mid-write never leaves a truncated record behind. Section writes
//! hold an exclusive lock on `sections/<index>.lock` across the
//! read-plan-write sequence, so concurrent bursts on one document (in this
//! process or another) cannot downgrade a persisted section.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::debug;

use super::{PersistenceGateway, SectionWrite, keeps_section, plan_section_write};
use crate::{Document, DocumentId, DocumentShell, Error, Result, SectionRecord};

/// JSON-file [`PersistenceGateway`].
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStore {
    /// Create a store rooted at the data directory.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    fn document_dir(&self, id: &DocumentId) -> PathBuf {
        self.root.join("documents").join(id.as_str())
    }

    fn shell_path(&self, id: &DocumentId) -> PathBuf {
        self.document_dir(id).join("shell.json")
    }

    fn sections_dir(&self, id: &DocumentId) -> PathBuf {
        self.document_dir(id).join("sections")
    }

    fn section_path(&self, id: &DocumentId, index: u32) -> PathBuf {
        self.sections_dir(id).join(format!("{index}.json"))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {e}")))?;
        }
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Storage(format!("Failed to serialize record: {e}")))?;

        // Atomic write: unique temp file + rename
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp_path, json)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write temp file: {e}")))?;

        #[cfg(target_os = "windows")]
        if fs::try_exists(path).await.unwrap_or(false) {
            fs::remove_file(path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to remove existing file: {e}")))?;
        }

        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit file: {e}")))?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            },
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Corrupt record {}: {e}", path.display())))
    }

    async fn read_sections(&self, id: &DocumentId) -> Result<BTreeMap<u32, SectionRecord>> {
        let mut sections = BTreeMap::new();
        let mut entries = match fs::read_dir(self.sections_dir(id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(sections),
            Err(e) => return Err(Error::Storage(format!("Failed to list sections: {e}"))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("Failed to list sections: {e}")))?
        {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_some_and(|stem| stem.parse::<u32>().is_ok());
            if !is_record {
                continue;
            }
            if let Some(record) = Self::read_json::<SectionRecord>(&path).await? {
                sections.insert(record.index, record);
            }
        }
        Ok(sections)
    }

    /// Exclusive lock for one section; released when the handle drops.
    async fn lock_section(&self, id: &DocumentId, index: u32) -> Result<std::fs::File> {
        let dir = self.sections_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create directory: {e}")))?;
        let lock_path = dir.join(format!("{index}.lock"));
        tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let lock = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            lock.lock_exclusive()?;
            Ok(lock)
        })
        .await
        .map_err(|e| Error::Storage(format!("Section lock task failed: {e}")))?
        .map_err(|e| Error::Storage(format!("Failed to lock section: {e}")))
    }

    async fn write_section(&self, id: &DocumentId, record: SectionRecord) -> Result<()> {
        if !fs::try_exists(self.shell_path(id)).await.unwrap_or(false) {
            return Err(Error::NotFound(format!("document {id} has no shell")));
        }

        let index = record.index;
        let _lock = self.lock_section(id, index).await?;
        let path = self.section_path(id, index);
        let existing = Self::read_json::<SectionRecord>(&path).await?;
        match plan_section_write(existing.as_ref(), record) {
            SectionWrite::Store(record) => {
                self.write_json(&path, &record).await?;
                debug!(document = %id, index, status = %record.status, "saved section");
            },
            SectionWrite::Unchanged | SectionWrite::KeepPersisted => {},
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for FileStore {
    async fn upsert_shell(&self, id: &DocumentId, shell: &DocumentShell) -> Result<()> {
        let path = self.shell_path(id);
        if Self::read_json::<DocumentShell>(&path).await?.as_ref() == Some(shell) {
            return Ok(());
        }
        self.write_json(&path, shell).await?;

        for index in self.read_sections(id).await?.into_keys() {
            if !keeps_section(shell, index) {
                fs::remove_file(self.section_path(id, index))
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to remove section: {e}")))?;
            }
        }
        debug!(document = %id, sections = shell.table_of_contents.len(), "saved shell");
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
        let Some(shell) = Self::read_json::<DocumentShell>(&self.shell_path(id)).await? else {
            return Ok(None);
        };
        let sections = self.read_sections(id).await?;
        Ok(Some(Document {
            id: id.clone(),
            shell,
            sections,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{OutlineEntry, SectionStatus};
    use tempfile::TempDir;

    fn shell(count: u32) -> DocumentShell {
        DocumentShell {
            title: "Tea".into(),
            display_title: "Tea".into(),
            subtitle: "Guide".into(),
            table_of_contents: (1..=count)
                .map(|index| OutlineEntry {
                    index,
                    title: format!("Chapter {index}"),
                    image_hint: "tea".into(),
                })
                .collect(),
            first_section_content: "first".into(),
            auxiliary_resources: vec!["The Book of Tea".into()],
            warnings: Vec::new(),
        }
    }

    fn id() -> DocumentId {
        DocumentId::parse("doc_file").unwrap()
    }

    #[tokio::test]
    async fn test_layout_and_roundtrip() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FileStore::new(temp.path());
        store.upsert_shell(&id(), &shell(3)).await?;
        store.upsert_section(&id(), 2, "two").await?;
        store.record_section_failure(&id(), 3, "exhausted").await?;

        let doc_dir = temp.path().join("documents").join("doc_file");
        assert!(doc_dir.join("shell.json").exists());
        assert!(doc_dir.join("sections").join("2.json").exists());

        let doc = store.load_document(&id()).await?.unwrap();
        assert_eq!(doc.shell, shell(3));
        assert_eq!(doc.section_content(2), Some("two"));
        assert_eq!(doc.section_status(3), SectionStatus::Failed);

        let leftovers: Vec<_> = std::fs::read_dir(doc_dir.join("sections"))?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_identical_writes_do_not_touch_files() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FileStore::new(temp.path());
        store.upsert_shell(&id(), &shell(2)).await?;
        store.upsert_section(&id(), 2, "two").await?;
        let first = store.load_document(&id()).await?;

        store.upsert_shell(&id(), &shell(2)).await?;
        store.upsert_section(&id(), 2, "two").await?;
        let second = store.load_document(&id()).await?;

        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_shell_replacement_drops_stray_sections() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FileStore::new(temp.path());
        store.upsert_shell(&id(), &shell(4)).await?;
        store.upsert_section(&id(), 1, "stray").await?;
        store.upsert_section(&id(), 3, "three").await?;
        store.upsert_section(&id(), 4, "four").await?;

        store.upsert_shell(&id(), &shell(3)).await?;

        let doc = store.load_document(&id()).await?.unwrap();
        assert_eq!(doc.sections.keys().copied().collect::<Vec<_>>(), vec![3]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_never_downgrade_persisted() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = std::sync::Arc::new(FileStore::new(temp.path()));
        store.upsert_shell(&id(), &shell(2)).await?;

        let writes = (0..16).map(|round| {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                if round % 2 == 0 {
                    store.upsert_section(&id(), 2, "two").await
                } else {
                    store.record_section_failure(&id(), 2, "late failure").await
                }
            })
        });
        for result in futures::future::join_all(writes).await {
            result??;
        }

        let doc = store.load_document(&id()).await?.unwrap();
        assert_eq!(doc.section_status(2), SectionStatus::Persisted);
        assert_eq!(doc.section_content(2), Some("two"));
        assert_eq!(doc.sections.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_section_without_shell_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let err = store.upsert_section(&id(), 2, "two").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.load_document(&id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_shell_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let dir = temp.path().join("documents").join("doc_file");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("shell.json"), "{ not json").unwrap();

        let err = store.load_document(&id()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
