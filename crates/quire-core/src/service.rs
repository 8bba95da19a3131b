//! Request pipeline.
//!
//! [`GenerationService::handle`] runs the synchronous part of a request in a
//! fixed order:
//!
//! 1. Validate the request (no backend calls on failure)
//! 2. Intent safety gate
//! 3. Topic classification
//! 4. Load the existing shell, or generate and extract a new one
//! 5. Persist the shell
//! 6. For full-document requests, start a background burst for the sections
//!    that are not yet persisted
//!
//! The shell is returned as soon as step 5 completes; the burst keeps
//! running on its own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::burst::{BurstHandle, BurstJob, BurstOrchestrator, BurstSupervisor};
use crate::classify::TopicClassifier;
use crate::client::{GenerationClient, HttpTransport, RetryPolicy, Sleeper, TokioSleeper, Transport};
use crate::config::{Config, DocumentConfig};
use crate::extract::ShellExtractor;
use crate::persistence::{FileStore, PersistenceGateway};
use crate::prompt::PromptBuilder;
use crate::safety::SafetyGate;
use crate::validation::{ValidatedRequest, validate_request};
use crate::{
    Document, DocumentId, DocumentShell, Error, GenerationRequest, OutlineEntry, Result,
    SafetyVerdict, SectionStatus, TopicClassification,
};

/// Synchronous result of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    /// Id of the created or resumed document.
    pub document_id: DocumentId,
    /// Document shell.
    pub shell: DocumentShell,
    /// Safety verdict for the topic.
    pub verdict: SafetyVerdict,
    /// Topic classification.
    pub classification: TopicClassification,
    /// Whether an existing shell was reused.
    pub resumed: bool,
    /// Outline indices not yet persisted.
    pub remaining_sections: Vec<u32>,
    /// Whether a background burst was started.
    pub background_started: bool,
}

/// Response plus the handle of the background burst, if one was started.
#[derive(Debug)]
pub struct GenerationOutcome {
    /// Synchronous response.
    pub response: GenerationResponse,
    /// Background burst; dropping it does not stop the burst.
    pub burst: Option<BurstHandle>,
}

/// Entry point tying the pipeline stages together.
pub struct GenerationService {
    client: GenerationClient,
    gateway: Arc<dyn PersistenceGateway>,
    safety: SafetyGate,
    classifier: TopicClassifier,
    prompts: PromptBuilder,
    document: DocumentConfig,
    bursts: BurstOrchestrator,
}

impl GenerationService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        gateway: Arc<dyn PersistenceGateway>,
        supervisor: BurstSupervisor,
    ) -> Result<Self> {
        config.validate()?;
        let client = GenerationClient::new(transport, sleeper, RetryPolicy::from(&config.retry));
        let prompts = PromptBuilder::new(&config.backend, &config.document);
        let safety = SafetyGate::new(client.clone(), prompts.clone(), &config.safety)?;
        let classifier = TopicClassifier::new(&config.classifier)?;
        let bursts = BurstOrchestrator::new(
            client.clone(),
            Arc::clone(&gateway),
            prompts.clone(),
            config.burst.clone(),
            supervisor,
        );
        Ok(Self {
            client,
            gateway,
            safety,
            classifier,
            prompts,
            document: config.document.clone(),
            bursts,
        })
    }

    /// Production wiring: HTTP backend, file storage and the tokio timer.
    pub fn from_config(config: &Config, supervisor: BurstSupervisor) -> Result<Self> {
        let transport = HttpTransport::new(&config.backend)?;
        let store = FileStore::new(config.storage.resolve_data_dir()?);
        Self::new(
            config,
            Arc::new(transport),
            Arc::new(TokioSleeper),
            Arc::new(store),
            supervisor,
        )
    }

    /// Supervisor owning background bursts.
    #[must_use]
    pub const fn supervisor(&self) -> &BurstSupervisor {
        self.bursts.supervisor()
    }

    /// Handle a generation request.
    #[instrument(skip_all, fields(full = request.full_document_requested))]
    pub async fn handle(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        let request = validate_request(&request).inspect_err(|e| {
            info!(category = e.category(), error = %e, "request rejected by validation");
        })?;
        let topic = request.topic.as_str();

        let verdict = self.safety.evaluate(topic).await;
        if !verdict.allowed {
            let reason = verdict
                .reason
                .clone()
                .unwrap_or_else(|| "topic not permitted".to_string());
            warn!(reason = %reason, "request rejected by safety gate");
            return Err(Error::SafetyRejected { reason });
        }

        let classification = self.classifier.classify(topic);
        debug!(category = %classification.category, "topic classified");

        let (document_id, existing) = self.resolve_document(&request).await?;
        let resumed = existing.is_some();
        let (shell, remaining) = match existing {
            Some(document) => {
                let remaining = unpersisted_sections(&document);
                info!(
                    document = %document_id,
                    remaining = remaining.len(),
                    "resuming existing document"
                );
                (document.shell, remaining)
            },
            None => {
                let shell = self.generate_shell(topic, &classification).await?;
                let remaining = shell.remaining_sections().cloned().collect();
                (shell, remaining)
            },
        };

        self.gateway.upsert_shell(&document_id, &shell).await?;

        let burst = (request.full_document_requested && !remaining.is_empty()).then(|| {
            self.bursts.spawn(BurstJob {
                document_id: document_id.clone(),
                title: shell.title.clone(),
                outline: shell.table_of_contents.clone(),
                sections: remaining.clone(),
            })
        });

        info!(
            document = %document_id,
            resumed,
            warnings = shell.warnings.len(),
            background = burst.is_some(),
            "shell ready"
        );

        Ok(GenerationOutcome {
            response: GenerationResponse {
                document_id,
                shell,
                verdict,
                classification,
                resumed,
                remaining_sections: remaining.iter().map(|entry| entry.index).collect(),
                background_started: burst.is_some(),
            },
            burst,
        })
    }

    /// Load a document with every section written so far.
    pub async fn load(&self, id: &DocumentId) -> Result<Document> {
        self.gateway
            .load_document(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {id}")))
    }

    /// Pick the document id and load its stored state, if any.
    ///
    /// An unknown caller-supplied id becomes the id of the new document.
    async fn resolve_document(
        &self,
        request: &ValidatedRequest,
    ) -> Result<(DocumentId, Option<Document>)> {
        match &request.existing_document_id {
            Some(id) => {
                let existing = self.gateway.load_document(id).await?;
                if existing.is_none() {
                    debug!(document = %id, "no stored shell; starting a new document");
                }
                Ok((id.clone(), existing))
            },
            None => Ok((
                DocumentId::generate(&request.topic, &request.session_token),
                None,
            )),
        }
    }

    async fn generate_shell(
        &self,
        topic: &str,
        classification: &TopicClassification,
    ) -> Result<DocumentShell> {
        let payload = self.prompts.shell(topic, classification);
        let raw = self.client.generate(&payload).await.map_err(|e| {
            let err = Error::from(e);
            warn!(category = err.category(), error = %err, "shell generation failed");
            err
        })?;

        let mut shell = ShellExtractor::new(&self.document)
            .with_subtitle(classification.subtitle.clone())
            .extract(&raw, topic);
        shell.warnings.extend(self.safety.trademark_warnings(topic));

        if !shell.warnings.is_empty() {
            warn!(
                warnings = ?shell.warnings,
                "shell extracted with degradations"
            );
        }
        Ok(shell)
    }
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("client", &self.client)
            .field("classifier", &self.classifier)
            .field("bursts", &self.bursts)
            .finish_non_exhaustive()
    }
}

/// Outline entries after the first that are not yet persisted.
fn unpersisted_sections(document: &Document) -> Vec<OutlineEntry> {
    document
        .shell
        .remaining_sections()
        .filter(|entry| document.section_status(entry.index) != SectionStatus::Persisted)
        .cloned()
        .collect()
}
