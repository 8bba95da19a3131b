//! Background burst generation of the remaining sections.
//!
//! Sections after the first are generated in small concurrent groups
//! ("bursts"). Groups run strictly one after another with a pause between
//! them to stay under backend rate limits; the sections inside a group run
//! concurrently. A failing section never stops its siblings or later groups.
//!
//! Each spawned burst gets a [`BurstHandle`] for progress, cancellation and
//! the final [`BurstReport`]. A [`BurstSupervisor`] owns the cancellation
//! root for every burst so the process can shut down cleanly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::client::GenerationClient;
use crate::config::BurstConfig;
use crate::extract::clean_section_content;
use crate::persistence::PersistenceGateway;
use crate::prompt::PromptBuilder;
use crate::{DocumentId, Error, OutlineEntry, Result, SectionStatus, SectionTask};

/// Failure reason recorded for sections interrupted by cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

// ============================================================
// Plan
// ============================================================

/// Partition of section indices into ordered groups.
///
/// ```rust
/// use quire_core::BurstPlan;
/// use quire_core::config::BurstConfig;
///
/// let plan = BurstPlan::new(1..=10, &BurstConfig::default());
/// assert_eq!(plan.groups(), &[vec![2, 3], vec![4, 5], vec![6, 7], vec![8, 9, 10]]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstPlan {
    groups: Vec<Vec<u32>>,
}

impl BurstPlan {
    /// Build a plan from outline indices.
    ///
    /// Index 1 is excluded (it ships with the shell). Indices are sorted and
    /// deduplicated, then chunked by `group_size`; with
    /// `merge_trailing_singleton` a lone final index joins the group before it.
    pub fn new(indices: impl IntoIterator<Item = u32>, config: &BurstConfig) -> Self {
        let mut indices: Vec<u32> = indices.into_iter().filter(|index| *index > 1).collect();
        indices.sort_unstable();
        indices.dedup();

        let size = config.group_size.max(1);
        let mut groups: Vec<Vec<u32>> = indices.chunks(size).map(<[u32]>::to_vec).collect();

        if config.merge_trailing_singleton
            && size > 1
            && groups.len() > 1
            && groups.last().is_some_and(|group| group.len() == 1)
        {
            if let Some(last) = groups.pop() {
                if let Some(previous) = groups.last_mut() {
                    previous.extend(last);
                }
            }
        }

        Self { groups }
    }

    /// Groups in execution order.
    #[must_use]
    pub fn groups(&self) -> &[Vec<u32>] {
        &self.groups
    }

    /// Number of sections across all groups.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Whether there is nothing to generate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ============================================================
// Progress and report
// ============================================================

/// Live counts for a running burst.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstProgress {
    /// Sections scheduled.
    pub total: usize,
    /// Sections written to the gateway.
    pub persisted: usize,
    /// Sections that failed.
    pub failed: usize,
    /// Sections with a call in flight.
    pub in_progress: usize,
    /// Set once the burst has stopped.
    pub finished: bool,
}

impl BurstProgress {
    fn from_tasks(tasks: &BTreeMap<u32, SectionTask>, finished: bool) -> Self {
        let count = |status: SectionStatus| tasks.values().filter(|task| task.status == status).count();
        Self {
            total: tasks.len(),
            persisted: count(SectionStatus::Persisted),
            failed: count(SectionStatus::Failed),
            in_progress: count(SectionStatus::InProgress),
            finished,
        }
    }
}

/// Final state of every section a burst was responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstReport {
    /// Document the sections belong to.
    pub document_id: DocumentId,
    /// Sections in index order.
    pub sections: Vec<SectionTask>,
    /// Whether the burst stopped because it was cancelled.
    pub cancelled: bool,
}

impl BurstReport {
    /// Indices with the given status.
    #[must_use]
    pub fn indices(&self, status: SectionStatus) -> Vec<u32> {
        self.sections
            .iter()
            .filter(|task| task.status == status)
            .map(|task| task.index)
            .collect()
    }

    /// Whether every section was persisted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.sections
            .iter()
            .all(|task| task.status == SectionStatus::Persisted)
    }
}

// ============================================================
// Orchestrator
// ============================================================

/// Sections to generate for one document.
#[derive(Debug, Clone)]
pub struct BurstJob {
    /// Target document.
    pub document_id: DocumentId,
    /// Document title, used in section prompts.
    pub title: String,
    /// Full outline, used in section prompts.
    pub outline: Vec<OutlineEntry>,
    /// Entries to generate.
    pub sections: Vec<OutlineEntry>,
}

/// Runs bursts against a generation client and a persistence gateway.
#[derive(Clone)]
pub struct BurstOrchestrator {
    client: GenerationClient,
    gateway: Arc<dyn PersistenceGateway>,
    prompts: PromptBuilder,
    config: BurstConfig,
    supervisor: BurstSupervisor,
}

impl BurstOrchestrator {
    /// Create an orchestrator whose bursts are owned by `supervisor`.
    #[must_use]
    pub fn new(
        client: GenerationClient,
        gateway: Arc<dyn PersistenceGateway>,
        prompts: PromptBuilder,
        config: BurstConfig,
        supervisor: BurstSupervisor,
    ) -> Self {
        Self {
            client,
            gateway,
            prompts,
            config,
            supervisor,
        }
    }

    /// Supervisor owning this orchestrator's bursts.
    #[must_use]
    pub const fn supervisor(&self) -> &BurstSupervisor {
        &self.supervisor
    }

    /// Start a burst in the background.
    ///
    /// The burst keeps running if the handle is dropped.
    pub fn spawn(&self, job: BurstJob) -> BurstHandle {
        let cancel = self.supervisor.child_token();
        let initial = BurstProgress {
            total: job.sections.len(),
            ..BurstProgress::default()
        };
        let (progress_tx, progress_rx) = watch::channel(initial);
        let document_id = job.document_id.clone();
        let span = info_span!("burst", document = %document_id);

        let orchestrator = self.clone();
        let token = cancel.clone();
        let guard = self.supervisor.track();
        let task = tokio::spawn(
            async move {
                let report = orchestrator.run(job, &token, &progress_tx).await;
                drop(guard);
                report
            }
            .instrument(span),
        );

        BurstHandle {
            document_id,
            cancel,
            progress: progress_rx,
            task,
        }
    }

    /// Run a burst to completion on the current task.
    pub async fn run(
        &self,
        job: BurstJob,
        cancel: &CancellationToken,
        progress: &watch::Sender<BurstProgress>,
    ) -> BurstReport {
        let plan = BurstPlan::new(job.sections.iter().map(|entry| entry.index), &self.config);
        let entries: BTreeMap<u32, &OutlineEntry> = job
            .sections
            .iter()
            .map(|entry| (entry.index, entry))
            .collect();
        let mut tasks: BTreeMap<u32, SectionTask> = entries
            .iter()
            .filter(|(index, _)| **index > 1)
            .map(|(index, entry)| (*index, SectionTask::pending(entry)))
            .collect();

        info!(
            groups = plan.groups().len(),
            sections = plan.section_count(),
            "burst started"
        );

        let sleeper = self.client.sleeper();
        let delay = self.config.inter_burst_delay();
        let group_count = plan.groups().len();

        for (position, group) in plan.groups().iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            for index in group {
                if let Some(task) = tasks.get_mut(index) {
                    if let Err(e) = task.start() {
                        warn!(index, error = %e, "section could not be started");
                    }
                }
            }
            progress.send_replace(BurstProgress::from_tasks(&tasks, false));
            debug!(group = position + 1, of = group_count, indices = ?group, "starting group");

            let job_ref = &job;
            let outcomes = join_all(group.iter().filter_map(|index| {
                let entry = *entries.get(index)?;
                Some(async move {
                    (entry.index, self.generate_section(job_ref, entry, cancel).await)
                })
            }))
            .await;

            for (index, outcome) in outcomes {
                let Some(task) = tasks.get_mut(&index) else {
                    continue;
                };
                let transition = match outcome {
                    Ok(content) => task.mark_persisted(content),
                    Err(reason) => task.mark_failed(reason),
                };
                if let Err(e) = transition {
                    warn!(index, error = %e, "section state not updated");
                }
            }
            progress.send_replace(BurstProgress::from_tasks(&tasks, false));

            if position + 1 < group_count {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = sleeper.sleep(delay) => {},
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        let final_progress = BurstProgress::from_tasks(&tasks, true);
        info!(
            persisted = final_progress.persisted,
            failed = final_progress.failed,
            pending = final_progress.total - final_progress.persisted - final_progress.failed,
            cancelled,
            "burst finished"
        );
        progress.send_replace(final_progress);

        BurstReport {
            document_id: job.document_id,
            sections: tasks.into_values().collect(),
            cancelled,
        }
    }

    /// Generate and persist one section.
    ///
    /// Returns the stored content, or the failure reason after recording it
    /// with the gateway.
    #[instrument(
        level = "debug",
        skip_all,
        fields(document_id = %job.document_id, index = entry.index)
    )]
    async fn generate_section(
        &self,
        job: &BurstJob,
        entry: &OutlineEntry,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, String> {
        let index = entry.index;
        let payload = self.prompts.section(&job.title, &job.outline, entry);

        let generated = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CANCELLED_REASON.to_string()),
            result = self.client.generate(&payload) => result.map_err(|e| {
                Error::SectionGenerationFailed { index, reason: e.to_string() }.to_string()
            }),
        };

        let outcome = match generated.map(|raw| clean_section_content(&raw)) {
            Ok(content) if content.is_empty() => Err(format!("section {index} came back empty")),
            Ok(content) => match self.gateway.upsert_section(&job.document_id, index, &content).await {
                Ok(()) => Ok(content),
                Err(e) => Err(format!("section {index} could not be stored: {e}")),
            },
            Err(reason) => Err(reason),
        };

        match &outcome {
            Ok(content) => debug!(index, chars = content.chars().count(), "section persisted"),
            Err(reason) => {
                warn!(index, reason = %reason, "section failed");
                if let Err(e) = self
                    .gateway
                    .record_section_failure(&job.document_id, index, reason)
                    .await
                {
                    warn!(index, error = %e, "could not record section failure");
                }
            },
        }
        outcome
    }
}

impl std::fmt::Debug for BurstOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstOrchestrator")
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

// ============================================================
// Handle and supervisor
// ============================================================

/// Handle to a spawned burst.
#[derive(Debug)]
pub struct BurstHandle {
    document_id: DocumentId,
    cancel: CancellationToken,
    progress: watch::Receiver<BurstProgress>,
    task: JoinHandle<BurstReport>,
}

impl BurstHandle {
    /// Document being generated.
    #[must_use]
    pub const fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Subscribe to progress updates.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<BurstProgress> {
        self.progress.clone()
    }

    /// Stop scheduling new groups and interrupt in-flight sections.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the burst to stop and return its report.
    pub async fn wait(self) -> Result<BurstReport> {
        self.task
            .await
            .map_err(|e| Error::Other(format!("burst task failed: {e}")))
    }
}

/// Cancellation root and activity tracking for all bursts.
#[derive(Debug, Clone)]
pub struct BurstSupervisor {
    root: CancellationToken,
    active: Arc<watch::Sender<usize>>,
}

impl Default for BurstSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl BurstSupervisor {
    /// Create a supervisor with no bursts.
    #[must_use]
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            root: CancellationToken::new(),
            active: Arc::new(active),
        }
    }

    /// Number of bursts still running.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Cancel every burst and wait up to `grace` for them to stop.
    ///
    /// Returns `true` when all bursts stopped in time. Interrupted sections
    /// are recorded as failed so a later request can resume them.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let running = self.active();
        if running > 0 {
            info!(running, "cancelling background bursts");
        }
        self.root.cancel();

        let mut active = self.active.subscribe();
        let drained = tokio::time::timeout(grace, active.wait_for(|count| *count == 0))
            .await
            .is_ok_and(|result| result.is_ok());
        if !drained {
            warn!(remaining = self.active(), "bursts still running after grace period");
        }
        drained
    }

    fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    fn track(&self) -> ActiveGuard {
        self.active.send_modify(|count| *count += 1);
        ActiveGuard(Arc::clone(&self.active))
    }
}

struct ActiveGuard(Arc<watch::Sender<usize>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

// ============================================================
// Tests
// ============================================================
