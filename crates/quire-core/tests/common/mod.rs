#![allow(clippy::unwrap_used, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quire_core::client::{PromptPayload, Sleeper, Transport, TransportError};
use quire_core::config::Config;
use quire_core::persistence::PersistenceGateway;
use quire_core::{BurstSupervisor, GenerationService};

pub const SESSION_TOKEN: &str = "integration-session-token";

/// Shell with a five-entry outline.
pub const SHELL_JSON: &str = r#"{
    "title": "Sourdough at Home",
    "subtitle": "From Starter to Crust",
    "tableOfContents": [
        {"index": 1, "title": "Your First Starter", "imageHint": "jar of starter"},
        {"index": 2, "title": "Flour and Water", "imageHint": "flour"},
        {"index": 3, "title": "Shaping", "imageHint": "dough shaping"},
        {"index": 4, "title": "Baking", "imageHint": "dutch oven"},
        {"index": 5, "title": "Troubleshooting", "imageHint": "bread crumb"}
    ],
    "firstChapterContent": "Every loaf starts with a starter.",
    "resources": ["Flour Water Salt Yeast"]
}"#;

type Responder = dyn Fn(&PromptPayload) -> Result<String, TransportError> + Send + Sync;

/// Backend fake that routes on prompt content and counts calls.
pub struct FakeBackend {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&PromptPayload) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        })
    }

    /// Allows every topic, returns [`SHELL_JSON`] and a body per section.
    pub fn happy() -> Arc<Self> {
        Self::new(|payload| match prompt_kind(payload) {
            PromptKind::Safety => Ok(r#"{"allowed": true, "reason": "benign"}"#.into()),
            PromptKind::Shell => Ok(SHELL_JSON.into()),
            PromptKind::Section(index) => Ok(format!("Body of section {index}.")),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn complete(&self, payload: &PromptPayload) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Safety,
    Shell,
    Section(u32),
}

pub fn prompt_kind(payload: &PromptPayload) -> PromptKind {
    if let Some(rest) = payload.user.split("Write chapter ").nth(1) {
        let index = rest.split(':').next().unwrap().trim().parse().unwrap();
        return PromptKind::Section(index);
    }
    if payload.system.contains("tableOfContents") {
        PromptKind::Shell
    } else {
        PromptKind::Safety
    }
}

/// Sleeper that records waits without sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

pub fn service(
    backend: Arc<FakeBackend>,
    sleeper: Arc<RecordingSleeper>,
    gateway: Arc<dyn PersistenceGateway>,
) -> GenerationService {
    GenerationService::new(
        &Config::default(),
        backend,
        sleeper,
        gateway,
        BurstSupervisor::new(),
    )
    .unwrap()
}
