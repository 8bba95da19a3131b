#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeBackend, PromptKind, RecordingSleeper, SESSION_TOKEN, prompt_kind, service};
use quire_core::client::{
    GenerationClient, GenerationParams, PromptPayload, RetryPolicy, TransportError,
};
use quire_core::persistence::PersistenceGateway;
use quire_core::{
    Error, FileStore, GenerationRequest, MemoryStore, SectionStatus, VerdictSource,
};
use tempfile::TempDir;

#[tokio::test]
async fn over_long_topic_is_rejected_before_any_call() {
    let backend = FakeBackend::happy();
    let svc = service(
        backend.clone(),
        Arc::new(RecordingSleeper::default()),
        Arc::new(MemoryStore::new()),
    );

    let err = svc
        .handle(GenerationRequest::new("a".repeat(201), SESSION_TOKEN))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn allow_listed_topic_skips_safety_call() {
    let backend = FakeBackend::happy();
    let svc = service(
        backend.clone(),
        Arc::new(RecordingSleeper::default()),
        Arc::new(MemoryStore::new()),
    );

    let outcome = svc
        .handle(GenerationRequest::new("Intermittent Fasting 16:8 Schedule", SESSION_TOKEN))
        .await
        .unwrap();

    assert_eq!(outcome.response.verdict.source, VerdictSource::AllowList);
    assert_eq!(
        outcome.response.classification.category,
        quire_core::TopicCategory::Lifestyle
    );
    assert_eq!(backend.calls(), 1, "only the shell call is expected");
}

#[tokio::test]
async fn rejected_topic_generates_nothing() {
    let backend = FakeBackend::new(|payload| match prompt_kind(payload) {
        PromptKind::Safety => Ok(r#"{"allowed": false, "reason": "weapons"}"#.into()),
        other => panic!("unexpected {other:?} call after rejection"),
    });
    let store = Arc::new(MemoryStore::new());
    let svc = service(backend.clone(), Arc::new(RecordingSleeper::default()), store);

    let err = svc
        .handle(GenerationRequest::new("Homemade Explosives", SESSION_TOKEN).full_document(true))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SafetyRejected { .. }));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn rate_limited_twice_backs_off_five_then_ten_seconds() {
    let backend = FakeBackend::new({
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        move |_| {
            if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                Err(TransportError::RateLimited)
            } else {
                Ok("finally".into())
            }
        }
    });
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = GenerationClient::new(backend.clone(), sleeper.clone(), RetryPolicy::default());

    let text = client
        .generate(&PromptPayload::new("s", "u", GenerationParams::default()))
        .await
        .unwrap();

    assert_eq!(text, "finally");
    assert_eq!(
        sleeper.waits(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
}

#[tokio::test]
async fn failing_section_is_isolated_and_recorded() {
    let backend = FakeBackend::new(|payload| match prompt_kind(payload) {
        PromptKind::Safety => Ok(r#"{"allowed": true}"#.into()),
        PromptKind::Shell => Ok(common::SHELL_JSON.into()),
        PromptKind::Section(3) => Err(TransportError::Status {
            code: 422,
            body: "content filter".into(),
        }),
        PromptKind::Section(index) => Ok(format!("Body {index}")),
    });
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(temp.path()));
    let sleeper = Arc::new(RecordingSleeper::default());
    let svc = service(backend, sleeper.clone(), store.clone());

    let outcome = svc
        .handle(GenerationRequest::new("Sourdough Baking", SESSION_TOKEN).full_document(true))
        .await
        .unwrap();
    assert_eq!(outcome.response.remaining_sections, vec![2, 3, 4, 5]);

    let report = outcome.burst.unwrap().wait().await.unwrap();
    assert_eq!(report.indices(SectionStatus::Persisted), vec![2, 4, 5]);
    assert_eq!(report.indices(SectionStatus::Failed), vec![3]);
    // Groups [2, 3] and [4, 5] with one pause between them.
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(3)]);

    let doc = store
        .load_document(&outcome.response.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.section_status(3), SectionStatus::Failed);
    assert_eq!(doc.section_content(5), Some("Body 5"));
}

#[tokio::test]
async fn rate_limited_section_exhausts_retries_without_stalling_later_groups() {
    let backend = FakeBackend::new(|payload| match prompt_kind(payload) {
        PromptKind::Safety => Ok(r#"{"allowed": true}"#.into()),
        PromptKind::Shell => Ok(common::SHELL_JSON.into()),
        PromptKind::Section(3) => Err(TransportError::RateLimited),
        PromptKind::Section(index) => Ok(format!("Body {index}")),
    });
    let store = Arc::new(MemoryStore::new());
    let sleeper = Arc::new(RecordingSleeper::default());
    let svc = service(backend.clone(), sleeper.clone(), store.clone());

    let outcome = svc
        .handle(GenerationRequest::new("Sourdough Baking", SESSION_TOKEN).full_document(true))
        .await
        .unwrap();
    let report = outcome.burst.unwrap().wait().await.unwrap();

    assert_eq!(report.indices(SectionStatus::Persisted), vec![2, 4, 5]);
    assert_eq!(report.indices(SectionStatus::Failed), vec![3]);
    // Backoff for section 3, then the pause before group [4, 5].
    assert_eq!(
        sleeper.waits(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(3),
        ]
    );
    // Shell call, then sections 2, 3 (four attempts), 4 and 5.
    assert_eq!(backend.calls(), 1 + 7);

    let doc = store
        .load_document(&outcome.response.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.section_status(3), SectionStatus::Failed);
    assert_eq!(doc.failed_indices(), vec![3]);
}

#[tokio::test]
async fn malformed_shell_still_produces_complete_document_shell() {
    let backend = FakeBackend::new(|payload| match prompt_kind(payload) {
        PromptKind::Safety => Ok(r#"{"allowed": true}"#.into()),
        PromptKind::Shell => Ok(
            "```json\n{\"title\": \"Night Sky\", \"firstChapterContent\": \"Look up.\nThen look again.\"".into(),
        ),
        PromptKind::Section(_) => Ok("body".into()),
    });
    let svc = service(
        backend,
        Arc::new(RecordingSleeper::default()),
        Arc::new(MemoryStore::new()),
    );

    let outcome = svc
        .handle(GenerationRequest::new("stargazing for beginners", SESSION_TOKEN))
        .await
        .unwrap();
    let shell = outcome.response.shell;

    assert_eq!(shell.title, "Night Sky");
    assert_eq!(shell.first_section_content, "Look up.\nThen look again.");
    assert_eq!(shell.table_of_contents.len(), 10);
    assert!(!shell.warnings.is_empty());
}

#[tokio::test]
async fn repeated_upserts_leave_store_unchanged() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(temp.path()));
    let svc = service(
        FakeBackend::happy(),
        Arc::new(RecordingSleeper::default()),
        store.clone(),
    );

    let outcome = svc
        .handle(GenerationRequest::new("Sourdough Baking", SESSION_TOKEN).full_document(true))
        .await
        .unwrap();
    let id = outcome.response.document_id.clone();
    outcome.burst.unwrap().wait().await.unwrap();

    let before = store.load_document(&id).await.unwrap().unwrap();
    store.upsert_shell(&id, &before.shell).await.unwrap();
    store.upsert_section(&id, 2, "Body of section 2.").await.unwrap();
    store.record_section_failure(&id, 4, "stale failure").await.unwrap();
    let after = store.load_document(&id).await.unwrap().unwrap();

    assert_eq!(before, after);
    assert!(after.is_complete());
}
