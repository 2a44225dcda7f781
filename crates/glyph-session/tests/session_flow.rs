use glyph_history::{KeyValueStore, Storage, StorageError, VersionError};
use glyph_session::{ErrorClass, ModificationSession, SessionError, SessionNotice, SubmitOutcome};
use glyph_test_utils::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn instant_action_is_idempotent_and_stays_local() {
    let service = ScriptedService::new().shared();
    let session = test_session(service.clone());

    let first = session.submit("Add QR code").await.unwrap();
    let second = session.submit("Add QR code").await.unwrap();

    let (SubmitOutcome::Instant { rule, content: a }, SubmitOutcome::Instant { content: b, .. }) =
        (first, second)
    else {
        panic!("expected instant outcomes");
    };
    assert_eq!(rule, "qr-code");
    assert_eq!(a, b);
    assert_eq!(a.matches("data-glyph-instant=\"qr-code\"").count(), 1);

    assert_eq!(session.history().len(), 3);
    assert_eq!(session.document().content, a);
    assert_eq!(service.attempts(), 0);
}

#[tokio::test]
async fn payment_terms_are_replaced_in_place() {
    let session = test_session(ScriptedService::new().shared());

    session.submit("Add payment terms: Net 30").await.unwrap();
    session.submit("Change payment terms to Net 45").await.unwrap();

    let content = session.document().content;
    assert!(content.contains("Net 45"));
    assert!(!content.contains("Net 30"));
    assert_eq!(content.matches("data-glyph-instant=\"payment-terms\"").count(), 1);
}

#[tokio::test]
async fn instant_action_reports_changed_region() {
    let session = test_session(ScriptedService::new().shared());

    session.submit("Add QR code").await.unwrap();

    assert_eq!(
        session.changed_regions().into_iter().collect::<Vec<_>>(),
        vec!["footer".to_string()]
    );
    session.undo().unwrap();
    assert!(session.changed_regions().is_empty());
}

#[tokio::test]
async fn undo_redo_walk_and_branch_truncation() {
    let session = test_session(ScriptedService::new().shared());
    assert!(matches!(session.undo(), Err(SessionError::NothingToUndo)));

    session.submit("Add QR code").await.unwrap();
    let with_qr = session.document();
    session.submit("Mark as paid").await.unwrap();
    let with_stamp = session.document();

    assert_eq!(session.undo().unwrap(), with_qr);
    assert_eq!(session.undo().unwrap().content, INVOICE);
    assert!(!session.can_undo());
    assert_eq!(session.redo().unwrap(), with_qr);
    assert!(session.can_redo());

    session.submit("Add signature line").await.unwrap();
    assert!(!session.can_redo());
    assert!(matches!(session.redo(), Err(SessionError::NothingToRedo)));
    assert_ne!(session.document(), with_stamp);

    let prompts: Vec<_> = session.history().into_iter().map(|e| e.prompt).collect();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[1], "Add QR code");
    assert_eq!(prompts[2], "Add signature line");
}

#[tokio::test]
async fn undo_depth_is_bounded() {
    let session = test_session(ScriptedService::new().shared());
    for n in 1..=12 {
        session
            .submit(&format!("Add watermark: v{n}"))
            .await
            .unwrap();
    }

    let mut undone = 0;
    while session.undo().is_ok() {
        undone += 1;
    }
    assert_eq!(undone, 10);
    assert!(session.document().content.contains("V2"));
}

#[tokio::test]
async fn saved_version_restores_as_new_edit() {
    let session = test_session(ScriptedService::new().shared());
    session.submit("Add QR code").await.unwrap();
    let saved = session.save_version("with qr").unwrap();
    session.submit("Mark as paid").await.unwrap();
    let stamped = session.document();

    let restored = session.restore_version(saved.id).unwrap();

    assert_eq!(restored.content, saved.content);
    assert_eq!(session.document(), restored);
    assert_eq!(session.history().last().unwrap().prompt, "Restored: with qr");
    assert_eq!(session.undo().unwrap(), stamped);
}

#[tokio::test]
async fn version_errors() {
    let session = test_session(ScriptedService::new().shared());

    assert!(matches!(
        session.save_version("   "),
        Err(SessionError::Version(VersionError::EmptyName))
    ));
    assert!(matches!(
        session.restore_version(uuid::Uuid::new_v4()),
        Err(SessionError::Version(VersionError::NotFound(_)))
    ));

    let saved = session.save_version("draft").unwrap();
    assert_eq!(session.versions().len(), 1);
    assert_eq!(session.delete_version(saved.id).unwrap().name, "draft");
    assert!(session.versions().is_empty());
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn versions_persist_in_storage_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config().with_storage_dir(dir.path());

    let first = ModificationSession::builder(invoice_snapshot(), ScriptedService::new().shared())
        .config(config.clone())
        .build();
    first.save_version("before edits").unwrap();
    drop(first);

    let second = ModificationSession::builder(invoice_snapshot(), ScriptedService::new().shared())
        .config(config)
        .build();
    let versions = second.versions();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].name, "before edits");
    assert_eq!(versions[0].content, INVOICE);
}

#[tokio::test]
async fn suggestions_follow_usage() {
    let session = test_session(ScriptedService::new().shared());
    assert_eq!(
        session.suggestions(2),
        vec!["Remove watermark".to_string(), "Add a DRAFT watermark".to_string()]
    );

    session.submit("Mark as paid").await.unwrap();
    session.submit("Add QR code").await.unwrap();
    session.submit("mark as paid").await.unwrap();

    assert_eq!(
        session.suggestions(2),
        vec!["Mark as paid".to_string(), "Add QR code".to_string()]
    );
}

#[tokio::test]
async fn rephrased_instant_actions_rank_their_rule() {
    let session = test_session(ScriptedService::new().shared());

    for _ in 0..3 {
        session.submit("Add a watermark").await.unwrap();
    }
    session.submit("put a qr code on it").await.unwrap();

    assert_eq!(
        session.suggestions(2),
        vec!["Add a DRAFT watermark".to_string(), "Add QR code".to_string()]
    );
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_side_effects() {
    let service = ScriptedService::new().shared();
    let session = test_session(service.clone());

    let err = session.submit("   ").await.unwrap_err();

    assert_eq!(err.class, ErrorClass::Impossible);
    assert_eq!(err.attempts, 0);
    assert_eq!(session.history().len(), 1);
    assert_eq!(service.attempts(), 0);
}

#[tokio::test]
async fn first_success_is_announced_once() {
    let session = test_session(ScriptedService::new().shared());
    let mut rx = session.subscribe();

    session.submit("Add QR code").await.unwrap();
    session.submit("Mark as paid").await.unwrap();

    let firsts = drain_notices(&mut rx)
        .into_iter()
        .filter(|n| *n == SessionNotice::FirstSuccess)
        .count();
    assert_eq!(firsts, 1);
}

#[derive(Debug)]
struct PrivateMode;

impl KeyValueStore for PrivateMode {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("private mode".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("private mode".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("private mode".into()))
    }
}

#[tokio::test]
async fn unavailable_storage_degrades_with_one_warning() {
    let session = ModificationSession::builder(invoice_snapshot(), ScriptedService::new().shared())
        .config(test_config())
        .storage(Arc::new(Storage::new(Arc::new(PrivateMode))))
        .build();
    let mut rx = session.subscribe();

    session.submit("Add QR code").await.unwrap();
    let saved = session.save_version("in memory only").unwrap();
    session.submit("Mark as paid").await.unwrap();

    let notices = drain_notices(&mut rx);
    let warnings = notices
        .iter()
        .filter(|n| matches!(n, SessionNotice::StorageDegraded { .. }))
        .count();
    assert_eq!(warnings, 1);
    assert!(notices.contains(&SessionNotice::FirstSuccess));
    assert_eq!(session.versions()[0].id, saved.id);
}
