use clipsync_app::{App, AppConfig, AppError};
use clipsync_capture::{CaptureResult, ClipboardRead, ClipboardSource};
use clipsync_crypto::decrypt;
use clipsync_storage::{Database, ItemFilter, ItemUpdate, SortOrder, StorageError};
use clipsync_types::DeviceId;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USER: &str = "user-1";

/// Hands out scripted clipboard reads, then repeats the last one.
struct ScriptedSource {
    script: Arc<Mutex<VecDeque<ClipboardRead>>>,
    last: Option<ClipboardRead>,
}

impl ScriptedSource {
    fn new<I: IntoIterator<Item = &'static str>>(texts: I) -> Self {
        Self {
            script: Arc::new(Mutex::new(
                texts
                    .into_iter()
                    .map(|t| ClipboardRead::text(t.as_bytes().to_vec()))
                    .collect(),
            )),
            last: None,
        }
    }

    fn empty() -> Self {
        Self::new([])
    }
}

impl ClipboardSource for ScriptedSource {
    fn read(&mut self) -> CaptureResult<Option<ClipboardRead>> {
        if let Some(read) = self.script.lock().unwrap().pop_front() {
            self.last = Some(read);
        }
        Ok(self.last.clone())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        poll_interval_ms: 100,
        ..AppConfig::default()
    }
}

fn test_app(source: ScriptedSource) -> App<ScriptedSource> {
    let db = Database::open_in_memory().unwrap();
    App::new(db, test_config(), USER, DeviceId::from("dev-a"), source).unwrap()
}

// ── Encryption boundary ───────────────────────────────────────────────

#[tokio::test]
async fn stored_content_is_ciphertext_facade_returns_plaintext() {
    let db = Database::open_in_memory().unwrap();
    let app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    let item = app.add_item(b"top secret".to_vec(), "note").unwrap();
    assert_eq!(item.content, b"top secret");
    assert!(item.encrypted);

    // Below the facade the row holds ciphertext only.
    let raw = db.items(DeviceId::from("dev-a"), 100).get(item.id).unwrap();
    assert_ne!(raw.content, b"top secret");

    // And the queued payload is ciphertext too.
    let pending = db.queue(DeviceId::from("dev-a")).pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].payload, b"top secret");

    let listed = app
        .list_items(&ItemFilter::default(), SortOrder::DateDesc)
        .unwrap();
    assert_eq!(listed[0].content, b"top secret");
}

#[tokio::test]
async fn encryption_disabled_stores_plaintext() {
    let db = Database::open_in_memory().unwrap();
    let config = AppConfig {
        encryption_enabled: false,
        ..test_config()
    };
    let app = App::new(
        db.clone(),
        config,
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    let item = app.add_item(b"in the clear".to_vec(), "note").unwrap();
    assert!(!item.encrypted);
    let raw = db.items(DeviceId::from("dev-a"), 100).get(item.id).unwrap();
    assert_eq!(raw.content, b"in the clear");
}

// ── Item operations ───────────────────────────────────────────────────

#[tokio::test]
async fn update_bumps_version_and_queues_operation() {
    let app = test_app(ScriptedSource::empty());
    let item = app.add_item(b"v1".to_vec(), "first").unwrap();

    let updated = app
        .update_item(
            item.id,
            ItemUpdate {
                content: Some(b"v2".to_vec()),
                title: Some("second".to_string()),
                ..ItemUpdate::default()
            },
            item.updated_at,
        )
        .unwrap();

    assert!(updated.updated_at > item.updated_at);
    assert_eq!(updated.content, b"v2");
    assert_eq!(updated.title, "second");
}

#[tokio::test]
async fn stale_version_conflict_retries_onto_fresh_base() {
    let app = test_app(ScriptedSource::empty());
    let item = app.add_item(b"base".to_vec(), "t").unwrap();

    // Another writer moved the item forward.
    let moved = app
        .update_item(
            item.id,
            ItemUpdate {
                title: Some("moved".to_string()),
                ..ItemUpdate::default()
            },
            item.updated_at,
        )
        .unwrap();

    // A caller holding the stale token still succeeds: the edit is
    // retried on the fresh base, last writer wins.
    let result = app
        .update_item(
            item.id,
            ItemUpdate {
                title: Some("latest".to_string()),
                ..ItemUpdate::default()
            },
            item.updated_at,
        )
        .unwrap();
    assert_eq!(result.title, "latest");
    assert!(result.updated_at > moved.updated_at);
}

#[tokio::test]
async fn delete_leaves_tombstone_and_queues_delete() {
    let db = Database::open_in_memory().unwrap();
    let app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    let item = app.add_item(b"gone".to_vec(), "t").unwrap();
    let clock = app.delete_item(item.id).unwrap();

    let items = db.items(DeviceId::from("dev-a"), 100);
    assert!(items.get_opt(item.id).unwrap().is_none());
    let version = items.current_version(item.id).unwrap().unwrap();
    assert!(version.is_tombstone());
    assert_eq!(version.clock, clock);

    let pending = db.queue(DeviceId::from("dev-a")).pending().unwrap();
    let kinds: Vec<_> = pending.iter().map(|op| op.kind).collect();
    assert_eq!(
        kinds,
        vec![
            clipsync_types::OperationKind::Create,
            clipsync_types::OperationKind::Delete
        ]
    );
}

#[tokio::test]
async fn missing_item_fails_not_found() {
    let app = test_app(ScriptedSource::empty());
    let err = app.get_item(clipsync_types::ItemId::new()).unwrap_err();
    assert!(matches!(err, AppError::Storage(StorageError::NotFound(_))));
}

// ── Key rotation ──────────────────────────────────────────────────────

#[tokio::test]
async fn rotation_reencrypts_items_and_retires_the_old_key() {
    let db = Database::open_in_memory().unwrap();
    let app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    let item = app.add_item(b"rotate me".to_vec(), "t").unwrap();
    let old_key = db.keys().active_key(USER).unwrap().unwrap();

    let new_key = app.rotate_key().unwrap();
    assert_ne!(new_key.id, old_key.id);

    // Reads still work through the facade.
    assert_eq!(app.get_item(item.id).unwrap().content, b"rotate me");

    // The pre-rotation key no longer opens the stored ciphertext.
    let raw = db.items(DeviceId::from("dev-a"), 100).get(item.id).unwrap();
    assert!(matches!(
        decrypt(&old_key.material, &raw.content),
        Err(clipsync_crypto::CryptoError::DecryptionFailure(_))
    ));
}

#[tokio::test]
async fn rotation_reencrypts_queued_payloads() {
    let db = Database::open_in_memory().unwrap();
    let app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    app.add_item(b"still queued".to_vec(), "t").unwrap();
    let old_key = db.keys().active_key(USER).unwrap().unwrap();

    let new_key = app.rotate_key().unwrap();

    // A replay after rotation must carry ciphertext the new key opens.
    let pending = db.queue(DeviceId::from("dev-a")).pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        decrypt(&new_key.material, &pending[0].payload).unwrap(),
        b"still queued"
    );
    assert!(matches!(
        decrypt(&old_key.material, &pending[0].payload),
        Err(clipsync_crypto::CryptoError::DecryptionFailure(_))
    ));
}

// ── Capture to store ──────────────────────────────────────────────────

#[tokio::test]
async fn captured_clipboard_content_becomes_an_item() {
    let db = Database::open_in_memory().unwrap();
    let mut app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-a"),
        ScriptedSource::new(["copied text"]),
    )
    .unwrap();

    app.start_monitor().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let listed = loop {
        let listed = app
            .list_items(&ItemFilter::default(), SortOrder::DateDesc)
            .unwrap();
        if !listed.is_empty() {
            break listed;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no item captured in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(listed[0].content, b"copied text");
    assert_eq!(listed[0].title, "copied text");
    app.stop_monitor().await;
}

// ── Accounts and devices ──────────────────────────────────────────────

#[tokio::test]
async fn authentication_round_trip() {
    let app = test_app(ScriptedSource::empty());
    let user = app
        .create_account("a@example.com", "alice", "hunter2xx")
        .unwrap();

    let found = app.authenticate("a@example.com", "hunter2xx").unwrap();
    assert_eq!(found.id, user.id);

    assert!(matches!(
        app.authenticate("a@example.com", "wrong"),
        Err(AppError::InvalidCredentials)
    ));
    assert!(matches!(
        app.authenticate("nobody@example.com", "hunter2xx"),
        Err(AppError::Storage(StorageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn password_reset_installs_new_credentials() {
    let app = test_app(ScriptedSource::empty());
    app.create_account("a@example.com", "alice", "oldpass12")
        .unwrap();

    let token = app.request_password_reset("a@example.com").unwrap();
    app.reset_password("a@example.com", &token, "newpass34")
        .unwrap();

    assert!(app.authenticate("a@example.com", "newpass34").is_ok());
    assert!(matches!(
        app.authenticate("a@example.com", "oldpass12"),
        Err(AppError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn profile_updates_flow_through_the_facade() {
    let db = Database::open_in_memory().unwrap();
    let created = db
        .sessions()
        .create_user("a@example.com", "alice", "$argon2id$stub")
        .unwrap();
    let app = App::new(
        db,
        test_config(),
        &created.id,
        DeviceId::from("dev-a"),
        ScriptedSource::empty(),
    )
    .unwrap();

    assert_eq!(app.profile().unwrap().username, "alice");

    let updated = app.update_profile("alice2", "alice2@example.com").unwrap();
    assert_eq!(updated.username, "alice2");
    assert_eq!(app.profile().unwrap().email, "alice2@example.com");
}

#[tokio::test]
async fn device_registration_respects_the_cap() {
    let db = Database::open_in_memory().unwrap();
    let app = App::new(
        db.clone(),
        test_config(),
        USER,
        DeviceId::from("dev-f"),
        ScriptedSource::empty(),
    )
    .unwrap();

    let sessions = db.sessions();
    for n in 0..5 {
        sessions
            .register_device(USER, &DeviceId::from(format!("dev-{n}").as_str()), 60_000)
            .unwrap();
    }

    assert!(matches!(
        app.register_device(),
        Err(AppError::Storage(StorageError::DeviceLimitExceeded(5)))
    ));

    assert!(app.revoke_device(&DeviceId::from("dev-0")).unwrap());
    let session = app.register_device().unwrap();
    assert_eq!(session.device_id, DeviceId::from("dev-f"));
    assert_eq!(app.verify_session(&session.token).unwrap().user_id, USER);
}
