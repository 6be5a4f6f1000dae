//! Application facade.
//!
//! Wires the storage facets, the capture monitor, the encryption
//! boundary, and the sync client into the operation surface a
//! presentation layer consumes. Item content crosses this crate as
//! plaintext; everything below it (storage, queue, wire) only ever sees
//! ciphertext when encryption is enabled.

mod config;
mod error;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

use clipsync_capture::{CaptureEvent, CaptureMonitor, ClipboardSource, MonitorConfig};
use clipsync_crypto::{decrypt, encrypt, AccountKey};
use clipsync_storage::{
    Database, ItemFilter, ItemStore, ItemUpdate, KeyStore, QueueStore, SessionStore,
    SortOrder, StorageError,
};
use clipsync_sync::{
    create_sync_client, RelayTransport, SyncClientConfig, SyncEvent, SyncHandle,
};
use clipsync_types::{ClipboardItem, DeviceId, HybridClock, ItemId, OperationKind, Session, User};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Device sessions live for 30 days before re-registration is required.
const SESSION_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Installs the process-wide log subscriber, honoring `RUST_LOG`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// How many times a local edit is replayed over a racing inbound apply
/// before the conflict is surfaced.
const CONFLICT_RETRIES: usize = 3;

/// Captured titles are a preview of the content.
const TITLE_PREVIEW_CHARS: usize = 50;

/// The assembled application.
///
/// Generic over the clipboard source so tests can inject a scripted one;
/// production code uses [`App::with_system_clipboard`].
pub struct App<S: ClipboardSource> {
    db: Database,
    config: AppConfig,
    user_id: String,
    device_id: DeviceId,
    items: ItemStore,
    queue: QueueStore,
    sessions: SessionStore,
    keys: KeyStore,
    monitor: CaptureMonitor<S>,
    capture_rx: Option<mpsc::Receiver<CaptureEvent>>,
    pump: Option<JoinHandle<()>>,
    sync_handle: Option<SyncHandle>,
    sync_task: Option<JoinHandle<()>>,
}

#[cfg(feature = "os-clipboard")]
impl App<clipsync_capture::SystemClipboard> {
    /// Builds an app over the OS clipboard.
    pub fn with_system_clipboard(
        db: Database,
        config: AppConfig,
        user_id: &str,
        device_id: DeviceId,
    ) -> AppResult<Self> {
        let source = clipsync_capture::SystemClipboard::new()?;
        Self::new(db, config, user_id, device_id, source)
    }
}

impl<S: ClipboardSource> App<S> {
    pub fn new(
        db: Database,
        config: AppConfig,
        user_id: &str,
        device_id: DeviceId,
        source: S,
    ) -> AppResult<Self> {
        config.validate()?;

        let items = db.items(device_id.clone(), config.max_items);
        let queue = db.queue(device_id.clone());
        let sessions = db.sessions();
        let keys = db.keys();

        let (capture_tx, capture_rx) = mpsc::channel(64);
        let monitor = CaptureMonitor::new(
            source,
            MonitorConfig {
                poll_interval: config.poll_interval(),
                text_only: config.text_only,
            },
            capture_tx,
        );

        info!(user_id, device = %device_id, "application assembled");
        Ok(Self {
            db,
            config,
            user_id: user_id.to_string(),
            device_id,
            items,
            queue,
            sessions,
            keys,
            monitor,
            capture_rx: Some(capture_rx),
            pump: None,
            sync_handle: None,
            sync_task: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    // ── Item operations ─────────────────────────────────────────

    /// Creates an item and queues it for sync. Content is encrypted
    /// before it reaches storage when encryption is enabled.
    pub fn add_item(&self, content: Vec<u8>, title: &str) -> AppResult<ClipboardItem> {
        ingest(
            &self.items,
            &self.queue,
            &self.keys,
            &self.user_id,
            self.config.encryption_enabled,
            content,
            title,
            clipsync_types::TEXT_PLAIN,
        )
    }

    /// Applies a partial edit under the optimistic version check and
    /// queues the result. A `Conflict` against a racing inbound apply is
    /// retried on the fresh base; last-writer-wins makes the local edit
    /// (carrying the later clock) the winner.
    pub fn update_item(
        &self,
        id: ItemId,
        mut fields: ItemUpdate,
        expected_updated_at: i64,
    ) -> AppResult<ClipboardItem> {
        if let Some(content) = fields.content.take() {
            let stored = self.encrypt_outbound(&content)?;
            fields.encrypted = Some(self.config.encryption_enabled);
            fields.content = Some(stored);
        }

        let mut expected = expected_updated_at;
        let mut attempt = 0;
        let updated = loop {
            match self.items.update(id, fields.clone(), expected) {
                Ok(item) => break item,
                Err(StorageError::Conflict { stored, .. }) if attempt < CONFLICT_RETRIES => {
                    debug!(item_id = %id, attempt, "edit raced an inbound apply, retrying");
                    expected = stored;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.queue.enqueue(
            OperationKind::Update,
            updated.id,
            updated.content.clone(),
            updated.clock(),
        )?;
        self.decrypt_inbound(updated)
    }

    /// Tombstones an item and queues the deletion.
    pub fn delete_item(&self, id: ItemId) -> AppResult<HybridClock> {
        let clock = self.items.delete(id)?;
        // The deleting device has acknowledged its own tombstone.
        self.items.ack_tombstone(id, &self.device_id)?;
        self.queue
            .enqueue(OperationKind::Delete, id, Vec::new(), clock.clone())?;
        Ok(clock)
    }

    pub fn get_item(&self, id: ItemId) -> AppResult<ClipboardItem> {
        self.decrypt_inbound(self.items.get(id)?)
    }

    /// Lists items, decrypted for the caller. Pinned items sort first
    /// regardless of the requested order.
    pub fn list_items(
        &self,
        filter: &ItemFilter,
        sort: SortOrder,
    ) -> AppResult<Vec<ClipboardItem>> {
        self.items
            .list(&self.user_id, filter, sort)?
            .into_iter()
            .map(|item| self.decrypt_inbound(item))
            .collect()
    }

    /// Removes every unpinned item locally. A cache trim, not a synced
    /// delete.
    pub fn clear_history(&self) -> AppResult<usize> {
        Ok(self.items.clear_unpinned(&self.user_id)?)
    }

    // ── Capture ─────────────────────────────────────────────────

    /// Starts the clipboard polling loop and, on first call, the pump
    /// that turns capture events into stored items.
    pub async fn start_monitor(&mut self) -> AppResult<()> {
        if let Some(mut rx) = self.capture_rx.take() {
            let db = self.db.clone();
            let device = self.device_id.clone();
            let user = self.user_id.clone();
            let max_items = self.config.max_items;
            let encrypted = self.config.encryption_enabled;
            self.pump = Some(tokio::spawn(async move {
                let items = db.items(device.clone(), max_items);
                let queue = db.queue(device);
                let keys = db.keys();
                while let Some(event) = rx.recv().await {
                    if let Err(e) = store_capture(&items, &queue, &keys, &user, encrypted, event) {
                        warn!("failed to store captured content: {e}");
                    }
                }
                debug!("capture pump exited");
            }));
        }
        self.monitor.start().await;
        Ok(())
    }

    /// Stops the polling loop. No partial capture event is left in
    /// flight once this returns.
    pub async fn stop_monitor(&self) {
        self.monitor.stop().await;
    }

    // ── Sync ────────────────────────────────────────────────────

    /// Starts the sync client over the given transport, returning its
    /// event stream.
    pub fn start_sync(
        &mut self,
        transport: Box<dyn RelayTransport>,
    ) -> AppResult<mpsc::Receiver<SyncEvent>> {
        let sync_config = SyncClientConfig {
            sync_interval: self.config.sync_interval(),
            ..SyncClientConfig::default()
        };
        let (handle, events, client) = create_sync_client(
            self.db.items(self.device_id.clone(), self.config.max_items),
            self.db.queue(self.device_id.clone()),
            self.db.sessions(),
            self.user_id.clone(),
            self.device_id.clone(),
            transport,
            sync_config,
        );
        self.sync_handle = Some(handle);
        self.sync_task = Some(tokio::spawn(client.run()));
        Ok(events)
    }

    /// Stops the sync client and waits for its loop to exit, so any
    /// in-flight store write completes first.
    pub async fn stop_sync(&mut self) -> AppResult<()> {
        if let Some(handle) = self.sync_handle.take() {
            handle.stop().await?;
        }
        if let Some(task) = self.sync_task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    /// Triggers an immediate queue drain.
    pub async fn sync_now(&self) -> AppResult<()> {
        match &self.sync_handle {
            Some(handle) => Ok(handle.sync_now().await?),
            None => Err(AppError::Sync(clipsync_sync::SyncError::ChannelClosed)),
        }
    }

    // ── Accounts and devices ────────────────────────────────────

    /// Creates an account with an Argon2id-hashed password.
    pub fn create_account(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> AppResult<User> {
        let hash = clipsync_crypto::hash_password(password)?;
        Ok(self.sessions.create_user(email, username, &hash)?)
    }

    /// Verifies credentials, returning the account on success.
    pub fn authenticate(&self, email: &str, password: &str) -> AppResult<User> {
        let user = self
            .sessions
            .find_user_by_email(email)?
            .ok_or_else(|| StorageError::NotFound(format!("account {email}")))?;
        if clipsync_crypto::verify_password(&user.password_hash, password)? {
            Ok(user)
        } else {
            Err(AppError::InvalidCredentials)
        }
    }

    /// The account's profile row.
    pub fn profile(&self) -> AppResult<User> {
        Ok(self.sessions.get_user(&self.user_id)?)
    }

    /// Updates the account's username and email.
    pub fn update_profile(&self, username: &str, email: &str) -> AppResult<User> {
        Ok(self
            .sessions
            .update_user_profile(&self.user_id, username, email)?)
    }

    /// Registers this device under the account's 5-device cap.
    pub fn register_device(&self) -> AppResult<Session> {
        Ok(self
            .sessions
            .register_device(&self.user_id, &self.device_id, SESSION_TTL_MS)?)
    }

    /// Revokes a device session, freeing its slot.
    pub fn revoke_device(&self, device: &DeviceId) -> AppResult<bool> {
        Ok(self.sessions.revoke_device(&self.user_id, device)?)
    }

    /// Checks a session token, failing `AuthExpired` when stale.
    pub fn verify_session(&self, token: &str) -> AppResult<Session> {
        Ok(self.sessions.verify_session(token)?)
    }

    /// Issues a password-reset token for the account.
    pub fn request_password_reset(&self, email: &str) -> AppResult<String> {
        Ok(self.sessions.issue_password_reset(email)?)
    }

    /// Consumes a reset token and installs the new password.
    pub fn reset_password(&self, email: &str, token: &str, new_password: &str) -> AppResult<()> {
        let user_id = self.sessions.consume_password_reset(email, token)?;
        let hash = clipsync_crypto::hash_password(new_password)?;
        self.sessions.update_password_hash(&user_id, &hash)?;
        Ok(())
    }

    // ── Key rotation ────────────────────────────────────────────

    /// Rotates the account key: every encrypted item and queued payload
    /// is re-encrypted under a fresh key, then contents and key are
    /// swapped in one transaction. An edit racing the commit fails
    /// `Conflict` and the re-encryption is redone from the fresh rows;
    /// any per-item failure aborts with the prior key still active.
    pub fn rotate_key(&self) -> AppResult<AccountKey> {
        let old = self.keys.ensure_key(&self.user_id)?;
        let new_key = AccountKey::generate(&self.user_id);

        let mut attempt = 0;
        let items = loop {
            match self.try_rotate(&old, &new_key) {
                Ok(count) => break count,
                Err(AppError::Storage(StorageError::Conflict { item_id, .. }))
                    if attempt < CONFLICT_RETRIES =>
                {
                    debug!(%item_id, attempt, "edit raced the key rotation, re-encrypting");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        info!(items, "account key rotated");
        Ok(new_key)
    }

    /// One rotation attempt: snapshot and re-encrypt items and queued
    /// payloads, then commit. Returns the number of items rewritten.
    fn try_rotate(&self, old: &AccountKey, new_key: &AccountKey) -> AppResult<usize> {
        let stored = self
            .items
            .list(&self.user_id, &ItemFilter::default(), SortOrder::DateAsc)?;
        let mut reencrypted = Vec::with_capacity(stored.len());
        for item in stored {
            if !item.encrypted {
                continue;
            }
            let plain = decrypt(&old.material, &item.content)
                .map_err(|source| AppError::ItemDecryption {
                    item_id: item.id,
                    source,
                })?;
            reencrypted.push((item.id, item.updated_at, encrypt(&new_key.material, &plain)?));
        }

        // Queued payloads carry the same ciphertext as their items and
        // would be unreadable on replay once the old key is gone.
        let mut requeued = Vec::new();
        if self.config.encryption_enabled {
            for op in self.queue.pending()? {
                if op.payload.is_empty() {
                    continue;
                }
                let plain = decrypt(&old.material, &op.payload)
                    .map_err(|source| AppError::ItemDecryption {
                        item_id: op.item_id,
                        source,
                    })?;
                requeued.push((op.seq, encrypt(&new_key.material, &plain)?));
            }
        }

        self.keys.rotate(&self.user_id, new_key, &reencrypted, &requeued)?;
        Ok(reencrypted.len())
    }

    // ── Encryption boundary ─────────────────────────────────────

    fn encrypt_outbound(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        if !self.config.encryption_enabled {
            return Ok(plaintext.to_vec());
        }
        let key = self.keys.ensure_key(&self.user_id)?;
        Ok(encrypt(&key.material, plaintext)?)
    }

    fn decrypt_inbound(&self, mut item: ClipboardItem) -> AppResult<ClipboardItem> {
        if !item.encrypted {
            return Ok(item);
        }
        let key = self
            .keys
            .active_key(&self.user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("encryption key for {}", self.user_id)))?;
        item.content = decrypt(&key.material, &item.content)
            .map_err(|source| AppError::ItemDecryption {
                item_id: item.id,
                source,
            })?;
        Ok(item)
    }
}

/// Shared create path for explicit adds and captured clipboard content.
#[allow(clippy::too_many_arguments)]
fn ingest(
    items: &ItemStore,
    queue: &QueueStore,
    keys: &KeyStore,
    user_id: &str,
    encryption_enabled: bool,
    content: Vec<u8>,
    title: &str,
    content_type: &str,
) -> AppResult<ClipboardItem> {
    let stored_content = if encryption_enabled {
        let key = keys.ensure_key(user_id)?;
        encrypt(&key.material, &content)?
    } else {
        content.clone()
    };

    let item = items.create(user_id, stored_content, title, content_type, encryption_enabled)?;
    queue.enqueue(OperationKind::Create, item.id, item.content.clone(), item.clock())?;

    // Hand the caller the plaintext view.
    let mut plain = item;
    plain.content = content;
    Ok(plain)
}

fn store_capture(
    items: &ItemStore,
    queue: &QueueStore,
    keys: &KeyStore,
    user_id: &str,
    encryption_enabled: bool,
    event: CaptureEvent,
) -> AppResult<()> {
    let title = title_preview(&event.content);
    let item = ingest(
        items,
        queue,
        keys,
        user_id,
        encryption_enabled,
        event.content,
        &title,
        &event.content_type,
    )?;
    debug!(item_id = %item.id, "stored captured clipboard content");
    Ok(())
}

/// First characters of the content, lossily decoded, as the item title.
fn title_preview(content: &[u8]) -> String {
    let text = String::from_utf8_lossy(content);
    let preview: String = text.chars().take(TITLE_PREVIEW_CHARS).collect();
    preview.replace(['\n', '\r'], " ").trim().to_string()
}
